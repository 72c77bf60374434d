use config::{Config, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::Error;

pub const DEFAULT_THRESHOLD: u8 = 90;
pub const DEFAULT_STATE_DIR: &str = ".fuzzy-dedupe";
pub const DEFAULT_AUDIT_LOG: &str = "deletions.log";
pub const DEFAULT_ORACLE_PROGRAM: &str = "ssdeep";
const ENV_PREFIX: &str = "FUZZY_DEDUPE";

/// Whether a run may touch the candidate set. Fixed for a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Simulate,
    Apply,
}

impl RunMode {
    pub fn is_simulate(self) -> bool {
        self == RunMode::Simulate
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Simulate => write!(f, "simulate"),
            RunMode::Apply => write!(f, "apply"),
        }
    }
}

/// Which qualifying match decides a candidate that matches several reference files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Encounter order of the match stream; later matches for the same path are ignored.
    #[default]
    FirstMatch,
    /// Highest score wins; ties keep the earlier match.
    BestMatch,
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPolicy::FirstMatch => write!(f, "first_match"),
            MatchPolicy::BestMatch => write!(f, "best_match"),
        }
    }
}

impl FromStr for MatchPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "first" | "first_match" => Ok(MatchPolicy::FirstMatch),
            "best" | "best_match" => Ok(MatchPolicy::BestMatch),
            other => Err(Error::InvalidConfig(format!(
                "unknown match policy '{}' (expected first_match or best_match)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub reference_dir: PathBuf,
    pub candidate_dir: PathBuf,
    pub threshold: u8,
    pub state_dir: PathBuf,
    pub audit_log: PathBuf,
    pub mode: RunMode,
    pub match_policy: MatchPolicy,
    /// Fall back to per-file comparison when the batch form is unavailable.
    pub fallback: bool,
    pub ignore_patterns: Vec<String>,
    pub oracle_program: String,
}

/// Values given on the command line. `None` leaves the lower layers in charge.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub reference_dir: Option<String>,
    pub candidate_dir: Option<String>,
    pub threshold: Option<u8>,
    pub state_dir: Option<String>,
    pub audit_log: Option<String>,
    pub mode: Option<RunMode>,
    pub match_policy: Option<MatchPolicy>,
    pub fallback: Option<bool>,
    pub oracle_program: Option<String>,
}

impl AppConfig {
    pub fn new(
        reference_dir: impl Into<PathBuf>,
        candidate_dir: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            reference_dir: reference_dir.into(),
            candidate_dir: candidate_dir.into(),
            threshold: DEFAULT_THRESHOLD,
            audit_log: PathBuf::from(DEFAULT_AUDIT_LOG),
            state_dir: state_dir.into(),
            mode: RunMode::default(),
            match_policy: MatchPolicy::default(),
            fallback: true,
            ignore_patterns: Vec::new(),
            oracle_program: DEFAULT_ORACLE_PROGRAM.to_string(),
        }
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_match_policy(mut self, policy: MatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }

    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log = path.into();
        self
    }

    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.threshold > 100 {
            return Err(Error::InvalidConfig(format!(
                "threshold must be within 0..=100, got {}",
                self.threshold
            )));
        }
        if self.reference_dir.as_os_str().is_empty() || self.candidate_dir.as_os_str().is_empty()
        {
            return Err(Error::InvalidConfig(
                "reference_dir and candidate_dir must both be set".to_string(),
            ));
        }
        if self.reference_dir == self.candidate_dir {
            return Err(Error::InvalidConfig(format!(
                "reference and candidate directories are the same: {}",
                self.reference_dir.display()
            )));
        }
        if self.state_dir.starts_with(&self.candidate_dir) {
            return Err(Error::InvalidConfig(format!(
                "state directory {} must not live inside the candidate directory",
                self.state_dir.display()
            )));
        }
        Ok(())
    }
}

/// Layered load: defaults, then `Config.toml` (or `config_file`), then
/// `FUZZY_DEDUPE_*` environment variables, then command-line overrides.
/// Call `AppConfig::validate` before running anything that needs both directories.
pub fn load_configuration(
    config_file: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<AppConfig, Error> {
    let file_source = match config_file {
        Some(path) => ConfigFile::from(path).required(true),
        None => ConfigFile::with_name("Config").required(false),
    };

    let builder = Config::builder()
        .set_default("reference_dir", "")?
        .set_default("candidate_dir", "")?
        .set_default("threshold", DEFAULT_THRESHOLD as i64)?
        .set_default("state_dir", DEFAULT_STATE_DIR)?
        .set_default("audit_log", DEFAULT_AUDIT_LOG)?
        .set_default("mode", RunMode::default().to_string())?
        .set_default("match_policy", MatchPolicy::default().to_string())?
        .set_default("fallback", true)?
        .set_default("ignore_patterns", Vec::<String>::new())?
        .set_default("oracle_program", DEFAULT_ORACLE_PROGRAM)?
        .add_source(file_source)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("ignore_patterns"),
        )
        .set_override_option("reference_dir", overrides.reference_dir.clone())?
        .set_override_option("candidate_dir", overrides.candidate_dir.clone())?
        .set_override_option("threshold", overrides.threshold.map(i64::from))?
        .set_override_option("state_dir", overrides.state_dir.clone())?
        .set_override_option("audit_log", overrides.audit_log.clone())?
        .set_override_option("mode", overrides.mode.map(|m| m.to_string()))?
        .set_override_option(
            "match_policy",
            overrides.match_policy.map(|p| p.to_string()),
        )?
        .set_override_option("fallback", overrides.fallback)?
        .set_override_option("oracle_program", overrides.oracle_program.clone())?
        .build()?;

    Ok(builder.try_deserialize::<AppConfig>()?)
}
