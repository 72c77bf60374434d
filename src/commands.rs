use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use fuzzy_dedupe::config::ConfigOverrides;
use fuzzy_dedupe::{MatchPolicy, RunMode};

#[derive(Debug, Parser)] // requires `derive` feature
#[command(name = "fuzzy-dedupe")]
#[command(
    about = "Remove recovered files that are fuzzy near-duplicates of a reference set",
    long_about = None
)]
pub struct Cli {
    /// Configuration file (defaults to ./Config.toml when present)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the pipeline, resuming whatever an earlier run left unfinished
    Run(RunArgs),
    /// Show stage outputs and pending checkpoints
    Status(DirArgs),
    /// Delete all pipeline state (the audit log is kept)
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        #[command(flatten)]
        dirs: DirArgs,
    },
    /// Print configuration values
    PrintConfig(DirArgs),
}

#[derive(Debug, Args, Default)]
pub struct DirArgs {
    /// Trusted reference directory
    #[arg(short, long, value_name = "DIR")]
    pub reference: Option<String>,
    /// Recovered files to deduplicate
    #[arg(short, long, value_name = "DIR")]
    pub candidates: Option<String>,
    /// Where indexes, reports and checkpoints live
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub dirs: DirArgs,
    /// Minimum similarity score (0-100) for a candidate to be deleted
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub threshold: Option<u8>,
    /// Audit log of real deletions
    #[arg(long, value_name = "FILE")]
    pub audit_log: Option<String>,
    /// Actually delete files (default is to only report)
    #[arg(long)]
    pub apply: bool,
    /// Which match decides a candidate with several references: first or best
    #[arg(long, value_name = "POLICY")]
    pub policy: Option<MatchPolicy>,
    /// Abort instead of comparing file by file when batch comparison fails
    #[arg(long)]
    pub no_fallback: bool,
    /// Fuzzy hashing program
    #[arg(long, value_name = "PROGRAM")]
    pub oracle: Option<String>,
}

impl DirArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            reference_dir: self.reference.clone(),
            candidate_dir: self.candidates.clone(),
            state_dir: self.state_dir.clone(),
            ..Default::default()
        }
    }
}

impl RunArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            threshold: self.threshold,
            audit_log: self.audit_log.clone(),
            mode: self.apply.then_some(RunMode::Apply),
            match_policy: self.policy,
            fallback: self.no_fallback.then_some(false),
            oracle_program: self.oracle.clone(),
            ..self.dirs.overrides()
        }
    }
}
