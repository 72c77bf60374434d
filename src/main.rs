mod cli_progress;
mod commands;
mod logging;

use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use commands::{Cli, Commands};
use colored::*;
use dotenv::dotenv;
use fuzzy_dedupe::config::{self, AppConfig, ConfigOverrides};
use fuzzy_dedupe::engine::PipelineOutcome;
use fuzzy_dedupe::{CancelToken, Error, Pipeline, SsdeepOracle};
use cli_progress::CliReporter;
use tracing::{error, info, warn};

const EXIT_ABORTED: u8 = 1;
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> ExitCode {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();

    match dispatch(args) {
        Ok(code) => code,
        Err(err) => {
            error!("Error: {:#}", err);
            ExitCode::from(EXIT_ABORTED)
        }
    }
}

fn dispatch(args: Cli) -> Result<ExitCode> {
    let config_file = args.config.as_deref();

    match args.command {
        Some(Commands::Run(run_args)) => {
            let config = load_config(config_file, &run_args.overrides())?;
            run_pipeline(config)
        }
        Some(Commands::Status(dirs)) => {
            let config = load_config(config_file, &dirs.overrides())?;
            print_status(config)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Reset { yes, dirs }) => {
            let config = load_config(config_file, &dirs.overrides())?;
            let prompt = format!(
                "Are you SURE you want to discard all pipeline state in {}?",
                config.state_dir.display()
            );
            if yes || prompt_confirm(&prompt, Some(false))? {
                let state_dir = config.state_dir.clone();
                new_pipeline(config)?.reset()?;
                println!("Pipeline state cleared in {}", state_dir.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::PrintConfig(dirs)) => {
            let config = load_config(config_file, &dirs.overrides())?;
            print!(
                "{}",
                toml::to_string_pretty(&config).context("Error rendering configuration")?
            );
            Ok(ExitCode::SUCCESS)
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(config_file: Option<&Path>, overrides: &ConfigOverrides) -> Result<AppConfig> {
    config::load_configuration(config_file, overrides).context("Error loading configuration")
}

fn new_pipeline(config: AppConfig) -> Result<Pipeline<SsdeepOracle>> {
    let oracle = SsdeepOracle::new(config.oracle_program.clone(), config.state_dir.clone());
    #[cfg(feature = "rocksdb")]
    let db_path = config.state_dir.join("state.db");
    let pipeline = Pipeline::new(config, oracle)?;

    #[cfg(feature = "rocksdb")]
    let pipeline = pipeline.with_store(Box::new(
        fuzzy_dedupe::store::RocksStateStore::open(&db_path)
            .context("Error opening state database")?,
    ));

    Ok(pipeline)
}

fn run_pipeline(config: AppConfig) -> Result<ExitCode> {
    config.validate()?;

    let cancel = CancelToken::new();
    cancel
        .register_signals()
        .context("Error installing signal handlers")?;

    let pipeline = new_pipeline(config)?.with_cancel_token(cancel);
    let reporter = CliReporter::new();

    match pipeline.run(&reporter) {
        Ok(outcome) => {
            print_outcome(&outcome, pipeline.config());
            if outcome.interrupted {
                Ok(ExitCode::from(EXIT_INTERRUPTED))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Err(err) => {
            error!("Pipeline aborted: {}", err);
            if let Error::OracleUnavailable { .. } = err.root() {
                warn!("No files were deleted. Re-run with fallback enabled to compare file by file.");
            }
            info!(
                "Completed stage output is kept in {} for retry",
                pipeline.paths().state_dir.display()
            );
            Ok(ExitCode::from(EXIT_ABORTED))
        }
    }
}

fn print_outcome(outcome: &PipelineOutcome, config: &AppConfig) {
    println!();
    if outcome.interrupted {
        warn!(
            "Interrupted during {}; re-run the same command to resume",
            outcome.final_stage
        );
    }
    info!(
        "Reference: {} files, candidates: {} files, comparison: {}",
        format!("{}", outcome.reference_files).cyan(),
        format!("{}", outcome.candidate_files).cyan(),
        outcome
            .comparison
            .map(|m| format!("{:?}", m))
            .unwrap_or_else(|| "-".to_string()),
    );
    info!(
        "{} deletion candidates at threshold {}",
        format!("{}", outcome.candidates.len()).red(),
        config.threshold,
    );
    if config.mode.is_simulate() {
        info!(
            "{} files would be deleted; re-run with --apply to delete them",
            format!("{}", outcome.deletion.simulated).yellow(),
        );
    } else {
        info!(
            "{} deleted, {} already gone, {} failed (audit log: {})",
            format!("{}", outcome.deletion.deleted).red(),
            outcome.deletion.already_gone,
            outcome.deletion.failed,
            config.audit_log.display(),
        );
    }
    if outcome.deletion.refused > 0 {
        warn!(
            "{} candidates outside {} were refused",
            outcome.deletion.refused,
            config.candidate_dir.display()
        );
    }
    info!("Elapsed: {}", format!("{:.2}s", outcome.elapsed.as_secs_f64()).green());
}

fn print_status(config: AppConfig) -> Result<()> {
    let pipeline = new_pipeline(config)?;
    println!("State directory: {}", pipeline.paths().state_dir.display());
    for status in pipeline.status()? {
        let state = if status.complete {
            "complete".green()
        } else if status.checkpoint.is_some() {
            "in progress".yellow()
        } else {
            "pending".dimmed()
        };
        let checkpoint = status
            .checkpoint
            .map(|n| format!(" (checkpoint: {} units)", n))
            .unwrap_or_default();
        let output = status
            .output
            .map(|p| format!(" -> {}", p.display()))
            .unwrap_or_default();
        println!("  {:<24} {}{}{}", status.stage.to_string(), state, checkpoint, output);
    }
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
