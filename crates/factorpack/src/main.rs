use std::{env, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use factorpack::{cli::Cli, config::Config, orchestrator::BundleOrchestrator};
use log::{error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .format_timestamp(None)
        .format_target(false)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let cwd = env::current_dir().context("Failed to determine working directory")?;

    let mut config = Config::load(cli.config.as_deref(), &cwd)?;
    config.apply(cli.config_layer()?);

    let summary = BundleOrchestrator::new(config).with_cwd(cwd).run()?;
    info!(
        "Bundled {} modules into {} files",
        summary.module_count,
        summary.outputs.len()
    );
    Ok(())
}
