use std::{path::PathBuf, process::ExitCode};

use adc_acme::{AppConfig, BatchReport, Orchestrator};
use clap::{Args, Parser, Subcommand};
use eyre::WrapErr as _;

/// Issue ACME certificates and install them on NetScaler ADC appliances.
#[derive(Debug, Parser)]
#[command(name = "adc-acme", version, about)]
struct Cli {
    /// Application configuration file.
    #[arg(short = 'c', long, env = "ADC_ACME_CONFIG")]
    config: PathBuf,

    /// Log level filter; `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Issue and install certificates.
    Request(Selection),
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct Selection {
    /// Name of the request to run.
    #[arg(long)]
    name: Option<String>,

    /// Run every request.
    #[arg(long)]
    all: bool,
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();

    env_logger::Builder::new()
        .parse_filters(&cli.log_level)
        .parse_env("RUST_LOG")
        .init();

    let config = AppConfig::load(&cli.config)?;
    let orchestrator = Orchestrator::from_config(config)?;

    let report = match cli.command {
        Command::Request(Selection {
            name: Some(name), ..
        }) => orchestrator
            .request_one(&name)
            .await
            .wrap_err_with(|| format!("failed to run request {name}"))?,

        Command::Request(Selection { .. }) => orchestrator.request_all().await?,
    };

    summarize(&report);

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn summarize(report: &BatchReport) {
    for name in &report.issued {
        log::info!("issued request={name}");
    }

    for installed in &report.installed {
        log::info!(
            "installed request={} target={}",
            installed.request,
            installed.target
        );
    }

    if !report.is_success() {
        log::error!("{} request(s) failed", report.failures.len());
    }
}
