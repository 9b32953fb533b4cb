//! Main entry point of the `adcm` command.

use std::process::ExitCode;

use adcm_common::ErrorEnvelope;
use adcm_server::{commands, model::Cli, model::Configuration, startup};
use clap::Parser;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let configuration = match Configuration::load(&cli.config, cli.data_dir.as_deref()) {
        Ok(configuration) => configuration,
        Err(e) => return fail(&e),
    };
    let _logging_guard = match startup::init_logging(&configuration.logging_config()) {
        Ok(guard) => guard,
        Err(e) => return fail(&e),
    };
    adcm_scheduler::metrics::describe_metrics();

    match commands::dispatch(&configuration, &cli.command).await {
        Ok(summary) => {
            println!("{}", summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(command = ?cli.command, "Command failed: {:#}", e);
            fail(&e)
        }
    }
}

/// Print the error envelope on stderr
fn fail(err: &anyhow::Error) -> ExitCode {
    let envelope = ErrorEnvelope::from_anyhow(err);
    match serde_json::to_string(&envelope) {
        Ok(body) => eprintln!("{}", body),
        Err(_) => eprintln!("{}: {}", envelope.code, envelope.desc),
    }
    ExitCode::FAILURE
}
