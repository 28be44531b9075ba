//! one-pf-manage
//!
//! Creates, resizes and destroys OpenNebula virtual machines so that they
//! match one or more platform definition files.

use anyhow::Context;
use clap::Parser;
use one_client::OneClient;
use platform_controller::{Args, Controller, ControllerError, LogLevel};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if level == LogLevel::Debug {
        builder.with_target(true).with_file(true).with_line_number(true).init();
    } else {
        builder.with_target(false).init();
    }
}

async fn run(args: Args, cancel: CancellationToken) -> anyhow::Result<ExitCode> {
    info!("Starting one-pf-manage {:?} on {} file(s)", args.action, args.files.len());

    let client = OneClient::new(args.client_config());
    let controller = Controller::new(Box::new(client), args.engine_config(), cancel);

    let reports = match controller.run(args.action, &args.files).await {
        Ok(reports) => reports,
        Err(ControllerError::Cancelled) => {
            warn!("Caught SIGINT (Ctrl-C), exiting.");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e).context("run aborted"),
    };

    let failures: usize = reports.iter().map(|report| report.failures.len()).sum();
    if failures > 0 {
        error!("{}", ControllerError::BatchFailed { failures });
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_level);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match run(args, cancel).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
