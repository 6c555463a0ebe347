mod analysis;
mod browser;
mod checkpoint;
mod cli;
mod data_io;
mod detail;
mod error;
mod extract;
mod listing;
mod navigator;
mod runtime;
mod tui;
mod types;
mod ui_utils;

use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use runtime::{AnalysisJob, DetailJob, ListingJob};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // log lines would tear the alternate screen
    let interactive_review = matches!(cli.command, Command::Review { no_tui: false, .. });
    if !interactive_review {
        init_tracing();
    }

    match &cli.command {
        Command::Listings {
            url,
            max_pages,
            zip,
            output,
        } => {
            let walk = runtime::run_listings(
                &cli.webdriver,
                ListingJob {
                    start_url: url,
                    max_pages: *max_pages,
                    zip,
                    output,
                },
            )
            .await?;
            info!(records = walk.records.len(), pages = walk.pages, "done");
        }
        Command::Details {
            input,
            output,
            batch_size,
            delay_ms,
        } => {
            let summary = runtime::run_details(
                &cli.webdriver,
                DetailJob {
                    input,
                    output,
                    batch_size: *batch_size,
                    delay: delay_ms.map(Duration::from_millis),
                },
            )
            .await?;
            info!(processed = summary.processed, failed = summary.failed, "done");
        }
        Command::Analyze {
            input,
            output,
            batch_size,
            model,
            api_base,
            delay_ms,
            retry_errors,
        } => {
            let summary = runtime::run_analysis(AnalysisJob {
                input,
                output,
                batch_size: *batch_size,
                model,
                api_base,
                retry_errors: *retry_errors,
                delay: delay_ms.map(Duration::from_millis),
            })
            .await?;
            info!(processed = summary.processed, failed = summary.failed, "done");
        }
        Command::Review { file, no_tui } => runtime::run_review(file, *no_tui)?,
    }
    Ok(())
}
