//! Intake Control - CLI client for the ingestion health monitor
//!
//! Triggers analyses on intaked, runs offline scans and inspects CVs.

mod cli;
mod client;
mod display;
mod scan;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use client::IntakedClient;
use intake_common::config::DetectionConfig;
use intake_common::{CvRepository, Report};
use serde::Serialize;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze { date, sources, mode, json, trace } => {
            let client = IntakedClient::new(cli.url)?;
            let report = client.analyze(date, &sources, mode.map(Into::into), trace).await?;
            print_report(&report, json, trace)
        }
        Commands::Scan { date, data_dir, cv_dir, sources, config, json } => {
            let report = scan::run(&scan::ScanRequest {
                date,
                data_dir: &data_dir,
                cv_dir: &cv_dir,
                sources: &sources,
                config: config.as_deref(),
            })?;
            print_report(&report, json, false)
        }
        Commands::Cv { source_id, cv_dir, json } => {
            let repo = CvRepository::load_dir(&cv_dir, &DetectionConfig::default())?;
            let profile = repo.get_profile(&source_id)?;
            if json {
                print_json(profile)
            } else {
                print!("{}", display::render_profile(profile));
                Ok(())
            }
        }
        Commands::Status { json } => {
            let client = IntakedClient::new(cli.url)?;
            let health = client.health().await?;
            if json {
                print_json(&health)
            } else {
                print!("{}", display::render_health(&health, client.base_url()));
                Ok(())
            }
        }
    }
}

fn print_report(report: &Report, json: bool, show_trace: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    print!("{}", display::render_report(report, show_trace));
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
