//! CLI - Command-line argument parsing
//!
//! Keeps argument parsing separate from execution logic.

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use intake_common::AnalysisMode;
use std::path::PathBuf;

/// Intake CLI
#[derive(Parser)]
#[command(name = "intakectl")]
#[command(about = "Intake - ingestion health monitor", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Daemon URL (overrides $INTAKED_URL and the default)
    #[arg(long, global = true)]
    pub url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask the daemon to analyze one day
    Analyze {
        /// Day to analyze (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Restrict to these sources (repeatable)
        #[arg(long = "source")]
        sources: Vec<String>,

        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Output JSON only
        #[arg(long)]
        json: bool,

        /// Include and print the reasoning trace
        #[arg(long)]
        trace: bool,
    },

    /// Analyze one day offline with the deterministic detectors (no daemon, no oracle)
    Scan {
        #[arg(long)]
        date: NaiveDate,

        /// Directory holding the dated snapshot folders
        #[arg(long)]
        data_dir: PathBuf,

        /// Directory holding the CV files
        #[arg(long)]
        cv_dir: PathBuf,

        #[arg(long = "source")]
        sources: Vec<String>,

        /// Config file for detection defaults and holidays
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Show the CV of one source
    Cv {
        source_id: String,

        #[arg(long)]
        cv_dir: PathBuf,

        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Show daemon health
    Status {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Agentic,
    Pipeline,
}

impl From<ModeArg> for AnalysisMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Agentic => AnalysisMode::Agentic,
            ModeArg::Pipeline => AnalysisMode::Pipeline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_analyze() {
        let cli = Cli::try_parse_from([
            "intakectl", "analyze", "--date", "2025-09-09", "--source", "BankX", "--source", "Rappi",
            "--mode", "pipeline", "--trace",
        ])
        .unwrap();
        match cli.command {
            Commands::Analyze { date, sources, mode, trace, json } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2025, 9, 9).unwrap());
                assert_eq!(sources, vec!["BankX", "Rappi"]);
                assert!(matches!(mode, Some(ModeArg::Pipeline)));
                assert!(trace);
                assert!(!json);
            }
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn test_parse_scan() {
        let cli = Cli::try_parse_from([
            "intakectl", "scan", "--date", "2025-09-09", "--data-dir", "/tmp/data", "--cv-dir",
            "/tmp/cv", "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Scan { data_dir, config, json, sources, .. } => {
                assert_eq!(data_dir, PathBuf::from("/tmp/data"));
                assert!(config.is_none());
                assert!(sources.is_empty());
                assert!(json);
            }
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn test_rejects_bad_date() {
        assert!(Cli::try_parse_from(["intakectl", "analyze", "--date", "yesterday"]).is_err());
    }
}
