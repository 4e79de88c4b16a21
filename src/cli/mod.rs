use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::stages::StageKind;

#[derive(Parser)]
#[command(
    name = "batch-transcriptor",
    about = "Resumable batch pipeline: resolve video pages, archive media to S3, transcribe",
    version,
    long_about = "Walks a catalog of video page URLs through three checkpointed stages. Resolve finds the embedded \
                  player and its media id, store copies the media into S3, transcribe produces a time-aligned \
                  transcript through Whisper or AWS Transcribe. Every stage can be interrupted and re-run; finished \
                  work is never repeated."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./config.yaml, then the user config dir)
    #[arg(short, long, global = true, value_name = "FILE", env = "BATCH_TRANSCRIPTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add items to the catalog from a list of `id,url` lines or bare URLs
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Run one stage, or all of them in order
    Run {
        #[arg(short, long, value_enum, default_value = "all")]
        stage: StageArg,

        /// Attempt at most this many items per stage
        #[arg(short, long, value_name = "N")]
        limit: Option<usize>,

        /// Retry items that previously failed
        #[arg(long)]
        retry_failed: bool,

        /// Fetch pages flagged as having no video again
        #[arg(long)]
        recheck_unmatched: bool,
    },

    /// Show catalog counts per status and platform
    Stats {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List failed items with their failure reason
    Failed,

    /// Delete a stage checkpoint so the next run starts fresh
    Reset {
        #[arg(short, long, value_enum)]
        stage: StageArg,
    },

    /// Show or initialise the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageArg {
    Resolve,
    Store,
    Transcribe,
    All,
}

impl StageArg {
    pub fn stages(&self) -> Vec<StageKind> {
        match self {
            StageArg::Resolve => vec![StageKind::Resolve],
            StageArg::Store => vec![StageKind::Store],
            StageArg::Transcribe => vec![StageKind::Transcribe],
            StageArg::All => StageKind::ALL.to_vec(),
        }
    }
}

#[derive(ValueEnum, Clone, Debug)]
pub enum OutputFormat {
    /// Plain text
    Text,
    /// JSON
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::parse_from([
            "batch-transcriptor",
            "run",
            "--stage",
            "store",
            "--limit",
            "10",
            "--retry-failed",
        ]);
        match cli.command {
            Commands::Run {
                stage,
                limit,
                retry_failed,
                recheck_unmatched,
            } => {
                assert_eq!(stage.stages(), vec![StageKind::Store]);
                assert_eq!(limit, Some(10));
                assert!(retry_failed);
                assert!(!recheck_unmatched);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_all_runs_stages_in_order() {
        assert_eq!(
            StageArg::All.stages(),
            vec![StageKind::Resolve, StageKind::Store, StageKind::Transcribe]
        );
    }
}
