use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batch_transcriptor::catalog::{parse_import_list, SqliteCatalog};
use batch_transcriptor::checkpoint::FileCheckpointStore;
use batch_transcriptor::cli::{Cli, Commands};
use batch_transcriptor::orchestrator::{BarMonitor, ProgressMonitor, TracingMonitor};
use batch_transcriptor::stages::PipelineStages;
use batch_transcriptor::{output, utils, BatchOrchestrator, Config, OutputFormat, RateLimiter, RunOptions};

fn init_tracing(cli: &Cli) {
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("batch_transcriptor=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "batch_transcriptor=info".into())
    };

    // Logs go to stderr; stdout carries reports
    tracing_subscriber::registry()
        .with(filter)
        .with(cli.log_json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!cli.log_json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

fn open_catalog(config: &Config) -> Result<Arc<SqliteCatalog>> {
    let path = &config.catalog.db_path;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs_err::create_dir_all(parent)?;
        }
    }
    let catalog = SqliteCatalog::open(path).with_context(|| format!("Failed to open catalog {}", path.display()))?;
    Ok(Arc::new(catalog))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = Config::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Import { file } => {
            let content = fs_err::read_to_string(&file)?;
            let entries = parse_import_list(&content);
            let catalog = open_catalog(&config)?;
            let inserted = catalog.import(&entries)?;
            println!(
                "Imported {} new item(s) from {} ({} already present)",
                inserted,
                file.display(),
                entries.len() - inserted
            );
        }
        Commands::Run {
            stage,
            limit,
            retry_failed,
            recheck_unmatched,
        } => {
            config.validate()?;

            // Non-fatal: the tools may only be needed by some items
            let missing_deps = utils::check_dependencies(&config.app.yt_dlp_path).await;
            if !missing_deps.is_empty() {
                eprintln!("⚠️  Dependency check warnings:");
                for dep in missing_deps {
                    eprintln!("   • {}", dep);
                }
                eprintln!("   (Continuing anyway - tools may be available)");
            }

            let catalog = open_catalog(&config)?;
            let limiter = RateLimiter::from_config(&config.rate_limits);
            let stages = PipelineStages::from_config(&config, limiter.clone())
                .await
                .context("Failed to set up pipeline stages")?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Interrupt received, stopping after the current item...");
                    on_signal.cancel();
                }
            });

            let monitor: Arc<dyn ProgressMonitor> = if cli.quiet || cli.log_json {
                Arc::new(TracingMonitor)
            } else {
                Arc::new(BarMonitor::new())
            };
            let orchestrator = BatchOrchestrator::new(
                catalog,
                limiter,
                config.retry_policy(),
                config.catalog.checkpoint_dir.clone(),
            )
            .with_checkpoint_interval(config.pipeline.checkpoint_interval)
            .with_monitor(monitor)
            .with_cancellation(cancel);

            let options = RunOptions {
                limit,
                retry_failed,
                recheck_unmatched,
            };
            for kind in stage.stages() {
                let report = orchestrator.run_stage(stages.get(kind), &options).await?;
                print!("{}", output::format_run_summary(&report));
                if report.cancelled {
                    break;
                }
            }
        }
        Commands::Stats { format } => {
            let stats = open_catalog(&config)?.stats()?;
            print!("{}", output::format_stats(&stats, &format)?);
            if matches!(format, OutputFormat::Json) {
                println!();
            }
        }
        Commands::Failed => {
            let failed = open_catalog(&config)?.failed_items()?;
            print!("{}", output::format_failed(&failed));
        }
        Commands::Reset { stage } => {
            for kind in stage.stages() {
                let store = FileCheckpointStore::for_stage(&config.catalog.checkpoint_dir, kind.as_str());
                store.reset()?;
                println!("Reset {} checkpoint ({})", kind, store.path().display());
            }
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                println!("Configuration loaded. Use --show to print it; edit the YAML file to change settings.");
            }
        }
    }

    Ok(())
}
