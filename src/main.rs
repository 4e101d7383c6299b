use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use lookout::config::Config;
use lookout::export::ExportFormat;
use lookout::platform::{PlatformMetrics, ProcessProbe};
use lookout::{spawn_tick_loop, ObservabilityContext};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Command-line arguments for the observability pipeline
#[derive(Parser, Debug)]
#[command(
    name = "lookout",
    about = "In-process observability pipeline - metrics, regressions, alerts and errors",
    long_about = "Samples this process's resource usage on a fixed tick, maintains rolling \
                  baselines, detects regressions and memory growth, and raises severity-graded \
                  alerts. Optionally exports every buffer on shutdown."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Directory to write exports to on shutdown
    #[arg(short, long, value_name = "DIR")]
    export: Option<PathBuf>,

    /// Export format
    #[arg(short, long, value_enum, default_value_t = ExportFormat::Structured)]
    format: ExportFormat,

    /// Seconds between ticks, overriding the configuration
    #[arg(short, long, value_name = "SECONDS")]
    interval: Option<u64>,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in Config::load
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        if let Some(ref export_dir) = self.export {
            if export_dir.exists() && !export_dir.is_dir() {
                return Err(format!(
                    "Export path is not a directory: {}",
                    export_dir.display()
                ));
            }
        }

        if self.interval == Some(0) {
            return Err("Tick interval must be at least one second".to_string());
        }

        Ok(())
    }

    /// Effective tick interval: the CLI override, else the configured one
    fn tick_interval(&self, config: &Config) -> Duration {
        Duration::from_secs(
            self.interval
                .unwrap_or(config.collection.tick_interval_seconds),
        )
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref());
    let interval = cli.tick_interval(&config);
    info!(
        "Environment: {}, tick interval: {}s",
        config.environment,
        interval.as_secs()
    );

    let context = ObservabilityContext::new(config, PlatformMetrics::available(ProcessProbe::new()));
    context.install_capture();
    let context = Arc::new(Mutex::new(context));

    let ticker = spawn_tick_loop(Arc::clone(&context), interval)
        .context("Failed to start tick loop")?;

    let (shutdown_sender, shutdown_receiver) = mpsc::channel();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .context("Error setting SIGINT handler for graceful shutdown")?;

    info!("Lookout is running. Press Ctrl+C to stop.");
    // A closed channel also means shutdown
    let _ = shutdown_receiver.recv();

    ticker.stop();

    let mut context = context
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    context.shutdown();

    let stats = context.alerts().get_alert_stats(None);
    info!(
        "{} alerts raised ({} active), {} errors tracked, {} samples buffered",
        stats.total,
        stats.active,
        context.errors().len(),
        context.metrics().len()
    );

    if let Some(dir) = &cli.export {
        let written = context
            .export_to_dir(dir, cli.format)
            .with_context(|| format!("Failed to export to {}", dir.display()))?;
        for path in written {
            info!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting lookout");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }

    info!("Lookout shutdown complete");
}
