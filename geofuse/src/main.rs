mod config;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(about = "Aggregates Dutch address, building and energy label data")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the aggregation service
    Serve(ConfigArgs),
    /// Load and validate a config file, then exit
    Validate(ConfigArgs),
    /// Print the emitted metrics as a markdown table
    ListMetrics,
}

#[derive(clap::Args)]
struct ConfigArgs {
    #[arg(long)]
    config_path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error(transparent)]
    Aggregator(#[from] aggregator::errors::AggregatorError),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::Serve(args) => serve(&args.config_path),
        CliCommand::Validate(args) => Config::from_file(&args.config_path)
            .map(|_| println!("Config is valid"))
            .map_err(CliError::from),
        CliCommand::ListMetrics => {
            print!(
                "{}",
                shared::metrics_defs::describe(aggregator::metrics_defs::ALL_METRICS)
            );
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn serve(config_path: &std::path::Path) -> Result<(), CliError> {
    let config = Config::from_file(config_path)?;

    // Keeps the sentry client alive until the service stops
    let _sentry = init_logging(config.logging.as_ref());

    if let Some(metrics) = &config.metrics {
        init_metrics(metrics)?;
    }

    let auth_token = config.aggregator.auth.resolve();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(aggregator::run(config.aggregator, auth_token))?;

    Ok(())
}

fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let sentry = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(
            sentry
                .as_ref()
                .map(|_| sentry::integrations::tracing::layer()),
        )
        .init();

    sentry
}

fn init_metrics(metrics: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
        .build(Some("geofuse"))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    tracing::info!(
        host = %metrics.statsd_host,
        port = metrics.statsd_port,
        "Sending metrics to statsd"
    );
    Ok(())
}
