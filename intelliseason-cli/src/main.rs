//! IntelliSeason CLI: forecast CSV time series from the terminal or serve the
//! pipeline over HTTP.

mod commands;
mod output;

use clap::Parser;
use intelliseason_core::ModelKind;
use output::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// IntelliSeason: seasonal forecasting for CSV time series
#[derive(Parser, Debug)]
#[command(name = "intelliseason", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (skips the user and workspace config files)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Column choices and forecast settings shared by `forecast` and `compare`.
#[derive(clap::Args, Debug, Clone, Default)]
pub(crate) struct RunArgs {
    /// CSV file to read
    file: PathBuf,

    /// Column holding the dates
    #[arg(short, long)]
    date_column: String,

    /// Column to forecast
    #[arg(short, long)]
    target_column: String,

    /// Extra numeric columns used as regressors (comma separated)
    #[arg(short, long, value_delimiter = ',')]
    regressors: Vec<String>,

    /// Days to forecast past the training data
    #[arg(long)]
    horizon: Option<u32>,

    /// Share of rows used for training
    #[arg(long)]
    train_fraction: Option<f64>,

    /// Disable yearly seasonality
    #[arg(long)]
    no_yearly: bool,

    /// Disable weekly seasonality
    #[arg(long)]
    no_weekly: bool,

    /// Enable daily seasonality
    #[arg(long)]
    daily: bool,

    /// Keep only rows where this column equals --filter-value
    #[arg(long, requires = "filter_value")]
    filter_column: Option<String>,

    #[arg(long, requires = "filter_column")]
    filter_value: Option<String>,

    /// Keep a copy of the file in the upload store
    #[arg(long)]
    store: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Write output to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Clean, aggregate, forecast and validate a CSV file
    Forecast {
        #[command(flatten)]
        run: RunArgs,

        /// Backend: additive, holt_winters or arima
        #[arg(short, long)]
        model: Option<ModelKind>,
    },
    /// Fit several backends on the same split and rank them by MAPE
    Compare {
        #[command(flatten)]
        run: RunArgs,

        /// Backends to compare (comma separated, default: all)
        #[arg(long, value_delimiter = ',')]
        models: Vec<ModelKind>,
    },
    /// Show column types, null ratios and candidate columns of a CSV file
    Profile {
        file: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Serve the pipeline over HTTP
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List stored uploads
    History {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = intelliseason_core::config::project_dirs()
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "intelliseason.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let ctx = commands::CliContext {
        workspace,
        config_path: cli.config,
    };
    commands::handle_command(cli.command, &ctx).await
}
