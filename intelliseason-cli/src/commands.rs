//! CLI subcommand handlers.

use crate::output::{self, OutputFormat};
use crate::{Commands, ConfigAction, RunArgs};
use anyhow::Context;
use intelliseason_core::config::{self, AppConfig};
use intelliseason_core::data::{CsvSource, DataSource, UploadStore, profile_batch};
use intelliseason_core::gateway::{self, GatewayState};
use intelliseason_core::{DataBatch, ModelKind, PipelineRequest, RowFilter};
use std::path::{Path, PathBuf};

/// Process-level inputs every handler may need.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub workspace: PathBuf,
    /// Explicit `--config` file.
    pub config_path: Option<PathBuf>,
}

impl CliContext {
    pub fn load_config(&self) -> anyhow::Result<AppConfig> {
        let config = match &self.config_path {
            Some(path) => config::load_config_file(path),
            None => config::load_config(Some(&self.workspace), None),
        }
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

        for warning in config.validate() {
            tracing::warn!("{warning}");
        }
        Ok(config)
    }

    fn upload_dir(&self, config: &AppConfig) -> PathBuf {
        config.data.resolve_upload_dir(&self.workspace)
    }
}

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, ctx: &CliContext) -> anyhow::Result<()> {
    match command {
        Commands::Forecast { run, model } => handle_forecast(run, model, ctx).await,
        Commands::Compare { run, models } => handle_compare(run, models, ctx).await,
        Commands::Profile { file, format } => handle_profile(&file, format, ctx).await,
        Commands::Serve { host, port } => handle_serve(host, port, ctx).await,
        Commands::History { format } => handle_history(format, ctx),
        Commands::Config { action } => handle_config(action, ctx),
    }
}

impl RunArgs {
    fn to_request(&self, config: &AppConfig) -> PipelineRequest {
        let filter = match (&self.filter_column, &self.filter_value) {
            (Some(column), Some(value)) => Some(RowFilter::parse(column.as_str(), value)),
            _ => None,
        };
        let mut request = PipelineRequest::new(config, &self.date_column, &self.target_column)
            .with_regressors(self.regressors.clone())
            .with_filter(filter);

        let settings = &mut request.settings;
        if let Some(h) = self.horizon {
            settings.horizon_days = h;
        }
        if let Some(f) = self.train_fraction {
            settings.train_fraction = f;
        }
        if self.no_yearly {
            settings.seasonality.yearly = false;
        }
        if self.no_weekly {
            settings.seasonality.weekly = false;
        }
        if self.daily {
            settings.seasonality.daily = true;
        }
        request
    }
}

async fn load_batch(file: &Path, config: &AppConfig) -> anyhow::Result<DataBatch> {
    let source = CsvSource::new(file).with_delimiter(config.data.delimiter);
    source
        .load(None)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))
}

async fn maybe_store(
    run: &RunArgs,
    batch: &DataBatch,
    config: &AppConfig,
    ctx: &CliContext,
) -> anyhow::Result<()> {
    if !(run.store || config.data.store_uploads) {
        return Ok(());
    }
    let bytes = tokio::fs::read(&run.file).await?;
    let name = run
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.csv".to_string());
    let mut store = UploadStore::open(ctx.upload_dir(config))?;
    let entry = store.store(&name, &bytes, batch.row_count())?;
    tracing::info!(id = %entry.id, file = %entry.file_name, "Stored upload");
    Ok(())
}

async fn handle_forecast(
    run: RunArgs,
    model: Option<ModelKind>,
    ctx: &CliContext,
) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    let batch = load_batch(&run.file, &config).await?;
    maybe_store(&run, &batch, &config, ctx).await?;

    let mut request = run.to_request(&config);
    if let Some(kind) = model {
        request.settings.model = kind;
    }
    let outcome = intelliseason_core::run_pipeline(&batch, &request, &config)
        .context("Forecast failed")?;

    let text = output::render_outcome(&outcome, run.format)?;
    output::emit(&text, run.output.as_deref())
}

async fn handle_compare(
    run: RunArgs,
    models: Vec<ModelKind>,
    ctx: &CliContext,
) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    let batch = load_batch(&run.file, &config).await?;
    maybe_store(&run, &batch, &config, ctx).await?;

    let kinds = if models.is_empty() {
        ModelKind::ALL.to_vec()
    } else {
        models
    };
    let request = run.to_request(&config);
    let results = intelliseason_core::compare_models(&batch, &request, &kinds, &config)
        .context("Comparison failed")?;

    let text = output::render_comparison(&results, run.format)?;
    output::emit(&text, run.output.as_deref())
}

async fn handle_profile(file: &Path, format: OutputFormat, ctx: &CliContext) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    let batch = load_batch(file, &config).await?;
    let profile = profile_batch(&batch);
    output::emit(&output::render_profile(&profile, format)?, None)
}

async fn handle_serve(
    host: Option<String>,
    port: Option<u16>,
    ctx: &CliContext,
) -> anyhow::Result<()> {
    let mut config = ctx.load_config()?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    // The store is opened unconditionally so `?store=true` works per request.
    let store = UploadStore::open(ctx.upload_dir(&config))
        .context("Failed to open upload store")?;
    let state = GatewayState::new(config, Some(store)).shared();
    gateway::run(state).await.context("Gateway stopped with an error")
}

fn handle_history(format: OutputFormat, ctx: &CliContext) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    let dir = ctx.upload_dir(&config);
    let entries = if dir.exists() {
        UploadStore::open(&dir)?.list().to_vec()
    } else {
        Vec::new()
    };
    output::emit(&output::render_history(&entries, format)?, None)
}

fn handle_config(action: ConfigAction, ctx: &CliContext) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let (path, written) = config::write_default_config(&ctx.workspace)?;
            if written {
                println!("Created default configuration at: {}", path.display());
            } else {
                println!("Configuration file already exists at: {}", path.display());
            }
            Ok(())
        }
        ConfigAction::Show => {
            let config = ctx.load_config()?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
