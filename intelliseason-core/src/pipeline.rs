//! End-to-end runs: filter, clean, aggregate, prepare, split, forecast,
//! validate and summarize.

use crate::config::AppConfig;
use crate::data::schema::infer_column_type;
use crate::data::{ColumnType, DataBatch, DataCleaner, TARGET_COLUMN};
use crate::error::{PipelineError, Result};
use crate::forecast::{
    ForecastInsights, ForecastResult, ForecastSettings, Forecaster, ModelKind, TimeSeriesFrame,
    analyze, fit_and_backtest, prepare, split,
};
use crate::validation::{ValidationReport, validate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Instant;
use uuid::Uuid;

/// Request-scoped identity of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Equality predicate applied before cleaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub value: Value,
    /// Text the value was parsed from, kept for string columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl RowFilter {
    /// Build a filter from text, typing the value the way CSV cells are typed.
    pub fn parse(column: impl Into<String>, value: &str) -> Self {
        Self {
            column: column.into(),
            value: crate::data::parse_cell(value),
            text: Some(value.trim().to_string()),
        }
    }

    /// The value converted to the inferred type of the filtered column, so
    /// that exact comparison sees the same representation as the cells.
    pub fn typed_for(&self, batch: &DataBatch) -> Result<Value> {
        let idx = batch.column_index(&self.column)?;
        let cells: Vec<Value> = (0..batch.row_count())
            .map(|row| batch.cell(row, idx).clone())
            .collect();

        let typed = match (infer_column_type(&cells), &self.value) {
            (ColumnType::String | ColumnType::Date, Value::Number(_) | Value::Bool(_)) => {
                Value::String(self.text.clone().unwrap_or_else(|| self.value.to_string()))
            }
            (ColumnType::Float, Value::Number(n)) => n
                .as_f64()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| self.value.clone()),
            (ColumnType::Integer, Value::Number(n)) if n.is_f64() => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Value::from(f as i64),
                _ => self.value.clone(),
            },
            _ => self.value.clone(),
        };
        Ok(typed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub date_column: String,
    pub target_column: String,
    #[serde(default)]
    pub regressors: Vec<String>,
    #[serde(default)]
    pub filter: Option<RowFilter>,
    #[serde(default)]
    pub settings: ForecastSettings,
}

impl PipelineRequest {
    /// A request using the forecast settings of `config`.
    pub fn new(
        config: &AppConfig,
        date_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            date_column: date_column.into(),
            target_column: target_column.into(),
            regressors: Vec::new(),
            filter: None,
            settings: config.forecast.clone(),
        }
    }

    pub fn with_regressors(mut self, regressors: Vec<String>) -> Self {
        self.regressors = regressors;
        self
    }

    pub fn with_filter(mut self, filter: Option<RowFilter>) -> Self {
        self.filter = filter;
        self
    }

    fn check(&self) -> Result<()> {
        if self.date_column == self.target_column {
            return Err(PipelineError::invalid_parameter(
                "target_column",
                "must differ from the date column",
            ));
        }
        let mut seen = HashSet::new();
        for reg in &self.regressors {
            if !seen.insert(reg.as_str()) {
                return Err(PipelineError::invalid_parameter(
                    "regressors",
                    format!("'{reg}' is listed twice"),
                ));
            }
        }
        self.settings.check()
    }
}

/// Row counts after each stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub loaded: usize,
    /// Absent when no filter was requested.
    pub filtered: Option<usize>,
    pub cleaned: usize,
    pub aggregated: usize,
    pub prepared: usize,
    pub train: usize,
    pub test: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub context: RunContext,
    pub counts: StageCounts,
    pub forecast: ForecastResult,
    /// Scores over every date of the test partition.
    pub validation: ValidationReport,
    pub insights: ForecastInsights,
    pub elapsed_ms: u64,
}

/// Error reported for a backend that failed during a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub code: String,
    pub message: String,
}

impl From<&PipelineError> for ErrorSummary {
    fn from(err: &PipelineError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelComparison {
    pub model: ModelKind,
    pub validation: Option<ValidationReport>,
    pub error: Option<ErrorSummary>,
    pub elapsed_ms: u64,
}

impl ModelComparison {
    pub fn mape(&self) -> Option<f64> {
        self.validation.as_ref().map(|v| v.mape)
    }
}

/// Prepared and split data shared by every backend of a run.
struct PreparedRun {
    counts: StageCounts,
    full: TimeSeriesFrame,
    train: TimeSeriesFrame,
    test: TimeSeriesFrame,
}

fn prepare_run(batch: &DataBatch, request: &PipelineRequest, config: &AppConfig) -> Result<PreparedRun> {
    request.check()?;
    let cleaner = DataCleaner::with_formats(config.data.date_formats.clone());
    let mut counts = StageCounts {
        loaded: batch.row_count(),
        ..Default::default()
    };

    let filtered;
    let source = match &request.filter {
        Some(filter) => {
            let value = filter.typed_for(batch)?;
            filtered = cleaner.filter(batch, &filter.column, &value)?;
            counts.filtered = Some(filtered.row_count());
            if filtered.is_empty() {
                return Err(PipelineError::empty_dataset("filter"));
            }
            &filtered
        }
        None => batch,
    };

    let cleaned = cleaner.clean(source, &request.date_column)?;
    counts.cleaned = cleaned.row_count();
    if cleaned.is_empty() {
        return Err(PipelineError::empty_dataset("clean"));
    }

    let aggregated = cleaner.aggregate(
        &cleaned,
        &request.date_column,
        &request.target_column,
        &request.regressors,
    )?;
    counts.aggregated = aggregated.row_count();

    let full = prepare(
        &aggregated,
        &request.date_column,
        TARGET_COLUMN,
        &request.regressors,
    )?;
    counts.prepared = full.len();

    let (train, test) = split(&full, request.settings.train_fraction)?;
    counts.train = train.len();
    counts.test = test.len();
    tracing::debug!(?counts, "Prepared data");

    Ok(PreparedRun {
        counts,
        full,
        train,
        test,
    })
}

/// Fit one backend, forecast the horizon and score the held-out partition.
fn forecast_and_score(
    prepared: &PreparedRun,
    settings: &ForecastSettings,
    forecaster: &dyn Forecaster,
    config: &AppConfig,
) -> Result<(ForecastResult, ValidationReport)> {
    let backtest = fit_and_backtest(
        &prepared.train,
        &prepared.full,
        &prepared.test,
        settings,
        forecaster,
    )?;
    let report = validate(&backtest.holdout, &prepared.test, config.validation.zero_actuals)?;
    Ok((backtest.forecast, report))
}

/// Run the whole pipeline with the backend named in `request.settings`.
pub fn run_pipeline(
    batch: &DataBatch,
    request: &PipelineRequest,
    config: &AppConfig,
) -> Result<PipelineOutcome> {
    let forecaster = request.settings.model.forecaster();
    run_pipeline_with(batch, request, config, forecaster.as_ref(), RunContext::new())
}

/// Run the whole pipeline with an explicit backend and context.
pub fn run_pipeline_with(
    batch: &DataBatch,
    request: &PipelineRequest,
    config: &AppConfig,
    forecaster: &dyn Forecaster,
    context: RunContext,
) -> Result<PipelineOutcome> {
    let span = tracing::info_span!("pipeline", run_id = %context.run_id);
    let _guard = span.enter();
    let started = Instant::now();

    let prepared = prepare_run(batch, request, config)?;
    let (forecast, validation) =
        forecast_and_score(&prepared, &request.settings, forecaster, config)?;
    let insights = analyze(&forecast.points);

    let elapsed_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        model = %forecaster.kind(),
        rows = prepared.counts.prepared,
        points = forecast.points.len(),
        mape = validation.mape,
        elapsed_ms,
        "Pipeline run complete"
    );

    Ok(PipelineOutcome {
        context,
        counts: prepared.counts,
        forecast,
        validation,
        insights,
        elapsed_ms,
    })
}

/// Fit every backend in `kinds` on the same split and rank them by MAPE.
/// Backends that fail are listed last with their error.
pub fn compare_models(
    batch: &DataBatch,
    request: &PipelineRequest,
    kinds: &[ModelKind],
    config: &AppConfig,
) -> Result<Vec<ModelComparison>> {
    if kinds.is_empty() {
        return Err(PipelineError::invalid_parameter("models", "at least one model is required"));
    }
    let context = RunContext::new();
    let span = tracing::info_span!("compare", run_id = %context.run_id);
    let _guard = span.enter();

    let prepared = prepare_run(batch, request, config)?;
    let mut results = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        let started = Instant::now();
        let mut settings = request.settings.clone();
        settings.model = kind;
        let forecaster = kind.forecaster();

        let outcome = forecast_and_score(&prepared, &settings, forecaster.as_ref(), config);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let comparison = match outcome {
            Ok((_, validation)) => ModelComparison {
                model: kind,
                validation: Some(validation),
                error: None,
                elapsed_ms,
            },
            Err(err) => {
                tracing::warn!(model = %kind, error = %err, "Model failed during comparison");
                ModelComparison {
                    model: kind,
                    validation: None,
                    error: Some(ErrorSummary::from(&err)),
                    elapsed_ms,
                }
            }
        };
        results.push(comparison);
    }

    results.sort_by(|a, b| match (a.mape(), b.mape()) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.error.is_some().cmp(&b.error.is_some()),
    });
    tracing::info!(models = results.len(), "Comparison complete");
    Ok(results)
}
