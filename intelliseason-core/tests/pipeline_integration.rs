//! End-to-end tests: CSV text in, forecast, validation and insights out.

use chrono::{Days, NaiveDate};
use intelliseason_core::data::{CsvSource, DataSource, UploadStore, read_csv};
use intelliseason_core::forecast::{ModelKind, prepare, split};
use intelliseason_core::{
    AppConfig, DataCleaner, PipelineError, PipelineRequest, RowFilter, ZeroActualPolicy,
    compare_models, run_pipeline,
};
use pretty_assertions::assert_eq;
use serde_json::json;

/// Two stores per day with a weekly bump and a rising trend, plus a few rows
/// the cleaner must drop.
fn store_csv(days: u64) -> String {
    let start = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
    let mut csv = String::from("order_date,store,sales,price\n");
    for i in 0..days {
        let date = start.checked_add_days(Days::new(i)).unwrap();
        let weekly = if i % 7 == 5 || i % 7 == 6 { 30.0 } else { 0.0 };
        let base = 100.0 + i as f64 * 0.5 + weekly;
        // US style dates for one store to exercise format detection.
        csv.push_str(&format!("{},A,{:.1},2.5\n", date.format("%Y-%m-%d"), base));
        csv.push_str(&format!("{},B,{:.1},3.0\n", date.format("%m/%d/%Y"), base / 2.0));
    }
    csv.push_str("unknown,A,999,9.9\n");
    csv.push_str(",B,999,9.9\n");
    csv
}

const STORE_COLUMNS: (&str, &str) = ("order_date", "sales");

fn request(
    config: &AppConfig,
    columns: (&str, &str),
    model: ModelKind,
    horizon: u32,
) -> PipelineRequest {
    let (date_column, target_column) = columns;
    let mut req = PipelineRequest::new(config, date_column, target_column);
    req.settings.model = model;
    req.settings.horizon_days = horizon;
    req
}

#[test]
fn test_additive_pipeline_end_to_end() {
    let config = AppConfig::default();
    let batch = read_csv(store_csv(140).as_bytes(), ',', None).unwrap();
    let req = request(&config, STORE_COLUMNS, ModelKind::Additive, 30)
        .with_regressors(vec!["price".into()]);

    let outcome = run_pipeline(&batch, &req, &config).unwrap();
    assert_eq!(outcome.counts.loaded, 282);
    assert_eq!(outcome.counts.cleaned, 280);
    assert_eq!(outcome.counts.aggregated, 140);
    assert_eq!(outcome.counts.train, 112);
    assert_eq!(outcome.counts.test, 28);

    let forecast = &outcome.forecast;
    assert_eq!(forecast.points.len(), 112 + 30);
    assert_eq!(forecast.future_points().len(), 30);
    for p in &forecast.points {
        assert!(p.yhat_lower <= p.yhat && p.yhat <= p.yhat_upper);
        assert!(p.weekly.is_some());
    }

    let report = &outcome.validation;
    assert_eq!(report.matched, 28);
    assert_eq!(report.unmatched, 0);
    assert!(report.max_pct_error >= report.min_pct_error);
    assert!(report.mape < 25.0, "mape = {}", report.mape);
}

#[test]
fn test_aggregation_sums_per_date() {
    let csv = "date,sales\n2023-01-01,5\n2023-01-01,3\n2023-01-02,2\n";
    let batch = read_csv(csv.as_bytes(), ',', None).unwrap();
    let cleaner = DataCleaner::new();
    let cleaned = cleaner.clean(&batch, "date").unwrap();
    let agg = cleaner.aggregate(&cleaned, "date", "sales", &[]).unwrap();
    assert_eq!(agg.columns, vec!["date".to_string(), "y".to_string()]);
    assert_eq!(
        agg.rows,
        vec![
            vec![json!("2023-01-01"), json!(8.0)],
            vec![json!("2023-01-02"), json!(2.0)],
        ]
    );
}

#[test]
fn test_split_is_chronological() {
    let config = AppConfig::default();
    let batch = read_csv(store_csv(50).as_bytes(), ',', None).unwrap();
    let cleaner = DataCleaner::with_formats(config.data.date_formats.clone());
    let cleaned = cleaner.clean(&batch, "order_date").unwrap();
    let agg = cleaner.aggregate(&cleaned, "order_date", "sales", &[]).unwrap();
    let frame = prepare(&agg, "order_date", "y", &[]).unwrap();
    let (train, test) = split(&frame, 0.8).unwrap();
    assert_eq!(train.len() + test.len(), frame.len());
    assert!(train.last_date().unwrap() <= test.first_date().unwrap());
}

#[test]
fn test_filter_selects_one_store() {
    let config = AppConfig::default();
    let batch = read_csv(store_csv(60).as_bytes(), ',', None).unwrap();
    let req = request(&config, STORE_COLUMNS, ModelKind::HoltWinters, 14)
        .with_filter(Some(RowFilter::parse("store", "B")));
    let outcome = run_pipeline(&batch, &req, &config).unwrap();
    assert_eq!(outcome.counts.filtered, Some(61));
    assert_eq!(outcome.counts.cleaned, 60);
    assert_eq!(outcome.counts.aggregated, 60);
}

#[test]
fn test_zero_actuals_follow_policy() {
    let mut csv = String::from("date,units\n");
    let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
    for i in 0..40u64 {
        let date = start.checked_add_days(Days::new(i)).unwrap();
        let units = if i == 35 { 0 } else { 10 + i % 3 };
        csv.push_str(&format!("{date},{units}\n"));
    }
    let batch = read_csv(csv.as_bytes(), ',', None).unwrap();

    let mut config = AppConfig::default();
    let req = request(&config, ("date", "units"), ModelKind::HoltWinters, 10);
    let outcome = run_pipeline(&batch, &req, &config).unwrap();
    assert_eq!(outcome.counts.test, 8);
    assert_eq!(outcome.validation.matched, 8);
    assert_eq!(outcome.validation.excluded_zero, 1);

    config.validation.zero_actuals = ZeroActualPolicy::Reject;
    let err = run_pipeline(&batch, &req, &config).unwrap_err();
    assert!(matches!(err, PipelineError::DegenerateInput(_)));
}

#[test]
fn test_non_numeric_target_is_reported() {
    let config = AppConfig::default();
    let csv = "date,sales\n2023-01-01,10\n2023-01-02,n/a\n";
    let batch = read_csv(csv.as_bytes(), ',', None).unwrap();
    let req = request(&config, ("date", "sales"), ModelKind::Additive, 5);
    let err = run_pipeline(&batch, &req, &config).unwrap_err();
    match err {
        PipelineError::NonNumericColumn { column, .. } => assert_eq!(column, "sales"),
        other => panic!("expected NonNumericColumn, got {other:?}"),
    }
}

#[test]
fn test_compare_ranks_backends() {
    let config = AppConfig::default();
    let batch = read_csv(store_csv(120).as_bytes(), ',', None).unwrap();
    let req = request(&config, STORE_COLUMNS, ModelKind::Additive, 30);
    let results = compare_models(&batch, &req, &ModelKind::ALL, &config).unwrap();
    assert_eq!(results.len(), 3);
    let mapes: Vec<f64> = results.iter().filter_map(|r| r.mape()).collect();
    assert_eq!(mapes.len(), 3);
    assert!(mapes.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_csv_source_loads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sales.csv");
    std::fs::write(&path, store_csv(10)).unwrap();

    let source = CsvSource::new(&path);
    let batch = source.load(Some(5)).await.unwrap();
    assert_eq!(batch.row_count(), 5);
    assert_eq!(source.source_info().source_type, "csv");
}

#[test]
fn test_upload_store_persists_across_opens() {
    let dir = tempfile::tempdir().unwrap();
    let csv = store_csv(5);
    let id = {
        let mut store = UploadStore::open(dir.path()).unwrap();
        store.store("stores.csv", csv.as_bytes(), 10).unwrap().id
    };
    let store = UploadStore::open(dir.path()).unwrap();
    assert_eq!(store.list().len(), 1);
    let bytes = store.read(&id.to_string()).unwrap();
    assert_eq!(bytes, csv.as_bytes());
}
