//! Layered configuration.
//!
//! Sources, later ones winning: built-in defaults, the user config
//! (`~/.config/intelliseason/config.toml`), the workspace config
//! (`<workspace>/.intelliseason/config.toml`), `INTELLISEASON_*` environment
//! variables with `__` as the section separator, and explicit overrides.

use crate::data::cleaner::DEFAULT_DATE_FORMATS;
use crate::error::{PipelineError, Result};
use crate::forecast::{ForecastSettings, FutureRegressorPolicy};
use crate::validation::ValidationSettings;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory name for workspace-level state.
pub const WORKSPACE_DIR: &str = ".intelliseason";
/// Prefix of environment overrides, e.g. `INTELLISEASON_SERVER__PORT`.
pub const ENV_PREFIX: &str = "INTELLISEASON_";

const CONFIG_FILE: &str = "config.toml";

pub fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "intelliseason", "intelliseason")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data: DataConfig,
    pub forecast: ForecastSettings,
    pub validation: ValidationSettings,
    pub server: ServerConfig,
}

/// Input parsing and upload storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// chrono formats tried in order when parsing the date column.
    pub date_formats: Vec<String>,
    pub delimiter: char,
    /// Keep every uploaded file in the upload store.
    pub store_uploads: bool,
    /// Defaults to `<workspace>/.intelliseason/uploads`.
    pub upload_dir: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_formats: DEFAULT_DATE_FORMATS.iter().map(|s| s.to_string()).collect(),
            delimiter: ',',
            store_uploads: false,
            upload_dir: None,
        }
    }
}

impl DataConfig {
    pub fn resolve_upload_dir(&self, workspace: &Path) -> PathBuf {
        match &self.upload_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => workspace.join(dir),
            None => workspace.join(WORKSPACE_DIR).join("uploads"),
        }
    }
}

/// HTTP gateway settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
            max_upload_mb: 50,
        }
    }
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl AppConfig {
    /// Human-readable warnings about questionable settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let f = &self.forecast;

        if f.horizon_days == 0 {
            warnings.push("forecast.horizon_days is 0: forecasts cover the history only".into());
        } else if f.horizon_days > 3650 {
            warnings.push(format!(
                "forecast.horizon_days = {} is more than ten years ahead",
                f.horizon_days
            ));
        }
        if !(f.train_fraction > 0.0 && f.train_fraction < 1.0) {
            warnings.push(format!(
                "forecast.train_fraction = {} must lie strictly between 0 and 1",
                f.train_fraction
            ));
        }
        if !(f.interval_width > 0.0 && f.interval_width < 1.0) {
            warnings.push(format!(
                "forecast.interval_width = {} must lie strictly between 0 and 1",
                f.interval_width
            ));
        }
        if f.regressor_fill == FutureRegressorPolicy::HistoricalSum {
            warnings.push(
                "forecast.regressor_fill = historical_sum fills future regressors with the \
                 sum of all past values"
                    .into(),
            );
        }
        if self.data.date_formats.is_empty() {
            warnings.push("data.date_formats is empty: built-in formats will be used".into());
        }
        if !self.data.delimiter.is_ascii() {
            warnings.push(format!(
                "data.delimiter '{}' is not an ASCII character",
                self.data.delimiter
            ));
        }
        if self.server.port == 0 {
            warnings.push("server.port is 0: a random port will be chosen".into());
        }
        if self.server.max_upload_mb == 0 {
            warnings.push("server.max_upload_mb is 0: every upload will be rejected".into());
        }
        warnings
    }
}

/// Load configuration from all layers.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&AppConfig>,
) -> std::result::Result<AppConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join(CONFIG_FILE);
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load `path` on top of the defaults and the environment, ignoring the user
/// and workspace files.
pub fn load_config_file(path: &Path) -> std::result::Result<AppConfig, Box<figment::Error>> {
    Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(Box::new)
}

pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(WORKSPACE_DIR).join(CONFIG_FILE)
}

/// Whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(dirs) = project_dirs() {
        if dirs.config_dir().join(CONFIG_FILE).exists() {
            return true;
        }
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}

/// Write the default configuration to the workspace config file unless one
/// already exists. Returns the path and whether a file was written.
pub fn write_default_config(workspace: &Path) -> Result<(PathBuf, bool)> {
    let path = workspace_config_path(workspace);
    if path.exists() {
        return Ok((path, false));
    }
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| PipelineError::Config(e.to_string()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, content)?;
    Ok((path, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::ModelKind;
    use crate::validation::ZeroActualPolicy;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8501);
        assert_eq!(config.server.max_upload_mb, 50);
        assert_eq!(config.forecast.horizon_days, 30);
        assert_eq!(config.data.delimiter, ',');
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = AppConfig::default();
        overrides.forecast.horizon_days = 90;
        overrides.server.port = 9000;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.forecast.horizon_days, 90);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let ws_dir = dir.path().join(WORKSPACE_DIR);
        std::fs::create_dir_all(&ws_dir).unwrap();
        std::fs::write(
            ws_dir.join("config.toml"),
            r#"
[data]
delimiter = ";"

[forecast]
horizon_days = 14
model = "holt_winters"

[forecast.seasonality]
yearly = false

[forecast.arima]
p = 2

[validation]
zero_actuals = "reject"
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.data.delimiter, ';');
        assert_eq!(config.forecast.horizon_days, 14);
        assert_eq!(config.forecast.model, ModelKind::HoltWinters);
        assert!(!config.forecast.seasonality.yearly);
        assert!(config.forecast.seasonality.weekly);
        assert_eq!(config.forecast.arima.p, 2);
        assert_eq!(config.forecast.arima.d, 1);
        assert_eq!(config.validation.zero_actuals, ZeroActualPolicy::Reject);
        assert!(config_exists(Some(dir.path())));
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[server]\nport = 8080\n").unwrap();
        let config = load_config_file(&path).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = AppConfig::default();
        config.forecast.horizon_days = 0;
        config.forecast.train_fraction = 1.0;
        config.forecast.regressor_fill = FutureRegressorPolicy::HistoricalSum;
        config.server.max_upload_mb = 0;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 4);
        assert!(warnings.iter().any(|w| w.contains("train_fraction")));
    }

    #[test]
    fn test_write_default_config_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (path, written) = write_default_config(dir.path()).unwrap();
        assert!(written);
        assert!(path.exists());
        let (_, again) = write_default_config(dir.path()).unwrap();
        assert!(!again);

        let reloaded = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(reloaded.forecast, ForecastSettings::default());
    }

    #[test]
    fn test_resolve_upload_dir() {
        let ws = Path::new("/tmp/ws");
        let mut data = DataConfig::default();
        assert_eq!(
            data.resolve_upload_dir(ws),
            PathBuf::from("/tmp/ws/.intelliseason/uploads")
        );
        data.upload_dir = Some(PathBuf::from("files"));
        assert_eq!(data.resolve_upload_dir(ws), PathBuf::from("/tmp/ws/files"));
    }

    #[test]
    fn test_server_limits() {
        let server = ServerConfig::default();
        assert_eq!(server.max_upload_bytes(), 50 * 1024 * 1024);
        assert_eq!(server.bind_address(), "127.0.0.1:8501");
    }
}
