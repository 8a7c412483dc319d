//! Settings loading: defaults, then config file, then environment.

use std::path::PathBuf;

use tracing::debug;

use super::{Config, ConfigError, Settings, OBJECTS_SUBDIR};
use crate::repository::util::{is_postgres_url, redact_url_password};

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory (`--data`), applied after the config file.
    pub data: Option<PathBuf>,
}

/// Environment variables that override file values.
const ENV_DATABASE_URL: &str = "DATABASE_URL";
const ENV_DATA_DIR: &str = "DOCKET_DATA_DIR";
const ENV_PARSER_BIN: &str = "DOCKET_PARSER_BIN";
const ENV_PDFTOPPM_BIN: &str = "PDFTOPPM_BIN";
const ENV_OCR_ENGINE: &str = "OCR_ENGINE";
const ENV_OCR_MODEL: &str = "OCR_MODEL";
const ENV_OCR_BASE_URL: &str = "OCR_BASE_URL";
const ENV_OCR_TIMEOUT_SECS: &str = "OCR_TIMEOUT_SECS";
const ENV_OCR_MAX_PAGES: &str = "OCR_MAX_PAGES";

/// Load settings with explicit options. Returns the settings and the config
/// file they were built from.
pub async fn load_settings_with_options(
    options: LoadOptions,
) -> Result<(Settings, Config), ConfigError> {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };

    let mut settings = Settings::default();
    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    config.apply_to_settings(&mut settings, &base_dir);

    apply_env_overrides(&mut settings, |name| {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    })?;

    if let Some(data_dir) = options.data {
        settings.objects_dir = data_dir.join(OBJECTS_SUBDIR);
        settings.data_dir = data_dir;
    }

    Ok((settings, config))
}

/// Apply environment overrides read through `lookup`.
pub(crate) fn apply_env_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(data_dir) = lookup(ENV_DATA_DIR) {
        let data_dir = PathBuf::from(shellexpand::tilde(&data_dir).as_ref());
        settings.objects_dir = data_dir.join(OBJECTS_SUBDIR);
        settings.data_dir = data_dir;
    }
    if let Some(url) = lookup(ENV_DATABASE_URL) {
        if is_postgres_url(&url) && !cfg!(feature = "postgres") {
            return Err(ConfigError::InvalidDatabaseUrl(format!(
                "{} requires a build with the 'postgres' feature",
                redact_url_password(&url)
            )));
        }
        debug!(
            "Using {} from environment: {}",
            ENV_DATABASE_URL,
            redact_url_password(&url)
        );
        settings.database_url = Some(url);
    }
    if let Some(bin) = lookup(ENV_PARSER_BIN) {
        settings.parser_command = Some(PathBuf::from(bin));
    }
    if let Some(bin) = lookup(ENV_PDFTOPPM_BIN) {
        settings.ocr.pdftoppm_bin = Some(bin);
    }
    if let Some(engine) = lookup(ENV_OCR_ENGINE) {
        settings.ocr.engine = Some(engine);
    }
    if let Some(model) = lookup(ENV_OCR_MODEL) {
        settings.ocr.model = Some(model);
    }
    if let Some(base_url) = lookup(ENV_OCR_BASE_URL) {
        settings.ocr.base_url = Some(base_url);
    }
    if let Some(secs) = lookup(ENV_OCR_TIMEOUT_SECS).and_then(|v| v.parse().ok()) {
        settings.ocr.timeout_secs = Some(secs);
    }
    if let Some(pages) = lookup(ENV_OCR_MAX_PAGES).and_then(|v| v.parse().ok()) {
        settings.ocr.max_pages = Some(pages);
    }
    Ok(())
}
