//! Configuration for docket.
//!
//! A config file (toml, yaml or json) is either given explicitly or
//! discovered with the prefer crate, then applied on top of default
//! [`Settings`]. Environment variables win over file values.

mod loader;
mod settings;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use loader::{load_settings_with_options, LoadOptions};
pub use settings::Settings;

/// Default database filename inside the data directory.
pub const DEFAULT_DATABASE_FILENAME: &str = "docket.db";

/// Object store subdirectory of the data directory.
const OBJECTS_SUBDIR: &str = "objects";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
}

/// OCR page gate tuning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
}

/// OCR engine, rasterizer, and lane settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrSection {
    /// Run the OCR lane when a source PDF is available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// `vllm`, `sglang` or `ollama`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpi: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdftoppm_bin: Option<String>,
}

impl OcrSection {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

impl GateSection {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// External parser settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParserSection {
    /// Parser executable; the built-in line parser is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename (joined with data_dir) or a full database URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Object store root; defaults to `<data_dir>/objects`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objects_dir: Option<String>,
    #[serde(default, skip_serializing_if = "GateSection::is_default")]
    pub gate: GateSection,
    #[serde(default, skip_serializing_if = "OcrSection::is_default")]
    pub ocr: OcrSection,
    #[serde(default)]
    pub parser: ParserSection,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover a `docket` config file in the standard locations.
    pub async fn load() -> Self {
        match prefer::load("docket").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Ignoring config {}: {}", path.display(), e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a file. The format follows the extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            _ => serde_json::from_str(&contents)?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory of the config file, used to resolve relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Expand `~` and resolve relative paths against `base_dir`.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
            settings.objects_dir = settings.data_dir.join(OBJECTS_SUBDIR);
        }
        if let Some(ref objects_dir) = self.objects_dir {
            settings.objects_dir = self.resolve_path(objects_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            if database.contains("://") || database.starts_with("sqlite:") {
                settings.database_url = Some(database.clone());
            } else {
                settings.database_filename = database.clone();
            }
        }
        if self.gate.threshold.is_some() {
            settings.gate.threshold = self.gate.threshold;
        }
        if self.gate.max_pages.is_some() {
            settings.gate.max_pages = self.gate.max_pages;
        }
        merge_ocr(&mut settings.ocr, &self.ocr);
        if let Some(ref command) = self.parser.command {
            settings.parser_command = Some(self.resolve_command(command, base_dir));
        }
    }

    /// Bare program names are left for PATH lookup; anything with a separator
    /// is resolved like a path.
    fn resolve_command(&self, command: &str, base_dir: &Path) -> PathBuf {
        if command.contains('/') || command.starts_with('~') {
            self.resolve_path(command, base_dir)
        } else {
            PathBuf::from(command)
        }
    }

    /// SHA-256 of the serialized config.
    pub fn hash(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn merge_ocr(target: &mut OcrSection, overlay: &OcrSection) {
    fn set<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
        if value.is_some() {
            slot.clone_from(value);
        }
    }
    set(&mut target.enabled, &overlay.enabled);
    set(&mut target.engine, &overlay.engine);
    set(&mut target.model, &overlay.model);
    set(&mut target.base_url, &overlay.base_url);
    set(&mut target.timeout_secs, &overlay.timeout_secs);
    set(&mut target.max_pages, &overlay.max_pages);
    set(&mut target.dpi, &overlay.dpi);
    set(&mut target.pdftoppm_bin, &overlay.pdftoppm_bin);
}
