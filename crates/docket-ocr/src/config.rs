//! OCR policy resolved from the `[ocr]` configuration section.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use docket::config::OcrSection;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::OcrError;

pub const DEFAULT_MODEL: &str = "zai-org/GLM-OCR";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_PAGES: u32 = 10;
pub const DEFAULT_DPI: u32 = 300;
pub const MIN_DPI: u32 = 72;

/// Serving stack behind the endpoint. All of them speak the OpenAI chat API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngineKind {
    #[default]
    Vllm,
    Sglang,
    Ollama,
}

impl OcrEngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrEngineKind::Vllm => "vllm",
            OcrEngineKind::Sglang => "sglang",
            OcrEngineKind::Ollama => "ollama",
        }
    }
}

impl FromStr for OcrEngineKind {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "vllm" => Ok(OcrEngineKind::Vllm),
            "sglang" => Ok(OcrEngineKind::Sglang),
            "ollama" => Ok(OcrEngineKind::Ollama),
            _ => Err(OcrError::InvalidConfig {
                field: "engine",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for OcrEngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a boolean-ish toggle the way env vars spell it.
///
/// Empty means enabled; `0`/`false` and `1`/`true` are accepted in any case.
pub fn parse_enabled(value: &str) -> Result<bool, OcrError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(OcrError::InvalidConfig {
            field: "enabled",
            value: value.to_string(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrConfig {
    pub enabled: bool,
    pub engine: OcrEngineKind,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_pages: u32,
    pub dpi: u32,
    pub pdftoppm_bin: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            engine: OcrEngineKind::default(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_pages: DEFAULT_MAX_PAGES,
            dpi: DEFAULT_DPI,
            pdftoppm_bin: None,
        }
    }
}

impl OcrConfig {
    /// Resolve a config section, falling back to defaults for unset fields.
    pub fn from_section(section: &OcrSection) -> Result<Self, OcrError> {
        let defaults = Self::default();

        let engine = match section.engine.as_deref() {
            Some(raw) => raw.parse()?,
            None => defaults.engine,
        };

        let model = match section.model.as_deref().map(str::trim) {
            Some("") | None => defaults.model,
            Some(model) if model.contains('|') => {
                return Err(OcrError::InvalidConfig {
                    field: "model",
                    value: model.to_string(),
                })
            }
            Some(model) => model.to_string(),
        };

        let base_url = match section.base_url.as_deref().map(str::trim) {
            Some("") | None => defaults.base_url,
            Some(raw) => {
                let url = Url::parse(raw).map_err(|_| OcrError::InvalidConfig {
                    field: "base_url",
                    value: raw.to_string(),
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(OcrError::InvalidConfig {
                        field: "base_url",
                        value: raw.to_string(),
                    });
                }
                url.as_str().trim_end_matches('/').to_string()
            }
        };

        let timeout = match section.timeout_secs {
            Some(0) => {
                return Err(OcrError::InvalidConfig {
                    field: "timeout_secs",
                    value: "0".to_string(),
                })
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.timeout,
        };

        Ok(Self {
            enabled: section.enabled.unwrap_or(defaults.enabled),
            engine,
            model,
            base_url,
            timeout,
            max_pages: section.max_pages.unwrap_or(defaults.max_pages).max(1),
            dpi: section.dpi.unwrap_or(defaults.dpi).max(MIN_DPI),
            pdftoppm_bin: section
                .pdftoppm_bin
                .clone()
                .filter(|bin| !bin.trim().is_empty()),
        })
    }

    /// Endpoint for chat completions under the configured base URL.
    pub fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Wall-clock budget for an OCR lane covering `pages` pages.
    pub fn lane_budget(&self, pages: usize) -> Duration {
        self.timeout * (pages.max(1) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OcrConfig::from_section(&OcrSection::default()).unwrap();
        assert!(config.enabled);
        assert_eq!(config.engine, OcrEngineKind::Vllm);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.max_pages, 10);
        assert_eq!(config.dpi, 300);
        assert_eq!(
            config.completions_url(),
            "http://127.0.0.1:8000/v1/chat/completions"
        );
    }

    #[test]
    fn test_engine_kinds() {
        assert_eq!("SGLang".parse::<OcrEngineKind>().unwrap(), OcrEngineKind::Sglang);
        assert_eq!("ollama".parse::<OcrEngineKind>().unwrap(), OcrEngineKind::Ollama);
        assert!("tesseract".parse::<OcrEngineKind>().is_err());
    }

    #[test]
    fn test_parse_enabled() {
        assert!(parse_enabled("").unwrap());
        assert!(parse_enabled("TRUE").unwrap());
        assert!(!parse_enabled("0").unwrap());
        assert!(!parse_enabled("false").unwrap());
        let err = parse_enabled("maybe").unwrap_err();
        assert!(err.to_string().starts_with("invalid_ocr_policy_enabled"));
    }

    #[test]
    fn test_section_overrides_and_clamps() {
        let section = OcrSection {
            enabled: Some(false),
            engine: Some("sglang".into()),
            model: Some("local/ocr".into()),
            base_url: Some("http://ocr.internal:9000/".into()),
            timeout_secs: Some(5),
            max_pages: Some(0),
            dpi: Some(10),
            pdftoppm_bin: Some("  ".into()),
        };
        let config = OcrConfig::from_section(&section).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.max_pages, 1);
        assert_eq!(config.dpi, MIN_DPI);
        assert_eq!(config.pdftoppm_bin, None);
        assert_eq!(
            config.completions_url(),
            "http://ocr.internal:9000/v1/chat/completions"
        );
        assert_eq!(config.lane_budget(3), Duration::from_secs(15));
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad_url = OcrSection {
            base_url: Some("ftp://nope".into()),
            ..Default::default()
        };
        assert!(OcrConfig::from_section(&bad_url).is_err());

        let bad_model = OcrSection {
            model: Some("a|b".into()),
            ..Default::default()
        };
        assert!(OcrConfig::from_section(&bad_model).is_err());

        let zero_timeout = OcrSection {
            timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(OcrConfig::from_section(&zero_timeout).is_err());
    }
}
