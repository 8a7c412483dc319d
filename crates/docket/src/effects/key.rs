use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::hashing::is_sha256_hex;
use crate::ids::{DocId, PageIdx, RunId};

static STEP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9._:-]+$").expect("step regex should compile"));

const SEPARATOR: char = '|';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EffectKeyError {
    #[error("effect step name invalid: {0:?}")]
    InvalidStep(String),
    #[error("effect version must be >= 1, got {0}")]
    InvalidVersion(i64),
    #[error("effect {field} is not a sha256 hex digest: {value:?}")]
    InvalidSha256 { field: &'static str, value: String },
    #[error("OCR model name invalid: {0:?}")]
    InvalidModel(String),
}

/// Deterministic identity of one idempotent side effect.
///
/// Identical logical input always yields the same key; any differing
/// content hash yields a different one, so a stale recorded effect is
/// never replayed for edited content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EffectKey(String);

impl EffectKey {
    /// `run|step|doc|ver|sha` for a whole-step effect.
    pub fn step(
        run: &RunId,
        step: &str,
        doc: &DocId,
        version: i64,
        sha256: &str,
    ) -> Result<Self, EffectKeyError> {
        let step = validate_step(step)?;
        let version = validate_version(version)?;
        let sha = validate_sha(sha256, "content sha256")?;
        Ok(Self(join(&[
            run.as_str(),
            step,
            doc.as_str(),
            &version.to_string(),
            sha,
        ])))
    }

    /// `run|ocr-render-page|doc|ver|p{idx}|sha` for rasterizing one page.
    pub fn render_page(
        run: &RunId,
        doc: &DocId,
        version: i64,
        page: PageIdx,
        source_sha256: &str,
    ) -> Result<Self, EffectKeyError> {
        let version = validate_version(version)?;
        let sha = validate_sha(source_sha256, "source sha256")?;
        Ok(Self(join(&[
            run.as_str(),
            "ocr-render-page",
            doc.as_str(),
            &version.to_string(),
            &format!("p{}", page.get()),
            sha,
        ])))
    }

    /// `run|ocr-page|doc|ver|p{idx}|model|gate_rev|png_sha` for recognizing one page.
    pub fn ocr_page(
        run: &RunId,
        doc: &DocId,
        version: i64,
        page: PageIdx,
        model: &str,
        gate_rev: &str,
        png_sha256: &str,
    ) -> Result<Self, EffectKeyError> {
        let version = validate_version(version)?;
        let model = model.trim();
        if model.is_empty() || model.contains(SEPARATOR) || model.chars().any(char::is_whitespace)
        {
            return Err(EffectKeyError::InvalidModel(model.to_string()));
        }
        let gate_rev = validate_sha(gate_rev, "gate revision")?;
        let png = validate_sha(png_sha256, "image sha256")?;
        Ok(Self(join(&[
            run.as_str(),
            "ocr-page",
            doc.as_str(),
            &version.to_string(),
            &format!("p{}", page.get()),
            model,
            gate_rev,
            png,
        ])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EffectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn join(parts: &[&str]) -> String {
    let mut key = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(SEPARATOR);
        }
        key.push_str(part);
    }
    key
}

fn validate_step(step: &str) -> Result<&str, EffectKeyError> {
    let step = step.trim();
    if !STEP_RE.is_match(step) {
        return Err(EffectKeyError::InvalidStep(step.to_string()));
    }
    Ok(step)
}

fn validate_version(version: i64) -> Result<i64, EffectKeyError> {
    if version < 1 {
        return Err(EffectKeyError::InvalidVersion(version));
    }
    Ok(version)
}

fn validate_sha<'a>(value: &'a str, field: &'static str) -> Result<&'a str, EffectKeyError> {
    if !is_sha256_hex(value) {
        return Err(EffectKeyError::InvalidSha256 {
            field,
            value: value.to_string(),
        });
    }
    Ok(value)
}
