//! Page-level OCR request/response contract and the persisted patch.

use docket::hashing::stable_sha256;
use docket::{DocId, PageIdx};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::OcrError;

pub const DEFAULT_PROMPT: &str = "Text Recognition:";

/// One page handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrPageIn {
    pub doc_id: DocId,
    pub ver: i64,
    pub page_idx: PageIdx,
    pub image_uri: String,
    pub prompt: String,
}

impl OcrPageIn {
    pub fn new(
        doc_id: DocId,
        ver: i64,
        page_idx: PageIdx,
        image_uri: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Result<Self, OcrError> {
        if ver < 1 {
            return Err(OcrError::InvalidContract("ver"));
        }
        let image_uri = image_uri.into().trim().to_string();
        if image_uri.is_empty() {
            return Err(OcrError::InvalidContract("image_uri"));
        }
        let prompt = prompt.into().trim().to_string();
        if prompt.is_empty() {
            return Err(OcrError::InvalidContract("prompt"));
        }
        Ok(Self {
            doc_id,
            ver,
            page_idx,
            image_uri,
            prompt,
        })
    }
}

/// Normalized engine output for one page. `raw` is the untouched response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPageOut {
    pub text_md: String,
    #[serde(default)]
    pub tables: Vec<Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub engine_meta: Map<String, Value>,
    pub raw: Value,
}

impl OcrPageOut {
    /// Lenient normalization of a loosely-shaped output object.
    ///
    /// Only `raw` is required; a missing key fails with `invalid_ocr_raw`.
    pub fn from_value(value: &Value) -> Result<Self, OcrError> {
        let row = value
            .as_object()
            .ok_or(OcrError::InvalidContract("raw"))?;
        let raw = row
            .get("raw")
            .cloned()
            .ok_or(OcrError::InvalidContract("raw"))?;

        let text_md = match row.get("text_md") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        let tables = match row.get("tables") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        let confidence = row.get("confidence").and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        });
        let engine_meta = match row.get("engine_meta") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        Ok(Self {
            text_md,
            tables,
            confidence: confidence.filter(|c| c.is_finite()),
            engine_meta,
            raw,
        })
    }

    pub fn patch(&self) -> OcrPatch {
        OcrPatch {
            text_md: self.text_md.clone(),
            tables: self.tables.clone(),
            confidence: self.confidence,
            engine_meta: self.engine_meta.clone(),
        }
    }
}

/// What merge consumes for a page: the output minus the raw response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrPatch {
    pub text_md: String,
    #[serde(default)]
    pub tables: Vec<Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub engine_meta: Map<String, Value>,
}

impl OcrPatch {
    /// True when the patch carries neither text nor tables.
    pub fn is_empty(&self) -> bool {
        self.text_md.trim().is_empty() && self.tables.is_empty()
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "text_md": self.text_md,
            "tables": self.tables,
            "confidence": self.confidence,
            "engine_meta": self.engine_meta,
        })
    }

    /// `sha256(stable_json(patch))`.
    pub fn patch_sha(&self) -> String {
        stable_sha256(&self.to_value())
    }
}
