//! Block ledger domain types and normalization of parser output.
//!
//! A block's id is a pure function of (doc, version, page, type, content
//! hash), so re-running normalization over identical parser output always
//! reproduces the same ids and the same ledger rows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::hashing::{sha256_hex, stable_json};
use crate::ids::{DocId, PageNo};

/// Length of a derived block id (hex chars).
pub const BLOCK_ID_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Text,
    Table,
    Figure,
    Code,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Text => "text",
            BlockType::Table => "table",
            BlockType::Figure => "figure",
            BlockType::Code => "code",
        }
    }

    /// Text and table blocks are the ones OCR output may replace.
    pub fn is_text_or_table(&self) -> bool {
        matches!(self, BlockType::Text | BlockType::Table)
    }
}

impl FromStr for BlockType {
    type Err = NormalizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(BlockType::Text),
            "table" => Ok(BlockType::Table),
            "figure" => Ok(BlockType::Figure),
            "code" => Ok(BlockType::Code),
            other => Err(NormalizeError::InvalidBlockType(other.to_string())),
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("parser structure is not a JSON object")]
    NotAnObject,
    #[error("parser structure has no `blocks` array")]
    MissingBlocks,
    #[error("parser block {0} is not a JSON object")]
    InvalidBlock(usize),
    #[error("unsupported block type: {0:?}")]
    InvalidBlockType(String),
}

/// One row of the block ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerBlock {
    pub block_id: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub page: PageNo,
    pub bbox: Option<[f64; 4]>,
    pub text: Option<String>,
    pub data: Value,
    pub block_sha: String,
}

/// `sha256("{doc}:{ver}:{page}:{type}:{block_sha}")`, truncated to 24 hex chars.
pub fn derive_block_id(
    doc: &DocId,
    version: i64,
    page: PageNo,
    block_type: BlockType,
    block_sha: &str,
) -> String {
    let digest = sha256_hex(format!(
        "{}:{}:{}:{}:{}",
        doc.as_str(),
        version,
        page.get(),
        block_type.as_str(),
        block_sha
    ));
    digest[..BLOCK_ID_LEN].to_string()
}

/// `sha256("{doc}:{ver}:{page}:table:{stable_json(payload)}")`.
pub fn derive_table_id(doc: &DocId, version: i64, page: PageNo, payload: &Value) -> String {
    sha256_hex(format!(
        "{}:{}:{}:table:{}",
        doc.as_str(),
        version,
        page.get(),
        stable_json(payload)
    ))
}

/// Normalize the parser's structure JSON (`{"blocks": [...]}`) into ledger blocks.
///
/// Each entry keeps its full JSON as `data`; its content hash is the hash of
/// that entry's stable serialization. Pages below 1 clamp to 1, and a missing
/// page falls back to the entry's 1-based position.
pub fn normalize_parser_blocks(
    doc: &DocId,
    version: i64,
    structure: &Value,
) -> Result<Vec<LedgerBlock>, NormalizeError> {
    let object = structure.as_object().ok_or(NormalizeError::NotAnObject)?;
    let entries = object
        .get("blocks")
        .and_then(Value::as_array)
        .ok_or(NormalizeError::MissingBlocks)?;

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let fields = entry
                .as_object()
                .ok_or(NormalizeError::InvalidBlock(index))?;
            let page = resolve_page(fields.get("page"), index as i64 + 1);
            let block_type: BlockType = fields
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .parse()?;
            let block_sha = sha256_hex(stable_json(entry));
            Ok(LedgerBlock {
                block_id: derive_block_id(doc, version, page, block_type, &block_sha),
                block_type,
                page,
                bbox: canonical_bbox(fields.get("bbox")),
                text: fields.get("text").and_then(Value::as_str).map(str::to_string),
                data: entry.clone(),
                block_sha,
            })
        })
        .collect()
}

fn resolve_page(value: Option<&Value>, fallback: i64) -> PageNo {
    let number = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() => PageNo::clamped(n.trunc() as i64),
        _ => PageNo::clamped(fallback),
    }
}

fn canonical_bbox(value: Option<&Value>) -> Option<[f64; 4]> {
    let items = value?.as_array()?;
    if items.len() != 4 {
        return None;
    }
    let mut bbox = [0.0; 4];
    for (slot, item) in bbox.iter_mut().zip(items) {
        let n = item.as_f64()?;
        if !n.is_finite() {
            return None;
        }
        *slot = n;
    }
    Some(bbox)
}

/// Lowercased, whitespace-collapsed text used by the search index.
pub fn search_text(text: Option<&str>) -> String {
    text.unwrap_or_default()
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Sha256Hex;
    use serde_json::json;

    fn doc() -> DocId {
        DocId::from_raw_sha(&Sha256Hex::digest(b"source"))
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let structure = json!({"blocks": [
            {"type": "text", "page": 1, "text": "Hello", "bbox": [0, 0, 10, 10]},
            {"type": "Table", "page": 2, "text": "a | b"},
        ]});
        let first = normalize_parser_blocks(&doc(), 1, &structure).unwrap();
        let second = normalize_parser_blocks(&doc(), 1, &structure).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].block_id.len(), BLOCK_ID_LEN);
        assert_eq!(first[1].block_type, BlockType::Table);
        assert_eq!(first[0].bbox, Some([0.0, 0.0, 10.0, 10.0]));
    }

    #[test]
    fn test_block_id_depends_on_version_and_content() {
        let structure = json!({"blocks": [{"type": "text", "page": 1, "text": "Hello"}]});
        let v1 = normalize_parser_blocks(&doc(), 1, &structure).unwrap();
        let v2 = normalize_parser_blocks(&doc(), 2, &structure).unwrap();
        assert_eq!(v1[0].block_sha, v2[0].block_sha);
        assert_ne!(v1[0].block_id, v2[0].block_id);

        let edited = json!({"blocks": [{"type": "text", "page": 1, "text": "Hello!"}]});
        let e = normalize_parser_blocks(&doc(), 1, &edited).unwrap();
        assert_ne!(v1[0].block_id, e[0].block_id);
    }

    #[test]
    fn test_key_order_does_not_change_hash() {
        let a = json!({"blocks": [{"type": "text", "page": 1, "text": "x"}]});
        let b = json!({"blocks": [{"text": "x", "page": 1, "type": "text"}]});
        let a = normalize_parser_blocks(&doc(), 1, &a).unwrap();
        let b = normalize_parser_blocks(&doc(), 1, &b).unwrap();
        assert_eq!(a[0].block_id, b[0].block_id);
    }

    #[test]
    fn test_page_fallbacks_and_bbox_rejection() {
        let structure = json!({"blocks": [
            {"type": "text", "text": "no page"},
            {"type": "code", "page": -4, "bbox": [0, 0, 1]},
            {"type": "figure", "page": 3.9, "bbox": [0, "x", 1, 2]},
        ]});
        let blocks = normalize_parser_blocks(&doc(), 1, &structure).unwrap();
        assert_eq!(blocks[0].page.get(), 1);
        assert_eq!(blocks[1].page.get(), 1);
        assert_eq!(blocks[1].bbox, None);
        assert_eq!(blocks[2].page.get(), 3);
        assert_eq!(blocks[2].bbox, None);
    }

    #[test]
    fn test_rejects_unknown_types_and_shapes() {
        assert_eq!(
            normalize_parser_blocks(&doc(), 1, &json!([])),
            Err(NormalizeError::NotAnObject)
        );
        assert_eq!(
            normalize_parser_blocks(&doc(), 1, &json!({"pages": []})),
            Err(NormalizeError::MissingBlocks)
        );
        assert!(matches!(
            normalize_parser_blocks(&doc(), 1, &json!({"blocks": [{"type": "heading"}]})),
            Err(NormalizeError::InvalidBlockType(_))
        ));
        assert_eq!(
            normalize_parser_blocks(&doc(), 1, &json!({"blocks": [3]})),
            Err(NormalizeError::InvalidBlock(0))
        );
    }

    #[test]
    fn test_table_id_is_stable_across_key_order() {
        let page = PageNo::new(2).unwrap();
        let a = derive_table_id(&doc(), 1, page, &json!({"rows": [[1, 2]], "cols": 2}));
        let b = derive_table_id(&doc(), 1, page, &json!({"cols": 2, "rows": [[1, 2]]}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, derive_table_id(&doc(), 2, page, &json!({"rows": [[1, 2]], "cols": 2})));
    }

    #[test]
    fn test_search_text() {
        assert_eq!(search_text(Some("  Hello \n  WORLD ")), "hello world");
        assert_eq!(search_text(None), "");
    }
}
