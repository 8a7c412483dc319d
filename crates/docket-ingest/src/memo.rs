//! Exec memo: a short markdown digest of one ingested version.

use std::collections::BTreeMap;

use docket::blocks::LedgerBlock;
use docket::{DocId, PageIdx};
use serde_json::Value;

const EXCERPT_LIMIT: usize = 8;
const EXCERPT_CHARS: usize = 200;

/// OCR outcome summarized at the end of the memo.
#[derive(Debug, Clone, Default)]
pub struct MemoOcr {
    pub hard_pages: Vec<PageIdx>,
    pub ocr_pages: Vec<PageIdx>,
    pub diff_sha: Option<String>,
}

pub struct MemoInput<'a> {
    pub doc_id: &'a DocId,
    pub version: i64,
    pub raw_sha: &'a str,
    pub parser_config_sha: Option<&'a str>,
    pub blocks: &'a [LedgerBlock],
    pub ocr: Option<&'a MemoOcr>,
}

fn one_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn short_text(value: &str) -> String {
    let normalized = one_line(value);
    if normalized.chars().count() <= EXCERPT_CHARS {
        return normalized;
    }
    let cut: String = normalized.chars().take(EXCERPT_CHARS - 3).collect();
    format!("{}...", cut)
}

fn excerpt(block: &LedgerBlock) -> Option<String> {
    let text = short_text(block.text.as_deref().unwrap_or_default());
    if !text.is_empty() {
        return Some(text);
    }
    block
        .data
        .get("title")
        .and_then(Value::as_str)
        .map(short_text)
        .filter(|title| !title.is_empty())
}

fn join_pages(pages: &[PageIdx]) -> String {
    pages
        .iter()
        .map(|p| p.get().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Render the memo. Output depends only on the input, in block order.
pub fn build_exec_memo(input: &MemoInput<'_>) -> String {
    let mut lines = vec![
        format!("# Exec memo: {} v{}", input.doc_id, input.version),
        format!("- RawSHA: {}", input.raw_sha),
    ];
    if let Some(sha) = input.parser_config_sha.filter(|s| !s.is_empty()) {
        lines.push(format!("- MarkerCfgSHA: {}", sha));
    }
    lines.push(format!("- BlockCount: {}", input.blocks.len()));

    lines.push("## Block counts".to_string());
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for block in input.blocks {
        *counts.entry(block.block_type.as_str()).or_default() += 1;
    }
    for (block_type, count) in counts {
        lines.push(format!("- {}: {}", block_type, count));
    }

    lines.push("## Key excerpts (block refs)".to_string());
    for (block, text) in input
        .blocks
        .iter()
        .filter_map(|b| excerpt(b).map(|text| (b, text)))
        .take(EXCERPT_LIMIT)
    {
        lines.push(format!("- [b:{}] (p{}) {}", block.block_id, block.page, text));
    }

    if let Some(ocr) = input.ocr {
        lines.push("## OCR merge".to_string());
        lines.push(format!("- hard_pages: {}", join_pages(&ocr.hard_pages)));
        lines.push(format!("- ocr_pages: {}", join_pages(&ocr.ocr_pages)));
        lines.push(format!(
            "- diff_sha: {}",
            ocr.diff_sha.as_deref().unwrap_or("none")
        ));
    }

    format!("{}\n", lines.join("\n").trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket::blocks::BlockType;
    use docket::{PageNo, Sha256Hex};
    use serde_json::json;

    fn block(id: &str, block_type: BlockType, page: u32, text: Option<&str>, data: Value) -> LedgerBlock {
        LedgerBlock {
            block_id: id.to_string(),
            block_type,
            page: PageNo::new(page).unwrap(),
            bbox: None,
            text: text.map(str::to_string),
            data,
            block_sha: "a".repeat(64),
        }
    }

    #[test]
    fn test_memo_layout() {
        let doc = DocId::from_raw_sha(&Sha256Hex::digest(b"memo"));
        let blocks = vec![
            block("0123456789abcdef01234567", BlockType::Text, 1, Some("  hello   world  "), json!({})),
            block("abcdef0123456789abcdef01", BlockType::Table, 2, None, json!({"title": "table title"})),
            block("ffffffffffffffffffffffff", BlockType::Figure, 2, None, json!({})),
        ];
        let ocr = MemoOcr {
            hard_pages: vec![PageIdx::new(0), PageIdx::new(2)],
            ocr_pages: vec![PageIdx::new(2)],
            diff_sha: Some("c".repeat(64)),
        };
        let raw_sha = "a".repeat(64);
        let cfg_sha = "b".repeat(64);
        let memo = build_exec_memo(&MemoInput {
            doc_id: &doc,
            version: 2,
            raw_sha: &raw_sha,
            parser_config_sha: Some(&cfg_sha),
            blocks: &blocks,
            ocr: Some(&ocr),
        });

        assert!(memo.starts_with(&format!("# Exec memo: {} v2\n", doc)));
        assert!(memo.contains(&format!("- MarkerCfgSHA: {}", cfg_sha)));
        assert!(memo.contains("- BlockCount: 3"));
        assert!(memo.contains("## Block counts\n- figure: 1\n- table: 1\n- text: 1\n"));
        assert!(memo.contains("- [b:0123456789abcdef01234567] (p1) hello world"));
        assert!(memo.contains("- [b:abcdef0123456789abcdef01] (p2) table title"));
        assert!(!memo.contains("[b:ffffffffffffffffffffffff]"));
        assert!(memo.contains("- hard_pages: 0,2"));
        assert!(memo.contains("- ocr_pages: 2"));
        assert!(memo.ends_with(&format!("- diff_sha: {}\n", "c".repeat(64))));
    }

    #[test]
    fn test_excerpts_are_capped() {
        let long = "word ".repeat(100);
        assert_eq!(short_text(&long).chars().count(), 200);
        assert!(short_text(&long).ends_with("..."));

        let blocks: Vec<LedgerBlock> = (0..12)
            .map(|i| block(&format!("{:024}", i), BlockType::Text, 1, Some("line"), json!({})))
            .collect();
        let doc = DocId::from_raw_sha(&Sha256Hex::digest(b"cap"));
        let memo = build_exec_memo(&MemoInput {
            doc_id: &doc,
            version: 1,
            raw_sha: "x",
            parser_config_sha: None,
            blocks: &blocks,
            ocr: None,
        });
        assert_eq!(memo.matches("- [b:").count(), 8);
        assert!(!memo.contains("MarkerCfgSHA"));
        assert!(!memo.contains("## OCR merge"));
    }
}
