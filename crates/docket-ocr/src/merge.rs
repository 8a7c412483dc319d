//! Merge OCR patches into the block ledger.
//!
//! For every hard page the plan turns the page's patch into OCR-origin
//! blocks, hashed and identified exactly like parser blocks. A page whose
//! patch is empty keeps its parser blocks untouched. Otherwise the parser's
//! text and table blocks on that page give way to the OCR blocks while
//! figures and code stay. Each touched page gets a before/after digest so
//! the change can be audited and compared across retried attempts.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use docket::blocks::{derive_block_id, BlockType, LedgerBlock};
use docket::hashing::{is_sha256_hex, sha256_hex, stable_json, stable_sha256};
use docket::{DocId, PageIdx};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::contract::OcrPatch;

const PARSER_RANK: u8 = 1;
const OCR_RANK: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDiff {
    pub page_idx: PageIdx,
    pub before_sha: String,
    pub after_sha: String,
    pub changed_blocks: usize,
    pub diff_sha: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergePlan {
    pub merged_pages: Vec<PageIdx>,
    /// OCR-origin blocks the caller installs with `replace_page_blocks`.
    pub replacement_blocks: Vec<LedgerBlock>,
    pub page_diffs: Vec<PageDiff>,
    /// Hash over all page summaries; `None` when no page was merged.
    pub diff_sha: Option<String>,
}

impl MergePlan {
    pub fn changed_pages(&self) -> impl Iterator<Item = &PageDiff> {
        self.page_diffs.iter().filter(|diff| diff.changed_blocks > 0)
    }
}

struct Candidate {
    block: LedgerBlock,
    rank: u8,
}

/// Compute the merge of `patches` into `current` over `hard_pages`.
///
/// Pure: identical inputs reproduce identical plans, hashes included.
pub fn compute_merge_plan(
    doc: &DocId,
    version: i64,
    hard_pages: &[PageIdx],
    patches: &BTreeMap<PageIdx, OcrPatch>,
    current: &[LedgerBlock],
) -> MergePlan {
    let mut by_page: BTreeMap<PageIdx, Vec<&LedgerBlock>> = BTreeMap::new();
    for block in current
        .iter()
        .filter(|b| !b.block_id.is_empty() && is_sha256_hex(&b.block_sha))
    {
        by_page.entry(block.page.to_page_idx()).or_default().push(block);
    }
    for blocks in by_page.values_mut() {
        blocks.sort_by(|a, b| a.block_id.cmp(&b.block_id));
    }

    let merged_pages: Vec<PageIdx> = hard_pages
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let empty_patch = OcrPatch::default();
    let mut page_diffs = Vec::with_capacity(merged_pages.len());
    let mut replacement_blocks = Vec::new();

    for &page_idx in &merged_pages {
        let parser_blocks = by_page.get(&page_idx).map(Vec::as_slice).unwrap_or(&[]);
        let patch = patches.get(&page_idx).unwrap_or(&empty_patch);
        let ocr_blocks = build_ocr_blocks(doc, version, page_idx, patch);

        let keep_parser_text = ocr_blocks.is_empty();
        let mut candidates: Vec<Candidate> = parser_blocks
            .iter()
            .filter(|b| keep_parser_text || !b.block_type.is_text_or_table())
            .map(|b| Candidate {
                block: (*b).clone(),
                rank: PARSER_RANK,
            })
            .chain(ocr_blocks.into_iter().map(|block| Candidate {
                block,
                rank: OCR_RANK,
            }))
            .collect();

        candidates.sort_by(|a, b| {
            a.block
                .block_sha
                .cmp(&b.block.block_sha)
                .then(a.rank.cmp(&b.rank))
                .then(a.block.block_id.cmp(&b.block.block_id))
        });

        let mut seen = HashSet::new();
        let after: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| seen.insert(c.block.block_sha.clone()))
            .collect();

        let before_shas = sorted_shas(parser_blocks.iter().map(|b| b.block_sha.as_str()));
        let after_shas = sorted_shas(after.iter().map(|c| c.block.block_sha.as_str()));

        let before_set: HashSet<&str> = before_shas.iter().map(String::as_str).collect();
        let after_set: HashSet<&str> = after_shas.iter().map(String::as_str).collect();
        let changed_blocks = before_set.symmetric_difference(&after_set).count();

        #[derive(Serialize)]
        struct DiffBody<'a> {
            page: PageIdx,
            before: &'a [String],
            after: &'a [String],
        }

        let diff_sha = hash_json(&DiffBody {
            page: page_idx,
            before: &before_shas,
            after: &after_shas,
        });

        page_diffs.push(PageDiff {
            page_idx,
            before_sha: hash_json(&before_shas),
            after_sha: hash_json(&after_shas),
            changed_blocks,
            diff_sha,
        });

        replacement_blocks.extend(
            after
                .into_iter()
                .filter(|c| c.rank == OCR_RANK)
                .map(|c| c.block),
        );
    }

    let diff_sha = if page_diffs.is_empty() {
        None
    } else {
        Some(hash_json(&page_diffs))
    };

    MergePlan {
        merged_pages,
        replacement_blocks,
        page_diffs,
        diff_sha,
    }
}

/// One text block for the patch's markdown plus one table block per table.
fn build_ocr_blocks(
    doc: &DocId,
    version: i64,
    page_idx: PageIdx,
    patch: &OcrPatch,
) -> Vec<LedgerBlock> {
    let page = page_idx.to_page_no();
    let mut rows = Vec::new();

    let text_md = patch.text_md.trim();
    if !text_md.is_empty() {
        rows.push((
            BlockType::Text,
            text_md.to_string(),
            json!({
                "source": "ocr",
                "source_rank": OCR_RANK,
                "page_idx": page_idx,
                "text_md": text_md,
            }),
        ));
    }

    for (table_idx, table) in patch.tables.iter().enumerate() {
        rows.push((
            BlockType::Table,
            stable_json(table),
            json!({
                "source": "ocr",
                "source_rank": OCR_RANK,
                "page_idx": page_idx,
                "table_idx": table_idx,
                "table": table,
            }),
        ));
    }

    rows.into_iter()
        .map(|(block_type, text, data)| {
            let block_sha = stable_sha256(&json!({
                "source": "ocr",
                "source_rank": OCR_RANK,
                "page": page,
                "type": block_type,
                "text": text,
                "data": data,
            }));
            LedgerBlock {
                block_id: derive_block_id(doc, version, page, block_type, &block_sha),
                block_type,
                page,
                bbox: None,
                text: Some(text),
                data,
                block_sha,
            }
        })
        .collect()
}

fn sorted_shas<'a>(shas: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut shas: Vec<String> = shas.map(str::to_string).collect();
    shas.sort();
    shas
}

fn hash_json<T: Serialize + ?Sized>(value: &T) -> String {
    // Strings and integers only; serialization cannot fail.
    sha256_hex(serde_json::to_string(value).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket::blocks::normalize_parser_blocks;
    use docket::Sha256Hex;
    use serde_json::Value;

    fn doc() -> DocId {
        DocId::from_raw_sha(&Sha256Hex::digest(b"merge test"))
    }

    fn ledger() -> Vec<LedgerBlock> {
        let structure = json!({"blocks": [
            {"type": "text", "page": 1, "text": "p1 text"},
            {"type": "figure", "page": 1, "text": null},
            {"type": "table", "page": 1, "text": "a|b"},
            {"type": "code", "page": 1, "text": "fn main() {}"},
            {"type": "text", "page": 2, "text": "p2 text"},
        ]});
        normalize_parser_blocks(&doc(), 1, &structure).unwrap()
    }

    fn patch(text: &str) -> OcrPatch {
        OcrPatch {
            text_md: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_replaces_text_and_tables_keeps_figures_and_code() {
        let blocks = ledger();
        let patches = BTreeMap::from([(
            PageIdx::new(0),
            OcrPatch {
                text_md: "  recognized page one  ".into(),
                tables: vec![json!({"rows": [["a", "b"]]})],
                ..Default::default()
            },
        )]);
        let plan = compute_merge_plan(&doc(), 1, &[PageIdx::new(0)], &patches, &blocks);

        assert_eq!(plan.merged_pages, vec![PageIdx::new(0)]);
        assert_eq!(plan.replacement_blocks.len(), 2);
        let text = plan
            .replacement_blocks
            .iter()
            .find(|b| b.block_type == BlockType::Text)
            .unwrap();
        assert_eq!(text.text.as_deref(), Some("recognized page one"));
        assert_eq!(text.data["source"], json!("ocr"));
        assert_eq!(text.page.get(), 1);
        assert_eq!(
            text.block_id,
            derive_block_id(&doc(), 1, text.page, BlockType::Text, &text.block_sha)
        );
        let table = plan
            .replacement_blocks
            .iter()
            .find(|b| b.block_type == BlockType::Table)
            .unwrap();
        assert_eq!(table.text.as_deref(), Some(r#"{"rows":[["a","b"]]}"#));
        assert_eq!(table.data["table_idx"], json!(0));

        // before: text, figure, table, code; after: figure, code, ocr text, ocr table.
        let diff = &plan.page_diffs[0];
        assert_eq!(diff.changed_blocks, 4);
        assert_ne!(diff.before_sha, diff.after_sha);
        assert!(plan.diff_sha.is_some());
    }

    #[test]
    fn test_empty_patch_leaves_page_unchanged() {
        let blocks = ledger();
        let patches = BTreeMap::from([(PageIdx::new(1), patch("   "))]);
        let plan = compute_merge_plan(
            &doc(),
            1,
            &[PageIdx::new(1), PageIdx::new(0)],
            &patches,
            &blocks,
        );
        assert_eq!(plan.merged_pages, vec![PageIdx::new(0), PageIdx::new(1)]);
        assert!(plan.replacement_blocks.is_empty());
        for diff in &plan.page_diffs {
            assert_eq!(diff.changed_blocks, 0);
            assert_eq!(diff.before_sha, diff.after_sha);
        }
        assert_eq!(plan.changed_pages().count(), 0);
    }

    #[test]
    fn test_deterministic() {
        let blocks = ledger();
        let patches = BTreeMap::from([
            (PageIdx::new(0), patch("one")),
            (PageIdx::new(1), patch("two")),
        ]);
        let hard = [PageIdx::new(0), PageIdx::new(1)];
        let a = compute_merge_plan(&doc(), 1, &hard, &patches, &blocks);

        let mut shuffled = blocks.clone();
        shuffled.reverse();
        let b = compute_merge_plan(&doc(), 1, &hard, &patches, &shuffled);
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );

        let other = BTreeMap::from([
            (PageIdx::new(0), patch("one")),
            (PageIdx::new(1), patch("three")),
        ]);
        let c = compute_merge_plan(&doc(), 1, &hard, &other, &blocks);
        assert_ne!(a.diff_sha, c.diff_sha);
        assert_eq!(a.page_diffs[0], c.page_diffs[0]);
    }

    #[test]
    fn test_no_hard_pages() {
        let plan = compute_merge_plan(&doc(), 1, &[], &BTreeMap::new(), &ledger());
        assert!(plan.merged_pages.is_empty());
        assert!(plan.page_diffs.is_empty());
        assert_eq!(plan.diff_sha, None);
    }

    #[test]
    fn test_page_without_parser_blocks() {
        let patches = BTreeMap::from([(PageIdx::new(4), patch("only ocr"))]);
        let plan = compute_merge_plan(&doc(), 1, &[PageIdx::new(4)], &patches, &ledger());
        assert_eq!(plan.replacement_blocks.len(), 1);
        assert_eq!(plan.replacement_blocks[0].page.get(), 5);
        assert_eq!(plan.page_diffs[0].changed_blocks, 1);
        assert_eq!(plan.page_diffs[0].before_sha, sha256_hex("[]"));
    }

    #[test]
    fn test_duplicate_content_prefers_ocr_then_block_id() {
        let page = PageIdx::new(0).to_page_no();
        let sha = "a".repeat(64);
        let make = |id: &str, block_type| LedgerBlock {
            block_id: id.to_string(),
            block_type,
            page,
            bbox: None,
            text: None,
            data: Value::Null,
            block_sha: sha.clone(),
        };
        let blocks = vec![make("zz", BlockType::Figure), make("aa", BlockType::Code)];
        let plan = compute_merge_plan(&doc(), 1, &[PageIdx::new(0)], &BTreeMap::new(), &blocks);
        // Both parser blocks share a hash; the lower block id survives.
        assert_eq!(plan.page_diffs[0].changed_blocks, 0);
        assert!(plan.replacement_blocks.is_empty());
    }

    #[test]
    fn test_ignores_malformed_ledger_rows() {
        let mut blocks = ledger();
        blocks[0].block_sha = "not-a-sha".into();
        let plan = compute_merge_plan(&doc(), 1, &[PageIdx::new(0)], &BTreeMap::new(), &blocks);
        let expected = sorted_shas(blocks[1..4].iter().map(|b| b.block_sha.as_str()));
        assert_eq!(plan.page_diffs[0].before_sha, hash_json(&expected));
    }
}
