//! Page hardness gate.
//!
//! Scores every page of a parser structure and selects the pages whose text
//! layer looks too thin to trust. The output is a pure function of the input
//! and the config, and it carries two audit hashes: `code_rev` identifies the
//! algorithm and config, `gate_rev` the complete scoring outcome.

use std::collections::{BTreeMap, BTreeSet};

use docket::config::GateSection;
use docket::hashing::sha256_hex;
use docket::PageIdx;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

pub const GATE_ALGO_REV: &str = "c1-gate-v1";
pub const DEFAULT_THRESHOLD: f64 = 0.9;
pub const DEFAULT_MAX_PAGES: u32 = 10;

const SHORT_TEXT_LEN: usize = 16;
const LOW_TEXT_CHARS: usize = 40;
const IMAGE_TEXT_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateConfig {
    pub threshold: f64,
    pub max_pages: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl GateConfig {
    /// Non-positive or non-finite thresholds fall back to the default;
    /// `max_pages` is at least 1.
    pub fn new(threshold: Option<f64>, max_pages: Option<u32>) -> Self {
        let threshold = threshold
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or(DEFAULT_THRESHOLD);
        let max_pages = max_pages.unwrap_or(DEFAULT_MAX_PAGES).max(1);
        Self {
            threshold,
            max_pages,
        }
    }

    pub fn from_section(section: &GateSection) -> Self {
        Self::new(section.threshold, section.max_pages)
    }

    /// Hash of the algorithm revision and this config.
    pub fn code_rev(&self) -> String {
        #[derive(Serialize)]
        struct CodeRev<'a> {
            algo: &'a str,
            #[serde(serialize_with = "plain_number")]
            threshold: f64,
            max_pages: u32,
        }

        hash_json(&CodeRev {
            algo: GATE_ALGO_REV,
            threshold: self.threshold,
            max_pages: self.max_pages,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub gate_rev: String,
    pub code_rev: String,
    /// Positions in the sorted page list, ascending.
    pub hard_pages: Vec<PageIdx>,
    #[serde(serialize_with = "plain_numbers")]
    pub score_by_page: Vec<f64>,
    pub reasons: BTreeMap<u32, Vec<String>>,
}

impl GateReport {
    pub fn page_count(&self) -> usize {
        self.score_by_page.len()
    }

    pub fn score(&self, page: PageIdx) -> Option<f64> {
        self.score_by_page.get(page.get() as usize).copied()
    }

    pub fn reasons_for(&self, page: PageIdx) -> &[String] {
        self.reasons
            .get(&page.get())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Score every page and pick the hard ones.
pub fn compute_hard_pages(structure: &Value, config: &GateConfig) -> GateReport {
    let pages = extract_pages(structure);

    let mut score_by_page = Vec::with_capacity(pages.len());
    let mut reasons = BTreeMap::new();
    let mut candidates = Vec::new();

    for (order, blocks) in pages.iter().enumerate() {
        let order = order as u32;
        let scored = score_page(blocks);
        let hard = scored.score >= config.threshold || scored.reasons.contains("no_blocks");
        if hard {
            candidates.push((order, scored.score));
        }
        score_by_page.push(scored.score);
        reasons.insert(order, scored.reasons.into_iter().collect::<Vec<_>>());
    }

    candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    candidates.truncate(config.max_pages as usize);
    let mut hard_pages: Vec<PageIdx> = candidates
        .into_iter()
        .map(|(order, _)| PageIdx::new(order))
        .collect();
    hard_pages.sort();

    let code_rev = config.code_rev();

    #[derive(Serialize)]
    struct GateRev<'a> {
        code_rev: &'a str,
        pages: usize,
        hard_pages: &'a [PageIdx],
        #[serde(serialize_with = "plain_numbers")]
        score_by_page: &'a [f64],
        reasons: &'a BTreeMap<u32, Vec<String>>,
    }

    let gate_rev = hash_json(&GateRev {
        code_rev: &code_rev,
        pages: pages.len(),
        hard_pages: &hard_pages,
        score_by_page: &score_by_page,
        reasons: &reasons,
    });

    GateReport {
        gate_rev,
        code_rev,
        hard_pages,
        score_by_page,
        reasons,
    }
}

/// Group the structure into pages of blocks.
///
/// A top-level array or `children` array yields one page per entry. A
/// `blocks` array is grouped by each block's 1-based `page`, and the groups
/// are returned in ascending page order.
fn extract_pages(structure: &Value) -> Vec<Vec<&Map<String, Value>>> {
    match structure {
        Value::Array(entries) => one_per_entry(entries),
        Value::Object(object) => {
            if let Some(Value::Array(blocks)) = object.get("blocks") {
                let mut by_page: BTreeMap<u64, Vec<&Map<String, Value>>> = BTreeMap::new();
                for (idx, entry) in blocks.iter().enumerate() {
                    let Some(block) = entry.as_object() else {
                        continue;
                    };
                    let page = page_idx_of(block.get("page"), idx as u64);
                    by_page.entry(page).or_default().push(block);
                }
                by_page.into_values().collect()
            } else if let Some(Value::Array(children)) = object.get("children") {
                one_per_entry(children)
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

fn one_per_entry(entries: &[Value]) -> Vec<Vec<&Map<String, Value>>> {
    entries
        .iter()
        .map(|entry| entry.as_object().into_iter().collect())
        .collect()
}

/// 0-based page index from a 1-based page value; unusable values fall back.
fn page_idx_of(value: Option<&Value>, fallback: u64) -> u64 {
    let number = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        Some(Value::Null) => Some(0.0),
        _ => None,
    };
    match number.filter(|n| n.is_finite()) {
        Some(n) => (n.trunc() - 1.0).max(0.0) as u64,
        None => fallback,
    }
}

struct PageScore {
    score: f64,
    reasons: BTreeSet<String>,
}

fn score_page(blocks: &[&Map<String, Value>]) -> PageScore {
    let block_count = blocks.len();
    let mut text_chars = 0usize;
    let mut image_like = 0usize;
    let mut table_like = 0usize;
    let mut short_text = 0usize;

    for block in blocks {
        let block_type = block
            .get("type")
            .filter(|v| !v.is_null())
            .or_else(|| block.get("block_type"))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_default();
        let text_len = block
            .get("text")
            .and_then(Value::as_str)
            .map(|s| s.trim().encode_utf16().count())
            .unwrap_or(0);

        text_chars += text_len;
        if text_len > 0 && text_len < SHORT_TEXT_LEN {
            short_text += 1;
        }
        match block_type.as_str() {
            "figure" | "image" => image_like += 1,
            "table" => table_like += 1,
            _ => {}
        }
    }

    let mut score = 0.0;
    let mut reasons = BTreeSet::new();
    let mut signal = |fired: bool, weight: f64, reason: &str| {
        if fired {
            score += weight;
            reasons.insert(reason.to_string());
        }
    };

    signal(block_count == 0, 1.0, "no_blocks");
    signal(text_chars < LOW_TEXT_CHARS, 0.7, "low_text_density");
    signal(
        image_like > 0 && text_chars < IMAGE_TEXT_CHARS,
        0.4,
        "image_heavy",
    );
    signal(
        block_count >= 3 && short_text >= 3.max(block_count * 6 / 10),
        0.3,
        "fragmented_short_blocks",
    );
    signal(
        table_like > 0 && text_chars < 24.max(table_like * 16),
        0.2,
        "table_low_text",
    );

    if reasons.is_empty() {
        reasons.insert("marker_ok".to_string());
    }

    PageScore {
        score: (score * 1_000_000.0).round() / 1_000_000.0,
        reasons,
    }
}

fn hash_json<T: Serialize>(value: &T) -> String {
    // Only strings, integers and finite floats reach here.
    sha256_hex(serde_json::to_string(value).unwrap_or_default())
}

/// Whole floats serialize without a fractional part (`1` rather than `1.0`)
/// so the hashed JSON reads like any other JSON producer's.
fn plain_number<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

fn plain_numbers<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeSeq;

    struct Plain(f64);

    impl Serialize for Plain {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            plain_number(&self.0, serializer)
        }
    }

    let mut seq = serializer.serialize_seq(Some(values.len()))?;
    for value in values {
        seq.serialize_element(&Plain(*value))?;
    }
    seq.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_block(page: u32, text: &str) -> Value {
        json!({"type": "text", "page": page, "text": text})
    }

    const LONG: &str = "This paragraph has more than enough characters to be a normal text page.";

    #[test]
    fn test_healthy_page_is_marker_ok() {
        let structure = json!({"blocks": [text_block(1, LONG)]});
        let report = compute_hard_pages(&structure, &GateConfig::default());
        assert_eq!(report.score_by_page, vec![0.0]);
        assert_eq!(report.reasons_for(PageIdx::new(0)), ["marker_ok"]);
        assert!(report.hard_pages.is_empty());
    }

    #[test]
    fn test_signals_accumulate() {
        let structure = json!({"blocks": [
            {"type": "figure", "page": 1},
            {"type": "table", "page": 1, "text": "a"},
            {"type": "text", "page": 1, "text": "b"},
            {"type": "text", "page": 1, "text": "c"},
        ]});
        let report = compute_hard_pages(&structure, &GateConfig::default());
        // 0.7 + 0.4 + 0.3 + 0.2
        assert_eq!(report.score_by_page, vec![1.6]);
        assert_eq!(
            report.reasons_for(PageIdx::new(0)),
            [
                "fragmented_short_blocks",
                "image_heavy",
                "low_text_density",
                "table_low_text"
            ]
        );
        assert_eq!(report.hard_pages, vec![PageIdx::new(0)]);
    }

    #[test]
    fn test_selection_ranks_by_score_and_caps() {
        // Equal scores break toward the earlier page.
        let structure = json!({"blocks": [
            {"type": "figure", "page": 1, "text": "short caption here and there, forty plus chars!!"},
            text_block(2, LONG),
            {"type": "text", "page": 3, "text": "tiny"},
            {"type": "figure", "page": 4, "text": "a caption long enough to clear forty characters"},
        ]});
        let config = GateConfig::new(Some(0.3), Some(2));
        let report = compute_hard_pages(&structure, &config);
        assert_eq!(report.score_by_page, vec![0.4, 0.0, 0.7, 0.4]);
        assert_eq!(report.hard_pages, vec![PageIdx::new(0), PageIdx::new(2)]);
    }

    #[test]
    fn test_empty_entry_is_always_hard() {
        let structure = json!([{"type": "text", "text": LONG}, null]);
        let config = GateConfig::new(Some(5.0), None);
        let report = compute_hard_pages(&structure, &config);
        assert_eq!(report.page_count(), 2);
        assert_eq!(report.score(PageIdx::new(1)), Some(1.7));
        assert_eq!(report.hard_pages, vec![PageIdx::new(1)]);
        assert!(report
            .reasons_for(PageIdx::new(1))
            .contains(&"no_blocks".to_string()));
    }

    #[test]
    fn test_blocks_group_by_page_in_ascending_order() {
        let structure = json!({"blocks": [
            text_block(3, LONG),
            text_block(1, LONG),
            {"type": "text", "text": "x"},
            "not a block",
        ]});
        let pages = extract_pages(&structure);
        // page 3 -> idx 2, page 1 -> idx 0, missing page at position 2 -> idx 2.
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].len(), 1);
        assert_eq!(pages[1].len(), 2);
    }

    #[test]
    fn test_children_and_unknown_shapes() {
        let children = json!({"children": [text_block(1, LONG), text_block(1, LONG)]});
        assert_eq!(extract_pages(&children).len(), 2);
        assert!(extract_pages(&json!({"pages": []})).is_empty());
        assert!(extract_pages(&json!("text")).is_empty());
    }

    #[test]
    fn test_deterministic_and_hash_sensitive() {
        let structure = json!({"blocks": [
            text_block(1, LONG),
            {"type": "text", "page": 2, "text": "tiny"},
        ]});
        let config = GateConfig::default();
        let a = compute_hard_pages(&structure, &config);
        let b = compute_hard_pages(&structure, &config);
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );

        let other_threshold = GateConfig::new(Some(0.5), None);
        assert_ne!(config.code_rev(), other_threshold.code_rev());
        let other_cap = GateConfig::new(None, Some(3));
        assert_ne!(config.code_rev(), other_cap.code_rev());

        let changed = json!({"blocks": [text_block(1, LONG), text_block(2, LONG)]});
        let c = compute_hard_pages(&changed, &config);
        assert_eq!(a.code_rev, c.code_rev);
        assert_ne!(a.gate_rev, c.gate_rev);
    }

    #[test]
    fn test_code_rev_json_shape() {
        let config = GateConfig::new(Some(1.0), Some(4));
        let expected = sha256_hex(r#"{"algo":"c1-gate-v1","threshold":1,"max_pages":4}"#);
        assert_eq!(config.code_rev(), expected);
    }

    #[test]
    fn test_config_normalization() {
        assert_eq!(GateConfig::new(Some(-1.0), Some(0)).threshold, DEFAULT_THRESHOLD);
        assert_eq!(GateConfig::new(Some(f64::NAN), Some(0)).max_pages, 1);
        let section = GateSection {
            threshold: Some(0.5),
            max_pages: None,
        };
        assert_eq!(GateConfig::from_section(&section), GateConfig::new(Some(0.5), Some(10)));
    }

    #[test]
    fn test_page_values() {
        assert_eq!(page_idx_of(Some(&json!(1)), 9), 0);
        assert_eq!(page_idx_of(Some(&json!(4.7)), 9), 3);
        assert_eq!(page_idx_of(Some(&json!("2")), 9), 1);
        assert_eq!(page_idx_of(Some(&json!(-3)), 9), 0);
        assert_eq!(page_idx_of(Some(&json!("abc")), 9), 9);
        assert_eq!(page_idx_of(None, 9), 9);
    }
}
