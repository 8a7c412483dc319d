//! Gate command: score a structure file without touching the database.

use std::path::Path;

use anyhow::Context;
use docket::Settings;
use docket_ocr::{compute_hard_pages, GateConfig};
use serde_json::Value;

pub async fn cmd_gate(
    settings: &Settings,
    structure: &Path,
    threshold: Option<f64>,
    max_pages: Option<u32>,
) -> anyhow::Result<()> {
    let contents = tokio::fs::read(structure)
        .await
        .with_context(|| format!("cannot read {}", structure.display()))?;
    let structure: Value = serde_json::from_slice(&contents)
        .with_context(|| format!("{} is not valid JSON", structure.display()))?;

    let config = GateConfig::new(
        threshold.or(settings.gate.threshold),
        max_pages.or(settings.gate.max_pages),
    );
    let report = compute_hard_pages(&structure, &config);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
