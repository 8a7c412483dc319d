//! Run inspection commands.

use console::style;
use docket::{RunId, Settings};
use serde_json::json;

use crate::cli::helpers::{short_sha, truncate};

/// List the artifacts a run persisted.
pub async fn cmd_run_artifacts(settings: &Settings, run_id: &str, as_json: bool) -> anyhow::Result<()> {
    let run_id = RunId::parse(run_id)?;
    let repos = settings.repositories()?;
    let artifacts = repos.artifacts.list_by_run(run_id.as_str()).await?;

    if as_json {
        let rows: Vec<_> = artifacts
            .iter()
            .map(|a| {
                let prov: serde_json::Value =
                    serde_json::from_str(&a.prov).unwrap_or(serde_json::Value::Null);
                json!({
                    "artifact_id": a.artifact_id,
                    "artifact_type": a.artifact_type,
                    "format": a.format,
                    "uri": a.uri,
                    "sha256": a.sha256,
                    "prov": prov,
                    "created_at": a.created_at,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if artifacts.is_empty() {
        println!("{} No artifacts recorded for run '{}'", style("!").yellow(), run_id);
        return Ok(());
    }

    println!("\n{}", style(format!("Artifacts for {}", run_id)).bold());
    println!("{}", "-".repeat(80));
    println!("{:<12} {:<8} {:<14} URI", "Type", "Format", "SHA-256");
    println!("{}", "-".repeat(80));
    for artifact in artifacts {
        println!(
            "{:<12} {:<8} {:<14} {}",
            artifact.artifact_type,
            artifact.format,
            short_sha(&artifact.sha256),
            truncate(&artifact.uri, 44)
        );
    }
    Ok(())
}
