//! Document inspection commands.

use console::style;
use docket::{DocId, Settings};

use crate::cli::helpers::short_sha;

/// Show a document, its versions and the block count of each.
pub async fn cmd_doc_show(settings: &Settings, doc_id: &str) -> anyhow::Result<()> {
    let doc_id = DocId::parse(doc_id)?;
    let repos = settings.repositories()?;

    let Some(doc) = repos.documents.get_document(&doc_id).await? else {
        println!("{} Document '{}' not found", style("✗").red(), doc_id);
        return Ok(());
    };

    println!("\n{}", style(&doc.doc_id).bold());
    println!("  Filename:  {}", doc.filename);
    println!("  MIME:      {}", doc.mime);
    println!("  Size:      {} bytes", doc.byte_len);
    println!("  Raw SHA:   {}", doc.raw_sha);
    println!("  Created:   {}", doc.created_at);

    let versions = repos.documents.list_versions(&doc_id).await?;
    println!("\n{}", style("Versions").bold());
    println!("{}", "-".repeat(60));
    println!("{:<6} {:<8} {:<14} Created", "Ver", "Blocks", "Parser cfg");
    println!("{}", "-".repeat(60));
    for version in versions {
        let blocks = repos.blocks.count_blocks(&doc_id, version.ver).await?;
        println!(
            "{:<6} {:<8} {:<14} {}",
            version.ver,
            blocks,
            short_sha(&version.parser_config_sha),
            version.created_at
        );
    }

    Ok(())
}
