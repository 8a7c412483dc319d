//! Initialize command.

use console::style;
use docket::Settings;

/// Create the data directory and bring the database schema up to date.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let ctx = settings.db_context()?;
    let applied = ctx.migrate().await?;
    for name in &applied {
        println!("  {} Applied migration {}", style("✓").green(), name);
    }
    if applied.is_empty() {
        println!("  {} Schema already up to date", style("✓").green());
    }

    println!(
        "{} Initialized docket in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    Ok(())
}
