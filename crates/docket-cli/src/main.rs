//! docket - resumable document ingestion with OCR remediation.
//!
//! Reserves content-addressed document versions, parses them into a block
//! ledger, and repairs hard pages with an OCR engine.

mod cli;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let default_filter = if cli::is_verbose() {
        "docket=debug,docket_ingest=debug,docket_ocr=debug"
    } else {
        "docket=info,docket_ingest=info,docket_ocr=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    cli::run().await
}
