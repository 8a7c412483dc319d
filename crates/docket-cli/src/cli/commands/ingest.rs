//! Ingest command: run the pipeline over one file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use console::style;
use docket::repository::ReserveOptions;
use docket::storage::FsObjectStore;
use docket::{DbContext, RunId, Settings};
use docket_ingest::{
    CommandParser, DocumentParser, IngestRequest, IngestResult, JournalHost, LineParser, OcrLane,
    Pipeline, StepHost,
};
use docket_ocr::{ChatOcrEngine, GateConfig, OcrConfig, PdftoppmRasterizer};
use tracing::{info, warn};

pub struct IngestArgs {
    pub file: PathBuf,
    pub run_id: Option<String>,
    pub pdf: Option<PathBuf>,
    pub ocr: bool,
    pub inline: bool,
}

pub async fn cmd_ingest(settings: &Settings, args: IngestArgs) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let ctx = settings.db_context()?;
    ctx.migrate().await?;

    let raw = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("cannot read {}", args.file.display()))?;
    let run_id = match args.run_id {
        Some(ref id) => RunId::parse(id)?,
        None => RunId::parse(&format!("run-{}", uuid::Uuid::new_v4()))?,
    };

    let mut request = IngestRequest::new(run_id, raw).with_options(ReserveOptions {
        filename: args
            .file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        ..ReserveOptions::default()
    });
    if args.ocr || args.pdf.is_some() {
        request = request.with_ocr(args.pdf.clone());
    }

    let mut pipeline = build_pipeline(settings, &ctx);
    if request.ocr {
        match ocr_lane(settings)? {
            Some(lane) => pipeline = pipeline.with_ocr(lane),
            None => warn!("OCR is disabled in the configuration; skipping the OCR lane"),
        }
    }

    let result = if args.inline {
        execute(&pipeline, &request).await?
    } else {
        execute(&pipeline.with_host(JournalHost::new(ctx.workflow())), &request).await?
    };

    eprintln!(
        "{} Ingested {} v{} in run {} ({} blocks, {} artifacts)",
        style("✓").green(),
        result.doc_id,
        result.version,
        result.run_id,
        result.block_count,
        result.artifacts.len()
    );
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn build_pipeline(settings: &Settings, ctx: &DbContext) -> Pipeline {
    let parser: Arc<dyn DocumentParser> = match settings.parser_command {
        Some(ref command) => Arc::new(CommandParser::new(command)),
        None => Arc::new(LineParser),
    };
    Pipeline::new(
        ctx.repositories(),
        ctx.effect_cache(),
        Arc::new(FsObjectStore::new(&settings.objects_dir)),
        parser,
        settings.data_dir.join("work"),
    )
}

fn ocr_lane(settings: &Settings) -> anyhow::Result<Option<OcrLane>> {
    let config = OcrConfig::from_section(&settings.ocr)?;
    if !config.enabled {
        return Ok(None);
    }
    info!(
        engine = %config.engine,
        model = %config.model,
        base_url = %config.base_url,
        "Configured OCR lane"
    );
    let rasterizer = Arc::new(PdftoppmRasterizer::from_config(&config));
    let engine = Arc::new(ChatOcrEngine::new(&config)?);
    Ok(Some(OcrLane::new(
        GateConfig::from_section(&settings.gate),
        config,
        rasterizer,
        engine,
    )))
}

async fn execute<H: StepHost>(
    pipeline: &Pipeline<H>,
    request: &IngestRequest,
) -> anyhow::Result<IngestResult> {
    pipeline.run(request).await.map_err(|e| {
        if e.is_retryable() && pipeline.resumes() {
            warn!(
                "Run {} failed with a retryable error; rerun with --run-id {} to resume",
                request.run_id, request.run_id
            );
        }
        anyhow::Error::new(e)
    })
}
