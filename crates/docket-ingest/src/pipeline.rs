//! Ingestion pipeline: reserve, store, parse, normalize, remediate, summarize.
//!
//! Each step runs through the [`StepHost`] and consumes the typed output of
//! the steps before it. Steps with external writes go through the effect
//! cache under a content-derived key; database rows are written outside the
//! effects with idempotent upserts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use docket::artifacts::{Artifact, ArtifactType, ParserIdentity, Provenance};
use docket::blocks::normalize_parser_blocks;
use docket::hashing::sha256_hex;
use docket::repository::{ReserveOptions, Reservation};
use docket::storage::{ObjectKey, ObjectStore, StoredObject};
use docket::{EffectCache, EffectKey, PageNo, Repositories, RunId, Sha256Hex};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::host::{InlineHost, StepHost};
use crate::memo::{build_exec_memo, MemoInput, MemoOcr};
use crate::ocr_lane::{LaneContext, OcrLane, OcrLaneOutput};
use crate::parser::{DocumentParser, ParseOutput, CHUNKS_FILE, MARKDOWN_FILE, STRUCTURE_FILE};

pub const MEMO_FILE: &str = "memo.md";

const PDF_MIME: &str = "application/pdf";

/// One document to ingest under a caller-chosen run id.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub run_id: RunId,
    pub raw: Vec<u8>,
    pub options: ReserveOptions,
    /// PDF rendered for OCR. Defaults to the raw bytes when they are a PDF.
    pub source_pdf: Option<PathBuf>,
    pub ocr: bool,
}

impl IngestRequest {
    pub fn new(run_id: RunId, raw: Vec<u8>) -> Self {
        Self {
            run_id,
            raw,
            options: ReserveOptions::default(),
            source_pdf: None,
            ocr: false,
        }
    }

    pub fn with_options(mut self, options: ReserveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_ocr(mut self, source_pdf: Option<PathBuf>) -> Self {
        self.ocr = true;
        self.source_pdf = source_pdf;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub artifact_type: String,
    pub format: String,
    pub uri: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResult {
    pub run_id: RunId,
    pub doc_id: String,
    pub version: i64,
    pub raw_sha: String,
    pub artifacts: Vec<ArtifactSummary>,
    pub block_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr: Option<OcrLaneOutput>,
}

/// Parse outputs as stored in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredParse {
    pub structure: StoredObject,
    pub chunks: StoredObject,
    pub markdown: StoredObject,
    pub assets: Vec<StoredObject>,
}

impl StoredParse {
    fn object_keys(&self) -> Vec<String> {
        [&self.structure, &self.markdown]
            .into_iter()
            .chain(&self.assets)
            .map(|o| o.key.to_string())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeOutput {
    pub blocks: usize,
    pub deleted: usize,
    pub inserted: usize,
    pub unchanged: usize,
}

pub struct Pipeline<H: StepHost = InlineHost> {
    repos: Repositories,
    effects: EffectCache,
    store: Arc<dyn ObjectStore>,
    parser: Arc<dyn DocumentParser>,
    work_dir: PathBuf,
    ocr: Option<OcrLane>,
    host: H,
}

impl Pipeline<InlineHost> {
    pub fn new(
        repos: Repositories,
        effects: EffectCache,
        store: Arc<dyn ObjectStore>,
        parser: Arc<dyn DocumentParser>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repos,
            effects,
            store,
            parser,
            work_dir: work_dir.into(),
            ocr: None,
            host: InlineHost,
        }
    }
}

impl<H: StepHost> Pipeline<H> {
    pub fn with_ocr(mut self, lane: OcrLane) -> Self {
        self.ocr = Some(lane);
        self
    }

    /// Whether a failed run can be picked up again under the same id.
    pub fn resumes(&self) -> bool {
        self.host.resumes()
    }

    pub fn with_host<H2: StepHost>(self, host: H2) -> Pipeline<H2> {
        Pipeline {
            repos: self.repos,
            effects: self.effects,
            store: self.store,
            parser: self.parser,
            work_dir: self.work_dir,
            ocr: self.ocr,
            host,
        }
    }

    pub async fn run(&self, request: &IngestRequest) -> Result<IngestResult, PipelineError> {
        let run = &request.run_id;
        info!("Starting ingest run {}", run);
        if !self.host.resumes() {
            self.ensure_fresh_run(run).await?;
        }

        let reservation: Reservation = self
            .host
            .run_step(run, "reserve", move || async move { self.reserve(request).await })
            .await?;
        let reservation = &reservation;
        info!(
            doc_id = %reservation.doc_id,
            version = reservation.version,
            "Reserved document version"
        );

        let _raw: StoredObject = self
            .host
            .run_step(run, "store-raw", move || async move {
                self.store_raw(run, reservation, &request.raw).await
            })
            .await?;

        let parsed: ParseOutput = self
            .host
            .run_step(run, "parse", move || async move {
                self.parse(run, reservation, &request.raw).await
            })
            .await?;
        let parsed = &parsed;

        let stored: StoredParse = self
            .host
            .run_step(run, "store-parse", move || async move {
                self.store_parse(run, reservation, parsed).await
            })
            .await?;
        let stored = &stored;

        let normalized: NormalizeOutput = self
            .host
            .run_step(run, "normalize", move || async move {
                self.normalize(run, reservation, stored, &parsed.identity)
                    .await
            })
            .await?;
        info!(
            blocks = normalized.blocks,
            inserted = normalized.inserted,
            deleted = normalized.deleted,
            "Normalized parser blocks"
        );

        let ocr: Option<OcrLaneOutput> = self
            .host
            .run_step(run, "ocr", move || async move {
                self.remediate(request, reservation, stored).await
            })
            .await?;
        let ocr_ref = ocr.as_ref();

        let reindexed: usize = self
            .host
            .run_step(run, "reindex", move || async move {
                self.reindex(reservation, ocr_ref).await
            })
            .await?;
        info!(blocks = reindexed, "Refreshed search text");

        let _memo: StoredObject = self
            .host
            .run_step(run, "memo", move || async move {
                self.write_memo(run, reservation, ocr_ref).await
            })
            .await?;

        let count: i64 = self
            .host
            .run_step(run, "count", move || async move {
                Ok::<_, PipelineError>(self.repos.artifacts.count_by_run(run.as_str()).await?)
            })
            .await?;
        if count == 0 {
            return Err(PipelineError::NoArtifact(run.to_string()));
        }

        let artifacts = self
            .repos
            .artifacts
            .list_by_run(run.as_str())
            .await?
            .into_iter()
            .map(|r| ArtifactSummary {
                artifact_type: r.artifact_type,
                format: r.format,
                uri: r.uri,
                sha256: r.sha256,
            })
            .collect();
        let block_count = self
            .repos
            .blocks
            .count_blocks(&reservation.doc_id, reservation.version)
            .await?;

        info!("Finished ingest run {} with {} artifacts", run, count);
        Ok(IngestResult {
            run_id: run.clone(),
            doc_id: reservation.doc_id.to_string(),
            version: reservation.version,
            raw_sha: reservation.raw_sha.to_string(),
            artifacts,
            block_count,
            ocr,
        })
    }

    /// A host without a journal cannot tell which steps of an earlier attempt
    /// finished, so it only starts run ids that have recorded nothing yet.
    async fn ensure_fresh_run(&self, run: &RunId) -> Result<(), PipelineError> {
        let artifacts = self.repos.artifacts.count_by_run(run.as_str()).await?;
        let effects = self.repos.side_effects.keys_for_run(run.as_str()).await?;
        if artifacts > 0 || !effects.is_empty() {
            warn!(
                artifacts,
                effects = effects.len(),
                "Run {} already has recorded output",
                run
            );
            return Err(PipelineError::RunExists(run.to_string()));
        }
        Ok(())
    }

    async fn reserve(&self, request: &IngestRequest) -> Result<Reservation, PipelineError> {
        let mut options = request.options.clone();
        if options.parser_config_sha.is_none() {
            options.parser_config_sha = Some(self.parser.config_sha());
        }
        Ok(self.repos.documents.reserve(&request.raw, &options).await?)
    }

    async fn store_raw(
        &self,
        run: &RunId,
        reservation: &Reservation,
        raw: &[u8],
    ) -> Result<StoredObject, PipelineError> {
        let doc = &reservation.doc_id;
        let ver = reservation.version;
        let object_key = ObjectKey::raw(&reservation.raw_sha);
        let key = EffectKey::step(run, "store-raw", doc, ver, reservation.raw_sha.as_str())?;

        let store = &self.store;
        let (put_key, mime) = (&object_key, reservation.mime.as_str());
        let stored = self
            .effects
            .call(&key, || async move {
                Ok::<_, anyhow::Error>(store.put(put_key, raw, mime).await?)
            })
            .await?
            .response;

        let prov = Provenance::new(
            run.clone(),
            ArtifactType::Raw,
            "store-raw",
            reservation.raw_sha.clone(),
            reservation.raw_sha.clone(),
        )
        .with_object_keys([object_key.to_string()])
        .with_extension("filename", json!(reservation.filename));
        self.record(
            Artifact::new(
                ArtifactType::Raw,
                reservation.mime.as_str(),
                stored.uri.as_str(),
                reservation.raw_sha.clone(),
                prov,
            ),
            &stored,
        )
        .await?;
        Ok(stored)
    }

    async fn parse(
        &self,
        run: &RunId,
        reservation: &Reservation,
        raw: &[u8],
    ) -> Result<ParseOutput, PipelineError> {
        let doc = &reservation.doc_id;
        let ver = reservation.version;
        let input = self.stage_input(run, reservation, raw).await?;
        let out_dir = self.version_dir(run, reservation).join("out");

        let parse_sha = sha256_hex(format!(
            "{}:{}",
            reservation.raw_sha, reservation.parser_config_sha
        ));
        let key = EffectKey::step(run, "parse", doc, ver, &parse_sha)?;

        let parser = &self.parser;
        let (input, out_dir) = (input.as_path(), out_dir.as_path());
        let outcome = self
            .effects
            .call(&key, || async move {
                tokio::fs::create_dir_all(out_dir).await?;
                Ok::<_, anyhow::Error>(parser.parse(input, out_dir).await?)
            })
            .await?;
        if !outcome.replayed {
            info!(
                engine = %outcome.response.identity.engine,
                timing_ms = outcome.response.identity.timing_ms,
                "Parsed document"
            );
        }
        Ok(outcome.response)
    }

    async fn store_parse(
        &self,
        run: &RunId,
        reservation: &Reservation,
        parsed: &ParseOutput,
    ) -> Result<StoredParse, PipelineError> {
        let doc = &reservation.doc_id;
        let ver = reservation.version;

        let structure = tokio::fs::read(&parsed.structure_path).await?;
        let chunks = tokio::fs::read(&parsed.chunks_path).await?;
        let markdown = tokio::fs::read(&parsed.markdown_path).await?;
        let mut assets = Vec::with_capacity(parsed.asset_paths.len());
        for path in &parsed.asset_paths {
            assets.push((asset_content_type(path), tokio::fs::read(path).await?));
        }

        let structure_sha = Sha256Hex::digest(&structure);
        let chunks_sha = Sha256Hex::digest(&chunks);
        let markdown_sha = Sha256Hex::digest(&markdown);
        let mut manifest = vec![
            structure_sha.to_string(),
            chunks_sha.to_string(),
            markdown_sha.to_string(),
        ];
        manifest.extend(assets.iter().map(|(_, bytes)| sha256_hex(bytes)));
        let key = EffectKey::step(run, "store-parse", doc, ver, &sha256_hex(manifest.join(":")))?;

        let store = &self.store;
        let (structure_ref, chunks_ref, markdown_ref, assets_ref) =
            (&structure, &chunks, &markdown, &assets);
        let stored = self
            .effects
            .call(&key, || async move {
                let structure = store
                    .put(
                        &ObjectKey::parse_output(doc, ver, STRUCTURE_FILE)?,
                        structure_ref,
                        "application/json",
                    )
                    .await?;
                let chunks = store
                    .put(
                        &ObjectKey::parse_output(doc, ver, CHUNKS_FILE)?,
                        chunks_ref,
                        "application/json",
                    )
                    .await?;
                let markdown = store
                    .put(
                        &ObjectKey::parse_output(doc, ver, MARKDOWN_FILE)?,
                        markdown_ref,
                        "text/markdown",
                    )
                    .await?;
                let mut assets = Vec::with_capacity(assets_ref.len());
                for (content_type, bytes) in assets_ref {
                    let asset_key = ObjectKey::asset(&Sha256Hex::digest(bytes));
                    assets.push(store.put(&asset_key, bytes, content_type).await?);
                }
                Ok::<_, anyhow::Error>(StoredParse {
                    structure,
                    chunks,
                    markdown,
                    assets,
                })
            })
            .await?
            .response;

        let docir = Provenance::new(
            run.clone(),
            ArtifactType::Docir,
            "store-parse",
            structure_sha.clone(),
            reservation.raw_sha.clone(),
        )
        .with_inputs([reservation.raw_sha.to_string()])
        .with_parser(parsed.identity.clone())
        .with_object_keys(stored.object_keys())
        .with_extension("markdown_sha256", json!(markdown_sha));
        self.record(
            Artifact::new(
                ArtifactType::Docir,
                "json",
                stored.structure.uri.as_str(),
                structure_sha.clone(),
                docir,
            ),
            &stored.structure,
        )
        .await?;

        let chunk_index = Provenance::new(
            run.clone(),
            ArtifactType::ChunkIndex,
            "store-parse",
            chunks_sha.clone(),
            reservation.raw_sha.clone(),
        )
        .with_inputs([structure_sha.to_string()])
        .with_parser(parsed.identity.clone())
        .with_object_keys([stored.chunks.key.to_string()]);
        self.record(
            Artifact::new(
                ArtifactType::ChunkIndex,
                "json",
                stored.chunks.uri.as_str(),
                chunks_sha,
                chunk_index,
            ),
            &stored.chunks,
        )
        .await?;

        Ok(stored)
    }

    async fn normalize(
        &self,
        run: &RunId,
        reservation: &Reservation,
        stored: &StoredParse,
        parser: &ParserIdentity,
    ) -> Result<NormalizeOutput, PipelineError> {
        let structure = self.load_structure(stored).await?;
        let blocks =
            normalize_parser_blocks(&reservation.doc_id, reservation.version, &structure)?;
        let prov = json!({
            "run_id": run,
            "producer_step": "normalize",
            "source_sha256": reservation.raw_sha,
            "parser": parser,
        });
        let summary = self
            .repos
            .blocks
            .upsert_blocks(&reservation.doc_id, reservation.version, &blocks, &prov)
            .await?;
        Ok(NormalizeOutput {
            blocks: blocks.len(),
            deleted: summary.deleted,
            inserted: summary.inserted,
            unchanged: summary.unchanged,
        })
    }

    async fn remediate(
        &self,
        request: &IngestRequest,
        reservation: &Reservation,
        stored: &StoredParse,
    ) -> Result<Option<OcrLaneOutput>, PipelineError> {
        let lane = match (&self.ocr, request.ocr) {
            (Some(lane), true) => lane,
            (None, true) => {
                warn!("OCR requested for run {} but no OCR lane is configured", request.run_id);
                return Ok(None);
            }
            _ => return Ok(None),
        };

        let source_pdf = match request.source_pdf {
            Some(ref path) => path.clone(),
            None if reservation.mime == PDF_MIME => {
                self.stage_input(&request.run_id, reservation, &request.raw)
                    .await?
            }
            None => {
                warn!(
                    "Skipping OCR for run {}: {} is not a PDF and no source PDF was given",
                    request.run_id, reservation.mime
                );
                return Ok(None);
            }
        };

        let structure = self.load_structure(stored).await?;
        let ctx = LaneContext {
            run_id: &request.run_id,
            reservation,
            structure: &structure,
            source_pdf: &source_pdf,
            repos: &self.repos,
            effects: &self.effects,
            store: self.store.as_ref(),
        };
        lane.run(&ctx).await.map(Some)
    }

    async fn reindex(
        &self,
        reservation: &Reservation,
        ocr: Option<&OcrLaneOutput>,
    ) -> Result<usize, PipelineError> {
        let doc = &reservation.doc_id;
        let ver = reservation.version;
        let touched: Vec<PageNo> = ocr.map(OcrLaneOutput::touched_pages).unwrap_or_default();
        let count = if touched.is_empty() {
            self.repos.blocks.reindex_all(doc, ver).await?
        } else {
            self.repos.blocks.reindex_pages(doc, ver, &touched).await?
        };
        Ok(count)
    }

    async fn write_memo(
        &self,
        run: &RunId,
        reservation: &Reservation,
        ocr: Option<&OcrLaneOutput>,
    ) -> Result<StoredObject, PipelineError> {
        let doc = &reservation.doc_id;
        let ver = reservation.version;
        let blocks = self.repos.blocks.list_blocks(doc, ver).await?;
        let memo_ocr = ocr.map(|o| MemoOcr {
            hard_pages: o.gate.hard_pages.clone(),
            ocr_pages: o.ocr_pages.clone(),
            diff_sha: o.merge.diff_sha.clone(),
        });
        let memo = build_exec_memo(&MemoInput {
            doc_id: doc,
            version: ver,
            raw_sha: reservation.raw_sha.as_str(),
            parser_config_sha: Some(reservation.parser_config_sha.as_str()),
            blocks: &blocks,
            ocr: memo_ocr.as_ref(),
        });
        let memo_sha = Sha256Hex::digest(memo.as_bytes());
        let object_key = ObjectKey::run_output(run, doc, ver, MEMO_FILE)?;
        let key = EffectKey::step(run, "memo", doc, ver, memo_sha.as_str())?;

        let store = &self.store;
        let (put_key, body) = (&object_key, memo.as_bytes());
        let stored = self
            .effects
            .call(&key, || async move {
                Ok::<_, anyhow::Error>(store.put(put_key, body, "text/markdown").await?)
            })
            .await?
            .response;

        let mut prov = Provenance::new(
            run.clone(),
            ArtifactType::Memo,
            "memo",
            memo_sha.clone(),
            reservation.raw_sha.clone(),
        )
        .with_inputs([reservation.parser_config_sha.to_string()])
        .with_object_keys([object_key.to_string()])
        .with_extension("block_count", json!(blocks.len()));
        if let Some(o) = ocr {
            prov = prov.with_extension("ocr_job_id", json!(o.job_id));
        }
        self.record(
            Artifact::new(ArtifactType::Memo, "md", stored.uri.as_str(), memo_sha, prov),
            &stored,
        )
        .await?;
        Ok(stored)
    }

    async fn record(&self, artifact: Artifact, stored: &StoredObject) -> Result<(), PipelineError> {
        record_artifact(&self.repos, self.store.as_ref(), artifact, stored).await
    }

    async fn load_structure(&self, stored: &StoredParse) -> Result<Value, PipelineError> {
        let bytes = self.store.get(&stored.structure.key).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn version_dir(&self, run: &RunId, reservation: &Reservation) -> PathBuf {
        self.work_dir
            .join(run.as_str())
            .join(format!("{}-v{}", reservation.doc_id, reservation.version))
    }

    /// Write the raw bytes where the parser and rasterizer can read them.
    async fn stage_input(
        &self,
        run: &RunId,
        reservation: &Reservation,
        raw: &[u8],
    ) -> Result<PathBuf, PipelineError> {
        let dir = self.version_dir(run, reservation);
        tokio::fs::create_dir_all(&dir).await?;
        let extension = Path::new(&reservation.filename)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| e.bytes().all(|b| b.is_ascii_alphanumeric()))
            .unwrap_or("bin");
        let path = dir.join(format!("source.{}", extension));
        if tokio::fs::metadata(&path).await.map(|m| m.len()).ok() != Some(raw.len() as u64) {
            tokio::fs::write(&path, raw).await?;
        }
        Ok(path)
    }
}

/// Record `artifact` after checking it against the bytes behind `stored`.
///
/// The artifact's sha256 must match the object as it sits in the store now,
/// not only as it was when first written. A row already recorded under the
/// same id must name the same object and hash.
pub(crate) async fn record_artifact(
    repos: &Repositories,
    store: &dyn ObjectStore,
    artifact: Artifact,
    stored: &StoredObject,
) -> Result<(), PipelineError> {
    let mismatch = |field, recorded: &str, actual: &str| PipelineError::ArtifactMismatch {
        artifact_id: artifact.artifact_id.clone(),
        field,
        recorded: recorded.to_string(),
        actual: actual.to_string(),
    };

    let stored_sha = sha256_hex(store.get(&stored.key).await?);
    if stored_sha != artifact.sha256.as_str() {
        return Err(mismatch("sha256", artifact.sha256.as_str(), &stored_sha));
    }
    if artifact.uri != stored.uri {
        return Err(mismatch("uri", &artifact.uri, &stored.uri));
    }

    if repos.artifacts.insert(&artifact).await? {
        return Ok(());
    }
    let existing = repos
        .artifacts
        .get(&artifact.artifact_id)
        .await?
        .ok_or_else(|| mismatch("row", "present", "missing"))?;
    if existing.sha256 != artifact.sha256.as_str() {
        return Err(mismatch("sha256", &existing.sha256, artifact.sha256.as_str()));
    }
    if existing.uri != artifact.uri {
        return Err(mismatch("uri", &existing.uri, &artifact.uri));
    }
    debug!("Artifact {} already recorded", artifact.artifact_id);
    Ok(())
}

fn asset_content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
