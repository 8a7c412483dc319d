//! OCR remediation lane: gate, render, recognize, merge.
//!
//! Rendering and recognition of each page run as separate effects, so a
//! resumed lane never calls the rasterizer or the engine twice for the same
//! content. All database rows are hash-keyed upserts written outside the
//! effects.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use docket::artifacts::{Artifact, ArtifactType, Provenance};
use docket::hashing::{sha256_hex, stable_json};
use docket::repository::documents::Reservation;
use docket::repository::models::{NewDocirPageVersion, NewOcrJob, NewOcrPage, NewOcrPatch, NewPageDiff};
use docket::repository::ocr::{ocr_job_id, OcrPageStatus};
use docket::repository::util::now_rfc3339;
use docket::repository::Repositories;
use docket::storage::{ObjectKey, ObjectStore};
use docket::{EffectCache, EffectKey, PageIdx, PageNo, RunId, Sha256Hex};
use docket_ocr::contract::{OcrPageIn, DEFAULT_PROMPT};
use docket_ocr::{
    compute_hard_pages, compute_merge_plan, GateConfig, GateReport, MergePlan, OcrConfig,
    OcrEngine, OcrError, OcrPatch, Rasterizer,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::error::PipelineError;
use crate::pipeline::record_artifact;

pub const OCR_REPORT_FILE: &str = "ocr-report.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedPageRef {
    pub page_idx: PageIdx,
    pub png_sha: String,
    pub png_uri: String,
    pub object_key: ObjectKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedPage {
    pub page_idx: PageIdx,
    pub patch: OcrPatch,
    pub patch_sha: String,
    pub raw_uri: String,
    pub raw_sha: String,
}

/// Everything the lane did, as returned to the pipeline and stored in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLaneOutput {
    pub job_id: String,
    pub gate: GateReport,
    pub rendered_pages: Vec<RenderedPageRef>,
    pub ocr_pages: Vec<PageIdx>,
    pub merge: MergePlan,
}

impl OcrLaneOutput {
    /// Pages whose blocks the merge rewrote.
    pub fn touched_pages(&self) -> Vec<PageNo> {
        pages_of(&self.merge)
    }
}

fn pages_of(plan: &MergePlan) -> Vec<PageNo> {
    plan.replacement_blocks
        .iter()
        .map(|b| b.page)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// What the lane needs from the run it belongs to.
pub struct LaneContext<'a> {
    pub run_id: &'a RunId,
    pub reservation: &'a Reservation,
    pub structure: &'a Value,
    pub source_pdf: &'a Path,
    pub repos: &'a Repositories,
    pub effects: &'a EffectCache,
    pub store: &'a dyn ObjectStore,
}

pub struct OcrLane {
    gate: GateConfig,
    config: OcrConfig,
    rasterizer: Arc<dyn Rasterizer>,
    engine: Arc<dyn OcrEngine>,
}

impl OcrLane {
    /// The gate never selects more pages than the OCR policy allows.
    pub fn new(
        gate: GateConfig,
        config: OcrConfig,
        rasterizer: Arc<dyn Rasterizer>,
        engine: Arc<dyn OcrEngine>,
    ) -> Self {
        let gate = GateConfig::new(
            Some(gate.threshold),
            Some(gate.max_pages.min(config.max_pages)),
        );
        Self {
            gate,
            config,
            rasterizer,
            engine,
        }
    }

    pub fn gate_config(&self) -> &GateConfig {
        &self.gate
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }

    /// Run the lane within `pages × timeout`.
    pub async fn run(&self, ctx: &LaneContext<'_>) -> Result<OcrLaneOutput, PipelineError> {
        let gate = compute_hard_pages(ctx.structure, &self.gate);
        info!(
            hard_pages = gate.hard_pages.len(),
            pages = gate.page_count(),
            gate_rev = %gate.gate_rev,
            "OCR gate evaluated"
        );

        let budget = self.config.lane_budget(gate.hard_pages.len());
        match tokio::time::timeout(budget, self.remediate(ctx, gate)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::OcrTimeout(budget)),
        }
    }

    async fn remediate(
        &self,
        ctx: &LaneContext<'_>,
        gate: GateReport,
    ) -> Result<OcrLaneOutput, PipelineError> {
        let run = ctx.run_id;
        let doc = &ctx.reservation.doc_id;
        let ver = ctx.reservation.version;
        let job_id = ocr_job_id(run.as_str());

        let policy = serde_json::to_string(&self.config)?;
        ctx.repos
            .ocr
            .insert_job(&NewOcrJob {
                job_id: &job_id,
                doc_id: doc.as_str(),
                ver,
                gate_rev: &gate.gate_rev,
                policy: &policy,
                created_at: &now_rfc3339(),
            })
            .await?;

        for &page in &gate.hard_pages {
            self.mark_page(ctx, &job_id, &gate, page, OcrPageStatus::Gated, None, None)
                .await?;
        }

        let mut rendered = Vec::with_capacity(gate.hard_pages.len());
        let mut recognized = Vec::with_capacity(gate.hard_pages.len());

        if !gate.hard_pages.is_empty() {
            let pdf = tokio::fs::read(ctx.source_pdf)
                .await
                .map_err(|_| OcrError::SourceMissing(ctx.source_pdf.to_path_buf()))?;
            let pdf_sha = Sha256Hex::digest(&pdf);

            for &page in &gate.hard_pages {
                let page_ref = self.render_page(ctx, page, &pdf_sha).await?;
                self.mark_page(
                    ctx,
                    &job_id,
                    &gate,
                    page,
                    OcrPageStatus::Rendered,
                    Some(&page_ref),
                    None,
                )
                .await?;
                rendered.push(page_ref);
            }

            for page_ref in &rendered {
                let page = self.recognize_page(ctx, &gate, page_ref).await?;
                let status = if page.patch.is_empty() {
                    OcrPageStatus::Skipped
                } else {
                    OcrPageStatus::OcrReady
                };
                self.mark_page(
                    ctx,
                    &job_id,
                    &gate,
                    page.page_idx,
                    status,
                    Some(page_ref),
                    Some(&page),
                )
                .await?;

                let patch_json = stable_json(&page.patch.to_value());
                ctx.repos
                    .ocr
                    .insert_patch(&NewOcrPatch {
                        doc_id: doc.as_str(),
                        ver,
                        page_idx: i64::from(page.page_idx.get()),
                        patch_sha: &page.patch_sha,
                        patch: &patch_json,
                        source_job_id: Some(&job_id),
                        created_at: &now_rfc3339(),
                    })
                    .await?;
                recognized.push(page);
            }
        }

        let merge = self.merge(ctx, &job_id, &gate, &recognized).await?;

        let output = OcrLaneOutput {
            job_id,
            gate,
            rendered_pages: rendered,
            ocr_pages: recognized.iter().map(|p| p.page_idx).collect(),
            merge,
        };
        self.store_report(ctx, &output).await?;
        Ok(output)
    }

    async fn render_page(
        &self,
        ctx: &LaneContext<'_>,
        page: PageIdx,
        pdf_sha: &Sha256Hex,
    ) -> Result<RenderedPageRef, PipelineError> {
        let doc = &ctx.reservation.doc_id;
        let ver = ctx.reservation.version;
        let key = EffectKey::render_page(ctx.run_id, doc, ver, page, pdf_sha.as_str())?;
        let rasterizer = &self.rasterizer;
        let store = ctx.store;
        let source = ctx.source_pdf;

        let outcome = ctx
            .effects
            .call(&key, || async move {
                let image = rasterizer.render_page(source, page).await?;
                let object_key =
                    ObjectKey::ocr_output(doc, ver, &format!("p{:04}.png", page.get()))?;
                let stored = store.put(&object_key, &image.png, "image/png").await?;
                Ok::<_, anyhow::Error>(RenderedPageRef {
                    page_idx: page,
                    png_sha: image.png_sha,
                    png_uri: stored.uri,
                    object_key,
                })
            })
            .await?;
        Ok(outcome.response)
    }

    async fn recognize_page(
        &self,
        ctx: &LaneContext<'_>,
        gate: &GateReport,
        page_ref: &RenderedPageRef,
    ) -> Result<RecognizedPage, PipelineError> {
        let doc = &ctx.reservation.doc_id;
        let ver = ctx.reservation.version;
        let page = page_ref.page_idx;
        let key = EffectKey::ocr_page(
            ctx.run_id,
            doc,
            ver,
            page,
            self.engine.model(),
            &gate.gate_rev,
            &page_ref.png_sha,
        )?;
        let engine = &self.engine;
        let store = ctx.store;

        let outcome = ctx
            .effects
            .call(&key, || async move {
                let png = store.get(&page_ref.object_key).await?;
                let request = OcrPageIn::new(
                    doc.clone(),
                    ver,
                    page,
                    page_ref.png_uri.clone(),
                    DEFAULT_PROMPT,
                )?;
                let out = engine.recognize(&request, &png).await?;

                let raw = serde_json::to_vec(&out.raw)?;
                let raw_key =
                    ObjectKey::ocr_output(doc, ver, &format!("p{:04}.raw.json", page.get()))?;
                let stored = store.put(&raw_key, &raw, "application/json").await?;
                let patch = out.patch();
                Ok::<_, anyhow::Error>(RecognizedPage {
                    page_idx: page,
                    patch_sha: patch.patch_sha(),
                    patch,
                    raw_uri: stored.uri,
                    raw_sha: stored.etag,
                })
            })
            .await?;
        if outcome.replayed {
            info!(page = page.get(), "Replayed OCR result");
        }
        Ok(outcome.response)
    }

    async fn merge(
        &self,
        ctx: &LaneContext<'_>,
        job_id: &str,
        gate: &GateReport,
        recognized: &[RecognizedPage],
    ) -> Result<MergePlan, PipelineError> {
        let doc = &ctx.reservation.doc_id;
        let ver = ctx.reservation.version;

        let patches: BTreeMap<PageIdx, OcrPatch> = recognized
            .iter()
            .map(|p| (p.page_idx, p.patch.clone()))
            .collect();
        let merge_sha = sha256_hex(stable_json(&json!({
            "gate_rev": gate.gate_rev,
            "hard_pages": gate.hard_pages,
            "patches": recognized
                .iter()
                .map(|p| json!([p.page_idx, p.patch_sha]))
                .collect::<Vec<_>>(),
        })));
        let key = EffectKey::step(ctx.run_id, "ocr-merge", doc, ver, &merge_sha)?;

        // The first plan is replayed on resume, computed against the blocks
        // as they stood before any OCR page was installed.
        let current = ctx.repos.blocks.list_blocks(doc, ver).await?;
        let (hard_pages, patches_ref, current_ref) = (&gate.hard_pages, &patches, &current);
        let outcome = ctx
            .effects
            .call(&key, || async move {
                Ok::<_, anyhow::Error>(compute_merge_plan(
                    doc,
                    ver,
                    hard_pages,
                    patches_ref,
                    current_ref,
                ))
            })
            .await?;
        if outcome.replayed {
            info!("Replayed OCR merge plan");
        }
        let plan = outcome.response;

        let touched = pages_of(&plan);
        if !touched.is_empty() {
            let prov = json!({
                "run_id": ctx.run_id,
                "producer_step": "ocr-merge",
                "job_id": job_id,
                "gate_rev": gate.gate_rev,
                "diff_sha": plan.diff_sha,
            });
            let summary = ctx
                .repos
                .blocks
                .replace_page_blocks(doc, ver, &touched, &plan.replacement_blocks, &prov)
                .await?;
            info!(
                pages = touched.len(),
                deleted = summary.deleted,
                inserted = summary.inserted,
                "Merged OCR blocks"
            );
        }

        let patch_shas: BTreeMap<PageIdx, &str> = recognized
            .iter()
            .filter(|p| !p.patch.is_empty())
            .map(|p| (p.page_idx, p.patch_sha.as_str()))
            .collect();

        for diff in &plan.page_diffs {
            let now = now_rfc3339();
            let page_idx = i64::from(diff.page_idx.get());
            ctx.repos
                .ocr
                .insert_page_diff(&NewPageDiff {
                    doc_id: doc.as_str(),
                    ver,
                    page_idx,
                    before_sha: &diff.before_sha,
                    after_sha: &diff.after_sha,
                    changed_blocks: diff.changed_blocks as i64,
                    page_diff_sha: &diff.diff_sha,
                    created_at: &now,
                })
                .await?;
            let source_ref = patch_shas.get(&diff.page_idx).copied();
            ctx.repos
                .ocr
                .insert_page_version(&NewDocirPageVersion {
                    doc_id: doc.as_str(),
                    ver,
                    page_idx,
                    page_sha: &diff.after_sha,
                    source: if source_ref.is_some() { "ocr" } else { "parser" },
                    source_ref_sha: source_ref,
                    created_at: &now,
                })
                .await?;
        }

        Ok(plan)
    }

    #[allow(clippy::too_many_arguments)]
    async fn mark_page(
        &self,
        ctx: &LaneContext<'_>,
        job_id: &str,
        gate: &GateReport,
        page: PageIdx,
        status: OcrPageStatus,
        rendered: Option<&RenderedPageRef>,
        recognized: Option<&RecognizedPage>,
    ) -> Result<(), PipelineError> {
        let reasons = serde_json::to_string(gate.reasons_for(page))?;
        ctx.repos
            .ocr
            .upsert_page(&NewOcrPage {
                job_id,
                page_idx: i64::from(page.get()),
                status: status.as_str(),
                gate_score: gate.score(page),
                gate_reasons: &reasons,
                png_uri: rendered.map(|r| r.png_uri.as_str()),
                png_sha: rendered.map(|r| r.png_sha.as_str()),
                raw_uri: recognized.map(|r| r.raw_uri.as_str()),
                raw_sha: recognized.map(|r| r.raw_sha.as_str()),
                updated_at: &now_rfc3339(),
            })
            .await?;
        Ok(())
    }

    /// Persist the lane output as the run's `ocr-report` artifact.
    async fn store_report(
        &self,
        ctx: &LaneContext<'_>,
        output: &OcrLaneOutput,
    ) -> Result<(), PipelineError> {
        let doc = &ctx.reservation.doc_id;
        let ver = ctx.reservation.version;
        let report = serde_json::to_vec_pretty(&json!({
            "job_id": output.job_id,
            "doc_id": doc,
            "ver": ver,
            "gate": output.gate,
            "rendered_pages": output.rendered_pages,
            "ocr_pages": output.ocr_pages,
            "merged_pages": output.merge.merged_pages,
            "page_diffs": output.merge.page_diffs,
            "diff_sha": output.merge.diff_sha,
        }))?;
        let report_sha = Sha256Hex::digest(&report);
        let object_key = ObjectKey::run_output(ctx.run_id, doc, ver, OCR_REPORT_FILE)?;

        let key = EffectKey::step(ctx.run_id, "ocr-report", doc, ver, report_sha.as_str())?;
        let store = ctx.store;
        let (put_key, body) = (&object_key, &report);
        let stored = ctx
            .effects
            .call(&key, || async move {
                Ok::<_, anyhow::Error>(store.put(put_key, body, "application/json").await?)
            })
            .await?
            .response;

        let prov = Provenance::new(
            ctx.run_id.clone(),
            ArtifactType::OcrReport,
            "ocr",
            report_sha.clone(),
            ctx.reservation.raw_sha.clone(),
        )
        .with_inputs([output.gate.gate_rev.clone()])
        .with_object_keys([object_key.to_string()])
        .with_extension("job_id", json!(output.job_id));
        let artifact = Artifact::new(
            ArtifactType::OcrReport,
            "json",
            stored.uri.as_str(),
            report_sha,
            prov,
        );
        record_artifact(ctx.repos, ctx.store, artifact, &stored).await
    }
}
