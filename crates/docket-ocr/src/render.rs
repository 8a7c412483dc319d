//! Rasterize PDF pages to PNG.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use docket::hashing::sha256_hex;
use docket::PageIdx;
use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

use crate::config::{OcrConfig, DEFAULT_DPI, MIN_DPI};
use crate::error::OcrError;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

const DEFAULT_PDFTOPPM: &str = "pdftoppm";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedPage {
    pub page_idx: PageIdx,
    #[serde(skip)]
    pub png: Vec<u8>,
    pub png_sha: String,
}

impl RenderedPage {
    pub fn new(page_idx: PageIdx, png: Vec<u8>) -> Result<Self, OcrError> {
        if !is_png(&png) {
            return Err(OcrError::InvalidImage {
                page: page_idx.to_page_no().get(),
            });
        }
        let png_sha = sha256_hex(&png);
        Ok(Self {
            page_idx,
            png,
            png_sha,
        })
    }
}

pub fn is_png(bytes: &[u8]) -> bool {
    bytes.len() >= PNG_SIGNATURE.len() && bytes[..PNG_SIGNATURE.len()] == PNG_SIGNATURE
}

/// Deduplicated, ascending page list.
pub fn normalize_pages(pages: &[PageIdx]) -> Vec<PageIdx> {
    let mut pages = pages.to_vec();
    pages.sort();
    pages.dedup();
    pages
}

#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Render the given 0-based pages of `source`, sorted by page index.
    async fn render(&self, source: &Path, pages: &[PageIdx])
        -> Result<Vec<RenderedPage>, OcrError>;

    async fn render_page(&self, source: &Path, page: PageIdx) -> Result<RenderedPage, OcrError> {
        self.render(source, &[page])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OcrError::RenderFailed {
                page: page.to_page_no().get(),
                message: "no output".to_string(),
            })
    }
}

/// Poppler's `pdftoppm`, one invocation per page.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    bin: String,
    dpi: u32,
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self {
            bin: DEFAULT_PDFTOPPM.to_string(),
            dpi: DEFAULT_DPI,
        }
    }
}

impl PdftoppmRasterizer {
    pub fn new(bin: impl Into<String>, dpi: u32) -> Self {
        let bin = bin.into();
        let bin = if bin.trim().is_empty() {
            DEFAULT_PDFTOPPM.to_string()
        } else {
            bin.trim().to_string()
        };
        Self {
            bin,
            dpi: dpi.max(MIN_DPI),
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(
            config.pdftoppm_bin.clone().unwrap_or_default(),
            config.dpi,
        )
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    /// Resolve the binary on `PATH` (or as given, if it is a path).
    pub fn resolve(&self) -> Result<PathBuf, OcrError> {
        which::which(&self.bin).map_err(|_| OcrError::RasterizerUnavailable(self.bin.clone()))
    }
}

#[async_trait]
impl Rasterizer for PdftoppmRasterizer {
    async fn render(
        &self,
        source: &Path,
        pages: &[PageIdx],
    ) -> Result<Vec<RenderedPage>, OcrError> {
        let pages = normalize_pages(pages);
        if pages.is_empty() {
            return Ok(Vec::new());
        }
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(OcrError::SourceMissing(source.to_path_buf()));
        }
        let bin = self.resolve()?;
        let workdir = tempfile::tempdir()?;
        let dpi = self.dpi.to_string();

        let mut rendered = Vec::with_capacity(pages.len());
        for page_idx in pages {
            let page_no = page_idx.to_page_no().get();
            let page_arg = page_no.to_string();
            let prefix = workdir.path().join(format!("p{:04}", page_idx.get()));

            let output = Command::new(&bin)
                .arg(source)
                .arg(&prefix)
                .args([
                    "-png",
                    "-f",
                    &page_arg,
                    "-l",
                    &page_arg,
                    "-singlefile",
                    "-rx",
                    &dpi,
                    "-ry",
                    &dpi,
                ])
                .output()
                .await?;

            if !output.status.success() {
                return Err(OcrError::RenderFailed {
                    page: page_no,
                    message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }

            let png = tokio::fs::read(prefix.with_extension("png")).await?;
            let page = RenderedPage::new(page_idx, png)?;
            debug!(page = page_no, sha = %page.png_sha, "Rendered page");
            rendered.push(page);
        }

        Ok(rendered)
    }
}
