use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("ocr_render_missing_pdftoppm: {0}")]
    RasterizerUnavailable(String),
    #[error("ocr_render_source_missing: {}", .0.display())]
    SourceMissing(PathBuf),
    #[error("ocr_render_png_invalid: page {page}")]
    InvalidImage { page: u32 },
    #[error("rasterizer failed on page {page}: {message}")]
    RenderFailed { page: u32, message: String },
    #[error("ocr_endpoint_unreachable: {url} after {attempts} attempts: {message}")]
    EndpointUnreachable {
        url: String,
        attempts: u32,
        message: String,
    },
    #[error("ocr endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("invalid_ocr_{0}")]
    InvalidContract(&'static str),
    #[error("invalid OCR response: {0}")]
    InvalidResponse(String),
    #[error("invalid_ocr_policy_{field}: {value:?}")]
    InvalidConfig { field: &'static str, value: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OcrError {
    /// Whether the host may retry the step later with identical input.
    pub fn is_transient(&self) -> bool {
        matches!(self, OcrError::EndpointUnreachable { .. })
    }
}
