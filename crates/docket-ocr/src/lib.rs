//! OCR remediation for docket.
//!
//! The gate scores parsed pages and picks the ones worth re-reading, the
//! rasterizer turns those pages into PNGs, the engine sends each image to a
//! chat-style recognition endpoint, and the merge plan reconciles the
//! recognized text with the parser's block ledger.

pub mod config;
pub mod contract;
pub mod engine;
pub mod error;
pub mod gate;
pub mod merge;
pub mod render;

pub use config::{OcrConfig, OcrEngineKind};
pub use contract::{OcrPageOut, OcrPatch};
pub use engine::{ChatOcrEngine, OcrEngine};
pub use error::OcrError;
pub use gate::{compute_hard_pages, GateConfig, GateReport};
pub use merge::{compute_merge_plan, MergePlan, PageDiff};
pub use render::{PdftoppmRasterizer, Rasterizer, RenderedPage};
