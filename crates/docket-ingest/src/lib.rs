//! Ingestion pipeline for docket.
//!
//! Wires the core ledger, effect cache and object store together with a
//! document parser and the optional OCR lane into one resumable run.

pub mod error;
pub mod host;
pub mod memo;
pub mod ocr_lane;
pub mod parser;
pub mod pipeline;

pub use error::PipelineError;
pub use host::{InlineHost, JournalHost, StepHost};
pub use memo::build_exec_memo;
pub use ocr_lane::{OcrLane, OcrLaneOutput};
pub use parser::{CommandParser, DocumentParser, LineParser, ParseOutput, ParserError};
pub use pipeline::{IngestRequest, IngestResult, Pipeline};
