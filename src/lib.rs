//! # zonedoc
//!
//! Turn OCR output of scanned urban-planning regulations (PLU, DG) into
//! clean, zone-scoped documents ready for analysis.
//!
//! ## Why this crate?
//!
//! OCR of a regulation is noisy in predictable ways: annex cover pages
//! repeat, every page carries the city's logo, and tables of setbacks and
//! heights come out as broken pipe-markdown. Downstream analysis also wants
//! the rules of *one* zone at a time, not a 300-page document. This crate
//! normalizes the OCR result, removes the repetition, swaps tables for page
//! renders, and splits the document per zone with an LLM classifier.
//!
//! ## Pipeline Overview
//!
//! ```text
//! source PDF
//!  │
//!  ├─ 1. OCR        external service, raw answer checkpointed (2.ocr/)
//!  ├─ 2. Normalize  pages and paragraphs with stable indices   (3.raw/)
//!  ├─ 3. Dedup      repeated pages and images removed          (3.raw/, in place)
//!  ├─ 4. Tables     markdown tables → rendered page images     (3.raw/, in place)
//!  └─ 5. Segment    one document per zone                      (4.interim/, 7.render/)
//! ```
//!
//! Every stage checkpoints its output on disk and skips itself when that
//! output exists, so a run can be interrupted and resumed at any point and
//! the metered OCR and LLM calls happen at most once per document.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zonedoc::{
//!     CheckpointOnly, DocumentContext, DocumentType, Job, LlmPageClassifier, PdfiumRenderer,
//!     Pipeline, PipelineConfig,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder().data_dir("data").build()?;
//!     let renderer = PdfiumRenderer::new(config.table_dpi, config.jpeg_quality)?;
//!     let classifier = LlmPageClassifier::new(&config)?;
//!
//!     let pipeline = Pipeline::new(config, &CheckpointOnly)
//!         .with_renderer(&renderer)
//!         .with_classifier(&classifier);
//!
//!     let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
//!     let ctx = DocumentContext::new("reglement", date, DocumentType::Plu, "grenoble");
//!     let report = pipeline.run_batch(&[Job::new(pipeline.layout(), ctx)]);
//!     println!("{} ok, {} failed", report.succeeded.len(), report.failed.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `zonedoc` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod document;
pub mod error;
pub mod layout;
pub mod ocr;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{BatchReport, DocumentOutput, DocumentReport, Job, Pipeline};
pub use checkpoint::StageOutcome;
pub use config::{DuplicatePages, ImageDedup, PipelineConfig, PipelineConfigBuilder};
pub use document::{Dimensions, Document, DocumentType, Image, Page, Paragraph};
pub use error::{RenderError, ZoneDocError};
pub use layout::DataLayout;
pub use ocr::{parse_ocr_result, CheckpointOnly, OcrEngine, OcrPage, OcrResult, UsageInfo};
pub use pipeline::classify::{parse_groups, LlmPageClassifier, PageClassifier, ZoneGroup};
pub use pipeline::dedup::{deduplicate, DedupReport};
pub use pipeline::normalize::{normalize, DocumentContext};
pub use pipeline::render::{PageRenderer, PdfiumRenderer, RenderedPage};
pub use pipeline::segment::{segment, SegmentReport};
pub use pipeline::tables::{find_table_paragraphs, is_markdown_table, substitute_tables};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
