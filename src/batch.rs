//! Per-document orchestration and the batch driver.
//!
//! [`Pipeline::run_document`] runs every stage of one document in order:
//!
//! ```text
//! fetch_ocr → normalize → dedup → tables (optional) → split | whole document
//! ```
//!
//! Each stage short-circuits on its own checkpoint, so running a document
//! again after an interruption resumes at the first stage without output.
//!
//! [`Pipeline::run_batch`] never stops on a bad document: the error is
//! logged, recorded in the [`BatchReport`], and the next document starts.

use crate::checkpoint::StageOutcome;
use crate::config::PipelineConfig;
use crate::error::ZoneDocError;
use crate::layout::DataLayout;
use crate::ocr::OcrEngine;
use crate::pipeline::classify::PageClassifier;
use crate::pipeline::normalize::{fetch_ocr, normalize_stage, DocumentContext};
use crate::pipeline::render::PageRenderer;
use crate::pipeline::segment::{split_stage, whole_document_stage, SegmentReport};
use crate::pipeline::{dedup, tables};
use crate::progress::ProgressCallback;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// One document to process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub context: DocumentContext,
    /// Source PDF, used by OCR and table rendering.
    pub source: PathBuf,
}

impl Job {
    /// A job whose source is the conventional `1.external/` path.
    pub fn new(layout: &DataLayout, context: DocumentContext) -> Self {
        let source = layout.source_pdf(&context.city, context.date, &context.name);
        Self { context, source }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = source.into();
        self
    }
}

/// Final output of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutput {
    /// Zone documents produced by the segmenter.
    Zones(SegmentReport),
    /// Unsegmented copy, when no classifier is configured.
    Whole(PathBuf),
}

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentReport {
    pub name: String,
    /// Stages that found their output already present.
    pub skipped_stages: Vec<&'static str>,
    pub output: DocumentOutput,
}

/// Outcome of a batch: every job lands in exactly one list.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<DocumentReport>,
    pub failed: Vec<(String, ZoneDocError)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The stages of the pipeline wired to their collaborators.
///
/// Without a renderer, table substitution is skipped with a warning; without
/// a classifier, documents are copied whole instead of segmented.
pub struct Pipeline<'a> {
    config: PipelineConfig,
    layout: DataLayout,
    ocr: &'a dyn OcrEngine,
    renderer: Option<&'a dyn PageRenderer>,
    classifier: Option<&'a dyn PageClassifier>,
    progress: Option<ProgressCallback>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: PipelineConfig, ocr: &'a dyn OcrEngine) -> Self {
        let layout = config.layout();
        Self {
            config,
            layout,
            ocr,
            renderer: None,
            classifier: None,
            progress: None,
        }
    }

    pub fn with_renderer(mut self, renderer: &'a dyn PageRenderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_classifier(mut self, classifier: &'a dyn PageClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage of one document.
    pub fn run_document(&self, job: &Job) -> Result<DocumentReport, ZoneDocError> {
        let ctx = &job.context;
        let mut skipped = Vec::new();
        let mut note = |stage: &'static str, outcome: StageOutcome| {
            if outcome.was_skipped() {
                skipped.push(stage);
            }
        };

        note("ocr", fetch_ocr(&self.layout, ctx, &job.source, self.ocr)?);
        note("normalize", normalize_stage(&self.layout, ctx)?);
        note(
            dedup::STAGE,
            dedup::dedup_stage(
                &self.layout,
                ctx,
                self.config.duplicate_pages,
                self.config.image_dedup,
            )?,
        );

        if self.config.substitute_tables {
            match self.renderer {
                Some(renderer) => note(
                    tables::STAGE,
                    tables::tables_stage(&self.layout, ctx, &job.source, renderer)?,
                ),
                None => warn!("'{}': no page renderer, tables left as markdown", ctx.name),
            }
        }

        let output = match self.classifier {
            Some(classifier) => DocumentOutput::Zones(split_stage(&self.layout, ctx, classifier)?),
            None => {
                let outcome = whole_document_stage(&self.layout, ctx)?;
                let path = outcome.path().to_path_buf();
                note("whole_document", outcome);
                DocumentOutput::Whole(path)
            }
        };

        Ok(DocumentReport {
            name: ctx.name.clone(),
            skipped_stages: skipped,
            output,
        })
    }

    /// Run every job, logging and recording failures instead of stopping.
    pub fn run_batch(&self, jobs: &[Job]) -> BatchReport {
        let total = jobs.len();
        let mut report = BatchReport::default();
        if let Some(ref cb) = self.progress {
            cb.on_batch_start(total);
        }

        for (i, job) in jobs.iter().enumerate() {
            let name = job.context.name.as_str();
            if let Some(ref cb) = self.progress {
                cb.on_document_start(i + 1, total, name);
            }

            match self.run_document(job) {
                Ok(doc_report) => {
                    info!("Document {}/{} '{}' done", i + 1, total, name);
                    if let Some(ref cb) = self.progress {
                        cb.on_document_complete(i + 1, total, name);
                    }
                    report.succeeded.push(doc_report);
                }
                Err(e) => {
                    error!("Document {}/{} '{}' failed: {}", i + 1, total, name, e);
                    if let Some(ref cb) = self.progress {
                        cb.on_document_error(i + 1, total, name, &e.to_string());
                    }
                    report.failed.push((name.to_string(), e));
                }
            }
        }

        if let Some(ref cb) = self.progress {
            cb.on_batch_complete(total, report.succeeded.len());
        }
        info!(
            "Batch finished: {} succeeded, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        report
    }
}
