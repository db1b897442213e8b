//! OCR normalization: raw per-page OCR output → [`Document`].
//!
//! Two stage entry points live here:
//!
//! 1. [`fetch_ocr`]: call the OCR collaborator once and checkpoint its raw
//!    answer under `2.ocr/`.
//! 2. [`normalize_stage`]: parse that checkpoint and write the normalized
//!    document under `3.raw/`.
//!
//! Page indices assigned here (`N + 1` for the Nth raw page) are the identity
//! keys every later stage joins on.

use crate::checkpoint::{self, StageOutcome};
use crate::document::{Document, DocumentType, Page, Paragraph};
use crate::error::ZoneDocError;
use crate::layout::DataLayout;
use crate::ocr::{parse_ocr_result, OcrEngine, OcrResult};
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info};

/// Caller-supplied metadata: none of it comes from the OCR payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentContext {
    /// Document name, also the file stem of every checkpoint.
    pub name: String,
    pub date: NaiveDate,
    pub document_type: DocumentType,
    pub city: String,
}

impl DocumentContext {
    pub fn new(
        name: impl Into<String>,
        date: NaiveDate,
        document_type: DocumentType,
        city: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            date,
            document_type,
            city: city.into(),
        }
    }
}

/// Split a page's markdown on blank lines into paragraphs.
///
/// Segments that are empty or whitespace-only are dropped; the remaining ones
/// are numbered 1, 2, 3, … and kept untrimmed.
pub fn split_paragraphs(markdown: &str) -> Vec<Paragraph> {
    markdown
        .split("\n\n")
        .filter(|segment| !segment.trim().is_empty())
        .enumerate()
        .map(|(i, segment)| Paragraph::new(i as u32 + 1, segment))
        .collect()
}

/// Build a [`Document`] from a parsed OCR result.
pub fn normalize(ocr: &OcrResult, ctx: &DocumentContext) -> Document {
    let pages = ocr
        .pages
        .iter()
        .enumerate()
        .map(|(n, raw)| Page {
            index: n as u32 + 1,
            paragraphs: split_paragraphs(&raw.markdown),
            images: raw.images.clone(),
            dimensions: raw.dimensions,
        })
        .collect();

    let mut doc = Document {
        pages,
        name_of_document: ctx.name.clone(),
        date_of_document: ctx.date,
        document_type: ctx.document_type,
        city: ctx.city.clone(),
        zoning: None,
        zone: None,
        modified_at: None,
        model_metadata: provenance(ocr),
    };
    doc.touch();
    doc
}

fn provenance(ocr: &OcrResult) -> Map<String, Value> {
    let usage = ocr.usage_info.clone().unwrap_or_default();
    let mut meta = Map::new();
    meta.insert(
        "model".into(),
        Value::from(ocr.model.clone().unwrap_or_default()),
    );
    meta.insert("pages_processed".into(), usage.pages_processed.into());
    meta.insert("doc_size_bytes".into(), usage.doc_size_bytes.into());
    meta.insert(
        "document_annotation".into(),
        ocr.document_annotation
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new())),
    );
    meta
}

/// Run OCR on `source` unless a raw OCR checkpoint already exists.
///
/// The answer is validated against the OCR schema before it is written, so
/// a malformed payload never leaves a checkpoint behind.
pub fn fetch_ocr(
    layout: &DataLayout,
    ctx: &DocumentContext,
    source: &Path,
    engine: &dyn OcrEngine,
) -> Result<StageOutcome, ZoneDocError> {
    let out = layout.ocr_result(&ctx.city, &ctx.name);
    if out.exists() {
        debug!("OCR checkpoint present: {}", out.display());
        return Ok(StageOutcome::AlreadyDone(out));
    }

    info!("Running OCR on {}", source.display());
    let raw = engine.extract(source)?;
    let parsed = parse_ocr_result(raw.clone())?;
    info!("OCR returned {} pages for '{}'", parsed.pages.len(), ctx.name);

    checkpoint::write_json(&out, &raw)?;
    Ok(StageOutcome::Done(out))
}

/// Normalize the raw OCR checkpoint into `3.raw/<city>/<doc>.json`.
pub fn normalize_stage(
    layout: &DataLayout,
    ctx: &DocumentContext,
) -> Result<StageOutcome, ZoneDocError> {
    let out = layout.normalized(&ctx.city, &ctx.name);
    if out.exists() {
        debug!("Normalized document present: {}", out.display());
        return Ok(StageOutcome::AlreadyDone(out));
    }

    let input = layout.ocr_result(&ctx.city, &ctx.name);
    if !input.exists() {
        return Err(ZoneDocError::OcrUnavailable { path: input });
    }
    let ocr = parse_ocr_result(checkpoint::read_value(&input)?)?;
    let doc = normalize(&ocr, ctx);
    info!(
        "Normalized '{}': {} pages, {} paragraphs",
        ctx.name,
        doc.pages.len(),
        doc.pages.iter().map(|p| p.paragraphs.len()).sum::<usize>()
    );

    checkpoint::write_document(&out, &doc)?;
    Ok(StageOutcome::Done(out))
}
