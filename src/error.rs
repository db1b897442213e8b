//! Error types for the zonedoc library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ZoneDocError`] is **fatal for one document**: the current document's
//!   run cannot proceed (malformed OCR payload, unreadable checkpoint,
//!   classifier unavailable). Returned as `Err(ZoneDocError)` from every
//!   stage entry point. The batch driver logs it and moves on to the next
//!   document.
//!
//! * [`RenderError`] is **non-fatal**: a single source page could not be
//!   rasterised. The table substituter leaves the paragraph untouched and
//!   continues with the next candidate.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the zonedoc library.
///
/// Page render failures use [`RenderError`] and never abort a document.
#[derive(Debug, Error)]
pub enum ZoneDocError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// A payload (OCR result, classification, persisted document) is missing
    /// required fields or does not match its schema.
    #[error("Malformed {what}: {detail}")]
    MalformedInput { what: &'static str, detail: String },

    /// A document violates a structural invariant (duplicate page index,
    /// inverted bounding box, ...).
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// No OCR checkpoint exists and no OCR engine can produce one.
    #[error("No OCR result at '{path}'\nRun the OCR extraction for this document first.")]
    OcrUnavailable { path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not read a checkpoint or source file.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write a checkpoint or exported image.
    #[error("Failed to write '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A checkpoint file is not valid JSON.
    #[error("Invalid JSON in '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The page classifier failed after all retries.
    #[error("Page classification failed after {retries} retries: {detail}")]
    ClassifierFailed { retries: u32, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library for table rendering.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Table substitution renders source pages with pdfium. Either:\n\
  • place libpdfium next to the working directory or on the library path, or\n\
  • disable table substitution with --no-tables.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ZoneDocError {
    pub(crate) fn malformed(what: &'static str, detail: impl Into<String>) -> Self {
        ZoneDocError::MalformedInput {
            what,
            detail: detail.into(),
        }
    }
}

/// A non-fatal error for a single source page render.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// The source PDF does not exist.
    #[error("source document not found: '{path}'")]
    NotFound { path: PathBuf },

    /// The requested 0-based page is beyond the document's page count.
    #[error("page {page} is out of range (document has {total} pages)")]
    OutOfRange { page: usize, total: usize },

    /// pdfium could not load or rasterise the page.
    #[error("rasterisation failed for page {page}: {detail}")]
    Rasterisation { page: usize, detail: String },

    /// The rendered bitmap could not be encoded.
    #[error("encoding failed for page {page}: {detail}")]
    Encoding { page: usize, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_display_names_payload() {
        let e = ZoneDocError::malformed("OCR result", "missing field `markdown`");
        let msg = e.to_string();
        assert!(msg.contains("OCR result"), "got: {msg}");
        assert!(msg.contains("markdown"), "got: {msg}");
    }

    #[test]
    fn out_of_range_display() {
        let e = RenderError::OutOfRange { page: 7, total: 3 };
        assert!(e.to_string().contains("page 7"));
        assert!(e.to_string().contains("3 pages"));
    }

    #[test]
    fn classifier_failed_display() {
        let e = ZoneDocError::ClassifierFailed {
            retries: 3,
            detail: "rate limited".into(),
        };
        assert!(e.to_string().contains("3 retries"));
        assert!(e.to_string().contains("rate limited"));
    }
}
