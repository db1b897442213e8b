//! Raw OCR payload schema and the OCR collaborator interface.
//!
//! The OCR service itself lives outside this crate. It is reached through
//! [`OcrEngine`], whose raw JSON answer is checkpointed verbatim before it is
//! parsed against the single schema below. Anything that does not match is
//! rejected as [`ZoneDocError::MalformedInput`]; there is no fallback parsing.

use crate::document::{Dimensions, Image};
use crate::error::ZoneDocError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// OCR output for one physical page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrPage {
    /// 0-based position reported by the service. Informational only: page
    /// numbering comes from the position in [`OcrResult::pages`].
    #[serde(default)]
    pub index: Option<u32>,
    pub markdown: String,
    pub images: Vec<Image>,
    pub dimensions: Dimensions,
}

/// Document-level usage metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageInfo {
    #[serde(default)]
    pub pages_processed: Option<u64>,
    #[serde(default)]
    pub doc_size_bytes: Option<u64>,
}

/// Full OCR result for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub pages: Vec<OcrPage>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage_info: Option<UsageInfo>,
    #[serde(default)]
    pub document_annotation: Option<Value>,
}

/// External OCR service.
///
/// Implementations are metered and slow; the pipeline calls them at most once
/// per document and checkpoints the answer.
pub trait OcrEngine {
    /// Run OCR on the source file and return the service's raw JSON answer.
    fn extract(&self, source: &Path) -> Result<Value, ZoneDocError>;
}

/// An [`OcrEngine`] for runs that only work from existing checkpoints.
///
/// Every call fails with [`ZoneDocError::OcrUnavailable`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CheckpointOnly;

impl OcrEngine for CheckpointOnly {
    fn extract(&self, source: &Path) -> Result<Value, ZoneDocError> {
        Err(ZoneDocError::OcrUnavailable {
            path: source.to_path_buf(),
        })
    }
}

/// Decode a raw OCR answer against [`OcrResult`].
///
/// Fails with `MalformedInput` when a page lacks `markdown`, `images` or
/// `dimensions`, or when an image has an empty bounding box.
pub fn parse_ocr_result(raw: Value) -> Result<OcrResult, ZoneDocError> {
    let result: OcrResult =
        serde_json::from_value(raw).map_err(|e| ZoneDocError::malformed("OCR result", e.to_string()))?;

    for (pos, page) in result.pages.iter().enumerate() {
        for img in &page.images {
            if img.bottom_right_x <= img.top_left_x || img.bottom_right_y <= img.top_left_y {
                return Err(ZoneDocError::malformed(
                    "OCR result",
                    format!(
                        "page {}: image '{}' has an empty bounding box",
                        pos + 1,
                        img.name_img
                    ),
                ));
            }
        }
    }
    Ok(result)
}
