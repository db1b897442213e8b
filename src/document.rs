//! Canonical document model: pages, paragraphs, images, dimensions.
//!
//! Every pipeline stage reads and writes this model. Its serde form is the
//! persisted checkpoint format: one pretty-printed JSON object per document.
//!
//! Page and paragraph `index` values are identity keys, not positions.
//! They are assigned once by the normalizer and never renumbered; removals
//! leave gaps. All lookups and removals here therefore go through the index,
//! never through a list position.

use crate::error::ZoneDocError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

/// Kind of regulation document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    /// Local urban-planning regulation.
    #[serde(rename = "PLU")]
    Plu,
    /// General provisions, applying city-wide across all zones.
    #[serde(rename = "DG")]
    Dg,
    /// A single file carrying both.
    #[serde(rename = "PLU_AND_DG")]
    PluAndDg,
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentType::Plu => "PLU",
            DocumentType::Dg => "DG",
            DocumentType::PluAndDg => "PLU_AND_DG",
        })
    }
}

impl std::str::FromStr for DocumentType {
    type Err = ZoneDocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PLU" => Ok(DocumentType::Plu),
            "DG" => Ok(DocumentType::Dg),
            "PLU_AND_DG" => Ok(DocumentType::PluAndDg),
            other => Err(ZoneDocError::malformed(
                "document type",
                format!("expected PLU, DG or PLU_AND_DG, got '{other}'"),
            )),
        }
    }
}

/// One raster region extracted from a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Unique within its page; referenced from paragraph text.
    pub name_img: String,
    pub top_left_x: u32,
    pub top_left_y: u32,
    pub bottom_right_x: u32,
    pub bottom_right_y: u32,
    /// Encoded pixel data, optionally prefixed with a `data:` URI header.
    pub image_base64: String,
}

impl Image {
    /// The inline markdown token that embeds this image in paragraph text.
    pub fn reference_token(&self) -> String {
        image_reference(&self.name_img)
    }

    /// Decode [`Image::image_base64`] into raw encoded image bytes.
    pub fn decode_data(&self) -> Result<Vec<u8>, base64::DecodeError> {
        decode_image_data(&self.image_base64)
    }

    fn validate(&self, page: u32) -> Result<(), ZoneDocError> {
        if self.bottom_right_x <= self.top_left_x || self.bottom_right_y <= self.top_left_y {
            return Err(ZoneDocError::InvalidDocument(format!(
                "page {}: image '{}' has an empty bounding box ({},{})-({},{})",
                page,
                self.name_img,
                self.top_left_x,
                self.top_left_y,
                self.bottom_right_x,
                self.bottom_right_y
            )));
        }
        Ok(())
    }
}

/// Markdown image reference for `name`: `![name](name)`.
pub fn image_reference(name: &str) -> String {
    format!("![{name}]({name})")
}

/// Decode base64 image data, accepting both bare base64 and
/// `data:image/...;base64,` URIs.
pub fn decode_image_data(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = match data.find("base64,") {
        Some(pos) if data.starts_with("data:") => &data[pos + "base64,".len()..],
        _ => data,
    };
    STANDARD.decode(payload.trim())
}

/// Resolution metadata for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub dpi: u32,
    pub width: u32,
    pub height: u32,
}

/// One block of text on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    /// 1-based, unique within the page. Not renumbered after removals.
    pub index: u32,
    pub content: String,
    /// Marks paragraphs rewritten by a pipeline stage (e.g. `table_image`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Reference back into the source document, when the OCR provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
}

impl Paragraph {
    pub fn new(index: u32, content: impl Into<String>) -> Self {
        Self {
            index,
            content: content.into(),
            tag: None,
            source_ref: None,
        }
    }
}

/// One physical page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based, unique within the document, stable across every stage.
    pub index: u32,
    pub paragraphs: Vec<Paragraph>,
    pub images: Vec<Image>,
    pub dimensions: Dimensions,
}

impl Page {
    /// Reconstruct the page's markdown: paragraphs joined by a blank line.
    pub fn markdown(&self) -> String {
        self.paragraphs
            .iter()
            .map(|p| p.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn paragraph_mut(&mut self, index: u32) -> Option<&mut Paragraph> {
        self.paragraphs.iter_mut().find(|p| p.index == index)
    }

    /// Remove the paragraph with this `index`. Returns whether one was removed.
    pub fn remove_paragraph(&mut self, index: u32) -> bool {
        let before = self.paragraphs.len();
        self.paragraphs.retain(|p| p.index != index);
        self.paragraphs.len() != before
    }

    /// Remove the image named `name`. Returns the removed image.
    pub fn remove_image(&mut self, name: &str) -> Option<Image> {
        let pos = self.images.iter().position(|img| img.name_img == name)?;
        Some(self.images.remove(pos))
    }

    fn validate(&self) -> Result<(), ZoneDocError> {
        if self.index == 0 {
            return Err(ZoneDocError::InvalidDocument(
                "page index must be ≥ 1".into(),
            ));
        }
        let mut seen = HashSet::new();
        for p in &self.paragraphs {
            if p.index == 0 || !seen.insert(p.index) {
                return Err(ZoneDocError::InvalidDocument(format!(
                    "page {}: paragraph index {} is zero or repeated",
                    self.index, p.index
                )));
            }
        }
        let mut names = HashSet::new();
        for img in &self.images {
            img.validate(self.index)?;
            if !names.insert(img.name_img.as_str()) {
                return Err(ZoneDocError::InvalidDocument(format!(
                    "page {}: image name '{}' is repeated",
                    self.index, img.name_img
                )));
            }
        }
        Ok(())
    }
}

/// Top-level aggregate: the pages of one document plus descriptive metadata.
///
/// A document with `zone = None` covers a whole source file; with a zone set
/// it is a slice holding only that zone's pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub pages: Vec<Page>,
    pub name_of_document: String,
    pub date_of_document: NaiveDate,
    pub document_type: DocumentType,
    pub city: String,
    #[serde(default)]
    pub zoning: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub model_metadata: Map<String, Value>,
}

impl Document {
    pub fn page(&self, index: u32) -> Option<&Page> {
        self.pages.iter().find(|p| p.index == index)
    }

    pub fn page_mut(&mut self, index: u32) -> Option<&mut Page> {
        self.pages.iter_mut().find(|p| p.index == index)
    }

    /// Remove the page with this `index`. Returns whether one was removed.
    pub fn remove_page(&mut self, index: u32) -> bool {
        let before = self.pages.len();
        self.pages.retain(|p| p.index != index);
        self.pages.len() != before
    }

    pub fn page_indices(&self) -> Vec<u32> {
        self.pages.iter().map(|p| p.index).collect()
    }

    /// A copy of this document's metadata carrying `pages` instead of its own.
    pub fn with_pages(&self, pages: Vec<Page>) -> Document {
        Document {
            pages,
            name_of_document: self.name_of_document.clone(),
            date_of_document: self.date_of_document,
            document_type: self.document_type,
            city: self.city.clone(),
            zoning: self.zoning.clone(),
            zone: self.zone.clone(),
            modified_at: self.modified_at.clone(),
            model_metadata: self.model_metadata.clone(),
        }
    }

    /// Stamp `modified_at` with the current local time.
    pub fn touch(&mut self) {
        self.modified_at = Some(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
    }

    /// Check the structural invariants: unique page indices, unique
    /// paragraph indices and image names per page, non-empty bounding boxes.
    pub fn validate(&self) -> Result<(), ZoneDocError> {
        let mut seen = HashSet::new();
        for page in &self.pages {
            page.validate()?;
            if !seen.insert(page.index) {
                return Err(ZoneDocError::InvalidDocument(format!(
                    "page index {} is repeated",
                    page.index
                )));
            }
        }
        Ok(())
    }
}
