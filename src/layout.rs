//! On-disk layout of the data directory.
//!
//! Every stage derives its input and output paths from a [`DataLayout`]
//! built once at startup and passed down explicitly. The tree is numbered by
//! pipeline stage:
//!
//! ```text
//! data/
//!  ├─ 1.external/<city>/<date>/<doc>.pdf          source PDFs
//!  ├─ 2.ocr/<city>/<doc>.json                     raw OCR results
//!  ├─ 3.raw/<city>/<doc>.json                     normalized documents
//!  ├─ 4.interim/<city>/<doc>.page_split.json      classifier output
//!  ├─ 4.interim/<city>/<zoning>/<zone>.json       zone documents
//!  └─ 7.render/<city>/images/<zone>/<image>       exported zone images
//! ```

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

const EXTERNAL_DIR: &str = "1.external";
const OCR_DIR: &str = "2.ocr";
const RAW_DIR: &str = "3.raw";
const INTERIM_DIR: &str = "4.interim";
const RENDER_DIR: &str = "7.render";

/// Path table for one data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Source PDF as delivered by the city.
    pub fn source_pdf(&self, city: &str, date: NaiveDate, doc: &str) -> PathBuf {
        self.root
            .join(EXTERNAL_DIR)
            .join(component(city))
            .join(date.format("%Y-%m-%d").to_string())
            .join(format!("{}.pdf", component(doc)))
    }

    /// Raw OCR result checkpoint.
    pub fn ocr_result(&self, city: &str, doc: &str) -> PathBuf {
        self.city_dir(OCR_DIR, city).join(json_name(doc))
    }

    /// Normalized document; deduplication and table substitution rewrite it
    /// in place.
    pub fn normalized(&self, city: &str, doc: &str) -> PathBuf {
        self.city_dir(RAW_DIR, city).join(json_name(doc))
    }

    /// Classifier groups for one document.
    pub fn page_split(&self, city: &str, doc: &str) -> PathBuf {
        self.city_dir(INTERIM_DIR, city)
            .join(format!("{}.page_split.json", component(doc)))
    }

    /// Unsegmented copy of a document, used when zone extraction is off.
    pub fn whole_document(&self, city: &str, doc: &str) -> PathBuf {
        self.city_dir(INTERIM_DIR, city).join(json_name(doc))
    }

    /// Zone document, keyed by `(zoning, zone)`.
    pub fn zone_document(&self, city: &str, zoning: &str, zone: &str) -> PathBuf {
        self.city_dir(INTERIM_DIR, city)
            .join(component(zoning))
            .join(json_name(zone))
    }

    /// Directory receiving one file per image of a zone document.
    pub fn zone_images(&self, city: &str, zone: &str) -> PathBuf {
        self.city_dir(RENDER_DIR, city)
            .join("images")
            .join(component(zone))
    }

    fn city_dir(&self, stage: &str, city: &str) -> PathBuf {
        self.root.join(stage).join(component(city))
    }
}

fn json_name(stem: &str) -> String {
    format!("{}.json", component(stem))
}

/// Make a classifier- or user-supplied name safe as a single path component.
pub(crate) fn component(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '-',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
