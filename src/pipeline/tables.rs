//! Table-to-image substitution.
//!
//! OCR-to-markdown conversion flattens merged cells and multi-line headers,
//! and regulation tables (setbacks, heights, parking ratios per zone) are
//! exactly where that loss hurts. Paragraphs detected as markdown tables are
//! therefore replaced by a reference to a fresh render of the source page.
//!
//! A page that cannot be rendered never fails the document: the table keeps
//! its markdown and a warning is logged.

use crate::checkpoint::{self, StageOutcome};
use crate::document::{image_reference, Document, Image};
use crate::error::{RenderError, ZoneDocError};
use crate::layout::DataLayout;
use crate::pipeline::normalize::DocumentContext;
use crate::pipeline::render::{PageRenderer, RenderedPage};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Marker recorded in `model_metadata["stages"]`.
pub const STAGE: &str = "tables_substituted";

/// Tag set on paragraphs whose table was replaced by an image.
pub const TABLE_TAG: &str = "table_image";

const PREVIEW_CHARS: usize = 100;

// Header or data row: starts and ends with a pipe.
static RE_ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\|.*\|$").unwrap());

// Header separator: a pipe followed by dashes or colons.
static RE_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\|\s*[-:]+").unwrap());

/// Whether `content` is a markdown table: at least two lines, one row line
/// and one header-separator line. Lines are compared trimmed.
pub fn is_markdown_table(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return false;
    }
    let lines: Vec<&str> = trimmed
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() < 2 {
        return false;
    }

    let has_row = lines.iter().any(|l| l.len() >= 2 && RE_ROW.is_match(l));
    let has_separator = lines.iter().any(|l| RE_SEPARATOR.is_match(l));
    has_row && has_separator
}

/// All table paragraphs as `(page, paragraph, preview)`, the preview being
/// the first 100 characters of the table.
pub fn find_table_paragraphs(doc: &Document) -> Vec<(u32, u32, String)> {
    doc.pages
        .iter()
        .flat_map(|page| {
            page.paragraphs
                .iter()
                .filter(|p| is_markdown_table(&p.content))
                .map(move |p| (page.index, p.index, preview(&p.content)))
        })
        .collect()
}

fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_CHARS {
        let head: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        content.to_string()
    }
}

/// What a substitution pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableReport {
    /// `(page, paragraph)` of each table replaced by an image.
    pub replaced: Vec<(u32, u32)>,
    /// `(page, paragraph)` of each table left as markdown after a render failure.
    pub failed: Vec<(u32, u32)>,
    /// Number of distinct source pages rendered successfully.
    pub rendered_pages: usize,
}

/// Replace every table paragraph of `doc` with a rendered page image.
///
/// Page `P` of the document maps to 0-based page `P - 1` of `source`. Each
/// source page is rendered at most once per call, whatever the number of
/// tables it holds.
pub fn substitute_tables(
    doc: &mut Document,
    source: &Path,
    renderer: &dyn PageRenderer,
) -> TableReport {
    let mut report = TableReport::default();
    let mut renders: HashMap<u32, Result<RenderedPage, RenderError>> = HashMap::new();
    let mut counter = 0usize;

    for page in doc.pages.iter_mut() {
        let tables: Vec<u32> = page
            .paragraphs
            .iter()
            .filter(|p| is_markdown_table(&p.content))
            .map(|p| p.index)
            .collect();

        for para_index in tables {
            let page_index = page.index;
            let rendered = renders.entry(page_index).or_insert_with(|| {
                let result = match (page_index as usize).checked_sub(1) {
                    Some(zero_based) => renderer.render_page(source, zero_based),
                    None => Err(RenderError::OutOfRange { page: 0, total: 0 }),
                };
                if result.is_ok() {
                    report.rendered_pages += 1;
                }
                result
            });

            let rendered = match rendered {
                Ok(r) if r.width > 0 && r.height > 0 => r,
                Ok(r) => {
                    warn!(
                        "Page {}: render produced an empty {}x{} image, table kept as text",
                        page_index, r.width, r.height
                    );
                    report.failed.push((page_index, para_index));
                    continue;
                }
                Err(e) => {
                    warn!("Page {}: could not render source page: {}", page_index, e);
                    report.failed.push((page_index, para_index));
                    continue;
                }
            };

            counter += 1;
            let mut name = format!("table_{counter}.jpeg");
            while page.images.iter().any(|img| img.name_img == name) {
                counter += 1;
                name = format!("table_{counter}.jpeg");
            }

            page.images.push(Image {
                name_img: name.clone(),
                top_left_x: 0,
                top_left_y: 0,
                bottom_right_x: rendered.width,
                bottom_right_y: rendered.height,
                image_base64: rendered.image_base64.clone(),
            });

            if let Some(para) = page.paragraph_mut(para_index) {
                para.content = image_reference(&name);
                para.tag = Some(TABLE_TAG.to_string());
            }
            debug!(
                "Page {}: paragraph {} replaced by '{}'",
                page_index, para_index, name
            );
            report.replaced.push((page_index, para_index));
        }
    }

    report
}

/// Substitute tables in the normalized checkpoint, in place.
///
/// A document already carrying the [`STAGE`] marker is left untouched.
pub fn tables_stage(
    layout: &DataLayout,
    ctx: &DocumentContext,
    source: &Path,
    renderer: &dyn PageRenderer,
) -> Result<StageOutcome, ZoneDocError> {
    let path = layout.normalized(&ctx.city, &ctx.name);
    let mut doc = checkpoint::read_document(&path)?;
    if checkpoint::has_stage(&doc, STAGE) {
        debug!("'{}' already has tables substituted", ctx.name);
        return Ok(StageOutcome::AlreadyDone(path));
    }

    let report = substitute_tables(&mut doc, source, renderer);
    info!(
        "Tables in '{}': {} replaced, {} kept as text, {} pages rendered",
        ctx.name,
        report.replaced.len(),
        report.failed.len(),
        report.rendered_pages
    );

    checkpoint::mark_stage(&mut doc, STAGE);
    doc.touch();
    checkpoint::write_document(&path, &doc)?;
    Ok(StageOutcome::Done(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::{document, page};
    use std::cell::RefCell;

    const TABLE: &str = "| A | B |\n| --- | --- |\n| 1 | 2 |";

    /// Renders pages `0..pages`; records every call.
    struct FakeRenderer {
        pages: usize,
        calls: RefCell<Vec<usize>>,
    }

    impl FakeRenderer {
        fn new(pages: usize) -> Self {
            Self {
                pages,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl PageRenderer for FakeRenderer {
        fn render_page(&self, _source: &Path, page: usize) -> Result<RenderedPage, RenderError> {
            self.calls.borrow_mut().push(page);
            if page >= self.pages {
                return Err(RenderError::OutOfRange {
                    page,
                    total: self.pages,
                });
            }
            Ok(RenderedPage {
                image_base64: format!("page-{page}"),
                width: 1654,
                height: 2339,
            })
        }
    }

    #[test]
    fn detects_pipe_table() {
        assert!(is_markdown_table(TABLE));
        assert!(is_markdown_table("  | A | B |  \n  |:--|--:|  "));
    }

    #[test]
    fn rejects_text_with_pipe() {
        assert!(!is_markdown_table("This is regular text with | a pipe character"));
        assert!(!is_markdown_table(""));
        assert!(!is_markdown_table("| A | B |"));
    }

    #[test]
    fn rows_without_separator_are_not_a_table() {
        assert!(!is_markdown_table("| A | B |\n| 1 | 2 |"));
    }

    #[test]
    fn separator_without_row_is_not_a_table() {
        assert!(!is_markdown_table("|---\ntext"));
    }

    #[test]
    fn replaces_tables_and_renders_each_page_once() {
        let mut doc = document(vec![
            page(1, &["Intro", TABLE, "Between", TABLE], vec![]),
            page(2, &["No tables here"], vec![]),
        ]);
        doc.pages[0].paragraphs[1].source_ref = Some("p1#2".into());
        let renderer = FakeRenderer::new(2);

        let report = substitute_tables(&mut doc, Path::new("source.pdf"), &renderer);

        assert_eq!(report.replaced, vec![(1, 2), (1, 4)]);
        assert_eq!(report.rendered_pages, 1);
        assert_eq!(*renderer.calls.borrow(), vec![0]);

        let p1 = doc.page(1).unwrap();
        assert_eq!(p1.images.len(), 2);
        assert_eq!(p1.images[0].name_img, "table_1.jpeg");
        assert_eq!(p1.images[1].name_img, "table_2.jpeg");
        assert_eq!(p1.images[0].bottom_right_x, 1654);
        assert_eq!(p1.images[0].image_base64, "page-0");

        let para = &p1.paragraphs[1];
        assert_eq!(para.index, 2);
        assert_eq!(para.content, "![table_1.jpeg](table_1.jpeg)");
        assert_eq!(para.tag.as_deref(), Some(TABLE_TAG));
        assert_eq!(para.source_ref.as_deref(), Some("p1#2"));
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn render_failure_keeps_paragraph_and_continues() {
        let mut doc = document(vec![
            page(1, &[TABLE], vec![]),
            page(5, &[TABLE], vec![]),
        ]);
        // Source has one page: document page 5 is out of range.
        let renderer = FakeRenderer::new(1);

        let report = substitute_tables(&mut doc, Path::new("source.pdf"), &renderer);

        assert_eq!(report.replaced, vec![(1, 1)]);
        assert_eq!(report.failed, vec![(5, 1)]);
        assert_eq!(doc.page(5).unwrap().paragraphs[0].content, TABLE);
        assert!(doc.page(5).unwrap().images.is_empty());
    }

    #[test]
    fn generated_names_avoid_existing_images() {
        let mut doc = document(vec![page(
            1,
            &[TABLE],
            vec![crate::document::tests::image("table_1.jpeg", "x")],
        )]);
        substitute_tables(&mut doc, Path::new("s.pdf"), &FakeRenderer::new(1));
        let names: Vec<&str> = doc.pages[0]
            .images
            .iter()
            .map(|i| i.name_img.as_str())
            .collect();
        assert_eq!(names, vec!["table_1.jpeg", "table_2.jpeg"]);
    }

    #[test]
    fn finds_tables_with_preview() {
        let long_table = format!("| {} |\n| --- |", "x".repeat(200));
        let doc = document(vec![page(3, &["text", &long_table], vec![])]);
        let found = find_table_paragraphs(&doc);
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].0, found[0].1), (3, 2));
        assert!(found[0].2.ends_with("..."));
        assert_eq!(found[0].2.chars().count(), PREVIEW_CHARS + 3);
    }
}
