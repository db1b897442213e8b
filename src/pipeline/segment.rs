//! Zone segmentation: one parent document → one child document per zone.
//!
//! The parent is never modified. Each child is the restriction of the
//! parent's pages to one [`ZoneGroup`], in the group's page order, with
//! `zoning` and `zone` set. Children are written under
//! `4.interim/<city>/<zoning>/<zone>.json` and their images exported one file
//! per image under `7.render/<city>/images/<zone>/`.
//!
//! The classifier's answer is checkpointed next to the children
//! (`<doc>.page_split.json`), so a re-run never calls it again.

use crate::checkpoint::{self, StageOutcome};
use crate::document::Document;
use crate::error::ZoneDocError;
use crate::layout::{component, DataLayout};
use crate::pipeline::classify::{prompt_parts, PageClassifier, ZoneGroup};
use crate::pipeline::normalize::DocumentContext;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What a segmentation run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentReport {
    /// Zone document paths, in classifier order, whether written now or
    /// found from an earlier run.
    pub zone_documents: Vec<PathBuf>,
    /// Zone documents written by this run.
    pub written: usize,
    /// Groups that matched none of the parent's pages.
    pub skipped_groups: usize,
    /// Zone documents that already existed but came from another source
    /// document; this document's pages were not added to them.
    pub foreign_zones: usize,
    /// Image files written by this run.
    pub images_written: usize,
    /// Whether the classifier was called (false when its checkpoint existed).
    pub classified: bool,
}

/// Child document for `group`, or `None` when no page of `doc` matches.
///
/// Indices absent from `doc` are skipped; an index listed twice is kept
/// once, at its first position.
pub fn zone_document(doc: &Document, group: &ZoneGroup) -> Option<Document> {
    let mut seen = HashSet::new();
    let mut pages = Vec::with_capacity(group.pages.len());
    for &index in &group.pages {
        if !seen.insert(index) {
            debug!("Zone '{}': page {} listed twice", group.zone, index);
            continue;
        }
        match doc.page(index) {
            Some(page) => pages.push(page.clone()),
            None => warn!("Zone '{}': page {} not in document, skipped", group.zone, index),
        }
    }
    if pages.is_empty() {
        return None;
    }

    let mut child = doc.with_pages(pages);
    child.zoning = Some(group.zoning.clone());
    child.zone = Some(group.zone.clone());
    child.touch();
    Some(child)
}

/// Child documents for every group that matches at least one page, in
/// classifier order.
pub fn segment(doc: &Document, groups: &[ZoneGroup]) -> Vec<Document> {
    groups
        .iter()
        .filter_map(|group| {
            let child = zone_document(doc, group);
            if child.is_none() {
                warn_skipped(group);
            }
            child
        })
        .collect()
}

fn warn_skipped(group: &ZoneGroup) {
    warn!(
        "Zone '{}/{}': none of pages {:?} exist, skipped",
        group.zoning, group.zone, group.pages
    );
}

/// Where one exported image goes.
enum Slot {
    Free(PathBuf),
    Present,
}

/// First of `<name>` and `p<page>_<name>` that is free or already holds
/// `bytes`. `None` when both hold other data.
fn export_slot(dir: &Path, page: u32, name: &str, bytes: &[u8]) -> Option<Slot> {
    let plain = component(name);
    let qualified = component(&format!("p{}_{}", page, name));
    for file in [plain, qualified] {
        let path = dir.join(file);
        match fs::read(&path) {
            Ok(existing) if existing == bytes => return Some(Slot::Present),
            Ok(_) => continue,
            Err(_) => return Some(Slot::Free(path)),
        }
    }
    None
}

/// Write every image of `doc` into `dir`, one file per image, named after it.
///
/// Image names are only unique per page. When `<name>` already holds
/// different bytes (another page of the zone, or another document sharing
/// the zone), the image is written as `p<page>_<name>` with a warning. Files
/// already holding the same bytes are left alone. Images whose data cannot be
/// decoded are skipped with a warning. Returns the number of files written.
pub fn export_images(doc: &Document, dir: &Path) -> Result<usize, ZoneDocError> {
    let mut written = 0;
    for page in &doc.pages {
        for img in &page.images {
            let bytes = match img.decode_data() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        "Page {}: image '{}' not exported: {}",
                        page.index, img.name_img, e
                    );
                    continue;
                }
            };
            let path = match export_slot(dir, page.index, &img.name_img, &bytes) {
                Some(Slot::Present) => continue,
                Some(Slot::Free(path)) => path,
                None => {
                    warn!(
                        "Page {}: image '{}' not exported: {} already holds different images under that name",
                        page.index,
                        img.name_img,
                        dir.display()
                    );
                    continue;
                }
            };
            if path != dir.join(component(&img.name_img)) {
                warn!(
                    "Page {}: image '{}' clashes with another image of the zone, exported as {}",
                    page.index,
                    img.name_img,
                    path.display()
                );
            }
            fs::create_dir_all(dir).map_err(|e| ZoneDocError::WriteFailed {
                path: dir.to_path_buf(),
                source: e,
            })?;
            fs::write(&path, bytes).map_err(|e| ZoneDocError::WriteFailed {
                path: path.clone(),
                source: e,
            })?;
            written += 1;
        }
    }
    Ok(written)
}

/// Load the classifier's groups from their checkpoint, or classify once and
/// checkpoint the answer.
fn page_split(
    layout: &DataLayout,
    ctx: &DocumentContext,
    doc: &Document,
    classifier: &dyn PageClassifier,
) -> Result<(Vec<ZoneGroup>, bool), ZoneDocError> {
    let path = layout.page_split(&ctx.city, &ctx.name);
    if path.exists() {
        debug!("Page split present: {}", path.display());
        let groups = checkpoint::read_as(&path, "classification")?;
        return Ok((groups, false));
    }

    let groups = classifier.classify(&prompt_parts(doc))?;
    info!("Classifier found {} zones in '{}'", groups.len(), ctx.name);
    checkpoint::write_json(&path, &groups)?;
    Ok((groups, true))
}

/// Segment the normalized document into zone documents.
pub fn split_stage(
    layout: &DataLayout,
    ctx: &DocumentContext,
    classifier: &dyn PageClassifier,
) -> Result<SegmentReport, ZoneDocError> {
    let doc = checkpoint::read_document(&layout.normalized(&ctx.city, &ctx.name))?;
    let (groups, classified) = page_split(layout, ctx, &doc, classifier)?;

    let mut report = SegmentReport {
        classified,
        ..Default::default()
    };

    for group in &groups {
        let Some(child) = zone_document(&doc, group) else {
            warn_skipped(group);
            report.skipped_groups += 1;
            continue;
        };

        let path = layout.zone_document(&ctx.city, &group.zoning, &group.zone);
        if path.exists() {
            let existing = checkpoint::read_value(&path)?;
            let owner = existing
                .get("name_of_document")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if owner == ctx.name {
                debug!("Zone document present: {}", path.display());
            } else {
                warn!(
                    "Zone '{}/{}': {} already written from '{}', pages of '{}' not added",
                    group.zoning,
                    group.zone,
                    path.display(),
                    owner,
                    ctx.name
                );
                report.foreign_zones += 1;
            }
        } else {
            checkpoint::write_document(&path, &child)?;
            report.written += 1;
        }

        report.images_written +=
            export_images(&child, &layout.zone_images(&ctx.city, &group.zone))?;
        report.zone_documents.push(path);
    }

    info!(
        "Segmented '{}': {} zones ({} new), {} groups skipped, {} images exported",
        ctx.name,
        report.zone_documents.len(),
        report.written,
        report.skipped_groups,
        report.images_written
    );
    Ok(report)
}

/// Copy the normalized document unsegmented to `4.interim/<city>/<doc>.json`.
pub fn whole_document_stage(
    layout: &DataLayout,
    ctx: &DocumentContext,
) -> Result<StageOutcome, ZoneDocError> {
    let out = layout.whole_document(&ctx.city, &ctx.name);
    if out.exists() {
        debug!("Whole document present: {}", out.display());
        return Ok(StageOutcome::AlreadyDone(out));
    }
    let doc = checkpoint::read_document(&layout.normalized(&ctx.city, &ctx.name))?;
    checkpoint::write_document(&out, &doc)?;
    Ok(StageOutcome::Done(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::{document, image, page};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::cell::Cell;
    use tempfile::TempDir;

    fn group(zoning: &str, zone: &str, pages: &[u32]) -> ZoneGroup {
        ZoneGroup {
            zoning: zoning.into(),
            zone: zone.into(),
            pages: pages.to_vec(),
        }
    }

    fn three_pages() -> Document {
        document(vec![
            page(1, &["Zone UA"], vec![]),
            page(2, &["Zone UB"], vec![]),
            page(3, &["Zone UA suite"], vec![]),
        ])
    }

    struct CountingClassifier {
        groups: Vec<ZoneGroup>,
        calls: Cell<usize>,
    }

    impl PageClassifier for CountingClassifier {
        fn classify(&self, parts: &[String]) -> Result<Vec<ZoneGroup>, ZoneDocError> {
            assert!(parts[0].starts_with("Page "));
            self.calls.set(self.calls.get() + 1);
            Ok(self.groups.clone())
        }
    }

    #[test]
    fn children_follow_classifier_page_order() {
        let parent = three_pages();
        let children = segment(
            &parent,
            &[group("Z1", "UA", &[1, 3]), group("Z1", "UB", &[2])],
        );
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].page_indices(), vec![1, 3]);
        assert_eq!(children[0].zone.as_deref(), Some("UA"));
        assert_eq!(children[0].zoning.as_deref(), Some("Z1"));
        assert_eq!(children[1].page_indices(), vec![2]);
        assert_eq!(children[1].name_of_document, parent.name_of_document);

        let reversed = segment(&parent, &[group("Z1", "UA", &[3, 1])]);
        assert_eq!(reversed[0].page_indices(), vec![3, 1]);
        // Parent untouched.
        assert_eq!(parent.page_indices(), vec![1, 2, 3]);
        assert!(parent.zone.is_none());
    }

    #[test]
    fn group_with_unknown_pages_only_is_skipped() {
        let children = segment(&three_pages(), &[group("Z1", "UX", &[99])]);
        assert!(children.is_empty());
    }

    #[test]
    fn unknown_and_repeated_indices_are_dropped() {
        let child = zone_document(&three_pages(), &group("Z1", "UA", &[3, 99, 3, 1])).unwrap();
        assert_eq!(child.page_indices(), vec![3, 1]);
        assert!(child.validate().is_ok());
    }

    #[test]
    fn split_stage_writes_zones_and_reuses_classification() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path());
        let ctx = DocumentContext::new(
            "reglement",
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            crate::document::DocumentType::Plu,
            "grenoble",
        );
        checkpoint::write_document(&layout.normalized("grenoble", "reglement"), &three_pages())
            .unwrap();
        let classifier = CountingClassifier {
            groups: vec![
                group("Z1", "UA", &[1, 3]),
                group("Z1", "UB", &[2]),
                group("Z2", "UX", &[99]),
            ],
            calls: Cell::new(0),
        };

        let first = split_stage(&layout, &ctx, &classifier).unwrap();
        assert!(first.classified);
        assert_eq!(first.written, 2);
        assert_eq!(first.skipped_groups, 1);
        assert!(!layout.zone_document("grenoble", "Z2", "UX").exists());
        let ua_path = layout.zone_document("grenoble", "Z1", "UA");
        let ua_bytes = fs::read(&ua_path).unwrap();

        let second = split_stage(&layout, &ctx, &classifier).unwrap();
        assert!(!second.classified);
        assert_eq!(second.written, 0);
        assert_eq!(classifier.calls.get(), 1);
        assert_eq!(second.zone_documents, first.zone_documents);
        assert_eq!(fs::read(&ua_path).unwrap(), ua_bytes);
    }

    #[test]
    fn images_exported_once_and_bad_data_skipped() {
        let dir = TempDir::new().unwrap();
        let png = STANDARD.encode(b"\x89PNG fake bytes");
        let doc = document(vec![page(
            1,
            &["![a.png](a.png)"],
            vec![image("a.png", &png), image("bad.png", "%%%")],
        )]);

        assert_eq!(export_images(&doc, dir.path()).unwrap(), 1);
        assert_eq!(fs::read(dir.path().join("a.png")).unwrap(), b"\x89PNG fake bytes");
        assert!(!dir.path().join("bad.png").exists());

        assert_eq!(export_images(&doc, dir.path()).unwrap(), 0);
    }

    #[test]
    fn same_name_on_two_pages_keeps_both_images() {
        let dir = TempDir::new().unwrap();
        let one = STANDARD.encode(b"PAGE ONE");
        let three = STANDARD.encode(b"PAGE THREE");
        let doc = document(vec![
            page(1, &["![img-0.jpeg](img-0.jpeg)"], vec![image("img-0.jpeg", &one)]),
            page(3, &["![img-0.jpeg](img-0.jpeg)"], vec![image("img-0.jpeg", &three)]),
        ]);
        assert!(doc.validate().is_ok());

        assert_eq!(export_images(&doc, dir.path()).unwrap(), 2);
        assert_eq!(fs::read(dir.path().join("img-0.jpeg")).unwrap(), b"PAGE ONE");
        assert_eq!(fs::read(dir.path().join("p3_img-0.jpeg")).unwrap(), b"PAGE THREE");

        assert_eq!(export_images(&doc, dir.path()).unwrap(), 0);
    }

    #[test]
    fn same_name_and_bytes_on_two_pages_written_once() {
        let dir = TempDir::new().unwrap();
        let logo = STANDARD.encode(b"LOGO");
        let doc = document(vec![
            page(1, &["a"], vec![image("img-0.jpeg", &logo)]),
            page(2, &["b"], vec![image("img-0.jpeg", &logo)]),
        ]);
        assert_eq!(export_images(&doc, dir.path()).unwrap(), 1);
        assert!(!dir.path().join("p2_img-0.jpeg").exists());
    }

    #[test]
    fn zone_from_another_document_is_counted_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path());
        let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let first = DocumentContext::new("reglement", date, crate::document::DocumentType::Plu, "grenoble");
        let second = DocumentContext::new("annexe", date, crate::document::DocumentType::Plu, "grenoble");

        checkpoint::write_document(&layout.normalized("grenoble", "reglement"), &three_pages())
            .unwrap();
        let mut annexe = three_pages();
        annexe.name_of_document = "annexe".into();
        checkpoint::write_document(&layout.normalized("grenoble", "annexe"), &annexe).unwrap();

        let classifier = CountingClassifier {
            groups: vec![group("Z1", "UA", &[1])],
            calls: Cell::new(0),
        };
        let ours = split_stage(&layout, &first, &classifier).unwrap();
        assert_eq!((ours.written, ours.foreign_zones), (1, 0));

        let theirs = split_stage(&layout, &second, &classifier).unwrap();
        assert_eq!((theirs.written, theirs.foreign_zones), (0, 1));
        let zone = checkpoint::read_document(&layout.zone_document("grenoble", "Z1", "UA")).unwrap();
        assert_eq!(zone.name_of_document, "reglement");

        let again = split_stage(&layout, &first, &classifier).unwrap();
        assert_eq!(again.foreign_zones, 0);
    }

    #[test]
    fn whole_document_copied_once() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path());
        let ctx = DocumentContext::new(
            "reglement",
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            crate::document::DocumentType::Dg,
            "grenoble",
        );
        checkpoint::write_document(&layout.normalized("grenoble", "reglement"), &three_pages())
            .unwrap();
        assert!(!whole_document_stage(&layout, &ctx).unwrap().was_skipped());
        assert!(whole_document_stage(&layout, &ctx).unwrap().was_skipped());
        let copy = checkpoint::read_document(&layout.whole_document("grenoble", "reglement")).unwrap();
        assert_eq!(copy, three_pages());
    }
}
