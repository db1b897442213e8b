//! Deduplication of pages and images produced by OCR artefacts.
//!
//! Scanned regulations repeat themselves: every annex starts with the same
//! cover page, every page carries the city's logo. This stage removes
//! repeated pages and repeated images, then rewrites paragraph text so no
//! paragraph keeps pointing at an image that is gone.
//!
//! ## Order of operations
//!
//! 1. Pages grouped by identical reconstructed text; duplicates dropped.
//! 2. Images grouped across *all* pages of the input (exact data or
//!    perceptual hash); every member of a duplicate group is dropped, except
//!    members already gone with their page in step 1.
//! 3. For each dropped image, its reference token is stripped from the
//!    paragraphs of its page; paragraphs left empty are deleted.
//!
//! Everything is addressed by page index and image name, never by list
//! position: indices have gaps after any removal and identical pages are
//! common, so positional removal would hit the wrong page.

use crate::checkpoint::{self, StageOutcome};
use crate::config::{DuplicatePages, ImageDedup};
use crate::document::Document;
use crate::error::ZoneDocError;
use crate::layout::DataLayout;
use crate::pipeline::normalize::DocumentContext;
use crate::pipeline::phash::{distance, PerceptualHasher};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Marker recorded in `model_metadata["stages"]`.
pub const STAGE: &str = "deduplicated";

/// Identity of one image: owning page index and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageKey {
    pub page: u32,
    pub name: String,
}

/// What a deduplication pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupReport {
    pub removed_pages: Vec<u32>,
    pub removed_images: Vec<ImageKey>,
    /// `(page, paragraph)` indices deleted because they became empty.
    pub removed_paragraphs: Vec<(u32, u32)>,
}

/// Deduplicate `doc` in place.
pub fn deduplicate(doc: &mut Document, pages: DuplicatePages, images: ImageDedup) -> DedupReport {
    // Image groups are computed over the input as given, before any page goes.
    let duplicate_images = match images {
        ImageDedup::Exact => exact_duplicate_images(doc),
        ImageDedup::Perceptual { max_distance } => perceptual_duplicate_images(doc, max_distance),
    };

    let mut report = DedupReport::default();

    for index in duplicate_pages(doc, pages) {
        if doc.remove_page(index) {
            debug!("Page {}: removed as duplicate", index);
            report.removed_pages.push(index);
        }
    }

    let gone: HashSet<u32> = report.removed_pages.iter().copied().collect();
    for key in duplicate_images {
        if gone.contains(&key.page) {
            continue;
        }
        let removed_paragraphs = remove_image(doc, &key);
        report
            .removed_paragraphs
            .extend(removed_paragraphs.into_iter().map(|p| (key.page, p)));
        report.removed_images.push(key);
    }

    report
}

/// Indices of pages to drop: groups of identical reconstructed text.
pub fn duplicate_pages(doc: &Document, policy: DuplicatePages) -> Vec<u32> {
    let mut groups: BTreeMap<String, Vec<u32>> = BTreeMap::new();
    for page in &doc.pages {
        groups.entry(page.markdown()).or_default().push(page.index);
    }

    let mut doomed = Vec::new();
    for mut indices in groups.into_values().filter(|g| g.len() > 1) {
        indices.sort_unstable();
        match policy {
            DuplicatePages::KeepFirst => doomed.extend_from_slice(&indices[1..]),
            DuplicatePages::RemoveAll => doomed.extend(indices),
        }
    }
    doomed.sort_unstable();
    doomed
}

/// Images whose encoded data occurs more than once in the document.
pub fn exact_duplicate_images(doc: &Document) -> Vec<ImageKey> {
    let mut groups: BTreeMap<&str, Vec<ImageKey>> = BTreeMap::new();
    for page in &doc.pages {
        for img in &page.images {
            groups
                .entry(img.image_base64.as_str())
                .or_default()
                .push(ImageKey {
                    page: page.index,
                    name: img.name_img.clone(),
                });
        }
    }

    let mut keys: Vec<ImageKey> = groups
        .into_values()
        .filter(|g| g.len() > 1)
        .flatten()
        .collect();
    keys.sort();
    keys
}

/// Images within `max_distance` (exclusive) bits of another image.
///
/// Every unordered pair is compared once; an image matching several others
/// is still reported once. Images that cannot be decoded are left out of the
/// comparison.
pub fn perceptual_duplicate_images(doc: &Document, max_distance: u32) -> Vec<ImageKey> {
    let hasher = PerceptualHasher::new();
    let mut hashed = Vec::new();
    for page in &doc.pages {
        for img in &page.images {
            match hasher.hash_base64(&img.image_base64) {
                Ok(hash) => hashed.push((
                    ImageKey {
                        page: page.index,
                        name: img.name_img.clone(),
                    },
                    hash,
                )),
                Err(e) => warn!(
                    "Page {}: image '{}' skipped by perceptual dedup: {}",
                    page.index, img.name_img, e
                ),
            }
        }
    }

    let mut marked: BTreeSet<usize> = BTreeSet::new();
    for i in 0..hashed.len() {
        for j in (i + 1)..hashed.len() {
            if marked.contains(&i) && marked.contains(&j) {
                continue;
            }
            let d = distance(&hashed[i].1, &hashed[j].1);
            if d < max_distance {
                debug!(
                    "Images {:?} and {:?} are {} bits apart",
                    hashed[i].0, hashed[j].0, d
                );
                marked.insert(i);
                marked.insert(j);
            }
        }
    }

    marked.into_iter().map(|i| hashed[i].0.clone()).collect()
}

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

/// Whether `text` holds a markdown image reference targeting `name`.
fn references(text: &str, name: &str) -> bool {
    RE_IMAGE.captures_iter(text).any(|caps| &caps[2] == name)
}

/// Remove every markdown image reference targeting `name`.
fn strip_references(text: &str, name: &str) -> String {
    RE_IMAGE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            if &caps[2] == name {
                String::new()
            } else {
                caps[0].to_string()
            }
        })
        .to_string()
}

/// Drop one image from its page and clean the page's paragraphs.
///
/// Returns the indices of paragraphs deleted because they became empty.
fn remove_image(doc: &mut Document, key: &ImageKey) -> Vec<u32> {
    let Some(page) = doc.page_mut(key.page) else {
        return Vec::new();
    };
    if page.remove_image(&key.name).is_none() {
        return Vec::new();
    }
    debug!("Page {}: removed duplicate image '{}'", key.page, key.name);

    let mut emptied = Vec::new();
    for para in page.paragraphs.iter_mut() {
        if !references(&para.content, &key.name) {
            continue;
        }
        para.content = strip_references(&para.content, &key.name).trim().to_string();
        if para.content.is_empty() {
            emptied.push(para.index);
        }
    }
    for index in &emptied {
        page.remove_paragraph(*index);
    }
    emptied
}

/// Deduplicate the normalized checkpoint in place.
///
/// A document already carrying the [`STAGE`] marker is left untouched.
pub fn dedup_stage(
    layout: &DataLayout,
    ctx: &DocumentContext,
    pages: DuplicatePages,
    images: ImageDedup,
) -> Result<StageOutcome, ZoneDocError> {
    let path = layout.normalized(&ctx.city, &ctx.name);
    let mut doc = checkpoint::read_document(&path)?;
    if checkpoint::has_stage(&doc, STAGE) {
        debug!("'{}' already deduplicated", ctx.name);
        return Ok(StageOutcome::AlreadyDone(path));
    }

    let report = deduplicate(&mut doc, pages, images);
    info!(
        "Deduplicated '{}': {} pages, {} images, {} paragraphs removed",
        ctx.name,
        report.removed_pages.len(),
        report.removed_images.len(),
        report.removed_paragraphs.len()
    );

    checkpoint::mark_stage(&mut doc, STAGE);
    doc.touch();
    checkpoint::write_document(&path, &doc)?;
    Ok(StageOutcome::Done(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::{document, image, page};
    use crate::pipeline::phash::tests::gradient_png_base64;

    fn contents(doc: &Document, index: u32) -> Vec<String> {
        doc.page(index)
            .unwrap()
            .paragraphs
            .iter()
            .map(|p| p.content.clone())
            .collect()
    }

    #[test]
    fn identical_pages_keep_lowest_index() {
        let mut doc = document(vec![
            page(1, &["Intro text"], vec![]),
            page(2, &["Article 1"], vec![]),
            page(3, &["Intro text"], vec![]),
        ]);
        let report = deduplicate(&mut doc, DuplicatePages::KeepFirst, ImageDedup::Exact);
        assert_eq!(report.removed_pages, vec![3]);
        assert_eq!(doc.page_indices(), vec![1, 2]);
    }

    #[test]
    fn remove_all_drops_whole_group() {
        let mut doc = document(vec![
            page(1, &["Cover"], vec![]),
            page(2, &["Body"], vec![]),
            page(4, &["Cover"], vec![]),
        ]);
        deduplicate(&mut doc, DuplicatePages::RemoveAll, ImageDedup::Exact);
        assert_eq!(doc.page_indices(), vec![2]);
    }

    #[test]
    fn page_removal_uses_index_not_position() {
        // Non-contiguous indices: position 1 holds index 5.
        let mut doc = document(vec![
            page(2, &["Same"], vec![]),
            page(5, &["Other"], vec![]),
            page(9, &["Same"], vec![]),
        ]);
        deduplicate(&mut doc, DuplicatePages::KeepFirst, ImageDedup::Exact);
        assert_eq!(doc.page_indices(), vec![2, 5]);
        assert_eq!(contents(&doc, 5), vec!["Other"]);
    }

    #[test]
    fn exact_duplicates_removed_everywhere_with_paragraph_cleanup() {
        let mut doc = document(vec![
            page(
                1,
                &[
                    "This paragraph contains ![img1.png](img1.png) reference",
                    "![img1.png](img1.png)",
                    "This paragraph has no image reference",
                ],
                vec![image("img1.png", "duplicate"), image("img2.png", "unique")],
            ),
            page(
                2,
                &["![img1.png](img1.png) and some other text ![img1.png](img1.png)"],
                vec![image("img1.png", "duplicate")],
            ),
        ]);

        let report = deduplicate(&mut doc, DuplicatePages::KeepFirst, ImageDedup::Exact);

        assert_eq!(report.removed_images.len(), 2);
        assert_eq!(report.removed_paragraphs, vec![(1, 2)]);
        assert_eq!(
            contents(&doc, 1),
            vec![
                "This paragraph contains  reference",
                "This paragraph has no image reference"
            ]
        );
        assert_eq!(contents(&doc, 2), vec!["and some other text"]);

        let p1 = doc.page(1).unwrap();
        assert_eq!(p1.images.len(), 1);
        assert_eq!(p1.images[0].name_img, "img2.png");
        assert!(doc.page(2).unwrap().images.is_empty());
        // Surviving paragraph kept its identity.
        assert_eq!(p1.paragraphs[1].index, 3);
    }

    #[test]
    fn images_on_removed_pages_are_skipped_but_still_count() {
        // Pages 1 and 2 are identical, including the image; page 2 goes first,
        // and the image on page 1 still belongs to a group of two.
        let shared = "![logo.png](logo.png)";
        let mut doc = document(vec![
            page(1, &["Header", shared], vec![image("logo.png", "logo")]),
            page(2, &["Header", shared], vec![image("logo.png", "logo")]),
        ]);
        let report = deduplicate(&mut doc, DuplicatePages::KeepFirst, ImageDedup::Exact);
        assert_eq!(report.removed_pages, vec![2]);
        assert_eq!(
            report.removed_images,
            vec![ImageKey {
                page: 1,
                name: "logo.png".into()
            }]
        );
        assert_eq!(contents(&doc, 1), vec!["Header"]);
    }

    #[test]
    fn page_emptied_by_cleanup_is_retained() {
        let token = "![a.png](a.png)";
        let mut doc = document(vec![
            page(1, &[token], vec![image("a.png", "same")]),
            page(2, &["Text", "![b.png](b.png)"], vec![image("b.png", "same")]),
        ]);
        deduplicate(&mut doc, DuplicatePages::KeepFirst, ImageDedup::Exact);
        assert_eq!(doc.page_indices(), vec![1, 2]);
        assert!(doc.page(1).unwrap().paragraphs.is_empty());
        assert_eq!(contents(&doc, 2), vec!["Text"]);
    }

    #[test]
    fn perceptual_marks_both_members_once() {
        let same = gradient_png_base64(true);
        let other = gradient_png_base64(false);
        let mut doc = document(vec![
            page(1, &["A ![x.png](x.png)"], vec![image("x.png", &same)]),
            page(2, &["B ![y.png](y.png)"], vec![image("y.png", &same)]),
            page(3, &["C ![z.png](z.png)"], vec![image("z.png", &same)]),
            page(4, &["D ![w.png](w.png)"], vec![image("w.png", &other)]),
        ]);
        let report = deduplicate(
            &mut doc,
            DuplicatePages::KeepFirst,
            ImageDedup::Perceptual { max_distance: 5 },
        );
        let pages: Vec<u32> = report.removed_images.iter().map(|k| k.page).collect();
        assert_eq!(pages, vec![1, 2, 3]);
        assert_eq!(contents(&doc, 1), vec!["A"]);
        assert_eq!(doc.page(4).unwrap().images.len(), 1);
    }

    #[test]
    fn undecodable_images_survive_perceptual_pass() {
        let mut doc = document(vec![
            page(1, &["a"], vec![image("x.png", "???")]),
            page(2, &["b"], vec![image("y.png", "???")]),
        ]);
        let report = deduplicate(
            &mut doc,
            DuplicatePages::KeepFirst,
            ImageDedup::Perceptual { max_distance: 5 },
        );
        assert!(report.removed_images.is_empty());
    }

    #[test]
    fn no_reference_to_removed_image_remains() {
        let mut doc = document(vec![
            page(1, &["see ![i.png](i.png)", "![Figure 2](i.png) caption"], vec![image("i.png", "d")]),
            page(2, &["again ![i.png](i.png)"], vec![image("i.png", "d")]),
        ]);
        let report = deduplicate(&mut doc, DuplicatePages::KeepFirst, ImageDedup::Exact);
        for key in &report.removed_images {
            for p in &doc.page(key.page).unwrap().paragraphs {
                assert!(!references(&p.content, &key.name), "stale reference in {:?}", p);
            }
        }
    }

    #[test]
    fn second_pass_finds_nothing() {
        let mut doc = document(vec![
            page(1, &["x ![a](a)"], vec![image("a", "d")]),
            page(2, &["x ![a](a)"], vec![image("a", "d")]),
            page(3, &["y"], vec![]),
        ]);
        deduplicate(&mut doc, DuplicatePages::KeepFirst, ImageDedup::Exact);
        let snapshot = doc.clone();
        let report = deduplicate(&mut doc, DuplicatePages::KeepFirst, ImageDedup::Exact);
        assert_eq!(report, DedupReport::default());
        assert_eq!(doc, snapshot);
    }
}
