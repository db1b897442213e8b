//! Pipeline stages for document normalization and zone segmentation.
//!
//! Each submodule implements exactly one transformation step and owns its
//! checkpoint. Collaborators with side effects (OCR, rendering, the LLM
//! classifier) sit behind traits so every stage can be tested with stubs.
//!
//! ## Data Flow
//!
//! ```text
//! OCR result ──▶ normalize ──▶ dedup ──▶ tables ──▶ segment
//!  (2.ocr/)       (3.raw/)    (3.raw/)  (3.raw/)   (4.interim/, 7.render/)
//! ```
//!
//! 1. [`normalize`]: raw per-page OCR output to a [`crate::Document`]
//! 2. [`dedup`]:     drop repeated pages and images, clean stale references;
//!    [`phash`] provides the perceptual hashes
//! 3. [`tables`]:    replace markdown tables with page renders from
//!    [`render`]
//! 4. [`segment`]:   one child document per zone found by [`classify`]
//!
//! Stages 2 and 3 rewrite the `3.raw/` checkpoint in place and record
//! themselves in `model_metadata["stages"]` so a re-run skips them.

pub mod classify;
pub mod dedup;
pub mod normalize;
pub mod phash;
pub mod render;
pub mod segment;
pub mod tables;
