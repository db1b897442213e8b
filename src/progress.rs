//! Progress-callback trait for per-document batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::batch::Pipeline::with_progress`] to receive events as the batch
//! driver works through its documents. The library knows nothing about how
//! the host reports progress: the CLI drives an `indicatif` bar, tests count
//! events.
//!
//! # Example
//!
//! ```rust
//! use zonedoc::BatchProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct FailureCounter(AtomicUsize);
//!
//! impl BatchProgressCallback for FailureCounter {
//!     fn on_document_error(&self, _doc: usize, _total: usize, name: &str, error: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{name}: {error}");
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by [`crate::batch::Pipeline::run_batch`] around each document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Document numbers are 1-indexed positions in the
/// batch.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first document.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called before the first stage of a document runs.
    fn on_document_start(&self, doc_num: usize, total_documents: usize, name: &str) {
        let _ = (doc_num, total_documents, name);
    }

    /// Called when every stage of a document succeeded or was already done.
    fn on_document_complete(&self, doc_num: usize, total_documents: usize, name: &str) {
        let _ = (doc_num, total_documents, name);
    }

    /// Called when a document was abandoned on a fatal error.
    fn on_document_error(&self, doc_num: usize, total_documents: usize, name: &str, error: &str) {
        let _ = (doc_num, total_documents, name, error);
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let _ = (total_documents, success_count);
    }
}

/// A no-op implementation, the default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type stored in [`crate::batch::Pipeline`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
