//! Progress-callback trait for batch processing.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::extract::BatchOptions::progress`] to receive an event as each
//! document starts and finishes. Documents run concurrently, so methods
//! may be called from several tasks at once; implementations protect any
//! shared state themselves (`AtomicUsize`, `Mutex`).
//!
//! # Example
//!
//! ```rust
//! use tei2md::BatchProgressCallback;
//! use std::path::Path;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! impl BatchProgressCallback for Counter {
//!     fn on_document_complete(&self, _index: usize, _total: usize, path: &Path) {
//!         let done = self.0.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{} done ({} so far)", path.display(), done);
//!     }
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the batch runner around each document.
///
/// All methods default to no-ops. `index` is 0-based in submission order;
/// completion order is not guaranteed.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any document starts.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    fn on_document_start(&self, index: usize, total: usize, path: &Path) {
        let _ = (index, total, path);
    }

    fn on_document_complete(&self, index: usize, total: usize, path: &Path) {
        let _ = (index, total, path);
    }

    /// Called when a document fails or is cancelled.
    fn on_document_error(&self, index: usize, total: usize, path: &Path, error: &str) {
        let _ = (index, total, path, error);
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        let _ = (total, succeeded);
    }
}

/// A callback that ignores every event.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        started: AtomicUsize,
        completed: AtomicUsize,
        errors: AtomicUsize,
        succeeded: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_document_start(&self, _index: usize, _total: usize, _path: &Path) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _index: usize, _total: usize, _path: &Path) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_error(&self, _index: usize, _total: usize, _path: &Path, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total: usize, succeeded: usize) {
            self.succeeded.store(succeeded, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(2);
        cb.on_document_start(0, 2, Path::new("a.pdf"));
        cb.on_document_error(1, 2, Path::new("b.pdf"), "GROBID down");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let t = TrackingCallback::default();
        t.on_document_start(0, 2, Path::new("a.pdf"));
        t.on_document_complete(0, 2, Path::new("a.pdf"));
        t.on_document_start(1, 2, Path::new("b.pdf"));
        t.on_document_error(1, 2, Path::new("b.pdf"), "bad TEI");
        t.on_batch_complete(2, 1);

        assert_eq!(t.started.load(Ordering::SeqCst), 2);
        assert_eq!(t.completed.load(Ordering::SeqCst), 1);
        assert_eq!(t.errors.load(Ordering::SeqCst), 1);
        assert_eq!(t.succeeded.load(Ordering::SeqCst), 1);
    }
}
