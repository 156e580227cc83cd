//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the run walks through the page range. The CLI uses this to drive
//! its progress bar; library callers can forward events anywhere.
//!
//! # Example
//!
//! ```rust
//! use budget_extract::{ExtractionConfig, ExtractionProgressCallback, PageType};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     items: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, _page: usize, _total: usize, _t: PageType, items: usize) {
//!         self.items.fetch_add(items, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { items: AtomicUsize::new(0) });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::record::PageType;
use std::sync::Arc;

/// Called by the extraction loop as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once, after the page range is known.
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called before a page is rendered and sent to the model.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called before each retry of a rate-limited or transient failure.
    fn on_page_retry(&self, page_num: usize, attempt: u32, wait_ms: u64) {
        let _ = (page_num, attempt, wait_ms);
    }

    /// Called when a page was loaded from its existing file (resume).
    fn on_page_cached(&self, page_num: usize, total_pages: usize, page_type: PageType, items: usize) {
        let _ = (page_num, total_pages, page_type, items);
    }

    /// Called when a page was extracted and saved.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, page_type: PageType, items: usize) {
        let _ = (page_num, total_pages, page_type, items);
    }

    /// Called when a page is skipped because of an error.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after all pages have been attempted.
    fn on_run_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
