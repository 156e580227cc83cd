//! Result types returned by an extraction run.

use crate::error::PageError;
use crate::record::{CombinedDocument, PageType};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What happened to one selected page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageStatus {
    /// Extracted by the model and written to `path`.
    Extracted {
        page_type: PageType,
        items: usize,
        path: PathBuf,
    },
    /// Loaded from an existing per-page file; the model was not called.
    Cached {
        page_type: PageType,
        items: usize,
        path: PathBuf,
    },
    /// Skipped. Rerun with `--resume` to try it again.
    Failed { error: PageError },
}

/// Per-page outcome, in page order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageOutcome {
    /// 1-indexed page number.
    pub page_num: usize,
    pub status: PageStatus,
    /// Retries spent on the model call (0 for cached pages).
    pub retries: u32,
    pub duration_ms: u64,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl PageOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self.status, PageStatus::Failed { .. })
    }

    pub fn error(&self) -> Option<&PageError> {
        match &self.status {
            PageStatus::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Aggregate numbers for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Pages in the PDF.
    pub document_pages: usize,
    /// Pages the selection picked.
    pub selected_pages: usize,
    pub extracted_pages: usize,
    pub cached_pages: usize,
    pub failed_pages: usize,
    pub total_items: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

/// Everything an extraction run produced.
#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    /// The combined document rebuilt from every per-page file on disk.
    pub document: CombinedDocument,
    pub pages: Vec<PageOutcome>,
    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    /// Failed pages, for the end-of-run summary.
    pub fn failures(&self) -> impl Iterator<Item = &PageError> {
        self.pages.iter().filter_map(PageOutcome::error)
    }
}
