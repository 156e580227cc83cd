//! # budget-extract
//!
//! Turn a scanned municipal budget book (PDF) into structured JSON with a
//! vision model, one page at a time, then query it.
//!
//! ## Why per-page files?
//!
//! A 300-page budget takes hours against a rate-limited model API. Every page
//! is written to its own JSON file the moment it is extracted, so a crash,
//! a quota wall, or Ctrl-C costs one page, and `--resume` skips everything
//! already on disk. The combined document is only ever a merge of those files.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    resolve local file or download from URL
//!  ├─ 2. Render   rasterise one page via pdfium (spawn_blocking)
//!  ├─ 3. Encode   PNG → base64 ImageData
//!  ├─ 4. Model    extraction prompt + image, retried with backoff
//!  ├─ 5. Parse    strip fences, repair truncation, validate
//!  ├─ 6. Store    page_{NNN}_{type}.json (atomic write)
//!  └─ 7. Merge    combined budget.json → insights, report, agent
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use budget_extract::{extract, ExtractionConfig, PageSelection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Gemini by default; reads GEMINI_API_KEY.
//!     let config = ExtractionConfig::builder()
//!         .input("data/raw/budget.pdf")
//!         .pages(PageSelection::Range(3, 15))
//!         .resume(true)
//!         .build()?;
//!     let output = extract(&config).await?;
//!     eprintln!(
//!         "{} pages, {} items ({} failed)",
//!         output.document.total_pages,
//!         output.document.total_items,
//!         output.stats.failed_pages
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `budget-extract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! budget-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod agent;
pub mod aggregate;
pub mod config;
pub mod error;
pub mod extract;
pub mod insights;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod report;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use agent::BudgetAgent;
pub use aggregate::{load_combined, merge_records, rebuild_combined};
pub use config::{ExtractionConfig, ExtractionConfigBuilder, PageSelection};
pub use error::{BudgetError, PageError};
pub use extract::{extract, extract_with};
pub use output::{ExtractionOutput, ExtractionStats, PageOutcome, PageStatus};
pub use pipeline::llm::{BackendError, ModelBackend, ModelReply};
pub use pipeline::render::{PageRenderer, PdfiumRenderer};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use record::{Column, CombinedDocument, LineItem, PageMetadata, PageRecord, PageType};
pub use report::{render_report, ReportOptions};
pub use store::PageStore;
