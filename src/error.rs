//! Error types for the budget-extract library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BudgetError`] is **fatal**: the run cannot proceed at all (missing
//!   input file, provider not configured, bad credentials, abort policy
//!   triggered). Returned as `Err(BudgetError)` from the top-level functions.
//!
//! * [`PageError`] is **non-fatal**: a single page failed (render glitch,
//!   exhausted retries, malformed model reply) but the rest of the run goes
//!   on. Stored inside [`crate::output::PageOutcome`] so the operator can
//!   rerun with `--resume` to pick the page up again.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the budget-extract library.
#[derive(Debug, Error)]
pub enum BudgetError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The page selection matched no page of the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The provider rejected our credentials; retrying other pages is pointless.
    #[error("Authentication error from the model provider: {detail}\nCheck GEMINI_API_KEY.")]
    Unauthorized { detail: String },

    /// A question to the model failed after retries.
    #[error("Model call failed: {detail}")]
    ModelFailed { detail: String },

    /// A page failed and the run was configured to abort on page failure.
    #[error("Aborted at page {page}: {source}")]
    Aborted {
        page: usize,
        #[source]
        source: PageError,
    },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Reading or writing a per-page or combined JSON file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON file on disk does not have the page-record / combined shape.
    #[error("Invalid JSON in '{path}': {detail}")]
    InvalidJson { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BudgetError {
    /// Wrap an I/O error with the path it happened on.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BudgetError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single page.
///
/// The run continues unless `abort_on_failure` is set, in which case the
/// error is wrapped in [`BudgetError::Aborted`].
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation or PNG encoding failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The model kept rate-limiting us until retries ran out.
    #[error("Page {page}: still rate limited after {attempts} attempts")]
    RateLimited { page: usize, attempts: u32 },

    /// The model call failed (after retries for transient failures).
    #[error("Page {page}: model call failed after {retries} retries: {detail}")]
    ModelFailed {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// The model answered, but not with JSON we could repair.
    #[error("Page {page}: could not parse model reply: {detail}")]
    MalformedReply { page: usize, detail: String },

    /// The page record could not be written.
    #[error("Page {page}: could not save record: {detail}")]
    SaveFailed { page: usize, detail: String },
}

impl PageError {
    /// 1-indexed page number the error refers to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::RateLimited { page, .. }
            | PageError::ModelFailed { page, .. }
            | PageError::MalformedReply { page, .. }
            | PageError::SaveFailed { page, .. } => *page,
        }
    }
}
