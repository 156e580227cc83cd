//! Configuration types for budget extraction runs.
//!
//! All run behaviour is controlled through [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. Every knob lives in one struct so the CLI,
//! tests, and library callers share the same defaults.

use crate::error::BudgetError;
use crate::pipeline::llm::ModelBackend;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default location of the source budget PDF.
pub const DEFAULT_PDF_PATH: &str = "data/raw/budget.pdf";
/// Default directory holding one JSON file per processed page.
pub const DEFAULT_PAGES_DIR: &str = "data/processed/pages";
/// Default location of the combined document.
pub const DEFAULT_OUTPUT_PATH: &str = "data/processed/budget.json";
/// Provider used when none is named.
pub const DEFAULT_PROVIDER: &str = "gemini";
/// Model used when none is named.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Configuration for an extraction run.
///
/// # Example
/// ```rust
/// use budget_extract::{ExtractionConfig, PageSelection};
///
/// let config = ExtractionConfig::builder()
///     .pages(PageSelection::First(10))
///     .resume(true)
///     .build()
///     .unwrap();
/// assert!(config.resume);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Source PDF: a local path or an HTTP/HTTPS URL.
    pub input: String,

    /// Directory of per-page JSON files (the durable source of truth).
    pub pages_dir: PathBuf,

    /// Combined document written after every run.
    pub output_path: PathBuf,

    /// Which pages to process. Default: all.
    pub pages: PageSelection,

    /// Skip pages that already have a per-page file. Default: false.
    pub resume: bool,

    /// Rendering DPI. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Cap on either rendered edge in pixels. Default: 3000.
    ///
    /// Budget pages are letter-sized, so 150 DPI stays well below the cap;
    /// it only bites on oversized fold-out schedules.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// LLM provider name understood by `edgequake-llm`. Default: "gemini".
    pub provider_name: Option<String>,

    /// Model identifier. Default: "gemini-2.5-flash".
    pub model: Option<String>,

    /// Pre-built backend. Takes precedence over `provider_name`.
    pub backend: Option<Arc<dyn ModelBackend>>,

    /// Sampling temperature. Default: 0.0 (transcription, not creativity).
    pub temperature: f32,

    /// Maximum output tokens per page. Default: 65536.
    ///
    /// Dense expense pages return hundreds of rows; a low cap truncates the
    /// JSON mid-array, which the parser can only sometimes repair.
    pub max_tokens: usize,

    /// Custom extraction prompt. If None, uses the built-in budget prompt.
    pub system_prompt: Option<String>,

    /// Retries per page on rate-limit or transient failure. Default: 4.
    pub max_retries: u32,

    /// Base delay before the first retry, doubled per attempt. Default: 5000.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 300.
    pub api_timeout_secs: u64,

    /// Abort the run when a page exhausts its retries. Default: false (skip).
    pub abort_on_failure: bool,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Receives per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            input: DEFAULT_PDF_PATH.to_string(),
            pages_dir: PathBuf::from(DEFAULT_PAGES_DIR),
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            pages: PageSelection::default(),
            resume: false,
            dpi: 150,
            max_rendered_pixels: 3000,
            password: None,
            provider_name: None,
            model: None,
            backend: None,
            temperature: 0.0,
            max_tokens: 65536,
            system_prompt: None,
            max_retries: 4,
            retry_backoff_ms: 5000,
            api_timeout_secs: 300,
            abort_on_failure: false,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("input", &self.input)
            .field("pages_dir", &self.pages_dir)
            .field("output_path", &self.output_path)
            .field("pages", &self.pages)
            .field("resume", &self.resume)
            .field("dpi", &self.dpi)
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("backend", &self.backend.as_ref().map(|_| "<dyn ModelBackend>"))
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("abort_on_failure", &self.abort_on_failure)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Provider name after defaults are applied.
    pub fn provider_or_default(&self) -> &str {
        self.provider_name.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }

    /// Model name after defaults are applied.
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Directory where unparseable replies are kept for manual review.
    pub fn review_dir(&self) -> PathBuf {
        self.pages_dir.join("review")
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.config.input = input.into();
        self
    }

    pub fn pages_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pages_dir = dir.into();
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_path = path.into();
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn resume(mut self, v: bool) -> Self {
        self.config.resume = v;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn abort_on_failure(mut self, v: bool) -> Self {
        self.config.abort_on_failure = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, BudgetError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(BudgetError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.max_tokens == 0 {
            return Err(BudgetError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(BudgetError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.input.trim().is_empty() {
            return Err(BudgetError::InvalidConfig("input path is empty".into()));
        }
        Ok(self.config)
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// Specifies which pages of the PDF to process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Process all pages (default).
    #[default]
    All,
    /// Process the first N pages.
    First(usize),
    /// Process a single page (1-indexed).
    Single(usize),
    /// Process a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Process specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::First(n) => (0..(*n).min(total_pages)).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// First page the selection names, for error messages.
    pub fn first_requested(&self) -> usize {
        match self {
            PageSelection::All | PageSelection::First(_) => 1,
            PageSelection::Single(p) => *p,
            PageSelection::Range(s, _) => *s,
            PageSelection::Set(pages) => pages.iter().copied().min().unwrap_or(1),
        }
    }
}
