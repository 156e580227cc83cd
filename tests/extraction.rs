//! Integration tests for the extraction loop.
//!
//! A fake renderer stands in for pdfium and a scripted backend stands in for
//! the model, so these run offline and fast.

use async_trait::async_trait;
use budget_extract::{
    extract_with, load_combined, BackendError, BudgetError, ExtractionConfig, ExtractionProgressCallback,
    ModelBackend, ModelReply, PageError, PageRecord, PageRenderer, PageSelection, PageStatus, PageType,
};
use edgequake_llm::{ChatMessage, CompletionOptions};
use image::{DynamicImage, Rgb, RgbImage};
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test doubles ─────────────────────────────────────────────────────────────

struct FakeRenderer {
    pages: usize,
    rendered: AtomicUsize,
}

impl FakeRenderer {
    fn new(pages: usize) -> Self {
        Self {
            pages,
            rendered: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn page_count(&self) -> Result<usize, BudgetError> {
        Ok(self.pages)
    }

    async fn render_page(&self, _index: usize) -> Result<DynamicImage, PageError> {
        self.rendered.fetch_add(1, Ordering::SeqCst);
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]))))
    }
}

/// Answers from a queue and counts calls.
struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<ModelReply, BackendError>>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn new(replies: Vec<Result<ModelReply, BackendError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    fn ok(replies: Vec<String>) -> Self {
        Self::new(replies.into_iter().map(|r| Ok(ModelReply::text(r))).collect())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<ModelReply, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Rejected("script exhausted".into())))
    }
}

#[derive(Default)]
struct Counting {
    cached: AtomicUsize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    retries: AtomicUsize,
}

impl ExtractionProgressCallback for Counting {
    fn on_page_retry(&self, _: usize, _: u32, _: u64) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_cached(&self, _: usize, _: usize, _: PageType, _: usize) {
        self.cached.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_complete(&self, _: usize, _: usize, _: PageType, _: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_error(&self, _: usize, _: usize, _: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn config(dir: &Path, pages: PageSelection) -> ExtractionConfig {
    ExtractionConfig::builder()
        .input("budget.pdf")
        .pages_dir(dir.join("pages"))
        .output_path(dir.join("budget.json"))
        .pages(pages)
        .max_retries(2)
        .retry_backoff_ms(1)
        .build()
        .unwrap()
}

fn revenue_items() -> Value {
    json!([
        {
            "acct_no": "40101",
            "line_item": "TAXES",
            "category": "REVENUE",
            "fy2024_actual": 137694012,
            "budget_2526_final": 147972729
        },
        {
            "acct_no": "40201",
            "line_item": "LICENSES AND PERMITS",
            "category": "REVENUE",
            "fy2024_actual": 2100000,
            "budget_2526_final": 2250000
        }
    ])
}

fn reply(page_type: &str, items: Value) -> String {
    json!({
        "page_type": page_type,
        "fund": "GENERAL FUND",
        "department": "REVENUE SUMMARY",
        "function": null,
        "items": items,
    })
    .to_string()
}

fn other_reply() -> String {
    reply("other", json!([]))
}

fn read_record(path: &Path) -> PageRecord {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn page_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir.join("pages"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn page_eight_revenue_is_written_verbatim() {
    let tmp = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new(20);
    let backend = ScriptedBackend::ok(vec![format!(
        "```json\n{}\n```",
        reply("revenue", revenue_items())
    )]);
    let config = config(tmp.path(), PageSelection::Single(8));

    let output = extract_with(&renderer, &backend, &config).await.unwrap();

    let path = tmp.path().join("pages/page_008_revenue.json");
    assert!(path.exists());
    let record = read_record(&path);
    assert_eq!(record.source_page, 8);
    assert_eq!(record.page_type, PageType::Revenue);
    assert_eq!(record.fund.as_deref(), Some("GENERAL FUND"));
    assert_eq!(record.items_extracted, 2);
    assert_eq!(serde_json::to_value(&record.items).unwrap(), revenue_items());

    assert_eq!(output.stats.extracted_pages, 1);
    assert_eq!(output.document.total_pages, 1);
    assert_eq!(output.document.total_items, 2);
    assert_eq!(output.document.source_file.as_deref(), Some("budget.pdf"));
    assert_eq!(backend.calls(), 1);
    assert_eq!(renderer.rendered.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn resume_never_calls_the_model_for_existing_pages() {
    let tmp = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new(3);

    let first = ScriptedBackend::ok(vec![
        reply("revenue", revenue_items()),
        other_reply(),
        other_reply(),
    ]);
    extract_with(&renderer, &first, &config(tmp.path(), PageSelection::All))
        .await
        .unwrap();
    assert_eq!(first.calls(), 3);

    let before: Vec<String> = page_files(tmp.path())
        .iter()
        .map(|n| std::fs::read_to_string(tmp.path().join("pages").join(n)).unwrap())
        .collect();

    let second = ScriptedBackend::new(vec![]);
    let counting = Arc::new(Counting::default());
    let mut resumed = config(tmp.path(), PageSelection::All);
    resumed.resume = true;
    resumed.progress_callback = Some(counting.clone() as Arc<dyn ExtractionProgressCallback>);

    let output = extract_with(&renderer, &second, &resumed).await.unwrap();
    assert_eq!(second.calls(), 0);
    assert_eq!(renderer.rendered.load(Ordering::SeqCst), 3);
    assert_eq!(output.stats.cached_pages, 3);
    assert_eq!(counting.cached.load(Ordering::SeqCst), 3);
    assert!(output
        .pages
        .iter()
        .all(|p| matches!(p.status, PageStatus::Cached { .. })));

    let after: Vec<String> = page_files(tmp.path())
        .iter()
        .map(|n| std::fs::read_to_string(tmp.path().join("pages").join(n)).unwrap())
        .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn resume_fills_only_missing_pages() {
    let tmp = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new(5);

    let first = ScriptedBackend::ok(vec![other_reply()]);
    extract_with(&renderer, &first, &config(tmp.path(), PageSelection::Single(2)))
        .await
        .unwrap();

    let second = ScriptedBackend::ok(vec![other_reply(), other_reply()]);
    let mut resumed = config(tmp.path(), PageSelection::First(3));
    resumed.resume = true;
    let output = extract_with(&renderer, &second, &resumed).await.unwrap();

    assert_eq!(second.calls(), 2);
    assert_eq!(output.stats.extracted_pages, 2);
    assert_eq!(output.stats.cached_pages, 1);
    assert_eq!(
        page_files(tmp.path()),
        vec!["page_001_other.json", "page_002_other.json", "page_003_other.json"]
    );
}

#[tokio::test]
async fn malformed_reply_skips_page_and_run_continues() {
    let tmp = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new(3);
    let backend = ScriptedBackend::ok(vec![
        "This is not JSON at all!!! ###".to_string(),
        reply("revenue", revenue_items()),
        other_reply(),
    ]);
    let counting = Arc::new(Counting::default());
    let mut config = config(tmp.path(), PageSelection::All);
    // Malformed replies are skipped even when failures abort.
    config.abort_on_failure = true;
    config.progress_callback = Some(counting.clone() as Arc<dyn ExtractionProgressCallback>);

    let output = extract_with(&renderer, &backend, &config).await.unwrap();

    assert_eq!(backend.calls(), 3);
    assert_eq!(output.stats.failed_pages, 1);
    assert_eq!(output.stats.extracted_pages, 2);
    assert!(matches!(
        output.pages[0].error(),
        Some(PageError::MalformedReply { page: 1, .. })
    ));
    assert_eq!(counting.errors.load(Ordering::SeqCst), 1);
    assert_eq!(counting.completed.load(Ordering::SeqCst), 2);

    assert_eq!(
        page_files(tmp.path()),
        vec!["page_002_revenue.json", "page_003_other.json"]
    );
    let kept = std::fs::read_to_string(tmp.path().join("pages/review/page_001.txt")).unwrap();
    assert_eq!(kept, "This is not JSON at all!!! ###");
}

#[tokio::test]
async fn rate_limit_then_success_is_retried() {
    let tmp = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new(1);
    let backend = ScriptedBackend::new(vec![
        Err(BackendError::classify("429 RESOURCE_EXHAUSTED")),
        Ok(ModelReply::text(other_reply())),
    ]);
    let counting = Arc::new(Counting::default());
    let mut config = config(tmp.path(), PageSelection::All);
    config.progress_callback = Some(counting.clone() as Arc<dyn ExtractionProgressCallback>);

    let output = extract_with(&renderer, &backend, &config).await.unwrap();

    assert_eq!(backend.calls(), 2);
    assert_eq!(output.pages[0].retries, 1);
    assert!(output.pages[0].is_success());
    assert_eq!(counting.retries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_retries_skip_page_by_default() {
    let tmp = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new(2);
    let mut replies: Vec<Result<ModelReply, BackendError>> = (0..3)
        .map(|_| Err(BackendError::RateLimited("429".into())))
        .collect();
    replies.push(Ok(ModelReply::text(other_reply())));
    let backend = ScriptedBackend::new(replies);

    let output = extract_with(&renderer, &backend, &config(tmp.path(), PageSelection::All))
        .await
        .unwrap();

    // 1 + max_retries attempts on page 1, then page 2 succeeds.
    assert_eq!(backend.calls(), 4);
    assert!(matches!(
        output.pages[0].error(),
        Some(PageError::RateLimited { page: 1, attempts: 3 })
    ));
    assert!(output.pages[1].is_success());
    assert_eq!(page_files(tmp.path()), vec!["page_002_other.json"]);
    assert!(tmp.path().join("budget.json").exists());
}

#[tokio::test]
async fn exhausted_retries_abort_when_configured() {
    let tmp = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new(2);
    let backend = ScriptedBackend::new(
        (0..10)
            .map(|_| Err(BackendError::Transient("503 UNAVAILABLE".into())))
            .collect(),
    );
    let mut config = config(tmp.path(), PageSelection::All);
    config.abort_on_failure = true;

    let err = extract_with(&renderer, &backend, &config).await.unwrap_err();

    assert!(matches!(
        err,
        BudgetError::Aborted {
            page: 1,
            source: PageError::ModelFailed { retries: 2, .. }
        }
    ));
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn rejected_request_is_not_retried() {
    let tmp = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new(1);
    let backend = ScriptedBackend::new(vec![
        Err(BackendError::Rejected("400 INVALID_ARGUMENT".into())),
        Ok(ModelReply::text(other_reply())),
    ]);

    let output = extract_with(&renderer, &backend, &config(tmp.path(), PageSelection::All))
        .await
        .unwrap();

    assert_eq!(backend.calls(), 1);
    assert!(matches!(
        output.pages[0].error(),
        Some(PageError::ModelFailed { retries: 0, .. })
    ));
}

#[tokio::test]
async fn unauthorized_aborts_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new(3);
    let backend = ScriptedBackend::new(vec![Err(BackendError::classify("401 API key not valid"))]);

    let err = extract_with(&renderer, &backend, &config(tmp.path(), PageSelection::All))
        .await
        .unwrap_err();

    assert!(matches!(err, BudgetError::Unauthorized { .. }));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn empty_selection_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new(5);
    let backend = ScriptedBackend::new(vec![]);

    let err = extract_with(&renderer, &backend, &config(tmp.path(), PageSelection::Single(9)))
        .await
        .unwrap_err();

    assert!(matches!(err, BudgetError::PageOutOfRange { page: 9, total: 5 }));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn combined_document_has_one_record_per_page() {
    let tmp = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer::new(3);

    let first = ScriptedBackend::ok(vec![
        reply("revenue", revenue_items()),
        other_reply(),
        other_reply(),
    ]);
    extract_with(&renderer, &first, &config(tmp.path(), PageSelection::All))
        .await
        .unwrap();

    // Re-extract page 2; the model now calls it a staffing page.
    let staffing = reply("staffing", json!([{ "line_item": "POLICE OFFICER", "budget_2526_final": 40 }]));
    let second = ScriptedBackend::ok(vec![staffing]);
    extract_with(&renderer, &second, &config(tmp.path(), PageSelection::Single(2)))
        .await
        .unwrap();

    assert_eq!(
        page_files(tmp.path()),
        vec!["page_001_revenue.json", "page_002_staffing.json", "page_003_other.json"]
    );

    let doc = load_combined(&tmp.path().join("budget.json")).await.unwrap();
    let pages: Vec<usize> = doc.pages.iter().map(|p| p.source_page).collect();
    assert_eq!(pages, vec![1, 2, 3]);
    let unique: HashSet<usize> = pages.iter().copied().collect();
    assert_eq!(unique.len(), pages.len());
    assert_eq!(doc.page(2).map(|p| p.page_type), Some(PageType::Staffing));
    assert_eq!(doc.total_items, 3);
    assert_eq!(doc.pages_manifest.len(), 3);

    for name in page_files(tmp.path()) {
        let record = read_record(&tmp.path().join("pages").join(&name));
        assert_eq!(record.items_extracted, record.items.len(), "{name}");
    }
}

#[tokio::test]
async fn stray_page_files_do_not_block_the_combined_document() {
    let tmp = tempfile::tempdir().unwrap();
    let pages = tmp.path().join("pages");
    std::fs::create_dir_all(&pages).unwrap();
    std::fs::write(
        pages.join("page_003_cover.json"),
        json!({
            "source_page": 3,
            "page_type": "cover",
            "fund": null,
            "department": null,
            "function": null,
            "items_extracted": 0,
            "items": []
        })
        .to_string(),
    )
    .unwrap();
    std::fs::write(pages.join("page_004_revenue.json"), "{ truncated").unwrap();

    let renderer = FakeRenderer::new(5);
    let backend = ScriptedBackend::ok(vec![reply("revenue", revenue_items())]);
    let output = extract_with(&renderer, &backend, &config(tmp.path(), PageSelection::Single(1)))
        .await
        .unwrap();

    let combined: Vec<(usize, PageType)> = output
        .document
        .pages
        .iter()
        .map(|p| (p.source_page, p.page_type))
        .collect();
    assert_eq!(combined, vec![(1, PageType::Revenue), (3, PageType::Other)]);
    assert!(tmp.path().join("budget.json").exists());
}

#[tokio::test]
async fn corrupt_resumed_page_that_fails_again_is_left_out() {
    let tmp = tempfile::tempdir().unwrap();
    let pages = tmp.path().join("pages");
    std::fs::create_dir_all(&pages).unwrap();
    std::fs::write(pages.join("page_002_revenue.json"), "not json").unwrap();

    let renderer = FakeRenderer::new(3);
    let backend = ScriptedBackend::new(vec![
        Ok(ModelReply::text(other_reply())),
        Err(BackendError::Rejected("bad request".into())),
    ]);
    let mut resumed = config(tmp.path(), PageSelection::First(2));
    resumed.resume = true;

    let output = extract_with(&renderer, &backend, &resumed).await.unwrap();

    assert_eq!(backend.calls(), 2);
    assert_eq!(output.stats.extracted_pages, 1);
    assert_eq!(output.stats.failed_pages, 1);
    let combined: Vec<usize> = output.document.pages.iter().map(|p| p.source_page).collect();
    assert_eq!(combined, vec![1]);
    assert!(tmp.path().join("budget.json").exists());
}
