//! The extraction loop: page range → per-page files → combined document.
//!
//! Pages are processed strictly one at a time. Each page is rendered,
//! encoded, sent to the model, parsed, and written to its own file before the
//! next one starts, so an interrupted run loses at most the page in flight
//! and `--resume` picks up where it stopped.
//!
//! Failure policy per page:
//!
//! | Failure | Effect |
//! |---------|--------|
//! | malformed reply | page skipped, raw reply kept under `review/` |
//! | retries exhausted / rejected request | page skipped, or run aborted with `abort_on_failure` |
//! | render or save failure | page skipped, or run aborted with `abort_on_failure` |
//! | unauthorized | run aborted |

use crate::aggregate;
use crate::config::ExtractionConfig;
use crate::error::{BudgetError, PageError};
use crate::output::{ExtractionOutput, ExtractionStats, PageOutcome, PageStatus};
use crate::pipeline::llm::{self, BackendError, CallFailure, ModelBackend};
use crate::pipeline::render::{PageRenderer, PdfiumRenderer};
use crate::pipeline::{encode, input, parse};
use crate::record::PageRecord;
use crate::store::PageStore;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Run an extraction over the configured PDF.
///
/// Returns `Ok` even when some pages were skipped; check
/// `output.stats.failed_pages`.
///
/// # Errors
/// Fatal conditions only: unreadable input, a page selection that matches
/// nothing, a provider that is not configured or rejects the credentials,
/// and a page failure while `abort_on_failure` is set.
pub async fn extract(config: &ExtractionConfig) -> Result<ExtractionOutput, BudgetError> {
    info!("Starting extraction: {}", config.input);
    let resolved = input::resolve_input(&config.input, config.download_timeout_secs).await?;
    let renderer = PdfiumRenderer::new(
        resolved.path(),
        config.dpi,
        config.max_rendered_pixels,
        config.password.clone(),
    );
    let backend = llm::resolve_backend(config)?;
    extract_with(&renderer, backend.as_ref(), config).await
}

/// Run the extraction loop over explicit renderer and model seams.
pub async fn extract_with(
    renderer: &dyn PageRenderer,
    backend: &dyn ModelBackend,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, BudgetError> {
    let run_start = Instant::now();
    let document_pages = renderer.page_count().await?;

    let indices = config.pages.to_indices(document_pages);
    if indices.is_empty() {
        return Err(BudgetError::PageOutOfRange {
            page: config.pages.first_requested(),
            total: document_pages,
        });
    }
    let selected = indices.len();
    info!("Processing {} of {} pages", selected, document_pages);

    let store = PageStore::new(&config.pages_dir);
    store.ensure_dir().await?;
    let existing: BTreeMap<usize, PathBuf> = if config.resume {
        let found = store.scan().await?;
        info!("Resume: {} page file(s) already on disk", found.len());
        found
    } else {
        BTreeMap::new()
    };

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(selected);
    }

    let mut outcomes = Vec::with_capacity(selected);
    for index in indices {
        let page_num = index + 1;
        let page_start = Instant::now();

        if let Some(path) = existing.get(&page_num) {
            match store.load(path).await {
                Ok(record) => {
                    debug!("Page {}: cached ({})", page_num, path.display());
                    if let Some(ref cb) = config.progress_callback {
                        cb.on_page_cached(page_num, selected, record.page_type, record.items_extracted);
                    }
                    outcomes.push(PageOutcome {
                        page_num,
                        status: PageStatus::Cached {
                            page_type: record.page_type,
                            items: record.items_extracted,
                            path: path.clone(),
                        },
                        retries: 0,
                        duration_ms: page_start.elapsed().as_millis() as u64,
                        input_tokens: 0,
                        output_tokens: 0,
                    });
                    continue;
                }
                Err(e) => warn!("Page {}: existing file unusable, extracting again: {}", page_num, e),
            }
        }

        if let Some(ref cb) = config.progress_callback {
            cb.on_page_start(page_num, selected);
        }

        match extract_page(renderer, backend, &store, page_num, config).await {
            Ok(done) => {
                info!(
                    "Page {}: {}, {} item(s) ({})",
                    page_num,
                    done.record.page_type,
                    done.record.items_extracted,
                    done.record.label()
                );
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_complete(page_num, selected, done.record.page_type, done.record.items_extracted);
                }
                outcomes.push(PageOutcome {
                    page_num,
                    status: PageStatus::Extracted {
                        page_type: done.record.page_type,
                        items: done.record.items_extracted,
                        path: done.path,
                    },
                    retries: done.retries,
                    duration_ms: page_start.elapsed().as_millis() as u64,
                    input_tokens: done.input_tokens,
                    output_tokens: done.output_tokens,
                });
            }
            Err(PageFailure::Fatal(e)) => return Err(e),
            Err(PageFailure::Skip { error, retries }) => {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_error(page_num, selected, &error.to_string());
                }
                if config.abort_on_failure && !matches!(error, PageError::MalformedReply { .. }) {
                    error!("{} (aborting run)", error);
                    return Err(BudgetError::Aborted {
                        page: page_num,
                        source: error,
                    });
                }
                warn!("{} (skipped)", error);
                outcomes.push(PageOutcome {
                    page_num,
                    status: PageStatus::Failed { error },
                    retries,
                    duration_ms: page_start.elapsed().as_millis() as u64,
                    input_tokens: 0,
                    output_tokens: 0,
                });
            }
        }
    }

    let document = aggregate::rebuild_combined(&store, &config.output_path, Some(config.input.clone())).await?;

    let count = |f: fn(&PageStatus) -> bool| outcomes.iter().filter(|o| f(&o.status)).count();
    let stats = ExtractionStats {
        document_pages,
        selected_pages: selected,
        extracted_pages: count(|s| matches!(s, PageStatus::Extracted { .. })),
        cached_pages: count(|s| matches!(s, PageStatus::Cached { .. })),
        failed_pages: count(|s| matches!(s, PageStatus::Failed { .. })),
        total_items: document.total_items,
        total_input_tokens: outcomes.iter().map(|o| o.input_tokens as u64).sum(),
        total_output_tokens: outcomes.iter().map(|o| o.output_tokens as u64).sum(),
        total_duration_ms: run_start.elapsed().as_millis() as u64,
    };

    info!(
        "Extraction complete: {} extracted, {} cached, {} failed, {}ms",
        stats.extracted_pages, stats.cached_pages, stats.failed_pages, stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(selected, stats.extracted_pages + stats.cached_pages);
    }

    Ok(ExtractionOutput {
        document,
        pages: outcomes,
        stats,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

struct ExtractedPage {
    record: PageRecord,
    path: PathBuf,
    retries: u32,
    input_tokens: usize,
    output_tokens: usize,
}

enum PageFailure {
    Skip { error: PageError, retries: u32 },
    Fatal(BudgetError),
}

impl From<PageError> for PageFailure {
    fn from(error: PageError) -> Self {
        PageFailure::Skip { error, retries: 0 }
    }
}

/// Render → encode → model → parse → write for one page.
async fn extract_page(
    renderer: &dyn PageRenderer,
    backend: &dyn ModelBackend,
    store: &PageStore,
    page_num: usize,
    config: &ExtractionConfig,
) -> Result<ExtractedPage, PageFailure> {
    let image = renderer.render_page(page_num - 1).await?;
    debug!("Page {}: rendered {}x{}", page_num, image.width(), image.height());
    let image_data = encode::encode_page(page_num, &image)?;
    drop(image);

    let on_retry = |attempt: u32, wait_ms: u64| {
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_retry(page_num, attempt, wait_ms);
        }
    };
    let answered = llm::request_page(backend, page_num, image_data, config, on_retry)
        .await
        .map_err(|failure| call_failure(page_num, failure))?;
    let retries = answered.retries;

    let parsed = match parse::parse_reply(page_num, &answered.reply.content) {
        Ok(parsed) => parsed,
        Err(error) => {
            error!("{}", error);
            match store
                .save_for_review(&config.review_dir(), page_num, &answered.reply.content)
                .await
            {
                Ok(path) => info!("Page {}: raw reply kept at {}", page_num, path.display()),
                Err(e) => warn!("Page {}: could not keep raw reply: {}", page_num, e),
            }
            return Err(PageFailure::Skip { error, retries });
        }
    };

    let record = PageRecord::new(page_num, parsed.page_type, parsed.metadata, parsed.items);
    let path = store.write(&record).await.map_err(|e| PageFailure::Skip {
        error: PageError::SaveFailed {
            page: page_num,
            detail: e.to_string(),
        },
        retries,
    })?;

    Ok(ExtractedPage {
        record,
        path,
        retries,
        input_tokens: answered.reply.input_tokens,
        output_tokens: answered.reply.output_tokens,
    })
}

fn call_failure(page_num: usize, failure: CallFailure) -> PageFailure {
    let retries = failure.attempts.saturating_sub(1);
    let error = match failure.error {
        BackendError::Unauthorized(detail) => {
            return PageFailure::Fatal(BudgetError::Unauthorized { detail });
        }
        BackendError::RateLimited(_) => PageError::RateLimited {
            page: page_num,
            attempts: failure.attempts,
        },
        BackendError::Transient(detail) | BackendError::Rejected(detail) => PageError::ModelFailed {
            page: page_num,
            retries,
            detail,
        },
    };
    PageFailure::Skip { error, retries }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(error: BackendError, attempts: u32) -> CallFailure {
        CallFailure { error, attempts }
    }

    #[test]
    fn unauthorized_is_fatal() {
        let f = call_failure(3, failure(BackendError::Unauthorized("401".into()), 1));
        assert!(matches!(f, PageFailure::Fatal(BudgetError::Unauthorized { .. })));
    }

    #[test]
    fn exhausted_rate_limit_maps_to_page_error() {
        match call_failure(3, failure(BackendError::RateLimited("429".into()), 5)) {
            PageFailure::Skip { error, retries } => {
                assert!(matches!(error, PageError::RateLimited { page: 3, attempts: 5 }));
                assert_eq!(retries, 4);
            }
            PageFailure::Fatal(e) => panic!("unexpected fatal: {e}"),
        }
    }

    #[test]
    fn rejected_maps_to_model_failed() {
        match call_failure(7, failure(BackendError::Rejected("400 bad".into()), 1)) {
            PageFailure::Skip { error, retries } => {
                assert_eq!(retries, 0);
                match error {
                    PageError::ModelFailed { page, detail, .. } => {
                        assert_eq!(page, 7);
                        assert_eq!(detail, "400 bad");
                    }
                    other => panic!("unexpected {other}"),
                }
            }
            PageFailure::Fatal(e) => panic!("unexpected fatal: {e}"),
        }
    }
}
