//! Aggregation: per-page records → one combined document.
//!
//! The combined file is a derived cache. It is rebuilt by concatenating every
//! per-page file in page order and can be regenerated at any time with
//! `budget-extract merge`.

use crate::error::BudgetError;
use crate::record::{CombinedDocument, ManifestEntry, PageRecord};
use crate::store::{write_atomic, PageStore};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Merge records into a combined document, one record per `source_page`.
///
/// Records are ordered by page; when a page appears more than once the later
/// record in `records` wins.
pub fn merge_records(records: Vec<PageRecord>, source_file: Option<String>) -> CombinedDocument {
    let mut by_page: BTreeMap<usize, PageRecord> = BTreeMap::new();
    for mut record in records {
        record.normalize();
        let page = record.source_page;
        if by_page.insert(page, record).is_some() {
            warn!("Page {}: duplicate record, keeping the latest", page);
        }
    }

    let pages: Vec<PageRecord> = by_page.into_values().collect();
    CombinedDocument {
        source_file,
        total_pages: pages.len(),
        total_items: pages.iter().map(|p| p.items_extracted).sum(),
        pages_manifest: pages.iter().map(ManifestEntry::from).collect(),
        pages,
    }
}

/// Rebuild the combined document from every per-page file and write it.
pub async fn rebuild_combined(
    store: &PageStore,
    output_path: &Path,
    source_file: Option<String>,
) -> Result<CombinedDocument, BudgetError> {
    let records = store.load_all().await?;
    let document = merge_records(records, source_file);
    write_combined(&document, output_path).await?;
    info!(
        "Combined {} page(s), {} item(s) → {}",
        document.total_pages,
        document.total_items,
        output_path.display()
    );
    Ok(document)
}

/// Write the combined document atomically as pretty JSON.
pub async fn write_combined(document: &CombinedDocument, output_path: &Path) -> Result<(), BudgetError> {
    let json = serde_json::to_string_pretty(document)
        .map_err(|e| BudgetError::Internal(format!("serialise combined document: {e}")))?;
    write_atomic(output_path, json.as_bytes()).await
}

/// Read a combined document written by [`rebuild_combined`].
pub async fn load_combined(path: &Path) -> Result<CombinedDocument, BudgetError> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BudgetError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            BudgetError::io(path, e)
        }
    })?;
    let document: CombinedDocument =
        serde_json::from_str(&text).map_err(|e| BudgetError::InvalidJson {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    // Run through the merge again so a hand-edited file still holds the invariants.
    Ok(merge_records(document.pages, document.source_file))
}
