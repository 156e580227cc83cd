//! Per-page persistence: one JSON file per processed page.
//!
//! Files are named `page_{NNN}_{page_type}.json` and are the durable source
//! of truth for a run; the combined document is rebuilt from them. Resume
//! works off a single directory listing ([`PageStore::scan`]) taken before
//! the loop starts.
//!
//! Writes go to a temp file first and are renamed into place, so an
//! interrupted run never leaves a half-written page that a later `--resume`
//! would trust.

use crate::error::BudgetError;
use crate::record::{PageRecord, PageType};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

static RE_PAGE_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^page_(\d{3,})_([a-z_]+)\.json$").unwrap());

/// File name for a page record.
pub fn page_file_name(page_num: usize, page_type: PageType) -> String {
    format!("page_{:03}_{}.json", page_num, page_type)
}

/// Page number encoded in a per-page file name, if it is one.
pub fn parse_page_file_name(name: &str) -> Option<usize> {
    RE_PAGE_FILE
        .captures(name)
        .and_then(|caps| caps[1].parse().ok())
}

/// Directory of per-page record files.
#[derive(Debug, Clone)]
pub struct PageStore {
    dir: PathBuf,
}

impl PageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if needed.
    pub async fn ensure_dir(&self) -> Result<(), BudgetError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BudgetError::io(&self.dir, e))
    }

    /// List the pages present on disk, page number → file.
    ///
    /// A missing directory is an empty store. When a page has several
    /// files (left by an older run), the lexicographically last wins.
    pub async fn scan(&self) -> Result<BTreeMap<usize, PathBuf>, BudgetError> {
        let mut found = BTreeMap::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(BudgetError::io(&self.dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BudgetError::io(&self.dir, e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();

        for name in names {
            if let Some(page) = parse_page_file_name(&name) {
                if let Some(previous) = found.insert(page, self.dir.join(&name)) {
                    warn!(
                        "Page {}: several files on disk, using {} over {}",
                        page,
                        name,
                        previous.display()
                    );
                }
            }
        }
        debug!("Scanned {}: {} page file(s)", self.dir.display(), found.len());
        Ok(found)
    }

    /// Read one record, normalising `items_extracted`.
    pub async fn load(&self, path: &Path) -> Result<PageRecord, BudgetError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BudgetError::io(path, e))?;
        let mut record: PageRecord =
            serde_json::from_str(&text).map_err(|e| BudgetError::InvalidJson {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        let stated = record.items_extracted;
        if record.normalize() {
            warn!(
                "{}: items_extracted was {}, corrected to {}",
                path.display(),
                stated,
                record.items_extracted
            );
        }
        Ok(record)
    }

    /// Load every record on disk, in page order.
    ///
    /// A file that cannot be read or parsed is logged and left out, so one
    /// bad page never blocks the combined document.
    pub async fn load_all(&self) -> Result<Vec<PageRecord>, BudgetError> {
        let mut records = Vec::new();
        for path in self.scan().await?.values() {
            match self.load(path).await {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable page file: {}", e),
            }
        }
        Ok(records)
    }

    /// Write a record and remove any other file for the same page.
    pub async fn write(&self, record: &PageRecord) -> Result<PathBuf, BudgetError> {
        self.ensure_dir().await?;
        let path = self.dir.join(page_file_name(record.source_page, record.page_type));
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| BudgetError::Internal(format!("serialise page record: {e}")))?;
        write_atomic(&path, json.as_bytes()).await?;
        self.remove_stale(record.source_page, &path).await?;
        debug!("Saved {}", path.display());
        Ok(path)
    }

    /// Keep an unparseable reply for manual review.
    pub async fn save_for_review(&self, review_dir: &Path, page_num: usize, raw: &str) -> Result<PathBuf, BudgetError> {
        tokio::fs::create_dir_all(review_dir)
            .await
            .map_err(|e| BudgetError::io(review_dir, e))?;
        let path = review_dir.join(format!("page_{:03}.txt", page_num));
        write_atomic(&path, raw.as_bytes()).await?;
        Ok(path)
    }

    async fn remove_stale(&self, page_num: usize, keep: &Path) -> Result<(), BudgetError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| BudgetError::io(&self.dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BudgetError::io(&self.dir, e))?
        {
            let path = entry.path();
            let is_same_page = entry
                .file_name()
                .to_str()
                .and_then(parse_page_file_name)
                == Some(page_num);
            if is_same_page && path != keep {
                debug!("Removing stale {}", path.display());
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| BudgetError::io(&path, e))?;
            }
        }
        Ok(())
    }
}

/// Write to `<path>.tmp`, then rename over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BudgetError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BudgetError::io(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| BudgetError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| BudgetError::io(path, e))
}
