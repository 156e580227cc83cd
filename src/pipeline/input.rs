//! Input resolution: turn the configured PDF path or URL into a local file.
//!
//! pdfium needs a file-system path, so budget books published on a town
//! website are downloaded into a `TempDir` that lives exactly as long as the
//! returned [`ResolvedInput`]. Local files are checked for the `%PDF` magic
//! bytes up front; a missing input is fatal and reported immediately.

use crate::error::BudgetError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// The resolved input: either a local path or a downloaded temp file.
pub enum ResolvedInput {
    Local(PathBuf),
    /// The `TempDir` is held so the download survives until processing ends.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local PDF file path.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, BudgetError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(Path::new(input))
    }
}

fn resolve_local(path: &Path) -> Result<ResolvedInput, BudgetError> {
    let path = path.to_path_buf();
    if !path.exists() {
        return Err(BudgetError::FileNotFound { path });
    }

    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(BudgetError::PermissionDenied { path });
        }
        Err(_) => return Err(BudgetError::FileNotFound { path }),
    };

    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_ok() && !is_pdf_magic(&magic) {
        return Err(BudgetError::NotAPdf { path, magic });
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

fn is_pdf_magic(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF")
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, BudgetError> {
    info!("Downloading budget PDF from: {}", url);

    let failed = |reason: String| BudgetError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            BudgetError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

    let temp_dir = TempDir::new().map_err(|e| BudgetError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(filename_from_url(url));

    if bytes.len() >= 4 && !is_pdf_magic(&bytes) {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(BudgetError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| BudgetError::io(&file_path, e))?;

    info!("Downloaded {} bytes to {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "budget.pdf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.gov/budget.pdf"));
        assert!(is_url("http://example.gov/budget.pdf"));
        assert!(!is_url("data/raw/budget.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_taken_from_url_path() {
        assert_eq!(
            filename_from_url("https://town.gov/files/FY26-adopted.pdf"),
            "FY26-adopted.pdf"
        );
        assert_eq!(filename_from_url("https://town.gov/budget/"), "budget.pdf");
        assert_eq!(filename_from_url("not a url"), "budget.pdf");
    }

    #[tokio::test]
    async fn missing_file_is_fatal() {
        let err = resolve_input("/definitely/not/here/budget.pdf", 5)
            .await
            .err()
            .expect("missing file must fail");
        assert!(matches!(err, BudgetError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn non_pdf_is_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello world").unwrap();
        let err = resolve_input(f.path().to_str().unwrap(), 5)
            .await
            .err()
            .expect("not a pdf");
        assert!(matches!(err, BudgetError::NotAPdf { magic, .. } if &magic == b"hell"));
    }

    #[tokio::test]
    async fn pdf_magic_accepted() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.7\n").unwrap();
        let resolved = resolve_input(f.path().to_str().unwrap(), 5).await.unwrap();
        assert_eq!(resolved.path(), f.path());
    }
}
