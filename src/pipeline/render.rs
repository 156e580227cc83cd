//! PDF rasterisation: render one budget page at a time via pdfium.
//!
//! pdfium is CPU-bound and keeps thread-local state, so every call runs on
//! `tokio::task::spawn_blocking`. Pages are rendered lazily, one per
//! extraction step, so a resumed run never rasterises pages it will skip and
//! a 300-page budget book never sits in memory as 300 bitmaps.
//!
//! The pdfium library is bound once per process. The document itself is
//! reopened for every page because a `PdfDocument` borrows its binding and
//! cannot cross `spawn_blocking` calls. Reopening parses the cross-reference
//! table again, which costs milliseconds against a model call of seconds.
//!
//! [`PageRenderer`] is the seam the extraction loop depends on; the pdfium
//! implementation is [`PdfiumRenderer`].

use crate::error::{BudgetError, PageError};
use async_trait::async_trait;
use image::DynamicImage;
use once_cell::sync::OnceCell;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Source of page images for the extraction loop.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Number of pages in the document.
    async fn page_count(&self) -> Result<usize, BudgetError>;

    /// Render the page at `index` (0-based).
    async fn render_page(&self, index: usize) -> Result<DynamicImage, PageError>;
}

/// Renders pages of a PDF on disk with pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    path: PathBuf,
    dpi: u32,
    max_pixels: u32,
    password: Option<String>,
}

impl PdfiumRenderer {
    pub fn new(path: impl Into<PathBuf>, dpi: u32, max_pixels: u32, password: Option<String>) -> Self {
        Self {
            path: path.into(),
            dpi,
            max_pixels,
            password,
        }
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn page_count(&self) -> Result<usize, BudgetError> {
        let path = self.path.clone();
        let password = self.password.clone();
        tokio::task::spawn_blocking(move || {
            let pdfium = pdfium()?;
            let document = open_document(pdfium, &path, password.as_deref())?;
            let count = document.pages().len() as usize;
            info!("PDF loaded: {} pages", count);
            Ok(count)
        })
        .await
        .map_err(|e| BudgetError::Internal(format!("Page count task panicked: {}", e)))?
    }

    async fn render_page(&self, index: usize) -> Result<DynamicImage, PageError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.render_blocking(index))
            .await
            .map_err(|e| PageError::RenderFailed {
                page: index + 1,
                detail: format!("render task panicked: {}", e),
            })?
    }
}

impl PdfiumRenderer {
    fn render_blocking(&self, index: usize) -> Result<DynamicImage, PageError> {
        let fail = |detail: String| PageError::RenderFailed {
            page: index + 1,
            detail,
        };

        let pdfium = pdfium().map_err(|e| fail(e.to_string()))?;
        let document = open_document(pdfium, &self.path, self.password.as_deref())
            .map_err(|e| fail(e.to_string()))?;

        let page = document
            .pages()
            .get(index as u16)
            .map_err(|e| fail(format!("{:?}", e)))?;

        let bitmap = page
            .render_with_config(&render_config(self.dpi, self.max_pixels))
            .map_err(|e| fail(format!("{:?}", e)))?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            index + 1,
            image.width(),
            image.height()
        );
        Ok(image)
    }
}

/// Scale PDF points (1/72 in) to the requested DPI, capped on both edges.
fn render_config(dpi: u32, max_pixels: u32) -> PdfRenderConfig {
    PdfRenderConfig::new()
        .scale_page_by_factor(scale_factor(dpi))
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32)
}

fn scale_factor(dpi: u32) -> f32 {
    dpi as f32 / 72.0
}

static PDFIUM: OnceCell<Pdfium> = OnceCell::new();

/// The process-wide pdfium binding, created on first use.
fn pdfium() -> Result<&'static Pdfium, BudgetError> {
    PDFIUM.get_or_try_init(bind_pdfium)
}

/// Bind pdfium: `PDFIUM_LIB_PATH` first, then the working directory, then the system library.
fn bind_pdfium() -> Result<Pdfium, BudgetError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(lib) if !lib.is_empty() => Pdfium::bind_to_library(&lib),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| BudgetError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, BudgetError> {
    pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let detail = format!("{:?}", e);
        if detail.to_ascii_lowercase().contains("password") {
            if password.is_some() {
                BudgetError::WrongPassword {
                    path: path.to_path_buf(),
                }
            } else {
                BudgetError::PasswordRequired {
                    path: path.to_path_buf(),
                }
            }
        } else {
            BudgetError::CorruptPdf {
                path: path.to_path_buf(),
                detail,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_factor_from_dpi() {
        assert!((scale_factor(72) - 1.0).abs() < f32::EPSILON);
        assert!((scale_factor(150) - 150.0 / 72.0).abs() < 1e-6);
    }
}
