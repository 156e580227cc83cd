//! Image encoding: rendered page → base64 PNG attachment for the model.
//!
//! PNG keeps digits crisp; JPEG ringing around small numerals is enough to
//! turn an 8 into a 3 on a dense appropriation table.

use crate::error::PageError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

pub const PNG_MIME: &str = "image/png";

/// Encode a rendered page as a base64 PNG ready for the model request.
pub fn encode_page(page_num: usize, img: &DynamicImage) -> Result<ImageData, PageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PageError::RenderFailed {
            page: page_num,
            detail: format!("PNG encoding failed: {}", e),
        })?;

    let b64 = STANDARD.encode(&buf);
    debug!("Page {}: encoded {} PNG bytes → {} base64 chars", page_num, buf.len(), b64.len());

    Ok(ImageData::new(b64, PNG_MIME).with_detail("high"))
}
