//! Pipeline stages for turning one budget page into a page record.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and the extraction loop in [`crate::extract`] only has to
//! sequence them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm ──▶ parse
//! (path/URL)  (pdfium)  (base64)  (model)  (JSON → record)
//! ```
//!
//! 1. [`input`]: canonicalise the configured path or URL to a local file
//! 2. [`render`]: rasterise one page; pdfium runs in `spawn_blocking`
//! 3. [`encode`]: PNG-encode and base64-wrap the image for the request body
//! 4. [`llm`]: drive the model call with retry/backoff; the only stage
//!    with network I/O
//! 5. [`parse`]: strip fences, repair truncation, and validate the reply

pub mod encode;
pub mod input;
pub mod llm;
pub mod parse;
pub mod render;
