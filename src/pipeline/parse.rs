//! Reply normalisation: model text → page type, metadata, and line items.
//!
//! Even with "return ONLY JSON" in the prompt, vision models wrap answers in
//! code fences, prepend a sentence, or run out of output tokens mid-array.
//! Cleanup runs in a fixed order:
//!
//! 1. Drop every line that starts with a code fence.
//! 2. Cut to the outermost `{ … }`.
//! 3. Parse; on failure retry with `]}` and then `"]}` appended, which
//!    closes the common truncation points inside the `items` array.
//! 4. Validate loosely: missing `page_type` → `other`, non-array `items` →
//!    empty, non-object entries dropped.
//! 5. If `fund` is empty, take the first [`KNOWN_FUNDS`] entry that appears
//!    anywhere in the raw reply.

use crate::error::PageError;
use crate::record::{LineItem, PageMetadata, PageType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

/// Fund and division names used when the model leaves `fund` empty.
///
/// Order matters: the first match wins.
pub const KNOWN_FUNDS: &[&str] = &[
    "ELECTRIC DIVISION",
    "SEWER DIVISION",
    "WATER DIVISION",
    "GENERAL FUND",
    "CAPITAL AND NON-RECURRING",
    "SPECIAL FUNDS BOARD OF EDUCATION",
    "SPECIAL FUNDS TOWN GOVERNMENT",
];

/// Suffixes tried, in order, to close a truncated reply.
const TRUNCATION_REPAIRS: [&str; 3] = ["", "]}", "\"]}"];

static RE_FENCE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*```.*$\n?").unwrap());

/// A successfully parsed reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPage {
    pub page_type: PageType,
    pub metadata: PageMetadata,
    pub items: Vec<LineItem>,
    /// Whether a truncation repair suffix was needed.
    pub repaired: bool,
}

/// Parse a raw model reply for `page_num`.
pub fn parse_reply(page_num: usize, raw: &str) -> Result<ParsedPage, PageError> {
    let cleaned = isolate_json(raw);
    if cleaned.is_empty() {
        return Err(PageError::MalformedReply {
            page: page_num,
            detail: "empty reply".into(),
        });
    }

    let mut first_error = None;
    for suffix in TRUNCATION_REPAIRS {
        let candidate = format!("{cleaned}{suffix}");
        match serde_json::from_str::<Value>(&candidate) {
            Ok(Value::Object(obj)) => {
                if !suffix.is_empty() {
                    warn!("Page {}: repaired truncated reply with '{}'", page_num, suffix);
                }
                let mut parsed = from_object(page_num, obj);
                parsed.repaired = !suffix.is_empty();
                if parsed.metadata.fund.is_none() {
                    parsed.metadata.fund = infer_fund(raw).map(str::to_string);
                }
                return Ok(parsed);
            }
            Ok(other) => {
                first_error.get_or_insert_with(|| format!("expected a JSON object, got {}", kind(&other)));
            }
            Err(e) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }

    let tail: String = {
        let chars: Vec<char> = cleaned.chars().collect();
        chars[chars.len().saturating_sub(200)..].iter().collect()
    };
    debug!("Page {}: unparseable reply tail: ...{}", page_num, tail);
    Err(PageError::MalformedReply {
        page: page_num,
        detail: first_error.unwrap_or_else(|| "unparseable reply".into()),
    })
}

/// Strip fence lines and cut to the outermost braces.
fn isolate_json(raw: &str) -> String {
    let mut cleaned = raw.trim().to_string();
    if cleaned.contains("```") {
        cleaned = RE_FENCE_LINE.replace_all(&cleaned, "").trim().to_string();
    }
    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            cleaned = cleaned[start..=end].to_string();
        }
    }
    cleaned
}

fn from_object(page_num: usize, mut obj: serde_json::Map<String, Value>) -> ParsedPage {
    let page_type = match obj.get("page_type") {
        Some(Value::String(s)) => {
            let t = PageType::parse_lenient(s);
            if t == PageType::Other && s.trim() != "other" {
                warn!("Page {}: unknown page type '{}', using 'other'", page_num, s);
            }
            t
        }
        _ => PageType::Other,
    };

    let metadata = PageMetadata {
        fund: string_field(&obj, "fund"),
        department: string_field(&obj, "department"),
        function: string_field(&obj, "function"),
    };

    let items = match obj.remove("items") {
        Some(Value::Array(entries)) => {
            let total = entries.len();
            let items: Vec<LineItem> = entries
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(m) => Some(LineItem::new(m)),
                    _ => None,
                })
                .collect();
            if items.len() < total {
                warn!(
                    "Page {}: dropped {} non-object item(s)",
                    page_num,
                    total - items.len()
                );
            }
            items
        }
        Some(other) => {
            warn!("Page {}: 'items' is {}, treating as empty", page_num, kind(&other));
            Vec::new()
        }
        None => Vec::new(),
    };

    ParsedPage {
        page_type,
        metadata,
        items,
        repaired: false,
    }
}

fn string_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// First known fund named anywhere in the raw reply.
pub fn infer_fund(raw: &str) -> Option<&'static str> {
    let upper = raw.to_uppercase();
    KNOWN_FUNDS.iter().copied().find(|fund| upper.contains(fund))
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
