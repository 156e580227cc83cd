//! Data model: page records, line items, and the combined document.
//!
//! A [`PageRecord`] is the structured result of extracting one page. Its
//! `items` are kept exactly as the model produced them: the field set varies
//! by page type (revenue pages carry account numbers, staffing pages carry
//! headcounts, capital pages only fill the last three columns) so a
//! [`LineItem`] is a thin wrapper over a JSON object with typed accessors
//! rather than a rigid struct.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Classification the model assigns to each page.
///
/// Deserialisation is lenient like [`PageType::parse_lenient`]: a label the
/// model invented (`"cover"`, `"index"`) or a `null` reads back as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    /// Department/activity summary: one row per department with totals.
    DeptSummary,
    /// Revenue line items with account numbers.
    Revenue,
    /// Expense line items within one department.
    ExpenseDetail,
    /// Headcount by category (numbers are people, not dollars).
    Staffing,
    /// Capital / non-recurring / appropriations reserve.
    Capital,
    /// Electric, sewer, and water enterprise funds.
    Utility,
    /// Pages with no numbers at all.
    #[default]
    Other,
}

impl PageType {
    pub const ALL: [PageType; 7] = [
        PageType::DeptSummary,
        PageType::Revenue,
        PageType::ExpenseDetail,
        PageType::Staffing,
        PageType::Capital,
        PageType::Utility,
        PageType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::DeptSummary => "dept_summary",
            PageType::Revenue => "revenue",
            PageType::ExpenseDetail => "expense_detail",
            PageType::Staffing => "staffing",
            PageType::Capital => "capital",
            PageType::Utility => "utility",
            PageType::Other => "other",
        }
    }

    /// Whether amounts on this page are dollars (staffing pages hold headcounts).
    pub fn is_monetary(&self) -> bool {
        !matches!(self, PageType::Staffing | PageType::Other)
    }

    /// Lenient parse: unknown labels become [`PageType::Other`].
    pub fn parse_lenient(s: &str) -> PageType {
        s.parse().unwrap_or(PageType::Other)
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = Option::<String>::deserialize(deserializer)?;
        Ok(label.as_deref().map(PageType::parse_lenient).unwrap_or_default())
    }
}

impl FromStr for PageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        PageType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| format!("unknown page type '{s}'"))
    }
}

/// The seven amount columns of the budget book, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    /// FY ended 6/30/2024 actual.
    Fy2024Actual,
    /// FY 24/25 actual through 1/31/2025.
    Fy2025ActualYtd,
    /// 2024-25 original appropriation.
    Budget2425Original,
    /// 2024-25 adjusted appropriation.
    Budget2425Adjusted,
    /// 2025-26 department request.
    Budget2526Request,
    /// 2025-26 mayor's recommendation.
    Budget2526Mayor,
    /// 2025-26 final adopted budget.
    #[default]
    Budget2526Final,
}

impl Column {
    pub const ALL: [Column; 7] = [
        Column::Fy2024Actual,
        Column::Fy2025ActualYtd,
        Column::Budget2425Original,
        Column::Budget2425Adjusted,
        Column::Budget2526Request,
        Column::Budget2526Mayor,
        Column::Budget2526Final,
    ];

    /// JSON key of this column inside a line item.
    pub fn key(&self) -> &'static str {
        match self {
            Column::Fy2024Actual => "fy2024_actual",
            Column::Fy2025ActualYtd => "fy2025_actual_ytd",
            Column::Budget2425Original => "budget_2425_original",
            Column::Budget2425Adjusted => "budget_2425_adjusted",
            Column::Budget2526Request => "budget_2526_request",
            Column::Budget2526Mayor => "budget_2526_mayor",
            Column::Budget2526Final => "budget_2526_final",
        }
    }

    /// Short human label for report headers.
    pub fn label(&self) -> &'static str {
        match self {
            Column::Fy2024Actual => "FY24 actual",
            Column::Fy2025ActualYtd => "FY25 YTD",
            Column::Budget2425Original => "24-25 original",
            Column::Budget2425Adjusted => "24-25 adjusted",
            Column::Budget2526Request => "25-26 request",
            Column::Budget2526Mayor => "25-26 mayor",
            Column::Budget2526Final => "25-26 final",
        }
    }
}

/// Keys of the descriptive line-item fields.
pub mod keys {
    pub const ACCT_NO: &str = "acct_no";
    pub const LINE_ITEM: &str = "line_item";
    pub const CATEGORY: &str = "category";
    pub const SUB_CATEGORY: &str = "sub_category";
    pub const FUND: &str = "fund";
    pub const DEPARTMENT: &str = "department";
    pub const FUNCTION: &str = "function";
}

/// One row of financial data, kept verbatim as the model returned it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineItem(pub Map<String, Value>);

static RE_TOTAL_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(grand\s+|sub[\s-]?)?totals?\b|\btotal\s*$").unwrap());

impl LineItem {
    pub fn new(fields: Map<String, Value>) -> Self {
        LineItem(fields)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Non-empty string value of `key`, if any.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// Row description (`line_item`), or an empty string.
    pub fn description(&self) -> &str {
        self.text(keys::LINE_ITEM).unwrap_or("")
    }

    /// Numeric value of an arbitrary key, tolerating formatted strings.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => parse_amount(s),
            _ => None,
        }
    }

    /// Amount in the given budget column.
    pub fn amount(&self, column: Column) -> Option<f64> {
        self.number(column.key())
    }

    /// Whether this row is a subtotal / total / grand total line.
    pub fn is_total_row(&self) -> bool {
        RE_TOTAL_ROW.is_match(self.description())
    }

    /// Whether `key` is missing, null, or an empty string.
    fn is_blank(&self, key: &str) -> bool {
        match self.0.get(key) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        }
    }
}

/// Parse a budget-book amount: `$1,234` → 1234, `(1,234)` → -1234, `-` → None.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() || s.chars().all(|c| c == '-' || c == '—' || c == '–') {
        return None;
    }
    let (negative, body) = match s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, s),
    };
    let cleaned: String = body
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    let value: f64 = cleaned.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// The structured result of extracting one budget page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    /// 1-indexed page number in the source PDF.
    pub source_page: usize,
    pub page_type: PageType,
    pub fund: Option<String>,
    pub department: Option<String>,
    pub function: Option<String>,
    /// Always equal to `items.len()`.
    pub items_extracted: usize,
    pub items: Vec<LineItem>,
}

/// Page-level metadata the model reports alongside the items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub fund: Option<String>,
    pub department: Option<String>,
    pub function: Option<String>,
}

impl PageRecord {
    pub fn new(
        source_page: usize,
        page_type: PageType,
        metadata: PageMetadata,
        items: Vec<LineItem>,
    ) -> Self {
        Self {
            source_page,
            page_type,
            fund: metadata.fund,
            department: metadata.department,
            function: metadata.function,
            items_extracted: items.len(),
            items,
        }
    }

    /// Restore `items_extracted == items.len()`; returns `true` if it had drifted.
    pub fn normalize(&mut self) -> bool {
        let drifted = self.items_extracted != self.items.len();
        self.items_extracted = self.items.len();
        drifted
    }

    /// "DEPARTMENT / FUND" label for progress lines, or a dash.
    pub fn label(&self) -> String {
        let dept = self.department.as_deref().unwrap_or("");
        let fund = self.fund.as_deref().unwrap_or("");
        let label = format!("{dept} / {fund}");
        let label = label.trim_matches(|c| c == ' ' || c == '/');
        if label.is_empty() {
            "—".to_string()
        } else {
            label.to_string()
        }
    }

    /// Items with page metadata filled in where the item itself has none.
    pub fn stamped_items(&self) -> impl Iterator<Item = StampedItem> + '_ {
        self.items.iter().map(move |item| {
            let mut fields = item.0.clone();
            for (key, value) in [
                (keys::FUND, &self.fund),
                (keys::DEPARTMENT, &self.department),
                (keys::FUNCTION, &self.function),
            ] {
                if item.is_blank(key) {
                    fields.insert(
                        key.to_string(),
                        value.clone().map(Value::String).unwrap_or(Value::Null),
                    );
                }
            }
            StampedItem {
                source_page: self.source_page,
                page_type: self.page_type,
                item: LineItem(fields),
            }
        })
    }
}

/// A line item flattened together with its page's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedItem {
    pub source_page: usize,
    pub page_type: PageType,
    pub item: LineItem,
}

impl StampedItem {
    pub fn fund(&self) -> Option<&str> {
        self.item.text(keys::FUND)
    }

    pub fn department(&self) -> Option<&str> {
        self.item.text(keys::DEPARTMENT)
    }
}

/// One row of the combined document's page manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub page: usize,
    #[serde(rename = "type")]
    pub page_type: PageType,
    pub fund: Option<String>,
    pub department: Option<String>,
    pub items_extracted: usize,
}

impl From<&PageRecord> for ManifestEntry {
    fn from(r: &PageRecord) -> Self {
        Self {
            page: r.source_page,
            page_type: r.page_type,
            fund: r.fund.clone(),
            department: r.department.clone(),
            items_extracted: r.items_extracted,
        }
    }
}

/// The merged set of all page records, ordered by `source_page`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedDocument {
    pub source_file: Option<String>,
    pub total_pages: usize,
    pub total_items: usize,
    pub pages_manifest: Vec<ManifestEntry>,
    pub pages: Vec<PageRecord>,
}

impl CombinedDocument {
    /// Every line item of every page, stamped with page metadata.
    pub fn line_items(&self) -> impl Iterator<Item = StampedItem> + '_ {
        self.pages.iter().flat_map(PageRecord::stamped_items)
    }

    pub fn page(&self, source_page: usize) -> Option<&PageRecord> {
        self.pages.iter().find(|p| p.source_page == source_page)
    }
}
