//! Prompts for page extraction and budget question answering.
//!
//! Keeping every prompt here means the column mapping, the page taxonomy, and
//! the answer rules can be changed in one place and inspected by unit tests
//! without calling a model.
//!
//! Callers can override the extraction prompt via
//! [`crate::config::ExtractionConfig::system_prompt`].

/// Default extraction prompt sent with every page image.
pub const EXTRACTION_PROMPT: &str = r#"You are extracting structured data from one page of a municipal budget book (scanned PDF).

STEP 1 — Classify the page as exactly one of these types:
  - "dept_summary"   : department/activity summary, one row per department with totals
  - "revenue"        : revenue budget, revenue line items with account numbers
  - "expense_detail" : department budget estimate (expenses), line items within one department
  - "staffing"       : department budget estimate (staffing), headcount by category
  - "capital"        : capital / non-recurring / appropriations reserve items
  - "utility"        : utility or enterprise fund pages (electric, sewer, water operating budgets)
  - "other"          : ONLY when the page has no numbers at all (cover, narrative, blank)

A page with ANY numbers must NOT be "other".

STEP 2 — Extract every row that has numbers, mapping columns as follows
(header wording varies slightly between pages):
  fy2024_actual        = FY ENDED 6/30/2024 ACTUAL (or "FY 6-30-24 ACTUAL")
  fy2025_actual_ytd    = FY 24/25 THRU 1/31/2025 ACTUAL (or "FY 1-31-25 ACTUAL")
  budget_2425_original = 2024-25 APPROP. ORIGINAL (or "2024-25 Original")
  budget_2425_adjusted = 2024-25 APPROP. ADJ. THRU 1/31/2025 (or "2024-25 Adjusted")
  budget_2526_request  = FISCAL YEAR 2025-26 DEPT. REQUEST (or "2025-26 REQUEST")
  budget_2526_mayor    = 2025-26 MAYOR (or "MAYOR APPROVED")
  budget_2526_final    = 2025-26 FINAL ADOPTED (or "2025-26 FINAL"), the most important column

Return ONLY a JSON object with this exact structure — no markdown, no code fences, no commentary:
{
  "page_type":  "<one of the types above>",
  "fund":       "<fund or division from the page title, e.g. GENERAL FUND, ELECTRIC DIVISION, SEWER DIVISION, WATER DIVISION, CAPITAL AND NON-RECURRING FUND, SPECIAL FUNDS BOARD OF EDUCATION>",
  "department": "<department from the page header, e.g. POLICE, MAYOR, REGISTRAR OF VOTERS; for utility or summary pages with no specific department use the full page title, e.g. ELECTRIC DIVISION - SUMMARY>",
  "function":   "<function group if shown, e.g. PUBLIC SAFETY, GENERAL GOVERNMENT, else null>",
  "items": [
    {
      "acct_no":              "string or null",
      "line_item":            "string, the row name",
      "category":             "string or null, e.g. STAFFING, REVENUE, EXPENDITURE, CAPITAL, SOURCE OF FUNDS, USE OF FUNDS",
      "sub_category":         "string or null, e.g. PROPERTY TAXES, PERSONAL SERVICES, ELECTED & APPOINTED",
      "fy2024_actual":        number or null,
      "fy2025_actual_ytd":    number or null,
      "budget_2425_original": number or null,
      "budget_2425_adjusted": number or null,
      "budget_2526_request":  number or null,
      "budget_2526_mayor":    number or null,
      "budget_2526_final":    number or null
    }
  ]
}

Rules:
- Numbers are plain integers or decimals: no $ signs, no thousands separators.
- Parentheses mean negative: (1,234) becomes -1234. A dash "-" means null.
- Include subtotal, total, and grand total rows.
- On staffing pages the numbers are headcounts; use the same fields.
- Capital pages that only show request, mayor, and final columns get null for the earlier columns.
- Always take fund and department from the page header; never leave them null when the page has a title.
- For utility pages (electric, sewer, water), fund is the division name (e.g. "ELECTRIC DIVISION") and department is the full page title (e.g. "ELECTRIC DIVISION - SUMMARY").
- On utility pages, tag income rows with category "SOURCE OF FUNDS" and spending rows with "USE OF FUNDS".
- A field not present on the page is null.
- items is always an array (empty only for "other" pages).
- Do NOT include any text before or after the JSON."#;

/// System prompt for the question-answering agent.
///
/// The placeholder `{context}` is replaced by [`agent_system_prompt`].
const AGENT_PROMPT_TEMPLATE: &str = r#"You are a municipal budget analyst answering questions about an adopted budget.
Answer using ONLY the budget data below. Quote dollar figures with thousands separators.
If the data does not contain the answer, say so plainly instead of guessing.
Staffing figures are headcounts, not dollars.

BUDGET DATA
{context}"#;

/// Build the agent's system prompt around a pre-rendered data context.
pub fn agent_system_prompt(context: &str) -> String {
    AGENT_PROMPT_TEMPLATE.replace("{context}", context)
}
