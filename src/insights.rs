//! Pure aggregate helpers over a [`CombinedDocument`].
//!
//! Dollar sums only count spending pages (`expense_detail`, `capital`,
//! `utility`) and skip total/subtotal rows. Department summary pages restate
//! the detail pages, revenue pages are income rather than appropriations,
//! and staffing pages hold headcounts; including any of them would double
//! count or mix units. Utility budgets list their income ("SOURCE OF FUNDS")
//! beside their appropriations, so income rows on spending pages count as
//! revenue, not spending. Revenue has its own helper, [`total_revenue`].

use crate::record::{Column, CombinedDocument, LineItem, PageType, StampedItem};
use serde::Serialize;
use std::collections::HashMap;

/// Group label for items without a fund.
pub const UNKNOWN_FUND: &str = "(no fund)";
/// Group label for items without a department.
pub const UNASSIGNED_DEPARTMENT: &str = "(no department)";

/// A named sum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Total {
    pub name: String,
    pub amount: f64,
    /// Line items that contributed a value.
    pub items: usize,
}

/// One row of a largest-items listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedItem {
    pub source_page: usize,
    pub description: String,
    pub fund: Option<String>,
    pub department: Option<String>,
    pub amount: f64,
}

/// Change in one department between two columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearOverYear {
    pub department: String,
    pub from: f64,
    pub to: f64,
    pub change: f64,
    /// `None` when the starting amount is zero.
    pub percent: Option<f64>,
}

/// Whether a row is a total, subtotal, or grand total line.
pub fn is_total_row(item: &LineItem) -> bool {
    item.is_total_row()
}

/// Whether a row is tagged as income (`REVENUE` or `SOURCE OF FUNDS`).
pub fn is_income_row(item: &LineItem) -> bool {
    item.text("category").is_some_and(|c| {
        let c = c.trim();
        c.eq_ignore_ascii_case("SOURCE OF FUNDS") || c.eq_ignore_ascii_case("REVENUE")
    })
}

/// Whether items on this page type count toward spending sums.
pub fn is_spending_page(page_type: PageType) -> bool {
    matches!(
        page_type,
        PageType::ExpenseDetail | PageType::Capital | PageType::Utility
    )
}

/// Pages per type, in [`PageType::ALL`] order, omitting absent types.
pub fn page_type_breakdown(doc: &CombinedDocument) -> Vec<(PageType, usize)> {
    PageType::ALL
        .into_iter()
        .map(|t| (t, doc.pages.iter().filter(|p| p.page_type == t).count()))
        .filter(|(_, n)| *n > 0)
        .collect()
}

/// Spending per fund in `column`, largest first.
pub fn totals_by_fund(doc: &CombinedDocument, column: Column) -> Vec<Total> {
    sum_by(spending_items(doc), column, |s| {
        s.fund().unwrap_or(UNKNOWN_FUND).to_string()
    })
}

/// Spending per department in `column`, optionally within one fund.
pub fn totals_by_department(doc: &CombinedDocument, column: Column, fund: Option<&str>) -> Vec<Total> {
    let items = spending_items(doc).filter(|s| match fund {
        Some(wanted) => s
            .fund()
            .is_some_and(|f| f.trim().eq_ignore_ascii_case(wanted.trim())),
        None => true,
    });
    sum_by(items, column, department_of)
}

/// Sum of revenue line items in `column`, plus income rows on spending pages.
pub fn total_revenue(doc: &CombinedDocument, column: Column) -> f64 {
    doc.line_items()
        .filter(|s| {
            let income = s.page_type == PageType::Revenue
                || (is_spending_page(s.page_type) && is_income_row(&s.item));
            income && !s.item.is_total_row()
        })
        .filter_map(|s| s.item.amount(column))
        .sum()
}

/// The `n` largest spending or revenue line items in `column`.
pub fn largest_items(doc: &CombinedDocument, column: Column, n: usize) -> Vec<RankedItem> {
    let mut ranked: Vec<RankedItem> = doc
        .line_items()
        .filter(|s| {
            (is_spending_page(s.page_type) || s.page_type == PageType::Revenue)
                && !s.item.is_total_row()
        })
        .filter_map(|s| {
            let amount = s.item.amount(column)?;
            Some(RankedItem {
                source_page: s.source_page,
                description: s.item.description().to_string(),
                fund: s.fund().map(str::to_string),
                department: s.department().map(str::to_string),
                amount,
            })
        })
        .collect();
    ranked.sort_by(|a, b| b.amount.total_cmp(&a.amount));
    ranked.truncate(n);
    ranked
}

/// Per-department spending change from `from` to `to`, largest move first.
pub fn year_over_year(doc: &CombinedDocument, from: Column, to: Column) -> Vec<YearOverYear> {
    let mut sums: HashMap<String, (f64, f64)> = HashMap::new();
    for s in spending_items(doc) {
        let (a, b) = (s.item.amount(from), s.item.amount(to));
        if a.is_none() && b.is_none() {
            continue;
        }
        let entry = sums.entry(department_of(&s)).or_default();
        entry.0 += a.unwrap_or(0.0);
        entry.1 += b.unwrap_or(0.0);
    }

    let mut rows: Vec<YearOverYear> = sums
        .into_iter()
        .map(|(department, (from, to))| {
            let change = to - from;
            YearOverYear {
                department,
                from,
                to,
                change,
                percent: (from != 0.0).then(|| change / from * 100.0),
            }
        })
        .collect();
    rows.sort_by(|a, b| {
        b.change
            .abs()
            .total_cmp(&a.change.abs())
            .then_with(|| a.department.cmp(&b.department))
    });
    rows
}

/// Headcount per department from staffing pages, largest first.
pub fn staffing_headcount(doc: &CombinedDocument, column: Column) -> Vec<Total> {
    let items = doc
        .line_items()
        .filter(|s| s.page_type == PageType::Staffing && !s.item.is_total_row());
    sum_by(items, column, department_of)
}

fn spending_items(doc: &CombinedDocument) -> impl Iterator<Item = StampedItem> + '_ {
    doc.line_items()
        .filter(|s| is_spending_page(s.page_type) && !s.item.is_total_row() && !is_income_row(&s.item))
}

fn department_of(s: &StampedItem) -> String {
    s.department().unwrap_or(UNASSIGNED_DEPARTMENT).to_string()
}

fn sum_by(
    items: impl Iterator<Item = StampedItem>,
    column: Column,
    key: impl Fn(&StampedItem) -> String,
) -> Vec<Total> {
    let mut sums: HashMap<String, (f64, usize)> = HashMap::new();
    for s in items {
        if let Some(amount) = s.item.amount(column) {
            let entry = sums.entry(key(&s)).or_default();
            entry.0 += amount;
            entry.1 += 1;
        }
    }
    let mut totals: Vec<Total> = sums
        .into_iter()
        .map(|(name, (amount, items))| Total { name, amount, items })
        .collect();
    totals.sort_by(|a, b| b.amount.total_cmp(&a.amount).then_with(|| a.name.cmp(&b.name)));
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::merge_records;
    use crate::record::{PageMetadata, PageRecord};
    use serde_json::{json, Value};

    fn item(v: Value) -> LineItem {
        match v {
            Value::Object(m) => LineItem::new(m),
            _ => panic!("not an object"),
        }
    }

    fn page(n: usize, t: PageType, fund: &str, dept: &str, items: Vec<Value>) -> PageRecord {
        PageRecord::new(
            n,
            t,
            PageMetadata {
                fund: Some(fund.into()),
                department: Some(dept.into()),
                function: None,
            },
            items.into_iter().map(item).collect(),
        )
    }

    fn sample() -> CombinedDocument {
        merge_records(
            vec![
                page(
                    1,
                    PageType::DeptSummary,
                    "GENERAL FUND",
                    "SUMMARY",
                    vec![json!({"line_item": "POLICE", "budget_2526_final": 9_000_000})],
                ),
                page(
                    2,
                    PageType::Revenue,
                    "GENERAL FUND",
                    "REVENUE SUMMARY",
                    vec![
                        json!({"line_item": "TAXES", "budget_2526_final": 147_972_729}),
                        json!({"line_item": "TOTAL REVENUE", "budget_2526_final": 147_972_729}),
                    ],
                ),
                page(
                    3,
                    PageType::ExpenseDetail,
                    "GENERAL FUND",
                    "POLICE",
                    vec![
                        json!({"line_item": "SALARIES", "budget_2425_original": 5_000_000, "budget_2526_final": 5_500_000}),
                        json!({"line_item": "OVERTIME", "budget_2425_original": 1_000_000, "budget_2526_final": "800,000"}),
                        json!({"line_item": "TOTAL", "budget_2526_final": 6_300_000}),
                    ],
                ),
                page(
                    4,
                    PageType::ExpenseDetail,
                    "GENERAL FUND",
                    "FIRE",
                    vec![json!({"line_item": "SALARIES", "budget_2425_original": 4_000_000, "budget_2526_final": 4_100_000})],
                ),
                page(
                    5,
                    PageType::Utility,
                    "ELECTRIC DIVISION",
                    "ELECTRIC",
                    vec![json!({"line_item": "PURCHASED POWER", "budget_2526_final": 20_000_000})],
                ),
                page(
                    6,
                    PageType::Staffing,
                    "GENERAL FUND",
                    "POLICE",
                    vec![
                        json!({"line_item": "POLICE OFFICER", "budget_2526_final": 40}),
                        json!({"line_item": "SERGEANT", "budget_2526_final": 8}),
                        json!({"line_item": "TOTAL", "budget_2526_final": 48}),
                    ],
                ),
                page(7, PageType::Other, "GENERAL FUND", "COVER", vec![]),
            ],
            None,
        )
    }

    #[test]
    fn breakdown_counts_present_types() {
        let b = page_type_breakdown(&sample());
        assert_eq!(b[0], (PageType::DeptSummary, 1));
        assert!(b.contains(&(PageType::ExpenseDetail, 2)));
        assert!(!b.iter().any(|(t, _)| *t == PageType::Capital));
    }

    #[test]
    fn fund_totals_skip_totals_summaries_and_headcount() {
        let totals = totals_by_fund(&sample(), Column::Budget2526Final);
        assert_eq!(totals[0].name, "ELECTRIC DIVISION");
        assert_eq!(totals[0].amount, 20_000_000.0);
        assert_eq!(totals[1].name, "GENERAL FUND");
        // 5.5M + 0.8M + 4.1M; no TOTAL rows, no summary row, no headcounts, no revenue.
        assert_eq!(totals[1].amount, 10_400_000.0);
        assert_eq!(totals[1].items, 3);
    }

    #[test]
    fn department_totals_filter_by_fund() {
        let all = totals_by_department(&sample(), Column::Budget2526Final, None);
        assert_eq!(all.len(), 3);
        let general = totals_by_department(&sample(), Column::Budget2526Final, Some("general fund"));
        let names: Vec<&str> = general.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["POLICE", "FIRE"]);
        assert_eq!(general[0].amount, 6_300_000.0);
    }

    #[test]
    fn revenue_total_excludes_total_rows() {
        assert_eq!(total_revenue(&sample(), Column::Budget2526Final), 147_972_729.0);
    }

    #[test]
    fn largest_items_ranked() {
        let top = largest_items(&sample(), Column::Budget2526Final, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].description, "TAXES");
        assert_eq!(top[0].source_page, 2);
        assert_eq!(top[1].description, "PURCHASED POWER");
        assert_eq!(top[1].fund.as_deref(), Some("ELECTRIC DIVISION"));
    }

    #[test]
    fn year_over_year_changes() {
        let rows = year_over_year(&sample(), Column::Budget2425Original, Column::Budget2526Final);
        let police = rows.iter().find(|r| r.department == "POLICE").unwrap();
        assert_eq!(police.from, 6_000_000.0);
        assert_eq!(police.to, 6_300_000.0);
        assert_eq!(police.change, 300_000.0);
        assert_eq!(police.percent, Some(5.0));

        let electric = rows.iter().find(|r| r.department == "ELECTRIC").unwrap();
        assert_eq!(electric.percent, None);
        assert_eq!(rows[0].department, "ELECTRIC");
    }

    #[test]
    fn headcount_from_staffing_pages_only() {
        let heads = staffing_headcount(&sample(), Column::Budget2526Final);
        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].name, "POLICE");
        assert_eq!(heads[0].amount, 48.0);
    }

    #[test]
    fn empty_document_yields_empty_results() {
        let doc = merge_records(vec![], None);
        assert!(page_type_breakdown(&doc).is_empty());
        assert!(totals_by_fund(&doc, Column::default()).is_empty());
        assert!(largest_items(&doc, Column::default(), 5).is_empty());
        assert_eq!(total_revenue(&doc, Column::default()), 0.0);
    }

    #[test]
    fn utility_income_rows_are_not_spending() {
        let doc = merge_records(
            vec![page(
                9,
                PageType::Utility,
                "SEWER DIVISION",
                "SEWER DIVISION - SUMMARY",
                vec![
                    json!({"line_item": "USER CHARGES", "category": "SOURCE OF FUNDS", "budget_2425_original": 9_000_000, "budget_2526_final": 9_500_000}),
                    json!({"line_item": "INTEREST INCOME", "category": "source of funds ", "budget_2526_final": 500_000}),
                    json!({"line_item": "OPERATIONS", "category": "USE OF FUNDS", "budget_2425_original": 7_000_000, "budget_2526_final": 7_200_000}),
                    json!({"line_item": "DEBT SERVICE", "category": "USE OF FUNDS", "budget_2526_final": 1_800_000}),
                ],
            )],
            None,
        );

        let funds = totals_by_fund(&doc, Column::Budget2526Final);
        assert_eq!(funds.len(), 1);
        assert_eq!(funds[0].amount, 9_000_000.0);
        assert_eq!(funds[0].items, 2);

        let yoy = year_over_year(&doc, Column::Budget2425Original, Column::Budget2526Final);
        assert_eq!(yoy[0].from, 7_000_000.0);
        assert_eq!(yoy[0].to, 9_000_000.0);

        assert_eq!(total_revenue(&doc, Column::Budget2526Final), 10_000_000.0);
    }

    #[test]
    fn income_row_helper() {
        assert!(is_income_row(&item(json!({"line_item": "RATES", "category": "SOURCE OF FUNDS"}))));
        assert!(is_income_row(&item(json!({"line_item": "TAXES", "category": "Revenue"}))));
        assert!(!is_income_row(&item(json!({"line_item": "POWER", "category": "USE OF FUNDS"}))));
        assert!(!is_income_row(&item(json!({"line_item": "POWER"}))));
    }

    #[test]
    fn total_row_helper() {
        assert!(is_total_row(&item(json!({"line_item": "GRAND TOTAL"}))));
        assert!(!is_total_row(&item(json!({"line_item": "TAXES"}))));
    }
}
