//! Plain-text budget report for the terminal.

use crate::insights::{self, Total};
use crate::record::{Column, CombinedDocument};
use std::fmt::Write as _;

/// What to put in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    /// Column all sums are taken from.
    pub column: Column,
    /// Rows per ranked table.
    pub top: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            column: Column::default(),
            top: 10,
        }
    }
}

/// Render the report: page breakdown, fund totals, top departments, largest
/// items, biggest year-over-year moves, and staffing.
pub fn render_report(doc: &CombinedDocument, options: &ReportOptions) -> String {
    let column = options.column;
    let mut out = String::new();

    let _ = writeln!(out, "Budget report ({})", column.label());
    if let Some(ref source) = doc.source_file {
        let _ = writeln!(out, "Source: {source}");
    }
    let _ = writeln!(out, "{} page(s), {} line item(s)", doc.total_pages, doc.total_items);

    section(&mut out, "Pages by type");
    let rows: Vec<Vec<String>> = insights::page_type_breakdown(doc)
        .into_iter()
        .map(|(t, n)| vec![t.to_string(), n.to_string()])
        .collect();
    table(&mut out, &["Type", "Pages"], &rows);

    section(&mut out, "Revenue");
    let _ = writeln!(out, "Total revenue: {}", format_amount(insights::total_revenue(doc, column)));

    section(&mut out, "Spending by fund");
    totals_table(&mut out, "Fund", &insights::totals_by_fund(doc, column), usize::MAX);

    section(&mut out, &format!("Top {} departments", options.top));
    totals_table(
        &mut out,
        "Department",
        &insights::totals_by_department(doc, column, None),
        options.top,
    );

    section(&mut out, &format!("Top {} line items", options.top));
    let rows: Vec<Vec<String>> = insights::largest_items(doc, column, options.top)
        .into_iter()
        .map(|i| {
            vec![
                i.source_page.to_string(),
                i.description,
                i.department.unwrap_or_default(),
                format_amount(i.amount),
            ]
        })
        .collect();
    table(&mut out, &["Page", "Item", "Department", "Amount"], &rows);

    if let Some(from) = previous_budget(column) {
        section(&mut out, &format!("Largest changes ({} → {})", from.label(), column.label()));
        let rows: Vec<Vec<String>> = insights::year_over_year(doc, from, column)
            .into_iter()
            .take(options.top)
            .map(|r| {
                vec![
                    r.department,
                    format_amount(r.from),
                    format_amount(r.to),
                    format_amount(r.change),
                    r.percent.map_or_else(|| "n/a".to_string(), |p| format!("{p:+.1}%")),
                ]
            })
            .collect();
        table(&mut out, &["Department", "From", "To", "Change", "%"], &rows);
    }

    let heads = insights::staffing_headcount(doc, column);
    if !heads.is_empty() {
        section(&mut out, "Staffing");
        let rows: Vec<Vec<String>> = heads
            .iter()
            .take(options.top)
            .map(|t| vec![t.name.clone(), format_count(t.amount)])
            .collect();
        table(&mut out, &["Department", "Positions"], &rows);
    }

    out
}

/// Thousands-separated whole amount: `1234567.4` → `1,234,567`, negatives as `-1,234`.
pub fn format_amount(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if rounded < 0.0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

fn format_count(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}

/// The appropriation the given column is usually compared against.
fn previous_budget(column: Column) -> Option<Column> {
    match column {
        Column::Budget2526Request | Column::Budget2526Mayor | Column::Budget2526Final => {
            Some(Column::Budget2425Adjusted)
        }
        Column::Budget2425Adjusted | Column::Budget2425Original => Some(Column::Fy2024Actual),
        Column::Fy2024Actual | Column::Fy2025ActualYtd => None,
    }
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out, "\n{title}\n{}", "─".repeat(title.chars().count()));
}

fn totals_table(out: &mut String, label: &str, totals: &[Total], limit: usize) {
    let rows: Vec<Vec<String>> = totals
        .iter()
        .take(limit)
        .map(|t| vec![t.name.clone(), format_amount(t.amount), t.items.to_string()])
        .collect();
    table(out, &[label, "Amount", "Items"], &rows);
}

/// Left-aligned first column, right-aligned others.
fn table(out: &mut String, header: &[&str], rows: &[Vec<String>]) {
    if rows.is_empty() {
        let _ = writeln!(out, "(no data)");
        return;
    }
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(&widths)
            .enumerate()
            .map(|(i, (cell, &w))| {
                if i == 0 {
                    format!("{cell:<w$}")
                } else {
                    format!("{cell:>w$}")
                }
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let _ = writeln!(out, "{}", line(header.to_vec()));
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(out, "{}", line(rule.iter().map(String::as_str).collect()));
    for row in rows {
        let _ = writeln!(out, "{}", line(row.iter().map(String::as_str).collect()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::merge_records;
    use crate::record::{LineItem, PageMetadata, PageRecord, PageType};
    use serde_json::{json, Value};

    fn doc() -> CombinedDocument {
        let items = [
            json!({"line_item": "SALARIES", "budget_2425_adjusted": 1_000_000, "budget_2526_final": 1_200_000}),
            json!({"line_item": "TOTAL", "budget_2526_final": 1_200_000}),
        ]
        .into_iter()
        .map(|v| match v {
            Value::Object(m) => LineItem::new(m),
            _ => unreachable!(),
        })
        .collect();
        merge_records(
            vec![PageRecord::new(
                3,
                PageType::ExpenseDetail,
                PageMetadata {
                    fund: Some("GENERAL FUND".into()),
                    department: Some("POLICE".into()),
                    function: None,
                },
                items,
            )],
            Some("data/raw/budget.pdf".into()),
        )
    }

    #[test]
    fn amounts_are_grouped() {
        assert_eq!(format_amount(0.0), "0");
        assert_eq!(format_amount(999.0), "999");
        assert_eq!(format_amount(1000.0), "1,000");
        assert_eq!(format_amount(147_972_729.0), "147,972,729");
        assert_eq!(format_amount(-558_709.4), "-558,709");
    }

    #[test]
    fn report_contains_sections_and_figures() {
        let text = render_report(&doc(), &ReportOptions::default());
        assert!(text.contains("Budget report (25-26 final)"));
        assert!(text.contains("Source: data/raw/budget.pdf"));
        assert!(text.contains("Spending by fund"));
        assert!(text.contains("GENERAL FUND"));
        assert!(text.contains("1,200,000"));
        assert!(text.contains("+20.0%"));
        assert!(!text.contains("2,400,000"), "total row must not be summed");
    }

    #[test]
    fn empty_tables_say_so() {
        let text = render_report(&merge_records(vec![], None), &ReportOptions::default());
        assert!(text.contains("(no data)"));
        assert!(!text.contains("Staffing"));
    }

    #[test]
    fn actual_columns_have_no_comparison() {
        let options = ReportOptions {
            column: Column::Fy2024Actual,
            top: 3,
        };
        let text = render_report(&doc(), &options);
        assert!(!text.contains("Largest changes"));
    }
}
