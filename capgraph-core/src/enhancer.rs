//! Read-time view enhancement
//!
//! Capability documents store only `{id, description}` per enabler. When a
//! document is shown, every enabler table is rewritten from the enabler
//! files themselves, and dependency ids get the referenced capability's
//! name. The stored document is never modified here.

use std::collections::HashMap;
use tracing::debug;

use crate::context::StoreContext;
use crate::edit::Lines;
use crate::models::{Capability, Enabler};
use crate::parser::{is_capability_id, is_enabler_id};
use crate::render::table_row;
use crate::tokenizer::{tables_where, tokenize, Table};

pub const VIEW_TABLE_HEADER: &str = "| Enabler ID | Name | Status | Approval | Priority |";
pub const VIEW_TABLE_SEPARATOR: &str = "|------------|------|--------|----------|----------|";
pub const NOT_FOUND_MARKER: &str = "(Not Found)";
const EMPTY_CELL: &str = "-";
const VIEW_COLUMNS: usize = 5;

/// Live fields shown for an enabler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnablerSummary {
    pub name: String,
    pub status: String,
    pub approval: String,
    pub priority: String,
}

impl From<&Enabler> for EnablerSummary {
    fn from(enabler: &Enabler) -> Self {
        Self {
            name: enabler.name.clone(),
            status: enabler.status.clone(),
            approval: enabler.approval.clone(),
            priority: enabler.priority.clone(),
        }
    }
}

/// Enabler id to live fields, built by scanning every enabler once
#[derive(Debug, Clone, Default)]
pub struct EnablerIndex {
    entries: HashMap<String, EnablerSummary>,
}

impl EnablerIndex {
    pub fn build(ctx: &StoreContext) -> Self {
        let index = Self::from_enablers(ctx.enablers().iter().map(|l| &l.entity));
        debug!(enablers = index.len(), "Built enabler index");
        index
    }

    pub fn from_enablers<'a>(enablers: impl IntoIterator<Item = &'a Enabler>) -> Self {
        let entries = enablers
            .into_iter()
            .filter(|e| !e.id.is_empty())
            .map(|e| (e.id.clone(), EnablerSummary::from(e)))
            .collect();
        Self { entries }
    }

    pub fn get(&self, id: &str) -> Option<&EnablerSummary> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Capability id to display name
#[derive(Debug, Clone, Default)]
pub struct CapabilityIndex {
    names: HashMap<String, String>,
}

impl CapabilityIndex {
    pub fn build(ctx: &StoreContext) -> Self {
        Self::from_capabilities(ctx.capabilities().iter().map(|l| &l.entity))
    }

    pub fn from_capabilities<'a>(capabilities: impl IntoIterator<Item = &'a Capability>) -> Self {
        let names = capabilities
            .into_iter()
            .filter(|c| !c.id.is_empty())
            .map(|c| (c.id.clone(), c.name.clone()))
            .collect();
        Self { names }
    }

    pub fn name(&self, id: &str) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }
}

fn or_dash(value: &str) -> &str {
    if value.trim().is_empty() {
        EMPTY_CELL
    } else {
        value
    }
}

/// Five-column view row for `id`
pub fn enabler_view_row(id: &str, enablers: &EnablerIndex) -> String {
    match enablers.get(id) {
        Some(e) => table_row(&[
            id,
            or_dash(&e.name),
            or_dash(&e.status),
            or_dash(&e.approval),
            or_dash(&e.priority),
        ]),
        None => table_row(&[id, NOT_FOUND_MARKER, EMPTY_CELL, EMPTY_CELL, EMPTY_CELL]),
    }
}

/// Current, single-column and legacy six-column enabler tables. The legacy
/// header says `ID`, so it is recognised by its rows.
fn is_enabler_table(table: &Table) -> bool {
    if table.header_contains("Enabler ID") {
        return true;
    }
    table.header.first().is_some_and(|h| h == "ID")
        && table
            .rows
            .iter()
            .any(|r| r.cells.first().is_some_and(|c| is_enabler_id(c)))
}

fn is_dependency_table(table: &Table) -> bool {
    table.header.first().is_some_and(|h| h.contains("Capability ID"))
}

/// Pads or cuts a row without an enabler id to the view's column count.
/// Cells are kept as written, already escaped.
fn fit_to_view(cells: &[String]) -> String {
    let mut fitted: Vec<&str> = cells.iter().map(String::as_str).take(VIEW_COLUMNS).collect();
    fitted.resize(VIEW_COLUMNS, EMPTY_CELL);
    format!("| {} |", fitted.join(" | "))
}

fn enhance_enabler_table(lines: &mut Lines, table: &Table, enablers: &EnablerIndex) -> Vec<usize> {
    let mut removed = Vec::new();
    for row in &table.rows {
        match row.cells.iter().find(|c| is_enabler_id(c)) {
            Some(id) => lines.lines[row.line] = enabler_view_row(id, enablers),
            None if row.is_blank() => removed.push(row.line),
            None => lines.lines[row.line] = fit_to_view(&row.cells),
        }
    }
    lines.lines[table.header_line] = VIEW_TABLE_HEADER.to_string();
    // A missing separator is inserted by the caller once all in-place
    // rewrites are done
    if let Some(line) = table.separator_line {
        lines.lines[line] = VIEW_TABLE_SEPARATOR.to_string();
    }
    removed
}

fn enhance_dependency_table(lines: &mut Lines, table: &Table, capabilities: &CapabilityIndex) {
    for row in &table.rows {
        let Some(id) = row.cells.first().filter(|c| is_capability_id(c)) else {
            continue;
        };
        let Some(name) = capabilities.name(id).filter(|n| !n.is_empty()) else {
            continue;
        };
        let mut cells: Vec<String> = row.cells.clone();
        cells[0] = format!("{}<br/>*{}*", id, name);
        let refs: Vec<&str> = cells.iter().map(String::as_str).collect();
        lines.lines[row.line] = table_row(&refs);
    }
}

/// Rewrites enabler tables to the live five-column view and annotates
/// dependency ids with capability names
pub fn enhance_for_render(
    text: &str,
    enablers: &EnablerIndex,
    capabilities: &CapabilityIndex,
) -> String {
    let tokens = tokenize(text);
    let mut lines = Lines::new(text);

    let mut removed = Vec::new();
    let mut missing_separators = Vec::new();
    for table in tables_where(&tokens, |_| true) {
        if is_enabler_table(&table) {
            removed.extend(enhance_enabler_table(&mut lines, &table, enablers));
            if table.separator_line.is_none() {
                missing_separators.push(table.header_line);
            }
        } else if is_dependency_table(&table) {
            enhance_dependency_table(&mut lines, &table, capabilities);
        }
    }

    // Structural changes last, bottom-up, so earlier indices stay valid
    let mut edits: Vec<(usize, Option<String>)> = removed
        .into_iter()
        .map(|line| (line, None))
        .chain(
            missing_separators
                .into_iter()
                .map(|header| (header + 1, Some(VIEW_TABLE_SEPARATOR.to_string()))),
        )
        .collect();
    edits.sort_by(|a, b| b.0.cmp(&a.0));
    for (line, insert) in edits {
        match insert {
            Some(separator) => lines.lines.insert(line, separator),
            None => {
                lines.lines.remove(line);
            }
        }
    }

    lines.finish()
}

/// Builds both indexes from `ctx` and enhances `text`
pub fn enhance_with_context(ctx: &StoreContext, text: &str) -> String {
    let enablers = EnablerIndex::build(ctx);
    let capabilities = CapabilityIndex::build(ctx);
    enhance_for_render(text, &enablers, &capabilities)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabler(id: &str, name: &str, status: &str) -> Enabler {
        Enabler {
            id: id.to_string(),
            name: name.to_string(),
            status: status.to_string(),
            approval: "Approved".to_string(),
            priority: "High".to_string(),
            ..Default::default()
        }
    }

    fn capability(id: &str, name: &str) -> Capability {
        Capability {
            id: id.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_legacy_table_shows_live_status() {
        let doc = "## Enablers\n| ID | Name | Description | Status | Approval | Priority |\n|---|---|---|---|---|---|\n| ENB-000001 | Old name | Cache | Draft | Pending | Low |\n";
        let index =
            EnablerIndex::from_enablers(&[enabler("ENB-000001", "Cache warmer", "Implemented")]);
        let out = enhance_for_render(doc, &index, &CapabilityIndex::default());

        assert!(out.contains("| ENB-000001 | Cache warmer | Implemented | Approved | High |"));
        assert!(!out.contains("Draft"));
        assert!(out.contains(VIEW_TABLE_HEADER));
    }

    #[test]
    fn test_current_table_is_joined() {
        let doc = "## Enablers\n\n| Enabler ID | Description |\n|------------|--------------|\n| ENB-000001 | Warm the cache |\n\nAfter.\n";
        let index = EnablerIndex::from_enablers(&[enabler("ENB-000001", "Cache", "Ready")]);
        let out = enhance_for_render(doc, &index, &CapabilityIndex::default());
        assert_eq!(
            out,
            "## Enablers\n\n| Enabler ID | Name | Status | Approval | Priority |\n|------------|------|--------|----------|----------|\n| ENB-000001 | Cache | Ready | Approved | High |\n\nAfter.\n"
        );
    }

    #[test]
    fn test_single_column_table_without_separator() {
        let doc = "## Enablers\n| Enabler ID |\n| ENB-000001 |\n| ENB-000002 |\n";
        let index = EnablerIndex::from_enablers(&[enabler("ENB-000001", "Cache", "Ready")]);
        let out = enhance_for_render(doc, &index, &CapabilityIndex::default());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[1], VIEW_TABLE_HEADER);
        assert_eq!(lines[2], VIEW_TABLE_SEPARATOR);
        assert_eq!(lines[3], "| ENB-000001 | Cache | Ready | Approved | High |");
        assert_eq!(lines[4], "| ENB-000002 | (Not Found) | - | - | - |");
    }

    #[test]
    fn test_blank_rows_are_dropped() {
        let doc = "| Enabler ID | Description |\n|---|---|\n| | |\n| ENB-000001 | x |\n";
        let out = enhance_for_render(doc, &EnablerIndex::default(), &CapabilityIndex::default());
        assert_eq!(out.lines().count(), 3);
        assert!(out.contains("(Not Found)"));
    }

    #[test]
    fn test_rows_without_enabler_id_match_view_width() {
        let doc = "## Enablers\n| Enabler ID | Description |\n|---|---|\n| ENB-000001 | x |\n| see notes | below |\n";
        let out = enhance_for_render(doc, &EnablerIndex::default(), &CapabilityIndex::default());
        assert!(out.contains("| see notes | below | - | - | - |"));

        let legacy = "## Enablers\n| ID | Name | Description | Status | Approval | Priority |\n|---|---|---|---|---|---|\n| ENB-000001 | a | b | c | d | e |\n| TBD | a | b | c | d | e |\n";
        let out = enhance_for_render(legacy, &EnablerIndex::default(), &CapabilityIndex::default());
        assert!(out.contains("| TBD | a | b | c | d |\n"));

        for line in out.lines().filter(|l| l.starts_with("| ")) {
            assert_eq!(line.matches(" | ").count(), VIEW_COLUMNS - 1, "{}", line);
        }
    }

    #[test]
    fn test_dependency_rows_get_capability_name() {
        let doc = "### Internal Upstream Dependency\n\n| Capability ID | Description |\n|----------------|--------------|\n| CAP-000002 | Needs billing |\n| CAP-000404 | Gone |\n";
        let caps = CapabilityIndex::from_capabilities(&[capability("CAP-000002", "Billing")]);
        let out = enhance_for_render(doc, &EnablerIndex::default(), &caps);
        assert!(out.contains("| CAP-000002<br/>*Billing* | Needs billing |"));
        assert!(out.contains("| CAP-000404 | Gone |"));

        // Enhancing twice does not stack names
        assert_eq!(enhance_for_render(&out, &EnablerIndex::default(), &caps), out);
    }

    #[test]
    fn test_other_tables_untouched() {
        let doc = "| ID | Name | Requirement |\n|---|---|---|\n| FR-000001 | Login | Users log in |\n";
        let out = enhance_for_render(doc, &EnablerIndex::default(), &CapabilityIndex::default());
        assert_eq!(out, doc);
    }

    #[test]
    fn test_commented_rows_are_not_enhanced() {
        let doc = "<!--\n| Enabler ID | Description |\n| ENB-XXXXXX | template |\n-->\n";
        let out = enhance_for_render(doc, &EnablerIndex::default(), &CapabilityIndex::default());
        assert_eq!(out, doc);
    }
}
