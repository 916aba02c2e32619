//! In-place document edits
//!
//! Every function here is a pure `text -> text` transformation that touches
//! only the lines it has to, leaving surrounding prose as the author wrote
//! it. Edits are located through the tokenizer so commented-out template
//! rows are never matched.

use crate::parser::{
    enabler_ref_from_cells, line_count, DOWNSTREAM_HEADING, ENABLERS_HEADING, FUNCTIONAL_HEADING,
    METADATA_HEADING, NON_FUNCTIONAL_HEADING, UPSTREAM_HEADING,
};
use crate::render::{
    enabler_row, DEPENDENCY_TABLE_HEADER, ENABLER_TABLE_HEADER, FUNCTIONAL_TABLE_HEADER,
    NON_FUNCTIONAL_TABLE_HEADER,
};
use crate::tokenizer::{find_section, section_table, tokenize, Section, Table, Token};

/// Where a table lives and how to create it when missing
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub heading: &'static str,
    pub level: usize,
    /// Header and separator lines used when the table must be created
    pub header: &'static str,
    /// Match on the full heading text rather than a prefix
    pub substring_match: bool,
}

impl TableSpec {
    fn matches(&self, title: &str) -> bool {
        if self.substring_match {
            title.contains(self.heading)
        } else {
            title.starts_with(self.heading)
        }
    }
}

pub const ENABLERS_TABLE: TableSpec = TableSpec {
    heading: ENABLERS_HEADING,
    level: 2,
    header: ENABLER_TABLE_HEADER,
    substring_match: false,
};

pub const UPSTREAM_TABLE: TableSpec = TableSpec {
    heading: UPSTREAM_HEADING,
    level: 3,
    header: DEPENDENCY_TABLE_HEADER,
    substring_match: true,
};

pub const DOWNSTREAM_TABLE: TableSpec = TableSpec {
    heading: DOWNSTREAM_HEADING,
    level: 3,
    header: DEPENDENCY_TABLE_HEADER,
    substring_match: true,
};

pub const FUNCTIONAL_TABLE: TableSpec = TableSpec {
    heading: FUNCTIONAL_HEADING,
    level: 2,
    header: FUNCTIONAL_TABLE_HEADER,
    substring_match: false,
};

pub const NON_FUNCTIONAL_TABLE: TableSpec = TableSpec {
    heading: NON_FUNCTIONAL_HEADING,
    level: 2,
    header: NON_FUNCTIONAL_TABLE_HEADER,
    substring_match: false,
};

/// Line buffer that remembers the original newline style
pub(crate) struct Lines {
    pub(crate) lines: Vec<String>,
    newline: &'static str,
    trailing_newline: bool,
}

impl Lines {
    pub(crate) fn new(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
            newline: if text.contains("\r\n") { "\r\n" } else { "\n" },
            trailing_newline: text.ends_with('\n') || text.is_empty(),
        }
    }

    pub(crate) fn finish(self) -> String {
        let mut out = self.lines.join(self.newline);
        if self.trailing_newline {
            out.push_str(self.newline);
        }
        out
    }
}

fn locate(text: &str, spec: &TableSpec) -> (Vec<Token>, Option<Section>, Option<Table>) {
    let tokens = tokenize(text);
    let section = find_section(&tokens, line_count(text), |t| spec.matches(t));
    let table = section.as_ref().and_then(|s| section_table(&tokens, s));
    (tokens, section, table)
}

/// Sets `- **field**: value` inside the metadata block.
///
/// Replaces the first existing line for `field`; otherwise appends after the
/// last field of the block, creating the block under the title if needed.
pub fn set_metadata_field(text: &str, field: &str, value: &str) -> String {
    let tokens = tokenize(text);
    let mut lines = Lines::new(text);
    let new_line = format!("- **{}**: {}", field, value);

    let Some(section) = find_section(&tokens, lines.lines.len(), |t| t == METADATA_HEADING) else {
        let insert_at = tokens
            .iter()
            .find(|t| matches!(t, Token::Heading { level: 1, .. }))
            .map(|t| t.line() + 1)
            .unwrap_or(0);
        let block = vec![
            String::new(),
            format!("## {}", METADATA_HEADING),
            new_line,
            String::new(),
        ];
        lines.lines.splice(insert_at..insert_at, block);
        return lines.finish();
    };

    let body = &tokens[section.body_start..section.body_end];
    let existing = body.iter().find_map(|t| match t {
        Token::MetadataField { line, name, .. } if name == field => Some(*line),
        _ => None,
    });

    match existing {
        Some(line) => lines.lines[line] = new_line,
        None => {
            let after = body
                .iter()
                .filter(|t| matches!(t, Token::MetadataField { .. }))
                .map(Token::line)
                .last()
                .unwrap_or(section.heading_line);
            lines.lines.insert(after + 1, new_line);
        }
    }

    lines.finish()
}

/// Replaces the text of the first `# ` heading; documents without one are
/// returned unchanged
pub fn set_title(text: &str, title: &str) -> String {
    let tokens = tokenize(text);
    let Some(line) = tokens.iter().find_map(|t| match t {
        Token::Heading { level: 1, line, .. } => Some(*line),
        _ => None,
    }) else {
        return text.to_string();
    };
    let mut lines = Lines::new(text);
    lines.lines[line] = format!("# {}", title);
    lines.finish()
}

/// First cells of the data rows of the table described by `spec`
pub fn table_row_ids(text: &str, spec: &TableSpec) -> Vec<String> {
    let (_, _, table) = locate(text, spec);
    table
        .map(|t| {
            t.rows
                .iter()
                .filter(|r| !r.is_blank())
                .map(|r| r.first_cell().to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Cells of the first data row whose first cell equals `id`
pub fn table_row_cells(text: &str, spec: &TableSpec, id: &str) -> Option<Vec<String>> {
    let (_, _, table) = locate(text, spec);
    table?
        .rows
        .into_iter()
        .find(|r| !r.is_blank() && r.first_cell() == id)
        .map(|r| r.cells)
}

/// Replaces every row whose first cell equals `id`.
/// Returns `None` when the table has no such row.
pub fn replace_table_row(text: &str, spec: &TableSpec, id: &str, new_row: &str) -> Option<String> {
    let (_, _, table) = locate(text, spec);
    let table = table?;
    let matching: Vec<usize> = table
        .rows
        .iter()
        .filter(|r| r.first_cell() == id)
        .map(|r| r.line)
        .collect();
    if matching.is_empty() {
        return None;
    }

    let mut lines = Lines::new(text);
    for line in matching {
        lines.lines[line] = new_row.to_string();
    }
    Some(lines.finish())
}

/// Removes every row whose first cell equals `id`; returns the new text and
/// how many rows were removed
pub fn remove_table_rows(text: &str, spec: &TableSpec, id: &str) -> (String, usize) {
    let (_, _, table) = locate(text, spec);
    let Some(table) = table else {
        return (text.to_string(), 0);
    };
    let doomed: Vec<usize> = table
        .rows
        .iter()
        .filter(|r| r.first_cell() == id)
        .map(|r| r.line)
        .collect();
    if doomed.is_empty() {
        return (text.to_string(), 0);
    }

    let mut lines = Lines::new(text);
    for line in doomed.iter().rev() {
        lines.lines.remove(*line);
    }
    (lines.finish(), doomed.len())
}

/// Appends `row` as the last row of the table, creating the table (and its
/// section at the end of the document) when absent
pub fn append_table_row(text: &str, spec: &TableSpec, row: &str) -> String {
    let (_, section, table) = locate(text, spec);
    let mut lines = Lines::new(text);

    match (section, table) {
        (Some(_), Some(table)) => {
            let at = table.last_line() + 1;
            lines.lines.insert(at, row.to_string());
        }
        (Some(section), None) => {
            let mut block = vec![String::new()];
            block.extend(spec.header.lines().map(str::to_string));
            block.push(row.to_string());
            let at = section.heading_line + 1;
            lines.lines.splice(at..at, block);
        }
        (None, _) => {
            while lines.lines.last().is_some_and(|l| l.trim().is_empty()) {
                lines.lines.pop();
            }
            if !lines.lines.is_empty() {
                lines.lines.push(String::new());
            }
            lines
                .lines
                .push(format!("{} {}", "#".repeat(spec.level), spec.heading));
            lines.lines.push(String::new());
            lines.lines.extend(spec.header.lines().map(str::to_string));
            lines.lines.push(row.to_string());
            lines.trailing_newline = true;
        }
    }

    lines.finish()
}

/// Replaces all data rows of the table with `rows`, creating it if absent
pub fn replace_table_rows(text: &str, spec: &TableSpec, rows: &[String]) -> String {
    let (_, section, table) = locate(text, spec);

    match (section, table) {
        (Some(_), Some(table)) => {
            let mut lines = Lines::new(text);
            let keep_through = table.separator_line.unwrap_or(table.header_line);
            let mut removed: Vec<usize> = table.rows.iter().map(|r| r.line).collect();
            removed.sort_unstable();
            for line in removed.iter().rev() {
                lines.lines.remove(*line);
            }
            let at = keep_through + 1;
            lines.lines.splice(at..at, rows.iter().cloned());
            lines.finish()
        }
        _ if rows.is_empty() => text.to_string(),
        _ => {
            let mut out = text.to_string();
            for row in rows {
                out = append_table_row(&out, spec, row);
            }
            out
        }
    }
}

/// Upgrades a single-column or legacy six-column `## Enablers` table to the
/// canonical `| Enabler ID | Description |` shape. Other text is untouched.
pub fn normalize_enabler_table(text: &str) -> String {
    let (_, _, table) = locate(text, &ENABLERS_TABLE);
    let Some(table) = table else {
        return text.to_string();
    };
    let canonical = table.header.len() == 2
        && table.separator_line.is_some()
        && table.rows.iter().all(|r| r.cells.len() == 2);
    if canonical {
        return text.to_string();
    }

    let mut lines = Lines::new(text);
    for row in &table.rows {
        if let Some(enabler) = enabler_ref_from_cells(&row.cells) {
            lines.lines[row.line] = enabler_row(&enabler.id, &enabler.description);
        }
    }

    let mut header = ENABLER_TABLE_HEADER.lines().map(str::to_string);
    let header_line = header.next().unwrap_or_default();
    let separator_line = header.next().unwrap_or_default();
    lines.lines[table.header_line] = header_line;
    match table.separator_line {
        Some(line) => lines.lines[line] = separator_line,
        None => lines.lines.insert(table.header_line + 1, separator_line),
    }

    lines.finish()
}
