//! Line tokenizer for capability and enabler documents
//!
//! Documents are read line by line into typed tokens before any field or
//! table extraction happens. Every token remembers its zero-based line index
//! so that edits can splice the original text without re-rendering it.
//!
//! Text inside `<!-- ... -->` comments never produces a token, which keeps
//! template documentation out of the parsed data.

use regex::Regex;
use std::sync::LazyLock;

static METADATA_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-\s+\*\*([^*]+)\*\*:\s*(.*)$").unwrap());

static SEPARATOR_CELL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^:?-+:?$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Heading {
        line: usize,
        level: usize,
        text: String,
    },
    /// `- **Field**: value`
    MetadataField {
        line: usize,
        name: String,
        value: String,
    },
    /// A line that starts and ends with `|`
    TableRow { line: usize, cells: Vec<String> },
    Text { line: usize, text: String },
    Blank { line: usize },
}

impl Token {
    pub fn line(&self) -> usize {
        match self {
            Token::Heading { line, .. }
            | Token::MetadataField { line, .. }
            | Token::TableRow { line, .. }
            | Token::Text { line, .. }
            | Token::Blank { line } => *line,
        }
    }

    pub fn is_heading(&self) -> bool {
        matches!(self, Token::Heading { .. })
    }
}

/// Tokenizes `text`, dropping everything inside HTML comments
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut in_comment = false;

    for (index, raw) in text.lines().enumerate() {
        let visible = strip_comments(raw, &mut in_comment);
        let Some(visible) = visible else {
            continue;
        };
        tokens.push(classify(index, &visible));
    }

    tokens
}

/// Removes comment spans from one line, tracking multi-line comments.
/// Returns `None` when nothing outside a comment remains on a line that had one.
fn strip_comments(line: &str, in_comment: &mut bool) -> Option<String> {
    if !*in_comment && !line.contains("<!--") {
        return Some(line.to_string());
    }

    let mut visible = String::new();
    let mut rest = line;
    loop {
        if *in_comment {
            match rest.find("-->") {
                Some(end) => {
                    *in_comment = false;
                    rest = &rest[end + 3..];
                }
                None => break,
            }
        } else {
            match rest.find("<!--") {
                Some(start) => {
                    visible.push_str(&rest[..start]);
                    *in_comment = true;
                    rest = &rest[start + 4..];
                }
                None => {
                    visible.push_str(rest);
                    break;
                }
            }
        }
    }

    if visible.trim().is_empty() {
        None
    } else {
        Some(visible)
    }
}

fn classify(line: usize, raw: &str) -> Token {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return Token::Blank { line };
    }

    if trimmed.starts_with('#') {
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        let rest = &trimmed[level..];
        if rest.is_empty() || rest.starts_with(' ') {
            return Token::Heading {
                line,
                level,
                text: rest.trim().to_string(),
            };
        }
    }

    if let Some(caps) = METADATA_FIELD.captures(trimmed) {
        return Token::MetadataField {
            line,
            name: caps[1].trim().to_string(),
            value: caps[2].trim().to_string(),
        };
    }

    if is_table_line(trimmed) {
        return Token::TableRow {
            line,
            cells: split_cells(trimmed),
        };
    }

    Token::Text {
        line,
        text: trimmed.to_string(),
    }
}

/// True when the trimmed line starts and ends with `|`
pub fn is_table_line(trimmed: &str) -> bool {
    trimmed.len() >= 2 && trimmed.starts_with('|') && trimmed.ends_with('|')
}

/// Splits a `| a | b |` line into trimmed cells; `\|` stays inside a cell
pub fn split_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let inner = inner.strip_suffix('|').unwrap_or(inner);

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

/// True for `|-----|:---:|` style separator rows
pub fn is_separator(cells: &[String]) -> bool {
    !cells.is_empty() && cells.iter().all(|c| SEPARATOR_CELL.is_match(c))
}

/// A heading and the line range it governs (up to the next heading)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub level: usize,
    pub title: String,
    pub heading_line: usize,
    /// Index of the first token after the heading
    pub body_start: usize,
    /// Index one past the last token of the body
    pub body_end: usize,
    /// Line index where the next heading starts, or the line count
    pub end_line: usize,
}

/// Finds the first heading whose text satisfies `matches`
pub fn find_section<F>(tokens: &[Token], total_lines: usize, matches: F) -> Option<Section>
where
    F: Fn(&str) -> bool,
{
    let position = tokens.iter().position(|t| match t {
        Token::Heading { text, .. } => matches(text),
        _ => false,
    })?;

    let Token::Heading { level, text, line } = &tokens[position] else {
        return None;
    };

    let body_start = position + 1;
    let body_end = tokens[body_start..]
        .iter()
        .position(Token::is_heading)
        .map(|offset| body_start + offset)
        .unwrap_or(tokens.len());
    let end_line = tokens
        .get(body_end)
        .map(Token::line)
        .unwrap_or(total_lines);

    Some(Section {
        level: *level,
        title: text.clone(),
        heading_line: *line,
        body_start,
        body_end,
        end_line,
    })
}

/// One data row of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub line: usize,
    pub cells: Vec<String>,
}

impl Row {
    pub fn first_cell(&self) -> &str {
        self.cells.first().map(String::as_str).unwrap_or("")
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.is_empty())
    }
}

/// The first table in a section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    pub header_line: usize,
    pub separator_line: Option<usize>,
    pub rows: Vec<Row>,
}

impl Table {
    /// Line after which a new row should be inserted
    pub fn last_line(&self) -> usize {
        self.rows
            .last()
            .map(|r| r.line)
            .or(self.separator_line)
            .unwrap_or(self.header_line)
    }

    pub fn header_contains(&self, needle: &str) -> bool {
        self.header.iter().any(|h| h.contains(needle))
    }
}

/// Reads the first table inside `section`: header, optional separator, rows
pub fn section_table(tokens: &[Token], section: &Section) -> Option<Table> {
    let body = &tokens[section.body_start..section.body_end];
    let mut table_rows = body.iter().filter_map(|t| match t {
        Token::TableRow { line, cells } => Some((*line, cells)),
        _ => None,
    });

    let (header_line, header) = table_rows.next()?;
    let mut separator_line = None;
    let mut rows = Vec::new();

    for (line, cells) in table_rows {
        if separator_line.is_none() && rows.is_empty() && is_separator(cells) {
            separator_line = Some(line);
            continue;
        }
        rows.push(Row {
            line,
            cells: cells.clone(),
        });
    }

    Some(Table {
        header: header.clone(),
        header_line,
        separator_line,
        rows,
    })
}

/// Every table in the document whose header satisfies `matches`
pub fn tables_where<F>(tokens: &[Token], matches: F) -> Vec<Table>
where
    F: Fn(&[String]) -> bool,
{
    let mut tables = Vec::new();
    let mut current: Option<Table> = None;

    for token in tokens {
        match (token, current.as_mut()) {
            (Token::TableRow { line, cells }, Some(table)) => {
                if table.separator_line.is_none() && table.rows.is_empty() && is_separator(cells)
                {
                    table.separator_line = Some(*line);
                } else {
                    table.rows.push(Row {
                        line: *line,
                        cells: cells.clone(),
                    });
                }
            }
            (Token::TableRow { line, cells }, None) => {
                current = Some(Table {
                    header: cells.clone(),
                    header_line: *line,
                    separator_line: None,
                    rows: Vec::new(),
                });
            }
            _ => {
                if let Some(done) = current.take() {
                    tables.push(done);
                }
            }
        }
    }
    if let Some(done) = current.take() {
        tables.push(done);
    }

    tables.into_iter().filter(|t| matches(&t.header)).collect()
}
