//! Entity parser
//!
//! Extracts capabilities and enablers from document text using the fixed
//! metadata/table grammar. Parsing never fails: absent sections give empty
//! collections and absent fields give empty strings.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::StoreError;
use crate::models::{
    Capability, Dependency, DocumentType, Enabler, EnablerRef, ParsedDocument, Requirement,
};
use crate::tokenizer::{find_section, section_table, tokenize, Row, Token};

static CAPABILITY_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^CAP-\d+$").unwrap());
static ENABLER_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^ENB-\d+$").unwrap());

pub const METADATA_HEADING: &str = "Metadata";
pub const ENABLERS_HEADING: &str = "Enablers";
pub const UPSTREAM_HEADING: &str = "Internal Upstream Dependency";
pub const DOWNSTREAM_HEADING: &str = "Internal Downstream Impact";
pub const EXTERNAL_UPSTREAM_HEADING: &str = "External Upstream Dependencies";
pub const EXTERNAL_DOWNSTREAM_HEADING: &str = "External Downstream Impact";
pub const FUNCTIONAL_HEADING: &str = "Functional Requirements";
pub const NON_FUNCTIONAL_HEADING: &str = "Non-Functional Requirements";

/// Minimum cell count for requirement and enabler tables
pub const MIN_ENTITY_COLUMNS: usize = 3;
/// Minimum cell count for dependency tables
pub const MIN_DEPENDENCY_COLUMNS: usize = 2;

/// Ordered `- **Field**: value` pairs from the metadata block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub fields: Vec<(String, String)>,
}

impl Metadata {
    /// Case-sensitive lookup by field name; first occurrence wins
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_or_empty(&self, name: &str) -> String {
        self.get(name).unwrap_or("").to_string()
    }

    fn get_optional(&self, name: &str) -> Option<String> {
        self.get(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// Known shapes of the `## Enablers` table, chosen by counting cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnablerTableLayout {
    /// `| Enabler ID |`
    IdOnly,
    /// `| Enabler ID | Description |` (current)
    IdDescription,
    /// `| ID | Name | Description | Status | Approval | Priority |`
    Legacy,
}

impl EnablerTableLayout {
    pub fn from_cell_count(count: usize) -> Self {
        match count {
            0 | 1 => EnablerTableLayout::IdOnly,
            2..=5 => EnablerTableLayout::IdDescription,
            _ => EnablerTableLayout::Legacy,
        }
    }

    /// Index of the description cell, if the layout has one
    pub fn description_column(&self) -> Option<usize> {
        match self {
            EnablerTableLayout::IdOnly => None,
            EnablerTableLayout::IdDescription => Some(1),
            EnablerTableLayout::Legacy => Some(2),
        }
    }
}

pub fn is_capability_id(value: &str) -> bool {
    CAPABILITY_ID.is_match(value)
}

pub fn is_enabler_id(value: &str) -> bool {
    ENABLER_ID.is_match(value)
}

/// Parses `text` as a document of the declared type
pub fn parse(text: &str, doc_type: DocumentType) -> ParsedDocument {
    match doc_type {
        DocumentType::Capability => ParsedDocument::Capability(parse_capability(text)),
        DocumentType::Enabler => ParsedDocument::Enabler(parse_enabler(text)),
    }
}

/// Determines the type from the `Type` field, falling back to the id prefix
pub fn detect_type(text: &str) -> Option<DocumentType> {
    let metadata = extract_metadata(text);
    if let Some(doc_type) = metadata.get("Type").and_then(|t| t.parse::<DocumentType>().ok()) {
        return Some(doc_type);
    }
    let id = metadata.get("ID")?;
    if id.starts_with("CAP-") {
        Some(DocumentType::Capability)
    } else if id.starts_with("ENB-") {
        Some(DocumentType::Enabler)
    } else {
        None
    }
}

/// Reads the metadata block bounded by `## Metadata` and the next heading
pub fn extract_metadata(text: &str) -> Metadata {
    let tokens = tokenize(text);
    metadata_from_tokens(&tokens, line_count(text))
}

fn metadata_from_tokens(tokens: &[Token], total_lines: usize) -> Metadata {
    let Some(section) = find_section(tokens, total_lines, |t| t == METADATA_HEADING) else {
        return Metadata::default();
    };

    let fields = tokens[section.body_start..section.body_end]
        .iter()
        .filter_map(|t| match t {
            Token::MetadataField { name, value, .. } => Some((name.clone(), value.clone())),
            _ => None,
        })
        .collect();

    Metadata { fields }
}

/// Data rows of the first table under a heading matching `heading_matches`.
///
/// Rows narrower than `min_columns` are skipped, as are rows where every
/// cell is blank.
pub fn extract_table<F>(text: &str, heading_matches: F, min_columns: usize) -> Vec<Vec<String>>
where
    F: Fn(&str) -> bool,
{
    let tokens = tokenize(text);
    table_rows(&tokens, line_count(text), heading_matches, min_columns)
        .into_iter()
        .map(|r| r.cells)
        .collect()
}

fn table_rows<F>(
    tokens: &[Token],
    total_lines: usize,
    heading_matches: F,
    min_columns: usize,
) -> Vec<Row>
where
    F: Fn(&str) -> bool,
{
    let Some(section) = find_section(tokens, total_lines, heading_matches) else {
        return Vec::new();
    };
    let Some(table) = section_table(tokens, &section) else {
        return Vec::new();
    };

    table
        .rows
        .into_iter()
        .filter(|row| {
            if row.cells.len() < min_columns {
                let ambiguous = StoreError::ParseAmbiguous {
                    section: section.title.clone(),
                    columns: row.cells.len(),
                    expected: min_columns,
                };
                debug!(error = %ambiguous, line = row.line, "Skipping narrow table row");
                return false;
            }
            !row.is_blank()
        })
        .collect()
}

/// Reads one `## Enablers` row in any of the three layouts
pub fn enabler_ref_from_cells(cells: &[String]) -> Option<EnablerRef> {
    let id = cells.first()?.trim();
    if !is_enabler_id(id) {
        return None;
    }
    let layout = EnablerTableLayout::from_cell_count(cells.len());
    let description = layout
        .description_column()
        .and_then(|i| cells.get(i))
        .cloned()
        .unwrap_or_default();
    Some(EnablerRef {
        id: id.to_string(),
        description,
    })
}

fn dependency_from_cells(cells: &[String]) -> Option<Dependency> {
    let id = cells.first()?.trim();
    if !is_capability_id(id) {
        return None;
    }
    Some(Dependency {
        capability_id: id.to_string(),
        description: cells.get(1).cloned().unwrap_or_default(),
    })
}

pub fn parse_capability(text: &str) -> Capability {
    let tokens = tokenize(text);
    let total = line_count(text);
    let metadata = metadata_from_tokens(&tokens, total);

    // The enabler table may be a single ID column, so no width minimum here;
    // layouts are told apart per row by cell count.
    let enablers = table_rows(&tokens, total, |t| t.starts_with(ENABLERS_HEADING), 1)
        .iter()
        .filter_map(|r| enabler_ref_from_cells(&r.cells))
        .collect();

    let upstream_deps = dependency_rows(&tokens, total, UPSTREAM_HEADING);
    let downstream_deps = dependency_rows(&tokens, total, DOWNSTREAM_HEADING);

    Capability {
        id: metadata.get_or_empty("ID"),
        name: metadata.get_or_empty("Name"),
        status: metadata.get_or_empty("Status"),
        approval: metadata.get_or_empty("Approval"),
        priority: metadata.get_or_empty("Priority"),
        system: metadata.get_optional("System"),
        component: metadata.get_optional("Component"),
        owner: metadata.get_or_empty("Owner"),
        enablers,
        upstream_deps,
        downstream_deps,
        external_upstream: section_text(&tokens, total, EXTERNAL_UPSTREAM_HEADING),
        external_downstream: section_text(&tokens, total, EXTERNAL_DOWNSTREAM_HEADING),
    }
}

fn dependency_rows(tokens: &[Token], total: usize, heading: &str) -> Vec<Dependency> {
    table_rows(tokens, total, |t| t.contains(heading), MIN_DEPENDENCY_COLUMNS)
        .iter()
        .filter_map(|r| dependency_from_cells(&r.cells))
        .collect()
}

/// Non-table text lines under a heading, joined with newlines
fn section_text(tokens: &[Token], total: usize, heading: &str) -> String {
    let Some(section) = find_section(tokens, total, |t| t.starts_with(heading)) else {
        return String::new();
    };
    tokens[section.body_start..section.body_end]
        .iter()
        .filter_map(|t| match t {
            Token::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// First paragraph of prose under a heading
fn first_paragraph(tokens: &[Token], total: usize, heading: &str) -> Option<String> {
    let section = find_section(tokens, total, |t| t.starts_with(heading))?;
    let paragraph: Vec<&str> = tokens[section.body_start..section.body_end]
        .iter()
        .skip_while(|t| !matches!(t, Token::Text { .. }))
        .map_while(|t| match t {
            Token::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    if paragraph.is_empty() {
        None
    } else {
        Some(paragraph.join(" "))
    }
}

pub fn parse_enabler(text: &str) -> Enabler {
    let tokens = tokenize(text);
    let total = line_count(text);
    let metadata = metadata_from_tokens(&tokens, total);

    let description = metadata
        .get_optional("Description")
        .or_else(|| first_paragraph(&tokens, total, "Technical Overview"))
        .or_else(|| first_paragraph(&tokens, total, "Purpose"))
        .unwrap_or_default();

    // Placeholders such as `CAP-XXXXXX` or `None` mean unparented
    let capability_id = metadata
        .get("Capability ID")
        .and_then(|v| v.split_whitespace().next())
        .filter(|v| is_capability_id(v))
        .map(str::to_string);

    let functional_requirements = requirement_rows(
        &tokens,
        total,
        |t| t.starts_with(FUNCTIONAL_HEADING),
        "FR-",
        false,
    );
    let non_functional_requirements = requirement_rows(
        &tokens,
        total,
        |t| t.starts_with(NON_FUNCTIONAL_HEADING),
        "NFR-",
        true,
    );

    Enabler {
        id: metadata.get_or_empty("ID"),
        name: metadata.get_or_empty("Name"),
        description,
        status: metadata.get_or_empty("Status"),
        approval: metadata.get_or_empty("Approval"),
        priority: metadata.get_or_empty("Priority"),
        capability_id,
        functional_requirements,
        non_functional_requirements,
    }
}

/// Positions of requirement columns, matched by header name when present
struct RequirementColumns {
    id: usize,
    name: usize,
    req_type: Option<usize>,
    requirement: usize,
    priority: usize,
    status: usize,
    approval: usize,
}

impl RequirementColumns {
    fn positional(with_type: bool) -> Self {
        if with_type {
            Self {
                id: 0,
                name: 1,
                req_type: Some(2),
                requirement: 3,
                priority: 4,
                status: 5,
                approval: 6,
            }
        } else {
            Self {
                id: 0,
                name: 1,
                req_type: None,
                requirement: 2,
                priority: 3,
                status: 4,
                approval: 5,
            }
        }
    }

    fn from_header(header: &[String], with_type: bool) -> Self {
        let defaults = Self::positional(with_type);
        let find = |names: &[&str], fallback: usize| {
            header
                .iter()
                .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
                .unwrap_or(fallback)
        };
        Self {
            id: find(&["ID"], defaults.id),
            name: find(&["Name"], defaults.name),
            req_type: defaults.req_type.map(|d| find(&["Type"], d)),
            requirement: find(&["Requirement", "Description"], defaults.requirement),
            priority: find(&["Priority"], defaults.priority),
            status: find(&["Status"], defaults.status),
            approval: find(&["Approval"], defaults.approval),
        }
    }
}

fn requirement_rows<F>(
    tokens: &[Token],
    total: usize,
    heading_matches: F,
    id_prefix: &str,
    with_type: bool,
) -> Vec<Requirement>
where
    F: Fn(&str) -> bool,
{
    let Some(section) = find_section(tokens, total, heading_matches) else {
        return Vec::new();
    };
    let Some(table) = section_table(tokens, &section) else {
        return Vec::new();
    };
    let columns = RequirementColumns::from_header(&table.header, with_type);

    table
        .rows
        .iter()
        .filter(|r| r.cells.len() >= MIN_ENTITY_COLUMNS && !r.is_blank())
        .filter(|r| r.cells.get(columns.id).is_some_and(|id| id.starts_with(id_prefix)))
        .map(|r| {
            let cell = |i: usize| r.cells.get(i).cloned().unwrap_or_default();
            Requirement {
                id: cell(columns.id),
                name: cell(columns.name),
                requirement: cell(columns.requirement),
                priority: cell(columns.priority),
                status: cell(columns.status),
                approval: cell(columns.approval),
                req_type: columns.req_type.map(cell).filter(|t| !t.is_empty()),
            }
        })
        .collect()
}

pub(crate) fn line_count(text: &str) -> usize {
    text.lines().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPABILITY_DOC: &str = r#"# User Authentication

## Metadata
- **Name**: User Authentication
- **Type**: Capability
- **System**: Identity
- **Component**: Gateway
- **ID**: CAP-123456
- **Owner**: Platform Team
- **Status**: In Progress
- **Approval**: Approved
- **Priority**: High

## Enablers

| Enabler ID | Description |
|------------|--------------|
| ENB-000001 | Password login |
| ENB-000002 | OAuth bridge |

## Dependencies

### Internal Upstream Dependency

| Capability ID | Description |
|----------------|--------------|
| CAP-000002 | Needs user store |

### Internal Downstream Impact

| Capability ID | Description |
|----------------|--------------|

### External Upstream Dependencies

Corporate LDAP
"#;

    #[test]
    fn test_parse_capability_fields_and_tables() {
        let cap = parse_capability(CAPABILITY_DOC);

        assert_eq!(cap.id, "CAP-123456");
        assert_eq!(cap.name, "User Authentication");
        assert_eq!(cap.status, "In Progress");
        assert_eq!(cap.approval, "Approved");
        assert_eq!(cap.priority, "High");
        assert_eq!(cap.system.as_deref(), Some("Identity"));
        assert_eq!(cap.component.as_deref(), Some("Gateway"));
        assert_eq!(cap.owner, "Platform Team");
        assert_eq!(cap.enablers.len(), 2);
        assert_eq!(cap.enablers[1].id, "ENB-000002");
        assert_eq!(cap.enablers[1].description, "OAuth bridge");
        assert_eq!(cap.upstream_deps, vec![Dependency::new("CAP-000002", "Needs user store")]);
        assert!(cap.downstream_deps.is_empty());
        assert_eq!(cap.external_upstream, "Corporate LDAP");
    }

    #[test]
    fn test_metadata_outside_block_is_ignored() {
        let text = "- **Name**: Stray\n\n## Metadata\n- **Name**: Real\n\n## Notes\n- **Name**: Also stray";
        let metadata = extract_metadata(text);
        assert_eq!(metadata.fields, vec![("Name".to_string(), "Real".to_string())]);
    }

    #[test]
    fn test_field_names_are_case_sensitive() {
        let metadata = extract_metadata("## Metadata\n- **name**: lower");
        assert_eq!(metadata.get("Name"), None);
        assert_eq!(metadata.get("name"), Some("lower"));
    }

    #[test]
    fn test_empty_document_yields_empty_shapes() {
        let cap = parse_capability("");
        assert_eq!(cap, Capability::default());

        let enb = parse_enabler("just prose\n| broken");
        assert!(enb.id.is_empty());
        assert!(enb.functional_requirements.is_empty());
        assert!(enb.capability_id.is_none());
    }

    #[test]
    fn test_blank_row_yields_nothing() {
        let text = "## Functional Requirements\n| ID | Name | Requirement |\n|---|---|---|\n| | | |\n";
        assert!(extract_table(text, |t| t.starts_with(FUNCTIONAL_HEADING), 3).is_empty());

        let text = "## Enablers\n| Enabler ID | Description |\n|---|---|\n| | |\n";
        assert!(parse_capability(text).enablers.is_empty());
    }

    #[test]
    fn test_narrow_rows_are_skipped() {
        let text = "## Internal Upstream Dependency\n| Capability ID |\n|---|\n| CAP-000009 |\n";
        assert!(parse_capability(text).upstream_deps.is_empty());
    }

    #[test]
    fn test_enabler_layouts() {
        let single = "## Enablers\n| Enabler ID |\n|---|\n| ENB-000010 |\n";
        let cap = parse_capability(single);
        assert_eq!(
            cap.enablers,
            vec![EnablerRef {
                id: "ENB-000010".into(),
                description: String::new(),
            }]
        );

        let legacy = "## Enablers\n| ID | Name | Description | Status | Approval | Priority |\n|---|---|---|---|---|---|\n| ENB-000011 | Cache | Warm cache | Draft | Pending | Low |\n";
        let cap = parse_capability(legacy);
        assert_eq!(cap.enablers[0].id, "ENB-000011");
        assert_eq!(cap.enablers[0].description, "Warm cache");
    }

    #[test]
    fn test_commented_template_rows_are_ignored() {
        let text = "## Enablers\n| Enabler ID | Description |\n|---|---|\n<!-- | ENB-999999 | Example | -->\n| ENB-000001 | Real |\n";
        let cap = parse_capability(text);
        assert_eq!(cap.enablers.len(), 1);
        assert_eq!(cap.enablers[0].id, "ENB-000001");
    }

    #[test]
    fn test_parse_enabler_requirements() {
        let text = r#"# Password Login

## Metadata
- **Name**: Password Login
- **Type**: Enabler
- **ID**: ENB-000001
- **Capability ID**: CAP-123456
- **Status**: Ready for Implementation
- **Approval**: Pending
- **Priority**: Medium

## Technical Overview
Implements username and password
authentication.

## Functional Requirements

| ID | Name | Requirement | Priority | Status | Approval |
|----|------|-------------|----------|--------|----------|
| FR-000100 | Hash | Passwords are hashed | High | Draft | Pending |
| ID | Name | Requirement | Priority | Status | Approval |

## Non-Functional Requirements

| ID | Name | Type | Requirement | Priority | Status | Approval |
|----|------|------|-------------|----------|--------|----------|
| NFR-000200 | Latency | Performance | Login under 200ms | Medium | Draft | Not Approved |
"#;
        let enb = parse_enabler(text);

        assert_eq!(enb.id, "ENB-000001");
        assert_eq!(enb.capability_id.as_deref(), Some("CAP-123456"));
        assert_eq!(enb.description, "Implements username and password authentication.");
        assert_eq!(enb.functional_requirements.len(), 1);
        assert_eq!(enb.functional_requirements[0].requirement, "Passwords are hashed");
        assert_eq!(enb.functional_requirements[0].req_type, None);
        assert_eq!(enb.non_functional_requirements.len(), 1);
        let nfr = &enb.non_functional_requirements[0];
        assert_eq!(nfr.req_type.as_deref(), Some("Performance"));
        assert_eq!(nfr.requirement, "Login under 200ms");
        assert_eq!(nfr.approval, "Not Approved");
    }

    #[test]
    fn test_unparented_enabler() {
        let enb = parse_enabler("## Metadata\n- **ID**: ENB-1\n- **Capability ID**: \n");
        assert!(enb.capability_id.is_none());

        let enb = parse_enabler("## Metadata\n- **ID**: ENB-1\n- **Capability ID**: None\n");
        assert!(enb.capability_id.is_none());
    }

    #[test]
    fn test_detect_type() {
        assert_eq!(detect_type("## Metadata\n- **Type**: Enabler"), Some(DocumentType::Enabler));
        assert_eq!(
            detect_type("## Metadata\n- **ID**: CAP-000001"),
            Some(DocumentType::Capability)
        );
        assert_eq!(detect_type("# Notes"), None);
    }
}
