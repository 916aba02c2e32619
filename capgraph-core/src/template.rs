//! Document templates
//!
//! New capability and enabler documents are cut from skeletons kept in the
//! plan document, between `<!-- START CAPABILITY TEMPLATE -->` and
//! `<!-- END CAPABILITY TEMPLATE -->` (resp. `ENABLER`) under a heading naming
//! the template. Placeholders are substituted in a fixed order. When the plan
//! document or its markers are missing, a built-in skeleton is used instead.

use chrono::{NaiveDate, Utc};
use regex::Regex;
use std::fs;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::context::StoreContext;
use crate::edit::set_metadata_field;
use crate::error::{StoreError, StoreResult};
use crate::models::DocumentType;

static CAPABILITY_ID_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^- \*\*Capability ID\*\*: .*$").unwrap());

const DEVELOPMENT_PLAN_HEADING: &str = "## Development Plan";

const FALLBACK_CAPABILITY: &str = "# [Capability Name]

## Metadata
- **Name**: [Capability Name]
- **Type**: Capability
- **System**: [System]
- **Component**: [Component]
- **ID**: CAP-XXXXXX
- **Owner**: [Owner]
- **Status**: [Status]
- **Approval**: [Approval]
- **Priority**: [Priority]
- **Created**: [Date]

## Purpose
[Description]

## Enablers

| Enabler ID | Description |
|------------|--------------|

## Dependencies

### Internal Upstream Dependency

| Capability ID | Description |
|----------------|--------------|

### Internal Downstream Impact

| Capability ID | Description |
|----------------|--------------|

### External Upstream Dependencies

### External Downstream Impact
";

const FALLBACK_ENABLER: &str = "# [Enabler Name]

## Metadata
- **Name**: [Enabler Name]
- **Type**: Enabler
- **ID**: ENB-XXXXXX
- **Capability ID**: CAP-XXXXXX
- **Owner**: [Owner]
- **Status**: [Status]
- **Approval**: [Approval]
- **Priority**: [Priority]
- **Created**: [Date]

## Technical Overview
### Purpose
[Description]

## Functional Requirements

| ID | Name | Requirement | Priority | Status | Approval |
|----|------|-------------|----------|--------|----------|

## Non-Functional Requirements

| ID | Name | Type | Requirement | Priority | Status | Approval |
|----|------|------|-------------|----------|--------|----------|
";

/// Values substituted into a template. `None` leaves the placeholder in
/// place so the author can fill it in later.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateFields {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub approval: Option<String>,
    pub priority: Option<String>,
    pub owner: Option<String>,
    pub system: Option<String>,
    pub component: Option<String>,
}

enum Pattern {
    Literal(&'static str),
    Regex(&'static LazyLock<Regex>),
}

struct Substitution {
    pattern: Pattern,
    value: Option<String>,
}

impl Substitution {
    fn literal(placeholder: &'static str, value: Option<String>) -> Self {
        Self {
            pattern: Pattern::Literal(placeholder),
            value,
        }
    }

    fn apply(&self, text: &str) -> String {
        let Some(value) = &self.value else {
            return text.to_string();
        };
        match self.pattern {
            Pattern::Literal(placeholder) => text.replace(placeholder, value),
            Pattern::Regex(regex) => regex
                .replace_all(text, regex::NoExpand(value.as_str()))
                .into_owned(),
        }
    }
}

fn markers(doc_type: DocumentType) -> (&'static str, &'static str, &'static str) {
    match doc_type {
        DocumentType::Capability => (
            "Capability Template",
            "<!-- START CAPABILITY TEMPLATE -->",
            "<!-- END CAPABILITY TEMPLATE -->",
        ),
        DocumentType::Enabler => (
            "Enabler Template",
            "<!-- START ENABLER TEMPLATE -->",
            "<!-- END ENABLER TEMPLATE -->",
        ),
    }
}

fn template_missing(doc_type: DocumentType, reason: impl Into<String>) -> StoreError {
    StoreError::TemplateMissing {
        name: markers(doc_type).0.to_string(),
        reason: reason.into(),
    }
}

/// Slices the template for `doc_type` out of the plan document text
pub fn extract_template(plan: &str, doc_type: DocumentType) -> StoreResult<String> {
    let (heading, start, end) = markers(doc_type);

    let heading_at = plan
        .split_inclusive('\n')
        .scan(0usize, |offset, line| {
            let at = *offset;
            *offset += line.len();
            Some((at, line))
        })
        .find(|(_, line)| line.trim_start().starts_with('#') && line.contains(heading))
        .map(|(at, _)| at)
        .ok_or_else(|| template_missing(doc_type, format!("no heading containing '{}'", heading)))?;

    let after_heading = &plan[heading_at..];
    let start_at = after_heading
        .find(start)
        .ok_or_else(|| template_missing(doc_type, format!("no '{}' marker", start)))?;
    let body = &after_heading[start_at + start.len()..];
    let end_at = body
        .find(end)
        .ok_or_else(|| template_missing(doc_type, format!("no '{}' marker", end)))?;

    let template = body[..end_at].trim_matches(|c| c == '\n' || c == '\r');
    if template.trim().is_empty() {
        return Err(template_missing(doc_type, "template block is empty"));
    }
    Ok(format!("{}\n", template.trim_end()))
}

/// Drops a trailing `## Development Plan` section
pub fn strip_development_plan(text: &str) -> String {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_end() == DEVELOPMENT_PLAN_HEADING
            || line.trim_end().starts_with(&format!("{} ", DEVELOPMENT_PLAN_HEADING))
        {
            return format!("{}\n", text[..offset].trim_end());
        }
        offset += line.len();
    }
    text.to_string()
}

/// Template text for `doc_type`, from the plan document when possible
pub fn load_template(ctx: &StoreContext, doc_type: DocumentType) -> String {
    let fallback = || match doc_type {
        DocumentType::Capability => FALLBACK_CAPABILITY.to_string(),
        DocumentType::Enabler => FALLBACK_ENABLER.to_string(),
    };

    let Some(path) = &ctx.templates_path else {
        debug!(%doc_type, "No plan document configured, using built-in template");
        return fallback();
    };

    let extracted = fs::read_to_string(path)
        .map_err(|e| template_missing(doc_type, format!("cannot read {}: {}", path.display(), e)))
        .and_then(|plan| extract_template(&plan, doc_type));

    match extracted {
        Ok(template) => template,
        Err(e) => {
            warn!(error = %e, "Using built-in template");
            fallback()
        }
    }
}

fn substitutions(
    doc_type: DocumentType,
    fields: &TemplateFields,
    parent: Option<&str>,
    today: NaiveDate,
) -> Vec<Substitution> {
    let (capability_name, enabler_name, capability_id, enabler_id) = match doc_type {
        DocumentType::Capability => (
            Some(fields.name.clone()),
            None,
            Some(fields.id.clone()),
            None,
        ),
        DocumentType::Enabler => (
            None,
            Some(fields.name.clone()),
            parent.map(str::to_string),
            Some(fields.id.clone()),
        ),
    };
    let parent_line = match doc_type {
        DocumentType::Enabler => parent.map(|p| format!("- **Capability ID**: {}", p)),
        DocumentType::Capability => None,
    };

    vec![
        Substitution::literal("[Capability Name]", capability_name),
        Substitution::literal("[Enabler Name]", enabler_name),
        Substitution::literal("CAP-XXXXXX", capability_id),
        Substitution::literal("ENB-XXXXXX", enabler_id),
        Substitution::literal("[Description]", fields.description.clone()),
        Substitution::literal("[Status]", fields.status.clone()),
        Substitution::literal("[Approval]", fields.approval.clone()),
        Substitution::literal("[Priority]", fields.priority.clone()),
        Substitution::literal("[Owner]", fields.owner.clone()),
        Substitution::literal("[System]", fields.system.clone()),
        Substitution::literal("[Component]", fields.component.clone()),
        Substitution::literal("[Date]", Some(today.format("%Y-%m-%d").to_string())),
        Substitution {
            pattern: Pattern::Regex(&CAPABILITY_ID_LINE),
            value: parent_line,
        },
    ]
}

/// Fills `template` and makes sure the identifying metadata is present
/// even if the template lacked the placeholders
pub fn instantiate(
    template: &str,
    doc_type: DocumentType,
    fields: &TemplateFields,
    parent: Option<&str>,
    today: NaiveDate,
) -> String {
    let mut text = strip_development_plan(template);
    for substitution in substitutions(doc_type, fields, parent, today) {
        text = substitution.apply(&text);
    }

    text = set_metadata_field(&text, "ID", &fields.id);
    text = set_metadata_field(&text, "Name", &fields.name);
    text = set_metadata_field(&text, "Type", &doc_type.to_string());
    if let (DocumentType::Enabler, Some(parent)) = (doc_type, parent) {
        text = set_metadata_field(&text, "Capability ID", parent);
    }
    text
}

pub fn instantiate_capability(ctx: &StoreContext, fields: &TemplateFields) -> String {
    let template = load_template(ctx, DocumentType::Capability);
    instantiate(
        &template,
        DocumentType::Capability,
        fields,
        None,
        Utc::now().date_naive(),
    )
}

pub fn instantiate_enabler(
    ctx: &StoreContext,
    fields: &TemplateFields,
    parent: Option<&str>,
) -> String {
    let template = load_template(ctx, DocumentType::Enabler);
    instantiate(
        &template,
        DocumentType::Enabler,
        fields,
        parent,
        Utc::now().date_naive(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_capability, parse_enabler};
    use tempfile::TempDir;

    const PLAN: &str = "# Plan

Intro text mentions <!-- START CAPABILITY TEMPLATE --> in passing.

## Capability Template

<!-- START CAPABILITY TEMPLATE -->
# [Capability Name]

## Metadata
- **Name**: [Capability Name]
- **Type**: Capability
- **ID**: CAP-XXXXXX
- **Status**: [Status]
- **Owner**: [Owner]

## Enablers

| Enabler ID | Description |
|------------|--------------|

## Development Plan
Only for the plan.
<!-- END CAPABILITY TEMPLATE -->

## Enabler Template

<!-- START ENABLER TEMPLATE -->
# [Enabler Name]

## Metadata
- **Name**: [Enabler Name]
- **Type**: Enabler
- **ID**: ENB-XXXXXX
- **Capability ID**: CAP-XXXXXX (parent)
- **Status**: [Status]
- **Created**: [Date]
<!-- END ENABLER TEMPLATE -->
";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    fn fields(id: &str, name: &str) -> TemplateFields {
        TemplateFields {
            id: id.to_string(),
            name: name.to_string(),
            status: Some("Draft".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_extract_starts_after_heading() {
        let template = extract_template(PLAN, DocumentType::Capability).unwrap();
        assert!(template.starts_with("# [Capability Name]\n"));
        assert!(template.ends_with("Only for the plan.\n"));
        assert!(!template.contains("Enabler Template"));
    }

    #[test]
    fn test_extract_reports_missing_markers() {
        let err = extract_template("## Capability Template\nnothing\n", DocumentType::Capability)
            .unwrap_err();
        assert!(matches!(err, StoreError::TemplateMissing { .. }));
        assert!(err.to_string().contains("START CAPABILITY TEMPLATE"));

        assert!(extract_template(PLAN, DocumentType::Enabler).is_ok());
        assert!(extract_template("# Nothing\n", DocumentType::Enabler).is_err());
    }

    #[test]
    fn test_capability_instantiation() {
        let template = extract_template(PLAN, DocumentType::Capability).unwrap();
        let text = instantiate(
            &template,
            DocumentType::Capability,
            &fields("CAP-000123", "Payments"),
            None,
            today(),
        );

        assert!(text.starts_with("# Payments\n"));
        assert!(!text.contains("Development Plan"));
        // No owner supplied: placeholder survives
        assert!(text.contains("- **Owner**: [Owner]"));

        let cap = parse_capability(&text);
        assert_eq!(cap.id, "CAP-000123");
        assert_eq!(cap.name, "Payments");
        assert_eq!(cap.status, "Draft");
    }

    #[test]
    fn test_enabler_parent_line_is_rewritten() {
        let template = extract_template(PLAN, DocumentType::Enabler).unwrap();
        let text = instantiate(
            &template,
            DocumentType::Enabler,
            &fields("ENB-000456", "Card vault"),
            Some("CAP-000123"),
            today(),
        );

        assert!(text.contains("- **Capability ID**: CAP-000123\n"));
        assert!(!text.contains("(parent)"));
        assert!(text.contains("- **Created**: 2024-03-09"));
        let enb = parse_enabler(&text);
        assert_eq!(enb.id, "ENB-000456");
        assert_eq!(enb.capability_id.as_deref(), Some("CAP-000123"));
    }

    #[test]
    fn test_enabler_without_parent_keeps_placeholder() {
        let text = instantiate(
            FALLBACK_ENABLER,
            DocumentType::Enabler,
            &fields("ENB-000456", "Card vault"),
            None,
            today(),
        );
        assert!(text.contains("- **Capability ID**: CAP-XXXXXX"));
        assert_eq!(parse_enabler(&text).capability_id, None);
    }

    #[test]
    fn test_strip_development_plan() {
        assert_eq!(
            strip_development_plan("# A\n\nbody\n\n## Development Plan\n\n- step\n"),
            "# A\n\nbody\n"
        );
        assert_eq!(strip_development_plan("# A\n## Plan\n"), "# A\n## Plan\n");
    }

    #[test]
    fn test_missing_plan_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = StoreContext::new([temp_dir.path()])
            .with_templates_path(temp_dir.path().join("MISSING.md"));

        let text = instantiate_capability(&ctx, &fields("CAP-000001", "Auth"));
        let cap = parse_capability(&text);
        assert_eq!(cap.id, "CAP-000001");
        assert_eq!(cap.name, "Auth");
        assert!(text.contains("### Internal Upstream Dependency"));
    }

    #[test]
    fn test_plan_without_markers_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        let plan = temp_dir.path().join("PLAN.md");
        fs::write(&plan, "# Plan\n\n## Capability Template\n\nTo be written.\n").unwrap();
        let ctx = StoreContext::new([temp_dir.path()]).with_templates_path(plan);

        assert_eq!(load_template(&ctx, DocumentType::Capability), FALLBACK_CAPABILITY);
        assert_eq!(load_template(&ctx, DocumentType::Enabler), FALLBACK_ENABLER);

        let text = instantiate_capability(&ctx, &fields("CAP-000003", "Search"));
        assert_eq!(parse_capability(&text).id, "CAP-000003");
    }

    #[test]
    fn test_plan_document_is_used_when_present() {
        let temp_dir = TempDir::new().unwrap();
        let plan = temp_dir.path().join("PLAN.md");
        fs::write(&plan, PLAN).unwrap();
        let ctx = StoreContext::new([temp_dir.path()]).with_templates_path(plan);

        let text = instantiate_enabler(&ctx, &fields("ENB-000002", "Vault"), Some("CAP-000001"));
        assert!(text.starts_with("# Vault\n"));
        assert!(!text.contains("Functional Requirements"));
    }
}
