//! Canonical document rendering
//!
//! Produces documents in the metadata/table grammar the parser reads, so that
//! parsing a rendered entity gives the entity back.

use crate::models::{Capability, Dependency, Enabler, Requirement};
use crate::parser::{
    DOWNSTREAM_HEADING, EXTERNAL_DOWNSTREAM_HEADING, EXTERNAL_UPSTREAM_HEADING,
    FUNCTIONAL_HEADING, NON_FUNCTIONAL_HEADING, UPSTREAM_HEADING,
};

pub const ENABLER_TABLE_HEADER: &str = "| Enabler ID | Description |\n|------------|--------------|";
pub const DEPENDENCY_TABLE_HEADER: &str =
    "| Capability ID | Description |\n|----------------|--------------|";
pub const FUNCTIONAL_TABLE_HEADER: &str = "| ID | Name | Requirement | Priority | Status | Approval |\n|----|------|-------------|----------|--------|----------|";
pub const NON_FUNCTIONAL_TABLE_HEADER: &str = "| ID | Name | Type | Requirement | Priority | Status | Approval |\n|----|------|------|-------------|----------|--------|----------|";

/// Escapes characters that would break a table cell
pub fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

/// `| a | b |`
pub fn table_row(cells: &[&str]) -> String {
    let escaped: Vec<String> = cells.iter().map(|c| escape_cell(c)).collect();
    format!("| {} |", escaped.join(" | "))
}

pub fn enabler_row(id: &str, description: &str) -> String {
    table_row(&[id, description])
}

pub fn dependency_row(dep: &Dependency) -> String {
    table_row(&[&dep.capability_id, &dep.description])
}

fn metadata_line(out: &mut String, field: &str, value: &str) {
    out.push_str(&format!("- **{}**: {}\n", field, value));
}

pub fn render_capability(cap: &Capability) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", cap.name));

    out.push_str("## Metadata\n");
    metadata_line(&mut out, "Name", &cap.name);
    metadata_line(&mut out, "Type", "Capability");
    if let Some(system) = &cap.system {
        metadata_line(&mut out, "System", system);
    }
    if let Some(component) = &cap.component {
        metadata_line(&mut out, "Component", component);
    }
    metadata_line(&mut out, "ID", &cap.id);
    metadata_line(&mut out, "Owner", &cap.owner);
    metadata_line(&mut out, "Status", &cap.status);
    metadata_line(&mut out, "Approval", &cap.approval);
    metadata_line(&mut out, "Priority", &cap.priority);

    out.push_str("\n## Enablers\n\n");
    out.push_str(ENABLER_TABLE_HEADER);
    out.push('\n');
    for enabler in &cap.enablers {
        out.push_str(&enabler_row(&enabler.id, &enabler.description));
        out.push('\n');
    }

    out.push_str("\n## Dependencies\n\n");
    render_dependency_table(&mut out, UPSTREAM_HEADING, &cap.upstream_deps);
    render_dependency_table(&mut out, DOWNSTREAM_HEADING, &cap.downstream_deps);

    out.push_str(&format!("### {}\n\n", EXTERNAL_UPSTREAM_HEADING));
    if !cap.external_upstream.is_empty() {
        out.push_str(&cap.external_upstream);
        out.push_str("\n\n");
    }
    out.push_str(&format!("### {}\n\n", EXTERNAL_DOWNSTREAM_HEADING));
    if !cap.external_downstream.is_empty() {
        out.push_str(&cap.external_downstream);
        out.push('\n');
    }

    out
}

fn render_dependency_table(out: &mut String, heading: &str, deps: &[Dependency]) {
    out.push_str(&format!("### {}\n\n", heading));
    out.push_str(DEPENDENCY_TABLE_HEADER);
    out.push('\n');
    for dep in deps {
        out.push_str(&dependency_row(dep));
        out.push('\n');
    }
    out.push('\n');
}

pub fn render_enabler(enb: &Enabler) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", enb.name));

    out.push_str("## Metadata\n");
    metadata_line(&mut out, "Name", &enb.name);
    metadata_line(&mut out, "Type", "Enabler");
    metadata_line(&mut out, "ID", &enb.id);
    metadata_line(
        &mut out,
        "Capability ID",
        enb.capability_id.as_deref().unwrap_or(""),
    );
    metadata_line(&mut out, "Description", &enb.description);
    metadata_line(&mut out, "Status", &enb.status);
    metadata_line(&mut out, "Approval", &enb.approval);
    metadata_line(&mut out, "Priority", &enb.priority);

    out.push_str(&format!("\n## {}\n\n", FUNCTIONAL_HEADING));
    out.push_str(FUNCTIONAL_TABLE_HEADER);
    out.push('\n');
    for req in &enb.functional_requirements {
        out.push_str(&functional_row(req));
        out.push('\n');
    }

    out.push_str(&format!("\n## {}\n\n", NON_FUNCTIONAL_HEADING));
    out.push_str(NON_FUNCTIONAL_TABLE_HEADER);
    out.push('\n');
    for req in &enb.non_functional_requirements {
        out.push_str(&non_functional_row(req));
        out.push('\n');
    }

    out
}

pub fn functional_row(req: &Requirement) -> String {
    table_row(&[
        &req.id,
        &req.name,
        &req.requirement,
        &req.priority,
        &req.status,
        &req.approval,
    ])
}

pub fn non_functional_row(req: &Requirement) -> String {
    table_row(&[
        &req.id,
        &req.name,
        req.req_type.as_deref().unwrap_or(""),
        &req.requirement,
        &req.priority,
        &req.status,
        &req.approval,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnablerRef;
    use crate::parser::{parse_capability, parse_enabler};

    fn sample_capability() -> Capability {
        Capability {
            id: "CAP-004213".into(),
            name: "Billing".into(),
            status: "Implemented".into(),
            approval: "Approved".into(),
            priority: "High".into(),
            system: Some("Finance".into()),
            component: None,
            owner: "Payments".into(),
            enablers: vec![EnablerRef {
                id: "ENB-000001".into(),
                description: "Invoice generation".into(),
            }],
            upstream_deps: vec![Dependency::new("CAP-000002", "Customer records")],
            downstream_deps: vec![Dependency::new("CAP-000003", "Reporting")],
            external_upstream: "Tax service".into(),
            external_downstream: String::new(),
        }
    }

    fn sample_enabler() -> Enabler {
        Enabler {
            id: "ENB-000001".into(),
            name: "Invoices".into(),
            description: "Generates monthly invoices".into(),
            status: "Draft".into(),
            approval: "Pending".into(),
            priority: "Medium".into(),
            capability_id: Some("CAP-004213".into()),
            functional_requirements: vec![Requirement {
                id: "FR-000010".into(),
                name: "PDF".into(),
                requirement: "Invoices export as PDF".into(),
                priority: "High".into(),
                status: "Draft".into(),
                approval: "Pending".into(),
                req_type: None,
            }],
            non_functional_requirements: vec![Requirement {
                id: "NFR-000011".into(),
                name: "Throughput".into(),
                requirement: "10k invoices per hour".into(),
                priority: "Low".into(),
                status: "Draft".into(),
                approval: "Not Approved".into(),
                req_type: Some("Performance".into()),
            }],
        }
    }

    #[test]
    fn test_capability_round_trip() {
        let cap = sample_capability();
        assert_eq!(parse_capability(&render_capability(&cap)), cap);
    }

    #[test]
    fn test_enabler_round_trip() {
        let enb = sample_enabler();
        assert_eq!(parse_enabler(&render_enabler(&enb)), enb);
    }

    #[test]
    fn test_unparented_enabler_round_trip() {
        let mut enb = sample_enabler();
        enb.capability_id = None;
        enb.functional_requirements.clear();
        assert_eq!(parse_enabler(&render_enabler(&enb)), enb);
    }

    #[test]
    fn test_cell_escaping() {
        assert_eq!(table_row(&["ENB-1", "a|b"]), "| ENB-1 | a\\|b |");
    }

    #[test]
    fn test_pipe_in_description_round_trips() {
        let mut cap = sample_capability();
        cap.enablers[0].description = "read|write".into();
        assert_eq!(parse_capability(&render_capability(&cap)), cap);
    }
}
