use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::context::StoreContext;
use crate::models::{Capability, Enabler};

/// Everything in the store at one moment, ordered by id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub generated_at: DateTime<Utc>,
    pub capabilities: Vec<Capability>,
    pub enablers: Vec<Enabler>,
}

impl GraphSnapshot {
    pub fn from_context(ctx: &StoreContext) -> Self {
        let mut capabilities: Vec<Capability> =
            ctx.capabilities().into_iter().map(|l| l.entity).collect();
        let mut enablers: Vec<Enabler> = ctx.enablers().into_iter().map(|l| l.entity).collect();
        capabilities.sort_by(|a, b| a.id.cmp(&b.id));
        enablers.sort_by(|a, b| a.id.cmp(&b.id));

        Self {
            generated_at: Utc::now(),
            capabilities,
            enablers,
        }
    }

    /// Enablers grouped under their capability id; unparented ones under `None`
    pub fn enablers_by_capability(&self) -> BTreeMap<Option<&str>, Vec<&Enabler>> {
        let mut grouped: BTreeMap<Option<&str>, Vec<&Enabler>> = BTreeMap::new();
        for enabler in &self.enablers {
            grouped
                .entry(enabler.capability_id.as_deref())
                .or_default()
                .push(enabler);
        }
        grouped
    }
}

/// Export the document graph to JSON format
pub fn export_json(snapshot: &GraphSnapshot, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    fs::write(output_path, json)
        .with_context(|| format!("Failed to write export to {}", output_path.display()))?;
    Ok(())
}

/// Export a markdown overview: each capability with its enablers and
/// dependency edges
pub fn export_overview(snapshot: &GraphSnapshot, output_path: &Path) -> Result<()> {
    let output = render_overview(snapshot);
    fs::write(output_path, output)
        .with_context(|| format!("Failed to write overview to {}", output_path.display()))?;
    Ok(())
}

pub fn render_overview(snapshot: &GraphSnapshot) -> String {
    let mut output = String::new();
    output.push_str("# Capability Overview\n\n");
    output.push_str(&format!(
        "Generated {}\n\n",
        snapshot.generated_at.format("%Y-%m-%d %H:%M UTC")
    ));

    let grouped = snapshot.enablers_by_capability();

    for cap in &snapshot.capabilities {
        output.push_str(&format!("## {} - {}\n\n", cap.id, cap.name));
        output.push_str(&format!(
            "**Status:** {} | **Approval:** {} | **Priority:** {}\n\n",
            cap.status, cap.approval, cap.priority
        ));

        if let Some(enablers) = grouped.get(&Some(cap.id.as_str())) {
            for enb in enablers {
                output.push_str(&format!("- {} - {} ({})\n", enb.id, enb.name, enb.status));
            }
            output.push('\n');
        }

        if !cap.upstream_deps.is_empty() {
            let ids: Vec<&str> = cap
                .upstream_deps
                .iter()
                .map(|d| d.capability_id.as_str())
                .collect();
            output.push_str(&format!("**Depends on:** {}\n\n", ids.join(", ")));
        }
        if !cap.downstream_deps.is_empty() {
            let ids: Vec<&str> = cap
                .downstream_deps
                .iter()
                .map(|d| d.capability_id.as_str())
                .collect();
            output.push_str(&format!("**Impacts:** {}\n\n", ids.join(", ")));
        }
    }

    if let Some(orphans) = grouped.get(&None) {
        output.push_str("## Unassigned Enablers\n\n");
        for enb in orphans {
            output.push_str(&format!("- {} - {} ({})\n", enb.id, enb.name, enb.status));
        }
        output.push('\n');
    }

    output
}
