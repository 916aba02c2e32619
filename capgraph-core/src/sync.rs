//! Cross-document synchronization
//!
//! Keeps the redundant references between documents consistent: a
//! capability's `## Enablers` table mirrors each enabler's `Capability ID`,
//! and every internal dependency is recorded on both ends.
//!
//! Each target is edited as read, pure text edit, compare-and-write. A write
//! that loses a race is retried on fresh content. Failures on one target are
//! recorded in the report and do not stop the remaining targets.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::context::StoreContext;
use crate::edit::{
    append_table_row, normalize_enabler_table, remove_table_rows, replace_table_row,
    table_row_cells, table_row_ids, TableSpec, DOWNSTREAM_TABLE, ENABLERS_TABLE, UPSTREAM_TABLE,
};
use crate::error::{StoreError, StoreResult};
use crate::events::{ChangeKind, ChangeNotifier};
use crate::models::{Dependency, Enabler};
use crate::render::{dependency_row, enabler_row};
use crate::storage::{write_if_unchanged, Document};
use crate::tokenizer::split_cells;

/// How many times an edit is re-applied after losing a write race
pub const MAX_EDIT_ATTEMPTS: usize = 3;

/// A target that was not updated, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTarget {
    pub target: String,
    pub reason: String,
}

/// Outcome of a synchronization pass
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Documents whose content changed
    pub updated: Vec<PathBuf>,
    /// Targets left alone because of a recoverable error
    pub skipped: Vec<SkippedTarget>,
    /// Filesystem failures, surfaced by [`SyncReport::into_result`]
    pub failures: Vec<StoreError>,
}

impl SyncReport {
    pub(crate) fn record(&mut self, target: &str, outcome: StoreResult<Option<PathBuf>>) {
        match outcome {
            Ok(Some(path)) => self.updated.push(path),
            Ok(None) => {}
            Err(e) if e.is_fatal() => {
                warn!(%target, error = %e, "Synchronization failed");
                self.failures.push(e);
            }
            Err(e) => {
                debug!(%target, error = %e, "Synchronization skipped");
                self.skipped.push(SkippedTarget {
                    target: target.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    pub fn merge(&mut self, other: SyncReport) {
        self.updated.extend(other.updated);
        self.skipped.extend(other.skipped);
        self.failures.extend(other.failures);
    }

    pub fn is_noop(&self) -> bool {
        self.updated.is_empty()
    }

    /// Fails with the first filesystem error, if any target hit one
    pub fn into_result(mut self) -> StoreResult<SyncReport> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(self.failures.remove(0))
        }
    }
}

/// Applies `edit` to the document at `path` with compare-and-write.
///
/// `edit` returns `None` (or unchanged text) when there is nothing to do, in
/// which case the file is not touched. Returns the path when it was written.
pub fn edit_document<F>(
    path: &Path,
    notifier: &ChangeNotifier,
    mut edit: F,
) -> StoreResult<Option<PathBuf>>
where
    F: FnMut(&str) -> Option<String>,
{
    for attempt in 1..=MAX_EDIT_ATTEMPTS {
        let document = Document::read(path)?;
        let updated = match edit(&document.content) {
            Some(text) if text != document.content => text,
            _ => return Ok(None),
        };

        match write_if_unchanged(path, Some(&document.version), &updated) {
            Ok(_) => {
                notifier.publish(path, ChangeKind::Modified);
                return Ok(Some(path.to_path_buf()));
            }
            Err(StoreError::Conflict { .. }) if attempt < MAX_EDIT_ATTEMPTS => {
                debug!(
                    path = %path.display(),
                    attempt,
                    "Document changed underneath edit, retrying"
                );
            }
            Err(e) => return Err(e),
        }
    }

    Err(StoreError::Conflict {
        path: path.to_path_buf(),
    })
}

/// Text shown for an enabler in its parent's table: the description, or
/// the name when there is none
pub fn enabler_row_description(enabler: &Enabler) -> &str {
    if enabler.description.trim().is_empty() {
        &enabler.name
    } else {
        &enabler.description
    }
}

fn has_row(text: &str, spec: &TableSpec, id: &str) -> bool {
    table_row_ids(text, spec).iter().any(|r| r == id)
}

/// Adds a row keyed by `id` when missing, rewrites it when its cells
/// differ from `want`, removes it when unwanted
fn ensure_row(text: String, spec: &TableSpec, id: &str, want: Option<&str>) -> String {
    match (want, table_row_cells(&text, spec, id)) {
        (Some(row), None) => append_table_row(&text, spec, row),
        (Some(row), Some(cells)) if cells != split_cells(row) => {
            replace_table_row(&text, spec, id, row).unwrap_or(text)
        }
        (None, Some(_)) => remove_table_rows(&text, spec, id).0,
        _ => text,
    }
}

/// Adds a row keyed by `id` only when the table has none
fn add_missing_row(text: String, spec: &TableSpec, id: &str, row: &str) -> String {
    if has_row(&text, spec, id) {
        text
    } else {
        append_table_row(&text, spec, row)
    }
}

/// Synchronization engine bound to a store context
#[derive(Debug, Clone, Copy)]
pub struct SyncEngine<'a> {
    ctx: &'a StoreContext,
    notifier: &'a ChangeNotifier,
}

impl<'a> SyncEngine<'a> {
    pub fn new(ctx: &'a StoreContext, notifier: &'a ChangeNotifier) -> Self {
        Self { ctx, notifier }
    }

    fn edit_capability<F>(&self, capability_id: &str, edit: F) -> StoreResult<Option<PathBuf>>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let located = self.ctx.find_capability(capability_id)?;
        edit_document(&located.document.path, self.notifier, edit)
    }

    /// Rewrites the enabler's row in its capability to `| id | description |`.
    ///
    /// A capability that does not list the enabler is left alone; adding
    /// rows is [`SyncEngine::reparent`]'s job.
    pub fn sync_enabler_to_capability(
        &self,
        enabler_id: &str,
        description: &str,
        capability_id: &str,
    ) -> SyncReport {
        let row = enabler_row(enabler_id, description);
        let outcome = self.edit_capability(capability_id, |text| {
            let text = normalize_enabler_table(text);
            let replaced = replace_table_row(&text, &ENABLERS_TABLE, enabler_id, &row);
            if replaced.is_none() {
                debug!(%enabler_id, %capability_id, "Capability does not list enabler");
            }
            replaced
        });

        let mut report = SyncReport::default();
        report.record(capability_id, outcome);
        report
    }

    /// Moves the enabler's row from `old_capability` to `new_capability`.
    ///
    /// `description` falls back to `name` when empty. Either side may be
    /// `None`; the new side never ends up with a duplicate row.
    pub fn reparent(
        &self,
        enabler_id: &str,
        name: &str,
        old_capability: Option<&str>,
        new_capability: Option<&str>,
        description: &str,
    ) -> SyncReport {
        let description = if description.trim().is_empty() {
            name
        } else {
            description
        };
        let row = enabler_row(enabler_id, description);
        let mut report = SyncReport::default();

        if let Some(old) = old_capability.filter(|old| Some(*old) != new_capability) {
            let outcome = self.edit_capability(old, |text| {
                let (text, removed) = remove_table_rows(text, &ENABLERS_TABLE, enabler_id);
                (removed > 0).then_some(text)
            });
            report.record(old, outcome);
        }

        if let Some(new) = new_capability {
            let outcome = self.edit_capability(new, |text| {
                if has_row(text, &ENABLERS_TABLE, enabler_id) {
                    None
                } else {
                    Some(append_table_row(text, &ENABLERS_TABLE, &row))
                }
            });
            report.record(new, outcome);
        }

        if !report.is_noop() {
            info!(%enabler_id, ?old_capability, ?new_capability, "Reparented enabler");
        }
        report
    }

    /// Detaches the enabler from a capability's table
    pub fn remove_enabler_from_capability(
        &self,
        enabler_id: &str,
        capability_id: &str,
    ) -> SyncReport {
        self.reparent(enabler_id, "", Some(capability_id), None, "")
    }

    /// Mirrors `capability_id`'s dependency lists into every other
    /// capability.
    ///
    /// Each upstream dependency B gets a downstream row for `capability_id`
    /// and each downstream dependency gets an upstream row. A mirrored row
    /// whose description has changed is rewritten. Rows pointing at
    /// `capability_id` from capabilities no longer listed are removed.
    pub fn update_bidirectional_dependencies(
        &self,
        capability_id: &str,
        upstream: &[Dependency],
        downstream: &[Dependency],
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let mut seen = HashSet::new();

        for other in self.ctx.capabilities() {
            let other_id = other.entity.id.clone();
            if other_id.is_empty() || other_id == capability_id {
                continue;
            }
            seen.insert(other_id.clone());

            // B is upstream of us => we are downstream of B
            let downstream_row = upstream
                .iter()
                .find(|d| d.capability_id == other_id)
                .map(|d| dependency_row(&Dependency::new(capability_id, &d.description)));
            let upstream_row = downstream
                .iter()
                .find(|d| d.capability_id == other_id)
                .map(|d| dependency_row(&Dependency::new(capability_id, &d.description)));

            let outcome = edit_document(&other.document.path, self.notifier, |text| {
                let text = ensure_row(
                    text.to_string(),
                    &DOWNSTREAM_TABLE,
                    capability_id,
                    downstream_row.as_deref(),
                );
                Some(ensure_row(
                    text,
                    &UPSTREAM_TABLE,
                    capability_id,
                    upstream_row.as_deref(),
                ))
            });
            report.record(&other_id, outcome);
        }

        for dep in upstream.iter().chain(downstream) {
            if dep.capability_id != capability_id && !seen.contains(&dep.capability_id) {
                report.record(
                    &dep.capability_id,
                    Err(StoreError::capability_not_found(&dep.capability_id)),
                );
            }
        }

        if !report.is_noop() {
            info!(%capability_id, updated = report.updated.len(), "Mirrored dependencies");
        }
        report
    }

    /// Removes every dependency row that points at `capability_id`
    pub fn scrub_dependency_references(&self, capability_id: &str) -> SyncReport {
        self.update_bidirectional_dependencies(capability_id, &[], &[])
    }

    /// Re-synchronizes every enabler row and dependency mirror in the store.
    ///
    /// Dependency edges are collected from both ends first and every missing
    /// mirror row is added, so a one-sided edge is completed rather than
    /// dropped regardless of scan order. Rows pointing at unknown capabilities
    /// are left for the integrity check to report.
    pub fn resync_all(&self) -> SyncReport {
        let mut report = SyncReport::default();
        for enabler in self.ctx.enablers() {
            let enb = &enabler.entity;
            if let Some(capability_id) = &enb.capability_id {
                let description = enabler_row_description(enb);
                report.merge(self.reparent(
                    &enb.id,
                    &enb.name,
                    None,
                    Some(capability_id),
                    description,
                ));
                report.merge(self.sync_enabler_to_capability(&enb.id, description, capability_id));
            }
        }

        let capabilities = self.ctx.capabilities();
        let known: HashSet<&str> = capabilities
            .iter()
            .map(|c| c.entity.id.as_str())
            .filter(|id| !id.is_empty())
            .collect();

        // (upstream, downstream) -> description
        let mut edges: BTreeMap<(String, String), String> = BTreeMap::new();
        for cap in capabilities.iter().map(|c| &c.entity) {
            for dep in &cap.upstream_deps {
                if known.contains(dep.capability_id.as_str()) && dep.capability_id != cap.id {
                    edges
                        .entry((dep.capability_id.clone(), cap.id.clone()))
                        .or_insert_with(|| dep.description.clone());
                }
            }
            for dep in &cap.downstream_deps {
                if known.contains(dep.capability_id.as_str()) && dep.capability_id != cap.id {
                    edges
                        .entry((cap.id.clone(), dep.capability_id.clone()))
                        .or_insert_with(|| dep.description.clone());
                }
            }
        }

        for located in &capabilities {
            let id = located.entity.id.as_str();
            if id.is_empty() {
                continue;
            }
            let upstream_rows: Vec<(String, String)> = edges
                .iter()
                .filter(|((_, down), _)| down.as_str() == id)
                .map(|((up, _), desc)| (up.clone(), dependency_row(&Dependency::new(up, desc))))
                .collect();
            let downstream_rows: Vec<(String, String)> = edges
                .iter()
                .filter(|((up, _), _)| up.as_str() == id)
                .map(|((_, down), desc)| {
                    (down.clone(), dependency_row(&Dependency::new(down, desc)))
                })
                .collect();

            let outcome = edit_document(&located.document.path, self.notifier, |text| {
                let mut text = text.to_string();
                for (other, row) in &upstream_rows {
                    text = add_missing_row(text, &UPSTREAM_TABLE, other, row);
                }
                for (other, row) in &downstream_rows {
                    text = add_missing_row(text, &DOWNSTREAM_TABLE, other, row);
                }
                Some(text)
            });
            report.record(id, outcome);
        }
        report
    }
}
