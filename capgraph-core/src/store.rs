//! Store facade
//!
//! `SpecStore` is the entry point for every mutation. Each operation writes
//! its own document first and then runs the synchronization it implies
//! before returning, so structural references (enabler rows, dependency
//! mirrors) never wait for a later repair.

use crossbeam::channel::Receiver;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

use crate::allocator::IdAllocator;
use crate::context::StoreContext;
use crate::edit::{
    append_table_row, replace_table_rows, set_metadata_field, set_title, DOWNSTREAM_TABLE,
    ENABLERS_TABLE, FUNCTIONAL_TABLE, NON_FUNCTIONAL_TABLE, UPSTREAM_TABLE,
};
use crate::enhancer::enhance_with_context;
use crate::error::{StoreError, StoreResult};
use crate::events::{ChangeKind, ChangeNotifier, FileChanged};
use crate::models::{
    Approval, Capability, Dependency, DocumentType, Enabler, IdPrefix, Priority, Requirement,
};
use crate::parser::{is_capability_id, is_enabler_id, parse_capability, parse_enabler};
use crate::render::{dependency_row, functional_row, non_functional_row};
use crate::storage::{
    create_document, delete_document, write_if_unchanged, Document, DocumentVersion,
};
use crate::sync::{edit_document, enabler_row_description, SkippedTarget, SyncEngine, SyncReport};
use crate::template::{instantiate_capability, instantiate_enabler, TemplateFields};

static REQUIREMENT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(N?FR)-(\d+)\b").unwrap());

pub const DEFAULT_STATUS: &str = "Draft";
/// Written to `Capability ID` when an enabler loses its parent
const NO_PARENT: &str = "None";

/// Fields for a new capability; unset fields get store defaults or stay
/// as template placeholders
#[derive(Debug, Clone, Default)]
pub struct CapabilityDraft {
    pub name: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub approval: Option<String>,
    pub priority: Option<String>,
    pub owner: Option<String>,
    pub system: Option<String>,
    pub component: Option<String>,
}

impl CapabilityDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    fn template_fields(&self, id: &str) -> TemplateFields {
        TemplateFields {
            id: id.to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            status: Some(self.status.clone().unwrap_or_else(|| DEFAULT_STATUS.to_string())),
            approval: Some(
                self.approval
                    .clone()
                    .unwrap_or_else(|| Approval::NotApproved.to_string()),
            ),
            priority: Some(
                self.priority
                    .clone()
                    .unwrap_or_else(|| Priority::Medium.to_string()),
            ),
            owner: self.owner.clone(),
            system: self.system.clone(),
            component: self.component.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnablerDraft {
    pub name: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub approval: Option<String>,
    pub priority: Option<String>,
    pub owner: Option<String>,
}

impl EnablerDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    fn template_fields(&self, id: &str) -> TemplateFields {
        TemplateFields {
            id: id.to_string(),
            name: self.name.clone(),
            // Empty rather than a placeholder: the description feeds the
            // parent's enabler row
            description: Some(self.description.clone().unwrap_or_default()),
            status: Some(self.status.clone().unwrap_or_else(|| DEFAULT_STATUS.to_string())),
            approval: Some(
                self.approval
                    .clone()
                    .unwrap_or_else(|| Approval::NotApproved.to_string()),
            ),
            priority: Some(
                self.priority
                    .clone()
                    .unwrap_or_else(|| Priority::Medium.to_string()),
            ),
            owner: self.owner.clone(),
            system: None,
            component: None,
        }
    }
}

/// A requirement row to add to an enabler
#[derive(Debug, Clone, Default)]
pub struct RequirementDraft {
    pub name: String,
    pub requirement: String,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub approval: Option<String>,
    /// Set for non-functional requirements (Performance, Security, ...)
    pub req_type: Option<String>,
}

/// Field changes for an enabler; `None` leaves a field alone
#[derive(Debug, Clone, Default)]
pub struct EnablerUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub approval: Option<String>,
    pub priority: Option<String>,
    /// `Some(None)` detaches the enabler from its capability
    pub capability_id: Option<Option<String>>,
    /// When set, the write fails with `Conflict` if the document changed
    /// since this version was read
    pub expected_version: Option<DocumentVersion>,
}

/// Field changes for a capability; `None` leaves a field alone
#[derive(Debug, Clone, Default)]
pub struct CapabilityUpdate {
    pub name: Option<String>,
    pub status: Option<String>,
    pub approval: Option<String>,
    pub priority: Option<String>,
    pub owner: Option<String>,
    pub system: Option<String>,
    pub component: Option<String>,
    /// Replaces the internal upstream dependency table
    pub upstream: Option<Vec<Dependency>>,
    /// Replaces the internal downstream impact table
    pub downstream: Option<Vec<Dependency>>,
    pub expected_version: Option<DocumentVersion>,
}

impl CapabilityUpdate {
    fn touches_dependencies(&self) -> bool {
        self.upstream.is_some() || self.downstream.is_some()
    }
}

/// Result of copying a capability together with its enablers
#[derive(Debug)]
pub struct CopyReport {
    pub capability: Capability,
    pub enablers: Vec<Enabler>,
    /// Source enablers that could not be copied
    pub skipped: Vec<SkippedTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DependencyDirection {
    Upstream,
    Downstream,
}

impl fmt::Display for DependencyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyDirection::Upstream => write!(f, "upstream"),
            DependencyDirection::Downstream => write!(f, "downstream"),
        }
    }
}

/// A broken cross-document reference
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum IntegrityIssue {
    /// The same id appears in more than one document
    DuplicateId { id: String, paths: Vec<PathBuf> },
    /// A capability lists an enabler that does not exist
    UnknownEnabler {
        capability_id: String,
        enabler_id: String,
    },
    /// A capability lists an enabler that names a different parent
    ForeignEnabler {
        capability_id: String,
        enabler_id: String,
        actual_parent: Option<String>,
    },
    /// An enabler names a capability that does not list it
    MissingRow {
        enabler_id: String,
        capability_id: String,
    },
    /// An enabler names a capability that does not exist
    MissingParent {
        enabler_id: String,
        capability_id: String,
    },
    /// A dependency row points at a capability that does not exist
    UnknownDependency {
        capability_id: String,
        other_id: String,
        direction: DependencyDirection,
    },
    /// `capability_id` lists `other_id` in `direction` but not vice versa
    AsymmetricDependency {
        capability_id: String,
        other_id: String,
        direction: DependencyDirection,
    },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityIssue::DuplicateId { id, paths } => {
                let paths: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                write!(f, "{} appears in {} documents: {}", id, paths.len(), paths.join(", "))
            }
            IntegrityIssue::UnknownEnabler {
                capability_id,
                enabler_id,
            } => write!(f, "{} lists {} which does not exist", capability_id, enabler_id),
            IntegrityIssue::ForeignEnabler {
                capability_id,
                enabler_id,
                actual_parent,
            } => write!(
                f,
                "{} lists {} whose parent is {}",
                capability_id,
                enabler_id,
                actual_parent.as_deref().unwrap_or("unset")
            ),
            IntegrityIssue::MissingRow {
                enabler_id,
                capability_id,
            } => write!(
                f,
                "{} names {} as parent but is not in its enabler table",
                enabler_id, capability_id
            ),
            IntegrityIssue::MissingParent {
                enabler_id,
                capability_id,
            } => write!(f, "{} names {} which does not exist", enabler_id, capability_id),
            IntegrityIssue::UnknownDependency {
                capability_id,
                other_id,
                direction,
            } => write!(
                f,
                "{} has {} dependency on {} which does not exist",
                capability_id, direction, other_id
            ),
            IntegrityIssue::AsymmetricDependency {
                capability_id,
                other_id,
                direction,
            } => write!(
                f,
                "{} lists {} as {} but the mirror row is missing",
                capability_id, other_id, direction
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub capabilities: usize,
    pub enablers: usize,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

fn dedup_dependencies(own_id: &str, deps: &[Dependency]) -> Vec<Dependency> {
    let mut seen = HashSet::new();
    deps.iter()
        .filter(|d| d.capability_id != own_id && seen.insert(d.capability_id.clone()))
        .cloned()
        .collect()
}

fn document_type_of(id: &str) -> Option<DocumentType> {
    if is_capability_id(id) {
        Some(DocumentType::Capability)
    } else if is_enabler_id(id) {
        Some(DocumentType::Enabler)
    } else {
        None
    }
}

/// Capability/enabler document graph rooted at a [`StoreContext`]
#[derive(Debug)]
pub struct SpecStore {
    ctx: StoreContext,
    allocator: IdAllocator,
    notifier: ChangeNotifier,
}

impl SpecStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self::with_notifier(ctx, ChangeNotifier::new())
    }

    pub fn with_notifier(ctx: StoreContext, notifier: ChangeNotifier) -> Self {
        Self {
            ctx,
            allocator: IdAllocator::new(),
            notifier,
        }
    }

    pub fn context(&self) -> &StoreContext {
        &self.ctx
    }

    /// Receives a `FileChanged` for every document the store writes or deletes
    pub fn subscribe(&self) -> Receiver<FileChanged> {
        self.notifier.subscribe()
    }

    fn sync(&self) -> SyncEngine<'_> {
        SyncEngine::new(&self.ctx, &self.notifier)
    }

    // ---- Queries ----

    pub fn list_capabilities(&self) -> Vec<Capability> {
        let mut capabilities: Vec<Capability> =
            self.ctx.capabilities().into_iter().map(|l| l.entity).collect();
        capabilities.sort_by(|a, b| a.id.cmp(&b.id));
        capabilities
    }

    pub fn list_enablers(&self) -> Vec<Enabler> {
        let mut enablers: Vec<Enabler> =
            self.ctx.enablers().into_iter().map(|l| l.entity).collect();
        enablers.sort_by(|a, b| a.id.cmp(&b.id));
        enablers
    }

    pub fn get_capability(&self, id: &str) -> StoreResult<Capability> {
        Ok(self.ctx.find_capability(id)?.entity)
    }

    pub fn get_enabler(&self, id: &str) -> StoreResult<Enabler> {
        Ok(self.ctx.find_enabler(id)?.entity)
    }

    /// Raw document for `id`, with the version needed for guarded writes
    pub fn document(&self, id: &str) -> StoreResult<Document> {
        match document_type_of(id) {
            Some(DocumentType::Capability) => Ok(self.ctx.find_capability(id)?.document),
            Some(DocumentType::Enabler) => Ok(self.ctx.find_enabler(id)?.document),
            None => Err(StoreError::NotFound {
                kind: "Document",
                id: id.to_string(),
            }),
        }
    }

    /// Document text with enabler tables joined live and dependency ids named
    pub fn render(&self, id: &str) -> StoreResult<String> {
        let document = self.document(id)?;
        Ok(enhance_with_context(&self.ctx, &document.content))
    }

    pub fn allocate_id(&self, prefix: IdPrefix) -> String {
        self.allocator.allocate(&self.ctx, prefix)
    }

    // ---- Creation ----

    fn create(&self, id: &str, doc_type: DocumentType, text: &str) -> StoreResult<PathBuf> {
        let path = self.ctx.path_for_new(id, doc_type)?;
        create_document(&path, text)?;
        self.notifier.publish(&path, ChangeKind::Created);
        info!(%id, path = %path.display(), "Created {}", doc_type);
        Ok(path)
    }

    pub fn create_capability(&self, draft: &CapabilityDraft) -> StoreResult<Capability> {
        let id = self.allocate_id(IdPrefix::Capability);
        let text = instantiate_capability(&self.ctx, &draft.template_fields(&id));
        self.create(&id, DocumentType::Capability, &text)?;
        Ok(parse_capability(&text))
    }

    /// Creates an enabler and, when `parent` is given, adds it to the
    /// parent's enabler table
    pub fn create_enabler(
        &self,
        draft: &EnablerDraft,
        parent: Option<&str>,
    ) -> StoreResult<Enabler> {
        if let Some(parent) = parent {
            self.ctx.find_capability(parent)?;
        }

        let id = self.allocate_id(IdPrefix::Enabler);
        let mut text = instantiate_enabler(&self.ctx, &draft.template_fields(&id), parent);
        if let Some(description) = &draft.description {
            text = set_metadata_field(&text, "Description", description);
        }
        self.create(&id, DocumentType::Enabler, &text)?;

        let enabler = parse_enabler(&text);
        if let Some(parent) = parent {
            self.sync()
                .reparent(
                    &enabler.id,
                    &enabler.name,
                    None,
                    Some(parent),
                    &enabler.description,
                )
                .into_result()?;
        }
        Ok(enabler)
    }

    /// Appends a requirement to an enabler under a freshly allocated
    /// `FR-`/`NFR-` id
    pub fn add_requirement(
        &self,
        enabler_id: &str,
        draft: &RequirementDraft,
    ) -> StoreResult<Requirement> {
        let located = self.ctx.find_enabler(enabler_id)?;
        let non_functional = draft.req_type.is_some();
        let prefix = if non_functional {
            IdPrefix::NonFunctionalRequirement
        } else {
            IdPrefix::FunctionalRequirement
        };

        let requirement = Requirement {
            id: self.allocate_id(prefix),
            name: draft.name.clone(),
            requirement: draft.requirement.clone(),
            priority: draft
                .priority
                .clone()
                .unwrap_or_else(|| Priority::Medium.to_string()),
            status: draft.status.clone().unwrap_or_else(|| DEFAULT_STATUS.to_string()),
            approval: draft
                .approval
                .clone()
                .unwrap_or_else(|| Approval::NotApproved.to_string()),
            req_type: draft.req_type.clone(),
        };
        let (spec, row) = if non_functional {
            (NON_FUNCTIONAL_TABLE, non_functional_row(&requirement))
        } else {
            (FUNCTIONAL_TABLE, functional_row(&requirement))
        };

        edit_document(&located.document.path, &self.notifier, |text| {
            Some(append_table_row(text, &spec, &row))
        })?;
        info!(%enabler_id, requirement = %requirement.id, "Added requirement");
        Ok(requirement)
    }

    // ---- Updates ----

    /// Applies a pure edit to `path`. With an expected version the edit is a
    /// single guarded write; without one it is re-applied on conflict.
    fn write_edit<F>(
        &self,
        path: &Path,
        expected: Option<&DocumentVersion>,
        edit: F,
    ) -> StoreResult<String>
    where
        F: Fn(&str) -> String,
    {
        match expected {
            Some(expected) => {
                let current = Document::read(path)?;
                if &current.version != expected {
                    return Err(StoreError::Conflict {
                        path: path.to_path_buf(),
                    });
                }
                let updated = edit(&current.content);
                if updated != current.content {
                    write_if_unchanged(path, Some(expected), &updated)?;
                    self.notifier.publish(path, ChangeKind::Modified);
                }
                Ok(updated)
            }
            None => {
                edit_document(path, &self.notifier, |text| Some(edit(text)))?;
                Ok(Document::read(path)?.content)
            }
        }
    }

    /// Keeps the parent tables in line after an enabler document changed
    fn sync_enabler(&self, before: Option<&str>, enabler: &Enabler) -> StoreResult<SyncReport> {
        let after = enabler.capability_id.as_deref();
        let description = enabler_row_description(enabler);
        let mut report = SyncReport::default();

        if before != after {
            report.merge(
                self.sync()
                    .reparent(&enabler.id, &enabler.name, before, after, description),
            );
        }
        if let Some(parent) = after {
            report.merge(
                self.sync()
                    .sync_enabler_to_capability(&enabler.id, description, parent),
            );
        }
        report.into_result()
    }

    pub fn update_enabler(&self, id: &str, update: &EnablerUpdate) -> StoreResult<Enabler> {
        let located = self.ctx.find_enabler(id)?;
        if let Some(Some(parent)) = &update.capability_id {
            self.ctx.find_capability(parent)?;
        }
        let old_name = located.entity.name.clone();

        let text = self.write_edit(
            &located.document.path,
            update.expected_version.as_ref(),
            |text| {
                let mut text = text.to_string();
                if let Some(name) = &update.name {
                    text = set_metadata_field(&text, "Name", name);
                    if name != &old_name {
                        text = set_title(&text, name);
                    }
                }
                let fields = [
                    ("Description", &update.description),
                    ("Status", &update.status),
                    ("Approval", &update.approval),
                    ("Priority", &update.priority),
                ];
                for (field, value) in fields {
                    if let Some(value) = value {
                        text = set_metadata_field(&text, field, value);
                    }
                }
                if let Some(parent) = &update.capability_id {
                    let parent = parent.as_deref().unwrap_or(NO_PARENT);
                    text = set_metadata_field(&text, "Capability ID", parent);
                }
                text
            },
        )?;

        let enabler = parse_enabler(&text);
        self.sync_enabler(located.entity.capability_id.as_deref(), &enabler)?;
        info!(%id, "Updated enabler");
        Ok(enabler)
    }

    pub fn update_capability(
        &self,
        id: &str,
        update: &CapabilityUpdate,
    ) -> StoreResult<Capability> {
        let located = self.ctx.find_capability(id)?;
        let old_name = located.entity.name.clone();
        let upstream = update.upstream.as_deref().map(|d| dedup_dependencies(id, d));
        let downstream = update.downstream.as_deref().map(|d| dedup_dependencies(id, d));

        let text = self.write_edit(
            &located.document.path,
            update.expected_version.as_ref(),
            |text| {
                let mut text = text.to_string();
                if let Some(name) = &update.name {
                    text = set_metadata_field(&text, "Name", name);
                    if name != &old_name {
                        text = set_title(&text, name);
                    }
                }
                let fields = [
                    ("Status", &update.status),
                    ("Approval", &update.approval),
                    ("Priority", &update.priority),
                    ("Owner", &update.owner),
                    ("System", &update.system),
                    ("Component", &update.component),
                ];
                for (field, value) in fields {
                    if let Some(value) = value {
                        text = set_metadata_field(&text, field, value);
                    }
                }
                if let Some(deps) = &upstream {
                    let rows: Vec<String> = deps.iter().map(dependency_row).collect();
                    text = replace_table_rows(&text, &UPSTREAM_TABLE, &rows);
                }
                if let Some(deps) = &downstream {
                    let rows: Vec<String> = deps.iter().map(dependency_row).collect();
                    text = replace_table_rows(&text, &DOWNSTREAM_TABLE, &rows);
                }
                text
            },
        )?;

        let capability = parse_capability(&text);
        if update.touches_dependencies() {
            self.sync()
                .update_bidirectional_dependencies(
                    id,
                    &capability.upstream_deps,
                    &capability.downstream_deps,
                )
                .into_result()?;
        }
        info!(%id, "Updated capability");
        Ok(capability)
    }

    /// Replaces a whole document. Without `expected` the last writer wins.
    /// The document's references are synchronized afterwards either way.
    pub fn replace_document(
        &self,
        id: &str,
        content: &str,
        expected: Option<&DocumentVersion>,
    ) -> StoreResult<DocumentVersion> {
        let before = self.document(id)?;
        let version = write_if_unchanged(&before.path, expected, content)?;
        self.notifier.publish(&before.path, ChangeKind::Modified);

        match document_type_of(id) {
            Some(DocumentType::Enabler) => {
                let old_parent = parse_enabler(&before.content).capability_id;
                self.sync_enabler(old_parent.as_deref(), &parse_enabler(content))?;
            }
            Some(DocumentType::Capability) => {
                let capability = parse_capability(content);
                self.sync()
                    .update_bidirectional_dependencies(
                        id,
                        &capability.upstream_deps,
                        &capability.downstream_deps,
                    )
                    .into_result()?;
            }
            None => {}
        }
        Ok(version)
    }

    // ---- Deletion ----

    /// Deletes an enabler and removes its row from every capability listing it
    pub fn delete_enabler(&self, id: &str) -> StoreResult<SyncReport> {
        let located = self.ctx.find_enabler(id)?;
        delete_document(&located.document.path)?;
        self.notifier.publish(&located.document.path, ChangeKind::Deleted);
        info!(%id, "Deleted enabler");

        let mut report = SyncReport::default();
        for capability in self.ctx.capabilities() {
            if capability.entity.has_enabler(id) {
                report.merge(
                    self.sync()
                        .remove_enabler_from_capability(id, &capability.entity.id),
                );
            }
        }
        report.into_result()
    }

    /// Deletes a capability, scrubs dependency rows pointing at it and
    /// detaches its enablers
    pub fn delete_capability(&self, id: &str) -> StoreResult<SyncReport> {
        let located = self.ctx.find_capability(id)?;
        delete_document(&located.document.path)?;
        self.notifier.publish(&located.document.path, ChangeKind::Deleted);
        info!(%id, "Deleted capability");

        let mut report = self.sync().scrub_dependency_references(id);
        for enabler in self.ctx.enablers() {
            if enabler.entity.capability_id.as_deref() == Some(id) {
                let outcome = edit_document(&enabler.document.path, &self.notifier, |text| {
                    Some(set_metadata_field(text, "Capability ID", NO_PARENT))
                });
                report.record(&enabler.entity.id, outcome);
            }
        }
        report.into_result()
    }

    // ---- Copy ----

    /// Gives every requirement id in `text` a fresh one
    fn reallocate_requirement_ids(&self, text: &str) -> String {
        let mut renamed: HashMap<String, String> = HashMap::new();
        REQUIREMENT_ID
            .replace_all(text, |caps: &Captures| {
                let old = caps[0].to_string();
                renamed
                    .entry(old)
                    .or_insert_with(|| {
                        let prefix = if &caps[1] == "NFR" {
                            IdPrefix::NonFunctionalRequirement
                        } else {
                            IdPrefix::FunctionalRequirement
                        };
                        self.allocate_id(prefix)
                    })
                    .clone()
            })
            .into_owned()
    }

    fn copy_enabler(&self, source_id: &str, capability_id: &str) -> StoreResult<Enabler> {
        let source = self.ctx.find_enabler(source_id)?;
        let id = self.allocate_id(IdPrefix::Enabler);

        let mut text = self.reallocate_requirement_ids(&source.document.content);
        text = set_metadata_field(&text, "ID", &id);
        text = set_metadata_field(&text, "Capability ID", capability_id);
        self.create(&id, DocumentType::Enabler, &text)?;

        let enabler = parse_enabler(&text);
        self.sync()
            .reparent(
                &enabler.id,
                &enabler.name,
                None,
                Some(capability_id),
                &enabler.description,
            )
            .into_result()?;
        Ok(enabler)
    }

    /// Copies a capability under a new id and name, together with a copy
    /// of each of its enablers. Enablers that fail to copy are skipped.
    pub fn copy_capability_with_enablers(
        &self,
        id: &str,
        new_name: &str,
    ) -> StoreResult<CopyReport> {
        let source = self.ctx.find_capability(id)?;
        let new_id = self.allocate_id(IdPrefix::Capability);

        let mut text = set_metadata_field(&source.document.content, "ID", &new_id);
        text = set_metadata_field(&text, "Name", new_name);
        text = set_title(&text, new_name);
        text = replace_table_rows(&text, &ENABLERS_TABLE, &[]);
        self.create(&new_id, DocumentType::Capability, &text)?;

        let mut enablers = Vec::new();
        let mut skipped = Vec::new();
        for source_enabler in &source.entity.enablers {
            match self.copy_enabler(&source_enabler.id, &new_id) {
                Ok(enabler) => enablers.push(enabler),
                Err(e) => {
                    warn!(enabler = %source_enabler.id, error = %e, "Skipping enabler during copy");
                    skipped.push(SkippedTarget {
                        target: source_enabler.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let copied = parse_capability(&text);
        self.sync()
            .update_bidirectional_dependencies(
                &new_id,
                &copied.upstream_deps,
                &copied.downstream_deps,
            )
            .into_result()?;

        info!(source = %id, copy = %new_id, enablers = enablers.len(), "Copied capability");
        Ok(CopyReport {
            capability: self.get_capability(&new_id)?,
            enablers,
            skipped,
        })
    }

    // ---- Integrity ----

    pub fn check_integrity(&self) -> IntegrityReport {
        let capabilities = self.list_capabilities();
        let enablers = self.list_enablers();
        let mut issues = Vec::new();

        let mut locations: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for scanned in self.ctx.scan_all() {
            let parsed = crate::parser::parse(&scanned.document.content, scanned.doc_type);
            if !parsed.id().is_empty() {
                locations
                    .entry(parsed.id().to_string())
                    .or_default()
                    .push(scanned.document.path);
            }
        }
        for (id, paths) in locations {
            if paths.len() > 1 {
                issues.push(IntegrityIssue::DuplicateId { id, paths });
            }
        }

        let capability_by_id: HashMap<&str, &Capability> =
            capabilities.iter().map(|c| (c.id.as_str(), c)).collect();
        let enabler_by_id: HashMap<&str, &Enabler> =
            enablers.iter().map(|e| (e.id.as_str(), e)).collect();

        for cap in &capabilities {
            for row in &cap.enablers {
                match enabler_by_id.get(row.id.as_str()) {
                    None => issues.push(IntegrityIssue::UnknownEnabler {
                        capability_id: cap.id.clone(),
                        enabler_id: row.id.clone(),
                    }),
                    Some(enb) if enb.capability_id.as_deref() != Some(cap.id.as_str()) => {
                        issues.push(IntegrityIssue::ForeignEnabler {
                            capability_id: cap.id.clone(),
                            enabler_id: row.id.clone(),
                            actual_parent: enb.capability_id.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }

            let directions = [
                (DependencyDirection::Upstream, &cap.upstream_deps),
                (DependencyDirection::Downstream, &cap.downstream_deps),
            ];
            for (direction, deps) in directions {
                for dep in deps {
                    let Some(other) = capability_by_id.get(dep.capability_id.as_str()) else {
                        issues.push(IntegrityIssue::UnknownDependency {
                            capability_id: cap.id.clone(),
                            other_id: dep.capability_id.clone(),
                            direction,
                        });
                        continue;
                    };
                    let mirror = match direction {
                        DependencyDirection::Upstream => &other.downstream_deps,
                        DependencyDirection::Downstream => &other.upstream_deps,
                    };
                    if !mirror.iter().any(|d| d.capability_id == cap.id) {
                        issues.push(IntegrityIssue::AsymmetricDependency {
                            capability_id: cap.id.clone(),
                            other_id: dep.capability_id.clone(),
                            direction,
                        });
                    }
                }
            }
        }

        for enb in &enablers {
            let Some(parent) = enb.capability_id.as_deref() else {
                continue;
            };
            match capability_by_id.get(parent) {
                None => issues.push(IntegrityIssue::MissingParent {
                    enabler_id: enb.id.clone(),
                    capability_id: parent.to_string(),
                }),
                Some(cap) if !cap.has_enabler(&enb.id) => issues.push(IntegrityIssue::MissingRow {
                    enabler_id: enb.id.clone(),
                    capability_id: parent.to_string(),
                }),
                Some(_) => {}
            }
        }

        issues.sort();
        IntegrityReport {
            capabilities: capabilities.len(),
            enablers: enablers.len(),
            issues,
        }
    }

    /// Removes enabler rows claimed by another parent, restores missing
    /// enabler rows and completes one-sided dependency edges
    pub fn repair(&self) -> StoreResult<SyncReport> {
        let mut report = SyncReport::default();
        for issue in self.check_integrity().issues {
            if let IntegrityIssue::ForeignEnabler {
                capability_id,
                enabler_id,
                ..
            } = issue
            {
                report.merge(
                    self.sync()
                        .remove_enabler_from_capability(&enabler_id, &capability_id),
                );
            }
        }
        report.merge(self.sync().resync_all());
        info!(updated = report.updated.len(), "Repair finished");
        report.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn store() -> (TempDir, SpecStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = SpecStore::new(StoreContext::new([temp_dir.path()]));
        (temp_dir, store)
    }

    fn capability(store: &SpecStore, name: &str) -> Capability {
        store.create_capability(&CapabilityDraft::new(name)).unwrap()
    }

    fn enabler(store: &SpecStore, name: &str, description: &str, parent: Option<&str>) -> Enabler {
        let draft = EnablerDraft {
            description: Some(description.to_string()),
            ..EnablerDraft::new(name)
        };
        store.create_enabler(&draft, parent).unwrap()
    }

    #[test]
    fn test_create_capability_writes_conventional_file() {
        let (dir, store) = store();
        let events = store.subscribe();
        let cap = capability(&store, "Payments");

        assert!(cap.id.starts_with("CAP-"));
        assert_eq!(cap.name, "Payments");
        assert_eq!(cap.status, DEFAULT_STATUS);
        assert_eq!(cap.approval, "Not Approved");
        let path = dir
            .path()
            .join(format!("{}-capability.md", &cap.id["CAP-".len()..]));
        assert!(path.exists());
        assert_eq!(
            events.try_recv().unwrap(),
            FileChanged {
                path,
                kind: ChangeKind::Created
            }
        );
        assert_eq!(store.get_capability(&cap.id).unwrap(), cap);
    }

    #[test]
    fn test_unparented_enabler_then_parenting() {
        // Scenario: enabler with no parent is attached to a capability
        let (_dir, store) = store();
        let cap = capability(&store, "Auth");
        let enb = enabler(&store, "Login", "Password login", None);
        assert_eq!(enb.capability_id, None);
        assert!(store.get_capability(&cap.id).unwrap().enablers.is_empty());

        let update = EnablerUpdate {
            capability_id: Some(Some(cap.id.clone())),
            ..Default::default()
        };
        store.update_enabler(&enb.id, &update).unwrap();

        let cap = store.get_capability(&cap.id).unwrap();
        assert_eq!(cap.enablers.len(), 1);
        assert_eq!(cap.enablers[0].id, enb.id);
        assert_eq!(cap.enablers[0].description, "Password login");
    }

    #[test]
    fn test_reparent_between_capabilities() {
        let (_dir, store) = store();
        let auth = capability(&store, "Auth");
        let billing = capability(&store, "Billing");
        let enb = enabler(&store, "Login", "Password login", Some(&auth.id));
        assert!(store.get_capability(&auth.id).unwrap().has_enabler(&enb.id));

        let update = EnablerUpdate {
            capability_id: Some(Some(billing.id.clone())),
            ..Default::default()
        };
        let moved = store.update_enabler(&enb.id, &update).unwrap();
        assert_eq!(moved.capability_id.as_deref(), Some(billing.id.as_str()));

        assert!(!store.get_capability(&auth.id).unwrap().has_enabler(&enb.id));
        assert_eq!(store.get_capability(&billing.id).unwrap().enablers.len(), 1);
        assert!(store.check_integrity().is_clean());
    }

    #[test]
    fn test_move_notifies_each_written_file_once() {
        let (_dir, store) = store();
        let auth = capability(&store, "Auth");
        let billing = capability(&store, "Billing");
        let enb = enabler(&store, "Login", "Password login", Some(&auth.id));
        let events = store.subscribe();

        let update = EnablerUpdate {
            capability_id: Some(Some(billing.id.clone())),
            ..Default::default()
        };
        store.update_enabler(&enb.id, &update).unwrap();

        let mut changed: Vec<PathBuf> = events.try_iter().map(|e| e.path).collect();
        changed.sort();
        let mut expected = vec![
            store.document(&enb.id).unwrap().path,
            store.document(&auth.id).unwrap().path,
            store.document(&billing.id).unwrap().path,
        ];
        expected.sort();
        assert_eq!(changed, expected);
    }

    #[test]
    fn test_enabler_edit_updates_parent_row() {
        let (_dir, store) = store();
        let cap = capability(&store, "Auth");
        let enb = enabler(&store, "Login", "Password login", Some(&cap.id));

        let update = EnablerUpdate {
            description: Some("Passkey login".to_string()),
            status: Some("Implemented".to_string()),
            ..Default::default()
        };
        store.update_enabler(&enb.id, &update).unwrap();

        let cap = store.get_capability(&cap.id).unwrap();
        assert_eq!(cap.enablers[0].description, "Passkey login");
        let view = store.render(&cap.id).unwrap();
        let row = format!("| {} | Login | Implemented | Not Approved | Medium |", enb.id);
        assert!(view.contains(&row));
    }

    #[test]
    fn test_stale_version_is_rejected() {
        let (_dir, store) = store();
        let cap = capability(&store, "Auth");
        let stale = store.document(&cap.id).unwrap().version;

        store
            .update_capability(
                &cap.id,
                &CapabilityUpdate {
                    status: Some("Ready".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let err = store
            .update_capability(
                &cap.id,
                &CapabilityUpdate {
                    owner: Some("Dana".to_string()),
                    expected_version: Some(stale),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.get_capability(&cap.id).unwrap().status, "Ready");
    }

    #[test]
    fn test_dependencies_stay_symmetric() {
        let (_dir, store) = store();
        let a = capability(&store, "A");
        let b = capability(&store, "B");
        let c = capability(&store, "C");

        let set_deps = |id: &str, up: &[&str], down: &[&str]| {
            let update = CapabilityUpdate {
                upstream: Some(up.iter().map(|d| Dependency::new(*d, "")).collect()),
                downstream: Some(down.iter().map(|d| Dependency::new(*d, "")).collect()),
                ..Default::default()
            };
            store.update_capability(id, &update).unwrap();
        };

        set_deps(&a.id, &[&b.id], &[&c.id]);
        assert!(store.check_integrity().is_clean());
        let b_now = store.get_capability(&b.id).unwrap();
        assert_eq!(b_now.downstream_deps[0].capability_id, a.id);

        // Editing B's side carries A's edge through, so the graph stays symmetric
        set_deps(&b.id, &[&c.id], &[&a.id]);
        assert!(store.check_integrity().is_clean());

        set_deps(&a.id, &[], &[]);
        assert!(store.get_capability(&b.id).unwrap().downstream_deps.is_empty());
        assert!(store.check_integrity().is_clean());
    }

    #[test]
    fn test_self_dependency_is_dropped() {
        let (_dir, store) = store();
        let a = capability(&store, "A");
        let update = CapabilityUpdate {
            upstream: Some(vec![Dependency::new(&a.id, "me"), Dependency::new(&a.id, "me")]),
            ..Default::default()
        };
        let updated = store.update_capability(&a.id, &update).unwrap();
        assert!(updated.upstream_deps.is_empty());
    }

    #[test]
    fn test_delete_enabler_removes_row() {
        let (_dir, store) = store();
        let cap = capability(&store, "Auth");
        let keep = enabler(&store, "Login", "x", Some(&cap.id));
        let doomed = enabler(&store, "Logout", "y", Some(&cap.id));

        store.delete_enabler(&doomed.id).unwrap();
        let cap = store.get_capability(&cap.id).unwrap();
        assert_eq!(cap.enabler_ids().collect::<Vec<_>>(), vec![keep.id.as_str()]);
        assert!(matches!(
            store.get_enabler(&doomed.id),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_delete_capability_detaches_everything() {
        let (_dir, store) = store();
        let a = capability(&store, "A");
        let b = capability(&store, "B");
        let enb = enabler(&store, "Login", "x", Some(&a.id));
        store
            .update_capability(
                &b.id,
                &CapabilityUpdate {
                    upstream: Some(vec![Dependency::new(&a.id, "")]),
                    ..Default::default()
                },
            )
            .unwrap();

        store.delete_capability(&a.id).unwrap();
        assert!(store.get_capability(&b.id).unwrap().upstream_deps.is_empty());
        assert_eq!(store.get_enabler(&enb.id).unwrap().capability_id, None);
        assert!(store.check_integrity().is_clean());
    }

    #[test]
    fn test_copy_capability_with_enablers() {
        let (_dir, store) = store();
        let source = capability(&store, "Auth");
        let enb = enabler(&store, "Login", "Password login", Some(&source.id));
        let req = store
            .add_requirement(
                &enb.id,
                &RequirementDraft {
                    name: "Lockout".to_string(),
                    requirement: "Lock after 5 failures".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();

        let report = store.copy_capability_with_enablers(&source.id, "Auth v2").unwrap();
        assert!(report.skipped.is_empty());
        assert_ne!(report.capability.id, source.id);
        assert_eq!(report.capability.name, "Auth v2");
        assert_eq!(report.enablers.len(), 1);

        let copy = &report.enablers[0];
        assert_ne!(copy.id, enb.id);
        assert_eq!(copy.capability_id.as_deref(), Some(report.capability.id.as_str()));
        assert_eq!(copy.functional_requirements.len(), 1);
        assert_ne!(copy.functional_requirements[0].id, req.id);
        assert_eq!(copy.functional_requirements[0].name, "Lockout");

        // Source untouched
        assert_eq!(store.get_capability(&source.id).unwrap().enablers.len(), 1);
        assert!(store.check_integrity().is_clean());
    }

    #[test]
    fn test_copy_skips_missing_enablers() {
        let (_dir, store) = store();
        let source = capability(&store, "Auth");
        let path = store.document(&source.id).unwrap().path;
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replace(
            "|------------|--------------|\n",
            "|------------|--------------|\n| ENB-999999 | ghost |\n",
        ))
        .unwrap();

        let report = store.copy_capability_with_enablers(&source.id, "Copy").unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].target, "ENB-999999");
        assert!(report.capability.enablers.is_empty());
    }

    #[test]
    fn test_check_and_repair() {
        let (_dir, store) = store();
        let a = capability(&store, "A");
        let b = capability(&store, "B");
        let orphan = enabler(&store, "Orphan", "x", None);

        // Hand edits: one-sided dependency and a parent that omits its row
        let a_path = store.document(&a.id).unwrap().path;
        let a_text = fs::read_to_string(&a_path).unwrap();
        fs::write(
            &a_path,
            append_table_row(&a_text, &UPSTREAM_TABLE, &format!("| {} | billing |", b.id)),
        )
        .unwrap();
        let o_path = store.document(&orphan.id).unwrap().path;
        let o_text = fs::read_to_string(&o_path).unwrap();
        fs::write(&o_path, set_metadata_field(&o_text, "Capability ID", &b.id)).unwrap();

        let report = store.check_integrity();
        assert_eq!(report.issues.len(), 2, "{:?}", report.issues);
        assert!(report.issues.contains(&IntegrityIssue::AsymmetricDependency {
            capability_id: a.id.clone(),
            other_id: b.id.clone(),
            direction: DependencyDirection::Upstream,
        }));
        assert!(report.issues.contains(&IntegrityIssue::MissingRow {
            enabler_id: orphan.id.clone(),
            capability_id: b.id.clone(),
        }));

        store.repair().unwrap();
        assert!(store.check_integrity().is_clean());
        let b_now = store.get_capability(&b.id).unwrap();
        assert!(b_now.has_enabler(&orphan.id));
        assert_eq!(b_now.downstream_deps[0].description, "billing");
    }

    #[test]
    fn test_replace_document_last_writer_wins_and_syncs() {
        let (_dir, store) = store();
        let a = capability(&store, "A");
        let b = capability(&store, "B");
        let doc = store.document(&a.id).unwrap();

        let edited = append_table_row(
            &doc.content,
            &DOWNSTREAM_TABLE,
            &format!("| {} | feeds |", b.id),
        );
        store.replace_document(&a.id, &edited, None).unwrap();
        assert_eq!(store.get_capability(&b.id).unwrap().upstream_deps[0].capability_id, a.id);

        // Guarded write against the original version now fails
        let err = store
            .replace_document(&a.id, &doc.content, Some(&doc.version))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn test_create_enabler_with_unknown_parent_fails() {
        let (dir, store) = store();
        let err = store
            .create_enabler(&EnablerDraft::new("Login"), Some("CAP-404404"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_render_unknown_id() {
        let (_dir, store) = store();
        assert!(matches!(store.render("XYZ-1"), Err(StoreError::NotFound { .. })));
    }
}
