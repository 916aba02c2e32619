//! Store context: content roots, plan document, and document discovery
//!
//! Every store operation receives a `StoreContext` explicitly; nothing reads
//! ambient configuration, so independent stores can coexist in one process.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::models::{numeric_suffix, Capability, DocumentType, Enabler};
use crate::parser::{detect_type, parse_capability, parse_enabler};
use crate::storage::Document;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreContext {
    /// Directories scanned for specification documents
    pub roots: Vec<PathBuf>,
    /// Plan document holding the capability/enabler templates
    pub templates_path: Option<PathBuf>,
    /// Directory new documents are created in; defaults to the first root
    pub default_root: Option<PathBuf>,
}

/// A document found during a scan, with its type
#[derive(Debug, Clone)]
pub struct ScannedDocument {
    pub document: Document,
    pub doc_type: DocumentType,
}

/// A parsed entity together with the document it came from
#[derive(Debug, Clone)]
pub struct Located<T> {
    pub document: Document,
    pub entity: T,
}

/// `<numeric-id>-capability.md` / `<numeric-id>-enabler.md`
pub fn file_name_for_id(id: &str, doc_type: DocumentType) -> String {
    format!("{}{}", numeric_suffix(id), doc_type.file_suffix())
}

/// Type implied by a file name, if it follows the naming convention
pub fn type_from_file_name(path: &Path) -> Option<DocumentType> {
    let name = path.file_name()?.to_str()?;
    if name.ends_with(DocumentType::Capability.file_suffix()) {
        Some(DocumentType::Capability)
    } else if name.ends_with(DocumentType::Enabler.file_suffix()) {
        Some(DocumentType::Enabler)
    } else {
        None
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

impl StoreContext {
    pub fn new<P: Into<PathBuf>>(roots: impl IntoIterator<Item = P>) -> Self {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            templates_path: None,
            default_root: None,
        }
    }

    pub fn with_templates_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.templates_path = Some(path.into());
        self
    }

    pub fn with_default_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.default_root = Some(path.into());
        self
    }

    /// Directory where new documents are written
    pub fn creation_root(&self) -> StoreResult<&Path> {
        self.default_root
            .as_deref()
            .or_else(|| self.roots.first().map(PathBuf::as_path))
            .ok_or_else(|| StoreError::Config("no content roots configured".to_string()))
    }

    /// Path a new document with `id` would be created at
    pub fn path_for_new(&self, id: &str, doc_type: DocumentType) -> StoreResult<PathBuf> {
        Ok(self.creation_root()?.join(file_name_for_id(id, doc_type)))
    }

    fn is_plan_document(&self, path: &Path) -> bool {
        self.templates_path.as_deref() == Some(path)
    }

    /// Every markdown file under every root, excluding hidden directories
    /// and the plan document
    pub fn markdown_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for root in &self.roots {
            if !root.exists() {
                debug!(root = %root.display(), "Content root does not exist");
                continue;
            }
            let walker = WalkDir::new(root)
                .follow_links(true)
                .into_iter()
                .filter_entry(|e| !is_hidden(e));
            for entry in walker {
                match entry {
                    Ok(entry) => {
                        let path = entry.path();
                        if entry.file_type().is_file()
                            && path.extension().and_then(|e| e.to_str()) == Some("md")
                            && !self.is_plan_document(path)
                        {
                            files.push(path.to_path_buf());
                        }
                    }
                    Err(e) => warn!(error = %e, "Skipping unreadable directory entry"),
                }
            }
        }
        files.sort();
        files.dedup();
        files
    }

    /// Reads every document of `doc_type`. Conventionally named files are
    /// classified by name; other markdown files by their `Type` field.
    pub fn scan(&self, doc_type: DocumentType) -> Vec<ScannedDocument> {
        self.scan_all()
            .into_iter()
            .filter(|d| d.doc_type == doc_type)
            .collect()
    }

    /// Reads every capability and enabler document
    pub fn scan_all(&self) -> Vec<ScannedDocument> {
        let mut found = Vec::new();
        for path in self.markdown_files() {
            let document = match Document::read(&path) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable document");
                    continue;
                }
            };
            let doc_type = type_from_file_name(&path).or_else(|| detect_type(&document.content));
            if let Some(doc_type) = doc_type {
                found.push(ScannedDocument { document, doc_type });
            }
        }
        found
    }

    /// Finds a document by the id in its body. The conventional file name
    /// is tried first; the body is authoritative, so a full scan follows
    /// when the name is missing or misleading.
    fn find_document(&self, id: &str, doc_type: DocumentType) -> StoreResult<Document> {
        let file_name = file_name_for_id(id, doc_type);
        for root in &self.roots {
            let candidate = root.join(&file_name);
            if candidate.is_file() {
                let document = Document::read(&candidate)?;
                if metadata_id(&document.content, doc_type) == id {
                    return Ok(document);
                }
            }
        }

        for scanned in self.scan(doc_type) {
            if metadata_id(&scanned.document.content, doc_type) == id {
                return Ok(scanned.document);
            }
        }

        Err(match doc_type {
            DocumentType::Capability => StoreError::capability_not_found(id),
            DocumentType::Enabler => StoreError::enabler_not_found(id),
        })
    }

    pub fn find_capability(&self, id: &str) -> StoreResult<Located<Capability>> {
        let document = self.find_document(id, DocumentType::Capability)?;
        let entity = parse_capability(&document.content);
        Ok(Located { document, entity })
    }

    pub fn find_enabler(&self, id: &str) -> StoreResult<Located<Enabler>> {
        let document = self.find_document(id, DocumentType::Enabler)?;
        let entity = parse_enabler(&document.content);
        Ok(Located { document, entity })
    }

    pub fn capabilities(&self) -> Vec<Located<Capability>> {
        self.scan(DocumentType::Capability)
            .into_iter()
            .map(|s| {
                let entity = parse_capability(&s.document.content);
                Located {
                    document: s.document,
                    entity,
                }
            })
            .collect()
    }

    pub fn enablers(&self) -> Vec<Located<Enabler>> {
        self.scan(DocumentType::Enabler)
            .into_iter()
            .map(|s| {
                let entity = parse_enabler(&s.document.content);
                Located {
                    document: s.document,
                    entity,
                }
            })
            .collect()
    }
}

fn metadata_id(content: &str, doc_type: DocumentType) -> String {
    match doc_type {
        DocumentType::Capability => parse_capability(content).id,
        DocumentType::Enabler => parse_enabler(content).id,
    }
}
