//! Polling watcher for edits made outside the store
//!
//! Compares content hashes of every markdown file under the roots between
//! polls and publishes the differences through a [`ChangeNotifier`], so
//! consumers see hand edits the same way they see store writes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::context::StoreContext;
use crate::events::{ChangeKind, ChangeNotifier, FileChanged};
use crate::storage::{Document, DocumentVersion};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct PollingWatcher {
    ctx: StoreContext,
    notifier: ChangeNotifier,
    known: HashMap<PathBuf, DocumentVersion>,
}

impl PollingWatcher {
    /// Takes the initial snapshot; existing files are not reported as created
    pub fn new(ctx: StoreContext, notifier: ChangeNotifier) -> Self {
        let known = snapshot(&ctx);
        debug!(files = known.len(), "Watcher snapshot taken");
        Self {
            ctx,
            notifier,
            known,
        }
    }

    /// Rescans the roots, publishing and returning what changed since the
    /// previous poll
    pub fn poll(&mut self) -> Vec<FileChanged> {
        let current = snapshot(&self.ctx);
        let mut changes = Vec::new();

        for (path, version) in &current {
            match self.known.get(path) {
                None => changes.push(FileChanged {
                    path: path.clone(),
                    kind: ChangeKind::Created,
                }),
                Some(old) if old != version => changes.push(FileChanged {
                    path: path.clone(),
                    kind: ChangeKind::Modified,
                }),
                Some(_) => {}
            }
        }
        for path in self.known.keys() {
            if !current.contains_key(path) {
                changes.push(FileChanged {
                    path: path.clone(),
                    kind: ChangeKind::Deleted,
                });
            }
        }
        changes.sort_by(|a, b| a.path.cmp(&b.path));

        for change in &changes {
            self.notifier.publish(&change.path, change.kind);
        }
        self.known = current;
        changes
    }
}

fn snapshot(ctx: &StoreContext) -> HashMap<PathBuf, DocumentVersion> {
    ctx.markdown_files()
        .into_iter()
        .filter_map(|path| match Document::read(&path) {
            Ok(doc) => Some((path, doc.version)),
            Err(e) => {
                warn!(error = %e, "Watcher could not read document");
                None
            }
        })
        .collect()
}
