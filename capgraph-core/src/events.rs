//! File change notifications
//!
//! The store publishes a `FileChanged` event after each write or delete has
//! reached the disk. Delivery, ordering and fan-out beyond the channel are
//! up to whoever holds the receiver.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChanged {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Fans change events out to every live subscriber
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    subscribers: Arc<Mutex<Vec<Sender<FileChanged>>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new subscription; dropping the receiver unsubscribes
    pub fn subscribe(&self) -> Receiver<FileChanged> {
        let (tx, rx) = unbounded();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    pub fn publish(&self, path: &Path, kind: ChangeKind) {
        let event = FileChanged {
            path: path.to_path_buf(),
            kind,
        };
        trace!(path = %path.display(), ?kind, "File changed");

        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_receives_event() {
        let notifier = ChangeNotifier::new();
        let a = notifier.subscribe();
        let b = notifier.subscribe();

        notifier.publish(Path::new("/x/1-capability.md"), ChangeKind::Modified);

        let expected = FileChanged {
            path: PathBuf::from("/x/1-capability.md"),
            kind: ChangeKind::Modified,
        };
        assert_eq!(a.try_recv().unwrap(), expected);
        assert_eq!(b.try_recv().unwrap(), expected);
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let notifier = ChangeNotifier::new();
        let kept = notifier.subscribe();
        drop(notifier.subscribe());
        assert_eq!(notifier.subscriber_count(), 2);

        notifier.publish(Path::new("a.md"), ChangeKind::Created);
        assert_eq!(notifier.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        ChangeNotifier::new().publish(Path::new("a.md"), ChangeKind::Deleted);
    }
}
