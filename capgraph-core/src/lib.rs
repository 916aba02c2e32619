pub mod allocator;
pub mod config;
pub mod context;
pub mod edit;
pub mod enhancer;
pub mod error;
pub mod events;
pub mod export;
pub mod models;
pub mod parser;
pub mod render;
pub mod storage;
pub mod store;
pub mod sync;
pub mod template;
pub mod tokenizer;
pub mod watcher;

// Re-export commonly used types
pub use allocator::IdAllocator;
pub use config::{find_config_path, load_context, StoreConfig};
pub use context::{Located, StoreContext};
pub use enhancer::{enhance_for_render, enhance_with_context, CapabilityIndex, EnablerIndex};
pub use error::{StoreError, StoreResult};
pub use events::{ChangeKind, ChangeNotifier, FileChanged};
pub use export::GraphSnapshot;
pub use models::{
    Approval, Capability, Dependency, DocumentType, Enabler, EnablerRef, IdPrefix,
    ParsedDocument, Priority, Requirement, UnknownValue,
};
pub use parser::{detect_type, parse, parse_capability, parse_enabler};
pub use storage::{Document, DocumentVersion};
pub use store::{
    CapabilityDraft, CapabilityUpdate, CopyReport, DependencyDirection, EnablerDraft,
    EnablerUpdate, IntegrityIssue, IntegrityReport, RequirementDraft, SpecStore,
};
pub use sync::{SkippedTarget, SyncEngine, SyncReport};
pub use watcher::{PollingWatcher, DEFAULT_POLL_INTERVAL};
