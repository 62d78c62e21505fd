//! Context sync policy and synchronization engine.
//!
//! Provides:
//! - `SyncPolicy` - Validated, declarative sync configuration
//! - `ContextSync` - Binding of a context to a session mount path
//! - `ContextSyncEngine` - Trigger and await sync tasks
//! - Status payload parsing and the sync completion predicate

pub mod engine;
pub mod policy;
pub mod status;

pub use engine::{ContextSyncEngine, SyncReport};
pub use policy::{
    BWList, ContextSync, DeletePolicy, DownloadPolicy, DownloadStrategy, ExtractPolicy, Lifecycle,
    MappingPolicy, PolicyError, RecyclePolicy, SyncMode, SyncPolicy, UploadMode, UploadPolicy,
    UploadStrategy, WhiteList, is_path_included, normalize_path,
};
pub use status::{
    ContextStatusData, ParsedStatus, SyncVerdict, evaluate, parse_context_status,
    parse_status_payload,
};
