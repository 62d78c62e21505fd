//! Core abstractions for remote sandbox session coordination.
//!
//! This crate provides the fundamental building blocks:
//! - `OperationResult` - Result object returned by every public operation
//! - `StatusPoller` - Poll-until-predicate primitive with a deadline
//! - `ClientConfig` - Explicit client configuration
//! - Collaborator traits for session, context, tool and filesystem surfaces

pub mod config;
pub mod poller;
pub mod result;
pub mod traits;

pub use config::{ClientConfig, ConfigError, UnknownStatusPolicy};
pub use poller::{PollOutcome, StatusPoller};
pub use result::{OperationError, OperationResult, RemoteError, Response, UnitFailure};
pub use traits::{
    ContextApi, ContextScope, CreateSessionRequest, CreatedSession, FileInfo, FileSystemApi,
    LabelQuery, PersistenceEntry, SessionApi, SessionId, SessionLiveness, SessionPage,
    SessionStatus, ToolApi, VpcRouting, WriteMode,
};
