//! Collaborator traits and the value types that cross them.
//!
//! Every remote surface the coordination layer depends on is expressed
//! here as an async trait returning `Result<Response<T>, RemoteError>`.
//! Implementations own the transport; the core never sees a wire format.

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::result::{RemoteError, Response};

/// Backend-assigned session identifier.
pub type SessionId = String;

/// Session status as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SessionStatus {
    Creating,
    Running,
    Pausing,
    Paused,
    Resuming,
    Deleting,
    Deleted,
    /// Anything outside the known vocabulary, kept verbatim.
    Unknown(String),
}

impl SessionStatus {
    /// Parse a backend status token. Never fails.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CREATING" => Self::Creating,
            "RUNNING" => Self::Running,
            "PAUSING" => Self::Pausing,
            "PAUSED" => Self::Paused,
            "RESUMING" => Self::Resuming,
            "DELETING" => Self::Deleting,
            "DELETED" => Self::Deleted,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    /// Wire token for this status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Creating => "CREATING",
            Self::Running => "RUNNING",
            Self::Pausing => "PAUSING",
            Self::Paused => "PAUSED",
            Self::Resuming => "RESUMING",
            Self::Deleting => "DELETING",
            Self::Deleted => "DELETED",
            Self::Unknown(raw) => raw,
        }
    }

    /// Whether the lifecycle state machine allows moving to `next`.
    ///
    /// Staying in the same state is always allowed. Unknown statuses on
    /// either side are not judged.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        use SessionStatus::{
            Creating, Deleted, Deleting, Paused, Pausing, Resuming, Running, Unknown,
        };
        if self == next {
            return true;
        }
        match (self, next) {
            (Unknown(_), _) | (_, Unknown(_)) => true,
            (Creating, Running)
            | (Running, Pausing)
            | (Pausing, Paused)
            | (Paused, Resuming)
            | (Resuming, Running)
            | (Deleting, Deleted) => true,
            (Deleted, _) => false,
            (_, Deleting) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for SessionStatus {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<SessionStatus> for String {
    fn from(status: SessionStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Shared "has this session been deleted" flag.
///
/// Cloned into every handle derived from one session so that a delete
/// through any of them is visible to all.
#[derive(Debug, Clone, Default)]
pub struct SessionLiveness(Arc<AtomicBool>);

impl SessionLiveness {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_deleted(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Routing details present only for network-isolated sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcRouting {
    pub network_interface_ip: String,
    pub http_port: String,
    pub token: String,
}

/// One context mount requested at creation time, already serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceEntry {
    pub context_id: String,
    pub path: String,
    /// Sync policy as the backend expects it (JSON text).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

/// Remote create call arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default)]
    pub persistence_data: Vec<PersistenceEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_configs: Option<Value>,
    #[serde(default)]
    pub vpc_resource: bool,
    #[serde(default)]
    pub enable_record: bool,
}

/// Remote create call reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    pub session_id: SessionId,
    #[serde(default)]
    pub resource_url: String,
    #[serde(default)]
    pub vpc: Option<VpcRouting>,
}

/// Label-based listing query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelQuery {
    pub labels: HashMap<String, String>,
    pub max_results: Option<u32>,
    pub next_token: Option<String>,
}

/// One page of label query results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPage {
    pub session_ids: Vec<SessionId>,
    pub next_token: Option<String>,
    pub max_results: Option<u32>,
    pub total_count: Option<u64>,
}

/// Filters shared by context status queries and sync triggers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextScope {
    pub context_id: Option<String>,
    pub path: Option<String>,
}

/// Metadata returned by the filesystem surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileInfo {
    pub size: u64,
    pub is_directory: bool,
}

/// How a chunk write treats existing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
}

impl WriteMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Overwrite => "overwrite",
            Self::Append => "append",
        }
    }
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "append" => Ok(Self::Append),
            other => Err(format!("Invalid write mode: {other}")),
        }
    }
}

/// Control-plane session operations.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Create a session. Not idempotent; callers must not retry blindly.
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<Response<CreatedSession>, RemoteError>;

    /// Fetch the current status of a session.
    async fn get_session_status(
        &self,
        session_id: &str,
    ) -> Result<Response<SessionStatus>, RemoteError>;

    /// Request an asynchronous pause. Returns once accepted or rejected.
    async fn pause_session(&self, session_id: &str) -> Result<Response<()>, RemoteError>;

    /// Request an asynchronous resume. Returns once accepted or rejected.
    async fn resume_session(&self, session_id: &str) -> Result<Response<()>, RemoteError>;

    /// Release a session.
    async fn delete_session(&self, session_id: &str) -> Result<Response<()>, RemoteError>;

    /// Replace the labels of a session.
    async fn set_labels(
        &self,
        session_id: &str,
        labels: &HashMap<String, String>,
    ) -> Result<Response<()>, RemoteError>;

    /// Read the labels of a session.
    async fn get_labels(
        &self,
        session_id: &str,
    ) -> Result<Response<HashMap<String, String>>, RemoteError>;

    /// List sessions whose labels contain every pair in the query.
    async fn list_by_labels(&self, query: &LabelQuery)
    -> Result<Response<SessionPage>, RemoteError>;

    /// Resolve an access link for a session.
    async fn get_link(
        &self,
        session_id: &str,
        protocol: Option<&str>,
        port: Option<u16>,
    ) -> Result<Response<String>, RemoteError>;
}

/// Context storage operations scoped to a session.
#[async_trait]
pub trait ContextApi: Send + Sync {
    /// Fetch the raw, backend-encoded sync status payload.
    async fn get_context_info(
        &self,
        session_id: &str,
        scope: &ContextScope,
        task_type: Option<&str>,
    ) -> Result<Response<String>, RemoteError>;

    /// Trigger a sync task. Returns once the task is accepted.
    async fn trigger_context_sync(
        &self,
        session_id: &str,
        scope: &ContextScope,
        mode: Option<&str>,
    ) -> Result<Response<()>, RemoteError>;
}

/// Opaque in-session tool invocation.
#[async_trait]
pub trait ToolApi: Send + Sync {
    /// Call a named tool inside a session and return its text output.
    async fn call_tool(
        &self,
        session_id: &str,
        tool: &str,
        args: Value,
    ) -> Result<Response<String>, RemoteError>;
}

/// Filesystem surface of one session.
#[async_trait]
pub trait FileSystemApi: Send + Sync {
    /// Size and kind of a path.
    async fn get_file_info(&self, path: &str) -> Result<Response<FileInfo>, RemoteError>;

    /// Read `length` bytes starting at `offset`.
    async fn read_chunk(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Response<Vec<u8>>, RemoteError>;

    /// Write `data`, overwriting or appending.
    async fn write_chunk(
        &self,
        path: &str,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<Response<()>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(SessionStatus::parse("running"), SessionStatus::Running);
        assert_eq!(SessionStatus::parse(" PAUSED "), SessionStatus::Paused);
        assert_eq!(
            SessionStatus::parse("other"),
            SessionStatus::Unknown("other".into())
        );
    }

    #[test]
    fn test_status_serde_uses_wire_tokens() {
        let json = serde_json::to_string(&SessionStatus::Resuming).unwrap();
        assert_eq!(json, "\"RESUMING\"");
        let parsed: SessionStatus = serde_json::from_str("\"DELETING\"").unwrap();
        assert_eq!(parsed, SessionStatus::Deleting);
    }

    #[test]
    fn test_state_machine_transitions() {
        use SessionStatus::*;
        assert!(Creating.can_transition_to(&Running));
        assert!(Running.can_transition_to(&Pausing));
        assert!(Pausing.can_transition_to(&Paused));
        assert!(Paused.can_transition_to(&Resuming));
        assert!(Resuming.can_transition_to(&Running));
        assert!(Paused.can_transition_to(&Deleting));
        assert!(Deleting.can_transition_to(&Deleted));

        assert!(!Running.can_transition_to(&Paused));
        assert!(!Paused.can_transition_to(&Running));
        assert!(!Deleted.can_transition_to(&Running));
        assert!(!Deleted.can_transition_to(&Deleting));
        assert!(Running.can_transition_to(&Unknown("other".into())));
    }

    #[test]
    fn test_liveness_is_shared_between_clones() {
        let a = SessionLiveness::new();
        let b = a.clone();
        assert!(!b.is_deleted());
        a.mark_deleted();
        assert!(b.is_deleted());
    }

    #[test]
    fn test_write_mode_parse() {
        assert_eq!("Append".parse::<WriteMode>(), Ok(WriteMode::Append));
        assert!("truncate".parse::<WriteMode>().is_err());
    }
}
