//! In-memory sandbox backend.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sandbox_core::{
    ContextApi, ContextScope, CreateSessionRequest, CreatedSession, LabelQuery, PersistenceEntry,
    RemoteError, Response, SessionApi, SessionId, SessionPage, SessionStatus, ToolApi, VpcRouting,
    WriteMode,
};
use sandbox_fs::tool_fs::{TOOL_GET_FILE_INFO, TOOL_READ_FILE, TOOL_WRITE_FILE};
use serde_json::{Value, json};
use uuid::Uuid;

const NOT_FOUND_CODE: &str = "InvalidSession.NotFound";
const DEFAULT_PAGE_SIZE: usize = 10;

/// Remote operation kinds, for call recording and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    CreateSession,
    GetStatus,
    Pause,
    Resume,
    Delete,
    SetLabels,
    GetLabels,
    ListByLabels,
    GetLink,
    ContextInfo,
    ContextSync,
    Tool,
}

/// One call received by the backend, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub request_id: String,
    pub op: MemoryOp,
    pub session_id: Option<SessionId>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
struct SyncTask {
    context_id: String,
    path: String,
    task_type: &'static str,
    polls_left: u32,
    error: Option<String>,
}

impl SyncTask {
    fn status(&self) -> &'static str {
        if self.polls_left > 0 {
            if self.task_type == "upload" {
                "Uploading"
            } else {
                "Downloading"
            }
        } else if self.error.is_some() {
            "Failed"
        } else {
            "Success"
        }
    }
}

#[derive(Debug)]
struct MemorySession {
    status: SessionStatus,
    pending: VecDeque<SessionStatus>,
    scripted: bool,
    labels: HashMap<String, String>,
    bindings: Vec<PersistenceEntry>,
    tasks: Vec<SyncTask>,
    files: HashMap<String, Vec<u8>>,
}

impl MemorySession {
    fn is_directory(&self, path: &str) -> bool {
        self.bindings.iter().any(|b| b.path == path)
            || self.files.keys().any(|f| relative_to(path, f).is_some())
    }

    fn push_task(&mut self, task: SyncTask) {
        self.tasks.retain(|t| {
            !(t.context_id == task.context_id
                && t.path == task.path
                && t.task_type == task.task_type)
        });
        self.tasks.push(task);
    }
}

/// Path of `file` below `mount`, with a leading slash.
fn relative_to(mount: &str, file: &str) -> Option<String> {
    let mount = mount.trim_end_matches('/');
    if mount.is_empty() {
        return Some(file.to_string());
    }
    file.strip_prefix(mount)
        .filter(|rest| rest.starts_with('/'))
        .map(str::to_string)
}

fn join(mount: &str, relative: &str) -> String {
    format!("{}{relative}", mount.trim_end_matches('/'))
}

fn poisoned<E: std::fmt::Display>(e: E) -> RemoteError {
    RemoteError::Transport(e.to_string())
}

fn not_found(request_id: &str, session_id: &str) -> RemoteError {
    RemoteError::Rejected {
        request_id: request_id.to_string(),
        code: Some(NOT_FOUND_CODE.to_string()),
        message: format!("session {session_id} not found"),
    }
}

/// In-memory implementation of the session, context and tool surfaces.
///
/// Useful for development and tests.
/// Data is lost on drop.
///
/// Session transitions advance one step per status query: a pause request
/// reports `PAUSING` for the configured number of queries, then `PAUSED`.
/// Sync tasks likewise report in progress for a configured number of
/// context info queries before finishing.
pub struct MemoryBackend {
    sessions: RwLock<HashMap<SessionId, MemorySession>>,
    contexts: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
    calls: RwLock<Vec<RecordedCall>>,
    failures: RwLock<HashMap<MemoryOp, String>>,
    failing_paths: RwLock<HashMap<String, String>>,
    transition_steps: u32,
    sync_steps: u32,
    request_seq: AtomicU64,
}

impl MemoryBackend {
    /// Create a backend with one intermediate step per transition.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            contexts: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
            failures: RwLock::new(HashMap::new()),
            failing_paths: RwLock::new(HashMap::new()),
            transition_steps: 1,
            sync_steps: 1,
            request_seq: AtomicU64::new(0),
        }
    }

    /// Status queries spent in `PAUSING`/`RESUMING` before settling.
    #[must_use]
    pub const fn with_transition_steps(mut self, steps: u32) -> Self {
        self.transition_steps = steps;
        self
    }

    /// Context info queries a sync task stays in progress.
    #[must_use]
    pub const fn with_sync_steps(mut self, steps: u32) -> Self {
        self.sync_steps = steps;
        self
    }

    /// Reject the next call of `op` with `message`.
    pub fn fail_next(&self, op: MemoryOp, message: impl Into<String>) {
        if let Ok(mut failures) = self.failures.write() {
            failures.insert(op, message.into());
        }
    }

    /// Make every sync task for `path` finish as failed.
    pub fn fail_sync_path(&self, path: impl Into<String>, message: impl Into<String>) {
        if let Ok(mut paths) = self.failing_paths.write() {
            paths.insert(path.into(), message.into());
        }
    }

    /// Report exactly these statuses on the next queries of a session.
    ///
    /// Scripted statuses take precedence over simulated transitions; once
    /// exhausted the last one sticks.
    pub fn script_statuses(
        &self,
        session_id: &str,
        statuses: impl IntoIterator<Item = SessionStatus>,
    ) {
        if let Ok(mut sessions) = self.sessions.write() {
            if let Some(session) = sessions.get_mut(session_id) {
                session.pending = statuses.into_iter().collect();
                session.scripted = true;
            }
        }
    }

    /// Place a file in context storage, relative to the mount root.
    pub fn seed_context_file(&self, context_id: &str, relative_path: &str, data: impl Into<Vec<u8>>) {
        if let Ok(mut contexts) = self.contexts.write() {
            contexts
                .entry(context_id.to_string())
                .or_default()
                .insert(relative_path.to_string(), data.into());
        }
    }

    #[must_use]
    pub fn context_file(&self, context_id: &str, relative_path: &str) -> Option<Vec<u8>> {
        self.contexts
            .read()
            .ok()?
            .get(context_id)?
            .get(relative_path)
            .cloned()
    }

    #[must_use]
    pub fn session_file(&self, session_id: &str, path: &str) -> Option<Vec<u8>> {
        self.sessions
            .read()
            .ok()?
            .get(session_id)?
            .files
            .get(path)
            .cloned()
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of sessions not yet deleted.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or_default()
    }

    fn next_request_id(&self) -> String {
        format!("req-{:06}", self.request_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Record the call and apply any injected failure.
    fn begin(
        &self,
        op: MemoryOp,
        session_id: Option<&str>,
        detail: Option<String>,
    ) -> Result<String, RemoteError> {
        let request_id = self.next_request_id();
        self.calls.write().map_err(poisoned)?.push(RecordedCall {
            request_id: request_id.clone(),
            op,
            session_id: session_id.map(str::to_string),
            detail,
        });
        if let Some(message) = self.failures.write().map_err(poisoned)?.remove(&op) {
            return Err(RemoteError::Rejected {
                request_id,
                code: Some("InjectedFailure".to_string()),
                message,
            });
        }
        Ok(request_id)
    }

    fn with_session<R>(
        &self,
        request_id: &str,
        session_id: &str,
        f: impl FnOnce(&mut MemorySession) -> Result<R, RemoteError>,
    ) -> Result<R, RemoteError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| not_found(request_id, session_id))?;
        f(session)
    }

    fn task(&self, context_id: &str, path: &str, task_type: &'static str) -> Result<SyncTask, RemoteError> {
        let error = self.failing_paths.read().map_err(poisoned)?.get(path).cloned();
        Ok(SyncTask {
            context_id: context_id.to_string(),
            path: path.to_string(),
            task_type,
            polls_left: self.sync_steps,
            error,
        })
    }

    fn begin_transition(&self, session: &mut MemorySession, transient: &SessionStatus, target: &SessionStatus) {
        if session.scripted {
            return;
        }
        session.pending = std::iter::repeat_n(transient.clone(), self.transition_steps as usize)
            .chain(std::iter::once(target.clone()))
            .collect();
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionApi for MemoryBackend {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<Response<CreatedSession>, RemoteError> {
        let request_id = self.begin(MemoryOp::CreateSession, None, request.image_id.clone())?;
        let session_id = format!("session-{}", Uuid::new_v4().simple());

        let mut session = MemorySession {
            status: SessionStatus::Running,
            pending: VecDeque::new(),
            scripted: false,
            labels: request.labels.clone(),
            bindings: request.persistence_data.clone(),
            tasks: Vec::new(),
            files: HashMap::new(),
        };

        // Mounted contexts are downloaded as part of creation.
        {
            let contexts = self.contexts.read().map_err(poisoned)?;
            for binding in &request.persistence_data {
                if let Some(stored) = contexts.get(&binding.context_id) {
                    for (relative, data) in stored {
                        session.files.insert(join(&binding.path, relative), data.clone());
                    }
                }
            }
        }
        for binding in &request.persistence_data {
            let task = self.task(&binding.context_id, &binding.path, "download")?;
            session.push_task(task);
        }

        let vpc = request.vpc_resource.then(|| VpcRouting {
            network_interface_ip: "10.0.0.2".to_string(),
            http_port: "8080".to_string(),
            token: Uuid::new_v4().simple().to_string(),
        });
        self.sessions
            .write()
            .map_err(poisoned)?
            .insert(session_id.clone(), session);

        Ok(Response::new(
            request_id,
            CreatedSession {
                resource_url: format!("https://sandbox.local/resources/{session_id}"),
                session_id,
                vpc,
            },
        ))
    }

    async fn get_session_status(
        &self,
        session_id: &str,
    ) -> Result<Response<SessionStatus>, RemoteError> {
        let request_id = self.begin(MemoryOp::GetStatus, Some(session_id), None)?;
        let status = self.with_session(&request_id, session_id, |s| {
            if let Some(next) = s.pending.pop_front() {
                s.status = next;
            }
            Ok(s.status.clone())
        })?;
        Ok(Response::new(request_id, status))
    }

    async fn pause_session(&self, session_id: &str) -> Result<Response<()>, RemoteError> {
        let request_id = self.begin(MemoryOp::Pause, Some(session_id), None)?;
        self.with_session(&request_id, session_id, |s| {
            self.begin_transition(s, &SessionStatus::Pausing, &SessionStatus::Paused);
            Ok(())
        })?;
        Ok(Response::new(request_id, ()))
    }

    async fn resume_session(&self, session_id: &str) -> Result<Response<()>, RemoteError> {
        let request_id = self.begin(MemoryOp::Resume, Some(session_id), None)?;
        self.with_session(&request_id, session_id, |s| {
            self.begin_transition(s, &SessionStatus::Resuming, &SessionStatus::Running);
            Ok(())
        })?;
        Ok(Response::new(request_id, ()))
    }

    async fn delete_session(&self, session_id: &str) -> Result<Response<()>, RemoteError> {
        let request_id = self.begin(MemoryOp::Delete, Some(session_id), None)?;
        self.sessions
            .write()
            .map_err(poisoned)?
            .remove(session_id)
            .ok_or_else(|| not_found(&request_id, session_id))?;
        Ok(Response::new(request_id, ()))
    }

    async fn set_labels(
        &self,
        session_id: &str,
        labels: &HashMap<String, String>,
    ) -> Result<Response<()>, RemoteError> {
        let request_id = self.begin(MemoryOp::SetLabels, Some(session_id), None)?;
        self.with_session(&request_id, session_id, |s| {
            s.labels.clone_from(labels);
            Ok(())
        })?;
        Ok(Response::new(request_id, ()))
    }

    async fn get_labels(
        &self,
        session_id: &str,
    ) -> Result<Response<HashMap<String, String>>, RemoteError> {
        let request_id = self.begin(MemoryOp::GetLabels, Some(session_id), None)?;
        let labels = self.with_session(&request_id, session_id, |s| Ok(s.labels.clone()))?;
        Ok(Response::new(request_id, labels))
    }

    async fn list_by_labels(
        &self,
        query: &LabelQuery,
    ) -> Result<Response<SessionPage>, RemoteError> {
        let request_id = self.begin(MemoryOp::ListByLabels, None, None)?;
        let offset = match query.next_token.as_deref() {
            None | Some("") => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| RemoteError::rejected(&request_id, format!("invalid next token {token}")))?,
        };
        let page_size = query
            .max_results
            .map_or(DEFAULT_PAGE_SIZE, |m| (m as usize).max(1));

        let mut matching: Vec<SessionId> = self
            .sessions
            .read()
            .map_err(poisoned)?
            .iter()
            .filter(|(_, s)| query.labels.iter().all(|(k, v)| s.labels.get(k) == Some(v)))
            .map(|(id, _)| id.clone())
            .collect();
        matching.sort();

        let total = matching.len();
        let end = (offset + page_size).min(total);
        let session_ids = matching.get(offset.min(total)..end).unwrap_or_default().to_vec();
        let next_token = (end < total).then(|| end.to_string());

        Ok(Response::new(
            request_id,
            SessionPage {
                session_ids,
                next_token,
                max_results: query.max_results,
                total_count: Some(total as u64),
            },
        ))
    }

    async fn get_link(
        &self,
        session_id: &str,
        protocol: Option<&str>,
        port: Option<u16>,
    ) -> Result<Response<String>, RemoteError> {
        let request_id = self.begin(MemoryOp::GetLink, Some(session_id), None)?;
        self.with_session(&request_id, session_id, |_| Ok(()))?;
        let protocol = protocol.unwrap_or("https");
        let link = match port {
            Some(port) => format!("{protocol}://{session_id}.sandbox.local:{port}"),
            None => format!("{protocol}://{session_id}.sandbox.local"),
        };
        Ok(Response::new(request_id, link))
    }
}

#[async_trait]
impl ContextApi for MemoryBackend {
    async fn get_context_info(
        &self,
        session_id: &str,
        scope: &ContextScope,
        task_type: Option<&str>,
    ) -> Result<Response<String>, RemoteError> {
        let request_id = self.begin(MemoryOp::ContextInfo, Some(session_id), None)?;
        let items = self.with_session(&request_id, session_id, |s| {
            let mut items = Vec::new();
            for task in s.tasks.iter_mut().filter(|t| {
                scope.context_id.as_ref().is_none_or(|id| *id == t.context_id)
                    && scope
                        .path
                        .as_ref()
                        .is_none_or(|p| *p == t.path || relative_to(p, &t.path).is_some())
                    && task_type.is_none_or(|k| k.eq_ignore_ascii_case(t.task_type))
            }) {
                items.push(json!({
                    "contextId": task.context_id,
                    "path": task.path,
                    "taskType": task.task_type,
                    "status": task.status(),
                    "errorMessage": task.error.clone().unwrap_or_default(),
                    "startTime": 0,
                    "finishTime": 0,
                }));
                task.polls_left = task.polls_left.saturating_sub(1);
            }
            Ok(items)
        })?;

        let payload = json!([{ "type": "data", "data": Value::Array(items).to_string() }]);
        Ok(Response::new(request_id, payload.to_string()))
    }

    async fn trigger_context_sync(
        &self,
        session_id: &str,
        scope: &ContextScope,
        mode: Option<&str>,
    ) -> Result<Response<()>, RemoteError> {
        let request_id = self.begin(
            MemoryOp::ContextSync,
            Some(session_id),
            mode.map(str::to_string),
        )?;
        let task_type = match mode.map(str::to_ascii_lowercase).as_deref() {
            None | Some("upload") => "upload",
            Some("download") => "download",
            Some(other) => {
                return Err(RemoteError::rejected(
                    request_id,
                    format!("unsupported sync mode {other}"),
                ));
            }
        };

        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| not_found(&request_id, session_id))?;
        let mut contexts = self.contexts.write().map_err(poisoned)?;

        let bindings: Vec<PersistenceEntry> = session
            .bindings
            .iter()
            .filter(|b| scope.context_id.as_ref().is_none_or(|id| *id == b.context_id))
            .filter(|b| {
                scope
                    .path
                    .as_ref()
                    .is_none_or(|p| *p == b.path || relative_to(&b.path, p).is_some())
            })
            .cloned()
            .collect();

        for binding in bindings {
            let target = scope.path.clone().unwrap_or_else(|| binding.path.clone());
            if task_type == "upload" {
                let stored = contexts.entry(binding.context_id.clone()).or_default();
                for (file, data) in &session.files {
                    let in_target = *file == target || relative_to(&target, file).is_some();
                    if let (true, Some(relative)) = (in_target, relative_to(&binding.path, file)) {
                        stored.insert(relative, data.clone());
                    }
                }
            } else if let Some(stored) = contexts.get(&binding.context_id) {
                for (relative, data) in stored {
                    session.files.insert(join(&binding.path, relative), data.clone());
                }
            }
            let task = self.task(&binding.context_id, &target, task_type)?;
            session.push_task(task);
        }

        Ok(Response::new(request_id, ()))
    }
}

#[async_trait]
impl ToolApi for MemoryBackend {
    async fn call_tool(
        &self,
        session_id: &str,
        tool: &str,
        args: Value,
    ) -> Result<Response<String>, RemoteError> {
        let detail = if tool == TOOL_WRITE_FILE {
            let mode = args.get("mode").and_then(Value::as_str).unwrap_or("overwrite");
            format!("{tool}:{mode}")
        } else {
            tool.to_string()
        };
        let request_id = self.begin(MemoryOp::Tool, Some(session_id), Some(detail))?;
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::rejected(&request_id, "missing path argument"))?
            .to_string();

        let output = self.with_session(&request_id, session_id, |s| match tool {
            TOOL_GET_FILE_INFO => {
                if let Some(data) = s.files.get(&path) {
                    Ok(format!("size: {}\nisDirectory: false", data.len()))
                } else if s.is_directory(&path) {
                    Ok("size: 0\nisDirectory: true".to_string())
                } else {
                    Err(RemoteError::rejected(&request_id, format!("file not found: {path}")))
                }
            }
            TOOL_READ_FILE => {
                let data = s
                    .files
                    .get(&path)
                    .ok_or_else(|| RemoteError::rejected(&request_id, format!("file not found: {path}")))?;
                let arg = |key: &str| {
                    args.get(key)
                        .and_then(Value::as_u64)
                        .and_then(|v| usize::try_from(v).ok())
                };
                let start = arg("offset").unwrap_or(0).min(data.len());
                let end = arg("length")
                    .map_or(data.len(), |len| start.saturating_add(len))
                    .min(data.len());
                Ok(BASE64.encode(&data[start..end]))
            }
            TOOL_WRITE_FILE => {
                let content = args.get("content").and_then(Value::as_str).unwrap_or_default();
                let bytes = BASE64
                    .decode(content)
                    .map_err(|e| RemoteError::rejected(&request_id, format!("invalid content: {e}")))?;
                let mode = args
                    .get("mode")
                    .and_then(Value::as_str)
                    .map_or(Ok(WriteMode::Overwrite), str::parse::<WriteMode>)
                    .map_err(|e| RemoteError::rejected(&request_id, e))?;
                match mode {
                    WriteMode::Overwrite => {
                        s.files.insert(path.clone(), bytes);
                    }
                    WriteMode::Append => s.files.entry(path.clone()).or_default().extend(bytes),
                }
                Ok(String::new())
            }
            other => Err(RemoteError::rejected(&request_id, format!("unknown tool {other}"))),
        })?;
        Ok(Response::new(request_id, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create(backend: &MemoryBackend, bindings: Vec<PersistenceEntry>) -> SessionId {
        let request = CreateSessionRequest {
            persistence_data: bindings,
            ..CreateSessionRequest::default()
        };
        backend.create_session(&request).await.unwrap().data.session_id
    }

    fn binding(context_id: &str, path: &str) -> PersistenceEntry {
        PersistenceEntry {
            context_id: context_id.into(),
            path: path.into(),
            policy: None,
        }
    }

    #[tokio::test]
    async fn test_pause_steps_through_pausing() {
        let backend = MemoryBackend::new().with_transition_steps(2);
        let id = create(&backend, vec![]).await;

        backend.pause_session(&id).await.unwrap();
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(backend.get_session_status(&id).await.unwrap().data);
        }
        assert_eq!(
            seen,
            vec![
                SessionStatus::Pausing,
                SessionStatus::Pausing,
                SessionStatus::Paused,
                SessionStatus::Paused
            ]
        );
    }

    #[tokio::test]
    async fn test_scripted_statuses_override_transitions() {
        let backend = MemoryBackend::new();
        let id = create(&backend, vec![]).await;
        backend.script_statuses(&id, [SessionStatus::Resuming]);

        backend.resume_session(&id).await.unwrap();
        for _ in 0..3 {
            assert_eq!(
                backend.get_session_status(&id).await.unwrap().data,
                SessionStatus::Resuming
            );
        }
    }

    #[tokio::test]
    async fn test_deleted_session_is_not_found() {
        let backend = MemoryBackend::new();
        let id = create(&backend, vec![]).await;
        backend.delete_session(&id).await.unwrap();

        let err = backend.get_session_status(&id).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(backend.session_count(), 0);
    }

    #[tokio::test]
    async fn test_request_ids_are_unique() {
        let backend = MemoryBackend::new();
        let id = create(&backend, vec![]).await;
        let a = backend.get_session_status(&id).await.unwrap().request_id;
        let b = backend.get_session_status(&id).await.unwrap().request_id;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_injected_failure_applies_once() {
        let backend = MemoryBackend::new();
        let id = create(&backend, vec![]).await;
        backend.fail_next(MemoryOp::Pause, "quota exceeded");

        let err = backend.pause_session(&id).await.unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");
        assert!(!err.request_id().is_empty());
        assert!(backend.pause_session(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_upload_then_download_into_new_session() {
        let backend = MemoryBackend::new().with_sync_steps(0);
        let first = create(&backend, vec![binding("ctx-1", "/tmp/data")]).await;
        backend
            .call_tool(
                &first,
                TOOL_WRITE_FILE,
                json!({ "path": "/tmp/data/a.txt", "content": BASE64.encode("hello"), "mode": "overwrite" }),
            )
            .await
            .unwrap();
        backend
            .trigger_context_sync(&first, &ContextScope::default(), Some("upload"))
            .await
            .unwrap();
        assert_eq!(backend.context_file("ctx-1", "/a.txt").as_deref(), Some(&b"hello"[..]));

        let second = create(&backend, vec![binding("ctx-1", "/mnt/restore")]).await;
        assert_eq!(
            backend.session_file(&second, "/mnt/restore/a.txt").as_deref(),
            Some(&b"hello"[..])
        );
    }

    #[tokio::test]
    async fn test_context_info_reports_progress_then_success() {
        let backend = MemoryBackend::new().with_sync_steps(1);
        let id = create(&backend, vec![binding("ctx-1", "/tmp/data")]).await;

        let first = backend
            .get_context_info(&id, &ContextScope::default(), None)
            .await
            .unwrap()
            .data;
        assert!(first.contains("Downloading"));
        let second = backend
            .get_context_info(&id, &ContextScope::default(), None)
            .await
            .unwrap()
            .data;
        assert!(second.contains("Success"));
    }

    #[tokio::test]
    async fn test_list_by_labels_paginates() {
        let backend = MemoryBackend::new();
        for _ in 0..3 {
            let request = CreateSessionRequest {
                labels: HashMap::from([("team".to_string(), "a".to_string())]),
                ..CreateSessionRequest::default()
            };
            backend.create_session(&request).await.unwrap();
        }
        create(&backend, vec![]).await;

        let query = LabelQuery {
            labels: HashMap::from([("team".to_string(), "a".to_string())]),
            max_results: Some(2),
            next_token: None,
        };
        let page = backend.list_by_labels(&query).await.unwrap().data;
        assert_eq!(page.session_ids.len(), 2);
        assert_eq!(page.total_count, Some(3));
        let next = LabelQuery {
            next_token: page.next_token,
            ..query
        };
        let rest = backend.list_by_labels(&next).await.unwrap().data;
        assert_eq!(rest.session_ids.len(), 1);
        assert!(rest.next_token.is_none());
    }

    #[tokio::test]
    async fn test_file_tools() {
        let backend = MemoryBackend::new();
        let id = create(&backend, vec![]).await;
        for (content, mode) in [("abc", "overwrite"), ("def", "append")] {
            backend
                .call_tool(
                    &id,
                    TOOL_WRITE_FILE,
                    json!({ "path": "/f", "content": BASE64.encode(content), "mode": mode }),
                )
                .await
                .unwrap();
        }
        let info = backend
            .call_tool(&id, TOOL_GET_FILE_INFO, json!({ "path": "/f" }))
            .await
            .unwrap()
            .data;
        assert_eq!(info, "size: 6\nisDirectory: false");
        let chunk = backend
            .call_tool(&id, TOOL_READ_FILE, json!({ "path": "/f", "offset": 2, "length": 3 }))
            .await
            .unwrap()
            .data;
        assert_eq!(BASE64.decode(chunk).unwrap(), b"cde");
    }
}
