//! Session lifecycle controller.

use std::{collections::HashMap, sync::Mutex, time::Duration};

use sandbox_context::{ContextSyncEngine, SyncMode};
use sandbox_core::{
    ClientConfig, LabelQuery, OperationError, OperationResult, PollOutcome, Response, SessionId,
    SessionLiveness, SessionPage, SessionStatus, StatusPoller, UnknownStatusPolicy, VpcRouting,
};
use sandbox_fs::{ChunkedTransferManager, ToolFileSystem};

use crate::{client::SandboxClient, params::CreateSessionParams};

/// Lowest port a session link may target.
pub const LINK_PORT_MIN: u16 = 30100;
/// Highest port a session link may target.
pub const LINK_PORT_MAX: u16 = 30199;

/// Handle to one remote session.
///
/// Clones share the deleted flag and the context sync engine.
#[derive(Debug, Clone)]
pub struct Session {
    session_id: SessionId,
    resource_url: String,
    vpc: Option<VpcRouting>,
    image_id: Option<String>,
    labels: HashMap<String, String>,
    context: ContextSyncEngine,
    liveness: SessionLiveness,
}

impl Session {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn resource_url(&self) -> &str {
        &self.resource_url
    }

    /// Routing details, present only for network-isolated sessions.
    #[must_use]
    pub const fn vpc(&self) -> Option<&VpcRouting> {
        self.vpc.as_ref()
    }

    #[must_use]
    pub const fn is_vpc(&self) -> bool {
        self.vpc.is_some()
    }

    #[must_use]
    pub fn image_id(&self) -> Option<&str> {
        self.image_id.as_deref()
    }

    /// Labels requested at creation. Use the controller for current labels.
    #[must_use]
    pub const fn initial_labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    /// Context sync engine bound to this session's mounts.
    #[must_use]
    pub const fn context(&self) -> &ContextSyncEngine {
        &self.context
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.liveness.is_deleted()
    }

    fn ensure_alive(&self) -> Result<(), OperationError> {
        if self.liveness.is_deleted() {
            return Err(OperationError::InvalidState(format!(
                "session {} has been deleted",
                self.session_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Pause,
    Resume,
}

impl Transition {
    const fn name(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
        }
    }

    /// Status before the request takes effect.
    const fn origin(self) -> SessionStatus {
        match self {
            Self::Pause => SessionStatus::Running,
            Self::Resume => SessionStatus::Paused,
        }
    }

    const fn transient(self) -> SessionStatus {
        match self {
            Self::Pause => SessionStatus::Pausing,
            Self::Resume => SessionStatus::Resuming,
        }
    }

    const fn target(self) -> SessionStatus {
        match self {
            Self::Pause => SessionStatus::Paused,
            Self::Resume => SessionStatus::Running,
        }
    }
}

/// Log each observed status change, flagging ones the lifecycle does not allow.
fn observe(session_id: &str, last: &Mutex<Option<SessionStatus>>, status: &SessionStatus) {
    let Ok(mut last) = last.lock() else {
        return;
    };
    if let Some(prev) = last.as_ref().filter(|prev| *prev != status) {
        if prev.can_transition_to(status) {
            tracing::info!(session_id, from = %prev, to = %status, "Session status changed");
        } else {
            tracing::warn!(session_id, from = %prev, to = %status, "Unexpected session status change");
        }
    }
    *last = Some(status.clone());
}

/// Orchestrates the lifecycle of sessions against one backend.
pub struct SessionController {
    client: SandboxClient,
    config: ClientConfig,
}

impl SessionController {
    /// Create a new session controller.
    #[must_use]
    pub const fn new(client: SandboxClient, config: ClientConfig) -> Self {
        Self { client, config }
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create a session.
    ///
    /// When context bindings are requested, waits for the initial download
    /// before returning, so a returned session always has its mounts
    /// populated. A failed create is reported as-is and never retried.
    pub async fn create(&self, params: &CreateSessionParams) -> OperationResult<Session> {
        let request = match params.to_request() {
            Ok(request) => request,
            Err(e) => {
                return OperationResult::fail(
                    "",
                    OperationError::InvalidArgument(format!("Cannot encode create request: {e}")),
                );
            }
        };
        let Response { request_id, data } = match self.client.sessions.create_session(&request).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(error = %e, "Session creation rejected");
                return OperationResult::from_remote(e);
            }
        };

        let liveness = SessionLiveness::new();
        let context = ContextSyncEngine::new(
            self.client.contexts.clone(),
            data.session_id.clone(),
            params.context_syncs.clone(),
            self.config.sync_poller(),
            self.config.initial_sync_poller(),
        )
        .with_liveness(liveness.clone());
        let session = Session {
            session_id: data.session_id,
            resource_url: data.resource_url,
            vpc: data.vpc,
            image_id: params.image_id.clone(),
            labels: params.labels.clone(),
            context,
            liveness,
        };
        tracing::info!(
            session_id = %session.session_id,
            %request_id,
            bindings = params.context_syncs.len(),
            vpc = session.is_vpc(),
            "Session created"
        );

        if !params.context_syncs.is_empty() {
            if let Err(err) = session.context.wait_for_initial_sync(&request_id).await.into_result() {
                tracing::warn!(
                    session_id = %session.session_id,
                    %request_id,
                    error = %err,
                    "Initial context sync did not complete; session left for the caller to delete"
                );
                return OperationResult::fail(request_id, err);
            }
        }

        OperationResult::ok(request_id, session)
    }

    /// Fetch the current status. Never cached.
    pub async fn status(&self, session: &Session) -> OperationResult<SessionStatus> {
        if let Err(e) = session.ensure_alive() {
            return OperationResult::fail("", e);
        }
        self.client
            .sessions
            .get_session_status(&session.session_id)
            .await
            .into()
    }

    /// Pause and wait for `PAUSED` using the configured timeout.
    pub async fn pause(&self, session: &Session) -> OperationResult<()> {
        self.transition(session, Transition::Pause, self.config.pause_poller())
            .await
    }

    pub async fn pause_with(
        &self,
        session: &Session,
        timeout: Duration,
        interval: Duration,
    ) -> OperationResult<()> {
        self.transition(session, Transition::Pause, StatusPoller::new(timeout, interval))
            .await
    }

    /// Resume and wait for `RUNNING` using the configured timeout.
    pub async fn resume(&self, session: &Session) -> OperationResult<()> {
        self.transition(session, Transition::Resume, self.config.pause_poller())
            .await
    }

    pub async fn resume_with(
        &self,
        session: &Session,
        timeout: Duration,
        interval: Duration,
    ) -> OperationResult<()> {
        self.transition(session, Transition::Resume, StatusPoller::new(timeout, interval))
            .await
    }

    async fn transition(
        &self,
        session: &Session,
        transition: Transition,
        poller: StatusPoller,
    ) -> OperationResult<()> {
        if let Err(e) = session.ensure_alive() {
            return OperationResult::fail("", e);
        }
        let sessions = &self.client.sessions;
        let session_id = session.session_id.as_str();

        let accepted = match transition {
            Transition::Pause => sessions.pause_session(session_id).await,
            Transition::Resume => sessions.resume_session(session_id).await,
        };
        let request_id = match accepted {
            Ok(resp) => resp.request_id,
            Err(e) => {
                tracing::error!(session_id, error = %e, "Session {} rejected", transition.name());
                return OperationResult::from_remote(e);
            }
        };
        tracing::info!(session_id, %request_id, "Session {} requested", transition.name());

        let strict = self.config.unknown_status == UnknownStatusPolicy::Strict;
        let target = &transition.target();
        let transient = &transition.transient();
        let origin = &transition.origin();
        let last = &Mutex::new(None);
        let waiting_for = format!("session {session_id} to reach {target}");

        let res = poller
            .poll_until(&request_id, &waiting_for, || async move {
                let status = match sessions.get_session_status(session_id).await {
                    Ok(resp) => resp.data,
                    Err(e) => return PollOutcome::Failed(e.into()),
                };
                observe(session_id, last, &status);
                if status == *target {
                    PollOutcome::Done(())
                } else if status == *transient || status == *origin {
                    PollOutcome::Continue
                } else if strict {
                    PollOutcome::Failed(OperationError::InvalidState(format!(
                        "unexpected status {status} while waiting for {target}"
                    )))
                } else {
                    tracing::warn!(session_id, %status, "Unrecognized session status; still waiting");
                    PollOutcome::Continue
                }
            })
            .await;

        match res.error() {
            None => tracing::info!(session_id, %request_id, "Session {} completed", transition.name()),
            Some(err) => {
                tracing::warn!(session_id, %request_id, error = %err, "Session {} did not complete", transition.name());
            }
        }
        res
    }

    /// Delete a session, optionally flushing context uploads first.
    ///
    /// Uploads that finished with failures are reported in the log and do
    /// not block the delete. A sync that is still running or could not be
    /// started aborts the delete, leaving the session alive.
    pub async fn delete(&self, session: &Session, sync_context_first: bool) -> OperationResult<()> {
        if let Err(e) = session.ensure_alive() {
            return OperationResult::fail("", e);
        }
        let session_id = session.session_id.as_str();

        if sync_context_first {
            let synced = session
                .context
                .sync(None, None, Some(SyncMode::Upload))
                .await;
            let sync_request_id = synced.request_id.clone();
            match synced.into_result() {
                Ok(report) => {
                    tracing::info!(session_id, records = report.entries.len(), "Context flushed before delete");
                }
                Err(err @ OperationError::PartialFailure { .. }) => {
                    tracing::warn!(session_id, error = %err, "Context flush had failures; deleting anyway");
                }
                Err(err) => {
                    tracing::warn!(session_id, error = %err, "Delete aborted; context flush did not finish");
                    return OperationResult::fail(sync_request_id, err);
                }
            }
        }

        match self.client.sessions.delete_session(session_id).await {
            Ok(resp) => {
                session.liveness.mark_deleted();
                tracing::info!(session_id, request_id = %resp.request_id, "Session deleted");
                OperationResult::ok(resp.request_id, ())
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "Session delete rejected");
                OperationResult::from_remote(e)
            }
        }
    }

    /// Poll until the backend reports the session as deleting, deleted,
    /// or gone.
    pub async fn wait_for_deletion(
        &self,
        session: &Session,
        timeout: Duration,
        interval: Duration,
    ) -> OperationResult<()> {
        let sessions = &self.client.sessions;
        let session_id = session.session_id.as_str();
        let waiting_for = format!("session {session_id} deletion");

        StatusPoller::new(timeout, interval)
            .poll_until("", &waiting_for, || async move {
                match sessions.get_session_status(session_id).await {
                    Ok(resp) if matches!(resp.data, SessionStatus::Deleting | SessionStatus::Deleted) => {
                        PollOutcome::Done(())
                    }
                    Ok(_) => PollOutcome::Continue,
                    Err(e) if e.is_not_found() => PollOutcome::Done(()),
                    Err(e) => PollOutcome::Failed(e.into()),
                }
            })
            .await
    }

    /// Replace the session's labels. Keys and values must be non-empty.
    pub async fn set_labels(
        &self,
        session: &Session,
        labels: &HashMap<String, String>,
    ) -> OperationResult<()> {
        if let Err(e) = session.ensure_alive() {
            return OperationResult::fail("", e);
        }
        if labels.is_empty() {
            return OperationResult::fail(
                "",
                OperationError::InvalidArgument("labels cannot be empty".to_string()),
            );
        }
        if labels.iter().any(|(k, v)| k.trim().is_empty() || v.trim().is_empty()) {
            return OperationResult::fail(
                "",
                OperationError::InvalidArgument(
                    "label keys and values cannot be empty".to_string(),
                ),
            );
        }
        self.client
            .sessions
            .set_labels(&session.session_id, labels)
            .await
            .into()
    }

    pub async fn get_labels(&self, session: &Session) -> OperationResult<HashMap<String, String>> {
        if let Err(e) = session.ensure_alive() {
            return OperationResult::fail("", e);
        }
        self.client
            .sessions
            .get_labels(&session.session_id)
            .await
            .into()
    }

    /// One page of sessions carrying every label in the query.
    pub async fn list_by_labels(&self, query: &LabelQuery) -> OperationResult<SessionPage> {
        self.client.sessions.list_by_labels(query).await.into()
    }

    /// Resolve an access link, optionally for a forwarded port.
    pub async fn get_link(
        &self,
        session: &Session,
        protocol: Option<&str>,
        port: Option<u16>,
    ) -> OperationResult<String> {
        if let Err(e) = session.ensure_alive() {
            return OperationResult::fail("", e);
        }
        if let Some(port) = port.filter(|p| !(LINK_PORT_MIN..=LINK_PORT_MAX).contains(p)) {
            return OperationResult::fail(
                "",
                OperationError::InvalidArgument(format!(
                    "Invalid port value {port}: must be in range [{LINK_PORT_MIN}, {LINK_PORT_MAX}]"
                )),
            );
        }
        self.client
            .sessions
            .get_link(&session.session_id, protocol, port)
            .await
            .into()
    }

    /// Chunked file transfer over the session's tool channel.
    #[must_use]
    pub fn file_transfer(&self, session: &Session) -> ChunkedTransferManager {
        let fs = ToolFileSystem::new(self.client.tools.clone(), session.session_id.clone());
        ChunkedTransferManager::with_chunk_size(std::sync::Arc::new(fs), self.config.chunk_size)
    }
}
