//! Context synchronization engine.

use std::sync::Arc;

use sandbox_core::{
    ContextApi, ContextScope, OperationError, OperationResult, PollOutcome, SessionId,
    SessionLiveness, StatusPoller,
};

use crate::{
    policy::{ContextSync, SyncMode, UploadMode, is_path_included},
    status::{
        ContextStatusData, SyncVerdict, evaluate, parse_context_status, parse_status_payload,
    },
};

/// Records that decided a finished sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub entries: Vec<ContextStatusData>,
}

/// Drives sync tasks for the context bindings of one session.
///
/// Cheap to clone; clones share the same remote handle and liveness flag.
/// Each call keeps its poll state on its own stack, so concurrent callers
/// need no locking.
#[derive(Clone)]
pub struct ContextSyncEngine {
    api: Arc<dyn ContextApi>,
    session_id: SessionId,
    bindings: Arc<[ContextSync]>,
    sync_poller: StatusPoller,
    initial_poller: StatusPoller,
    liveness: SessionLiveness,
}

impl std::fmt::Debug for ContextSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextSyncEngine")
            .field("session_id", &self.session_id)
            .field("bindings", &self.bindings)
            .field("sync_poller", &self.sync_poller)
            .field("initial_poller", &self.initial_poller)
            .finish_non_exhaustive()
    }
}

impl ContextSyncEngine {
    /// Create an engine for `session_id`.
    #[must_use]
    pub fn new(
        api: Arc<dyn ContextApi>,
        session_id: impl Into<SessionId>,
        bindings: Vec<ContextSync>,
        sync_poller: StatusPoller,
        initial_poller: StatusPoller,
    ) -> Self {
        Self {
            api,
            session_id: session_id.into(),
            bindings: bindings.into(),
            sync_poller,
            initial_poller,
            liveness: SessionLiveness::new(),
        }
    }

    /// Share a liveness flag with the owning session.
    #[must_use]
    pub fn with_liveness(mut self, liveness: SessionLiveness) -> Self {
        self.liveness = liveness;
        self
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn bindings(&self) -> &[ContextSync] {
        &self.bindings
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

    /// Query sync status records, optionally filtered.
    ///
    /// A malformed payload yields an empty list, never a failure; the
    /// request id is returned either way.
    pub async fn info(
        &self,
        context_id: Option<&str>,
        path: Option<&str>,
        task_type: Option<&str>,
    ) -> OperationResult<Vec<ContextStatusData>> {
        if let Err(e) = self.ensure_alive() {
            return OperationResult::fail("", e);
        }
        let scope = ContextScope {
            context_id: context_id.map(str::to_string),
            path: path.map(str::to_string),
        };
        match self
            .api
            .get_context_info(&self.session_id, &scope, task_type)
            .await
        {
            Ok(resp) => {
                let entries = parse_context_status(&resp.data)
                    .into_iter()
                    .filter(|e| e.matches(context_id, path, task_type))
                    .collect();
                OperationResult::ok(resp.request_id, entries)
            }
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "Context info failed");
                OperationResult::from_remote(e)
            }
        }
    }

    /// Reject an upload of `path` that the matching binding's allow/deny
    /// list excludes. Archive-mode bindings defer filtering to the backend.
    fn check_path_policy(&self, context_id: Option<&str>, path: &str) -> Result<(), OperationError> {
        let binding = self
            .bindings
            .iter()
            .filter(|b| context_id.is_none_or(|id| id == b.context_id()))
            .find(|b| b.covers(path));
        let Some(binding) = binding else {
            return Ok(());
        };
        let Some(policy) = binding.policy() else {
            return Ok(());
        };
        if binding.upload_mode() != UploadMode::File {
            return Ok(());
        }
        let relative = binding.relative(path);
        if relative == "/" || is_path_included(&relative, policy) {
            Ok(())
        } else {
            Err(OperationError::InvalidArgument(format!(
                "Path {path} is excluded by the sync policy of context {}",
                binding.context_id()
            )))
        }
    }

    /// Trigger a sync for one binding (or all, when filters are omitted)
    /// and wait until no matching record is in progress.
    ///
    /// Failed records make the whole result a failure listing each failed
    /// path; success carries the records that decided it.
    pub async fn sync(
        &self,
        context_id: Option<&str>,
        path: Option<&str>,
        mode: Option<SyncMode>,
    ) -> OperationResult<SyncReport> {
        if let Err(e) = self.ensure_alive() {
            return OperationResult::fail("", e);
        }
        if let Some(path) = path {
            if mode != Some(SyncMode::Download) {
                if let Err(e) = self.check_path_policy(context_id, path) {
                    return OperationResult::fail("", e);
                }
            }
        }

        let scope = ContextScope {
            context_id: context_id.map(str::to_string),
            path: path.map(str::to_string),
        };
        let mode_str = mode.map(SyncMode::as_str);
        let request_id = match self
            .api
            .trigger_context_sync(&self.session_id, &scope, mode_str)
            .await
        {
            Ok(resp) => resp.request_id,
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "Context sync rejected");
                return OperationResult::from_remote(e);
            }
        };
        tracing::info!(
            session_id = %self.session_id,
            %request_id,
            context_id = context_id.unwrap_or("*"),
            path = path.unwrap_or("*"),
            mode = mode_str.unwrap_or("default"),
            "Context sync triggered"
        );

        let res = self
            .wait(&request_id, &self.sync_poller, "context sync", |e| {
                e.matches(context_id, path, mode_str)
            })
            .await;
        if let Some(err) = res.error() {
            tracing::warn!(session_id = %self.session_id, %request_id, error = %err, "Context sync did not succeed");
        }
        res
    }

    /// Wait for the download that populates the mounts after creation.
    ///
    /// Does not trigger a task: the backend starts it as part of create.
    /// Bindings whose policy disables auto download are not waited on.
    pub async fn wait_for_initial_sync(&self, request_id: &str) -> OperationResult<SyncReport> {
        if let Err(e) = self.ensure_alive() {
            return OperationResult::fail(request_id, e);
        }
        let awaited: Vec<&ContextSync> = self
            .bindings
            .iter()
            .filter(|b| b.policy().is_none_or(|p| p.download_policy.auto_download))
            .collect();
        if awaited.is_empty() {
            return OperationResult::ok(request_id, SyncReport::default());
        }
        tracing::info!(
            session_id = %self.session_id,
            bindings = awaited.len(),
            "Waiting for initial context sync"
        );

        let download = Some(SyncMode::Download.as_str());
        let awaited = &awaited;
        self.wait(request_id, &self.initial_poller, "initial context sync", |e| {
            awaited
                .iter()
                .any(|b| e.matches(Some(b.context_id()), None, download) && b.covers(&e.path))
        })
        .await
    }

    async fn wait<F>(
        &self,
        request_id: &str,
        poller: &StatusPoller,
        waiting_for: &str,
        in_scope: F,
    ) -> OperationResult<SyncReport>
    where
        F: Fn(&ContextStatusData) -> bool + Sync,
    {
        let api = &self.api;
        let session_id = self.session_id.as_str();
        let scope = &ContextScope::default();
        let in_scope = &in_scope;

        poller
            .poll_until(request_id, waiting_for, || async move {
                let resp = match api.get_context_info(session_id, scope, None).await {
                    Ok(resp) => resp,
                    Err(e) => return PollOutcome::Failed(e.into()),
                };
                let parsed = parse_status_payload(&resp.data);
                let entries: Vec<ContextStatusData> =
                    parsed.entries.into_iter().filter(|e| in_scope(e)).collect();
                tracing::debug!(
                    session_id,
                    info_request_id = %resp.request_id,
                    records = entries.len(),
                    malformed = parsed.malformed,
                    "Polled context status"
                );
                // An undecodable record may be a task still running.
                if parsed.malformed > 0 {
                    return PollOutcome::Continue;
                }
                match evaluate(&entries) {
                    SyncVerdict::InProgress => PollOutcome::Continue,
                    SyncVerdict::Succeeded => PollOutcome::Done(SyncReport { entries }),
                    SyncVerdict::Failed(failures) => {
                        PollOutcome::Failed(OperationError::PartialFailure {
                            total: entries.len(),
                            failures,
                        })
                    }
                }
            })
            .await
    }
}
