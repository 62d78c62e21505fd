//! Remote handles shared by every session a controller manages.

use std::sync::Arc;

use sandbox_core::{ContextApi, SessionApi, ToolApi};

/// Bundle of the remote collaborators a controller talks to.
///
/// Constructed explicitly and passed down; cloning shares the handles.
#[derive(Clone)]
pub struct SandboxClient {
    pub(crate) sessions: Arc<dyn SessionApi>,
    pub(crate) contexts: Arc<dyn ContextApi>,
    pub(crate) tools: Arc<dyn ToolApi>,
}

impl SandboxClient {
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionApi>,
        contexts: Arc<dyn ContextApi>,
        tools: Arc<dyn ToolApi>,
    ) -> Self {
        Self {
            sessions,
            contexts,
            tools,
        }
    }

    /// Use one backend for every surface.
    #[must_use]
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: SessionApi + ContextApi + ToolApi + 'static,
    {
        Self {
            sessions: backend.clone(),
            contexts: backend.clone(),
            tools: backend,
        }
    }
}

impl std::fmt::Debug for SandboxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxClient").finish_non_exhaustive()
    }
}
