//! Worker targets: attach/detach bookkeeping only

use std::sync::Arc;

use crate::cdp::session::Session;
use crate::cdp::types::{RunIfWaitingForDebugger, TargetId};
use crate::error::Result;

/// A dedicated worker target. The engine keeps it unblocked and tracked;
/// driving workers beyond that is out of scope.
pub struct Worker {
    session: Arc<Session>,
    target_id: TargetId,
    url: String,
}

impl Worker {
    /// Unblock the freshly attached worker target and record it
    pub async fn attach(session: Arc<Session>, target_id: TargetId, url: String) -> Result<Worker> {
        session
            .execute::<_, serde_json::Value>(
                "Runtime.runIfWaitingForDebugger",
                &RunIfWaitingForDebugger {},
            )
            .await?;
        tracing::debug!(target = %target_id, url = %url, "worker attached");
        Ok(Worker {
            session,
            target_id,
            url,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("target_id", &self.target_id)
            .field("url", &self.url)
            .finish()
    }
}
