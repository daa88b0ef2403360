//! A CDP session attached to a specific target

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::types::{SessionId, TargetId};
use super::{CdpTransport, EventSink};
use crate::error::{Error, Result};

/// Thin wire endpoint for one CDP session id. Sends commands, exposes the
/// subscription primitive, and remembers whether the target crashed.
pub struct Session {
    transport: Arc<dyn CdpTransport>,
    id: SessionId,
    target_id: TargetId,
    crashed: AtomicBool,
}

impl Session {
    pub fn new(transport: Arc<dyn CdpTransport>, id: SessionId, target_id: TargetId) -> Self {
        Self {
            transport,
            id,
            target_id,
            crashed: AtomicBool::new(false),
        }
    }

    /// The session id
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The target this session is attached to
    pub fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    pub fn transport(&self) -> &Arc<dyn CdpTransport> {
        &self.transport
    }

    /// Send a command to this session and deserialize the reply
    pub async fn execute<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        let raw = self.execute_raw(method, serde_json::to_value(params)?).await?;
        let reply: R = serde_json::from_value(raw)?;
        Ok(reply)
    }

    /// Send a command and return the raw reply
    pub async fn execute_raw(&self, method: &str, params: Value) -> Result<Value> {
        if self.crashed.load(Ordering::Relaxed) {
            return Err(Error::Crashed);
        }
        tracing::trace!(session = %self.id, method, "CDP command");
        self.transport.execute(Some(&self.id), method, params).await
    }

    /// Send a command without waiting on the reply. Used where the subject
    /// may be gone by the time the browser processes it.
    pub async fn execute_fire_and_forget<C: Serialize>(&self, method: &str, params: &C) {
        let params = match serde_json::to_value(params) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(session = %self.id, method, "failed to encode params: {err}");
                return;
            }
        };
        self.transport.fire_and_forget(Some(&self.id), method, params).await;
    }

    /// Forward the named event subset for this session to `sink`
    pub fn subscribe(&self, events: &[&str], sink: EventSink) {
        self.transport.subscribe(&self.id, events, sink);
    }

    /// Mark the session as crashed; every later `execute` fails fast
    pub fn mark_as_crashed(&self) {
        self.crashed.store(true, Ordering::Relaxed);
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("target_id", &self.target_id)
            .field("crashed", &self.is_crashed())
            .finish()
    }
}
