//! CDP wire layer: the transport seam, session endpoints, and typed
//! commands/events
//!
//! The WebSocket connection itself lives outside this crate; everything
//! here talks to it through the [`CdpTransport`] trait.

pub mod events;
pub mod session;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use events::CdpEvent;
use types::SessionId;

/// Sink for events forwarded from a subscription
pub type EventSink = mpsc::UnboundedSender<CdpEvent>;

/// The connection this engine drives. Implemented by the real WebSocket
/// transport in the harness and by an in-process mock in tests.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    /// Send a command and wait for its reply. `session_id` of `None`
    /// addresses the browser endpoint.
    async fn execute(
        &self,
        session_id: Option<&SessionId>,
        method: &str,
        params: Value,
    ) -> Result<Value>;

    /// Send a command without waiting for (or caring about) the reply
    async fn fire_and_forget(&self, session_id: Option<&SessionId>, method: &str, params: Value);

    /// Forward the named events arriving for `session_id` to `sink`, in
    /// transport arrival order. Multiple subscriptions per session are
    /// allowed; each receives the subset it asked for.
    fn subscribe(&self, session_id: &SessionId, events: &[&str], sink: EventSink);

    /// Whether the browser connection is still up. Used to tell an
    /// abnormal closure during teardown from a genuine failure.
    fn connected(&self) -> bool;
}
