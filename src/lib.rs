//! # Strix
//!
//! Per-target session and frame-tree engine over the Chrome DevTools
//! Protocol, built for load-testing harnesses that measure page-lifecycle
//! timings.
//!
//! The browser owns the authoritative state; strix maintains a consistent
//! local mirror of the frame tree, updated from the asynchronous CDP event
//! stream, and exposes a high-level action API (navigate, click, query,
//! wait-for-X) on top of it. Page-load milestones are emitted as duration
//! samples through an injected sink.
//!
//! The WebSocket transport, the browser launcher and the metric backend
//! live in the harness; strix talks to them through the [`cdp::CdpTransport`]
//! and [`metrics::SampleSink`] traits.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strix::{BrowserContextOptions, NavigationOptions, Page};
//!
//! # async fn run(transport: Arc<dyn strix::cdp::CdpTransport>) -> strix::Result<()> {
//! let page = Page::attach(
//!     transport,
//!     "TARGET".into(),
//!     "SESSION".into(),
//!     BrowserContextOptions::default(),
//!     None,
//! )
//! .await?;
//!
//! page.goto("https://example.com", NavigationOptions::default()).await?;
//! page.click("a.cta", Default::default()).await?;
//! println!("{}", page.title().await?);
//! # Ok(())
//! # }
//! ```

pub mod cdp;
pub mod context;
pub mod element;
pub mod error;
pub mod frame;
pub mod frame_manager;
pub mod frame_session;
pub mod metrics;
pub mod network;
pub mod options;
pub mod page;
pub mod worker;

// Re-exports
pub use cdp::session::Session;
pub use cdp::types::{ExecutionContextId, FrameId, RequestId, SessionId, TargetId};
pub use context::{ExecutionContext, JsHandle, World};
pub use element::{DomElementState, ElementHandle};
pub use error::{Error, Result};
pub use frame::{
    ActionOptions, DocumentInfo, Frame, FrameLifecycleUpdate, LifecycleEvent, NavigationOptions,
    WaitForSelectorOptions, NETWORK_IDLE_TIMEOUT,
};
pub use frame_manager::FrameManager;
pub use frame_session::{FrameSession, UTILITY_WORLD_NAME};
pub use metrics::{BrowserMetric, NullSink, Sample, SampleSink};
pub use network::NetworkManager;
pub use options::{
    BrowserContextOptions, ColorScheme, Credentials, Geolocation, ReducedMotion, Screen,
    TimeoutSettings, Viewport,
};
pub use page::{Page, PageEvent};
pub use worker::Worker;
