//! Page: the root aggregate owning the main frame session
//!
//! A page wires the target's main FrameSession, the frame registry, the
//! worker map and the in-process event bus together, and forwards the
//! main-frame action API for convenience.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::cdp::session::Session;
use crate::cdp::types::{
    FrameId, GetFrameOwner, GetFrameOwnerResult, ResolveNode, ResolveNodeResult, SessionId,
    TargetId,
};
use crate::cdp::CdpTransport;
use crate::context::World;
use crate::element::ElementHandle;
use crate::error::{Error, Result};
use crate::frame::{ActionOptions, Frame, LifecycleEvent, NavigationOptions, WaitForSelectorOptions};
use crate::frame_manager::FrameManager;
use crate::frame_session::FrameSession;
use crate::metrics::{NullSink, SampleSink};
use crate::options::{BrowserContextOptions, TimeoutSettings};
use crate::worker::Worker;

/// Events published on the page's in-process bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    Load,
    DomContentLoaded,
    FrameNavigated(FrameId),
    Error(String),
    Crashed,
}

pub struct Page {
    target_id: TargetId,
    options: BrowserContextOptions,
    timeout_settings: TimeoutSettings,
    sink: Arc<dyn SampleSink>,

    frame_manager: Arc<FrameManager>,
    main_session: RwLock<Option<Arc<FrameSession>>>,
    workers: Mutex<HashMap<SessionId, Worker>>,

    extra_http_headers: Mutex<HashMap<String, String>>,
    has_routes: AtomicBool,
    crashed: AtomicBool,
    fatal_error: Mutex<Option<String>>,

    events: broadcast::Sender<PageEvent>,
    cancel: CancellationToken,
}

impl Page {
    /// Attach to a page target over an already-established CDP session id
    pub async fn attach(
        transport: Arc<dyn CdpTransport>,
        target_id: TargetId,
        session_id: SessionId,
        options: BrowserContextOptions,
        sink: Option<Arc<dyn SampleSink>>,
    ) -> Result<Arc<Page>> {
        let timeout_settings = TimeoutSettings::default();
        let (events, _) = broadcast::channel(256);
        let page = Arc::new_cyclic(|weak| Page {
            target_id: target_id.clone(),
            options,
            timeout_settings,
            sink: sink.unwrap_or_else(|| Arc::new(NullSink)),
            frame_manager: FrameManager::new(weak.clone(), timeout_settings),
            main_session: RwLock::new(None),
            workers: Mutex::new(HashMap::new()),
            extra_http_headers: Mutex::new(HashMap::new()),
            has_routes: AtomicBool::new(false),
            crashed: AtomicBool::new(false),
            fatal_error: Mutex::new(None),
            events,
            cancel: CancellationToken::new(),
        });

        let session = Arc::new(Session::new(transport, session_id, target_id.clone()));
        let main_session = FrameSession::attach(&page, session, None, target_id).await?;
        *page.main_session.write().unwrap() = Some(main_session);
        Ok(page)
    }

    // -- accessors ----------------------------------------------------------

    pub fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    pub fn options(&self) -> &BrowserContextOptions {
        &self.options
    }

    pub fn timeout_settings(&self) -> &TimeoutSettings {
        &self.timeout_settings
    }

    pub fn frame_manager(&self) -> &Arc<FrameManager> {
        &self.frame_manager
    }

    pub fn sample_sink(&self) -> &Arc<dyn SampleSink> {
        &self.sink
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn main_frame_session(&self) -> Option<Arc<FrameSession>> {
        self.main_session.read().unwrap().clone()
    }

    /// The main frame, once the tree is seeded
    pub fn main_frame(&self) -> Result<Arc<Frame>> {
        self.frame_manager
            .main_frame()
            .ok_or_else(|| Error::FrameNotFound("main frame is not attached yet".into()))
    }

    /// Every live frame of the page
    pub fn frames(&self) -> Vec<Arc<Frame>> {
        self.frame_manager.frames()
    }

    /// The session driving `frame_id`: the child session attached for it,
    /// or the main session when the frame lives in-process
    pub fn session_for_frame(&self, frame_id: &FrameId) -> Result<Arc<Session>> {
        let main = self
            .main_frame_session()
            .ok_or_else(|| Error::FrameNotFound("page has no main session".into()))?;
        match main.find_session(frame_id) {
            Some(fs) => Ok(fs.session().clone()),
            None => Ok(main.session().clone()),
        }
    }

    // -- event bus ----------------------------------------------------------

    pub fn subscribe_events(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: PageEvent) {
        let _ = self.events.send(event);
    }

    // -- lifecycle ----------------------------------------------------------

    /// The renderer died underneath us
    pub(crate) fn did_crash(&self) {
        self.crashed.store(true, Ordering::Relaxed);
        self.emit(PageEvent::Crashed);
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::Relaxed)
    }

    /// Unrecoverable failure inside the event loop: record it, surface it,
    /// and tear the page's scope down
    pub(crate) fn fatal(&self, message: String) {
        tracing::error!(target_id = %self.target_id, "{message}");
        let mut slot = self.fatal_error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(message.clone());
        }
        drop(slot);
        self.emit(PageEvent::Error(message));
        self.cancel.cancel();
    }

    pub fn fatal_error(&self) -> Option<String> {
        self.fatal_error.lock().unwrap().clone()
    }

    /// Stop the event loops and every outstanding wait
    pub fn close(&self) {
        self.cancel.cancel();
    }

    // -- workers ------------------------------------------------------------

    pub(crate) fn add_worker(&self, session_id: SessionId, worker: Worker) {
        self.workers.lock().unwrap().insert(session_id, worker);
    }

    pub(crate) fn close_worker(&self, session_id: &SessionId) {
        if self.workers.lock().unwrap().remove(session_id).is_some() {
            tracing::debug!(session = %session_id, "worker detached");
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    // -- headers and routes -------------------------------------------------

    pub fn extra_http_headers(&self) -> HashMap<String, String> {
        self.extra_http_headers.lock().unwrap().clone()
    }

    /// Set page-specific headers; they merge over the context's and win
    pub async fn set_extra_http_headers(&self, headers: HashMap<String, String>) -> Result<()> {
        *self.extra_http_headers.lock().unwrap() = headers;
        let main = self
            .main_frame_session()
            .ok_or_else(|| Error::FrameNotFound("page has no main session".into()))?;
        main.update_extra_http_headers(false).await
    }

    pub fn has_routes(&self) -> bool {
        self.has_routes.load(Ordering::Relaxed)
    }

    /// Flip request interception on or off for the whole session tree
    pub async fn set_routes_enabled(&self, enabled: bool) -> Result<()> {
        self.has_routes.store(enabled, Ordering::Relaxed);
        let main = self
            .main_frame_session()
            .ok_or_else(|| Error::FrameNotFound("page has no main session".into()))?;
        main.update_request_interception().await
    }

    // -- frame owner lookup -------------------------------------------------

    /// Resolve the `<iframe>` element owning `frame`, as a handle in the
    /// parent frame's main world
    pub async fn frame_element(&self, frame: &Frame) -> Result<ElementHandle> {
        let parent = frame
            .parent_frame()
            .ok_or_else(|| Error::FrameNotFound("main frame has no owning element".into()))?;
        let session = self.session_for_frame(parent.id())?;

        let owner: GetFrameOwnerResult = session
            .execute(
                "DOM.getFrameOwner",
                &GetFrameOwner {
                    frame_id: frame.id().clone(),
                },
            )
            .await?;
        let context = parent.wait_for_execution_context(World::Main).await?;
        let resolved: ResolveNodeResult = session
            .execute(
                "DOM.resolveNode",
                &ResolveNode {
                    backend_node_id: Some(owner.backend_node_id),
                    execution_context_id: Some(context.id()),
                },
            )
            .await?;
        let object_id = resolved
            .object
            .object_id
            .ok_or_else(|| Error::ElementNotFound("frame owner did not resolve to a node".into()))?;
        Ok(ElementHandle::new(context, object_id))
    }

    // -- main-frame delegation ----------------------------------------------

    pub async fn goto(&self, url: &str, opts: NavigationOptions) -> Result<String> {
        self.main_frame()?.goto(url, opts).await
    }

    pub async fn click(&self, selector: &str, opts: ActionOptions) -> Result<()> {
        self.main_frame()?.click(selector, opts).await
    }

    pub async fn fill(&self, selector: &str, value: &str, opts: ActionOptions) -> Result<()> {
        self.main_frame()?.fill(selector, value, opts).await
    }

    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.main_frame()?.evaluate(expression).await
    }

    pub async fn title(&self) -> Result<String> {
        self.main_frame()?.title().await
    }

    pub async fn content(&self) -> Result<String> {
        self.main_frame()?.content().await
    }

    pub async fn set_content(&self, html: &str) -> Result<()> {
        self.main_frame()?.set_content(html, None).await
    }

    pub async fn wait_for_selector(
        &self,
        selector: &str,
        opts: WaitForSelectorOptions,
    ) -> Result<ElementHandle> {
        self.main_frame()?.wait_for_selector(selector, opts).await
    }

    pub async fn wait_for_load_state(
        &self,
        state: LifecycleEvent,
        timeout: Option<std::time::Duration>,
    ) -> Result<()> {
        self.main_frame()?.wait_for_load_state(state, timeout).await
    }

    pub async fn wait_for_timeout(&self, duration: std::time::Duration) {
        if let Ok(frame) = self.main_frame() {
            frame.wait_for_timeout(duration).await;
        }
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("target_id", &self.target_id)
            .field("crashed", &self.is_crashed())
            .finish()
    }
}
