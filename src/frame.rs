//! In-memory mirror of one HTML frame
//!
//! A frame owns its child set, lifecycle-event state, document info,
//! in-flight request set and execution contexts, and exposes the
//! user-facing action API. All mutation arrives through FrameManager
//! callbacks driven by the session event loop.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;

use crate::cdp::types::{FrameId, RequestId};
use crate::context::{ExecutionContext, JsHandle, World};
use crate::element::{DomElementState, ElementHandle};
use crate::error::{Error, Result};
use crate::frame_manager::FrameManager;
use crate::page::{Page, PageEvent};

/// Quiet period after the last in-flight request before a frame counts as
/// network-idle
pub const NETWORK_IDLE_TIMEOUT: Duration = Duration::from_millis(500);

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Milestones in a frame's loading progression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    DomContentLoad,
    Load,
    NetworkIdle,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 3] = [
        LifecycleEvent::DomContentLoad,
        LifecycleEvent::Load,
        LifecycleEvent::NetworkIdle,
    ];

    /// Map a `load|domcontentloaded|networkidle` load-state string
    pub fn from_load_state(state: &str) -> LifecycleEvent {
        match state {
            "domcontentloaded" => LifecycleEvent::DomContentLoad,
            "networkidle" => LifecycleEvent::NetworkIdle,
            _ => LifecycleEvent::Load,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::DomContentLoad => "domcontentloaded",
            LifecycleEvent::Load => "load",
            LifecycleEvent::NetworkIdle => "networkidle",
        }
    }
}

/// Lifecycle transitions emitted on a frame's event channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLifecycleUpdate {
    Added(LifecycleEvent),
    Removed(LifecycleEvent),
}

/// The committed (or in-flight) document of a frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentInfo {
    pub document_id: String,
    pub request: Option<RequestId>,
}

#[derive(Debug, Clone, Copy)]
enum StateQuery {
    Checked,
    Disabled,
    Editable,
    Enabled,
    Hidden,
    Visible,
}

impl StateQuery {
    /// The answer a state read gives when its element never shows up
    fn timeout_default(&self) -> bool {
        matches!(self, StateQuery::Hidden)
    }
}

/// Options shared by the selector-driven actions
#[derive(Debug, Clone, Default)]
pub struct ActionOptions {
    pub timeout: Option<Duration>,
    pub strict: bool,
    pub force: bool,
    pub no_wait_after: bool,
}

/// Options for `wait_for_selector`
#[derive(Debug, Clone, Default)]
pub struct WaitForSelectorOptions {
    pub timeout: Option<Duration>,
    pub state: DomElementState,
    pub strict: bool,
}

/// Options for `goto` / `wait_for_navigation`
#[derive(Debug, Clone)]
pub struct NavigationOptions {
    pub timeout: Option<Duration>,
    pub referrer: Option<String>,
    pub wait_until: LifecycleEvent,
}

impl Default for NavigationOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            referrer: None,
            wait_until: LifecycleEvent::Load,
        }
    }
}

#[derive(Debug, Default)]
struct FrameMeta {
    url: String,
    name: String,
    loader_id: String,
    detached: bool,
}

#[derive(Debug, Default)]
struct LifecycleState {
    /// Events fired on this frame alone
    events: HashSet<LifecycleEvent>,
    /// Events fired on this frame and its entire subtree
    subtree: HashSet<LifecycleEvent>,
}

#[derive(Debug, Default)]
struct DocumentState {
    current: DocumentInfo,
    pending: Option<DocumentInfo>,
}

#[derive(Default)]
struct WorldSlots {
    main: Option<Arc<ExecutionContext>>,
    utility: Option<Arc<ExecutionContext>>,
}

pub struct Frame {
    id: FrameId,
    page: Weak<Page>,
    manager: Weak<FrameManager>,
    cancel: CancellationToken,

    meta: RwLock<FrameMeta>,
    parent: RwLock<Weak<Frame>>,
    children: RwLock<HashMap<FrameId, Arc<Frame>>>,
    lifecycle: RwLock<LifecycleState>,
    inflight: RwLock<HashSet<RequestId>>,
    documents: RwLock<DocumentState>,

    contexts: RwLock<WorldSlots>,
    context_notify: Notify,
    document_handle: Mutex<Option<Arc<ElementHandle>>>,

    loading_started: RwLock<Option<Instant>>,
    idle_timer: Mutex<Option<CancellationToken>>,

    lifecycle_tx: broadcast::Sender<FrameLifecycleUpdate>,
}

impl Frame {
    pub(crate) fn new(
        page: Weak<Page>,
        manager: &Arc<FrameManager>,
        parent: Option<&Arc<Frame>>,
        id: FrameId,
        cancel: CancellationToken,
    ) -> Arc<Frame> {
        tracing::debug!(frame = %id, parent = parent.map(|p| p.id.as_str()).unwrap_or(""), "new frame");
        let (lifecycle_tx, _) = broadcast::channel(64);
        let frame = Arc::new(Frame {
            id,
            page,
            manager: Arc::downgrade(manager),
            cancel,
            meta: RwLock::new(FrameMeta::default()),
            parent: RwLock::new(parent.map(Arc::downgrade).unwrap_or_default()),
            children: RwLock::new(HashMap::new()),
            lifecycle: RwLock::new(LifecycleState::default()),
            inflight: RwLock::new(HashSet::new()),
            documents: RwLock::new(DocumentState::default()),
            contexts: RwLock::new(WorldSlots::default()),
            context_notify: Notify::new(),
            document_handle: Mutex::new(None),
            loading_started: RwLock::new(None),
            idle_timer: Mutex::new(None),
            lifecycle_tx,
        });
        if let Some(parent) = parent {
            parent.add_child_frame(&frame);
        }
        frame
    }

    // -- identity and tree --------------------------------------------------

    pub fn id(&self) -> &FrameId {
        &self.id
    }

    pub fn url(&self) -> String {
        self.meta.read().unwrap().url.clone()
    }

    pub fn name(&self) -> String {
        self.meta.read().unwrap().name.clone()
    }

    pub fn loader_id(&self) -> String {
        self.meta.read().unwrap().loader_id.clone()
    }

    pub fn is_detached(&self) -> bool {
        self.meta.read().unwrap().detached
    }

    pub fn parent_frame(&self) -> Option<Arc<Frame>> {
        self.parent.read().unwrap().upgrade()
    }

    pub fn child_frames(&self) -> Vec<Arc<Frame>> {
        self.children.read().unwrap().values().cloned().collect()
    }

    pub(crate) fn add_child_frame(&self, child: &Arc<Frame>) {
        tracing::debug!(frame = %self.id, child = %child.id, "add child frame");
        self.children
            .write()
            .unwrap()
            .insert(child.id.clone(), child.clone());
    }

    pub(crate) fn remove_child_frame(&self, child_id: &FrameId) {
        tracing::debug!(frame = %self.id, child = %child_id, "remove child frame");
        self.children.write().unwrap().remove(child_id);
    }

    fn page(&self) -> Option<Arc<Page>> {
        self.page.upgrade()
    }

    fn manager(&self) -> Option<Arc<FrameManager>> {
        self.manager.upgrade()
    }

    fn default_timeout(&self) -> Duration {
        self.manager()
            .map(|m| m.timeout_settings().timeout())
            .unwrap_or(Duration::from_secs(30))
    }

    // -- in-flight requests -------------------------------------------------

    pub(crate) fn add_request(&self, id: RequestId) {
        tracing::trace!(frame = %self.id, request = %id, "add in-flight request");
        self.inflight.write().unwrap().insert(id);
    }

    pub(crate) fn delete_request(&self, id: &RequestId) {
        tracing::trace!(frame = %self.id, request = %id, "delete in-flight request");
        self.inflight.write().unwrap().remove(id);
    }

    pub(crate) fn inflight_len(&self) -> usize {
        self.inflight.read().unwrap().len()
    }

    pub(crate) fn has_inflight_request(&self, id: &RequestId) -> bool {
        self.inflight.read().unwrap().contains(id)
    }

    #[cfg(test)]
    pub(crate) fn inflight_requests(&self) -> HashSet<RequestId> {
        self.inflight.read().unwrap().clone()
    }

    // -- documents ----------------------------------------------------------

    pub fn current_document(&self) -> DocumentInfo {
        self.documents.read().unwrap().current.clone()
    }

    pub(crate) fn pending_document(&self) -> Option<DocumentInfo> {
        self.documents.read().unwrap().pending.clone()
    }

    pub(crate) fn set_pending_document(&self, doc: Option<DocumentInfo>) {
        self.documents.write().unwrap().pending = doc;
    }

    pub(crate) fn commit_document(&self, doc: DocumentInfo) {
        let mut documents = self.documents.write().unwrap();
        documents.current = doc;
        documents.pending = None;
    }

    // -- lifecycle ----------------------------------------------------------

    pub fn has_lifecycle_event_fired(&self, event: LifecycleEvent) -> bool {
        self.lifecycle.read().unwrap().events.contains(&event)
    }

    pub fn has_subtree_lifecycle_event_fired(&self, event: LifecycleEvent) -> bool {
        self.lifecycle.read().unwrap().subtree.contains(&event)
    }

    pub(crate) fn on_lifecycle_event(&self, event: LifecycleEvent) {
        tracing::debug!(frame = %self.id, event = event.as_str(), "lifecycle event");
        self.lifecycle.write().unwrap().events.insert(event);
    }

    pub(crate) fn on_loading_started(&self) {
        *self.loading_started.write().unwrap() = Some(Instant::now());
    }

    pub fn loading_started_time(&self) -> Option<Instant> {
        *self.loading_started.read().unwrap()
    }

    /// A frame that stopped loading has passed every milestone
    pub(crate) fn on_loading_stopped(&self) {
        tracing::debug!(frame = %self.id, "loading stopped");
        let mut lifecycle = self.lifecycle.write().unwrap();
        lifecycle.events.insert(LifecycleEvent::DomContentLoad);
        lifecycle.events.insert(LifecycleEvent::Load);
        lifecycle.events.insert(LifecycleEvent::NetworkIdle);
    }

    /// Recompute the subtree lifecycle set: an event counts as fired only
    /// if it fired here and in every child's subtree. Emits add/remove
    /// transitions after all locks are released.
    pub(crate) fn recalculate_lifecycle(self: &Arc<Self>) {
        let mut events: HashSet<LifecycleEvent> = {
            self.lifecycle.read().unwrap().events.clone()
        };

        // children are cloned out of the guard; the self-skip keeps a
        // corrupted tree from recursing into this frame again
        let children = self.child_frames();
        for child in &children {
            if Arc::ptr_eq(child, self) {
                continue;
            }
            child.recalculate_lifecycle();
            events.retain(|e| child.has_subtree_lifecycle_event_fired(*e));
        }

        let (added, removed) = {
            let mut lifecycle = self.lifecycle.write().unwrap();
            let added: Vec<LifecycleEvent> = events
                .iter()
                .filter(|e| !lifecycle.subtree.contains(e))
                .copied()
                .collect();
            let removed: Vec<LifecycleEvent> = lifecycle
                .subtree
                .iter()
                .filter(|e| !events.contains(e))
                .copied()
                .collect();
            lifecycle.subtree = events;
            (added, removed)
        };

        // emits happen outside the lock so listeners may re-enter frame APIs
        let is_main = self
            .manager()
            .and_then(|m| m.main_frame())
            .map(|main| Arc::ptr_eq(&main, self))
            .unwrap_or(false);
        for event in added {
            let _ = self.lifecycle_tx.send(FrameLifecycleUpdate::Added(event));
            if is_main {
                if let Some(page) = self.page() {
                    match event {
                        LifecycleEvent::Load => page.emit(PageEvent::Load),
                        LifecycleEvent::DomContentLoad => page.emit(PageEvent::DomContentLoaded),
                        LifecycleEvent::NetworkIdle => {}
                    }
                }
            }
        }
        for event in removed {
            let _ = self.lifecycle_tx.send(FrameLifecycleUpdate::Removed(event));
        }
    }

    /// On navigation commit: drop all lifecycle bits, re-aggregate, keep
    /// only the in-flight request belonging to the new document, and re-arm
    /// the network-idle timer.
    pub(crate) fn clear_lifecycle(self: &Arc<Self>) {
        tracing::debug!(frame = %self.id, url = %self.url(), "clear lifecycle");

        self.lifecycle.write().unwrap().events.clear();

        if let Some(main) = self.manager().and_then(|m| m.main_frame()) {
            main.recalculate_lifecycle();
        }

        {
            let document_request = self.documents.read().unwrap().current.request.clone();
            let mut inflight = self.inflight.write().unwrap();
            match document_request {
                Some(request) => inflight.retain(|id| *id == request),
                None => inflight.clear(),
            }
        }

        self.stop_network_idle_timer();
        if self.inflight_len() == 0 {
            self.start_network_idle_timer();
        }
    }

    /// Subscribe to add/remove lifecycle transitions of this frame
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<FrameLifecycleUpdate> {
        self.lifecycle_tx.subscribe()
    }

    // -- network-idle timer -------------------------------------------------

    pub(crate) fn stop_network_idle_timer(&self) {
        if let Some(timer) = self.idle_timer.lock().unwrap().take() {
            timer.cancel();
        }
    }

    /// Arm the quiet-period timer. At most one worker per frame is alive;
    /// detached or already-idle frames never start one.
    pub(crate) fn start_network_idle_timer(&self) {
        if self.has_lifecycle_event_fired(LifecycleEvent::NetworkIdle) || self.is_detached() {
            return;
        }

        let reset = CancellationToken::new();
        {
            let mut slot = self.idle_timer.lock().unwrap();
            if let Some(previous) = slot.replace(reset.clone()) {
                previous.cancel();
            }
        }

        let frame_cancel = self.cancel.clone();
        let manager = self.manager.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = frame_cancel.cancelled() => {}
                _ = reset.cancelled() => {}
                _ = tokio::time::sleep(NETWORK_IDLE_TIMEOUT) => {
                    if let Some(manager) = manager.upgrade() {
                        manager.frame_lifecycle_event(&id, LifecycleEvent::NetworkIdle);
                    }
                }
            }
        });
    }

    // -- navigation bookkeeping ---------------------------------------------

    pub(crate) fn navigated(&self, name: &str, url: &str, loader_id: &str) {
        tracing::debug!(frame = %self.id, url, loader = loader_id, "navigated");
        {
            let mut meta = self.meta.write().unwrap();
            meta.name = name.to_string();
            meta.url = url.to_string();
            meta.loader_id = loader_id.to_string();
        }
        if let Some(page) = self.page() {
            page.emit(PageEvent::FrameNavigated(self.id.clone()));
        }
    }

    pub(crate) fn navigated_within_document(&self, url: &str) {
        self.meta.write().unwrap().url = url.to_string();
        if let Some(page) = self.page() {
            page.emit(PageEvent::FrameNavigated(self.id.clone()));
        }
    }

    /// Tear the frame out of the tree. The back reference is nulled before
    /// the parent's child set is touched so the tree invariant stays
    /// observable throughout.
    pub(crate) fn detach(self: &Arc<Self>) {
        tracing::debug!(frame = %self.id, url = %self.url(), "detach");

        self.stop_network_idle_timer();
        self.meta.write().unwrap().detached = true;

        let parent = self.parent_frame();
        *self.parent.write().unwrap() = Weak::new();
        if let Some(parent) = parent {
            parent.remove_child_frame(&self.id);
        }

        {
            let mut contexts = self.contexts.write().unwrap();
            contexts.main = None;
            contexts.utility = None;
        }

        if let Some(handle) = self.document_handle.lock().unwrap().take() {
            tokio::spawn(async move { handle.dispose().await });
        }

        self.cancel.cancel();
    }

    // -- execution contexts -------------------------------------------------

    pub fn has_context(&self, world: World) -> bool {
        let slots = self.contexts.read().unwrap();
        match world {
            World::Main => slots.main.is_some(),
            World::Utility => slots.utility.is_some(),
        }
    }

    /// Assign a context to a world slot. First writer wins: duplicate
    /// isolated worlds created by racing sessions coalesce to whichever
    /// arrived first.
    pub(crate) fn set_context(&self, world: World, context: Arc<ExecutionContext>) {
        tracing::debug!(frame = %self.id, world = world.as_str(), context = %context.id(), "set context");
        {
            let mut slots = self.contexts.write().unwrap();
            let slot = match world {
                World::Main => &mut slots.main,
                World::Utility => &mut slots.utility,
            };
            if slot.is_none() {
                *slot = Some(context);
            }
        }
        self.context_notify.notify_waiters();
    }

    /// Clear whichever world slot holds the context with this id, so a
    /// stale slot is never cleared twice
    pub(crate) fn null_context(&self, id: crate::cdp::types::ExecutionContextId) {
        let mut slots = self.contexts.write().unwrap();
        if slots.main.as_ref().map(|c| c.id()) == Some(id) {
            slots.main = None;
            *self.document_handle.lock().unwrap() = None;
        } else if slots.utility.as_ref().map(|c| c.id()) == Some(id) {
            slots.utility = None;
        }
    }

    fn world_context(&self, world: World) -> Option<Arc<ExecutionContext>> {
        let slots = self.contexts.read().unwrap();
        match world {
            World::Main => slots.main.clone(),
            World::Utility => slots.utility.clone(),
        }
    }

    /// Suspend until the requested world is populated or the frame's scope
    /// is cancelled
    pub async fn wait_for_execution_context(&self, world: World) -> Result<Arc<ExecutionContext>> {
        loop {
            let notified = self.context_notify.notified();
            if let Some(context) = self.world_context(world) {
                return Ok(context);
            }
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                _ = notified => {}
            }
        }
    }

    // -- document and evaluation --------------------------------------------

    /// The frame's `document` element handle, cached until the main world
    /// is replaced
    pub async fn document(&self) -> Result<Arc<ElementHandle>> {
        if let Some(handle) = self.document_handle.lock().unwrap().clone() {
            return Ok(handle);
        }
        let context = self.wait_for_execution_context(World::Main).await?;
        let handle = context.evaluate_handle("document").await?;
        let element = Arc::new(ElementHandle::from_handle(handle)?);
        let mut cached = self.document_handle.lock().unwrap();
        if let Some(existing) = cached.clone() {
            return Ok(existing);
        }
        *cached = Some(element.clone());
        Ok(element)
    }

    /// Evaluate an expression in the main world and return its value
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let context = self.wait_for_execution_context(World::Main).await?;
        context.evaluate(expression).await
    }

    /// Evaluate an expression in the main world and return a handle
    pub async fn evaluate_handle(&self, expression: &str) -> Result<JsHandle> {
        let context = self.wait_for_execution_context(World::Main).await?;
        context.evaluate_handle(expression).await
    }

    pub async fn title(&self) -> Result<String> {
        let value = self.evaluate("document.title").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Serialized HTML content of the frame
    pub async fn content(&self) -> Result<String> {
        let value = self
            .evaluate(
                r#"(() => {
                    let content = '';
                    if (document.doctype) {
                        content = new XMLSerializer().serializeToString(document.doctype);
                    }
                    if (document.documentElement) {
                        content += document.documentElement.outerHTML;
                    }
                    return content;
                })()"#,
            )
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Replace the document content. Runs in the utility world so the
    /// page's own globals never see the writer.
    pub async fn set_content(&self, html: &str, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "set_content", async {
            let context = self.wait_for_execution_context(World::Utility).await?;
            context
                .call_function(
                    r#"(html) => {
                        window.stop();
                        document.open();
                        document.write(html);
                        document.close();
                    }"#,
                    vec![crate::cdp::types::CallArgument {
                        value: Some(json!(html)),
                        object_id: None,
                    }],
                )
                .await?;
            Ok(())
        })
        .await
    }

    // -- selectors ----------------------------------------------------------

    /// First element matching `selector`, or `None`
    pub async fn query(&self, selector: &str) -> Result<Option<ElementHandle>> {
        let document = self.document().await?;
        document.query(selector, false).await
    }

    /// All elements matching `selector`
    pub async fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        let document = self.document().await?;
        document.query_all(selector).await
    }

    /// Wait for `selector` to reach the requested DOM state
    pub async fn wait_for_selector(
        &self,
        selector: &str,
        opts: WaitForSelectorOptions,
    ) -> Result<ElementHandle> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "wait_for_selector", async {
            self.poll_selector(selector, opts.state, opts.strict).await
        })
        .await
        .map_err(|err| match err {
            Error::Timeout(_) => Error::Timeout(format!(
                "waiting for selector {selector:?} to become {:?} timed out after {timeout:?}",
                opts.state
            )),
            other => other,
        })
    }

    async fn poll_selector(
        &self,
        selector: &str,
        state: DomElementState,
        strict: bool,
    ) -> Result<ElementHandle> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let document = self.document().await?;
            if let Some(element) = document.selector_satisfies(selector, state, strict).await? {
                return Ok(element);
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    /// Resolve the element an action operates on: wait for the selector in
    /// the attached state, honoring strictness
    async fn action_element(&self, selector: &str, opts: &ActionOptions) -> Result<ElementHandle> {
        self.poll_selector(selector, DomElementState::Attached, opts.strict)
            .await
    }

    // -- actions ------------------------------------------------------------
    //
    // Every action runs the same three stages: resolve options with the
    // page's default timeout, resolve the selector to a handle, delegate
    // the operation to the element engine under the caller's deadline.

    pub async fn click(&self, selector: &str, opts: ActionOptions) -> Result<()> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "click", async {
            self.action_element(selector, &opts).await?.click().await
        })
        .await
    }

    pub async fn dblclick(&self, selector: &str, opts: ActionOptions) -> Result<()> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "dblclick", async {
            self.action_element(selector, &opts).await?.dblclick().await
        })
        .await
    }

    pub async fn check(&self, selector: &str, opts: ActionOptions) -> Result<()> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "check", async {
            self.action_element(selector, &opts).await?.set_checked(true).await
        })
        .await
    }

    pub async fn uncheck(&self, selector: &str, opts: ActionOptions) -> Result<()> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "uncheck", async {
            self.action_element(selector, &opts).await?.set_checked(false).await
        })
        .await
    }

    pub async fn hover(&self, selector: &str, opts: ActionOptions) -> Result<()> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "hover", async {
            self.action_element(selector, &opts).await?.hover().await
        })
        .await
    }

    pub async fn tap(&self, selector: &str, opts: ActionOptions) -> Result<()> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "tap", async {
            self.action_element(selector, &opts).await?.tap().await
        })
        .await
    }

    pub async fn fill(&self, selector: &str, value: &str, opts: ActionOptions) -> Result<()> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "fill", async {
            self.action_element(selector, &opts).await?.fill(value).await
        })
        .await
    }

    pub async fn focus(&self, selector: &str, opts: ActionOptions) -> Result<()> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "focus", async {
            self.action_element(selector, &opts).await?.focus().await
        })
        .await
    }

    pub async fn press(&self, selector: &str, key: &str, opts: ActionOptions) -> Result<()> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "press", async {
            self.action_element(selector, &opts).await?.press(key).await
        })
        .await
    }

    pub async fn type_text(&self, selector: &str, text: &str, opts: ActionOptions) -> Result<()> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "type", async {
            self.action_element(selector, &opts).await?.type_text(text).await
        })
        .await
    }

    pub async fn select_option(
        &self,
        selector: &str,
        values: &[String],
        opts: ActionOptions,
    ) -> Result<Vec<String>> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "select_option", async {
            self.action_element(selector, &opts).await?.select_option(values).await
        })
        .await
    }

    pub async fn dispatch_event(
        &self,
        selector: &str,
        event_type: &str,
        detail: Option<Value>,
        opts: ActionOptions,
    ) -> Result<()> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "dispatch_event", async {
            self.action_element(selector, &opts)
                .await?
                .dispatch_event(event_type, detail)
                .await
        })
        .await
    }

    pub async fn get_attribute(
        &self,
        selector: &str,
        name: &str,
        opts: ActionOptions,
    ) -> Result<Option<String>> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "get_attribute", async {
            self.action_element(selector, &opts).await?.get_attribute(name).await
        })
        .await
    }

    pub async fn inner_html(&self, selector: &str, opts: ActionOptions) -> Result<String> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "inner_html", async {
            self.action_element(selector, &opts).await?.inner_html().await
        })
        .await
    }

    pub async fn inner_text(&self, selector: &str, opts: ActionOptions) -> Result<String> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "inner_text", async {
            self.action_element(selector, &opts).await?.inner_text().await
        })
        .await
    }

    pub async fn text_content(
        &self,
        selector: &str,
        opts: ActionOptions,
    ) -> Result<Option<String>> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "text_content", async {
            self.action_element(selector, &opts).await?.text_content().await
        })
        .await
    }

    pub async fn input_value(&self, selector: &str, opts: ActionOptions) -> Result<String> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "input_value", async {
            self.action_element(selector, &opts).await?.input_value().await
        })
        .await
    }

    // State-reading actions consume the timeout silently and answer with
    // the default negative value instead.

    pub async fn is_checked(&self, selector: &str, opts: ActionOptions) -> Result<bool> {
        self.state_check(selector, opts, StateQuery::Checked).await
    }

    pub async fn is_disabled(&self, selector: &str, opts: ActionOptions) -> Result<bool> {
        self.state_check(selector, opts, StateQuery::Disabled).await
    }

    pub async fn is_editable(&self, selector: &str, opts: ActionOptions) -> Result<bool> {
        self.state_check(selector, opts, StateQuery::Editable).await
    }

    pub async fn is_enabled(&self, selector: &str, opts: ActionOptions) -> Result<bool> {
        self.state_check(selector, opts, StateQuery::Enabled).await
    }

    pub async fn is_hidden(&self, selector: &str, opts: ActionOptions) -> Result<bool> {
        self.state_check(selector, opts, StateQuery::Hidden).await
    }

    pub async fn is_visible(&self, selector: &str, opts: ActionOptions) -> Result<bool> {
        self.state_check(selector, opts, StateQuery::Visible).await
    }

    async fn state_check(
        &self,
        selector: &str,
        opts: ActionOptions,
        query: StateQuery,
    ) -> Result<bool> {
        let timeout = opts.timeout.unwrap_or_else(|| self.default_timeout());
        let result = run_with_timeout(timeout, "state check", async {
            let element = self.action_element(selector, &opts).await?;
            match query {
                StateQuery::Checked => element.is_checked().await,
                StateQuery::Disabled => element.is_disabled().await,
                StateQuery::Editable => element.is_editable().await,
                StateQuery::Enabled => element.is_enabled().await,
                StateQuery::Hidden => element.is_hidden().await,
                StateQuery::Visible => element.is_visible().await,
            }
        })
        .await;
        match result {
            Ok(value) => Ok(value),
            // a missing element reads as the default negative answer
            Err(err) if err.is_timeout() => Ok(query.timeout_default()),
            Err(err) => Err(err),
        }
    }

    // -- waiting ------------------------------------------------------------

    /// Wait until the mapped lifecycle event has fired for this frame.
    /// Returns immediately, without subscribing, when it already has.
    pub async fn wait_for_load_state(
        &self,
        state: LifecycleEvent,
        timeout: Option<Duration>,
    ) -> Result<()> {
        tracing::debug!(frame = %self.id, state = state.as_str(), "wait for load state");
        if self.has_lifecycle_event_fired(state) {
            return Ok(());
        }

        let timeout = timeout.unwrap_or_else(|| self.default_timeout());
        let mut rx = self.lifecycle_tx.subscribe();
        // the event may have fired between the check and the subscription
        if self.has_lifecycle_event_fired(state) {
            return Ok(());
        }

        run_with_timeout(timeout, "wait_for_load_state", async {
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                    update = rx.recv() => match update {
                        Ok(FrameLifecycleUpdate::Added(event)) if event == state => return Ok(()),
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            if self.has_lifecycle_event_fired(state) {
                                return Ok(());
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => return Err(Error::Cancelled),
                    }
                }
            }
        })
        .await
    }

    /// Repeatedly evaluate `expression` in the requested world until it is
    /// truthy; returns the final value
    pub async fn wait_for_function(
        &self,
        expression: &str,
        world: World,
        interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let timeout = timeout.unwrap_or_else(|| self.default_timeout());
        run_with_timeout(timeout, "wait_for_function", async {
            let context = self.wait_for_execution_context(world).await?;
            loop {
                if self.cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let value = context.evaluate(expression).await?;
                if is_truthy(&value) {
                    return Ok(value);
                }
                tokio::time::sleep(interval).await;
            }
        })
        .await
    }

    /// Navigate this frame and wait for the configured load state
    pub async fn goto(&self, url: &str, opts: NavigationOptions) -> Result<String> {
        let manager = self.manager().ok_or(Error::Cancelled)?;
        manager.navigate_frame(self, url, opts).await
    }

    /// Wait for the next committed navigation of this frame
    pub async fn wait_for_navigation(&self, opts: NavigationOptions) -> Result<()> {
        let manager = self.manager().ok_or(Error::Cancelled)?;
        manager.wait_for_frame_navigation(self, opts).await
    }

    /// Sleep, ending early on cancellation
    pub async fn wait_for_timeout(&self, duration: Duration) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }

    /// The `<iframe>` element owning this frame, resolved in the parent's
    /// main world
    pub async fn frame_element(&self) -> Result<ElementHandle> {
        let page = self.page().ok_or(Error::Cancelled)?;
        page.frame_element(self).await
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("url", &self.url())
            .field("detached", &self.is_detached())
            .finish()
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub(crate) async fn run_with_timeout<T>(
    timeout: Duration,
    action: &str,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!("{action} timed out after {timeout:?}"))),
    }
}
