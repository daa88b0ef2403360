//! Per-target session engine
//!
//! One FrameSession exists per attached target. It seeds the frame tree,
//! subscribes to the renderer event stream, pumps every event into the
//! matching FrameManager mutation, applies per-session emulation, and
//! routes newly attached targets to child sessions or workers.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cdp::events::{
    AttachedToTargetEvent, CdpEvent, ConsoleApiCalledEvent, EntryAddedEvent,
    ExecutionContextCreatedEvent, LifecycleEventPayload, BASE_EVENTS, RENDERER_EVENTS,
};
use crate::cdp::session::Session;
use crate::cdp::types::{
    AddScriptToEvaluateOnNewDocument, CreateIsolatedWorld, DetachFromTarget, DomEnable,
    ExecutionContextId, FrameId, FrameInfo, FrameTree, GetFrameTree, GetFrameTreeResult,
    GetWindowForTarget, GetWindowForTargetResult, LogEnable, MediaFeature, PageEnable,
    RunIfWaitingForDebugger, RuntimeEnable, ScreenOrientation, SetAutoAttach, SetBypassCsp,
    SetDeviceMetricsOverride, SetEmulatedMedia, SetFocusEmulationEnabled, SetGeolocationOverride,
    SetIgnoreCertificateErrors, SetLifecycleEventsEnabled, SetLocaleOverride,
    SetScriptExecutionDisabled, SetTimezoneOverride, SetTouchEmulationEnabled,
    SetUserAgentOverride, SetWindowBounds, TargetId, WindowBounds,
};
use crate::context::{parse_remote_object, ExecutionContext, World};
use crate::error::{Error, Result};
use crate::frame::LifecycleEvent;
use crate::frame_manager::FrameManager;
use crate::metrics::{BrowserMetric, Sample};
use crate::network::NetworkManager;
use crate::page::{Page, PageEvent};
use crate::worker::Worker;

/// Name of the isolated world the engine evaluates in
pub const UTILITY_WORLD_NAME: &str = "__strix_utility_world__";

const EVALUATION_SCRIPT_URL: &str = "__strix_evaluation_script__";

pub struct FrameSession {
    page: Weak<Page>,
    session: Arc<Session>,
    manager: Arc<FrameManager>,
    network: Arc<NetworkManager>,
    parent: Option<Weak<FrameSession>>,
    target_id: TargetId,
    window_id: i64,

    /// Monotonic timestamp of the last `init|commit` lifecycle event,
    /// the zero point for timing samples
    init_time: Mutex<f64>,

    contexts: Mutex<HashMap<ExecutionContextId, Arc<ExecutionContext>>>,
    isolated_worlds: Mutex<HashSet<String>>,
    child_sessions: Mutex<HashMap<FrameId, Arc<FrameSession>>>,

    cancel: CancellationToken,
}

impl FrameSession {
    /// Attach to a target: wire up networking, subscribe, seed the frame
    /// tree, create the utility world and apply emulation.
    ///
    /// Returns an explicitly boxed future (rather than `async fn`) because
    /// this call is recursive (via `on_attached_to_target`): naming a
    /// concrete `dyn Future` return type here sidesteps rustc's inability
    /// to resolve the auto-trait (`Send`) of a self-referential opaque
    /// `impl Future` type.
    pub(crate) fn attach<'a>(
        page: &'a Arc<Page>,
        session: Arc<Session>,
        parent: Option<&'a Arc<FrameSession>>,
        target_id: TargetId,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<FrameSession>>> + Send + 'a>> {
        Box::pin(Self::attach_inner(page, session, parent, target_id))
    }

    async fn attach_inner(
        page: &Arc<Page>,
        session: Arc<Session>,
        parent: Option<&Arc<FrameSession>>,
        target_id: TargetId,
    ) -> Result<Arc<FrameSession>> {
        tracing::debug!(session = %session.id(), target = %target_id, "new frame session");

        let cancel = page.cancel_token().child_token();
        let manager = page.frame_manager().clone();

        let network = NetworkManager::new(
            session.clone(),
            Arc::downgrade(&manager),
            parent.map(|p| &p.network),
            cancel.child_token(),
        )
        .await?;

        let window: GetWindowForTargetResult = session
            .execute(
                "Browser.getWindowForTarget",
                &GetWindowForTarget {
                    target_id: target_id.clone(),
                },
            )
            .await
            .map_err(|err| Error::transport("Browser.getWindowForTarget", err.to_string()))?;

        let fs = Arc::new(FrameSession {
            page: Arc::downgrade(page),
            session: session.clone(),
            manager,
            network,
            parent: parent.map(Arc::downgrade),
            target_id,
            window_id: window.window_id,
            init_time: Mutex::new(0.0),
            contexts: Mutex::new(HashMap::new()),
            isolated_worlds: Mutex::new(HashSet::new()),
            child_sessions: Mutex::new(HashMap::new()),
            cancel,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        session.subscribe(BASE_EVENTS, tx.clone());
        if !fs.is_main_frame() {
            session.subscribe(RENDERER_EVENTS, tx.clone());
        }
        tokio::spawn(run_event_loop(fs.clone(), rx));

        fs.init_domains().await?;
        fs.init_frame_tree(&tx).await?;
        fs.init_isolated_world(UTILITY_WORLD_NAME).await?;
        fs.init_options().await?;
        Ok(fs)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn network(&self) -> &Arc<NetworkManager> {
        &self.network
    }

    pub fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    pub fn window_id(&self) -> i64 {
        self.window_id
    }

    /// The session this one was spawned from, for child iframe sessions
    pub fn parent(&self) -> Option<Arc<FrameSession>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Ids of the execution contexts currently registered on this session
    pub fn execution_context_ids(&self) -> Vec<ExecutionContextId> {
        self.contexts.lock().unwrap().keys().copied().collect()
    }

    /// Whether an isolated world of this name was already created
    pub fn has_isolated_world(&self, name: &str) -> bool {
        self.isolated_worlds.lock().unwrap().contains(name)
    }

    fn page(&self) -> Option<Arc<Page>> {
        self.page.upgrade()
    }

    fn is_main_frame(&self) -> bool {
        self.page()
            .map(|p| *p.target_id() == self.target_id)
            .unwrap_or(false)
    }

    /// Find the session driving `frame_id` among this session's children
    pub fn find_session(self: &Arc<Self>, frame_id: &FrameId) -> Option<Arc<FrameSession>> {
        let children = self.child_sessions.lock().unwrap();
        if let Some(child) = children.get(frame_id) {
            return Some(child.clone());
        }
        for child in children.values() {
            if let Some(found) = child.find_session(frame_id) {
                return Some(found);
            }
        }
        None
    }

    async fn command<C: serde::Serialize>(&self, method: &str, params: &C) -> Result<()> {
        self.session.execute::<_, Value>(method, params).await?;
        Ok(())
    }

    // -- initialization -----------------------------------------------------

    async fn init_domains(&self) -> Result<()> {
        self.command("Page.enable", &PageEnable {}).await?;
        self.command("DOM.enable", &DomEnable {}).await?;
        self.command("Log.enable", &LogEnable {}).await?;
        self.command("Runtime.enable", &RuntimeEnable {}).await?;
        self.command(
            "Target.setAutoAttach",
            &SetAutoAttach {
                auto_attach: true,
                wait_for_debugger_on_start: true,
                flatten: true,
            },
        )
        .await
    }

    /// Seed the local mirror from `Page.getFrameTree`, walking depth-first.
    /// An empty payload is retried once before giving up quietly.
    async fn init_frame_tree(
        self: &Arc<Self>,
        tx: &mpsc::UnboundedSender<CdpEvent>,
    ) -> Result<()> {
        let tree = match self.fetch_frame_tree().await {
            Ok(Some(tree)) => Some(tree),
            Ok(None) | Err(_) => {
                tracing::warn!(
                    session = %self.session.id(),
                    "empty frame tree payload, retrying once"
                );
                self.fetch_frame_tree().await?.or_else(|| {
                    tracing::warn!(session = %self.session.id(), "frame tree still empty");
                    None
                })
            }
        };

        if self.is_main_frame() {
            if let Some(tree) = tree {
                self.handle_frame_tree(&tree)?;
            }
            self.session.subscribe(RENDERER_EVENTS, tx.clone());
        }
        Ok(())
    }

    async fn fetch_frame_tree(&self) -> Result<Option<FrameTree>> {
        let reply: GetFrameTreeResult =
            self.session.execute("Page.getFrameTree", &GetFrameTree {}).await?;
        Ok(reply.frame_tree)
    }

    fn handle_frame_tree(&self, tree: &FrameTree) -> Result<()> {
        if let Some(parent_id) = &tree.frame.parent_id {
            self.manager
                .frame_attached(tree.frame.id.clone(), parent_id.clone());
        }
        self.on_frame_navigated(&tree.frame, true)?;
        for child in &tree.child_frames {
            self.handle_frame_tree(child)?;
        }
        Ok(())
    }

    /// Enable lifecycle events and install the utility world: one
    /// `createIsolatedWorld` per known frame plus a new-document script.
    async fn init_isolated_world(&self, name: &str) -> Result<()> {
        self.command(
            "Page.setLifecycleEventsEnabled",
            &SetLifecycleEventsEnabled { enabled: true },
        )
        .await?;

        if !self.isolated_worlds.lock().unwrap().insert(name.to_string()) {
            return Ok(());
        }

        let frames = if self.is_main_frame() {
            self.manager.frames()
        } else {
            let own = FrameId(self.target_id.0.clone());
            self.manager.get_frame_by_id(&own).into_iter().collect()
        };
        for frame in frames {
            // the frame may be gone before the browser processes this
            self.session
                .execute_fire_and_forget(
                    "Page.createIsolatedWorld",
                    &CreateIsolatedWorld {
                        frame_id: frame.id().clone(),
                        world_name: name.to_string(),
                        grant_univeral_access: true,
                    },
                )
                .await;
        }

        self.command(
            "Page.addScriptToEvaluateOnNewDocument",
            &AddScriptToEvaluateOnNewDocument {
                source: format!("//# sourceURL={EVALUATION_SCRIPT_URL}"),
                world_name: Some(name.to_string()),
            },
        )
        .await
    }

    /// Apply per-session emulation. Repeated locale/timezone overrides are
    /// already in effect and count as success.
    async fn init_options(&self) -> Result<()> {
        let page = self.page().ok_or(Error::Cancelled)?;
        let opts = page.options().clone();

        if self.is_main_frame() {
            self.command(
                "Emulation.setFocusEmulationEnabled",
                &SetFocusEmulationEnabled { enabled: true },
            )
            .await?;
            self.update_viewport().await?;
        }
        if opts.bypass_csp {
            self.command("Page.setBypassCSP", &SetBypassCsp { enabled: true }).await?;
        }
        if opts.ignore_https_errors {
            self.command(
                "Security.setIgnoreCertificateErrors",
                &SetIgnoreCertificateErrors { ignore: true },
            )
            .await?;
        }
        if opts.has_touch {
            self.command(
                "Emulation.setTouchEmulationEnabled",
                &SetTouchEmulationEnabled { enabled: true },
            )
            .await?;
        }
        if !opts.javascript_enabled {
            self.command(
                "Emulation.setScriptExecutionDisabled",
                &SetScriptExecutionDisabled { value: true },
            )
            .await?;
        }
        if !opts.user_agent.is_empty() || !opts.locale.is_empty() {
            self.command(
                "Emulation.setUserAgentOverride",
                &SetUserAgentOverride {
                    user_agent: opts.user_agent.clone(),
                    accept_language: (!opts.locale.is_empty()).then(|| opts.locale.clone()),
                },
            )
            .await?;
        }
        if !opts.locale.is_empty() {
            self.emulate_locale(&opts.locale).await?;
        }
        if !opts.timezone_id.is_empty() {
            self.emulate_timezone(&opts.timezone_id).await?;
        }
        if let Some(geolocation) = opts.geolocation {
            self.command(
                "Emulation.setGeolocationOverride",
                &SetGeolocationOverride {
                    latitude: Some(geolocation.latitude),
                    longitude: Some(geolocation.longitude),
                    accuracy: Some(geolocation.accuracy),
                },
            )
            .await?;
        }

        self.update_extra_http_headers(true).await?;
        self.update_request_interception().await?;
        self.update_offline(true).await?;
        self.update_http_credentials(true).await?;
        self.update_emulate_media().await?;

        self.command("Runtime.runIfWaitingForDebugger", &RunIfWaitingForDebugger {}).await
    }

    async fn emulate_locale(&self, locale: &str) -> Result<()> {
        match self
            .command(
                "Emulation.setLocaleOverride",
                &SetLocaleOverride {
                    locale: locale.to_string(),
                },
            )
            .await
        {
            Err(err) if err.is_already_in_effect() => Ok(()),
            other => other,
        }
    }

    async fn emulate_timezone(&self, timezone_id: &str) -> Result<()> {
        match self
            .command(
                "Emulation.setTimezoneOverride",
                &SetTimezoneOverride {
                    timezone_id: timezone_id.to_string(),
                },
            )
            .await
        {
            Err(err) if err.is_already_in_effect() => Ok(()),
            other => other,
        }
    }

    async fn update_viewport(&self) -> Result<()> {
        let page = self.page().ok_or(Error::Cancelled)?;
        let opts = page.options();
        let Some(viewport) = opts.viewport else {
            return Ok(());
        };
        let screen = opts.screen;

        let orientation = if viewport.width > viewport.height {
            ScreenOrientation {
                orientation_type: "landscapePrimary".to_string(),
                angle: 90,
            }
        } else {
            ScreenOrientation {
                orientation_type: "portraitPrimary".to_string(),
                angle: 0,
            }
        };
        self.command(
            "Emulation.setDeviceMetricsOverride",
            &SetDeviceMetricsOverride {
                width: viewport.width,
                height: viewport.height,
                device_scale_factor: opts.device_scale_factor,
                mobile: opts.is_mobile,
                screen_orientation: Some(orientation),
                screen_width: screen.map(|s| s.width),
                screen_height: screen.map(|s| s.height),
            },
        )
        .await?;
        self.command(
            "Browser.setWindowBounds",
            &SetWindowBounds {
                window_id: self.window_id,
                bounds: WindowBounds {
                    width: Some(viewport.width),
                    height: Some(viewport.height),
                },
            },
        )
        .await
    }

    /// Merge context and page headers, page-specific ones taking precedence
    pub(crate) async fn update_extra_http_headers(&self, initial: bool) -> Result<()> {
        let page = self.page().ok_or(Error::Cancelled)?;
        let mut merged = page.options().extra_http_headers.clone();
        merged.extend(page.extra_http_headers());
        if !initial || !merged.is_empty() {
            self.network.set_extra_http_headers(merged).await?;
        }
        Ok(())
    }

    pub(crate) async fn update_request_interception(&self) -> Result<()> {
        let page = self.page().ok_or(Error::Cancelled)?;
        self.network.set_request_interception(page.has_routes()).await
    }

    async fn update_offline(&self, initial: bool) -> Result<()> {
        let page = self.page().ok_or(Error::Cancelled)?;
        let offline = page.options().offline;
        if !initial || offline {
            self.network.set_offline_mode(offline).await?;
        }
        Ok(())
    }

    async fn update_http_credentials(&self, initial: bool) -> Result<()> {
        let page = self.page().ok_or(Error::Cancelled)?;
        let credentials = page.options().http_credentials.clone();
        if !initial || credentials.is_some() {
            self.network.authenticate(credentials).await?;
        }
        Ok(())
    }

    async fn update_emulate_media(&self) -> Result<()> {
        let page = self.page().ok_or(Error::Cancelled)?;
        let opts = page.options();
        let features = vec![
            MediaFeature {
                name: "prefers-color-scheme".to_string(),
                value: opts.color_scheme.as_feature_value().to_string(),
            },
            MediaFeature {
                name: "prefers-reduced-motion".to_string(),
                value: opts.reduced_motion.as_feature_value().to_string(),
            },
        ];
        self.command(
            "Emulation.setEmulatedMedia",
            &SetEmulatedMedia {
                media: opts.media_type.clone(),
                features,
            },
        )
        .await
    }

    // -- event handlers -----------------------------------------------------

    async fn dispatch(self: &Arc<Self>, event: CdpEvent) {
        match event {
            CdpEvent::TargetCrashed => self.on_target_crashed(),
            CdpEvent::LogEntryAdded(ev) => self.on_log_entry_added(ev),
            CdpEvent::FileChooserOpened(ev) => {
                tracing::debug!(frame = %ev.frame_id, mode = %ev.mode, "file chooser opened");
            }
            CdpEvent::JavascriptDialogOpening(ev) => {
                tracing::debug!(url = %ev.url, dialog = %ev.dialog_type, message = %ev.message, "javascript dialog opening");
            }
            CdpEvent::FrameAttached(ev) => {
                self.manager.frame_attached(ev.frame_id, ev.parent_frame_id);
            }
            CdpEvent::FrameDetached(ev) => self.manager.frame_detached(&ev.frame_id),
            CdpEvent::FrameNavigated(ev) => {
                if let Err(err) = self.on_frame_navigated(&ev.frame, false) {
                    self.fatal(err);
                }
            }
            CdpEvent::FrameRequestedNavigation(ev) => {
                // navigations opening elsewhere never touch this frame tree
                if ev.disposition == "currentTab" {
                    self.manager.frame_requested_navigation(&ev.frame_id, &ev.url, "");
                }
            }
            CdpEvent::FrameStartedLoading(ev) => self.manager.frame_loading_started(&ev.frame_id),
            CdpEvent::FrameStoppedLoading(ev) => self.manager.frame_loading_stopped(&ev.frame_id),
            CdpEvent::Lifecycle(ev) => self.on_page_lifecycle(ev),
            CdpEvent::NavigatedWithinDocument(ev) => {
                self.manager.frame_navigated_within_document(&ev.frame_id, &ev.url);
            }
            CdpEvent::ConsoleApiCalled(ev) => self.on_console_api_called(ev),
            CdpEvent::ExceptionThrown(ev) => {
                if let Some(page) = self.page() {
                    page.emit(PageEvent::Error(ev.exception_details.message()));
                }
            }
            CdpEvent::ExecutionContextCreated(ev) => self.on_execution_context_created(ev),
            CdpEvent::ExecutionContextDestroyed(ev) => {
                self.on_execution_context_destroyed(ev.execution_context_id);
            }
            CdpEvent::ExecutionContextsCleared => self.on_execution_contexts_cleared(),
            CdpEvent::AttachedToTarget(ev) => self.on_attached_to_target(ev).await,
            CdpEvent::DetachedFromTarget(ev) => {
                if let Some(page) = self.page() {
                    page.close_worker(&ev.session_id);
                }
            }
            // network events are consumed by the NetworkManager subscription
            CdpEvent::RequestWillBeSent(_)
            | CdpEvent::LoadingFinished(_)
            | CdpEvent::LoadingFailed(_)
            | CdpEvent::RequestPaused(_)
            | CdpEvent::AuthRequired(_) => {}
        }
    }

    fn fatal(&self, err: Error) {
        if let Some(page) = self.page() {
            page.fatal(err.to_string());
        }
    }

    fn on_frame_navigated(&self, frame: &FrameInfo, initial: bool) -> Result<()> {
        self.manager.frame_navigated(
            frame.id.clone(),
            frame.parent_id.clone(),
            frame.loader_id.as_str(),
            frame.name.as_deref().unwrap_or(""),
            &frame.full_url(),
            initial,
        )
    }

    fn on_target_crashed(&self) {
        tracing::warn!(session = %self.session.id(), target = %self.target_id, "target crashed");
        self.session.mark_as_crashed();
        if let Some(page) = self.page() {
            page.did_crash();
        }
    }

    /// Record init timestamps, lift frame lifecycle milestones into the
    /// tree, and emit the matching timing sample
    fn on_page_lifecycle(&self, ev: LifecycleEventPayload) {
        tracing::debug!(frame = %ev.frame_id, event = %ev.name, "page lifecycle");

        match ev.name.as_str() {
            "init" | "commit" => {
                *self.init_time.lock().unwrap() = ev.timestamp;
            }
            "load" => {
                self.manager.frame_lifecycle_event(&ev.frame_id, LifecycleEvent::Load);
                self.emit_timing(BrowserMetric::Loaded, &ev);
            }
            "DOMContentLoaded" => {
                self.manager
                    .frame_lifecycle_event(&ev.frame_id, LifecycleEvent::DomContentLoad);
                self.emit_timing(BrowserMetric::DomContentLoaded, &ev);
            }
            "firstPaint" => self.emit_timing(BrowserMetric::FirstPaint, &ev),
            "firstContentfulPaint" => self.emit_timing(BrowserMetric::FirstContentfulPaint, &ev),
            "firstMeaningfulPaint" => self.emit_timing(BrowserMetric::FirstMeaningfulPaint, &ev),
            _ => {}
        }
    }

    fn emit_timing(&self, metric: BrowserMetric, ev: &LifecycleEventPayload) {
        let Some(page) = self.page() else { return };
        if self.manager.get_frame_by_id(&ev.frame_id).is_none() {
            return;
        }

        let init = *self.init_time.lock().unwrap();
        let seconds = (ev.timestamp - init).max(0.0);

        let mut tags = page.options().metric_tags.clone();
        if page.options().url_metric_tag {
            if let Some(frame) = self.manager.get_frame_by_id(&ev.frame_id) {
                tags.insert("url".to_string(), frame.url());
            }
        }
        page.sample_sink().emit(Sample {
            metric,
            value: std::time::Duration::from_secs_f64(seconds),
            tags,
        });
    }

    fn on_console_api_called(&self, ev: ConsoleApiCalledEvent) {
        let objects: Vec<Value> = ev.args.iter().map(parse_remote_object).collect();
        let objects = Value::Array(objects).to_string();
        match ev.api_type.as_str() {
            "log" | "info" => {
                tracing::info!(source = "browser-console-api", objects = %objects)
            }
            "warning" => tracing::warn!(source = "browser-console-api", objects = %objects),
            "error" => tracing::error!(source = "browser-console-api", objects = %objects),
            _ => tracing::debug!(source = "browser-console-api", objects = %objects),
        }
    }

    fn on_log_entry_added(&self, ev: EntryAddedEvent) {
        let entry = ev.entry;
        let url = entry.url.unwrap_or_default();
        let line = entry.line_number.unwrap_or(0);
        match entry.level.as_str() {
            "info" => tracing::info!(
                source = "browser",
                browser_source = %entry.source, url = %url, line_number = line, "{}", entry.text
            ),
            "warning" => tracing::warn!(
                source = "browser",
                browser_source = %entry.source, url = %url, line_number = line, "{}", entry.text
            ),
            "error" => tracing::error!(
                source = "browser",
                browser_source = %entry.source, url = %url, line_number = line, "{}", entry.text
            ),
            _ => tracing::debug!(
                source = "browser",
                browser_source = %entry.source, url = %url, line_number = line, "{}", entry.text
            ),
        }
    }

    fn on_execution_context_created(&self, ev: ExecutionContextCreatedEvent) {
        tracing::debug!(
            session = %self.session.id(),
            context = %ev.context.id,
            name = %ev.context.name,
            "execution context created"
        );

        #[derive(Debug, Default, Deserialize)]
        #[serde(rename_all = "camelCase", default)]
        struct AuxData {
            frame_id: FrameId,
            is_default: bool,
            #[serde(rename = "type")]
            context_type: String,
        }

        let aux: AuxData = match ev.context.aux_data.clone() {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|err| {
                tracing::warn!("undecodable execution context aux data: {err}");
                AuxData::default()
            }),
            None => AuxData::default(),
        };

        let frame = self.manager.get_frame_by_id(&aux.frame_id);
        let mut world = None;
        if let Some(frame) = &frame {
            if aux.is_default {
                world = Some(World::Main);
            } else if ev.context.name == UTILITY_WORLD_NAME && !frame.has_context(World::Utility) {
                // multiple sessions to the same target race to create the
                // isolated world; the first one wins, any duplicate stays
                // registered without a world
                world = Some(World::Utility);
            }
        }
        if aux.context_type == "isolated" {
            self.isolated_worlds.lock().unwrap().insert(ev.context.name.clone());
        }

        let context = Arc::new(ExecutionContext::new(
            ev.context.id,
            self.session.clone(),
            frame.as_ref(),
        ));
        if let (Some(frame), Some(world)) = (&frame, world) {
            frame.set_context(world, context.clone());
        }
        self.contexts.lock().unwrap().insert(ev.context.id, context);
    }

    fn on_execution_context_destroyed(&self, id: ExecutionContextId) {
        tracing::debug!(session = %self.session.id(), context = %id, "execution context destroyed");
        let context = self.contexts.lock().unwrap().remove(&id);
        if let Some(context) = context {
            if let Some(frame) = context.frame() {
                frame.null_context(id);
            }
        }
    }

    fn on_execution_contexts_cleared(&self) {
        tracing::debug!(session = %self.session.id(), "execution contexts cleared");
        let contexts: Vec<Arc<ExecutionContext>> =
            self.contexts.lock().unwrap().drain().map(|(_, c)| c).collect();
        for context in contexts {
            if let Some(frame) = context.frame() {
                frame.null_context(context.id());
            }
        }
    }

    /// Route a newly attached target: child session for iframes, worker
    /// shell for workers, unblock-and-detach for everything else
    async fn on_attached_to_target(self: &Arc<Self>, ev: AttachedToTargetEvent) {
        let info = ev.target_info;
        tracing::debug!(
            session = %self.session.id(),
            attached_session = %ev.session_id,
            attached_target = %info.target_id,
            target_type = %info.target_type,
            "attached to target"
        );

        let session = Arc::new(Session::new(
            self.session.transport().clone(),
            ev.session_id.clone(),
            info.target_id.clone(),
        ));

        if info.target_type == "iframe" && !info.url.is_empty() {
            // the iframe crossed a process boundary: its target id is its
            // frame id, and whatever subtree it had is now stale
            let frame_id = FrameId(info.target_id.0.clone());
            let Some(frame) = self.manager.get_frame_by_id(&frame_id) else {
                return;
            };
            self.manager.remove_child_frames_recursively(&frame);

            let Some(page) = self.page() else { return };
            // child construction re-enters the dispatch machinery
            let attach = FrameSession::attach(&page, session, Some(self), info.target_id);
            match attach.await {
                Ok(child) => {
                    self.child_sessions.lock().unwrap().insert(frame_id, child);
                }
                Err(err) => self.handle_attach_error(err, "iframe"),
            }
            return;
        }

        if info.target_type != "worker" {
            // unblock targets we do not manage and let them go
            session
                .execute_fire_and_forget(
                    "Runtime.runIfWaitingForDebugger",
                    &RunIfWaitingForDebugger {},
                )
                .await;
            session
                .execute_fire_and_forget(
                    "Target.detachFromTarget",
                    &DetachFromTarget {
                        session_id: ev.session_id,
                    },
                )
                .await;
            return;
        }

        match Worker::attach(session, info.target_id, info.url).await {
            Ok(worker) => {
                if let Some(page) = self.page() {
                    page.add_worker(ev.session_id, worker);
                }
            }
            Err(err) => self.handle_attach_error(err, "worker"),
        }
    }

    /// Abnormal closure during child construction is expected when the
    /// browser goes away mid-attach; everything else is fatal
    fn handle_attach_error(&self, err: Error, kind: &str) {
        if !self.session.transport().connected() && err.is_abnormal_closure() {
            return;
        }
        if self.cancel.is_cancelled() {
            return;
        }
        self.fatal(Error::Navigation(format!("cannot create {kind} session: {err}")));
    }
}

impl std::fmt::Debug for FrameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSession")
            .field("session", self.session.id())
            .field("target_id", &self.target_id)
            .finish()
    }
}

async fn run_event_loop(fs: Arc<FrameSession>, mut rx: mpsc::UnboundedReceiver<CdpEvent>) {
    loop {
        tokio::select! {
            _ = fs.cancel.cancelled() => break,
            event = rx.recv() => match event {
                None => break,
                Some(event) => fs.dispatch(event).await,
            }
        }
    }
    tracing::debug!(session = %fs.session.id(), "event loop stopped");
}
