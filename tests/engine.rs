//! Engine tests over an in-process mock transport
//!
//! The mock answers the commands the engine issues with canned replies and
//! lets tests inject CDP events exactly as the browser would emit them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use strix::cdp::events::CdpEvent;
use strix::cdp::{CdpTransport, EventSink};
use strix::{
    BrowserContextOptions, Error, ExecutionContextId, FrameLifecycleUpdate, LifecycleEvent,
    NavigationOptions, Page, PageEvent, Sample, SampleSink, SessionId, World,
    NETWORK_IDLE_TIMEOUT, UTILITY_WORLD_NAME,
};

const MAIN_TARGET: &str = "T0";
const MAIN_SESSION: &str = "S0";
const MAIN_FRAME: &str = "T0";

#[derive(Debug, Clone)]
struct RecordedCommand {
    session: Option<SessionId>,
    method: String,
    #[allow(dead_code)]
    params: Value,
}

struct Subscription {
    session: SessionId,
    names: HashSet<String>,
    sink: EventSink,
}

#[derive(Default)]
struct MockTransport {
    subs: Mutex<Vec<Subscription>>,
    commands: Mutex<Vec<RecordedCommand>>,
    /// Per-method reply overrides
    replies: Mutex<HashMap<String, Value>>,
    /// Per-method injected CDP errors
    errors: Mutex<HashMap<String, (i64, String)>>,
    disconnected: AtomicBool,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn set_reply(&self, method: &str, reply: Value) {
        self.replies.lock().unwrap().insert(method.to_string(), reply);
    }

    fn set_error(&self, method: &str, code: i64, message: &str) {
        self.errors
            .lock()
            .unwrap()
            .insert(method.to_string(), (code, message.to_string()));
    }

    fn sent(&self, method: &str) -> Vec<RecordedCommand> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    /// Inject an event as if the browser emitted it on `session`
    fn emit(&self, session: &str, method: &str, params: Value) {
        let Some(event) = CdpEvent::parse(method, params) else {
            panic!("mock emitted an event the engine does not consume: {method}");
        };
        let session = SessionId::from(session);
        let subs = self.subs.lock().unwrap();
        for sub in subs.iter() {
            if sub.session == session && sub.names.contains(method) {
                let _ = sub.sink.send(event.clone());
            }
        }
    }

    fn default_reply(&self, method: &str) -> Value {
        match method {
            "Browser.getWindowForTarget" => json!({"windowId": 7}),
            "Page.getFrameTree" => json!({
                "frameTree": {
                    "frame": {
                        "id": MAIN_FRAME,
                        "loaderId": "L0",
                        "url": "about:blank",
                    },
                    "childFrames": [],
                }
            }),
            "Page.navigate" => json!({"frameId": MAIN_FRAME, "loaderId": "L1"}),
            _ => json!({}),
        }
    }
}

#[async_trait]
impl CdpTransport for MockTransport {
    async fn execute(
        &self,
        session_id: Option<&SessionId>,
        method: &str,
        params: Value,
    ) -> strix::Result<Value> {
        self.commands.lock().unwrap().push(RecordedCommand {
            session: session_id.cloned(),
            method: method.to_string(),
            params,
        });
        if let Some((code, message)) = self.errors.lock().unwrap().get(method) {
            return Err(Error::cdp(method, *code, message.clone()));
        }
        if let Some(reply) = self.replies.lock().unwrap().get(method) {
            return Ok(reply.clone());
        }
        Ok(self.default_reply(method))
    }

    async fn fire_and_forget(&self, session_id: Option<&SessionId>, method: &str, params: Value) {
        self.commands.lock().unwrap().push(RecordedCommand {
            session: session_id.cloned(),
            method: method.to_string(),
            params,
        });
    }

    fn subscribe(&self, session_id: &SessionId, events: &[&str], sink: EventSink) {
        self.subs.lock().unwrap().push(Subscription {
            session: session_id.clone(),
            names: events.iter().map(|s| s.to_string()).collect(),
            sink,
        });
    }

    fn connected(&self) -> bool {
        !self.disconnected.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct RecordingSink {
    samples: Mutex<Vec<Sample>>,
}

impl RecordingSink {
    fn samples(&self) -> Vec<Sample> {
        self.samples.lock().unwrap().clone()
    }
}

impl SampleSink for RecordingSink {
    fn emit(&self, sample: Sample) {
        self.samples.lock().unwrap().push(sample);
    }
}

/// Let the event-dispatch tasks drain their queues (and, under paused
/// time, advance any due timers)
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

async fn attach_page(
    transport: &Arc<MockTransport>,
    options: BrowserContextOptions,
) -> (Arc<Page>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let page = Page::attach(
        transport.clone() as Arc<dyn CdpTransport>,
        MAIN_TARGET.into(),
        MAIN_SESSION.into(),
        options,
        Some(sink.clone() as Arc<dyn SampleSink>),
    )
    .await
    .expect("page attach");
    (page, sink)
}

fn lifecycle_event(frame: &str, name: &str, timestamp: f64) -> Value {
    json!({
        "frameId": frame,
        "loaderId": "L0",
        "name": name,
        "timestamp": timestamp,
    })
}

#[tokio::test(start_paused = true)]
async fn attach_seeds_the_frame_tree_and_enables_domains() {
    let transport = MockTransport::new();
    let (page, _) = attach_page(&transport, BrowserContextOptions::default()).await;

    let main = page.main_frame().expect("main frame");
    assert_eq!(main.id().as_str(), MAIN_FRAME);
    assert_eq!(main.url(), "about:blank");

    for method in [
        "Page.enable",
        "DOM.enable",
        "Log.enable",
        "Runtime.enable",
        "Target.setAutoAttach",
        "Page.getFrameTree",
        "Page.setLifecycleEventsEnabled",
        "Page.addScriptToEvaluateOnNewDocument",
        "Runtime.runIfWaitingForDebugger",
        "Network.enable",
    ] {
        assert!(
            !transport.sent(method).is_empty(),
            "expected {method} during attach"
        );
    }

    // one isolated world per known frame, fire-and-forget
    let worlds = transport.sent("Page.createIsolatedWorld");
    assert_eq!(worlds.len(), 1);
    let session = page.main_frame_session().unwrap();
    assert!(session.has_isolated_world(UTILITY_WORLD_NAME));
}

#[tokio::test(start_paused = true)]
async fn clean_page_load_emits_timing_samples_and_page_events() {
    let transport = MockTransport::new();
    let (page, sink) = attach_page(&transport, BrowserContextOptions::default()).await;
    let mut events = page.subscribe_events();

    transport.emit(MAIN_SESSION, "Page.lifecycleEvent", lifecycle_event(MAIN_FRAME, "init", 10.0));
    transport.emit(
        MAIN_SESSION,
        "Page.lifecycleEvent",
        lifecycle_event(MAIN_FRAME, "DOMContentLoaded", 10.5),
    );
    transport.emit(MAIN_SESSION, "Page.lifecycleEvent", lifecycle_event(MAIN_FRAME, "load", 11.0));
    settle().await;

    let samples = sink.samples();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].metric.name(), "browser_dom_content_loaded");
    assert_eq!(samples[0].value, Duration::from_millis(500));
    assert_eq!(samples[1].metric.name(), "browser_loaded");
    assert_eq!(samples[1].value, Duration::from_secs(1));
    for sample in &samples {
        assert_eq!(sample.tags.get("url").map(String::as_str), Some("about:blank"));
    }

    let mut loads = 0;
    let mut dcls = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            PageEvent::Load => loads += 1,
            PageEvent::DomContentLoaded => dcls += 1,
            _ => {}
        }
    }
    assert_eq!(loads, 1);
    assert_eq!(dcls, 1);
}

#[tokio::test(start_paused = true)]
async fn paint_lifecycle_events_map_to_paint_metrics() {
    let transport = MockTransport::new();
    let (_page, sink) = attach_page(&transport, BrowserContextOptions::default()).await;

    transport.emit(MAIN_SESSION, "Page.lifecycleEvent", lifecycle_event(MAIN_FRAME, "commit", 5.0));
    transport.emit(
        MAIN_SESSION,
        "Page.lifecycleEvent",
        lifecycle_event(MAIN_FRAME, "firstPaint", 5.25),
    );
    transport.emit(
        MAIN_SESSION,
        "Page.lifecycleEvent",
        lifecycle_event(MAIN_FRAME, "firstContentfulPaint", 5.5),
    );
    settle().await;

    let samples = sink.samples();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].metric.name(), "browser_first_paint");
    assert_eq!(samples[0].value, Duration::from_millis(250));
    assert_eq!(samples[1].metric.name(), "browser_first_contentful_paint");
    assert_eq!(samples[1].value, Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn nested_iframe_gets_a_child_session_and_loses_stale_descendants() {
    let transport = MockTransport::new();
    let (page, _) = attach_page(&transport, BrowserContextOptions::default()).await;

    transport.emit(
        MAIN_SESSION,
        "Page.frameAttached",
        json!({"frameId": "F1", "parentFrameId": MAIN_FRAME}),
    );
    transport.emit(
        MAIN_SESSION,
        "Page.frameNavigated",
        json!({"frame": {"id": "F1", "parentId": MAIN_FRAME, "loaderId": "L1", "url": "https://example.com/inner"}}),
    );
    // a grandchild that the cross-process swap must tear down
    transport.emit(
        MAIN_SESSION,
        "Page.frameAttached",
        json!({"frameId": "F2", "parentFrameId": "F1"}),
    );
    settle().await;
    assert!(page.frame_manager().get_frame_by_id(&"F2".into()).is_some());

    transport.emit(
        MAIN_SESSION,
        "Target.attachedToTarget",
        json!({
            "sessionId": "S1",
            "targetInfo": {
                "targetId": "F1",
                "type": "iframe",
                "url": "https://example.com/inner",
            },
            "waitingForDebugger": false,
        }),
    );
    settle().await;

    let main_session = page.main_frame_session().unwrap();
    let child = main_session.find_session(&"F1".into()).expect("child session");
    assert_eq!(child.session().id().as_str(), "S1");
    assert!(page.frame_manager().get_frame_by_id(&"F1".into()).is_some());
    assert!(page.frame_manager().get_frame_by_id(&"F2".into()).is_none());
}

#[tokio::test(start_paused = true)]
async fn attached_iframe_with_unknown_frame_id_is_a_no_op() {
    let transport = MockTransport::new();
    let (page, _) = attach_page(&transport, BrowserContextOptions::default()).await;

    transport.emit(
        MAIN_SESSION,
        "Target.attachedToTarget",
        json!({
            "sessionId": "S9",
            "targetInfo": {"targetId": "GHOST", "type": "iframe", "url": "https://x"},
            "waitingForDebugger": false,
        }),
    );
    settle().await;

    let main_session = page.main_frame_session().unwrap();
    assert!(main_session.find_session(&"GHOST".into()).is_none());
    assert!(page.fatal_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn other_target_types_are_unblocked_and_detached() {
    let transport = MockTransport::new();
    let (_page, _) = attach_page(&transport, BrowserContextOptions::default()).await;

    transport.emit(
        MAIN_SESSION,
        "Target.attachedToTarget",
        json!({
            "sessionId": "S5",
            "targetInfo": {"targetId": "SW", "type": "service_worker", "url": "https://x/sw.js"},
            "waitingForDebugger": true,
        }),
    );
    settle().await;

    let detach = transport.sent("Target.detachFromTarget");
    assert_eq!(detach.len(), 1);
    assert_eq!(detach[0].session.as_ref().unwrap().as_str(), "S5");
    assert!(transport
        .sent("Runtime.runIfWaitingForDebugger")
        .iter()
        .any(|c| c.session.as_ref().map(|s| s.as_str()) == Some("S5")));
}

#[tokio::test(start_paused = true)]
async fn worker_targets_are_tracked_until_detach() {
    let transport = MockTransport::new();
    let (page, _) = attach_page(&transport, BrowserContextOptions::default()).await;

    transport.emit(
        MAIN_SESSION,
        "Target.attachedToTarget",
        json!({
            "sessionId": "SW1",
            "targetInfo": {"targetId": "W1", "type": "worker", "url": "https://x/worker.js"},
            "waitingForDebugger": true,
        }),
    );
    settle().await;
    assert_eq!(page.worker_count(), 1);

    transport.emit(
        MAIN_SESSION,
        "Target.detachedFromTarget",
        json!({"sessionId": "SW1"}),
    );
    settle().await;
    assert_eq!(page.worker_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn network_idle_fires_once_and_wakes_waiters() {
    let transport = MockTransport::new();
    let (page, _) = attach_page(&transport, BrowserContextOptions::default()).await;
    let main = page.main_frame().unwrap();
    let mut lifecycle = main.subscribe_lifecycle();

    // two in-flight requests hold idleness off
    for (request, ts) in [("R1", 1.0), ("R2", 1.1)] {
        transport.emit(
            MAIN_SESSION,
            "Network.requestWillBeSent",
            json!({
                "requestId": request,
                "loaderId": "L0",
                "frameId": MAIN_FRAME,
                "request": {"url": "https://example.com/a", "method": "GET"},
                "type": "XHR",
                "timestamp": ts,
            }),
        );
    }
    settle().await;

    let waiter = {
        let main = main.clone();
        tokio::spawn(async move {
            main.wait_for_load_state(LifecycleEvent::NetworkIdle, Some(Duration::from_secs(5)))
                .await
        })
    };

    transport.emit(MAIN_SESSION, "Network.loadingFinished", json!({"requestId": "R1"}));
    settle().await;
    assert!(!main.has_lifecycle_event_fired(LifecycleEvent::NetworkIdle));

    transport.emit(MAIN_SESSION, "Network.loadingFinished", json!({"requestId": "R2"}));
    tokio::time::sleep(NETWORK_IDLE_TIMEOUT + Duration::from_millis(50)).await;

    assert!(main.has_lifecycle_event_fired(LifecycleEvent::NetworkIdle));
    waiter.await.unwrap().expect("networkidle waiter");

    let mut idle_adds = 0;
    while let Ok(update) = lifecycle.try_recv() {
        if update == FrameLifecycleUpdate::Added(LifecycleEvent::NetworkIdle) {
            idle_adds += 1;
        }
    }
    assert_eq!(idle_adds, 1);

    // already fired: returns immediately
    main.wait_for_load_state(LifecycleEvent::NetworkIdle, Some(Duration::from_millis(1)))
        .await
        .expect("fast path");
}

#[tokio::test(start_paused = true)]
async fn crash_marks_the_session_and_notifies_the_page() {
    let transport = MockTransport::new();
    let (page, _) = attach_page(&transport, BrowserContextOptions::default()).await;
    let mut events = page.subscribe_events();

    transport.emit(MAIN_SESSION, "Inspector.targetCrashed", json!({}));
    settle().await;

    assert!(page.is_crashed());
    let session = page.main_frame_session().unwrap().session().clone();
    assert!(session.is_crashed());
    let err = session.execute_raw("Page.enable", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::Crashed));

    let mut crashes = 0;
    while let Ok(event) = events.try_recv() {
        if event == PageEvent::Crashed {
            crashes += 1;
        }
    }
    assert_eq!(crashes, 1);
}

fn context_created(id: i64, frame: &str, name: &str, is_default: bool, kind: &str) -> Value {
    json!({
        "context": {
            "id": id,
            "origin": "https://example.com",
            "name": name,
            "auxData": {"frameId": frame, "isDefault": is_default, "type": kind},
        }
    })
}

#[tokio::test(start_paused = true)]
async fn isolated_world_race_coalesces_to_the_first_context() {
    let transport = MockTransport::new();
    let (page, _) = attach_page(&transport, BrowserContextOptions::default()).await;
    let main = page.main_frame().unwrap();

    for id in [1, 2] {
        transport.emit(
            MAIN_SESSION,
            "Runtime.executionContextCreated",
            context_created(id, MAIN_FRAME, UTILITY_WORLD_NAME, false, "isolated"),
        );
    }
    settle().await;

    assert!(main.has_context(World::Utility));
    let session = page.main_frame_session().unwrap();
    let mut ids = session.execution_context_ids();
    ids.sort_by_key(|id| id.0);
    assert_eq!(ids, vec![ExecutionContextId(1), ExecutionContextId(2)]);

    // destroying the losing duplicate leaves the winner in place
    transport.emit(
        MAIN_SESSION,
        "Runtime.executionContextDestroyed",
        json!({"executionContextId": 2}),
    );
    settle().await;
    assert!(main.has_context(World::Utility));
    assert_eq!(session.execution_context_ids(), vec![ExecutionContextId(1)]);

    transport.emit(
        MAIN_SESSION,
        "Runtime.executionContextDestroyed",
        json!({"executionContextId": 1}),
    );
    settle().await;
    assert!(!main.has_context(World::Utility));
    assert!(session.execution_context_ids().is_empty());
    // the isolated-world registry still remembers the name
    assert!(session.has_isolated_world(UTILITY_WORLD_NAME));
}

#[tokio::test(start_paused = true)]
async fn contexts_cleared_resets_every_frame_slot() {
    let transport = MockTransport::new();
    let (page, _) = attach_page(&transport, BrowserContextOptions::default()).await;
    let main = page.main_frame().unwrap();

    transport.emit(
        MAIN_SESSION,
        "Runtime.executionContextCreated",
        context_created(1, MAIN_FRAME, "", true, "default"),
    );
    transport.emit(
        MAIN_SESSION,
        "Runtime.executionContextCreated",
        context_created(2, MAIN_FRAME, UTILITY_WORLD_NAME, false, "isolated"),
    );
    settle().await;
    assert!(main.has_context(World::Main));
    assert!(main.has_context(World::Utility));

    transport.emit(MAIN_SESSION, "Runtime.executionContextsCleared", json!({}));
    settle().await;
    assert!(!main.has_context(World::Main));
    assert!(!main.has_context(World::Utility));
    let session = page.main_frame_session().unwrap();
    assert!(session.execution_context_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn evaluate_runs_in_the_main_world() {
    let transport = MockTransport::new();
    let (page, _) = attach_page(&transport, BrowserContextOptions::default()).await;

    transport.emit(
        MAIN_SESSION,
        "Runtime.executionContextCreated",
        context_created(1, MAIN_FRAME, "", true, "default"),
    );
    settle().await;

    transport.set_reply("Runtime.evaluate", json!({"result": {"type": "number", "value": 4}}));
    let value = page.evaluate("2 + 2").await.expect("evaluate");
    assert_eq!(value, json!(4));

    let sent = transport.sent("Runtime.evaluate");
    assert_eq!(sent.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn evaluation_exceptions_surface_as_page_errors() {
    let transport = MockTransport::new();
    let (page, _) = attach_page(&transport, BrowserContextOptions::default()).await;
    let mut events = page.subscribe_events();

    transport.emit(
        MAIN_SESSION,
        "Runtime.exceptionThrown",
        json!({
            "timestamp": 3.0,
            "exceptionDetails": {
                "text": "Uncaught",
                "lineNumber": 1,
                "columnNumber": 2,
                "exception": {"type": "object", "description": "ReferenceError: x is not defined"},
            }
        }),
    );
    settle().await;

    let mut errors = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PageEvent::Error(message) = event {
            errors.push(message);
        }
    }
    assert_eq!(errors, vec!["ReferenceError: x is not defined".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn goto_waits_for_the_matching_commit_and_load_state() {
    let transport = MockTransport::new();
    let (page, _) = attach_page(&transport, BrowserContextOptions::default()).await;
    let main = page.main_frame().unwrap();

    let nav = {
        let page = page.clone();
        tokio::spawn(async move {
            page.goto(
                "https://example.com/",
                NavigationOptions {
                    wait_until: LifecycleEvent::Load,
                    ..Default::default()
                },
            )
            .await
        })
    };
    settle().await;
    assert_eq!(transport.sent("Page.navigate").len(), 1);
    assert!(!nav.is_finished());

    transport.emit(
        MAIN_SESSION,
        "Page.frameNavigated",
        json!({"frame": {"id": MAIN_FRAME, "loaderId": "L1", "url": "https://example.com/"}}),
    );
    transport.emit(MAIN_SESSION, "Page.lifecycleEvent", lifecycle_event(MAIN_FRAME, "init", 20.0));
    transport.emit(MAIN_SESSION, "Page.lifecycleEvent", lifecycle_event(MAIN_FRAME, "load", 20.5));
    settle().await;

    let document_id = nav.await.unwrap().expect("goto");
    assert_eq!(document_id, "L1");
    assert_eq!(main.url(), "https://example.com/");
    assert_eq!(main.current_document().document_id, "L1");
}

#[tokio::test(start_paused = true)]
async fn goto_surfaces_navigation_errors() {
    let transport = MockTransport::new();
    let (page, _) = attach_page(&transport, BrowserContextOptions::default()).await;

    transport.set_reply(
        "Page.navigate",
        json!({"frameId": MAIN_FRAME, "loaderId": "L1", "errorText": "net::ERR_NAME_NOT_RESOLVED"}),
    );
    let err = page
        .goto("https://no.such.host/", NavigationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Navigation(_)));
    assert!(err.to_string().contains("ERR_NAME_NOT_RESOLVED"));
}

#[tokio::test(start_paused = true)]
async fn repeated_locale_and_timezone_overrides_count_as_success() {
    let transport = MockTransport::new();
    transport.set_error(
        "Emulation.setLocaleOverride",
        -32000,
        "Another locale override is already in effect",
    );
    transport.set_error(
        "Emulation.setTimezoneOverride",
        -32000,
        "Timezone override is already in effect",
    );

    let options = BrowserContextOptions {
        locale: "de-DE".to_string(),
        timezone_id: "Europe/Berlin".to_string(),
        ..Default::default()
    };
    // attach succeeds despite both overrides being rejected as duplicates
    let (page, _) = attach_page(&transport, options).await;
    assert!(page.fatal_error().is_none());
    assert!(!transport.sent("Emulation.setLocaleOverride").is_empty());
    assert!(!transport.sent("Emulation.setTimezoneOverride").is_empty());
}

#[tokio::test(start_paused = true)]
async fn emulation_commands_follow_the_options() {
    let transport = MockTransport::new();
    let options = BrowserContextOptions {
        bypass_csp: true,
        ignore_https_errors: true,
        has_touch: true,
        javascript_enabled: false,
        user_agent: "strix-test".to_string(),
        geolocation: Some(strix::Geolocation {
            latitude: 52.52,
            longitude: 13.4,
            accuracy: 1.0,
        }),
        offline: true,
        ..Default::default()
    };
    let (_page, _) = attach_page(&transport, options).await;

    for method in [
        "Emulation.setFocusEmulationEnabled",
        "Emulation.setDeviceMetricsOverride",
        "Browser.setWindowBounds",
        "Page.setBypassCSP",
        "Security.setIgnoreCertificateErrors",
        "Emulation.setTouchEmulationEnabled",
        "Emulation.setScriptExecutionDisabled",
        "Emulation.setUserAgentOverride",
        "Emulation.setGeolocationOverride",
        "Network.emulateNetworkConditions",
        "Emulation.setEmulatedMedia",
    ] {
        assert!(
            !transport.sent(method).is_empty(),
            "expected {method} during attach"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn empty_frame_tree_payload_is_retried_once() {
    let transport = MockTransport::new();
    transport.set_reply("Page.getFrameTree", json!({}));
    let sink = Arc::new(RecordingSink::default());
    let page = Page::attach(
        transport.clone() as Arc<dyn CdpTransport>,
        MAIN_TARGET.into(),
        MAIN_SESSION.into(),
        BrowserContextOptions::default(),
        Some(sink as Arc<dyn SampleSink>),
    )
    .await
    .expect("attach survives an empty tree");

    assert_eq!(transport.sent("Page.getFrameTree").len(), 2);
    // no tree arrived, so no main frame yet; later events can still seed it
    assert!(page.main_frame().is_err());
}

#[tokio::test(start_paused = true)]
async fn in_document_navigation_updates_the_url_without_clearing_lifecycle() {
    let transport = MockTransport::new();
    let (page, _) = attach_page(&transport, BrowserContextOptions::default()).await;
    let main = page.main_frame().unwrap();

    transport.emit(MAIN_SESSION, "Page.lifecycleEvent", lifecycle_event(MAIN_FRAME, "load", 2.0));
    settle().await;
    assert!(main.has_lifecycle_event_fired(LifecycleEvent::Load));

    transport.emit(
        MAIN_SESSION,
        "Page.navigatedWithinDocument",
        json!({"frameId": MAIN_FRAME, "url": "about:blank#section"}),
    );
    settle().await;
    assert_eq!(main.url(), "about:blank#section");
    assert!(main.has_lifecycle_event_fired(LifecycleEvent::Load));
}

#[tokio::test(start_paused = true)]
async fn frame_stopped_loading_completes_every_milestone() {
    let transport = MockTransport::new();
    let (page, _) = attach_page(&transport, BrowserContextOptions::default()).await;
    let main = page.main_frame().unwrap();

    transport.emit(
        MAIN_SESSION,
        "Page.frameStoppedLoading",
        json!({"frameId": MAIN_FRAME}),
    );
    settle().await;
    for event in LifecycleEvent::ALL {
        assert!(main.has_lifecycle_event_fired(event));
        assert!(main.has_subtree_lifecycle_event_fired(event));
    }
}
