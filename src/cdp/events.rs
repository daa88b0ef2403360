//! Typed CDP events consumed by the engine
//!
//! Events cross the transport as `(method, params)` pairs and are parsed
//! into a tagged enum so the dispatch loop can match exhaustively; adding
//! an event is a compile-time checked change.

use serde::Deserialize;
use serde_json::Value;

use super::types::{
    ExceptionDetails, ExecutionContextId, FrameId, FrameInfo, LoaderId, RemoteObject, RequestId,
    SessionId, TargetInfo,
};

/// The base event set every FrameSession subscribes to
pub const BASE_EVENTS: &[&str] = &["Inspector.targetCrashed"];

/// The renderer event set; the main-frame session subscribes to it after
/// seeding the frame tree, child sessions immediately
pub const RENDERER_EVENTS: &[&str] = &[
    "Log.entryAdded",
    "Page.fileChooserOpened",
    "Page.frameAttached",
    "Page.frameDetached",
    "Page.frameNavigated",
    "Page.frameRequestedNavigation",
    "Page.frameStartedLoading",
    "Page.frameStoppedLoading",
    "Page.javascriptDialogOpening",
    "Page.lifecycleEvent",
    "Page.navigatedWithinDocument",
    "Runtime.consoleAPICalled",
    "Runtime.exceptionThrown",
    "Runtime.executionContextCreated",
    "Runtime.executionContextDestroyed",
    "Runtime.executionContextsCleared",
    "Target.attachedToTarget",
    "Target.detachedFromTarget",
];

/// Network events consumed by the NetworkManager
pub const NETWORK_EVENTS: &[&str] = &[
    "Network.requestWillBeSent",
    "Network.loadingFinished",
    "Network.loadingFailed",
    "Fetch.requestPaused",
    "Fetch.authRequired",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub line_number: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryAddedEvent {
    pub entry: LogEntry,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameAttachedEvent {
    pub frame_id: FrameId,
    pub parent_frame_id: FrameId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDetachedEvent {
    pub frame_id: FrameId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameNavigatedEvent {
    pub frame: FrameInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRequestedNavigationEvent {
    pub frame_id: FrameId,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub disposition: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameLoadingEvent {
    pub frame_id: FrameId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEventPayload {
    pub frame_id: FrameId,
    #[serde(default)]
    pub loader_id: LoaderId,
    pub name: String,
    /// Monotonic timestamp in seconds
    #[serde(default)]
    pub timestamp: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatedWithinDocumentEvent {
    pub frame_id: FrameId,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleApiCalledEvent {
    #[serde(rename = "type", default)]
    pub api_type: String,
    #[serde(default)]
    pub args: Vec<RemoteObject>,
    #[serde(default)]
    pub timestamp: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionThrownEvent {
    #[serde(default)]
    pub timestamp: f64,
    pub exception_details: ExceptionDetails,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDescription {
    pub id: ExecutionContextId,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub aux_data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextCreatedEvent {
    pub context: ExecutionContextDescription,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDestroyedEvent {
    pub execution_context_id: ExecutionContextId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedToTargetEvent {
    pub session_id: SessionId,
    pub target_info: TargetInfo,
    #[serde(default)]
    pub waiting_for_debugger: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedFromTargetEvent {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChooserOpenedEvent {
    #[serde(default)]
    pub frame_id: FrameId,
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JavascriptDialogOpeningEvent {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub dialog_type: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSentEvent {
    pub request_id: RequestId,
    #[serde(default)]
    pub loader_id: LoaderId,
    #[serde(default)]
    pub frame_id: Option<FrameId>,
    #[serde(default)]
    pub request: RequestInfo,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinishedEvent {
    pub request_id: RequestId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailedEvent {
    pub request_id: RequestId,
    #[serde(default)]
    pub error_text: String,
    #[serde(default)]
    pub canceled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPausedEvent {
    pub request_id: RequestId,
    #[serde(default)]
    pub frame_id: Option<FrameId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequiredEvent {
    pub request_id: RequestId,
}

/// One event from the wire, parsed into its variant
#[derive(Debug, Clone)]
pub enum CdpEvent {
    TargetCrashed,
    LogEntryAdded(EntryAddedEvent),
    FileChooserOpened(FileChooserOpenedEvent),
    FrameAttached(FrameAttachedEvent),
    FrameDetached(FrameDetachedEvent),
    FrameNavigated(FrameNavigatedEvent),
    FrameRequestedNavigation(FrameRequestedNavigationEvent),
    FrameStartedLoading(FrameLoadingEvent),
    FrameStoppedLoading(FrameLoadingEvent),
    JavascriptDialogOpening(JavascriptDialogOpeningEvent),
    Lifecycle(LifecycleEventPayload),
    NavigatedWithinDocument(NavigatedWithinDocumentEvent),
    ConsoleApiCalled(ConsoleApiCalledEvent),
    ExceptionThrown(ExceptionThrownEvent),
    ExecutionContextCreated(ExecutionContextCreatedEvent),
    ExecutionContextDestroyed(ExecutionContextDestroyedEvent),
    ExecutionContextsCleared,
    AttachedToTarget(AttachedToTargetEvent),
    DetachedFromTarget(DetachedFromTargetEvent),
    RequestWillBeSent(RequestWillBeSentEvent),
    LoadingFinished(LoadingFinishedEvent),
    LoadingFailed(LoadingFailedEvent),
    RequestPaused(RequestPausedEvent),
    AuthRequired(AuthRequiredEvent),
}

impl CdpEvent {
    /// Parse a raw `(method, params)` pair. Returns `None` for events the
    /// engine does not consume or payloads that fail to deserialize.
    pub fn parse(method: &str, params: Value) -> Option<CdpEvent> {
        fn de<T: serde::de::DeserializeOwned>(params: Value) -> Option<T> {
            match serde_json::from_value(params) {
                Ok(v) => Some(v),
                Err(err) => {
                    tracing::warn!("failed to decode CDP event payload: {err}");
                    None
                }
            }
        }

        let event = match method {
            "Inspector.targetCrashed" => CdpEvent::TargetCrashed,
            "Log.entryAdded" => CdpEvent::LogEntryAdded(de(params)?),
            "Page.fileChooserOpened" => CdpEvent::FileChooserOpened(de(params)?),
            "Page.frameAttached" => CdpEvent::FrameAttached(de(params)?),
            "Page.frameDetached" => CdpEvent::FrameDetached(de(params)?),
            "Page.frameNavigated" => CdpEvent::FrameNavigated(de(params)?),
            "Page.frameRequestedNavigation" => CdpEvent::FrameRequestedNavigation(de(params)?),
            "Page.frameStartedLoading" => CdpEvent::FrameStartedLoading(de(params)?),
            "Page.frameStoppedLoading" => CdpEvent::FrameStoppedLoading(de(params)?),
            "Page.javascriptDialogOpening" => CdpEvent::JavascriptDialogOpening(de(params)?),
            "Page.lifecycleEvent" => CdpEvent::Lifecycle(de(params)?),
            "Page.navigatedWithinDocument" => CdpEvent::NavigatedWithinDocument(de(params)?),
            "Runtime.consoleAPICalled" => CdpEvent::ConsoleApiCalled(de(params)?),
            "Runtime.exceptionThrown" => CdpEvent::ExceptionThrown(de(params)?),
            "Runtime.executionContextCreated" => CdpEvent::ExecutionContextCreated(de(params)?),
            "Runtime.executionContextDestroyed" => CdpEvent::ExecutionContextDestroyed(de(params)?),
            "Runtime.executionContextsCleared" => CdpEvent::ExecutionContextsCleared,
            "Target.attachedToTarget" => CdpEvent::AttachedToTarget(de(params)?),
            "Target.detachedFromTarget" => CdpEvent::DetachedFromTarget(de(params)?),
            "Network.requestWillBeSent" => CdpEvent::RequestWillBeSent(de(params)?),
            "Network.loadingFinished" => CdpEvent::LoadingFinished(de(params)?),
            "Network.loadingFailed" => CdpEvent::LoadingFailed(de(params)?),
            "Fetch.requestPaused" => CdpEvent::RequestPaused(de(params)?),
            "Fetch.authRequired" => CdpEvent::AuthRequired(de(params)?),
            _ => return None,
        };
        Some(event)
    }

    /// The wire method name of this event
    pub fn name(&self) -> &'static str {
        match self {
            CdpEvent::TargetCrashed => "Inspector.targetCrashed",
            CdpEvent::LogEntryAdded(_) => "Log.entryAdded",
            CdpEvent::FileChooserOpened(_) => "Page.fileChooserOpened",
            CdpEvent::FrameAttached(_) => "Page.frameAttached",
            CdpEvent::FrameDetached(_) => "Page.frameDetached",
            CdpEvent::FrameNavigated(_) => "Page.frameNavigated",
            CdpEvent::FrameRequestedNavigation(_) => "Page.frameRequestedNavigation",
            CdpEvent::FrameStartedLoading(_) => "Page.frameStartedLoading",
            CdpEvent::FrameStoppedLoading(_) => "Page.frameStoppedLoading",
            CdpEvent::JavascriptDialogOpening(_) => "Page.javascriptDialogOpening",
            CdpEvent::Lifecycle(_) => "Page.lifecycleEvent",
            CdpEvent::NavigatedWithinDocument(_) => "Page.navigatedWithinDocument",
            CdpEvent::ConsoleApiCalled(_) => "Runtime.consoleAPICalled",
            CdpEvent::ExceptionThrown(_) => "Runtime.exceptionThrown",
            CdpEvent::ExecutionContextCreated(_) => "Runtime.executionContextCreated",
            CdpEvent::ExecutionContextDestroyed(_) => "Runtime.executionContextDestroyed",
            CdpEvent::ExecutionContextsCleared => "Runtime.executionContextsCleared",
            CdpEvent::AttachedToTarget(_) => "Target.attachedToTarget",
            CdpEvent::DetachedFromTarget(_) => "Target.detachedFromTarget",
            CdpEvent::RequestWillBeSent(_) => "Network.requestWillBeSent",
            CdpEvent::LoadingFinished(_) => "Network.loadingFinished",
            CdpEvent::LoadingFailed(_) => "Network.loadingFailed",
            CdpEvent::RequestPaused(_) => "Fetch.requestPaused",
            CdpEvent::AuthRequired(_) => "Fetch.authRequired",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_lifecycle_event() {
        let ev = CdpEvent::parse(
            "Page.lifecycleEvent",
            json!({
                "frameId": "F0",
                "loaderId": "L1",
                "name": "DOMContentLoaded",
                "timestamp": 12.5,
            }),
        )
        .unwrap();
        match ev {
            CdpEvent::Lifecycle(p) => {
                assert_eq!(p.frame_id.as_str(), "F0");
                assert_eq!(p.name, "DOMContentLoaded");
                assert_eq!(p.timestamp, 12.5);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_method_is_skipped() {
        assert!(CdpEvent::parse("Animation.animationStarted", json!({})).is_none());
    }

    #[test]
    fn name_round_trips_through_parse() {
        let ev = CdpEvent::parse("Page.frameStartedLoading", json!({"frameId": "F1"})).unwrap();
        assert_eq!(ev.name(), "Page.frameStartedLoading");
    }
}
