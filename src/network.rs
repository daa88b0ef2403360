//! Network collaborator: request accounting, auth, headers, offline mode
//!
//! Full request/response reconstruction belongs to the harness; this
//! manager reduces the network event stream to the in-flight request
//! add/remove notifications the frame engine needs, plus the handful of
//! commands emulation applies per session. Child frame sessions share
//! their parent's state so credentials, extra headers and interception
//! survive cross-process iframes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cdp::events::{CdpEvent, NETWORK_EVENTS};
use crate::cdp::session::Session;
use crate::cdp::types::{
    AuthChallengeResponse, ContinueRequest, ContinueWithAuth, EmulateNetworkConditions,
    FetchDisable, FetchEnable, FrameId, NetworkEnable, RequestId, SetExtraHttpHeaders,
};
use crate::error::Result;
use crate::frame_manager::FrameManager;
use crate::options::Credentials;

/// State shared between a session's manager and the managers its child
/// sessions inherit
#[derive(Default)]
struct SharedState {
    extra_http_headers: Mutex<HashMap<String, String>>,
    credentials: Mutex<Option<Credentials>>,
    offline: AtomicBool,
    user_interception: AtomicBool,
    protocol_interception: AtomicBool,
}

pub struct NetworkManager {
    session: Arc<Session>,
    manager: Weak<FrameManager>,
    state: Arc<SharedState>,
    /// Which frame each in-flight request belongs to, session-scoped
    request_frames: Mutex<HashMap<RequestId, FrameId>>,
    attempted_auth: Mutex<HashSet<RequestId>>,
}

impl NetworkManager {
    /// Create a manager for `session`, inheriting the parent's shared
    /// state when this is a child frame session
    pub async fn new(
        session: Arc<Session>,
        manager: Weak<FrameManager>,
        parent: Option<&Arc<NetworkManager>>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        let state = match parent {
            Some(parent) => parent.state.clone(),
            None => Arc::new(SharedState::default()),
        };
        let nm = Arc::new(Self {
            session: session.clone(),
            manager,
            state,
            request_frames: Mutex::new(HashMap::new()),
            attempted_auth: Mutex::new(HashSet::new()),
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.subscribe(NETWORK_EVENTS, tx);
        let worker = nm.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        None => break,
                        Some(event) => worker.on_event(event).await,
                    }
                }
            }
        });

        session.execute::<_, serde_json::Value>("Network.enable", &NetworkEnable {}).await?;
        Ok(nm)
    }

    async fn on_event(&self, event: CdpEvent) {
        match event {
            CdpEvent::RequestWillBeSent(ev) => {
                let Some(frame_id) = ev.frame_id else { return };
                // the document request carries the loader id as its own id
                let document_id = (ev.resource_type.as_deref() == Some("Document")
                    && ev.loader_id.as_str() == ev.request_id.as_str())
                .then(|| ev.loader_id.0.clone());
                self.request_frames
                    .lock()
                    .unwrap()
                    .insert(ev.request_id.clone(), frame_id.clone());
                if let Some(manager) = self.manager.upgrade() {
                    manager.request_started(&frame_id, ev.request_id, document_id);
                }
            }
            CdpEvent::LoadingFinished(ev) => self.request_done(&ev.request_id),
            CdpEvent::LoadingFailed(ev) => self.request_done(&ev.request_id),
            CdpEvent::RequestPaused(ev) => {
                self.session
                    .execute_fire_and_forget(
                        "Fetch.continueRequest",
                        &ContinueRequest {
                            request_id: ev.request_id,
                        },
                    )
                    .await;
            }
            CdpEvent::AuthRequired(ev) => self.on_auth_required(ev.request_id).await,
            _ => {}
        }
    }

    fn request_done(&self, request_id: &RequestId) {
        let frame_id = self.request_frames.lock().unwrap().remove(request_id);
        if let (Some(frame_id), Some(manager)) = (frame_id, self.manager.upgrade()) {
            manager.request_finished(&frame_id, request_id);
        }
    }

    async fn on_auth_required(&self, request_id: RequestId) {
        let credentials = self.state.credentials.lock().unwrap().clone();
        let first_attempt = self.attempted_auth.lock().unwrap().insert(request_id.clone());
        let response = match credentials {
            Some(credentials) if first_attempt => AuthChallengeResponse {
                response: "ProvideCredentials".to_string(),
                username: Some(credentials.username),
                password: Some(credentials.password),
            },
            _ => AuthChallengeResponse {
                response: "Default".to_string(),
                username: None,
                password: None,
            },
        };
        self.session
            .execute_fire_and_forget(
                "Fetch.continueWithAuth",
                &ContinueWithAuth {
                    request_id,
                    auth_challenge_response: response,
                },
            )
            .await;
    }

    // -- commands -----------------------------------------------------------

    pub async fn set_extra_http_headers(&self, headers: HashMap<String, String>) -> Result<()> {
        *self.state.extra_http_headers.lock().unwrap() = headers.clone();
        self.session
            .execute::<_, serde_json::Value>(
                "Network.setExtraHTTPHeaders",
                &SetExtraHttpHeaders { headers },
            )
            .await?;
        Ok(())
    }

    pub fn extra_http_headers(&self) -> HashMap<String, String> {
        self.state.extra_http_headers.lock().unwrap().clone()
    }

    pub async fn set_offline_mode(&self, offline: bool) -> Result<()> {
        if self.state.offline.swap(offline, Ordering::Relaxed) == offline {
            return Ok(());
        }
        self.session
            .execute::<_, serde_json::Value>(
                "Network.emulateNetworkConditions",
                &EmulateNetworkConditions {
                    offline,
                    latency: 0.0,
                    download_throughput: -1.0,
                    upload_throughput: -1.0,
                },
            )
            .await?;
        Ok(())
    }

    /// Store basic-auth credentials; interception is required to answer
    /// auth challenges
    pub async fn authenticate(&self, credentials: Option<Credentials>) -> Result<()> {
        *self.state.credentials.lock().unwrap() = credentials;
        self.update_protocol_request_interception().await
    }

    /// Toggle user-requested request interception
    pub async fn set_request_interception(&self, enabled: bool) -> Result<()> {
        self.state.user_interception.store(enabled, Ordering::Relaxed);
        self.update_protocol_request_interception().await
    }

    async fn update_protocol_request_interception(&self) -> Result<()> {
        let enabled = self.state.user_interception.load(Ordering::Relaxed)
            || self.state.credentials.lock().unwrap().is_some();
        if self.state.protocol_interception.swap(enabled, Ordering::Relaxed) == enabled {
            return Ok(());
        }
        if enabled {
            self.session
                .execute::<_, serde_json::Value>(
                    "Fetch.enable",
                    &FetchEnable {
                        handle_auth_requests: Some(true),
                    },
                )
                .await?;
        } else {
            self.session
                .execute::<_, serde_json::Value>("Fetch.disable", &FetchDisable {})
                .await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkManager")
            .field("session", self.session.id())
            .finish()
    }
}
