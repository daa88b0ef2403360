//! Registry of frames and the mutation callbacks the event loop drives
//!
//! The manager owns every live frame by id, tracks which one is the main
//! frame, and is the single entry point for tree mutations: attach,
//! detach, navigation commits, lifecycle transitions and in-flight request
//! accounting all pass through here.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::cdp::types::{FrameId, Navigate, NavigateResult, RequestId};
use crate::error::{Error, Result};
use crate::frame::{
    run_with_timeout, DocumentInfo, Frame, LifecycleEvent, NavigationOptions,
};
use crate::options::TimeoutSettings;
use crate::page::{Page, PageEvent};

pub struct FrameManager {
    page: Weak<Page>,
    frames: RwLock<HashMap<FrameId, Arc<Frame>>>,
    main_frame: RwLock<Option<FrameId>>,
    timeout_settings: TimeoutSettings,
}

impl FrameManager {
    pub fn new(page: Weak<Page>, timeout_settings: TimeoutSettings) -> Arc<Self> {
        Arc::new(Self {
            page,
            frames: RwLock::new(HashMap::new()),
            main_frame: RwLock::new(None),
            timeout_settings,
        })
    }

    pub fn timeout_settings(&self) -> &TimeoutSettings {
        &self.timeout_settings
    }

    pub fn get_frame_by_id(&self, id: &FrameId) -> Option<Arc<Frame>> {
        self.frames.read().unwrap().get(id).cloned()
    }

    pub fn main_frame(&self) -> Option<Arc<Frame>> {
        let id = self.main_frame.read().unwrap().clone()?;
        self.get_frame_by_id(&id)
    }

    pub fn frames(&self) -> Vec<Arc<Frame>> {
        self.frames.read().unwrap().values().cloned().collect()
    }

    fn frame_cancel_token(&self) -> CancellationToken {
        self.page
            .upgrade()
            .map(|p| p.cancel_token().child_token())
            .unwrap_or_default()
    }

    // -- tree mutations -----------------------------------------------------

    /// A frame appeared under `parent_id`. Ignored when the frame is
    /// already tracked or the parent is unknown.
    pub fn frame_attached(self: &Arc<Self>, frame_id: FrameId, parent_id: FrameId) {
        tracing::debug!(frame = %frame_id, parent = %parent_id, "frame attached");

        if self.frames.read().unwrap().contains_key(&frame_id) {
            return;
        }
        let Some(parent) = self.get_frame_by_id(&parent_id) else {
            return;
        };
        let frame = Frame::new(
            self.page.clone(),
            self,
            Some(&parent),
            frame_id.clone(),
            self.frame_cancel_token(),
        );
        self.frames.write().unwrap().insert(frame_id, frame);
    }

    /// A frame went away; it and its whole subtree are detached
    pub fn frame_detached(&self, frame_id: &FrameId) {
        tracing::debug!(frame = %frame_id, "frame detached");
        if let Some(frame) = self.get_frame_by_id(frame_id) {
            self.remove_frames_recursively(&frame);
        }
    }

    /// A navigation committed. Updates identity, promotes the pending
    /// document and clears lifecycle state.
    pub fn frame_navigated(
        self: &Arc<Self>,
        frame_id: FrameId,
        parent_id: Option<FrameId>,
        loader_id: &str,
        name: &str,
        url: &str,
        initial: bool,
    ) -> Result<()> {
        tracing::debug!(frame = %frame_id, url, loader = loader_id, initial, "frame navigated");

        let existing = self.get_frame_by_id(&frame_id);
        let frame = match (existing, parent_id) {
            (Some(frame), _) => {
                // a cross-document navigation tears down the old subtree
                for child in frame.child_frames() {
                    self.remove_frames_recursively(&child);
                }
                frame
            }
            (None, None) => {
                // main frame (re)appearing, possibly under a new id after a
                // cross-process swap
                if let Some(previous) = self.main_frame() {
                    self.remove_frames_recursively(&previous);
                }
                let frame = Frame::new(
                    self.page.clone(),
                    self,
                    None,
                    frame_id.clone(),
                    self.frame_cancel_token(),
                );
                self.frames
                    .write()
                    .unwrap()
                    .insert(frame_id.clone(), frame.clone());
                *self.main_frame.write().unwrap() = Some(frame_id.clone());
                frame
            }
            (None, Some(_)) => {
                return Err(Error::FrameNotFound(format!(
                    "navigation committed for untracked child frame {frame_id}"
                )));
            }
        };

        let request = match frame.pending_document() {
            Some(pending) if pending.document_id == loader_id => pending.request,
            _ => {
                // the document's network request shares the loader id
                let candidate = RequestId(loader_id.to_string());
                frame.has_inflight_request(&candidate).then_some(candidate)
            }
        };
        frame.commit_document(DocumentInfo {
            document_id: loader_id.to_string(),
            request,
        });

        // waiters woken by the navigated emit must observe the commit
        frame.navigated(name, url, loader_id);
        frame.clear_lifecycle();
        Ok(())
    }

    /// A navigation was requested in the current tab; remember the pending
    /// document until it commits or is abandoned
    pub fn frame_requested_navigation(&self, frame_id: &FrameId, url: &str, document_id: &str) {
        tracing::debug!(frame = %frame_id, url, "frame requested navigation");
        let Some(frame) = self.get_frame_by_id(frame_id) else {
            return;
        };
        if let Some(pending) = frame.pending_document() {
            if pending.document_id == document_id {
                return;
            }
        }
        frame.set_pending_document(Some(DocumentInfo {
            document_id: document_id.to_string(),
            request: None,
        }));
    }

    pub fn frame_loading_started(&self, frame_id: &FrameId) {
        if let Some(frame) = self.get_frame_by_id(frame_id) {
            frame.on_loading_started();
        }
    }

    pub fn frame_loading_stopped(&self, frame_id: &FrameId) {
        if let Some(frame) = self.get_frame_by_id(frame_id) {
            frame.on_loading_stopped();
            if let Some(main) = self.main_frame() {
                main.recalculate_lifecycle();
            }
        }
    }

    pub fn frame_navigated_within_document(&self, frame_id: &FrameId, url: &str) {
        if let Some(frame) = self.get_frame_by_id(frame_id) {
            frame.navigated_within_document(url);
        }
    }

    /// Lift a frame-level lifecycle event into the aggregated subtree view
    pub fn frame_lifecycle_event(&self, frame_id: &FrameId, event: LifecycleEvent) {
        if let Some(frame) = self.get_frame_by_id(frame_id) {
            frame.on_lifecycle_event(event);
            if let Some(main) = self.main_frame() {
                main.recalculate_lifecycle();
            }
        }
    }

    // -- in-flight requests -------------------------------------------------

    /// A request entered flight for a frame. A document request also
    /// becomes the frame's pending document.
    pub fn request_started(
        &self,
        frame_id: &FrameId,
        request_id: RequestId,
        document_id: Option<String>,
    ) {
        let Some(frame) = self.get_frame_by_id(frame_id) else {
            return;
        };
        frame.add_request(request_id.clone());
        if let Some(document_id) = document_id {
            frame.set_pending_document(Some(DocumentInfo {
                document_id,
                request: Some(request_id),
            }));
        }
        frame.stop_network_idle_timer();
    }

    /// A request left flight; an empty set re-arms the idle timer
    pub fn request_finished(&self, frame_id: &FrameId, request_id: &RequestId) {
        let Some(frame) = self.get_frame_by_id(frame_id) else {
            return;
        };
        frame.delete_request(request_id);
        if frame.inflight_len() == 0 {
            frame.start_network_idle_timer();
        }
    }

    // -- removal ------------------------------------------------------------

    /// Detach a frame and its entire subtree, bottom-up
    pub fn remove_frames_recursively(&self, frame: &Arc<Frame>) {
        for child in frame.child_frames() {
            self.remove_frames_recursively(&child);
        }
        frame.detach();
        self.frames.write().unwrap().remove(frame.id());
    }

    /// Detach all descendants of a frame, leaving the frame itself in place
    pub fn remove_child_frames_recursively(&self, frame: &Arc<Frame>) {
        for child in frame.child_frames() {
            self.remove_frames_recursively(&child);
        }
    }

    // -- navigation ---------------------------------------------------------

    /// Issue `Page.navigate` for a frame and wait until the matching
    /// document commits and the requested load state fires. Returns the
    /// committed document id.
    pub async fn navigate_frame(
        &self,
        frame: &Frame,
        url: &str,
        opts: NavigationOptions,
    ) -> Result<String> {
        tracing::debug!(frame = %frame.id(), url, "navigate frame");

        let page = self.page.upgrade().ok_or(Error::Cancelled)?;
        let timeout = opts
            .timeout
            .unwrap_or_else(|| self.timeout_settings.navigation_timeout());

        run_with_timeout(timeout, "goto", async {
            let session = page.session_for_frame(frame.id())?;
            // subscribe before navigating so a fast commit is not missed
            let mut events = page.subscribe_events();

            let reply: NavigateResult = session
                .execute(
                    "Page.navigate",
                    &Navigate {
                        url: url.to_string(),
                        referrer: opts.referrer.clone(),
                        frame_id: Some(frame.id().clone()),
                    },
                )
                .await?;
            if let Some(text) = &reply.error_text {
                if !text.is_empty() {
                    return Err(Error::Navigation(format!("{text} at {url:?}")));
                }
            }

            let document_id = match reply.loader_id {
                Some(loader) => {
                    let document_id = loader.0;
                    while frame.current_document().document_id != document_id {
                        next_frame_navigated(&mut events, frame.id()).await?;
                    }
                    document_id
                }
                None => {
                    // no loader means a same-document navigation
                    next_frame_navigated(&mut events, frame.id()).await?;
                    frame.loader_id()
                }
            };

            frame.wait_for_load_state(opts.wait_until, Some(timeout)).await?;
            Ok(document_id)
        })
        .await
    }

    /// Wait for the next committed navigation of a frame, then for the
    /// requested load state
    pub async fn wait_for_frame_navigation(
        &self,
        frame: &Frame,
        opts: NavigationOptions,
    ) -> Result<()> {
        let page = self.page.upgrade().ok_or(Error::Cancelled)?;
        let timeout = opts
            .timeout
            .unwrap_or_else(|| self.timeout_settings.navigation_timeout());

        run_with_timeout(timeout, "wait_for_navigation", async {
            let mut events = page.subscribe_events();
            next_frame_navigated(&mut events, frame.id()).await?;
            frame.wait_for_load_state(opts.wait_until, Some(timeout)).await
        })
        .await
    }
}

async fn next_frame_navigated(
    events: &mut broadcast::Receiver<PageEvent>,
    frame_id: &FrameId,
) -> Result<()> {
    loop {
        match events.recv().await {
            Ok(PageEvent::FrameNavigated(id)) if id == *frame_id => return Ok(()),
            Ok(PageEvent::Crashed) => return Err(Error::Crashed),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return Err(Error::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::NETWORK_IDLE_TIMEOUT;
    use std::time::Duration;

    fn manager() -> Arc<FrameManager> {
        FrameManager::new(Weak::new(), TimeoutSettings::default())
    }

    fn seed_main(m: &Arc<FrameManager>, id: &str) -> Arc<Frame> {
        m.frame_navigated(id.into(), None, "L0", "", "https://example.com/", true)
            .unwrap();
        m.get_frame_by_id(&id.into()).unwrap()
    }

    #[tokio::test]
    async fn attach_builds_a_tree_rooted_at_the_main_frame() {
        let m = manager();
        let main = seed_main(&m, "F0");
        m.frame_attached("F1".into(), "F0".into());
        m.frame_attached("F2".into(), "F1".into());

        let f1 = m.get_frame_by_id(&"F1".into()).unwrap();
        let f2 = m.get_frame_by_id(&"F2".into()).unwrap();
        assert!(Arc::ptr_eq(&f1.parent_frame().unwrap(), &main));
        assert!(Arc::ptr_eq(&f2.parent_frame().unwrap(), &f1));
        assert_eq!(main.child_frames().len(), 1);
        assert!(main.parent_frame().is_none());
    }

    #[tokio::test]
    async fn attach_with_unknown_parent_is_a_no_op() {
        let m = manager();
        seed_main(&m, "F0");
        m.frame_attached("F9".into(), "NOPE".into());
        assert!(m.get_frame_by_id(&"F9".into()).is_none());
    }

    #[tokio::test]
    async fn duplicate_attach_keeps_the_first_frame() {
        let m = manager();
        seed_main(&m, "F0");
        m.frame_attached("F1".into(), "F0".into());
        let first = m.get_frame_by_id(&"F1".into()).unwrap();
        m.frame_attached("F1".into(), "F0".into());
        let second = m.get_frame_by_id(&"F1".into()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn subtree_lifecycle_requires_every_child() {
        let m = manager();
        let main = seed_main(&m, "F0");
        m.frame_attached("F1".into(), "F0".into());
        let f1 = m.get_frame_by_id(&"F1".into()).unwrap();

        m.frame_lifecycle_event(&"F0".into(), LifecycleEvent::Load);
        assert!(main.has_lifecycle_event_fired(LifecycleEvent::Load));
        assert!(!main.has_subtree_lifecycle_event_fired(LifecycleEvent::Load));

        m.frame_lifecycle_event(&"F1".into(), LifecycleEvent::Load);
        assert!(f1.has_subtree_lifecycle_event_fired(LifecycleEvent::Load));
        assert!(main.has_subtree_lifecycle_event_fired(LifecycleEvent::Load));
    }

    #[tokio::test]
    async fn detaching_a_child_unblocks_the_parent_subtree() {
        let m = manager();
        let main = seed_main(&m, "F0");
        m.frame_attached("F1".into(), "F0".into());

        m.frame_lifecycle_event(&"F0".into(), LifecycleEvent::Load);
        assert!(!main.has_subtree_lifecycle_event_fired(LifecycleEvent::Load));

        m.frame_detached(&"F1".into());
        if let Some(main) = m.main_frame() {
            main.recalculate_lifecycle();
        }
        assert!(main.has_subtree_lifecycle_event_fired(LifecycleEvent::Load));
        assert!(m.get_frame_by_id(&"F1".into()).is_none());
    }

    #[tokio::test]
    async fn detach_removes_the_whole_subtree() {
        let m = manager();
        seed_main(&m, "F0");
        m.frame_attached("F1".into(), "F0".into());
        m.frame_attached("F2".into(), "F1".into());
        let f2 = m.get_frame_by_id(&"F2".into()).unwrap();

        m.frame_detached(&"F1".into());
        assert!(m.get_frame_by_id(&"F1".into()).is_none());
        assert!(m.get_frame_by_id(&"F2".into()).is_none());
        assert!(f2.is_detached());
        assert!(f2.parent_frame().is_none());
    }

    #[tokio::test]
    async fn loading_stopped_sets_all_three_milestones() {
        let m = manager();
        let main = seed_main(&m, "F0");
        m.frame_loading_stopped(&"F0".into());
        for event in LifecycleEvent::ALL {
            assert!(main.has_lifecycle_event_fired(event));
        }
        // idempotent
        m.frame_loading_stopped(&"F0".into());
        for event in LifecycleEvent::ALL {
            assert!(main.has_lifecycle_event_fired(event));
        }
    }

    #[tokio::test]
    async fn clear_lifecycle_keeps_only_the_document_request() {
        let m = manager();
        let main = seed_main(&m, "F0");

        main.add_request(RequestId("R1".into()));
        main.add_request(RequestId("L1".into()));
        // commit a navigation whose loader id matches one in-flight request
        m.frame_navigated("F0".into(), None, "L1", "", "https://example.com/next", false)
            .unwrap();

        let inflight = main.inflight_requests();
        assert_eq!(inflight.len(), 1);
        assert!(inflight.contains(&RequestId("L1".into())));
        assert_eq!(
            main.current_document().request,
            Some(RequestId("L1".into()))
        );
    }

    #[tokio::test]
    async fn clear_lifecycle_without_document_request_empties_inflight() {
        let m = manager();
        let main = seed_main(&m, "F0");
        main.add_request(RequestId("R1".into()));
        m.frame_navigated("F0".into(), None, "L9", "", "https://example.com/other", false)
            .unwrap();
        assert!(main.inflight_requests().is_empty());
        assert_eq!(main.current_document().request, None);
    }

    #[tokio::test]
    async fn pending_document_promotes_on_matching_commit() {
        let m = manager();
        let main = seed_main(&m, "F0");

        m.request_started(&"F0".into(), RequestId("L2".into()), Some("L2".into()));
        assert_eq!(
            main.pending_document(),
            Some(DocumentInfo {
                document_id: "L2".into(),
                request: Some(RequestId("L2".into())),
            })
        );

        m.frame_navigated("F0".into(), None, "L2", "", "https://example.com/two", false)
            .unwrap();
        assert_eq!(main.pending_document(), None);
        assert_eq!(main.current_document().document_id, "L2");
        assert_eq!(
            main.current_document().request,
            Some(RequestId("L2".into()))
        );
    }

    #[tokio::test]
    async fn navigated_child_must_be_tracked() {
        let m = manager();
        seed_main(&m, "F0");
        let err = m
            .frame_navigated("GHOST".into(), Some("F0".into()), "L1", "", "u", false)
            .unwrap_err();
        assert!(matches!(err, Error::FrameNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn network_idle_fires_once_after_the_quiet_period() {
        let m = manager();
        let main = seed_main(&m, "F0");
        assert!(!main.has_lifecycle_event_fired(LifecycleEvent::NetworkIdle));

        // two requests in flight hold the timer off
        m.request_started(&"F0".into(), RequestId("R1".into()), None);
        m.request_started(&"F0".into(), RequestId("R2".into()), None);
        m.request_finished(&"F0".into(), &RequestId("R1".into()));
        tokio::time::sleep(NETWORK_IDLE_TIMEOUT * 2).await;
        assert!(!main.has_lifecycle_event_fired(LifecycleEvent::NetworkIdle));

        m.request_finished(&"F0".into(), &RequestId("R2".into()));
        tokio::time::sleep(NETWORK_IDLE_TIMEOUT + Duration::from_millis(50)).await;
        assert!(main.has_lifecycle_event_fired(LifecycleEvent::NetworkIdle));
    }

    #[tokio::test(start_paused = true)]
    async fn detach_cancels_a_pending_idle_timer() {
        let m = manager();
        seed_main(&m, "F0");
        m.frame_attached("F1".into(), "F0".into());
        m.frame_navigated(
            "F1".into(),
            Some("F0".into()),
            "L1",
            "",
            "https://example.com/frame",
            false,
        )
        .unwrap();
        let f1 = m.get_frame_by_id(&"F1".into()).unwrap();
        assert!(!f1.has_lifecycle_event_fired(LifecycleEvent::NetworkIdle));

        tokio::time::sleep(Duration::from_millis(100)).await;
        m.frame_detached(&"F1".into());
        tokio::time::sleep(NETWORK_IDLE_TIMEOUT * 2).await;
        assert!(!f1.has_lifecycle_event_fired(LifecycleEvent::NetworkIdle));
    }
}
