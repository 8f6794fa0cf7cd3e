//! Ad block: one attempt to fill an ad slot from an ordered list of
//! candidate links
//!
//! Each candidate moves through a fixed lifecycle:
//!
//! ```text
//! UNINITIALIZED ─▶ INITIALIZING ─▶ INITIALIZED ─▶ PRELOADING ─▶ PRELOADED ─▶ PLAYING ─▶ FINISHED_SUCCESS
//!       │               │               │              │             │           │
//!       └───────────────┴───────────────┴──────────────┴─────────────┴───────────┴──▶ ERROR
//! ```
//!
//! A failing candidate is marked `ERROR` and the next one is tried. When no
//! candidate is left the block reports `failed play` / `failed preload` and
//! goes inactive.

use crate::ads::scheduler::AdSettings;
use crate::ads::sdk::{AdEventKind, AdPlaybackEvent, AdSdk, AdViewer};
use crate::error::{Error, Result};
use crate::mediator::{events, Mediator, Subscription};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Lifecycle status of one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdItemStatus {
    Uninitialized,
    Initializing,
    Initialized,
    Preloading,
    Preloaded,
    Playing,
    FinishedSuccess,
    Error,
}

impl AdItemStatus {
    /// Check if a transition to the target status is valid
    pub fn can_transition_to(&self, target: AdItemStatus) -> bool {
        use AdItemStatus::*;

        if target == Error {
            return !self.is_terminal();
        }
        matches!(
            (self, target),
            (Uninitialized, Initializing)
                | (Initializing, Initialized)
                | (Initialized, Preloading)
                | (Preloading, Preloaded)
                | (Preloaded, Playing)
                | (Playing, FinishedSuccess)
        )
    }

    /// The candidate will not be tried again
    pub fn is_terminal(&self) -> bool {
        matches!(self, AdItemStatus::FinishedSuccess | AdItemStatus::Error)
    }

    /// Past initialization but not finished
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal() && *self != AdItemStatus::Uninitialized
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdItemStatus::Uninitialized => "UNINITIALIZED",
            AdItemStatus::Initializing => "INITIALIZING",
            AdItemStatus::Initialized => "INITIALIZED",
            AdItemStatus::Preloading => "PRELOADING",
            AdItemStatus::Preloaded => "PRELOADED",
            AdItemStatus::Playing => "PLAYING",
            AdItemStatus::FinishedSuccess => "FINISHED_SUCCESS",
            AdItemStatus::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for AdItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdItem {
    pub link: String,
    pub status: AdItemStatus,
}

/// Candidate statuses for one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdBlockState {
    items: Vec<AdItem>,
    active: bool,
}

impl AdBlockState {
    pub fn new(links: Vec<String>) -> Self {
        Self {
            items: links
                .into_iter()
                .map(|link| AdItem {
                    link,
                    status: AdItemStatus::Uninitialized,
                })
                .collect(),
            active: true,
        }
    }

    pub fn items(&self) -> &[AdItem] {
        &self.items
    }

    pub fn link(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(|item| item.link.as_str())
    }

    pub fn status(&self, index: usize) -> Option<AdItemStatus> {
        self.items.get(index).map(|item| item.status)
    }

    /// Move one candidate to `target`. Only one candidate may be in flight
    /// at a time.
    pub fn transition(&mut self, index: usize, target: AdItemStatus) -> Result<()> {
        let current = self.status(index).ok_or_else(|| Error::InvalidStateTransition {
            from: format!("missing candidate {}", index),
            to: target.to_string(),
        })?;

        let other_in_flight = self
            .items
            .iter()
            .enumerate()
            .any(|(i, item)| i != index && item.status.is_in_flight());

        if !current.can_transition_to(target)
            || (target == AdItemStatus::Initializing && other_in_flight)
        {
            return Err(Error::InvalidStateTransition {
                from: current.to_string(),
                to: target.to_string(),
            });
        }

        self.items[index].status = target;
        Ok(())
    }

    /// Mark a candidate as failed. Returns false if it was already terminal.
    pub fn fail(&mut self, index: usize) -> bool {
        self.transition(index, AdItemStatus::Error).is_ok()
    }

    /// First candidate nobody has touched yet
    pub fn next_untried(&self) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.status == AdItemStatus::Uninitialized)
    }

    /// First candidate play can start from: already preloaded or untried
    pub fn next_playable(&self) -> Option<usize> {
        self.items.iter().position(|item| {
            matches!(
                item.status,
                AdItemStatus::Uninitialized | AdItemStatus::Preloaded
            )
        })
    }

    /// Links a follow-up block may still use: not failed, not finished and
    /// not currently playing
    pub fn pending_links(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|item| !item.status.is_terminal() && item.status != AdItemStatus::Playing)
            .map(|item| item.link.clone())
            .collect()
    }

    /// Number of candidates that were tried
    pub fn attempted(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.status != AdItemStatus::Uninitialized)
            .count()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }
}

/// Events emitted on a block's own mediator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdBlockEvent {
    /// A candidate's creative started rendering
    Started { index: usize },
}

struct Prepared {
    index: usize,
    viewer: Arc<dyn AdViewer>,
}

struct BlockInner {
    id: Uuid,
    sdk: Arc<dyn AdSdk>,
    settings: Arc<AdSettings>,
    state: Mutex<AdBlockState>,
    /// Memoized preload result. Held for the whole of `play` and `preload`,
    /// which keeps them from interleaving.
    ready: tokio::sync::Mutex<Option<Prepared>>,
    events: Mediator<AdBlockEvent>,
}

/// Ad block handle. Clones share state.
#[derive(Clone)]
pub struct AdBlock {
    inner: Arc<BlockInner>,
}

impl std::fmt::Debug for AdBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdBlock")
            .field("id", &self.inner.id)
            .field("state", &*self.lock_state())
            .finish()
    }
}

impl AdBlock {
    pub fn new(links: Vec<String>, sdk: Arc<dyn AdSdk>, settings: Arc<AdSettings>) -> Self {
        Self {
            inner: Arc::new(BlockInner {
                id: Uuid::new_v4(),
                sdk,
                settings,
                state: Mutex::new(AdBlockState::new(links)),
                ready: tokio::sync::Mutex::new(None),
                events: Mediator::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn links(&self) -> Vec<String> {
        self.lock_state()
            .items()
            .iter()
            .map(|item| item.link.clone())
            .collect()
    }

    /// Snapshot of candidate statuses
    pub fn state(&self) -> AdBlockState {
        self.lock_state().clone()
    }

    pub fn is_active(&self) -> bool {
        self.lock_state().is_active()
    }

    /// Stop the block from being preloaded or played
    pub fn deactivate(&self) {
        self.lock_state().deactivate();
    }

    /// Subscribe to the block's lifecycle events
    pub fn on<F>(&self, event: &str, callback: F) -> Subscription<AdBlockEvent>
    where
        F: Fn(&AdBlockEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(event, callback)
    }

    /// Load and buffer the first untried candidate, moving past failures.
    ///
    /// Repeated calls return the memoized candidate while it is still
    /// preloaded; a call made during `play` waits for it to finish.
    #[instrument(skip(self), fields(block = %self.inner.id))]
    pub async fn preload(&self) -> Result<usize> {
        let mut ready = self.inner.ready.lock().await;
        if !self.is_active() {
            return Err(Error::AdBlockInactive);
        }

        if let Some(prepared) = ready.as_ref() {
            if self.lock_state().status(prepared.index) == Some(AdItemStatus::Preloaded) {
                return Ok(prepared.index);
            }
        }
        *ready = None;

        loop {
            let Some(index) = self.lock_state().next_untried() else {
                break;
            };
            match self.prepare(index).await {
                Ok(viewer) => {
                    debug!(index, "Ad candidate preloaded");
                    *ready = Some(Prepared { index, viewer });
                    return Ok(index);
                }
                Err(e) => {
                    warn!(index, error = %e, "Ad candidate failed to preload");
                    self.lock_state().fail(index);
                }
            }
        }

        let mut state = self.lock_state();
        state.deactivate();
        Err(Error::FailedPreload {
            attempted: state.attempted(),
        })
    }

    /// Play candidates in order until one finishes.
    ///
    /// Returns the index of the candidate that played. Emits
    /// [`events::STARTED`] on the block's mediator each time a creative
    /// starts. The block is inactive afterwards whatever the outcome.
    #[instrument(skip(self), fields(block = %self.inner.id))]
    pub async fn play(&self) -> Result<usize> {
        let mut ready = self.inner.ready.lock().await;
        if !self.is_active() {
            return Err(Error::AdBlockInactive);
        }

        let mut memo = ready.take();
        loop {
            let Some(index) = self.lock_state().next_playable() else {
                break;
            };

            let prepared = memo.take().filter(|p| p.index == index);
            match self.play_candidate(index, prepared).await {
                Ok(()) => {
                    let mut state = self.lock_state();
                    state.transition(index, AdItemStatus::FinishedSuccess)?;
                    state.deactivate();
                    info!(index, "Ad finished");
                    return Ok(index);
                }
                Err(e) => {
                    warn!(index, error = %e, "Ad candidate failed, trying next");
                    self.lock_state().fail(index);
                }
            }
        }

        let mut state = self.lock_state();
        state.deactivate();
        Err(Error::FailedPlay {
            attempted: state.attempted(),
        })
    }

    async fn prepare(&self, index: usize) -> Result<Arc<dyn AdViewer>> {
        let link = self
            .lock_state()
            .link(index)
            .map(str::to_owned)
            .ok_or(Error::AdBlockInactive)?;
        let load_error = |e: Error| Error::AdLoad {
            index,
            reason: e.to_string(),
        };

        self.transition(index, AdItemStatus::Initializing)?;
        let parameters = self
            .inner
            .settings
            .request
            .parameters_for(&link)
            .map_err(load_error)?;
        let loader = self
            .inner
            .sdk
            .create_loader(parameters)
            .await
            .map_err(load_error)?;
        self.transition(index, AdItemStatus::Initialized)?;

        let viewer = loader.load_ad().await.map_err(load_error)?;
        self.transition(index, AdItemStatus::Preloading)?;

        viewer
            .preload(&self.inner.settings.video)
            .await
            .map_err(|e| Error::AdPreload {
                index,
                reason: e.to_string(),
            })?;
        self.transition(index, AdItemStatus::Preloaded)?;

        Ok(viewer)
    }

    async fn play_candidate(&self, index: usize, prepared: Option<Prepared>) -> Result<()> {
        let preloaded = self.lock_state().status(index) == Some(AdItemStatus::Preloaded);
        let viewer = match prepared {
            Some(p) if preloaded => p.viewer,
            _ => self.prepare(index).await?,
        };

        let settings = &self.inner.settings;
        let mut controller =
            viewer.create_playback_controller(&settings.video, &settings.slot, &settings.controller);

        let (tx, mut rx) = mpsc::unbounded_channel();
        for kind in AdEventKind::ALL {
            let tx = tx.clone();
            controller.subscribe(
                kind,
                Box::new(move |event| {
                    let _ = tx.send(event);
                }),
            );
        }
        drop(tx);

        self.transition(index, AdItemStatus::Playing)?;
        controller.play_ad();

        while let Some(event) = rx.recv().await {
            match event {
                AdPlaybackEvent::Started => {
                    info!(index, "Ad started");
                    self.inner
                        .events
                        .emit(events::STARTED, &AdBlockEvent::Started { index });
                }
                AdPlaybackEvent::Stopped => return Ok(()),
                AdPlaybackEvent::PodError(reason) => {
                    return Err(Error::AdPlayback { index, reason });
                }
            }
        }

        Err(Error::AdPlayback {
            index,
            reason: "playback controller went away".into(),
        })
    }

    fn transition(&self, index: usize, target: AdItemStatus) -> Result<()> {
        self.lock_state().transition(index, target)
    }

    fn lock_state(&self) -> MutexGuard<'_, AdBlockState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::{AdOutcome, SimulatedSdk};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn links(ids: &[&str]) -> Vec<String> {
        ids.iter()
            .map(|id| format!("https://ads.example.com/?id={}", id))
            .collect()
    }

    fn block(sdk: &Arc<SimulatedSdk>, ids: &[&str]) -> AdBlock {
        AdBlock::new(links(ids), sdk.clone(), Arc::new(AdSettings::default()))
    }

    #[test]
    fn test_status_transitions() {
        use AdItemStatus::*;
        assert!(Uninitialized.can_transition_to(Initializing));
        assert!(Preloaded.can_transition_to(Playing));
        assert!(Preloading.can_transition_to(Error));
        assert!(!Uninitialized.can_transition_to(Playing));
        assert!(!FinishedSuccess.can_transition_to(Error));
        assert!(!Error.can_transition_to(Error));
    }

    #[test]
    fn test_one_candidate_in_flight() {
        let mut state = AdBlockState::new(links(&["a", "b"]));
        state.transition(0, AdItemStatus::Initializing).unwrap();
        assert!(state.transition(1, AdItemStatus::Initializing).is_err());

        assert!(state.fail(0));
        assert!(!state.fail(0));
        state.transition(1, AdItemStatus::Initializing).unwrap();
        assert_eq!(state.attempted(), 2);
    }

    #[test]
    fn test_pending_links_skip_spent_and_playing() {
        let mut state = AdBlockState::new(links(&["a", "b", "c"]));
        state.fail(0);
        for status in [
            AdItemStatus::Initializing,
            AdItemStatus::Initialized,
            AdItemStatus::Preloading,
            AdItemStatus::Preloaded,
            AdItemStatus::Playing,
        ] {
            state.transition(1, status).unwrap();
        }
        assert_eq!(state.pending_links(), links(&["c"]));
        assert_eq!(state.next_untried(), Some(2));
    }

    #[tokio::test]
    async fn test_first_candidate_plays() {
        let sdk = Arc::new(SimulatedSdk::new());
        let block = block(&sdk, &["a", "b"]);

        assert_eq!(block.play().await.unwrap(), 0);
        assert!(!block.is_active());
        let state = block.state();
        assert_eq!(state.status(0), Some(AdItemStatus::FinishedSuccess));
        assert_eq!(state.status(1), Some(AdItemStatus::Uninitialized));
        assert_eq!(sdk.calls(), vec!["load:a", "preload:a", "play:a"]);
    }

    #[tokio::test]
    async fn test_fallback_to_next_candidate() {
        let sdk = Arc::new(SimulatedSdk::new().with_outcome("a", AdOutcome::PodError));
        let block = block(&sdk, &["a", "b"]);

        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        block.on(events::STARTED, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(block.play().await.unwrap(), 1);
        assert_eq!(block.state().status(0), Some(AdItemStatus::Error));
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_candidates_fail() {
        let sdk = Arc::new(
            SimulatedSdk::new()
                .with_outcome("a", AdOutcome::LoadError)
                .with_outcome("b", AdOutcome::PreloadError),
        );
        let block = block(&sdk, &["a", "b"]);

        let err = block.play().await.unwrap_err();
        assert!(matches!(err, Error::FailedPlay { attempted: 2 }));
        assert_eq!(err.to_string(), "failed play: all 2 ad candidates exhausted");
        assert!(!block.is_active());
        assert!(matches!(block.play().await, Err(Error::AdBlockInactive)));
    }

    #[tokio::test]
    async fn test_preload_is_memoized() {
        let sdk = Arc::new(SimulatedSdk::new().with_outcome("a", AdOutcome::PreloadError));
        let block = block(&sdk, &["a", "b"]);

        assert_eq!(block.preload().await.unwrap(), 1);
        assert_eq!(block.preload().await.unwrap(), 1);
        assert_eq!(block.state().status(1), Some(AdItemStatus::Preloaded));

        assert_eq!(block.play().await.unwrap(), 1);
        let preloads = sdk.calls().iter().filter(|c| *c == "preload:b").count();
        assert_eq!(preloads, 1);
    }

    #[tokio::test]
    async fn test_preload_exhaustion() {
        let sdk = Arc::new(SimulatedSdk::new().with_outcome("a", AdOutcome::LoadError));
        let block = block(&sdk, &["a"]);
        assert!(matches!(
            block.preload().await,
            Err(Error::FailedPreload { attempted: 1 })
        ));
        assert!(!block.is_active());
    }

    #[tokio::test]
    async fn test_empty_block_fails_play() {
        let sdk = Arc::new(SimulatedSdk::new());
        let block = block(&sdk, &[]);
        assert!(matches!(block.play().await, Err(Error::FailedPlay { attempted: 0 })));
    }
}
