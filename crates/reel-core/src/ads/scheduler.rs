//! Ad break scheduler
//!
//! Driven by the content's time updates. Each [`tick`](AdScheduler::tick):
//!
//! 1. evicts cached blocks whose point is more than the timeline offset
//!    behind the playhead,
//! 2. pre-creates and preloads a block for the nearest point inside the
//!    cache lookahead,
//! 3. starts a break for a point the playhead has just reached.
//!
//! A break hands the video slot to the ad SDK, plays up to `limit` blocks
//! from the category's links, then gives the slot back to the content.
//! Ticks are suspended for the duration of a break.

use crate::ads::block::{AdBlock, AdBlockEvent};
use crate::ads::cache::{AdCache, CacheKey};
use crate::ads::config::{AdConfig, AdPoint, AdSchedule, AdTimings};
use crate::ads::params::AdRequestContext;
use crate::ads::sdk::{AdSdk, AdSlot, PlaybackControllerOptions, VideoSlot};
use crate::error::{Error, Result};
use crate::mediator::{events, Subscription};
use crate::player::PlayerFacade;
use crate::playlist::Features;
use crate::types::AdCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Everything an ad block needs besides its links
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdSettings {
    #[serde(default)]
    pub timings: AdTimings,
    #[serde(default)]
    pub video: VideoSlot,
    #[serde(default)]
    pub slot: AdSlot,
    #[serde(default)]
    pub request: AdRequestContext,
    #[serde(default)]
    pub controller: PlaybackControllerOptions,
}

impl AdSettings {
    pub fn from_features(features: &Features) -> Self {
        Self {
            timings: AdTimings::from_features(features),
            ..Default::default()
        }
    }
}

/// What one break did
#[derive(Debug, Clone, Serialize)]
pub struct BreakReport {
    pub point: AdPoint,
    /// Blocks created for the break
    pub attempts: u32,
    /// Blocks that played a creative to the end
    pub played: u32,
    /// Content got the video slot back
    pub resumed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BreakReport {
    pub fn filled(&self) -> bool {
        self.played > 0
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickOutcome {
    /// Nothing was done: the SDK is not loaded, a break is running, or the
    /// scheduler was shut down
    pub suspended: bool,
    pub evicted: usize,
    pub precached: Option<AdPoint>,
    pub started: Option<AdPoint>,
}

struct SchedulerInner {
    schedule: AdSchedule,
    settings: Arc<AdSettings>,
    sdk: Arc<dyn AdSdk>,
    player: Arc<dyn PlayerFacade>,
    cache: Mutex<AdCache>,
    started: Mutex<HashSet<(Duration, AdCategory)>>,
    /// Set while a break owns the video slot
    stop_tick: AtomicBool,
    halted: AtomicBool,
    loaded: OnceCell<()>,
    current: Mutex<Option<JoinHandle<BreakReport>>>,
}

/// Ad scheduler handle. Clones share state.
#[derive(Clone)]
pub struct AdScheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for AdScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdScheduler")
            .field("points", &self.inner.schedule.ad_points.len())
            .field("loaded", &self.is_loaded())
            .field("break_active", &self.is_break_active())
            .finish()
    }
}

impl AdScheduler {
    pub fn new(
        schedule: AdSchedule,
        settings: AdSettings,
        sdk: Arc<dyn AdSdk>,
        player: Arc<dyn PlayerFacade>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                schedule,
                settings: Arc::new(settings),
                sdk,
                player,
                cache: Mutex::new(AdCache::new()),
                started: Mutex::new(HashSet::new()),
                stop_tick: AtomicBool::new(false),
                halted: AtomicBool::new(false),
                loaded: OnceCell::new(),
                current: Mutex::new(None),
            }),
        }
    }

    pub fn schedule(&self) -> &AdSchedule {
        &self.inner.schedule
    }

    pub fn settings(&self) -> &AdSettings {
        &self.inner.settings
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.initialized()
    }

    pub fn is_break_active(&self) -> bool {
        self.inner.stop_tick.load(Ordering::SeqCst)
    }

    /// Keys of the blocks currently cached
    pub fn cached_keys(&self) -> Vec<CacheKey> {
        self.cache().keys().copied().collect()
    }

    /// Load the ad SDK and, if a pre-roll is configured, play it.
    ///
    /// A failed SDK load is not memoized; calling again retries it.
    #[instrument(skip(self))]
    pub async fn activate(&self) -> Result<Option<BreakReport>> {
        self.inner.settings.timings.validate()?;

        let sdk = Arc::clone(&self.inner.sdk);
        self.inner
            .loaded
            .get_or_try_init(|| async move { sdk.load().await })
            .await
            .map_err(|e| match e {
                Error::AdSdkUnavailable(_) => e,
                other => Error::AdSdkUnavailable(other.to_string()),
            })?;
        info!("Ad SDK loaded");

        if !self.inner.schedule.has_preroll() {
            return Ok(None);
        }
        match self.start_break(AdPoint::preroll()).await {
            Ok(report) => Ok(Some(report)),
            Err(Error::BreakInProgress) => {
                debug!("Pre-roll already started by the timeline");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Advance the scheduler to playhead position `now`.
    ///
    /// Preloads and breaks run on spawned tasks, so this must be called from
    /// within a Tokio runtime.
    pub fn tick(&self, now: Duration) -> TickOutcome {
        let inner = &self.inner;
        if !self.is_loaded() || inner.halted.load(Ordering::SeqCst) || self.is_break_active() {
            return TickOutcome {
                suspended: true,
                ..Default::default()
            };
        }

        let timings = &inner.settings.timings;
        let mut outcome = TickOutcome {
            evicted: self.cache().evict(now, timings.max_timeline_offset()),
            ..Default::default()
        };

        if let Some(point) = inner.schedule.upcoming(now, timings.cache_lookahead()) {
            if let Some(block) = self.precache(point) {
                debug!(point = point.seconds(), category = %point.category, "Pre-caching ad block");
                self.spawn_preload(CacheKey::new(point.offset, point.category, 0), block);
                outcome.precached = Some(point.clone());
            }
        }

        let due = inner
            .schedule
            .due(now, timings.max_timeline_offset())
            .find(|p| !self.was_started(p) && self.has_links(p.category))
            .cloned();
        if let Some(point) = due {
            if self.claim_break() {
                let scheduler = self.clone();
                let task_point = point.clone();
                let handle = tokio::spawn(async move { scheduler.run_break(task_point).await });
                *self.current() = Some(handle);
                outcome.started = Some(point);
            }
        }

        outcome
    }

    /// Run a break now. Fails with [`Error::BreakInProgress`] if one is
    /// already running.
    pub async fn start_break(&self, point: AdPoint) -> Result<BreakReport> {
        if !self.claim_break() {
            return Err(Error::BreakInProgress);
        }
        Ok(self.run_break(point).await)
    }

    /// Wait for the break most recently started by [`tick`](Self::tick)
    pub async fn wait_for_break(&self) -> Option<BreakReport> {
        let handle = self.current().take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Ad break task failed");
                None
            }
        }
    }

    /// Stop scheduling. Cached blocks are dropped; a running break is left
    /// to finish.
    pub fn shutdown(&self) {
        self.inner.halted.store(true, Ordering::SeqCst);
        self.cache().clear();
        info!("Ad scheduler stopped");
    }

    #[instrument(skip(self, point), fields(point = point.seconds(), category = %point.category))]
    async fn run_break(&self, point: AdPoint) -> BreakReport {
        let inner = &self.inner;
        self.started().insert((point.offset, point.category));

        let started_at = Utc::now();
        let mut report = BreakReport {
            point: point.clone(),
            attempts: 0,
            played: 0,
            resumed: false,
            started_at,
            finished_at: started_at,
        };

        info!("Ad break starting");
        match inner.player.initialize_advertisement().await {
            Ok(()) => self.play_blocks(&point, &mut report).await,
            Err(e) => warn!(error = %e, "Could not hand the video slot to ads"),
        }

        match inner.player.resume_plain_video().await {
            Ok(()) => report.resumed = true,
            Err(e) => warn!(error = %e, "Could not resume content after ad break"),
        }

        inner.stop_tick.store(false, Ordering::SeqCst);
        report.finished_at = Utc::now();
        info!(
            played = report.played,
            attempts = report.attempts,
            "Ad break finished"
        );
        report
    }

    async fn play_blocks(&self, point: &AdPoint, report: &mut BreakReport) {
        let Some(mut config) = self.inner.schedule.config(point.category).cloned() else {
            warn!("No ad configuration for category");
            return;
        };

        for index in 0..config.limit {
            if config.links.is_empty() {
                debug!(index, "No ad links left");
                break;
            }

            let key = CacheKey::new(point.offset, point.category, index);
            let block = self
                .take_cached(&key, &config.links)
                .unwrap_or_else(|| self.new_block(config.links.clone()));
            report.attempts += 1;

            let prefetch = (index + 1 < config.limit).then(|| self.prefetch_on_start(&block, &config, key));

            match block.play().await {
                Ok(candidate) => {
                    report.played += 1;
                    debug!(index, candidate, "Ad block played");
                }
                Err(e) => warn!(index, error = %e, "Ad block failed"),
            }

            if let Some(subscription) = prefetch {
                subscription.unsubscribe();
            }
            config = config.without_spent(&block.state());
        }
    }

    /// When the block starts a creative, build and preload the block for the
    /// next attempt from the links that are still unspent.
    fn prefetch_on_start(
        &self,
        block: &AdBlock,
        config: &AdConfig,
        key: CacheKey,
    ) -> Subscription<AdBlockEvent> {
        let scheduler = self.clone();
        let source = block.clone();
        let config = config.clone();
        let next_key = CacheKey {
            index: key.index + 1,
            ..key
        };

        block.on(events::STARTED, move |_| {
            let next = config.without_spent(&source.state());
            if next.links.is_empty() {
                return;
            }
            let block = scheduler.new_block(next.links);
            if let Some(replaced) = scheduler.cache().insert(next_key, block.clone()) {
                replaced.deactivate();
            }
            scheduler.spawn_preload(next_key, block);
        })
    }

    /// Cached block for `key`, unless it was built from other links
    fn take_cached(&self, key: &CacheKey, links: &[String]) -> Option<AdBlock> {
        let block = self.cache().take(key)?;
        if block.links() != links || !block.is_active() {
            debug!(key = %key, "Discarding stale cached ad block");
            block.deactivate();
            return None;
        }
        Some(block)
    }

    fn precache(&self, point: &AdPoint) -> Option<AdBlock> {
        if self.was_started(point) {
            return None;
        }
        let config = self.inner.schedule.config(point.category)?;
        if config.links.is_empty() {
            return None;
        }

        let mut cache = self.cache();
        if cache.contains_point(point.offset, point.category) {
            return None;
        }
        let block = self.new_block(config.links.clone());
        cache.insert(CacheKey::new(point.offset, point.category, 0), block.clone());
        Some(block)
    }

    fn spawn_preload(&self, key: CacheKey, block: AdBlock) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            match block.preload().await {
                Ok(index) if scheduler.cache().holds(&key, &block) => {
                    debug!(key = %key, index, "Ad block ready");
                }
                Ok(_) => debug!(key = %key, "Preloaded ad block is no longer cached"),
                Err(e) => warn!(key = %key, error = %e, "Ad block preload failed"),
            }
        });
    }

    fn new_block(&self, links: Vec<String>) -> AdBlock {
        AdBlock::new(links, Arc::clone(&self.inner.sdk), Arc::clone(&self.inner.settings))
    }

    fn claim_break(&self) -> bool {
        self.inner
            .stop_tick
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn has_links(&self, category: AdCategory) -> bool {
        self.inner
            .schedule
            .config(category)
            .is_some_and(|c| !c.links.is_empty())
    }

    fn was_started(&self, point: &AdPoint) -> bool {
        self.started().contains(&(point.offset, point.category))
    }

    fn cache(&self) -> MutexGuard<'_, AdCache> {
        self.inner
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn started(&self) -> MutexGuard<'_, HashSet<(Duration, AdCategory)>> {
        self.inner
            .started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current(&self) -> MutexGuard<'_, Option<JoinHandle<BreakReport>>> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
