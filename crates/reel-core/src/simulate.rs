//! Scripted stand-ins for the ad SDK and the video engine
//!
//! Used for dry runs of a player document and in tests. Candidates are
//! identified by the `id` query parameter of their ad link; every candidate
//! plays successfully unless scripted otherwise.

use crate::ads::params::AdFoxParameters;
use crate::ads::sdk::{
    AdEventCallback, AdEventKind, AdLoader, AdPlaybackController, AdPlaybackEvent, AdSdk, AdSlot,
    AdViewer, PlaybackControllerOptions, VideoSlot,
};
use crate::error::{Error, Result};
use crate::player::VideoEngine;
use crate::stream::PlaybackSource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Query parameter naming a candidate
pub const LABEL_PARAM: &str = "id";

/// Scripted result for one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdOutcome {
    #[default]
    Play,
    LoadError,
    PreloadError,
    PodError,
    StartThenPodError,
}

type CallLog = Arc<Mutex<Vec<String>>>;

fn record(log: &CallLog, entry: String) {
    log.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .push(entry);
}

#[derive(Debug, Default)]
pub struct SimulatedSdk {
    outcomes: HashMap<String, AdOutcome>,
    failing_loads: AtomicUsize,
    loads: AtomicUsize,
    calls: CallLog,
}

impl SimulatedSdk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(mut self, label: impl Into<String>, outcome: AdOutcome) -> Self {
        self.outcomes.insert(label.into(), outcome);
        self
    }

    /// Fail the first `count` SDK loads
    pub fn failing_loads(self, count: usize) -> Self {
        self.failing_loads.store(count, Ordering::SeqCst);
        self
    }

    /// Calls made so far, e.g. `load:a`, `preload:a`, `play:a`
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdSdk for SimulatedSdk {
    async fn load(&self) -> Result<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_loads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_loads.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::AdSdkUnavailable("simulated load failure".into()));
        }
        Ok(())
    }

    async fn create_loader(&self, parameters: AdFoxParameters) -> Result<Box<dyn AdLoader>> {
        let label = parameters
            .params
            .get(LABEL_PARAM)
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        let outcome = self.outcomes.get(&label).copied().unwrap_or_default();
        Ok(Box::new(SimulatedAd {
            label,
            outcome,
            calls: Arc::clone(&self.calls),
        }))
    }
}

#[derive(Clone)]
struct SimulatedAd {
    label: String,
    outcome: AdOutcome,
    calls: CallLog,
}

#[async_trait]
impl AdLoader for SimulatedAd {
    async fn load_ad(&self) -> Result<Arc<dyn AdViewer>> {
        record(&self.calls, format!("load:{}", self.label));
        if self.outcome == AdOutcome::LoadError {
            return Err(Error::AdSdkUnavailable(format!("no creative for {}", self.label)));
        }
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl AdViewer for SimulatedAd {
    async fn preload(&self, _video: &VideoSlot) -> Result<()> {
        record(&self.calls, format!("preload:{}", self.label));
        if self.outcome == AdOutcome::PreloadError {
            return Err(Error::AdSdkUnavailable(format!("{} failed to buffer", self.label)));
        }
        Ok(())
    }

    fn create_playback_controller(
        &self,
        _video: &VideoSlot,
        _slot: &AdSlot,
        _options: &PlaybackControllerOptions,
    ) -> Box<dyn AdPlaybackController> {
        Box::new(SimulatedController {
            ad: self.clone(),
            callbacks: HashMap::new(),
        })
    }
}

struct SimulatedController {
    ad: SimulatedAd,
    callbacks: HashMap<AdEventKind, Vec<AdEventCallback>>,
}

impl SimulatedController {
    fn fire(&self, event: AdPlaybackEvent) {
        for callback in self.callbacks.get(&event.kind()).into_iter().flatten() {
            callback(event.clone());
        }
    }
}

impl AdPlaybackController for SimulatedController {
    fn subscribe(&mut self, event: AdEventKind, callback: AdEventCallback) {
        self.callbacks.entry(event).or_default().push(callback);
    }

    fn play_ad(&mut self) {
        record(&self.ad.calls, format!("play:{}", self.ad.label));
        let error = || AdPlaybackEvent::PodError(format!("{} pod error", self.ad.label));
        match self.ad.outcome {
            AdOutcome::PodError => self.fire(error()),
            AdOutcome::StartThenPodError => {
                self.fire(AdPlaybackEvent::Started);
                self.fire(error());
            }
            _ => {
                self.fire(AdPlaybackEvent::Started);
                self.fire(AdPlaybackEvent::Stopped);
            }
        }
    }
}

#[derive(Debug, Default)]
struct EngineState {
    source: Option<String>,
    paused: bool,
    muted: bool,
    time: f64,
    refuse_unmuted: bool,
    refuse_muted: bool,
    log: Vec<String>,
}

/// In-memory video engine
#[derive(Debug)]
pub struct SimulatedEngine {
    state: Mutex<EngineState>,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState {
                paused: true,
                ..Default::default()
            }),
        }
    }

    /// Refuse playback with sound, as browsers do without a user gesture
    pub fn blocking_unmuted_autoplay(self) -> Self {
        self.lock().refuse_unmuted = true;
        self
    }

    pub fn blocking_all_autoplay(self) -> Self {
        {
            let mut state = self.lock();
            state.refuse_unmuted = true;
            state.refuse_muted = true;
        }
        self
    }

    /// Move the playhead, as if content had played
    pub fn set_time(&self, seconds: f64) {
        self.lock().time = seconds;
    }

    pub fn source(&self) -> Option<String> {
        self.lock().source.clone()
    }

    pub fn is_muted(&self) -> bool {
        self.lock().muted
    }

    /// Engine calls so far
    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl VideoEngine for SimulatedEngine {
    async fn set_source(&self, source: &PlaybackSource) -> Result<()> {
        let mut state = self.lock();
        state.log.push(format!("set_source:{}", source.src));
        state.source = Some(source.src.clone());
        state.time = 0.0;
        state.paused = true;
        Ok(())
    }

    async fn wait_for_metadata(&self) -> Result<()> {
        Ok(())
    }

    async fn play(&self, muted: bool) -> Result<()> {
        let mut state = self.lock();
        state.log.push(format!("play:muted={}", muted));
        let refused = if muted { state.refuse_muted } else { state.refuse_unmuted };
        if refused {
            return Err(Error::player("play() was rejected"));
        }
        state.muted = muted;
        state.paused = false;
        Ok(())
    }

    fn pause(&self) {
        let mut state = self.lock();
        state.log.push("pause".to_string());
        state.paused = true;
    }

    fn is_paused(&self) -> bool {
        self.lock().paused
    }

    fn current_time(&self) -> f64 {
        self.lock().time
    }

    fn seek(&self, seconds: f64) {
        let mut state = self.lock();
        state.log.push(format!("seek:{}", seconds));
        state.time = seconds;
    }
}
