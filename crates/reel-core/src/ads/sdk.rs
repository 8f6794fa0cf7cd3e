//! Ad SDK abstraction
//!
//! The external ad SDK is reached through a short chain of handles:
//!
//! ```text
//! AdSdk::load ─▶ AdSdk::create_loader(params) ─▶ AdLoader::load_ad
//!                                                      │
//!                                                      ▼
//!                      AdViewer::preload(video) / create_playback_controller
//!                                                      │
//!                                                      ▼
//!                   AdPlaybackController::subscribe(..) + play_ad()
//! ```
//!
//! Implementations wrap whatever runtime hosts the SDK. The scheduler and
//! ad blocks only talk to these traits.

use crate::ads::params::AdFoxParameters;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Handle to the primary video element the ad renders over
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoSlot(pub String);

impl Default for VideoSlot {
    fn default() -> Self {
        Self("video-player".to_string())
    }
}

/// Handle to the overlay container the SDK draws its controls into
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdSlot(pub String);

impl Default for AdSlot {
    fn default() -> Self {
        Self("adv-controls".to_string())
    }
}

/// Options passed when creating a playback controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackControllerOptions {
    pub video_timeout: u64,
    pub vpaid_timeout: u64,
    pub buffer_full_timeout: u64,
    pub controls_settings: ControlsSettings,
}

impl Default for PlaybackControllerOptions {
    fn default() -> Self {
        Self {
            video_timeout: 5_000,
            vpaid_timeout: 5_000,
            buffer_full_timeout: 30_000,
            controls_settings: ControlsSettings::default(),
        }
    }
}

/// Controller UI settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlsSettings {
    pub controls_visibility: ControlsVisibility,
}

/// SDK-drawn controls; the player draws its own, so all are off by default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlsVisibility {
    pub mute: bool,
    pub skip: bool,
    pub title: bool,
    pub ad_label: bool,
    pub timeline: bool,
}

/// Playback events a controller reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdEventKind {
    AdPodError,
    AdStarted,
    AdStopped,
}

impl AdEventKind {
    pub const ALL: [AdEventKind; 3] = [
        AdEventKind::AdPodError,
        AdEventKind::AdStarted,
        AdEventKind::AdStopped,
    ];

    /// Event name used by the SDK
    pub fn as_str(&self) -> &'static str {
        match self {
            AdEventKind::AdPodError => "AdPodError",
            AdEventKind::AdStarted => "AdStarted",
            AdEventKind::AdStopped => "AdStopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdPlaybackEvent {
    PodError(String),
    Started,
    Stopped,
}

impl AdPlaybackEvent {
    pub fn kind(&self) -> AdEventKind {
        match self {
            AdPlaybackEvent::PodError(_) => AdEventKind::AdPodError,
            AdPlaybackEvent::Started => AdEventKind::AdStarted,
            AdPlaybackEvent::Stopped => AdEventKind::AdStopped,
        }
    }
}

pub type AdEventCallback = Box<dyn Fn(AdPlaybackEvent) + Send + Sync>;

/// Entry point into the ad SDK
#[async_trait]
pub trait AdSdk: Send + Sync {
    /// Load the SDK. Callers memoize success; a failed load may be retried.
    async fn load(&self) -> Result<()>;

    /// Create a loader for one candidate
    async fn create_loader(&self, parameters: AdFoxParameters) -> Result<Box<dyn AdLoader>>;
}

#[async_trait]
pub trait AdLoader: Send + Sync {
    /// Request the creative, returning a viewer for it
    async fn load_ad(&self) -> Result<Arc<dyn AdViewer>>;
}

#[async_trait]
pub trait AdViewer: Send + Sync {
    /// Buffer the creative into the video slot
    async fn preload(&self, video: &VideoSlot) -> Result<()>;

    fn create_playback_controller(
        &self,
        video: &VideoSlot,
        slot: &AdSlot,
        options: &PlaybackControllerOptions,
    ) -> Box<dyn AdPlaybackController>;
}

/// Drives playback of one preloaded creative
pub trait AdPlaybackController: Send {
    fn subscribe(&mut self, event: AdEventKind, callback: AdEventCallback);

    /// Start playback; progress is reported through subscribed callbacks
    fn play_ad(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_options_shape() {
        let json = serde_json::to_value(PlaybackControllerOptions::default()).unwrap();
        assert_eq!(json["videoTimeout"], 5000);
        assert_eq!(json["bufferFullTimeout"], 30000);
        assert_eq!(
            json["controlsSettings"],
            serde_json::json!({
                "controlsVisibility": {
                    "mute": false,
                    "skip": false,
                    "title": false,
                    "adLabel": false,
                    "timeline": false
                }
            })
        );
    }

    #[test]
    fn test_event_kinds() {
        assert_eq!(AdPlaybackEvent::Stopped.kind(), AdEventKind::AdStopped);
        assert_eq!(AdEventKind::AdPodError.as_str(), "AdPodError");
    }
}
