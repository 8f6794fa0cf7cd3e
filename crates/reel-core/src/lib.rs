//! Reel Core - Player shell library for Reel
//!
//! This crate provides the logic a browser video player wraps around its
//! video engine:
//! - Capability-driven stream selection with fallback
//! - DRM license adapters (Widevine, PlayReady, FairPlay)
//! - Ad-break scheduling and the ad block state machine
//! - A publish/subscribe mediator for cross-cutting events
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Reel Core                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │ Capabilities │  │    Stream    │  │     DRM      │           │
//! │  │    Probe     │─▶│   Selector   │─▶│   Adapters   │           │
//! │  └──────────────┘  └──────┬───────┘  └──────────────┘           │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │  Playback   │                              │
//! │                    │   Session   │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐            │
//! │  │   Mediator   │  │   Player    │  │     Ad       │            │
//! │  │  (events)    │  │   Façade    │◀─│  Scheduler   │            │
//! │  └──────────────┘  └─────────────┘  └──────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod ads;
pub mod capabilities;
pub mod drm;
pub mod error;
pub mod mediator;
pub mod player;
pub mod playlist;
pub mod session;
pub mod simulate;
pub mod stream;
pub mod types;

pub use ads::{AdSchedule, AdScheduler, AdSdk, AdSettings, AdTimings, BreakReport};
pub use capabilities::{detect_capabilities, CapabilityProbe, CapabilitySet, StaticProbe};
pub use drm::{FairPlayAdapter, KeySystemAdapter, KeySystems, LicenseRequest, PlayReadyAdapter, WidevineAdapter};
pub use error::{Error, Result};
pub use mediator::{Mediator, Subscription};
pub use player::{Player, PlayerFacade, PlayerOptions, VideoEngine};
pub use playlist::PlayerDocument;
pub use session::PlaybackSession;
pub use stream::{PlaybackSource, StreamSelector};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the player library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "Reel Core initialized");
}
