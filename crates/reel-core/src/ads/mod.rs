//! Ad-break orchestration
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      AdScheduler                         │
//! │   tick(now) ─▶ evict ─▶ pre-cache ─▶ start break         │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌──────────────────┐  │
//! │  │ AdSchedule │   │  AdCache   │   │  PlayerFacade    │  │
//! │  │  (config)  │   │ (blocks)   │   │ (video slot)     │  │
//! │  └────────────┘   └─────┬──────┘   └──────────────────┘  │
//! │                         │                                │
//! │                  ┌──────┴──────┐                         │
//! │                  │   AdBlock   │── candidates ─▶ AdSdk   │
//! │                  └─────────────┘                         │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod block;
pub mod cache;
pub mod config;
pub mod params;
pub mod scheduler;
pub mod sdk;

pub use block::{AdBlock, AdBlockEvent, AdBlockState, AdItem, AdItemStatus};
pub use cache::{AdCache, CacheKey};
pub use config::{AdConfig, AdPoint, AdSchedule, AdTimings};
pub use params::{AdFoxParameters, AdRequestContext, DeviceClass};
pub use scheduler::{AdScheduler, AdSettings, BreakReport, TickOutcome};
pub use sdk::{
    AdEventCallback, AdEventKind, AdLoader, AdPlaybackController, AdPlaybackEvent, AdSdk, AdSlot,
    AdViewer, ControlsSettings, ControlsVisibility, PlaybackControllerOptions, VideoSlot,
};
