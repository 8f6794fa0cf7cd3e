//! Capability registry
//!
//! Detects which playback and DRM capabilities the runtime supports and
//! reduces them to a set of lower-case tokens:
//!
//! | token       | source                                              |
//! |-------------|-----------------------------------------------------|
//! | `hls`       | MSE H.264/AAC support or native HLS playback        |
//! | `dash`      | Media Source available                              |
//! | `mss`       | Media Source available                              |
//! | `widevine`  | `com.widevine.alpha` key-system access              |
//! | `fairplay`  | any `com.apple.fps*` key-system access              |
//! | `playready` | `com.microsoft.playready` key-system access         |

use crate::types::key_systems;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Set of lower-case capability tokens. Computed once per session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<String>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token (stored lower-cased)
    pub fn insert(&mut self, token: impl AsRef<str>) {
        self.0.insert(token.as_ref().to_ascii_lowercase());
    }

    /// Check a token, ignoring case
    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(&token.to_ascii_lowercase())
    }

    /// True when every token is present
    pub fn contains_all<'a>(&self, tokens: impl IntoIterator<Item = &'a str>) -> bool {
        tokens.into_iter().all(|t| self.contains(t))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = CapabilitySet::new();
        for token in iter {
            set.insert(token);
        }
        set
    }
}

/// Runtime probe queried by [`detect_capabilities`]
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// Media Source Extensions (or a vendor-prefixed variant) are available
    fn media_source_supported(&self) -> bool;

    /// MSE accepts `video/mp4; codecs="avc1.42E01E,mp4a.40.2"` with a usable
    /// source buffer, or the element plays HLS natively
    fn hls_supported(&self) -> bool;

    /// A media-key session can be created for the key system with the
    /// `cenc` / H.264 / AAC configuration
    async fn key_system_supported(&self, key_system: &str) -> bool;
}

/// Query the probe and build the capability set
pub async fn detect_capabilities(probe: &dyn CapabilityProbe) -> CapabilitySet {
    let widevine = probe.key_system_supported(key_systems::WIDEVINE).await;

    let mut fairplay = false;
    for key_system in [
        key_systems::FAIRPLAY,
        key_systems::FAIRPLAY_1_0,
        key_systems::FAIRPLAY_2_0,
        key_systems::FAIRPLAY_3_0,
    ] {
        let supported = probe.key_system_supported(key_system).await;
        debug!(key_system, supported, "FairPlay key system probed");
        fairplay |= supported;
    }

    let playready = probe.key_system_supported(key_systems::PLAYREADY).await;
    let media_source = probe.media_source_supported();

    let flags = [
        ("hls", probe.hls_supported()),
        ("dash", media_source),
        ("mss", media_source),
        ("widevine", widevine),
        ("fairplay", fairplay),
        ("playready", playready),
    ];

    let capabilities: CapabilitySet = flags
        .iter()
        .filter(|(_, supported)| *supported)
        .map(|(token, _)| *token)
        .collect();

    info!(capabilities = ?capabilities.iter().collect::<Vec<_>>(), "Capabilities detected");
    capabilities
}

/// Probe with fixed answers, for headless use and tests
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    pub media_source: bool,
    pub hls: bool,
    pub key_systems: BTreeSet<String>,
}

impl StaticProbe {
    pub fn with_key_system(mut self, key_system: &str) -> Self {
        self.key_systems.insert(key_system.to_string());
        self
    }
}

#[async_trait]
impl CapabilityProbe for StaticProbe {
    fn media_source_supported(&self) -> bool {
        self.media_source
    }

    fn hls_supported(&self) -> bool {
        self.hls
    }

    async fn key_system_supported(&self, key_system: &str) -> bool {
        self.key_systems.contains(key_system)
    }
}
