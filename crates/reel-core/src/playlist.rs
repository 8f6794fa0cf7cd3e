//! Player document: configuration, feature flags and playlist
//!
//! ```json
//! {
//!   "config": {
//!     "ad": { "mid_roll": { "items": [{ "item": "https://..." }], "params": { "limiter": 2 } } },
//!     "skin_data": { "base": { "ADV_CACHE_LOOKAHEAD": "10000" } }
//!   },
//!   "playlist": {
//!     "items": [{
//!       "streams": [{ "protocol": "DASH", "drm_type": "widevine", "url": "...", "ls_url": "..." }],
//!       "midrolls": { "points": [{ "point": 300 }] },
//!       "contentrolls": { "points": [{ "point": 900, "placeholders": [] }] },
//!       "prerolls": { "points": { "point": 0 } }
//!     }]
//!   }
//! }
//! ```

use crate::ads::config::RawAdCategory;
use crate::error::{Error, Result};
use crate::types::Stream;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level player document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerDocument {
    #[serde(default)]
    pub config: PlayerSettings,
    #[serde(default)]
    pub playlist: Playlist,
}

impl PlayerDocument {
    /// Parse a document. Accepts either the bare document or one wrapped in
    /// a `data` envelope.
    pub fn from_json(json: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Envelope {
            data: PlayerDocument,
        }

        let value: serde_json::Value = serde_json::from_str(json)?;
        if value.get("data").is_some() && value.get("playlist").is_none() {
            let envelope: Envelope = serde_json::from_value(value)?;
            return Ok(envelope.data);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Load a document from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// First playlist item; the player only plays one
    pub fn current_item(&self) -> Result<&PlaylistItem> {
        self.playlist
            .items
            .first()
            .ok_or_else(|| Error::InvalidConfig("playlist has no items".into()))
    }

    /// Feature flags from `skin_data.base`
    pub fn features(&self) -> &Features {
        &self.config.skin_data.base
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerSettings {
    /// Ad configuration keyed by category name
    #[serde(default)]
    pub ad: BTreeMap<String, RawAdCategory>,
    #[serde(default)]
    pub skin_data: SkinData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkinData {
    #[serde(default)]
    pub base: Features,
}

/// Feature flags. Values arrive as numbers or numeric strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Features(BTreeMap<String, serde_json::Value>);

impl Features {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Raw value, with numeric strings coerced to numbers
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.0.get(key).map(coerce_numeric)
    }

    /// Non-negative integer flag
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.as_u64())
    }
}

fn coerce_numeric(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => parse_number(s.trim()).unwrap_or_else(|| value.clone()),
        other => other.clone(),
    }
}

fn parse_number(s: &str) -> Option<serde_json::Value> {
    if let Ok(n) = s.parse::<u64>() {
        return Some(n.into());
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(n.into());
    }
    s.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Playlist {
    #[serde(default)]
    pub items: Vec<PlaylistItem>,
}

/// One playable item: candidate streams plus declared ad break points
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistItem {
    #[serde(default)]
    pub streams: Vec<Stream>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midrolls: Option<BreakPoints<Vec<RawPoint>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contentrolls: Option<BreakPoints<Vec<RawPoint>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prerolls: Option<BreakPoints<RawPoint>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakPoints<T> {
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub points: Option<T>,
}

/// Declared break point, in seconds from the start of the content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPoint {
    #[serde(deserialize_with = "lenient_f64")]
    pub point: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholders: Option<serde_json::Value>,
}

/// Accept a number or a numeric string
pub(crate) fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    coerce_numeric(&value)
        .as_f64()
        .ok_or_else(|| serde::de::Error::custom(format!("expected a number, got {}", value)))
}

/// Accept a non-negative integer or a numeric string
pub(crate) fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u32, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    coerce_numeric(&value)
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| serde::de::Error::custom(format!("expected a non-negative integer, got {}", value)))
}
