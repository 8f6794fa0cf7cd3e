//! Ad configuration parsing
//!
//! Turns the document's per-category ad configuration and the playlist's
//! declared break points into an [`AdSchedule`].

use crate::ads::block::AdBlockState;
use crate::error::{Error, Result};
use crate::playlist::{lenient_u32, Features, PlayerDocument, PlaylistItem, RawPoint};
use crate::types::AdCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Category configuration as it appears in the document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAdCategory {
    #[serde(default)]
    pub items: Vec<RawAdItem>,
    #[serde(default)]
    pub params: RawAdParams,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAdItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAdParams {
    #[serde(default = "default_limiter", deserialize_with = "lenient_u32")]
    pub limiter: u32,
}

impl Default for RawAdParams {
    fn default() -> Self {
        Self {
            limiter: default_limiter(),
        }
    }
}

fn default_limiter() -> u32 {
    1
}

/// Candidate links for one category and the number of ad-block attempts a
/// break may make
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdConfig {
    pub links: Vec<String>,
    pub limit: u32,
}

impl AdConfig {
    pub fn new(links: Vec<String>, limit: u32) -> Self {
        Self { links, limit }
    }

    /// Copy without the links the given block has used up. The block must
    /// have been built from this configuration.
    pub fn without_spent(&self, block: &AdBlockState) -> AdConfig {
        AdConfig {
            links: block.pending_links(),
            limit: self.limit,
        }
    }
}

impl From<&RawAdCategory> for AdConfig {
    fn from(raw: &RawAdCategory) -> Self {
        AdConfig {
            links: raw.items.iter().filter_map(|i| i.item.clone()).collect(),
            limit: raw.params.limiter,
        }
    }
}

/// A break point on the content timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdPoint {
    /// Offset from the start of the content
    pub offset: Duration,
    pub category: AdCategory,
    /// Content-roll placeholders, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholders: Option<serde_json::Value>,
}

impl AdPoint {
    pub fn new(offset: Duration, category: AdCategory) -> Self {
        Self {
            offset,
            category,
            placeholders: None,
        }
    }

    /// Break played as soon as the ad SDK is ready
    pub fn preroll() -> Self {
        Self::new(Duration::ZERO, AdCategory::PreRoll)
    }

    pub fn seconds(&self) -> f64 {
        self.offset.as_secs_f64()
    }

    fn from_raw(raw: &RawPoint, category: AdCategory) -> Option<Self> {
        let Ok(offset) = Duration::try_from_secs_f64(raw.point) else {
            warn!(point = raw.point, category = %category, "Ignoring invalid ad point");
            return None;
        };
        Some(Self {
            offset,
            category,
            placeholders: raw.placeholders.clone(),
        })
    }
}

/// Parsed ad configuration and break points
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdSchedule {
    pub ad_config: BTreeMap<AdCategory, AdConfig>,
    /// Break points ordered by offset
    pub ad_points: Vec<AdPoint>,
}

impl AdSchedule {
    /// Build the schedule from a player document
    pub fn from_document(document: &PlayerDocument) -> Result<Self> {
        Ok(Self::build(&document.config.ad, document.playlist.items.first()))
    }

    /// Build from raw category configuration and the playlist item that
    /// declares the break points. Unknown category names are skipped.
    pub fn build(ad: &BTreeMap<String, RawAdCategory>, item: Option<&PlaylistItem>) -> Self {
        let mut ad_config = BTreeMap::new();
        for (name, raw) in ad {
            match name.parse::<AdCategory>() {
                Ok(category) => {
                    ad_config.insert(category, AdConfig::from(raw));
                }
                Err(_) => warn!(category = %name, "Ignoring unknown ad category"),
            }
        }

        let mut ad_points = Vec::new();
        if let Some(item) = item {
            let midrolls = item.midrolls.as_ref().and_then(|m| m.points.as_ref());
            ad_points.extend(
                midrolls
                    .into_iter()
                    .flatten()
                    .filter_map(|p| AdPoint::from_raw(p, AdCategory::MidRoll)),
            );

            let contentrolls = item.contentrolls.as_ref().and_then(|c| c.points.as_ref());
            ad_points.extend(
                contentrolls
                    .into_iter()
                    .flatten()
                    .filter_map(|p| AdPoint::from_raw(p, AdCategory::ContentRoll)),
            );

            let preroll = item.prerolls.as_ref().and_then(|p| p.points.as_ref());
            ad_points.extend(preroll.and_then(|p| AdPoint::from_raw(p, AdCategory::PreRoll)));
        }
        ad_points.sort_by_key(|p| p.offset);

        debug!(
            categories = ad_config.len(),
            points = ad_points.len(),
            "Ad schedule parsed"
        );

        Self { ad_config, ad_points }
    }

    pub fn config(&self, category: AdCategory) -> Option<&AdConfig> {
        self.ad_config.get(&category)
    }

    pub fn has_preroll(&self) -> bool {
        self.ad_config
            .get(&AdCategory::PreRoll)
            .is_some_and(|c| !c.links.is_empty())
    }

    /// Nearest point strictly ahead of `now` and closer than `lookahead`
    pub fn upcoming(&self, now: Duration, lookahead: Duration) -> Option<&AdPoint> {
        self.ad_points
            .iter()
            .filter(|p| p.offset > now && p.offset - now < lookahead)
            .min_by_key(|p| p.offset)
    }

    /// Points reached by `now` and less than `max_offset` behind it
    pub fn due(&self, now: Duration, max_offset: Duration) -> impl Iterator<Item = &AdPoint> {
        self.ad_points
            .iter()
            .filter(move |p| now >= p.offset && now - p.offset < max_offset)
    }
}

/// Timing knobs for the scheduler, read from feature flags
///
/// Only the lookahead and the timeline offset drive scheduling. The cache,
/// play-wait, intersection and pause-roll timeouts are read so
/// a feature set written for other players round-trips unchanged, but the
/// scheduler never consults them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdTimings {
    /// How far ahead a break is pre-cached (`ADV_CACHE_LOOKAHEAD`)
    pub cache_lookahead_ms: u64,
    /// `ADV_CACHE_TIMEOUT`, unused
    pub cache_timeout_ms: u64,
    /// How long after a point it may still start, and when its cache entries
    /// are evicted (`ADV_MAX_TIMELINE_OFFSET`)
    pub max_timeline_offset_ms: u64,
    /// `ADV_PLAY_WAIT_TIMEOUT`, unused
    pub play_wait_timeout_ms: u64,
    /// `ADV_INTERSECTION_TIMEOUT`, unused
    pub intersection_timeout_ms: u64,
    /// Pause duration before a pause-roll would trigger
    /// (`ADV_PAUSE_ROLL_ACTIVATE_TIMEOUT`). Pause-rolls are never scheduled.
    pub pause_roll_activate_timeout_ms: u64,
}

impl Default for AdTimings {
    fn default() -> Self {
        Self {
            cache_lookahead_ms: 10_000,
            cache_timeout_ms: 1_000,
            max_timeline_offset_ms: 1_000,
            play_wait_timeout_ms: 500,
            intersection_timeout_ms: 180_000,
            pause_roll_activate_timeout_ms: 5_000,
        }
    }
}

impl AdTimings {
    /// Read timings from feature flags, falling back to defaults
    pub fn from_features(features: &Features) -> Self {
        let defaults = Self::default();
        let read = |key: &str, default: u64| features.get_u64(key).unwrap_or(default);
        Self {
            cache_lookahead_ms: read("ADV_CACHE_LOOKAHEAD", defaults.cache_lookahead_ms),
            cache_timeout_ms: read("ADV_CACHE_TIMEOUT", defaults.cache_timeout_ms),
            max_timeline_offset_ms: read("ADV_MAX_TIMELINE_OFFSET", defaults.max_timeline_offset_ms),
            play_wait_timeout_ms: read("ADV_PLAY_WAIT_TIMEOUT", defaults.play_wait_timeout_ms),
            intersection_timeout_ms: read("ADV_INTERSECTION_TIMEOUT", defaults.intersection_timeout_ms),
            pause_roll_activate_timeout_ms: read(
                "ADV_PAUSE_ROLL_ACTIVATE_TIMEOUT",
                defaults.pause_roll_activate_timeout_ms,
            ),
        }
    }

    pub fn cache_lookahead(&self) -> Duration {
        Duration::from_millis(self.cache_lookahead_ms)
    }

    pub fn max_timeline_offset(&self) -> Duration {
        Duration::from_millis(self.max_timeline_offset_ms)
    }

    /// Reject settings the scheduler cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_timeline_offset_ms == 0 {
            return Err(Error::InvalidConfig(
                "ADV_MAX_TIMELINE_OFFSET must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::BreakPoints;

    fn raw(links: &[&str], limiter: u32) -> RawAdCategory {
        RawAdCategory {
            items: links
                .iter()
                .map(|l| RawAdItem { item: Some(l.to_string()) })
                .chain(std::iter::once(RawAdItem { item: None }))
                .collect(),
            params: RawAdParams { limiter },
        }
    }

    fn point(p: f64) -> RawPoint {
        RawPoint { point: p, placeholders: None }
    }

    #[test]
    fn test_build_schedule() {
        let mut ad = BTreeMap::new();
        ad.insert("mid_roll".to_string(), raw(&["https://a", "https://b"], 2));
        ad.insert("banner".to_string(), raw(&["https://c"], 1));

        let item = PlaylistItem {
            midrolls: Some(BreakPoints { points: Some(vec![point(600.0), point(300.0)]) }),
            contentrolls: Some(BreakPoints {
                points: Some(vec![RawPoint {
                    point: 450.0,
                    placeholders: Some(serde_json::json!([{"id": 1}])),
                }]),
            }),
            prerolls: Some(BreakPoints { points: Some(point(0.0)) }),
            ..Default::default()
        };

        let schedule = AdSchedule::build(&ad, Some(&item));
        assert_eq!(schedule.ad_config.len(), 1);
        let mid = schedule.config(AdCategory::MidRoll).unwrap();
        assert_eq!(mid.links, vec!["https://a", "https://b"]);
        assert_eq!(mid.limit, 2);

        let offsets: Vec<_> = schedule.ad_points.iter().map(|p| p.seconds()).collect();
        assert_eq!(offsets, vec![0.0, 300.0, 450.0, 600.0]);
        assert_eq!(schedule.ad_points[2].category, AdCategory::ContentRoll);
        assert!(schedule.ad_points[2].placeholders.is_some());
    }

    #[test]
    fn test_invalid_points_are_skipped() {
        let item = PlaylistItem {
            midrolls: Some(BreakPoints { points: Some(vec![point(-5.0), point(f64::NAN), point(10.0)]) }),
            ..Default::default()
        };
        let schedule = AdSchedule::build(&BTreeMap::new(), Some(&item));
        assert_eq!(schedule.ad_points.len(), 1);
    }

    #[test]
    fn test_upcoming_picks_nearest_within_lookahead() {
        let schedule = AdSchedule {
            ad_config: BTreeMap::new(),
            ad_points: vec![
                AdPoint::new(Duration::from_secs(100), AdCategory::MidRoll),
                AdPoint::new(Duration::from_secs(105), AdCategory::MidRoll),
            ],
        };
        let lookahead = Duration::from_secs(10);
        let next = schedule.upcoming(Duration::from_secs(93), lookahead).unwrap();
        assert_eq!(next.offset, Duration::from_secs(100));
        assert!(schedule.upcoming(Duration::from_secs(80), lookahead).is_none());
        assert!(schedule.upcoming(Duration::from_secs(105), lookahead).is_none());
    }

    #[test]
    fn test_due_window() {
        let schedule = AdSchedule {
            ad_config: BTreeMap::new(),
            ad_points: vec![AdPoint::new(Duration::from_secs(100), AdCategory::MidRoll)],
        };
        let offset = Duration::from_millis(1000);
        assert_eq!(schedule.due(Duration::from_millis(99_999), offset).count(), 0);
        assert_eq!(schedule.due(Duration::from_secs(100), offset).count(), 1);
        assert_eq!(schedule.due(Duration::from_millis(100_999), offset).count(), 1);
        assert_eq!(schedule.due(Duration::from_secs(101), offset).count(), 0);
    }

    #[test]
    fn test_timings_from_features() {
        let features = Features::new()
            .with("ADV_CACHE_LOOKAHEAD", "20000")
            .with("ADV_MAX_TIMELINE_OFFSET", 2500);
        let timings = AdTimings::from_features(&features);
        assert_eq!(timings.cache_lookahead(), Duration::from_secs(20));
        assert_eq!(timings.max_timeline_offset(), Duration::from_millis(2500));
        assert_eq!(timings.play_wait_timeout_ms, 500);
        assert!(timings.validate().is_ok());
    }

    #[test]
    fn test_compatibility_timings_are_carried() {
        let features = Features::new()
            .with("ADV_CACHE_TIMEOUT", 1500)
            .with("ADV_PLAY_WAIT_TIMEOUT", 750)
            .with("ADV_INTERSECTION_TIMEOUT", 60_000)
            .with("ADV_PAUSE_ROLL_ACTIVATE_TIMEOUT", 3000);
        let timings = AdTimings::from_features(&features);
        assert_eq!(timings.cache_timeout_ms, 1500);
        assert_eq!(timings.play_wait_timeout_ms, 750);
        assert_eq!(timings.intersection_timeout_ms, 60_000);
        assert_eq!(timings.pause_roll_activate_timeout_ms, 3000);

        let defaults = AdTimings::default();
        assert_eq!(timings.cache_lookahead(), defaults.cache_lookahead());
        assert_eq!(timings.max_timeline_offset(), defaults.max_timeline_offset());
    }

    #[test]
    fn test_missing_limiter_defaults_to_one() {
        let raw: RawAdCategory = serde_json::from_str(r#"{"items":[{"item":"https://a"}]}"#).unwrap();
        assert_eq!(AdConfig::from(&raw).limit, 1);
    }
}
