//! Stream selection
//!
//! Ranks the playlist's candidate streams against the runtime's capability
//! set and hands them out one at a time, best first. A fatal playback error
//! pulls the next candidate from the same selector, so the ranking is only
//! computed once per selector.

use crate::capabilities::CapabilitySet;
use crate::drm::KeySystems;
use crate::types::{DrmType, PriorityKey, Stream, StreamProtocol};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::iter::FusedIterator;
use tracing::{debug, info};

/// Default ranking, applied after any history keys
pub const DEFAULT_PRIORITY: [PriorityKey; 8] = [
    PriorityKey::protected(StreamProtocol::Dash, DrmType::Widevine),
    PriorityKey::protected(StreamProtocol::Hls, DrmType::FairPlay),
    PriorityKey::protected(StreamProtocol::Dash, DrmType::PlayReady),
    PriorityKey::protected(StreamProtocol::Mss, DrmType::PlayReady),
    PriorityKey::plain(StreamProtocol::Hls),
    PriorityKey::plain(StreamProtocol::Dash),
    PriorityKey::plain(StreamProtocol::Mss),
    PriorityKey::plain(StreamProtocol::Mp4),
];

/// Full priority order: history keys first, then the default keys not
/// already named by the history. Each key appears once.
pub fn priority_order(history: &[PriorityKey]) -> Vec<PriorityKey> {
    let mut seen = HashSet::new();
    history
        .iter()
        .chain(DEFAULT_PRIORITY.iter())
        .filter(|key| seen.insert(**key))
        .copied()
        .collect()
}

/// Cursor over the playable streams in priority order.
///
/// The sequence is finite and cannot be restarted: once every matching key
/// has been yielded, `next()` returns `None` forever.
#[derive(Debug, Clone)]
pub struct StreamSelector {
    ordered: Vec<(PriorityKey, Stream)>,
    cursor: usize,
}

impl StreamSelector {
    /// Build a selector.
    ///
    /// Streams whose required capability tokens are not all present are
    /// dropped. When two surviving streams share a priority key, the later
    /// one in `streams` wins.
    pub fn new(streams: &[Stream], capabilities: &CapabilitySet, history: &[PriorityKey]) -> Self {
        let mut by_key: HashMap<PriorityKey, &Stream> = HashMap::new();

        for stream in streams {
            let key = stream.priority_key();
            if !capabilities.contains_all(stream.required_capabilities()) {
                debug!(key = %key, url = %stream.url, "Stream not supported");
                continue;
            }
            by_key.insert(key, stream);
        }

        let ordered: Vec<(PriorityKey, Stream)> = priority_order(history)
            .into_iter()
            .filter_map(|key| by_key.get(&key).map(|s| (key, (*s).clone())))
            .collect();

        info!(
            candidates = streams.len(),
            playable = ordered.len(),
            order = ?ordered.iter().map(|(k, _)| k.to_string()).collect::<Vec<_>>(),
            "Stream selector ready"
        );

        Self { ordered, cursor: 0 }
    }

    /// Number of streams not yet handed out
    pub fn remaining(&self) -> usize {
        self.ordered.len() - self.cursor
    }

    /// True once the sequence is exhausted
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Priority key of the stream most recently returned
    pub fn current_key(&self) -> Option<PriorityKey> {
        self.cursor
            .checked_sub(1)
            .and_then(|i| self.ordered.get(i))
            .map(|(key, _)| *key)
    }

    /// Keys still to come, in order
    pub fn pending_keys(&self) -> impl Iterator<Item = PriorityKey> + '_ {
        self.ordered[self.cursor..].iter().map(|(key, _)| *key)
    }
}

impl Iterator for StreamSelector {
    type Item = Stream;

    fn next(&mut self) -> Option<Stream> {
        let (key, stream) = self.ordered.get(self.cursor)?;
        self.cursor += 1;
        debug!(key = %key, url = %stream.url, "Stream selected");
        Some(stream.clone())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}

impl ExactSizeIterator for StreamSelector {}

impl FusedIterator for StreamSelector {}

/// Source description handed to the video engine
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackSource {
    pub src: String,
    #[serde(rename = "type")]
    pub mime_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_systems: Option<KeySystems>,
    pub handle_manifest_redirects: bool,
}

impl PlaybackSource {
    /// Build the engine source for a stream. Only encrypted streams get key
    /// systems.
    pub fn from_stream(stream: &Stream, http: &reqwest::Client) -> Self {
        let key_systems = match (stream.drm_type, stream.ls_url.as_deref()) {
            (Some(drm), Some(ls_url)) => Some(KeySystems::for_drm(drm, ls_url, http.clone())),
            _ => None,
        };

        Self {
            src: stream.url.clone(),
            mime_type: stream.protocol.mime_type(),
            key_systems,
            handle_manifest_redirects: true,
        }
    }

    /// Plain source with no DRM, e.g. the filler clip shown during ad breaks
    pub fn plain(src: impl Into<String>, mime_type: &'static str) -> Self {
        Self {
            src: src.into(),
            mime_type,
            key_systems: None,
            handle_manifest_redirects: true,
        }
    }
}

impl PartialEq for PlaybackSource {
    fn eq(&self, other: &Self) -> bool {
        self.src == other.src && self.mime_type == other.mime_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(tokens: &[&str]) -> CapabilitySet {
        tokens.iter().collect()
    }

    fn hls() -> Stream {
        Stream::plain(StreamProtocol::Hls, "https://cdn.example.com/plain.m3u8")
    }

    fn dash() -> Stream {
        Stream::plain(StreamProtocol::Dash, "https://cdn.example.com/plain.mpd")
    }

    #[test]
    fn test_priority_order_without_history() {
        assert_eq!(priority_order(&[]), DEFAULT_PRIORITY.to_vec());
    }

    #[test]
    fn test_priority_order_history_first_without_duplicates() {
        let history = [PriorityKey::plain(StreamProtocol::Dash)];
        let order = priority_order(&history);
        assert_eq!(order.len(), DEFAULT_PRIORITY.len());
        assert_eq!(order[0], PriorityKey::plain(StreamProtocol::Dash));
        assert_eq!(
            order.iter().filter(|k| **k == PriorityKey::plain(StreamProtocol::Dash)).count(),
            1
        );
    }

    #[test]
    fn test_empty_stream_list() {
        let mut selector = StreamSelector::new(&[], &caps(&["hls"]), &[]);
        assert!(selector.is_exhausted());
        assert_eq!(selector.next(), None);
    }

    #[test]
    fn test_exhausted_selector_stays_exhausted() {
        let mut selector = StreamSelector::new(&[hls()], &caps(&["hls"]), &[]);
        assert_eq!(selector.next(), Some(hls()));
        assert_eq!(selector.current_key(), Some(PriorityKey::plain(StreamProtocol::Hls)));
        for _ in 0..3 {
            assert_eq!(selector.next(), None);
        }
    }

    #[test]
    fn test_later_duplicate_wins() {
        let first = Stream::plain(StreamProtocol::Hls, "https://a.example.com/1.m3u8");
        let second = Stream::plain(StreamProtocol::Hls, "https://b.example.com/2.m3u8");
        let mut selector = StreamSelector::new(&[first, second.clone()], &caps(&["hls"]), &[]);
        assert_eq!(selector.next(), Some(second));
        assert_eq!(selector.next(), None);
    }

    #[test]
    fn test_unsupported_duplicate_does_not_shadow() {
        let supported = Stream::protected(
            StreamProtocol::Dash,
            DrmType::Widevine,
            "https://cdn.example.com/wv.mpd",
            "https://ls.example.com/wv",
        );
        let mut selector = StreamSelector::new(
            &[supported.clone(), hls()],
            &caps(&["dash", "widevine"]),
            &[],
        );
        assert_eq!(selector.next(), Some(supported));
        assert_eq!(selector.next(), None);
    }

    #[test]
    fn test_history_key_without_stream_is_skipped() {
        let history = [PriorityKey::protected(StreamProtocol::Dash, DrmType::Widevine)];
        let mut selector = StreamSelector::new(&[hls(), dash()], &caps(&["hls", "dash"]), &history);
        assert_eq!(selector.next(), Some(hls()));
        assert_eq!(selector.next(), Some(dash()));
        assert_eq!(selector.next(), None);
    }

    #[test]
    fn test_size_hint_tracks_cursor() {
        let mut selector = StreamSelector::new(&[hls(), dash()], &caps(&["hls", "dash"]), &[]);
        assert_eq!(selector.len(), 2);
        selector.next();
        assert_eq!(selector.len(), 1);
        assert_eq!(selector.pending_keys().collect::<Vec<_>>(), vec![PriorityKey::plain(StreamProtocol::Dash)]);
    }

    #[test]
    fn test_source_mime_types() {
        let http = reqwest::Client::new();
        let source = PlaybackSource::from_stream(&dash(), &http);
        assert_eq!(source.mime_type, "application/dash+xml");
        assert!(source.key_systems.is_none());
        assert!(source.handle_manifest_redirects);

        let mss = Stream::plain(StreamProtocol::Mss, "https://cdn.example.com/a.ism");
        assert_eq!(PlaybackSource::from_stream(&mss, &http).mime_type, "application/dash+xml");
    }

    #[test]
    fn test_encrypted_source_gets_key_systems() {
        let http = reqwest::Client::new();
        let stream = Stream::protected(
            StreamProtocol::Hls,
            DrmType::FairPlay,
            "https://cdn.example.com/fp.m3u8",
            "https://ls.example.com/fp",
        );
        let source = PlaybackSource::from_stream(&stream, &http);
        let key_systems = source.key_systems.expect("key systems");
        assert_eq!(key_systems.names(), vec!["com.apple.fps.1_0"]);
    }
}
