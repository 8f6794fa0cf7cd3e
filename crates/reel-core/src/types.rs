//! Core types for Reel

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Delivery protocol of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamProtocol {
    Hls,
    Dash,
    Mss,
    Mp4,
}

impl StreamProtocol {
    /// Capability token the runtime must advertise to play this protocol
    pub fn token(&self) -> &'static str {
        match self {
            StreamProtocol::Hls => "hls",
            StreamProtocol::Dash => "dash",
            StreamProtocol::Mss => "mss",
            StreamProtocol::Mp4 => "mp4",
        }
    }

    /// MIME type handed to the video engine
    pub fn mime_type(&self) -> &'static str {
        match self {
            StreamProtocol::Hls => "application/x-mpegURL",
            StreamProtocol::Mp4 => "video/mp4",
            StreamProtocol::Dash | StreamProtocol::Mss => "application/dash+xml",
        }
    }
}

impl std::fmt::Display for StreamProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamProtocol::Hls => write!(f, "HLS"),
            StreamProtocol::Dash => write!(f, "DASH"),
            StreamProtocol::Mss => write!(f, "MSS"),
            StreamProtocol::Mp4 => write!(f, "MP4"),
        }
    }
}

impl FromStr for StreamProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HLS" => Ok(StreamProtocol::Hls),
            "DASH" => Ok(StreamProtocol::Dash),
            "MSS" => Ok(StreamProtocol::Mss),
            "MP4" => Ok(StreamProtocol::Mp4),
            other => Err(Error::InvalidPriorityKey(other.to_string())),
        }
    }
}

/// DRM system protecting a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrmType {
    #[serde(alias = "FAIRPLAY")]
    FairPlay,
    #[serde(alias = "WIDEVINE")]
    Widevine,
    #[serde(alias = "PLAYREADY")]
    PlayReady,
}

impl DrmType {
    /// Capability token the runtime must advertise for this DRM
    pub fn token(&self) -> &'static str {
        match self {
            DrmType::FairPlay => "fairplay",
            DrmType::Widevine => "widevine",
            DrmType::PlayReady => "playready",
        }
    }

    /// EME key system under which the adapter is registered
    pub fn key_system(&self) -> &'static str {
        match self {
            DrmType::FairPlay => key_systems::FAIRPLAY_1_0,
            DrmType::Widevine => key_systems::WIDEVINE,
            DrmType::PlayReady => key_systems::PLAYREADY,
        }
    }
}

impl std::fmt::Display for DrmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for DrmType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fairplay" => Ok(DrmType::FairPlay),
            "widevine" => Ok(DrmType::Widevine),
            "playready" => Ok(DrmType::PlayReady),
            other => Err(Error::InvalidPriorityKey(other.to_string())),
        }
    }
}

/// EME key system identifiers
pub mod key_systems {
    pub const WIDEVINE: &str = "com.widevine.alpha";
    pub const PLAYREADY: &str = "com.microsoft.playready";
    pub const FAIRPLAY: &str = "com.apple.fps";
    pub const FAIRPLAY_1_0: &str = "com.apple.fps.1_0";
    pub const FAIRPLAY_2_0: &str = "com.apple.fps.2_0";
    pub const FAIRPLAY_3_0: &str = "com.apple.fps.3_0";
}

/// A candidate stream from the playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    /// Delivery protocol
    pub protocol: StreamProtocol,
    /// DRM system, if the stream is protected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drm_type: Option<DrmType>,
    /// Manifest or media URL
    pub url: String,
    /// License server URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ls_url: Option<String>,
}

impl Stream {
    /// Create an unprotected stream
    pub fn plain(protocol: StreamProtocol, url: impl Into<String>) -> Self {
        Self {
            protocol,
            drm_type: None,
            url: url.into(),
            ls_url: None,
        }
    }

    /// Create a DRM-protected stream
    pub fn protected(
        protocol: StreamProtocol,
        drm_type: DrmType,
        url: impl Into<String>,
        ls_url: impl Into<String>,
    ) -> Self {
        Self {
            protocol,
            drm_type: Some(drm_type),
            url: url.into(),
            ls_url: Some(ls_url.into()),
        }
    }

    /// A stream counts as encrypted only when both the DRM type and the
    /// license server are known.
    pub fn is_encrypted(&self) -> bool {
        self.drm_type.is_some() && self.ls_url.is_some()
    }

    /// Priority key used to rank this stream
    pub fn priority_key(&self) -> PriorityKey {
        PriorityKey {
            protocol: self.protocol,
            drm: self.drm_type,
        }
    }

    /// Capability tokens that must all be present to play this stream
    pub fn required_capabilities(&self) -> Vec<&'static str> {
        match self.drm_type {
            Some(drm) if self.is_encrypted() => vec![drm.token(), self.protocol.token()],
            _ => vec![self.protocol.token()],
        }
    }
}

/// Ranking key of a stream: `PROTOCOL` or `PROTOCOL:drm`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PriorityKey {
    pub protocol: StreamProtocol,
    pub drm: Option<DrmType>,
}

impl PriorityKey {
    pub const fn new(protocol: StreamProtocol, drm: Option<DrmType>) -> Self {
        Self { protocol, drm }
    }

    pub const fn plain(protocol: StreamProtocol) -> Self {
        Self { protocol, drm: None }
    }

    pub const fn protected(protocol: StreamProtocol, drm: DrmType) -> Self {
        Self {
            protocol,
            drm: Some(drm),
        }
    }
}

impl std::fmt::Display for PriorityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.drm {
            Some(drm) => write!(f, "{}:{}", self.protocol, drm),
            None => write!(f, "{}", self.protocol),
        }
    }
}

impl FromStr for PriorityKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidPriorityKey(s.to_string());
        let mut parts = s.trim().splitn(2, ':');
        let protocol = parts
            .next()
            .ok_or_else(invalid)?
            .parse::<StreamProtocol>()
            .map_err(|_| invalid())?;
        let drm = match parts.next() {
            Some(drm) => Some(drm.parse::<DrmType>().map_err(|_| invalid())?),
            None => None,
        };
        Ok(Self { protocol, drm })
    }
}

impl TryFrom<String> for PriorityKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PriorityKey> for String {
    fn from(key: PriorityKey) -> Self {
        key.to_string()
    }
}

/// Ad break category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdCategory {
    PreRoll,
    MidRoll,
    /// Enumerated for configuration compatibility; never scheduled.
    PauseRoll,
    /// Enumerated for configuration compatibility; never scheduled.
    PostRoll,
    ContentRoll,
}

impl AdCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdCategory::PreRoll => "pre_roll",
            AdCategory::MidRoll => "mid_roll",
            AdCategory::PauseRoll => "pause_roll",
            AdCategory::PostRoll => "post_roll",
            AdCategory::ContentRoll => "content_roll",
        }
    }
}

impl std::fmt::Display for AdCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pre_roll" => Ok(AdCategory::PreRoll),
            "mid_roll" => Ok(AdCategory::MidRoll),
            "pause_roll" => Ok(AdCategory::PauseRoll),
            "post_roll" => Ok(AdCategory::PostRoll),
            "content_roll" => Ok(AdCategory::ContentRoll),
            other => Err(Error::InvalidConfig(format!("unknown ad category: {}", other))),
        }
    }
}

/// What the primary video element is currently showing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoType {
    /// Primary content
    Plain,
    /// Filler source while an ad break owns the slot
    Ad,
}

impl std::fmt::Display for VideoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoType::Plain => write!(f, "PLAIN"),
            VideoType::Ad => write!(f, "AD"),
        }
    }
}

/// Media error codes reported by the video engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaErrorCode {
    Custom,
    Aborted,
    Network,
    Decode,
    SrcNotSupported,
    Encrypted,
}

impl MediaErrorCode {
    /// Map the engine's numeric code
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(MediaErrorCode::Custom),
            1 => Some(MediaErrorCode::Aborted),
            2 => Some(MediaErrorCode::Network),
            3 => Some(MediaErrorCode::Decode),
            4 => Some(MediaErrorCode::SrcNotSupported),
            5 => Some(MediaErrorCode::Encrypted),
            _ => None,
        }
    }

    /// Errors after which the next-priority stream should be tried
    pub fn requires_stream_change(&self) -> bool {
        matches!(self, MediaErrorCode::Decode | MediaErrorCode::SrcNotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_key_format() {
        let key = PriorityKey::protected(StreamProtocol::Dash, DrmType::Widevine);
        assert_eq!(key.to_string(), "DASH:widevine");
        assert_eq!(PriorityKey::plain(StreamProtocol::Hls).to_string(), "HLS");
    }

    #[test]
    fn test_priority_key_parse_is_case_insensitive() {
        let key: PriorityKey = "dash:WIDEVINE".parse().unwrap();
        assert_eq!(key, PriorityKey::protected(StreamProtocol::Dash, DrmType::Widevine));
        assert!("RTMP".parse::<PriorityKey>().is_err());
        assert!("HLS:clearkey".parse::<PriorityKey>().is_err());
    }

    #[test]
    fn test_stream_deserialize() {
        let json = r#"{"protocol":"DASH","drm_type":"widevine","url":"https://cdn/a.mpd","ls_url":"https://ls/wv"}"#;
        let stream: Stream = serde_json::from_str(json).unwrap();
        assert!(stream.is_encrypted());
        assert_eq!(stream.required_capabilities(), vec!["widevine", "dash"]);
    }

    #[test]
    fn test_drm_without_license_server_is_not_encrypted() {
        let stream = Stream {
            protocol: StreamProtocol::Hls,
            drm_type: Some(DrmType::FairPlay),
            url: "https://cdn/a.m3u8".into(),
            ls_url: None,
        };
        assert!(!stream.is_encrypted());
        assert_eq!(stream.required_capabilities(), vec!["hls"]);
        assert_eq!(stream.priority_key().to_string(), "HLS:fairplay");
    }

    #[test]
    fn test_media_error_codes() {
        assert!(MediaErrorCode::from_code(3).unwrap().requires_stream_change());
        assert!(MediaErrorCode::from_code(4).unwrap().requires_stream_change());
        assert!(!MediaErrorCode::from_code(2).unwrap().requires_stream_change());
        assert_eq!(MediaErrorCode::from_code(9), None);
    }
}
