//! Error types for Reel Core

use thiserror::Error;

/// Result type alias for player shell operations
pub type Result<T> = std::result::Result<T, Error>;

/// Player shell error types
#[derive(Error, Debug)]
pub enum Error {
    // Negotiation errors
    #[error("No playable stream found")]
    NoPlayableStream,

    #[error("Unknown priority key: {0}")]
    InvalidPriorityKey(String),

    // DRM errors
    #[error("FETCH_LICENSE: license server responded with status {status}")]
    FetchLicense { status: u16 },

    #[error("FETCH_CERTIFICATE: certificate server responded with status {status}")]
    FetchCertificate { status: u16 },

    #[error("Malformed license payload: {0}")]
    LicensePayload(String),

    #[error("DRM not supported: {system}")]
    DrmNotSupported { system: String },

    // Ad errors
    #[error("Ad SDK is not loaded: {0}")]
    AdSdkUnavailable(String),

    #[error("Ad load failed for candidate {index}: {reason}")]
    AdLoad { index: usize, reason: String },

    #[error("Ad preload failed for candidate {index}: {reason}")]
    AdPreload { index: usize, reason: String },

    #[error("Ad playback failed for candidate {index}: {reason}")]
    AdPlayback { index: usize, reason: String },

    #[error("failed play: all {attempted} ad candidates exhausted")]
    FailedPlay { attempted: usize },

    #[error("failed preload: all {attempted} ad candidates exhausted")]
    FailedPreload { attempted: usize },

    #[error("Ad block is no longer active")]
    AdBlockInactive,

    #[error("Ad break already in progress")]
    BreakInProgress,

    #[error("Invalid ad item transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    // Player facade errors
    #[error("Player error: {0}")]
    Player(String),

    #[error("Autoplay blocked: {0}")]
    AutoplayBlocked(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a license payload error
    pub fn license(msg: impl Into<String>) -> Self {
        Error::LicensePayload(msg.into())
    }

    /// Create a player facade error
    pub fn player(msg: impl Into<String>) -> Self {
        Error::Player(msg.into())
    }

    /// Returns true if the failure is local to one ad candidate and the
    /// caller should move on to the next candidate.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::AdLoad { .. }
                | Error::AdPreload { .. }
                | Error::AdPlayback { .. }
                | Error::AdSdkUnavailable(_)
        )
    }

    /// Returns true for DRM transport failures. These end the playback
    /// attempt; there is no retry.
    pub fn is_drm_failure(&self) -> bool {
        matches!(
            self,
            Error::FetchLicense { .. }
                | Error::FetchCertificate { .. }
                | Error::LicensePayload(_)
                | Error::DrmNotSupported { .. }
        )
    }

    /// Returns the error code reported to the video engine and logs
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::NoPlayableStream => "NO_STREAM",
            Error::InvalidPriorityKey(_) => "INVALID_PRIORITY_KEY",
            Error::FetchLicense { .. } => "FETCH_LICENSE",
            Error::FetchCertificate { .. } => "FETCH_CERTIFICATE",
            Error::LicensePayload(_) => "LICENSE_PAYLOAD",
            Error::DrmNotSupported { .. } => "DRM_UNSUPPORTED",
            Error::AdSdkUnavailable(_) => "AD_SDK_UNAVAILABLE",
            Error::AdLoad { .. } => "AD_LOAD",
            Error::AdPreload { .. } => "AD_PRELOAD",
            Error::AdPlayback { .. } => "AD_PLAYBACK",
            Error::FailedPlay { .. } => "AD_FAILED_PLAY",
            Error::FailedPreload { .. } => "AD_FAILED_PRELOAD",
            Error::AdBlockInactive => "AD_BLOCK_INACTIVE",
            Error::BreakInProgress => "AD_BREAK_IN_PROGRESS",
            Error::InvalidStateTransition { .. } => "INVALID_STATE",
            Error::Player(_) => "PLAYER",
            Error::AutoplayBlocked(_) => "AUTOPLAY_BLOCKED",
            Error::Network(_) => "NETWORK",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Json(_) => "JSON",
            Error::Io(_) => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drm_codes() {
        assert_eq!(Error::FetchLicense { status: 403 }.error_code(), "FETCH_LICENSE");
        assert_eq!(
            Error::FetchCertificate { status: 404 }.error_code(),
            "FETCH_CERTIFICATE"
        );
        assert!(Error::FetchLicense { status: 500 }.is_drm_failure());
        assert!(!Error::FetchLicense { status: 500 }.is_recoverable());
    }

    #[test]
    fn test_candidate_errors_are_recoverable() {
        let err = Error::AdPlayback { index: 0, reason: "pod error".into() };
        assert!(err.is_recoverable());
        assert!(!Error::FailedPlay { attempted: 2 }.is_recoverable());
    }
}
