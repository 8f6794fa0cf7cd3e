//! DRM adapter layer
//!
//! Translates a license-server URL into the callbacks the video engine's
//! EME integration calls during key exchange:
//! - Widevine (`com.widevine.alpha`)
//! - PlayReady (`com.microsoft.playready`)
//! - FairPlay (`com.apple.fps.1_0`), which also needs a server certificate
//!   and a content id extracted from the init data
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Video engine (EME integration)         │
//! ├─────────────────────────────────────────────────────┤
//! │                     KeySystems                      │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐           │
//! │  │ Widevine │  │ FairPlay │  │ PlayReady│           │
//! │  │ Adapter  │  │ Adapter  │  │ Adapter  │           │
//! │  └────┬─────┘  └────┬─────┘  └────┬─────┘           │
//! │       └─────────────┼─────────────┘                 │
//! │              ┌──────┴──────┐                        │
//! │              │   License   │                        │
//! │              │   Server    │                        │
//! │              └─────────────┘                        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Adapters hold no mutable state. Every operation resolves exactly once,
//! and a non-200 answer from the server is terminal for that playback
//! attempt.

mod fairplay;
mod playready;
mod widevine;

pub use fairplay::{extract_content_id, FairPlayAdapter, CERTIFICATE_PATH};
pub use playready::PlayReadyAdapter;
pub use widevine::WidevineAdapter;

use crate::error::{Error, Result};
use crate::types::DrmType;
use async_trait::async_trait;
use bytes::Bytes;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Key request handed over by the CDM
#[derive(Debug, Clone, Copy)]
pub struct LicenseRequest<'a> {
    /// Raw key message (Widevine/PlayReady challenge, FairPlay SPC)
    pub key_message: &'a [u8],
    /// Content id (FairPlay only)
    pub content_id: Option<&'a str>,
}

impl<'a> LicenseRequest<'a> {
    pub fn new(key_message: &'a [u8]) -> Self {
        Self {
            key_message,
            content_id: None,
        }
    }

    pub fn with_content_id(mut self, content_id: &'a str) -> Self {
        self.content_id = Some(content_id);
        self
    }
}

/// Callbacks for one EME key system
#[async_trait]
pub trait KeySystemAdapter: Send + Sync + std::fmt::Debug {
    /// EME key system name
    fn key_system(&self) -> &'static str;

    /// License server this adapter talks to
    fn license_url(&self) -> &str;

    /// Whether the engine must call [`get_certificate`](Self::get_certificate)
    /// before requesting a license
    fn requires_certificate(&self) -> bool {
        false
    }

    /// Fetch the server certificate
    async fn get_certificate(&self) -> Result<Bytes> {
        Err(Error::DrmNotSupported {
            system: format!("{} certificate", self.key_system()),
        })
    }

    /// Exchange a key message for a license
    async fn get_license(&self, request: LicenseRequest<'_>) -> Result<Bytes>;

    /// Content id derived from the init data, when the key system needs one
    fn content_id(&self, _init_data: &[u8]) -> Option<String> {
        None
    }
}

/// Key-system descriptors attached to a playback source
#[derive(Clone, Default)]
pub struct KeySystems {
    adapters: BTreeMap<&'static str, Arc<dyn KeySystemAdapter>>,
}

impl KeySystems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor set for a single DRM type and license server
    pub fn for_drm(drm: DrmType, license_url: &str, http: reqwest::Client) -> Self {
        let adapter: Arc<dyn KeySystemAdapter> = match drm {
            DrmType::Widevine => Arc::new(WidevineAdapter::new(license_url, http)),
            DrmType::PlayReady => Arc::new(PlayReadyAdapter::new(license_url, http)),
            DrmType::FairPlay => Arc::new(FairPlayAdapter::new(license_url, http)),
        };
        let mut systems = Self::new();
        systems.insert(adapter);
        systems
    }

    pub fn insert(&mut self, adapter: Arc<dyn KeySystemAdapter>) {
        self.adapters.insert(adapter.key_system(), adapter);
    }

    /// Adapter registered for an EME key system
    pub fn get(&self, key_system: &str) -> Option<Arc<dyn KeySystemAdapter>> {
        self.adapters.get(key_system).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.adapters.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for KeySystems {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.adapters.iter().map(|(k, v)| (k, v.license_url())))
            .finish()
    }
}

impl Serialize for KeySystems {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.adapters.len()))?;
        for (name, adapter) in &self.adapters {
            map.serialize_entry(name, adapter.license_url())?;
        }
        map.end()
    }
}

/// Drive a DRM operation and report its outcome to an error-first
/// completion callback. The callback is consumed, so it runs exactly once.
pub async fn complete<T, Fut, F>(operation: Fut, callback: F)
where
    Fut: Future<Output = Result<T>>,
    F: FnOnce(Result<T>),
{
    let outcome = operation.await;
    if let Err(ref e) = outcome {
        tracing::warn!(code = e.error_code(), error = %e, "DRM operation failed");
    }
    callback(outcome);
}

/// Read a license/certificate response, mapping any non-200 status to the
/// given error
pub(crate) async fn read_ok_body(
    response: reqwest::Response,
    on_status: impl FnOnce(u16) -> Error,
) -> Result<Bytes> {
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(on_status(status.as_u16()));
    }
    Ok(response.bytes().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_for_drm_registers_expected_key_system() {
        let http = reqwest::Client::new();
        let wv = KeySystems::for_drm(DrmType::Widevine, "https://ls.example.com", http.clone());
        assert_eq!(wv.names(), vec!["com.widevine.alpha"]);

        let pr = KeySystems::for_drm(DrmType::PlayReady, "https://ls.example.com", http.clone());
        assert_eq!(pr.names(), vec!["com.microsoft.playready"]);

        let fp = KeySystems::for_drm(DrmType::FairPlay, "https://ls.example.com", http);
        assert!(fp.get("com.apple.fps.1_0").unwrap().requires_certificate());
    }

    #[test]
    fn test_key_systems_serialize_as_license_map() {
        let http = reqwest::Client::new();
        let wv = KeySystems::for_drm(DrmType::Widevine, "https://ls.example.com/wv", http);
        let json = serde_json::to_value(&wv).unwrap();
        assert_eq!(json["com.widevine.alpha"], "https://ls.example.com/wv");
    }

    #[tokio::test]
    async fn test_complete_invokes_callback_once() {
        let calls = AtomicUsize::new(0);
        complete(async { Ok::<_, Error>(Bytes::from_static(b"key")) }, |r| {
            assert_eq!(r.unwrap(), Bytes::from_static(b"key"));
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        complete(async { Err::<Bytes, _>(Error::FetchLicense { status: 500 }) }, |r| {
            assert_eq!(r.unwrap_err().error_code(), "FETCH_LICENSE");
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
