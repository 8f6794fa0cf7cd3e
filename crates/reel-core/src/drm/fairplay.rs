//! FairPlay Streaming adapter
//!
//! FairPlay needs three callbacks: the application certificate (fetched
//! from a fixed resource on the license host), the CKC exchange (SPC sent
//! base64-encoded inside JSON, CKC returned the same way) and the content id
//! pulled out of the `skd://` init data.

use super::{read_ok_body, KeySystemAdapter, LicenseRequest};
use crate::error::{Error, Result};
use crate::types::key_systems;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

/// Certificate resource, resolved against the license server's origin
pub const CERTIFICATE_PATH: &str = "/data.der";

/// Number of leading characters dropped from the cleaned init data
const CONTENT_ID_PREFIX_LEN: usize = 5;

#[derive(Debug, Serialize)]
struct CkcRequest<'a> {
    content_id: Option<&'a str>,
    spc_message: String,
}

#[derive(Debug, Deserialize)]
struct CkcResponse {
    ckc_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FairPlayAdapter {
    license_url: String,
    certificate_url: String,
    http: reqwest::Client,
}

impl FairPlayAdapter {
    pub fn new(license_url: impl Into<String>, http: reqwest::Client) -> Self {
        let license_url = license_url.into();
        let certificate_url = Url::parse(&license_url)
            .and_then(|url| url.join(CERTIFICATE_PATH))
            .map(String::from)
            .unwrap_or_else(|_| CERTIFICATE_PATH.to_string());

        Self {
            license_url,
            certificate_url,
            http,
        }
    }

    /// Override where the application certificate is fetched from
    pub fn with_certificate_url(mut self, certificate_url: impl Into<String>) -> Self {
        self.certificate_url = certificate_url.into();
        self
    }

    pub fn certificate_url(&self) -> &str {
        &self.certificate_url
    }
}

#[async_trait]
impl KeySystemAdapter for FairPlayAdapter {
    fn key_system(&self) -> &'static str {
        key_systems::FAIRPLAY_1_0
    }

    fn license_url(&self) -> &str {
        &self.license_url
    }

    fn requires_certificate(&self) -> bool {
        true
    }

    #[instrument(skip(self), fields(url = %self.certificate_url))]
    async fn get_certificate(&self) -> Result<Bytes> {
        let response = self
            .http
            .get(&self.certificate_url)
            .header(PRAGMA, "Cache-Control: no-cache")
            .header(CACHE_CONTROL, "max-age=0")
            .send()
            .await?;

        let certificate = read_ok_body(response, |status| Error::FetchCertificate { status }).await?;
        debug!(bytes = certificate.len(), "FairPlay certificate received");
        Ok(certificate)
    }

    #[instrument(skip(self, request), fields(url = %self.license_url))]
    async fn get_license(&self, request: LicenseRequest<'_>) -> Result<Bytes> {
        let body = CkcRequest {
            content_id: request.content_id,
            spc_message: STANDARD.encode(request.key_message),
        };

        let response = self
            .http
            .post(&self.license_url)
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&body)?)
            .send()
            .await?;

        let payload = read_ok_body(response, |status| Error::FetchLicense { status }).await?;
        let ckc: CkcResponse = serde_json::from_slice(&payload)
            .map_err(|e| Error::license(format!("invalid CKC response: {}", e)))?;
        let ckc_message = ckc
            .ckc_message
            .ok_or_else(|| Error::license("CKC response has no ckc_message"))?;
        let key = STANDARD
            .decode(ckc_message.trim())
            .map_err(|e| Error::license(format!("invalid CKC encoding: {}", e)))?;

        debug!(bytes = key.len(), "FairPlay CKC received");
        Ok(Bytes::from(key))
    }

    fn content_id(&self, init_data: &[u8]) -> Option<String> {
        Some(extract_content_id(init_data))
    }
}

/// Decode the init data as UTF-8, drop C0/C1 control characters and `/`,
/// then drop the fixed five-character prefix.
pub fn extract_content_id(init_data: &[u8]) -> String {
    String::from_utf8_lossy(init_data)
        .chars()
        .filter(|c| !is_stripped(*c))
        .skip(CONTENT_ID_PREFIX_LEN)
        .collect()
}

fn is_stripped(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{1F}' | '\u{7F}'..='\u{9F}' | '/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_content_id_strips_controls_and_prefix() {
        // length-prefixed UTF-16LE init data as delivered by the CDM
        let mut init = vec![0x22, 0x00, 0x00, 0x00];
        for unit in "skd://asset-42".encode_utf16() {
            init.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(extract_content_id(&init), "asset-42");
    }

    #[test]
    fn test_content_id_strips_c1_controls() {
        assert_eq!(extract_content_id("abc\u{85}de/fgh".as_bytes()), "fgh");
    }

    #[test]
    fn test_content_id_shorter_than_prefix() {
        assert_eq!(extract_content_id(b"skd"), "");
    }

    #[test]
    fn test_certificate_url_is_resolved_against_license_host() {
        let adapter = FairPlayAdapter::new("https://ls.example.com/fps/license?x=1", reqwest::Client::new());
        assert_eq!(adapter.certificate_url(), "https://ls.example.com/data.der");
    }

    #[tokio::test]
    async fn test_certificate_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.der"))
            .and(header("cache-control", "max-age=0"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let adapter = FairPlayAdapter::new(format!("{}/license", server.uri()), reqwest::Client::new());
        let cert = adapter.get_certificate().await.unwrap();
        assert_eq!(&cert[..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_certificate_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let adapter = FairPlayAdapter::new(server.uri(), reqwest::Client::new());
        let err = adapter.get_certificate().await.unwrap_err();
        assert!(matches!(err, Error::FetchCertificate { status: 404 }));
    }

    #[tokio::test]
    async fn test_license_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/license"))
            .and(body_json(serde_json::json!({
                "content_id": "asset-42",
                "spc_message": STANDARD.encode(b"spc"),
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ckc_message": STANDARD.encode(b"ckc"),
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = FairPlayAdapter::new(format!("{}/license", server.uri()), reqwest::Client::new());
        let key = adapter
            .get_license(LicenseRequest::new(b"spc").with_content_id("asset-42"))
            .await
            .unwrap();
        assert_eq!(&key[..], b"ckc");
    }

    #[tokio::test]
    async fn test_license_failure_and_bad_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/denied"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/garbled"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let denied = FairPlayAdapter::new(format!("{}/denied", server.uri()), http.clone());
        assert!(matches!(
            denied.get_license(LicenseRequest::new(b"spc")).await,
            Err(Error::FetchLicense { status: 401 })
        ));

        let garbled = FairPlayAdapter::new(format!("{}/garbled", server.uri()), http);
        assert!(matches!(
            garbled.get_license(LicenseRequest::new(b"spc")).await,
            Err(Error::LicensePayload(_))
        ));
    }
}
