//! Widevine license adapter

use super::{read_ok_body, KeySystemAdapter, LicenseRequest};
use crate::error::{Error, Result};
use crate::types::key_systems;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, instrument};

/// Posts the raw CDM challenge to the license server and returns the raw
/// license bytes.
#[derive(Debug, Clone)]
pub struct WidevineAdapter {
    license_url: String,
    http: reqwest::Client,
}

impl WidevineAdapter {
    pub fn new(license_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            license_url: license_url.into(),
            http,
        }
    }
}

#[async_trait]
impl KeySystemAdapter for WidevineAdapter {
    fn key_system(&self) -> &'static str {
        key_systems::WIDEVINE
    }

    fn license_url(&self) -> &str {
        &self.license_url
    }

    #[instrument(skip(self, request), fields(url = %self.license_url))]
    async fn get_license(&self, request: LicenseRequest<'_>) -> Result<Bytes> {
        let response = self
            .http
            .post(&self.license_url)
            .body(request.key_message.to_vec())
            .send()
            .await?;

        let license = read_ok_body(response, |status| Error::FetchLicense { status }).await?;
        debug!(bytes = license.len(), "Widevine license received");
        Ok(license)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_bytes, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_license_posts_raw_challenge() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/widevine"))
            .and(body_bytes(b"challenge".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"license".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = WidevineAdapter::new(format!("{}/widevine", server.uri()), reqwest::Client::new());
        let license = adapter.get_license(LicenseRequest::new(b"challenge")).await.unwrap();
        assert_eq!(&license[..], b"license");
    }

    #[tokio::test]
    async fn test_non_200_is_fetch_license() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let adapter = WidevineAdapter::new(server.uri(), reqwest::Client::new());
        let err = adapter.get_license(LicenseRequest::new(b"challenge")).await.unwrap_err();
        assert!(matches!(err, Error::FetchLicense { status: 403 }));
    }

    #[tokio::test]
    async fn test_other_success_codes_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let adapter = WidevineAdapter::new(server.uri(), reqwest::Client::new());
        let err = adapter.get_license(LicenseRequest::new(b"x")).await.unwrap_err();
        assert_eq!(err.error_code(), "FETCH_LICENSE");
    }

    #[tokio::test]
    async fn test_no_certificate_step() {
        let adapter = WidevineAdapter::new("https://ls.example.com", reqwest::Client::new());
        assert!(!adapter.requires_certificate());
        assert!(adapter.get_certificate().await.is_err());
        assert_eq!(adapter.content_id(b"anything"), None);
    }
}
