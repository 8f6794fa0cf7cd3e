//! PlayReady license adapter

use super::{read_ok_body, KeySystemAdapter, LicenseRequest};
use crate::error::{Error, Result};
use crate::types::key_systems;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument};

const SOAP_ACTION: &str = "http://schemas.microsoft.com/DRM/2007/03/protocols/AcquireLicense";

/// Posts the CDM's SOAP challenge to the license server as-is.
#[derive(Debug, Clone)]
pub struct PlayReadyAdapter {
    license_url: String,
    http: reqwest::Client,
}

impl PlayReadyAdapter {
    pub fn new(license_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            license_url: license_url.into(),
            http,
        }
    }
}

#[async_trait]
impl KeySystemAdapter for PlayReadyAdapter {
    fn key_system(&self) -> &'static str {
        key_systems::PLAYREADY
    }

    fn license_url(&self) -> &str {
        &self.license_url
    }

    #[instrument(skip(self, request), fields(url = %self.license_url))]
    async fn get_license(&self, request: LicenseRequest<'_>) -> Result<Bytes> {
        let response = self
            .http
            .post(&self.license_url)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", SOAP_ACTION)
            .body(request.key_message.to_vec())
            .send()
            .await?;

        let license = read_ok_body(response, |status| Error::FetchLicense { status }).await?;
        debug!(bytes = license.len(), "PlayReady license received");
        Ok(license)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_license_uses_soap_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("SOAPAction", SOAP_ACTION))
            .and(header("content-type", "text/xml; charset=utf-8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<License/>"))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = PlayReadyAdapter::new(server.uri(), reqwest::Client::new());
        let license = adapter
            .get_license(LicenseRequest::new(b"<Challenge/>"))
            .await
            .unwrap();
        assert_eq!(&license[..], b"<License/>");
    }

    #[tokio::test]
    async fn test_server_error_is_fetch_license() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let adapter = PlayReadyAdapter::new(server.uri(), reqwest::Client::new());
        let err = adapter.get_license(LicenseRequest::new(b"x")).await.unwrap_err();
        assert!(matches!(err, Error::FetchLicense { status: 500 }));
    }
}
