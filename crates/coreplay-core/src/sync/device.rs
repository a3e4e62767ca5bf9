//! Device access
//!
//! [`DeviceApi`] is everything the connection manager needs from the remote
//! device. [`HttpDevice`] is the real thing: REST requests and the
//! server-sent event stream below `<host>/api/core/v1`.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Client, Response};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::sse;
use crate::error::{SyncError, SyncResult};
use crate::models::Section;

/// Event payloads as they arrive, one JSON text per event
pub type EventStream = BoxStream<'static, SyncResult<String>>;

const API_ROOT: &str = "api/core/v1";

#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Liveness check; returns the version document. Never retried.
    async fn probe(&self) -> SyncResult<Value>;

    /// Fetch one top-level section
    async fn fetch(&self, section: Section) -> SyncResult<Value>;

    /// Open the patch event stream
    async fn open_stream(&self) -> SyncResult<EventStream>;
}

/// HTTP client for a CorePlay device
#[derive(Debug, Clone)]
pub struct HttpDevice {
    client: Client,
    /// Normalized host, always ending in `/`
    host: Url,
    request_timeout: Duration,
}

impl HttpDevice {
    /// Create a client for `host`
    ///
    /// `request_timeout` bounds probe and fetch requests. The event stream is
    /// long-lived and only bounded by the connect timeout.
    pub fn new(host: Url, request_timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            host,
            request_timeout,
        })
    }

    pub fn host(&self) -> &Url {
        &self.host
    }

    fn endpoint(&self, resource: &str) -> String {
        format!("{}{}{}", self.host, API_ROOT, resource)
    }

    async fn get(&self, resource: &str) -> SyncResult<Response> {
        let url = self.endpoint(resource);
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        check_status(response, resource)
    }
}

fn check_status(response: Response, resource: &str) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SyncError::Http {
            status: status.as_u16(),
            resource: resource.to_string(),
        })
    }
}

#[async_trait]
impl DeviceApi for HttpDevice {
    async fn probe(&self) -> SyncResult<Value> {
        let response = self.get("/version").await?;
        Ok(response.json().await?)
    }

    async fn fetch(&self, section: Section) -> SyncResult<Value> {
        let response = self.get(section.resource()).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|source| SyncError::Body { section, source })
    }

    async fn open_stream(&self) -> SyncResult<EventStream> {
        let url = self.endpoint("/sse");
        debug!(url = %url, "Opening event stream");
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = check_status(response, "/sse")?;
        Ok(sse::events(response.bytes_stream()).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        let device = HttpDevice::new(
            Url::parse("http://10.0.0.5/").unwrap(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(device.endpoint("/version"), "http://10.0.0.5/api/core/v1/version");
        assert_eq!(
            device.endpoint(Section::Players.resource()),
            "http://10.0.0.5/api/core/v1/players/1"
        );
    }

    #[test]
    fn test_endpoints_below_directory() {
        let device = HttpDevice::new(
            Url::parse("http://proxy.local:8080/coreplay/").unwrap(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            device.endpoint("/sse"),
            "http://proxy.local:8080/coreplay/api/core/v1/sse"
        );
    }
}
