//! Client transport for sync exchanges.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{Conflict, SyncRequest, SyncResponse};
use crate::util::{is_http_url, normalize_text_option};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Sync server unreachable: {0}")]
    Unreachable(String),
    #[error("Sync request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Sync server error: {message} ({status})")]
    Server { status: u16, message: String },
    #[error("Sync request rejected: {message} ({status})")]
    Rejected { status: u16, message: String },
    #[error("Invalid sync transport configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Invalid sync response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Network and server-side failures may succeed on retry; rejections never will.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::Timeout(_) | Self::Server { .. } | Self::Decode(_)
        )
    }

    /// The failure says the server could not be reached at all
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout(_))
    }
}

/// Carries one sync exchange to the server
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn exchange(&self, request: SyncRequest) -> Result<SyncResponse, TransportError>;

    /// Cheap reachability check
    async fn ping(&self) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: SyncTransport + ?Sized> SyncTransport for std::sync::Arc<T> {
    async fn exchange(&self, request: SyncRequest) -> Result<SyncResponse, TransportError> {
        (**self).exchange(request).await
    }

    async fn ping(&self) -> Result<(), TransportError> {
        (**self).ping().await
    }
}

/// HTTP transport against the sync API
#[derive(Clone)]
pub struct HttpSyncTransport {
    base_url: String,
    access_token: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSyncTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSyncTransport")
            .field("base_url", &self.base_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl HttpSyncTransport {
    pub fn new(
        base_url: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let base_url = normalize_endpoint(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|error| TransportError::InvalidConfiguration(error.to_string()))?;

        Ok(Self {
            base_url,
            access_token: normalize_text_option(access_token),
            timeout,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Conflicts the server recorded for the authenticated user, newest first
    pub async fn recent_conflicts(&self, limit: usize) -> Result<Vec<Conflict>, TransportError> {
        let url = format!("{}/v1/sync/conflicts?limit={limit}", self.base_url);
        let response = self
            .request(self.client.get(url))
            .send()
            .await
            .map_err(|error| map_reqwest_error(error, self.timeout))?;
        read_json(response).await
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header("Accept", "application/json");
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn exchange(&self, request: SyncRequest) -> Result<SyncResponse, TransportError> {
        let response = self
            .request(self.client.post(format!("{}/v1/sync", self.base_url)))
            .json(&request)
            .send()
            .await
            .map_err(|error| map_reqwest_error(error, self.timeout))?;
        read_json(response).await
    }

    async fn ping(&self) -> Result<(), TransportError> {
        let response = self
            .client
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await
            .map_err(|error| map_reqwest_error(error, self.timeout))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(status, &body))
        }
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TransportError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &body));
    }

    response
        .json::<T>()
        .await
        .map_err(|error| TransportError::Decode(error.to_string()))
}

fn map_reqwest_error(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else {
        TransportError::Unreachable(error.to_string())
    }
}

/// 5xx, 408 and 429 are worth retrying; any other 4xx is final.
fn classify_status(status: StatusCode, body: &str) -> TransportError {
    let message = parse_api_error(body);
    let code = status.as_u16();
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        TransportError::Server {
            status: code,
            message,
        }
    } else {
        TransportError::Rejected {
            status: code,
            message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return message.trim().to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no response body".to_string()
    } else {
        trimmed.to_string()
    }
}

fn normalize_endpoint(raw: String) -> Result<String, TransportError> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        TransportError::InvalidConfiguration("server URL must not be empty".to_string())
    })?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(TransportError::InvalidConfiguration(
            "server URL must include http:// or https://".to_string(),
        ))
    }
}
