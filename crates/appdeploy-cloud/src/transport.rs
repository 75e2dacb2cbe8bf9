//! Authorized JSON-over-HTTP calls to Google APIs.

use reqwest::header::{AUTHORIZATION, RANGE};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

const USER_AGENT: &str = concat!("appdeploy/", env!("CARGO_PKG_VERSION"));

/// HTTP client that sends a bearer token with every request.
#[derive(Debug, Clone)]
pub struct AuthorizedClient {
    http: reqwest::Client,
    token: String,
}

impl AuthorizedClient {
    pub fn new(token: impl Into<String>) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Client { source: e })?;
        Ok(Self {
            http,
            token: token.into(),
        })
    }

    /// GET `url` as JSON; `None` on 404.
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, TransportError> {
        let response = self.send(Method::GET, url.clone(), None, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = checked(Method::GET, &url, response).await?;
        decode(&url, &body).map(Some)
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, TransportError> {
        let payload = serde_json::to_vec(body).map_err(|e| TransportError::Encode {
            url: url.to_string(),
            source: e,
        })?;
        let response = self
            .send(Method::POST, url.clone(), Some(("application/json", payload)), None)
            .await?;
        let body = checked(Method::POST, &url, response).await?;
        decode(&url, &body)
    }

    /// POST raw bytes and decode the JSON response.
    pub async fn post_bytes<T: DeserializeOwned>(
        &self,
        url: Url,
        content_type: &'static str,
        payload: Vec<u8>,
    ) -> Result<T, TransportError> {
        let response = self
            .send(Method::POST, url.clone(), Some((content_type, payload)), None)
            .await?;
        let body = checked(Method::POST, &url, response).await?;
        decode(&url, &body)
    }

    /// POST without a body, returning only the status.
    ///
    /// Used where a conflicting resource is an acceptable outcome.
    pub async fn post_status<B: Serialize>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<StatusCode, TransportError> {
        let payload = serde_json::to_vec(body).map_err(|e| TransportError::Encode {
            url: url.to_string(),
            source: e,
        })?;
        let response = self
            .send(Method::POST, url.clone(), Some(("application/json", payload)), None)
            .await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            return Ok(status);
        }
        checked(Method::POST, &url, response).await.map(|_| status)
    }

    /// GET raw bytes starting at `offset`.
    ///
    /// `None` when the object does not exist yet or holds nothing past
    /// `offset`.
    pub async fn get_bytes(
        &self,
        url: Url,
        offset: Option<u64>,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let range = offset.map(|n| format!("bytes={n}-"));
        let response = self.send(Method::GET, url.clone(), None, range).await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::RANGE_NOT_SATISFIABLE => Ok(None),
            _ => checked(Method::GET, &url, response).await.map(Some),
        }
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<(&'static str, Vec<u8>)>,
        range: Option<String>,
    ) -> Result<reqwest::Response, TransportError> {
        tracing::debug!(%method, %url, "sending request");
        let mut request = self
            .http
            .request(method, url.clone())
            .header(AUTHORIZATION, format!("Bearer {}", self.token));
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        if let Some((content_type, payload)) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(payload);
        }
        request.send().await.map_err(|e| TransportError::Request {
            url: url.to_string(),
            source: e,
        })
    }
}

async fn checked(
    method: Method,
    url: &Url,
    response: reqwest::Response,
) -> Result<Vec<u8>, TransportError> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(|e| TransportError::Request {
        url: url.to_string(),
        source: e,
    })?;
    if status.is_success() {
        return Ok(bytes.to_vec());
    }
    Err(TransportError::Status {
        method: method.to_string(),
        url: url.to_string(),
        status: status.as_u16(),
        body: String::from_utf8_lossy(&bytes).trim().to_owned(),
    })
}

fn decode<T: DeserializeOwned>(url: &Url, body: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(body).map_err(|e| TransportError::Decode {
        url: url.to_string(),
        source: e,
    })
}

/// `base` with percent-encoded path `segments` and `query` pairs appended.
pub fn api_url(base: &str, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidUrl {
        url: base.to_owned(),
        reason: reason.to_owned(),
    };
    let mut url = Url::parse(base).map_err(|e| invalid(&e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid("cannot be a base URL"))?
        .pop_if_empty()
        .extend(segments);
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to build HTTP client")]
    Client { source: reqwest::Error },

    #[error("invalid URL [{url}]: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {url} failed")]
    Request { url: String, source: reqwest::Error },

    #[error("{method} {url} returned HTTP {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("failed to encode request to {url}")]
    Encode {
        url: String,
        source: serde_json::Error,
    },

    #[error("failed to decode response from {url}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Network failures, throttling and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn kind(&self) -> appdeploy_core::ErrorKind {
        appdeploy_core::ErrorKind::Transport
    }
}
