//! REST fallback: one-shot fetches used before the first live event and
//! whenever the live channel is down.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::types::{OverviewSnapshot, ServerIdentity};

pub const OVERVIEW_PATH: &str = "/api/servers/overview";
pub const HEALTH_PATH: &str = "/api/health";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error! status: {status} ({url})")]
    Request {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("could not reach {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),
}

impl FetchError {
    /// HTTP status for non-success responses.
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            FetchError::Request { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base: Url,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base: Url) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { base, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    // Paths are appended to the base so a prefix like `/dashboard` survives.
    fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}{}", self.base.as_str().trim_end_matches('/'), path))
    }

    async fn get_json(&self, url: &Url) -> Result<Value, FetchError> {
        debug!(%url, "fetching");
        let result = self.fetch(url).await;
        if let Err(e) = &result {
            warn!(error = %e, "API request failed");
        }
        result
    }

    async fn fetch(&self, url: &Url) -> Result<Value, FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let response = self.http.get(url.clone()).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Request {
                url: url.to_string(),
                status,
            });
        }
        let body = response.bytes().await.map_err(transport)?;
        serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// `GET /api/servers/overview`, decoded into a snapshot.
    pub async fn fetch_overview(&self) -> Result<OverviewSnapshot, FetchError> {
        let url = self.endpoint(OVERVIEW_PATH)?;
        let body = self.get_json(&url).await?;
        OverviewSnapshot::from_value(&body).map_err(|source| {
            let err = FetchError::Decode {
                url: url.to_string(),
                source,
            };
            warn!(error = %err, "API request failed");
            err
        })
    }

    /// One server's full document, ready for a keyed merge.
    pub async fn fetch_server(&self, id: ServerIdentity) -> Result<Value, FetchError> {
        self.get_json(&self.endpoint(id.api_path())?).await
    }

    pub async fn health(&self) -> Result<Value, FetchError> {
        self.get_json(&self.endpoint(HEALTH_PATH)?).await
    }
}
