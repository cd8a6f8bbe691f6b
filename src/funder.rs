//! Funder metadata from the Crossref funder registry

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::lookup::Lookup;
use crate::rate_limit::{RetryHelper, SharedRateLimiter};

/// Identifier meaning "no funder id"; never sent to the API
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FunderMetadata {
    pub name: Option<String>,
    pub location: Option<String>,
    pub work_count: Option<u64>,
    pub alt_names: Vec<String>,
}

#[derive(Error, Debug)]
pub enum FunderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Funder API returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Failed to decode funder response: {0}")]
    Decode(String),
}

impl FunderError {
    fn is_retryable(&self) -> bool {
        match self {
            FunderError::Http(e) => !e.is_decode() && !e.is_builder(),
            FunderError::Status { status, .. } => *status == 429 || *status >= 500,
            FunderError::Decode(_) => false,
        }
    }
}

#[async_trait]
pub trait FunderLookup: Send + Sync {
    async fn fetch(&self, funder_id: &str) -> Lookup<FunderMetadata>;
}

pub struct CrossrefClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryHelper,
    limiter: Option<SharedRateLimiter>,
}

impl CrossrefClient {
    pub fn new(base_url: &str, http: &HttpConfig) -> Result<Self, FunderError> {
        let client = reqwest::Client::builder()
            .user_agent(http.user_agent.clone())
            .timeout(http.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryHelper::from_http_config(http),
            limiter: None,
        })
    }

    pub fn with_rate_limit(mut self, limiter: SharedRateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// `Ok(None)` when the funder does not exist
    async fn fetch_once(&self, funder_id: &str) -> Result<Option<FunderMetadata>, FunderError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let url = format!("{}/{}", self.base_url, funder_id);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FunderError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FunderError::Decode(e.to_string()))?;
        Ok(Some(parse_funder_message(&body)))
    }
}

#[async_trait]
impl FunderLookup for CrossrefClient {
    async fn fetch(&self, funder_id: &str) -> Lookup<FunderMetadata> {
        let funder_id = funder_id.trim();
        if funder_id.is_empty() || funder_id == NOT_AVAILABLE {
            return Lookup::Absent;
        }

        debug!("Fetching funder metadata for {}", funder_id);
        match self
            .retry
            .with_retry(|| self.fetch_once(funder_id), FunderError::is_retryable)
            .await
        {
            Ok(Some(metadata)) => Lookup::Found(metadata),
            Ok(None) => Lookup::Absent,
            Err(e) => {
                warn!("Funder lookup failed for {}: {}", funder_id, e);
                Lookup::unavailable(e)
            }
        }
    }
}

/// Metadata for each distinct funder id, skipping ids that returned nothing
pub async fn fetch_funders<'a>(
    lookup: &dyn FunderLookup,
    funder_ids: impl IntoIterator<Item = &'a str>,
) -> HashMap<String, FunderMetadata> {
    let mut funders = HashMap::new();
    for id in funder_ids {
        if funders.contains_key(id) {
            continue;
        }
        if let Lookup::Found(metadata) = lookup.fetch(id).await {
            funders.insert(id.to_string(), metadata);
        }
    }
    funders
}

/// Read the `message` object of a funder response
pub fn parse_funder_message(body: &Value) -> FunderMetadata {
    let message = body.get("message").unwrap_or(&Value::Null);
    let text = |key: &str| {
        message
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    FunderMetadata {
        name: text("name"),
        location: text("location"),
        work_count: message.get("work-count").and_then(Value::as_u64),
        alt_names: message
            .get("alt-names")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default(),
    }
}
