//! Research organization registry client (ROR).
//!
//! Items are parsed leniently so both the v1 and v2 response shapes work:
//! v1 carries `name`, string `links` and an `external_ids` object keyed by
//! type; v2 carries `names[]`, `links[]` objects and an `external_ids` array.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::HttpConfig;
use crate::lookup::Lookup;
use crate::query::RegistryQuery;
use crate::rate_limit::{RetryHelper, SharedRateLimiter};

/// Registry queries kept in flight at once
const QUERY_CONCURRENCY: usize = 4;

/// Organization returned by the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub id: Option<String>,
    pub name: String,
    pub links: Vec<String>,
    /// Identifier type -> identifiers, e.g. `FundRef -> ["100000001"]`
    pub external_ids: BTreeMap<String, Vec<String>>,
}

impl Candidate {
    /// First funder registry identifier, if any
    pub fn funder_id(&self) -> Option<&str> {
        self.external_ids
            .iter()
            .find(|(kind, _)| kind.eq_ignore_ascii_case("fundref"))
            .and_then(|(_, ids)| ids.first())
            .map(String::as_str)
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Registry returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Failed to decode registry response: {0}")]
    Decode(String),
}

impl RegistryError {
    /// Transport failures, timeouts, throttling and server errors are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Http(e) => !e.is_decode() && !e.is_builder(),
            RegistryError::Status { status, .. } => *status == 429 || *status >= 500,
            RegistryError::Decode(_) => false,
        }
    }
}

#[async_trait]
pub trait RegistryLookup: Send + Sync {
    async fn search(&self, query: &str) -> Lookup<Vec<Candidate>>;
}

pub struct RorClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryHelper,
    limiter: Option<SharedRateLimiter>,
}

impl RorClient {
    pub fn new(base_url: &str, http: &HttpConfig) -> Result<Self, RegistryError> {
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

    async fn search_once(&self, query: &str) -> Result<Vec<Candidate>, RegistryError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("query.advanced", query)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;
        Ok(parse_search_response(&body))
    }
}

#[async_trait]
impl RegistryLookup for RorClient {
    async fn search(&self, query: &str) -> Lookup<Vec<Candidate>> {
        debug!("Registry query: {}", query);
        match self
            .retry
            .with_retry(|| self.search_once(query), RegistryError::is_retryable)
            .await
        {
            Ok(candidates) if candidates.is_empty() => Lookup::Absent,
            Ok(candidates) => Lookup::Found(candidates),
            Err(e) => Lookup::unavailable(e),
        }
    }
}

/// Candidates from a search response body (`{"items": [...]}`)
pub fn parse_search_response(body: &Value) -> Vec<Candidate> {
    body.get("items")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_organization).collect())
        .unwrap_or_default()
}

/// One registry organization record in either response shape
pub fn parse_organization(item: &Value) -> Option<Candidate> {
    let object = item.as_object()?;

    let id = object.get("id").and_then(Value::as_str).map(str::to_string);
    let name = object
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| display_name(object.get("names")?))
        .unwrap_or_default();

    if id.is_none() && name.is_empty() {
        return None;
    }

    let links = object
        .get("links")
        .and_then(Value::as_array)
        .map(|links| {
            links
                .iter()
                .filter_map(|link| match link {
                    Value::String(url) => Some(url.clone()),
                    Value::Object(entry) => entry.get("value").and_then(Value::as_str).map(str::to_string),
                    _ => None,
                })
                .filter(|url| !url.trim().is_empty())
                .collect()
        })
        .unwrap_or_default();

    let external_ids = object
        .get("external_ids")
        .map(parse_external_ids)
        .unwrap_or_default();

    Some(Candidate {
        id,
        name,
        links,
        external_ids,
    })
}

fn display_name(names: &Value) -> Option<String> {
    let names = names.as_array()?;
    let has_type = |entry: &Value, wanted: &str| {
        entry
            .get("types")
            .and_then(Value::as_array)
            .is_some_and(|types| types.iter().any(|t| t.as_str() == Some(wanted)))
    };
    names
        .iter()
        .find(|entry| has_type(entry, "ror_display"))
        .or_else(|| names.first())
        .and_then(|entry| entry.get("value"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `all` may be a single string or a list
fn id_values(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(id)) if !id.is_empty() => vec![id.clone()],
        Some(Value::Array(ids)) => ids
            .iter()
            .filter_map(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_external_ids(value: &Value) -> BTreeMap<String, Vec<String>> {
    let mut ids = BTreeMap::new();
    match value {
        Value::Object(by_type) => {
            for (kind, entry) in by_type {
                let mut all = id_values(entry.get("all"));
                if all.is_empty() {
                    all = id_values(entry.get("preferred"));
                }
                if !all.is_empty() {
                    ids.insert(kind.clone(), all);
                }
            }
        }
        Value::Array(entries) => {
            for entry in entries {
                let Some(kind) = entry.get("type").and_then(Value::as_str) else {
                    continue;
                };
                let mut all = id_values(entry.get("all"));
                if all.is_empty() {
                    all = id_values(entry.get("preferred"));
                }
                if !all.is_empty() {
                    ids.entry(kind.to_string()).or_insert_with(Vec::new).extend(all);
                }
            }
        }
        _ => {}
    }
    ids
}

/// Run every query, keeping result order by query. Failed queries are skipped.
pub async fn fetch_candidates(registry: &dyn RegistryLookup, queries: &[RegistryQuery]) -> Vec<Candidate> {
    let outcomes: Vec<Lookup<Vec<Candidate>>> = stream::iter(queries)
        .map(|query| registry.search(&query.query))
        .buffered(QUERY_CONCURRENCY)
        .collect()
        .await;

    let mut candidates = Vec::new();
    for (query, outcome) in queries.iter().zip(outcomes) {
        match outcome {
            Lookup::Found(found) => {
                debug!("{} candidates for {}", found.len(), query.variant);
                candidates.extend(found);
            }
            Lookup::Absent => debug!("No candidates for {}", query.variant),
            Lookup::Unavailable(reason) => warn!("Registry query '{}' failed: {}", query.query, reason),
        }
    }
    info!("Registry returned {} candidates for {} queries", candidates.len(), queries.len());
    candidates
}

/// Merge candidates describing the same organization (same id, else same name).
/// The first occurrence keeps its position; links and identifiers are unioned in order.
pub fn aggregate_candidates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut merged: Vec<Candidate> = Vec::new();

    for candidate in candidates {
        let existing = merged.iter_mut().find(|seen| match (&seen.id, &candidate.id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => seen.name == candidate.name,
            _ => false,
        });

        match existing {
            Some(seen) => {
                for link in candidate.links {
                    if !seen.links.contains(&link) {
                        seen.links.push(link);
                    }
                }
                for (kind, ids) in candidate.external_ids {
                    let entry = seen.external_ids.entry(kind).or_default();
                    for id in ids {
                        if !entry.contains(&id) {
                            entry.push(id);
                        }
                    }
                }
            }
            None => merged.push(candidate),
        }
    }

    merged
}
