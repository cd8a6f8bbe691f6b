use std::collections::{BTreeMap, HashMap};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use whois_rust::{WhoIs, WhoIsLookupOptions};

use crate::config::WhoisConfig;
use crate::lookup::Lookup;
use crate::rate_limit::SharedRateLimiter;

/// Registration data relevant for comparing two domains. Missing fields are `None`, never empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WhoisRecord {
    pub domain_name: Option<String>,
    pub org: Option<String>,
    pub name: Option<String>,
    pub emails: Option<Vec<String>>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl WhoisRecord {
    pub fn is_empty(&self) -> bool {
        *self == WhoisRecord::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WhoisField {
    DomainName,
    Org,
    Name,
    Address,
    Emails,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WhoisComparison {
    pub matched_fields: BTreeMap<WhoisField, Vec<String>>,
    /// Sum of field weights before wraparound
    pub raw_score: u32,
    /// `raw_score % 100`
    pub match_score: u32,
    /// Domains whose lookup could not be performed
    pub unavailable: Vec<String>,
}

fn both_equal<'a>(a: &'a Option<String>, b: &Option<String>) -> Option<&'a String> {
    match (a, b) {
        (Some(x), Some(y)) if x == y => Some(x),
        _ => None,
    }
}

/// Weigh the fields two records have in common
pub fn compare_records(a: &WhoisRecord, b: &WhoisRecord) -> WhoisComparison {
    let mut matched_fields = BTreeMap::new();
    let mut raw_score = 0;

    if let Some(domain) = both_equal(&a.domain_name, &b.domain_name) {
        matched_fields.insert(WhoisField::DomainName, vec![domain.clone()]);
        raw_score += 100;
    }
    if let Some(org) = both_equal(&a.org, &b.org) {
        matched_fields.insert(WhoisField::Org, vec![org.clone()]);
        raw_score += 100;
    }
    if let Some(name) = both_equal(&a.name, &b.name) {
        matched_fields.insert(WhoisField::Name, vec![name.clone()]);
        raw_score += 100;
    }

    let address = both_equal(&a.address, &b.address);
    let location_matches = both_equal(&a.city, &b.city).is_some()
        && both_equal(&a.state, &b.state).is_some()
        && both_equal(&a.country, &b.country).is_some();
    if let (Some(address), true) = (address, location_matches) {
        matched_fields.insert(WhoisField::Address, vec![address.clone()]);
        raw_score += 50;
    }

    // Awarded whenever both sides list emails, shared or not
    if let (Some(emails_a), Some(emails_b)) = (&a.emails, &b.emails) {
        let shared: Vec<String> = emails_a
            .iter()
            .filter(|email| emails_b.contains(email))
            .cloned()
            .collect();
        if !shared.is_empty() {
            matched_fields.insert(WhoisField::Emails, shared);
        }
        raw_score += 80;
    }

    WhoisComparison {
        matched_fields,
        raw_score,
        match_score: raw_score % 100,
        unavailable: Vec::new(),
    }
}

/// Fetches registration data for a domain
#[async_trait]
pub trait WhoisSource: Send + Sync {
    async fn fetch(&self, domain: &str) -> Lookup<WhoisRecord>;
}

static DOMAIN_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^[ \t]*domain(?:[ \t]+name)?[ \t]*:\s*([^\s]+)").unwrap());
static ORG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:registrant[ \t]+organi[sz]ation|registrant[ \t]+org|org|orgname|organi[sz]ation|org-name)[ \t]*:[ \t]*(.+)$").unwrap()
});
static NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:registrant[ \t]+name|registrant[ \t]+contact[ \t]+name|person)[ \t]*:[ \t]*(.+)$").unwrap()
});
static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:registrant[ \t]+street\d*|registrant[ \t]+address|address)[ \t]*:[ \t]*(.+)$").unwrap()
});
static CITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^[ \t]*(?:registrant[ \t]+city|city)[ \t]*:[ \t]*(.+)$").unwrap());
static STATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:registrant[ \t]+state/province|registrant[ \t]+state|state/province|state)[ \t]*:[ \t]*(.+)$").unwrap()
});
static COUNTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:registrant[ \t]+country(?:[ \t]+code)?|country)[ \t]*:[ \t]*(.+)$").unwrap()
});
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap());

const PRIVACY_PLACEHOLDERS: &[&str] = &[
    "redacted",
    "privacy",
    "not disclosed",
    "withheld",
    "data protected",
    "gdpr masked",
    "statutory masking",
    "non-public data",
    "n/a",
];

fn is_placeholder(value: &str) -> bool {
    let lower = value.to_lowercase();
    PRIVACY_PLACEHOLDERS.iter().any(|placeholder| lower.contains(placeholder))
}

fn clean_value(value: &str) -> Option<String> {
    let cleaned = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() || is_placeholder(&cleaned) {
        None
    } else {
        Some(cleaned)
    }
}

fn first_field(regex: &Regex, text: &str) -> Option<String> {
    regex
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .find_map(|value| clean_value(value.as_str()))
}

/// Extract a `WhoisRecord` from raw WHOIS response text
pub fn parse_whois_text(text: &str) -> WhoisRecord {
    let mut emails: Vec<String> = Vec::new();
    for email in EMAIL_RE.find_iter(text) {
        let email = email.as_str().trim_end_matches('.').to_lowercase();
        if !emails.contains(&email) {
            emails.push(email);
        }
    }

    WhoisRecord {
        domain_name: first_field(&DOMAIN_NAME_RE, text).map(|d| d.trim_end_matches('.').to_lowercase()),
        org: first_field(&ORG_RE, text),
        name: first_field(&NAME_RE, text),
        emails: if emails.is_empty() { None } else { Some(emails) },
        address: first_field(&ADDRESS_RE, text),
        city: first_field(&CITY_RE, text),
        state: first_field(&STATE_RE, text),
        country: first_field(&COUNTRY_RE, text),
    }
}

/// whois-rust lookup with an optional system `whois` fallback
pub struct NativeWhoisSource {
    client: Option<Arc<WhoIs>>,
    timeout: Duration,
    system_fallback: bool,
}

impl NativeWhoisSource {
    pub fn from_config(config: &WhoisConfig) -> Self {
        let mut servers: serde_json::Map<String, serde_json::Value> = config
            .servers
            .iter()
            .map(|(tld, host)| (tld.trim_start_matches('.').to_lowercase(), serde_json::Value::from(host.clone())))
            .collect();
        servers
            .entry(String::new())
            .or_insert_with(|| serde_json::Value::from("whois.iana.org"));

        let client = match WhoIs::from_string(serde_json::Value::Object(servers).to_string()) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!("Failed to create WHOIS client from configured servers: {}", e);
                None
            }
        };

        Self {
            client,
            timeout: config.timeout(),
            system_fallback: config.system_fallback,
        }
    }

    async fn try_native_whois(&self, domain: &str) -> Result<String> {
        let client = self
            .client
            .clone()
            .ok_or_else(|| anyhow!("WHOIS client not configured"))?;
        let options = WhoIsLookupOptions::from_string(domain)
            .map_err(|e| anyhow!("Invalid domain for WHOIS lookup: {}", e))?;

        match tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || client.lookup(options)),
        )
        .await
        {
            Ok(Ok(Ok(text))) => Ok(text),
            Ok(Ok(Err(e))) => Err(anyhow!("whois-rust lookup failed: {}", e)),
            Ok(Err(_)) => Err(anyhow!("whois-rust lookup task panicked")),
            Err(_) => Err(anyhow!("whois-rust lookup timed out")),
        }
    }

    async fn try_system_whois(&self, domain: &str) -> Result<String> {
        let domain_owned = domain.to_string();

        match tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || execute_whois_command(&domain_owned)),
        )
        .await
        {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(e))) => Err(anyhow!("System whois failed: {}", e)),
            Ok(Err(_)) => Err(anyhow!("System whois task panicked")),
            Err(_) => Err(anyhow!("System whois timed out")),
        }
    }
}

fn execute_whois_command(domain: &str) -> Result<String> {
    let whois_commands: &[&str] = if cfg!(windows) {
        &["whois.exe", "whois"]
    } else {
        &["whois", "/usr/bin/whois", "/usr/local/bin/whois"]
    };

    for cmd in whois_commands {
        if let Ok(output) = Command::new(cmd).arg(domain).output() {
            if output.status.success() {
                return Ok(String::from_utf8_lossy(&output.stdout).to_string());
            }
        }
    }

    Err(anyhow!("No working whois command found"))
}

#[async_trait]
impl WhoisSource for NativeWhoisSource {
    async fn fetch(&self, domain: &str) -> Lookup<WhoisRecord> {
        debug!("Trying whois-rust lookup for domain: {}", domain);
        let text = match self.try_native_whois(domain).await {
            Ok(text) => text,
            Err(native_err) if self.system_fallback => {
                debug!("{} for {}, trying system whois", native_err, domain);
                match self.try_system_whois(domain).await {
                    Ok(text) => text,
                    Err(e) => return Lookup::unavailable(format!("{}; {}", native_err, e)),
                }
            }
            Err(e) => return Lookup::unavailable(e),
        };

        let record = parse_whois_text(&text);
        if record.is_empty() {
            Lookup::Absent
        } else {
            Lookup::Found(record)
        }
    }
}

/// Compares registration data of two domains, caching fetched records
#[derive(Clone)]
pub struct WhoisComparator {
    source: Arc<dyn WhoisSource>,
    limiter: Option<SharedRateLimiter>,
    cache: Arc<Mutex<HashMap<String, Lookup<WhoisRecord>>>>,
}

impl WhoisComparator {
    pub fn new(source: Arc<dyn WhoisSource>) -> Self {
        Self {
            source,
            limiter: None,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_rate_limit(mut self, limiter: SharedRateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Registration data for `domain`; empty domains are absent without a query
    pub async fn fetch(&self, domain: &str) -> Lookup<WhoisRecord> {
        let key = domain.trim().to_lowercase();
        if key.is_empty() {
            return Lookup::Absent;
        }
        if let Some(cached) = self.cache.lock().await.get(&key) {
            return cached.clone();
        }

        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
        let lookup = self.source.fetch(&key).await;
        if let Some(reason) = lookup.failure_reason() {
            warn!("WHOIS lookup unavailable for {}: {}", key, reason);
        }
        self.cache.lock().await.insert(key, lookup.clone());
        lookup
    }

    /// Fetch both domains and compare their records
    pub async fn compare(&self, domain_a: &str, domain_b: &str) -> WhoisComparison {
        let (a, b) = futures::join!(self.fetch(domain_a), self.fetch(domain_b));
        compare_lookups(domain_a, &a, domain_b, &b)
    }
}

/// Compare two lookup outcomes; unavailable sides compare as empty records
pub fn compare_lookups(
    domain_a: &str,
    a: &Lookup<WhoisRecord>,
    domain_b: &str,
    b: &Lookup<WhoisRecord>,
) -> WhoisComparison {
    let empty = WhoisRecord::default();
    let mut comparison = compare_records(a.as_found().unwrap_or(&empty), b.as_found().unwrap_or(&empty));
    for (domain, lookup) in [(domain_a, a), (domain_b, b)] {
        if lookup.is_unavailable() && !comparison.unavailable.iter().any(|d| d == domain) {
            comparison.unavailable.push(domain.to_string());
        }
    }
    comparison
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record() -> WhoisRecord {
        WhoisRecord {
            domain_name: Some("example.org".to_string()),
            org: Some("Example University".to_string()),
            name: Some("Network Operations".to_string()),
            emails: Some(vec!["hostmaster@example.org".to_string()]),
            address: Some("1 Campus Road".to_string()),
            city: Some("Springfield".to_string()),
            state: Some("IL".to_string()),
            country: Some("US".to_string()),
        }
    }

    #[test]
    fn test_org_and_emails_wrap_to_80() {
        let a = WhoisRecord {
            org: Some("Example University".to_string()),
            emails: Some(vec!["a@example.org".to_string()]),
            ..Default::default()
        };
        let b = WhoisRecord {
            org: Some("Example University".to_string()),
            emails: Some(vec!["b@example.org".to_string()]),
            ..Default::default()
        };
        let comparison = compare_records(&a, &b);
        assert_eq!(comparison.raw_score, 180);
        assert_eq!(comparison.match_score, 80);
        assert!(comparison.matched_fields.contains_key(&WhoisField::Org));
        assert!(!comparison.matched_fields.contains_key(&WhoisField::Emails));
    }

    #[test]
    fn test_identical_records_wrap_to_30() {
        let comparison = compare_records(&record(), &record());
        assert_eq!(comparison.raw_score, 430);
        assert_eq!(comparison.match_score, 30);
        assert_eq!(
            comparison.matched_fields.get(&WhoisField::Emails),
            Some(&vec!["hostmaster@example.org".to_string()])
        );
    }

    #[test]
    fn test_address_requires_full_location() {
        let a = record();
        let mut b = record();
        b.state = None;
        let comparison = compare_records(&a, &b);
        assert!(!comparison.matched_fields.contains_key(&WhoisField::Address));
        assert_eq!(comparison.raw_score, 380);
    }

    #[test]
    fn test_absent_fields_never_match() {
        let comparison = compare_records(&WhoisRecord::default(), &WhoisRecord::default());
        assert_eq!(comparison.raw_score, 0);
        assert!(comparison.matched_fields.is_empty());
    }

    #[test]
    fn test_parse_gtld_response() {
        let text = "Domain Name: EXAMPLE.ORG\n\
            Registrar: Some Registrar LLC\n\
            Registrant Organization: Example University\n\
            Registrant Street: 1 Campus Road\n\
            Registrant City: Springfield\n\
            Registrant State/Province: IL\n\
            Registrant Country: US\n\
            Registrant Email: Hostmaster@Example.org\n\
            Registrar Abuse Contact Email: abuse@registrar.example\n";
        let record = parse_whois_text(text);
        assert_eq!(record.domain_name.as_deref(), Some("example.org"));
        assert_eq!(record.org.as_deref(), Some("Example University"));
        assert_eq!(record.address.as_deref(), Some("1 Campus Road"));
        assert_eq!(record.city.as_deref(), Some("Springfield"));
        assert_eq!(record.state.as_deref(), Some("IL"));
        assert_eq!(record.country.as_deref(), Some("US"));
        assert_eq!(
            record.emails,
            Some(vec!["hostmaster@example.org".to_string(), "abuse@registrar.example".to_string()])
        );
    }

    #[test]
    fn test_privacy_placeholders_are_absent() {
        let text = "Domain Name: example.com\n\
            Registrant Organization: REDACTED FOR PRIVACY\n\
            Registrant Name: Data Protected\n";
        let record = parse_whois_text(text);
        assert_eq!(record.org, None);
        assert_eq!(record.name, None);
        assert_eq!(record.emails, None);
    }

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WhoisSource for CountingSource {
        async fn fetch(&self, domain: &str) -> Lookup<WhoisRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if domain == "down.example" {
                return Lookup::unavailable("connection refused");
            }
            Lookup::Found(WhoisRecord {
                domain_name: Some(domain.to_string()),
                org: Some("Shared Org".to_string()),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_comparator_caches_and_reports_unavailable() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0) });
        let comparator = WhoisComparator::new(source.clone());

        let comparison = comparator.compare("a.example", "b.example").await;
        assert_eq!(comparison.raw_score, 100);
        assert!(comparison.unavailable.is_empty());

        let comparison = comparator.compare("a.example", "down.example").await;
        assert_eq!(comparison.raw_score, 0);
        assert_eq!(comparison.unavailable, vec!["down.example".to_string()]);

        // a.example was served from the cache the second time
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_domain_is_absent_without_query() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0) });
        let comparator = WhoisComparator::new(source.clone());
        assert_eq!(comparator.fetch("").await, Lookup::Absent);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
