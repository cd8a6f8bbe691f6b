use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DnsConfig;
use crate::lookup::{Coverage, Lookup};
use crate::rate_limit::SharedRateLimiter;

/// Record kinds gathered for every analyzed domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RecordKind {
    Ns,
    A,
    Aaaa,
    Mx,
    Cname,
    Soa,
    Txt,
}

impl RecordKind {
    pub const ALL: [RecordKind; 7] = [
        RecordKind::Ns,
        RecordKind::A,
        RecordKind::Aaaa,
        RecordKind::Mx,
        RecordKind::Cname,
        RecordKind::Soa,
        RecordKind::Txt,
    ];

    fn record_type(self) -> RecordType {
        match self {
            RecordKind::Ns => RecordType::NS,
            RecordKind::A => RecordType::A,
            RecordKind::Aaaa => RecordType::AAAA,
            RecordKind::Mx => RecordType::MX,
            RecordKind::Cname => RecordType::CNAME,
            RecordKind::Soa => RecordType::SOA,
            RecordKind::Txt => RecordType::TXT,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.record_type())
    }
}

/// Source of raw DNS answers. Implementations must isolate failures per call.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Values of one record kind, trailing dots removed. TXT answers are
    /// returned one string per record (chunks concatenated).
    async fn resolve(&self, domain: &str, kind: RecordKind) -> Lookup<Vec<String>>;

    /// TXT answers with each record's character-strings kept separate
    async fn resolve_txt(&self, domain: &str) -> Lookup<Vec<Vec<String>>> {
        self.resolve(domain, RecordKind::Txt)
            .await
            .map(|records| records.into_iter().map(|r| vec![r]).collect())
    }
}

/// Everything known about one domain's DNS. Never mutated after analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DnsRecordSet {
    pub domain: String,
    pub ns_records: BTreeSet<String>,
    pub a_records: BTreeSet<String>,
    pub aaaa_records: BTreeSet<String>,
    pub mx_records: Vec<String>,
    pub cname: Option<String>,
    pub soa_email: Option<String>,
    pub txt_records: Vec<Vec<String>>,
    pub spf_record: Option<String>,
}

impl DnsRecordSet {
    /// Record set with nothing in it, used when a domain could not be analyzed
    pub fn empty(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnavailableRecord {
    pub kind: RecordKind,
    pub reason: String,
}

/// Result of `DnsAnalyzer::analyze`: the record set plus the kinds that failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnsAnalysis {
    pub records: DnsRecordSet,
    pub unavailable: Vec<UnavailableRecord>,
}

impl DnsAnalysis {
    pub fn coverage(&self) -> Coverage {
        Coverage::from_counts(self.unavailable.len(), RecordKind::ALL.len())
    }
}

/// Shared-infrastructure evidence between two domains
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnsComparison {
    pub email_domain: String,
    pub website_domain: String,
    pub matching_nameservers: Vec<String>,
    pub matching_a_records: Vec<String>,
    pub matching_aaaa_records: Vec<String>,
    pub matching_mx_records: Vec<String>,
    pub soa_email_relation: bool,
    pub spf_similarity: bool,
    pub email_soa: Option<String>,
    pub website_soa: Option<String>,
    pub email_spf: Option<String>,
    pub website_spf: Option<String>,
    pub relation_score: u32,
}

/// First TXT string carrying an SPF policy
pub fn find_spf(txt_records: &[Vec<String>]) -> Option<String> {
    txt_records
        .iter()
        .flatten()
        .find(|record| record.contains("v=spf1"))
        .cloned()
}

/// Domain part of an SOA responsible-party name (`hostmaster.example.com` -> `example.com`)
pub fn soa_domain(soa_email: &str) -> &str {
    match soa_email.split_once('.') {
        Some((_, domain)) => domain,
        None => soa_email,
    }
}

fn intersection(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Vec<String> {
    a.intersection(b).cloned().collect()
}

fn soa_related(email: &DnsRecordSet, website: &DnsRecordSet) -> bool {
    let (Some(email_soa), Some(website_soa)) = (&email.soa_email, &website.soa_email) else {
        return false;
    };
    email_soa == website_soa
        || soa_domain(email_soa) == soa_domain(website_soa)
        || website_soa.contains(email.domain.as_str())
        || email_soa.contains(website.domain.as_str())
}

fn spf_related(email_spf: Option<&str>, website_spf: Option<&str>) -> bool {
    let (Some(email_spf), Some(website_spf)) = (email_spf, website_spf) else {
        return false;
    };
    let website_tokens: BTreeSet<&str> = website_spf.split_whitespace().collect();
    email_spf
        .split_whitespace()
        .filter(|token| website_tokens.contains(token))
        .any(|token| {
            token.starts_with("include:") || token.starts_with("ip4:") || token.starts_with("ip6:")
        })
}

/// Compare two record sets. Returns `None` when both describe the same domain.
pub fn compare(email: &DnsRecordSet, website: &DnsRecordSet) -> Option<DnsComparison> {
    if email.domain.eq_ignore_ascii_case(&website.domain) {
        return None;
    }

    let matching_nameservers = intersection(&email.ns_records, &website.ns_records);
    let matching_a_records = intersection(&email.a_records, &website.a_records);
    let matching_aaaa_records = intersection(&email.aaaa_records, &website.aaaa_records);

    let website_mx: BTreeSet<String> = website.mx_records.iter().cloned().collect();
    let email_mx: BTreeSet<String> = email.mx_records.iter().cloned().collect();
    let matching_mx_records = intersection(&email_mx, &website_mx);

    let soa_email_relation = soa_related(email, website);
    let spf_similarity = spf_related(email.spf_record.as_deref(), website.spf_record.as_deref());

    // Nameserver credit stops at two so big shared hosts don't dominate
    let mut relation_score = 25 * matching_nameservers.len().min(2) as u32;
    if !matching_a_records.is_empty() {
        relation_score += 30;
    }
    if !matching_aaaa_records.is_empty() {
        relation_score += 15;
    }
    if !matching_mx_records.is_empty() {
        relation_score += 20;
    }
    if soa_email_relation {
        relation_score += 10;
    }
    if spf_similarity {
        relation_score += 10;
    }

    Some(DnsComparison {
        email_domain: email.domain.clone(),
        website_domain: website.domain.clone(),
        matching_nameservers,
        matching_a_records,
        matching_aaaa_records,
        matching_mx_records,
        soa_email_relation,
        spf_similarity,
        email_soa: email.soa_email.clone(),
        website_soa: website.soa_email.clone(),
        email_spf: email.spf_record.clone(),
        website_spf: website.spf_record.clone(),
        relation_score: relation_score.min(100),
    })
}

/// Gathers record sets through a `DnsResolver`
#[derive(Clone)]
pub struct DnsAnalyzer {
    resolver: Arc<dyn DnsResolver>,
    limiter: Option<SharedRateLimiter>,
}

impl DnsAnalyzer {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver, limiter: None }
    }

    pub fn with_rate_limit(mut self, limiter: SharedRateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
    }

    async fn query(&self, domain: &str, kind: RecordKind) -> Lookup<Vec<String>> {
        self.throttle().await;
        self.resolver.resolve(domain, kind).await
    }

    async fn query_txt(&self, domain: &str) -> Lookup<Vec<Vec<String>>> {
        self.throttle().await;
        self.resolver.resolve_txt(domain).await
    }

    /// Query every record kind for `domain`. A failing kind only empties its own field.
    pub async fn analyze(&self, domain: &str) -> DnsAnalysis {
        debug!("Running DNS analysis for {}", domain);

        let (ns, a, aaaa, mx, cname, soa, txt) = futures::join!(
            self.query(domain, RecordKind::Ns),
            self.query(domain, RecordKind::A),
            self.query(domain, RecordKind::Aaaa),
            self.query(domain, RecordKind::Mx),
            self.query(domain, RecordKind::Cname),
            self.query(domain, RecordKind::Soa),
            self.query_txt(domain),
        );

        let mut unavailable = Vec::new();
        let mut note = |kind: RecordKind, reason: Option<&str>| {
            if let Some(reason) = reason {
                debug!("{} lookup unavailable for {}: {}", kind, domain, reason);
                unavailable.push(UnavailableRecord {
                    kind,
                    reason: reason.to_string(),
                });
            }
        };
        note(RecordKind::Ns, ns.failure_reason());
        note(RecordKind::A, a.failure_reason());
        note(RecordKind::Aaaa, aaaa.failure_reason());
        note(RecordKind::Mx, mx.failure_reason());
        note(RecordKind::Cname, cname.failure_reason());
        note(RecordKind::Soa, soa.failure_reason());
        note(RecordKind::Txt, txt.failure_reason());

        let mut mx_records = mx.unwrap_or_empty();
        mx_records.sort();
        let txt_records = txt.unwrap_or_empty();
        let spf_record = find_spf(&txt_records);

        let records = DnsRecordSet {
            domain: domain.to_string(),
            ns_records: ns.unwrap_or_empty().into_iter().collect(),
            a_records: a.unwrap_or_empty().into_iter().collect(),
            aaaa_records: aaaa.unwrap_or_empty().into_iter().collect(),
            mx_records,
            cname: cname.unwrap_or_empty().into_iter().next(),
            soa_email: soa.unwrap_or_empty().into_iter().next(),
            txt_records,
            spf_record,
        };

        let analysis = DnsAnalysis { records, unavailable };
        match analysis.coverage() {
            Coverage::Complete => debug!("DNS analysis complete for {}", domain),
            Coverage::Partial => info!(
                "DNS analysis for {} is partial ({} record kinds unavailable)",
                domain,
                analysis.unavailable.len()
            ),
            Coverage::Unavailable => warn!("DNS analysis for {} failed for every record kind", domain),
        }
        analysis
    }

    /// IPv4 addresses of a single domain, empty when unknown
    pub async fn a_records(&self, domain: &str) -> BTreeSet<String> {
        match self.query(domain, RecordKind::A).await {
            Lookup::Found(records) => records.into_iter().collect(),
            Lookup::Absent => BTreeSet::new(),
            Lookup::Unavailable(reason) => {
                debug!("A lookup unavailable for {}: {}", domain, reason);
                BTreeSet::new()
            }
        }
    }
}

/// Production resolver backed by hickory
pub struct HickoryDnsResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryDnsResolver {
    /// Build from configured name servers, or the system configuration when none are listed
    pub fn from_config(config: &DnsConfig) -> Result<Self> {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.timeout_secs);
        opts.attempts = config.attempts;
        opts.edns0 = true;

        if config.servers.is_empty() {
            let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
                Ok(resolver) => resolver,
                Err(e) => {
                    warn!("System DNS configuration unavailable ({}), using Cloudflare", e);
                    TokioAsyncResolver::tokio(ResolverConfig::cloudflare(), opts)
                }
            };
            return Ok(Self { resolver });
        }

        let mut resolver_config = ResolverConfig::new();
        for server in &config.servers {
            let socket_addr: SocketAddr = server.address.parse().map_err(|e| {
                anyhow!(
                    "Invalid DNS server address '{}' for server '{}': {}",
                    server.address,
                    server.name,
                    e
                )
            })?;
            resolver_config.add_name_server(NameServerConfig::new(socket_addr, Protocol::Udp));
            resolver_config.add_name_server(NameServerConfig::new(socket_addr, Protocol::Tcp));
        }

        Ok(Self {
            resolver: TokioAsyncResolver::tokio(resolver_config, opts),
        })
    }
}

fn classify<T>(domain: &str, kind: RecordKind, error: ResolveError) -> Lookup<T> {
    match error.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => Lookup::Absent,
        _ => {
            debug!("{} lookup failed for {}: {}", kind, domain, error);
            Lookup::unavailable(error)
        }
    }
}

fn trim_name(name: impl std::fmt::Display) -> String {
    name.to_string().trim_end_matches('.').to_string()
}

fn found_or_absent(values: Vec<String>) -> Lookup<Vec<String>> {
    if values.is_empty() {
        Lookup::Absent
    } else {
        Lookup::Found(values)
    }
}

#[async_trait]
impl DnsResolver for HickoryDnsResolver {
    async fn resolve(&self, domain: &str, kind: RecordKind) -> Lookup<Vec<String>> {
        match kind {
            RecordKind::Ns => match self.resolver.ns_lookup(domain).await {
                Ok(lookup) => found_or_absent(lookup.iter().map(trim_name).collect()),
                Err(e) => classify(domain, kind, e),
            },
            RecordKind::A => match self.resolver.ipv4_lookup(domain).await {
                Ok(lookup) => found_or_absent(lookup.iter().map(|a| a.to_string()).collect()),
                Err(e) => classify(domain, kind, e),
            },
            RecordKind::Aaaa => match self.resolver.ipv6_lookup(domain).await {
                Ok(lookup) => found_or_absent(lookup.iter().map(|aaaa| aaaa.to_string()).collect()),
                Err(e) => classify(domain, kind, e),
            },
            RecordKind::Mx => match self.resolver.mx_lookup(domain).await {
                Ok(lookup) => found_or_absent(lookup.iter().map(|mx| trim_name(mx.exchange())).collect()),
                Err(e) => classify(domain, kind, e),
            },
            RecordKind::Soa => match self.resolver.soa_lookup(domain).await {
                Ok(lookup) => found_or_absent(lookup.iter().map(|soa| trim_name(soa.rname())).collect()),
                Err(e) => classify(domain, kind, e),
            },
            RecordKind::Cname => match self.resolver.lookup(domain, kind.record_type()).await {
                Ok(lookup) => found_or_absent(
                    lookup
                        .iter()
                        .filter_map(|rdata| match rdata {
                            RData::CNAME(target) => Some(trim_name(target)),
                            _ => None,
                        })
                        .collect(),
                ),
                Err(e) => classify(domain, kind, e),
            },
            RecordKind::Txt => self
                .resolve_txt(domain)
                .await
                .map(|records| records.into_iter().map(|chunks| chunks.concat()).collect()),
        }
    }

    async fn resolve_txt(&self, domain: &str) -> Lookup<Vec<Vec<String>>> {
        match self.resolver.txt_lookup(domain).await {
            Ok(lookup) => {
                let records: Vec<Vec<String>> = lookup
                    .iter()
                    .map(|txt| {
                        txt.txt_data()
                            .iter()
                            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                            .collect()
                    })
                    .collect();
                if records.is_empty() {
                    Lookup::Absent
                } else {
                    Lookup::Found(records)
                }
            }
            Err(e) => classify(domain, RecordKind::Txt, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn set(domain: &str) -> DnsRecordSet {
        DnsRecordSet::empty(domain)
    }

    fn strings(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_same_domain_needs_no_comparison() {
        assert!(compare(&set("example.org"), &set("EXAMPLE.org")).is_none());
    }

    #[test]
    fn test_two_nameservers_and_one_a_record_score_80() {
        let mut email = set("mail.example.org");
        let mut website = set("example.org");
        email.ns_records = strings(&["ns1.host.net", "ns2.host.net", "ns3.host.net"]);
        website.ns_records = strings(&["ns1.host.net", "ns2.host.net"]);
        email.a_records = strings(&["192.0.2.10", "192.0.2.11"]);
        website.a_records = strings(&["192.0.2.10"]);

        let comparison = compare(&email, &website).unwrap();
        assert_eq!(comparison.matching_nameservers, vec!["ns1.host.net", "ns2.host.net"]);
        assert_eq!(comparison.matching_a_records, vec!["192.0.2.10"]);
        assert_eq!(comparison.relation_score, 80);
    }

    #[test]
    fn test_nameserver_credit_capped_at_two() {
        let mut email = set("a.example");
        let mut website = set("b.example");
        email.ns_records = strings(&["n1", "n2", "n3", "n4"]);
        website.ns_records = strings(&["n1", "n2", "n3", "n4"]);
        assert_eq!(compare(&email, &website).unwrap().relation_score, 50);
    }

    #[test]
    fn test_relation_score_capped_at_100() {
        let mut email = set("mail.example.org");
        let mut website = set("example.org");
        for s in [&mut email, &mut website] {
            s.ns_records = strings(&["ns1", "ns2"]);
            s.a_records = strings(&["192.0.2.1"]);
            s.aaaa_records = strings(&["2001:db8::1"]);
            s.mx_records = vec!["mx.example.org".to_string()];
            s.soa_email = Some("hostmaster.example.org".to_string());
            s.spf_record = Some("v=spf1 include:_spf.example.org -all".to_string());
        }
        let comparison = compare(&email, &website).unwrap();
        assert!(comparison.soa_email_relation);
        assert!(comparison.spf_similarity);
        assert_eq!(comparison.relation_score, 100);
    }

    #[test]
    fn test_soa_relation_by_domain_and_substring() {
        let mut email = set("cs.example.org");
        let mut website = set("example.org");
        email.soa_email = Some("root.example.org".to_string());
        website.soa_email = Some("hostmaster.example.org".to_string());
        assert!(compare(&email, &website).unwrap().soa_email_relation);

        website.soa_email = Some("dns-admin.provider.net".to_string());
        email.soa_email = Some("hostmaster.cs.example.org".to_string());
        // website domain appears inside the email-side SOA name
        assert!(compare(&email, &website).unwrap().soa_email_relation);

        email.soa_email = Some("hostmaster.other.net".to_string());
        assert!(!compare(&email, &website).unwrap().soa_email_relation);

        email.soa_email = None;
        assert!(!compare(&email, &website).unwrap().soa_email_relation);
    }

    #[test]
    fn test_spf_similarity_requires_shared_include_or_ip() {
        assert!(spf_related(
            Some("v=spf1 include:spf.protection.outlook.com -all"),
            Some("v=spf1 mx include:spf.protection.outlook.com ~all"),
        ));
        assert!(spf_related(
            Some("v=spf1 ip4:192.0.2.0/24 -all"),
            Some("v=spf1 ip4:192.0.2.0/24 ~all"),
        ));
        // Shared tokens that are neither includes nor ip ranges don't count
        assert!(!spf_related(Some("v=spf1 mx -all"), Some("v=spf1 mx -all")));
        assert!(!spf_related(Some("v=spf1 include:a.net -all"), None));
    }

    #[test]
    fn test_find_spf() {
        let txt = vec![
            vec!["google-site-verification=abc".to_string()],
            vec!["v=spf1 include:_spf.google.com ~all".to_string()],
        ];
        assert_eq!(find_spf(&txt).as_deref(), Some("v=spf1 include:_spf.google.com ~all"));
        assert_eq!(find_spf(&[]), None);
    }

    #[test]
    fn test_soa_domain() {
        assert_eq!(soa_domain("hostmaster.example.org"), "example.org");
        assert_eq!(soa_domain("root"), "root");
    }

    struct ScriptedResolver {
        answers: HashMap<RecordKind, Lookup<Vec<String>>>,
    }

    #[async_trait]
    impl DnsResolver for ScriptedResolver {
        async fn resolve(&self, _domain: &str, kind: RecordKind) -> Lookup<Vec<String>> {
            self.answers.get(&kind).cloned().unwrap_or(Lookup::Absent)
        }
    }

    #[tokio::test]
    async fn test_analyze_isolates_failures_per_record_kind() {
        let mut answers = HashMap::new();
        answers.insert(RecordKind::A, Lookup::Found(vec!["192.0.2.5".to_string()]));
        answers.insert(RecordKind::Mx, Lookup::Found(vec!["mx2.example.org".to_string(), "mx1.example.org".to_string()]));
        answers.insert(RecordKind::Ns, Lookup::unavailable("timed out"));
        answers.insert(RecordKind::Soa, Lookup::Found(vec!["hostmaster.example.org".to_string()]));
        answers.insert(
            RecordKind::Txt,
            Lookup::Found(vec!["v=spf1 ip4:192.0.2.0/24 -all".to_string()]),
        );
        let analyzer = DnsAnalyzer::new(Arc::new(ScriptedResolver { answers }));

        let analysis = analyzer.analyze("example.org").await;
        assert_eq!(analysis.coverage(), Coverage::Partial);
        assert_eq!(analysis.unavailable.len(), 1);
        assert_eq!(analysis.unavailable[0].kind, RecordKind::Ns);

        let records = analysis.records;
        assert!(records.ns_records.is_empty());
        assert_eq!(records.a_records, strings(&["192.0.2.5"]));
        assert_eq!(records.mx_records, vec!["mx1.example.org", "mx2.example.org"]);
        assert_eq!(records.soa_email.as_deref(), Some("hostmaster.example.org"));
        assert_eq!(records.spf_record.as_deref(), Some("v=spf1 ip4:192.0.2.0/24 -all"));
        assert_eq!(records.cname, None);
    }
}
