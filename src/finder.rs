//! End-to-end search: email -> registry candidates -> evidence -> ranked results

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::dns::{compare, DnsAnalysis, DnsAnalyzer, DnsRecordSet, HickoryDnsResolver};
use crate::domain_utils::{domain_of_email, host_of_link, SuffixTable};
use crate::query::{QueryGenerator, QueryTemplates, RegistryQuery};
use crate::ranker::{rank, RankedResult};
use crate::rate_limit::ServiceLimiters;
use crate::registry::{aggregate_candidates, fetch_candidates, Candidate, RegistryLookup, RorClient};
use crate::scoring::{DnsEvidence, MatchScorer};
use crate::whois::{NativeWhoisSource, WhoisComparator};

/// Called after each candidate is evaluated with `(done, total, candidate name)`
pub type ProgressCallback = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

/// Outcome of one search. An empty `results` list is the "no results" outcome.
#[derive(Debug, Clone, Serialize)]
pub struct FinderReport {
    pub email: String,
    pub email_domain: String,
    pub email_dns: DnsAnalysis,
    pub queries: Vec<RegistryQuery>,
    /// Distinct candidates after aggregation
    pub candidate_count: usize,
    /// All candidates, best first
    pub results: Vec<RankedResult>,
}

impl FinderReport {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

pub struct OrganizationFinder {
    suffixes: SuffixTable,
    queries: QueryGenerator,
    scorer: MatchScorer,
    dns: DnsAnalyzer,
    whois: WhoisComparator,
    registry: Arc<dyn RegistryLookup>,
    concurrency: usize,
    progress: Option<ProgressCallback>,
}

impl OrganizationFinder {
    pub fn new(
        suffixes: SuffixTable,
        templates: QueryTemplates,
        dns: DnsAnalyzer,
        whois: WhoisComparator,
        registry: Arc<dyn RegistryLookup>,
    ) -> Self {
        Self {
            queries: QueryGenerator::new(suffixes.clone(), templates),
            scorer: MatchScorer::new(suffixes.clone()),
            suffixes,
            dns,
            whois,
            registry,
            concurrency: 4,
            progress: None,
        }
    }

    /// Production wiring: hickory DNS, whois-rust, ROR over HTTP
    pub fn from_config(config: &AppConfig, limiters: &ServiceLimiters) -> Result<Self> {
        let suffixes = match &config.suffixes.public_suffix_list {
            Some(path) => SuffixTable::from_psl_file(path)
                .with_context(|| format!("Failed to load public suffix list from {}", path.display()))?,
            None => SuffixTable::bundled(),
        };

        let resolver = HickoryDnsResolver::from_config(&config.dns).context("Failed to create DNS resolver")?;
        let dns = DnsAnalyzer::new(Arc::new(resolver)).with_rate_limit(limiters.dns.clone());
        let whois = WhoisComparator::new(Arc::new(NativeWhoisSource::from_config(&config.whois)))
            .with_rate_limit(limiters.whois.clone());
        let registry = RorClient::new(&config.registry.base_url, &config.http)
            .context("Failed to create registry client")?
            .with_rate_limit(limiters.http.clone());

        Ok(Self::new(
            suffixes,
            QueryTemplates::from_config(&config.registry),
            dns,
            whois,
            Arc::new(registry),
        )
        .with_concurrency(config.analysis.concurrency))
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub async fn find(&self, email: &str) -> FinderReport {
        let email_domain = domain_of_email(email);
        info!("Searching organizations for {}", email_domain);

        let email_dns = if email_domain.is_empty() {
            DnsAnalysis {
                records: DnsRecordSet::empty(&email_domain),
                unavailable: Vec::new(),
            }
        } else {
            self.dns.analyze(&email_domain).await
        };

        let queries = self.queries.generate(email);
        let candidates = aggregate_candidates(fetch_candidates(self.registry.as_ref(), &queries).await);
        let candidate_count = candidates.len();

        let mut report = FinderReport {
            email: email.to_string(),
            email_domain,
            email_dns,
            queries,
            candidate_count,
            results: Vec::new(),
        };

        if candidates.is_empty() {
            info!("No registry candidates for {}", report.email_domain);
            return report;
        }
        info!("Evaluating {} candidate organizations", candidate_count);

        let done = AtomicUsize::new(0);
        let mut evaluated: Vec<(usize, RankedResult)> = stream::iter(candidates.into_iter().enumerate())
            .map(|(index, candidate)| {
                let done = &done;
                let report = &report;
                async move {
                    let result = self.evaluate(email, &report.email_domain, &report.email_dns.records, candidate).await;
                    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(progress) = &self.progress {
                        progress(finished, candidate_count, &result.candidate.name);
                    }
                    (index, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        // Registry order decides ties in the ranking
        evaluated.sort_by_key(|(index, _)| *index);
        report.results = rank(evaluated.into_iter().map(|(_, result)| result).collect(), None);
        report
    }

    async fn evaluate(
        &self,
        email: &str,
        email_domain: &str,
        email_dns: &DnsRecordSet,
        candidate: Candidate,
    ) -> RankedResult {
        let Some(first_link) = candidate.links.first() else {
            debug!("{} has no links, nothing to compare", candidate.name);
            let score = self.scorer.score(email, &candidate, None, None);
            return RankedResult {
                candidate,
                score,
                dns_comparison: None,
                whois_comparison: None,
            };
        };

        let website_domain = host_of_link(first_link);
        let mut link_a_records: HashMap<String, BTreeSet<String>> = HashMap::new();
        link_a_records.insert(email_domain.to_string(), email_dns.a_records.clone());

        let dns_comparison = if !website_domain.is_empty() && website_domain != email_domain {
            let website_dns = self.dns.analyze(&website_domain).await;
            link_a_records.insert(website_domain.clone(), website_dns.records.a_records.clone());
            compare(email_dns, &website_dns.records)
        } else {
            None
        };

        for link in &candidate.links {
            let host = host_of_link(link);
            if host.is_empty() || link_a_records.contains_key(&host) {
                continue;
            }
            let addresses = self.dns.a_records(&host).await;
            link_a_records.insert(host, addresses);
        }

        let email_registered = self.suffixes.decompose(email_domain).registered_name();
        let website_registered = self.suffixes.decompose(&website_domain).registered_name();
        let whois_comparison = self.whois.compare(&email_registered, &website_registered).await;

        let evidence = DnsEvidence {
            email_records: email_dns.clone(),
            link_a_records,
            comparison: dns_comparison.clone(),
        };
        let score = self
            .scorer
            .score(email, &candidate, Some(&evidence), Some(&whois_comparison));
        debug!("{} scored {}", candidate.name, score.total());

        RankedResult {
            candidate,
            score,
            dns_comparison,
            whois_comparison: Some(whois_comparison),
        }
    }
}
