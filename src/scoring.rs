//! Composite match scoring of one registry candidate against an email address.
//!
//! Every component is bounded on its own and the total is always the plain sum
//! of the components. An exact host match on any link short-circuits: the
//! breakdown is then 100 for the FQDN component and zero everywhere else.

use std::collections::{BTreeSet, HashMap};

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::dns::{soa_domain, DnsComparison, DnsRecordSet};
use crate::domain_utils::{domain_of_email, host_of_link, DomainParts, SuffixTable};
use crate::registry::Candidate;
use crate::whois::WhoisComparison;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    FullyQualifiedDomainNameMatch,
    DomainMatch,
    EmailIsSubdomainOfWebsiteDomain,
    WebsiteIsSubdomainOfEmailDomain,
    SubdomainMismatch,
    DomainOfEmailInWebsiteSubdomain,
    DomainOfWebsiteInEmailSubdomain,
    CrossrefBonus,
    DnsVerificationBonus,
    DnsSimilarityBonus,
    WhoisBonus,
}

impl Component {
    pub const ALL: [Component; 11] = [
        Component::FullyQualifiedDomainNameMatch,
        Component::DomainMatch,
        Component::EmailIsSubdomainOfWebsiteDomain,
        Component::WebsiteIsSubdomainOfEmailDomain,
        Component::SubdomainMismatch,
        Component::DomainOfEmailInWebsiteSubdomain,
        Component::DomainOfWebsiteInEmailSubdomain,
        Component::CrossrefBonus,
        Component::DnsVerificationBonus,
        Component::DnsSimilarityBonus,
        Component::WhoisBonus,
    ];

    /// Serialized field name
    pub fn key(self) -> &'static str {
        match self {
            Component::FullyQualifiedDomainNameMatch => "fully_qualified_domain_name_match",
            Component::DomainMatch => "domain_match",
            Component::EmailIsSubdomainOfWebsiteDomain => "email_is_subdomain_of_website_domain",
            Component::WebsiteIsSubdomainOfEmailDomain => "website_is_subdomain_of_email_domain",
            Component::SubdomainMismatch => "subdomain_mismatch",
            Component::DomainOfEmailInWebsiteSubdomain => "domain_of_email_in_website_subdomain",
            Component::DomainOfWebsiteInEmailSubdomain => "domain_of_website_in_email_subdomain",
            Component::CrossrefBonus => "crossref_bonus",
            Component::DnsVerificationBonus => "dns_verification_bonus",
            Component::DnsSimilarityBonus => "dns_similarity_bonus",
            Component::WhoisBonus => "whois_bonus",
        }
    }

    /// Inclusive `(min, max)` range of the component
    pub fn bounds(self) -> (i32, i32) {
        match self {
            Component::FullyQualifiedDomainNameMatch => (0, 100),
            Component::DomainMatch => (0, 80),
            Component::EmailIsSubdomainOfWebsiteDomain => (0, 10),
            Component::WebsiteIsSubdomainOfEmailDomain => (-10, 0),
            Component::SubdomainMismatch => (-10, 0),
            Component::DomainOfEmailInWebsiteSubdomain => (0, 20),
            Component::DomainOfWebsiteInEmailSubdomain => (0, 20),
            Component::CrossrefBonus => (0, 5),
            Component::DnsVerificationBonus => (0, 10),
            Component::DnsSimilarityBonus => (0, 15),
            Component::WhoisBonus => (0, 20),
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Per-component scores and their sum. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScoreBreakdown {
    values: [i32; 11],
    total: i32,
}

impl ScoreBreakdown {
    /// Build from component values; each is clamped to its bounds before summing
    pub fn from_values(values: impl IntoIterator<Item = (Component, i32)>) -> Self {
        let mut breakdown = ScoreBreakdown::default();
        for (component, value) in values {
            let (min, max) = component.bounds();
            breakdown.values[component.index()] = value.clamp(min, max);
        }
        breakdown.total = breakdown.values.iter().sum();
        breakdown
    }

    pub fn get(&self, component: Component) -> i32 {
        self.values[component.index()]
    }

    pub fn total(&self) -> i32 {
        self.total
    }

    pub fn iter(&self) -> impl Iterator<Item = (Component, i32)> + '_ {
        Component::ALL.iter().map(move |c| (*c, self.get(*c)))
    }
}

impl Serialize for ScoreBreakdown {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Component::ALL.len() + 1))?;
        for (component, value) in self.iter() {
            map.serialize_entry(component.key(), &value)?;
        }
        map.serialize_entry("total", &self.total)?;
        map.end()
    }
}

/// DNS facts available when scoring a candidate
#[derive(Debug, Clone, Default)]
pub struct DnsEvidence {
    pub email_records: DnsRecordSet,
    /// Link host -> IPv4 addresses
    pub link_a_records: HashMap<String, BTreeSet<String>>,
    /// Email domain vs first website domain, when they differ
    pub comparison: Option<DnsComparison>,
}

fn fold_max(current: i32, value: i32) -> i32 {
    current.max(value)
}

fn fold_min(current: i32, value: i32) -> i32 {
    current.min(value)
}

/// Host-structure signals of a single link
#[derive(Debug, Default, Clone, Copy)]
struct LinkSignals {
    domain_match: i32,
    email_is_subdomain: i32,
    website_is_subdomain: i32,
    subdomain_mismatch: i32,
    email_in_website_subdomain: i32,
    website_in_email_subdomain: i32,
    crossref: i32,
}

#[derive(Debug, Clone)]
pub struct MatchScorer {
    suffixes: SuffixTable,
}

impl MatchScorer {
    pub fn new(suffixes: SuffixTable) -> Self {
        Self { suffixes }
    }

    pub fn score(
        &self,
        email: &str,
        candidate: &Candidate,
        dns: Option<&DnsEvidence>,
        whois: Option<&WhoisComparison>,
    ) -> ScoreBreakdown {
        if candidate.links.is_empty() {
            return ScoreBreakdown::default();
        }

        let email_host = domain_of_email(email);
        if !email_host.is_empty()
            && candidate.links.iter().any(|link| host_of_link(link) == email_host)
        {
            return ScoreBreakdown::from_values([(Component::FullyQualifiedDomainNameMatch, 100)]);
        }

        let email_parts = self.suffixes.decompose(&email_host);
        let has_funder = candidate.funder_id().is_some();

        let folded = candidate
            .links
            .iter()
            .map(|link| link_signals(&email_parts, &self.suffixes.decompose_link(link), has_funder))
            .fold(LinkSignals::default(), |acc, s| LinkSignals {
                domain_match: fold_max(acc.domain_match, s.domain_match),
                email_is_subdomain: fold_max(acc.email_is_subdomain, s.email_is_subdomain),
                website_is_subdomain: fold_min(acc.website_is_subdomain, s.website_is_subdomain),
                subdomain_mismatch: fold_min(acc.subdomain_mismatch, s.subdomain_mismatch),
                email_in_website_subdomain: fold_max(acc.email_in_website_subdomain, s.email_in_website_subdomain),
                website_in_email_subdomain: fold_max(acc.website_in_email_subdomain, s.website_in_email_subdomain),
                crossref: fold_max(acc.crossref, s.crossref),
            });

        let dns_verification = dns.map_or(0, |evidence| dns_verification_bonus(&candidate.links, evidence));
        let dns_similarity = dns
            .and_then(|evidence| evidence.comparison.as_ref())
            .map_or(0, |comparison| dns_similarity_bonus(comparison.relation_score));
        let whois_bonus = whois.map_or(0, |comparison| whois_bonus(comparison.match_score));

        ScoreBreakdown::from_values([
            (Component::DomainMatch, folded.domain_match),
            (Component::EmailIsSubdomainOfWebsiteDomain, folded.email_is_subdomain),
            (Component::WebsiteIsSubdomainOfEmailDomain, folded.website_is_subdomain),
            (Component::SubdomainMismatch, folded.subdomain_mismatch),
            (Component::DomainOfEmailInWebsiteSubdomain, folded.email_in_website_subdomain),
            (Component::DomainOfWebsiteInEmailSubdomain, folded.website_in_email_subdomain),
            (Component::CrossrefBonus, folded.crossref),
            (Component::DnsVerificationBonus, dns_verification),
            (Component::DnsSimilarityBonus, dns_similarity),
            (Component::WhoisBonus, whois_bonus),
        ])
    }
}

fn link_signals(email: &DomainParts, link: &DomainParts, has_funder: bool) -> LinkSignals {
    let mut signals = LinkSignals::default();
    let email_sub = email.has_subdomain();
    let link_sub = link.has_subdomain();

    if !email.registrable_domain.is_empty() && email.registrable_domain == link.registrable_domain {
        signals.domain_match = 80;
        if has_funder {
            signals.crossref = 5;
        }
        // Any email subdomain label counts here, `www` included
        if !email.subdomain_chain.is_empty() && !link_sub {
            signals.email_is_subdomain = 10;
        }
        if !email_sub && link_sub {
            signals.website_is_subdomain = -10;
        }
        if email_sub && link_sub {
            signals.subdomain_mismatch = -10;
        }
    } else {
        if !email.registrable_domain.is_empty()
            && link.meaningful_subdomains().contains(&email.registrable_domain)
        {
            signals.email_in_website_subdomain = 20;
        }
        if !link.registrable_domain.is_empty()
            && email.meaningful_subdomains().contains(&link.registrable_domain)
        {
            signals.website_in_email_subdomain = 20;
        }
    }

    signals
}

/// 10 on the first link sharing an IPv4 address with the email domain,
/// otherwise 5 when the email SOA domain and a link name each other
pub fn dns_verification_bonus(links: &[String], evidence: &DnsEvidence) -> i32 {
    let email_a = &evidence.email_records.a_records;
    let soa = evidence
        .email_records
        .soa_email
        .as_deref()
        .map(soa_domain)
        .filter(|domain| !domain.is_empty());

    let mut bonus = 0;
    for link in links {
        let link_host = host_of_link(link);
        let shares_address = evidence
            .link_a_records
            .get(&link_host)
            .is_some_and(|link_a| !email_a.is_disjoint(link_a));
        if shares_address {
            return 10;
        }

        if let Some(soa) = soa {
            if link.contains(soa) || (!link_host.is_empty() && soa.contains(link_host.as_str())) {
                bonus = bonus.max(5);
            }
        }
    }
    bonus
}

pub fn dns_similarity_bonus(relation_score: u32) -> i32 {
    (relation_score / 7).min(15) as i32
}

pub fn whois_bonus(match_score: u32) -> i32 {
    (match_score / 5).min(20) as i32
}
