//! Domain decomposition against an injected public-suffix table.
//!
//! `SuffixTable` is an immutable value built once (from the bundled Public
//! Suffix List or a list file named in the config) and passed to whatever
//! needs it. Decomposition never fails: hosts whose top-level label no rule
//! covers degrade to a bare registrable domain with an empty suffix.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use publicsuffix::{List, Psl};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Bundled Public Suffix List (ICANN and private sections)
pub const BUNDLED_SUFFIXES: &str = include_str!("../data/public_suffix_list.dat");

/// Bundled two-letter country codes
pub const BUNDLED_COUNTRY_CODES: &str = include_str!("../data/country_codes.txt");

static BUNDLED_LIST: Lazy<Arc<List>> = Lazy::new(|| {
    Arc::new(
        BUNDLED_SUFFIXES
            .parse::<List>()
            .expect("bundled public suffix list is valid"),
    )
});

static BUNDLED_CODES: Lazy<Arc<BTreeSet<String>>> =
    Lazy::new(|| Arc::new(parse_country_codes(BUNDLED_COUNTRY_CODES)));

#[derive(Error, Debug)]
pub enum SuffixListError {
    #[error("Failed to read public suffix list: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse public suffix list: {0}")]
    Parse(String),
}

/// A domain split into subdomain labels, registrable label and public suffix.
///
/// `registrable_domain` is the single label left of the suffix (`example` in
/// `mail.example.ac.uk`), matching how the registry and scorer compare names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainParts {
    pub subdomain_chain: Vec<String>,
    pub registrable_domain: String,
    pub public_suffix: String,
}

impl DomainParts {
    /// Registrable label plus suffix (`example.ac.uk`), the name WHOIS knows about
    pub fn registered_name(&self) -> String {
        match (self.registrable_domain.is_empty(), self.public_suffix.is_empty()) {
            (true, _) => self.public_suffix.clone(),
            (false, true) => self.registrable_domain.clone(),
            (false, false) => format!("{}.{}", self.registrable_domain, self.public_suffix),
        }
    }

    /// True when there is a subdomain other than a lone `www`
    pub fn has_subdomain(&self) -> bool {
        match self.subdomain_chain.as_slice() {
            [] => false,
            [only] => only != "www",
            _ => true,
        }
    }

    /// Subdomain labels with a leading `www` removed
    pub fn meaningful_subdomains(&self) -> &[String] {
        match self.subdomain_chain.split_first() {
            Some((first, rest)) if first == "www" => rest,
            _ => &self.subdomain_chain,
        }
    }

    /// Last dot-segment of the public suffix (`uk` for `ac.uk`)
    pub fn top_level(&self) -> Option<&str> {
        self.public_suffix.rsplit('.').next().filter(|s| !s.is_empty())
    }
}

/// Immutable public-suffix and country-code knowledge
#[derive(Clone)]
pub struct SuffixTable {
    list: Arc<List>,
    country_codes: Arc<BTreeSet<String>>,
}

impl fmt::Debug for SuffixTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuffixTable")
            .field("country_codes", &self.country_codes.len())
            .finish_non_exhaustive()
    }
}

impl Default for SuffixTable {
    fn default() -> Self {
        Self::bundled()
    }
}

impl SuffixTable {
    /// Build a table from Public Suffix List text and a country-code list
    pub fn new(psl_text: &str, country_codes_text: &str) -> Result<Self, SuffixListError> {
        let list = psl_text
            .parse::<List>()
            .map_err(|e| SuffixListError::Parse(e.to_string()))?;
        Ok(Self {
            list: Arc::new(list),
            country_codes: Arc::new(parse_country_codes(country_codes_text)),
        })
    }

    /// The table shipped with the binary
    pub fn bundled() -> Self {
        Self {
            list: BUNDLED_LIST.clone(),
            country_codes: BUNDLED_CODES.clone(),
        }
    }

    /// Load suffix rules from a PSL file, keeping the bundled country codes
    pub fn from_psl_file(path: &Path) -> Result<Self, SuffixListError> {
        let text = fs::read_to_string(path)?;
        let list = text
            .parse::<List>()
            .map_err(|e| SuffixListError::Parse(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded public suffix list from {}", path.display());
        Ok(Self {
            list: Arc::new(list),
            country_codes: BUNDLED_CODES.clone(),
        })
    }

    pub fn is_country_code(&self, code: &str) -> bool {
        self.country_codes.contains(&code.to_lowercase())
    }

    /// Decompose a bare domain (or URL) without touching a `www` label
    pub fn decompose(&self, domain: &str) -> DomainParts {
        self.split_host(&normalize_host(domain))
    }

    /// Decompose a website link: scheme, path and a leading `www.` are removed
    pub fn decompose_link(&self, link: &str) -> DomainParts {
        self.split_host(&host_of_link(link))
    }

    fn split_host(&self, host: &str) -> DomainParts {
        if host.is_empty() {
            return DomainParts::default();
        }

        // The list falls back to the implicit `*` rule for unlisted TLDs; those
        // hosts keep their whole name
        let public_suffix = match self.list.suffix(host.as_bytes()) {
            Some(suffix) if suffix.is_known() => String::from_utf8_lossy(suffix.as_bytes()).into_owned(),
            _ => {
                return DomainParts {
                    subdomain_chain: Vec::new(),
                    registrable_domain: host.to_string(),
                    public_suffix: String::new(),
                };
            }
        };

        if public_suffix.len() >= host.len() {
            // The host is itself a public suffix
            return DomainParts {
                subdomain_chain: Vec::new(),
                registrable_domain: String::new(),
                public_suffix,
            };
        }

        let prefix = host[..host.len() - public_suffix.len()].trim_end_matches('.');
        let mut labels: Vec<String> = prefix
            .split('.')
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        let registrable_domain = labels.pop().unwrap_or_default();

        DomainParts {
            subdomain_chain: labels,
            registrable_domain,
            public_suffix,
        }
    }
}

fn parse_country_codes(text: &str) -> BTreeSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_lowercase)
        .collect()
}

/// Domain part of an email address: everything after the last `@`
pub fn domain_of_email(email: &str) -> String {
    let domain = email.rsplit('@').next().unwrap_or(email);
    normalize_host(domain)
}

/// Normalized host of a link with any leading `www.` removed
pub fn host_of_link(link: &str) -> String {
    let host = normalize_host(link);
    match host.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => host,
    }
}

/// Lowercased host of a URL or bare domain, without scheme, credentials,
/// port, path or trailing dot
pub fn normalize_host(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let host = match Url::parse(&with_scheme) {
        Ok(url) => url.host_str().map(str::to_string),
        Err(_) => None,
    };

    let host = host.unwrap_or_else(|| {
        // Best effort for strings the URL parser rejects
        let without_scheme = trimmed.split("://").last().unwrap_or(trimmed);
        let authority = without_scheme.split(['/', '?', '#']).next().unwrap_or("");
        let host_port = authority.rsplit('@').next().unwrap_or(authority);
        host_port.split(':').next().unwrap_or("").to_string()
    });

    host.trim_end_matches('.').to_lowercase()
}
