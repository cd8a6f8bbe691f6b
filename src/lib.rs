pub mod cli;
pub mod config;
pub mod dns;
pub mod domain_utils;
pub mod export;
pub mod finder;
pub mod funder;
pub mod logger;
pub mod lookup;
pub mod query;
pub mod ranker;
pub mod rate_limit;
pub mod registry;
pub mod scoring;
pub mod whois;

pub use domain_utils::{DomainParts, SuffixTable};
pub use finder::{FinderReport, OrganizationFinder};
pub use lookup::Lookup;
pub use ranker::RankedResult;
pub use registry::Candidate;
pub use scoring::{Component, MatchScorer, ScoreBreakdown};
