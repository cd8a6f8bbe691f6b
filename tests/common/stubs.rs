//! In-memory DNS and WHOIS sources for deterministic tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use rormatch::dns::{DnsResolver, RecordKind};
use rormatch::lookup::Lookup;
use rormatch::whois::{WhoisRecord, WhoisSource};

#[derive(Default)]
pub struct StaticResolver {
    answers: HashMap<(String, RecordKind), Lookup<Vec<String>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, domain: &str, kind: RecordKind, values: &[&str]) -> Self {
        self.answers.insert(
            (domain.to_string(), kind),
            Lookup::Found(values.iter().map(|v| v.to_string()).collect()),
        );
        self
    }

    pub fn failing(mut self, domain: &str, kind: RecordKind) -> Self {
        self.answers
            .insert((domain.to_string(), kind), Lookup::unavailable("SERVFAIL"));
        self
    }
}

#[async_trait]
impl DnsResolver for StaticResolver {
    async fn resolve(&self, domain: &str, kind: RecordKind) -> Lookup<Vec<String>> {
        self.answers
            .get(&(domain.to_string(), kind))
            .cloned()
            .unwrap_or(Lookup::Absent)
    }
}

#[derive(Default)]
pub struct StaticWhois {
    records: HashMap<String, Lookup<WhoisRecord>>,
    pub calls: AtomicUsize,
}

impl StaticWhois {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, domain: &str, record: WhoisRecord) -> Self {
        self.records.insert(domain.to_string(), Lookup::Found(record));
        self
    }

    pub fn failing(mut self, domain: &str) -> Self {
        self.records
            .insert(domain.to_string(), Lookup::unavailable("connection reset"));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WhoisSource for StaticWhois {
    async fn fetch(&self, domain: &str) -> Lookup<WhoisRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.records.get(domain).cloned().unwrap_or(Lookup::Absent)
    }
}
