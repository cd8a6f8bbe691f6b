use std::collections::HashMap;
use std::fmt::{self, Write};

use anyhow::Result;
use serde::Serialize;

use crate::dns::{DnsAnalysis, DnsComparison};
use crate::finder::FinderReport;
use crate::funder::{FunderMetadata, NOT_AVAILABLE};
use crate::lookup::Coverage;
use crate::ranker::RankedResult;
use crate::scoring::{Component, ScoreBreakdown};
use crate::whois::WhoisComparison;

const RULE_WIDTH: usize = 80;

/// Results to show: the first `limit` entries, or all of them
pub fn displayed(report: &FinderReport, limit: Option<usize>) -> &[RankedResult] {
    let shown = limit.unwrap_or(report.results.len()).min(report.results.len());
    &report.results[..shown]
}

fn breakdown_line<W: Write>(
    out: &mut W,
    indent: &str,
    label: &str,
    score: &ScoreBreakdown,
    component: Component,
) -> fmt::Result {
    let (min, max) = component.bounds();
    let bound = if min < 0 { min } else { max };
    writeln!(
        out,
        "{}{:<width$}: {:>3}/{:<3} points",
        indent,
        label,
        score.get(component),
        bound,
        width = 42 - indent.len()
    )
}

fn render_breakdown<W: Write>(out: &mut W, score: &ScoreBreakdown) -> fmt::Result {
    writeln!(out, "\n   Score Breakdown:")?;
    let top = "      ";
    let nested = "         ";
    breakdown_line(out, top, "Fully Qualified Domain Match", score, Component::FullyQualifiedDomainNameMatch)?;
    breakdown_line(out, top, "Base Domain Match", score, Component::DomainMatch)?;
    if score.get(Component::DomainMatch) > 0 {
        breakdown_line(out, nested, "Email is Subdomain of Website", score, Component::EmailIsSubdomainOfWebsiteDomain)?;
        breakdown_line(out, nested, "Website is Subdomain of Email", score, Component::WebsiteIsSubdomainOfEmailDomain)?;
        breakdown_line(out, nested, "Subdomain Mismatch Penalty", score, Component::SubdomainMismatch)?;
    } else {
        breakdown_line(out, top, "Email in Website Subdomain", score, Component::DomainOfEmailInWebsiteSubdomain)?;
        breakdown_line(out, top, "Website in Email Subdomain", score, Component::DomainOfWebsiteInEmailSubdomain)?;
    }
    breakdown_line(out, top, "DNS Verification Bonus", score, Component::DnsVerificationBonus)?;
    breakdown_line(out, top, "DNS Similarity Bonus", score, Component::DnsSimilarityBonus)?;
    breakdown_line(out, top, "WHOIS Bonus", score, Component::WhoisBonus)?;
    breakdown_line(out, top, "Crossref Bonus", score, Component::CrossrefBonus)
}

fn render_funder<W: Write>(out: &mut W, funder_id: &str, funder: Option<&FunderMetadata>) -> fmt::Result {
    writeln!(out, "\n   Crossref ID: {}", funder_id)?;
    let Some(funder) = funder else {
        return Ok(());
    };

    writeln!(out, "   Crossref Data:")?;
    writeln!(out, "      Name        : {}", funder.name.as_deref().unwrap_or(NOT_AVAILABLE))?;
    writeln!(out, "      Location    : {}", funder.location.as_deref().unwrap_or(NOT_AVAILABLE))?;
    let works = funder
        .work_count
        .map(|count| count.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    writeln!(out, "      Works Count : {}", works)?;
    if !funder.alt_names.is_empty() {
        let preview = funder.alt_names.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
        let more = if funder.alt_names.len() > 3 { ", ..." } else { "" };
        writeln!(out, "      Also known as: {}{}", preview, more)?;
    }
    Ok(())
}

fn render_list<W: Write>(out: &mut W, title: &str, values: &[String]) -> fmt::Result {
    if values.is_empty() {
        return Ok(());
    }
    writeln!(out, "\n       {}:", title)?;
    for value in values {
        writeln!(out, "       - {}", value)?;
    }
    Ok(())
}

fn render_dns_comparison<W: Write>(
    out: &mut W,
    email_domain: &str,
    comparison: Option<&DnsComparison>,
) -> fmt::Result {
    let Some(comparison) = comparison else {
        writeln!(out, "\n   DNS Comparison")?;
        return writeln!(out, "   No comparison available (same domain: {})", email_domain);
    };

    writeln!(
        out,
        "\n   DNS Comparison: {} and {}",
        comparison.email_domain, comparison.website_domain
    )?;
    writeln!(out, "   {}", "-".repeat(60))?;
    writeln!(out, "\n       Domain Relationship Score: {}/100", comparison.relation_score)?;

    render_list(out, "Matching Name Servers", &comparison.matching_nameservers)?;
    render_list(out, "Matching A Records (IPs)", &comparison.matching_a_records)?;
    render_list(out, "Matching AAAA Records (IPs)", &comparison.matching_aaaa_records)?;
    render_list(out, "Matching MX Records", &comparison.matching_mx_records)?;

    if comparison.soa_email_relation {
        writeln!(out, "\n       Related SOA emails found")?;
        writeln!(out, "              Email SOA: {}", comparison.email_soa.as_deref().unwrap_or(""))?;
        writeln!(out, "              Website SOA: {}", comparison.website_soa.as_deref().unwrap_or(""))?;
    }
    if comparison.spf_similarity {
        writeln!(out, "\n       Related SPF configurations found")?;
        writeln!(out, "              Email SPF: {}", comparison.email_spf.as_deref().unwrap_or(""))?;
        writeln!(out, "              Website SPF: {}", comparison.website_spf.as_deref().unwrap_or(""))?;
    }
    Ok(())
}

fn render_whois<W: Write>(out: &mut W, whois: &WhoisComparison) -> fmt::Result {
    if whois.matched_fields.is_empty() && whois.unavailable.is_empty() {
        return Ok(());
    }
    writeln!(out, "\n   WHOIS Comparison (match score {}/100):", whois.match_score)?;
    for (field, values) in &whois.matched_fields {
        let name = serde_json::to_value(field)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        writeln!(out, "       {}: {}", name, values.join(", "))?;
    }
    if !whois.unavailable.is_empty() {
        writeln!(out, "       lookup unavailable for: {}", whois.unavailable.join(", "))?;
    }
    Ok(())
}

fn render_email_dns<W: Write>(out: &mut W, analysis: &DnsAnalysis) -> fmt::Result {
    let records = &analysis.records;
    writeln!(
        out,
        "DNS for {}: {} NS, {} A, {} AAAA, {} MX{}{}",
        records.domain,
        records.ns_records.len(),
        records.a_records.len(),
        records.aaaa_records.len(),
        records.mx_records.len(),
        if records.soa_email.is_some() { ", SOA" } else { "" },
        if records.spf_record.is_some() { ", SPF" } else { "" },
    )?;
    if analysis.coverage() != Coverage::Complete {
        let kinds: Vec<String> = analysis.unavailable.iter().map(|u| u.kind.to_string()).collect();
        writeln!(out, "   (lookups unavailable: {})", kinds.join(", "))?;
    }
    Ok(())
}

/// Human-readable report of a search
pub fn render_text(
    report: &FinderReport,
    limit: Option<usize>,
    funders: &HashMap<String, FunderMetadata>,
) -> Result<String> {
    let mut out = String::new();
    write_text(&mut out, report, limit, funders)?;
    Ok(out)
}

/// Write the human-readable report to any formatter sink
pub fn write_text<W: Write>(
    out: &mut W,
    report: &FinderReport,
    limit: Option<usize>,
    funders: &HashMap<String, FunderMetadata>,
) -> fmt::Result {
    writeln!(out, "Generated registry queries:")?;
    for query in &report.queries {
        writeln!(out, "  {}", query.query)?;
    }
    writeln!(out)?;
    render_email_dns(out, &report.email_dns)?;

    if report.is_empty() {
        return writeln!(out, "\nNo registry results found");
    }

    writeln!(out, "\nFound {} potential organization matches", report.results.len())?;
    let shown = displayed(report, limit);
    if shown.len() < report.results.len() {
        writeln!(out, "Limiting the displayed results to {}", shown.len())?;
    }

    writeln!(out, "\nOrganization Matches:")?;
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;

    for (position, result) in shown.iter().enumerate() {
        let candidate = &result.candidate;
        writeln!(out, "\n{}. {}", position + 1, candidate.name)?;
        writeln!(out, "   Match Score: {}%", result.score.total())?;
        writeln!(out, "   Website(s): {}", candidate.links.join(", "))?;

        render_breakdown(out, &result.score)?;

        let funder_id = candidate.funder_id().unwrap_or(NOT_AVAILABLE);
        render_funder(out, funder_id, funders.get(funder_id))?;

        if let Some(whois) = &result.whois_comparison {
            render_whois(out, whois)?;
        }
        render_dns_comparison(out, &report.email_domain, result.dns_comparison.as_ref())?;

        writeln!(out, "\n{}", "-".repeat(RULE_WIDTH))?;
    }

    Ok(())
}

#[derive(Serialize)]
struct JsonExport<'a> {
    email: &'a str,
    email_domain: &'a str,
    email_dns: &'a DnsAnalysis,
    queries: Vec<&'a str>,
    total_matches: usize,
    results: Vec<JsonResult<'a>>,
}

#[derive(Serialize)]
struct JsonResult<'a> {
    rank: usize,
    #[serde(flatten)]
    result: &'a RankedResult,
    funder: Option<&'a FunderMetadata>,
}

/// Pretty JSON document of the displayed results
pub fn render_json(
    report: &FinderReport,
    limit: Option<usize>,
    funders: &HashMap<String, FunderMetadata>,
) -> Result<String> {
    let export = JsonExport {
        email: &report.email,
        email_domain: &report.email_domain,
        email_dns: &report.email_dns,
        queries: report.queries.iter().map(|q| q.query.as_str()).collect(),
        total_matches: report.results.len(),
        results: displayed(report, limit)
            .iter()
            .enumerate()
            .map(|(i, result)| JsonResult {
                rank: i + 1,
                result,
                funder: result.candidate.funder_id().and_then(|id| funders.get(id)),
            })
            .collect(),
    };

    Ok(serde_json::to_string_pretty(&export)?)
}
