use serde::Serialize;

use crate::dns::DnsComparison;
use crate::registry::Candidate;
use crate::scoring::ScoreBreakdown;
use crate::whois::WhoisComparison;

/// A scored candidate together with the evidence behind its score
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub candidate: Candidate,
    pub score: ScoreBreakdown,
    pub dns_comparison: Option<DnsComparison>,
    pub whois_comparison: Option<WhoisComparison>,
}

/// Order by total score, highest first. Equal totals keep their incoming order.
/// `limit` only truncates; scores are never altered.
pub fn rank(mut results: Vec<RankedResult>, limit: Option<usize>) -> Vec<RankedResult> {
    results.sort_by(|a, b| b.score.total().cmp(&a.score.total()));
    if let Some(limit) = limit {
        results.truncate(limit);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::Component;

    fn result(name: &str, total: i32) -> RankedResult {
        RankedResult {
            candidate: Candidate {
                name: name.to_string(),
                ..Default::default()
            },
            score: ScoreBreakdown::from_values([(Component::FullyQualifiedDomainNameMatch, total)]),
            dns_comparison: None,
            whois_comparison: None,
        }
    }

    fn names(results: &[RankedResult]) -> Vec<&str> {
        results.iter().map(|r| r.candidate.name.as_str()).collect()
    }

    #[test]
    fn test_descending_and_stable() {
        let ranked = rank(
            vec![result("a", 0), result("b", 100), result("c", 0), result("d", 100), result("e", 50)],
            None,
        );
        assert_eq!(names(&ranked), vec!["b", "d", "e", "a", "c"]);
    }

    #[test]
    fn test_limit_truncates() {
        let ranked = rank(vec![result("a", 10), result("b", 100), result("c", 50)], Some(2));
        assert_eq!(names(&ranked), vec!["b", "c"]);
        assert_eq!(ranked[1].score.total(), 50);
        assert!(rank(vec![result("a", 1)], Some(0)).is_empty());
        assert_eq!(rank(Vec::new(), Some(3)).len(), 0);
    }
}
