//! Outcome type shared by every external lookup (DNS, WHOIS, registry, funder).
//!
//! Scoring treats `Absent` and `Unavailable` the same way (no signal), but the
//! distinction is kept so diagnostics can tell "confirmed empty" apart from
//! "could not determine".

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Lookup<T> {
    /// The service answered with data
    Found(T),
    /// The service answered and confirmed there is nothing
    Absent,
    /// The service could not be queried (timeout, transport error, bad response)
    Unavailable(String),
}

impl<T> Lookup<T> {
    pub fn unavailable(reason: impl std::fmt::Display) -> Self {
        Lookup::Unavailable(reason.to_string())
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Lookup::Unavailable(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_found(&self) -> Option<&T> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::Absent => Lookup::Absent,
            Lookup::Unavailable(reason) => Lookup::Unavailable(reason),
        }
    }

    /// Reason text when the lookup could not be performed
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Lookup::Unavailable(reason) => Some(reason),
            _ => None,
        }
    }
}

impl<T: Default> Lookup<T> {
    /// Collapse to a plain value, treating absent and unavailable alike
    pub fn unwrap_or_empty(self) -> T {
        self.found().unwrap_or_default()
    }
}

/// How much of a multi-part lookup succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    Complete,
    Partial,
    Unavailable,
}

impl Coverage {
    pub fn from_counts(failed: usize, total: usize) -> Self {
        if failed == 0 {
            Coverage::Complete
        } else if failed >= total {
            Coverage::Unavailable
        } else {
            Coverage::Partial
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_found_and_absent_collapse_for_scoring() {
        let found: Lookup<Vec<String>> = Lookup::Found(vec!["1.2.3.4".to_string()]);
        let absent: Lookup<Vec<String>> = Lookup::Absent;
        let failed: Lookup<Vec<String>> = Lookup::unavailable("timed out");

        assert_eq!(found.unwrap_or_empty(), vec!["1.2.3.4".to_string()]);
        assert!(absent.unwrap_or_empty().is_empty());
        assert_eq!(failed.failure_reason(), Some("timed out"));
        assert!(failed.unwrap_or_empty().is_empty());
    }

    #[test]
    fn test_map_preserves_status() {
        let failed: Lookup<u32> = Lookup::unavailable("boom");
        assert!(failed.map(|v| v + 1).is_unavailable());
        assert_eq!(Lookup::Found(1).map(|v| v + 1), Lookup::Found(2));
        assert_eq!(Lookup::<u32>::Absent.map(|v| v + 1), Lookup::Absent);
    }

    #[test]
    fn test_coverage_from_counts() {
        assert_eq!(Coverage::from_counts(0, 7), Coverage::Complete);
        assert_eq!(Coverage::from_counts(3, 7), Coverage::Partial);
        assert_eq!(Coverage::from_counts(7, 7), Coverage::Unavailable);
    }
}
