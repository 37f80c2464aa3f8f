//! Classification of agent failures into transient vs. logic failures.
//!
//! Matching free text is approximate: a novel transient failure may be missed,
//! and a logic failure that mentions a keyword is misread as transient. The
//! classifier is a trait so callers can swap the policy.

use regex::{Regex, RegexBuilder};

/// Kind of failure observed for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Infrastructure trouble (network, timeouts). Not the attempt's fault.
    Transient,
    /// The attempt ran and did not fix the problem.
    Logic,
}

pub trait FailureClassifier {
    fn classify(&self, text: &str) -> FailureClass;
}

/// Default transient-network indicators.
pub const DEFAULT_TRANSIENT_KEYWORDS: [&str; 8] = [
    "network",
    "econnrefused",
    "enotfound",
    "eai_again",
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
];

/// Case-insensitive substring match against a keyword list.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    pattern: Option<Regex>,
}

impl KeywordClassifier {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        let alternation = keywords
            .iter()
            .map(|keyword| keyword.as_ref().trim())
            .filter(|keyword| !keyword.is_empty())
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("|");
        // Escaped literals always compile; an empty list matches nothing.
        let pattern = if alternation.is_empty() {
            None
        } else {
            RegexBuilder::new(&alternation)
                .case_insensitive(true)
                .build()
                .ok()
        };
        Self { pattern }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(&DEFAULT_TRANSIENT_KEYWORDS)
    }
}

impl FailureClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> FailureClass {
        match &self.pattern {
            Some(pattern) if pattern.is_match(text) => FailureClass::Transient,
            _ => FailureClass::Logic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_failure_is_transient() {
        let classifier = KeywordClassifier::default();
        assert_eq!(
            classifier.classify("ENOTFOUND api.provider.example"),
            FailureClass::Transient
        );
    }

    #[test]
    fn matching_ignores_case() {
        let classifier = KeywordClassifier::default();
        assert_eq!(
            classifier.classify("Connection Reset by peer"),
            FailureClass::Transient
        );
        assert_eq!(
            classifier.classify("agent timed out after 30s"),
            FailureClass::Transient
        );
    }

    #[test]
    fn ordinary_failure_is_logic() {
        let classifier = KeywordClassifier::default();
        assert_eq!(
            classifier.classify("no confirmed hypothesis"),
            FailureClass::Logic
        );
    }

    #[test]
    fn custom_keywords_replace_defaults() {
        let classifier = KeywordClassifier::new(&["rate limit"]);
        assert_eq!(classifier.classify("HTTP 429 rate limit"), FailureClass::Transient);
        assert_eq!(classifier.classify("network unreachable"), FailureClass::Logic);
    }

    #[test]
    fn empty_keyword_list_never_matches() {
        let classifier = KeywordClassifier::new::<&str>(&[]);
        assert_eq!(classifier.classify("timeout"), FailureClass::Logic);
    }

    #[test]
    fn keywords_are_literal() {
        let classifier = KeywordClassifier::new(&["a.b"]);
        assert_eq!(classifier.classify("axb"), FailureClass::Logic);
        assert_eq!(classifier.classify("A.B failed"), FailureClass::Transient);
    }
}
