//! Promotional-mail predicate over rule lists and Gmail's category label

use crate::config::ClassificationConfig;
use crate::models::{MessageMetadata, RuleSet};
use std::fmt;

/// Which check marked a message as promotional
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchReason {
    Sender(String),
    Subject(String),
    Domain(String),
    CategoryLabel,
    FallbackKeyword(String),
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchReason::Sender(rule) => write!(f, "sender rule '{}'", rule),
            MatchReason::Subject(rule) => write!(f, "subject rule '{}'", rule),
            MatchReason::Domain(rule) => write!(f, "domain rule '{}'", rule),
            MatchReason::CategoryLabel => write!(f, "Gmail promotions category"),
            MatchReason::FallbackKeyword(kw) => write!(f, "subject keyword '{}'", kw),
        }
    }
}

/// Decides whether a message is promotional. Holds no state besides
/// its configuration, so every call is pure.
#[derive(Debug, Clone)]
pub struct PromoClassifier {
    category_marker: String,
    fallback_keywords: Vec<String>,
}

impl Default for PromoClassifier {
    fn default() -> Self {
        Self::new(&ClassificationConfig::default())
    }
}

impl PromoClassifier {
    pub fn new(config: &ClassificationConfig) -> Self {
        Self {
            category_marker: config.category_marker.clone(),
            fallback_keywords: normalize(&config.fallback_keywords),
        }
    }

    pub fn classify(&self, meta: &MessageMetadata, rules: &RuleSet) -> bool {
        self.explain(meta, rules).is_some()
    }

    /// First matching check, in order: sender, subject, domain, category
    /// label, fallback keyword
    pub fn explain(&self, meta: &MessageMetadata, rules: &RuleSet) -> Option<MatchReason> {
        let sender = meta.sender.to_lowercase();
        let subject = meta.subject.to_lowercase();

        if let Some(rule) = first_match(&rules.senders, &sender) {
            return Some(MatchReason::Sender(rule));
        }

        if let Some(rule) = first_match(&rules.subjects, &subject) {
            return Some(MatchReason::Subject(rule));
        }

        let domain = meta.sender_domain();
        if let Some(rule) = first_match(&rules.domains, &domain) {
            return Some(MatchReason::Domain(rule));
        }

        if meta.labels.contains(&self.category_marker) {
            return Some(MatchReason::CategoryLabel);
        }

        self.fallback_keywords
            .iter()
            .find(|kw| subject.contains(kw.as_str()))
            .map(|kw| MatchReason::FallbackKeyword(kw.clone()))
    }
}

/// First non-empty rule contained in `haystack` (already lowercased)
fn first_match(rules: &[String], haystack: &str) -> Option<String> {
    if haystack.is_empty() {
        return None;
    }
    rules
        .iter()
        .map(|rule| rule.trim().to_lowercase())
        .find(|rule| !rule.is_empty() && haystack.contains(rule.as_str()))
}

fn normalize(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|kw| kw.trim().to_lowercase())
        .filter(|kw| !kw.is_empty())
        .collect()
}
