//! Prioritized failure classification.
//!
//! Provider and external-task failures are matched against an ordered list of
//! `(matcher, action)` pairs; the first match wins and anything unmatched falls
//! through to the rule set's default action.

use crate::provider::ProviderError;

/// A borrowed view of a failure being classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Failure<'a> {
    pub code: Option<&'a str>,
    pub message: &'a str,
    pub reason: Option<&'a str>,
}

impl<'a> Failure<'a> {
    /// A failure known only by its message, e.g. an external task's reason.
    pub fn from_message(message: &'a str) -> Self {
        Self {
            code: None,
            message,
            reason: None,
        }
    }
}

impl<'a> From<&'a ProviderError> for Failure<'a> {
    fn from(error: &'a ProviderError) -> Self {
        Self {
            code: Some(error.code.as_str()),
            message: error.message.as_str(),
            reason: error.reason.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// Exact provider error code.
    Code(String),
    /// Exact sub-reason (e.g. a constraint violation reason).
    Reason(String),
    /// Case-insensitive substring of the message.
    MessageContains(String),
    /// `*` wildcard pattern over the whole message.
    MessageLike(String),
    AnyOf(Vec<Matcher>),
    AllOf(Vec<Matcher>),
}

impl Matcher {
    pub fn code(code: impl Into<String>) -> Self {
        Self::Code(code.into())
    }

    pub fn reason(reason: impl Into<String>) -> Self {
        Self::Reason(reason.into())
    }

    pub fn contains(fragment: impl Into<String>) -> Self {
        Self::MessageContains(fragment.into())
    }

    pub fn like(pattern: impl Into<String>) -> Self {
        Self::MessageLike(pattern.into())
    }

    pub fn matches(&self, failure: &Failure<'_>) -> bool {
        match self {
            Self::Code(code) => failure.code == Some(code.as_str()),
            Self::Reason(reason) => failure.reason == Some(reason.as_str()),
            Self::MessageContains(fragment) => failure
                .message
                .to_ascii_lowercase()
                .contains(&fragment.to_ascii_lowercase()),
            Self::MessageLike(pattern) => wildcard_match(pattern, failure.message),
            Self::AnyOf(matchers) => matchers.iter().any(|matcher| matcher.matches(failure)),
            Self::AllOf(matchers) => matchers.iter().all(|matcher| matcher.matches(failure)),
        }
    }
}

/// An ordered rule list with a fallback action.
#[derive(Debug, Clone)]
pub struct Rules<A> {
    rules: Vec<(Matcher, A)>,
    fallback: A,
}

impl<A: Clone> Rules<A> {
    pub fn new(fallback: A) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    pub fn rule(mut self, matcher: Matcher, action: A) -> Self {
        self.rules.push((matcher, action));
        self
    }

    pub fn classify(&self, failure: &Failure<'_>) -> A {
        self.rules
            .iter()
            .find(|(matcher, _)| matcher.matches(failure))
            .map(|(_, action)| action.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Matches `text` against `pattern`, where `*` stands for any run of characters.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !text.starts_with(first) || text.len() < first.len() + last.len() {
        return false;
    }

    let mut cursor = first.len();
    let end = text.len() - last.len();
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match text[cursor..end].find(part) {
            Some(offset) => cursor += offset + part.len(),
            None => return false,
        }
    }

    text[cursor..].ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Verdict {
        Skip,
        Stop,
        Retry,
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = Rules::new(Verdict::Retry)
            .rule(Matcher::code("TooManyRequestsException"), Verdict::Stop)
            .rule(Matcher::contains("too many"), Verdict::Skip);

        let error = ProviderError::new("TooManyRequestsException", "Too many requests");
        assert_eq!(rules.classify(&Failure::from(&error)), Verdict::Stop);
        assert_eq!(
            rules.classify(&Failure::from_message("TOO MANY things")),
            Verdict::Skip
        );
        assert_eq!(
            rules.classify(&Failure::from_message("socket hang up")),
            Verdict::Retry
        );
    }

    #[test]
    fn combinators_and_reason_matching() {
        let limit = Matcher::AllOf(vec![
            Matcher::code("ConstraintViolationException"),
            Matcher::AnyOf(vec![
                Matcher::reason("CloseAccountQuotaExceeded"),
                Matcher::reason("CloseAccountRequestsLimitExceeded"),
            ]),
        ]);

        let quota = ProviderError::new("ConstraintViolationException", "quota")
            .with_reason("CloseAccountQuotaExceeded");
        let other = ProviderError::new("ConstraintViolationException", "other")
            .with_reason("MasterAccountMissingContactInfo");
        assert!(limit.matches(&Failure::from(&quota)));
        assert!(!limit.matches(&Failure::from(&other)));
    }

    #[test]
    fn wildcard_patterns_cover_prefix_infix_and_suffix() {
        let pattern = "The role * is not authorized to assume the task state's role, arn:aws:iam::*:role/OVMCrossAccountRole.";
        assert!(wildcard_match(
            pattern,
            "The role arn:aws:iam::1:role/x is not authorized to assume the task state's role, arn:aws:iam::2:role/OVMCrossAccountRole."
        ));
        assert!(!wildcard_match(pattern, "The role x is authorized"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("a*", "abc"));
        assert!(wildcard_match("*c", "abc"));
        assert!(wildcard_match("a*b*c", "aXbYc"));
        assert!(!wildcard_match("a*b*c", "acb"));
        assert!(!wildcard_match("ab*ba", "aba"));
        assert!(wildcard_match("exact", "exact"));
    }
}
