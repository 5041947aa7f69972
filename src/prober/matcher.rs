//! Regular expression rules shared by the HTTP, TCP and DNS probers.
//!
//! # Responsibilities
//! - Apply fail-if-matches / fail-if-not-matches lists to a piece of text
//! - Apply the same lists to every element of a set (DNS record sections)
//! - Apply header rules, including the allow-missing escape hatch
//!
//! # Design Decisions
//! - Patterns are compiled at config load; nothing here can fail to compile
//! - Evaluation stops at the first violated rule

use crate::config::{HeaderMatch, Regexp};
use crate::prober::result::ProbeFailure;

/// The first rule a piece of text broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A fail-if-matches pattern matched.
    Matched(String),
    /// A fail-if-not-matches pattern did not match.
    NotMatched(String),
    /// The set was empty while a match was required.
    Empty,
}

/// A pair of rule lists.
#[derive(Debug, Clone, Copy)]
pub struct RegexpRules<'a> {
    pub fail_if_matches: &'a [Regexp],
    pub fail_if_not_matches: &'a [Regexp],
}

impl<'a> RegexpRules<'a> {
    pub fn new(fail_if_matches: &'a [Regexp], fail_if_not_matches: &'a [Regexp]) -> Self {
        Self {
            fail_if_matches,
            fail_if_not_matches,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fail_if_matches.is_empty() && self.fail_if_not_matches.is_empty()
    }

    /// Check a single piece of text.
    pub fn check(&self, text: &str) -> Result<(), Violation> {
        if let Some(re) = self.fail_if_matches.iter().find(|re| re.is_match(text)) {
            return Err(Violation::Matched(re.original().to_string()));
        }
        if let Some(re) = self.fail_if_not_matches.iter().find(|re| !re.is_match(text)) {
            return Err(Violation::NotMatched(re.original().to_string()));
        }
        Ok(())
    }

    /// Check every element; an empty set only fails when a match is required.
    pub fn check_all<I, S>(&self, items: I) -> Result<(), Violation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = false;
        for item in items {
            seen = true;
            let text = item.as_ref();
            tracing::debug!(item = text, "Validating");
            self.check(text)?;
        }
        if !seen && !self.fail_if_not_matches.is_empty() {
            return Err(Violation::Empty);
        }
        Ok(())
    }
}

/// Apply a header rule to all values of that header.
///
/// With `fail_on_match` the probe fails when any value matches; otherwise it
/// fails when no value matches. A missing header fails unless the rule allows it.
pub fn check_header(
    values: &[&str],
    rule: &HeaderMatch,
    fail_on_match: bool,
) -> Result<(), ProbeFailure> {
    let Some(re) = rule.regexp.as_ref() else {
        return Ok(());
    };

    if values.is_empty() {
        if rule.allow_missing {
            return Ok(());
        }
        return Err(ProbeFailure::HeaderMissing(rule.header.clone()));
    }

    let any_match = values.iter().any(|v| re.is_match(v));
    match (fail_on_match, any_match) {
        (true, true) => Err(ProbeFailure::HeaderMatched {
            header: rule.header.clone(),
            regexp: re.original().to_string(),
        }),
        (false, false) => Err(ProbeFailure::HeaderNotMatched {
            header: rule.header.clone(),
            regexp: re.original().to_string(),
        }),
        _ => Ok(()),
    }
}
