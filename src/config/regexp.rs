//! Serializable regular expressions.
//!
//! # Responsibilities
//! - Compile patterns while the config document is deserialized
//! - Serialize back to the original source text
//!
//! # Design Decisions
//! - Equality is by source text; two compiled automata are never compared
//! - An uncompilable pattern fails the whole document load

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error raised when a configured pattern does not compile.
#[derive(Debug, thiserror::Error)]
#[error("could not compile regular expression regexp={pattern:?}: {source}")]
pub struct RegexpError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// A compiled regular expression that remembers its source text.
#[derive(Clone)]
pub struct Regexp {
    inner: Regex,
}

impl Regexp {
    /// Compile a pattern.
    pub fn new(pattern: &str) -> Result<Self, RegexpError> {
        Regex::new(pattern)
            .map(|inner| Self { inner })
            .map_err(|source| RegexpError {
                pattern: pattern.to_string(),
                source,
            })
    }

    /// The pattern as written in the config document.
    pub fn original(&self) -> &str {
        self.inner.as_str()
    }
}

impl Deref for Regexp {
    type Target = Regex;

    fn deref(&self) -> &Regex {
        &self.inner
    }
}

impl FromStr for Regexp {
    type Err = RegexpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl PartialEq for Regexp {
    fn eq(&self, other: &Self) -> bool {
        self.original() == other.original()
    }
}

impl Eq for Regexp {}

impl fmt::Debug for Regexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Regexp").field(&self.original()).finish()
    }
}

impl fmt::Display for Regexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.original())
    }
}

impl Serialize for Regexp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.original())
    }
}

impl<'de> Deserialize<'de> for Regexp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        Regexp::new(&pattern).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct Holder {
        test: Regexp,
    }

    #[test]
    fn test_json_keeps_source_text() {
        let data = r#"{"test":"(\\w+.+)"}"#;
        let holder: Holder = serde_json::from_str(data).unwrap();
        assert_eq!(serde_json::to_string(&holder).unwrap(), data);
    }

    #[test]
    fn test_yaml_keeps_source_text() {
        let data = "test: (\\w+.+)\n";
        let holder: Holder = serde_yaml::from_str(data).unwrap();
        assert_eq!(serde_yaml::to_string(&holder).unwrap(), data);
    }

    #[test]
    fn test_invalid_pattern_names_pattern() {
        let err = serde_json::from_str::<Holder>(r#"{"test":":["}"#).unwrap_err();
        assert!(err.to_string().contains("regexp=\":[\""), "{}", err);
    }

    #[test]
    fn test_equality_by_source() {
        assert_eq!(Regexp::new("a+").unwrap(), Regexp::new("a+").unwrap());
        assert_ne!(Regexp::new("a+").unwrap(), Regexp::new("a*").unwrap());
    }
}
