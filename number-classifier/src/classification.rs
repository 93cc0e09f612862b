use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier prefix (country/area code) skipped before pattern matching.
pub const DEFAULT_PREFIX_LEN: usize = 3;

/// Substrings that mark an identifier as `Bad` when found anywhere after the prefix.
pub const FORBIDDEN_PATTERNS: [&str; 27] = [
    "02", "20", "04", "40", "30", "03", "006", "70", "60", "06", "90", "08", "000", "64", "46",
    "22", "44", "66", "414", "616", "646", "545", "54", "45", "41", "14", "940",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Classification {
    Good,
    Bad,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Good => "Good",
            Classification::Bad => "Bad",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseClassificationError(pub String);

impl FromStr for Classification {
    type Err = ParseClassificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Good" => Ok(Classification::Good),
            "Bad" => Ok(Classification::Bad),
            invalid => Err(ParseClassificationError(invalid.to_owned())),
        }
    }
}

/// Stateless classifier; the result only depends on the identifier's characters.
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    prefix_len: usize,
}

impl Default for Classifier {
    fn default() -> Self {
        Classifier::new(DEFAULT_PREFIX_LEN)
    }
}

impl Classifier {
    pub fn new(prefix_len: usize) -> Self {
        Classifier { prefix_len }
    }

    pub fn classify(&self, identifier: &str) -> Classification {
        let suffix = self.suffix(identifier);

        if FORBIDDEN_PATTERNS
            .iter()
            .any(|pattern| suffix.contains(*pattern))
        {
            Classification::Bad
        } else {
            Classification::Good
        }
    }

    // Identifiers no longer than the prefix have an empty suffix.
    fn suffix<'a>(&self, identifier: &'a str) -> &'a str {
        match identifier.char_indices().nth(self.prefix_len) {
            Some((start, _)) => &identifier[start..],
            None => "",
        }
    }
}
