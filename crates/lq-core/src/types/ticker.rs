//! Normalized ticker symbols.
//!
//! Consumers pass symbols in whatever case the UI happens to hold; the
//! registry and the wire both use the trimmed upper-case form.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::FeedError;

/// A trimmed, upper-cased instrument symbol (e.g. `"IDEA"`, `"YESBANK"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Ticker(String);

impl Ticker {
    /// Normalize `raw` into a ticker. Blank input is rejected.
    pub fn new(raw: &str) -> Result<Self, FeedError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(FeedError::InvalidTicker(raw.to_string()));
        }
        Ok(Self(trimmed.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Ticker {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Ticker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ticker::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// Normalize a caller-supplied list: rejects an empty list or a blank symbol,
/// and drops duplicates while keeping first-seen order.
pub fn normalize_tickers<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Ticker>, FeedError> {
    if raw.is_empty() {
        return Err(FeedError::EmptyTickers);
    }
    let mut out: Vec<Ticker> = Vec::with_capacity(raw.len());
    for s in raw {
        let t = Ticker::new(s.as_ref())?;
        if !out.contains(&t) {
            out.push(t);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_uppercases() {
        assert_eq!(Ticker::new("  idea ").unwrap().as_str(), "IDEA");
        assert_eq!(Ticker::new("YesBank").unwrap().to_string(), "YESBANK");
    }

    #[test]
    fn blank_is_rejected() {
        assert!(matches!(Ticker::new("   "), Err(FeedError::InvalidTicker(_))));
    }

    #[test]
    fn normalize_dedups_case_insensitively() {
        let out = normalize_tickers(&["idea", "IDEA", "sail", " Idea"]).unwrap();
        let names: Vec<&str> = out.iter().map(Ticker::as_str).collect();
        assert_eq!(names, vec!["IDEA", "SAIL"]);
    }

    #[test]
    fn normalize_rejects_empty_list() {
        let empty: [&str; 0] = [];
        assert!(matches!(normalize_tickers(&empty), Err(FeedError::EmptyTickers)));
    }

    #[test]
    fn deserialize_normalizes() {
        let t: Ticker = serde_json::from_str(r#"" tcs""#).unwrap();
        assert_eq!(t.as_str(), "TCS");
    }
}
