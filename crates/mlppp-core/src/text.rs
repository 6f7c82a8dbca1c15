//! Bounded-length owned text.
//!
//! Link names, authentication secrets and session display names all have a
//! fixed maximum width. Input longer than the bound is silently truncated to
//! the longest prefix that fits (never splitting a UTF-8 character), not
//! rejected.

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Owned text holding at most `N` bytes.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoundedText<const N: usize>(String);

impl<const N: usize> BoundedText<N> {
    /// Maximum length in bytes.
    pub const CAPACITY: usize = N;

    /// Build a value from `text`, truncating anything beyond `N` bytes.
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self(truncate(text, N).to_owned())
    }

    /// Whether `text` would be shortened when stored.
    #[must_use]
    pub fn would_truncate(text: &str) -> bool {
        text.len() > N
    }

    /// The stored text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the value and return the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    &text[..end]
}

impl<const N: usize> Deref for BoundedText<N> {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> AsRef<str> for BoundedText<N> {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> From<&str> for BoundedText<N> {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl<const N: usize> From<String> for BoundedText<N> {
    fn from(mut text: String) -> Self {
        let keep = truncate(&text, N).len();
        text.truncate(keep);
        Self(text)
    }
}

impl<const N: usize> PartialEq<str> for BoundedText<N> {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl<const N: usize> PartialEq<&str> for BoundedText<N> {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl<const N: usize> fmt::Display for BoundedText<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<const N: usize> fmt::Debug for BoundedText<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl<const N: usize> Serialize for BoundedText<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de, const N: usize> Deserialize<'de> for BoundedText<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_kept() {
        let t = BoundedText::<8>::new("link0");
        assert_eq!(t, "link0");
        assert_eq!(t.len(), 5);
    }

    #[test]
    fn test_long_text_truncated_not_rejected() {
        let t = BoundedText::<4>::new("deflink");
        assert_eq!(t.as_str(), "defl");
        assert!(BoundedText::<4>::would_truncate("deflink"));
        assert!(!BoundedText::<4>::would_truncate("defl"));
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        // "é" is two bytes; a 3-byte bound must not split the second one.
        let t = BoundedText::<3>::new("aéé");
        assert_eq!(t.as_str(), "aé");
    }

    #[test]
    fn test_from_string_truncates() {
        let t: BoundedText<3> = String::from("abcdef").into();
        assert_eq!(t.into_string(), "abc");
    }

    #[test]
    fn test_deserialize_truncates() {
        let t: BoundedText<2> = serde_json::from_str("\"xyz\"").unwrap();
        assert_eq!(t, "xy");
    }
}
