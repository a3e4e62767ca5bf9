//! Slash-delimited document paths
//!
//! Paths follow RFC 6901 JSON Pointer syntax: `""` addresses the whole
//! document, `/players/1/program/state` addresses a nested field, and the
//! escapes `~1` (for `/`) and `~0` (for `~`) are honored inside segments.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced while parsing a pointer string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PointerError {
    #[error("pointer '{0}' must be empty or start with '/'")]
    NotAbsolute(String),
}

/// A parsed document path
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pointer {
    segments: Vec<String>,
}

impl Pointer {
    /// The pointer addressing the whole document
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a pointer string
    pub fn parse(raw: &str) -> Result<Self, PointerError> {
        if raw.is_empty() {
            return Ok(Self::root());
        }
        if !raw.starts_with('/') {
            return Err(PointerError::NotAbsolute(raw.to_string()));
        }
        let segments = raw.split('/').skip(1).map(unescape).collect();
        Ok(Self { segments })
    }

    /// Build a pointer from already unescaped segments
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Split into the parent pointer and the final segment
    pub fn split_last(&self) -> Option<(Pointer, &str)> {
        let (last, parent) = self.segments.split_last()?;
        Some((
            Pointer {
                segments: parent.to_vec(),
            },
            last.as_str(),
        ))
    }

    /// True if `self` is a proper prefix of `other`
    pub fn is_proper_prefix_of(&self, other: &Pointer) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Child pointer with one more segment
    pub fn join(&self, segment: impl Into<String>) -> Pointer {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Pointer { segments }
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{}", escape(segment))?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Pointer {
    type Err = PointerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pointer::parse(s)
    }
}

impl Serialize for Pointer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Pointer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Pointer::parse(&raw).map_err(serde::de::Error::custom)
    }
}

fn unescape(segment: &str) -> String {
    if !segment.contains('~') {
        return segment.to_string();
    }
    segment.replace("~1", "/").replace("~0", "~")
}

fn escape(segment: &str) -> String {
    if !segment.contains('/') && !segment.contains('~') {
        return segment.to_string();
    }
    segment.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_root() {
        assert!(Pointer::parse("").unwrap().is_root());
        assert_eq!(Pointer::parse("/").unwrap().segments(), &[String::new()]);
    }

    #[test]
    fn test_parse_nested() {
        let p = Pointer::parse("/players/1/program/state").unwrap();
        assert_eq!(p.segments(), &["players", "1", "program", "state"]);
        assert_eq!(p.to_string(), "/players/1/program/state");
    }

    #[test]
    fn test_escapes() {
        let p = Pointer::parse("/a~1b/~0k").unwrap();
        assert_eq!(p.segments(), &["a/b", "~k"]);
        assert_eq!(p.to_string(), "/a~1b/~0k");
    }

    #[test]
    fn test_not_absolute() {
        assert_eq!(
            Pointer::parse("players"),
            Err(PointerError::NotAbsolute("players".to_string()))
        );
    }

    #[test]
    fn test_prefix() {
        let a = Pointer::parse("/a").unwrap();
        let ab = Pointer::parse("/a/b").unwrap();
        assert!(a.is_proper_prefix_of(&ab));
        assert!(!ab.is_proper_prefix_of(&a));
        assert!(!a.is_proper_prefix_of(&a));
    }
}
