//! Path patterns
//!
//! A closed set of segment matchers evaluated against parsed pointer
//! segments. Every non-literal segment captures the text it matched.

use crate::pointer::Pointer;

/// Matcher for one path segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// Exactly this text
    Literal(&'static str),
    /// A non-empty run of ASCII digits (captured)
    Number,
    /// One of the listed words (captured)
    OneOf(&'static [&'static str]),
    /// Any segment, including the empty one (captured)
    Any,
}

impl Segment {
    fn matches(&self, segment: &str) -> bool {
        match self {
            Segment::Literal(text) => segment == *text,
            Segment::Number => !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()),
            Segment::OneOf(words) => words.contains(&segment),
            Segment::Any => true,
        }
    }

    fn captures(&self) -> bool {
        !matches!(self, Segment::Literal(_))
    }
}

/// Pattern over a whole path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPattern {
    /// Path has exactly these segments
    Exact(&'static [Segment]),
    /// Path starts with these segments; anything may follow
    Prefix(&'static [Segment]),
}

/// Segment values captured by a match, in pattern order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures(Vec<String>);

impl Captures {
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PathPattern {
    fn segments(&self) -> &'static [Segment] {
        match self {
            PathPattern::Exact(segments) | PathPattern::Prefix(segments) => segments,
        }
    }

    /// Match `path`, returning the captured segments on success
    pub fn matches(&self, path: &Pointer) -> Option<Captures> {
        let pattern = self.segments();
        let actual = path.segments();

        let length_ok = match self {
            PathPattern::Exact(_) => actual.len() == pattern.len(),
            PathPattern::Prefix(_) => actual.len() >= pattern.len(),
        };
        if !length_ok {
            return None;
        }

        let mut captures = Vec::new();
        for (matcher, segment) in pattern.iter().zip(actual) {
            if !matcher.matches(segment) {
                return None;
            }
            if matcher.captures() {
                captures.push(segment.clone());
            }
        }
        Some(Captures(captures))
    }
}
