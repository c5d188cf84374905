//! Slash-delimited paths into a value tree.
//!
//! A path is rooted at `/`; each segment names an object key or array
//! index. Segment text is percent-encoded so keys containing `/` or `%`
//! survive the trip through the wire format.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path must start with '/': {raw:?}")]
    MissingRoot { raw: String },
    #[error("path {raw:?} has an empty segment")]
    EmptySegment { raw: String },
    #[error("path {raw:?} has an invalid percent escape")]
    BadEscape { raw: String },
}

/// A parsed value-tree path. The root is the empty segment list.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub struct ValuePath {
    segments: Vec<String>,
}

impl ValuePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let Some(rest) = raw.strip_prefix('/') else {
            return Err(PathError::MissingRoot { raw: raw.into() });
        };
        if rest.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for part in rest.split('/') {
            if part.is_empty() {
                return Err(PathError::EmptySegment { raw: raw.into() });
            }
            segments.push(unescape_segment(part).ok_or_else(|| PathError::BadEscape {
                raw: raw.into(),
            })?);
        }
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }
}

fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape_segment(segment: &str) -> Option<String> {
    if !segment.contains('%') {
        return Some(segment.to_string());
    }
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16))?;
            let lo = bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16))?;
            out.push((hi * 16 + lo) as u8);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{}", escape_segment(segment))?;
        }
        Ok(())
    }
}

impl fmt::Debug for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValuePath({self})")
    }
}

impl TryFrom<String> for ValuePath {
    type Error = PathError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        ValuePath::parse(&s)
    }
}

impl From<ValuePath> for String {
    fn from(path: ValuePath) -> String {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_round_trips() {
        let root = ValuePath::parse("/").unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_string(), "/");
    }

    #[test]
    fn nested_round_trips() {
        let path = ValuePath::parse("/a/b/0").unwrap();
        assert_eq!(path.segments(), ["a", "b", "0"]);
        assert_eq!(path.to_string(), "/a/b/0");
    }

    #[test]
    fn segments_with_slash_are_escaped() {
        let path = ValuePath::root().child("a/b").child("50%");
        let encoded = path.to_string();
        assert_eq!(encoded, "/a%2Fb/50%25");
        assert_eq!(ValuePath::parse(&encoded).unwrap(), path);
    }

    #[test]
    fn rejects_missing_root_and_empty_segments() {
        assert!(ValuePath::parse("a/b").is_err());
        assert!(ValuePath::parse("/a//b").is_err());
        assert!(ValuePath::parse("").is_err());
    }

    #[test]
    fn rejects_truncated_escape() {
        assert!(ValuePath::parse("/a%2").is_err());
    }
}
