//! Symbolic object paths.

use serde::{Deserialize, Serialize};

/// Segment that steps through a proxy to its target.
pub const PROXY_SEGMENT: &str = "$";

/// A label path: `.a.b` is absolute, `a.b` is relative, `.` is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ObjectPath {
    pub absolute: bool,
    pub segments: Vec<String>,
}

impl ObjectPath {
    pub fn root() -> Self {
        Self { absolute: true, segments: Vec::new() }
    }

    pub fn absolute<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { absolute: true, segments: segments.into_iter().map(Into::into).collect() }
    }

    pub fn relative<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { absolute: false, segments: segments.into_iter().map(Into::into).collect() }
    }

    /// Parse the textual form. Returns `None` for empty input or empty segments.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        if s == "." {
            return Some(Self::root());
        }
        let (absolute, rest) = match s.strip_prefix('.') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let segments: Vec<String> = rest.split('.').map(str::to_string).collect();
        if segments.iter().any(|seg| seg.is_empty()) {
            return None;
        }
        Some(Self { absolute, segments })
    }

    pub fn is_root(&self) -> bool {
        self.absolute && self.segments.is_empty()
    }
}

impl std::fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_root() {
            return write!(f, ".");
        }
        if self.absolute {
            write!(f, ".")?;
        }
        write!(f, "{}", self.segments.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_forms() {
        assert_eq!(ObjectPath::parse("."), Some(ObjectPath::root()));
        assert_eq!(ObjectPath::parse(".a.b"), Some(ObjectPath::absolute(["a", "b"])));
        assert_eq!(ObjectPath::parse("a.$.c"), Some(ObjectPath::relative(["a", "$", "c"])));
        assert_eq!(ObjectPath::parse("a..b"), None);
        assert_eq!(ObjectPath::parse(""), None);
    }

    #[test]
    fn display_matches_parse() {
        for text in [".", ".x", "x.y", ".context.shell.receiver"] {
            assert_eq!(ObjectPath::parse(text).unwrap().to_string(), text);
        }
    }
}
