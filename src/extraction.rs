//! Tag-path addressing for XML element trees.
//!
//! A [`FieldPath`] is written with `/` between segments. It is used two ways:
//!
//! - as a *pattern* matched against the tail of an element's ancestry
//!   (`line/coverage` matches any `coverage` element whose parent is `line`)
//! - as a *value path* resolved downward from an element
//!   (`Type` reads the text of the `Type` child, `@written` reads an attribute)

use std::fmt;

/// Represents a path through an element tree
///
/// # Examples
///
/// - `policy/line` - a `line` element directly under a `policy`
/// - `*/address` - an `address` under any element
/// - `EffectiveDate` - text of the `EffectiveDate` child
/// - `@id` - the `id` attribute of the element itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    /// The raw path string
    pub raw: String,
    /// Parsed path segments
    pub segments: Vec<PathSegment>,
}

/// A segment in a field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// An element tag (e.g. "policy", "Premium")
    Tag(String),
    /// An attribute of the element reached so far (e.g. "@id")
    Attribute(String),
    /// Matches any single element tag
    Wildcard,
}

impl FieldPath {
    /// Parse a `/`-separated path
    ///
    /// # Example
    ///
    /// ```
    /// use duckcreek::FieldPath;
    ///
    /// let path = FieldPath::parse("policy/line/coverage");
    /// assert_eq!(path.segments.len(), 3);
    /// ```
    pub fn parse(path: &str) -> Self {
        let segments = path
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s == "*" {
                    return PathSegment::Wildcard;
                }

                if let Some(name) = s.strip_prefix('@') {
                    return PathSegment::Attribute(name.to_string());
                }

                PathSegment::Tag(s.to_string())
            })
            .collect();

        Self {
            raw: path.to_string(),
            segments,
        }
    }

    /// Check whether this pattern matches the end of an element's ancestry.
    ///
    /// `ancestry` lists tags from the document root down to (and including)
    /// the element being tested.
    pub fn matches_suffix<S: AsRef<str>>(&self, ancestry: &[S]) -> bool {
        if self.segments.is_empty() || self.segments.len() > ancestry.len() {
            return false;
        }

        let tail = &ancestry[ancestry.len() - self.segments.len()..];
        self.segments
            .iter()
            .zip(tail)
            .all(|(segment, tag)| match segment {
                PathSegment::Tag(name) => name == tag.as_ref(),
                PathSegment::Wildcard => true,
                PathSegment::Attribute(_) => false,
            })
    }

    /// The last tag named by this path, if any.
    pub fn leaf_tag(&self) -> Option<&str> {
        self.segments.iter().rev().find_map(|s| match s {
            PathSegment::Tag(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Trait for types that can extract values by field path
pub trait Extractor {
    /// Extract a value at the given field path
    ///
    /// Returns `Some(value)` if the path exists and holds non-empty text
    fn extract(&self, path: &FieldPath) -> Option<String>;

    /// Extract a value and parse it to a specific type
    fn extract_as<T>(&self, path: &FieldPath) -> Option<T>
    where
        T: std::str::FromStr,
    {
        self.extract(path).and_then(|s| s.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_path_parse() {
        let path = FieldPath::parse("policy/line/coverage");

        assert_eq!(path.segments.len(), 3);
        assert_eq!(path.segments[0], PathSegment::Tag("policy".to_string()));
        assert_eq!(path.segments[2], PathSegment::Tag("coverage".to_string()));
        assert_eq!(path.leaf_tag(), Some("coverage"));
    }

    #[test]
    fn test_field_path_attribute_and_wildcard() {
        let path = FieldPath::parse("*/location/@deleted");

        assert_eq!(path.segments[0], PathSegment::Wildcard);
        assert_eq!(path.segments[1], PathSegment::Tag("location".to_string()));
        assert_eq!(path.segments[2], PathSegment::Attribute("deleted".to_string()));
    }

    #[test]
    fn test_matches_suffix() {
        let pattern = FieldPath::parse("line/coverage");

        assert!(pattern.matches_suffix(&["session", "data", "policy", "line", "coverage"]));
        assert!(!pattern.matches_suffix(&["session", "data", "policy", "coverage"]));
        assert!(!pattern.matches_suffix(&["coverage"]));
    }

    #[test]
    fn test_matches_suffix_wildcard() {
        let pattern = FieldPath::parse("*/address");

        assert!(pattern.matches_suffix(&["account", "address"]));
        assert!(pattern.matches_suffix(&["location", "address"]));
        assert!(!pattern.matches_suffix(&["address"]));
    }

    #[test]
    fn test_empty_pattern_never_matches() {
        let pattern = FieldPath::parse("");
        assert!(!pattern.matches_suffix(&["policy"]));
    }
}
