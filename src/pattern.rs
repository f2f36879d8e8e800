//! Dotted-path pattern matching for auto-case identifiers.
//!
//! A pattern is split on the two-character separator `..` into ordered
//! *segments*; each segment is a dot-separated token run that must appear
//! contiguously, in order, within the candidate identifier. `..` therefore
//! reads as "skip an arbitrary gap, then match this literal run":
//!
//! - `conf_file.libvirtd_conf..unix_sock` matches
//!   `conf_file.libvirtd_conf.something.unix_sock` and
//!   `conf_file.libvirtd_conf.unix_sock` (zero-length gap).
//! - A pattern with no `..` requires one contiguous run starting anywhere;
//!   trailing identifier tokens are never an error.
//!
//! Malformed text (an empty segment or token, as in `a..`, `a...b`, `.a`)
//! is rejected at parse time, so matching itself is infallible.

use serde::{Deserialize, Serialize};

use crate::error::{PatternError, PatternResult};

/// A parsed, validated linkage pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    text: String,
    segments: Vec<Vec<String>>,
}

impl Pattern {
    /// Parse pattern text, rejecting empty segments and empty tokens.
    ///
    /// The empty pattern is valid: it has zero segments and matches every
    /// identifier trivially.
    pub fn parse(text: &str) -> PatternResult<Self> {
        if text.is_empty() {
            return Ok(Self {
                text: String::new(),
                segments: Vec::new(),
            });
        }
        let mut segments = Vec::new();
        for segment in text.split("..") {
            if segment.is_empty() {
                return Err(PatternError::EmptySegment {
                    pattern: text.to_owned(),
                });
            }
            let tokens: Vec<String> = segment.split('.').map(str::to_owned).collect();
            if tokens.iter().any(String::is_empty) {
                return Err(PatternError::EmptyToken {
                    pattern: text.to_owned(),
                    segment: segment.to_owned(),
                });
            }
            segments.push(tokens);
        }
        Ok(Self {
            text: text.to_owned(),
            segments,
        })
    }

    /// The original pattern text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of `..`-separated segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Test whether a dotted identifier satisfies this pattern.
    ///
    /// Maintains a cursor over the remaining identifier tokens. For each
    /// segment: find the first occurrence of the segment's anchor token; if
    /// the tokens there equal the whole segment, consume through the end of
    /// the match; otherwise discard the false anchor and keep scanning. A
    /// segment whose anchor is exhausted fails the whole match.
    pub fn matches(&self, identifier: &str) -> bool {
        let mut remaining: Vec<&str> = identifier.split('.').collect();
        for segment in &self.segments {
            let anchor = segment[0].as_str();
            loop {
                let Some(idx) = remaining.iter().position(|token| *token == anchor) else {
                    return false;
                };
                let end = idx + segment.len();
                if end <= remaining.len()
                    && remaining[idx..end].iter().zip(segment).all(|(a, b)| a == b)
                {
                    remaining.drain(..end);
                    break;
                }
                // False anchor: drop just this token and rescan.
                remaining.remove(idx);
            }
        }
        true
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, identifier: &str) -> bool {
        Pattern::parse(pattern).unwrap().matches(identifier)
    }

    #[test]
    fn contiguous_run_without_separator() {
        assert!(matches("a.b.c", "a.b.c"));
        assert!(matches("b.c", "a.b.c.d")); // run may start anywhere
        assert!(matches("a.b", "a.b.c")); // trailing tokens ignored
        assert!(!matches("a.c", "a.b.c")); // gap needs ".."
        assert!(!matches("c.b", "a.b.c")); // order matters
    }

    #[test]
    fn double_dot_tolerates_gaps() {
        assert!(matches("a..b", "x.a.y.b.z"));
        assert!(matches("a..b", "a.b")); // zero-length gap
        assert!(!matches("a..b", "x.a.y")); // no b at all
        assert!(!matches("b..a", "a.b")); // segments consumed in order
    }

    #[test]
    fn libvirtd_conf_examples() {
        assert!(matches(
            "conf_file.libvirtd_conf..unix_sock",
            "conf_file.libvirtd_conf.something.unix_sock"
        ));
        assert!(matches(
            "conf_file.libvirtd_conf..unix_sock",
            "conf_file.libvirtd_conf.unix_sock"
        ));
        assert!(!matches(
            "conf_file.libvirtd_conf..unix_sock",
            "conf_file.unix_sock.libvirtd_conf"
        ));
    }

    #[test]
    fn false_anchors_are_skipped() {
        // First "a" is a false anchor ("a.x"), the second one matches.
        assert!(matches("a.b", "a.x.a.b"));
        // Dropping a false anchor must not join tokens into a phantom run.
        assert!(!matches("a.b", "a.c.b"));
        assert!(!matches("a.b", "b.a.x.b"));
    }

    #[test]
    fn segments_consume_without_overlap() {
        assert!(matches("a.b..c.d", "a.b.x.c.d"));
        // The run matched by the first segment is consumed; the second
        // segment cannot reuse it.
        assert!(!matches("a.b..a.b", "x.a.b.y"));
        assert!(matches("a.b..a.b", "a.b.x.a.b"));
    }

    #[test]
    fn empty_pattern_matches_trivially() {
        assert!(matches("", "anything.at.all"));
        assert!(matches("", ""));
    }

    #[test]
    fn missing_anchor_fails_immediately() {
        assert!(!matches("nope", "a.b.c"));
        assert!(!matches("a..nope", "a.b.c"));
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        assert!(matches!(
            Pattern::parse("a.."),
            Err(PatternError::EmptySegment { .. })
        ));
        assert!(matches!(
            Pattern::parse("a....b"),
            Err(PatternError::EmptySegment { .. })
        ));
        assert!(matches!(
            Pattern::parse("a...b"),
            Err(PatternError::EmptyToken { .. })
        ));
        assert!(matches!(
            Pattern::parse(".a"),
            Err(PatternError::EmptyToken { .. })
        ));
        assert!(matches!(
            Pattern::parse("a.b."),
            Err(PatternError::EmptyToken { .. })
        ));
    }

    #[test]
    fn parse_keeps_text_and_segments() {
        let p = Pattern::parse("a.b..c").unwrap();
        assert_eq!(p.text(), "a.b..c");
        assert_eq!(p.segment_count(), 2);
        assert_eq!(p.to_string(), "a.b..c");
    }
}
