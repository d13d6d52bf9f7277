//! Shell-glob patterns over file keys.

use globset::{GlobBuilder, GlobMatcher};
use std::fmt;

use crate::{Error, Result};

/// Characters that end the literal prefix of a pattern.
const META: &[char] = &['*', '?', '[', ']', '{', '}', '\\'];

/// A compiled glob pattern for matching file keys.
///
/// Supports `*`, `?`, `[...]` classes and `{a,b}` alternation. `%` is
/// accepted as an alias for `*`, matching the SQL-flavoured wildcards older
/// callers use. `*` also matches `/`.
#[derive(Clone)]
pub struct KeyPattern {
    raw: String,
    matcher: GlobMatcher,
    prefix: String,
}

impl KeyPattern {
    /// Compile a pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::InvalidPattern("pattern must not be empty".to_string()));
        }
        let normalized = pattern.replace('%', "*");
        let glob = GlobBuilder::new(&normalized)
            .literal_separator(false)
            .backslash_escape(true)
            .build()
            .map_err(|e| Error::InvalidPattern(format!("{pattern}: {e}")))?;

        let prefix = normalized
            .split(|c| META.contains(&c))
            .next()
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            raw: pattern.to_string(),
            matcher: glob.compile_matcher(),
            prefix,
        })
    }

    /// Check whether a key matches.
    pub fn matches(&self, key: &str) -> bool {
        self.matcher.is_match(key)
    }

    /// The literal text every matching key starts with.
    pub fn literal_prefix(&self) -> &str {
        &self.prefix
    }

    /// A SQL `LIKE` pattern (escape character `\`) selecting a superset of
    /// the matching keys, or `None` when the pattern has no literal prefix.
    pub fn like_prefix(&self) -> Option<String> {
        if self.prefix.is_empty() {
            return None;
        }
        let mut like = String::with_capacity(self.prefix.len() + 1);
        for c in self.prefix.chars() {
            if matches!(c, '\\' | '%' | '_') {
                like.push('\\');
            }
            like.push(c);
        }
        like.push('%');
        Some(like)
    }

    /// The pattern as given.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Debug for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPattern({})", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_matches_prefix() {
        let p = KeyPattern::new("test*").unwrap();
        assert!(p.matches("testfile"));
        assert!(p.matches("test"));
        assert!(!p.matches("otherfile"));
        assert_eq!(p.literal_prefix(), "test");
    }

    #[test]
    fn test_percent_is_star() {
        let p = KeyPattern::new("test%").unwrap();
        assert!(p.matches("testfile"));
        assert!(!p.matches("atestfile"));
    }

    #[test]
    fn test_star_crosses_slashes() {
        let p = KeyPattern::new("image/*/imagefile").unwrap();
        assert!(p.matches("image/12/imagefile"));
        assert!(KeyPattern::new("*").unwrap().matches("a/b/c"));
    }

    #[test]
    fn test_question_and_class() {
        let p = KeyPattern::new("file?.[ab]in").unwrap();
        assert!(p.matches("file1.bin"));
        assert!(p.matches("file2.ain"));
        assert!(!p.matches("file12.bin"));
        assert!(!p.matches("file1.cin"));
    }

    #[test]
    fn test_malformed_pattern() {
        assert!(matches!(
            KeyPattern::new("file[ab"),
            Err(Error::InvalidPattern(_))
        ));
        assert!(KeyPattern::new("").is_err());
    }

    #[test]
    fn test_like_prefix_escapes() {
        let p = KeyPattern::new("a_b*").unwrap();
        assert_eq!(p.like_prefix().as_deref(), Some("a\\_b%"));
        assert_eq!(KeyPattern::new("*.bin").unwrap().like_prefix(), None);
    }

    #[test]
    fn test_exact_match() {
        let p = KeyPattern::new("testfile").unwrap();
        assert!(p.matches("testfile"));
        assert!(!p.matches("testfile2"));
    }
}
