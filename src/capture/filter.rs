//! Keep/skip line filtering

use regex::Regex;

use crate::error::{Error, Result};

/// Keep/skip pattern pair deciding which lines are logged
#[derive(Debug, Clone, Default)]
pub struct FilterRule {
    keep: Option<Regex>,
    skip: Option<Regex>,
}

impl FilterRule {
    /// Compile the patterns; empty strings count as "no pattern"
    pub fn new(keep: Option<&str>, skip: Option<&str>) -> Result<Self> {
        Ok(Self {
            keep: compile(keep)?,
            skip: compile(skip)?,
        })
    }

    pub fn accepts(&self, line: &str) -> bool {
        let kept = self.keep.as_ref().map_or(true, |re| re.is_match(line));
        let skipped = self.skip.as_ref().is_some_and(|re| re.is_match(line));
        kept && !skipped
    }
}

fn compile(pattern: Option<&str>) -> Result<Option<Regex>> {
    match pattern.filter(|p| !p.is_empty()) {
        Some(p) => Regex::new(p).map(Some).map_err(|source| Error::InvalidPattern {
            pattern: p.to_string(),
            source,
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_rule_accepts_everything() {
        let rule = FilterRule::new(None, Some("")).unwrap();
        assert!(rule.accepts("anything"));
    }

    #[test]
    fn test_skip_pattern() {
        let rule = FilterRule::new(None, Some("DEBUG")).unwrap();
        assert!(!rule.accepts("DEBUG: x"));
        assert!(rule.accepts("INFO: y"));
    }

    #[test]
    fn test_keep_pattern() {
        let rule = FilterRule::new(Some(r"^\[\d+\]"), None).unwrap();
        assert!(rule.accepts("[42] frame encoded"));
        assert!(!rule.accepts("warning: no frames"));
    }

    #[test]
    fn test_skip_wins_over_keep() {
        let rule = FilterRule::new(Some("frame"), Some("dropped")).unwrap();
        assert!(rule.accepts("frame 1"));
        assert!(!rule.accepts("frame 2 dropped"));
        assert!(!rule.accepts("dropped"));
    }

    #[test]
    fn test_invalid_pattern_reported() {
        match FilterRule::new(Some("(unclosed"), None) {
            Err(Error::InvalidPattern { pattern, .. }) => assert_eq!(pattern, "(unclosed"),
            other => panic!("Expected InvalidPattern, got {:?}", other),
        }
    }
}
