use crate::collection::Document;
use crate::common::Value;
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use crate::filter::filter::{apply_to_field_value, FilterProvider, MatchContext};
use std::fmt::{Display, Formatter};

/// Matches string fields against a regular expression.
///
/// Supported option flags are `i`, `m`, `s` and `x`, translated into an
/// inline `(?imsx)` group. The pattern compiles once at parse time and is
/// reused for every candidate document.
#[derive(Debug)]
pub(crate) struct RegexFilter {
    field: String,
    pattern: String,
    options: String,
    regex: regex::Regex,
}

impl RegexFilter {
    pub(crate) fn new(field: String, pattern: &str, options: &str) -> DolomiteResult<Self> {
        for flag in options.chars() {
            if !matches!(flag, 'i' | 'm' | 's' | 'x') {
                log::error!("Unsupported regex option flag '{}'", flag);
                return Err(DolomiteError::new(
                    &format!("invalid flag in regex options: {}", flag),
                    ErrorKind::BadValue,
                ));
            }
        }
        let full_pattern = if options.is_empty() {
            pattern.to_string()
        } else {
            format!("(?{}){}", options, pattern)
        };
        let regex = regex::Regex::new(&full_pattern)?;
        Ok(RegexFilter {
            field,
            pattern: pattern.to_string(),
            options: options.to_string(),
            regex,
        })
    }

    /// Whether a single value matches: strings by pattern, stored regular
    /// expressions by identity.
    pub(crate) fn matches_value(&self, value: &Value) -> bool {
        match value {
            Value::String(text) => self.regex.is_match(text),
            Value::Regex { pattern, options } => {
                *pattern == self.pattern && *options == self.options
            }
            _ => false,
        }
    }
}

impl FilterProvider for RegexFilter {
    fn apply(&self, entry: &Document, ctx: &mut MatchContext) -> DolomiteResult<bool> {
        apply_to_field_value(entry, &self.field, ctx, |value| Ok(self.matches_value(value)))
    }
}

impl Display for RegexFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} =~ /{}/{})", self.field, self.pattern, self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_regex_matches_strings() {
        let filter = RegexFilter::new("name".to_string(), "^al", "").unwrap();
        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc! { name: "alice" }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { name: "Alice" }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { name: 42 }, &mut ctx).unwrap());
    }

    #[test]
    fn test_regex_case_insensitive_flag() {
        let filter = RegexFilter::new("name".to_string(), "^al", "i").unwrap();
        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc! { name: "Alice" }, &mut ctx).unwrap());
    }

    #[test]
    fn test_regex_rejects_unknown_flag() {
        let err = RegexFilter::new("name".to_string(), "a", "g").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::BadValue);
    }

    #[test]
    fn test_regex_over_array_elements() {
        let filter = RegexFilter::new("tags".to_string(), "^gro", "").unwrap();
        let mut ctx = MatchContext::new();
        assert!(filter
            .apply(&doc! { tags: ["food", "grocery"] }, &mut ctx)
            .unwrap());
        assert_eq!(ctx.position(), Some(1));
    }

    #[test]
    fn test_regex_matches_stored_regex_by_identity() {
        let filter = RegexFilter::new("pattern".to_string(), "^a", "i").unwrap();
        let mut doc = Document::new();
        doc.put(
            "pattern",
            Value::Regex {
                pattern: "^a".to_string(),
                options: "i".to_string(),
            },
        )
        .unwrap();
        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc, &mut ctx).unwrap());
    }
}
