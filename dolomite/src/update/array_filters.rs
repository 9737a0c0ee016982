use crate::collection::Document;
use crate::common::util::document_utils::get_subdocument_value;
use crate::common::util::path_utils::{first_fragment, split_path};
use crate::common::Value;
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use crate::filter::{parse_query, Filter, MatchContext};

/// Synthetic key used to apply an array filter condition to a bare element.
const ELEMENT_KEY: &str = "$arrayFilterItem";

/// One parsed `arrayFilters` entry: an identifier plus a compiled condition
/// on the array elements it selects.
///
/// The filter document `{"i.x": {"$gt": 5}}` binds the identifier `i`; paths
/// like `a.$[i].y` then apply only to elements whose `x` exceeds 5.
#[derive(Debug)]
pub struct ArrayFilter {
    identifier: String,
    condition: Filter,
}

impl ArrayFilter {
    /// Parses a single array filter document.
    pub fn parse(spec: &Document) -> DolomiteResult<ArrayFilter> {
        let mut identifier: Option<String> = None;
        let mut rekeyed = Document::new();
        for (key, value) in spec.iter() {
            let top = first_fragment(key).to_string();
            match &identifier {
                None => identifier = Some(top.clone()),
                Some(existing) if *existing != top => {
                    return Err(DolomiteError::new(
                        &format!(
                            "Error parsing array filter :: caused by :: Expected a single \
                             top-level field name, found '{}' and '{}'",
                            existing, top
                        ),
                        ErrorKind::FailedToParse,
                    ));
                }
                Some(_) => {}
            }
            let rest = &key[top.len()..];
            let rekeyed_path = format!("{}{}", ELEMENT_KEY, rest);
            rekeyed.put(&rekeyed_path, value.clone())?;
        }
        let identifier = identifier.ok_or_else(|| {
            DolomiteError::new(
                "Cannot use an expression without a top-level field name in arrayFilters",
                ErrorKind::FailedToParse,
            )
        })?;
        let condition = parse_query(&rekeyed)?;
        Ok(ArrayFilter {
            identifier,
            condition,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Checks whether one array element satisfies this filter.
    pub fn matches(&self, element: &Value) -> DolomiteResult<bool> {
        let mut wrapper = Document::new();
        wrapper.put(ELEMENT_KEY, element.clone())?;
        let mut scratch = MatchContext::new();
        self.condition.apply(&wrapper, &mut scratch)
    }
}

/// Returns the array filter identifier of a `$[ident]` fragment, the empty
/// string for the all-elements `$[]` fragment, or `None`.
pub(crate) fn placeholder_identifier(fragment: &str) -> Option<&str> {
    fragment
        .strip_prefix("$[")
        .and_then(|rest| rest.strip_suffix(']'))
}

/// Expands `$[ident]` and `$[]` placeholders in a path into concrete numeric
/// paths against the current state of a document.
///
/// Returns one path per selected element; a path without placeholders
/// expands to itself.
pub(crate) fn expand_placeholder_paths(
    document: &Document,
    path: &str,
    filters: &[ArrayFilter],
) -> DolomiteResult<Vec<String>> {
    let fragments = split_path(path);
    let placeholder = fragments
        .iter()
        .position(|fragment| placeholder_identifier(fragment).is_some());
    let Some(position) = placeholder else {
        return Ok(vec![path.to_string()]);
    };

    let prefix = fragments[..position].join(".");
    let identifier = placeholder_identifier(fragments[position]).unwrap_or_default();
    let filter = if identifier.is_empty() {
        None
    } else {
        let found = filters
            .iter()
            .find(|filter| filter.identifier() == identifier);
        match found {
            Some(filter) => Some(filter),
            None => {
                return Err(DolomiteError::new(
                    &format!(
                        "No array filter found for identifier '{}' in path '{}'",
                        identifier, path
                    ),
                    ErrorKind::BadValue,
                ))
            }
        }
    };

    let target = get_subdocument_value(document, &prefix)?;
    let Value::Array(items) = target else {
        return Err(DolomiteError::new(
            &format!(
                "The path '{}' must exist in the document in order to apply array updates.",
                prefix
            ),
            ErrorKind::BadValue,
        ));
    };

    let suffix = fragments[position + 1..].join(".");
    let mut expanded = Vec::new();
    for (index, element) in items.iter().enumerate() {
        let selected = match filter {
            Some(filter) => filter.matches(element)?,
            None => true,
        };
        if !selected {
            continue;
        }
        let concrete = if suffix.is_empty() {
            format!("{}.{}", prefix, index)
        } else {
            format!("{}.{}.{}", prefix, index, suffix)
        };
        // later placeholders expand recursively against the same document
        expanded.extend(expand_placeholder_paths(document, &concrete, filters)?);
    }
    Ok(expanded)
}

/// Collects the placeholder identifiers used by a path.
pub(crate) fn used_identifiers(path: &str) -> Vec<String> {
    split_path(path)
        .iter()
        .filter_map(|fragment| placeholder_identifier(fragment))
        .filter(|identifier| !identifier.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_parse_binds_identifier() {
        let filter = ArrayFilter::parse(&doc! { "i.x": 1 }).unwrap();
        assert_eq!(filter.identifier(), "i");
        assert!(filter.matches(&Value::Document(doc! { x: 1 })).unwrap());
        assert!(!filter.matches(&Value::Document(doc! { x: 2 })).unwrap());
    }

    #[test]
    fn test_parse_bare_identifier_condition() {
        let spec = doc! { i: { "$gte": 10 } };
        let filter = ArrayFilter::parse(&spec).unwrap();
        assert!(filter.matches(&Value::Int32(12)).unwrap());
        assert!(!filter.matches(&Value::Int32(2)).unwrap());
    }

    #[test]
    fn test_parse_rejects_mixed_identifiers() {
        let err = ArrayFilter::parse(&doc! { "i.x": 1, "j.y": 2 }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::FailedToParse);
    }

    #[test]
    fn test_expand_with_identifier() {
        let doc = doc! { a: [{ x: 1 }, { x: 2 }, { x: 1 }] };
        let filters = vec![ArrayFilter::parse(&doc! { "i.x": 1 }).unwrap()];
        let paths = expand_placeholder_paths(&doc, "a.$[i].y", &filters).unwrap();
        assert_eq!(paths, vec!["a.0.y".to_string(), "a.2.y".to_string()]);
    }

    #[test]
    fn test_expand_all_elements() {
        let doc = doc! { a: [10, 20] };
        let paths = expand_placeholder_paths(&doc, "a.$[]", &[]).unwrap();
        assert_eq!(paths, vec!["a.0".to_string(), "a.1".to_string()]);
    }

    #[test]
    fn test_expand_without_placeholder_is_identity() {
        let doc = doc! { a: 1 };
        let paths = expand_placeholder_paths(&doc, "a.b", &[]).unwrap();
        assert_eq!(paths, vec!["a.b".to_string()]);
    }

    #[test]
    fn test_expand_unknown_identifier() {
        let doc = doc! { a: [1] };
        let err = expand_placeholder_paths(&doc, "a.$[i]", &[]).unwrap_err();
        assert!(err
            .message()
            .contains("No array filter found for identifier 'i'"));
    }

    #[test]
    fn test_expand_requires_array() {
        let doc = doc! { a: 5 };
        let err = expand_placeholder_paths(&doc, "a.$[]", &[]).unwrap_err();
        assert!(err.message().contains("must exist in the document"));
    }

    #[test]
    fn test_used_identifiers() {
        assert_eq!(used_identifiers("a.$[i].b.$[j]"), vec!["i", "j"]);
        assert!(used_identifiers("a.$[].b").is_empty());
        assert!(used_identifiers("a.b").is_empty());
    }
}
