use crate::collection::Document;
use crate::common::util::path_utils::{
    first_fragment, is_numeric, join_path, split_path, validate_key,
};
use crate::common::{Value, POSITIONAL_FRAGMENT, REFERENCE_KEYS};
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};

/// Retrieves the value at a dotted path.
///
/// Documents are traversed by key, arrays by numeric index. A name fragment
/// against an array yields [Value::Missing]; use
/// [get_subdocument_value_collection_aware] for the fan-out behavior.
pub fn get_subdocument_value(document: &Document, key: &str) -> DolomiteResult<Value> {
    get_with_mode(document, key, false)
}

/// Retrieves the value at a dotted path, fanning out through arrays.
///
/// When a name fragment meets an array, the name is projected across each
/// document element, collecting non-missing results into a flattened array.
/// Callers needing per-element positions must use `$elemMatch` paths instead.
pub fn get_subdocument_value_collection_aware(
    document: &Document,
    key: &str,
) -> DolomiteResult<Value> {
    get_with_mode(document, key, true)
}

fn get_with_mode(document: &Document, key: &str, collection_aware: bool) -> DolomiteResult<Value> {
    validate_key(key)?;
    let fragments = split_path(key);
    check_fragment(fragments[0])?;
    let first = document.get_or_missing(fragments[0]);
    walk(&first, &fragments[1..], collection_aware)
}

fn walk(current: &Value, fragments: &[&str], collection_aware: bool) -> DolomiteResult<Value> {
    let Some((main, rest)) = fragments.split_first() else {
        return Ok(current.clone());
    };
    check_fragment(main)?;

    match current {
        Value::Document(doc) => walk(&doc.get_or_missing(main), rest, collection_aware),
        Value::Array(items) => {
            if is_numeric(main) {
                let pos: usize = main.parse()?;
                match items.get(pos) {
                    Some(item) => walk(item, rest, collection_aware),
                    None => Ok(Value::Missing),
                }
            } else if collection_aware {
                let mut collected = Vec::new();
                for item in items {
                    if item.is_document() {
                        match walk(item, fragments, collection_aware)? {
                            Value::Array(values) => collected.extend(values),
                            Value::Missing => {}
                            other => collected.push(other),
                        }
                    }
                }
                Ok(Value::Array(collected))
            } else {
                Ok(Value::Missing)
            }
        }
        _ => Ok(Value::Missing),
    }
}

/// Checks whether a dotted path resolves to a present value.
///
/// Holds `has(doc, p) ⇔ get(doc, p) ≠ Missing` by construction.
pub fn has_subdocument_value(document: &Document, key: &str) -> DolomiteResult<bool> {
    Ok(!get_subdocument_value(document, key)?.is_missing())
}

/// Resolves a dotted path against an arbitrary value, fanning out through
/// arrays. Used for paths rooted at expression variables.
pub(crate) fn get_value_path(value: &Value, key: &str) -> DolomiteResult<Value> {
    validate_key(key)?;
    let fragments = split_path(key);
    walk(value, &fragments, true)
}

/// Resolves the tail of a fragment list, substituting the positional `$`
/// placeholder with the match position recorded by the query matcher.
///
/// Resolution consumes the recorded position. Two or more `$` fragments in
/// one path are rejected, as is a `$` with no recorded match.
pub(crate) fn get_subkey(
    fragments: &[&str],
    match_pos: &mut Option<usize>,
) -> DolomiteResult<String> {
    let positional_count = fragments
        .iter()
        .filter(|fragment| **fragment == POSITIONAL_FRAGMENT)
        .count();
    if positional_count >= 2 {
        let key = join_path(fragments);
        log::error!("Too many positional elements in path '{}'", key);
        return Err(DolomiteError::new(
            &format!(
                "Too many positional (i.e. '$') elements found in path '{}'",
                key
            ),
            ErrorKind::BadValue,
        ));
    }

    let sub_key = fragments
        .iter()
        .skip(1)
        .copied()
        .collect::<Vec<_>>()
        .join(".");
    if sub_key == POSITIONAL_FRAGMENT || sub_key.starts_with("$.") {
        match match_pos.take() {
            Some(pos) => Ok(sub_key.replacen(POSITIONAL_FRAGMENT, &pos.to_string(), 1)),
            None => Err(DolomiteError::new(
                "The positional operator did not find the match needed from the query.",
                ErrorKind::BadValue,
            )),
        }
    } else {
        Ok(sub_key)
    }
}

/// Sets the value at a dotted path, creating missing intermediate documents.
///
/// Setting a numeric index beyond an array's length pads the array with
/// nulls. Setting a name fragment into an array, or traversing into a
/// scalar with fragments remaining, fails with `PathNotViable`.
pub fn change_subdocument_value(
    document: &mut Document,
    key: &str,
    new_value: Value,
    match_pos: &mut Option<usize>,
) -> DolomiteResult<()> {
    let mut root = Value::Document(std::mem::take(document));
    let result = change_value(&mut root, key, new_value, None, match_pos);
    if let Value::Document(restored) = root {
        *document = restored;
    }
    result
}

fn change_value(
    container: &mut Value,
    key: &str,
    new_value: Value,
    previous_key: Option<&str>,
    match_pos: &mut Option<usize>,
) -> DolomiteResult<()> {
    let fragments = split_path(key);
    let main = fragments[0];
    if fragments.len() == 1 {
        return set_list_safe(container, key, previous_key, new_value);
    }
    let sub_key = get_subkey(&fragments, match_pos)?;

    if matches!(container, Value::Array(_)) && !is_numeric(main) {
        let element = format_element(previous_key, container);
        return Err(path_not_viable(main, &element));
    }

    enum SubKind {
        Container,
        Scalar(String),
        NullOrMissing,
    }

    let kind = match shallow_lookup(container, main) {
        Some(Value::Document(_)) | Some(Value::Array(_)) => SubKind::Container,
        Some(value) if !value.is_null_or_missing() => {
            SubKind::Scalar(format_element(Some(main), value))
        }
        _ => SubKind::NullOrMissing,
    };

    match kind {
        SubKind::Container => match get_field_mut(container, main) {
            Some(sub) => change_value(sub, &sub_key, new_value, Some(main), match_pos),
            None => Err(DolomiteError::new(
                &format!("Failed to traverse into field '{}'", main),
                ErrorKind::InternalError,
            )),
        },
        SubKind::Scalar(element) => Err(path_not_viable(first_fragment(&sub_key), &element)),
        SubKind::NullOrMissing => {
            let mut created = Value::Document(Document::new());
            change_value(&mut created, &sub_key, new_value, Some(main), match_pos)?;
            set_list_safe(container, main, previous_key, created)
        }
    }
}

/// Removes the value at a dotted path, returning the removed value or
/// [Value::Missing]. Removing a numeric index from an array nulls the slot;
/// a name fragment under an array fans out over its document elements.
pub fn remove_subdocument_value(
    document: &mut Document,
    key: &str,
    match_pos: &mut Option<usize>,
) -> DolomiteResult<Value> {
    let mut root = Value::Document(std::mem::take(document));
    let result = remove_value(&mut root, key, match_pos);
    if let Value::Document(restored) = root {
        *document = restored;
    }
    result
}

fn remove_value(
    container: &mut Value,
    key: &str,
    match_pos: &mut Option<usize>,
) -> DolomiteResult<Value> {
    let fragments = split_path(key);
    let main = fragments[0];
    if fragments.len() == 1 {
        return Ok(remove_list_safe(container, key));
    }
    let sub_key = get_subkey(&fragments, match_pos)?;

    // a name fragment under an array distributes the removal over the
    // document elements
    if let Value::Array(items) = container {
        if !is_numeric(main) {
            let mut removed = Vec::new();
            for item in items.iter_mut() {
                if item.is_document() || item.is_array() {
                    let value = remove_value(item, key, match_pos)?;
                    if !value.is_missing() {
                        removed.push(value);
                    }
                }
            }
            return Ok(Value::Array(removed));
        }
    }

    match get_field_mut(container, main) {
        Some(sub) if sub.is_document() || sub.is_array() => {
            remove_value(sub, &sub_key, match_pos)
        }
        _ => Ok(Value::Missing),
    }
}

fn remove_list_safe(container: &mut Value, key: &str) -> Value {
    match container {
        Value::Document(doc) => doc.remove(key).unwrap_or(Value::Missing),
        Value::Array(items) => {
            if is_numeric(key) {
                let pos: usize = match key.parse() {
                    Ok(pos) => pos,
                    Err(_) => return Value::Missing,
                };
                if pos < items.len() {
                    std::mem::replace(&mut items[pos], Value::Null)
                } else {
                    Value::Missing
                }
            } else {
                let mut removed = Vec::new();
                for item in items.iter_mut() {
                    match item {
                        Value::Document(_) => {
                            let value = remove_list_safe(item, key);
                            if !value.is_missing() {
                                removed.push(value);
                            }
                        }
                        Value::Array(sub_items) => {
                            for sub in sub_items.iter_mut() {
                                let value = remove_list_safe(sub, key);
                                if !value.is_missing() {
                                    removed.push(value);
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Value::Array(removed)
            }
        }
        _ => Value::Missing,
    }
}

/// Checks whether a path can be fully traversed for a `$rename`: every
/// present intermediate value must be a document.
pub fn can_fully_traverse_subkey_for_rename(
    document: &Document,
    key: &str,
) -> DolomiteResult<bool> {
    let fragments = split_path(key);
    if fragments.len() == 1 {
        return Ok(true);
    }
    let sub_key = get_subkey(&fragments, &mut None)?;
    match document.get_or_missing(fragments[0]) {
        Value::Document(sub) => can_fully_traverse_subkey_for_rename(&sub, &sub_key),
        other => Ok(other.is_missing()),
    }
}

/// Copies the value at a path from one document into another, creating the
/// path in the target. Missing source values copy nothing.
pub fn copy_subdocument_value(
    input: &Document,
    result: &mut Document,
    key: &str,
) -> DolomiteResult<()> {
    let value = get_subdocument_value_collection_aware(input, key)?;
    if !value.is_missing() {
        change_subdocument_value(result, key, value, &mut None)?;
    }
    Ok(())
}

/// Validates the field names of a replacement document: a `$`-prefixed
/// top-level key is rejected unless it is one of the reference keys.
pub fn validate_field_names(document: &Document) -> DolomiteResult<()> {
    for (key, _) in document.iter() {
        if key.starts_with('$') && !REFERENCE_KEYS.contains(&key.as_str()) {
            log::error!("Dollar prefixed field '{}' in replacement document", key);
            return Err(DolomiteError::new(
                &format!(
                    "The dollar ($) prefixed field '{}' in '{}' is not allowed in the context \
                     of an update's replacement document. Consider using an aggregation \
                     pipeline with $replaceWith.",
                    key, key
                ),
                ErrorKind::DollarPrefixedFieldName,
            ));
        }
    }
    Ok(())
}

fn check_fragment(field: &str) -> DolomiteResult<()> {
    if field == POSITIONAL_FRAGMENT || field.contains('.') {
        return Err(DolomiteError::new(
            &format!("illegal field: {}", field),
            ErrorKind::InternalError,
        ));
    }
    Ok(())
}

fn shallow_lookup<'a>(container: &'a Value, field: &str) -> Option<&'a Value> {
    match container {
        Value::Document(doc) => doc.get(field),
        Value::Array(items) => {
            let pos: usize = field.parse().ok()?;
            items.get(pos)
        }
        _ => None,
    }
}

fn get_field_mut<'a>(container: &'a mut Value, field: &str) -> Option<&'a mut Value> {
    match container {
        Value::Document(doc) => doc.get_mut(field),
        Value::Array(items) => {
            if is_numeric(field) {
                let pos: usize = field.parse().ok()?;
                items.get_mut(pos)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn set_list_safe(
    container: &mut Value,
    key: &str,
    previous_key: Option<&str>,
    value: Value,
) -> DolomiteResult<()> {
    if matches!(container, Value::Array(_)) && !is_numeric(key) {
        let element = format_element(previous_key, container);
        return Err(path_not_viable(key, &element));
    }
    match container {
        Value::Array(items) => {
            let pos: usize = key.parse()?;
            while items.len() <= pos {
                items.push(Value::Null);
            }
            items[pos] = value;
            Ok(())
        }
        Value::Document(doc) => doc.put(key, value),
        other => Err(DolomiteError::new(
            &format!("Cannot set field '{}' on a value of type {}", key, other.describe_type()),
            ErrorKind::InternalError,
        )),
    }
}

fn format_element(previous_key: Option<&str>, value: &Value) -> String {
    format!("{{{}: {}}}", previous_key.unwrap_or_default(), value)
}

fn path_not_viable(key: &str, element: &str) -> DolomiteError {
    DolomiteError::new(
        &format!("Cannot create field '{}' in element {}", key, element),
        ErrorKind::PathNotViable,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn set_up() -> Document {
        doc! {
            score: 1034,
            location: {
                state: "NY",
                city: "New York",
                house: ["1", "2", "3"],
            },
            obj_array: [
                { value: 1 },
                { value: 2 },
            ]
        }
    }

    #[test]
    fn test_get_top_level_and_nested() {
        let doc = set_up();
        assert_eq!(
            get_subdocument_value(&doc, "score").unwrap(),
            Value::Int32(1034)
        );
        assert_eq!(
            get_subdocument_value(&doc, "location.state").unwrap(),
            Value::from("NY")
        );
        assert_eq!(
            get_subdocument_value(&doc, "location.missing").unwrap(),
            Value::Missing
        );
        assert_eq!(get_subdocument_value(&doc, "nope").unwrap(), Value::Missing);
    }

    #[test]
    fn test_get_numeric_array_index() {
        let doc = set_up();
        assert_eq!(
            get_subdocument_value(&doc, "location.house.1").unwrap(),
            Value::from("2")
        );
        assert_eq!(
            get_subdocument_value(&doc, "location.house.7").unwrap(),
            Value::Missing
        );
        assert_eq!(
            get_subdocument_value(&doc, "obj_array.0.value").unwrap(),
            Value::Int32(1)
        );
    }

    #[test]
    fn test_get_name_over_array_is_missing_unless_collection_aware() {
        let doc = set_up();
        assert_eq!(
            get_subdocument_value(&doc, "obj_array.value").unwrap(),
            Value::Missing
        );
        assert_eq!(
            get_subdocument_value_collection_aware(&doc, "obj_array.value").unwrap(),
            Value::Array(vec![Value::Int32(1), Value::Int32(2)])
        );
    }

    #[test]
    fn test_collection_aware_fan_out_skips_missing_and_flattens() {
        let doc = doc! {
            a: [{ foo: "bar" }, { other: 1 }, 42, { foo: ["baz", "bat"] }]
        };
        assert_eq!(
            get_subdocument_value_collection_aware(&doc, "a.foo").unwrap(),
            Value::Array(vec![
                Value::from("bar"),
                Value::from("baz"),
                Value::from("bat")
            ])
        );
    }

    #[test]
    fn test_get_scalar_traversal_is_missing() {
        let doc = set_up();
        assert_eq!(
            get_subdocument_value(&doc, "score.test").unwrap(),
            Value::Missing
        );
    }

    #[test]
    fn test_get_validates_path_shape() {
        let doc = set_up();
        assert_eq!(get_subdocument_value(&doc, "a.").unwrap_err().code(), 40353);
        assert_eq!(get_subdocument_value(&doc, ".a").unwrap_err().code(), 15998);
        assert_eq!(
            get_subdocument_value(&doc, "a..b").unwrap_err().code(),
            15998
        );
    }

    #[test]
    fn test_has_matches_get() {
        let doc = set_up();
        for path in [
            "score",
            "location.state",
            "location.house.0",
            "location.house.9",
            "obj_array.0.value",
            "missing",
            "score.deeper",
        ] {
            let got = get_subdocument_value(&doc, path).unwrap();
            assert_eq!(
                has_subdocument_value(&doc, path).unwrap(),
                !got.is_missing(),
                "invariant broken for path {}",
                path
            );
        }
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let mut doc = set_up();
        change_subdocument_value(&mut doc, "location.zip", Value::Int32(10001), &mut None)
            .unwrap();
        assert_eq!(
            get_subdocument_value(&doc, "location.zip").unwrap(),
            Value::Int32(10001)
        );

        change_subdocument_value(&mut doc, "a.b.c", Value::from("deep"), &mut None).unwrap();
        assert_eq!(
            get_subdocument_value(&doc, "a.b.c").unwrap(),
            Value::from("deep")
        );
    }

    #[test]
    fn test_set_array_index_pads_with_nulls() {
        let mut doc = doc! { items: [1] };
        change_subdocument_value(&mut doc, "items.3", Value::Int32(9), &mut None).unwrap();
        assert_eq!(
            doc.get_or_missing("items"),
            Value::Array(vec![
                Value::Int32(1),
                Value::Null,
                Value::Null,
                Value::Int32(9)
            ])
        );
    }

    #[test]
    fn test_set_name_into_array_is_not_viable() {
        let mut doc = doc! { items: [1, 2] };
        let err =
            change_subdocument_value(&mut doc, "items.x", Value::Int32(1), &mut None).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::PathNotViable);
        assert!(err.message().contains("Cannot create field 'x' in element"));
        // the document is unchanged
        assert_eq!(doc, doc! { items: [1, 2] });
    }

    #[test]
    fn test_set_through_scalar_is_not_viable() {
        let mut doc = doc! { a: 5 };
        let err =
            change_subdocument_value(&mut doc, "a.b", Value::Int32(1), &mut None).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::PathNotViable);
        assert!(err.message().contains("Cannot create field 'b' in element {a: 5}"));
    }

    #[test]
    fn test_positional_set_resolves_match_position() {
        let mut doc = doc! { arr: [{ x: 0 }, { x: 1 }, { x: 1 }] };
        let mut match_pos = Some(1);
        change_subdocument_value(&mut doc, "arr.$.y", Value::Int32(9), &mut match_pos).unwrap();
        assert_eq!(
            doc.get_or_missing("arr"),
            Value::Array(vec![
                Value::Document(doc! { x: 0 }),
                Value::Document(doc! { x: 1, y: 9 }),
                Value::Document(doc! { x: 1 }),
            ])
        );
        // the position is consumed by resolution
        assert!(match_pos.is_none());
    }

    #[test]
    fn test_positional_without_match_fails() {
        let mut doc = doc! { arr: [1, 2] };
        let err = change_subdocument_value(&mut doc, "arr.$", Value::Int32(9), &mut None)
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::BadValue);
        assert_eq!(
            err.message(),
            "The positional operator did not find the match needed from the query."
        );
    }

    #[test]
    fn test_too_many_positional_fragments() {
        let mut doc = doc! { a: [{ b: [1] }] };
        let err =
            change_subdocument_value(&mut doc, "a.$.b.$", Value::Int32(1), &mut Some(0))
                .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::BadValue);
        assert!(err.message().contains("Too many positional"));
    }

    #[test]
    fn test_remove_returns_removed_value() {
        let mut doc = set_up();
        assert_eq!(
            remove_subdocument_value(&mut doc, "location.state", &mut None).unwrap(),
            Value::from("NY")
        );
        assert_eq!(
            get_subdocument_value(&doc, "location.state").unwrap(),
            Value::Missing
        );
        assert_eq!(
            remove_subdocument_value(&mut doc, "location.state", &mut None).unwrap(),
            Value::Missing
        );
    }

    #[test]
    fn test_remove_array_index_nulls_slot() {
        let mut doc = doc! { items: [1, 2, 3] };
        assert_eq!(
            remove_subdocument_value(&mut doc, "items.1", &mut None).unwrap(),
            Value::Int32(2)
        );
        assert_eq!(
            doc.get_or_missing("items"),
            Value::Array(vec![Value::Int32(1), Value::Null, Value::Int32(3)])
        );
    }

    #[test]
    fn test_remove_name_fans_out_over_array() {
        let mut doc = doc! { x: [{ a: 1, b: 2, c: 3 }, { a: 2 }] };
        let removed = remove_subdocument_value(&mut doc, "x.b", &mut None).unwrap();
        assert_eq!(removed, Value::Array(vec![Value::Int32(2)]));
        assert_eq!(
            doc,
            doc! { x: [{ a: 1, c: 3 }, { a: 2 }] }
        );
    }

    #[test]
    fn test_can_fully_traverse_for_rename() {
        let doc = doc! { a: { b: { c: 1 } }, flat: 5, arr: [1] };
        assert!(can_fully_traverse_subkey_for_rename(&doc, "a.b.c").unwrap());
        assert!(can_fully_traverse_subkey_for_rename(&doc, "a.b.other").unwrap());
        assert!(can_fully_traverse_subkey_for_rename(&doc, "missing.x").unwrap());
        assert!(!can_fully_traverse_subkey_for_rename(&doc, "flat.x").unwrap());
        assert!(!can_fully_traverse_subkey_for_rename(&doc, "arr.x").unwrap());
        assert!(can_fully_traverse_subkey_for_rename(&doc, "flat").unwrap());
    }

    #[test]
    fn test_copy_subdocument_value() {
        let input = doc! { a: { b: 7 }, c: 1 };
        let mut result = Document::new();
        copy_subdocument_value(&input, &mut result, "a.b").unwrap();
        copy_subdocument_value(&input, &mut result, "missing").unwrap();
        assert_eq!(result, doc! { a: { b: 7 } });
    }

    #[test]
    fn test_validate_field_names() {
        let good = doc! { name: 1 };
        assert!(validate_field_names(&good).is_ok());

        let mut reference = Document::new();
        reference.put("$ref", "other").unwrap();
        assert!(validate_field_names(&reference).is_ok());

        let mut bad = Document::new();
        bad.put("$set", 1).unwrap();
        let err = validate_field_names(&bad).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DollarPrefixedFieldName);
        assert!(err.message().contains("$set"));
    }
}
