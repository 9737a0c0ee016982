use crate::common::PATH_DELIMITER;
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use smallvec::SmallVec;

/// Path fragments of a dotted field path. Most paths are short, so the
/// fragments live inline.
pub type PathFragments<'a> = SmallVec<[&'a str; 8]>;

/// Validates the shape of a field path.
///
/// A path must not end with the delimiter (code 40353) and must not start
/// with it or contain an empty fragment (code 15998).
pub fn validate_key(key: &str) -> DolomiteResult<()> {
    if key.ends_with(PATH_DELIMITER) {
        return Err(DolomiteError::new(
            "FieldPath must not end with a '.'.",
            ErrorKind::Location(40353),
        ));
    }
    if key.starts_with(PATH_DELIMITER) || key.contains("..") {
        return Err(DolomiteError::new(
            "FieldPath field names may not be empty strings.",
            ErrorKind::Location(15998),
        ));
    }
    Ok(())
}

/// Splits a path on the delimiter.
pub fn split_path(input: &str) -> PathFragments<'_> {
    input.split(PATH_DELIMITER).collect()
}

/// Joins fragments into a path, skipping empty fragments.
pub fn join_path(fragments: &[&str]) -> String {
    fragments
        .iter()
        .filter(|fragment| !fragment.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(PATH_DELIMITER)
}

/// Joins all fragments but the first into a path.
pub fn join_tail(fragments: &[&str]) -> String {
    fragments
        .iter()
        .skip(1)
        .copied()
        .collect::<Vec<_>>()
        .join(PATH_DELIMITER)
}

/// Returns everything up to the first delimiter.
pub fn first_fragment(input: &str) -> &str {
    match input.find(PATH_DELIMITER) {
        Some(pos) => &input[..pos],
        None => input,
    }
}

/// Returns everything after the last delimiter.
pub fn last_fragment(input: &str) -> &str {
    match input.rfind(PATH_DELIMITER) {
        Some(pos) => &input[pos + 1..],
        None => input,
    }
}

/// Returns the leading fragments two paths have in common.
pub fn collect_common_path_fragments<'a>(path1: &'a str, path2: &str) -> PathFragments<'a> {
    let fragments1 = split_path(path1);
    let fragments2 = split_path(path2);
    let mut common = PathFragments::new();
    for (fragment1, fragment2) in fragments1.iter().zip(fragments2.iter()) {
        if fragment1 == fragment2 {
            common.push(fragment1);
        } else {
            break;
        }
    }
    common
}

/// If one path is a fragment-wise prefix of the other, returns the shorter
/// path; otherwise returns `None`.
///
/// Used for update-operator conflict detection: `a` and `a.b` overlap, while
/// `a.b` and `a.c` do not.
pub fn get_shorter_path_if_prefix(path1: &str, path2: &str) -> Option<String> {
    let fragments1 = split_path(path1);
    let fragments2 = split_path(path2);
    let common = collect_common_path_fragments(path1, path2);
    if common.len() != fragments1.len() && common.len() != fragments2.len() {
        return None;
    }
    Some(join_path(&common))
}

/// Checks whether a fragment is a non-negative integer index.
pub fn is_numeric(fragment: &str) -> bool {
    !fragment.is_empty() && fragment.bytes().all(|b| b.is_ascii_digit())
}
