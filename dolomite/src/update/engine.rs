use crate::collection::Document;
use crate::common::util::document_utils::{change_subdocument_value, validate_field_names};
use crate::common::util::path_utils::{get_shorter_path_if_prefix, join_path, split_path};
use crate::common::{Value, DOC_ID, POSITIONAL_FRAGMENT};
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use crate::update::array_filters::{
    expand_placeholder_paths, placeholder_identifier, used_identifiers, ArrayFilter,
};
use crate::update::operators::UpdateAction;
use itertools::Itertools;
use std::collections::HashSet;

/// Stable application order of the update operators. Within one operator,
/// fields apply in path order so a parent is set before its children.
const OPERATOR_ORDER: [&str; 15] = [
    "$currentDate",
    "$inc",
    "$min",
    "$max",
    "$mul",
    "$rename",
    "$set",
    "$setOnInsert",
    "$unset",
    "$push",
    "$addToSet",
    "$pop",
    "$pull",
    "$pullAll",
    "$bit",
];

#[derive(Debug)]
struct UpdateOperation {
    path: String,
    action: UpdateAction,
}

#[derive(Debug)]
enum UpdateSpec {
    /// A replacement document: no `$`-prefixed top-level keys.
    Replacement(Document),
    /// Operator update: every top-level key is an update operator.
    Operators(Vec<UpdateOperation>),
}

/// A compiled update: parsed operators, compiled `$pull` conditions and
/// array filters, conflict-checked paths.
///
/// One engine instance is applied to every document matched by a
/// multi-update, so parsing and validation happen exactly once per command.
#[derive(Debug)]
pub struct UpdateEngine {
    spec: UpdateSpec,
    array_filters: Vec<ArrayFilter>,
}

impl UpdateEngine {
    /// Parses and validates an update document with its array filters.
    pub fn new(update: &Document, array_filters: &[Document]) -> DolomiteResult<UpdateEngine> {
        let filters = array_filters
            .iter()
            .map(ArrayFilter::parse)
            .collect::<DolomiteResult<Vec<_>>>()?;
        let spec = parse_update(update)?;

        match &spec {
            UpdateSpec::Replacement(_) => {
                if !filters.is_empty() {
                    return Err(DolomiteError::new(
                        "arrayFilters may not be specified for a replacement-style update",
                        ErrorKind::FailedToParse,
                    ));
                }
            }
            UpdateSpec::Operators(operations) => {
                let used: HashSet<String> = operations
                    .iter()
                    .flat_map(|operation| used_identifiers(&operation.path))
                    .collect();
                for filter in &filters {
                    if !used.contains(filter.identifier()) {
                        return Err(DolomiteError::new(
                            &format!(
                                "The array filter for identifier '{}' was not used in the \
                                 update",
                                filter.identifier()
                            ),
                            ErrorKind::FailedToParse,
                        ));
                    }
                }
                let defined: HashSet<&str> = filters
                    .iter()
                    .map(|filter| filter.identifier())
                    .collect();
                for operation in operations {
                    for identifier in used_identifiers(&operation.path) {
                        if !defined.contains(identifier.as_str()) {
                            return Err(DolomiteError::new(
                                &format!(
                                    "No array filter found for identifier '{}' in path '{}'",
                                    identifier, operation.path
                                ),
                                ErrorKind::BadValue,
                            ));
                        }
                    }
                }
            }
        }

        Ok(UpdateEngine {
            spec,
            array_filters: filters,
        })
    }

    /// Whether this update replaces the whole document.
    pub fn is_replacement(&self) -> bool {
        matches!(self.spec, UpdateSpec::Replacement(_))
    }

    /// Applies the update to a matched document, returning the new image.
    ///
    /// `match_pos` is the positional index recorded by the query matcher; it
    /// is consumed by the first path that uses the `$` operator.
    pub fn apply(
        &self,
        document: &Document,
        match_pos: Option<usize>,
    ) -> DolomiteResult<Document> {
        match &self.spec {
            UpdateSpec::Replacement(replacement) => {
                let mut result = replacement.clone();
                match (document.id(), result.id()) {
                    (Some(old_id), Some(new_id)) if old_id != new_id => {
                        return Err(DolomiteError::new(
                            &format!(
                                "After applying the update, the (immutable) field '_id' was \
                                 found to have been altered to _id: {}",
                                new_id
                            ),
                            ErrorKind::ImmutableField,
                        ));
                    }
                    (Some(old_id), None) => {
                        let mut with_id = Document::new();
                        with_id.put(DOC_ID, old_id.clone())?;
                        for (key, value) in result.iter() {
                            with_id.put(key, value.clone())?;
                        }
                        result = with_id;
                    }
                    _ => {}
                }
                Ok(result)
            }
            UpdateSpec::Operators(operations) => {
                let mut result = document.clone();
                let mut match_pos = match_pos;
                for operation in operations {
                    for path in self.resolve_paths(&result, &operation.path, &mut match_pos)? {
                        operation.action.apply(&mut result, &path, false)?;
                    }
                }
                if result.id() != document.id() {
                    return Err(DolomiteError::new(
                        "Performing an update on the path '_id' would modify the immutable \
                         field '_id'",
                        ErrorKind::ImmutableField,
                    ));
                }
                Ok(result)
            }
        }
    }

    /// Composes the document inserted by an upsert when nothing matched:
    /// the selector's equality fragments, then the update operators applied
    /// with `$setOnInsert` active.
    pub fn compose_upsert(&self, selector: &Document) -> DolomiteResult<Document> {
        match &self.spec {
            UpdateSpec::Replacement(replacement) => {
                let mut result = replacement.clone();
                if !result.has_id() {
                    if let Some(id) = selector_equality_id(selector) {
                        let mut with_id = Document::new();
                        with_id.put(DOC_ID, id)?;
                        for (key, value) in result.iter() {
                            with_id.put(key, value.clone())?;
                        }
                        result = with_id;
                    }
                }
                Ok(result)
            }
            UpdateSpec::Operators(operations) => {
                let mut result = Document::new();
                pour_selector_equalities(selector, &mut result)?;
                let mut match_pos = None;
                for operation in operations {
                    for path in self.resolve_paths(&result, &operation.path, &mut match_pos)? {
                        operation.action.apply(&mut result, &path, true)?;
                    }
                }
                Ok(result)
            }
        }
    }

    fn resolve_paths(
        &self,
        document: &Document,
        path: &str,
        match_pos: &mut Option<usize>,
    ) -> DolomiteResult<Vec<String>> {
        let fragments = split_path(path);
        if fragments
            .iter()
            .any(|fragment| placeholder_identifier(fragment).is_some())
        {
            return expand_placeholder_paths(document, path, &self.array_filters);
        }

        let positional = fragments
            .iter()
            .filter(|fragment| **fragment == POSITIONAL_FRAGMENT)
            .count();
        if positional == 0 {
            return Ok(vec![path.to_string()]);
        }
        if positional >= 2 {
            return Err(DolomiteError::new(
                &format!(
                    "Too many positional (i.e. '$') elements found in path '{}'",
                    path
                ),
                ErrorKind::BadValue,
            ));
        }
        let position = match_pos.take().ok_or_else(|| {
            DolomiteError::new(
                "The positional operator did not find the match needed from the query.",
                ErrorKind::BadValue,
            )
        })?;
        let resolved: Vec<String> = fragments
            .iter()
            .map(|fragment| {
                if *fragment == POSITIONAL_FRAGMENT {
                    position.to_string()
                } else {
                    fragment.to_string()
                }
            })
            .collect();
        let resolved: Vec<&str> = resolved.iter().map(String::as_str).collect();
        Ok(vec![join_path(&resolved)])
    }
}

fn parse_update(update: &Document) -> DolomiteResult<UpdateSpec> {
    let has_operators = update.keys().any(|key| key.starts_with('$'));
    if !has_operators {
        validate_field_names(update)?;
        return Ok(UpdateSpec::Replacement(update.clone()));
    }

    let mut operations = Vec::new();
    for (operator, argument) in update.iter() {
        if !operator.starts_with('$') {
            // operator and replacement shapes must not mix
            return Err(DolomiteError::new(
                &format!("Unknown modifier: {}", operator),
                ErrorKind::FailedToParse,
            ));
        }
        let rank = OPERATOR_ORDER
            .iter()
            .position(|known| known == operator)
            .ok_or_else(|| {
                DolomiteError::new(
                    &format!("Unknown modifier: {}", operator),
                    ErrorKind::FailedToParse,
                )
            })?;
        let fields = argument.as_document().ok_or_else(|| {
            DolomiteError::new(
                &format!(
                    "Modifiers operate on fields but we found type {} instead. For example: \
                     {{$mod: {{<field>: ...}}}}",
                    argument.describe_type()
                ),
                ErrorKind::FailedToParse,
            )
        })?;
        for (field, value) in fields.iter() {
            operations.push((rank, field.clone(), UpdateAction::parse(operator, value)?));
        }
    }

    operations.sort_by(|(rank_a, path_a, _), (rank_b, path_b, _)| {
        rank_a.cmp(rank_b).then_with(|| path_a.cmp(path_b))
    });

    detect_conflicts(&operations)?;

    Ok(UpdateSpec::Operators(
        operations
            .into_iter()
            .map(|(_, path, action)| UpdateOperation { path, action })
            .collect(),
    ))
}

fn detect_conflicts(operations: &[(usize, String, UpdateAction)]) -> DolomiteResult<()> {
    let mut paths: Vec<&str> = Vec::with_capacity(operations.len());
    for (_, path, action) in operations {
        paths.push(path);
        if let UpdateAction::Rename(target) = action {
            paths.push(target);
        }
    }
    for (first, second) in paths.iter().tuple_combinations() {
        if let Some(shorter) = get_shorter_path_if_prefix(first, second) {
            log::error!("Conflicting update operators on '{}' and '{}'", first, second);
            return Err(DolomiteError::new(
                &format!(
                    "Updating the path '{}' would create a conflict at '{}'",
                    second, shorter
                ),
                ErrorKind::ConflictingUpdateOperators,
            ));
        }
    }
    Ok(())
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().is_some_and(|key| key.starts_with('$'))
}

fn selector_equality_id(selector: &Document) -> Option<Value> {
    match selector.get(DOC_ID) {
        Some(Value::Document(doc)) if is_operator_document(doc) => doc.get("$eq").cloned(),
        Some(other) => Some(other.clone()),
        None => None,
    }
}

fn pour_selector_equalities(selector: &Document, base: &mut Document) -> DolomiteResult<()> {
    for (key, value) in selector.iter() {
        if key == "$and" {
            if let Value::Array(items) = value {
                for item in items {
                    if let Value::Document(sub) = item {
                        pour_selector_equalities(sub, base)?;
                    }
                }
            }
            continue;
        }
        if key.starts_with('$') {
            // $or, $nor, $expr and friends contribute no equality fragments
            continue;
        }
        if split_path(key)
            .iter()
            .any(|fragment| *fragment == POSITIONAL_FRAGMENT)
        {
            continue;
        }
        match value {
            Value::Document(doc) if is_operator_document(doc) => {
                if let Some(eq) = doc.get("$eq") {
                    change_subdocument_value(base, key, eq.clone(), &mut None)?;
                }
            }
            literal => {
                change_subdocument_value(base, key, literal.clone(), &mut None)?;
            }
        }
    }
    Ok(())
}
