use crate::aggregation::accumulators::Accumulator;
use crate::aggregation::pipeline::{DocumentStream, StageContext};
use crate::aggregation::projection::Projection;
use crate::collection::Document;
use crate::common::util::document_utils::{
    change_subdocument_value, get_subdocument_value, get_subdocument_value_collection_aware,
    remove_subdocument_value,
};
use crate::common::{null_aware_equals, Value, DOC_ID};
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use crate::expression::Expr;
use crate::filter::{parse_query, Filter};
use indexmap::IndexMap;
use rand::seq::SliceRandom;
use std::cmp::Ordering;

/// A multi-key sort specification with `1`/`-1` directions.
///
/// Sorting is stable and follows the canonical cross-type value order, with
/// missing keys ordered as null.
#[derive(Clone, Debug)]
pub struct SortSpec {
    fields: Vec<(String, i8)>,
}

impl SortSpec {
    /// Parses a `{field: 1|-1, ...}` sort document.
    pub fn parse(spec: &Document) -> DolomiteResult<SortSpec> {
        if spec.is_empty() {
            return Err(DolomiteError::new(
                "$sort stage must have at least one sort key",
                ErrorKind::Location(15976),
            ));
        }
        let mut fields = Vec::with_capacity(spec.len());
        for (field, direction) in spec.iter() {
            match direction.as_i64() {
                Some(1) => fields.push((field.clone(), 1i8)),
                Some(-1) => fields.push((field.clone(), -1i8)),
                _ => {
                    return Err(DolomiteError::new(
                        "$sort key ordering must be 1 (for ascending) or -1 (for descending)",
                        ErrorKind::Location(15975),
                    ))
                }
            }
        }
        Ok(SortSpec { fields })
    }

    /// Compares two documents under this specification.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for (field, direction) in &self.fields {
            let left = sort_key(a, field);
            let right = sort_key(b, field);
            let order = left.compare(&right);
            let order = if *direction < 0 { order.reverse() } else { order };
            if order != Ordering::Equal {
                return order;
            }
        }
        Ordering::Equal
    }
}

fn sort_key(document: &Document, field: &str) -> Value {
    match get_subdocument_value(document, field) {
        Ok(Value::Missing) | Err(_) => Value::Null,
        Ok(value) => value,
    }
}

#[derive(Clone, Debug)]
pub(crate) struct MergeSpec {
    into: String,
    when_matched: WhenMatched,
    when_not_matched: WhenNotMatched,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WhenMatched {
    Replace,
    KeepExisting,
    Merge,
    Fail,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WhenNotMatched {
    Insert,
    Discard,
    Fail,
}

/// One parsed aggregation pipeline stage.
#[derive(Clone, Debug)]
pub(crate) enum Stage {
    Match(Filter),
    Project(Projection),
    AddFields(Vec<(String, Expr)>),
    Unwind {
        path: String,
        include_array_index: Option<String>,
        preserve_null_and_empty: bool,
    },
    Group {
        id: Expr,
        accumulators: Vec<Accumulator>,
    },
    Sort(SortSpec),
    Limit(usize),
    Skip(usize),
    Count(String),
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    Sample {
        size: usize,
    },
    ReplaceRoot(Expr),
    Out(String),
    Merge(MergeSpec),
}

impl Stage {
    /// Whether this stage writes its input to a collection instead of
    /// passing documents on.
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self, Stage::Out(_) | Stage::Merge(_))
    }

    /// Parses a single `{$stage: specification}` document.
    pub(crate) fn parse(stage: &Document) -> DolomiteResult<Stage> {
        if stage.len() != 1 {
            return Err(DolomiteError::new(
                "A pipeline stage specification object must contain exactly one field.",
                ErrorKind::Location(40323),
            ));
        }
        let (name, spec) = match stage.iter().next() {
            Some(entry) => entry,
            None => {
                return Err(DolomiteError::new(
                    "A pipeline stage specification object must contain exactly one field.",
                    ErrorKind::Location(40323),
                ))
            }
        };
        match name.as_str() {
            "$match" => {
                let query = spec.as_document().ok_or_else(|| {
                    DolomiteError::new(
                        "the match filter must be an expression in an object",
                        ErrorKind::Location(15959),
                    )
                })?;
                Ok(Stage::Match(parse_query(query)?))
            }
            "$project" => {
                let projection = spec.as_document().ok_or_else(|| {
                    DolomiteError::new(
                        "$project specification must be an object",
                        ErrorKind::Location(15969),
                    )
                })?;
                Ok(Stage::Project(Projection::new(projection)?))
            }
            "$addFields" | "$set" => {
                let fields = spec.as_document().ok_or_else(|| {
                    DolomiteError::new(
                        &format!("{} specification stage must be an object", name),
                        ErrorKind::Location(40272),
                    )
                })?;
                let mut parsed = Vec::with_capacity(fields.len());
                for (field, value) in fields.iter() {
                    parsed.push((field.clone(), Expr::parse(value)?));
                }
                Ok(Stage::AddFields(parsed))
            }
            "$unwind" => parse_unwind(spec),
            "$group" => parse_group(spec),
            "$sort" => {
                let sort = spec.as_document().ok_or_else(|| {
                    DolomiteError::new(
                        "the $sort key specification must be an object",
                        ErrorKind::Location(15973),
                    )
                })?;
                Ok(Stage::Sort(SortSpec::parse(sort)?))
            }
            "$limit" => Ok(Stage::Limit(parse_stage_count(spec, "$limit", 15957)?)),
            "$skip" => Ok(Stage::Skip(parse_stage_count(spec, "$skip", 15956)?)),
            "$count" => parse_count(spec),
            "$lookup" => parse_lookup(spec),
            "$sample" => parse_sample(spec),
            "$replaceRoot" => {
                let options = spec.as_document().ok_or_else(|| {
                    DolomiteError::new(
                        "the $replaceRoot stage specification must be an object",
                        ErrorKind::Location(40229),
                    )
                })?;
                let new_root = options.get("newRoot").ok_or_else(|| {
                    DolomiteError::new(
                        "no newRoot specified for the $replaceRoot stage",
                        ErrorKind::Location(40231),
                    )
                })?;
                Ok(Stage::ReplaceRoot(Expr::parse(new_root)?))
            }
            "$replaceWith" => Ok(Stage::ReplaceRoot(Expr::parse(spec)?)),
            "$out" => match spec {
                Value::String(collection) => Ok(Stage::Out(collection.clone())),
                other => Err(DolomiteError::new(
                    &format!("$out only supports a string argument, not {}", other.describe_type()),
                    ErrorKind::Location(16990),
                )),
            },
            "$merge" => parse_merge(spec),
            other => Err(DolomiteError::new(
                &format!("Unrecognized pipeline stage name: '{}'", other),
                ErrorKind::Location(40324),
            )),
        }
    }

    /// Wires the stage onto a document stream.
    pub(crate) fn execute(
        &self,
        input: DocumentStream,
        ctx: &StageContext,
    ) -> DolomiteResult<DocumentStream> {
        match self {
            Stage::Match(filter) => {
                let filter = filter.clone();
                Ok(Box::new(input.filter_map(move |item| match item {
                    Ok(document) => match filter.matches(&document) {
                        Ok((true, _)) => Some(Ok(document)),
                        Ok((false, _)) => None,
                        Err(error) => Some(Err(error)),
                    },
                    Err(error) => Some(Err(error)),
                })))
            }
            Stage::Project(projection) => {
                let projection = projection.clone();
                Ok(Box::new(input.map(move |item| {
                    item.and_then(|document| projection.project(&document))
                })))
            }
            Stage::AddFields(fields) => {
                let fields = fields.clone();
                Ok(Box::new(input.map(move |item| {
                    item.and_then(|document| {
                        let mut result = document.clone();
                        for (field, expression) in &fields {
                            let value = expression.evaluate(&document)?;
                            if !value.is_missing() {
                                change_subdocument_value(
                                    &mut result,
                                    field,
                                    value,
                                    &mut None,
                                )?;
                            }
                        }
                        Ok(result)
                    })
                })))
            }
            Stage::Unwind {
                path,
                include_array_index,
                preserve_null_and_empty,
            } => {
                let path = path.clone();
                let index_field = include_array_index.clone();
                let preserve = *preserve_null_and_empty;
                Ok(Box::new(input.flat_map(move |item| -> Vec<DolomiteResult<Document>> {
                    let document = match item {
                        Ok(document) => document,
                        Err(error) => return vec![Err(error)],
                    };
                    match unwind_document(&document, &path, index_field.as_deref(), preserve) {
                        Ok(documents) => documents.into_iter().map(Ok).collect(),
                        Err(error) => vec![Err(error)],
                    }
                })))
            }
            Stage::Group { id, accumulators } => {
                let documents = drain(input)?;
                let mut groups: IndexMap<Value, Vec<_>> = IndexMap::new();
                for document in &documents {
                    let key = match id.evaluate(document)? {
                        Value::Missing => Value::Null,
                        value => value.normalized(),
                    };
                    let states = groups.entry(key).or_insert_with(|| {
                        accumulators
                            .iter()
                            .map(Accumulator::new_state)
                            .collect::<Vec<_>>()
                    });
                    for (accumulator, state) in accumulators.iter().zip(states.iter_mut()) {
                        accumulator.accumulate(state, document)?;
                    }
                }
                let mut results = Vec::with_capacity(groups.len());
                for (key, states) in groups {
                    let mut group = Document::new();
                    group.put(DOC_ID, key)?;
                    for (accumulator, state) in accumulators.iter().zip(states) {
                        let value = state.finalize();
                        if !value.is_missing() {
                            group.put(accumulator.field(), value)?;
                        }
                    }
                    results.push(Ok(group));
                }
                Ok(Box::new(results.into_iter()))
            }
            Stage::Sort(sort) => {
                let mut documents = drain(input)?;
                let sort = sort.clone();
                documents.sort_by(|a, b| sort.compare(a, b));
                Ok(Box::new(documents.into_iter().map(Ok)))
            }
            Stage::Limit(limit) => Ok(Box::new(input.take(*limit))),
            Stage::Skip(skip) => Ok(Box::new(input.skip(*skip))),
            Stage::Count(field) => {
                let count = drain(input)?.len();
                let mut result = Document::new();
                let value = match i32::try_from(count) {
                    Ok(count) => Value::Int32(count),
                    Err(_) => Value::Int64(count as i64),
                };
                result.put(field, value)?;
                Ok(Box::new(std::iter::once(Ok(result))))
            }
            Stage::Lookup {
                from,
                local_field,
                foreign_field,
                as_field,
            } => {
                let foreign = ctx.collection(from)?.snapshot()?;
                let local_field = local_field.clone();
                let foreign_field = foreign_field.clone();
                let as_field = as_field.clone();
                Ok(Box::new(input.map(move |item| {
                    item.and_then(|document| {
                        let local = get_subdocument_value_collection_aware(
                            &document,
                            &local_field,
                        )?;
                        let mut joined = Vec::new();
                        for candidate in &foreign {
                            let value = get_subdocument_value_collection_aware(
                                candidate,
                                &foreign_field,
                            )?;
                            if join_matches(&local, &value) {
                                joined.push(Value::Document(candidate.clone()));
                            }
                        }
                        let mut result = document;
                        change_subdocument_value(
                            &mut result,
                            &as_field,
                            Value::Array(joined),
                            &mut None,
                        )?;
                        Ok(result)
                    })
                })))
            }
            Stage::Sample { size } => {
                let mut documents = drain(input)?;
                documents.shuffle(&mut rand::thread_rng());
                documents.truncate(*size);
                Ok(Box::new(documents.into_iter().map(Ok)))
            }
            Stage::ReplaceRoot(expression) => {
                let expression = expression.clone();
                Ok(Box::new(input.map(move |item| {
                    item.and_then(|document| {
                        let value = expression.evaluate(&document)?;
                        match value {
                            Value::Document(root) => Ok(root),
                            other => Err(DolomiteError::new(
                                &format!(
                                    "'newRoot' expression must evaluate to an object, but \
                                     resulting value was: {}",
                                    other
                                ),
                                ErrorKind::Location(40228),
                            )),
                        }
                    })
                })))
            }
            Stage::Out(target) => {
                let documents = drain(input)?;
                let collection = ctx.collection(target)?;
                collection.replace_contents(documents)?;
                Ok(Box::new(std::iter::empty()))
            }
            Stage::Merge(spec) => {
                let documents = drain(input)?;
                let collection = ctx.collection(&spec.into)?;
                for document in documents {
                    merge_one(&collection, &spec.when_matched, &spec.when_not_matched, document)?;
                }
                Ok(Box::new(std::iter::empty()))
            }
        }
    }
}

fn drain(input: DocumentStream) -> DolomiteResult<Vec<Document>> {
    input.collect()
}

fn unwind_document(
    document: &Document,
    path: &str,
    index_field: Option<&str>,
    preserve: bool,
) -> DolomiteResult<Vec<Document>> {
    let value = get_subdocument_value(document, path)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Missing | Value::Null => {
            return if preserve {
                Ok(vec![with_index(document.clone(), index_field, Value::Null)?])
            } else {
                Ok(Vec::new())
            };
        }
        // non-array values pass through unchanged
        other => {
            let _ = other;
            return Ok(vec![with_index(
                document.clone(),
                index_field,
                Value::Null,
            )?]);
        }
    };
    if items.is_empty() {
        return if preserve {
            let mut stripped = document.clone();
            remove_subdocument_value(&mut stripped, path, &mut None)?;
            Ok(vec![with_index(stripped, index_field, Value::Null)?])
        } else {
            Ok(Vec::new())
        };
    }
    let mut results = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let mut unwound = document.clone();
        change_subdocument_value(&mut unwound, path, item, &mut None)?;
        results.push(with_index(
            unwound,
            index_field,
            Value::Int64(index as i64),
        )?);
    }
    Ok(results)
}

fn with_index(
    mut document: Document,
    index_field: Option<&str>,
    index: Value,
) -> DolomiteResult<Document> {
    if let Some(field) = index_field {
        change_subdocument_value(&mut document, field, index, &mut None)?;
    }
    Ok(document)
}

fn join_matches(local: &Value, foreign: &Value) -> bool {
    if null_aware_equals(local, foreign) {
        return true;
    }
    if let Value::Array(items) = local {
        if items.iter().any(|item| null_aware_equals(item, foreign)) {
            return true;
        }
    }
    if let Value::Array(items) = foreign {
        if items.iter().any(|item| null_aware_equals(local, item)) {
            return true;
        }
    }
    false
}

fn merge_one(
    collection: &crate::collection::Collection,
    when_matched: &WhenMatched,
    when_not_matched: &WhenNotMatched,
    mut document: Document,
) -> DolomiteResult<()> {
    let id = document.ensure_id();
    let mut query = Document::new();
    query.put(DOC_ID, id.clone())?;
    let existing = collection.find_one(&query)?;
    match existing {
        Some(existing) => match when_matched {
            WhenMatched::Replace => {
                collection.replace_by_id(&id, document)?;
                Ok(())
            }
            WhenMatched::KeepExisting => Ok(()),
            WhenMatched::Merge => {
                let mut merged = existing;
                merged.merge(&document);
                collection.replace_by_id(&id, merged)?;
                Ok(())
            }
            WhenMatched::Fail => Err(DolomiteError::new(
                "$merge with whenMatched: fail found an existing document with the same key",
                ErrorKind::DuplicateKey,
            )),
        },
        None => match when_not_matched {
            WhenNotMatched::Insert => {
                collection.insert_one(document)?;
                Ok(())
            }
            WhenNotMatched::Discard => Ok(()),
            WhenNotMatched::Fail => Err(DolomiteError::new(
                "$merge with whenNotMatched: fail found no matching document",
                ErrorKind::Location(13113),
            )),
        },
    }
}

fn parse_unwind(spec: &Value) -> DolomiteResult<Stage> {
    match spec {
        Value::String(path) => {
            let path = strip_unwind_prefix(path)?;
            Ok(Stage::Unwind {
                path,
                include_array_index: None,
                preserve_null_and_empty: false,
            })
        }
        Value::Document(options) => {
            let path = match options.get("path") {
                Some(Value::String(path)) => strip_unwind_prefix(path)?,
                _ => {
                    return Err(DolomiteError::new(
                        "expected a string as the path for $unwind stage",
                        ErrorKind::Location(28812),
                    ))
                }
            };
            let include_array_index = match options.get("includeArrayIndex") {
                None => None,
                Some(Value::String(field)) if !field.starts_with('$') => Some(field.clone()),
                Some(other) => {
                    return Err(DolomiteError::new(
                        &format!(
                            "includeArrayIndex option to $unwind stage should not be \
                             prefixed with a '$': {}",
                            other
                        ),
                        ErrorKind::Location(28822),
                    ))
                }
            };
            let preserve_null_and_empty = options
                .get("preserveNullAndEmptyArrays")
                .map(Value::is_truthy)
                .unwrap_or(false);
            Ok(Stage::Unwind {
                path,
                include_array_index,
                preserve_null_and_empty,
            })
        }
        other => Err(DolomiteError::new(
            &format!(
                "expected either a string or an object as specification for $unwind stage, \
                 got {}",
                other.describe_type()
            ),
            ErrorKind::Location(15981),
        )),
    }
}

fn strip_unwind_prefix(path: &str) -> DolomiteResult<String> {
    path.strip_prefix('$').map(str::to_string).ok_or_else(|| {
        DolomiteError::new(
            &format!("path option to $unwind stage should be prefixed with a '$': {}", path),
            ErrorKind::Location(28818),
        )
    })
}

fn parse_group(spec: &Value) -> DolomiteResult<Stage> {
    let group = spec.as_document().ok_or_else(|| {
        DolomiteError::new(
            "a group's fields must be specified in an object",
            ErrorKind::Location(15947),
        )
    })?;
    let id = group.get(DOC_ID).ok_or_else(|| {
        DolomiteError::new(
            "a group specification must include an _id",
            ErrorKind::Location(15955),
        )
    })?;
    let id = Expr::parse(id)?;
    let mut accumulators = Vec::new();
    for (field, value) in group.iter() {
        if field == DOC_ID {
            continue;
        }
        accumulators.push(Accumulator::parse(field, value)?);
    }
    Ok(Stage::Group { id, accumulators })
}

fn parse_stage_count(spec: &Value, stage: &str, wrong_type_code: i32) -> DolomiteResult<usize> {
    let count = spec.as_i64().ok_or_else(|| {
        DolomiteError::new(
            &format!("the {} must be specified as a number", stage),
            ErrorKind::Location(wrong_type_code),
        )
    })?;
    usize::try_from(count).map_err(|_| {
        DolomiteError::new(
            &format!("the {} must be non-negative", stage),
            ErrorKind::BadValue,
        )
    })
}

fn parse_count(spec: &Value) -> DolomiteResult<Stage> {
    let field = spec.as_str().ok_or_else(|| {
        DolomiteError::new(
            "the count field must be a non-empty string",
            ErrorKind::Location(40156),
        )
    })?;
    if field.is_empty() {
        return Err(DolomiteError::new(
            "the count field must be a non-empty string",
            ErrorKind::Location(40157),
        ));
    }
    if field.starts_with('$') {
        return Err(DolomiteError::new(
            "the count field cannot be a $-prefixed path",
            ErrorKind::Location(40158),
        ));
    }
    if field.contains('.') {
        return Err(DolomiteError::new(
            "the count field cannot contain '.'",
            ErrorKind::Location(40160),
        ));
    }
    Ok(Stage::Count(field.to_string()))
}

fn parse_lookup(spec: &Value) -> DolomiteResult<Stage> {
    let options = spec.as_document().ok_or_else(|| {
        DolomiteError::new(
            "the $lookup specification must be an object",
            ErrorKind::Location(4569),
        )
    })?;
    let mut from = None;
    let mut local_field = None;
    let mut foreign_field = None;
    let mut as_field = None;
    for (key, value) in options.iter() {
        let text = value.as_str().ok_or_else(|| {
            DolomiteError::new(
                &format!("$lookup argument '{}' must be a string", key),
                ErrorKind::Location(4570),
            )
        })?;
        match key.as_str() {
            "from" => from = Some(text.to_string()),
            "localField" => local_field = Some(text.to_string()),
            "foreignField" => foreign_field = Some(text.to_string()),
            "as" => as_field = Some(text.to_string()),
            other => {
                return Err(DolomiteError::new(
                    &format!("unknown argument to $lookup: {}", other),
                    ErrorKind::FailedToParse,
                ))
            }
        }
    }
    let missing = |name: &str| {
        DolomiteError::new(
            &format!("missing '{}' option to $lookup stage specification", name),
            ErrorKind::Location(4572),
        )
    };
    Ok(Stage::Lookup {
        from: from.ok_or_else(|| missing("from"))?,
        local_field: local_field.ok_or_else(|| missing("localField"))?,
        foreign_field: foreign_field.ok_or_else(|| missing("foreignField"))?,
        as_field: as_field.ok_or_else(|| missing("as"))?,
    })
}

fn parse_sample(spec: &Value) -> DolomiteResult<Stage> {
    let options = spec.as_document().ok_or_else(|| {
        DolomiteError::new(
            "the $sample stage specification must be an object",
            ErrorKind::Location(28745),
        )
    })?;
    let size = options.get("size").and_then(Value::as_i64).ok_or_else(|| {
        DolomiteError::new(
            "size argument to $sample must be a number",
            ErrorKind::Location(28746),
        )
    })?;
    if size < 0 {
        return Err(DolomiteError::new(
            "size argument to $sample must not be negative",
            ErrorKind::Location(28747),
        ));
    }
    Ok(Stage::Sample {
        size: size as usize,
    })
}

fn parse_merge(spec: &Value) -> DolomiteResult<Stage> {
    let (into, when_matched, when_not_matched) = match spec {
        Value::String(into) => (into.clone(), None, None),
        Value::Document(options) => {
            let into = match options.get("into") {
                Some(Value::String(into)) => into.clone(),
                _ => {
                    return Err(DolomiteError::new(
                        "$merge requires an 'into' collection name",
                        ErrorKind::FailedToParse,
                    ))
                }
            };
            (
                into,
                options.get("whenMatched").cloned(),
                options.get("whenNotMatched").cloned(),
            )
        }
        other => {
            return Err(DolomiteError::new(
                &format!(
                    "$merge requires a string or an object argument, not {}",
                    other.describe_type()
                ),
                ErrorKind::Location(51178),
            ))
        }
    };
    let when_matched = match when_matched.as_ref().and_then(Value::as_str) {
        None => WhenMatched::Merge,
        Some("replace") => WhenMatched::Replace,
        Some("keepExisting") => WhenMatched::KeepExisting,
        Some("merge") => WhenMatched::Merge,
        Some("fail") => WhenMatched::Fail,
        Some(other) => {
            return Err(DolomiteError::new(
                &format!("Enumeration value '{}' for field 'whenMatched' is not a valid value.", other),
                ErrorKind::BadValue,
            ))
        }
    };
    let when_not_matched = match when_not_matched.as_ref().and_then(Value::as_str) {
        None => WhenNotMatched::Insert,
        Some("insert") => WhenNotMatched::Insert,
        Some("discard") => WhenNotMatched::Discard,
        Some("fail") => WhenNotMatched::Fail,
        Some(other) => {
            return Err(DolomiteError::new(
                &format!("Enumeration value '{}' for field 'whenNotMatched' is not a valid value.", other),
                ErrorKind::BadValue,
            ))
        }
    };
    Ok(Stage::Merge(MergeSpec {
        into,
        when_matched,
        when_not_matched,
    }))
}
