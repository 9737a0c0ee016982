use crate::collection::Document;
use crate::common::Value;
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use crate::expression::Expr;
use crate::filter::array_filters::{
    ContainsAllFilter, ElementCondition, ElementMatchFilter, ELEMENT_FIELD,
};
use crate::filter::basic_filters::{
    EqualsFilter, ExistsFilter, InFilter, ModFilter, NotEqualsFilter, NotInFilter, SizeFilter,
    TypeFilter, TypeMatcher,
};
use crate::filter::filter::{all, Filter};
use crate::filter::logical_filters::{AndFilter, ExprFilter, NorFilter, NotFilter, OrFilter};
use crate::filter::pattern_filters::RegexFilter;
use crate::filter::range_filters::{
    GreaterEqualFilter, GreaterThanFilter, LessEqualFilter, LessThanFilter,
};

/// Compiles a query document into a [Filter] tree.
///
/// The compiled tree is shared by the matcher and the update engine, so a
/// multi-document pass parses the query exactly once.
pub fn parse_query(query: &Document) -> DolomiteResult<Filter> {
    let mut filters = Vec::new();
    for (key, value) in query.iter() {
        if let Some(filter) = parse_top_level(key, value)? {
            filters.push(filter);
        }
    }
    Ok(combine(filters))
}

fn combine(mut filters: Vec<Filter>) -> Filter {
    match filters.len() {
        0 => all(),
        1 => filters.remove(0),
        _ => Filter::new(AndFilter::new(filters)),
    }
}

fn parse_top_level(key: &str, value: &Value) -> DolomiteResult<Option<Filter>> {
    if !key.starts_with('$') {
        return Ok(Some(parse_field_predicate(key, value)?));
    }
    match key {
        "$and" => Ok(Some(Filter::new(AndFilter::new(parse_filter_list(
            key, value,
        )?)))),
        "$or" => Ok(Some(Filter::new(OrFilter::new(parse_filter_list(
            key, value,
        )?)))),
        "$nor" => Ok(Some(Filter::new(NorFilter::new(parse_filter_list(
            key, value,
        )?)))),
        "$expr" => Ok(Some(Filter::new(ExprFilter::new(Expr::parse(value)?)))),
        "$comment" => Ok(None),
        "$where" => Err(DolomiteError::new(
            "$where is not supported",
            ErrorKind::BadValue,
        )),
        "$text" => Err(DolomiteError::new(
            "$text is not supported",
            ErrorKind::BadValue,
        )),
        other => Err(DolomiteError::new(
            &format!("unknown top level operator: {}", other),
            ErrorKind::BadValue,
        )),
    }
}

fn parse_filter_list(operator: &str, value: &Value) -> DolomiteResult<Vec<Filter>> {
    let items = value.as_array().ok_or_else(|| {
        DolomiteError::new(
            &format!("{} must be an array", operator),
            ErrorKind::BadValue,
        )
    })?;
    if items.is_empty() {
        return Err(DolomiteError::new(
            &format!("{} argument must be a nonempty array", operator),
            ErrorKind::BadValue,
        ));
    }
    items
        .iter()
        .map(|item| match item {
            Value::Document(doc) => parse_query(doc),
            _ => Err(DolomiteError::new(
                "$or/$and/$nor entries need to be full objects",
                ErrorKind::BadValue,
            )),
        })
        .collect()
}

fn parse_field_predicate(field: &str, value: &Value) -> DolomiteResult<Filter> {
    match value {
        Value::Document(doc) if is_operator_document(doc) => {
            parse_operator_document(field, doc)
        }
        Value::Regex { pattern, options } => Ok(Filter::new(RegexFilter::new(
            field.to_string(),
            pattern,
            options,
        )?)),
        other => Ok(Filter::new(EqualsFilter::new(
            field.to_string(),
            other.clone(),
        ))),
    }
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().is_some_and(|key| key.starts_with('$'))
}

pub(crate) fn parse_operator_document(field: &str, doc: &Document) -> DolomiteResult<Filter> {
    // $regex and $options form one condition and are picked up as a pair
    let regex_options = match doc.get("$options") {
        Some(Value::String(options)) => Some(options.as_str()),
        Some(other) => {
            return Err(DolomiteError::new(
                &format!("$options has to be a string, but is {}", other.describe_type()),
                ErrorKind::BadValue,
            ))
        }
        None => None,
    };
    if regex_options.is_some() && !doc.contains_key("$regex") {
        return Err(DolomiteError::new(
            "$options needs a $regex",
            ErrorKind::BadValue,
        ));
    }

    let mut filters = Vec::new();
    for (key, value) in doc.iter() {
        let filter = match key.as_str() {
            "$eq" => Filter::new(EqualsFilter::new(field.to_string(), value.clone())),
            "$ne" => Filter::new(NotEqualsFilter::new(field.to_string(), value.clone())),
            "$gt" => Filter::new(GreaterThanFilter::new(field.to_string(), value.clone())),
            "$gte" => Filter::new(GreaterEqualFilter::new(field.to_string(), value.clone())),
            "$lt" => Filter::new(LessThanFilter::new(field.to_string(), value.clone())),
            "$lte" => Filter::new(LessEqualFilter::new(field.to_string(), value.clone())),
            "$in" => {
                let (values, patterns) = parse_in_operands(field, "$in", value)?;
                Filter::new(InFilter::new(field.to_string(), values, patterns))
            }
            "$nin" => {
                let (values, patterns) = parse_in_operands(field, "$nin", value)?;
                Filter::new(NotInFilter::new(field.to_string(), values, patterns))
            }
            "$exists" => Filter::new(ExistsFilter::new(field.to_string(), value.is_truthy())),
            "$type" => Filter::new(TypeFilter::new(
                field.to_string(),
                parse_type_operands(value)?,
            )),
            "$size" => Filter::new(SizeFilter::new(field.to_string(), parse_size(value)?)),
            "$mod" => {
                let (divisor, remainder) = parse_mod(value)?;
                Filter::new(ModFilter::new(field.to_string(), divisor, remainder))
            }
            "$all" => Filter::new(ContainsAllFilter::new(
                field.to_string(),
                parse_all_operands(field, value)?,
            )),
            "$elemMatch" => Filter::new(parse_element_match(field, value)?),
            "$not" => Filter::new(parse_field_not(field, value)?),
            "$regex" => {
                let options = regex_options.unwrap_or_default();
                match value {
                    Value::String(pattern) => {
                        Filter::new(RegexFilter::new(field.to_string(), pattern, options)?)
                    }
                    Value::Regex {
                        pattern,
                        options: embedded,
                    } => {
                        if !options.is_empty() && !embedded.is_empty() {
                            return Err(DolomiteError::new(
                                "options set in both $regex and $options",
                                ErrorKind::BadValue,
                            ));
                        }
                        let merged = if options.is_empty() { embedded } else { options };
                        Filter::new(RegexFilter::new(field.to_string(), pattern, merged)?)
                    }
                    other => {
                        return Err(DolomiteError::new(
                            &format!("$regex has to be a string, but is {}", other.describe_type()),
                            ErrorKind::BadValue,
                        ))
                    }
                }
            }
            "$options" => continue,
            other => {
                log::error!("Unknown query operator {} for field {}", other, field);
                return Err(DolomiteError::new(
                    &format!("unknown operator: {}", other),
                    ErrorKind::BadValue,
                ));
            }
        };
        filters.push(filter);
    }
    Ok(combine(filters))
}

fn parse_in_operands(
    field: &str,
    operator: &str,
    value: &Value,
) -> DolomiteResult<(Vec<Value>, Vec<RegexFilter>)> {
    let items = value.as_array().ok_or_else(|| {
        DolomiteError::new(
            &format!("{} needs an array", operator),
            ErrorKind::BadValue,
        )
    })?;
    let mut values = Vec::new();
    let mut patterns = Vec::new();
    for item in items {
        match item {
            Value::Regex { pattern, options } => {
                patterns.push(RegexFilter::new(field.to_string(), pattern, options)?);
            }
            other => values.push(other.clone()),
        }
    }
    Ok((values, patterns))
}

fn parse_type_operands(value: &Value) -> DolomiteResult<Vec<TypeMatcher>> {
    match value {
        Value::Array(items) => items.iter().map(parse_type_operand).collect(),
        single => Ok(vec![parse_type_operand(single)?]),
    }
}

fn parse_type_operand(value: &Value) -> DolomiteResult<TypeMatcher> {
    match value {
        Value::String(alias) => match alias.as_str() {
            "number" => Ok(TypeMatcher::Number),
            "double" => Ok(TypeMatcher::Code(1)),
            "string" => Ok(TypeMatcher::Code(2)),
            "object" => Ok(TypeMatcher::Code(3)),
            "array" => Ok(TypeMatcher::Code(4)),
            "binData" => Ok(TypeMatcher::Code(5)),
            "undefined" => Ok(TypeMatcher::Code(6)),
            "objectId" => Ok(TypeMatcher::Code(7)),
            "bool" => Ok(TypeMatcher::Code(8)),
            "date" => Ok(TypeMatcher::Code(9)),
            "null" => Ok(TypeMatcher::Code(10)),
            "regex" => Ok(TypeMatcher::Code(11)),
            "int" => Ok(TypeMatcher::Code(16)),
            "timestamp" => Ok(TypeMatcher::Code(17)),
            "long" => Ok(TypeMatcher::Code(18)),
            "decimal" => Ok(TypeMatcher::Code(19)),
            "minKey" => Ok(TypeMatcher::Code(-1)),
            "maxKey" => Ok(TypeMatcher::Code(127)),
            other => Err(DolomiteError::new(
                &format!("Unknown type name alias: {}", other),
                ErrorKind::BadValue,
            )),
        },
        number if number.is_number() => {
            let code = number.as_i64().ok_or_else(|| {
                DolomiteError::new(
                    "Invalid numerical type code: expected an integer",
                    ErrorKind::BadValue,
                )
            })?;
            Ok(TypeMatcher::Code(code as i32))
        }
        other => Err(DolomiteError::new(
            &format!("type must be represented as a number or a string, not {}", other.describe_type()),
            ErrorKind::TypeMismatch,
        )),
    }
}

fn parse_size(value: &Value) -> DolomiteResult<i64> {
    let size = value.as_i64().ok_or_else(|| {
        DolomiteError::new(
            &format!("Failed to parse $size. Expected a number in: $size: {}", value),
            ErrorKind::BadValue,
        )
    })?;
    if size < 0 {
        return Err(DolomiteError::new(
            &format!(
                "Failed to parse $size. Expected a non-negative number in: $size: {}",
                value
            ),
            ErrorKind::BadValue,
        ));
    }
    Ok(size)
}

fn parse_mod(value: &Value) -> DolomiteResult<(i64, i64)> {
    let items = value.as_array().ok_or_else(|| {
        DolomiteError::new("malformed mod, needs to be an array", ErrorKind::BadValue)
    })?;
    if items.len() < 2 {
        return Err(DolomiteError::new(
            "malformed mod, not enough elements",
            ErrorKind::BadValue,
        ));
    }
    if items.len() > 2 {
        return Err(DolomiteError::new(
            "malformed mod, too many elements",
            ErrorKind::BadValue,
        ));
    }
    let divisor = items[0].as_i64().ok_or_else(|| {
        DolomiteError::new("malformed mod, divisor not a number", ErrorKind::BadValue)
    })?;
    let remainder = items[1].as_i64().ok_or_else(|| {
        DolomiteError::new("malformed mod, remainder not a number", ErrorKind::BadValue)
    })?;
    if divisor == 0 {
        return Err(DolomiteError::new(
            "divisor cannot be 0",
            ErrorKind::BadValue,
        ));
    }
    Ok((divisor, remainder))
}

fn parse_all_operands(field: &str, value: &Value) -> DolomiteResult<Vec<Filter>> {
    let items = value.as_array().ok_or_else(|| {
        DolomiteError::new("$all needs an array", ErrorKind::BadValue)
    })?;
    let has_elem_match = items.iter().any(|item| {
        item.as_document()
            .is_some_and(|doc| doc.contains_key("$elemMatch"))
    });
    let mut conditions = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Document(doc) if doc.keys().any(|key| key.starts_with('$')) => {
                if !has_elem_match || !doc.contains_key("$elemMatch") || doc.len() != 1 {
                    return Err(DolomiteError::new(
                        "no $ expressions in $all",
                        ErrorKind::BadValue,
                    ));
                }
                let spec = doc.get_or_missing("$elemMatch");
                conditions.push(Filter::new(parse_element_match(field, &spec)?));
            }
            Value::Regex { pattern, options } => {
                conditions.push(Filter::new(RegexFilter::new(
                    field.to_string(),
                    pattern,
                    options,
                )?));
            }
            other if has_elem_match => {
                let _ = other;
                return Err(DolomiteError::new(
                    "$all either all $elemMatch or none",
                    ErrorKind::BadValue,
                ));
            }
            other => {
                conditions.push(Filter::new(EqualsFilter::new(
                    field.to_string(),
                    other.clone(),
                )));
            }
        }
    }
    Ok(conditions)
}

fn parse_element_match(field: &str, value: &Value) -> DolomiteResult<ElementMatchFilter> {
    let spec = value.as_document().ok_or_else(|| {
        DolomiteError::new("$elemMatch needs an Object", ErrorKind::BadValue)
    })?;
    let operator_form = !spec.is_empty() && spec.keys().all(|key| key.starts_with('$'));
    let condition = if operator_form {
        ElementCondition::Operators(parse_operator_document(ELEMENT_FIELD, spec)?)
    } else {
        ElementCondition::Query(parse_query(spec)?)
    };
    Ok(ElementMatchFilter::new(field.to_string(), condition))
}

fn parse_field_not(field: &str, value: &Value) -> DolomiteResult<NotFilter> {
    match value {
        Value::Document(doc) if is_operator_document(doc) => {
            Ok(NotFilter::new(parse_operator_document(field, doc)?))
        }
        Value::Regex { pattern, options } => Ok(NotFilter::new(Filter::new(RegexFilter::new(
            field.to_string(),
            pattern,
            options,
        )?))),
        _ => Err(DolomiteError::new(
            "$not needs a regex or a document",
            ErrorKind::BadValue,
        )),
    }
}
