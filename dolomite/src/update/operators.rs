use crate::collection::Document;
use crate::common::util::document_utils::{
    can_fully_traverse_subkey_for_rename, change_subdocument_value, get_subdocument_value,
    remove_subdocument_value,
};
use crate::common::Value;
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use crate::filter::{parse_query, Filter, MatchContext};
use chrono::Utc;
use std::cmp::Ordering;

/// Synthetic key used to apply `$pull` operator conditions to a bare element.
const ELEMENT_KEY: &str = "$pullItem";

/// The parsed action of one update operator applied to one field path.
#[derive(Debug)]
pub(crate) enum UpdateAction {
    Set(Value),
    SetOnInsert(Value),
    Unset,
    Inc(Value),
    Mul(Value),
    Min(Value),
    Max(Value),
    Rename(String),
    CurrentDate(CurrentDateType),
    Push(PushSpec),
    AddToSet(AddToSetSpec),
    Pop(i64),
    Pull(PullCondition),
    PullAll(Vec<Value>),
    Bit(Vec<(BitOperator, i64)>),
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum CurrentDateType {
    Date,
    Timestamp,
}

#[derive(Debug)]
pub(crate) struct PushSpec {
    pub values: Vec<Value>,
    pub position: Option<i64>,
    pub slice: Option<i64>,
    pub sort: Option<PushSort>,
}

#[derive(Debug)]
pub(crate) enum PushSort {
    Ascending,
    Descending,
    ByFields(Vec<(String, i8)>),
}

#[derive(Debug)]
pub(crate) struct AddToSetSpec {
    pub values: Vec<Value>,
}

/// A `$pull` condition, compiled once and shared across a multi-update.
#[derive(Debug)]
pub(crate) enum PullCondition {
    /// A literal value removed by equality.
    Literal(Value),
    /// A query matched against document elements.
    Query(Filter),
    /// Comparison operators applied to the element itself.
    Operators(Filter),
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum BitOperator {
    And,
    Or,
    Xor,
}

impl UpdateAction {
    /// Parses the action of one `{operator: {field: argument}}` entry.
    pub(crate) fn parse(operator: &str, argument: &Value) -> DolomiteResult<UpdateAction> {
        match operator {
            "$set" => Ok(UpdateAction::Set(argument.clone())),
            "$setOnInsert" => Ok(UpdateAction::SetOnInsert(argument.clone())),
            "$unset" => Ok(UpdateAction::Unset),
            "$inc" => {
                require_numeric_argument("$inc", "increment", argument)?;
                Ok(UpdateAction::Inc(argument.clone()))
            }
            "$mul" => {
                require_numeric_argument("$mul", "multiply", argument)?;
                Ok(UpdateAction::Mul(argument.clone()))
            }
            "$min" => Ok(UpdateAction::Min(argument.clone())),
            "$max" => Ok(UpdateAction::Max(argument.clone())),
            "$rename" => match argument {
                Value::String(target) => Ok(UpdateAction::Rename(target.clone())),
                other => Err(DolomiteError::new(
                    &format!("The 'to' field for $rename must be a string: {}", other),
                    ErrorKind::BadValue,
                )),
            },
            "$currentDate" => parse_current_date(argument),
            "$push" => Ok(UpdateAction::Push(parse_push(argument)?)),
            "$addToSet" => Ok(UpdateAction::AddToSet(parse_add_to_set(argument)?)),
            "$pop" => match argument.as_i64() {
                Some(1) => Ok(UpdateAction::Pop(1)),
                Some(-1) => Ok(UpdateAction::Pop(-1)),
                _ => Err(DolomiteError::new(
                    &format!("$pop expects 1 or -1, found: {}", argument),
                    ErrorKind::FailedToParse,
                )),
            },
            "$pull" => Ok(UpdateAction::Pull(parse_pull(argument)?)),
            "$pullAll" => match argument {
                Value::Array(items) => Ok(UpdateAction::PullAll(items.clone())),
                other => Err(DolomiteError::new(
                    &format!(
                        "$pullAll requires an array argument but was given a {}",
                        other.describe_type()
                    ),
                    ErrorKind::BadValue,
                )),
            },
            "$bit" => Ok(UpdateAction::Bit(parse_bit(argument)?)),
            other => Err(DolomiteError::new(
                &format!("Unknown modifier: {}", other),
                ErrorKind::FailedToParse,
            )),
        }
    }

    /// Applies the action to a concrete path of a document.
    pub(crate) fn apply(
        &self,
        document: &mut Document,
        path: &str,
        is_insert: bool,
    ) -> DolomiteResult<()> {
        match self {
            UpdateAction::Set(value) => {
                change_subdocument_value(document, path, value.clone(), &mut None)
            }
            UpdateAction::SetOnInsert(value) => {
                if is_insert {
                    change_subdocument_value(document, path, value.clone(), &mut None)?;
                }
                Ok(())
            }
            UpdateAction::Unset => {
                remove_subdocument_value(document, path, &mut None)?;
                Ok(())
            }
            UpdateAction::Inc(amount) => apply_arithmetic(document, path, amount, false),
            UpdateAction::Mul(amount) => apply_arithmetic(document, path, amount, true),
            UpdateAction::Min(bound) => {
                let current = get_subdocument_value(document, path)?;
                if current.is_missing() || bound.compare(&current) == Ordering::Less {
                    change_subdocument_value(document, path, bound.clone(), &mut None)?;
                }
                Ok(())
            }
            UpdateAction::Max(bound) => {
                let current = get_subdocument_value(document, path)?;
                if current.is_missing() || bound.compare(&current) == Ordering::Greater {
                    change_subdocument_value(document, path, bound.clone(), &mut None)?;
                }
                Ok(())
            }
            UpdateAction::Rename(target) => apply_rename(document, path, target),
            UpdateAction::CurrentDate(date_type) => {
                let now = Utc::now();
                let value = match date_type {
                    CurrentDateType::Date => Value::Date(now),
                    CurrentDateType::Timestamp => Value::Timestamp {
                        time: now.timestamp() as u32,
                        increment: 1,
                    },
                };
                change_subdocument_value(document, path, value, &mut None)
            }
            UpdateAction::Push(spec) => apply_push(document, path, spec),
            UpdateAction::AddToSet(spec) => apply_add_to_set(document, path, spec),
            UpdateAction::Pop(direction) => apply_pop(document, path, *direction),
            UpdateAction::Pull(condition) => apply_pull(document, path, condition),
            UpdateAction::PullAll(values) => apply_pull_all(document, path, values),
            UpdateAction::Bit(operations) => apply_bit(document, path, operations),
        }
    }
}

fn require_numeric_argument(operator: &str, verb: &str, argument: &Value) -> DolomiteResult<()> {
    if argument.is_number() {
        Ok(())
    } else {
        Err(DolomiteError::new(
            &format!("Cannot {} with non-numeric argument: {{{}: {}}}", verb, operator, argument),
            ErrorKind::TypeMismatch,
        ))
    }
}

fn parse_current_date(argument: &Value) -> DolomiteResult<UpdateAction> {
    match argument {
        Value::Bool(true) => Ok(UpdateAction::CurrentDate(CurrentDateType::Date)),
        Value::Document(doc) if doc.len() == 1 => match doc.get("$type") {
            Some(Value::String(name)) if name == "date" => {
                Ok(UpdateAction::CurrentDate(CurrentDateType::Date))
            }
            Some(Value::String(name)) if name == "timestamp" => {
                Ok(UpdateAction::CurrentDate(CurrentDateType::Timestamp))
            }
            _ => Err(invalid_current_date()),
        },
        _ => Err(invalid_current_date()),
    }
}

fn invalid_current_date() -> DolomiteError {
    DolomiteError::new(
        "The only valid field of the option is '$type': {$currentDate: {field: {$type: 'date'}}}",
        ErrorKind::BadValue,
    )
}

fn parse_push(argument: &Value) -> DolomiteResult<PushSpec> {
    let Some(doc) = argument.as_document() else {
        return Ok(PushSpec {
            values: vec![argument.clone()],
            position: None,
            slice: None,
            sort: None,
        });
    };
    if !doc.contains_key("$each") {
        // a plain document value, unless it smuggles in a modifier
        for key in doc.keys() {
            if key.starts_with('$') {
                return Err(DolomiteError::new(
                    &format!("Unrecognized clause in $push: {}", key),
                    ErrorKind::FailedToParse,
                ));
            }
        }
        return Ok(PushSpec {
            values: vec![argument.clone()],
            position: None,
            slice: None,
            sort: None,
        });
    }

    let mut values = Vec::new();
    let mut position = None;
    let mut slice = None;
    let mut sort = None;
    for (key, value) in doc.iter() {
        match key.as_str() {
            "$each" => match value {
                Value::Array(items) => values = items.clone(),
                other => {
                    return Err(DolomiteError::new(
                        &format!(
                            "The argument to $each in $push must be an array but it was of \
                             type: {}",
                            other.describe_type()
                        ),
                        ErrorKind::BadValue,
                    ))
                }
            },
            "$position" => {
                position = Some(value.as_i64().ok_or_else(|| {
                    DolomiteError::new(
                        "The value for $position must be an integer value",
                        ErrorKind::BadValue,
                    )
                })?)
            }
            "$slice" => {
                slice = Some(value.as_i64().ok_or_else(|| {
                    DolomiteError::new(
                        "The value for $slice must be an integer value",
                        ErrorKind::BadValue,
                    )
                })?)
            }
            "$sort" => sort = Some(parse_push_sort(value)?),
            other => {
                return Err(DolomiteError::new(
                    &format!("Unrecognized clause in $push: {}", other),
                    ErrorKind::FailedToParse,
                ))
            }
        }
    }
    Ok(PushSpec {
        values,
        position,
        slice,
        sort,
    })
}

fn parse_push_sort(value: &Value) -> DolomiteResult<PushSort> {
    match value {
        direction if direction.as_i64() == Some(1) => Ok(PushSort::Ascending),
        direction if direction.as_i64() == Some(-1) => Ok(PushSort::Descending),
        Value::Document(doc) => {
            let mut fields = Vec::with_capacity(doc.len());
            for (field, direction) in doc.iter() {
                match direction.as_i64() {
                    Some(1) => fields.push((field.clone(), 1i8)),
                    Some(-1) => fields.push((field.clone(), -1i8)),
                    _ => {
                        return Err(DolomiteError::new(
                            "The $sort element value must be either 1 or -1",
                            ErrorKind::BadValue,
                        ))
                    }
                }
            }
            Ok(PushSort::ByFields(fields))
        }
        _ => Err(DolomiteError::new(
            "The $sort is invalid: use 1/-1 to sort the whole element, or {field:1/-1} to sort \
             embedded fields",
            ErrorKind::BadValue,
        )),
    }
}

fn parse_add_to_set(argument: &Value) -> DolomiteResult<AddToSetSpec> {
    if let Some(doc) = argument.as_document() {
        if let Some(each) = doc.get("$each") {
            if doc.len() > 1 {
                return Err(DolomiteError::new(
                    "Found extra fields next to $each in $addToSet",
                    ErrorKind::FailedToParse,
                ));
            }
            let items = each.as_array().ok_or_else(|| {
                DolomiteError::new(
                    &format!(
                        "The argument to $each in $addToSet must be an array but it was of \
                         type {}",
                        each.describe_type()
                    ),
                    ErrorKind::TypeMismatch,
                )
            })?;
            return Ok(AddToSetSpec {
                values: items.clone(),
            });
        }
    }
    Ok(AddToSetSpec {
        values: vec![argument.clone()],
    })
}

fn parse_pull(argument: &Value) -> DolomiteResult<PullCondition> {
    match argument {
        Value::Document(doc) if !doc.is_empty() => {
            let operator_form = doc.keys().all(|key| key.starts_with('$'));
            if operator_form {
                let mut rekeyed = Document::new();
                rekeyed.put(ELEMENT_KEY, argument.clone())?;
                Ok(PullCondition::Operators(parse_query(&rekeyed)?))
            } else if doc.keys().any(|key| key.starts_with('$')) {
                Err(DolomiteError::new(
                    "unknown operator in $pull condition",
                    ErrorKind::BadValue,
                ))
            } else {
                Ok(PullCondition::Query(parse_query(doc)?))
            }
        }
        other => Ok(PullCondition::Literal(other.clone())),
    }
}

fn parse_bit(argument: &Value) -> DolomiteResult<Vec<(BitOperator, i64)>> {
    let doc = argument.as_document().ok_or_else(|| {
        DolomiteError::new(
            &format!(
                "The $bit modifier is not compatible with a {}. You must pass in an embedded \
                 document: {{$bit: {{field: {{and/or/xor: #}}}}}}",
                argument.describe_type()
            ),
            ErrorKind::BadValue,
        )
    })?;
    let mut operations = Vec::with_capacity(doc.len());
    for (key, value) in doc.iter() {
        let operator = match key.as_str() {
            "and" => BitOperator::And,
            "or" => BitOperator::Or,
            "xor" => BitOperator::Xor,
            other => {
                return Err(DolomiteError::new(
                    &format!(
                        "The $bit modifier only supports 'and', 'or', and 'xor', not '{}'",
                        other
                    ),
                    ErrorKind::FailedToParse,
                ))
            }
        };
        let operand = value.as_i64().ok_or_else(|| {
            DolomiteError::new(
                &format!(
                    "The $bit modifier field must be an Integer(32/64 bit); a '{}' is not \
                     supported here",
                    value.describe_type()
                ),
                ErrorKind::TypeMismatch,
            )
        })?;
        operations.push((operator, operand));
    }
    Ok(operations)
}

fn apply_arithmetic(
    document: &mut Document,
    path: &str,
    amount: &Value,
    multiply: bool,
) -> DolomiteResult<()> {
    let operator = if multiply { "$mul" } else { "$inc" };
    let current = get_subdocument_value(document, path)?;
    let result = match &current {
        Value::Missing => {
            if multiply {
                // a missing field multiplies from zero of the operand's type
                match amount {
                    Value::Int32(_) => Value::Int32(0),
                    Value::Int64(_) => Value::Int64(0),
                    _ => Value::Double(0.0),
                }
            } else {
                amount.clone()
            }
        }
        value if value.is_number() => combine_numeric(value, amount, multiply),
        other => {
            return Err(DolomiteError::new(
                &format!(
                    "Cannot apply {} to a value of non-numeric type. The field '{}' has a \
                     value of non-numeric type {}",
                    operator,
                    path,
                    other.describe_type()
                ),
                ErrorKind::TypeMismatch,
            ))
        }
    };
    change_subdocument_value(document, path, result, &mut None)
}

fn combine_numeric(current: &Value, amount: &Value, multiply: bool) -> Value {
    let both_int32 = matches!(current, Value::Int32(_)) && matches!(amount, Value::Int32(_));
    let any_double = matches!(current, Value::Double(_) | Value::Decimal128(_))
        || matches!(amount, Value::Double(_) | Value::Decimal128(_));
    let int_result = match (current.as_i64(), amount.as_i64()) {
        (Some(a), Some(b)) => {
            if multiply {
                a.checked_mul(b)
            } else {
                a.checked_add(b)
            }
        }
        _ => None,
    };
    match int_result {
        Some(value) if !any_double => {
            if both_int32 && i32::try_from(value).is_ok() {
                Value::Int32(value as i32)
            } else {
                Value::Int64(value)
            }
        }
        _ => {
            let a = current.as_f64().unwrap_or(f64::NAN);
            let b = amount.as_f64().unwrap_or(f64::NAN);
            Value::Double(if multiply { a * b } else { a + b })
        }
    }
}

fn apply_rename(document: &mut Document, source: &str, target: &str) -> DolomiteResult<()> {
    if source == target {
        return Err(DolomiteError::new(
            &format!(
                "The source and target field for $rename must differ: {}: \"{}\"",
                source, target
            ),
            ErrorKind::BadValue,
        ));
    }
    if !can_fully_traverse_subkey_for_rename(document, source)? {
        return Err(DolomiteError::new(
            &format!("The source field cannot be an array element, '{}' in doc", source),
            ErrorKind::BadValue,
        ));
    }
    if !can_fully_traverse_subkey_for_rename(document, target)? {
        return Err(DolomiteError::new(
            &format!("The destination field cannot be an array element, '{}' in doc", target),
            ErrorKind::BadValue,
        ));
    }
    let removed = remove_subdocument_value(document, source, &mut None)?;
    if !removed.is_missing() {
        change_subdocument_value(document, target, removed, &mut None)?;
    }
    Ok(())
}

fn read_array(document: &Document, path: &str) -> DolomiteResult<Vec<Value>> {
    match get_subdocument_value(document, path)? {
        Value::Missing | Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        other => Err(DolomiteError::new(
            &format!(
                "The field '{}' must be an array but is of type {} in document",
                path,
                other.describe_type()
            ),
            ErrorKind::BadValue,
        )),
    }
}

fn apply_push(document: &mut Document, path: &str, spec: &PushSpec) -> DolomiteResult<()> {
    let mut items = read_array(document, path)?;

    let insert_at = match spec.position {
        None => items.len(),
        Some(position) if position >= 0 => (position as usize).min(items.len()),
        Some(position) => {
            let from_end = items.len() as i64 + position;
            from_end.max(0) as usize
        }
    };
    for (offset, value) in spec.values.iter().enumerate() {
        items.insert(insert_at + offset, value.clone());
    }

    if let Some(sort) = &spec.sort {
        match sort {
            PushSort::Ascending => items.sort_by(|a, b| a.compare(b)),
            PushSort::Descending => items.sort_by(|a, b| b.compare(a)),
            PushSort::ByFields(fields) => {
                items.sort_by(|a, b| {
                    for (field, direction) in fields {
                        let left = element_sort_key(a, field);
                        let right = element_sort_key(b, field);
                        let order = left.compare(&right);
                        let order = if *direction < 0 { order.reverse() } else { order };
                        if order != Ordering::Equal {
                            return order;
                        }
                    }
                    Ordering::Equal
                });
            }
        }
    }

    if let Some(slice) = spec.slice {
        if slice == 0 {
            items.clear();
        } else if slice > 0 {
            items.truncate(slice as usize);
        } else {
            let keep = (-slice) as usize;
            if items.len() > keep {
                items.drain(..items.len() - keep);
            }
        }
    }

    change_subdocument_value(document, path, Value::Array(items), &mut None)
}

fn element_sort_key(element: &Value, field: &str) -> Value {
    match element {
        Value::Document(doc) => {
            get_subdocument_value(doc, field).unwrap_or(Value::Missing)
        }
        _ => Value::Missing,
    }
}

fn apply_add_to_set(
    document: &mut Document,
    path: &str,
    spec: &AddToSetSpec,
) -> DolomiteResult<()> {
    let mut items = read_array(document, path)?;
    for value in &spec.values {
        if !items.iter().any(|existing| existing == value) {
            items.push(value.clone());
        }
    }
    change_subdocument_value(document, path, Value::Array(items), &mut None)
}

fn apply_pop(document: &mut Document, path: &str, direction: i64) -> DolomiteResult<()> {
    let current = get_subdocument_value(document, path)?;
    let mut items = match current {
        Value::Missing => return Ok(()),
        Value::Array(items) => items,
        other => {
            return Err(DolomiteError::new(
                &format!(
                    "Path '{}' contains an element of non-array type '{}'",
                    path,
                    other.describe_type()
                ),
                ErrorKind::TypeMismatch,
            ))
        }
    };
    if !items.is_empty() {
        if direction < 0 {
            items.remove(0);
        } else {
            items.pop();
        }
    }
    change_subdocument_value(document, path, Value::Array(items), &mut None)
}

fn apply_pull(
    document: &mut Document,
    path: &str,
    condition: &PullCondition,
) -> DolomiteResult<()> {
    let current = get_subdocument_value(document, path)?;
    let Value::Array(items) = current else {
        // absent or non-array fields are left untouched
        return Ok(());
    };
    let mut kept = Vec::with_capacity(items.len());
    for element in items {
        if !pull_matches(condition, &element)? {
            kept.push(element);
        }
    }
    change_subdocument_value(document, path, Value::Array(kept), &mut None)
}

fn pull_matches(condition: &PullCondition, element: &Value) -> DolomiteResult<bool> {
    let mut scratch = MatchContext::new();
    match condition {
        PullCondition::Literal(value) => Ok(element == value),
        PullCondition::Query(filter) => match element {
            Value::Document(doc) => filter.apply(doc, &mut scratch),
            _ => Ok(false),
        },
        PullCondition::Operators(filter) => {
            let mut wrapper = Document::new();
            wrapper.put(ELEMENT_KEY, element.clone())?;
            filter.apply(&wrapper, &mut scratch)
        }
    }
}

fn apply_pull_all(document: &mut Document, path: &str, values: &[Value]) -> DolomiteResult<()> {
    let items = match get_subdocument_value(document, path)? {
        Value::Array(items) => items,
        Value::Missing => return Ok(()),
        other => {
            return Err(DolomiteError::new(
                &format!(
                    "Cannot apply $pullAll to a non-array value of type {}",
                    other.describe_type()
                ),
                ErrorKind::BadValue,
            ))
        }
    };
    let kept: Vec<Value> = items
        .into_iter()
        .filter(|element| !values.iter().any(|value| value == element))
        .collect();
    change_subdocument_value(document, path, Value::Array(kept), &mut None)
}

fn apply_bit(
    document: &mut Document,
    path: &str,
    operations: &[(BitOperator, i64)],
) -> DolomiteResult<()> {
    let current = get_subdocument_value(document, path)?;
    let (mut bits, keep_int32) = match &current {
        Value::Missing => (0i64, true),
        Value::Int32(n) => (i64::from(*n), true),
        Value::Int64(n) => (*n, false),
        other => {
            return Err(DolomiteError::new(
                &format!(
                    "Cannot apply $bit to a value of non-integral type. The field '{}' has \
                     the value of non-integral type {}",
                    path,
                    other.describe_type()
                ),
                ErrorKind::BadValue,
            ))
        }
    };
    for (operator, operand) in operations {
        bits = match operator {
            BitOperator::And => bits & operand,
            BitOperator::Or => bits | operand,
            BitOperator::Xor => bits ^ operand,
        };
    }
    let result = if keep_int32 && i32::try_from(bits).is_ok() {
        Value::Int32(bits as i32)
    } else {
        Value::Int64(bits)
    };
    change_subdocument_value(document, path, result, &mut None)
}
