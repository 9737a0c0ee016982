use crate::common::{Decimal128, Value};
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use crate::expression::expr::Op;
use chrono::{Datelike, Duration, Timelike};
use std::cmp::Ordering;

/// Applies a positional-argument operator to already-evaluated values.
pub(crate) fn apply(op: Op, args: Vec<Value>) -> DolomiteResult<Value> {
    match op {
        Op::Abs => absolute(&args[0]),
        Op::Add => add(&args),
        Op::Subtract => subtract(&args[0], &args[1]),
        Op::Multiply => multiply(&args),
        Op::Divide => divide(&args[0], &args[1]),
        Op::Mod => modulo(&args[0], &args[1]),
        Op::Ceil => rounding(op, &args[0], f64::ceil),
        Op::Floor => rounding(op, &args[0], f64::floor),
        Op::Trunc => rounding(op, &args[0], f64::trunc),
        Op::Sqrt => square_root(&args[0]),
        Op::Pow => power(&args[0], &args[1]),
        Op::Exp => unary_double(op, &args[0], f64::exp),
        Op::Ln => logarithm(op, &args[0], f64::ln),
        Op::Log10 => logarithm(op, &args[0], f64::log10),
        Op::Cmp => Ok(Value::Int32(match compare(&args[0], &args[1]) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        })),
        Op::Eq => Ok(Value::Bool(compare(&args[0], &args[1]) == Ordering::Equal)),
        Op::Ne => Ok(Value::Bool(compare(&args[0], &args[1]) != Ordering::Equal)),
        Op::Gt => Ok(Value::Bool(compare(&args[0], &args[1]) == Ordering::Greater)),
        Op::Gte => Ok(Value::Bool(compare(&args[0], &args[1]) != Ordering::Less)),
        Op::Lt => Ok(Value::Bool(compare(&args[0], &args[1]) == Ordering::Less)),
        Op::Lte => Ok(Value::Bool(compare(&args[0], &args[1]) != Ordering::Greater)),
        // $and and $or short-circuit in the evaluator; $not lands here
        Op::And => Ok(Value::Bool(args.iter().all(Value::is_truthy))),
        Op::Or => Ok(Value::Bool(args.iter().any(Value::is_truthy))),
        Op::Not => Ok(Value::Bool(!args[0].is_truthy())),
        Op::IfNull => if_null(args),
        Op::ArrayElemAt => array_elem_at(&args[0], &args[1]),
        Op::First => array_edge(op, &args[0], false),
        Op::Last => array_edge(op, &args[0], true),
        Op::Size => size(&args[0]),
        Op::IsArray => Ok(Value::Bool(args[0].is_array())),
        Op::In => in_array(&args[0], &args[1]),
        Op::ConcatArrays => concat_arrays(&args),
        Op::ReverseArray => reverse_array(&args[0]),
        Op::Concat => concat(&args),
        Op::Substr => substr_bytes(&args[0], &args[1], &args[2]),
        Op::ToLower => change_case(&args[0], str::to_lowercase),
        Op::ToUpper => change_case(&args[0], str::to_uppercase),
        Op::StrLenBytes => str_len_bytes(&args[0]),
        Op::Split => split(&args[0], &args[1]),
        Op::Type => Ok(Value::from(args[0].describe_type())),
        Op::ToInt => to_int(&args[0]),
        Op::ToLong => to_long(&args[0]),
        Op::ToDouble => to_double(&args[0]),
        Op::ToString => to_string(&args[0]),
        Op::ToBool => to_bool(&args[0]),
        Op::Year => date_part(op, &args[0], |d| d.year()),
        Op::Month => date_part(op, &args[0], |d| d.month() as i32),
        Op::DayOfMonth => date_part(op, &args[0], |d| d.day() as i32),
        Op::Hour => date_part(op, &args[0], |d| d.hour() as i32),
        Op::Minute => date_part(op, &args[0], |d| d.minute() as i32),
        Op::Second => date_part(op, &args[0], |d| d.second() as i32),
        Op::Millisecond => date_part(op, &args[0], |d| d.timestamp_subsec_millis() as i32),
        Op::DayOfWeek => date_part(op, &args[0], |d| {
            d.weekday().num_days_from_sunday() as i32 + 1
        }),
        Op::DayOfYear => date_part(op, &args[0], |d| d.ordinal() as i32),
    }
}

/// Comparison with missing collapsed into the null class, the way the
/// aggregation comparison operators observe absent fields.
fn compare(a: &Value, b: &Value) -> Ordering {
    let a = if a.is_missing() { &Value::Null } else { a };
    let b = if b.is_missing() { &Value::Null } else { b };
    a.compare(b)
}

fn numeric_type_error(op: Op, value: &Value) -> DolomiteError {
    let (message, kind) = match op {
        Op::Add => (
            format!(
                "$add only supports numeric or date types, not {}",
                value.describe_type()
            ),
            ErrorKind::Location(16554),
        ),
        Op::Multiply => (
            format!("$multiply only supports numeric types, not {}", value.describe_type()),
            ErrorKind::Location(16555),
        ),
        Op::Subtract => (
            format!(
                "can't $subtract {} from {}",
                value.describe_type(),
                value.describe_type()
            ),
            ErrorKind::Location(16556),
        ),
        Op::Divide => (
            format!("$divide only supports numeric types, not {}", value.describe_type()),
            ErrorKind::Location(16609),
        ),
        Op::Mod => (
            format!("$mod only supports numeric types, not {}", value.describe_type()),
            ErrorKind::Location(16611),
        ),
        Op::Abs => (
            format!("$abs only supports numeric types, not {}", value.describe_type()),
            ErrorKind::Location(28765),
        ),
        _ => (
            format!(
                "{} only supports numeric types, not {}",
                op.name(),
                value.describe_type()
            ),
            ErrorKind::TypeMismatch,
        ),
    };
    DolomiteError::new(&message, kind)
}

fn absolute(value: &Value) -> DolomiteResult<Value> {
    match value {
        value if value.is_null_or_missing() => Ok(Value::Null),
        Value::Int32(n) => match n.checked_abs() {
            Some(abs) => Ok(Value::Int32(abs)),
            None => Ok(Value::Int64((*n as i64).abs())),
        },
        Value::Int64(n) => Ok(Value::Int64(n.abs())),
        Value::Double(d) => Ok(Value::Double(d.abs())),
        Value::Decimal128(d) => Ok(Value::Decimal128(Decimal128::new(
            d.mantissa().abs(),
            d.exponent(),
        ))),
        other => Err(numeric_type_error(Op::Abs, other)),
    }
}

fn add(args: &[Value]) -> DolomiteResult<Value> {
    let mut date: Option<chrono::DateTime<chrono::Utc>> = None;
    let mut int_sum: Option<i64> = Some(0);
    let mut double_sum = 0.0f64;
    let mut all_int32 = true;
    let mut any_double = false;

    for arg in args {
        match arg {
            value if value.is_null_or_missing() => return Ok(Value::Null),
            Value::Date(instant) => {
                if date.is_some() {
                    return Err(DolomiteError::new(
                        "only one date allowed in an $add expression",
                        ErrorKind::Location(16612),
                    ));
                }
                date = Some(*instant);
            }
            value if value.is_number() => {
                if !matches!(value, Value::Int32(_)) {
                    all_int32 = false;
                }
                if matches!(value, Value::Double(_) | Value::Decimal128(_)) {
                    any_double = true;
                }
                let as_double = value.as_f64().unwrap_or(f64::NAN);
                double_sum += as_double;
                int_sum = match (int_sum, value.as_i64()) {
                    (Some(sum), Some(int)) => sum.checked_add(int),
                    _ => None,
                };
            }
            other => return Err(numeric_type_error(Op::Add, other)),
        }
    }

    if let Some(instant) = date {
        let millis = int_sum.unwrap_or(double_sum as i64);
        return Ok(Value::Date(instant + Duration::milliseconds(millis)));
    }
    Ok(numeric_result(int_sum, double_sum, all_int32, any_double))
}

fn multiply(args: &[Value]) -> DolomiteResult<Value> {
    let mut int_product: Option<i64> = Some(1);
    let mut double_product = 1.0f64;
    let mut all_int32 = true;
    let mut any_double = false;

    for arg in args {
        match arg {
            value if value.is_null_or_missing() => return Ok(Value::Null),
            value if value.is_number() => {
                if !matches!(value, Value::Int32(_)) {
                    all_int32 = false;
                }
                if matches!(value, Value::Double(_) | Value::Decimal128(_)) {
                    any_double = true;
                }
                double_product *= value.as_f64().unwrap_or(f64::NAN);
                int_product = match (int_product, value.as_i64()) {
                    (Some(product), Some(int)) => product.checked_mul(int),
                    _ => None,
                };
            }
            other => return Err(numeric_type_error(Op::Multiply, other)),
        }
    }
    Ok(numeric_result(
        int_product,
        double_product,
        all_int32,
        any_double,
    ))
}

fn subtract(a: &Value, b: &Value) -> DolomiteResult<Value> {
    if a.is_null_or_missing() || b.is_null_or_missing() {
        return Ok(Value::Null);
    }
    match (a, b) {
        (Value::Date(left), Value::Date(right)) => {
            Ok(Value::Int64((*left - *right).num_milliseconds()))
        }
        (Value::Date(left), value) if value.is_number() => {
            let millis = value.as_i64().unwrap_or_else(|| {
                value.as_f64().unwrap_or(0.0) as i64
            });
            Ok(Value::Date(*left - Duration::milliseconds(millis)))
        }
        (left, right) if left.is_number() && right.is_number() => {
            let all_int32 = matches!(left, Value::Int32(_)) && matches!(right, Value::Int32(_));
            let any_double = matches!(left, Value::Double(_) | Value::Decimal128(_))
                || matches!(right, Value::Double(_) | Value::Decimal128(_));
            let int_diff = match (left.as_i64(), right.as_i64()) {
                (Some(a), Some(b)) => a.checked_sub(b),
                _ => None,
            };
            let double_diff =
                left.as_f64().unwrap_or(f64::NAN) - right.as_f64().unwrap_or(f64::NAN);
            Ok(numeric_result(int_diff, double_diff, all_int32, any_double))
        }
        (left, right) => Err(DolomiteError::new(
            &format!(
                "can't $subtract {} from {}",
                right.describe_type(),
                left.describe_type()
            ),
            ErrorKind::Location(16556),
        )),
    }
}

fn divide(a: &Value, b: &Value) -> DolomiteResult<Value> {
    if a.is_null_or_missing() || b.is_null_or_missing() {
        return Ok(Value::Null);
    }
    if !a.is_number() {
        return Err(numeric_type_error(Op::Divide, a));
    }
    if !b.is_number() {
        return Err(numeric_type_error(Op::Divide, b));
    }
    let divisor = b.as_f64().unwrap_or(f64::NAN);
    if divisor == 0.0 {
        return Err(DolomiteError::new(
            "can't $divide by zero",
            ErrorKind::Location(16608),
        ));
    }
    Ok(Value::Double(a.as_f64().unwrap_or(f64::NAN) / divisor))
}

fn modulo(a: &Value, b: &Value) -> DolomiteResult<Value> {
    if a.is_null_or_missing() || b.is_null_or_missing() {
        return Ok(Value::Null);
    }
    if !a.is_number() {
        return Err(numeric_type_error(Op::Mod, a));
    }
    if !b.is_number() {
        return Err(numeric_type_error(Op::Mod, b));
    }
    if b.as_f64().unwrap_or(f64::NAN) == 0.0 {
        return Err(DolomiteError::new(
            "can't $mod by zero",
            ErrorKind::Location(16610),
        ));
    }
    match (a.as_i64(), b.as_i64()) {
        (Some(left), Some(right)) => {
            let result = left % right;
            if matches!(a, Value::Int32(_)) && matches!(b, Value::Int32(_)) {
                Ok(Value::Int32(result as i32))
            } else {
                Ok(Value::Int64(result))
            }
        }
        _ => Ok(Value::Double(
            a.as_f64().unwrap_or(f64::NAN) % b.as_f64().unwrap_or(f64::NAN),
        )),
    }
}

fn rounding(op: Op, value: &Value, round: fn(f64) -> f64) -> DolomiteResult<Value> {
    match value {
        value if value.is_null_or_missing() => Ok(Value::Null),
        Value::Int32(_) | Value::Int64(_) => Ok(value.clone()),
        Value::Double(d) => Ok(Value::Double(round(*d))),
        Value::Decimal128(d) => Ok(Value::Double(round(d.to_f64()))),
        other => Err(numeric_type_error(op, other)),
    }
}

fn square_root(value: &Value) -> DolomiteResult<Value> {
    match value {
        value if value.is_null_or_missing() => Ok(Value::Null),
        value if value.is_number() => {
            let double = value.as_f64().unwrap_or(f64::NAN);
            if double < 0.0 {
                return Err(DolomiteError::new(
                    "$sqrt's argument must be greater than or equal to 0",
                    ErrorKind::Location(28714),
                ));
            }
            Ok(Value::Double(double.sqrt()))
        }
        other => Err(numeric_type_error(Op::Sqrt, other)),
    }
}

fn power(base: &Value, exponent: &Value) -> DolomiteResult<Value> {
    if base.is_null_or_missing() || exponent.is_null_or_missing() {
        return Ok(Value::Null);
    }
    if !base.is_number() {
        return Err(numeric_type_error(Op::Pow, base));
    }
    if !exponent.is_number() {
        return Err(numeric_type_error(Op::Pow, exponent));
    }
    if let (Some(b), Some(e)) = (base.as_i64(), exponent.as_i64()) {
        if (0..=u32::MAX as i64).contains(&e) {
            if let Some(result) = b.checked_pow(e as u32) {
                return Ok(Value::Int64(result));
            }
        }
    }
    Ok(Value::Double(
        base.as_f64()
            .unwrap_or(f64::NAN)
            .powf(exponent.as_f64().unwrap_or(f64::NAN)),
    ))
}

fn unary_double(op: Op, value: &Value, f: fn(f64) -> f64) -> DolomiteResult<Value> {
    match value {
        value if value.is_null_or_missing() => Ok(Value::Null),
        value if value.is_number() => Ok(Value::Double(f(value.as_f64().unwrap_or(f64::NAN)))),
        other => Err(numeric_type_error(op, other)),
    }
}

fn logarithm(op: Op, value: &Value, f: fn(f64) -> f64) -> DolomiteResult<Value> {
    match value {
        value if value.is_null_or_missing() => Ok(Value::Null),
        value if value.is_number() => {
            let double = value.as_f64().unwrap_or(f64::NAN);
            if double <= 0.0 {
                return Err(DolomiteError::new(
                    &format!("{}'s argument must be a positive number, but is {}", op.name(), double),
                    ErrorKind::Location(28766),
                ));
            }
            Ok(Value::Double(f(double)))
        }
        other => Err(numeric_type_error(op, other)),
    }
}

fn numeric_result(int: Option<i64>, double: f64, all_int32: bool, any_double: bool) -> Value {
    match int {
        Some(value) if !any_double => {
            if all_int32 && i32::try_from(value).is_ok() {
                Value::Int32(value as i32)
            } else {
                Value::Int64(value)
            }
        }
        // overflowed integer arithmetic or floating point operands
        _ => Value::Double(double),
    }
}

fn if_null(args: Vec<Value>) -> DolomiteResult<Value> {
    let last = args.len() - 1;
    for (i, value) in args.iter().enumerate() {
        if i == last || !value.is_null_or_missing() {
            return Ok(if value.is_missing() {
                Value::Null
            } else {
                value.clone()
            });
        }
    }
    Ok(Value::Null)
}

fn array_elem_at(array: &Value, index: &Value) -> DolomiteResult<Value> {
    if array.is_null_or_missing() {
        return Ok(Value::Null);
    }
    let items = array.as_array().ok_or_else(|| {
        DolomiteError::new(
            &format!(
                "$arrayElemAt's first argument must be an array, but is {}",
                array.describe_type()
            ),
            ErrorKind::Location(28689),
        )
    })?;
    let position = index.as_i64().ok_or_else(|| {
        DolomiteError::new(
            &format!(
                "$arrayElemAt's second argument must be a numeric value, but is {}",
                index.describe_type()
            ),
            ErrorKind::Location(28690),
        )
    })?;
    if i32::try_from(position).is_err() {
        return Err(DolomiteError::new(
            "$arrayElemAt's second argument must be representable as a 32-bit integer",
            ErrorKind::Location(28691),
        ));
    }
    let index = if position < 0 {
        let from_end = items.len() as i64 + position;
        if from_end < 0 {
            return Ok(Value::Missing);
        }
        from_end as usize
    } else {
        position as usize
    };
    Ok(items.get(index).cloned().unwrap_or(Value::Missing))
}

fn array_edge(op: Op, array: &Value, last: bool) -> DolomiteResult<Value> {
    if array.is_null_or_missing() {
        return Ok(Value::Null);
    }
    let items = array.as_array().ok_or_else(|| {
        DolomiteError::new(
            &format!(
                "{}'s argument must be an array, but is {}",
                op.name(),
                array.describe_type()
            ),
            ErrorKind::Location(28689),
        )
    })?;
    let item = if last { items.last() } else { items.first() };
    Ok(item.cloned().unwrap_or(Value::Missing))
}

fn size(value: &Value) -> DolomiteResult<Value> {
    let items = value.as_array().ok_or_else(|| {
        DolomiteError::new(
            &format!(
                "The argument to $size must be an array, but was of type: {}",
                value.describe_type()
            ),
            ErrorKind::Location(17124),
        )
    })?;
    Ok(Value::Int32(items.len() as i32))
}

fn in_array(needle: &Value, haystack: &Value) -> DolomiteResult<Value> {
    let items = haystack.as_array().ok_or_else(|| {
        DolomiteError::new(
            &format!(
                "$in requires an array as a second argument, found: {}",
                haystack.describe_type()
            ),
            ErrorKind::Location(40081),
        )
    })?;
    Ok(Value::Bool(items.iter().any(|item| {
        compare(item, needle) == Ordering::Equal
    })))
}

fn concat_arrays(args: &[Value]) -> DolomiteResult<Value> {
    let mut result = Vec::new();
    for arg in args {
        if arg.is_null_or_missing() {
            return Ok(Value::Null);
        }
        let items = arg.as_array().ok_or_else(|| {
            DolomiteError::new(
                &format!("$concatArrays only supports arrays, not {}", arg.describe_type()),
                ErrorKind::Location(28664),
            )
        })?;
        result.extend(items.iter().cloned());
    }
    Ok(Value::Array(result))
}

fn reverse_array(value: &Value) -> DolomiteResult<Value> {
    if value.is_null_or_missing() {
        return Ok(Value::Null);
    }
    let items = value.as_array().ok_or_else(|| {
        DolomiteError::new(
            &format!(
                "The argument to $reverseArray must be an array, but was of type: {}",
                value.describe_type()
            ),
            ErrorKind::Location(34435),
        )
    })?;
    Ok(Value::Array(items.iter().rev().cloned().collect()))
}

fn concat(args: &[Value]) -> DolomiteResult<Value> {
    let mut result = String::new();
    for arg in args {
        if arg.is_null_or_missing() {
            return Ok(Value::Null);
        }
        match arg {
            Value::String(s) => result.push_str(s),
            other => {
                return Err(DolomiteError::new(
                    &format!("$concat only supports strings, not {}", other.describe_type()),
                    ErrorKind::Location(16702),
                ))
            }
        }
    }
    Ok(Value::from(result))
}

fn substr_bytes(value: &Value, start: &Value, length: &Value) -> DolomiteResult<Value> {
    let text = match value {
        value if value.is_null_or_missing() => return Ok(Value::from("")),
        Value::String(s) => s.as_str(),
        other => {
            return Err(DolomiteError::new(
                &format!(
                    "$substrBytes: first argument must be a string, but is {}",
                    other.describe_type()
                ),
                ErrorKind::Location(16034),
            ))
        }
    };
    let start = start.as_i64().ok_or_else(|| {
        DolomiteError::new(
            "$substrBytes: starting index must be a numeric type",
            ErrorKind::Location(16034),
        )
    })?;
    let length = length.as_i64().ok_or_else(|| {
        DolomiteError::new(
            "$substrBytes: length must be a numeric type",
            ErrorKind::Location(16035),
        )
    })?;

    let bytes = text.as_bytes();
    let begin = start.clamp(0, bytes.len() as i64) as usize;
    let end = if length < 0 {
        bytes.len()
    } else {
        (begin as i64 + length).clamp(0, bytes.len() as i64) as usize
    };
    let slice = &bytes[begin..end];
    match std::str::from_utf8(slice) {
        Ok(text) => Ok(Value::from(text)),
        Err(_) => Err(DolomiteError::new(
            "Invalid range, starting index is a UTF-8 continuation byte",
            ErrorKind::Location(28656),
        )),
    }
}

fn change_case(value: &Value, f: fn(&str) -> String) -> DolomiteResult<Value> {
    match value {
        value if value.is_null_or_missing() => Ok(Value::from("")),
        Value::String(s) => Ok(Value::from(f(s))),
        Value::Int32(n) => Ok(Value::from(f(&n.to_string()))),
        Value::Int64(n) => Ok(Value::from(f(&n.to_string()))),
        Value::Double(d) => Ok(Value::from(f(&d.to_string()))),
        other => Err(DolomiteError::new(
            &format!("can't convert from BSON type {} to String", other.describe_type()),
            ErrorKind::Location(16007),
        )),
    }
}

fn str_len_bytes(value: &Value) -> DolomiteResult<Value> {
    match value {
        Value::String(s) => Ok(Value::Int32(s.len() as i32)),
        other => Err(DolomiteError::new(
            &format!("$strLenBytes requires a string argument, found: {}", other.describe_type()),
            ErrorKind::Location(34473),
        )),
    }
}

fn split(value: &Value, delimiter: &Value) -> DolomiteResult<Value> {
    if value.is_null_or_missing() {
        return Ok(Value::Null);
    }
    let text = value.as_str().ok_or_else(|| {
        DolomiteError::new(
            &format!(
                "$split requires an expression that evaluates to a string as a first \
                 argument, found: {}",
                value.describe_type()
            ),
            ErrorKind::Location(40085),
        )
    })?;
    let delimiter = delimiter.as_str().ok_or_else(|| {
        DolomiteError::new(
            &format!(
                "$split requires an expression that evaluates to a string as a second \
                 argument, found: {}",
                delimiter.describe_type()
            ),
            ErrorKind::Location(40086),
        )
    })?;
    if delimiter.is_empty() {
        return Err(DolomiteError::new(
            "$split requires a non-empty separator",
            ErrorKind::Location(40087),
        ));
    }
    Ok(Value::Array(
        text.split(delimiter).map(Value::from).collect(),
    ))
}

fn conversion_failure(value: &Value, target: &str) -> DolomiteError {
    DolomiteError::new(
        &format!(
            "Unsupported conversion from {} to {} in $convert with no onError value",
            value.describe_type(),
            target
        ),
        ErrorKind::Location(241),
    )
}

fn to_int(value: &Value) -> DolomiteResult<Value> {
    match value {
        value if value.is_null_or_missing() => Ok(Value::Null),
        Value::Bool(b) => Ok(Value::Int32(i32::from(*b))),
        Value::String(s) => match s.parse::<i32>() {
            Ok(n) => Ok(Value::Int32(n)),
            Err(_) => Err(conversion_failure(value, "int")),
        },
        value if value.is_number() => match value.as_i64().and_then(|n| i32::try_from(n).ok()) {
            Some(n) => Ok(Value::Int32(n)),
            None => {
                let double = value.as_f64().unwrap_or(f64::NAN);
                if double.is_finite() && (i32::MIN as f64..=i32::MAX as f64).contains(&double) {
                    Ok(Value::Int32(double as i32))
                } else {
                    Err(conversion_failure(value, "int"))
                }
            }
        },
        other => Err(conversion_failure(other, "int")),
    }
}

fn to_long(value: &Value) -> DolomiteResult<Value> {
    match value {
        value if value.is_null_or_missing() => Ok(Value::Null),
        Value::Bool(b) => Ok(Value::Int64(i64::from(*b))),
        Value::String(s) => match s.parse::<i64>() {
            Ok(n) => Ok(Value::Int64(n)),
            Err(_) => Err(conversion_failure(value, "long")),
        },
        Value::Date(instant) => Ok(Value::Int64(instant.timestamp_millis())),
        value if value.is_number() => match value.as_i64() {
            Some(n) => Ok(Value::Int64(n)),
            None => {
                let double = value.as_f64().unwrap_or(f64::NAN);
                if double.is_finite() {
                    Ok(Value::Int64(double as i64))
                } else {
                    Err(conversion_failure(value, "long"))
                }
            }
        },
        other => Err(conversion_failure(other, "long")),
    }
}

fn to_double(value: &Value) -> DolomiteResult<Value> {
    match value {
        value if value.is_null_or_missing() => Ok(Value::Null),
        Value::Bool(b) => Ok(Value::Double(if *b { 1.0 } else { 0.0 })),
        Value::String(s) => match s.parse::<f64>() {
            Ok(d) => Ok(Value::Double(d)),
            Err(_) => Err(conversion_failure(value, "double")),
        },
        value if value.is_number() => Ok(Value::Double(value.as_f64().unwrap_or(f64::NAN))),
        other => Err(conversion_failure(other, "double")),
    }
}

fn to_string(value: &Value) -> DolomiteResult<Value> {
    match value {
        value if value.is_null_or_missing() => Ok(Value::Null),
        Value::String(s) => Ok(Value::from(s.clone())),
        Value::Bool(b) => Ok(Value::from(b.to_string())),
        Value::Int32(n) => Ok(Value::from(n.to_string())),
        Value::Int64(n) => Ok(Value::from(n.to_string())),
        Value::Double(d) => Ok(Value::from(d.to_string())),
        Value::Decimal128(d) => Ok(Value::from(d.to_string())),
        Value::ObjectId(id) => Ok(Value::from(id.to_hex())),
        Value::Date(instant) => Ok(Value::from(instant.to_rfc3339())),
        other => Err(conversion_failure(other, "string")),
    }
}

fn to_bool(value: &Value) -> DolomiteResult<Value> {
    match value {
        value if value.is_null_or_missing() => Ok(Value::Null),
        // string-to-bool is always true, matching the truthiness of any string
        Value::String(_) => Ok(Value::Bool(true)),
        other => Ok(Value::Bool(other.is_truthy())),
    }
}

fn date_part(
    op: Op,
    value: &Value,
    part: fn(&chrono::DateTime<chrono::Utc>) -> i32,
) -> DolomiteResult<Value> {
    match value {
        value if value.is_null_or_missing() => Ok(Value::Null),
        Value::Date(instant) => Ok(Value::Int32(part(instant))),
        other => Err(DolomiteError::new(
            &format!(
                "can't convert from BSON type {} to Date in {}",
                other.describe_type(),
                op.name()
            ),
            ErrorKind::Location(16006),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_add_widening() {
        assert_eq!(
            apply(Op::Add, vec![Value::Int32(1), Value::Int32(2)]).unwrap(),
            Value::Int32(3)
        );
        assert_eq!(
            apply(Op::Add, vec![Value::Int32(1), Value::Int64(2)]).unwrap(),
            Value::Int64(3)
        );
        assert_eq!(
            apply(Op::Add, vec![Value::Int32(1), Value::Double(0.5)]).unwrap(),
            Value::Double(1.5)
        );
        // int32 overflow widens
        assert_eq!(
            apply(Op::Add, vec![Value::Int32(i32::MAX), Value::Int32(1)]).unwrap(),
            Value::Int64(i64::from(i32::MAX) + 1)
        );
    }

    #[test]
    fn test_add_null_propagates() {
        assert_eq!(
            apply(Op::Add, vec![Value::Int32(1), Value::Null]).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_add_rejects_strings() {
        let err = apply(Op::Add, vec![Value::from("x"), Value::Int32(1)]).unwrap_err();
        assert_eq!(err.code(), 16554);
    }

    #[test]
    fn test_add_shifts_dates() {
        let instant = chrono::Utc.timestamp_millis_opt(1_000).unwrap();
        let shifted = apply(Op::Add, vec![Value::Date(instant), Value::Int32(500)]).unwrap();
        assert_eq!(
            shifted,
            Value::Date(chrono::Utc.timestamp_millis_opt(1_500).unwrap())
        );
    }

    #[test]
    fn test_divide_by_zero() {
        let err = apply(Op::Divide, vec![Value::Int32(1), Value::Int32(0)]).unwrap_err();
        assert_eq!(err.code(), 16608);
        assert_eq!(err.message(), "can't $divide by zero");
        let err = apply(Op::Mod, vec![Value::Int32(1), Value::Int32(0)]).unwrap_err();
        assert_eq!(err.code(), 16610);
    }

    #[test]
    fn test_mod_keeps_integer_type() {
        assert_eq!(
            apply(Op::Mod, vec![Value::Int32(7), Value::Int32(4)]).unwrap(),
            Value::Int32(3)
        );
        assert_eq!(
            apply(Op::Mod, vec![Value::Int64(7), Value::Int32(4)]).unwrap(),
            Value::Int64(3)
        );
    }

    #[test]
    fn test_comparisons_use_canonical_order() {
        // a number is smaller than a string in the cross-type order
        assert_eq!(
            apply(Op::Lt, vec![Value::Int32(5), Value::from("a")]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            apply(Op::Eq, vec![Value::Missing, Value::Null]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            apply(Op::Cmp, vec![Value::Int32(2), Value::Int32(1)]).unwrap(),
            Value::Int32(1)
        );
    }

    #[test]
    fn test_array_elem_at() {
        let array = Value::Array(vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)]);
        assert_eq!(
            apply(Op::ArrayElemAt, vec![array.clone(), Value::Int32(1)]).unwrap(),
            Value::Int32(2)
        );
        assert_eq!(
            apply(Op::ArrayElemAt, vec![array.clone(), Value::Int32(-1)]).unwrap(),
            Value::Int32(3)
        );
        assert_eq!(
            apply(Op::ArrayElemAt, vec![array.clone(), Value::Int32(9)]).unwrap(),
            Value::Missing
        );
        let err = apply(Op::ArrayElemAt, vec![Value::from("x"), Value::Int32(0)]).unwrap_err();
        assert_eq!(err.code(), 28689);
        let err = apply(Op::ArrayElemAt, vec![array, Value::from("x")]).unwrap_err();
        assert_eq!(err.code(), 28690);
    }

    #[test]
    fn test_size_requires_array() {
        assert_eq!(
            apply(Op::Size, vec![Value::Array(vec![Value::Null])]).unwrap(),
            Value::Int32(1)
        );
        let err = apply(Op::Size, vec![Value::from("x")]).unwrap_err();
        assert_eq!(err.code(), 17124);
    }

    #[test]
    fn test_concat_null_propagates() {
        assert_eq!(
            apply(Op::Concat, vec![Value::from("a"), Value::from("b")]).unwrap(),
            Value::from("ab")
        );
        assert_eq!(
            apply(Op::Concat, vec![Value::from("a"), Value::Null]).unwrap(),
            Value::Null
        );
        let err = apply(Op::Concat, vec![Value::Int32(1)]).unwrap_err();
        assert_eq!(err.code(), 16702);
    }

    #[test]
    fn test_substr_bytes() {
        assert_eq!(
            apply(
                Op::Substr,
                vec![Value::from("hello"), Value::Int32(1), Value::Int32(3)]
            )
            .unwrap(),
            Value::from("ell")
        );
        // negative length extends to the end
        assert_eq!(
            apply(
                Op::Substr,
                vec![Value::from("hello"), Value::Int32(2), Value::Int32(-1)]
            )
            .unwrap(),
            Value::from("llo")
        );
    }

    #[test]
    fn test_if_null() {
        assert_eq!(
            apply(Op::IfNull, vec![Value::Null, Value::Int32(5)]).unwrap(),
            Value::Int32(5)
        );
        assert_eq!(
            apply(Op::IfNull, vec![Value::Int32(1), Value::Int32(5)]).unwrap(),
            Value::Int32(1)
        );
        assert_eq!(
            apply(Op::IfNull, vec![Value::Missing, Value::Null]).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_split() {
        assert_eq!(
            apply(Op::Split, vec![Value::from("a,b,c"), Value::from(",")]).unwrap(),
            Value::Array(vec![Value::from("a"), Value::from("b"), Value::from("c")])
        );
        let err = apply(Op::Split, vec![Value::from("a"), Value::from("")]).unwrap_err();
        assert_eq!(err.code(), 40087);
    }

    #[test]
    fn test_type_and_conversions() {
        assert_eq!(
            apply(Op::Type, vec![Value::Missing]).unwrap(),
            Value::from("missing")
        );
        assert_eq!(
            apply(Op::ToInt, vec![Value::from("42")]).unwrap(),
            Value::Int32(42)
        );
        assert_eq!(
            apply(Op::ToBool, vec![Value::Int32(0)]).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            apply(Op::ToString, vec![Value::Int64(7)]).unwrap(),
            Value::from("7")
        );
        let err = apply(Op::ToInt, vec![Value::from("nope")]).unwrap_err();
        assert_eq!(err.code(), 241);
    }

    #[test]
    fn test_date_parts() {
        let instant = chrono::Utc
            .with_ymd_and_hms(2024, 2, 29, 13, 45, 30)
            .unwrap();
        assert_eq!(
            apply(Op::Year, vec![Value::Date(instant)]).unwrap(),
            Value::Int32(2024)
        );
        assert_eq!(
            apply(Op::Month, vec![Value::Date(instant)]).unwrap(),
            Value::Int32(2)
        );
        assert_eq!(
            apply(Op::DayOfMonth, vec![Value::Date(instant)]).unwrap(),
            Value::Int32(29)
        );
        assert_eq!(
            apply(Op::DayOfYear, vec![Value::Date(instant)]).unwrap(),
            Value::Int32(60)
        );
        let err = apply(Op::Year, vec![Value::Int32(5)]).unwrap_err();
        assert_eq!(err.code(), 16006);
    }
}
