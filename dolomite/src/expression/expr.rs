use crate::collection::Document;
use crate::common::Value;
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};

/// A parsed aggregation expression.
///
/// The tree is built once per specification and shared across every document
/// it is evaluated against.
#[derive(Clone, Debug)]
pub enum Expr {
    /// A constant value, including everything under `$literal`.
    Literal(Value),
    /// A `"$path"` field reference, resolved against the current document.
    FieldPath(String),
    /// A `"$$name"` or `"$$name.path"` variable reference.
    Variable(String),
    /// A literal document whose values are expressions.
    Document(Vec<(String, Expr)>),
    /// A literal array whose elements are expressions.
    Array(Vec<Expr>),
    /// A positional-argument operator call.
    Operator(Op, Vec<Expr>),
    Cond {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Switch {
        branches: Vec<SwitchBranch>,
        default: Option<Box<Expr>>,
    },
    Let {
        vars: Vec<(String, Expr)>,
        body: Box<Expr>,
    },
    Map {
        input: Box<Expr>,
        var_name: String,
        body: Box<Expr>,
    },
    Filter {
        input: Box<Expr>,
        var_name: String,
        cond: Box<Expr>,
    },
    Reduce {
        input: Box<Expr>,
        initial: Box<Expr>,
        body: Box<Expr>,
    },
}

#[derive(Clone, Debug)]
pub struct SwitchBranch {
    pub case: Expr,
    pub then: Expr,
}

/// Operators with plain positional arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    // arithmetic
    Abs,
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Ceil,
    Floor,
    Trunc,
    Sqrt,
    Pow,
    Exp,
    Ln,
    Log10,
    // comparison
    Cmp,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    // boolean
    And,
    Or,
    Not,
    // conditional
    IfNull,
    // array
    ArrayElemAt,
    First,
    Last,
    Size,
    IsArray,
    In,
    ConcatArrays,
    ReverseArray,
    // string
    Concat,
    Substr,
    ToLower,
    ToUpper,
    StrLenBytes,
    Split,
    // type
    Type,
    ToInt,
    ToLong,
    ToDouble,
    ToString,
    ToBool,
    // date
    Year,
    Month,
    DayOfMonth,
    Hour,
    Minute,
    Second,
    Millisecond,
    DayOfWeek,
    DayOfYear,
}

impl Op {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Op::Abs => "$abs",
            Op::Add => "$add",
            Op::Subtract => "$subtract",
            Op::Multiply => "$multiply",
            Op::Divide => "$divide",
            Op::Mod => "$mod",
            Op::Ceil => "$ceil",
            Op::Floor => "$floor",
            Op::Trunc => "$trunc",
            Op::Sqrt => "$sqrt",
            Op::Pow => "$pow",
            Op::Exp => "$exp",
            Op::Ln => "$ln",
            Op::Log10 => "$log10",
            Op::Cmp => "$cmp",
            Op::Eq => "$eq",
            Op::Ne => "$ne",
            Op::Gt => "$gt",
            Op::Gte => "$gte",
            Op::Lt => "$lt",
            Op::Lte => "$lte",
            Op::And => "$and",
            Op::Or => "$or",
            Op::Not => "$not",
            Op::IfNull => "$ifNull",
            Op::ArrayElemAt => "$arrayElemAt",
            Op::First => "$first",
            Op::Last => "$last",
            Op::Size => "$size",
            Op::IsArray => "$isArray",
            Op::In => "$in",
            Op::ConcatArrays => "$concatArrays",
            Op::ReverseArray => "$reverseArray",
            Op::Concat => "$concat",
            Op::Substr => "$substrBytes",
            Op::ToLower => "$toLower",
            Op::ToUpper => "$toUpper",
            Op::StrLenBytes => "$strLenBytes",
            Op::Split => "$split",
            Op::Type => "$type",
            Op::ToInt => "$toInt",
            Op::ToLong => "$toLong",
            Op::ToDouble => "$toDouble",
            Op::ToString => "$toString",
            Op::ToBool => "$toBool",
            Op::Year => "$year",
            Op::Month => "$month",
            Op::DayOfMonth => "$dayOfMonth",
            Op::Hour => "$hour",
            Op::Minute => "$minute",
            Op::Second => "$second",
            Op::Millisecond => "$millisecond",
            Op::DayOfWeek => "$dayOfWeek",
            Op::DayOfYear => "$dayOfYear",
        }
    }

    /// Fixed arity of the operator, or `None` for variadic operators.
    fn arity(&self) -> Option<std::ops::RangeInclusive<usize>> {
        match self {
            Op::Abs
            | Op::Ceil
            | Op::Floor
            | Op::Trunc
            | Op::Sqrt
            | Op::Exp
            | Op::Ln
            | Op::Log10
            | Op::Not
            | Op::First
            | Op::Last
            | Op::Size
            | Op::IsArray
            | Op::ReverseArray
            | Op::ToLower
            | Op::ToUpper
            | Op::StrLenBytes
            | Op::Type
            | Op::ToInt
            | Op::ToLong
            | Op::ToDouble
            | Op::ToString
            | Op::ToBool
            | Op::Year
            | Op::Month
            | Op::DayOfMonth
            | Op::Hour
            | Op::Minute
            | Op::Second
            | Op::Millisecond
            | Op::DayOfWeek
            | Op::DayOfYear => Some(1..=1),
            Op::Subtract
            | Op::Divide
            | Op::Mod
            | Op::Pow
            | Op::Cmp
            | Op::Eq
            | Op::Ne
            | Op::Gt
            | Op::Gte
            | Op::Lt
            | Op::Lte
            | Op::ArrayElemAt
            | Op::In
            | Op::Split => Some(2..=2),
            Op::Substr => Some(3..=3),
            Op::IfNull => Some(2..=usize::MAX),
            Op::Add | Op::Multiply | Op::And | Op::Or | Op::Concat | Op::ConcatArrays => None,
        }
    }

    fn from_name(name: &str) -> Option<Op> {
        let op = match name {
            "$abs" => Op::Abs,
            "$add" => Op::Add,
            "$subtract" => Op::Subtract,
            "$multiply" => Op::Multiply,
            "$divide" => Op::Divide,
            "$mod" => Op::Mod,
            "$ceil" => Op::Ceil,
            "$floor" => Op::Floor,
            "$trunc" => Op::Trunc,
            "$sqrt" => Op::Sqrt,
            "$pow" => Op::Pow,
            "$exp" => Op::Exp,
            "$ln" => Op::Ln,
            "$log10" => Op::Log10,
            "$cmp" => Op::Cmp,
            "$eq" => Op::Eq,
            "$ne" => Op::Ne,
            "$gt" => Op::Gt,
            "$gte" => Op::Gte,
            "$lt" => Op::Lt,
            "$lte" => Op::Lte,
            "$and" => Op::And,
            "$or" => Op::Or,
            "$not" => Op::Not,
            "$ifNull" => Op::IfNull,
            "$arrayElemAt" => Op::ArrayElemAt,
            "$first" => Op::First,
            "$last" => Op::Last,
            "$size" => Op::Size,
            "$isArray" => Op::IsArray,
            "$in" => Op::In,
            "$concatArrays" => Op::ConcatArrays,
            "$reverseArray" => Op::ReverseArray,
            "$concat" => Op::Concat,
            "$substr" | "$substrBytes" => Op::Substr,
            "$toLower" => Op::ToLower,
            "$toUpper" => Op::ToUpper,
            "$strLenBytes" => Op::StrLenBytes,
            "$split" => Op::Split,
            "$type" => Op::Type,
            "$toInt" => Op::ToInt,
            "$toLong" => Op::ToLong,
            "$toDouble" => Op::ToDouble,
            "$toString" => Op::ToString,
            "$toBool" => Op::ToBool,
            "$year" => Op::Year,
            "$month" => Op::Month,
            "$dayOfMonth" => Op::DayOfMonth,
            "$hour" => Op::Hour,
            "$minute" => Op::Minute,
            "$second" => Op::Second,
            "$millisecond" => Op::Millisecond,
            "$dayOfWeek" => Op::DayOfWeek,
            "$dayOfYear" => Op::DayOfYear,
            _ => return None,
        };
        Some(op)
    }
}

impl Expr {
    /// Parses an expression value into a tree.
    pub fn parse(value: &Value) -> DolomiteResult<Expr> {
        match value {
            Value::String(text) => {
                if let Some(variable) = text.strip_prefix("$$") {
                    Ok(Expr::Variable(variable.to_string()))
                } else if let Some(path) = text.strip_prefix('$') {
                    Ok(Expr::FieldPath(path.to_string()))
                } else {
                    Ok(Expr::Literal(value.clone()))
                }
            }
            Value::Document(doc) => Expr::parse_document(doc),
            Value::Array(items) => {
                let parsed = items
                    .iter()
                    .map(Expr::parse)
                    .collect::<DolomiteResult<Vec<_>>>()?;
                Ok(Expr::Array(parsed))
            }
            other => Ok(Expr::Literal(other.clone())),
        }
    }

    fn parse_document(doc: &Document) -> DolomiteResult<Expr> {
        let operator_keys: Vec<&String> =
            doc.keys().filter(|key| key.starts_with('$')).collect();

        if operator_keys.is_empty() {
            let mut fields = Vec::with_capacity(doc.len());
            for (key, value) in doc.iter() {
                fields.push((key.clone(), Expr::parse(value)?));
            }
            return Ok(Expr::Document(fields));
        }

        if doc.len() > 1 {
            log::error!("Operator expression with more than one field: {}", doc);
            return Err(DolomiteError::new(
                "an expression specification must contain exactly one field",
                ErrorKind::Location(15983),
            ));
        }

        let (name, argument) = match doc.iter().next() {
            Some((name, argument)) => (name.as_str(), argument),
            None => {
                return Err(DolomiteError::new(
                    "an expression specification must contain exactly one field",
                    ErrorKind::Location(15983),
                ))
            }
        };

        match name {
            "$literal" => Ok(Expr::Literal(argument.clone())),
            "$cond" => Expr::parse_cond(argument),
            "$switch" => Expr::parse_switch(argument),
            "$let" => Expr::parse_let(argument),
            "$map" => Expr::parse_map(argument),
            "$filter" => Expr::parse_filter(argument),
            "$reduce" => Expr::parse_reduce(argument),
            _ => {
                let op = Op::from_name(name).ok_or_else(|| {
                    DolomiteError::new(
                        &format!("Unrecognized expression '{}'", name),
                        ErrorKind::InvalidPipelineOperator,
                    )
                })?;
                let args = match argument {
                    Value::Array(items) => items
                        .iter()
                        .map(Expr::parse)
                        .collect::<DolomiteResult<Vec<_>>>()?,
                    single => vec![Expr::parse(single)?],
                };
                if let Some(arity) = op.arity() {
                    if !arity.contains(&args.len()) {
                        return Err(arity_error(op, *arity.start(), *arity.end(), args.len()));
                    }
                }
                Ok(Expr::Operator(op, args))
            }
        }
    }

    fn parse_cond(argument: &Value) -> DolomiteResult<Expr> {
        match argument {
            Value::Array(items) if items.len() == 3 => Ok(Expr::Cond {
                condition: Box::new(Expr::parse(&items[0])?),
                then: Box::new(Expr::parse(&items[1])?),
                otherwise: Box::new(Expr::parse(&items[2])?),
            }),
            Value::Array(items) => Err(DolomiteError::new(
                &format!(
                    "Expression $cond takes exactly 3 arguments. {} were passed in.",
                    items.len()
                ),
                ErrorKind::Location(16020),
            )),
            Value::Document(doc) => {
                for key in doc.keys() {
                    if !matches!(key.as_str(), "if" | "then" | "else") {
                        return Err(DolomiteError::new(
                            &format!("Unrecognized parameter to $cond: {}", key),
                            ErrorKind::Location(17083),
                        ));
                    }
                }
                let condition = doc.get("if").ok_or_else(|| {
                    DolomiteError::new(
                        "Missing 'if' parameter to $cond",
                        ErrorKind::Location(17080),
                    )
                })?;
                let then = doc.get("then").ok_or_else(|| {
                    DolomiteError::new(
                        "Missing 'then' parameter to $cond",
                        ErrorKind::Location(17081),
                    )
                })?;
                let otherwise = doc.get("else").ok_or_else(|| {
                    DolomiteError::new(
                        "Missing 'else' parameter to $cond",
                        ErrorKind::Location(17082),
                    )
                })?;
                Ok(Expr::Cond {
                    condition: Box::new(Expr::parse(condition)?),
                    then: Box::new(Expr::parse(then)?),
                    otherwise: Box::new(Expr::parse(otherwise)?),
                })
            }
            _ => Err(DolomiteError::new(
                "$cond requires either an object or an array of three expressions",
                ErrorKind::FailedToParse,
            )),
        }
    }

    fn parse_switch(argument: &Value) -> DolomiteResult<Expr> {
        let doc = argument.as_document().ok_or_else(|| {
            DolomiteError::new(
                "$switch requires an object as an argument",
                ErrorKind::Location(40060),
            )
        })?;
        let mut branches = Vec::new();
        let mut default = None;
        for (key, value) in doc.iter() {
            match key.as_str() {
                "branches" => {
                    let items = value.as_array().ok_or_else(|| {
                        DolomiteError::new(
                            "$switch expected an array for 'branches'",
                            ErrorKind::Location(40061),
                        )
                    })?;
                    for item in items {
                        let branch = item.as_document().ok_or_else(|| {
                            DolomiteError::new(
                                "$switch expected each branch to be an object",
                                ErrorKind::Location(40062),
                            )
                        })?;
                        let case = branch.get("case").ok_or_else(|| {
                            DolomiteError::new(
                                "$switch requires each branch have a 'case' expression",
                                ErrorKind::Location(40064),
                            )
                        })?;
                        let then = branch.get("then").ok_or_else(|| {
                            DolomiteError::new(
                                "$switch requires each branch have a 'then' expression",
                                ErrorKind::Location(40065),
                            )
                        })?;
                        branches.push(SwitchBranch {
                            case: Expr::parse(case)?,
                            then: Expr::parse(then)?,
                        });
                    }
                }
                "default" => default = Some(Box::new(Expr::parse(value)?)),
                other => {
                    return Err(DolomiteError::new(
                        &format!("$switch found an unknown argument: {}", other),
                        ErrorKind::Location(40068),
                    ))
                }
            }
        }
        Ok(Expr::Switch { branches, default })
    }

    fn parse_let(argument: &Value) -> DolomiteResult<Expr> {
        let doc = argument.as_document().ok_or_else(|| {
            DolomiteError::new(
                "$let only supports an object as its argument",
                ErrorKind::Location(16874),
            )
        })?;
        let vars_doc = doc
            .get("vars")
            .and_then(Value::as_document)
            .ok_or_else(|| {
                DolomiteError::new("Missing 'vars' parameter to $let", ErrorKind::Location(16876))
            })?;
        let body = doc.get("in").ok_or_else(|| {
            DolomiteError::new("Missing 'in' parameter to $let", ErrorKind::Location(16877))
        })?;
        let mut vars = Vec::with_capacity(vars_doc.len());
        for (name, value) in vars_doc.iter() {
            vars.push((name.clone(), Expr::parse(value)?));
        }
        Ok(Expr::Let {
            vars,
            body: Box::new(Expr::parse(body)?),
        })
    }

    fn parse_map(argument: &Value) -> DolomiteResult<Expr> {
        let doc = argument.as_document().ok_or_else(|| {
            DolomiteError::new(
                "$map only supports an object as its argument",
                ErrorKind::Location(16878),
            )
        })?;
        let input = doc.get("input").ok_or_else(|| {
            DolomiteError::new("Missing 'input' parameter to $map", ErrorKind::Location(16880))
        })?;
        let body = doc.get("in").ok_or_else(|| {
            DolomiteError::new("Missing 'in' parameter to $map", ErrorKind::Location(16882))
        })?;
        let var_name = match doc.get("as") {
            Some(Value::String(name)) => name.clone(),
            None => "this".to_string(),
            Some(_) => {
                return Err(DolomiteError::new(
                    "$map requires a string for the 'as' parameter",
                    ErrorKind::Location(16866),
                ))
            }
        };
        Ok(Expr::Map {
            input: Box::new(Expr::parse(input)?),
            var_name,
            body: Box::new(Expr::parse(body)?),
        })
    }

    fn parse_filter(argument: &Value) -> DolomiteResult<Expr> {
        let doc = argument.as_document().ok_or_else(|| {
            DolomiteError::new(
                "$filter only supports an object as its argument",
                ErrorKind::Location(28646),
            )
        })?;
        let input = doc.get("input").ok_or_else(|| {
            DolomiteError::new("Missing 'input' parameter to $filter", ErrorKind::Location(28648))
        })?;
        let cond = doc.get("cond").ok_or_else(|| {
            DolomiteError::new("Missing 'cond' parameter to $filter", ErrorKind::Location(28650))
        })?;
        let var_name = match doc.get("as") {
            Some(Value::String(name)) => name.clone(),
            None => "this".to_string(),
            Some(_) => {
                return Err(DolomiteError::new(
                    "$filter requires a string for the 'as' parameter",
                    ErrorKind::Location(28647),
                ))
            }
        };
        Ok(Expr::Filter {
            input: Box::new(Expr::parse(input)?),
            var_name,
            cond: Box::new(Expr::parse(cond)?),
        })
    }

    fn parse_reduce(argument: &Value) -> DolomiteResult<Expr> {
        let doc = argument.as_document().ok_or_else(|| {
            DolomiteError::new(
                "$reduce only supports an object as its argument",
                ErrorKind::Location(40075),
            )
        })?;
        let input = doc.get("input").ok_or_else(|| {
            DolomiteError::new("Missing 'input' parameter to $reduce", ErrorKind::Location(40077))
        })?;
        let initial = doc.get("initialValue").ok_or_else(|| {
            DolomiteError::new(
                "Missing 'initialValue' parameter to $reduce",
                ErrorKind::Location(40078),
            )
        })?;
        let body = doc.get("in").ok_or_else(|| {
            DolomiteError::new("Missing 'in' parameter to $reduce", ErrorKind::Location(40079))
        })?;
        Ok(Expr::Reduce {
            input: Box::new(Expr::parse(input)?),
            initial: Box::new(Expr::parse(initial)?),
            body: Box::new(Expr::parse(body)?),
        })
    }
}

fn arity_error(op: Op, min: usize, max: usize, got: usize) -> DolomiteError {
    let expectation = if min == max {
        format!("exactly {}", min)
    } else if max == usize::MAX {
        format!("at least {}", min)
    } else {
        format!("between {} and {}", min, max)
    };
    DolomiteError::new(
        &format!(
            "Expression {} takes {} arguments. {} were passed in.",
            op.name(),
            expectation,
            got
        ),
        ErrorKind::Location(16020),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_parse_field_path_and_variable() {
        assert!(matches!(
            Expr::parse(&Value::from("$a.b")).unwrap(),
            Expr::FieldPath(path) if path == "a.b"
        ));
        assert!(matches!(
            Expr::parse(&Value::from("$$ROOT")).unwrap(),
            Expr::Variable(name) if name == "ROOT"
        ));
        assert!(matches!(
            Expr::parse(&Value::from("plain")).unwrap(),
            Expr::Literal(Value::String(_))
        ));
    }

    #[test]
    fn test_parse_operator_with_single_argument() {
        let expr = Expr::parse(&Value::Document(doc! { "$abs": "$c" })).unwrap();
        match expr {
            Expr::Operator(Op::Abs, args) => assert_eq!(args.len(), 1),
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_operator() {
        let err = Expr::parse(&Value::Document(doc! { "$nope": 1 })).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidPipelineOperator);
    }

    #[test]
    fn test_parse_rejects_extra_fields_next_to_operator() {
        let err = Expr::parse(&Value::Document(doc! { "$abs": 1, other: 2 })).unwrap_err();
        assert_eq!(err.code(), 15983);
    }

    #[test]
    fn test_parse_checks_arity() {
        let err =
            Expr::parse(&Value::Document(doc! { "$subtract": [1] })).unwrap_err();
        assert_eq!(err.code(), 16020);
        assert!(err
            .message()
            .contains("Expression $subtract takes exactly 2 arguments. 1 were passed in."));
    }

    #[test]
    fn test_parse_literal_is_not_interpreted() {
        let expr = Expr::parse(&Value::Document(doc! { "$literal": "$a" })).unwrap();
        assert!(matches!(expr, Expr::Literal(Value::String(s)) if s == "$a"));
    }

    #[test]
    fn test_parse_cond_document_form() {
        let spec = doc! { "$cond": { "if": true, "then": 1, "else": 2 } };
        assert!(matches!(
            Expr::parse(&Value::Document(spec)).unwrap(),
            Expr::Cond { .. }
        ));

        let missing = doc! { "$cond": { "then": 1, "else": 2 } };
        let err = Expr::parse(&Value::Document(missing)).unwrap_err();
        assert_eq!(err.code(), 17080);
    }

    #[test]
    fn test_parse_switch_unknown_argument() {
        let spec = doc! { "$switch": { "branches": [], "bogus": 1 } };
        let err = Expr::parse(&Value::Document(spec)).unwrap_err();
        assert_eq!(err.code(), 40068);
    }

    #[test]
    fn test_parse_plain_document_recurses() {
        let spec = doc! { x: { y: { "$abs": "$c" } } };
        let expr = Expr::parse(&Value::Document(spec)).unwrap();
        match expr {
            Expr::Document(fields) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].0, "x");
            }
            other => panic!("unexpected parse result: {:?}", other),
        }
    }
}
