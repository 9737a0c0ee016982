use crate::collection::Document;
use crate::common::util::document_utils::{
    get_subdocument_value_collection_aware, get_value_path,
};
use crate::common::util::path_utils::first_fragment;
use crate::common::Value;
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use crate::expression::expr::{Expr, Op};
use crate::expression::operators;
use std::collections::HashMap;

pub const ROOT_VARIABLE: &str = "ROOT";
pub const CURRENT_VARIABLE: &str = "CURRENT";

/// A stack of variable bindings for expression evaluation.
///
/// The root scope binds `ROOT` and `CURRENT` to the document under
/// evaluation; `$let`, `$map`, `$filter` and `$reduce` push child scopes.
pub struct VariableScope<'a> {
    vars: HashMap<String, Value>,
    parent: Option<&'a VariableScope<'a>>,
}

impl<'a> VariableScope<'a> {
    /// Creates the root scope for a document.
    pub fn root(document: &Document) -> VariableScope<'a> {
        let mut vars = HashMap::with_capacity(2);
        vars.insert(
            ROOT_VARIABLE.to_string(),
            Value::Document(document.clone()),
        );
        vars.insert(
            CURRENT_VARIABLE.to_string(),
            Value::Document(document.clone()),
        );
        VariableScope { vars, parent: None }
    }

    /// Creates a child scope with additional bindings.
    pub fn child(&'a self, vars: HashMap<String, Value>) -> VariableScope<'a> {
        VariableScope {
            vars,
            parent: Some(self),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        match self.vars.get(name) {
            Some(value) => Some(value),
            None => self.parent.and_then(|parent| parent.lookup(name)),
        }
    }
}

impl Expr {
    /// Evaluates the expression against a document, with `$$ROOT` and
    /// `$$CURRENT` bound to it.
    pub fn evaluate(&self, document: &Document) -> DolomiteResult<Value> {
        let scope = VariableScope::root(document);
        self.evaluate_in(&scope)
    }

    /// Evaluates the expression in an existing variable scope.
    pub fn evaluate_in(&self, scope: &VariableScope<'_>) -> DolomiteResult<Value> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::FieldPath(path) => {
                if path.is_empty() {
                    return Err(DolomiteError::new(
                        "'$' by itself is not a valid FieldPath",
                        ErrorKind::Location(16872),
                    ));
                }
                match scope.lookup(CURRENT_VARIABLE) {
                    Some(Value::Document(current)) => {
                        get_subdocument_value_collection_aware(current, path)
                    }
                    _ => Ok(Value::Missing),
                }
            }
            Expr::Variable(reference) => {
                let name = first_fragment(reference);
                let value = scope.lookup(name).cloned().ok_or_else(|| {
                    DolomiteError::new(
                        &format!("Use of undefined variable: {}", name),
                        ErrorKind::Location(17276),
                    )
                })?;
                if reference.len() > name.len() {
                    get_value_path(&value, &reference[name.len() + 1..])
                } else {
                    Ok(value)
                }
            }
            Expr::Document(fields) => {
                let mut result = Document::new();
                for (key, expr) in fields {
                    let value = expr.evaluate_in(scope)?;
                    // a missing value omits the field from the output
                    if !value.is_missing() {
                        result.put(key, value)?;
                    }
                }
                Ok(Value::Document(result))
            }
            Expr::Array(items) => {
                let mut result = Vec::with_capacity(items.len());
                for item in items {
                    let value = item.evaluate_in(scope)?;
                    if !value.is_missing() {
                        result.push(value);
                    }
                }
                Ok(Value::Array(result))
            }
            Expr::Operator(op, args) => {
                // $and and $or short-circuit on their truthiness outcome
                match op {
                    Op::And => {
                        for arg in args {
                            if !arg.evaluate_in(scope)?.is_truthy() {
                                return Ok(Value::Bool(false));
                            }
                        }
                        Ok(Value::Bool(true))
                    }
                    Op::Or => {
                        for arg in args {
                            if arg.evaluate_in(scope)?.is_truthy() {
                                return Ok(Value::Bool(true));
                            }
                        }
                        Ok(Value::Bool(false))
                    }
                    _ => {
                        let values = args
                            .iter()
                            .map(|arg| arg.evaluate_in(scope))
                            .collect::<DolomiteResult<Vec<_>>>()?;
                        operators::apply(*op, values)
                    }
                }
            }
            Expr::Cond {
                condition,
                then,
                otherwise,
            } => {
                if condition.evaluate_in(scope)?.is_truthy() {
                    then.evaluate_in(scope)
                } else {
                    otherwise.evaluate_in(scope)
                }
            }
            Expr::Switch { branches, default } => {
                for branch in branches {
                    if branch.case.evaluate_in(scope)?.is_truthy() {
                        return branch.then.evaluate_in(scope);
                    }
                }
                match default {
                    Some(default) => default.evaluate_in(scope),
                    None => Err(DolomiteError::new(
                        "$switch could not find a matching branch for an input, \
                         and no default was specified.",
                        ErrorKind::Location(40066),
                    )),
                }
            }
            Expr::Let { vars, body } => {
                let mut bindings = HashMap::with_capacity(vars.len());
                for (name, expr) in vars {
                    bindings.insert(name.clone(), expr.evaluate_in(scope)?);
                }
                let child = scope.child(bindings);
                body.evaluate_in(&child)
            }
            Expr::Map {
                input,
                var_name,
                body,
            } => {
                let input = input.evaluate_in(scope)?;
                if input.is_null_or_missing() {
                    return Ok(Value::Null);
                }
                let items = input.as_array().ok_or_else(|| {
                    DolomiteError::new(
                        &format!("input to $map must be an array not {}", input.describe_type()),
                        ErrorKind::Location(16883),
                    )
                })?;
                let mut result = Vec::with_capacity(items.len());
                for item in items {
                    let mut bindings = HashMap::with_capacity(1);
                    bindings.insert(var_name.clone(), item.clone());
                    let child = scope.child(bindings);
                    let value = body.evaluate_in(&child)?;
                    result.push(if value.is_missing() {
                        Value::Null
                    } else {
                        value
                    });
                }
                Ok(Value::Array(result))
            }
            Expr::Filter {
                input,
                var_name,
                cond,
            } => {
                let input = input.evaluate_in(scope)?;
                if input.is_null_or_missing() {
                    return Ok(Value::Null);
                }
                let items = input.as_array().ok_or_else(|| {
                    DolomiteError::new(
                        &format!("input to $filter must be an array not {}", input.describe_type()),
                        ErrorKind::Location(28651),
                    )
                })?;
                let mut result = Vec::new();
                for item in items {
                    let mut bindings = HashMap::with_capacity(1);
                    bindings.insert(var_name.clone(), item.clone());
                    let child = scope.child(bindings);
                    if cond.evaluate_in(&child)?.is_truthy() {
                        result.push(item.clone());
                    }
                }
                Ok(Value::Array(result))
            }
            Expr::Reduce {
                input,
                initial,
                body,
            } => {
                let input = input.evaluate_in(scope)?;
                if input.is_null_or_missing() {
                    return Ok(Value::Null);
                }
                let items = input.as_array().ok_or_else(|| {
                    DolomiteError::new(
                        &format!("input to $reduce must be an array not {}", input.describe_type()),
                        ErrorKind::Location(40080),
                    )
                })?;
                let mut accumulator = initial.evaluate_in(scope)?;
                for item in items {
                    let mut bindings = HashMap::with_capacity(2);
                    bindings.insert("value".to_string(), accumulator);
                    bindings.insert("this".to_string(), item.clone());
                    let child = scope.child(bindings);
                    accumulator = body.evaluate_in(&child)?;
                }
                Ok(accumulator)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn eval(spec: Value, document: &Document) -> DolomiteResult<Value> {
        Expr::parse(&spec)?.evaluate(document)
    }

    #[test]
    fn test_field_path_resolution() {
        let doc = doc! { a: { b: 7 }, c: -30 };
        assert_eq!(eval(Value::from("$a.b"), &doc).unwrap(), Value::Int32(7));
        assert_eq!(eval(Value::from("$nope"), &doc).unwrap(), Value::Missing);
    }

    #[test]
    fn test_field_path_fans_out_through_arrays() {
        let doc = doc! { a: [{ foo: "bar" }, { foo: "bas" }, { foo: "bat" }] };
        assert_eq!(
            eval(Value::from("$a.foo"), &doc).unwrap(),
            Value::Array(vec![
                Value::from("bar"),
                Value::from("bas"),
                Value::from("bat")
            ])
        );
    }

    #[test]
    fn test_root_variable() {
        let doc = doc! { a: 1 };
        assert_eq!(
            eval(Value::from("$$ROOT"), &doc).unwrap(),
            Value::Document(doc! { a: 1 })
        );
        assert_eq!(eval(Value::from("$$ROOT.a"), &doc).unwrap(), Value::Int32(1));
    }

    #[test]
    fn test_undefined_variable() {
        let doc = Document::new();
        let err = eval(Value::from("$$nope"), &doc).unwrap_err();
        assert_eq!(err.code(), 17276);
        assert!(err.message().contains("Use of undefined variable: nope"));
    }

    #[test]
    fn test_abs_and_multiply() {
        let doc = doc! { b: 2, c: -30 };
        assert_eq!(
            eval(Value::Document(doc! { "$abs": "$c" }), &doc).unwrap(),
            Value::Int32(30)
        );
        assert_eq!(
            eval(
                Value::Document(doc! { "$multiply": ["$b", { "$abs": "$c" }] }),
                &doc
            )
            .unwrap(),
            Value::Int32(60)
        );
    }

    #[test]
    fn test_array_elem_at_with_fan_out() {
        let doc = doc! { a: [{ foo: "bar" }, { foo: "bas" }, { foo: "bat" }] };
        assert_eq!(
            eval(
                Value::Document(doc! { "$arrayElemAt": ["$a.foo", 1] }),
                &doc
            )
            .unwrap(),
            Value::from("bas")
        );
    }

    #[test]
    fn test_cond_and_switch() {
        let doc = doc! { x: 5 };
        let cond = doc! { "$cond": { "if": { "$gt": ["$x", 3] }, "then": "big", "else": "small" } };
        assert_eq!(
            eval(Value::Document(cond), &doc).unwrap(),
            Value::from("big")
        );

        let switch = doc! { "$switch": {
            "branches": [
                { "case": { "$lt": ["$x", 0] }, "then": "negative" },
                { "case": { "$lt": ["$x", 10] }, "then": "single digit" },
            ],
            "default": "large",
        } };
        assert_eq!(
            eval(Value::Document(switch), &doc).unwrap(),
            Value::from("single digit")
        );

        let exhausted = doc! { "$switch": { "branches": [
            { "case": false, "then": 1 },
        ] } };
        assert_eq!(
            eval(Value::Document(exhausted), &doc).unwrap_err().code(),
            40066
        );
    }

    #[test]
    fn test_let_binds_variables() {
        let doc = doc! { price: 10 };
        let spec = doc! { "$let": {
            "vars": { "discounted": { "$multiply": ["$price", 0.9] } },
            "in": { "$lt": ["$$discounted", 20] },
        } };
        assert_eq!(eval(Value::Document(spec), &doc).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_map_filter_reduce() {
        let doc = doc! { xs: [1, 2, 3, 4] };

        let map = doc! { "$map": { "input": "$xs", "as": "x", "in": { "$multiply": ["$$x", 2] } } };
        assert_eq!(
            eval(Value::Document(map), &doc).unwrap(),
            Value::Array(vec![
                Value::Int32(2),
                Value::Int32(4),
                Value::Int32(6),
                Value::Int32(8)
            ])
        );

        let filter =
            doc! { "$filter": { "input": "$xs", "as": "x", "cond": { "$gt": ["$$x", 2] } } };
        assert_eq!(
            eval(Value::Document(filter), &doc).unwrap(),
            Value::Array(vec![Value::Int32(3), Value::Int32(4)])
        );

        let reduce = doc! { "$reduce": {
            "input": "$xs",
            "initialValue": 0,
            "in": { "$add": ["$$value", "$$this"] },
        } };
        assert_eq!(eval(Value::Document(reduce), &doc).unwrap(), Value::Int32(10));
    }

    #[test]
    fn test_map_of_null_is_null() {
        let doc = Document::new();
        let map = doc! { "$map": { "input": "$missing", "in": "$$this" } };
        assert_eq!(eval(Value::Document(map), &doc).unwrap(), Value::Null);
    }

    #[test]
    fn test_document_literal_omits_missing() {
        let doc = doc! { count: 5 };
        let spec = doc! { x: "$count", y: "$nope" };
        assert_eq!(
            eval(Value::Document(spec), &doc).unwrap(),
            Value::Document(doc! { x: 5 })
        );
    }

    #[test]
    fn test_and_or_short_circuit() {
        let doc = doc! { x: 1 };
        // the second operand would error if evaluated strictly
        let spec = doc! { "$or": [true, { "$divide": [1, 0] }] };
        assert_eq!(eval(Value::Document(spec), &doc).unwrap(), Value::Bool(true));
        let spec = doc! { "$and": [false, { "$divide": [1, 0] }] };
        assert_eq!(
            eval(Value::Document(spec), &doc).unwrap(),
            Value::Bool(false)
        );
    }
}
