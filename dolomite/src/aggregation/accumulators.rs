use crate::collection::Document;
use crate::common::Value;
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use crate::expression::Expr;
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AccumulatorKind {
    Sum,
    Avg,
    Min,
    Max,
    Push,
    AddToSet,
    First,
    Last,
}

/// One `$group` output field: an accumulator operator over an expression.
#[derive(Clone, Debug)]
pub(crate) struct Accumulator {
    field: String,
    kind: AccumulatorKind,
    expression: Expr,
}

impl Accumulator {
    /// Parses one group output field specification.
    pub(crate) fn parse(field: &str, spec: &Value) -> DolomiteResult<Accumulator> {
        let doc = spec.as_document().ok_or_else(|| {
            DolomiteError::new(
                &format!(
                    "the group aggregate field '{}' must be defined as an expression inside \
                     an object",
                    field
                ),
                ErrorKind::Location(15951),
            )
        })?;
        if doc.len() != 1 {
            return Err(DolomiteError::new(
                &format!("The field '{}' must specify one accumulator", field),
                ErrorKind::Location(40238),
            ));
        }
        let (operator, argument) = match doc.iter().next() {
            Some(entry) => entry,
            None => {
                return Err(DolomiteError::new(
                    &format!("The field '{}' must be an accumulator object", field),
                    ErrorKind::Location(40234),
                ))
            }
        };
        let kind = match operator.as_str() {
            "$sum" => AccumulatorKind::Sum,
            "$avg" => AccumulatorKind::Avg,
            "$min" => AccumulatorKind::Min,
            "$max" => AccumulatorKind::Max,
            "$push" => AccumulatorKind::Push,
            "$addToSet" => AccumulatorKind::AddToSet,
            "$first" => AccumulatorKind::First,
            "$last" => AccumulatorKind::Last,
            other => {
                return Err(DolomiteError::new(
                    &format!("unknown group operator '{}'", other),
                    ErrorKind::Location(15952),
                ))
            }
        };
        Ok(Accumulator {
            field: field.to_string(),
            kind,
            expression: Expr::parse(argument)?,
        })
    }

    pub(crate) fn field(&self) -> &str {
        &self.field
    }

    pub(crate) fn new_state(&self) -> AccumulatorState {
        AccumulatorState {
            kind: self.kind,
            int_sum: Some(0),
            double_sum: 0.0,
            any_double: false,
            count: 0,
            extremum: None,
            values: Vec::new(),
            edge: None,
        }
    }

    /// Evaluates the accumulator's expression for one document and folds the
    /// result into the state.
    pub(crate) fn accumulate(
        &self,
        state: &mut AccumulatorState,
        document: &Document,
    ) -> DolomiteResult<()> {
        let value = self.expression.evaluate(document)?;
        state.fold(value);
        Ok(())
    }
}

/// Running state of one accumulator within one group.
pub(crate) struct AccumulatorState {
    kind: AccumulatorKind,
    int_sum: Option<i64>,
    double_sum: f64,
    any_double: bool,
    count: u64,
    extremum: Option<Value>,
    values: Vec<Value>,
    edge: Option<Value>,
}

impl AccumulatorState {
    fn fold(&mut self, value: Value) {
        match self.kind {
            AccumulatorKind::Sum | AccumulatorKind::Avg => {
                if value.is_number() {
                    if matches!(value, Value::Double(_) | Value::Decimal128(_)) {
                        self.any_double = true;
                    }
                    self.double_sum += value.as_f64().unwrap_or(0.0);
                    self.int_sum = match (self.int_sum, value.as_i64()) {
                        (Some(sum), Some(int)) => sum.checked_add(int),
                        _ => None,
                    };
                    self.count += 1;
                }
            }
            AccumulatorKind::Min | AccumulatorKind::Max => {
                if value.is_null_or_missing() {
                    return;
                }
                let replace = match &self.extremum {
                    None => true,
                    Some(current) => {
                        let order = value.compare(current);
                        if self.kind == AccumulatorKind::Min {
                            order == Ordering::Less
                        } else {
                            order == Ordering::Greater
                        }
                    }
                };
                if replace {
                    self.extremum = Some(value);
                }
            }
            AccumulatorKind::Push => {
                if !value.is_missing() {
                    self.values.push(value);
                }
            }
            AccumulatorKind::AddToSet => {
                if !value.is_missing() && !self.values.contains(&value) {
                    self.values.push(value);
                }
            }
            AccumulatorKind::First => {
                if self.edge.is_none() {
                    self.edge = Some(value);
                }
            }
            AccumulatorKind::Last => {
                self.edge = Some(value);
            }
        }
    }

    /// Produces the final value of the accumulator. A [Value::Missing]
    /// result omits the field from the group document.
    pub(crate) fn finalize(self) -> Value {
        match self.kind {
            AccumulatorKind::Sum => match self.int_sum {
                Some(sum) if !self.any_double => {
                    if i32::try_from(sum).is_ok() {
                        Value::Int32(sum as i32)
                    } else {
                        Value::Int64(sum)
                    }
                }
                _ => Value::Double(self.double_sum),
            },
            AccumulatorKind::Avg => {
                if self.count == 0 {
                    Value::Null
                } else {
                    Value::Double(self.double_sum / self.count as f64)
                }
            }
            AccumulatorKind::Min | AccumulatorKind::Max => {
                self.extremum.unwrap_or(Value::Null)
            }
            AccumulatorKind::Push | AccumulatorKind::AddToSet => Value::Array(self.values),
            AccumulatorKind::First | AccumulatorKind::Last => {
                self.edge.unwrap_or(Value::Missing)
            }
        }
    }
}
