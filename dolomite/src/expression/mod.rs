//! Aggregation expression parsing and evaluation.
//!
//! Expressions are parsed once into a tagged [Expr] tree and then evaluated
//! against a variable scope, so that re-evaluating the same expression for
//! every document of a stream never re-interprets the specification document.

pub mod eval;
pub mod expr;
pub(crate) mod operators;

pub use eval::VariableScope;
pub use expr::{Expr, Op};
