//! Restricted spreadsheet-style formula language.
//!
//! Formulas are parsed into an [`Expr`] tree made of literals, field
//! references, unary/binary operators and a fixed set of functions
//! (`min`, `max`, `if`, `abs`, `round`, `and`, `or`, `not`). Nothing else is
//! expressible, so a formula edited by an administrator can never do more
//! than arithmetic over the submitted inputs.

pub mod eval;
pub mod lexer;
pub mod parser;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;
use crate::input::{InputValues, QualitativeScale};

pub use eval::ResolvedFields;
pub use parser::{BinaryOp, Expr, Function, UnaryOp};

/// Resource bounds applied when parsing formula text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormulaLimits {
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for FormulaLimits {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            max_depth: default_max_depth(),
        }
    }
}

fn default_max_length() -> usize {
    1024
}

fn default_max_depth() -> usize {
    64
}

/// A parsed formula together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    pub fn parse(source: &str, limits: &FormulaLimits) -> Result<Self, EvaluationError> {
        let expr = parser::parse(source, limits)?;
        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Every field name the formula references, sorted.
    pub fn fields(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        collect_fields(&self.expr, &mut out);
        out
    }

    /// Resolves referenced fields against `inputs` and evaluates the tree.
    ///
    /// All references are checked before evaluation starts, so the reported
    /// missing field is the lexicographically first one regardless of which
    /// branch of an `if` would have been taken.
    pub fn evaluate(
        &self,
        inputs: &InputValues,
        scale: &QualitativeScale,
    ) -> Result<f64, EvaluationError> {
        let mut resolved = ResolvedFields::new();
        for field in self.fields() {
            let value = inputs
                .get(field)
                .ok_or_else(|| EvaluationError::MissingField(field.to_string()))?;
            let number =
                value
                    .as_number(scale)
                    .ok_or_else(|| EvaluationError::NonNumericField {
                        field: field.to_string(),
                        value: value.to_string(),
                    })?;
            resolved.insert(field, number);
        }
        eval::evaluate(&self.expr, &resolved)
    }
}

fn collect_fields<'a>(expr: &'a Expr, out: &mut BTreeSet<&'a str>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Field(name) => {
            out.insert(name.as_str());
        }
        Expr::Unary { operand, .. } => collect_fields(operand, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_fields(lhs, out);
            collect_fields(rhs, out);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_fields(arg, out);
            }
        }
    }
}
