use std::collections::BTreeMap;

use crate::error::EvaluationError;
use crate::formula::parser::{BinaryOp, Expr, Function, UnaryOp};

/// Numeric values for every field a formula references, resolved up front.
pub type ResolvedFields<'a> = BTreeMap<&'a str, f64>;

pub fn evaluate(expr: &Expr, fields: &ResolvedFields<'_>) -> Result<f64, EvaluationError> {
    let value = eval_node(expr, fields)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvaluationError::NonFinite)
    }
}

fn eval_node(expr: &Expr, fields: &ResolvedFields<'_>) -> Result<f64, EvaluationError> {
    match expr {
        Expr::Literal(value) => Ok(*value),
        Expr::Field(name) => fields
            .get(name.as_str())
            .copied()
            .ok_or_else(|| EvaluationError::MissingField(name.clone())),
        Expr::Unary { op, operand } => {
            let value = eval_node(operand, fields)?;
            Ok(match op {
                UnaryOp::Neg => -value,
                UnaryOp::Percent => value / 100.0,
            })
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval_node(lhs, fields)?;
            let rhs = eval_node(rhs, fields)?;
            Ok(apply_binary(*op, lhs, rhs))
        }
        Expr::Call { function, args } => eval_call(*function, args, fields),
    }
}

fn apply_binary(op: BinaryOp, lhs: f64, rhs: f64) -> f64 {
    match op {
        BinaryOp::Add => lhs + rhs,
        BinaryOp::Sub => lhs - rhs,
        BinaryOp::Mul => lhs * rhs,
        // The workbook treats x/0 as 0.
        BinaryOp::Div => {
            if rhs == 0.0 {
                0.0
            } else {
                lhs / rhs
            }
        }
        BinaryOp::Lt => truth(lhs < rhs),
        BinaryOp::Le => truth(lhs <= rhs),
        BinaryOp::Gt => truth(lhs > rhs),
        BinaryOp::Ge => truth(lhs >= rhs),
        BinaryOp::Eq => truth(lhs == rhs),
        BinaryOp::Ne => truth(lhs != rhs),
    }
}

fn eval_call(
    function: Function,
    args: &[Expr],
    fields: &ResolvedFields<'_>,
) -> Result<f64, EvaluationError> {
    match function {
        Function::If => {
            let condition = eval_node(&args[0], fields)?;
            if condition != 0.0 {
                eval_node(&args[1], fields)
            } else {
                eval_node(&args[2], fields)
            }
        }
        Function::Min => fold(args, fields, f64::min),
        Function::Max => fold(args, fields, f64::max),
        Function::Abs => Ok(eval_node(&args[0], fields)?.abs()),
        Function::Not => Ok(truth(eval_node(&args[0], fields)? == 0.0)),
        Function::And => {
            for arg in args {
                if eval_node(arg, fields)? == 0.0 {
                    return Ok(0.0);
                }
            }
            Ok(1.0)
        }
        Function::Or => {
            for arg in args {
                if eval_node(arg, fields)? != 0.0 {
                    return Ok(1.0);
                }
            }
            Ok(0.0)
        }
        Function::Round => {
            let value = eval_node(&args[0], fields)?;
            let digits = match args.get(1) {
                Some(arg) => eval_node(arg, fields)?.round().clamp(-15.0, 15.0) as i32,
                None => 0,
            };
            Ok(round_half_away(value, digits))
        }
    }
}

fn fold(
    args: &[Expr],
    fields: &ResolvedFields<'_>,
    pick: fn(f64, f64) -> f64,
) -> Result<f64, EvaluationError> {
    let mut acc = eval_node(&args[0], fields)?;
    for arg in &args[1..] {
        acc = pick(acc, eval_node(arg, fields)?);
    }
    Ok(acc)
}

/// 2^52: from here on every f64 is already a whole number.
const INTEGRAL_FROM: f64 = 4_503_599_627_370_496.0;

/// Values with no fractional part left at `digits` precision come back as is,
/// so large inputs never overflow through the scaling step.
fn round_half_away(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    let scaled = value * factor;
    if !scaled.is_finite() || scaled.abs() >= INTEGRAL_FROM {
        return value;
    }
    scaled.round() / factor
}

fn truth(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::{evaluate, ResolvedFields};
    use crate::error::EvaluationError;
    use crate::formula::parser::parse;
    use crate::formula::FormulaLimits;

    fn eval(source: &str, fields: &[(&'static str, f64)]) -> Result<f64, EvaluationError> {
        let expr = parse(source, &FormulaLimits::default())?;
        let resolved: ResolvedFields<'_> = fields.iter().copied().collect();
        evaluate(&expr, &resolved)
    }

    #[test]
    fn evaluates_arithmetic_with_precedence() {
        assert_eq!(eval("1 + 2 * 3 - 4 / 2", &[]), Ok(5.0));
        assert_eq!(eval("(1 + 2) * 3", &[]), Ok(9.0));
        assert_eq!(eval("-x + +2", &[("x", 5.0)]), Ok(-3.0));
    }

    #[test]
    fn division_by_zero_yields_zero() {
        assert_eq!(eval("ev / pv", &[("ev", 10.0), ("pv", 0.0)]), Ok(0.0));
    }

    #[test]
    fn percent_suffix_divides_by_hundred() {
        assert_eq!(eval("50%", &[]), Ok(0.5));
        assert_eq!(eval("x * 10%", &[("x", 200.0)]), Ok(20.0));
    }

    #[test]
    fn comparisons_and_conditionals() {
        assert_eq!(eval("if(x >= 10, 100, 0)", &[("x", 10.0)]), Ok(100.0));
        assert_eq!(eval("if(x <> 10, 100, 0)", &[("x", 10.0)]), Ok(0.0));
        assert_eq!(eval("and(x > 1, not(y))", &[("x", 2.0), ("y", 0.0)]), Ok(1.0));
        assert_eq!(eval("or(x = 1, y == 1)", &[("x", 2.0), ("y", 0.0)]), Ok(0.0));
    }

    #[test]
    fn min_max_abs_round() {
        assert_eq!(eval("min(x,y)*2", &[("x", 3.0), ("y", 5.0)]), Ok(6.0));
        assert_eq!(eval("max(1, 7, 3)", &[]), Ok(7.0));
        assert_eq!(eval("abs(-2.5)", &[]), Ok(2.5));
        assert_eq!(eval("round(2.5)", &[]), Ok(3.0));
        assert_eq!(eval("round(-2.5)", &[]), Ok(-3.0));
        assert_eq!(eval("round(1.2345, 2)", &[]), Ok(1.23));
        assert_eq!(eval("round(x, 2)", &[("x", 1e307)]), Ok(1e307));
        assert_eq!(eval("round(-x, 15)", &[("x", 1e300)]), Ok(-1e300));
    }

    #[test]
    fn missing_field_is_named() {
        assert_eq!(
            eval("min(x,y)*2", &[("x", 3.0)]),
            Err(EvaluationError::MissingField("y".to_string()))
        );
    }

    #[test]
    fn non_finite_results_are_rejected() {
        assert_eq!(eval("1e308 * 10", &[]), Err(EvaluationError::NonFinite));
    }
}
