//! Operator semantics shared by the interpreter and compiled evaluators.

use crate::ast::{BinaryOp, UnaryOp};
use crate::comparison::{as_f64, cmp_values, values_equal};
use crate::errors::{EvalError, Result};
use serde_json::{Number, Value};
use std::cmp::Ordering;

pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

pub(crate) fn float(f: f64) -> Result<Value> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| EvalError::eval(format!("arithmetic produced a non-finite value ({f})")))
}

/// Integer arithmetic. Overflow and division by zero are errors.
pub fn int_arith(op: BinaryOp, a: i64, b: i64) -> Result<Value> {
    let out = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div | BinaryOp::Rem if b == 0 => {
            return Err(EvalError::eval("division by zero"));
        }
        BinaryOp::Div => a.checked_div(b),
        BinaryOp::Rem => a.checked_rem(b),
        _ => return Err(EvalError::eval(format!("'{}' is not arithmetic", op.symbol()))),
    };
    out.map(Value::from).ok_or_else(|| {
        EvalError::eval(format!("integer overflow in {a} {} {b}", op.symbol()))
    })
}

fn float_arith(op: BinaryOp, a: f64, b: f64) -> Result<Value> {
    match op {
        BinaryOp::Add => float(a + b),
        BinaryOp::Sub => float(a - b),
        BinaryOp::Mul => float(a * b),
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => Err(EvalError::eval("division by zero")),
        BinaryOp::Div => float(a / b),
        BinaryOp::Rem => float(a % b),
        _ => Err(EvalError::eval(format!("'{}' is not arithmetic", op.symbol()))),
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Every binary operator except the short-circuiting `and` / `or`, which
/// need their right operand unevaluated.
pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(lhs, rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(lhs, rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = cmp_values(lhs, rhs).ok_or_else(|| {
                EvalError::eval(format!(
                    "cannot compare {} with {}",
                    type_name(lhs),
                    type_name(rhs)
                ))
            })?;
            let out = match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            Ok(Value::Bool(out))
        }
        BinaryOp::And => Ok(Value::Bool(truthy(lhs) && truthy(rhs))),
        BinaryOp::Or => Ok(Value::Bool(truthy(lhs) || truthy(rhs))),
        BinaryOp::Add if lhs.is_string() || rhs.is_string() => {
            Ok(Value::String(stringify(lhs) + &stringify(rhs)))
        }
        BinaryOp::Add if lhs.is_array() && rhs.is_array() => {
            let mut out = lhs.as_array().cloned().unwrap_or_default();
            out.extend(rhs.as_array().into_iter().flatten().cloned());
            Ok(Value::Array(out))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            match (lhs.as_i64(), rhs.as_i64()) {
                (Some(a), Some(b)) => int_arith(op, a, b),
                _ => match (as_f64(lhs), as_f64(rhs)) {
                    (Some(a), Some(b)) => float_arith(op, a, b),
                    _ => Err(EvalError::eval(format!(
                        "operator '{}' not supported between {} and {}",
                        op.symbol(),
                        type_name(lhs),
                        type_name(rhs)
                    ))),
                },
            }
        }
    }
}

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!truthy(operand))),
        UnaryOp::Neg => match operand {
            Value::Number(n) => match n.as_i64() {
                Some(i) => i
                    .checked_neg()
                    .map(Value::from)
                    .ok_or_else(|| EvalError::eval("integer overflow in negation")),
                None => float(-n.as_f64().unwrap_or_default()),
            },
            other => Err(EvalError::eval(format!("cannot negate {}", type_name(other)))),
        },
    }
}
