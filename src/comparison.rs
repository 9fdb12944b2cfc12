use serde_json::Value;
use std::cmp::Ordering;

/// Numeric view of a JSON number: exact for integers, lossy for the rest.
pub(crate) fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Equality used by `==` and `!=`. Numbers compare by value, so `1 == 1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(na), Value::Number(nb)) => match (na.as_i64(), nb.as_i64()) {
            (Some(ia), Some(ib)) => ia == ib,
            _ => as_f64(a) == as_f64(b),
        },
        _ => a == b,
    }
}

/// Ordering used by the relational operators. `None` when the two values
/// have no natural order.
pub fn cmp_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(na), Value::Number(nb)) => match (na.as_i64(), nb.as_i64()) {
            (Some(ia), Some(ib)) => Some(ia.cmp(&ib)),
            _ => as_f64(a)?.partial_cmp(&as_f64(b)?),
        },
        (Value::String(sa), Value::String(sb)) => Some(sa.cmp(sb)),
        (Value::Bool(ba), Value::Bool(bb)) => Some(ba.cmp(bb)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mixed_numbers_compare_by_value() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert_eq!(cmp_values(&json!(2), &json!(1.5)), Some(Ordering::Greater));
        assert_eq!(cmp_values(&json!(i64::MAX), &json!(i64::MAX - 1)), Some(Ordering::Greater));
    }

    #[test]
    fn unrelated_kinds_have_no_order() {
        assert_eq!(cmp_values(&json!("a"), &json!(1)), None);
        assert!(!values_equal(&json!("1"), &json!(1)));
        assert_eq!(cmp_values(&json!("abc"), &json!("abd")), Some(Ordering::Less));
    }
}
