use crate::errors::{EvalError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Trait for pluggable functions used by the expression evaluator.
/// Method syntax `x.f(a)` calls `f` with `x` as the first argument.
pub trait Function: Send + Sync {
    fn name(&self) -> &'static str;
    fn arity(&self) -> std::ops::RangeInclusive<usize>;
    fn call(&self, args: &[Value]) -> Result<Value>;
}

/// Thread-safe function registry.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<HashMap<&'static str, Arc<dyn Function>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.inner.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("functions", &names).finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut map: HashMap<&'static str, Arc<dyn Function>> = HashMap::new();
        map.insert("lower", Arc::new(builtins::Lower));
        map.insert("upper", Arc::new(builtins::Upper));
        map.insert("size", Arc::new(builtins::Size));
        map.insert("first", Arc::new(builtins::First));
        map.insert("unique", Arc::new(builtins::Unique));
        map.insert("contains", Arc::new(builtins::Contains));
        map.insert("abs", Arc::new(builtins::Abs));
        map.insert("or_default", Arc::new(builtins::OrDefault));
        map.insert("keys", Arc::new(builtins::Keys));
        Self { inner: Arc::new(map) }
    }

    pub fn register<F: Function + 'static>(&mut self, f: F) {
        let mut_map = Arc::make_mut(&mut self.inner);
        mut_map.insert(f.name(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.inner.get(name).cloned()
    }

    /// Lookup that reports an unknown name as an evaluation error.
    pub fn require(&self, name: &str) -> Result<Arc<dyn Function>> {
        self.get(name)
            .ok_or_else(|| EvalError::eval(format!("unknown function '{name}'")))
    }
}

/// Arity check shared by every call site.
pub fn invoke(f: &dyn Function, args: &[Value]) -> Result<Value> {
    if !f.arity().contains(&args.len()) {
        return Err(EvalError::eval(format!(
            "function '{}' takes {:?} arguments, got {}",
            f.name(),
            f.arity(),
            args.len()
        )));
    }
    f.call(args)
}

pub mod builtins {
    use super::*;
    use crate::comparison::values_equal;
    use crate::operators::type_name;
    use itertools::Itertools;
    use serde_json::Value;

    fn arg(args: &[Value], i: usize) -> &Value {
        args.get(i).unwrap_or(&Value::Null)
    }

    pub struct Lower;
    impl Function for Lower {
        fn name(&self) -> &'static str { "lower" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(match arg(args, 0) {
                Value::String(t) => Value::String(t.to_lowercase()),
                other => other.clone(),
            })
        }
    }

    pub struct Upper;
    impl Function for Upper {
        fn name(&self) -> &'static str { "upper" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(match arg(args, 0) {
                Value::String(t) => Value::String(t.to_uppercase()),
                other => other.clone(),
            })
        }
    }

    pub struct Size;
    impl Function for Size {
        fn name(&self) -> &'static str { "size" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            let len = match arg(args, 0) {
                Value::Array(a) => a.len(),
                Value::Object(m) => m.len(),
                Value::String(s) => s.chars().count(),
                Value::Null => 0,
                other => {
                    return Err(EvalError::eval(format!("size() of {}", type_name(other))))
                }
            };
            Ok(Value::from(len))
        }
    }

    /// First element of a list; null for an empty list or a non-list.
    pub struct First;
    impl Function for First {
        fn name(&self) -> &'static str { "first" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(match arg(args, 0) {
                Value::Array(a) => a.first().cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            })
        }
    }

    /// Deduplicate a list, keeping first occurrences; identity otherwise.
    pub struct Unique;
    impl Function for Unique {
        fn name(&self) -> &'static str { "unique" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(match arg(args, 0) {
                Value::Array(a) => Value::Array(
                    a.iter()
                        .cloned()
                        .unique_by(|x| serde_json::to_string(x).unwrap_or_default())
                        .collect(),
                ),
                other => other.clone(),
            })
        }
    }

    pub struct Contains;
    impl Function for Contains {
        fn name(&self) -> &'static str { "contains" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 2..=2 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            let needle = arg(args, 1);
            let found = match (arg(args, 0), needle) {
                (Value::String(s), Value::String(n)) => s.contains(n.as_str()),
                (Value::Array(items), _) => items.iter().any(|v| values_equal(v, needle)),
                (Value::Object(m), Value::String(k)) => m.contains_key(k),
                (haystack, _) => {
                    return Err(EvalError::eval(format!(
                        "contains() on {} with {}",
                        type_name(haystack),
                        type_name(needle)
                    )))
                }
            };
            Ok(Value::Bool(found))
        }
    }

    pub struct Abs;
    impl Function for Abs {
        fn name(&self) -> &'static str { "abs" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            match arg(args, 0) {
                Value::Number(n) => match n.as_i64() {
                    Some(i) => i
                        .checked_abs()
                        .map(Value::from)
                        .ok_or_else(|| EvalError::eval("integer overflow in abs()")),
                    None => crate::operators::float(n.as_f64().unwrap_or_default().abs()),
                },
                other => Err(EvalError::eval(format!("abs() of {}", type_name(other)))),
            }
        }
    }

    /// `or_default(v, d)`: `d` when `v` is null or an empty list.
    pub struct OrDefault;
    impl Function for OrDefault {
        fn name(&self) -> &'static str { "or_default" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 2..=2 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(match arg(args, 0) {
                Value::Null => arg(args, 1).clone(),
                Value::Array(a) if a.is_empty() => arg(args, 1).clone(),
                v => v.clone(),
            })
        }
    }

    pub struct Keys;
    impl Function for Keys {
        fn name(&self) -> &'static str { "keys" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            match arg(args, 0) {
                Value::Object(m) => Ok(Value::Array(
                    m.keys().map(|k| Value::String(k.clone())).collect(),
                )),
                other => Err(EvalError::eval(format!("keys() of {}", type_name(other)))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn arity_is_checked_before_calling() {
        let reg = Registry::with_builtins();
        let size = reg.require("size").unwrap();
        assert_eq!(invoke(size.as_ref(), &[json!([1, 2])]).unwrap(), json!(2));
        assert!(invoke(size.as_ref(), &[]).is_err());
        assert!(reg.require("nope").is_err());
    }

    #[test]
    fn registering_overrides_a_builtin() {
        struct Shout;
        impl Function for Shout {
            fn name(&self) -> &'static str { "upper" }
            fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
            fn call(&self, _args: &[Value]) -> Result<Value> { Ok(json!("!")) }
        }
        let base = Registry::with_builtins();
        let mut reg = base.clone();
        reg.register(Shout);
        assert_eq!(reg.require("upper").unwrap().call(&[json!("a")]).unwrap(), json!("!"));
        assert_eq!(base.require("upper").unwrap().call(&[json!("a")]).unwrap(), json!("A"));
    }
}
