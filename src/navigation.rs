//! Property and index navigation, including the auto-grow policy. Both
//! execution strategies go through [`walk`], so they grow containers the
//! same way and fail with the same errors.

use crate::ast::NavOutcome;
use crate::config::ParserConfig;
use crate::errors::{EvalError, Result};
use crate::operators::type_name;
use serde_json::map::Entry;
use serde_json::{Map, Value};
use std::fmt;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthPolicy {
    pub auto_grow_null_references: bool,
    pub auto_grow_collections: bool,
    pub max_auto_grow_size: usize,
}

impl From<&ParserConfig> for GrowthPolicy {
    fn from(cfg: &ParserConfig) -> Self {
        Self {
            auto_grow_null_references: cfg.auto_grow_null_references(),
            auto_grow_collections: cfg.auto_grow_collections(),
            max_auto_grow_size: cfg.max_auto_grow_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Property(String),
    Index(i64),
}

impl Key {
    /// Key from an evaluated `[...]` operand.
    pub fn from_value(v: &Value) -> Result<Key> {
        match v {
            Value::String(s) => Ok(Key::Property(s.clone())),
            Value::Number(n) => n
                .as_i64()
                .map(Key::Index)
                .ok_or_else(|| EvalError::eval(format!("index {n} is not an integer"))),
            other => Err(EvalError::eval(format!(
                "cannot use {} as an index",
                type_name(other)
            ))),
        }
    }

    /// Empty value of the type this key navigates into.
    fn empty_container(&self) -> Value {
        match self {
            Key::Property(_) => Value::Object(Map::new()),
            Key::Index(_) => Value::Array(Vec::new()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Property(name) => f.write_str(name),
            Key::Index(i) => write!(f, "[{i}]"),
        }
    }
}

#[derive(Debug)]
pub enum Resolved<'a> {
    /// A slot inside the container; later steps may write through it.
    Slot(&'a mut Value),
    /// A computed value with no backing slot (a character of a string).
    Owned(Value),
    /// An absent property at the end of a path or with growth disabled.
    Missing,
}

#[derive(Debug)]
pub struct Navigation<'a> {
    pub resolved: Resolved<'a>,
    /// Whether this step created anything.
    pub grown: bool,
}

fn null_intermediate(key: &Key) -> EvalError {
    EvalError::PropertyAccess {
        property: key.to_string(),
        message: "null intermediate value".into(),
        location: None,
    }
}

/// One navigation step from `container` through `key`. `lookahead` is the
/// key of the following step, if any; it decides what gets materialized
/// for an absent intermediate.
pub fn resolve<'a>(
    container: &'a mut Value,
    key: &Key,
    lookahead: Option<&Key>,
    policy: &GrowthPolicy,
) -> Result<Navigation<'a>> {
    let mut grown = false;
    if container.is_null() {
        if !policy.auto_grow_null_references {
            return Err(null_intermediate(key));
        }
        *container = key.empty_container();
        grown = true;
    }
    let resolved = match (container, key) {
        (Value::Object(map), Key::Property(name)) => {
            let nav = resolve_entry(map, name, lookahead, policy);
            grown |= nav.grown;
            nav.resolved
        }
        (Value::Object(map), Key::Index(i)) => {
            let nav = resolve_entry(map, &i.to_string(), lookahead, policy);
            grown |= nav.grown;
            nav.resolved
        }
        (Value::Array(items), Key::Index(i)) => {
            let nav = resolve_index(items, *i, lookahead, policy)?;
            grown |= nav.grown;
            nav.resolved
        }
        (Value::String(s), Key::Index(i)) => {
            let size = s.chars().count();
            let c = usize::try_from(*i)
                .ok()
                .and_then(|idx| s.chars().nth(idx))
                .ok_or(EvalError::IndexOutOfBounds { index: *i, size })?;
            Resolved::Owned(Value::String(c.to_string()))
        }
        (other, key) => {
            return Err(EvalError::eval(format!(
                "cannot navigate into {} with '{key}'",
                type_name(other)
            )))
        }
    };
    Ok(Navigation { resolved, grown })
}

/// Property lookup in a map, used for objects and for the variable table.
pub fn resolve_entry<'a>(
    map: &'a mut Map<String, Value>,
    name: &str,
    lookahead: Option<&Key>,
    policy: &GrowthPolicy,
) -> Navigation<'a> {
    let grow_into = lookahead.filter(|_| policy.auto_grow_null_references);
    match map.entry(name) {
        Entry::Occupied(e) => {
            let slot = e.into_mut();
            let mut grown = false;
            if let (true, Some(next)) = (slot.is_null(), grow_into) {
                *slot = next.empty_container();
                grown = true;
            }
            Navigation {
                resolved: Resolved::Slot(slot),
                grown,
            }
        }
        Entry::Vacant(e) => match grow_into {
            Some(next) => Navigation {
                resolved: Resolved::Slot(e.insert(next.empty_container())),
                grown: true,
            },
            None => Navigation {
                resolved: Resolved::Missing,
                grown: false,
            },
        },
    }
}

fn resolve_index<'a>(
    items: &'a mut Vec<Value>,
    index: i64,
    lookahead: Option<&Key>,
    policy: &GrowthPolicy,
) -> Result<Navigation<'a>> {
    let size = items.len();
    let idx = usize::try_from(index).map_err(|_| EvalError::IndexOutOfBounds { index, size })?;
    let mut grown = false;
    if idx >= size {
        if !policy.auto_grow_collections {
            return Err(EvalError::IndexOutOfBounds { index, size });
        }
        if idx > policy.max_auto_grow_size {
            return Err(EvalError::GrowthLimitExceeded {
                index,
                limit: policy.max_auto_grow_size,
            });
        }
        if items.try_reserve(idx + 1 - size).is_err() {
            return Err(EvalError::GrowthLimitExceeded {
                index,
                limit: policy.max_auto_grow_size,
            });
        }
        items.resize(idx + 1, Value::Null);
        grown = true;
    }
    let slot = &mut items[idx];
    if let (true, Some(next), true) = (slot.is_null(), lookahead, policy.auto_grow_null_references) {
        *slot = next.empty_container();
        grown = true;
    }
    Ok(Navigation {
        resolved: Resolved::Slot(slot),
        grown,
    })
}

/// Where a path starts.
pub enum Cursor<'a> {
    Slot(&'a mut Value),
    Owned(Value),
    /// An absent variable or property; `key` names it for error messages.
    Missing(Key),
}

impl Cursor<'_> {
    fn value(&self) -> &Value {
        match self {
            Cursor::Slot(v) => v,
            Cursor::Owned(v) => v,
            Cursor::Missing(_) => &NULL,
        }
    }
}

/// Cursor at variable `name`. An absent variable followed by further steps
/// is grown like any other absent property.
pub fn variable_cursor<'a>(
    variables: &'a mut Map<String, Value>,
    name: &str,
    first_step: Option<&Key>,
    policy: &GrowthPolicy,
) -> Cursor<'a> {
    match resolve_entry(variables, name, first_step, policy).resolved {
        Resolved::Slot(slot) => Cursor::Slot(slot),
        Resolved::Owned(v) => Cursor::Owned(v),
        Resolved::Missing => Cursor::Missing(Key::Property(format!("#{name}"))),
    }
}

/// Navigate every key from `start`. `on_step` sees the value reached by
/// each step and whether that step grew anything; returning an error from
/// it stops the walk.
pub fn walk<E: From<EvalError>>(
    start: Cursor<'_>,
    keys: &[Key],
    policy: &GrowthPolicy,
    on_step: &mut dyn FnMut(usize, &Value, NavOutcome) -> std::result::Result<(), E>,
) -> std::result::Result<Value, E> {
    let mut cur = start;
    for (i, key) in keys.iter().enumerate() {
        let lookahead = keys.get(i + 1);
        let mut grown = false;
        cur = match cur {
            Cursor::Missing(_) => return Err(null_intermediate(key).into()),
            Cursor::Slot(slot) => {
                let nav = resolve(slot, key, lookahead, policy)?;
                grown = nav.grown;
                match nav.resolved {
                    Resolved::Slot(s) => Cursor::Slot(s),
                    Resolved::Owned(v) => Cursor::Owned(v),
                    Resolved::Missing => Cursor::Missing(key.clone()),
                }
            }
            Cursor::Owned(mut owned) => {
                let nav = resolve(&mut owned, key, lookahead, policy)?;
                grown = nav.grown;
                match nav.resolved {
                    Resolved::Slot(s) => Cursor::Owned(std::mem::take(s)),
                    Resolved::Owned(v) => Cursor::Owned(v),
                    Resolved::Missing => Cursor::Missing(key.clone()),
                }
            }
        };
        let outcome = if grown {
            NavOutcome::Grown
        } else {
            NavOutcome::Direct
        };
        on_step(i, cur.value(), outcome)?;
    }
    Ok(match cur {
        Cursor::Slot(v) => v.clone(),
        Cursor::Owned(v) => v,
        Cursor::Missing(_) => Value::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn policy(null_refs: bool, collections: bool, max: usize) -> GrowthPolicy {
        GrowthPolicy {
            auto_grow_null_references: null_refs,
            auto_grow_collections: collections,
            max_auto_grow_size: max,
        }
    }

    fn walk_root(root: &mut Value, keys: &[Key], p: GrowthPolicy) -> Result<Value> {
        walk::<EvalError>(Cursor::Slot(root), keys, &p, &mut |_, _, _| Ok(()))
    }

    #[test]
    fn growing_to_the_limit_index() {
        let mut root = json!({"items": []});
        let keys = [Key::Property("items".into()), Key::Index(5)];
        assert_eq!(walk_root(&mut root, &keys, policy(false, true, 5)).unwrap(), json!(null));
        assert_eq!(root["items"].as_array().map(Vec::len), Some(6));

        let mut root = json!({"items": []});
        let keys = [Key::Property("items".into()), Key::Index(6)];
        let err = walk_root(&mut root, &keys, policy(false, true, 5)).unwrap_err();
        assert_eq!(err, EvalError::GrowthLimitExceeded { index: 6, limit: 5 });
        assert_eq!(root, json!({"items": []}));
    }

    #[test]
    fn out_of_range_without_growth() {
        let mut root = json!([1, 2]);
        let err = walk_root(&mut root, &[Key::Index(2)], policy(true, false, 10)).unwrap_err();
        assert_eq!(err, EvalError::IndexOutOfBounds { index: 2, size: 2 });
        let err = walk_root(&mut root, &[Key::Index(-1)], policy(true, true, 10)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexOutOfBounds);
    }

    #[test]
    fn null_intermediate_is_refused_or_grown() {
        let keys = [Key::Property("address".into()), Key::Property("city".into())];

        let mut root = json!({"address": null});
        let err = walk_root(&mut root, &keys, policy(false, false, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PropertyAccess);

        let mut root = json!({"address": null});
        assert_eq!(walk_root(&mut root, &keys, policy(true, false, 0)).unwrap(), json!(null));
        assert_eq!(root, json!({"address": {}}));
    }

    #[test]
    fn lookahead_picks_the_container_type() {
        let mut root = json!({});
        let keys = [
            Key::Property("tags".into()),
            Key::Index(1),
            Key::Property("name".into()),
        ];
        walk_root(&mut root, &keys, policy(true, true, 10)).unwrap();
        assert_eq!(root, json!({"tags": [null, {}]}));
    }

    #[test]
    fn terminal_missing_property_reads_null_without_mutation() {
        let mut root = json!({"a": 1});
        let out = walk_root(&mut root, &[Key::Property("b".into())], policy(true, true, 10)).unwrap();
        assert_eq!(out, json!(null));
        assert_eq!(root, json!({"a": 1}));
    }

    #[test]
    fn strings_index_by_character() {
        let mut root = json!("héllo");
        assert_eq!(walk_root(&mut root, &[Key::Index(1)], policy(false, false, 0)).unwrap(), json!("é"));
        let err = walk_root(&mut root, &[Key::Index(9)], policy(true, true, 100)).unwrap_err();
        assert_eq!(err, EvalError::IndexOutOfBounds { index: 9, size: 5 });
    }

    #[test]
    fn step_callback_sees_growth() {
        let mut root = json!({});
        let keys = [Key::Property("a".into()), Key::Property("b".into())];
        let mut seen = Vec::new();
        walk::<EvalError>(Cursor::Slot(&mut root), &keys, &policy(true, false, 0), &mut |i, v, o| {
            seen.push((i, v.clone(), o));
            Ok(())
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![(0, json!({}), NavOutcome::Grown), (1, json!(null), NavOutcome::Direct)]
        );
    }

    #[test]
    fn missing_variable_grows_into_the_table() {
        let mut vars = Map::new();
        let keys = [Key::Property("x".into())];
        let p = policy(true, false, 0);
        let cursor = variable_cursor(&mut vars, "cfg", keys.first(), &p);
        walk::<EvalError>(cursor, &keys, &p, &mut |_, _, _| Ok(())).unwrap();
        assert_eq!(Value::Object(vars), json!({"cfg": {}}));

        let mut vars = Map::new();
        let p = policy(false, false, 0);
        let cursor = variable_cursor(&mut vars, "cfg", keys.first(), &p);
        let err = walk::<EvalError>(cursor, &keys, &p, &mut |_, _, _| Ok(())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PropertyAccess);
    }
}
