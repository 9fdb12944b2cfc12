//! Tree-walking evaluator. Every node records its exit descriptor after a
//! successful evaluation; the promoter reads those as its shape profile.

use crate::ast::{BinaryOp, ExitDescriptor, NavOutcome, Node, NodeKind, PathRoot, Shape, StepKind};
use crate::context::EvaluationContext;
use crate::errors::{EvalError, Result};
use crate::functions::{invoke, Registry};
use crate::navigation::{variable_cursor, walk, Cursor, GrowthPolicy, Key};
use crate::operators::{binary, truthy, unary};
use serde_json::{Map, Value};

pub struct Interpreter<'a> {
    registry: &'a Registry,
    policy: GrowthPolicy,
}

impl<'a> Interpreter<'a> {
    pub fn new(registry: &'a Registry, policy: GrowthPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn evaluate(&self, node: &Node, ctx: &mut EvaluationContext) -> Result<Value> {
        let mut navigation = NavOutcome::Direct;
        let value = self
            .eval_kind(node, ctx, &mut navigation)
            .map_err(|e| e.at(node.position))?;
        node.exit.record(ExitDescriptor {
            shape: Shape::of(&value),
            navigation,
        });
        Ok(value)
    }

    fn eval_kind(
        &self,
        node: &Node,
        ctx: &mut EvaluationContext,
        navigation: &mut NavOutcome,
    ) -> Result<Value> {
        match &node.kind {
            NodeKind::Literal(v) => Ok(v.clone()),
            NodeKind::Path { root, steps } => {
                let base = match root {
                    PathRoot::Value(inner) => Some(self.evaluate(inner, ctx)?),
                    _ => None,
                };
                let keys = steps
                    .iter()
                    .map(|step| match &step.kind {
                        StepKind::Property(name) => Ok(Key::Property(name.clone())),
                        StepKind::Index(index) => Key::from_value(&self.evaluate(index, ctx)?),
                    })
                    .collect::<Result<Vec<_>>>()?;
                let start = match (root, base) {
                    (_, Some(v)) => Cursor::Owned(v),
                    (PathRoot::Variable(name), None) => {
                        variable_cursor(&mut ctx.variables, name, keys.first(), &self.policy)
                    }
                    (_, None) => Cursor::Slot(&mut ctx.root),
                };
                walk::<EvalError>(start, &keys, &self.policy, &mut |i, value, outcome| {
                    steps[i].exit.record(ExitDescriptor {
                        shape: Shape::of(value),
                        navigation: outcome,
                    });
                    if outcome == NavOutcome::Grown {
                        *navigation = NavOutcome::Grown;
                    }
                    Ok(())
                })
            }
            NodeKind::Call { name, args } => {
                let f = self.registry.require(name)?;
                let values = self.evaluate_all(args, ctx)?;
                invoke(f.as_ref(), &values)
            }
            NodeKind::Method { target, name, args } => {
                let receiver = self.evaluate(target, ctx)?;
                let f = self.registry.require(name)?;
                let mut values = Vec::with_capacity(args.len() + 1);
                values.push(receiver);
                for arg in args {
                    values.push(self.evaluate(arg, ctx)?);
                }
                invoke(f.as_ref(), &values)
            }
            NodeKind::Unary { op, operand } => unary(*op, &self.evaluate(operand, ctx)?),
            NodeKind::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => {
                if !truthy(&self.evaluate(lhs, ctx)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy(&self.evaluate(rhs, ctx)?)))
            }
            NodeKind::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            } => {
                if truthy(&self.evaluate(lhs, ctx)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy(&self.evaluate(rhs, ctx)?)))
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let l = self.evaluate(lhs, ctx)?;
                let r = self.evaluate(rhs, ctx)?;
                binary(*op, &l, &r)
            }
            NodeKind::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                if truthy(&self.evaluate(condition, ctx)?) {
                    self.evaluate(then_branch, ctx)
                } else {
                    self.evaluate(else_branch, ctx)
                }
            }
            NodeKind::Elvis { value, fallback } => {
                let v = self.evaluate(value, ctx)?;
                if is_elvis_empty(&v) {
                    self.evaluate(fallback, ctx)
                } else {
                    Ok(v)
                }
            }
            NodeKind::List(items) => Ok(Value::Array(self.evaluate_all(items, ctx)?)),
            NodeKind::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), self.evaluate(value, ctx)?);
                }
                Ok(Value::Object(map))
            }
        }
    }

    fn evaluate_all(&self, nodes: &[Node], ctx: &mut EvaluationContext) -> Result<Vec<Value>> {
        nodes.iter().map(|n| self.evaluate(n, ctx)).collect()
    }
}

/// Values the elvis operator replaces: null and the empty string.
pub(crate) fn is_elvis_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
