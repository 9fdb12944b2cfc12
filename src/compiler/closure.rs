//! Default backend: turns the tree into nested closures. Nodes with a
//! recorded shape get a guard, and integer and string operands observed
//! at a binary operator get a dedicated fast path. Nodes never evaluated
//! compile to the generic rule with no guard.

use super::{Bailout, CompilationBackend, CompileRequest, CompiledEvaluator, CompiledFn};
use crate::ast::{BinaryOp, Node, NodeKind, PathRoot, Shape, Step, StepKind};
use crate::context::EvaluationContext;
use crate::errors::{EvalError, Result};
use crate::functions::{invoke, Function, Registry};
use crate::interpreter::is_elvis_empty;
use crate::navigation::{variable_cursor, walk, Cursor, GrowthPolicy, Key};
use crate::operators::{binary, int_arith, truthy, unary};
use serde_json::{Map, Value};
use std::sync::Arc;

type Outcome = std::result::Result<Value, Bailout>;

#[derive(Debug, Clone, Copy, Default)]
pub struct ClosureBackend;

impl CompilationBackend for ClosureBackend {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledEvaluator> {
        let mut builder = Builder {
            registry: request.registry,
            policy: request.policy,
            guards: 0,
        };
        let run = builder.node(request.root)?;
        Ok(CompiledEvaluator::new(run, request.context, builder.guards))
    }
}

struct Builder<'a> {
    registry: &'a Registry,
    policy: GrowthPolicy,
    guards: usize,
}

enum CompiledRoot {
    Context,
    Variable(String),
    Value(CompiledFn),
}

enum CompiledStep {
    Key(Key),
    Index(CompiledFn),
}

impl Builder<'_> {
    fn node(&mut self, node: &Node) -> Result<CompiledFn> {
        if let NodeKind::Literal(_) = node.kind {
            return self.body(node);
        }
        let body = located(self.body(node)?, node.position);
        match node.exit.shape() {
            None => Ok(body),
            Some(expected) => {
                self.guards += 1;
                Ok(guarded(body, expected))
            }
        }
    }

    fn all(&mut self, nodes: &[Node]) -> Result<Vec<CompiledFn>> {
        nodes.iter().map(|n| self.node(n)).collect()
    }

    fn function(&self, name: &str) -> Result<Arc<dyn Function>> {
        self.registry
            .get(name)
            .ok_or_else(|| EvalError::Compilation(format!("unknown function '{name}'")))
    }

    fn body(&mut self, node: &Node) -> Result<CompiledFn> {
        Ok(match &node.kind {
            NodeKind::Literal(v) => {
                let v = v.clone();
                Box::new(move |_| Ok(v.clone()))
            }
            NodeKind::Path { root, steps } => self.path(root, steps)?,
            NodeKind::Call { name, args } => {
                let f = self.function(name)?;
                let args = self.all(args)?;
                Box::new(move |ctx| {
                    let values = run_all(&args, ctx)?;
                    Ok(invoke(f.as_ref(), &values)?)
                })
            }
            NodeKind::Method { target, name, args } => {
                let receiver = self.node(target)?;
                let f = self.function(name)?;
                let args = self.all(args)?;
                Box::new(move |ctx| {
                    let mut values = Vec::with_capacity(args.len() + 1);
                    values.push(receiver(ctx)?);
                    for arg in &args {
                        values.push(arg(ctx)?);
                    }
                    Ok(invoke(f.as_ref(), &values)?)
                })
            }
            NodeKind::Unary { op, operand } => {
                let op = *op;
                let operand = self.node(operand)?;
                Box::new(move |ctx| Ok(unary(op, &operand(ctx)?)?))
            }
            NodeKind::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => {
                let (l, r) = (self.node(lhs)?, self.node(rhs)?);
                Box::new(move |ctx| Ok(Value::Bool(truthy(&l(ctx)?) && truthy(&r(ctx)?))))
            }
            NodeKind::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            } => {
                let (l, r) = (self.node(lhs)?, self.node(rhs)?);
                Box::new(move |ctx| Ok(Value::Bool(truthy(&l(ctx)?) || truthy(&r(ctx)?))))
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let op = *op;
                let shapes = (lhs.exit.shape(), rhs.exit.shape());
                let (l, r) = (self.node(lhs)?, self.node(rhs)?);
                match shapes {
                    (Some(Shape::Int), Some(Shape::Int)) => int_binary(op, l, r),
                    (Some(Shape::String), Some(Shape::String)) if op == BinaryOp::Add => {
                        Box::new(move |ctx| match (l(ctx)?, r(ctx)?) {
                            (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
                            _ => Err(Bailout::ShapeMismatch),
                        })
                    }
                    _ => Box::new(move |ctx| {
                        let a = l(ctx)?;
                        let b = r(ctx)?;
                        Ok(binary(op, &a, &b)?)
                    }),
                }
            }
            NodeKind::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                let c = self.node(condition)?;
                let t = self.node(then_branch)?;
                let e = self.node(else_branch)?;
                Box::new(move |ctx| if truthy(&c(ctx)?) { t(ctx) } else { e(ctx) })
            }
            NodeKind::Elvis { value, fallback } => {
                let v = self.node(value)?;
                let f = self.node(fallback)?;
                Box::new(move |ctx| {
                    let out = v(ctx)?;
                    if is_elvis_empty(&out) {
                        f(ctx)
                    } else {
                        Ok(out)
                    }
                })
            }
            NodeKind::List(items) => {
                let items = self.all(items)?;
                Box::new(move |ctx| Ok(Value::Array(run_all(&items, ctx)?)))
            }
            NodeKind::Map(entries) => {
                let entries = entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.node(v)?)))
                    .collect::<Result<Vec<_>>>()?;
                Box::new(move |ctx| {
                    let mut map = Map::new();
                    for (k, v) in &entries {
                        map.insert(k.clone(), v(ctx)?);
                    }
                    Ok(Value::Object(map))
                })
            }
        })
    }

    fn path(&mut self, root: &PathRoot, steps: &[Step]) -> Result<CompiledFn> {
        let root = match root {
            PathRoot::Context => CompiledRoot::Context,
            PathRoot::Variable(name) => CompiledRoot::Variable(name.clone()),
            PathRoot::Value(inner) => CompiledRoot::Value(self.node(inner)?),
        };
        let mut compiled = Vec::with_capacity(steps.len());
        let mut expected = Vec::with_capacity(steps.len());
        for step in steps {
            compiled.push(match &step.kind {
                StepKind::Property(name) => CompiledStep::Key(Key::Property(name.clone())),
                StepKind::Index(index) => CompiledStep::Index(self.node(index)?),
            });
            let shape = step.exit.shape();
            if shape.is_some() {
                self.guards += 1;
            }
            expected.push(shape);
        }
        let policy = self.policy;
        Ok(Box::new(move |ctx: &mut EvaluationContext| {
            let base = match &root {
                CompiledRoot::Value(f) => Some(f(ctx)?),
                _ => None,
            };
            let mut keys = Vec::with_capacity(compiled.len());
            for step in &compiled {
                keys.push(match step {
                    CompiledStep::Key(k) => k.clone(),
                    CompiledStep::Index(f) => Key::from_value(&f(ctx)?)?,
                });
            }
            let start = match (&root, base) {
                (_, Some(v)) => Cursor::Owned(v),
                (CompiledRoot::Variable(name), None) => {
                    variable_cursor(&mut ctx.variables, name, keys.first(), &policy)
                }
                (_, None) => Cursor::Slot(&mut ctx.root),
            };
            walk::<Bailout>(start, &keys, &policy, &mut |i, value, _| match expected[i] {
                Some(shape) if Shape::of(value) != shape => Err(Bailout::ShapeMismatch),
                _ => Ok(()),
            })
        }))
    }
}

fn run_all(fns: &[CompiledFn], ctx: &mut EvaluationContext) -> std::result::Result<Vec<Value>, Bailout> {
    fns.iter().map(|f| f(ctx)).collect()
}

fn located(body: CompiledFn, position: usize) -> CompiledFn {
    Box::new(move |ctx| {
        body(ctx).map_err(|b| match b {
            Bailout::Error(e) => Bailout::Error(e.at(position)),
            mismatch => mismatch,
        })
    })
}

fn guarded(body: CompiledFn, expected: Shape) -> CompiledFn {
    Box::new(move |ctx| {
        let v = body(ctx)?;
        if Shape::of(&v) == expected {
            Ok(v)
        } else {
            Err(Bailout::ShapeMismatch)
        }
    })
}

/// Both operands were integers when profiled.
fn int_binary(op: BinaryOp, l: CompiledFn, r: CompiledFn) -> CompiledFn {
    Box::new(move |ctx| -> Outcome {
        let a = l(ctx)?;
        let b = r(ctx)?;
        let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) else {
            return Err(Bailout::ShapeMismatch);
        };
        Ok(match op {
            BinaryOp::Eq => Value::Bool(x == y),
            BinaryOp::Ne => Value::Bool(x != y),
            BinaryOp::Lt => Value::Bool(x < y),
            BinaryOp::Le => Value::Bool(x <= y),
            BinaryOp::Gt => Value::Bool(x > y),
            BinaryOp::Ge => Value::Bool(x >= y),
            _ => int_arith(op, x, y)?,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompilationContext, ParserConfig};
    use crate::errors::ErrorKind;
    use crate::expression::parse_expr;
    use crate::interpreter::Interpreter;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn compile(node: &Node, registry: &Registry, context: Option<&CompilationContext>) -> Result<CompiledEvaluator> {
        ClosureBackend.compile(&CompileRequest {
            root: node,
            registry,
            policy: GrowthPolicy::from(&ParserConfig::default()),
            context,
        })
    }

    #[test]
    fn unprofiled_tree_compiles_without_guards() {
        let registry = Registry::with_builtins();
        let node = parse_expr("size(items) * 2 + #n", &ParserConfig::default()).unwrap();
        let compiled = compile(&node, &registry, None).unwrap();
        assert_eq!(compiled.guard_count(), 0);

        let mut ctx = EvaluationContext::new(json!({"items": [1, 2, 3]})).with_variable("n", json!(0.5));
        assert_eq!(compiled.run(&mut ctx).unwrap(), json!(6.5));
    }

    #[test]
    fn profiled_tree_bails_out_on_new_shapes() {
        let registry = Registry::with_builtins();
        let cfg = ParserConfig::default();
        let node = parse_expr("#a + #b", &cfg).unwrap();
        let mut ctx = EvaluationContext::default()
            .with_variable("a", json!(2))
            .with_variable("b", json!(3));
        Interpreter::new(&registry, GrowthPolicy::from(&cfg))
            .evaluate(&node, &mut ctx)
            .unwrap();

        let compiled = compile(&node, &registry, None).unwrap();
        assert_eq!(compiled.guard_count(), 3);
        assert_eq!(compiled.run(&mut ctx).unwrap(), json!(5));

        ctx.set_variable("b", json!("x"));
        assert_eq!(compiled.run(&mut ctx).unwrap_err(), Bailout::ShapeMismatch);
    }

    #[test]
    fn evaluation_errors_pass_through() {
        let registry = Registry::with_builtins();
        let node = parse_expr("items[4]", &ParserConfig::default()).unwrap();
        let compiled = compile(&node, &registry, None).unwrap();
        let mut ctx = EvaluationContext::new(json!({"items": []}));
        match compiled.run(&mut ctx) {
            Err(Bailout::Error(e)) => assert_eq!(e.kind(), ErrorKind::IndexOutOfBounds),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_functions_fail_compilation() {
        let registry = Registry::with_builtins();
        let node = parse_expr("1 + missing(2)", &ParserConfig::default()).unwrap();
        let err = compile(&node, &registry, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compilation);
    }

    #[test]
    fn evaluator_carries_the_context_label() {
        let registry = Registry::with_builtins();
        let node = parse_expr("1", &ParserConfig::default()).unwrap();
        let ctx = CompilationContext::new("tenant-a");
        let compiled = compile(&node, &registry, Some(&ctx)).unwrap();
        assert_eq!(compiled.context_label(), Some("tenant-a"));
    }
}
