//! Expression tree shared by the interpreter and the compiler, plus the
//! per-node exit descriptors the promoter reads.

use rustc_hash::FxHasher;
use serde_json::Value;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU8, Ordering};

/// Runtime type of a value as seen by the shape profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Null,
    Bool,
    Int,
    Float,
    String,
    Array,
    Object,
}

impl Shape {
    pub fn of(value: &Value) -> Shape {
        match value {
            Value::Null => Shape::Null,
            Value::Bool(_) => Shape::Bool,
            Value::Number(n) if n.is_i64() => Shape::Int,
            Value::Number(_) => Shape::Float,
            Value::String(_) => Shape::String,
            Value::Array(_) => Shape::Array,
            Value::Object(_) => Shape::Object,
        }
    }

    fn code(self) -> u8 {
        match self {
            Shape::Null => 1,
            Shape::Bool => 2,
            Shape::Int => 3,
            Shape::Float => 4,
            Shape::String => 5,
            Shape::Array => 6,
            Shape::Object => 7,
        }
    }

    fn from_code(code: u8) -> Option<Shape> {
        Some(match code {
            1 => Shape::Null,
            2 => Shape::Bool,
            3 => Shape::Int,
            4 => Shape::Float,
            5 => Shape::String,
            6 => Shape::Array,
            7 => Shape::Object,
            _ => return None,
        })
    }
}

/// Whether navigation found the slot in place or had to create it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavOutcome {
    Direct,
    Grown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitDescriptor {
    pub shape: Shape,
    pub navigation: NavOutcome,
}

impl ExitDescriptor {
    pub fn direct(value: &Value) -> Self {
        Self {
            shape: Shape::of(value),
            navigation: NavOutcome::Direct,
        }
    }

    const GROWN_BIT: u8 = 0x10;

    fn encode(self) -> u8 {
        let grown = match self.navigation {
            NavOutcome::Direct => 0,
            NavOutcome::Grown => Self::GROWN_BIT,
        };
        self.shape.code() | grown
    }

    fn decode(raw: u8) -> Option<Self> {
        let shape = Shape::from_code(raw & 0x0f)?;
        let navigation = if raw & Self::GROWN_BIT != 0 {
            NavOutcome::Grown
        } else {
            NavOutcome::Direct
        };
        Some(Self { shape, navigation })
    }
}

/// Last observed exit descriptor of one node. A single byte so concurrent
/// writers race last-writer-wins without tearing.
#[derive(Debug, Default)]
pub struct ExitSlot(AtomicU8);

impl ExitSlot {
    pub fn record(&self, descriptor: ExitDescriptor) {
        self.0.store(descriptor.encode(), Ordering::Relaxed);
    }

    pub fn get(&self) -> Option<ExitDescriptor> {
        ExitDescriptor::decode(self.0.load(Ordering::Relaxed))
    }

    pub fn shape(&self) -> Option<Shape> {
        self.get().map(|d| d.shape)
    }

    fn raw(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    /// Byte offset of the node's first token; the operator's for binary nodes.
    pub position: usize,
    pub exit: ExitSlot,
}

#[derive(Debug)]
pub enum NodeKind {
    Literal(Value),
    /// Navigation from a root through property and index steps.
    Path { root: PathRoot, steps: Vec<Step> },
    /// Registry function called by name: `size(x)`.
    Call { name: String, args: Vec<Node> },
    /// Registry function called on a receiver: `x.size()`.
    Method {
        target: Box<Node>,
        name: String,
        args: Vec<Node>,
    },
    Unary { op: UnaryOp, operand: Box<Node> },
    Binary {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Ternary {
        condition: Box<Node>,
        then_branch: Box<Node>,
        else_branch: Box<Node>,
    },
    /// `value ?: fallback`
    Elvis {
        value: Box<Node>,
        fallback: Box<Node>,
    },
    List(Vec<Node>),
    Map(Vec<(String, Node)>),
}

#[derive(Debug)]
pub enum PathRoot {
    /// The context root (`#root`, `#this`, or an implicit bare identifier).
    Context,
    Variable(String),
    /// Navigation over an intermediate value; writes do not reach the caller.
    Value(Box<Node>),
}

#[derive(Debug)]
pub struct Step {
    pub kind: StepKind,
    pub exit: ExitSlot,
}

#[derive(Debug)]
pub enum StepKind {
    Property(String),
    Index(Box<Node>),
}

impl Node {
    pub fn new(kind: NodeKind, position: usize) -> Self {
        Self {
            kind,
            position,
            exit: ExitSlot::default(),
        }
    }

    /// Preorder walk over every exit slot in the tree, steps included.
    pub fn for_each_slot(&self, f: &mut dyn FnMut(&ExitSlot)) {
        f(&self.exit);
        match &self.kind {
            NodeKind::Literal(_) => {}
            NodeKind::Path { root, steps } => {
                if let PathRoot::Value(inner) = root {
                    inner.for_each_slot(f);
                }
                for step in steps {
                    f(&step.exit);
                    if let StepKind::Index(index) = &step.kind {
                        index.for_each_slot(f);
                    }
                }
            }
            NodeKind::Call { args, .. } => args.iter().for_each(|a| a.for_each_slot(f)),
            NodeKind::Method { target, args, .. } => {
                target.for_each_slot(f);
                args.iter().for_each(|a| a.for_each_slot(f));
            }
            NodeKind::Unary { operand, .. } => operand.for_each_slot(f),
            NodeKind::Binary { lhs, rhs, .. } => {
                lhs.for_each_slot(f);
                rhs.for_each_slot(f);
            }
            NodeKind::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.for_each_slot(f);
                then_branch.for_each_slot(f);
                else_branch.for_each_slot(f);
            }
            NodeKind::Elvis { value, fallback } => {
                value.for_each_slot(f);
                fallback.for_each_slot(f);
            }
            NodeKind::List(items) => items.iter().for_each(|i| i.for_each_slot(f)),
            NodeKind::Map(entries) => entries.iter().for_each(|(_, v)| v.for_each_slot(f)),
        }
    }

    /// Hash of every exit descriptor currently recorded in the tree.
    pub fn shape_fingerprint(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.for_each_slot(&mut |slot| hasher.write_u8(slot.raw()));
        hasher.finish()
    }

    pub fn exit_descriptors(&self) -> Vec<Option<ExitDescriptor>> {
        let mut out = Vec::new();
        self.for_each_slot(&mut |slot| out.push(slot.get()));
        out
    }
}
