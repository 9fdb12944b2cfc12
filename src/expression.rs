//! Length guard and the recursive-descent expression grammar.

use crate::ast::{BinaryOp, Node, NodeKind, PathRoot, Step, StepKind, UnaryOp};
use crate::config::ParserConfig;
use crate::errors::{EvalError, Result};
use crate::parser::Parser;
use serde_json::Value;

/// Bracket and operator nesting allowed before parsing gives up.
const MAX_NESTING_DEPTH: usize = 128;

/// Length guard: runs before any tokenizing.
pub fn check_length(input: &str, config: &ParserConfig) -> Result<()> {
    let limit = config.max_expression_length();
    if limit <= 0 {
        return Err(EvalError::InvalidConfiguration(format!(
            "maximum expression length must be positive, got {limit}"
        )));
    }
    let length = input.chars().count();
    if length as i64 > limit {
        return Err(EvalError::ExpressionTooLong { length, limit });
    }
    Ok(())
}

pub fn parse_expr(input: &str, config: &ParserConfig) -> Result<Node> {
    check_length(input, config)?;
    let mut p = EParser::new(input);
    p.skip_ws();
    if p.eof() {
        return Err(p.parser.error("empty expression"));
    }
    let node = p.parse_ternary()?;
    p.skip_ws();
    if !p.eof() {
        return Err(p.parser.error("trailing input"));
    }
    Ok(node)
}

struct EParser<'a> {
    parser: Parser<'a>,
    depth: usize,
}

impl<'a> EParser<'a> {
    fn new(s: &'a str) -> Self {
        Self {
            parser: Parser::new(s),
            depth: 0,
        }
    }

    fn skip_ws(&mut self) {
        self.parser.skip_ws();
    }

    fn eof(&self) -> bool {
        self.parser.eof()
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(self.parser.error("expression nested too deeply"));
        }
        Ok(())
    }

    /// One more level of nesting inside an operator or method chain.
    fn nest(&mut self, chain: &mut usize) -> Result<()> {
        *chain += 1;
        self.enter()
    }

    fn parse_ternary(&mut self) -> Result<Node> {
        self.enter()?;
        let node = self.parse_ternary_inner();
        self.depth -= 1;
        node
    }

    fn parse_ternary_inner(&mut self) -> Result<Node> {
        let start = self.parser.pos();
        let cond = self.parse_or()?;
        self.skip_ws();
        if self.parser.consume_str("?:") {
            let fallback = self.parse_ternary()?;
            return Ok(Node::new(
                NodeKind::Elvis {
                    value: Box::new(cond),
                    fallback: Box::new(fallback),
                },
                start,
            ));
        }
        if self.parser.consume_char('?') {
            let then_branch = self.parse_ternary()?;
            self.parser.expect(':')?;
            let else_branch = self.parse_ternary()?;
            return Ok(Node::new(
                NodeKind::Ternary {
                    condition: Box::new(cond),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                },
                start,
            ));
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> Result<Node> {
        let mut left = self.parse_and()?;
        let mut chain = 0;
        loop {
            self.skip_ws();
            let at = self.parser.pos();
            if self.parser.consume_str("||") || self.parser.consume_keyword("or") {
                self.nest(&mut chain)?;
                let right = self.parse_and()?;
                left = binary(BinaryOp::Or, left, right, at);
            } else {
                self.depth -= chain;
                return Ok(left);
            }
        }
    }

    fn parse_and(&mut self) -> Result<Node> {
        let mut left = self.parse_equality()?;
        let mut chain = 0;
        loop {
            self.skip_ws();
            let at = self.parser.pos();
            if self.parser.consume_str("&&") || self.parser.consume_keyword("and") {
                self.nest(&mut chain)?;
                let right = self.parse_equality()?;
                left = binary(BinaryOp::And, left, right, at);
            } else {
                self.depth -= chain;
                return Ok(left);
            }
        }
    }

    fn parse_equality(&mut self) -> Result<Node> {
        let mut left = self.parse_relational()?;
        let mut chain = 0;
        loop {
            self.skip_ws();
            let at = self.parser.pos();
            let op = if self.parser.consume_str("==") {
                BinaryOp::Eq
            } else if self.parser.consume_str("!=") {
                BinaryOp::Ne
            } else {
                self.depth -= chain;
                return Ok(left);
            };
            self.nest(&mut chain)?;
            let right = self.parse_relational()?;
            left = binary(op, left, right, at);
        }
    }

    fn parse_relational(&mut self) -> Result<Node> {
        let mut left = self.parse_additive()?;
        let mut chain = 0;
        loop {
            self.skip_ws();
            let at = self.parser.pos();
            let op = if self.parser.consume_str("<=") {
                BinaryOp::Le
            } else if self.parser.consume_str(">=") {
                BinaryOp::Ge
            } else if self.parser.consume_char('<') {
                BinaryOp::Lt
            } else if self.parser.consume_char('>') {
                BinaryOp::Gt
            } else {
                self.depth -= chain;
                return Ok(left);
            };
            self.nest(&mut chain)?;
            let right = self.parse_additive()?;
            left = binary(op, left, right, at);
        }
    }

    fn parse_additive(&mut self) -> Result<Node> {
        let mut left = self.parse_multiplicative()?;
        let mut chain = 0;
        loop {
            self.skip_ws();
            let at = self.parser.pos();
            let op = if self.parser.consume_char('+') {
                BinaryOp::Add
            } else if self.parser.consume_char('-') {
                BinaryOp::Sub
            } else {
                self.depth -= chain;
                return Ok(left);
            };
            self.nest(&mut chain)?;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right, at);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Node> {
        let mut left = self.parse_unary()?;
        let mut chain = 0;
        loop {
            self.skip_ws();
            let at = self.parser.pos();
            let op = if self.parser.consume_char('*') {
                BinaryOp::Mul
            } else if self.parser.consume_char('/') {
                BinaryOp::Div
            } else if self.parser.consume_char('%') {
                BinaryOp::Rem
            } else {
                self.depth -= chain;
                return Ok(left);
            };
            self.nest(&mut chain)?;
            let right = self.parse_unary()?;
            left = binary(op, left, right, at);
        }
    }

    fn parse_unary(&mut self) -> Result<Node> {
        self.skip_ws();
        let start = self.parser.pos();
        let op = if self.parser.peek_str("!=") {
            None
        } else if self.parser.consume_char('!') || self.parser.consume_keyword("not") {
            Some(UnaryOp::Not)
        } else if self.parser.consume_char('-') {
            Some(UnaryOp::Neg)
        } else {
            None
        };
        match op {
            Some(op) => {
                self.enter()?;
                let operand = self.parse_unary();
                self.depth -= 1;
                Ok(Node::new(
                    NodeKind::Unary {
                        op,
                        operand: Box::new(operand?),
                    },
                    start,
                ))
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Node> {
        let mut node = self.parse_primary()?;
        let mut chain = 0;
        loop {
            self.skip_ws();
            let pos = self.parser.pos();
            if self.parser.consume_char('.') {
                self.skip_ws();
                let name = self.parser.parse_identifier()?;
                self.skip_ws();
                if self.parser.consume_char('(') {
                    self.nest(&mut chain)?;
                    let args = self.parse_args()?;
                    node = Node::new(
                        NodeKind::Method {
                            target: Box::new(node),
                            name,
                            args,
                        },
                        pos,
                    );
                } else {
                    node = push_step(node, StepKind::Property(name), pos);
                }
            } else if self.parser.consume_char('[') {
                let index = self.parse_ternary()?;
                self.parser.expect(']')?;
                node = push_step(node, StepKind::Index(Box::new(index)), pos);
            } else {
                self.depth -= chain;
                return Ok(node);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Node> {
        self.skip_ws();
        let start = self.parser.pos();
        match self.parser.peek_char() {
            None => Err(self.parser.error("unexpected end of expression")),
            Some('\'') | Some('"') => {
                let s = self.parser.parse_quoted_string()?;
                Ok(Node::new(NodeKind::Literal(Value::String(s)), start))
            }
            Some(c) if c.is_ascii_digit() => {
                let n = self.parser.parse_number_literal()?;
                Ok(Node::new(NodeKind::Literal(n), start))
            }
            Some('(') => {
                self.parser.consume_char('(');
                let inner = self.parse_ternary()?;
                self.parser.expect(')')?;
                Ok(inner)
            }
            Some('{') => {
                self.parser.consume_char('{');
                self.enter()?;
                let node = self.parse_collection(start);
                self.depth -= 1;
                node
            }
            Some('#') => {
                self.parser.consume_char('#');
                let name = self.parser.parse_identifier()?;
                let root = match name.as_str() {
                    "root" | "this" => PathRoot::Context,
                    _ => PathRoot::Variable(name),
                };
                Ok(Node::new(
                    NodeKind::Path {
                        root,
                        steps: Vec::new(),
                    },
                    start,
                ))
            }
            Some(_) => {
                if self.parser.consume_keyword("true") {
                    return Ok(Node::new(NodeKind::Literal(Value::Bool(true)), start));
                }
                if self.parser.consume_keyword("false") {
                    return Ok(Node::new(NodeKind::Literal(Value::Bool(false)), start));
                }
                if self.parser.consume_keyword("null") {
                    return Ok(Node::new(NodeKind::Literal(Value::Null), start));
                }
                let name = self.parser.parse_identifier()?;
                self.skip_ws();
                if self.parser.consume_char('(') {
                    let args = self.parse_args()?;
                    return Ok(Node::new(NodeKind::Call { name, args }, start));
                }
                let step = Step {
                    kind: StepKind::Property(name),
                    exit: Default::default(),
                };
                Ok(Node::new(
                    NodeKind::Path {
                        root: PathRoot::Context,
                        steps: vec![step],
                    },
                    start,
                ))
            }
        }
    }

    /// After `(`: comma separated arguments up to `)`.
    fn parse_args(&mut self) -> Result<Vec<Node>> {
        let mut out = Vec::new();
        self.skip_ws();
        if self.parser.consume_char(')') {
            return Ok(out);
        }
        loop {
            out.push(self.parse_ternary()?);
            self.skip_ws();
            if self.parser.consume_char(',') {
                continue;
            }
            self.parser.expect(')')?;
            return Ok(out);
        }
    }

    /// After `{`: `{}` is an empty list, `{:}` an empty map, `{a: 1}` a map
    /// and `{1, 2}` a list.
    fn parse_collection(&mut self, start: usize) -> Result<Node> {
        self.skip_ws();
        if self.parser.consume_char('}') {
            return Ok(Node::new(NodeKind::List(Vec::new()), start));
        }
        if self.parser.peek_str(":") {
            self.parser.consume_char(':');
            self.parser.expect('}')?;
            return Ok(Node::new(NodeKind::Map(Vec::new()), start));
        }
        if self.peek_map_key()?.is_some() {
            let mut entries = Vec::new();
            loop {
                self.skip_ws();
                let key = match self.peek_map_key()? {
                    Some(key) => key,
                    None => return Err(self.parser.error("map key expected")),
                };
                self.parser.expect(':')?;
                let value = self.parse_ternary()?;
                entries.push((key, value));
                self.skip_ws();
                if self.parser.consume_char(',') {
                    continue;
                }
                self.parser.expect('}')?;
                return Ok(Node::new(NodeKind::Map(entries), start));
            }
        }
        let mut items = Vec::new();
        loop {
            items.push(self.parse_ternary()?);
            self.skip_ws();
            if self.parser.consume_char(',') {
                continue;
            }
            self.parser.expect('}')?;
            return Ok(Node::new(NodeKind::List(items), start));
        }
    }

    /// Reads `key` when it is followed by `:`, leaving the cursor on the
    /// colon. Otherwise rewinds and returns `None`.
    fn peek_map_key(&mut self) -> Result<Option<String>> {
        let saved = self.parser.pos();
        self.skip_ws();
        let key = match self.parser.peek_char() {
            Some('\'') | Some('"') => self.parser.parse_quoted_string().ok(),
            Some(c) if c == '_' || c.is_ascii_alphabetic() => self.parser.parse_identifier().ok(),
            _ => None,
        };
        self.skip_ws();
        if key.is_some() && self.parser.peek_char() == Some(':') && !self.parser.peek_str("::") {
            return Ok(key);
        }
        self.parser.reset(saved);
        Ok(None)
    }
}

fn binary(op: BinaryOp, lhs: Node, rhs: Node, position: usize) -> Node {
    Node::new(
        NodeKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        position,
    )
}

/// Extend a path with one more step, or start a new path over `node`.
fn push_step(node: Node, kind: StepKind, pos: usize) -> Node {
    let step = Step {
        kind,
        exit: Default::default(),
    };
    match node {
        Node {
            kind: NodeKind::Path { root, mut steps },
            position,
            ..
        } => {
            steps.push(step);
            Node::new(NodeKind::Path { root, steps }, position)
        }
        other => Node::new(
            NodeKind::Path {
                root: PathRoot::Value(Box::new(other)),
                steps: vec![step],
            },
            pos,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerMode;
    use crate::errors::ErrorKind;

    fn parse(s: &str) -> Result<Node> {
        parse_expr(s, &ParserConfig::default())
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let node = parse("1 + 2 * 3").unwrap();
        match node.kind {
            NodeKind::Binary {
                op: BinaryOp::Add,
                rhs,
                ..
            } => assert!(matches!(rhs.kind, NodeKind::Binary { op: BinaryOp::Mul, .. })),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn navigation_collects_steps() {
        let node = parse("orders[0].lines['sku']").unwrap();
        match node.kind {
            NodeKind::Path {
                root: PathRoot::Context,
                steps,
            } => assert_eq!(steps.len(), 4),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn method_result_starts_a_value_path() {
        let node = parse("keys(#m).first().length").unwrap();
        assert!(matches!(
            node.kind,
            NodeKind::Path {
                root: PathRoot::Value(_),
                ..
            }
        ));
    }

    #[test]
    fn collections_and_conditionals() {
        assert!(matches!(parse("{}").unwrap().kind, NodeKind::List(ref v) if v.is_empty()));
        assert!(matches!(parse("{:}").unwrap().kind, NodeKind::Map(ref v) if v.is_empty()));
        assert!(matches!(parse("{a: 1, 'b c': 2}").unwrap().kind, NodeKind::Map(ref v) if v.len() == 2));
        assert!(matches!(parse("{a ? 1 : 2, 3}").unwrap().kind, NodeKind::List(ref v) if v.len() == 2));
        assert!(matches!(parse("x ?: 'none'").unwrap().kind, NodeKind::Elvis { .. }));
        assert!(matches!(parse("x > 1 ? 'a' : 'b'").unwrap().kind, NodeKind::Ternary { .. }));
    }

    #[test]
    fn length_guard_runs_before_tokenizing() {
        let cfg = ParserConfig::full(CompilerMode::Off, None, false, false, usize::MAX, 10);
        // Eleven characters of garbage: the length check wins over the syntax error.
        let err = parse_expr("))))))))))(", &cfg).unwrap_err();
        assert_eq!(
            err,
            EvalError::ExpressionTooLong {
                length: 11,
                limit: 10
            }
        );
        assert!(parse_expr("1234567890", &cfg).is_ok());
    }

    #[test]
    fn non_positive_limit_is_rejected() {
        let cfg = ParserConfig::full(CompilerMode::Off, None, false, false, usize::MAX, 0);
        assert_eq!(parse_expr("1", &cfg).unwrap_err().kind(), ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn syntax_errors_carry_position() {
        match parse("1 + ").unwrap_err() {
            EvalError::Parse {
                position,
                expression,
                ..
            } => {
                assert_eq!(position, 4);
                assert_eq!(expression, "1 + ");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(parse("a b").unwrap_err().kind(), ErrorKind::Parse);
        assert_eq!(parse("   ").unwrap_err().kind(), ErrorKind::Parse);
    }

    #[test]
    fn deep_nesting_is_a_parse_error() {
        let text = format!("{}1{}", "(".repeat(400), ")".repeat(400));
        assert_eq!(parse(&text).unwrap_err().kind(), ErrorKind::Parse);
    }

    #[test]
    fn long_operator_chains_count_towards_nesting() {
        let text = vec!["1"; 300].join(" + ");
        assert_eq!(parse(&text).unwrap_err().kind(), ErrorKind::Parse);
        let short = vec!["1"; 50].join(" + ");
        assert!(parse(&short).is_ok());
    }
}
