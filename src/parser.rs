//! Character cursor the grammar reads expression text through.

use crate::errors::EvalError;
use serde_json::Value;

/// Character cursor over expression text. Positions are byte offsets.
pub struct Parser<'a> {
    s: &'a str,
    i: usize,
}

impl<'a> Parser<'a> {
    pub fn new(s: &'a str) -> Self {
        Self { s, i: 0 }
    }

    pub fn pos(&self) -> usize {
        self.i
    }

    pub fn reset(&mut self, pos: usize) {
        self.i = pos;
    }

    pub fn error(&self, msg: impl Into<String>) -> EvalError {
        self.error_at(self.i, msg)
    }

    pub fn error_at(&self, position: usize, msg: impl Into<String>) -> EvalError {
        EvalError::Parse {
            message: msg.into(),
            position,
            expression: self.s.to_string(),
        }
    }

    pub fn parse_identifier(&mut self) -> Result<String, EvalError> {
        let start = self.i;
        while let Some(c) = self.peek_char() {
            let ok = if self.i == start {
                c == '_' || c == '$' || c.is_ascii_alphabetic()
            } else {
                c == '_' || c == '$' || c.is_ascii_alphanumeric()
            };
            if ok {
                self.i += 1;
            } else {
                break;
            }
        }
        if self.i == start {
            return Err(self.error("identifier expected"));
        }
        Ok(self.s[start..self.i].to_string())
    }

    /// Unsigned integer or decimal literal. A dot only belongs to the number
    /// when a digit follows it, so `5.abs()` stays a method call.
    pub fn parse_number_literal(&mut self) -> Result<Value, EvalError> {
        let start = self.i;
        self.skip_digits();
        let mut is_float = false;
        if self.peek_char() == Some('.')
            && self.s[self.i + 1..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
        {
            is_float = true;
            self.i += 1;
            self.skip_digits();
        }
        let s = &self.s[start..self.i];
        if s.is_empty() {
            return Err(self.error("number expected"));
        }
        if is_float {
            let f: f64 = s
                .parse()
                .map_err(|_| self.error_at(start, "bad float"))?;
            serde_json::Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| self.error_at(start, "float is not finite"))
        } else {
            let i: i64 = s
                .parse()
                .map_err(|_| self.error_at(start, "integer literal out of range"))?;
            Ok(Value::from(i))
        }
    }

    fn skip_digits(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.i += 1;
            } else {
                break;
            }
        }
    }

    pub fn parse_quoted_string(&mut self) -> Result<String, EvalError> {
        let start = self.i;
        let quote = self.peek_char().ok_or_else(|| self.error("string expected"))?;
        if quote != '\'' && quote != '"' {
            return Err(self.error("expected quoted string"));
        }
        self.i += 1;
        let mut out = String::new();
        while let Some(c) = self.peek_char() {
            self.i += c.len_utf8();
            if c == quote {
                return Ok(out);
            }
            if c == '\\' {
                if let Some(nc) = self.peek_char() {
                    self.i += nc.len_utf8();
                    match nc {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '\\' => out.push('\\'),
                        '"' => out.push('"'),
                        '\'' => out.push('\''),
                        _ => {
                            out.push('\\');
                            out.push(nc);
                        }
                    }
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        Err(self.error_at(start, "unterminated string"))
    }

    pub fn expect(&mut self, c: char) -> Result<(), EvalError> {
        self.skip_ws();
        if self.consume_char(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    pub fn consume_char(&mut self, c: char) -> bool {
        if self.peek_char() == Some(c) {
            self.i += c.len_utf8();
            true
        } else {
            false
        }
    }

    pub fn consume_str(&mut self, lit: &str) -> bool {
        if self.peek_str(lit) {
            self.i += lit.len();
            true
        } else {
            false
        }
    }

    /// Consume `word` only when it is not the prefix of a longer identifier.
    pub fn consume_keyword(&mut self, word: &str) -> bool {
        if !self.peek_str(word) {
            return false;
        }
        let after = self.s[self.i + word.len()..].chars().next();
        if after.is_some_and(|c| c == '_' || c == '$' || c.is_ascii_alphanumeric()) {
            return false;
        }
        self.i += word.len();
        true
    }

    pub fn peek_char(&self) -> Option<char> {
        self.s[self.i..].chars().next()
    }

    pub fn peek_str(&self, lit: &str) -> bool {
        self.s[self.i..].starts_with(lit)
    }

    pub fn skip_ws(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.i += c.len_utf8();
            } else {
                break;
            }
        }
    }

    pub fn eof(&self) -> bool {
        self.i >= self.s.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_stop_before_method_dots() {
        let mut p = Parser::new("5.abs()");
        assert_eq!(p.parse_number_literal().unwrap(), json!(5));
        assert!(p.peek_str(".abs"));

        let mut p = Parser::new("2.25");
        assert_eq!(p.parse_number_literal().unwrap(), json!(2.25));
        assert!(p.eof());
    }

    #[test]
    fn quoted_strings_unescape() {
        let mut p = Parser::new(r#"'it\'s' "two""#);
        assert_eq!(p.parse_quoted_string().unwrap(), "it's");
        p.skip_ws();
        assert_eq!(p.parse_quoted_string().unwrap(), "two");
    }

    #[test]
    fn unterminated_string_reports_its_start() {
        let mut p = Parser::new("  'abc");
        p.skip_ws();
        match p.parse_quoted_string() {
            Err(EvalError::Parse { position, .. }) => assert_eq!(position, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn keywords_need_a_word_boundary() {
        let mut p = Parser::new("nothing");
        assert!(!p.consume_keyword("not"));
        let mut p = Parser::new("not x");
        assert!(p.consume_keyword("not"));
    }
}
