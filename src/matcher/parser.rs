//! Recursive-descent parser producing the matcher AST.
//!
//! Precedence: `()` binds tightest, then `AND`, then `OR`; both operators
//! associate left-to-right. Type constraints that can be checked statically
//! (regex operands, NIL placement, boolean comparisons) are rejected at
//! parse time so runtime evaluation never errors.

use super::lexer::{tokenize, Token};
use crate::types::{Error, Result};

#[derive(Debug)]
pub(crate) enum Expr {
    Const(bool),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(Comparison),
}

#[derive(Debug)]
pub(crate) struct Comparison {
    pub lhs: Lvalue,
    pub op: RelOp,
    pub rhs: Rvalue,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Lvalue {
    Uuid,
    Timestamp,
    Type,
    Logger,
    Severity,
    Payload,
    EnvVersion,
    Pid,
    Hostname,
    Field {
        name: String,
        field_idx: usize,
        array_idx: usize,
    },
}

impl Lvalue {
    fn is_string(&self) -> bool {
        matches!(
            self,
            Lvalue::Uuid
                | Lvalue::Type
                | Lvalue::Logger
                | Lvalue::Payload
                | Lvalue::EnvVersion
                | Lvalue::Hostname
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    ReMatch,
    ReNotMatch,
}

#[derive(Debug)]
pub(crate) enum Rvalue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
    Regex(regex::Regex),
}

pub(crate) fn parse(expression: &str) -> Result<Expr> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(Error::matcher("empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::matcher(format!(
            "trailing tokens after expression: {:?}",
            &parser.tokens[parser.pos..]
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| Error::matcher("unexpected end of expression"))?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        let found = self.next()?;
        if found == token {
            Ok(())
        } else {
            Err(Error::matcher(format!("expected {token:?}, found {found:?}")))
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_term()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_term()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        match self.next()? {
            Token::True => Ok(Expr::Const(true)),
            Token::False => Ok(Expr::Const(false)),
            Token::LParen => {
                let expr = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Token::Ident(name) => {
                let lhs = self.parse_lvalue(&name)?;
                let op = self.parse_relop()?;
                let rhs = self.parse_rvalue()?;
                validate(&lhs, op, &rhs)?;
                Ok(Expr::Cmp(Comparison { lhs, op, rhs }))
            }
            other => Err(Error::matcher(format!(
                "expected TRUE, FALSE, '(' or a field, found {other:?}"
            ))),
        }
    }

    fn parse_lvalue(&mut self, name: &str) -> Result<Lvalue> {
        Ok(match name {
            "Uuid" => Lvalue::Uuid,
            "Timestamp" => Lvalue::Timestamp,
            "Type" => Lvalue::Type,
            "Logger" => Lvalue::Logger,
            "Severity" => Lvalue::Severity,
            "Payload" => Lvalue::Payload,
            "EnvVersion" => Lvalue::EnvVersion,
            "Pid" => Lvalue::Pid,
            "Hostname" => Lvalue::Hostname,
            "Fields" => {
                self.expect(Token::LBracket)?;
                let field_name = match self.next()? {
                    Token::Ident(n) => n,
                    Token::Str(n) => n,
                    other => {
                        return Err(Error::matcher(format!(
                            "expected field name, found {other:?}"
                        )))
                    }
                };
                self.expect(Token::RBracket)?;
                let field_idx = self.parse_optional_index()?;
                let array_idx = if field_idx.is_some() {
                    self.parse_optional_index()?
                } else {
                    None
                };
                Lvalue::Field {
                    name: field_name,
                    field_idx: field_idx.unwrap_or(0),
                    array_idx: array_idx.unwrap_or(0),
                }
            }
            other => {
                return Err(Error::matcher(format!("unknown message field '{other}'")));
            }
        })
    }

    fn parse_optional_index(&mut self) -> Result<Option<usize>> {
        if !self.eat(&Token::LBracket) {
            return Ok(None);
        }
        let idx = match self.next()? {
            Token::Int(i) if i >= 0 => i as usize,
            other => {
                return Err(Error::matcher(format!(
                    "expected non-negative index, found {other:?}"
                )))
            }
        };
        self.expect(Token::RBracket)?;
        Ok(Some(idx))
    }

    fn parse_relop(&mut self) -> Result<RelOp> {
        Ok(match self.next()? {
            Token::Eq => RelOp::Eq,
            Token::Ne => RelOp::Ne,
            Token::Lt => RelOp::Lt,
            Token::Le => RelOp::Le,
            Token::Gt => RelOp::Gt,
            Token::Ge => RelOp::Ge,
            Token::ReMatch => RelOp::ReMatch,
            Token::ReNotMatch => RelOp::ReNotMatch,
            other => {
                return Err(Error::matcher(format!(
                    "expected a relational operator, found {other:?}"
                )))
            }
        })
    }

    fn parse_rvalue(&mut self) -> Result<Rvalue> {
        Ok(match self.next()? {
            Token::Str(s) => Rvalue::Str(s),
            Token::Int(i) => Rvalue::Int(i),
            Token::Float(f) => Rvalue::Float(f),
            Token::True => Rvalue::Bool(true),
            Token::False => Rvalue::Bool(false),
            Token::Nil => Rvalue::Nil,
            Token::Regex(pattern) => Rvalue::Regex(
                regex::Regex::new(&pattern)
                    .map_err(|e| Error::matcher(format!("bad regex /{pattern}/: {e}")))?,
            ),
            other => {
                return Err(Error::matcher(format!(
                    "expected a literal value, found {other:?}"
                )))
            }
        })
    }
}

fn validate(lhs: &Lvalue, op: RelOp, rhs: &Rvalue) -> Result<()> {
    let is_regex_op = matches!(op, RelOp::ReMatch | RelOp::ReNotMatch);
    match rhs {
        Rvalue::Regex(_) => {
            if !is_regex_op {
                return Err(Error::matcher("regex literal requires =~ or !~"));
            }
            if !lhs.is_string() && !matches!(lhs, Lvalue::Field { .. }) {
                return Err(Error::matcher("=~ and !~ apply only to strings"));
            }
        }
        Rvalue::Nil => {
            if !matches!(lhs, Lvalue::Field { .. }) {
                return Err(Error::matcher("NIL compares only against Fields[...]"));
            }
            if !matches!(op, RelOp::Eq | RelOp::Ne) {
                return Err(Error::matcher("NIL supports only == and !="));
            }
        }
        Rvalue::Bool(_) => {
            if !matches!(op, RelOp::Eq | RelOp::Ne) {
                return Err(Error::matcher("booleans support only == and !="));
            }
        }
        _ => {
            if is_regex_op {
                return Err(Error::matcher("=~ and !~ require a regex literal"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_binds_tighter_than_or() {
        // a OR b AND c parses as a OR (b AND c)
        let expr = parse("Type == \"a\" OR Type == \"b\" AND Type == \"c\"").unwrap();
        match expr {
            Expr::Or(lhs, rhs) => {
                assert!(matches!(*lhs, Expr::Cmp(_)));
                assert!(matches!(*rhs, Expr::And(_, _)));
            }
            other => panic!("expected Or at the root, got {other:?}"),
        }
    }

    #[test]
    fn parens_override_precedence() {
        let expr = parse("(Type == \"a\" OR Type == \"b\") AND Severity < 3").unwrap();
        match expr {
            Expr::And(lhs, _) => assert!(matches!(*lhs, Expr::Or(_, _))),
            other => panic!("expected And at the root, got {other:?}"),
        }
    }

    #[test]
    fn field_indexes_default_to_zero() {
        let expr = parse("Fields[status] == 200").unwrap();
        match expr {
            Expr::Cmp(Comparison {
                lhs: Lvalue::Field {
                    name,
                    field_idx,
                    array_idx,
                },
                ..
            }) => {
                assert_eq!(name, "status");
                assert_eq!(field_idx, 0);
                assert_eq!(array_idx, 0);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn rejects_static_type_errors() {
        assert!(parse("Type =~ \"notaregex\"").is_err());
        assert!(parse("Payload == /re/").is_err());
        assert!(parse("Type == NIL").is_err());
        assert!(parse("Fields[x] < NIL").is_err());
        assert!(parse("Severity > TRUE").is_err());
        assert!(parse("Bogus == 1").is_err());
        assert!(parse("Type == \"a\" AND").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn rejects_bad_regex_at_parse_time() {
        assert!(parse("Payload =~ /([unclosed/").is_err());
    }
}
