//! Matcher - the expression engine that selects records for subscribers.
//!
//! Each Filter and Output carries a matcher expression compiled once at
//! configuration time:
//!
//! ```text
//! expr    ::= TRUE | FALSE | compare | expr AND expr | expr OR expr | ( expr )
//! compare ::= lvalue relop rvalue
//! lvalue  ::= Uuid|Timestamp|Type|Logger|Severity|Payload|EnvVersion|Pid|Hostname
//!           | Fields[name] | Fields[name][idx] | Fields[name][idx][array_idx]
//! relop   ::= == | != | < | <= | > | >= | =~ | !~
//! rvalue  ::= string | number | TRUE | FALSE | NIL | /regex/
//! ```
//!
//! Mismatched types evaluate to NOT-MATCH, never a runtime error. A matcher
//! may carry a sample denominator N, in which case it reports a match only
//! once every N times the expression itself matched.

mod eval;
mod lexer;
mod parser;

use crate::message::Record;
use crate::types::Result;
use std::sync::atomic::{AtomicU64, Ordering};

/// A compiled matcher expression.
#[derive(Debug)]
pub struct Matcher {
    expression: String,
    ast: parser::Expr,
    sample_denominator: Option<u64>,
    sample_counter: AtomicU64,
}

impl Matcher {
    /// Compile an expression. Parse and static type errors surface here;
    /// evaluation never fails.
    pub fn new(expression: &str) -> Result<Self> {
        Ok(Self {
            expression: expression.to_string(),
            ast: parser::parse(expression)?,
            sample_denominator: None,
            sample_counter: AtomicU64::new(0),
        })
    }

    /// Report a match only once every `denominator` passes. Values of 0 and
    /// 1 disable sampling.
    pub fn with_sampling(mut self, denominator: u64) -> Self {
        self.sample_denominator = (denominator > 1).then_some(denominator);
        self
    }

    /// The original expression text.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Pure evaluation, ignoring sampling. Used for checks that must not
    /// consume sampling ticks (e.g. the router's self-loop guard).
    pub fn would_match(&self, record: &Record) -> bool {
        eval::eval(&self.ast, record)
    }

    /// Sampling-aware evaluation, used on the dispatch path.
    pub fn matches(&self, record: &Record) -> bool {
        if !eval::eval(&self.ast, record) {
            return false;
        }
        match self.sample_denominator {
            None => true,
            Some(n) => self.sample_counter.fetch_add(1, Ordering::AcqRel) % n == 0,
        }
    }
}
