//! Matcher AST evaluation.
//!
//! Depth-first walk with short-circuit AND/OR. Comparisons never error at
//! runtime: a type mismatch, an unknown field, or an out-of-range index
//! evaluates to NOT-MATCH. The hot path performs no heap allocation; the
//! uuid is formatted into a stack buffer when a comparison needs it.

use super::parser::{Comparison, Expr, Lvalue, RelOp, Rvalue};
use crate::message::{FieldValue, Record};

pub(crate) fn eval(expr: &Expr, record: &Record) -> bool {
    match expr {
        Expr::Const(b) => *b,
        Expr::And(lhs, rhs) => eval(lhs, record) && eval(rhs, record),
        Expr::Or(lhs, rhs) => eval(lhs, record) || eval(rhs, record),
        Expr::Cmp(cmp) => eval_cmp(cmp, record),
    }
}

fn eval_cmp(cmp: &Comparison, record: &Record) -> bool {
    match &cmp.lhs {
        Lvalue::Uuid => {
            let mut buf = [0u8; 36];
            let s: &str = record.uuid.hyphenated().encode_lower(&mut buf);
            cmp_str(s, cmp.op, &cmp.rhs)
        }
        Lvalue::Type => cmp_str(&record.msg_type, cmp.op, &cmp.rhs),
        Lvalue::Logger => cmp_str(&record.logger, cmp.op, &cmp.rhs),
        Lvalue::Payload => cmp_str(&record.payload, cmp.op, &cmp.rhs),
        Lvalue::EnvVersion => cmp_str(&record.env_version, cmp.op, &cmp.rhs),
        Lvalue::Hostname => cmp_str(&record.hostname, cmp.op, &cmp.rhs),
        Lvalue::Timestamp => cmp_int(record.timestamp, cmp.op, &cmp.rhs),
        Lvalue::Severity => cmp_int(i64::from(record.severity), cmp.op, &cmp.rhs),
        Lvalue::Pid => cmp_int(i64::from(record.pid), cmp.op, &cmp.rhs),
        Lvalue::Field {
            name,
            field_idx,
            array_idx,
        } => eval_field(record, name, *field_idx, *array_idx, cmp.op, &cmp.rhs),
    }
}

/// Field comparisons. An absent field matches `== NIL` (and fails `!= NIL`);
/// a present field with an out-of-range array index is NOT-MATCH for every
/// operator, NIL included.
fn eval_field(
    record: &Record,
    name: &str,
    field_idx: usize,
    array_idx: usize,
    op: RelOp,
    rhs: &Rvalue,
) -> bool {
    let Some(field) = record.field_nth(name, field_idx) else {
        return match (op, rhs) {
            (RelOp::Eq, Rvalue::Nil) => true,
            (RelOp::Ne, Rvalue::Nil) => false,
            _ => false,
        };
    };

    if array_idx >= field.value.len() {
        return false;
    }

    match (op, rhs) {
        (RelOp::Eq, Rvalue::Nil) => return false,
        (RelOp::Ne, Rvalue::Nil) => return true,
        _ => {}
    }

    match &field.value {
        FieldValue::Str(v) => cmp_str(&v[array_idx], op, rhs),
        FieldValue::Int(v) => cmp_int(v[array_idx], op, rhs),
        FieldValue::Float(v) => cmp_float(v[array_idx], op, rhs),
        FieldValue::Bool(v) => cmp_bool(v[array_idx], op, rhs),
        // Byte fields have no literal syntax; comparisons never match.
        FieldValue::Bytes(_) => false,
    }
}

fn cmp_str(lhs: &str, op: RelOp, rhs: &Rvalue) -> bool {
    match (op, rhs) {
        (RelOp::Eq, Rvalue::Str(s)) => lhs == s,
        (RelOp::Ne, Rvalue::Str(s)) => lhs != s,
        (RelOp::Lt, Rvalue::Str(s)) => lhs < s.as_str(),
        (RelOp::Le, Rvalue::Str(s)) => lhs <= s.as_str(),
        (RelOp::Gt, Rvalue::Str(s)) => lhs > s.as_str(),
        (RelOp::Ge, Rvalue::Str(s)) => lhs >= s.as_str(),
        (RelOp::ReMatch, Rvalue::Regex(re)) => re.is_match(lhs),
        (RelOp::ReNotMatch, Rvalue::Regex(re)) => !re.is_match(lhs),
        _ => false,
    }
}

fn cmp_int(lhs: i64, op: RelOp, rhs: &Rvalue) -> bool {
    match rhs {
        Rvalue::Int(i) => cmp_ord(lhs, *i, op),
        Rvalue::Float(f) => cmp_ord_f64(lhs as f64, *f, op),
        _ => false,
    }
}

fn cmp_float(lhs: f64, op: RelOp, rhs: &Rvalue) -> bool {
    match rhs {
        Rvalue::Int(i) => cmp_ord_f64(lhs, *i as f64, op),
        Rvalue::Float(f) => cmp_ord_f64(lhs, *f, op),
        _ => false,
    }
}

fn cmp_bool(lhs: bool, op: RelOp, rhs: &Rvalue) -> bool {
    match (op, rhs) {
        (RelOp::Eq, Rvalue::Bool(b)) => lhs == *b,
        (RelOp::Ne, Rvalue::Bool(b)) => lhs != *b,
        _ => false,
    }
}

fn cmp_ord(lhs: i64, rhs: i64, op: RelOp) -> bool {
    match op {
        RelOp::Eq => lhs == rhs,
        RelOp::Ne => lhs != rhs,
        RelOp::Lt => lhs < rhs,
        RelOp::Le => lhs <= rhs,
        RelOp::Gt => lhs > rhs,
        RelOp::Ge => lhs >= rhs,
        RelOp::ReMatch | RelOp::ReNotMatch => false,
    }
}

fn cmp_ord_f64(lhs: f64, rhs: f64, op: RelOp) -> bool {
    match op {
        RelOp::Eq => lhs == rhs,
        RelOp::Ne => lhs != rhs,
        RelOp::Lt => lhs < rhs,
        RelOp::Le => lhs <= rhs,
        RelOp::Gt => lhs > rhs,
        RelOp::Ge => lhs >= rhs,
        RelOp::ReMatch | RelOp::ReNotMatch => false,
    }
}
