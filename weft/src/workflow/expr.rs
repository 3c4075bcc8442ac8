//! Comparison expressions for condition nodes.
//!
//! Grammar: one space-bounded binary operator out of ` == `, ` != `, ` >= `,
//! ` <= `, ` > `, ` < `, ` contains `; each side is template-resolved and
//! quote-stripped. When both sides parse as 64-bit floats the comparison is
//! numeric, otherwise lexical; `contains` is always a string test. Registered
//! named predicates short-circuit the parser entirely.
//!
//! The operator is identified in the **raw** expression, before placeholder
//! resolution, so resolved values can never inject an operator.

use std::collections::HashMap;

use super::context::WorkflowContext;
use super::step::PredicateFn;

/// Caller-supplied named predicates, looked up by the whole raw expression.
pub type NamedPredicates = HashMap<String, PredicateFn>;

// Two-character operators come first so ` > ` never splits ` >= `.
const OPERATORS: &[&str] = &[" >= ", " <= ", " == ", " != ", " contains ", " > ", " < "];

/// Evaluates one expression against the workflow context. An expression with
/// no recognized operator and no named predicate is false.
pub fn evaluate(raw: &str, wf: &WorkflowContext, predicates: &NamedPredicates) -> bool {
    if let Some(predicate) = predicates.get(raw.trim()) {
        return predicate(wf);
    }

    for op in OPERATORS {
        if let Some(pos) = raw.find(op) {
            let lhs = operand(wf, &raw[..pos]);
            let rhs = operand(wf, &raw[pos + op.len()..]);
            return compare(op.trim(), &lhs, &rhs);
        }
    }

    tracing::debug!(expression = %raw, "no operator or named predicate; evaluating to false");
    false
}

fn operand(wf: &WorkflowContext, raw: &str) -> String {
    strip_quotes(wf.resolve(raw).trim()).to_string()
}

fn strip_quotes(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn compare(op: &str, lhs: &str, rhs: &str) -> bool {
    if op == "contains" {
        return lhs.contains(rhs);
    }
    if let (Ok(a), Ok(b)) = (lhs.parse::<f64>(), rhs.parse::<f64>()) {
        return match op {
            "==" => a == b,
            "!=" => a != b,
            ">=" => a >= b,
            "<=" => a <= b,
            ">" => a > b,
            "<" => a < b,
            _ => false,
        };
    }
    match op {
        "==" => lhs == rhs,
        "!=" => lhs != rhs,
        ">=" => lhs >= rhs,
        "<=" => lhs <= rhs,
        ">" => lhs > rhs,
        "<" => lhs < rhs,
        _ => false,
    }
}
