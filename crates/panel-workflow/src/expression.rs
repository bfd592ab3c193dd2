//! `${...}` placeholder resolution and condition evaluation
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expr      := or
//! or        := and ( "||" and )*
//! and       := unary ( "&&" unary )*
//! unary     := "!" unary | "(" expr ")" | atom
//! atom      := "true" | "false" | predicate | comparison
//! predicate := operand "." ( contains | equals | startsWith | endsWith ) "(" operand ")"
//! comparison:= operand ( ">=" | "<=" | "==" | "!=" | ">" | "<" ) operand
//! ```
//!
//! Comparisons are numeric when both operands parse as numbers; otherwise only
//! `==` and `!=` apply, lexically. Anything that does not parse is `false`,
//! including the negation of something that does not parse.

use serde_json::Value;
use tracing::debug;

/// Template with placeholders substituted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub text: String,
    /// Paths that had no value; their placeholders are left in `text`
    pub unresolved: Vec<String>,
}

impl Resolved {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Substitute every `${path}` in `template` using `lookup`
pub fn resolve_placeholders(
    template: &str,
    mut lookup: impl FnMut(&str) -> Option<Value>,
) -> Resolved {
    let mut text = String::with_capacity(template.len());
    let mut unresolved = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find("${") {
        text.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            text.push_str(&rest[open..]);
            rest = "";
            break;
        };

        let path = after[..close].trim();
        match lookup(path) {
            Some(value) => text.push_str(&value_to_text(&value)),
            None => {
                unresolved.push(path.to_string());
                text.push_str(&rest[open..open + 2 + close + 1]);
            }
        }
        rest = &after[close + 1..];
    }
    text.push_str(rest);

    Resolved { text, unresolved }
}

/// Render a JSON value the way it appears inside an expression
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve placeholders, then evaluate
///
/// Any placeholder left unresolved makes the condition `false`.
pub fn evaluate_condition(expression: &str, lookup: impl FnMut(&str) -> Option<Value>) -> bool {
    let resolved = resolve_placeholders(expression, lookup);
    if !resolved.is_complete() {
        debug!(unresolved = ?resolved.unresolved, "Condition has unresolved placeholders");
        return false;
    }
    evaluate(&resolved.text)
}

/// Evaluate an expression without placeholders
pub fn evaluate(expression: &str) -> bool {
    eval(expression).unwrap_or(false)
}

/// Whether parentheses outside quotes are balanced
pub fn parens_balanced(expression: &str) -> bool {
    let mut depth: i64 = 0;
    let mut quote: Option<u8> = None;
    for &b in expression.as_bytes() {
        match (quote, b) {
            (Some(q), _) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'\'' | b'"') => quote = Some(b),
            (None, b'(') => depth += 1,
            (None, b')') => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0 && quote.is_none()
}

fn eval(expression: &str) -> Option<bool> {
    let expr = strip_outer_parens(expression.trim());
    if expr.is_empty() {
        return None;
    }

    let any = split_top_level(expr, "||");
    if any.len() > 1 {
        let mut unknown = false;
        for part in any {
            match eval(part) {
                Some(true) => return Some(true),
                Some(false) => {}
                None => unknown = true,
            }
        }
        return if unknown { None } else { Some(false) };
    }

    let all = split_top_level(expr, "&&");
    if all.len() > 1 {
        for part in all {
            if !eval(part)? {
                return Some(false);
            }
        }
        return Some(true);
    }

    if let Some(rest) = expr.strip_prefix('!') {
        if !rest.starts_with('=') {
            return eval(rest).map(|b| !b);
        }
    }

    match expr {
        "true" => return Some(true),
        "false" => return Some(false),
        _ => {}
    }

    if let Some(result) = predicate(expr) {
        return Some(result);
    }

    comparison(expr)
}

const PREDICATES: [&str; 4] = ["contains", "equals", "startsWith", "endsWith"];

fn predicate(expr: &str) -> Option<bool> {
    if !expr.ends_with(')') {
        return None;
    }
    for name in PREDICATES {
        let token = format!(".{name}(");
        let Some(pos) = find_top_level(expr, &token) else {
            continue;
        };
        let subject = strip_quotes(&expr[..pos]);
        let argument = strip_quotes(&expr[pos + token.len()..expr.len() - 1]);
        return Some(match name {
            "contains" => subject.contains(argument),
            "equals" => subject == argument,
            "startsWith" => subject.starts_with(argument),
            _ => subject.ends_with(argument),
        });
    }
    None
}

fn comparison(expr: &str) -> Option<bool> {
    let (pos, op) = find_operator(expr)?;
    let lhs = expr[..pos].trim();
    let rhs = expr[pos + op.len()..].trim();
    if lhs.is_empty() || rhs.is_empty() {
        return None;
    }

    let (lhs, rhs) = (strip_quotes(lhs), strip_quotes(rhs));
    if let (Ok(a), Ok(b)) = (lhs.parse::<f64>(), rhs.parse::<f64>()) {
        return Some(match op {
            ">=" => a >= b,
            "<=" => a <= b,
            "==" => (a - b).abs() < f64::EPSILON,
            "!=" => (a - b).abs() >= f64::EPSILON,
            ">" => a > b,
            _ => a < b,
        });
    }

    match op {
        "==" => Some(lhs == rhs),
        "!=" => Some(lhs != rhs),
        _ => None,
    }
}

/// First comparison operator outside quotes and parentheses
fn find_operator(expr: &str) -> Option<(usize, &'static str)> {
    let bytes = expr.as_bytes();
    let mut scanner = Scanner::default();
    for (i, &b) in bytes.iter().enumerate() {
        if !scanner.step(b) {
            continue;
        }
        for op in [">=", "<=", "==", "!="] {
            if bytes[i..].starts_with(op.as_bytes()) {
                return Some((i, op));
            }
        }
        match b {
            b'>' => return Some((i, ">")),
            b'<' => return Some((i, "<")),
            _ => {}
        }
    }
    None
}

fn find_top_level(expr: &str, token: &str) -> Option<usize> {
    let bytes = expr.as_bytes();
    let mut scanner = Scanner::default();
    (0..bytes.len()).find(|&i| scanner.step(bytes[i]) && bytes[i..].starts_with(token.as_bytes()))
}

fn split_top_level<'a>(expr: &'a str, op: &str) -> Vec<&'a str> {
    let bytes = expr.as_bytes();
    let mut scanner = Scanner::default();
    let mut parts = Vec::new();
    let mut last = 0;
    let mut i = 0;
    while i < bytes.len() {
        if scanner.step(bytes[i]) && bytes[i..].starts_with(op.as_bytes()) {
            parts.push(&expr[last..i]);
            i += op.len();
            last = i;
            continue;
        }
        i += 1;
    }
    parts.push(&expr[last..]);
    parts
}

fn strip_outer_parens(mut expr: &str) -> &str {
    while expr.starts_with('(') && matching_paren(expr) == Some(expr.len() - 1) {
        expr = expr[1..expr.len() - 1].trim();
    }
    expr
}

/// Index of the parenthesis closing the one at position 0
fn matching_paren(expr: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    for (i, &b) in expr.as_bytes().iter().enumerate() {
        match (quote, b) {
            (Some(q), _) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'\'' | b'"') => quote = Some(b),
            (None, b'(') => depth += 1,
            (None, b')') => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'\'' || first == b'"') {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Tracks quotes and nesting while scanning bytes left to right
#[derive(Default)]
struct Scanner {
    depth: usize,
    quote: Option<u8>,
}

impl Scanner {
    /// Consume one byte; true when it sits at top level outside quotes
    fn step(&mut self, b: u8) -> bool {
        if let Some(q) = self.quote {
            if b == q {
                self.quote = None;
            }
            return false;
        }
        match b {
            b'\'' | b'"' => {
                self.quote = Some(b);
                false
            }
            b'(' => {
                let top = self.depth == 0;
                self.depth += 1;
                top
            }
            b')' => {
                self.depth = self.depth.saturating_sub(1);
                self.depth == 0
            }
            _ => self.depth == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup(path: &str) -> Option<Value> {
        match path {
            "score" => Some(json!(7)),
            "analyst.recommendation" => Some(json!("strong buy")),
            "approved" => Some(json!(true)),
            _ => None,
        }
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(evaluate("5 >= 3"));
        assert!(evaluate("2 < 10"));
        assert!(!evaluate("2 > 10"));
        assert!(evaluate("2.5 == 2.50"));
        assert!(evaluate("1 != 2"));
        assert!(evaluate("'3' <= 3"));
    }

    #[test]
    fn test_lexical_equality() {
        assert!(evaluate("abc == abc"));
        assert!(evaluate("'buy' != \"sell\""));
        // ordering needs numbers
        assert!(!evaluate("abc > abd"));
    }

    #[test]
    fn test_string_predicates() {
        assert!(evaluate("'foo bar'.contains('bar')"));
        assert!(evaluate("hello.startsWith(he)"));
        assert!(evaluate("hello.endsWith(\"llo\")"));
        assert!(evaluate("buy.equals('buy')"));
        assert!(!evaluate("foo.contains(bar)"));
    }

    #[test]
    fn test_logical_composition() {
        assert!(evaluate("true && 3 > 1"));
        assert!(!evaluate("true && 3 < 1"));
        assert!(evaluate("false || 3 > 1"));
        assert!(evaluate("!(1 > 2)"));
        assert!(evaluate("(true || false) && !false"));
        assert!(evaluate("'a || b'.contains('||')"));
    }

    #[test]
    fn test_unparseable_is_false() {
        assert!(!evaluate("garbage"));
        assert!(!evaluate("!garbage"));
        assert!(!evaluate(""));
        assert!(!evaluate("> 3"));
        assert!(!evaluate("true && ???"));
    }

    #[test]
    fn test_condition_with_placeholders() {
        assert!(evaluate_condition("${score} >= 5", lookup));
        assert!(evaluate_condition(
            "${analyst.recommendation}.contains(buy) && ${approved}",
            lookup
        ));
        // unresolved placeholders fail closed
        assert!(!evaluate_condition("${foo}.contains(${bar})", lookup));
        assert!(!evaluate_condition("!${missing}", lookup));
    }

    #[test]
    fn test_resolve_placeholders() {
        let resolved = resolve_placeholders("Score ${score} for ${who}", lookup);
        assert_eq!(resolved.text, "Score 7 for ${who}");
        assert_eq!(resolved.unresolved, vec!["who".to_string()]);

        let unterminated = resolve_placeholders("value ${score", lookup);
        assert_eq!(unterminated.text, "value ${score");
        assert!(unterminated.is_complete());
    }

    #[test]
    fn test_non_ascii_operands() {
        assert!(evaluate("看涨 == 看涨"));
        assert!(evaluate("'看涨 买入'.contains(买入)"));
    }

    #[test]
    fn test_parens_balanced() {
        assert!(parens_balanced("(a > 1) && (b < 2)"));
        assert!(parens_balanced("')'.contains(')')"));
        assert!(!parens_balanced("(a > 1"));
        assert!(!parens_balanced(")("));
    }
}
