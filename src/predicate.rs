//! Predicate Compiler: parses a restricted expression over a single
//! variable `item` and compiles it into a predicate or transform
//! closure, with an optional lowering to a data-store filter string.

use serde_json::Value as JsonValue;

pub enum PredicateError {
    Unsafe(String),
    Syntax(String),
}

pub(crate) const DENIED_IDENTS: &[&str] = &[
    "process",
    "require",
    "import",
    "fs",
    "fetch",
    "xmlhttprequest",
    "eval",
    "function",
    "constructor",
    "__proto__",
    "prototype",
    "global",
    "globalthis",
    "window",
    "settimeout",
    "setinterval",
    "child_process",
];

fn deny_list_check(source: &str) -> Result<(), PredicateError> {
    let lower = source.to_ascii_lowercase();
    for ident in DENIED_IDENTS {
        if contains_word(&lower, ident) {
            return Err(PredicateError::Unsafe(format!(
                "reference to host-environment name `{}` is not allowed",
                ident
            )));
        }
    }
    Ok(())
}

pub(crate) fn contains_word(haystack: &str, needle: &str) -> bool {
    let bytes = haystack.as_bytes();
    let nbytes = needle.as_bytes();
    if nbytes.is_empty() || nbytes.len() > bytes.len() {
        return false;
    }
    for start in 0..=(bytes.len() - nbytes.len()) {
        if &bytes[start..start + nbytes.len()] == nbytes {
            let before_ok = start == 0 || !is_ident_byte(bytes[start - 1]);
            let after = start + nbytes.len();
            let after_ok = after == bytes.len() || !is_ident_byte(bytes[after]);
            if before_ok && after_ok {
                return true;
            }
        }
    }
    false
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

#[derive(Debug, Clone)]
enum Expr {
    Item,
    Field(Box<Expr>, String),
    Lit(JsonValue),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Bin(Box<Expr>, BinOp, Box<Expr>),
    Includes(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Eq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

/// A compiled predicate/transform pair plus, when recognised, a lowered
/// filter string equivalent.
pub struct CompiledPredicate {
    expr: Expr,
    pub lowered: Option<String>,
}

impl CompiledPredicate {
    /// Falsey-on-throw: any evaluation error yields `false`.
    pub fn test(&self, item: &JsonValue) -> bool {
        eval(&self.expr, item)
            .map(truthy)
            .unwrap_or(false)
    }

    /// Null-on-throw: any evaluation error yields `Value::Null`.
    pub fn transform(&self, item: &JsonValue) -> JsonValue {
        eval(&self.expr, item).unwrap_or(JsonValue::Null)
    }
}

pub fn compile(source: &str) -> Result<CompiledPredicate, PredicateError> {
    deny_list_check(source)?;
    let mut parser = Parser::new(source);
    let expr = parser.parse_expr()?;
    parser.expect_end()?;
    let lowered = lower(&expr);
    Ok(CompiledPredicate { expr, lowered })
}

/// Recognises three shapes and lowers them to a filter string; any
/// other shape returns `None` (caller falls back to the in-memory
/// predicate).
fn lower(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Bin(lhs, BinOp::Eq, rhs) => {
            if let (Expr::Field(base, field), Expr::Lit(JsonValue::String(v))) =
                (lhs.as_ref(), rhs.as_ref())
            {
                if matches!(base.as_ref(), Expr::Item) {
                    return Some(format!("{} = '{}'", field, v));
                }
            }
            None
        }
        Expr::Includes(target, needle) => {
            if let (Expr::Field(base, field), Expr::Lit(JsonValue::String(v))) =
                (target.as_ref(), needle.as_ref())
            {
                if matches!(base.as_ref(), Expr::Item) {
                    return Some(format!("{} CONTAINS '{}'", field, v));
                }
            }
            None
        }
        Expr::Bin(lhs, op @ (BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge), rhs) => {
            if let (Expr::Field(base, field), Expr::Lit(JsonValue::Number(n))) =
                (lhs.as_ref(), rhs.as_ref())
            {
                if matches!(base.as_ref(), Expr::Item) {
                    let op_str = match op {
                        BinOp::Lt => "<",
                        BinOp::Gt => ">",
                        BinOp::Le => "<=",
                        BinOp::Ge => ">=",
                        _ => unreachable!(),
                    };
                    return Some(format!("{} {} {}", field, op_str, n));
                }
            }
            None
        }
        _ => None,
    }
}

fn truthy(v: JsonValue) -> bool {
    match v {
        JsonValue::Bool(b) => b,
        JsonValue::Null => false,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(_) => true,
    }
}

fn eval(expr: &Expr, item: &JsonValue) -> Result<JsonValue, ()> {
    match expr {
        Expr::Item => Ok(item.clone()),
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Field(base, name) => {
            let base_val = eval(base, item)?;
            base_val.get(name).cloned().ok_or(())
        }
        Expr::Not(e) => Ok(JsonValue::Bool(!truthy(eval(e, item)?))),
        Expr::Neg(e) => {
            let v = eval(e, item)?;
            let n = v.as_f64().ok_or(())?;
            Ok(serde_json::json!(-n))
        }
        Expr::Includes(target, needle) => {
            let t = eval(target, item)?;
            let n = eval(needle, item)?;
            let (Some(t), Some(n)) = (t.as_str(), n.as_str()) else {
                return Err(());
            };
            Ok(JsonValue::Bool(t.contains(n)))
        }
        Expr::Bin(lhs, op, rhs) => {
            if matches!(op, BinOp::And | BinOp::Or) {
                let l = truthy(eval(lhs, item)?);
                return match op {
                    BinOp::And => {
                        if !l {
                            Ok(JsonValue::Bool(false))
                        } else {
                            Ok(JsonValue::Bool(truthy(eval(rhs, item)?)))
                        }
                    }
                    BinOp::Or => {
                        if l {
                            Ok(JsonValue::Bool(true))
                        } else {
                            Ok(JsonValue::Bool(truthy(eval(rhs, item)?)))
                        }
                    }
                    _ => unreachable!(),
                };
            }
            let l = eval(lhs, item)?;
            let r = eval(rhs, item)?;
            match op {
                BinOp::Eq => Ok(JsonValue::Bool(l == r)),
                BinOp::NotEq => Ok(JsonValue::Bool(l != r)),
                BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
                        return Err(());
                    };
                    let result = match op {
                        BinOp::Lt => a < b,
                        BinOp::Gt => a > b,
                        BinOp::Le => a <= b,
                        BinOp::Ge => a >= b,
                        _ => unreachable!(),
                    };
                    Ok(JsonValue::Bool(result))
                }
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
                        return Err(());
                    };
                    let result = match op {
                        BinOp::Add => a + b,
                        BinOp::Sub => a - b,
                        BinOp::Mul => a * b,
                        BinOp::Div => a / b,
                        _ => unreachable!(),
                    };
                    Ok(serde_json::json!(result))
                }
                BinOp::And | BinOp::Or => unreachable!(),
            }
        }
    }
}

/// Minimal recursive-descent parser for the restricted expression
/// grammar: `item`, dotted field access, string/number/bool literals,
/// `===`/`!==`/`<`/`>`/`<=`/`>=`/`&&`/`||`/`!`, `+ - * /`, `.includes(x)`.
struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek_char(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn consume_str(&mut self, s: &str) -> bool {
        self.skip_ws();
        if self.src[self.pos..].starts_with(s.as_bytes()) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn expect_end(&mut self) -> Result<(), PredicateError> {
        self.skip_ws();
        if self.pos == self.src.len() {
            Ok(())
        } else {
            Err(PredicateError::Syntax(format!(
                "unexpected trailing input at byte {}",
                self.pos
            )))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, PredicateError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.parse_and()?;
        loop {
            self.skip_ws();
            if self.consume_str("||") {
                let rhs = self.parse_and()?;
                lhs = Expr::Bin(Box::new(lhs), BinOp::Or, Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.parse_equality()?;
        loop {
            self.skip_ws();
            if self.consume_str("&&") {
                let rhs = self.parse_equality()?;
                lhs = Expr::Bin(Box::new(lhs), BinOp::And, Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, PredicateError> {
        let lhs = self.parse_relational()?;
        self.skip_ws();
        if self.consume_str("===") || self.consume_str("==") {
            let rhs = self.parse_relational()?;
            return Ok(Expr::Bin(Box::new(lhs), BinOp::Eq, Box::new(rhs)));
        }
        if self.consume_str("!==") || self.consume_str("!=") {
            let rhs = self.parse_relational()?;
            return Ok(Expr::Bin(Box::new(lhs), BinOp::NotEq, Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, PredicateError> {
        let lhs = self.parse_additive()?;
        self.skip_ws();
        let op = if self.consume_str("<=") {
            Some(BinOp::Le)
        } else if self.consume_str(">=") {
            Some(BinOp::Ge)
        } else if self.consume_str("<") {
            Some(BinOp::Lt)
        } else if self.consume_str(">") {
            Some(BinOp::Gt)
        } else {
            None
        };
        if let Some(op) = op {
            let rhs = self.parse_additive()?;
            return Ok(Expr::Bin(Box::new(lhs), op, Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            self.skip_ws();
            if self.consume_str("+") {
                let rhs = self.parse_multiplicative()?;
                lhs = Expr::Bin(Box::new(lhs), BinOp::Add, Box::new(rhs));
            } else if self.consume_str("-") {
                let rhs = self.parse_multiplicative()?;
                lhs = Expr::Bin(Box::new(lhs), BinOp::Sub, Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.parse_unary()?;
        loop {
            self.skip_ws();
            if self.consume_str("*") {
                let rhs = self.parse_unary()?;
                lhs = Expr::Bin(Box::new(lhs), BinOp::Mul, Box::new(rhs));
            } else if self.consume_str("/") {
                let rhs = self.parse_unary()?;
                lhs = Expr::Bin(Box::new(lhs), BinOp::Div, Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, PredicateError> {
        self.skip_ws();
        if self.consume_str("!") {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if self.consume_str("-") {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, PredicateError> {
        let mut expr = self.parse_primary()?;
        loop {
            self.skip_ws();
            if self.consume_str(".") {
                let name = self.parse_ident()?;
                if name == "includes" {
                    if !self.consume_str("(") {
                        return Err(PredicateError::Syntax("expected ( after includes".into()));
                    }
                    let arg = self.parse_expr()?;
                    if !self.consume_str(")") {
                        return Err(PredicateError::Syntax("expected ) closing includes".into()));
                    }
                    expr = Expr::Includes(Box::new(expr), Box::new(arg));
                } else {
                    expr = Expr::Field(Box::new(expr), name);
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, PredicateError> {
        self.skip_ws();
        match self.peek_char() {
            Some(b'(') => {
                self.consume_str("(");
                let e = self.parse_expr()?;
                if !self.consume_str(")") {
                    return Err(PredicateError::Syntax("expected )".into()));
                }
                Ok(e)
            }
            Some(b'\'') | Some(b'"') => self.parse_string(),
            Some(c) if c.is_ascii_digit() => self.parse_number(),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => {
                let ident = self.parse_ident()?;
                match ident.as_str() {
                    "item" => Ok(Expr::Item),
                    "true" => Ok(Expr::Lit(JsonValue::Bool(true))),
                    "false" => Ok(Expr::Lit(JsonValue::Bool(false))),
                    "null" => Ok(Expr::Lit(JsonValue::Null)),
                    other => Err(PredicateError::Syntax(format!(
                        "unknown identifier `{}`",
                        other
                    ))),
                }
            }
            _ => Err(PredicateError::Syntax("unexpected end of expression".into())),
        }
    }

    fn parse_ident(&mut self) -> Result<String, PredicateError> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.src.len() && is_ident_byte(self.src[self.pos]) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(PredicateError::Syntax("expected identifier".into()));
        }
        Ok(String::from_utf8_lossy(&self.src[start..self.pos]).to_string())
    }

    fn parse_string(&mut self) -> Result<Expr, PredicateError> {
        self.skip_ws();
        let quote = self.src[self.pos];
        self.pos += 1;
        let start = self.pos;
        while self.pos < self.src.len() && self.src[self.pos] != quote {
            self.pos += 1;
        }
        if self.pos >= self.src.len() {
            return Err(PredicateError::Syntax("unterminated string literal".into()));
        }
        let s = String::from_utf8_lossy(&self.src[start..self.pos]).to_string();
        self.pos += 1;
        Ok(Expr::Lit(JsonValue::String(s)))
    }

    fn parse_number(&mut self) -> Result<Expr, PredicateError> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.src.len()
            && (self.src[self.pos].is_ascii_digit() || self.src[self.pos] == b'.')
        {
            self.pos += 1;
        }
        let s = String::from_utf8_lossy(&self.src[start..self.pos]);
        let n: f64 = s
            .parse()
            .map_err(|_| PredicateError::Syntax(format!("invalid number literal `{}`", s)))?;
        Ok(Expr::Lit(serde_json::json!(n)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_equality_compiles_and_matches() {
        let p = compile("item.type === 'error'").unwrap();
        assert!(p.test(&json!({"type": "error"})));
        assert!(!p.test(&json!({"type": "info"})));
    }

    #[test]
    fn denied_identifier_rejected_as_unsafe() {
        let err = compile("require('fs')");
        assert!(matches!(err, Err(PredicateError::Unsafe(_))));
    }

    #[test]
    fn includes_shape_lowers_to_contains_filter() {
        let p = compile("item.content.includes('timeout')").unwrap();
        assert_eq!(p.lowered.as_deref(), Some("content CONTAINS 'timeout'"));
        assert!(p.test(&json!({"content": "connection timeout occurred"})));
    }

    #[test]
    fn numeric_compare_lowers_to_filter_string() {
        let p = compile("item.count > 5").unwrap();
        assert_eq!(p.lowered.as_deref(), Some("count > 5"));
        assert!(p.test(&json!({"count": 10})));
        assert!(!p.test(&json!({"count": 1})));
    }

    #[test]
    fn transform_on_error_yields_null() {
        let p = compile("item.missing.deeper").unwrap();
        assert_eq!(p.transform(&json!({"missing": 1})), JsonValue::Null);
    }

    #[test]
    fn unrecognised_shape_has_no_lowering() {
        let p = compile("item.a === item.b").unwrap();
        assert!(p.lowered.is_none());
    }
}
