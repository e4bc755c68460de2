//! Reads the lisp-adapter's fenced code fragment — a single S-expression
//! — into an [`LCTerm`].
//!
//! Two passes: [`read`] tokenizes and nests parens into an untyped
//! [`SExpr`] tree, then [`lower`] interprets each list's head symbol
//! against the fixed set of tags the DSL understands, falling back to a
//! generic function application for anything else (so `(filter ...)`
//! and user-named helpers both parse, and only evaluation decides
//! whether a name is bound).

use super::error::DslError;
use super::term::{ConstraintOp, LCTerm, Value};

#[derive(Debug, Clone, PartialEq)]
enum SExpr {
    Sym(String),
    Str(String),
    Num(f64),
    List(Vec<SExpr>),
}

pub fn parse(src: &str) -> Result<LCTerm, DslError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(DslError::Syntax("empty expression".into()));
    }
    let mut pos = 0;
    let expr = read_expr(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(DslError::Syntax("trailing input after expression".into()));
    }
    lower(&expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Str(String),
    Atom(String),
}

fn tokenize(src: &str) -> Result<Vec<Token>, DslError> {
    let mut out = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            out.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            out.push(Token::RParen);
            i += 1;
        } else if c == '"' {
            i += 1;
            let mut s = String::new();
            loop {
                if i >= chars.len() {
                    return Err(DslError::Syntax("unterminated string literal".into()));
                }
                match chars[i] {
                    '"' => {
                        i += 1;
                        break;
                    }
                    '\\' if i + 1 < chars.len() => {
                        i += 1;
                        s.push(match chars[i] {
                            'n' => '\n',
                            't' => '\t',
                            '"' => '"',
                            '\\' => '\\',
                            other => other,
                        });
                        i += 1;
                    }
                    other => {
                        s.push(other);
                        i += 1;
                    }
                }
            }
            out.push(Token::Str(s));
        } else {
            let start = i;
            while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '(' && chars[i] != ')' && chars[i] != '"' {
                i += 1;
            }
            out.push(Token::Atom(chars[start..i].iter().collect()));
        }
    }
    Ok(out)
}

fn read_expr(tokens: &[Token], pos: &mut usize) -> Result<SExpr, DslError> {
    match tokens.get(*pos) {
        None => Err(DslError::Syntax("unexpected end of input".into())),
        Some(Token::RParen) => Err(DslError::Syntax("unexpected ')'".into())),
        Some(Token::Str(s)) => {
            *pos += 1;
            Ok(SExpr::Str(s.clone()))
        }
        Some(Token::Atom(a)) => {
            *pos += 1;
            Ok(match a.parse::<f64>() {
                Ok(n) if is_numeric_atom(a) => SExpr::Num(n),
                _ => SExpr::Sym(a.clone()),
            })
        }
        Some(Token::LParen) => {
            *pos += 1;
            let mut items = Vec::new();
            loop {
                match tokens.get(*pos) {
                    None => return Err(DslError::Syntax("unterminated list".into())),
                    Some(Token::RParen) => {
                        *pos += 1;
                        break;
                    }
                    _ => items.push(read_expr(tokens, pos)?),
                }
            }
            Ok(SExpr::List(items))
        }
    }
}

fn is_numeric_atom(a: &str) -> bool {
    let mut chars = a.chars().peekable();
    if matches!(chars.peek(), Some('+') | Some('-')) {
        chars.next();
    }
    match chars.peek() {
        Some(c) if c.is_ascii_digit() || *c == '.' => {}
        _ => return false,
    }
    a.chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e' || c == 'E')
}

fn lower(expr: &SExpr) -> Result<LCTerm, DslError> {
    match expr {
        SExpr::Str(s) => Ok(LCTerm::Lit(Value::Str(s.clone()))),
        SExpr::Num(n) => Ok(LCTerm::Lit(Value::Num(*n))),
        SExpr::Sym(s) if s == "input" => Ok(LCTerm::Input),
        SExpr::Sym(s) if s == "true" => Ok(LCTerm::Lit(Value::Bool(true))),
        SExpr::Sym(s) if s == "false" => Ok(LCTerm::Lit(Value::Bool(false))),
        SExpr::Sym(s) if s == "null" => Ok(LCTerm::Lit(Value::Null)),
        SExpr::Sym(s) => Ok(LCTerm::Var(s.clone())),
        SExpr::List(items) => lower_list(items),
    }
}

fn lower_list(items: &[SExpr]) -> Result<LCTerm, DslError> {
    if items.is_empty() {
        return Err(DslError::Syntax("empty form".into()));
    }
    let head_sym = match &items[0] {
        SExpr::Sym(s) => Some(s.as_str()),
        _ => None,
    };
    let args = &items[1..];

    match head_sym {
        Some("grep") => {
            expect_arity("grep", args, 1)?;
            Ok(LCTerm::Grep(Box::new(lower(&args[0])?)))
        }
        Some("match") => {
            expect_arity("match", args, 3)?;
            Ok(LCTerm::Match(
                Box::new(lower(&args[0])?),
                Box::new(lower(&args[1])?),
                Box::new(lower(&args[2])?),
            ))
        }
        Some("replace") => {
            expect_arity("replace", args, 3)?;
            Ok(LCTerm::Replace(
                Box::new(lower(&args[0])?),
                Box::new(lower(&args[1])?),
                Box::new(lower(&args[2])?),
            ))
        }
        Some("split") => {
            expect_arity("split", args, 3)?;
            Ok(LCTerm::Split(
                Box::new(lower(&args[0])?),
                Box::new(lower(&args[1])?),
                Box::new(lower(&args[2])?),
            ))
        }
        Some("parseInt") => {
            expect_arity("parseInt", args, 1)?;
            Ok(LCTerm::ParseInt(Box::new(lower(&args[0])?)))
        }
        Some("parseFloat") => {
            expect_arity("parseFloat", args, 1)?;
            Ok(LCTerm::ParseFloat(Box::new(lower(&args[0])?)))
        }
        Some("if") => {
            expect_arity("if", args, 3)?;
            Ok(LCTerm::If(
                Box::new(lower(&args[0])?),
                Box::new(lower(&args[1])?),
                Box::new(lower(&args[2])?),
            ))
        }
        Some("classify") => lower_classify(args),
        Some("lambda") => lower_lambda(args),
        Some("constrained") => lower_constrained(args),
        Some(op) => Ok(LCTerm::App(
            Box::new(LCTerm::Var(op.to_string())),
            args.iter().map(lower).collect::<Result<_, _>>()?,
        )),
        None => {
            let head = lower(&items[0])?;
            Ok(LCTerm::App(
                Box::new(head),
                args.iter().map(lower).collect::<Result<_, _>>()?,
            ))
        }
    }
}

fn lower_classify(args: &[SExpr]) -> Result<LCTerm, DslError> {
    if args.len() < 2 {
        return Err(DslError::Syntax(
            "classify requires a value, at least one case, and a default".into(),
        ));
    }
    let value = lower(&args[0])?;
    let default = lower(&args[args.len() - 1])?;
    let mut cases = Vec::new();
    for case in &args[1..args.len() - 1] {
        let SExpr::List(pair) = case else {
            return Err(DslError::Syntax("classify case must be (pattern result)".into()));
        };
        if pair.len() != 2 {
            return Err(DslError::Syntax("classify case must be (pattern result)".into()));
        }
        let SExpr::Str(pattern) = &pair[0] else {
            return Err(DslError::Syntax("classify case pattern must be a string".into()));
        };
        cases.push((pattern.clone(), lower(&pair[1])?));
    }
    Ok(LCTerm::Classify(Box::new(value), cases, Box::new(default)))
}

fn lower_lambda(args: &[SExpr]) -> Result<LCTerm, DslError> {
    if args.len() != 2 {
        return Err(DslError::Syntax("lambda requires params and a body".into()));
    }
    let params = match &args[0] {
        SExpr::Sym(s) => vec![s.clone()],
        SExpr::List(items) => items
            .iter()
            .map(|i| match i {
                SExpr::Sym(s) => Ok(s.clone()),
                _ => Err(DslError::Syntax("lambda parameter must be a symbol".into())),
            })
            .collect::<Result<_, _>>()?,
        _ => return Err(DslError::Syntax("lambda parameter list malformed".into())),
    };
    Ok(LCTerm::Lambda(params, Box::new(lower(&args[1])?)))
}

fn lower_constrained(args: &[SExpr]) -> Result<LCTerm, DslError> {
    if args.len() != 2 {
        return Err(DslError::Syntax("constrained requires an operator and a term".into()));
    }
    let SExpr::Sym(op) = &args[0] else {
        return Err(DslError::Syntax("constrained operator must be a symbol".into()));
    };
    let op = match op.as_str() {
        "\u{3a3}\u{26a1}\u{3bc}" => ConstraintOp::AlgebraicSimplify,
        "\u{221e}/0" => ConstraintOp::NullGuard,
        "\u{3b5}\u{26a1}\u{3c6}" => ConstraintOp::ReservedNoOp,
        other => return Err(DslError::Syntax(format!("unknown constraint operator: {other}"))),
    };
    Ok(LCTerm::Constrained(op, Box::new(lower(&args[1])?)))
}

fn expect_arity(name: &str, args: &[SExpr], n: usize) -> Result<(), DslError> {
    if args.len() != n {
        Err(DslError::Syntax(format!(
            "{name} expects {n} argument(s), got {}",
            args.len()
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grep_call() {
        let t = parse(r#"(grep "ERROR")"#).unwrap();
        assert_eq!(
            t,
            LCTerm::Grep(Box::new(LCTerm::Lit(Value::Str("ERROR".into()))))
        );
    }

    #[test]
    fn parses_lambda_with_single_symbol_param() {
        let t = parse(r#"(lambda x (match x "timeout" 0))"#).unwrap();
        match t {
            LCTerm::Lambda(params, _) => assert_eq!(params, vec!["x".to_string()]),
            other => panic!("expected lambda, got {other:?}"),
        }
    }

    #[test]
    fn unknown_head_symbol_lowers_to_generic_application() {
        let t = parse(r#"(filter RESULTS (lambda x (match x "timeout" 0)))"#).unwrap();
        match t {
            LCTerm::App(head, args) => {
                assert_eq!(*head, LCTerm::Var("filter".to_string()));
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected App, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unbalanced_parens() {
        assert!(parse("(grep \"ERROR\"").is_err());
    }

    #[test]
    fn rejects_trailing_garbage_after_expression() {
        assert!(parse(r#"(grep "ERROR") (grep "WARN")"#).is_err());
    }
}
