//! The tree-walking evaluator for [`LCTerm`] programs (lisp adapter).
//!
//! `eval` never panics on malformed input; every failure mode the
//! language can hit — an unbound name, a type mismatch, a bad regex —
//! surfaces as a [`DslError`]. Errors raised while applying a lambda to
//! one element of a `filter`/`map` collection are caught at that call
//! site and become `Value::Null` for that element only, per the
//! language's per-element failure contract; errors anywhere else
//! propagate to the caller.

use super::error::DslError;
use super::term::{ConstraintOp, Env, LCTerm, Value};
use crate::bindings::Bindings;
use crate::extractor::compiler::{parse_leading_float, parse_leading_int};
use crate::handle::{Elem, HandleRegistry};
use crate::line_store::LineStore;
use regex::RegexBuilder;
use std::cell::RefCell;

pub struct EvalCtx<'a> {
    pub line_store: &'a LineStore,
    pub registry: &'a HandleRegistry,
    pub bindings: &'a Bindings,
    log: RefCell<Vec<String>>,
}

impl<'a> EvalCtx<'a> {
    pub fn new(line_store: &'a LineStore, registry: &'a HandleRegistry, bindings: &'a Bindings) -> Self {
        Self {
            line_store,
            registry,
            bindings,
            log: RefCell::new(Vec::new()),
        }
    }

    /// Constraint applications recorded during the run, in order.
    pub fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.borrow_mut().push(entry.into());
    }
}

pub fn eval(term: &LCTerm, env: &Env, ctx: &EvalCtx) -> Result<Value, DslError> {
    match term {
        LCTerm::Input => Ok(Value::Str(ctx.line_store.full_text())),
        LCTerm::Lit(v) => Ok(v.clone()),
        LCTerm::Var(name) => resolve_var(name, env, ctx),
        LCTerm::Grep(pattern) => eval_grep(pattern, env, ctx),
        LCTerm::Match(of, pattern, group) => eval_match(of, pattern, group, env, ctx),
        LCTerm::Replace(of, from, to) => eval_replace(of, from, to, env, ctx),
        LCTerm::Split(of, delim, index) => eval_split(of, delim, index, env, ctx),
        LCTerm::ParseInt(of) => eval_parse_int(of, env, ctx),
        LCTerm::ParseFloat(of) => eval_parse_float(of, env, ctx),
        LCTerm::If(cond, then, els) => {
            if eval(cond, env, ctx)?.is_truthy() {
                eval(then, env, ctx)
            } else {
                eval(els, env, ctx)
            }
        }
        LCTerm::Classify(value, cases, default) => eval_classify(value, cases, default, env, ctx),
        LCTerm::App(head, args) => eval_app(head, args, env, ctx),
        LCTerm::Lambda(params, body) => Ok(Value::Closure(std::rc::Rc::new(super::term::Closure {
            params: params.clone(),
            body: (**body).clone(),
            env: env.clone(),
        }))),
        LCTerm::Constrained(op, inner) => eval_constrained(*op, inner, env, ctx),
    }
}

fn resolve_var(name: &str, env: &Env, ctx: &EvalCtx) -> Result<Value, DslError> {
    if let Some(v) = env.lookup(name) {
        return Ok(v);
    }
    if let Some(handle) = ctx.bindings.get(name) {
        let elems = ctx
            .registry
            .elements(handle)
            .map_err(|e| DslError::Runtime(e.to_string()))?;
        return Ok(Value::Array(elems.iter().map(elem_to_value).collect()));
    }
    Err(DslError::UnboundVariable(name.to_string()))
}

fn elem_to_value(e: &Elem) -> Value {
    match e {
        Elem::Line(l) => Value::Line(l.clone()),
        Elem::Str(s) => Value::Str(s.clone()),
        Elem::Num(n) => Value::Num(*n),
        Elem::Bool(b) => Value::Bool(*b),
        Elem::Null => Value::Null,
    }
}

fn eval_grep(pattern: &LCTerm, env: &Env, ctx: &EvalCtx) -> Result<Value, DslError> {
    let pat_val = eval(pattern, env, ctx)?;
    let pattern_str = pat_val
        .coerce_str()
        .ok_or_else(|| DslError::Runtime("grep pattern must coerce to a string".into()))?;
    let re = RegexBuilder::new(&pattern_str)
        .case_insensitive(true)
        .build()
        .map_err(|e| DslError::Syntax(format!("invalid grep pattern: {e}")))?;

    let mut hits = Vec::new();
    for line in ctx.line_store.get_lines(1, ctx.line_store.get_line_count()) {
        for caps in re.captures_iter(&line.content) {
            let m = caps.get(0).expect("whole match always present");
            let groups: Vec<Option<String>> = (1..caps.len())
                .map(|i| caps.get(i).map(|g| g.as_str().to_string()))
                .collect();
            hits.push(Value::Hit(super::term::Hit {
                matched: m.as_str().to_string(),
                line: line.content.clone(),
                line_num: line.line_num,
                index: m.start(),
                groups,
            }));
        }
    }
    Ok(Value::Array(hits))
}

fn eval_match(
    of: &LCTerm,
    pattern: &LCTerm,
    group: &LCTerm,
    env: &Env,
    ctx: &EvalCtx,
) -> Result<Value, DslError> {
    let Some(s) = eval(of, env, ctx)?.coerce_str() else {
        return Ok(Value::Null);
    };
    let Some(pat) = eval(pattern, env, ctx)?.coerce_str() else {
        return Ok(Value::Null);
    };
    let group_idx = eval(group, env, ctx)?.as_f64().unwrap_or(0.0) as usize;
    let re = regex::Regex::new(&pat).map_err(|e| DslError::Syntax(format!("invalid pattern: {e}")))?;
    match re.captures(&s) {
        Some(caps) => match caps.get(group_idx) {
            Some(m) => Ok(Value::Str(m.as_str().to_string())),
            None => Ok(Value::Null),
        },
        None => Ok(Value::Null),
    }
}

fn eval_replace(of: &LCTerm, from: &LCTerm, to: &LCTerm, env: &Env, ctx: &EvalCtx) -> Result<Value, DslError> {
    let Some(s) = eval(of, env, ctx)?.coerce_str() else {
        return Ok(Value::Null);
    };
    let Some(from_s) = eval(from, env, ctx)?.coerce_str() else {
        return Ok(Value::Null);
    };
    let to_s = eval(to, env, ctx)?.coerce_str().unwrap_or_default();
    Ok(Value::Str(s.replace(from_s.as_str(), &to_s)))
}

fn eval_split(of: &LCTerm, delim: &LCTerm, index: &LCTerm, env: &Env, ctx: &EvalCtx) -> Result<Value, DslError> {
    let Some(s) = eval(of, env, ctx)?.coerce_str() else {
        return Ok(Value::Null);
    };
    let Some(delim_s) = eval(delim, env, ctx)?.coerce_str() else {
        return Ok(Value::Null);
    };
    let idx = eval(index, env, ctx)?.as_f64().unwrap_or(0.0) as usize;
    match s.split(delim_s.as_str()).nth(idx) {
        Some(piece) => Ok(Value::Str(piece.to_string())),
        None => Ok(Value::Null),
    }
}

fn eval_parse_int(of: &LCTerm, env: &Env, ctx: &EvalCtx) -> Result<Value, DslError> {
    let Some(s) = eval(of, env, ctx)?.coerce_str() else {
        return Ok(Value::Null);
    };
    Ok(parse_leading_int(&s).map(Value::Num).unwrap_or(Value::Null))
}

fn eval_parse_float(of: &LCTerm, env: &Env, ctx: &EvalCtx) -> Result<Value, DslError> {
    let Some(s) = eval(of, env, ctx)?.coerce_str() else {
        return Ok(Value::Null);
    };
    Ok(parse_leading_float(&s).map(Value::Num).unwrap_or(Value::Null))
}

fn eval_classify(
    value: &LCTerm,
    cases: &[(String, LCTerm)],
    default: &LCTerm,
    env: &Env,
    ctx: &EvalCtx,
) -> Result<Value, DslError> {
    let subject = eval(value, env, ctx)?.coerce_str().unwrap_or_default();
    for (pattern, result) in cases {
        if subject.contains(pattern.as_str()) {
            return eval(result, env, ctx);
        }
    }
    eval(default, env, ctx)
}

fn eval_app(head: &LCTerm, args: &[LCTerm], env: &Env, ctx: &EvalCtx) -> Result<Value, DslError> {
    if let LCTerm::Var(name) = head {
        match name.as_str() {
            "filter" => return eval_filter(args, env, ctx),
            "map" => return eval_map(args, env, ctx),
            "count" => return eval_count(args, env, ctx),
            _ => {}
        }
    }
    let func = eval(head, env, ctx)?;
    let Value::Closure(closure) = func else {
        return Err(DslError::Runtime("application target is not callable".into()));
    };
    let arg_values: Vec<Value> = args
        .iter()
        .map(|a| eval(a, env, ctx))
        .collect::<Result<_, _>>()?;
    apply_closure(&closure, arg_values, ctx)
}

fn apply_closure(closure: &super::term::Closure, args: Vec<Value>, ctx: &EvalCtx) -> Result<Value, DslError> {
    if args.len() != closure.params.len() {
        return Err(DslError::Runtime(format!(
            "lambda expects {} argument(s), got {}",
            closure.params.len(),
            args.len()
        )));
    }
    let mut call_env = closure.env.clone();
    for (param, arg) in closure.params.iter().zip(args) {
        call_env = call_env.extend(param.clone(), arg);
    }
    eval(&closure.body, &call_env, ctx)
}

fn eval_filter(args: &[LCTerm], env: &Env, ctx: &EvalCtx) -> Result<Value, DslError> {
    let (items, closure) = eval_collection_and_predicate("filter", args, env, ctx)?;
    let mut out = Vec::new();
    for item in items {
        let keep = apply_closure(&closure, vec![item.clone()], ctx)
            .map(|v| v.is_truthy())
            .unwrap_or(false);
        if keep {
            out.push(item);
        }
    }
    Ok(Value::Array(out))
}

fn eval_map(args: &[LCTerm], env: &Env, ctx: &EvalCtx) -> Result<Value, DslError> {
    let (items, closure) = eval_collection_and_predicate("map", args, env, ctx)?;
    let out = items
        .into_iter()
        .map(|item| apply_closure(&closure, vec![item], ctx).unwrap_or(Value::Null))
        .collect();
    Ok(Value::Array(out))
}

fn eval_count(args: &[LCTerm], env: &Env, ctx: &EvalCtx) -> Result<Value, DslError> {
    if args.len() != 1 {
        return Err(DslError::Runtime("count expects exactly one argument".into()));
    }
    match eval(&args[0], env, ctx)? {
        Value::Array(items) => Ok(Value::Num(items.len() as f64)),
        other => Err(DslError::Runtime(format!(
            "count expects a collection, got {other:?}"
        ))),
    }
}

fn eval_collection_and_predicate(
    name: &str,
    args: &[LCTerm],
    env: &Env,
    ctx: &EvalCtx,
) -> Result<(Vec<Value>, std::rc::Rc<super::term::Closure>), DslError> {
    if args.len() != 2 {
        return Err(DslError::Runtime(format!("{name} expects exactly two arguments")));
    }
    let items = match eval(&args[0], env, ctx)? {
        Value::Array(items) => items,
        other => return Err(DslError::Runtime(format!("{name} expects a collection, got {other:?}"))),
    };
    let closure = match eval(&args[1], env, ctx)? {
        Value::Closure(c) => c,
        other => return Err(DslError::Runtime(format!("{name} expects a lambda, got {other:?}"))),
    };
    Ok((items, closure))
}

fn eval_constrained(op: ConstraintOp, inner: &LCTerm, env: &Env, ctx: &EvalCtx) -> Result<Value, DslError> {
    match op {
        ConstraintOp::AlgebraicSimplify => {
            let simplified = simplify(inner);
            ctx.record(format!("algebraic-simplify: {:?} -> {:?}", inner, simplified));
            eval(&simplified, env, ctx)
        }
        ConstraintOp::NullGuard => {
            // `if(cond=t, then=t, else=null)`: gate on the subterm's
            // truthiness, not just on whether it errored.
            ctx.record("null-guard applied".to_string());
            match eval(inner, env, ctx) {
                Ok(v) => {
                    if v.is_truthy() {
                        Ok(v)
                    } else {
                        Ok(Value::Null)
                    }
                }
                Err(_) => Ok(Value::Null),
            }
        }
        ConstraintOp::ReservedNoOp => {
            ctx.record("reserved-no-op applied".to_string());
            eval(inner, env, ctx)
        }
    }
}

/// Rewrites algebraic identities before evaluation: `replace(x, a, a)`
/// collapses to `x`, and an `if` with a literal boolean condition
/// collapses to whichever branch is statically reachable.
fn simplify(term: &LCTerm) -> LCTerm {
    match term {
        LCTerm::Input | LCTerm::Lit(_) | LCTerm::Var(_) => term.clone(),
        LCTerm::Grep(t) => LCTerm::Grep(Box::new(simplify(t))),
        LCTerm::Replace(of, from, to) => {
            let of2 = simplify(of);
            let from2 = simplify(from);
            let to2 = simplify(to);
            if let (LCTerm::Lit(Value::Str(a)), LCTerm::Lit(Value::Str(b))) = (&from2, &to2) {
                if a == b {
                    return of2;
                }
            }
            LCTerm::Replace(Box::new(of2), Box::new(from2), Box::new(to2))
        }
        LCTerm::Match(of, pattern, group) => LCTerm::Match(
            Box::new(simplify(of)),
            Box::new(simplify(pattern)),
            Box::new(simplify(group)),
        ),
        LCTerm::Split(of, delim, index) => LCTerm::Split(
            Box::new(simplify(of)),
            Box::new(simplify(delim)),
            Box::new(simplify(index)),
        ),
        LCTerm::ParseInt(t) => LCTerm::ParseInt(Box::new(simplify(t))),
        LCTerm::ParseFloat(t) => LCTerm::ParseFloat(Box::new(simplify(t))),
        LCTerm::If(cond, then, els) => {
            let cond2 = simplify(cond);
            let then2 = simplify(then);
            let els2 = simplify(els);
            match &cond2 {
                LCTerm::Lit(Value::Bool(true)) => then2,
                LCTerm::Lit(Value::Bool(false)) => els2,
                _ => LCTerm::If(Box::new(cond2), Box::new(then2), Box::new(els2)),
            }
        }
        LCTerm::Classify(value, cases, default) => LCTerm::Classify(
            Box::new(simplify(value)),
            cases
                .iter()
                .map(|(p, r)| (p.clone(), simplify(r)))
                .collect(),
            Box::new(simplify(default)),
        ),
        LCTerm::App(f, args) => LCTerm::App(
            Box::new(simplify(f)),
            args.iter().map(simplify).collect(),
        ),
        LCTerm::Lambda(params, body) => LCTerm::Lambda(params.clone(), Box::new(simplify(body))),
        LCTerm::Constrained(op, t) => LCTerm::Constrained(*op, Box::new(simplify(t))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Elem;

    fn fixture(text: &str) -> (LineStore, HandleRegistry, Bindings) {
        let mut ls = LineStore::new();
        ls.load(text);
        (ls, HandleRegistry::new(), Bindings::new())
    }

    #[test]
    fn grep_finds_matching_lines_case_insensitively() {
        let (ls, reg, binds) = fixture("2024-01-01 ERROR timeout\n2024-01-02 INFO ok\n2024-01-03 error retry");
        let ctx = EvalCtx::new(&ls, &reg, &binds);
        let term = LCTerm::Grep(Box::new(LCTerm::Lit(Value::Str("error".into()))));
        let v = eval(&term, &Env::Empty, &ctx).unwrap();
        match v {
            Value::Array(items) => assert_eq!(items.len(), 2),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn filter_keeps_only_lines_whose_full_text_matches_pattern() {
        let (ls, mut reg, mut binds) = fixture("ERROR timeout\nERROR disk full\nINFO ok");
        let grep_ctx = EvalCtx::new(&ls, &reg, &binds);
        let grepped = eval(
            &LCTerm::Grep(Box::new(LCTerm::Lit(Value::Str("ERROR".into())))),
            &Env::Empty,
            &grep_ctx,
        )
        .unwrap();
        let Value::Array(items) = grepped else { panic!() };
        let elems: Vec<Elem> = items
            .iter()
            .map(|v| match v {
                Value::Hit(h) => Elem::Str(h.line.clone()),
                _ => unreachable!(),
            })
            .collect();
        let handle = reg.create(elems, "array");
        binds.set_results(&handle);

        let ctx = EvalCtx::new(&ls, &reg, &binds);
        let filter_term = LCTerm::App(
            Box::new(LCTerm::Var("filter".into())),
            vec![
                LCTerm::Var("RESULTS".into()),
                LCTerm::Lambda(
                    vec!["x".into()],
                    Box::new(LCTerm::Match(
                        Box::new(LCTerm::Var("x".into())),
                        Box::new(LCTerm::Lit(Value::Str("timeout".into()))),
                        Box::new(LCTerm::Lit(Value::Num(0.0))),
                    )),
                ),
            ],
        );
        let result = eval(&filter_term, &Env::Empty, &ctx).unwrap();
        let Value::Array(kept) = result else { panic!() };
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn unbound_variable_raises_dsl_error() {
        let (ls, reg, binds) = fixture("a\nb");
        let ctx = EvalCtx::new(&ls, &reg, &binds);
        let err = eval(&LCTerm::Var("NOPE".into()), &Env::Empty, &ctx).unwrap_err();
        assert!(matches!(err, DslError::UnboundVariable(_)));
    }

    #[test]
    fn null_guard_turns_runtime_errors_into_null() {
        let (ls, reg, binds) = fixture("a\nb");
        let ctx = EvalCtx::new(&ls, &reg, &binds);
        let term = LCTerm::Constrained(
            ConstraintOp::NullGuard,
            Box::new(LCTerm::Var("UNBOUND".into())),
        );
        let v = eval(&term, &Env::Empty, &ctx).unwrap();
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn null_guard_turns_a_falsey_success_into_null_too() {
        let (ls, reg, binds) = fixture("a\nb");
        let ctx = EvalCtx::new(&ls, &reg, &binds);
        let term = LCTerm::Constrained(
            ConstraintOp::NullGuard,
            Box::new(LCTerm::Lit(Value::Str(String::new()))),
        );
        let v = eval(&term, &Env::Empty, &ctx).unwrap();
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn null_guard_passes_a_truthy_success_through() {
        let (ls, reg, binds) = fixture("a\nb");
        let ctx = EvalCtx::new(&ls, &reg, &binds);
        let term = LCTerm::Constrained(
            ConstraintOp::NullGuard,
            Box::new(LCTerm::Lit(Value::Num(3.0))),
        );
        let v = eval(&term, &Env::Empty, &ctx).unwrap();
        assert_eq!(v, Value::Num(3.0));
    }

    #[test]
    fn algebraic_simplify_collapses_identity_replace() {
        let (ls, reg, binds) = fixture("hello world");
        let ctx = EvalCtx::new(&ls, &reg, &binds);
        let term = LCTerm::Constrained(
            ConstraintOp::AlgebraicSimplify,
            Box::new(LCTerm::Replace(
                Box::new(LCTerm::Input),
                Box::new(LCTerm::Lit(Value::Str("x".into()))),
                Box::new(LCTerm::Lit(Value::Str("x".into()))),
            )),
        );
        let v = eval(&term, &Env::Empty, &ctx).unwrap();
        assert_eq!(v, Value::Str("hello world".into()));
        assert_eq!(ctx.log().len(), 1);
    }

    #[test]
    fn count_reports_collection_length() {
        let (ls, mut reg, mut binds) = fixture("a\nb\nc");
        let handle = reg.create(
            vec![Elem::Str("x".into()), Elem::Str("y".into())],
            "array",
        );
        binds.set_results(&handle);
        let ctx = EvalCtx::new(&ls, &reg, &binds);
        let term = LCTerm::App(
            Box::new(LCTerm::Var("count".into())),
            vec![LCTerm::Var("RESULTS".into())],
        );
        assert_eq!(eval(&term, &Env::Empty, &ctx).unwrap(), Value::Num(2.0));
    }
}
