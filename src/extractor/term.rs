//! The Extractor term language: a narrower sum type than the agent's
//! full DSL, restricted to pure unary string-to-value functions so the
//! synthesiser can enumerate and compile them cheaply.

#[derive(Debug, Clone, PartialEq)]
pub enum Extractor {
    Input,
    Lit(ExtractorValue),
    Match {
        of: Box<Extractor>,
        pattern: String,
        group: usize,
    },
    Replace {
        of: Box<Extractor>,
        from: String,
        to: String,
    },
    Slice {
        of: Box<Extractor>,
        start: i64,
        end: i64,
    },
    Split {
        of: Box<Extractor>,
        delim: String,
        index: usize,
    },
    ParseInt(Box<Extractor>),
    ParseFloat(Box<Extractor>),
    Add(Box<Extractor>, Box<Extractor>),
    If {
        cond: Box<Extractor>,
        then: Box<Extractor>,
        els: Box<Extractor>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractorValue {
    Str(String),
    Num(f64),
    Null,
}

impl ExtractorValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExtractorValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ExtractorValue::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            ExtractorValue::Str(s) => !s.is_empty(),
            ExtractorValue::Num(n) => *n != 0.0,
            ExtractorValue::Null => false,
        }
    }
}

/// Declared order of tags in the grammar (`input | lit | match | replace
/// | slice | split | parseInt | parseFloat | add | if`). The
/// synthesiser's tie-break uses this rank, not alphabetic order — the
/// worked example in the spec (`parseInt` beating `parseFloat` at equal
/// size) only holds under declaration order, since `"parseFloat" <
/// "parseInt"` alphabetically.
pub fn tag_rank(e: &Extractor) -> u8 {
    match e {
        Extractor::Input => 0,
        Extractor::Lit(_) => 1,
        Extractor::Match { .. } => 2,
        Extractor::Replace { .. } => 3,
        Extractor::Slice { .. } => 4,
        Extractor::Split { .. } => 5,
        Extractor::ParseInt(_) => 6,
        Extractor::ParseFloat(_) => 7,
        Extractor::Add(_, _) => 8,
        Extractor::If { .. } => 9,
    }
}

/// Term size: one for the node itself plus the size of every child
/// extractor subterm (string/numeric parameters like `pattern` or
/// `group` don't count).
pub fn size(e: &Extractor) -> usize {
    1 + match e {
        Extractor::Input | Extractor::Lit(_) => 0,
        Extractor::Match { of, .. }
        | Extractor::Replace { of, .. }
        | Extractor::Slice { of, .. }
        | Extractor::Split { of, .. }
        | Extractor::ParseInt(of)
        | Extractor::ParseFloat(of) => size(of),
        Extractor::Add(a, b) => size(a) + size(b),
        Extractor::If { cond, then, els } => size(cond) + size(then) + size(els),
    }
}

/// Preorder sequence of tag ranks, used as the tie-break key once sizes
/// are equal: the smallest-size candidate with the lexicographically
/// earliest tag sequence wins.
pub fn tag_sequence(e: &Extractor) -> Vec<u8> {
    let mut out = vec![tag_rank(e)];
    match e {
        Extractor::Input | Extractor::Lit(_) => {}
        Extractor::Match { of, .. }
        | Extractor::Replace { of, .. }
        | Extractor::Slice { of, .. }
        | Extractor::Split { of, .. }
        | Extractor::ParseInt(of)
        | Extractor::ParseFloat(of) => out.extend(tag_sequence(of)),
        Extractor::Add(a, b) => {
            out.extend(tag_sequence(a));
            out.extend(tag_sequence(b));
        }
        Extractor::If { cond, then, els } => {
            out.extend(tag_sequence(cond));
            out.extend(tag_sequence(then));
            out.extend(tag_sequence(els));
        }
    }
    out
}

/// Escapes backslash, double-quote and control characters so a string
/// can be embedded inside a double-quoted literal in the rendered DSL
/// text produced by [`render`].
fn quote_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

/// Renders an extractor back to its canonical textual DSL form, e.g.
/// `parseInt(replace(match(input, "\$([\d,]+)", 1), ",", ""))`.
pub fn render(e: &Extractor) -> String {
    match e {
        Extractor::Input => "input".to_string(),
        Extractor::Lit(ExtractorValue::Str(s)) => format!("\"{}\"", quote_escape(s)),
        Extractor::Lit(ExtractorValue::Num(n)) => n.to_string(),
        Extractor::Lit(ExtractorValue::Null) => "null".to_string(),
        Extractor::Match { of, pattern, group } => {
            format!("match({}, \"{}\", {})", render(of), quote_escape(pattern), group)
        }
        Extractor::Replace { of, from, to } => format!(
            "replace({}, \"{}\", \"{}\")",
            render(of),
            quote_escape(from),
            quote_escape(to)
        ),
        Extractor::Slice { of, start, end } => {
            format!("slice({}, {}, {})", render(of), start, end)
        }
        Extractor::Split { of, delim, index } => {
            format!("split({}, \"{}\", {})", render(of), quote_escape(delim), index)
        }
        Extractor::ParseInt(of) => format!("parseInt({})", render(of)),
        Extractor::ParseFloat(of) => format!("parseFloat({})", render(of)),
        Extractor::Add(a, b) => format!("add({}, {})", render(a), render(b)),
        Extractor::If { cond, then, els } => {
            format!("if({}, {}, {})", render(cond), render(then), render(els))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_counts_nodes_not_parameters() {
        let e = Extractor::ParseInt(Box::new(Extractor::Match {
            of: Box::new(Extractor::Input),
            pattern: "\\d+".into(),
            group: 0,
        }));
        assert_eq!(size(&e), 3);
    }

    #[test]
    fn parse_int_outranks_parse_float_at_equal_size() {
        let a = Extractor::ParseInt(Box::new(Extractor::Input));
        let b = Extractor::ParseFloat(Box::new(Extractor::Input));
        assert!(tag_sequence(&a) < tag_sequence(&b));
    }

    #[test]
    fn render_escapes_quotes_in_string_literals() {
        let e = Extractor::Replace {
            of: Box::new(Extractor::Input),
            from: "\"q\"".into(),
            to: "x".into(),
        };
        assert_eq!(render(&e), "replace(input, \"\\\"q\\\"\", \"x\")");
    }
}
