//! Compiles an [`Extractor`] term into an executable unary function
//! from `string` to `string | number | null`.

use super::term::{Extractor, ExtractorValue};
use regex::Regex;
use std::rc::Rc;

/// Lowers `e` to a closure. Compiling once and calling the closure many
/// times avoids re-walking the term or re-compiling regexes per call.
pub fn compile(e: Extractor) -> impl Fn(&str) -> ExtractorValue {
    let e = Rc::new(e);
    move |s: &str| eval(&e, s)
}

fn eval(e: &Extractor, input: &str) -> ExtractorValue {
    match e {
        Extractor::Input => ExtractorValue::Str(input.to_string()),
        Extractor::Lit(v) => v.clone(),
        Extractor::Match { of, pattern, group } => {
            let base = eval(of, input);
            let Some(s) = base.as_str() else {
                return ExtractorValue::Null;
            };
            let Ok(re) = Regex::new(pattern) else {
                return ExtractorValue::Null;
            };
            match re.captures(s) {
                Some(caps) => match caps.get(*group) {
                    Some(m) => ExtractorValue::Str(m.as_str().to_string()),
                    None => ExtractorValue::Null,
                },
                None => ExtractorValue::Null,
            }
        }
        Extractor::Replace { of, from, to } => {
            let base = eval(of, input);
            match base.as_str() {
                Some(s) => ExtractorValue::Str(s.replace(from.as_str(), to)),
                None => ExtractorValue::Null,
            }
        }
        Extractor::Slice { of, start, end } => {
            let base = eval(of, input);
            let Some(s) = base.as_str() else {
                return ExtractorValue::Null;
            };
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let clamp = |i: i64| -> usize {
                let i = if i < 0 { (len + i).max(0) } else { i };
                i.min(len) as usize
            };
            let (start, end) = (clamp(*start), clamp(*end));
            if start >= end {
                ExtractorValue::Str(String::new())
            } else {
                ExtractorValue::Str(chars[start..end].iter().collect())
            }
        }
        Extractor::Split { of, delim, index } => {
            let base = eval(of, input);
            let Some(s) = base.as_str() else {
                return ExtractorValue::Null;
            };
            match s.split(delim.as_str()).nth(*index) {
                Some(piece) => ExtractorValue::Str(piece.to_string()),
                None => ExtractorValue::Null,
            }
        }
        Extractor::ParseInt(of) => {
            let base = eval(of, input);
            match base.as_str() {
                Some(s) => parse_leading_int(s)
                    .map(ExtractorValue::Num)
                    .unwrap_or(ExtractorValue::Null),
                None => ExtractorValue::Null,
            }
        }
        Extractor::ParseFloat(of) => {
            let base = eval(of, input);
            match base.as_str() {
                Some(s) => parse_leading_float(s)
                    .map(ExtractorValue::Num)
                    .unwrap_or(ExtractorValue::Null),
                None => ExtractorValue::Null,
            }
        }
        Extractor::Add(l, r) => {
            let (lv, rv) = (eval(l, input), eval(r, input));
            match (lv.as_f64(), rv.as_f64()) {
                (Some(a), Some(b)) => ExtractorValue::Num(a + b),
                _ => ExtractorValue::Null,
            }
        }
        Extractor::If { cond, then, els } => {
            if eval(cond, input).is_truthy() {
                eval(then, input)
            } else {
                eval(els, input)
            }
        }
    }
}

/// Mirrors JS `parseInt`: consumes an optional sign then a run of
/// decimal digits from the start of the string; `NaN` (no leading
/// digits) maps to `None`.
pub(crate) fn parse_leading_int(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let mut end = 0;
    let bytes = s.as_bytes();
    let mut idx = 0;
    if idx < bytes.len() && (bytes[idx] == b'-' || bytes[idx] == b'+') {
        idx += 1;
    }
    let digits_start = idx;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    if idx == digits_start {
        return None;
    }
    end = idx;
    s[..end].parse::<i64>().ok().map(|n| n as f64)
}

/// Mirrors JS `parseFloat`: leading sign, digits, optional `.digits`,
/// optional exponent; `NaN` maps to `None`.
pub(crate) fn parse_leading_float(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut idx = 0;
    if idx < bytes.len() && (bytes[idx] == b'-' || bytes[idx] == b'+') {
        idx += 1;
    }
    let mut saw_digit = false;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
        saw_digit = true;
    }
    if idx < bytes.len() && bytes[idx] == b'.' {
        idx += 1;
        while idx < bytes.len() && bytes[idx].is_ascii_digit() {
            idx += 1;
            saw_digit = true;
        }
    }
    if !saw_digit {
        return None;
    }
    if idx < bytes.len() && (bytes[idx] == b'e' || bytes[idx] == b'E') {
        let mut look = idx + 1;
        if look < bytes.len() && (bytes[look] == b'-' || bytes[look] == b'+') {
            look += 1;
        }
        let exp_digits_start = look;
        while look < bytes.len() && bytes[look].is_ascii_digit() {
            look += 1;
        }
        if look > exp_digits_start {
            idx = look;
        }
    }
    s[..idx].parse::<f64>().ok()
}

/// Escapes regex metacharacters in an untrusted literal so it can be
/// embedded inside a generated pattern string without being
/// interpreted as regex syntax.
pub fn escape_regex_literal(s: &str) -> String {
    regex::escape(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::term::Extractor as E;

    #[test]
    fn parse_int_truncates_at_first_non_digit() {
        let f = compile(E::ParseInt(Box::new(E::Input)));
        assert_eq!(f("1,234"), ExtractorValue::Num(1.0));
    }

    #[test]
    fn parse_int_with_no_digits_is_null() {
        let f = compile(E::ParseInt(Box::new(E::Input)));
        assert_eq!(f("abc"), ExtractorValue::Null);
    }

    #[test]
    fn match_returns_capture_group_or_null() {
        let f = compile(E::Match {
            of: Box::new(E::Input),
            pattern: r"\$([\d,]+)".into(),
            group: 1,
        });
        assert_eq!(f("Price: $1,234"), ExtractorValue::Str("1,234".into()));
        assert_eq!(f("no match here"), ExtractorValue::Null);
    }

    #[test]
    fn canonical_currency_pipeline_extracts_integer() {
        let f = compile(E::ParseInt(Box::new(E::Replace {
            of: Box::new(E::Match {
                of: Box::new(E::Input),
                pattern: r"\$([\d,]+)".into(),
                group: 1,
            }),
            from: ",".into(),
            to: "".into(),
        })));
        assert_eq!(f("Price: $1,234"), ExtractorValue::Num(1234.0));
        assert_eq!(f("Price: $42"), ExtractorValue::Num(42.0));
    }

    #[test]
    fn slice_is_half_open_and_clamped() {
        let f = compile(E::Slice {
            of: Box::new(E::Input),
            start: 0,
            end: 100,
        });
        assert_eq!(f("hi"), ExtractorValue::Str("hi".into()));
    }
}
