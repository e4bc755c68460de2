//! Syntactic whitelist/deny-list check run over a sandbox fragment before
//! it is handed to the JS runtime. Two independent passes: a host-escape
//! deny-list that always applies, and an optional "synthesis-first" pass
//! that additionally rejects hand-rolled string parsing so the model is
//! pushed toward `synthesize_extractor`/`synthesize_regex` instead.

use crate::predicate::{contains_word, DENIED_IDENTS};

/// Carries a human-readable reason; the orchestrator feeds this straight
/// back to the adapter as error feedback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorError(pub String);

impl std::fmt::Display for ValidatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ValidatorError {}

const BANNED_CALLS: &[&str] = &[
    "match", "replace", "split", "filter", "map", "reduce", "find", "some", "every",
];

/// Method names on a `hit` object (as produced by `grep`) that look like
/// the banned calls above but are plain property reads, not parsing.
const HIT_PROPERTY_EXEMPTIONS: &[&str] = &["match", "index", "line", "groups"];

pub fn validate(source: &str, synthesis_first: bool) -> Result<(), ValidatorError> {
    check_host_escape(source)?;
    if synthesis_first {
        check_synthesis_first(source)?;
    }
    Ok(())
}

fn check_host_escape(source: &str) -> Result<(), ValidatorError> {
    let lower = source.to_ascii_lowercase();
    for ident in DENIED_IDENTS {
        if contains_word(&lower, ident) {
            return Err(ValidatorError(format!(
                "reference to host-environment name '{ident}' is not allowed"
            )));
        }
    }
    if source.contains("=>") && source.contains("Function(") {
        return Err(ValidatorError(
            "dynamic Function construction is not allowed".into(),
        ));
    }
    Ok(())
}

fn check_synthesis_first(source: &str) -> Result<(), ValidatorError> {
    if let Some(span) = find_regex_literal(source) {
        return Err(ValidatorError(format!(
            "regex literal '{span}' is not allowed under the synthesis-first adapter; use synthesize_regex"
        )));
    }
    for token in tokenize_code(source) {
        if let CodeToken::MethodCall(name) = token {
            if BANNED_CALLS.contains(&name.as_str()) {
                return Err(ValidatorError(format!(
                    "call to '.{name}(' is not allowed under the synthesis-first adapter; use synthesize_extractor"
                )));
            }
        }
    }
    Ok(())
}

enum CodeToken {
    MethodCall(String),
    Other,
}

/// Scans source with string/template literals and comments stripped,
/// yielding one token per `.name(` call site it finds. Property reads on
/// the exempted hit-object names are skipped rather than flagged.
fn tokenize_code(source: &str) -> Vec<CodeToken> {
    let mut tokens = Vec::new();
    let bytes = source.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'"' | b'\'' | b'`' => {
                i = skip_literal(bytes, i, c);
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            b'.' => {
                let name_start = i + 1;
                let mut j = name_start;
                while j < bytes.len() && is_ident_continue(bytes[j]) {
                    j += 1;
                }
                if j > name_start {
                    let name = &source[name_start..j];
                    let mut k = j;
                    while k < bytes.len() && (bytes[k] as char).is_whitespace() {
                        k += 1;
                    }
                    let is_call = bytes.get(k) == Some(&b'(');
                    let receiver_is_hit_object = receiver_ends_with_hit(source, i);
                    if is_call
                        && !(receiver_is_hit_object && HIT_PROPERTY_EXEMPTIONS.contains(&name))
                    {
                        tokens.push(CodeToken::MethodCall(name.to_string()));
                    } else {
                        tokens.push(CodeToken::Other);
                    }
                    i = j;
                    continue;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    tokens
}

/// Crude receiver check: true when the identifier immediately before the
/// `.` being scanned is `hit` or ends in `Hit`/`_hit`.
fn receiver_ends_with_hit(source: &str, dot_pos: usize) -> bool {
    let prefix = &source[..dot_pos];
    let ident_end = prefix.len();
    let mut start = ident_end;
    for (idx, ch) in prefix.char_indices().rev() {
        if is_ident_continue(ch as u32 as u8) || ch == '_' {
            start = idx;
        } else {
            break;
        }
    }
    let ident = &prefix[start..ident_end];
    ident == "hit" || ident.ends_with("Hit") || ident.ends_with("_hit")
}

fn skip_literal(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            return i + 1;
        }
        i += 1;
    }
    i
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Heuristic regex-literal detector: a `/` not preceded by an identifier,
/// number, `)`, or `]` (which would make it division), followed eventually
/// by an unescaped closing `/` and optional flag letters.
fn find_regex_literal(source: &str) -> Option<String> {
    let bytes = source.as_bytes();
    let mut i = 0;
    let mut in_string: Option<u8> = None;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = in_string {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == q {
                in_string = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'"' | b'\'' | b'`' => {
                in_string = Some(c);
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') || bytes.get(i + 1) == Some(&b'*') => {
                // comment, not a literal; skip to avoid false positives
                i += 2;
                while i < bytes.len() && bytes[i] != b'\n' && bytes[i] != b'/' {
                    i += 1;
                }
                i += 1;
            }
            b'/' => {
                let prev_non_space = source[..i].trim_end().chars().last();
                let looks_like_division = matches!(
                    prev_non_space,
                    Some(c) if c.is_ascii_alphanumeric() || c == ')' || c == ']' || c == '_' || c == '$'
                );
                if looks_like_division {
                    i += 1;
                    continue;
                }
                let mut j = i + 1;
                let mut found_close = false;
                while j < bytes.len() {
                    if bytes[j] == b'\\' {
                        j += 2;
                        continue;
                    }
                    if bytes[j] == b'\n' {
                        break;
                    }
                    if bytes[j] == b'/' {
                        found_close = true;
                        break;
                    }
                    j += 1;
                }
                if found_close {
                    let mut k = j + 1;
                    while k < bytes.len() && (bytes[k] as char).is_ascii_alphabetic() {
                        k += 1;
                    }
                    return Some(source[i..k].to_string());
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_host_escape_identifiers() {
        assert!(validate("require('fs').readFileSync('/etc/passwd')", false).is_err());
        assert!(validate("process.exit(1)", false).is_err());
    }

    #[test]
    fn allows_plain_arithmetic_and_console_log() {
        assert!(validate("console.log(1 + 2)", false).is_ok());
    }

    #[test]
    fn synthesis_first_rejects_banned_method_calls() {
        let err = validate("line.match(/total/)", true).unwrap_err();
        assert!(err.0.contains("not allowed"));
    }

    #[test]
    fn synthesis_first_exempts_hit_property_reads() {
        assert!(validate("console.log(hit.match)", true).is_ok());
    }

    #[test]
    fn synthesis_first_rejects_regex_literals() {
        assert!(validate("let re = /foo+/gi;", true).is_err());
    }

    #[test]
    fn division_is_not_mistaken_for_regex_literal() {
        assert!(validate("let x = a / b / c;", true).is_ok());
    }
}
