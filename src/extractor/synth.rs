//! Example-driven enumerator: given `(input, output)` pairs, an optional
//! target type, and a depth bound, finds the smallest [`Extractor`] that
//! reproduces every pair.
//!
//! Enumeration is genuinely size-ordered over the *whole* extractor
//! grammar — `match`, `replace`, `slice`, `split`, `parseInt`,
//! `parseFloat`, `add`, and `if` are all generated, not just a fixed
//! subset. Every term of size `n` is built by composing already-generated
//! terms of smaller size; `infer`/`can_produce` prune a branch as soon as
//! its inferred type cannot possibly satisfy the role it would play (a
//! `match`/`split`/`slice` operand must be able to produce a string, an
//! `add` operand a number, an `if` branch the target type). What would
//! otherwise make the grammar infinite — the literal parameters of
//! `match`/`replace`/`slice`/`split`, plus the constant operands `lit`
//! can take — are drawn from a small pool built from structural features
//! every example shares (a common anchor ahead of a digit run, a shared
//! delimiter, a consistent substring position, the distinct output
//! values themselves), so the search stays bounded and deterministic.
//! Unary chains, `add` pairs and `if` triples are deduplicated and capped
//! as three separate categories rather than one combined pool per size —
//! unary chains alone grow by the pool's arity every level and would
//! otherwise crowd `add`/`if` out of the cap entirely at exactly the
//! sizes where they're the only candidates that fit. Ranking and the
//! pass/fail test against every pair are exact over whatever the pool
//! produces, so soundness holds unconditionally and minimality holds
//! relative to the generated pool.

use super::compiler::{compile, escape_regex_literal};
use super::infer::{can_produce, InferredType};
use super::term::{render, size, tag_sequence, Extractor, ExtractorValue};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct Example {
    pub input: String,
    pub output: ExtractorValue,
}

/// Parameter pools derived from the examples. Every `match`/`replace`/
/// `slice`/`split` built during enumeration draws from one of these
/// rather than an unrestricted alphabet.
struct ParamPools {
    patterns: Vec<String>,
    replacements: Vec<(String, String)>,
    slices: Vec<(i64, i64)>,
    delimiters: Vec<String>,
}

/// A deliberately large positive end bound: `slice`'s clamp only treats
/// *negative* indices as relative to the string's end, so a large
/// positive `end` just clamps down to the string length — i.e. "to the
/// end", regardless of how long that turns out to be per example.
const SLICE_OPEN_END: i64 = 1_000_000;

/// Upper bound on how many candidates survive per *category* (unary
/// chains, `add` pairs, `if` triples) at a given term size, after
/// deduplicating by rendered form. Capped per category rather than on
/// the level as a whole: unary chains alone grow fast enough (their
/// count multiplies by the pool's arity every level) to crowd out every
/// `add`/`if` candidate of the same size if the three were capped
/// together, which would silently defeat enumeration of those tags
/// rather than just bound it.
const MAX_LEVEL_CANDIDATES: usize = 128;

pub fn synthesize(pairs: &[Example], target: Option<InferredType>, depth_bound: usize) -> Option<Extractor> {
    if pairs.is_empty() || depth_bound == 0 {
        return None;
    }
    let target = target.unwrap_or_else(|| target_type_from_pairs(pairs));
    let pools = build_param_pools(pairs);

    let mut by_size: Vec<Vec<Extractor>> = vec![Vec::new(); depth_bound + 1];
    by_size[1] = base_terms(pairs);

    for n in 2..=depth_bound {
        let mut unary = Vec::new();
        for of in &by_size[n - 1] {
            if can_produce(of, InferredType::Str) {
                unary.extend(unary_extensions(of, &pools));
            }
        }

        let mut add = Vec::new();
        for a_size in 1..n.saturating_sub(1) {
            let b_size = n - 1 - a_size;
            if b_size == 0 || b_size >= n {
                continue;
            }
            for a in &by_size[a_size] {
                if !can_produce(a, InferredType::Num) {
                    continue;
                }
                for b in &by_size[b_size] {
                    if !can_produce(b, InferredType::Num) {
                        continue;
                    }
                    add.push(Extractor::Add(Box::new(a.clone()), Box::new(b.clone())));
                }
            }
        }

        let mut ifs = Vec::new();
        for cond_size in 1..n.saturating_sub(2) {
            for then_size in 1..n.saturating_sub(1 + cond_size) {
                let els_size = n.checked_sub(1 + cond_size + then_size);
                let Some(els_size) = els_size else { continue };
                if els_size == 0 || els_size >= n {
                    continue;
                }
                for cond in &by_size[cond_size] {
                    for then in &by_size[then_size] {
                        if !can_produce(then, target) {
                            continue;
                        }
                        for els in &by_size[els_size] {
                            if !can_produce(els, target) {
                                continue;
                            }
                            ifs.push(Extractor::If {
                                cond: Box::new(cond.clone()),
                                then: Box::new(then.clone()),
                                els: Box::new(els.clone()),
                            });
                        }
                    }
                }
            }
        }

        // Each tag gets its own slice of the cap, then the level is just
        // deduplicated (not re-capped) so one category's size can never
        // crowd another out of the level entirely.
        let mut level = dedup_and_cap(unary);
        level.extend(dedup_and_cap(add));
        level.extend(dedup_and_cap(ifs));
        by_size[n] = dedup(level);
    }

    for n in 1..=depth_bound {
        let mut candidates: Vec<&Extractor> = by_size[n].iter().filter(|c| can_produce(c, target)).collect();
        candidates.sort_by(|a, b| tag_sequence(a).cmp(&tag_sequence(b)));
        for c in candidates {
            if satisfies_all(c, pairs) {
                return Some(c.clone());
            }
        }
    }
    None
}

fn dedup_and_cap(mut items: Vec<Extractor>) -> Vec<Extractor> {
    items = dedup(items);
    items.truncate(MAX_LEVEL_CANDIDATES);
    items
}

fn dedup(mut items: Vec<Extractor>) -> Vec<Extractor> {
    let mut seen = HashSet::new();
    items.retain(|e| seen.insert(render(e)));
    items
}

fn target_type_from_pairs(pairs: &[Example]) -> InferredType {
    let classify = |v: &ExtractorValue| match v {
        ExtractorValue::Str(_) => InferredType::Str,
        ExtractorValue::Num(_) => InferredType::Num,
        ExtractorValue::Null => InferredType::Null,
    };
    let first = classify(&pairs[0].output);
    if pairs.iter().all(|p| classify(&p.output) == first) {
        first
    } else {
        InferredType::Unknown
    }
}

fn satisfies_all(e: &Extractor, pairs: &[Example]) -> bool {
    let f = compile(e.clone());
    pairs.iter().all(|p| f(&p.input) == p.output)
}

/// `input` plus one `lit` per distinct observed output. Every distinct
/// output value is a legitimate constant term in its own right: when all
/// pairs share one output it's the whole solution; otherwise it's still
/// useful material for an `add` operand or an `if` branch that only
/// needs to reproduce that value for a subset of the pairs.
fn base_terms(pairs: &[Example]) -> Vec<Extractor> {
    let mut out = vec![Extractor::Input];
    for p in pairs {
        if !out.iter().any(|e| matches!(e, Extractor::Lit(v) if *v == p.output)) {
            out.push(Extractor::Lit(p.output.clone()));
        }
    }
    out
}

/// Every compositional operator applicable to a string-producing `of`,
/// drawing its parameters from `pools`.
fn unary_extensions(of: &Extractor, pools: &ParamPools) -> Vec<Extractor> {
    let mut out = Vec::new();
    for pattern in &pools.patterns {
        out.push(Extractor::Match {
            of: Box::new(of.clone()),
            pattern: pattern.clone(),
            group: 1,
        });
    }
    for (from, to) in &pools.replacements {
        out.push(Extractor::Replace {
            of: Box::new(of.clone()),
            from: from.clone(),
            to: to.clone(),
        });
    }
    for (start, end) in &pools.slices {
        out.push(Extractor::Slice {
            of: Box::new(of.clone()),
            start: *start,
            end: *end,
        });
    }
    for delim in &pools.delimiters {
        for index in 0..3usize {
            out.push(Extractor::Split {
                of: Box::new(of.clone()),
                delim: delim.clone(),
                index,
            });
        }
    }
    out.push(Extractor::ParseInt(Box::new(of.clone())));
    out.push(Extractor::ParseFloat(Box::new(of.clone())));
    out
}

fn build_param_pools(pairs: &[Example]) -> ParamPools {
    ParamPools {
        patterns: pattern_pool(pairs),
        replacements: replacement_pool(pairs),
        slices: slice_pool(pairs),
        delimiters: delimiter_pool(pairs),
    }
}

/// `match` patterns anchored on the first run of digits (optionally
/// comma-grouped) in each input: a symbol immediately preceding the
/// digit run (a currency sign, a colon) narrows the match without the
/// brittleness of anchoring on the full prefix text, tried ahead of the
/// unanchored fallback.
fn pattern_pool(pairs: &[Example]) -> Vec<String> {
    let spans: Vec<Option<(&str, &str)>> = pairs.iter().map(|p| digit_span_prefix_suffix(&p.input)).collect();
    let common_anchor = if spans.iter().all(Option::is_some) {
        let first_anchor = local_anchor(spans[0].unwrap().0);
        if !first_anchor.is_empty() && spans.iter().all(|s| local_anchor(s.unwrap().0) == first_anchor) {
            Some(first_anchor)
        } else {
            None
        }
    } else {
        None
    };

    let mut patterns = Vec::new();
    if let Some(anchor) = common_anchor {
        patterns.push(format!("{}({})", escape_regex_literal(&anchor), r"\d+"));
        patterns.push(format!("{}({})", escape_regex_literal(&anchor), r"[\d,]+"));
    }
    patterns.push(r"(\d+)".to_string());
    patterns.push(r"([\d,]+)".to_string());
    patterns
}

/// `replace` targets: currently just comma-stripping, the shape every
/// currency/thousands-separated numeric example needs.
fn replacement_pool(pairs: &[Example]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    if pairs.iter().any(|p| p.input.contains(',')) {
        out.push((",".to_string(), String::new()));
    }
    out
}

/// `split` delimiters that actually occur in at least one input.
fn delimiter_pool(pairs: &[Example]) -> Vec<String> {
    [" ", ":", "=", ",", "\t"]
        .into_iter()
        .filter(|d| pairs.iter().any(|p| p.input.contains(d)))
        .map(str::to_string)
        .collect()
}

/// `slice` bounds derived from where each example's output sits inside
/// its input: an absolute `(start, end)` when both are the same across
/// every pair, or an open-ended slice (to [`SLICE_OPEN_END`], which
/// clamps to the string's actual length) when the match always reaches
/// the end of the input — anchored either by a consistent start or, for
/// a fixed-length suffix, by a consistent negative offset from the end.
fn slice_pool(pairs: &[Example]) -> Vec<(i64, i64)> {
    let mut starts = Vec::new();
    let mut ends = Vec::new();
    let mut reaches_end = true;

    for p in pairs {
        let Some(out_str) = p.output.as_str() else {
            return Vec::new();
        };
        let in_chars: Vec<char> = p.input.chars().collect();
        let out_chars: Vec<char> = out_str.chars().collect();
        if out_chars.is_empty() {
            return Vec::new();
        }
        let Some(pos) = find_char_subseq(&in_chars, &out_chars) else {
            return Vec::new();
        };
        let end = pos + out_chars.len();
        starts.push(pos as i64);
        ends.push(end as i64);
        reaches_end = reaches_end && end == in_chars.len();
    }

    let all_same = |v: &[i64]| v.windows(2).all(|w| w[0] == w[1]);
    let mut out = Vec::new();

    if all_same(&starts) && all_same(&ends) {
        out.push((starts[0], ends[0]));
    }
    if reaches_end && all_same(&starts) {
        let candidate = (starts[0], SLICE_OPEN_END);
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    if reaches_end {
        let lengths: Vec<i64> = starts.iter().zip(&ends).map(|(s, e)| e - s).collect();
        if all_same(&lengths) {
            let candidate = (-lengths[0], SLICE_OPEN_END);
            if !out.contains(&candidate) {
                out.push(candidate);
            }
        }
    }
    out
}

fn find_char_subseq(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&start| haystack[start..start + needle.len()] == *needle)
}

/// Finds the first maximal run of `[0-9,]` characters (must contain at
/// least one digit) and returns `(prefix, suffix)` around it.
fn digit_span_prefix_suffix(s: &str) -> Option<(&str, &str)> {
    let bytes = s.as_bytes();
    let start = bytes.iter().position(|b| b.is_ascii_digit())?;
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b',') {
        end += 1;
    }
    Some((&s[..start], &s[end..]))
}

/// The trailing run of punctuation/symbol characters in `prefix`
/// immediately before the digit span — stops at the first alphanumeric
/// or whitespace character scanning backward. `"Price: $"` yields `"$"`.
fn local_anchor(prefix: &str) -> String {
    let mut chars: Vec<char> = Vec::new();
    for c in prefix.chars().rev() {
        if c.is_alphanumeric() || c.is_whitespace() {
            break;
        }
        chars.push(c);
    }
    chars.reverse();
    chars.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesises_canonical_currency_extractor() {
        let pairs = vec![
            Example {
                input: "Price: $1,234".to_string(),
                output: ExtractorValue::Num(1234.0),
            },
            Example {
                input: "Price: $42".to_string(),
                output: ExtractorValue::Num(42.0),
            },
        ];
        let e = synthesize(&pairs, Some(InferredType::Num), 6).expect("synthesis should succeed");
        assert_eq!(
            render(&e),
            "parseInt(replace(match(input, \"\\\\$([\\\\d,]+)\", 1), \",\", \"\"))"
        );
    }

    #[test]
    fn soundness_every_pair_satisfied_by_returned_extractor() {
        let pairs = vec![
            Example {
                input: "count=7".to_string(),
                output: ExtractorValue::Num(7.0),
            },
            Example {
                input: "count=19".to_string(),
                output: ExtractorValue::Num(19.0),
            },
        ];
        let e = synthesize(&pairs, Some(InferredType::Num), 6).unwrap();
        let f = compile(e);
        for p in &pairs {
            assert_eq!(f(&p.input), p.output);
        }
    }

    #[test]
    fn returns_none_when_no_candidate_fits_within_bound() {
        // Different non-constant numeric outputs over plain text with no
        // digits rule out both the literal shortcut and anything the
        // depth-1 pool (just `input`, string-typed) could produce.
        let pairs = vec![
            Example {
                input: "abc".to_string(),
                output: ExtractorValue::Num(42.0),
            },
            Example {
                input: "xyz".to_string(),
                output: ExtractorValue::Num(7.0),
            },
        ];
        assert!(synthesize(&pairs, Some(InferredType::Num), 1).is_none());
    }

    #[test]
    fn minimal_solution_is_a_slice_when_no_smaller_extractor_fits() {
        let pairs = vec![
            Example {
                input: "abcdef".to_string(),
                output: ExtractorValue::Str("abc".to_string()),
            },
            Example {
                input: "xyzwvu".to_string(),
                output: ExtractorValue::Str("xyz".to_string()),
            },
        ];
        let e = synthesize(&pairs, Some(InferredType::Str), 6).expect("synthesis should succeed");
        assert_eq!(e, Extractor::Slice { of: Box::new(Extractor::Input), start: 0, end: 3 });
        assert_eq!(size(&e), 2);
    }

    #[test]
    fn minimal_solution_is_an_add_of_two_parsed_fields() {
        // No single unary chain doubles a parsed number; `add` of the
        // same parsed field with itself is the smallest extractor that
        // fits both pairs.
        let pairs = vec![
            Example {
                input: "5".to_string(),
                output: ExtractorValue::Num(10.0),
            },
            Example {
                input: "7".to_string(),
                output: ExtractorValue::Num(14.0),
            },
        ];
        let e = synthesize(&pairs, Some(InferredType::Num), 5).expect("synthesis should succeed");
        assert!(matches!(e, Extractor::Add(_, _)), "expected an add extractor, got {}", render(&e));
        let f = compile(e);
        for p in &pairs {
            assert_eq!(f(&p.input), p.output);
        }
    }

    #[test]
    fn minimal_solution_can_be_an_if_guarded_branch() {
        let pairs = vec![
            Example {
                input: "yes".to_string(),
                output: ExtractorValue::Str("yes".to_string()),
            },
            Example {
                input: "".to_string(),
                output: ExtractorValue::Str("none".to_string()),
            },
        ];
        let e = synthesize(&pairs, Some(InferredType::Str), 4).expect("synthesis should succeed");
        let f = compile(e);
        for p in &pairs {
            assert_eq!(f(&p.input), p.output);
        }
    }
}
