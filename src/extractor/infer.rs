//! Shallow type inference over [`Extractor`] terms, used by the
//! synthesiser to prune branches that cannot possibly produce the
//! observed output type.

use super::term::{Extractor, ExtractorValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredType {
    Str,
    Num,
    Null,
    Unknown,
}

pub fn infer(e: &Extractor) -> InferredType {
    match e {
        Extractor::Input => InferredType::Str,
        Extractor::Lit(ExtractorValue::Str(_)) => InferredType::Str,
        Extractor::Lit(ExtractorValue::Num(_)) => InferredType::Num,
        Extractor::Lit(ExtractorValue::Null) => InferredType::Null,
        Extractor::Match { .. } => InferredType::Unknown, // string, or null on no-match
        Extractor::Replace { .. } => InferredType::Str,
        Extractor::Slice { .. } => InferredType::Str,
        Extractor::Split { .. } => InferredType::Unknown, // string, or null if missing
        Extractor::ParseInt(_) => InferredType::Unknown, // number, or null on NaN
        Extractor::ParseFloat(_) => InferredType::Unknown,
        Extractor::Add(_, _) => InferredType::Num,
        Extractor::If { then, els, .. } => {
            let (t, e) = (infer(then), infer(els));
            if t == e {
                t
            } else {
                InferredType::Unknown
            }
        }
    }
}

/// True iff `e` can possibly produce a value of type `target`. `Unknown`
/// is treated as "could be anything" so it never prunes a branch, and
/// `Null` is always producible by any tag that documents a null case
/// (`match`, `split`, `parseInt`, `parseFloat`, `if`) since those
/// "unknown" tags subsume it.
pub fn can_produce(e: &Extractor, target: InferredType) -> bool {
    let t = infer(e);
    if t == target || t == InferredType::Unknown {
        return true;
    }
    if target == InferredType::Null {
        return matches!(
            e,
            Extractor::Match { .. }
                | Extractor::Split { .. }
                | Extractor::ParseInt(_)
                | Extractor::ParseFloat(_)
                | Extractor::If { .. }
        );
    }
    false
}
