//! The program-synthesis subsystem: the Extractor term language, its
//! compiler, a shallow type inferencer used for branch pruning, and an
//! example-driven enumerative synthesiser.

pub mod compiler;
pub mod infer;
pub mod synth;
pub mod term;

pub use compiler::compile;
pub use infer::{can_produce, infer, InferredType};
pub use synth::{synthesize, Example};
pub use term::{render, Extractor, ExtractorValue};
