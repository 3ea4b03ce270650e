//! Placeholder discovery and merging for WordprocessingML parts.
//!
//! - [`runs`]: run-level model of a part and its logical text stream
//! - [`scanner`]: token matching on that stream
//! - [`fields`]: `DOCPROPERTY` field results
//! - [`merge`]: substitution and part rewriting

pub mod fields;
pub mod merge;
pub mod runs;
pub mod scanner;

pub use merge::{Merge, RenderOutcome, render};
pub use scanner::{TokenOccurrence, extract_tokens};
