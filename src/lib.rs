//! Loquat - A Word template merge engine
//!
//! This library discovers `{{placeholder}}` tokens in `.docx` templates and
//! merges values into them, even when Word has split a token across several
//! differently formatted runs. It also reads and writes custom document
//! properties and refreshes the cached results of `DOCPROPERTY` fields.
//!
//! # Features
//!
//! - **Run-aware substitution**: tokens split across runs are replaced while
//!   the formatting of the first run is kept
//! - **Custom properties**: typed read and update of `docProps/custom.xml`
//! - **Field refresh**: `DOCPROPERTY` field results follow property updates
//! - **Byte-stable output**: parts without changes are copied untouched
//! - **Background worker**: staged progress reporting on a tokio task
//!
//! # Example - Listing tokens
//!
//! ```no_run
//! use loquat::{Container, MergeOptions, extract_tokens};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let container = Container::open(std::fs::read("template.docx")?)?;
//! for token in extract_tokens(&container, &MergeOptions::default())? {
//!     println!("{token}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Merging values
//!
//! ```no_run
//! use loquat::{Container, MergeOptions, render};
//! use std::collections::HashMap;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let container = Container::open(std::fs::read("template.docx")?)?;
//! let tokens = HashMap::from([("client".to_string(), "Acme".to_string())]);
//! let properties = HashMap::from([("Version".to_string(), "3".to_string())]);
//!
//! let outcome = render(container, &tokens, &properties, &MergeOptions::default())?;
//! if !outcome.unresolved.is_empty() {
//!     eprintln!("left in place: {:?}", outcome.unresolved);
//! }
//! std::fs::write("out.docx", outcome.container.serialize()?)?;
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod config;
pub mod custom_properties;
pub mod error;

/// OPC package access
///
/// Part reads, part replacement and byte-stable re-serialization of the
/// ZIP container.
pub mod package;

/// Staged request execution and its message types
pub mod pipeline;

/// Placeholder discovery and merging
pub mod template;

/// Background worker on a tokio task
pub mod worker;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for convenience
pub use config::{Delimiters, MergeOptions};
pub use custom_properties::{CustomProperties, read_properties, write_properties};
pub use error::{ErrorKind, MergeError, Result};
pub use package::Container;
pub use pipeline::{Request, Response, Stage};
pub use template::{RenderOutcome, extract_tokens, render};
pub use worker::{Worker, WorkerHandle};
