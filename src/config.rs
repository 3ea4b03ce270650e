//! Merge options.
//!
//! Options are plain data so hosts can build them in code or deserialize them
//! from their own configuration files. Missing fields fall back to defaults.
//!
//! ```rust
//! use loquat::config::{Delimiters, MergeOptions};
//!
//! let options = MergeOptions::default()
//!     .with_delimiters(Delimiters::new("[[", "]]"))
//!     .with_update_fields(false);
//! assert!(options.validate().is_ok());
//! ```
use crate::error::{MergeError, Result};
use crate::template::runs::OBJECT_MARK;
use crate::template::scanner::is_name_char;
use serde::{Deserialize, Serialize};

/// The open/close marker pair surrounding a placeholder name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    pub open: String,
    pub close: String,
}

impl Delimiters {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }
}

impl Default for Delimiters {
    fn default() -> Self {
        Self::new("{{", "}}")
    }
}

/// Options controlling discovery and rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// Placeholder markers, `{{` and `}}` by default.
    pub delimiters: Delimiters,
    /// Accept `{{ name }}` as the token `name`.
    pub trim_token_whitespace: bool,
    /// Refresh the cached result of `DOCPROPERTY` fields whose property is updated.
    pub update_fields: bool,
    /// Scan footnotes and endnotes in addition to body, headers and footers.
    pub include_notes: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            delimiters: Delimiters::default(),
            trim_token_whitespace: true,
            update_fields: true,
            include_notes: true,
        }
    }
}

impl MergeOptions {
    /// Set the placeholder delimiters.
    pub fn with_delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = delimiters;
        self
    }

    /// Enable or disable whitespace trimming inside delimiters.
    pub fn with_trim_token_whitespace(mut self, enabled: bool) -> Self {
        self.trim_token_whitespace = enabled;
        self
    }

    /// Enable or disable `DOCPROPERTY` field refresh.
    pub fn with_update_fields(mut self, enabled: bool) -> Self {
        self.update_fields = enabled;
        self
    }

    /// Enable or disable footnote and endnote scanning.
    pub fn with_include_notes(mut self, enabled: bool) -> Self {
        self.include_notes = enabled;
        self
    }

    /// Check the options before a request uses them.
    ///
    /// Delimiters must be non-empty and distinct, and must not contain
    /// characters that could be part of a token name.
    pub fn validate(&self) -> Result<()> {
        let Delimiters { open, close } = &self.delimiters;
        if open.is_empty() || close.is_empty() {
            return Err(MergeError::InvalidOptions(
                "delimiters must not be empty".to_string(),
            ));
        }
        if open == close {
            return Err(MergeError::InvalidOptions(format!(
                "open and close delimiters must differ (both are {:?})",
                open
            )));
        }
        if open
            .chars()
            .chain(close.chars())
            .any(|c| is_name_char(c) || c == OBJECT_MARK)
        {
            return Err(MergeError::InvalidOptions(format!(
                "delimiters {:?}/{:?} contain name or object characters",
                open, close
            )));
        }
        Ok(())
    }
}
