//! Request and response messages.
//!
//! Every message is plain serde data so a host can carry it over whatever
//! transport separates it from the worker.
use crate::error::{ErrorKind, MergeError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Loading,
    Parsing,
    FixingPlaceholders,
    UpdatingFields,
    Rendering,
    Generating,
}

impl Stage {
    /// Stages of a render request.
    pub const RENDER: [Stage; 6] = [
        Stage::Loading,
        Stage::Parsing,
        Stage::FixingPlaceholders,
        Stage::UpdatingFields,
        Stage::Rendering,
        Stage::Generating,
    ];

    /// Stages of an extract request.
    pub const EXTRACT: [Stage; 2] = [Stage::Loading, Stage::Parsing];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Loading => "loading",
            Stage::Parsing => "parsing",
            Stage::FixingPlaceholders => "fixing_placeholders",
            Stage::UpdatingFields => "updating_fields",
            Stage::Rendering => "rendering",
            Stage::Generating => "generating",
        }
    }

    /// Progress reported when the stage starts.
    pub fn percent(&self, extract: bool) -> u8 {
        match (self, extract) {
            (Stage::Loading, _) => 0,
            (Stage::Parsing, true) => 50,
            (Stage::Parsing, false) => 15,
            (Stage::FixingPlaceholders, _) => 35,
            (Stage::UpdatingFields, _) => 50,
            (Stage::Rendering, _) => 65,
            (Stage::Generating, _) => 85,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work submitted to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Discover token names and custom properties.
    Extract { bytes: Bytes },
    /// Merge values into the document.
    Render {
        bytes: Bytes,
        #[serde(default)]
        token_values: HashMap<String, String>,
        #[serde(default)]
        property_values: HashMap<String, String>,
    },
}

impl Request {
    pub fn extract(bytes: impl Into<Bytes>) -> Self {
        Request::Extract {
            bytes: bytes.into(),
        }
    }

    pub fn render(
        bytes: impl Into<Bytes>,
        token_values: HashMap<String, String>,
        property_values: HashMap<String, String>,
    ) -> Self {
        Request::Render {
            bytes: bytes.into(),
            token_values,
            property_values,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Extract { .. } => "extract",
            Request::Render { .. } => "render",
        }
    }
}

/// Messages emitted for a request: zero or more `Progress`, then exactly one
/// terminal message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Progress {
        stage: Stage,
        percent: u8,
    },
    Extracted {
        tokens: BTreeSet<String>,
        properties: Vec<(String, String)>,
    },
    Rendered {
        bytes: Bytes,
        unresolved: BTreeSet<String>,
        replaced: usize,
    },
    Error {
        kind: ErrorKind,
        message: String,
        stage: Option<Stage>,
    },
}

impl Response {
    /// Build the error response for a failure in `stage`.
    pub fn error(err: &MergeError, stage: Option<Stage>) -> Self {
        Response::Error {
            kind: err.kind(),
            message: err.to_string(),
            stage,
        }
    }

    /// Whether this is the last message of its request.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Response::Progress { .. })
    }
}
