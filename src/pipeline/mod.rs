//! Stage-by-stage execution of a request.
//!
//! [`run`] returns a [`PipelineRun`], an iterator of [`Response`]s. Each call
//! to `next` finishes the stage announced by the previous item and announces
//! the following one, so progress always describes the work about to start.
//! After the last stage the terminal response is yielded, then `None`.
//!
//! ```rust,no_run
//! use loquat::config::MergeOptions;
//! use loquat::pipeline::{self, Request, Response};
//!
//! let bytes = std::fs::read("template.docx")?;
//! for response in pipeline::run(Request::extract(bytes), MergeOptions::default()) {
//!     match response {
//!         Response::Progress { stage, percent } => println!("{stage}: {percent}%"),
//!         Response::Extracted { tokens, .. } => println!("tokens: {tokens:?}"),
//!         Response::Error { message, .. } => eprintln!("failed: {message}"),
//!         Response::Rendered { .. } => unreachable!(),
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod messages;

pub use messages::{Request, Response, Stage};

use crate::config::MergeOptions;
use crate::custom_properties::read_properties;
use crate::error::{MergeError, Result};
use crate::package::Container;
use crate::template::{Merge, extract_tokens};
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// Start executing a request.
pub fn run(request: Request, options: MergeOptions) -> PipelineRun {
    let (stages, work) = match request {
        Request::Extract { bytes } => (
            Stage::EXTRACT.to_vec(),
            Work::Extract {
                bytes: Some(bytes),
                container: None,
                tokens: BTreeSet::new(),
                properties: Vec::new(),
            },
        ),
        Request::Render {
            bytes,
            token_values,
            property_values,
        } => (
            Stage::RENDER.to_vec(),
            Work::Render {
                bytes: Some(bytes),
                token_values,
                property_values,
                merge: None,
                output: None,
            },
        ),
    };
    PipelineRun {
        options,
        stages: stages.into(),
        announced: None,
        work,
        cancel: None,
        finished: false,
    }
}

/// Per-request state carried between stages.
enum Work {
    Extract {
        bytes: Option<Bytes>,
        container: Option<Container>,
        tokens: BTreeSet<String>,
        properties: Vec<(String, String)>,
    },
    Render {
        bytes: Option<Bytes>,
        token_values: HashMap<String, String>,
        property_values: HashMap<String, String>,
        merge: Option<Merge>,
        output: Option<(Bytes, BTreeSet<String>, usize)>,
    },
}

/// An in-progress request. See the [module documentation](self).
pub struct PipelineRun {
    options: MergeOptions,
    stages: VecDeque<Stage>,
    /// Stage announced by the last progress message, run on the next call
    announced: Option<Stage>,
    work: Work,
    cancel: Option<Arc<AtomicBool>>,
    finished: bool,
}

impl PipelineRun {
    /// Stop at the next stage boundary once `flag` is set.
    ///
    /// A cancelled run yields no further messages, not even an error.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    fn execute(&mut self, stage: Stage) -> Result<()> {
        let options = &self.options;
        match (&mut self.work, stage) {
            (Work::Extract { bytes, container, .. }, Stage::Loading) => {
                options.validate()?;
                *container = Some(Container::open(bytes.take().unwrap_or_default())?);
            },
            (
                Work::Extract {
                    container: Some(container),
                    tokens,
                    properties,
                    ..
                },
                Stage::Parsing,
            ) => {
                *tokens = extract_tokens(container, options)?;
                *properties = read_properties(container)?.pairs();
            },
            (Work::Render { bytes, merge, .. }, Stage::Loading) => {
                let container = Container::open(bytes.take().unwrap_or_default())?;
                *merge = Some(Merge::new(container, options.clone())?);
            },
            (
                Work::Render {
                    merge: Some(merge),
                    property_values,
                    ..
                },
                Stage::Parsing,
            ) => merge.prepare(!property_values.is_empty())?,
            (Work::Render { merge: Some(merge), .. }, Stage::FixingPlaceholders) => {
                merge.check_placeholders()?
            },
            (
                Work::Render {
                    merge: Some(merge),
                    property_values,
                    ..
                },
                Stage::UpdatingFields,
            ) => merge.update_properties(property_values)?,
            (
                Work::Render {
                    merge: Some(merge),
                    token_values,
                    ..
                },
                Stage::Rendering,
            ) => merge.render_parts(token_values)?,
            (Work::Render { merge, output, .. }, Stage::Generating) => {
                let outcome = merge
                    .take()
                    .ok_or_else(|| MergeError::Unknown("merge state missing".to_string()))?
                    .finish();
                let bytes = outcome.container.serialize()?;
                *output = Some((bytes, outcome.unresolved, outcome.replaced));
            },
            (_, stage) => {
                return Err(MergeError::Unknown(format!(
                    "stage {} reached out of order",
                    stage
                )));
            },
        }
        Ok(())
    }

    fn terminal(&mut self) -> Response {
        match &mut self.work {
            Work::Extract {
                tokens, properties, ..
            } => Response::Extracted {
                tokens: std::mem::take(tokens),
                properties: std::mem::take(properties),
            },
            Work::Render { output, .. } => match output.take() {
                Some((bytes, unresolved, replaced)) => Response::Rendered {
                    bytes,
                    unresolved,
                    replaced,
                },
                None => Response::error(
                    &MergeError::Unknown("render produced no output".to_string()),
                    None,
                ),
            },
        }
    }
}

impl Iterator for PipelineRun {
    type Item = Response;

    fn next(&mut self) -> Option<Response> {
        if self.finished {
            return None;
        }
        if self.is_cancelled() {
            debug!("pipeline cancelled");
            self.finished = true;
            return None;
        }

        if let Some(stage) = self.announced.take() {
            let started = Instant::now();
            let result = self.execute(stage);
            if self.is_cancelled() {
                self.finished = true;
                return None;
            }
            if let Err(err) = result {
                warn!(%stage, error = %err, "pipeline failed");
                self.finished = true;
                return Some(Response::error(&err, Some(stage)));
            }
            debug!(%stage, elapsed_ms = started.elapsed().as_millis() as u64, "stage finished");
        }

        match self.stages.pop_front() {
            Some(stage) => {
                self.announced = Some(stage);
                let extract = matches!(self.work, Work::Extract { .. });
                Some(Response::Progress {
                    stage,
                    percent: stage.percent(extract),
                })
            },
            None => {
                self.finished = true;
                Some(self.terminal())
            },
        }
    }
}
