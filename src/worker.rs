//! Background execution.
//!
//! A [`Worker`] is a tokio task that owns a queue of requests. Requests run
//! one at a time on the blocking thread pool so the host's async runtime is
//! never stalled by ZIP or XML work. Every request gets its own
//! [`ResponseStream`].
//!
//! ```rust,no_run
//! use loquat::config::MergeOptions;
//! use loquat::pipeline::{Request, Response};
//! use loquat::worker::Worker;
//!
//! # async fn example(bytes: Vec<u8>) -> loquat::Result<()> {
//! let worker = Worker::new(MergeOptions::default()).spawn();
//! let mut responses = worker.submit(Request::extract(bytes)).await?;
//! while let Some(response) = responses.recv().await {
//!     if let Response::Extracted { tokens, .. } = response {
//!         println!("{tokens:?}");
//!     }
//! }
//! worker.terminate();
//! # Ok(())
//! # }
//! ```
use crate::config::MergeOptions;
use crate::error::{ErrorKind, MergeError, Result};
use crate::pipeline::{self, Request, Response};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn};

/// Default number of requests that may wait in the queue.
const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Capacity of each per-request response channel.
const RESPONSE_CAPACITY: usize = 8;

/// A queued request and where its responses go.
struct Job {
    request: Request,
    responses: mpsc::Sender<Response>,
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct Worker {
    options: MergeOptions,
    queue_capacity: usize,
}

impl Worker {
    pub fn new(options: MergeOptions) -> Self {
        Self {
            options,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Set how many requests may wait before `submit` applies backpressure.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Start the worker task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (jobs_tx, jobs_rx) = mpsc::channel(self.queue_capacity);
        let cancel = Arc::new(AtomicBool::new(false));
        let options = self.options;
        let flag = cancel.clone();
        let serve = move |request: Request, responses: &mpsc::Sender<Response>| {
            serve_request(request, options.clone(), &flag, responses)
        };
        let task = tokio::spawn(run_worker(jobs_rx, cancel.clone(), serve));
        WorkerHandle {
            jobs: jobs_tx,
            cancel,
            task,
        }
    }
}

/// Handle used by the host to submit requests and stop the worker.
#[derive(Debug)]
pub struct WorkerHandle {
    jobs: mpsc::Sender<Job>,
    cancel: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Queue a request.
    ///
    /// # Errors
    ///
    /// [`MergeError::Unknown`] if the worker has been terminated.
    pub async fn submit(&self, request: Request) -> Result<ResponseStream> {
        if self.is_terminated() {
            return Err(MergeError::Unknown("worker terminated".to_string()));
        }
        let (tx, rx) = mpsc::channel(RESPONSE_CAPACITY);
        self.jobs
            .send(Job {
                request,
                responses: tx,
            })
            .await
            .map_err(|_| MergeError::Unknown("worker terminated".to_string()))?;
        Ok(ResponseStream { rx })
    }

    /// Stop the worker.
    ///
    /// The request in flight stops at its next stage boundary and delivers
    /// no further messages; queued requests are dropped.
    pub fn terminate(&self) {
        if !self.cancel.swap(true, Ordering::AcqRel) {
            info!("terminating worker");
        }
        self.task.abort();
    }

    pub fn is_terminated(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// Responses of one request, in emission order.
#[derive(Debug)]
pub struct ResponseStream {
    rx: mpsc::Receiver<Response>,
}

impl ResponseStream {
    /// Next response, or `None` once the request is over.
    pub async fn recv(&mut self) -> Option<Response> {
        self.rx.recv().await
    }

    /// Wait for every remaining response.
    pub async fn collect(mut self) -> Vec<Response> {
        let mut out = Vec::new();
        while let Some(response) = self.rx.recv().await {
            out.push(response);
        }
        out
    }

    /// Wait for the terminal response, skipping progress.
    pub async fn outcome(mut self) -> Option<Response> {
        while let Some(response) = self.rx.recv().await {
            if response.is_terminal() {
                return Some(response);
            }
        }
        None
    }
}

/// Run one request, forwarding responses until it ends or is cancelled.
fn serve_request(
    request: Request,
    options: MergeOptions,
    cancel: &Arc<AtomicBool>,
    responses: &mpsc::Sender<Response>,
) {
    info!("request started");
    for response in pipeline::run(request, options).with_cancel(cancel.clone()) {
        if cancel.load(Ordering::Acquire) {
            break;
        }
        if responses.blocking_send(response).is_err() {
            debug!("response receiver dropped");
            break;
        }
    }
    info!("request finished");
}

async fn run_worker<F>(mut jobs: mpsc::Receiver<Job>, cancel: Arc<AtomicBool>, serve: F)
where
    F: Fn(Request, &mpsc::Sender<Response>) + Clone + Send + 'static,
{
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    while let Some(job) = jobs.recv().await {
        if cancel.load(Ordering::Acquire) {
            break;
        }
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("request", id, kind = job.request.kind());
        let responses = job.responses.clone();
        let serve = serve.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            serve(job.request, &job.responses);
        })
        .await;

        if let Err(err) = joined
            && err.is_panic()
            && !cancel.load(Ordering::Acquire)
        {
            warn!(id, "request panicked");
            let response = Response::Error {
                kind: ErrorKind::UnknownError,
                message: "request panicked".to_string(),
                stage: None,
            };
            let _ = responses.send(response).await;
        }
    }
    debug!("worker stopped");
}
