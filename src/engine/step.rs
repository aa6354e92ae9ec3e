//! Per-iteration step records and their observers

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// One executed fragment, emitted after execution and before the next model call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based iteration number
    pub iteration: usize,
    pub code: String,
    /// The report the model sees next
    pub output: String,
    /// Whether `SUBMIT` was called during this fragment
    pub has_answer: bool,
}

/// Receives each [`Step`]; the engine waits for `on_step` before continuing.
#[async_trait]
pub trait StepObserver: Send + Sync {
    async fn on_step(&self, step: &Step);
}

/// Observer built from an async closure
pub struct FnObserver<F> {
    f: F,
}

/// Wrap `f` as a [`StepObserver`].
pub fn observe_with<F, Fut>(f: F) -> FnObserver<F>
where
    F: Fn(Step) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    FnObserver { f }
}

#[async_trait]
impl<F, Fut> StepObserver for FnObserver<F>
where
    F: Fn(Step) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_step(&self, step: &Step) {
        (self.f)(step.clone()).await
    }
}

/// Forwards steps into a bounded channel.
///
/// A full channel applies backpressure to the run. A dropped receiver is
/// ignored and the run keeps going.
pub struct ChannelObserver {
    tx: mpsc::Sender<Step>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::Sender<Step>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl StepObserver for ChannelObserver {
    async fn on_step(&self, step: &Step) {
        if self.tx.send(step.clone()).await.is_err() {
            debug!(iteration = step.iteration, "Step receiver gone; run continues");
        }
    }
}
