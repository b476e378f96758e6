//! Lifecycle stage reporting
//!
//! Observers receive a [`RecorderState`] each time a session changes stage.
//! A recorder started without an observer discards every report.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Stage of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RecorderStage {
    Recording,
    Paused,
    Encoding,
    Done,
    Failed,
}

/// Immutable snapshot handed to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderState {
    pub stage: RecorderStage,
}

impl RecorderState {
    pub fn new(stage: RecorderStage) -> Self {
        Self { stage }
    }
}

/// Receives stage transitions
pub trait ProgressObserver: Send + Sync {
    fn report(&self, state: RecorderState);
}

impl ProgressObserver for mpsc::UnboundedSender<RecorderState> {
    fn report(&self, state: RecorderState) {
        let _ = self.send(state);
    }
}

impl ProgressObserver for broadcast::Sender<RecorderState> {
    fn report(&self, state: RecorderState) {
        // No subscribers is not an error for a status feed
        let _ = self.send(state);
    }
}

impl<F> ProgressObserver for F
where
    F: Fn(RecorderState) + Send + Sync,
{
    fn report(&self, state: RecorderState) {
        self(state)
    }
}

/// No-op-safe sink wrapping an optional observer
#[derive(Clone, Default)]
pub struct ProgressReporter {
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl ProgressReporter {
    pub fn new(observer: Option<Arc<dyn ProgressObserver>>) -> Self {
        Self { observer }
    }

    pub fn report(&self, stage: RecorderStage) {
        debug!("Recorder stage -> {:?}", stage);
        if let Some(observer) = &self.observer {
            observer.report(RecorderState::new(stage));
        }
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
