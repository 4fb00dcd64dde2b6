use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;

use crate::error::TerrainError;

/// Checkpoint notifications emitted while a run is in flight.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    StageStarted {
        stage: &'static str,
        index: usize,
        total: usize,
    },
    StageFinished {
        stage: &'static str,
        elapsed_ms: f64,
    },
    ErosionBatch {
        batch: u32,
        particles_done: u64,
        particles_total: u64,
    },
    Cancelled {
        stage: &'static str,
    },
}

/// Sending half handed to the pipeline; a dropped receiver is not an error.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    sender: Option<Sender<ProgressEvent>>,
}

impl ProgressReporter {
    pub fn silent() -> Self {
        Self { sender: None }
    }

    pub fn new(sender: Sender<ProgressEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Reporter plus the receiving end of an unbounded channel.
    pub fn channel() -> (Self, Receiver<ProgressEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self::new(sender), receiver)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            if sender.send(event).is_err() {
                tracing::debug!(target: "terrain::progress", "progress.receiver_dropped");
            }
        }
    }
}

/// Cooperative cancellation flag shared between the caller and the run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn check(&self, stage: &'static str) -> Result<(), TerrainError> {
        if self.is_cancelled() {
            Err(TerrainError::Cancelled { stage })
        } else {
            Ok(())
        }
    }
}
