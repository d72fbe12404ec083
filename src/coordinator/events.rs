//! Progress notification interface.
//!
//! The engine never talks to a terminal. The coordinator emits events to a
//! `ProgressSink`; front-ends (CLI, logging, tests) subscribe from outside.

use uuid::Uuid;

/// Per-task and per-batch notifications.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    TaskStarted {
        task_id: Uuid,
        chain_id: String,
    },
    TaskFinished {
        task_id: Uuid,
        chain_id: String,
        success: bool,
        files: usize,
        error: Option<String>,
    },
    BatchFinished {
        succeeded: usize,
        failed: usize,
        cancelled: bool,
    },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &TaskEvent);
}

/// Default sink: structured logs.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn on_event(&self, event: &TaskEvent) {
        match event {
            TaskEvent::TaskStarted { task_id, chain_id } => {
                tracing::info!(task = %task_id, chain = %chain_id, "Task started");
            }
            TaskEvent::TaskFinished {
                task_id,
                chain_id,
                success,
                files,
                error,
            } => {
                if *success {
                    tracing::info!(task = %task_id, chain = %chain_id, files, "Task finished");
                } else {
                    tracing::warn!(
                        task = %task_id,
                        chain = %chain_id,
                        error = error.as_deref().unwrap_or("unknown"),
                        "Task failed"
                    );
                }
            }
            TaskEvent::BatchFinished {
                succeeded,
                failed,
                cancelled,
            } => {
                tracing::info!(succeeded, failed, cancelled, "Batch finished");
            }
        }
    }
}

/// Sink that swallows everything; for callers that poll status instead.
#[derive(Debug, Clone, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_event(&self, _event: &TaskEvent) {}
}
