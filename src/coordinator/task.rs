//! Task model for a coordinator batch.
//!
//! A task is owned exclusively by the coordinator for its lifetime and moves
//! through `Pending → Running → {Completed, Failed}`. Nothing re-enters
//! `Pending`: retries are the downloader's internal business.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::downloader::{CategoryFilter, DownloadResult};

/// One chain's slot in a batch, as requested by the caller.
#[derive(Debug, Clone)]
pub struct ChainRequest {
    pub chain_id: String,
    pub date: NaiveDate,
    pub filter: CategoryFilter,
}

impl ChainRequest {
    pub fn for_date(chain_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            chain_id: chain_id.into(),
            date,
            filter: CategoryFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One chain download task within a batch.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: Uuid,
    pub chain_id: String,
    pub date: NaiveDate,
    pub filter: CategoryFilter,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<DownloadResult>,
}

impl DownloadTask {
    pub fn new(request: ChainRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain_id: request.chain_id,
            date: request.date,
            filter: request.filter,
            state: TaskState::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
        }
    }

    pub fn start(&mut self) {
        debug_assert_eq!(self.state, TaskState::Pending);
        self.state = TaskState::Running;
        self.started_at = Some(Utc::now());
    }

    /// Terminal transition; the result's success flag decides the state.
    pub fn finish(&mut self, result: DownloadResult) {
        debug_assert_eq!(self.state, TaskState::Running);
        self.state = if result.success {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }

    /// Terminal transition for tasks that never ran (admission refused,
    /// batch cancelled, factory error).
    pub fn fail_unstarted(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.state = TaskState::Failed;
        self.finished_at = Some(Utc::now());
        self.result = Some(DownloadResult {
            chain_id: self.chain_id.clone(),
            success: false,
            stores_files: 0,
            price_files: 0,
            promo_files: 0,
            sample_files: Vec::new(),
            error: Some(error),
            duration: Duration::ZERO,
        });
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, TaskState::Completed | TaskState::Failed)
    }
}

/// Point-in-time counts of a running batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
}

/// Everything a finished batch reports. `results` is an unordered map keyed
/// by chain — completion order carries no meaning.
#[derive(Debug)]
pub struct CoordinatorResult {
    pub results: BTreeMap<String, DownloadResult>,
    pub cancelled: bool,
    pub duration: Duration,
}

impl CoordinatorResult {
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn total_files(&self) -> usize {
        self.results.values().map(|r| r.total_files()).sum()
    }
}
