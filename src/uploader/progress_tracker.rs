use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::safe_lock;

use super::upload_queue::JobId;

/// Per-job counters: `remaining` only ever goes down, one item at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressCounters {
    pub total: usize,
    pub remaining: usize,
}

impl ProgressCounters {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            remaining: total,
        }
    }

    pub fn completed(&self) -> usize {
        self.total - self.remaining
    }

    pub fn percent(&self) -> u8 {
        percent(self.completed(), self.total)
    }
}

/// Progress after one completion, as handed to the progress sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub job_percent: u8,
    pub aggregate_percent: u8,
    pub finished: bool,
}

#[derive(Debug, Default)]
struct RegistryState {
    counters: HashMap<JobId, ProgressCounters>,
    /// Items of jobs already evicted, so the aggregate never moves backwards.
    retired_items: usize,
}

impl RegistryState {
    fn aggregate_percent(&self) -> u8 {
        let (total, completed) = self.counters.values().fold(
            (self.retired_items, self.retired_items),
            |(total, completed), c| (total + c.total, completed + c.completed()),
        );
        percent(completed, total)
    }
}

/// Job-id → counters, shared by every running job.
///
/// All updates go through one lock that is held only for the counter update
/// and the percentage maths, never across I/O.
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    state: Mutex<RegistryState>,
    evict_completed: bool,
}

impl ProgressRegistry {
    pub fn new(evict_completed: bool) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            evict_completed,
        }
    }

    pub fn track(&self, job_id: &JobId, total: usize) {
        if let Some(mut state) = safe_lock(&self.state, "track job") {
            state
                .counters
                .insert(job_id.clone(), ProgressCounters::new(total));
        }
    }

    pub fn untrack(&self, job_id: &JobId) {
        if let Some(mut state) = safe_lock(&self.state, "untrack job") {
            state.counters.remove(job_id);
        }
    }

    /// Start a new run: items retired by earlier runs no longer count towards
    /// the aggregate. With eviction on, leftover finished counters go too.
    pub fn begin_run(&self) {
        if let Some(mut state) = safe_lock(&self.state, "begin run") {
            state.retired_items = 0;
            if self.evict_completed {
                state.counters.retain(|_, c| c.remaining > 0);
            }
        }
    }

    /// Count one finished item of `job_id`.
    ///
    /// Returns `None` when the job is not tracked (or already complete).
    pub fn record_completion(&self, job_id: &JobId) -> Option<ProgressSnapshot> {
        let mut state = safe_lock(&self.state, "progress update")?;

        let counters = match state.counters.get_mut(job_id) {
            Some(counters) if counters.remaining > 0 => counters,
            Some(_) => {
                log::warn!("Extra completion reported for finished job {}", job_id);
                return None;
            }
            None => {
                log::debug!("Job {} not tracked for progress update", job_id);
                return None;
            }
        };

        counters.remaining -= 1;
        let job_percent = counters.percent();
        let finished = counters.remaining == 0;
        let total = counters.total;

        let aggregate_percent = state.aggregate_percent();

        if self.evict_completed && finished {
            state.counters.remove(job_id);
            state.retired_items += total;
            log::debug!("Evicted progress counters for finished job {}", job_id);
        }

        Some(ProgressSnapshot {
            job_percent,
            aggregate_percent,
            finished,
        })
    }

    pub fn counters(&self, job_id: &JobId) -> Option<ProgressCounters> {
        safe_lock(&self.state, "counters read")?
            .counters
            .get(job_id)
            .copied()
    }

    pub fn aggregate_percent(&self) -> u8 {
        safe_lock(&self.state, "aggregate read")
            .map(|state| state.aggregate_percent())
            .unwrap_or(0)
    }

    pub fn tracked_jobs(&self) -> usize {
        safe_lock(&self.state, "tracked jobs read")
            .map(|state| state.counters.len())
            .unwrap_or(0)
    }
}

fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed * 100) / total).min(100) as u8
}
