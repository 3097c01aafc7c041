use futures::future::join_all;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

use super::backend::{ImageHost, ProgressCallback, UploadOptions, UploadResults};
use super::progress_tracker::{ProgressCounters, ProgressRegistry};

/// Opaque, unique identifier of one queued job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives `(job_id, job_percent, aggregate_percent)` after every finished item.
pub type ProgressSink = dyn Fn(&JobId, u8, u8) + Send + Sync;

/// A queued unit of work. Immutable once created, consumed by one run.
#[derive(Debug)]
struct UploadJob {
    id: JobId,
    host_name: String,
    backend: Arc<ImageHost>,
    filepaths: Vec<PathBuf>,
    options: UploadOptions,
}

/// Outcome of a run: per job, either its results or the error that stopped it.
pub type JobOutcomes = HashMap<JobId, AppResult<UploadResults>>;

/// Runs upload jobs across any number of hosts concurrently, with combined
/// progress reporting.
pub struct ImageUploader {
    backends: HashMap<String, Arc<ImageHost>>,
    jobs: Vec<UploadJob>,
    registry: ProgressRegistry,
    progress_sink: Option<Box<ProgressSink>>,
}

impl fmt::Debug for ImageUploader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUploader")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("jobs", &self.jobs.len())
            .finish_non_exhaustive()
    }
}

impl ImageUploader {
    /// `delete_job_as_completed` drops a job's counters as soon as its last
    /// item finishes.
    pub fn new(delete_job_as_completed: bool) -> Self {
        Self {
            backends: HashMap::new(),
            jobs: Vec::new(),
            registry: ProgressRegistry::new(delete_job_as_completed),
            progress_sink: None,
        }
    }

    pub fn with_progress_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&JobId, u8, u8) + Send + Sync + 'static,
    {
        self.progress_sink = Some(Box::new(sink));
        self
    }

    /// Register (or replace) the backend used for `host_name`.
    pub fn register_backend(&mut self, host_name: &str, backend: impl Into<ImageHost>) {
        let backend = Arc::new(backend.into());
        log::debug!("Registered {} backend as '{}'", backend.name(), host_name);
        self.backends.insert(host_name.to_string(), backend);
    }

    pub fn has_backend(&self, host_name: &str) -> bool {
        self.backends.contains_key(host_name)
    }

    /// Queue an upload job. Nothing touches the network until [`run_all`].
    ///
    /// [`run_all`]: ImageUploader::run_all
    pub fn add_job(
        &mut self,
        host_name: &str,
        filepaths: Vec<PathBuf>,
        options: UploadOptions,
    ) -> AppResult<JobId> {
        let backend = self
            .backends
            .get(host_name)
            .cloned()
            .ok_or_else(|| AppError::UnknownHost {
                host: host_name.to_string(),
            })?;

        if filepaths.is_empty() {
            return Err(AppError::validation("filepaths", "A job needs at least one file"));
        }

        let id = JobId::new();
        self.registry.track(&id, filepaths.len());

        log::info!(
            "Queued job {} on '{}' with {} files",
            id,
            host_name,
            filepaths.len()
        );

        self.jobs.push(UploadJob {
            id: id.clone(),
            host_name: host_name.to_string(),
            backend,
            filepaths,
            options,
        });

        Ok(id)
    }

    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }

    /// Current counters of a job, while it is still tracked.
    pub fn progress(&self, job_id: &JobId) -> Option<ProgressCounters> {
        self.registry.counters(job_id)
    }

    pub fn aggregate_percent(&self) -> u8 {
        self.registry.aggregate_percent()
    }

    /// Run every queued job concurrently and wait for all of them.
    ///
    /// A job that fails as a whole is reported under its own id; the other
    /// jobs keep running to completion.
    pub async fn run_all(&mut self) -> JobOutcomes {
        let jobs = std::mem::take(&mut self.jobs);
        if jobs.is_empty() {
            return JobOutcomes::new();
        }

        log::info!("Starting {} upload jobs", jobs.len());
        self.registry.begin_run();

        let registry = &self.registry;
        let sink = self.progress_sink.as_deref();

        let outcomes = join_all(
            jobs.into_iter()
                .map(|job| Self::run_job(job, registry, sink)),
        )
        .await;

        let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
        log::info!(
            "Finished {} upload jobs ({} failed)",
            outcomes.len(),
            failed
        );

        outcomes.into_iter().collect()
    }

    async fn run_job(
        job: UploadJob,
        registry: &ProgressRegistry,
        sink: Option<&ProgressSink>,
    ) -> (JobId, AppResult<UploadResults>) {
        let job_id = job.id.clone();
        let on_item = |_index: usize| {
            // Lock is released inside record_completion before the sink runs.
            if let Some(snapshot) = registry.record_completion(&job_id) {
                if let Some(sink) = sink {
                    sink(&job_id, snapshot.job_percent, snapshot.aggregate_percent);
                }
            }
        };
        let on_item: &ProgressCallback<'_> = &on_item;

        log::debug!(
            "Job {} started on '{}' ({})",
            job.id,
            job.host_name,
            job.backend.name()
        );

        let result = job
            .backend
            .upload(&job.filepaths, Some(on_item), &job.options)
            .await;

        match &result {
            Ok(results) => log::info!(
                "Job {} on '{}' finished: {}/{} uploaded",
                job.id,
                job.host_name,
                results.values().filter(|r| r.is_success()).count(),
                job.filepaths.len()
            ),
            Err(e) => {
                if e.is_job_level() {
                    log::error!("Job {} on '{}' aborted: {}", job.id, job.host_name, e);
                } else {
                    log::error!("Job {} on '{}' failed: {}", job.id, job.host_name, e);
                }
                registry.untrack(&job.id);
            }
        }

        (job.id, result)
    }
}
