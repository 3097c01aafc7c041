use futures::future::join_all;
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::Semaphore;

use crate::errors::AppResult;

use super::backend::{ProgressCallback, UploadResult, UploadResults};

/// How the items of one upload call are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed-size windows; each window finishes before the next starts.
    Windowed(usize),
    /// Everything launched at once behind a limiter of this size.
    Limited(usize),
}

impl Schedule {
    fn width(self) -> usize {
        match self {
            Schedule::Windowed(n) | Schedule::Limited(n) => n.max(1),
        }
    }
}

/// Upload every path with `upload_one`, reporting each terminal item once.
///
/// Failures are logged and turned into failed results so that one bad item
/// never aborts its siblings.
pub async fn upload_all<F, Fut>(
    host: &str,
    filepaths: &[PathBuf],
    schedule: Schedule,
    progress: Option<&ProgressCallback<'_>>,
    upload_one: F,
) -> UploadResults
where
    F: Fn(usize, PathBuf) -> Fut,
    Fut: Future<Output = AppResult<UploadResult>>,
{
    let run_item = move |index: usize, path: PathBuf| {
        let upload = upload_one(index, path.clone());
        async move {
            let result = match upload.await {
                Ok(result) => result,
                Err(e) => {
                    log::warn!(
                        "{}: upload of {} failed: {}",
                        host,
                        path.display(),
                        e
                    );
                    UploadResult::failed()
                }
            };
            if let Some(cb) = progress {
                cb(index);
            }
            (index, result)
        }
    };

    let mut results = UploadResults::new();

    match schedule {
        Schedule::Windowed(_) => {
            let width = schedule.width();
            for (window_index, window) in filepaths.chunks(width).enumerate() {
                let offset = window_index * width;
                log::debug!(
                    "{}: uploading window {} ({} files)",
                    host,
                    window_index + 1,
                    window.len()
                );
                let finished = join_all(
                    window
                        .iter()
                        .enumerate()
                        .map(|(j, path)| run_item(offset + j, path.clone())),
                )
                .await;
                results.extend(finished);
            }
        }
        Schedule::Limited(_) => {
            let limiter = Semaphore::new(schedule.width());
            let limiter = &limiter;
            let finished = join_all(filepaths.iter().enumerate().map(|(index, path)| {
                let item = run_item(index, path.clone());
                async move {
                    let _permit = limiter.acquire().await.ok();
                    item.await
                }
            }))
            .await;
            results.extend(finished);
        }
    }

    let failures = results.values().filter(|r| !r.is_success()).count();
    log::info!(
        "{}: {} of {} uploads succeeded",
        host,
        results.len() - failures,
        results.len()
    );

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn paths(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("img_{i}.png"))).collect()
    }

    async fn fake_upload(index: usize, path: PathBuf) -> AppResult<UploadResult> {
        if index % 3 == 2 {
            return Err(AppError::UploadRejected {
                status: 400,
                reason: "rejected".to_string(),
            });
        }
        Ok(UploadResult::success(
            format!("https://host/{}", path.display()),
            None,
        ))
    }

    #[tokio::test]
    async fn every_position_gets_exactly_one_result() {
        for schedule in [Schedule::Windowed(4), Schedule::Limited(4)] {
            let files = paths(10);
            let results = upload_all("test", &files, schedule, None, fake_upload).await;
            let keys: Vec<usize> = results.keys().copied().collect();
            assert_eq!(keys, (0..10).collect::<Vec<_>>());
            assert!(!results[&2].is_success());
            assert!(results[&2].secondary_url.is_none());
            assert!(results[&3].is_success());
        }
    }

    #[tokio::test]
    async fn progress_fires_once_per_item() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback = move |index: usize| sink.lock().unwrap().push(index);

        let files = paths(7);
        let callback: &ProgressCallback<'_> = &callback;
        upload_all("test", &files, Schedule::Windowed(3), Some(callback), fake_upload).await;

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn limiter_bounds_in_flight_items() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let (in_flight, peak) = (&in_flight, &peak);

        let files = paths(12);
        upload_all("test", &files, Schedule::Limited(3), None, move |_, _| async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(UploadResult::success("https://host/x.png".to_string(), None))
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_results() {
        let results = upload_all("test", &[], Schedule::Windowed(4), None, fake_upload).await;
        assert!(results.is_empty());
    }
}
