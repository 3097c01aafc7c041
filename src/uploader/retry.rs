use std::path::PathBuf;

use crate::errors::AppResult;

use super::backend::{ImageHost, ProgressCallback, UploadOptions, UploadResult, UploadResults};

/// Positions of `filepaths` with no successful result in `previous`.
pub fn failed_positions(filepaths: &[PathBuf], previous: &UploadResults) -> Vec<usize> {
    (0..filepaths.len())
        .filter(|index| !previous.get(index).is_some_and(UploadResult::is_success))
        .collect()
}

/// Re-upload only the items that failed (or are missing) in `previous`,
/// merging the new outcomes back under their original positions.
///
/// The progress callback receives original positions too.
pub async fn retry_failed_uploads(
    host: &ImageHost,
    filepaths: &[PathBuf],
    previous: &UploadResults,
    progress: Option<&ProgressCallback<'_>>,
    options: &UploadOptions,
) -> AppResult<UploadResults> {
    let positions = failed_positions(filepaths, previous);

    let mut merged: UploadResults = (0..filepaths.len())
        .map(|index| (index, previous.get(&index).cloned().unwrap_or_default()))
        .collect();

    if positions.is_empty() {
        log::info!("No failed uploads to retry on {}", host.name());
        return Ok(merged);
    }

    log::info!(
        "Retrying {} failed uploads on {}",
        positions.len(),
        host.name()
    );

    let retry_paths: Vec<PathBuf> = positions
        .iter()
        .map(|&index| filepaths[index].clone())
        .collect();

    let remap = |local: usize| {
        if let (Some(cb), Some(&original)) = (progress, positions.get(local)) {
            cb(original);
        }
    };
    let remap: &ProgressCallback<'_> = &remap;

    let retried = host
        .upload(&retry_paths, Some(remap), options)
        .await?;

    let mut recovered = 0;
    for (local, result) in retried {
        if let Some(&original) = positions.get(local) {
            if result.is_success() {
                recovered += 1;
            }
            merged.insert(original, result);
        }
    }

    log::info!(
        "Recovered {}/{} previously failed uploads on {}",
        recovered,
        positions.len(),
        host.name()
    );

    Ok(merged)
}
