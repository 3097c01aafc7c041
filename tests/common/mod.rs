#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use image_host_uploader::uploader::{ClientSettings, RetryConfig};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Client settings with millisecond backoff so retry tests stay fast.
pub fn fast_settings() -> ClientSettings {
    ClientSettings {
        request_timeout: Duration::from_secs(5),
        retry: RetryConfig {
            max_attempts: 3,
            backoff_unit: Duration::from_millis(1),
            max_delay: Duration::from_millis(20),
        },
    }
}

/// Write `count` small text-bodied "images" into `dir`.
pub fn write_images(dir: &Path, prefix: &str, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("{}_{}.png", prefix, i));
            std::fs::write(&path, format!("fake image {} {}", prefix, i)).unwrap();
            path
        })
        .collect()
}
