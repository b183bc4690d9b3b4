//! Periodic removal of old converted files.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::pipeline::OUTPUT_FILE_PREFIX;
use crate::server::metrics;

/// Deletes converted files in `output_dir` last modified before `cutoff`.
/// Files not produced by the pipeline are left alone.
pub async fn prune_converted_files(output_dir: &Path, cutoff: SystemTime) -> std::io::Result<u64> {
    let mut removed = 0;
    let mut entries = fs::read_dir(output_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(OUTPUT_FILE_PREFIX) {
            continue;
        }

        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified()?;
        if modified >= cutoff {
            continue;
        }

        match fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            // A concurrent download or sweep may have beaten us to it
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    Ok(removed)
}

/// Runs [`prune_converted_files`] every `interval`, removing files older
/// than `retention`.
pub fn spawn_retention_sweep(
    output_dir: PathBuf,
    retention: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    info!(
        "Output retention enabled: keeping files {}h, sweeping every {}m",
        retention.as_secs() / 3600,
        interval.as_secs() / 60
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        // Skip the first immediate tick, wait for the first interval
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Some(cutoff) = SystemTime::now().checked_sub(retention) else {
                continue;
            };

            match prune_converted_files(&output_dir, cutoff).await {
                Ok(0) => debug!("Retention sweep found nothing to remove"),
                Ok(count) => {
                    metrics::record_pruned_files(count);
                    info!("Pruned {} old converted files", count);
                }
                Err(e) => error!("Failed to prune converted files: {}", e),
            }
        }
    })
}
