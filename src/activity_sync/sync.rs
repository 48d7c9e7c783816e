use super::{ActivityIndex, ActivitySync, IndexEntry};
use crate::common::metrics;
use crate::common::types::{Activity, ExportError, ExportFormat, ExportResult};
use function_timer::time;
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::{RetryDecision, RetryPolicy};
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// Outcome of one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub downloaded: usize,
    pub failed: usize,
    /// Index size at the end of the run.
    pub indexed: usize,
    /// Pacing delays taken between batches.
    pub pauses: usize,
}

impl ActivitySync<'_> {
    /// Bring the output directory up to date with the account's activities.
    ///
    /// A failed activity is logged and skipped; it stays out of the index and
    /// is retried on the next run. An index that exists but cannot be read,
    /// a format directory that cannot be created and an index write failure
    /// all abort the run.
    #[time("sync_activities_duration")]
    pub async fn sync(&self, account: &str) -> ExportResult<SyncReport> {
        // Phase 1: Load existing index
        let index_path = ActivityIndex::path_in(&self.output_dir);
        let mut index = ActivityIndex::load(&index_path)?;

        // Phase 2: Nothing to do when the upstream count matches
        let total = self.lister.total_activities(account).await?;
        if total == index.len() as u64 {
            info!(
                "All {} activities for {} already saved, nothing to do",
                total, account
            );
            metrics::set_index_size(index.len());
            return Ok(SyncReport {
                indexed: index.len(),
                ..SyncReport::default()
            });
        }

        // Phase 3: List and diff against the index
        let activities = self.lister.list_activities(account).await?;
        let pending = index.new_activities(&activities);
        info!(
            "Found {} activities for {}, {} already saved, {} to download",
            activities.len(),
            account,
            index.len(),
            pending.len()
        );

        if !pending.is_empty() {
            self.create_format_dirs()?;
        }

        // Phase 4: Download sequentially, recording each completed activity
        let mut report = SyncReport::default();
        for (processed, activity) in pending.into_iter().enumerate() {
            if self.pacing.should_pause(processed) {
                debug!("Processed {}, pausing for {:?}", processed, self.pacing.delay);
                tokio::time::sleep(self.pacing.delay).await;
                report.pauses += 1;
            }

            let id = activity.id;
            match self.process_activity(&activity).await {
                Ok(()) => {
                    index.insert(IndexEntry::new(activity));
                    index.save(&index_path)?;
                    report.downloaded += 1;
                    metrics::increment_activities_downloaded(1);
                    info!("Saved activity {} ({}/{})", id, report.downloaded, total);
                }
                Err(e) => {
                    error!("Failed to download activity {}: {}", id, e);
                    report.failed += 1;
                    metrics::increment_activities_failed(1);
                }
            }
        }

        report.indexed = index.len();
        metrics::set_index_size(index.len());
        info!(
            "Sync finished for {}: {} downloaded, {} failed, {} indexed",
            account, report.downloaded, report.failed, report.indexed
        );
        Ok(report)
    }

    fn create_format_dirs(&self) -> ExportResult<()> {
        for format in ExportFormat::ALL {
            let dir = self.output_dir.join(format.as_str());
            std::fs::create_dir_all(&dir).map_err(|e| ExportError::filesystem(&dir, e))?;
        }
        Ok(())
    }

    /// Fetch every missing format for one activity. Stops at the first
    /// format that fails.
    async fn process_activity(&self, activity: &Activity) -> ExportResult<()> {
        for format in ExportFormat::ALL {
            let destination = self.output_dir.join(format.relative_path(activity.id));
            if destination.exists() {
                debug!("{} already on disk, skipping", destination.display());
                metrics::increment_files_skipped_existing(1);
                continue;
            }

            let written = self.download_with_retry(format, activity.id, &destination).await?;
            debug!("Wrote {} bytes to {}", written, destination.display());
        }
        Ok(())
    }

    async fn download_with_retry(
        &self,
        format: ExportFormat,
        activity_id: u64,
        destination: &Path,
    ) -> ExportResult<u64> {
        let policy = ExponentialBackoff::builder().build_with_max_retries(self.download_retries);
        let started = SystemTime::now();
        let mut past_retries = 0;

        loop {
            let err = match self
                .client
                .download_activity(format, activity_id, destination)
                .await
            {
                Ok(written) => return Ok(written),
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            match policy.should_retry(started, past_retries) {
                RetryDecision::Retry { execute_after } => {
                    let wait = execute_after
                        .duration_since(SystemTime::now())
                        .unwrap_or_default();
                    warn!(
                        "{} download for activity {} failed ({}), retrying in {:?}",
                        format, activity_id, err, wait
                    );
                    tokio::time::sleep(wait).await;
                    past_retries += 1;
                }
                RetryDecision::DoNotRetry => return Err(err),
            }
        }
    }
}
