use crate::services::access_gate::MaintenanceFlag;
use crate::services::error::UploadError;
use crate::services::staging::StagingArea;
use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed { removed: usize, failed: usize },
    /// Another sweep was already running.
    Skipped,
}

/// Fires once a day at `hour:00` in a fixed UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct DailySchedule {
    hour: u32,
    offset: FixedOffset,
}

impl DailySchedule {
    pub fn new(hour: u32, utc_offset_hours: i32) -> anyhow::Result<Self> {
        if hour > 23 {
            anyhow::bail!("janitor hour must be 0-23, got {}", hour);
        }
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
            .ok_or_else(|| anyhow::anyhow!("invalid UTC offset: {}h", utc_offset_hours))?;
        Ok(Self { hour, offset })
    }

    /// Next firing strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.offset);
        let at = NaiveTime::from_hms_opt(self.hour, 0, 0).unwrap_or(NaiveTime::MIN);

        let mut date = local.date_naive();
        loop {
            let candidate = self
                .offset
                .from_local_datetime(&date.and_time(at))
                .single()
                .map(|dt| dt.with_timezone(&Utc));
            if let Some(candidate) = candidate
                && candidate > now
            {
                return candidate;
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => return now,
            };
        }
    }

    pub fn until_next(&self, now: DateTime<Utc>) -> Duration {
        (self.next_after(now) - now)
            .to_std()
            .unwrap_or(Duration::from_secs(1))
    }
}

/// Clears the staging area. At most one sweep runs at a time, and uploads
/// are refused while it does.
pub struct StagingJanitor {
    staging: Arc<StagingArea>,
    maintenance: Arc<MaintenanceFlag>,
    is_clearing: AtomicBool,
}

struct ClearingGuard<'a>(&'a AtomicBool);

impl Drop for ClearingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl StagingJanitor {
    pub fn new(staging: Arc<StagingArea>, maintenance: Arc<MaintenanceFlag>) -> Self {
        Self {
            staging,
            maintenance,
            is_clearing: AtomicBool::new(false),
        }
    }

    pub fn is_clearing(&self) -> bool {
        self.is_clearing.load(Ordering::SeqCst)
    }

    pub async fn sweep(&self) -> Result<SweepOutcome, UploadError> {
        if self
            .is_clearing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!("Clear operation already in progress. Skipping...");
            return Ok(SweepOutcome::Skipped);
        }
        let _clearing = ClearingGuard(&self.is_clearing);
        let _hold = self.maintenance.hold();

        tracing::info!("🧹 Clearing staging folder {}", self.staging.root().display());
        let (removed, failed) = self.staging.clear_all().await?;
        if failed > 0 {
            tracing::warn!("Staging sweep removed {} entries, {} failed", removed, failed);
        } else {
            tracing::info!("✅ Staging folder cleared ({} entries removed)", removed);
        }

        Ok(SweepOutcome::Completed { removed, failed })
    }

    /// Sweep on `schedule` until `shutdown` flips.
    pub async fn run(
        self: Arc<Self>,
        schedule: DailySchedule,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("🚀 Staging janitor started");

        loop {
            let wait = schedule.until_next(Utc::now());
            tracing::debug!("Next staging sweep in {}s", wait.as_secs());

            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("🛑 Staging janitor shutting down");
                    break;
                }
                _ = sleep(wait) => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!("Staging sweep failed: {}", e);
                    }
                }
            }
        }
    }
}
