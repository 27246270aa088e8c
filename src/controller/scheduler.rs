use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::{CycleOutcome, PipelineOrchestrator};
use crate::error::Result;

/// Task status tracking
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
}

/// First minute mark strictly after `now` whose minute is `offset` mod 10
pub fn next_run<Z: TimeZone>(now: DateTime<Z>, offset: u32) -> DateTime<Z> {
    let floor = now.clone()
        - Duration::seconds(now.second() as i64)
        - Duration::nanoseconds(now.nanosecond() as i64);
    let mut candidate = floor + Duration::minutes(1);
    while candidate.minute() % 10 != offset % 10 {
        candidate = candidate + Duration::minutes(1);
    }
    candidate
}

/// Drives pipeline cycles on the 10-minute cadence
pub struct CycleScheduler {
    offset: u32,
    tz: Tz,
    status: Arc<RwLock<TaskStatus>>,
}

impl CycleScheduler {
    pub fn new(offset: u32, tz: Tz) -> Self {
        Self {
            offset,
            tz,
            status: Arc::new(RwLock::new(TaskStatus::default())),
        }
    }

    pub async fn status(&self) -> TaskStatus {
        self.status.read().await.clone()
    }

    /// Runs one cycle immediately, then one at every scheduled minute mark
    /// until `shutdown` resolves. A cycle in progress is allowed to finish.
    pub async fn run<F>(&self, pipeline: &mut PipelineOrchestrator, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        self.run_once(pipeline).await;

        loop {
            let now = Utc::now().with_timezone(&self.tz);
            let next = next_run(now, self.offset);
            let wait = (next - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(1));
            info!(next_run = %next.format("%Y-%m-%d %H:%M:%S"), wait_secs = wait.as_secs(), "next cycle scheduled");

            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler stopping");
                    break;
                }
                _ = sleep(wait) => self.run_once(pipeline).await,
            }
        }
    }

    pub async fn run_once(&self, pipeline: &mut PipelineOrchestrator) {
        let started = Utc::now();
        {
            let mut status = self.status.write().await;
            status.last_run = Some(started);
            status.run_count += 1;
        }
        let result = pipeline
            .run_cycle(started.with_timezone(&self.tz).fixed_offset())
            .await;
        self.record(started, &result).await;
    }

    async fn record(&self, started: DateTime<Utc>, result: &Result<CycleOutcome>) {
        let mut status = self.status.write().await;
        match result {
            Ok(CycleOutcome::FetchFailed { message }) => {
                status.error_count += 1;
                status.last_error = Some(message.clone());
                warn!(error = %message, "cycle aborted");
            }
            Ok(outcome) => {
                status.last_success = Some(started);
                status.success_count += 1;
                status.last_error = None;
                info!(outcome = ?outcome, "cycle completed");
            }
            Err(e) => {
                status.error_count += 1;
                status.last_error = Some(e.to_string());
                error!(error = %e, "cycle failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use rstest::rstest;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Tz> {
        chrono_tz::Asia::Taipei
            .with_ymd_and_hms(2025, 6, 1, h, m, s)
            .unwrap()
    }

    #[rstest]
    #[case(at(12, 0, 0), 9, at(12, 9, 0))]
    #[case(at(12, 9, 0), 9, at(12, 19, 0))]
    #[case(at(12, 8, 59), 9, at(12, 9, 0))]
    #[case(at(12, 55, 30), 9, at(12, 59, 0))]
    #[case(at(23, 59, 10), 9, chrono_tz::Asia::Taipei.with_ymd_and_hms(2025, 6, 2, 0, 9, 0).unwrap())]
    #[case(at(12, 3, 0), 0, at(12, 10, 0))]
    fn test_next_run(#[case] now: DateTime<Tz>, #[case] offset: u32, #[case] expected: DateTime<Tz>) {
        assert_eq!(next_run(now, offset), expected);
    }

    #[tokio::test]
    async fn test_status_counts() {
        let scheduler = CycleScheduler::new(9, chrono_tz::Asia::Taipei);
        let started = Utc::now();
        let slot = at(12, 0, 0).fixed_offset();

        scheduler
            .record(started, &Ok(CycleOutcome::Complete { slot, intensity_g: 500 }))
            .await;
        scheduler
            .record(started, &Ok(CycleOutcome::FetchFailed { message: "down".into() }))
            .await;
        scheduler
            .record(started, &Err(PipelineError::Serialization("disk".into())))
            .await;

        let status = scheduler.status().await;
        assert_eq!(status.success_count, 1);
        assert_eq!(status.error_count, 2);
        assert_eq!(status.last_success, Some(started));
        assert_eq!(status.last_error.as_deref(), Some("Serialization error: disk"));
    }
}
