use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info};

use super::{DailySavingsCalculator, IntensityHistory, SavingsRunSummary, SavingsSettings};
use crate::config::Config;
use crate::controller::TaskStatus;
use crate::error::Result;
use crate::repo::{ChoreSource, CsvChoreSource, IntensityLog, JsonProgressStore, ProgressStore};

/// First local midnight strictly after `now`
pub fn next_midnight(now: DateTime<Tz>) -> DateTime<Tz> {
    let tz = now.timezone();
    now.date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .and_then(|midnight| tz.from_local_datetime(&midnight).earliest())
        .unwrap_or_else(|| now + Duration::days(1))
}

/// Savings batch over its collaborators. The intensity log is reloaded on
/// every run so each day sees the rows the pipeline appended since.
pub struct SavingsJob {
    log: IntensityLog,
    chores: Box<dyn ChoreSource>,
    store: Box<dyn ProgressStore>,
    settings: SavingsSettings,
    tz: Tz,
}

impl SavingsJob {
    pub fn new(
        log: IntensityLog,
        chores: Box<dyn ChoreSource>,
        store: Box<dyn ProgressStore>,
        settings: SavingsSettings,
        tz: Tz,
    ) -> Self {
        Self {
            log,
            chores,
            store,
            settings,
            tz,
        }
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let tz = cfg.pipeline.tz()?;
        Ok(Self::new(
            IntensityLog::new(&cfg.pipeline.intensity_log_path, tz),
            Box::new(CsvChoreSource::new(&cfg.savings.chore_log_path, tz)),
            Box::new(JsonProgressStore::new(&cfg.savings.progress_path)),
            SavingsSettings::from(&cfg.savings),
            tz,
        ))
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// The local date before `now`
    pub fn yesterday(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive() - Duration::days(1)
    }

    pub fn run_for_date(&self, date: NaiveDate) -> Result<SavingsRunSummary> {
        let history = IntensityHistory::new(self.log.load()?);
        info!(samples = history.len(), date = %date, "loaded intensity history");
        DailySavingsCalculator::new(history, self.settings, self.tz).run_for_date(
            self.chores.as_ref(),
            self.store.as_ref(),
            date,
        )
    }
}

/// Runs the savings job once a day, just after local midnight, for the day
/// that ended
#[derive(Default)]
pub struct DailySavingsScheduler {
    status: Arc<RwLock<TaskStatus>>,
}

impl DailySavingsScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn status(&self) -> TaskStatus {
        self.status.read().await.clone()
    }

    /// Loops until `shutdown` resolves. With `run_now` the previous day is
    /// processed once before the first wait.
    pub async fn run<F>(&self, job: &SavingsJob, run_now: bool, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        if run_now {
            self.run_once(job).await;
        }

        loop {
            let now = Utc::now().with_timezone(&job.tz());
            let next = next_midnight(now);
            let wait = (next - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(60));
            info!(next_run = %next.format("%Y-%m-%d %H:%M:%S"), wait_secs = wait.as_secs(), "next savings run scheduled");

            tokio::select! {
                _ = &mut shutdown => {
                    info!("savings scheduler stopping");
                    break;
                }
                _ = sleep(wait) => self.run_once(job).await,
            }
        }
    }

    pub async fn run_once(&self, job: &SavingsJob) {
        let started = Utc::now();
        {
            let mut status = self.status.write().await;
            status.last_run = Some(started);
            status.run_count += 1;
        }
        let result = job.run_for_date(job.yesterday(started));
        self.record(started, &result).await;
    }

    async fn record(&self, started: DateTime<Utc>, result: &Result<SavingsRunSummary>) {
        let mut status = self.status.write().await;
        match result {
            Ok(summary) => {
                status.last_success = Some(started);
                status.success_count += 1;
                status.last_error = None;
                info!(
                    users = summary.users_processed,
                    failed = summary.users_failed,
                    total_saved_g = summary.total_saved_g,
                    "daily savings completed"
                );
            }
            Err(e) => {
                status.error_count += 1;
                status.last_error = Some(e.to_string());
                error!(error = %e, "daily savings failed");
            }
        }
    }
}
