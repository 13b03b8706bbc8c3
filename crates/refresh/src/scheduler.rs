//! Near/far refresh cadence.
//!
//! Startup fetches the near weeks first and compiles, then the rest of the
//! school year and compiles again. Afterwards two loops run: the near
//! window every `NEAR_REFRESH_SECS`, far weeks every `FAR_REFRESH_SECS`.
//! The far cycle also drops fragments of weeks outside the current school
//! year and near window.
//! One batch lock serializes every batch, including the on-demand lessons
//! refresh.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use synergia_core::config::RefreshConfig;
use synergia_core::{Clock, WeekKey, WeekWindow};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::artifact::CompiledArtifact;
use crate::error::RefreshError;
use crate::metrics::RefreshMetrics;
use crate::pipeline::RefreshPipeline;

const MIN_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    Startup,
    Near,
    Far,
    OnDemand,
}

impl fmt::Display for CycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleKind::Startup => "startup",
            CycleKind::Near => "near",
            CycleKind::Far => "far",
            CycleKind::OnDemand => "on_demand",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileOutcome {
    /// No week in the batch was fetched, so nothing was recompiled.
    #[default]
    Skipped,
    Compiled,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub requested: usize,
    pub fetched: usize,
    pub failed: usize,
    /// Outcome of the last compile attempt.
    pub compile: CompileOutcome,
    pub compiles: u32,
    pub compile_failures: u32,
}

impl BatchReport {
    /// Combine two consecutive batches. Counters add up; `compile` keeps the
    /// later attempt unless that batch skipped compiling.
    fn then(self, later: BatchReport) -> BatchReport {
        BatchReport {
            requested: self.requested + later.requested,
            fetched: self.fetched + later.fetched,
            failed: self.failed + later.failed,
            compile: match later.compile {
                CompileOutcome::Skipped => self.compile,
                other => other,
            },
            compiles: self.compiles + later.compiles,
            compile_failures: self.compile_failures + later.compile_failures,
        }
    }
}

pub struct RefreshScheduler {
    pipeline: Arc<RefreshPipeline>,
    clock: Arc<dyn Clock>,
    near_weeks_ahead: u32,
    near_interval: Duration,
    far_interval: Duration,
    batch: Mutex<()>,
    metrics: RwLock<RefreshMetrics>,
}

impl RefreshScheduler {
    pub fn new(pipeline: Arc<RefreshPipeline>, clock: Arc<dyn Clock>, config: &RefreshConfig) -> Self {
        Self {
            pipeline,
            clock,
            near_weeks_ahead: config.near_weeks_ahead,
            near_interval: config.near_interval(),
            far_interval: config.far_interval(),
            batch: Mutex::new(()),
            metrics: RwLock::new(RefreshMetrics::default()),
        }
    }

    pub fn pipeline(&self) -> &Arc<RefreshPipeline> {
        &self.pipeline
    }

    /// Week window for the current day; recomputed on every cycle so the
    /// near window rolls over at midnight on Monday.
    pub fn window(&self) -> WeekWindow {
        WeekWindow::from_clock(self.clock.as_ref()).with_near_weeks_ahead(self.near_weeks_ahead)
    }

    pub fn metrics(&self) -> RefreshMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn run_batch_locked(&self, kind: CycleKind, weeks: &[WeekKey]) -> BatchReport {
        let mut report = BatchReport {
            requested: weeks.len(),
            ..BatchReport::default()
        };
        for &week in weeks {
            if self.pipeline.fetch_week(week).await.is_fresh() {
                report.fetched += 1;
            } else {
                report.failed += 1;
            }
        }

        report.compile = if report.fetched == 0 {
            if report.requested > 0 {
                warn!(cycle = %kind, weeks = report.requested, "every week failed, keeping current calendar");
            }
            CompileOutcome::Skipped
        } else if self.pipeline.compile_lessons().is_ok() {
            report.compiles += 1;
            CompileOutcome::Compiled
        } else {
            report.compile_failures += 1;
            CompileOutcome::Failed
        };
        report
    }

    async fn run_batch(&self, kind: CycleKind, weeks: &[WeekKey]) -> BatchReport {
        let _batch = self.batch.lock().await;
        self.run_batch_locked(kind, weeks).await
    }

    fn record(&self, kind: CycleKind, started: chrono::DateTime<Utc>, timer: Instant, report: &BatchReport) {
        let elapsed = timer.elapsed();
        self.metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record_cycle(kind, started, elapsed, report);
        info!(
            cycle = %kind,
            fetched = report.fetched,
            failed = report.failed,
            compile = ?report.compile,
            compiles = report.compiles,
            compile_failures = report.compile_failures,
            duration_ms = elapsed.as_millis() as u64,
            "refresh cycle finished"
        );
    }

    /// Near weeks first, then every other school week.
    pub async fn run_startup(&self) -> BatchReport {
        let (started, timer) = (Utc::now(), Instant::now());
        let window = self.window();
        let near = window.near_weeks();
        let rest: Vec<WeekKey> = window
            .all_school_weeks()
            .filter(|w| !near.contains(w))
            .collect();
        info!(
            near = near.len(),
            rest = rest.len(),
            school_year = window.school_year(),
            "startup refresh"
        );

        let first = self.run_batch(CycleKind::Startup, &near).await;
        let second = self.run_batch(CycleKind::Startup, &rest).await;
        let report = first.then(second);
        self.record(CycleKind::Startup, started, timer, &report);
        report
    }

    pub async fn run_near_cycle(&self) -> BatchReport {
        let (started, timer) = (Utc::now(), Instant::now());
        let weeks = self.window().near_weeks();
        let report = self.run_batch(CycleKind::Near, &weeks).await;
        self.record(CycleKind::Near, started, timer, &report);
        report
    }

    /// Refresh the far weeks, first dropping fragments of weeks that are
    /// neither in the school year nor near.
    pub async fn run_far_cycle(&self) -> BatchReport {
        let (started, timer) = (Utc::now(), Instant::now());
        let window = self.window();
        let report = {
            let _batch = self.batch.lock().await;
            let keep: HashSet<WeekKey> = window
                .all_school_weeks()
                .chain(window.near_weeks())
                .collect();
            let pruned = self.pipeline.fragments().retain(|week| keep.contains(&week));
            if pruned > 0 {
                info!(pruned, school_year = window.school_year(), "dropped out-of-year week fragments");
            }
            self.run_batch_locked(CycleKind::Far, &window.far_weeks()).await
        };
        self.record(CycleKind::Far, started, timer, &report);
        report
    }

    /// The lessons document, refreshing the near weeks first when none has
    /// been compiled yet. Concurrent cold callers share that one refresh.
    pub async fn lessons_feed(&self) -> Result<Arc<CompiledArtifact>, RefreshError> {
        if let Some(artifact) = self.pipeline.lessons().get() {
            return Ok(artifact);
        }

        let (started, timer) = (Utc::now(), Instant::now());
        let report = {
            let _batch = self.batch.lock().await;
            if let Some(artifact) = self.pipeline.lessons().get() {
                return Ok(artifact);
            }
            info!("no lessons calendar yet, refreshing near weeks on demand");
            let weeks = self.window().near_weeks();
            self.run_batch_locked(CycleKind::OnDemand, &weeks).await
        };
        self.record(CycleKind::OnDemand, started, timer, &report);

        self.pipeline.lessons().get().ok_or(RefreshError::NotReady)
    }

    /// Run startup, then the periodic loops, in the background.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run_startup().await;

            let near = tokio::spawn(Arc::clone(&self).periodic(CycleKind::Near, self.near_interval));
            let far = tokio::spawn(Arc::clone(&self).periodic(CycleKind::Far, self.far_interval));
            info!(
                near_secs = self.near_interval.as_secs(),
                far_secs = self.far_interval.as_secs(),
                "refresh schedules running"
            );
            let _ = tokio::join!(near, far);
        })
    }

    async fn periodic(self: Arc<Self>, kind: CycleKind, period: Duration) {
        let period = period.max(MIN_PERIOD);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let this = Arc::clone(&self);
            let cycle = tokio::spawn(async move {
                match kind {
                    CycleKind::Far => this.run_far_cycle().await,
                    _ => this.run_near_cycle().await,
                }
            });
            if let Err(e) = cycle.await {
                error!(cycle = %kind, error = %e, "refresh cycle aborted");
            }
        }
    }
}
