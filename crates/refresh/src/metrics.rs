use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::scheduler::{BatchReport, CycleKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleStats {
    pub runs: u64,
    pub last_started: Option<DateTime<Utc>>,
    pub last_finished: Option<DateTime<Utc>>,
    pub last_duration: Duration,
    /// Rolling mean over every run of this kind.
    pub avg_duration: Duration,
    pub last_weeks_fetched: usize,
    pub last_weeks_failed: usize,
}

/// Refresh bookkeeping, read by the stats endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshMetrics {
    pub cycles: BTreeMap<CycleKind, CycleStats>,
    pub compiles: u64,
    pub compile_failures: u64,
}

impl RefreshMetrics {
    pub fn record_cycle(
        &mut self,
        kind: CycleKind,
        started: DateTime<Utc>,
        duration: Duration,
        report: &BatchReport,
    ) {
        let stats = self.cycles.entry(kind).or_default();
        stats.runs += 1;
        stats.last_started = Some(started);
        stats.last_finished = Some(Utc::now());
        stats.last_duration = duration;
        stats.last_weeks_fetched = report.fetched;
        stats.last_weeks_failed = report.failed;

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / runs
        stats.avg_duration = if stats.runs == 1 {
            duration
        } else {
            let prev = stats.avg_duration.as_nanos() as f64;
            let cur = duration.as_nanos() as f64;
            Duration::from_nanos((prev + (cur - prev) / stats.runs as f64) as u64)
        };

        self.compiles += u64::from(report.compiles);
        self.compile_failures += u64::from(report.compile_failures);
    }

    pub fn runs(&self, kind: CycleKind) -> u64 {
        self.cycles.get(&kind).map(|s| s.runs).unwrap_or(0)
    }
}
