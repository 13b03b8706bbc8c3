//! Scheduler behaviour against an in-memory gateway on a paused clock.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use synergia_core::config::RefreshConfig;
use synergia_core::{EventRecord, FixedClock, WeekKey, WeekWindow};
use synergia_gateway::{
    CategoryListing, Credentials, GatewayError, HomeworkListing, LessonSlot, SubjectListing,
    SubjectName, TimetablePage, UpstreamGateway,
};
use synergia_ics::{CalendarEncoder, FormatError, IcsEncoder};
use synergia_refresh::{
    CompileOutcome, CycleKind, RefreshError, RefreshPipeline, RefreshScheduler,
};

#[derive(Default)]
struct FakeGateway {
    logins: AtomicUsize,
    requested: Mutex<Vec<WeekKey>>,
    broken: Mutex<HashSet<WeekKey>>,
    all_broken: AtomicBool,
}

impl FakeGateway {
    fn requested(&self) -> Vec<WeekKey> {
        self.requested.lock().unwrap().clone()
    }

    fn break_week(&self, week: WeekKey) {
        self.broken.lock().unwrap().insert(week);
    }
}

#[async_trait]
impl UpstreamGateway for FakeGateway {
    async fn authenticate(&self, _: &Credentials) -> Result<(), GatewayError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_timetable(&self, week: WeekKey) -> Result<TimetablePage, GatewayError> {
        self.requested.lock().unwrap().push(week);
        if self.all_broken.load(Ordering::SeqCst) || self.broken.lock().unwrap().contains(&week) {
            return Err(GatewayError::Api {
                status: 502,
                body: "bad gateway".into(),
            });
        }
        let mut timetable = BTreeMap::new();
        timetable.insert(
            week.to_string(),
            vec![vec![LessonSlot {
                subject: SubjectName {
                    name: "Matematyka".into(),
                },
                teacher: None,
                hour_from: "08:00".into(),
                hour_to: "08:45".into(),
                is_canceled: false,
            }]],
        );
        Ok(TimetablePage { timetable })
    }

    async fn fetch_homework_categories(&self) -> Result<CategoryListing, GatewayError> {
        Ok(CategoryListing::default())
    }

    async fn fetch_subjects(&self) -> Result<SubjectListing, GatewayError> {
        Ok(SubjectListing::default())
    }

    async fn fetch_homeworks(&self) -> Result<HomeworkListing, GatewayError> {
        Ok(HomeworkListing::default())
    }
}

/// Encoder that can be switched into failure mode.
#[derive(Default)]
struct SwitchableEncoder {
    fail: AtomicBool,
}

impl CalendarEncoder for SwitchableEncoder {
    fn encode(&self, events: &[EventRecord]) -> Result<String, FormatError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FormatError::DuplicateUid("forced".into()));
        }
        IcsEncoder::default().encode(events)
    }
}

fn today() -> NaiveDate {
    // Wednesday; near window is Oct 14, Oct 21, Oct 28.
    NaiveDate::from_ymd_opt(2024, 10, 16).unwrap()
}

fn week(s: &str) -> WeekKey {
    s.parse().unwrap()
}

struct Harness {
    gateway: Arc<FakeGateway>,
    encoder: Arc<SwitchableEncoder>,
    scheduler: Arc<RefreshScheduler>,
}

fn harness() -> Harness {
    let config = RefreshConfig {
        request_delay_ms: 10,
        ..RefreshConfig::default()
    };
    let gateway = Arc::new(FakeGateway::default());
    let encoder = Arc::new(SwitchableEncoder::default());
    let pipeline = Arc::new(RefreshPipeline::new(
        gateway.clone(),
        encoder.clone(),
        Credentials::new("uczen", "haslo"),
        &config,
    ));
    let scheduler = Arc::new(RefreshScheduler::new(
        pipeline,
        Arc::new(FixedClock(today())),
        &config,
    ));
    Harness {
        gateway,
        encoder,
        scheduler,
    }
}

#[tokio::test(start_paused = true)]
async fn near_cycle_fetches_exactly_the_near_window() {
    let h = harness();
    let report = h.scheduler.run_near_cycle().await;

    assert_eq!(
        h.gateway.requested(),
        vec![week("2024-10-14"), week("2024-10-21"), week("2024-10-28")]
    );
    assert_eq!(report.fetched, 3);
    assert_eq!(report.compile, CompileOutcome::Compiled);

    let doc = &h.scheduler.pipeline().lessons().get().unwrap().document;
    assert_eq!(doc.matches("BEGIN:VEVENT").count(), 3);
}

#[tokio::test(start_paused = true)]
async fn startup_fetches_near_weeks_first_then_the_rest_of_the_year() {
    let h = harness();
    let report = h.scheduler.run_startup().await;

    let requested = h.gateway.requested();
    let school_weeks: Vec<WeekKey> = WeekWindow::new(today()).all_school_weeks().collect();
    assert_eq!(&requested[..3], &[week("2024-10-14"), week("2024-10-21"), week("2024-10-28")]);
    assert_eq!(requested.len(), school_weeks.len());
    let unique: HashSet<WeekKey> = requested.iter().copied().collect();
    assert_eq!(unique, school_weeks.into_iter().collect::<HashSet<_>>());

    assert_eq!(report.failed, 0);
    assert_eq!(h.scheduler.pipeline().fragments().len(), requested.len());
    assert_eq!(h.scheduler.metrics().runs(CycleKind::Startup), 1);
    assert_eq!(h.scheduler.metrics().compiles, 2);
}

#[tokio::test(start_paused = true)]
async fn far_cycle_skips_near_weeks() {
    let h = harness();
    h.scheduler.run_far_cycle().await;

    let requested = h.gateway.requested();
    assert!(!requested.contains(&week("2024-10-21")));
    assert!(requested.contains(&week("2024-09-02")));
    assert!(requested.contains(&week("2025-06-30")));
}

#[tokio::test(start_paused = true)]
async fn concurrent_near_and_far_cycles_do_not_interleave() {
    let h = harness();
    let (far, near) = tokio::join!(h.scheduler.run_far_cycle(), h.scheduler.run_near_cycle());
    assert_eq!(near.fetched, 3);
    assert!(far.fetched > 0);

    let requested = h.gateway.requested();
    let near_weeks = [week("2024-10-14"), week("2024-10-21"), week("2024-10-28")];
    let positions: Vec<usize> = requested
        .iter()
        .enumerate()
        .filter(|(_, w)| near_weeks.contains(w))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(positions.len(), 3, "total={} near positions={positions:?}", requested.len());
    assert!(
        positions.windows(2).all(|p| p[1] == p[0] + 1),
        "near fetches interleaved with far ones: total={} near positions={positions:?}",
        requested.len()
    );
    assert_eq!(requested.len(), far.requested + near.requested);
}

#[tokio::test(start_paused = true)]
async fn far_cycle_drops_fragments_outside_the_school_year() {
    let h = harness();
    h.scheduler.run_near_cycle().await;
    let fragments = h.scheduler.pipeline().fragments();
    fragments.replace(week("2023-10-16"), Vec::new());
    fragments.replace(week("2025-09-01"), Vec::new());

    h.scheduler.run_far_cycle().await;

    assert!(fragments.get(week("2023-10-16")).is_none());
    assert!(fragments.get(week("2025-09-01")).is_none());
    for near in ["2024-10-14", "2024-10-21", "2024-10-28"] {
        assert!(fragments.get(week(near)).is_some(), "near week {near} was dropped");
    }
    let school_weeks = WeekWindow::new(today()).all_school_weeks().count();
    assert_eq!(fragments.len(), school_weeks);
}

#[tokio::test(start_paused = true)]
async fn failed_only_batch_leaves_artifact_identical() {
    let h = harness();
    h.scheduler.run_near_cycle().await;
    let before = h.scheduler.pipeline().lessons().get().unwrap();

    h.gateway.all_broken.store(true, Ordering::SeqCst);
    let report = h.scheduler.run_near_cycle().await;

    assert_eq!(report.failed, 3);
    assert_eq!(report.compile, CompileOutcome::Skipped);
    let after = h.scheduler.pipeline().lessons().get().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
}

#[tokio::test(start_paused = true)]
async fn partial_failure_still_compiles_with_stale_week() {
    let h = harness();
    h.scheduler.run_near_cycle().await;
    let before = h.scheduler.pipeline().lessons().get().unwrap();

    h.gateway.break_week(week("2024-10-21"));
    let report = h.scheduler.run_near_cycle().await;

    assert_eq!((report.fetched, report.failed), (2, 1));
    assert_eq!(report.compile, CompileOutcome::Compiled);
    let after = h.scheduler.pipeline().lessons().get().unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    // The broken week is still served from its stale fragment.
    assert!(after.document.contains("UID:2024-10-21-08:00@lessons.librus"));
}

#[tokio::test(start_paused = true)]
async fn encoder_failure_keeps_previous_document() {
    let h = harness();
    h.scheduler.run_near_cycle().await;
    let before = h.scheduler.pipeline().lessons().get().unwrap();

    h.encoder.fail.store(true, Ordering::SeqCst);
    let report = h.scheduler.run_near_cycle().await;

    assert_eq!(report.compile, CompileOutcome::Failed);
    assert!(Arc::ptr_eq(&before, &h.scheduler.pipeline().lessons().get().unwrap()));
    assert_eq!(h.scheduler.metrics().compile_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn invalidated_token_forces_new_login() {
    let h = harness();
    h.scheduler.run_near_cycle().await;
    assert_eq!(h.gateway.logins.load(Ordering::SeqCst), 1);

    h.scheduler.pipeline().token().invalidate().await;
    h.scheduler.run_near_cycle().await;
    assert_eq!(h.gateway.logins.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn cold_lessons_feed_runs_one_on_demand_refresh() {
    let h = harness();

    let (a, b) = tokio::join!(h.scheduler.lessons_feed(), h.scheduler.lessons_feed());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(h.gateway.requested().len(), 3);
    assert_eq!(h.scheduler.metrics().runs(CycleKind::OnDemand), 1);

    // Warm reads never touch the gateway.
    h.scheduler.lessons_feed().await.unwrap();
    assert_eq!(h.gateway.requested().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn lessons_feed_not_ready_when_upstream_is_down() {
    let h = harness();
    h.gateway.all_broken.store(true, Ordering::SeqCst);

    let err = h.scheduler.lessons_feed().await.unwrap_err();
    assert!(matches!(err, RefreshError::NotReady));
}

#[tokio::test(start_paused = true)]
async fn spawned_scheduler_runs_near_cycle_on_interval() {
    let h = harness();
    let handle = Arc::clone(&h.scheduler).spawn();

    tokio::time::sleep(Duration::from_secs(1800 + 60)).await;
    let metrics = h.scheduler.metrics();
    assert_eq!(metrics.runs(CycleKind::Startup), 1);
    assert!(metrics.runs(CycleKind::Near) >= 1);
    assert_eq!(metrics.runs(CycleKind::Far), 0);

    handle.abort();
}
