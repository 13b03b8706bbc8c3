//! Fetch, normalize, cache and compile.
//!
//! Every upstream call, including the login that may precede it, runs as
//! one task on the [`RequestQueue`], so the session token is only ever
//! touched from the single queue lane.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use synergia_core::config::RefreshConfig;
use synergia_core::{EventRecord, WeekKey};
use synergia_gateway::{Credentials, GatewayError, UpstreamGateway};
use synergia_ics::CalendarEncoder;
use synergia_queue::{QueueStats, RequestQueue};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::artifact::{CompiledArtifact, Feed, FeedArtifact};
use crate::error::RefreshError;
use crate::fragments::{WeekFragment, WeekFragmentCache};
use crate::normalize::Normalizer;
use crate::token::SessionToken;

/// Result of fetching one week.
#[derive(Debug)]
pub enum WeekOutcome {
    /// The fragment was replaced with fresh data.
    Fresh(Arc<WeekFragment>),
    /// The fetch failed; the previous fragment (if any) is untouched.
    Stale {
        error: RefreshError,
        previous: Option<Arc<WeekFragment>>,
    },
}

impl WeekOutcome {
    pub fn is_fresh(&self) -> bool {
        matches!(self, WeekOutcome::Fresh(_))
    }

    /// Events of the week as currently cached, empty if never fetched.
    pub fn events(&self) -> &[EventRecord] {
        match self {
            WeekOutcome::Fresh(f) => &f.events,
            WeekOutcome::Stale {
                previous: Some(f), ..
            } => &f.events,
            WeekOutcome::Stale { previous: None, .. } => &[],
        }
    }
}

pub struct RefreshPipeline {
    gateway: Arc<dyn UpstreamGateway>,
    encoder: Arc<dyn CalendarEncoder>,
    credentials: Arc<Credentials>,
    token: Arc<SessionToken>,
    queue: RequestQueue,
    normalizer: Normalizer,
    fragments: WeekFragmentCache,
    lessons: FeedArtifact,
    events: FeedArtifact,
    /// Single-flight guard for the events feed refresh.
    events_refresh: Mutex<()>,
    auth_retry_backoff: Duration,
    events_ttl: Duration,
}

impl RefreshPipeline {
    pub fn new(
        gateway: Arc<dyn UpstreamGateway>,
        encoder: Arc<dyn CalendarEncoder>,
        credentials: Credentials,
        config: &RefreshConfig,
    ) -> Self {
        Self {
            gateway,
            encoder,
            credentials: Arc::new(credentials),
            token: Arc::new(SessionToken::new(config.token_lifetime())),
            queue: RequestQueue::new(config.request_delay()),
            normalizer: Normalizer::new(config.excluded_subjects.iter().cloned()),
            fragments: WeekFragmentCache::new(),
            lessons: FeedArtifact::new(Feed::Lessons),
            events: FeedArtifact::new(Feed::Events),
            events_refresh: Mutex::new(()),
            auth_retry_backoff: config.auth_retry_backoff(),
            events_ttl: config.events_ttl(),
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn fragments(&self) -> &WeekFragmentCache {
        &self.fragments
    }

    pub fn lessons(&self) -> &FeedArtifact {
        &self.lessons
    }

    pub fn events(&self) -> &FeedArtifact {
        &self.events
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn events_ttl(&self) -> Duration {
        self.events_ttl
    }

    /// Run `call` on the queue lane after making sure a session exists.
    ///
    /// A login failure is reported without calling the gateway.
    async fn queued<T, F, Fut>(&self, force_login: bool, call: F) -> Result<T, RefreshError>
    where
        F: FnOnce(Arc<dyn UpstreamGateway>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
        T: Send + 'static,
    {
        let gateway = Arc::clone(&self.gateway);
        let token = Arc::clone(&self.token);
        let credentials = Arc::clone(&self.credentials);

        self.queue
            .submit(move || async move {
                token
                    .ensure(force_login, || gateway.authenticate(&credentials))
                    .await?;
                call(gateway).await.map_err(RefreshError::from)
            })
            .await?
    }

    /// Run `op`, and on an auth rejection invalidate the session, wait the
    /// backoff and run it exactly once more with a forced login.
    async fn with_auth_retry<T, F, Fut>(&self, what: &str, op: F) -> Result<T, RefreshError>
    where
        F: Fn(bool) -> Fut,
        Fut: Future<Output = Result<T, RefreshError>>,
    {
        match op(false).await {
            Err(e) if e.is_auth() => {
                warn!(what, error = %e, "auth rejected, retrying once with a fresh session");
                self.token.invalidate().await;
                tokio::time::sleep(self.auth_retry_backoff).await;
                op(true).await
            }
            other => other,
        }
    }

    /// Fetch one week and replace its fragment on success.
    ///
    /// Failures are not fatal: the old fragment stays and is reported back.
    pub async fn fetch_week(&self, week: WeekKey) -> WeekOutcome {
        let result = self
            .with_auth_retry("timetable", |force| async move {
                let page = self
                    .queued(force, move |gw| async move { gw.fetch_timetable(week).await })
                    .await?;
                Ok::<_, RefreshError>(self.normalizer.lessons(&page))
            })
            .await;

        match result {
            Ok(events) => {
                debug!(week = %week, events = events.len(), "week fetched");
                WeekOutcome::Fresh(self.fragments.replace(week, events))
            }
            Err(error) => {
                let previous = self.fragments.get(week);
                warn!(
                    week = %week,
                    error = %error,
                    kept_stale = previous.is_some(),
                    "week fetch failed"
                );
                WeekOutcome::Stale { error, previous }
            }
        }
    }

    /// Re-encode the lessons document from every cached fragment.
    ///
    /// On encoder failure the previous document stays in place.
    pub fn compile_lessons(&self) -> Result<Arc<CompiledArtifact>, RefreshError> {
        let events = self.fragments.all_events();
        match self.encoder.encode(&events) {
            Ok(document) => {
                let artifact = self.lessons.replace(document);
                info!(
                    events = events.len(),
                    weeks = self.fragments.len(),
                    "lessons calendar compiled"
                );
                Ok(artifact)
            }
            Err(e) => {
                error!(error = %e, "lessons calendar encoding failed, keeping previous document");
                Err(e.into())
            }
        }
    }

    /// The events document, refetched when older than the TTL.
    ///
    /// Concurrent callers share one refresh. If the refresh fails a stale
    /// document is served when one exists.
    pub async fn events_feed(&self) -> Result<Arc<CompiledArtifact>, RefreshError> {
        if let Some(fresh) = self.events.fresh_within(self.events_ttl) {
            return Ok(fresh);
        }

        let _flight = self.events_refresh.lock().await;
        if let Some(fresh) = self.events.fresh_within(self.events_ttl) {
            return Ok(fresh);
        }

        match self.refresh_events().await {
            Ok(artifact) => Ok(artifact),
            Err(e) => match self.events.get() {
                Some(stale) => {
                    warn!(error = %e, age_secs = stale.age().as_secs(), "events refresh failed, serving stale calendar");
                    Ok(stale)
                }
                None => {
                    error!(error = %e, "events refresh failed with nothing cached");
                    Err(e)
                }
            },
        }
    }

    async fn refresh_events(&self) -> Result<Arc<CompiledArtifact>, RefreshError> {
        let events = self
            .with_auth_retry("homework", |force| async move {
                let categories = self
                    .queued(force, |gw| async move { gw.fetch_homework_categories().await })
                    .await?;
                let subjects = self
                    .queued(false, |gw| async move { gw.fetch_subjects().await })
                    .await?;
                let homeworks = self
                    .queued(false, |gw| async move { gw.fetch_homeworks().await })
                    .await?;
                Ok::<_, RefreshError>(self.normalizer.homework_events(
                    &categories,
                    &subjects,
                    &homeworks,
                ))
            })
            .await?;

        let document = self.encoder.encode(&events).map_err(|e| {
            error!(error = %e, "events calendar encoding failed");
            RefreshError::from(e)
        })?;
        info!(events = events.len(), "events calendar refreshed");
        Ok(self.events.replace(document))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use synergia_gateway::{
        CategoryListing, HomeworkListing, LessonSlot, SubjectListing, SubjectName, TimetablePage,
    };
    use synergia_ics::IcsEncoder;
    use tokio::time::Instant;

    /// Gateway that rejects the first `reject_fetches` timetable calls as
    /// expired sessions and fails weeks listed in `broken`.
    #[derive(Default)]
    struct FakeGateway {
        logins: AtomicUsize,
        fetches: AtomicUsize,
        reject_fetches: AtomicUsize,
        reject_logins: bool,
        broken: StdMutex<Vec<WeekKey>>,
        fetched_at: StdMutex<Vec<Instant>>,
        homework_calls: AtomicUsize,
    }

    fn slot(subject: &str, from: &str, to: &str) -> LessonSlot {
        LessonSlot {
            subject: SubjectName {
                name: subject.to_string(),
            },
            teacher: None,
            hour_from: from.to_string(),
            hour_to: to.to_string(),
            is_canceled: false,
        }
    }

    #[async_trait]
    impl UpstreamGateway for FakeGateway {
        async fn authenticate(&self, _: &Credentials) -> Result<(), GatewayError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            if self.reject_logins {
                return Err(GatewayError::Auth("bad password".into()));
            }
            Ok(())
        }

        async fn fetch_timetable(&self, week: WeekKey) -> Result<TimetablePage, GatewayError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.fetched_at.lock().unwrap().push(Instant::now());
            let rejected = self
                .reject_fetches
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if rejected {
                return Err(GatewayError::Auth("401: TokenIsExpired".into()));
            }
            if self.broken.lock().unwrap().contains(&week) {
                return Err(GatewayError::Api {
                    status: 500,
                    body: "boom".into(),
                });
            }
            let mut timetable = BTreeMap::new();
            timetable.insert(
                week.to_string(),
                vec![vec![slot("Matematyka", "08:00", "08:45")]],
            );
            Ok(TimetablePage { timetable })
        }

        async fn fetch_homework_categories(&self) -> Result<CategoryListing, GatewayError> {
            self.homework_calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::from_str(r#"{"Categories": [{"Id": 3, "Name": "Zadanie"}]}"#).unwrap())
        }

        async fn fetch_subjects(&self) -> Result<SubjectListing, GatewayError> {
            Ok(SubjectListing::default())
        }

        async fn fetch_homeworks(&self) -> Result<HomeworkListing, GatewayError> {
            Ok(serde_json::from_str(
                r#"{"HomeWorks": [{"Id": 1, "Date": "2024-10-01", "Category": {"Id": 3}}]}"#,
            )
            .unwrap())
        }
    }

    fn config() -> RefreshConfig {
        RefreshConfig {
            request_delay_ms: 10,
            ..RefreshConfig::default()
        }
    }

    fn pipeline(gateway: Arc<FakeGateway>) -> RefreshPipeline {
        RefreshPipeline::new(
            gateway,
            Arc::new(IcsEncoder::default()),
            Credentials::new("uczen", "haslo"),
            &config(),
        )
    }

    fn week(s: &str) -> WeekKey {
        s.parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_week_logs_in_once_and_stores_fragment() {
        let gateway = Arc::new(FakeGateway::default());
        let pipeline = pipeline(Arc::clone(&gateway));

        assert!(pipeline.fetch_week(week("2024-09-02")).await.is_fresh());
        assert!(pipeline.fetch_week(week("2024-09-09")).await.is_fresh());

        assert_eq!(gateway.logins.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.fragments().len(), 2);
        assert!(pipeline.token().is_valid().await);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_rejection_retries_once_with_fresh_login() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.reject_fetches.store(1, Ordering::SeqCst);
        let pipeline = pipeline(Arc::clone(&gateway));

        let outcome = pipeline.fetch_week(week("2024-09-02")).await;
        assert!(outcome.is_fresh());
        assert_eq!(outcome.events().len(), 1);
        assert_eq!(gateway.logins.load(Ordering::SeqCst), 2);
        assert_eq!(gateway.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_retry_waits_the_backoff_before_fetching_again() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.reject_fetches.store(1, Ordering::SeqCst);
        let pipeline = pipeline(Arc::clone(&gateway));

        assert!(pipeline.fetch_week(week("2024-09-02")).await.is_fresh());

        let times = gateway.fetched_at.lock().unwrap().clone();
        assert_eq!(times.len(), 2);
        let gap = times[1] - times[0];
        assert!(
            gap >= config().auth_retry_backoff(),
            "retry fired after {gap:?}, backoff is {:?}",
            config().auth_retry_backoff()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_auth_rejection_gives_up_for_the_cycle() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.reject_fetches.store(5, Ordering::SeqCst);
        let pipeline = pipeline(Arc::clone(&gateway));

        let outcome = pipeline.fetch_week(week("2024-09-02")).await;
        match outcome {
            WeekOutcome::Stale { error, previous } => {
                assert!(error.is_auth());
                assert!(previous.is_none());
            }
            other => panic!("expected stale outcome, got {other:?}"),
        }
        assert_eq!(gateway.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn login_failure_never_reaches_the_gateway_fetch() {
        let gateway = Arc::new(FakeGateway {
            reject_logins: true,
            ..FakeGateway::default()
        });
        let pipeline = pipeline(Arc::clone(&gateway));

        let outcome = pipeline.fetch_week(week("2024-09-02")).await;
        assert!(!outcome.is_fresh());
        assert!(outcome.events().is_empty());
        assert_eq!(gateway.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refetch_keeps_previous_fragment() {
        let gateway = Arc::new(FakeGateway::default());
        let pipeline = pipeline(Arc::clone(&gateway));
        let w = week("2024-09-02");

        let first = match pipeline.fetch_week(w).await {
            WeekOutcome::Fresh(f) => f,
            other => panic!("expected fresh, got {other:?}"),
        };
        gateway.broken.lock().unwrap().push(w);

        let outcome = pipeline.fetch_week(w).await;
        assert!(!outcome.is_fresh());
        assert_eq!(outcome.events(), first.events.as_slice());
        assert_eq!(pipeline.fragments().get(w).unwrap().fetched_at, first.fetched_at);
        // Non-auth failures are not retried.
        assert_eq!(gateway.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn compile_builds_lessons_document() {
        let gateway = Arc::new(FakeGateway::default());
        let pipeline = pipeline(gateway);
        pipeline.fetch_week(week("2024-09-02")).await;

        let artifact = pipeline.compile_lessons().unwrap();
        assert!(artifact.document.contains("UID:2024-09-02-08:00@lessons.librus"));
        assert!(pipeline.lessons().get().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn events_feed_is_cached_for_ttl() {
        let gateway = Arc::new(FakeGateway::default());
        let pipeline = pipeline(Arc::clone(&gateway));

        let first = pipeline.events_feed().await.unwrap();
        assert!(first.document.contains("SUMMARY:Zadanie"));
        let again = pipeline.events_feed().await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(gateway.homework_calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(pipeline.events_ttl() + Duration::from_secs(1)).await;
        let refreshed = pipeline.events_feed().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert_eq!(gateway.homework_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_events_readers_share_one_refresh() {
        let gateway = Arc::new(FakeGateway::default());
        let pipeline = Arc::new(pipeline(Arc::clone(&gateway)));

        let (a, b) = tokio::join!(pipeline.events_feed(), pipeline.events_feed());
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(gateway.homework_calls.load(Ordering::SeqCst), 1);
    }
}
