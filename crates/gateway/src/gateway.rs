use std::fmt;

use async_trait::async_trait;
use synergia_core::WeekKey;

use crate::records::{CategoryListing, HomeworkListing, SubjectListing, TimetablePage};

/// Login pair for the single upstream account.
#[derive(Clone, Default)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.login.is_empty() || self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Credentials rejected or the session is no longer accepted.
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl GatewayError {
    /// Whether a fresh login could plausibly fix this failure.
    pub fn is_auth(&self) -> bool {
        matches!(self, GatewayError::Auth(_))
    }
}

/// Session-authenticated source of raw timetable and homework data.
///
/// Implementations keep their own session state: a successful
/// [`authenticate`](Self::authenticate) makes the fetch methods usable until
/// the upstream expires the session, at which point they fail with
/// [`GatewayError::Auth`].
#[async_trait]
pub trait UpstreamGateway: Send + Sync {
    /// Start a new upstream session.
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), GatewayError>;

    /// Raw timetable for the week starting at `week`.
    async fn fetch_timetable(&self, week: WeekKey) -> Result<TimetablePage, GatewayError>;

    async fn fetch_homework_categories(&self) -> Result<CategoryListing, GatewayError>;

    async fn fetch_subjects(&self) -> Result<SubjectListing, GatewayError>;

    async fn fetch_homeworks(&self) -> Result<HomeworkListing, GatewayError>;
}
