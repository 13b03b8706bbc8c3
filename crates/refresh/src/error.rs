use synergia_gateway::GatewayError;
use synergia_ics::FormatError;
use synergia_queue::QueueError;

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// Login failed, or the upstream rejected the session.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network or server failure unrelated to the session.
    #[error("upstream failure: {0}")]
    Upstream(#[source] GatewayError),

    #[error("calendar encoding failed: {0}")]
    Format(#[from] FormatError),

    /// No compiled document exists and an on-demand refresh produced none.
    #[error("calendar data not ready yet")]
    NotReady,

    #[error("request queue: {0}")]
    Queue(#[from] QueueError),
}

impl RefreshError {
    pub fn is_auth(&self) -> bool {
        matches!(self, RefreshError::Auth(_))
    }
}

impl From<GatewayError> for RefreshError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Auth(msg) => RefreshError::Auth(msg),
            other => RefreshError::Upstream(other),
        }
    }
}
