use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid week key '{0}': expected YYYY-MM-DD")]
    InvalidWeekKey(String),

    #[error("week key {0} is not a Monday")]
    NotMonday(String),

    #[error("invalid clock time '{0}': expected HH:MM or HH:MM:SS")]
    InvalidTime(String),

    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),
}
