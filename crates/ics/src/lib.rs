//! iCalendar (RFC 5545) encoding of normalized event records.

pub mod encoder;
pub mod text;

pub use encoder::{CalendarEncoder, FormatError, IcsEncoder};
