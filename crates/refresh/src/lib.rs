//! Scheduled cache refresh for the calendar feeds.
//!
//! The school year is split into weekly fragments fetched through a single
//! throttled [`RequestQueue`](synergia_queue::RequestQueue). Near weeks
//! (current plus the next two) refresh often, far weeks rarely; after each
//! batch the lessons document is recompiled from every fragment. The events
//! feed bypasses fragments and is fetched directly behind a TTL.
//!
//! See [`RefreshScheduler`] for the cadence and [`RefreshPipeline`] for the
//! fetch/compile machinery.

pub mod artifact;
pub mod error;
pub mod fragments;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod scheduler;
pub mod token;

pub use artifact::{CompiledArtifact, Feed, FeedArtifact};
pub use error::RefreshError;
pub use fragments::{FragmentSummary, WeekFragment, WeekFragmentCache};
pub use metrics::{CycleStats, RefreshMetrics};
pub use normalize::Normalizer;
pub use pipeline::{RefreshPipeline, WeekOutcome};
pub use scheduler::{BatchReport, CompileOutcome, CycleKind, RefreshScheduler};
pub use token::SessionToken;
