use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Feed {
    Lessons,
    Events,
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feed::Lessons => f.write_str("lessons"),
            Feed::Events => f.write_str("events"),
        }
    }
}

/// An encoded calendar document.
#[derive(Debug)]
pub struct CompiledArtifact {
    pub document: String,
    pub compiled_at: DateTime<Utc>,
    compiled: Instant,
}

impl CompiledArtifact {
    fn new(document: String) -> Self {
        Self {
            document,
            compiled_at: Utc::now(),
            compiled: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.compiled.elapsed()
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }
}

/// Latest compiled document of one feed. Replaced atomically, never edited.
#[derive(Debug)]
pub struct FeedArtifact {
    feed: Feed,
    current: RwLock<Option<Arc<CompiledArtifact>>>,
}

impl FeedArtifact {
    pub fn new(feed: Feed) -> Self {
        Self {
            feed,
            current: RwLock::new(None),
        }
    }

    pub fn feed(&self) -> Feed {
        self.feed
    }

    pub fn get(&self) -> Option<Arc<CompiledArtifact>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn fresh_within(&self, ttl: Duration) -> Option<Arc<CompiledArtifact>> {
        self.get().filter(|a| a.is_fresh(ttl))
    }

    pub fn replace(&self, document: String) -> Arc<CompiledArtifact> {
        let artifact = Arc::new(CompiledArtifact::new(document));
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&artifact));
        artifact
    }

    pub fn compiled_at(&self) -> Option<DateTime<Utc>> {
        self.get().map(|a| a.compiled_at)
    }
}
