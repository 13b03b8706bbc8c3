use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use synergia_core::{EventRecord, WeekKey};

/// Normalized events of one week, as of the last successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct WeekFragment {
    pub week: WeekKey,
    pub events: Vec<EventRecord>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FragmentSummary {
    pub week: WeekKey,
    pub events: usize,
    pub fetched_at: DateTime<Utc>,
}

/// Per-week fragment store.
///
/// A fragment is replaced whole on every successful fetch, so readers see
/// either the old or the new value of a week. Weeks leave the store only
/// through [`WeekFragmentCache::retain`].
#[derive(Debug, Default)]
pub struct WeekFragmentCache {
    fragments: RwLock<BTreeMap<WeekKey, Arc<WeekFragment>>>,
}

impl WeekFragmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, week: WeekKey) -> Option<Arc<WeekFragment>> {
        self.read().get(&week).cloned()
    }

    pub fn replace(&self, week: WeekKey, events: Vec<EventRecord>) -> Arc<WeekFragment> {
        let fragment = Arc::new(WeekFragment {
            week,
            events,
            fetched_at: Utc::now(),
        });
        self.fragments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(week, Arc::clone(&fragment));
        fragment
    }

    /// Drop every week `keep` rejects; returns how many were removed.
    pub fn retain(&self, mut keep: impl FnMut(WeekKey) -> bool) -> usize {
        let mut fragments = self
            .fragments
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = fragments.len();
        fragments.retain(|week, _| keep(*week));
        before - fragments.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Every cached event, ordered by week.
    pub fn all_events(&self) -> Vec<EventRecord> {
        let snapshot: Vec<Arc<WeekFragment>> = self.read().values().cloned().collect();
        snapshot
            .iter()
            .flat_map(|f| f.events.iter().cloned())
            .collect()
    }

    pub fn summaries(&self) -> Vec<FragmentSummary> {
        self.read()
            .values()
            .map(|f| FragmentSummary {
                week: f.week,
                events: f.events.len(),
                fetched_at: f.fetched_at,
            })
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<WeekKey, Arc<WeekFragment>>> {
        self.fragments.read().unwrap_or_else(PoisonError::into_inner)
    }
}
