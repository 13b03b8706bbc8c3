//! Raw upstream records to [`EventRecord`]s.
//!
//! Lesson uids are `{date}-{HH:MM}@lessons.librus`, homework uids
//! `{id}@events.librus`; the two namespaces never overlap.

use std::collections::{HashMap, HashSet};

use chrono::{Days, NaiveDate, NaiveTime};
use synergia_core::{parse_clock, parse_date, EventRecord};
use synergia_gateway::{
    CategoryListing, Homework, HomeworkListing, LessonSlot, SubjectListing, TimetablePage,
};
use tracing::warn;

/// Title used when a homework points at a category the listing lacks.
pub const UNKNOWN_CATEGORY_TITLE: &str = "Wydarzenie";

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    excluded: HashSet<String>,
}

impl Normalizer {
    pub fn new<I, S>(excluded_subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: excluded_subjects.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_excluded(&self, subject: &str) -> bool {
        self.excluded.contains(subject.trim())
    }

    /// Lessons of one timetable page, minus excluded and cancelled slots.
    ///
    /// Two slots starting at the same time on the same day (split groups)
    /// keep distinct uids: the second gets a `-2` suffix and so on, in
    /// upstream order.
    pub fn lessons(&self, page: &TimetablePage) -> Vec<EventRecord> {
        let mut out = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (raw_date, periods) in &page.timetable {
            let date = match parse_date(raw_date) {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "skipping timetable day");
                    continue;
                }
            };
            for slot in periods.iter().flatten() {
                if slot.is_canceled || self.is_excluded(&slot.subject.name) {
                    continue;
                }
                let Some((from, to)) = slot_times(slot) else {
                    continue;
                };

                let key = format!("{}-{}", date, from.format("%H:%M"));
                let n = seen.entry(key.clone()).or_insert(0);
                *n += 1;
                let uid = if *n == 1 {
                    format!("{key}@lessons.librus")
                } else {
                    format!("{key}-{n}@lessons.librus")
                };

                out.push(EventRecord {
                    uid,
                    title: slot.subject.name.trim().to_string(),
                    description: slot
                        .teacher
                        .as_ref()
                        .map(|t| t.full_name())
                        .unwrap_or_default(),
                    start: date.and_time(from),
                    end: date.and_time(to.max(from)),
                });
            }
        }
        out
    }

    /// Homework items resolved against the category and subject listings.
    pub fn homework_events(
        &self,
        categories: &CategoryListing,
        subjects: &SubjectListing,
        homeworks: &HomeworkListing,
    ) -> Vec<EventRecord> {
        let category_names: HashMap<u64, &str> = categories
            .categories
            .iter()
            .map(|c| (c.id, c.name.as_str()))
            .collect();
        let subject_names: HashMap<u64, &str> = subjects
            .subjects
            .iter()
            .map(|s| (s.id, s.name.as_str()))
            .collect();

        homeworks
            .home_works
            .iter()
            .filter_map(|hw| homework_event(hw, &category_names, &subject_names))
            .collect()
    }
}

fn slot_times(slot: &LessonSlot) -> Option<(NaiveTime, NaiveTime)> {
    match (parse_clock(&slot.hour_from), parse_clock(&slot.hour_to)) {
        (Ok(from), Ok(to)) => Some((from, to)),
        (Err(e), _) | (_, Err(e)) => {
            warn!(subject = %slot.subject.name, error = %e, "skipping lesson slot");
            None
        }
    }
}

fn homework_event(
    hw: &Homework,
    categories: &HashMap<u64, &str>,
    subjects: &HashMap<u64, &str>,
) -> Option<EventRecord> {
    let date = match parse_date(&hw.date) {
        Ok(d) => d,
        Err(e) => {
            warn!(homework = hw.id, error = %e, "skipping homework");
            return None;
        }
    };

    let mut title = categories
        .get(&hw.category.id)
        .copied()
        .unwrap_or(UNKNOWN_CATEGORY_TITLE)
        .to_string();
    if let Some(subject) = hw.subject.and_then(|s| subjects.get(&s.id)) {
        title.push_str(" - ");
        title.push_str(subject);
    }

    let (start, end) = homework_span(hw, date);
    Some(EventRecord {
        uid: format!("{}@events.librus", hw.id),
        title,
        description: hw.content.trim().to_string(),
        start,
        end,
    })
}

/// Timed when both clock fields parse, otherwise the whole day.
fn homework_span(
    hw: &Homework,
    date: NaiveDate,
) -> (chrono::NaiveDateTime, chrono::NaiveDateTime) {
    let from = hw.time_from.as_deref().and_then(|t| parse_clock(t).ok());
    let to = hw.time_to.as_deref().and_then(|t| parse_clock(t).ok());
    match (from, to) {
        (Some(from), Some(to)) => (date.and_time(from), date.and_time(to.max(from))),
        _ => {
            let start = date.and_time(NaiveTime::MIN);
            let end = date
                .checked_add_days(Days::new(1))
                .map(|d| d.and_time(NaiveTime::MIN))
                .unwrap_or(start);
            (start, end)
        }
    }
}
