//! Raw upstream records, shaped like the Librus Synergia JSON.
//!
//! Only the fields the calendar needs are modelled; everything else in the
//! upstream payload is ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ── Timetable ─────────────────────────────────────────────────

/// One week of the timetable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimetablePage {
    /// `YYYY-MM-DD` → lesson periods of that day → slots in that period.
    /// Free periods are empty lists.
    #[serde(default)]
    pub timetable: BTreeMap<String, Vec<Vec<LessonSlot>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LessonSlot {
    pub subject: SubjectName,
    #[serde(default)]
    pub teacher: Option<Teacher>,
    /// `HH:MM` (sometimes with seconds).
    pub hour_from: String,
    pub hour_to: String,
    #[serde(default, alias = "IsCancelled")]
    pub is_canceled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubjectName {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Teacher {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl Teacher {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

// ── Homework ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IdRef {
    pub id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HomeworkCategory {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Subject {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Homework {
    pub id: u64,
    #[serde(default)]
    pub content: String,
    /// `YYYY-MM-DD`.
    pub date: String,
    pub category: IdRef,
    #[serde(default)]
    pub subject: Option<IdRef>,
    #[serde(default)]
    pub time_from: Option<String>,
    #[serde(default)]
    pub time_to: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CategoryListing {
    #[serde(default)]
    pub categories: Vec<HomeworkCategory>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubjectListing {
    #[serde(default)]
    pub subjects: Vec<Subject>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HomeworkListing {
    #[serde(default)]
    pub home_works: Vec<Homework>,
}
