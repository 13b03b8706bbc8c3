use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use synergia_core::config::CalendarConfig;
use synergia_core::EventRecord;
use thiserror::Error;

use crate::text::{escape_text, push_folded};

/// The record set cannot be turned into a valid document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("event has an empty uid (title: {title})")]
    EmptyUid { title: String },

    #[error("duplicate uid: {0}")]
    DuplicateUid(String),

    #[error("event {uid} ends before it starts")]
    EndBeforeStart { uid: String },
}

/// Turns normalized records into a wire-format calendar document.
pub trait CalendarEncoder: Send + Sync {
    fn encode(&self, events: &[EventRecord]) -> Result<String, FormatError>;
}

/// RFC 5545 writer.
///
/// Events are emitted in chronological order with floating local times, so
/// subscribers show lessons at the wall-clock hour the school publishes.
#[derive(Debug, Clone)]
pub struct IcsEncoder {
    name: String,
    prodid: String,
}

impl IcsEncoder {
    pub fn new(name: impl Into<String>, prodid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prodid: prodid.into(),
        }
    }

    pub fn from_config(config: &CalendarConfig) -> Self {
        Self::new(&config.name, &config.prodid)
    }

    /// Encode with an explicit DTSTAMP, for reproducible output.
    pub fn encode_at(
        &self,
        events: &[EventRecord],
        stamp: DateTime<Utc>,
    ) -> Result<String, FormatError> {
        validate(events)?;

        let mut ordered: Vec<&EventRecord> = events.iter().collect();
        ordered.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.uid.cmp(&b.uid)));

        let dtstamp = stamp.format("%Y%m%dT%H%M%SZ").to_string();
        let mut out = String::new();
        push_folded(&mut out, "BEGIN:VCALENDAR");
        push_folded(&mut out, "VERSION:2.0");
        push_folded(&mut out, &format!("PRODID:{}", escape_text(&self.prodid)));
        push_folded(&mut out, "CALSCALE:GREGORIAN");
        push_folded(&mut out, "METHOD:PUBLISH");
        push_folded(&mut out, &format!("X-WR-CALNAME:{}", escape_text(&self.name)));

        for event in ordered {
            push_folded(&mut out, "BEGIN:VEVENT");
            push_folded(&mut out, &format!("UID:{}", escape_text(&event.uid)));
            push_folded(&mut out, &format!("DTSTAMP:{dtstamp}"));
            push_folded(&mut out, &format!("DTSTART:{}", floating(event.start)));
            push_folded(&mut out, &format!("DTEND:{}", floating(event.end)));
            push_folded(&mut out, &format!("SUMMARY:{}", escape_text(&event.title)));
            if !event.description.is_empty() {
                push_folded(
                    &mut out,
                    &format!("DESCRIPTION:{}", escape_text(&event.description)),
                );
            }
            push_folded(&mut out, "END:VEVENT");
        }

        push_folded(&mut out, "END:VCALENDAR");
        Ok(out)
    }
}

impl Default for IcsEncoder {
    fn default() -> Self {
        Self::from_config(&CalendarConfig::default())
    }
}

impl CalendarEncoder for IcsEncoder {
    fn encode(&self, events: &[EventRecord]) -> Result<String, FormatError> {
        self.encode_at(events, Utc::now())
    }
}

fn floating(at: NaiveDateTime) -> String {
    at.format("%Y%m%dT%H%M%S").to_string()
}

fn validate(events: &[EventRecord]) -> Result<(), FormatError> {
    let mut seen = HashSet::with_capacity(events.len());
    for event in events {
        if event.uid.trim().is_empty() {
            return Err(FormatError::EmptyUid {
                title: event.title.clone(),
            });
        }
        if !seen.insert(event.uid.as_str()) {
            return Err(FormatError::DuplicateUid(event.uid.clone()));
        }
        if event.end < event.start {
            return Err(FormatError::EndBeforeStart {
                uid: event.uid.clone(),
            });
        }
    }
    Ok(())
}
