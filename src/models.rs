use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Study topic accumulating total tracked time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    /// Seconds, only grows through recorded sessions or an explicit edit
    pub total_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_tag: Option<String>,
}

impl Subject {
    pub(crate) fn new(name: &str) -> Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: normalize_required(name, "Subject name")?,
            total_time: 0,
            color_tag: None,
        })
    }
}

/// One completed study interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub subject_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Always `floor((end_time - start_time) / 1s)`
    pub duration: u64,
}

impl Session {
    pub(crate) fn new(
        subject_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Self> {
        if end_time <= start_time {
            return Err(StoreError::validation(format!(
                "Session end ({}) must be after start ({})",
                end_time.to_rfc3339(),
                start_time.to_rfc3339()
            )));
        }
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: subject_id.to_string(),
            start_time,
            end_time,
            duration: whole_seconds_between(start_time, end_time),
        })
    }

    /// Recomputes the duration from the stored timestamps.
    pub fn recomputed_duration(&self) -> u64 {
        whole_seconds_between(self.start_time, self.end_time)
    }
}

/// Blob stored under the subjects+sessions key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyData {
    #[serde(default)]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub sessions: Vec<Session>,
}

/// Partial update for [`Subject`]. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct SubjectPatch {
    pub name: Option<String>,
    pub total_time: Option<u64>,
    /// `Some(None)` clears the tag
    pub color_tag: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Exam,
    Assignment,
    StudySession,
    Reminder,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Exam => "exam",
            EventKind::Assignment => "assignment",
            EventKind::StudySession => "study-session",
            EventKind::Reminder => "reminder",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exam" => Ok(EventKind::Exam),
            "assignment" => Ok(EventKind::Assignment),
            "study-session" | "study_session" | "session" => Ok(EventKind::StudySession),
            "reminder" => Ok(EventKind::Reminder),
            other => Err(StoreError::validation(format!(
                "Unknown event type '{}'",
                other
            ))),
        }
    }
}

/// Scheduled deadline or reminder.
///
/// `subject_id` is a lookup key only: deleting the subject does not touch the
/// event, so it may no longer resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub title: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Minutes before `date` at which the reminder becomes due
    #[serde(rename = "notifyBefore", alias = "reminderOffset", default)]
    pub reminder_offset_minutes: u32,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminded_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Moment the reminder window opens
    pub fn reminder_due_at(&self) -> DateTime<Utc> {
        self.date - chrono::Duration::minutes(i64::from(self.reminder_offset_minutes))
    }

    pub fn is_reminder_due(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.reminded_at.is_none() && now >= self.reminder_due_at()
    }
}

/// Input for creating an [`Event`]
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub date: DateTime<Utc>,
    pub description: Option<String>,
    pub subject_id: Option<String>,
    pub kind: EventKind,
    pub reminder_offset_minutes: u32,
}

impl NewEvent {
    pub fn new(title: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            date,
            description: None,
            subject_id: None,
            kind: EventKind::Reminder,
            reminder_offset_minutes: 60,
        }
    }

    pub(crate) fn into_event(self) -> Result<Event> {
        Ok(Event {
            id: uuid::Uuid::new_v4().to_string(),
            title: normalize_required(&self.title, "Event title")?,
            date: self.date,
            description: normalize_optional(self.description),
            subject_id: normalize_optional(self.subject_id),
            kind: self.kind,
            reminder_offset_minutes: self.reminder_offset_minutes,
            completed: false,
            reminded_at: None,
        })
    }
}

/// Partial update for [`Event`]. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub title: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub description: Option<Option<String>>,
    pub subject_id: Option<Option<String>>,
    pub kind: Option<EventKind>,
    pub reminder_offset_minutes: Option<u32>,
    pub completed: Option<bool>,
}

/// Persisted mirror of the timer, stored under its own key.
///
/// The first four fields are the portable shape; the rest let recovery
/// exclude paused time and keep Pomodoro alerts edge-triggered across reloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTimerState {
    pub running: bool,
    pub elapsed_seconds: u64,
    pub active_subject_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub banked_seconds: u64,
    #[serde(default)]
    pub pomodoro_alerts: u64,
}

pub(crate) fn whole_seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    let millis = (end - start).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis / 1000) as u64
    }
}

pub(crate) fn normalize_required(value: &str, what: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StoreError::validation(format!("{} must not be empty", what)));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
