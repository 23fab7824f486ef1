use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rusqlite::Connection;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::database::{quarantine_blob, read_blob, read_value, write_blob, Database, DATA_KEY, EVENTS_KEY};
use crate::error::Result;
use crate::models::{
    normalize_optional, normalize_required, Event, EventKind, EventPatch, NewEvent, StudyData,
};

/// Free-text event shape from the earlier revision of the events blob.
/// Unknown fields are refused so a damaged current-schema blob is never
/// mistaken for legacy data.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LegacyEvent {
    id: String,
    title: String,
    date: String,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    description: Option<String>,
    subject: String,
    #[serde(default)]
    reminder: Option<String>,
}

impl LegacyEvent {
    fn into_event(self, data: &StudyData) -> Option<Event> {
        let date = match parse_local_datetime(&self.date, self.time.as_deref()) {
            Some(date) => date,
            None => {
                warn!(
                    "[STORE] Dropping legacy event '{}': unreadable date '{}'",
                    self.id, self.date
                );
                return None;
            }
        };
        // Name → id is best effort; an unmatched name becomes "no subject"
        let subject_name = self.subject.trim();
        let subject_id = data
            .subjects
            .iter()
            .find(|s| !subject_name.is_empty() && s.name.eq_ignore_ascii_case(subject_name))
            .map(|s| s.id.clone());

        Some(Event {
            id: self.id,
            title: self.title,
            date,
            description: normalize_optional(self.description),
            subject_id,
            kind: EventKind::Reminder,
            reminder_offset_minutes: self
                .reminder
                .as_deref()
                .map(parse_reminder_minutes)
                .unwrap_or(0),
            completed: false,
            reminded_at: None,
        })
    }
}

pub(crate) fn parse_local_datetime(date: &str, time: Option<&str>) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(date.trim()) {
        return Some(dt.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let time = time
        .and_then(|t| NaiveTime::parse_from_str(t.trim(), "%H:%M").ok())
        .unwrap_or(NaiveTime::MIN);
    Local
        .from_local_datetime(&NaiveDateTime::new(day, time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// "15 minutes", "1 hour", "2 days", "1 week" → minutes; anything else → 0
pub(crate) fn parse_reminder_minutes(text: &str) -> u32 {
    let lowered = text.trim().to_ascii_lowercase();
    let mut parts = lowered.split_whitespace();
    let (amount, unit) = match (parts.next(), parts.next()) {
        (Some(amount), Some(unit)) => (amount, unit),
        _ => return 0,
    };
    let amount: u32 = match amount.parse() {
        Ok(amount) => amount,
        Err(_) => return 0,
    };
    let factor = match unit.trim_end_matches('s') {
        "minute" | "min" => 1,
        "hour" | "hr" => 60,
        "day" => 60 * 24,
        "week" => 60 * 24 * 7,
        _ => 0,
    };
    amount.saturating_mul(factor)
}

/// Events blob, upgrading the legacy shape on the fly
fn load_events(conn: &Connection) -> Result<Vec<Event>> {
    let raw = match read_value(conn, EVENTS_KEY)? {
        Some(raw) => raw,
        None => return Ok(Vec::new()),
    };
    let err = match serde_json::from_str::<Vec<Event>>(&raw) {
        Ok(events) => return Ok(events),
        Err(e) => e,
    };
    if let Ok(legacy) = serde_json::from_str::<Vec<LegacyEvent>>(&raw) {
        let data = read_blob::<StudyData>(conn, DATA_KEY)?.unwrap_or_default();
        let total = legacy.len();
        let events: Vec<Event> = legacy
            .into_iter()
            .filter_map(|e| e.into_event(&data))
            .collect();
        info!(
            "[STORE] Converted {} of {} legacy event(s) to the current schema",
            events.len(),
            total
        );
        return Ok(events);
    }
    quarantine_blob(conn, EVENTS_KEY, &raw, &err.to_string())?;
    Ok(Vec::new())
}

fn sort_by_date(events: &mut [Event]) {
    events.sort_by(|a, b| a.date.cmp(&b.date));
}

impl Database {
    /// All events, ascending by date
    pub fn list_events(&self) -> Result<Vec<Event>> {
        let mut events = self.with_conn(load_events)?;
        sort_by_date(&mut events);
        Ok(events)
    }

    pub fn get_event(&self, id: &str) -> Result<Option<Event>> {
        Ok(self.with_conn(load_events)?.into_iter().find(|e| e.id == id))
    }

    pub fn create_event(&self, new_event: NewEvent) -> Result<Event> {
        let event = new_event.into_event()?;
        self.with_transaction("create_event", |conn| {
            let mut events = load_events(conn)?;
            events.push(event.clone());
            write_blob(conn, EVENTS_KEY, &events)
        })?;
        info!("[STORE] Event created: {} ({})", event.title, event.id);
        Ok(event)
    }

    /// Apply `patch`. Unknown id returns `Ok(false)` without writing.
    /// Moving the date or the offset re-arms the reminder.
    pub fn update_event(&self, id: &str, patch: EventPatch) -> Result<bool> {
        let title = patch
            .title
            .as_deref()
            .map(|t| normalize_required(t, "Event title"))
            .transpose()?;

        self.with_transaction("update_event", |conn| {
            let mut events = load_events(conn)?;
            let event = match events.iter_mut().find(|e| e.id == id) {
                Some(event) => event,
                None => {
                    warn!("[STORE] update_event: unknown id '{}', ignoring", id);
                    return Ok(false);
                }
            };

            if let Some(title) = title {
                event.title = title;
            }
            if let Some(date) = patch.date {
                if date != event.date {
                    event.reminded_at = None;
                }
                event.date = date;
            }
            if let Some(description) = patch.description {
                event.description = normalize_optional(description);
            }
            if let Some(subject_id) = patch.subject_id {
                event.subject_id = normalize_optional(subject_id);
            }
            if let Some(kind) = patch.kind {
                event.kind = kind;
            }
            if let Some(offset) = patch.reminder_offset_minutes {
                if offset != event.reminder_offset_minutes {
                    event.reminded_at = None;
                }
                event.reminder_offset_minutes = offset;
            }
            if let Some(completed) = patch.completed {
                event.completed = completed;
            }

            write_blob(conn, EVENTS_KEY, &events)?;
            Ok(true)
        })
    }

    /// Idempotent: deleting an absent event returns `Ok(false)`.
    pub fn delete_event(&self, id: &str) -> Result<bool> {
        self.with_transaction("delete_event", |conn| {
            let mut events = load_events(conn)?;
            let before = events.len();
            events.retain(|e| e.id != id);
            if events.len() == before {
                debug!("[STORE] delete_event: '{}' already absent", id);
                return Ok(false);
            }
            write_blob(conn, EVENTS_KEY, &events)?;
            Ok(true)
        })
    }

    pub fn upcoming_events(&self, window_days: u32) -> Result<Vec<Event>> {
        self.upcoming_events_at(Utc::now(), window_days)
    }

    /// Incomplete events with `date` in `[now, now + window_days]`, ascending
    pub fn upcoming_events_at(&self, now: DateTime<Utc>, window_days: u32) -> Result<Vec<Event>> {
        let until = now
            .checked_add_signed(Duration::days(i64::from(window_days)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Ok(self
            .list_events()?
            .into_iter()
            .filter(|e| !e.completed && e.date >= now && e.date <= until)
            .collect())
    }

    /// Incomplete, not yet reminded events whose reminder window has opened
    pub fn due_reminders_at(&self, now: DateTime<Utc>) -> Result<Vec<Event>> {
        Ok(self
            .list_events()?
            .into_iter()
            .filter(|e| e.is_reminder_due(now))
            .collect())
    }

    /// Stamp the event as reminded. Returns `false` if already stamped or unknown.
    pub fn mark_event_reminded(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        self.with_transaction("mark_event_reminded", |conn| {
            let mut events = load_events(conn)?;
            match events.iter_mut().find(|e| e.id == id) {
                Some(event) if event.reminded_at.is_none() => {
                    event.reminded_at = Some(at);
                }
                _ => return Ok(false),
            }
            write_blob(conn, EVENTS_KEY, &events)?;
            Ok(true)
        })
    }
}
