use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::database::{delete_value, read_blob, write_blob, Database, DATA_KEY, TIMER_STATE_KEY};
use crate::error::{Result, StoreError};
use crate::models::{normalize_optional, normalize_required, Session, StudyData, Subject, SubjectPatch};

fn load_data(conn: &Connection) -> Result<StudyData> {
    Ok(read_blob::<StudyData>(conn, DATA_KEY)?.unwrap_or_default())
}

/// Append a session and credit its subject, all against the same in-memory blob
fn push_session(data: &mut StudyData, session: Session) {
    match data.subjects.iter_mut().find(|s| s.id == session.subject_id) {
        Some(subject) => {
            subject.total_time = subject.total_time.saturating_add(session.duration);
        }
        None => {
            warn!(
                "[STORE] Session {} references unknown subject '{}'; recorded without crediting a total",
                session.id, session.subject_id
            );
        }
    }
    data.sessions.push(session);
}

impl Database {
    /// Full subjects+sessions snapshot
    pub fn load_study_data(&self) -> Result<StudyData> {
        self.with_conn(load_data)
    }

    /// Subjects in insertion order
    pub fn list_subjects(&self) -> Result<Vec<Subject>> {
        Ok(self.load_study_data()?.subjects)
    }

    pub fn get_subject(&self, id: &str) -> Result<Option<Subject>> {
        Ok(self
            .list_subjects()?
            .into_iter()
            .find(|subject| subject.id == id))
    }

    pub fn create_subject(&self, name: &str) -> Result<Subject> {
        let subject = Subject::new(name)?;
        self.with_transaction("create_subject", |conn| {
            let mut data = load_data(conn)?;
            data.subjects.push(subject.clone());
            write_blob(conn, DATA_KEY, &data)
        })?;
        info!("[STORE] Subject created: {} ({})", subject.name, subject.id);
        Ok(subject)
    }

    /// Apply `patch` to the subject. Unknown id is not an error: returns `Ok(false)`.
    pub fn update_subject(&self, id: &str, patch: SubjectPatch) -> Result<bool> {
        let name = patch
            .name
            .as_deref()
            .map(|n| normalize_required(n, "Subject name"))
            .transpose()?;

        self.with_transaction("update_subject", |conn| {
            let mut data = load_data(conn)?;
            let subject = match data.subjects.iter_mut().find(|s| s.id == id) {
                Some(subject) => subject,
                None => {
                    warn!("[STORE] update_subject: unknown id '{}', ignoring", id);
                    return Ok(false);
                }
            };
            if let Some(name) = name {
                subject.name = name;
            }
            if let Some(total_time) = patch.total_time {
                subject.total_time = total_time;
            }
            if let Some(color_tag) = patch.color_tag {
                subject.color_tag = normalize_optional(color_tag);
            }
            write_blob(conn, DATA_KEY, &data)?;
            Ok(true)
        })
    }

    /// Delete the subject and every session referencing it. Idempotent.
    pub fn delete_subject(&self, id: &str) -> Result<bool> {
        self.with_transaction("delete_subject", |conn| {
            let mut data = load_data(conn)?;
            let subjects_before = data.subjects.len();
            let sessions_before = data.sessions.len();
            data.subjects.retain(|s| s.id != id);
            data.sessions.retain(|s| s.subject_id != id);

            let removed_subject = data.subjects.len() != subjects_before;
            let removed_sessions = sessions_before - data.sessions.len();
            if !removed_subject && removed_sessions == 0 {
                debug!("[STORE] delete_subject: '{}' already absent", id);
                return Ok(false);
            }
            write_blob(conn, DATA_KEY, &data)?;
            info!(
                "[STORE] Subject {} deleted with {} session(s)",
                id, removed_sessions
            );
            Ok(removed_subject)
        })
    }

    /// Record a finished interval and credit the subject in one write.
    ///
    /// Sessions for an unknown subject are still stored (orphaned), without
    /// crediting any total.
    pub fn record_session(
        &self,
        subject_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Session> {
        let session = Session::new(subject_id, start_time, end_time)?;
        self.with_transaction("record_session", |conn| {
            let mut data = load_data(conn)?;
            push_session(&mut data, session.clone());
            write_blob(conn, DATA_KEY, &data)
        })?;
        info!(
            "[STORE] Session recorded: subject={}, duration={}s",
            session.subject_id, session.duration
        );
        Ok(session)
    }

    /// Record the session and remove the timer mirror in the same transaction,
    /// so a crash in between cannot replay the interval after a reload.
    pub fn complete_timer_session(
        &self,
        subject_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Session> {
        let session = Session::new(subject_id, start_time, end_time)?;
        self.with_transaction("complete_timer_session", |conn| {
            let mut data = load_data(conn)?;
            push_session(&mut data, session.clone());
            write_blob(conn, DATA_KEY, &data)?;
            delete_value(conn, TIMER_STATE_KEY)?;
            Ok(())
        })?;
        info!(
            "[STORE] Timer session completed: subject={}, duration={}s",
            session.subject_id, session.duration
        );
        Ok(session)
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        Ok(self.load_study_data()?.sessions)
    }

    /// Sessions that started on the given local calendar day
    pub fn list_sessions_for_day(&self, day: NaiveDate) -> Result<Vec<Session>> {
        let (from, to) = local_day_bounds(day)?;
        Ok(self
            .list_sessions()?
            .into_iter()
            .filter(|s| s.start_time >= from && s.start_time < to)
            .collect())
    }

    pub fn list_sessions_for_today(&self) -> Result<Vec<Session>> {
        self.list_sessions_for_day(Local::now().date_naive())
    }
}

/// `[local midnight of day, local midnight of next day)` as UTC instants
pub fn local_day_bounds(day: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let next = day
        .succ_opt()
        .ok_or_else(|| StoreError::validation(format!("No day after {}", day)))?;
    Ok((local_midnight(day)?, local_midnight(next)?))
}

fn local_midnight(day: NaiveDate) -> Result<DateTime<Utc>> {
    let naive = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| StoreError::validation(format!("Invalid day {}", day)))?;
    // DST gaps can skip midnight; earliest() then yields None and we fall back to UTC
    Ok(Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive)))
}
