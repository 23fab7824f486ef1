//! Aggregates over recorded sessions for the statistics views.
//!
//! Sessions are bucketed by the local calendar day of their start time,
//! matching [`Database::list_sessions_for_day`](crate::Database::list_sessions_for_day).

use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::models::{Session, StudyData, Subject};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTotal {
    pub day: NaiveDate,
    pub seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectShare {
    pub subject_id: String,
    pub name: String,
    pub seconds: u64,
    /// 0.0–100.0 of all attributed time
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySummary {
    pub today_seconds: u64,
    pub window_seconds: u64,
    pub session_count: usize,
    pub streak_days: u32,
    pub daily: Vec<DailyTotal>,
    pub subjects: Vec<SubjectShare>,
}

fn local_day(session: &Session) -> NaiveDate {
    session.start_time.with_timezone(&Local).date_naive()
}

fn seconds_by_day(sessions: &[Session]) -> BTreeMap<NaiveDate, u64> {
    let mut by_day = BTreeMap::new();
    for session in sessions {
        let total = by_day.entry(local_day(session)).or_insert(0u64);
        *total = total.saturating_add(session.duration);
    }
    by_day
}

/// Longest window `daily_totals` reports, in days (about a century)
pub const MAX_REPORT_DAYS: u32 = 36_525;

/// One entry per day for the `days` days ending at `end_day`, oldest first.
/// Days without sessions are reported as zero. `days` is capped at
/// [`MAX_REPORT_DAYS`].
pub fn daily_totals(sessions: &[Session], end_day: NaiveDate, days: u32) -> Vec<DailyTotal> {
    let by_day = seconds_by_day(sessions);
    (0..days.min(MAX_REPORT_DAYS))
        .rev()
        .filter_map(|offset| end_day.checked_sub_days(chrono::Days::new(u64::from(offset))))
        .map(|day| DailyTotal {
            day,
            seconds: by_day.get(&day).copied().unwrap_or(0),
        })
        .collect()
}

/// Per-subject time, largest first. Orphan sessions are left out.
pub fn subject_breakdown(subjects: &[Subject], sessions: &[Session]) -> Vec<SubjectShare> {
    let mut by_subject: HashMap<&str, u64> = HashMap::new();
    for session in sessions {
        let total = by_subject.entry(session.subject_id.as_str()).or_insert(0);
        *total = total.saturating_add(session.duration);
    }

    let attributed: u64 = subjects
        .iter()
        .map(|s| by_subject.get(s.id.as_str()).copied().unwrap_or(0))
        .sum();

    let mut shares: Vec<SubjectShare> = subjects
        .iter()
        .map(|subject| {
            let seconds = by_subject.get(subject.id.as_str()).copied().unwrap_or(0);
            let percentage = if attributed == 0 {
                0.0
            } else {
                seconds as f64 * 100.0 / attributed as f64
            };
            SubjectShare {
                subject_id: subject.id.clone(),
                name: subject.name.clone(),
                seconds,
                percentage,
            }
        })
        .collect();
    // stable: equal totals keep insertion order
    shares.sort_by(|a, b| b.seconds.cmp(&a.seconds));
    shares
}

/// Consecutive days with study time ending today, or ending yesterday when
/// nothing has been recorded yet today.
pub fn study_streak(sessions: &[Session], today: NaiveDate) -> u32 {
    let by_day = seconds_by_day(sessions);
    let studied = |day: &NaiveDate| by_day.get(day).copied().unwrap_or(0) > 0;

    let mut cursor = if studied(&today) {
        today
    } else {
        match today.pred_opt() {
            Some(yesterday) => yesterday,
            None => return 0,
        }
    };

    let mut streak = 0;
    while studied(&cursor) {
        streak += 1;
        cursor = match cursor.pred_opt() {
            Some(day) => day,
            None => break,
        };
    }
    streak
}

pub fn summarize(data: &StudyData, today: NaiveDate, days: u32) -> StudySummary {
    let daily = daily_totals(&data.sessions, today, days.max(1));
    StudySummary {
        today_seconds: daily.last().map(|d| d.seconds).unwrap_or(0),
        window_seconds: daily.iter().map(|d| d.seconds).sum(),
        session_count: data.sessions.len(),
        streak_days: study_streak(&data.sessions, today),
        daily,
        subjects: subject_breakdown(&data.subjects, &data.sessions),
    }
}
