use chrono::{Datelike, Duration, Local, NaiveDate};

use crate::error::{Result, StoreError};
use crate::models::Event;

/// Sunday-first weeks covering every day of the month.
/// Leading and trailing days belong to the neighbouring months.
pub fn month_grid(year: i32, month: u32) -> Result<Vec<[NaiveDate; 7]>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| StoreError::validation(format!("Invalid month {}-{:02}", year, month)))?;
    let next_month_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| StoreError::validation(format!("Month {}-{:02} out of range", year, month)))?;
    let last = next_month_first - Duration::days(1);

    let grid_start = first - Duration::days(i64::from(first.weekday().num_days_from_sunday()));
    let grid_end = last + Duration::days(i64::from(6 - last.weekday().num_days_from_sunday()));

    let mut weeks = Vec::new();
    let mut cursor = grid_start;
    while cursor <= grid_end {
        let mut week = [cursor; 7];
        for (offset, slot) in week.iter_mut().enumerate() {
            *slot = cursor + Duration::days(offset as i64);
        }
        weeks.push(week);
        cursor += Duration::days(7);
    }
    Ok(weeks)
}

/// Events falling on `day` in local time, in their stored order
pub fn events_on<'a>(events: &'a [Event], day: NaiveDate) -> Vec<&'a Event> {
    events
        .iter()
        .filter(|e| e.date.with_timezone(&Local).date_naive() == day)
        .collect()
}
