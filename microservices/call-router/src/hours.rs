//! Business-hours evaluation
//!
//! Given a schedule and an instant, decide open/closed and the configured
//! action for that state. All comparisons happen in the schedule's timezone.
//!
//! Range convention: half-open `[start, end)`, `start < end`, no wrap past
//! midnight — a day needing overnight coverage is configured as two ranges.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use pbx_store::{BusinessHoursSchedule, ExceptionKind, RoutingTarget, TimeRange};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum HoursError {
    /// More than one exception record for the same date. Ambiguous admin
    /// configuration must never silently pick a winner.
    #[error("duplicate schedule exception for {0}")]
    DuplicateException(NaiveDate),

    /// A range with start >= end (midnight wrap is not supported).
    #[error("invalid time range {start}-{end}")]
    InvalidRange { start: NaiveTime, end: NaiveTime },
}

/// Outcome of evaluating a schedule at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct HoursDecision {
    pub open: bool,
    pub action: RoutingTarget,
}

fn in_any_range(ranges: &[TimeRange], t: NaiveTime) -> Result<bool, HoursError> {
    for range in ranges {
        if !range.is_valid() {
            return Err(HoursError::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }
        if range.contains(t) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Evaluate `schedule` at instant `t`.
///
/// Order of precedence: inactive schedule, then a calendar-date exception,
/// then the weekly day.
pub fn evaluate(
    schedule: &BusinessHoursSchedule,
    t: DateTime<Utc>,
) -> Result<HoursDecision, HoursError> {
    // Inactive schedules always report closed, whatever the clock says
    if !schedule.status.is_active() {
        return Ok(HoursDecision {
            open: false,
            action: schedule.closed_action.clone(),
        });
    }

    let local = t.with_timezone(&schedule.timezone);
    let date = local.date_naive();
    let time = local.time();

    let open = match exception_for(schedule, date)? {
        Some(ExceptionKind::Closed) => false,
        Some(ExceptionKind::SpecialHours { ranges }) => in_any_range(ranges, time)?,
        None => {
            let day = &schedule.days[local.weekday().num_days_from_monday() as usize];
            day.enabled && in_any_range(&day.ranges, time)?
        }
    };

    Ok(HoursDecision {
        open,
        action: if open {
            schedule.open_action.clone()
        } else {
            schedule.closed_action.clone()
        },
    })
}

fn exception_for(
    schedule: &BusinessHoursSchedule,
    date: NaiveDate,
) -> Result<Option<&ExceptionKind>, HoursError> {
    let mut found = None;
    for exception in &schedule.exceptions {
        if exception.date == date {
            if found.is_some() {
                return Err(HoursError::DuplicateException(date));
            }
            found = Some(&exception.kind);
        }
    }
    Ok(found)
}

pub fn is_open(schedule: &BusinessHoursSchedule, t: DateTime<Utc>) -> Result<bool, HoursError> {
    evaluate(schedule, t).map(|d| d.open)
}

pub fn current_action(
    schedule: &BusinessHoursSchedule,
    t: DateTime<Utc>,
) -> Result<RoutingTarget, HoursError> {
    evaluate(schedule, t).map(|d| d.action)
}
