//! Resolution of bookable appointment slots.
//!
//! Candidates are generated from the business hours of the requested day and
//! annotated against the advisor's effective availability window and
//! existing appointments. An availability exception for the exact date wins
//! over the weekly schedule.

use crate::{
    business_hours::BusinessHours,
    types::{Appointment, AvailabilityException, SlotReason, TimeSlot, WeeklyAvailability},
};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

pub const DEFAULT_DURATION_MINUTES: i64 = 60;
pub const SLOT_INTERVAL_MINUTES: i64 = 30;
/// Minimum gap between now and the first slot offered for today.
pub const BOOKING_LEAD_TIME_MINUTES: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotPolicy {
    pub business_hours: BusinessHours,
    pub interval_minutes: i64,
    pub lead_time_minutes: i64,
}

impl Default for SlotPolicy {
    fn default() -> Self {
        Self {
            business_hours: BusinessHours::default(),
            interval_minutes: SLOT_INTERVAL_MINUTES,
            lead_time_minutes: BOOKING_LEAD_TIME_MINUTES,
        }
    }
}

fn default_duration() -> i64 {
    DEFAULT_DURATION_MINUTES
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SlotQuery {
    pub advisor_id: Uuid,
    pub date: NaiveDate,
    /// Meeting length in minutes.
    #[serde(default = "default_duration")]
    #[validate(range(min = 15, max = 480))]
    pub duration: i64,
}

/// Records fetched from the backend for one resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailabilitySnapshot {
    pub weekly: Vec<WeeklyAvailability>,
    pub exceptions: Vec<AvailabilityException>,
    pub appointments: Vec<Appointment>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("{} is not offered on this date", .0.format("%H:%M"))]
    NotOffered(NaiveTime),

    #[error("{0}")]
    Unavailable(SlotReason),
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start: NaiveTime,
    end: NaiveTime,
    outside_reason: SlotReason,
}

/// Half-open interval overlap: touching boundaries do not overlap.
pub fn intervals_overlap<T: PartialOrd>(start_a: T, end_a: T, start_b: T, end_b: T) -> bool {
    !(end_a <= start_b || start_a >= end_b)
}

/// Candidate start times for `query`, every `interval_minutes` from opening
/// time, ending no later than closing time. Past dates yield nothing and
/// today honours the booking lead time.
pub fn candidate_times(query: &SlotQuery, policy: &SlotPolicy, now: NaiveDateTime) -> Vec<NaiveDateTime> {
    let Some(hours) = policy.business_hours.for_weekday(query.date.weekday()) else {
        return vec![];
    };
    if query.date < now.date() {
        return vec![];
    }

    let duration = Duration::minutes(query.duration);
    let interval = Duration::minutes(policy.interval_minutes.max(1));
    let earliest = (query.date == now.date()).then(|| now + Duration::minutes(policy.lead_time_minutes));
    let close = query.date.and_time(hours.close);

    let mut candidates = vec![];
    let mut start = query.date.and_time(hours.open);
    while start + duration <= close {
        if earliest.map_or(true, |earliest| start >= earliest) {
            candidates.push(start);
        }
        start += interval;
    }
    candidates
}

fn governing_window(
    query: &SlotQuery,
    snapshot: &AvailabilitySnapshot,
    policy: &SlotPolicy,
) -> Option<Window> {
    let weekday = query.date.weekday();
    let exception = snapshot
        .exceptions
        .iter()
        .find(|exception| {
            exception.advisor_id == query.advisor_id && exception.exception_date == query.date
        });

    if let Some(exception) = exception {
        if !exception.is_available {
            return None;
        }
        let (start, end) = match (exception.start_time, exception.end_time) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                let hours = policy.business_hours.for_weekday(weekday)?;
                (hours.open, hours.close)
            }
        };
        return Some(Window {
            start,
            end,
            outside_reason: SlotReason::OutsideExceptionHours,
        });
    }

    let day_of_week = weekday.num_days_from_sunday() as i16;
    snapshot
        .weekly
        .iter()
        .find(|row| row.advisor_id == query.advisor_id && row.day_of_week == day_of_week)
        .filter(|row| row.is_available)
        .map(|row| Window {
            start: row.start_time,
            end: row.end_time,
            outside_reason: SlotReason::OutsideRegularHours,
        })
}

/// Annotated slots for `query`. Empty when the advisor does not work that
/// day at all.
pub fn resolve_slots(
    query: &SlotQuery,
    snapshot: &AvailabilitySnapshot,
    policy: &SlotPolicy,
    now: NaiveDateTime,
) -> Vec<TimeSlot> {
    let Some(window) = governing_window(query, snapshot, policy) else {
        return vec![];
    };
    let window_start = query.date.and_time(window.start);
    let window_end = query.date.and_time(window.end);
    let duration = Duration::minutes(query.duration);

    let booked: Vec<(NaiveDateTime, NaiveDateTime)> = snapshot
        .appointments
        .iter()
        .filter(|appointment| appointment.advisor_id == query.advisor_id)
        .filter(|appointment| !appointment.is_cancelled())
        .map(|appointment| {
            (
                appointment.start_time.naive_local(),
                appointment.end_time.naive_local(),
            )
        })
        .collect();

    candidate_times(query, policy, now)
        .into_iter()
        .map(|start| {
            let end = start + duration;
            let available = window_start <= start && end <= window_end;
            let conflict = booked
                .iter()
                .any(|&(booked_start, booked_end)| intervals_overlap(start, end, booked_start, booked_end));

            let reason = if conflict {
                Some(SlotReason::Conflict)
            } else if !available {
                Some(window.outside_reason)
            } else {
                None
            };

            TimeSlot {
                time: start.time(),
                available,
                conflict,
                reason,
            }
        })
        .collect()
}

/// Checks that `time` is one of the selectable `slots`.
pub fn validate_selection(slots: &[TimeSlot], time: NaiveTime) -> Result<(), SelectionError> {
    let slot = slots
        .iter()
        .find(|slot| slot.time == time)
        .ok_or(SelectionError::NotOffered(time))?;

    if slot.conflict {
        return Err(SelectionError::Unavailable(SlotReason::Conflict));
    }
    if !slot.available {
        return Err(SelectionError::Unavailable(
            slot.reason.unwrap_or(SlotReason::OutsideRegularHours),
        ));
    }
    Ok(())
}

/// Selectable slots rendered as `HH:MM` for log lines.
pub fn describe(slots: &[TimeSlot]) -> String {
    slots
        .iter()
        .filter(|slot| slot.is_selectable())
        .map(|slot| slot.time.format("%H:%M").to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
