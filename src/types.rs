use crate::schema::{advisor_availability, availability_exceptions};
use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone};
use diesel::prelude::*;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;
use validator::{Validate, ValidationError};

lazy_static! {
    static ref PHONE_PATTERN: Regex = Regex::new(r"^\+?[0-9 ()-]{7,20}$").unwrap();
}

/// Recurring working hours of an advisor for one day of the week.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Queryable, Selectable, Insertable,
)]
#[diesel(table_name = advisor_availability)]
pub struct WeeklyAvailability {
    pub id: Uuid,
    pub advisor_id: Uuid,
    /// 0 = Sunday .. 6 = Saturday
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_available: bool,
}

/// One entry of a weekly schedule as submitted by an advisor or admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_weekly_hours"))]
pub struct WeeklyHours {
    #[validate(range(min = 0, max = 6))]
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_available: bool,
}

impl WeeklyHours {
    pub fn into_availability(self, advisor_id: Uuid) -> WeeklyAvailability {
        WeeklyAvailability {
            id: Uuid::new_v4(),
            advisor_id,
            day_of_week: self.day_of_week,
            start_time: self.start_time,
            end_time: self.end_time,
            is_available: self.is_available,
        }
    }
}

fn validate_weekly_hours(hours: &WeeklyHours) -> Result<(), ValidationError> {
    if hours.start_time >= hours.end_time {
        return Err(ValidationError::new("start_time_after_end_time"));
    }
    Ok(())
}

/// First day of the week that appears more than once in `days`.
pub fn duplicate_weekday(days: &[WeeklyHours]) -> Option<i16> {
    days.iter().enumerate().find_map(|(index, day)| {
        days[..index]
            .iter()
            .any(|earlier| earlier.day_of_week == day.day_of_week)
            .then_some(day.day_of_week)
    })
}

/// One-off override of the weekly schedule for a single date.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Queryable, Selectable, Insertable,
)]
#[diesel(table_name = availability_exceptions)]
pub struct AvailabilityException {
    pub id: Uuid,
    pub advisor_id: Uuid,
    pub exception_date: NaiveDate,
    pub is_available: bool,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_exception_window"))]
pub struct NewAvailabilityException {
    pub advisor_id: Uuid,
    pub exception_date: NaiveDate,
    pub is_available: bool,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

impl NewAvailabilityException {
    pub fn into_exception(self) -> AvailabilityException {
        AvailabilityException {
            id: Uuid::new_v4(),
            advisor_id: self.advisor_id,
            exception_date: self.exception_date,
            is_available: self.is_available,
            start_time: self.start_time,
            end_time: self.end_time,
            reason: self.reason,
        }
    }
}

fn validate_exception_window(exception: &NewAvailabilityException) -> Result<(), ValidationError> {
    match (exception.start_time, exception.end_time) {
        (Some(start), Some(end)) if start >= end => {
            Err(ValidationError::new("start_time_after_end_time"))
        }
        (Some(_), None) | (None, Some(_)) => Err(ValidationError::new("incomplete_time_window")),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
    Rescheduled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
            AppointmentStatus::Rescheduled => "rescheduled",
        }
    }

    /// Whether the appointment still occupies the advisor when new bookings
    /// are checked for overlaps. Completed appointments are over and free the
    /// advisor here. The slot grid only skips cancelled ones, so a completed
    /// visit still shows as taken on the day it happened (see
    /// `Appointment::is_cancelled`).
    pub fn occupies_advisor(&self) -> bool {
        !matches!(
            self,
            AppointmentStatus::Cancelled | AppointmentStatus::Completed
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(AppointmentStatus::Pending),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            "no_show" => Ok(AppointmentStatus::NoShow),
            "rescheduled" => Ok(AppointmentStatus::Rescheduled),
            other => Err(format!("Unknown appointment status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    Meeting,
    #[default]
    Viewing,
    Consultation,
    Valuation,
    FollowUp,
    Other,
}

impl AppointmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentType::Meeting => "meeting",
            AppointmentType::Viewing => "viewing",
            AppointmentType::Consultation => "consultation",
            AppointmentType::Valuation => "valuation",
            AppointmentType::FollowUp => "follow_up",
            AppointmentType::Other => "other",
        }
    }
}

impl FromStr for AppointmentType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "meeting" => Ok(AppointmentType::Meeting),
            "viewing" => Ok(AppointmentType::Viewing),
            "consultation" => Ok(AppointmentType::Consultation),
            "valuation" => Ok(AppointmentType::Valuation),
            "follow_up" => Ok(AppointmentType::FollowUp),
            "other" => Ok(AppointmentType::Other),
            other => Err(format!("Unknown appointment type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub advisor_id: Uuid,
    pub title: String,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: Option<String>,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
    pub appointment_type: AppointmentType,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

impl Appointment {
    pub fn is_cancelled(&self) -> bool {
        self.status == AppointmentStatus::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_appointment_times"))]
pub struct NewAppointment {
    pub advisor_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 120))]
    pub contact_name: String,
    #[validate(email)]
    pub contact_email: String,
    #[validate(regex(path = *PHONE_PATTERN))]
    pub contact_phone: Option<String>,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
    #[serde(default)]
    pub appointment_type: AppointmentType,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

impl NewAppointment {
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }

    pub fn into_appointment(self) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            advisor_id: self.advisor_id,
            title: self.title,
            contact_name: self.contact_name,
            contact_email: self.contact_email,
            contact_phone: self.contact_phone,
            start_time: self.start_time,
            end_time: self.end_time,
            appointment_type: self.appointment_type,
            status: AppointmentStatus::Pending,
            notes: self.notes,
        }
    }
}

fn validate_appointment_times(appointment: &NewAppointment) -> Result<(), ValidationError> {
    validate_interval(appointment.start_time, appointment.end_time)
}

fn validate_interval(start: DateTime<Local>, end: DateTime<Local>) -> Result<(), ValidationError> {
    if end <= start {
        return Err(ValidationError::new("end_time_before_start_time"));
    }
    Ok(())
}

/// Moves an existing appointment to a new time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_reschedule_times"))]
pub struct RescheduleAppointment {
    pub id: Uuid,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
}

fn validate_reschedule_times(reschedule: &RescheduleAppointment) -> Result<(), ValidationError> {
    validate_interval(reschedule.start_time, reschedule.end_time)
}

/// Query parameters for listing appointments. Date bounds are inclusive and
/// compare against the local calendar date of the appointment start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub advisor_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub appointment_type: Option<AppointmentType>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl AppointmentFilter {
    pub fn for_advisor_on(advisor_id: Uuid, date: NaiveDate) -> Self {
        Self {
            advisor_id: Some(advisor_id),
            status: None,
            appointment_type: None,
            start_date: Some(date),
            end_date: Some(date),
        }
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        let start_date = appointment.start_time.date_naive();
        self.advisor_id.map_or(true, |id| appointment.advisor_id == id)
            && self.status.map_or(true, |status| appointment.status == status)
            && self
                .appointment_type
                .map_or(true, |kind| appointment.appointment_type == kind)
            && self.start_date.map_or(true, |date| start_date >= date)
            && self.end_date.map_or(true, |date| start_date <= date)
    }
}

/// First instant of `date` in local time.
pub fn local_midnight(date: NaiveDate) -> Option<DateTime<Local>> {
    Local
        .from_local_datetime(&date.and_time(NaiveTime::MIN))
        .earliest()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotReason {
    Conflict,
    OutsideExceptionHours,
    OutsideRegularHours,
}

impl fmt::Display for SlotReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            SlotReason::Conflict => "Conflicts with an existing appointment",
            SlotReason::OutsideExceptionHours => "Outside the special hours for this date",
            SlotReason::OutsideRegularHours => "Outside regular working hours",
        };
        f.write_str(message)
    }
}

/// Candidate start time annotated for presentation. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    #[serde(with = "hh_mm")]
    pub time: NaiveTime,
    pub available: bool,
    pub conflict: bool,
    pub reason: Option<SlotReason>,
}

impl TimeSlot {
    pub fn is_selectable(&self) -> bool {
        self.available && !self.conflict
    }
}

/// `HH:MM` wall-clock times.
pub mod hh_mm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let value = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&value, FORMAT).map_err(serde::de::Error::custom)
    }
}
