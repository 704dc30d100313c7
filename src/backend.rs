use crate::error::BackendError;
use crate::types::{
    Appointment, AppointmentFilter, AppointmentStatus, AvailabilityException,
    NewAppointment, NewAvailabilityException, WeeklyAvailability, WeeklyHours,
};
use chrono::{DateTime, Local, NaiveDate};
use uuid::Uuid;

pub trait AvailabilityBackend: Clone + Send + Sync + 'static {
    /// Weekly schedule of an advisor, ordered by day of the week.
    fn advisor_availability(&self, advisor_id: Uuid) -> Result<Vec<WeeklyAvailability>, BackendError>;
    /// Drops the advisor's weekly schedule and stores `days` instead. At most
    /// one entry per day of the week.
    fn replace_advisor_availability(
        &self,
        advisor_id: Uuid,
        days: Vec<WeeklyHours>,
    ) -> Result<Vec<WeeklyAvailability>, BackendError>;
    /// Exceptions with `from <= exception_date <= to`, ordered by date.
    fn availability_exceptions(
        &self,
        advisor_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilityException>, BackendError>;
    /// Fails with a conflict if the advisor already has an exception for
    /// that date.
    fn add_availability_exception(
        &self,
        exception: NewAvailabilityException,
    ) -> Result<AvailabilityException, BackendError>;
    fn remove_availability_exception(&self, id: Uuid) -> Result<(), BackendError>;
    /// Appointments matching `filter`, ordered by start time.
    fn appointments(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, BackendError>;
    fn appointment(&self, id: Uuid) -> Result<Appointment, BackendError>;
    /// Stores a pending appointment unless it overlaps one that still
    /// occupies the advisor.
    fn create_appointment(&self, appointment: NewAppointment) -> Result<Appointment, BackendError>;
    fn update_appointment_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Appointment, BackendError>;
    /// Moves an appointment. The overlap check ignores the appointment
    /// itself, so shifting it within its own interval is fine.
    fn reschedule_appointment(
        &self,
        id: Uuid,
        start_time: DateTime<Local>,
        end_time: DateTime<Local>,
    ) -> Result<Appointment, BackendError>;
    fn remove_appointment(&self, id: Uuid) -> Result<(), BackendError>;
}
