use crate::{
    availability::intervals_overlap,
    backend::AvailabilityBackend,
    error::BackendError,
    types::{
        duplicate_weekday, Appointment, AppointmentFilter, AppointmentStatus,
        AvailabilityException, NewAppointment, NewAvailabilityException, WeeklyAvailability,
        WeeklyHours,
    },
};
use chrono::{DateTime, Local, NaiveDate};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{debug, error};
use uuid::Uuid;

/// In-memory calendar, used when no database is configured. Nothing
/// survives a restart.
#[derive(Debug, Clone, Default)]
pub struct LocalCalendar {
    weekly: Arc<Mutex<HashMap<Uuid, WeeklyAvailability>>>,
    exceptions: Arc<Mutex<HashMap<Uuid, AvailabilityException>>>,
    appointments: Arc<Mutex<HashMap<Uuid, Appointment>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, BackendError> {
    mutex.lock().map_err(|_| {
        let err = "In-memory calendar lock poisoned";
        error!(err);
        BackendError::Unavailable(err.into())
    })
}

fn overlaps_booking(
    appointments: &HashMap<Uuid, Appointment>,
    advisor_id: Uuid,
    start_time: DateTime<Local>,
    end_time: DateTime<Local>,
    exclude: Option<Uuid>,
) -> bool {
    appointments.values().any(|existing| {
        Some(existing.id) != exclude
            && existing.advisor_id == advisor_id
            && existing.status.occupies_advisor()
            && intervals_overlap(start_time, end_time, existing.start_time, existing.end_time)
    })
}

fn check_interval(start_time: DateTime<Local>, end_time: DateTime<Local>) -> Result<(), BackendError> {
    if end_time <= start_time {
        return Err(BackendError::Invalid(
            "Appointment must end after it starts".into(),
        ));
    }
    Ok(())
}

fn appointment_not_found(id: Uuid) -> BackendError {
    BackendError::NotFound {
        entity: "Appointment",
        id,
    }
}

impl AvailabilityBackend for LocalCalendar {
    fn advisor_availability(&self, advisor_id: Uuid) -> Result<Vec<WeeklyAvailability>, BackendError> {
        let mut days: Vec<WeeklyAvailability> = lock(&self.weekly)?
            .values()
            .filter(|day| day.advisor_id == advisor_id)
            .cloned()
            .collect();
        days.sort_unstable_by_key(|day| day.day_of_week);
        Ok(days)
    }

    fn replace_advisor_availability(
        &self,
        advisor_id: Uuid,
        days: Vec<WeeklyHours>,
    ) -> Result<Vec<WeeklyAvailability>, BackendError> {
        if let Some(day) = duplicate_weekday(&days) {
            return Err(BackendError::Invalid(format!(
                "Day {day} appears more than once in the weekly schedule"
            )));
        }

        let mut weekly = lock(&self.weekly)?;
        weekly.retain(|_, day| day.advisor_id != advisor_id);

        let mut stored: Vec<WeeklyAvailability> = days
            .into_iter()
            .map(|day| day.into_availability(advisor_id))
            .collect();
        for day in &stored {
            weekly.insert(day.id, day.clone());
        }
        debug!(%advisor_id, days = stored.len(), "Weekly availability replaced");

        stored.sort_unstable_by_key(|day| day.day_of_week);
        Ok(stored)
    }

    fn availability_exceptions(
        &self,
        advisor_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilityException>, BackendError> {
        let mut exceptions: Vec<AvailabilityException> = lock(&self.exceptions)?
            .values()
            .filter(|exception| exception.advisor_id == advisor_id)
            .filter(|exception| exception.exception_date >= from && exception.exception_date <= to)
            .cloned()
            .collect();
        exceptions.sort_unstable_by_key(|exception| exception.exception_date);
        Ok(exceptions)
    }

    fn add_availability_exception(
        &self,
        exception: NewAvailabilityException,
    ) -> Result<AvailabilityException, BackendError> {
        let mut exceptions = lock(&self.exceptions)?;
        if exceptions.values().any(|existing| {
            existing.advisor_id == exception.advisor_id
                && existing.exception_date == exception.exception_date
        }) {
            return Err(BackendError::Conflict(format!(
                "Advisor already has an exception on {}",
                exception.exception_date
            )));
        }

        let exception = exception.into_exception();
        exceptions.insert(exception.id, exception.clone());
        Ok(exception)
    }

    fn remove_availability_exception(&self, id: Uuid) -> Result<(), BackendError> {
        if lock(&self.exceptions)?.remove(&id).is_none() {
            return Err(BackendError::NotFound {
                entity: "Availability exception",
                id,
            });
        }
        Ok(())
    }

    fn appointments(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, BackendError> {
        let mut appointments: Vec<Appointment> = lock(&self.appointments)?
            .values()
            .filter(|appointment| filter.matches(appointment))
            .cloned()
            .collect();
        appointments.sort_unstable_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(appointments)
    }

    fn appointment(&self, id: Uuid) -> Result<Appointment, BackendError> {
        lock(&self.appointments)?
            .get(&id)
            .cloned()
            .ok_or_else(|| appointment_not_found(id))
    }

    fn create_appointment(&self, appointment: NewAppointment) -> Result<Appointment, BackendError> {
        check_interval(appointment.start_time, appointment.end_time)?;

        let mut appointments = lock(&self.appointments)?;
        if overlaps_booking(
            &appointments,
            appointment.advisor_id,
            appointment.start_time,
            appointment.end_time,
            None,
        ) {
            let err = "Advisor already has an appointment at that time";
            error!(advisor_id = %appointment.advisor_id, err);
            return Err(BackendError::Conflict(err.into()));
        }

        let appointment = appointment.into_appointment();
        appointments.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    fn update_appointment_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Appointment, BackendError> {
        match lock(&self.appointments)?.get_mut(&id) {
            Some(appointment) => {
                appointment.status = status;
                Ok(appointment.clone())
            }
            None => Err(appointment_not_found(id)),
        }
    }

    fn reschedule_appointment(
        &self,
        id: Uuid,
        start_time: DateTime<Local>,
        end_time: DateTime<Local>,
    ) -> Result<Appointment, BackendError> {
        check_interval(start_time, end_time)?;

        let mut appointments = lock(&self.appointments)?;
        let advisor_id = appointments
            .get(&id)
            .map(|appointment| appointment.advisor_id)
            .ok_or_else(|| appointment_not_found(id))?;
        if overlaps_booking(&appointments, advisor_id, start_time, end_time, Some(id)) {
            let err = "Advisor already has an appointment at that time";
            error!(%advisor_id, %id, err);
            return Err(BackendError::Conflict(err.into()));
        }

        let appointment = appointments
            .get_mut(&id)
            .ok_or_else(|| appointment_not_found(id))?;
        appointment.start_time = start_time;
        appointment.end_time = end_time;
        debug!(%id, start = %start_time, "Appointment rescheduled");
        Ok(appointment.clone())
    }

    fn remove_appointment(&self, id: Uuid) -> Result<(), BackendError> {
        match lock(&self.appointments)?.remove(&id) {
            Some(_) => Ok(()),
            None => Err(appointment_not_found(id)),
        }
    }
}
