use crate::schema::{advisor_availability, appointments, availability_exceptions};
use crate::types::{
    duplicate_weekday, local_midnight, Appointment, AppointmentFilter, AppointmentStatus, AvailabilityException,
    NewAppointment, NewAvailabilityException, WeeklyAvailability, WeeklyHours,
};
use crate::{backend::AvailabilityBackend, error::BackendError};
use chrono::{DateTime, Local, NaiveDate, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::{Connection, ConnectionError, PgConnection};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = appointments)]
struct AppointmentRow {
    id: Uuid,
    advisor_id: Uuid,
    title: String,
    contact_name: String,
    contact_email: String,
    contact_phone: Option<String>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    appointment_type: String,
    status: String,
    notes: Option<String>,
}

impl From<&Appointment> for AppointmentRow {
    fn from(appointment: &Appointment) -> Self {
        Self {
            id: appointment.id,
            advisor_id: appointment.advisor_id,
            title: appointment.title.clone(),
            contact_name: appointment.contact_name.clone(),
            contact_email: appointment.contact_email.clone(),
            contact_phone: appointment.contact_phone.clone(),
            start_time: appointment.start_time.with_timezone(&Utc),
            end_time: appointment.end_time.with_timezone(&Utc),
            appointment_type: appointment.appointment_type.as_str().into(),
            status: appointment.status.as_str().into(),
            notes: appointment.notes.clone(),
        }
    }
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = BackendError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            advisor_id: row.advisor_id,
            title: row.title,
            contact_name: row.contact_name,
            contact_email: row.contact_email,
            contact_phone: row.contact_phone,
            start_time: row.start_time.with_timezone(&Local),
            end_time: row.end_time.with_timezone(&Local),
            appointment_type: row.appointment_type.parse().map_err(BackendError::Invalid)?,
            status: row.status.parse().map_err(BackendError::Invalid)?,
            notes: row.notes,
        })
    }
}

fn utc_midnight(date: NaiveDate) -> Result<DateTime<Utc>, BackendError> {
    local_midnight(date)
        .map(|midnight| midnight.with_timezone(&Utc))
        .ok_or_else(|| BackendError::Invalid(format!("{date} has no local midnight")))
}

#[derive(Clone)]
pub struct DatabaseInterface {
    connection: Arc<Mutex<PgConnection>>,
}

impl DatabaseInterface {
    pub fn new(database_url: &str) -> Result<Self, ConnectionError> {
        let connection = Self::establish_connection(database_url)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn establish_connection(database_url: &str) -> Result<PgConnection, ConnectionError> {
        PgConnection::establish(database_url)
    }

    fn connection(&self) -> Result<MutexGuard<'_, PgConnection>, BackendError> {
        self.connection.lock().map_err(|_| {
            let err = "Database connection lock poisoned";
            error!(err);
            BackendError::Unavailable(err.into())
        })
    }
}

fn log_failure<T>(result: Result<T, BackendError>, action: &str) -> Result<T, BackendError> {
    if let Err(err) = &result {
        error!(%err, "{action} failed");
    }
    result
}

/// Turns a unique constraint violation into a conflict.
fn duplicate_as_conflict(err: BackendError, message: impl FnOnce() -> String) -> BackendError {
    match err {
        BackendError::Database(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            BackendError::Conflict(message())
        }
        err => err,
    }
}

fn appointment_not_found(id: Uuid) -> BackendError {
    BackendError::NotFound {
        entity: "Appointment",
        id,
    }
}

/// Appointments of `advisor` that still occupy them during `[start, end)`.
fn count_overlapping(
    connection: &mut PgConnection,
    advisor: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclude: Option<Uuid>,
) -> Result<i64, BackendError> {
    let free_statuses = [
        AppointmentStatus::Cancelled.as_str(),
        AppointmentStatus::Completed.as_str(),
    ];
    let mut query = appointments::table
        .filter(appointments::advisor_id.eq(advisor))
        .filter(appointments::status.ne_all(free_statuses))
        .filter(appointments::start_time.lt(end))
        .filter(appointments::end_time.gt(start))
        .into_boxed();
    if let Some(id) = exclude {
        query = query.filter(appointments::id.ne(id));
    }
    Ok(query.count().get_result(connection)?)
}

impl AvailabilityBackend for DatabaseInterface {
    fn advisor_availability(&self, advisor: Uuid) -> Result<Vec<WeeklyAvailability>, BackendError> {
        let mut connection = self.connection()?;
        let result = advisor_availability::table
            .filter(advisor_availability::advisor_id.eq(advisor))
            .order(advisor_availability::day_of_week.asc())
            .select(WeeklyAvailability::as_select())
            .load(&mut *connection)
            .map_err(BackendError::from);
        log_failure(result, "Loading weekly availability")
    }

    fn replace_advisor_availability(
        &self,
        advisor: Uuid,
        days: Vec<WeeklyHours>,
    ) -> Result<Vec<WeeklyAvailability>, BackendError> {
        if let Some(day) = duplicate_weekday(&days) {
            return Err(BackendError::Invalid(format!(
                "Day {day} appears more than once in the weekly schedule"
            )));
        }

        let mut connection = self.connection()?;
        let mut rows: Vec<WeeklyAvailability> = days
            .into_iter()
            .map(|day| day.into_availability(advisor))
            .collect();
        rows.sort_unstable_by_key(|day| day.day_of_week);

        let result = connection.transaction::<_, BackendError, _>(|connection| {
            diesel::delete(
                advisor_availability::table.filter(advisor_availability::advisor_id.eq(advisor)),
            )
            .execute(connection)?;
            diesel::insert_into(advisor_availability::table)
                .values(&rows)
                .execute(connection)?;
            Ok(())
        })
        .map_err(|err| {
            duplicate_as_conflict(err, || "Weekly schedule has a day twice".into())
        });
        log_failure(result, "Replacing weekly availability")?;
        Ok(rows)
    }

    fn availability_exceptions(
        &self,
        advisor: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilityException>, BackendError> {
        let mut connection = self.connection()?;
        let result = availability_exceptions::table
            .filter(availability_exceptions::advisor_id.eq(advisor))
            .filter(availability_exceptions::exception_date.ge(from))
            .filter(availability_exceptions::exception_date.le(to))
            .order(availability_exceptions::exception_date.asc())
            .select(AvailabilityException::as_select())
            .load(&mut *connection)
            .map_err(BackendError::from);
        log_failure(result, "Loading availability exceptions")
    }

    fn add_availability_exception(
        &self,
        exception: NewAvailabilityException,
    ) -> Result<AvailabilityException, BackendError> {
        let mut connection = self.connection()?;
        let exception = exception.into_exception();
        let result = diesel::insert_into(availability_exceptions::table)
            .values(&exception)
            .execute(&mut *connection)
            .map_err(|err| {
                duplicate_as_conflict(BackendError::from(err), || {
                    format!(
                        "Advisor already has an exception on {}",
                        exception.exception_date
                    )
                })
            });
        log_failure(result, "Adding availability exception")?;
        Ok(exception)
    }

    fn remove_availability_exception(&self, id: Uuid) -> Result<(), BackendError> {
        let mut connection = self.connection()?;
        let result = diesel::delete(availability_exceptions::table.find(id))
            .execute(&mut *connection)
            .map_err(BackendError::from);

        match log_failure(result, "Removing availability exception")? {
            0 => Err(BackendError::NotFound {
                entity: "Availability exception",
                id,
            }),
            _ => Ok(()),
        }
    }

    fn appointments(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, BackendError> {
        let mut query = appointments::table.into_boxed();
        if let Some(advisor) = filter.advisor_id {
            query = query.filter(appointments::advisor_id.eq(advisor));
        }
        if let Some(status) = filter.status {
            query = query.filter(appointments::status.eq(status.as_str()));
        }
        if let Some(kind) = filter.appointment_type {
            query = query.filter(appointments::appointment_type.eq(kind.as_str()));
        }
        if let Some(date) = filter.start_date {
            query = query.filter(appointments::start_time.ge(utc_midnight(date)?));
        }
        if let Some(date) = filter.end_date {
            let next_day = date
                .succ_opt()
                .ok_or_else(|| BackendError::Invalid(format!("{date} is out of range")))?;
            query = query.filter(appointments::start_time.lt(utc_midnight(next_day)?));
        }

        let mut connection = self.connection()?;
        let result = query
            .order(appointments::start_time.asc())
            .select(AppointmentRow::as_select())
            .load(&mut *connection)
            .map_err(BackendError::from);

        log_failure(result, "Loading appointments")?
            .into_iter()
            .map(Appointment::try_from)
            .collect()
    }

    fn appointment(&self, id: Uuid) -> Result<Appointment, BackendError> {
        let mut connection = self.connection()?;
        let result = appointments::table
            .find(id)
            .select(AppointmentRow::as_select())
            .first(&mut *connection)
            .optional()
            .map_err(BackendError::from);

        match log_failure(result, "Loading appointment")? {
            Some(row) => Appointment::try_from(row),
            None => Err(appointment_not_found(id)),
        }
    }

    fn create_appointment(&self, appointment: NewAppointment) -> Result<Appointment, BackendError> {
        if appointment.end_time <= appointment.start_time {
            return Err(BackendError::Invalid(
                "Appointment must end after it starts".into(),
            ));
        }

        let appointment = appointment.into_appointment();
        let row = AppointmentRow::from(&appointment);

        let mut connection = self.connection()?;
        let result = connection.transaction::<_, BackendError, _>(|connection| {
            let overlapping =
                count_overlapping(connection, row.advisor_id, row.start_time, row.end_time, None)?;
            if overlapping > 0 {
                return Err(BackendError::Conflict(
                    "Advisor already has an appointment at that time".into(),
                ));
            }

            diesel::insert_into(appointments::table)
                .values(&row)
                .execute(connection)?;
            Ok(())
        });
        log_failure(result, "Creating appointment")?;
        Ok(appointment)
    }

    fn update_appointment_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Appointment, BackendError> {
        let mut connection = self.connection()?;
        let result = diesel::update(appointments::table.find(id))
            .set(appointments::status.eq(status.as_str()))
            .returning(AppointmentRow::as_returning())
            .get_result(&mut *connection)
            .optional()
            .map_err(BackendError::from);

        match log_failure(result, "Updating appointment status")? {
            Some(row) => Appointment::try_from(row),
            None => Err(appointment_not_found(id)),
        }
    }

    fn reschedule_appointment(
        &self,
        id: Uuid,
        start_time: DateTime<Local>,
        end_time: DateTime<Local>,
    ) -> Result<Appointment, BackendError> {
        if end_time <= start_time {
            return Err(BackendError::Invalid(
                "Appointment must end after it starts".into(),
            ));
        }
        let start = start_time.with_timezone(&Utc);
        let end = end_time.with_timezone(&Utc);

        let mut connection = self.connection()?;
        let result = connection.transaction::<_, BackendError, _>(|connection| {
            let advisor: Uuid = appointments::table
                .find(id)
                .select(appointments::advisor_id)
                .first(connection)
                .optional()?
                .ok_or_else(|| appointment_not_found(id))?;
            if count_overlapping(connection, advisor, start, end, Some(id))? > 0 {
                return Err(BackendError::Conflict(
                    "Advisor already has an appointment at that time".into(),
                ));
            }

            let row: AppointmentRow = diesel::update(appointments::table.find(id))
                .set((
                    appointments::start_time.eq(start),
                    appointments::end_time.eq(end),
                ))
                .returning(AppointmentRow::as_returning())
                .get_result(connection)?;
            Ok(row)
        });

        Appointment::try_from(log_failure(result, "Rescheduling appointment")?)
    }

    fn remove_appointment(&self, id: Uuid) -> Result<(), BackendError> {
        let mut connection = self.connection()?;
        let result = diesel::delete(appointments::table.find(id))
            .execute(&mut *connection)
            .map_err(BackendError::from);

        match log_failure(result, "Removing appointment")? {
            0 => Err(appointment_not_found(id)),
            _ => Ok(()),
        }
    }
}
