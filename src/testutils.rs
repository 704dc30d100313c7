use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone};
use uuid::Uuid;

use crate::{
    availability::SlotPolicy,
    backend::AvailabilityBackend,
    configuration::Configuration,
    error::BackendError,
    types::{
        Appointment, AppointmentFilter, AppointmentStatus, AppointmentType,
        AvailabilityException, NewAppointment, NewAvailabilityException, WeeklyAvailability,
        WeeklyHours,
    },
};

pub const TEST_PASSWORD: &str = "123";

pub struct MockAvailabilityBackendInner {
    pub success: AtomicBool,
    pub calls_to_advisor_availability: AtomicU64,
    pub calls_to_replace_advisor_availability: AtomicU64,
    pub calls_to_availability_exceptions: AtomicU64,
    pub calls_to_add_availability_exception: AtomicU64,
    pub calls_to_remove_availability_exception: AtomicU64,
    pub calls_to_appointments: AtomicU64,
    pub calls_to_appointment: AtomicU64,
    pub calls_to_create_appointment: AtomicU64,
    pub calls_to_update_appointment_status: AtomicU64,
    pub calls_to_reschedule_appointment: AtomicU64,
    pub calls_to_remove_appointment: AtomicU64,
    /// Delay applied once, to the next `advisor_availability` call.
    pub delay: Mutex<Option<std::time::Duration>>,
    pub weekly: Mutex<Vec<WeeklyAvailability>>,
    pub exceptions: Mutex<Vec<AvailabilityException>>,
    pub appointments: Mutex<Vec<Appointment>>,
}

#[derive(Clone)]
pub struct MockAvailabilityBackend(pub Arc<MockAvailabilityBackendInner>);

impl MockAvailabilityBackendInner {
    fn new() -> Self {
        Self {
            success: AtomicBool::new(true),
            calls_to_advisor_availability: AtomicU64::default(),
            calls_to_replace_advisor_availability: AtomicU64::default(),
            calls_to_availability_exceptions: AtomicU64::default(),
            calls_to_add_availability_exception: AtomicU64::default(),
            calls_to_remove_availability_exception: AtomicU64::default(),
            calls_to_appointments: AtomicU64::default(),
            calls_to_appointment: AtomicU64::default(),
            calls_to_create_appointment: AtomicU64::default(),
            calls_to_update_appointment_status: AtomicU64::default(),
            calls_to_reschedule_appointment: AtomicU64::default(),
            calls_to_remove_appointment: AtomicU64::default(),
            delay: Mutex::default(),
            weekly: Mutex::default(),
            exceptions: Mutex::default(),
            appointments: Mutex::default(),
        }
    }
}

impl MockAvailabilityBackend {
    pub fn new() -> Self {
        Self(Arc::new(MockAvailabilityBackendInner::new()))
    }

    fn result(&self) -> Result<(), BackendError> {
        match self.0.success.load(Ordering::SeqCst) {
            true => Ok(()),
            false => Err(BackendError::Unavailable("Supposed to fail".into())),
        }
    }
}

impl AvailabilityBackend for MockAvailabilityBackend {
    fn advisor_availability(&self, _advisor_id: Uuid) -> Result<Vec<WeeklyAvailability>, BackendError> {
        self.0
            .calls_to_advisor_availability
            .fetch_add(1, Ordering::SeqCst);
        let delay = self.0.delay.lock().unwrap().take();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.result()?;
        Ok(self.0.weekly.lock().unwrap().clone())
    }

    fn replace_advisor_availability(
        &self,
        advisor_id: Uuid,
        days: Vec<WeeklyHours>,
    ) -> Result<Vec<WeeklyAvailability>, BackendError> {
        self.0
            .calls_to_replace_advisor_availability
            .fetch_add(1, Ordering::SeqCst);
        self.result()?;
        Ok(days
            .into_iter()
            .map(|day| day.into_availability(advisor_id))
            .collect())
    }

    fn availability_exceptions(
        &self,
        _advisor_id: Uuid,
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> Result<Vec<AvailabilityException>, BackendError> {
        self.0
            .calls_to_availability_exceptions
            .fetch_add(1, Ordering::SeqCst);
        self.result()?;
        Ok(self.0.exceptions.lock().unwrap().clone())
    }

    fn add_availability_exception(
        &self,
        exception: NewAvailabilityException,
    ) -> Result<AvailabilityException, BackendError> {
        self.0
            .calls_to_add_availability_exception
            .fetch_add(1, Ordering::SeqCst);
        self.result()?;
        Ok(exception.into_exception())
    }

    fn remove_availability_exception(&self, _id: Uuid) -> Result<(), BackendError> {
        self.0
            .calls_to_remove_availability_exception
            .fetch_add(1, Ordering::SeqCst);
        self.result()
    }

    fn appointments(&self, _filter: &AppointmentFilter) -> Result<Vec<Appointment>, BackendError> {
        self.0.calls_to_appointments.fetch_add(1, Ordering::SeqCst);
        self.result()?;
        Ok(self.0.appointments.lock().unwrap().clone())
    }

    fn appointment(&self, id: Uuid) -> Result<Appointment, BackendError> {
        self.0.calls_to_appointment.fetch_add(1, Ordering::SeqCst);
        self.result()?;
        self.0
            .appointments
            .lock()
            .unwrap()
            .iter()
            .find(|appointment| appointment.id == id)
            .cloned()
            .ok_or(BackendError::NotFound {
                entity: "Appointment",
                id,
            })
    }

    fn create_appointment(&self, appointment: NewAppointment) -> Result<Appointment, BackendError> {
        self.0
            .calls_to_create_appointment
            .fetch_add(1, Ordering::SeqCst);
        self.result()?;
        Ok(appointment.into_appointment())
    }

    fn update_appointment_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Appointment, BackendError> {
        self.0
            .calls_to_update_appointment_status
            .fetch_add(1, Ordering::SeqCst);
        self.result()?;
        let start = Local::now().naive_local();
        Ok(Appointment {
            id,
            status,
            ..appointment_at(Uuid::new_v4(), start, 60)
        })
    }

    fn reschedule_appointment(
        &self,
        id: Uuid,
        start_time: DateTime<Local>,
        end_time: DateTime<Local>,
    ) -> Result<Appointment, BackendError> {
        self.0
            .calls_to_reschedule_appointment
            .fetch_add(1, Ordering::SeqCst);
        self.result()?;
        Ok(Appointment {
            id,
            start_time,
            end_time,
            ..appointment_at(Uuid::new_v4(), start_time.naive_local(), 60)
        })
    }

    fn remove_appointment(&self, _id: Uuid) -> Result<(), BackendError> {
        self.0
            .calls_to_remove_appointment
            .fetch_add(1, Ordering::SeqCst);
        self.result()
    }
}

#[derive(Clone, Default)]
pub struct TestConfiguration {
    pub policy: SlotPolicy,
}

impl Configuration for TestConfiguration {
    fn password(&self) -> String {
        TEST_PASSWORD.into()
    }

    fn port(&self) -> u16 {
        0
    }

    fn database_url(&self) -> Option<String> {
        None
    }

    fn slot_policy(&self) -> SlotPolicy {
        self.policy.clone()
    }
}

pub fn appointment_at(advisor_id: Uuid, start: NaiveDateTime, minutes: i64) -> Appointment {
    let start_time = Local.from_local_datetime(&start).single().unwrap();
    Appointment {
        id: Uuid::new_v4(),
        advisor_id,
        title: "Viewing".into(),
        contact_name: "Stefan".into(),
        contact_email: "stefan@example.com".into(),
        contact_phone: None,
        start_time,
        end_time: start_time + Duration::minutes(minutes),
        appointment_type: AppointmentType::Viewing,
        status: AppointmentStatus::Confirmed,
        notes: None,
    }
}
