use crate::availability::{validate_selection, SlotQuery};
use crate::backend::AvailabilityBackend;
use crate::clock::Clock;
use crate::configuration::Configuration;
use crate::error::{AppError, BackendError};
use crate::slot_selector::{SlotSelector, SlotView};
use crate::types::{
    duplicate_weekday, Appointment, AppointmentFilter, AppointmentStatus, AvailabilityException,
    NewAppointment, NewAvailabilityException, RescheduleAppointment, TimeSlot,
    WeeklyAvailability, WeeklyHours,
};
use axum::body::Body;
use axum::extract::{Path, Query, Request};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use axum::{extract::State, http::StatusCode, Json};
use axum::{
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Clone)]
pub struct AppState<T: AvailabilityBackend, C: Configuration> {
    backend: T,
    configuration: C,
    slot_selector: SlotSelector<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionRangeQuery {
    advisor_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotStreamQuery {
    advisor_id: Uuid,
    date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_distinct_days"))]
pub struct ReplaceAvailabilityRequest {
    advisor_id: Uuid,
    #[validate(nested)]
    days: Vec<WeeklyHours>,
}

fn validate_distinct_days(request: &ReplaceAvailabilityRequest) -> Result<(), ValidationError> {
    match duplicate_weekday(&request.days) {
        Some(_) => Err(ValidationError::new("duplicate_day_of_week")),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveRequest {
    id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    id: Uuid,
    status: AppointmentStatus,
}

pub fn create_app<T: AvailabilityBackend, C: Configuration>(
    backend: T,
    configuration: C,
    clock: Arc<dyn Clock>,
) -> Router {
    let slot_selector = SlotSelector::new(backend.clone(), configuration.slot_policy(), clock);
    let state = AppState {
        backend,
        configuration,
        slot_selector,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/slots", get(get_slots::<T, C>))
        .route("/slots/stream", get(stream_slots::<T, C>))
        .route("/availability/:advisor_id", get(get_availability::<T, C>))
        .route("/exceptions", get(get_exceptions::<T, C>))
        .route("/appointments", post(book_appointment::<T, C>));

    let admin = Router::new()
        .route("/admin/appointments", get(get_appointments::<T, C>))
        .route("/admin/appointments/:id", get(get_appointment::<T, C>))
        .route("/admin/appointments/status", post(update_status::<T, C>))
        .route("/admin/appointments/reschedule", post(reschedule_appointment::<T, C>))
        .route("/admin/appointments/remove", post(remove_appointment::<T, C>))
        .route("/admin/availability", post(replace_availability::<T, C>))
        .route("/admin/exceptions", post(add_exception::<T, C>))
        .route("/admin/exceptions/remove", post(remove_exception::<T, C>))
        .route("/admin/slots/refresh", post(refresh_slots::<T, C>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth::<T, C>,
        ));

    Router::new()
        .merge(public)
        .merge(admin)
        .with_state(state)
        .layer(cors)
}

async fn admin_auth<T: AvailabilityBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    match request.headers().get("x-admin-password") {
        Some(auth_header) => {
            if auth_header.to_str().unwrap_or("") != state.configuration.password() {
                warn!(path = %request.uri().path(), "Rejected admin request with wrong password");
                return Err((StatusCode::UNAUTHORIZED, "Unauthorized".to_string()));
            }
        }
        None => return Err((StatusCode::UNAUTHORIZED, "Missing credentials".to_string())),
    }
    Ok(next.run(request).await)
}

/// Runs `task` on the blocking pool. Backends talk to their storage
/// synchronously.
async fn blocking<R, F>(task: F) -> Result<R, AppError>
where
    F: FnOnce() -> Result<R, AppError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| AppError::Backend(BackendError::Unavailable(err.to_string())))?
}

async fn get_slots<T: AvailabilityBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Vec<TimeSlot>>, AppError> {
    query.validate()?;
    let slots = blocking(move || {
        state
            .slot_selector
            .resolve(&query)
            .map_err(AppError::SlotsUnavailable)
    })
    .await?;
    Ok(Json(slots))
}

async fn stream_slots<T: AvailabilityBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Query(query): Query<SlotStreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = state
        .slot_selector
        .subscribe(query.advisor_id, query.date)
        .map(|view| Event::default().json_data(view));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn refresh_slots<T: AvailabilityBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Json(query): Json<SlotQuery>,
) -> Result<Json<SlotView>, AppError> {
    query.validate()?;
    let view = blocking(move || {
        state
            .slot_selector
            .refresh(query)
            .map_err(AppError::SlotsUnavailable)
    })
    .await?;

    match view {
        Some(view) => Ok(Json(view)),
        None => {
            info!(advisor_id = %query.advisor_id, date = %query.date, "Slot refresh superseded by a newer one");
            Err(AppError::Superseded)
        }
    }
}

async fn get_availability<T: AvailabilityBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Path(advisor_id): Path<Uuid>,
) -> Result<Json<Vec<WeeklyAvailability>>, AppError> {
    let days = blocking(move || Ok(state.backend.advisor_availability(advisor_id)?)).await?;
    Ok(Json(days))
}

async fn replace_availability<T: AvailabilityBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Json(request): Json<ReplaceAvailabilityRequest>,
) -> Result<Json<Vec<WeeklyAvailability>>, AppError> {
    request.validate()?;
    let advisor_id = request.advisor_id;
    let days = blocking(move || {
        Ok(state
            .backend
            .replace_advisor_availability(request.advisor_id, request.days)?)
    })
    .await?;
    info!(%advisor_id, days = days.len(), "Weekly availability updated");
    Ok(Json(days))
}

async fn get_exceptions<T: AvailabilityBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Query(range): Query<ExceptionRangeQuery>,
) -> Result<Json<Vec<AvailabilityException>>, AppError> {
    let exceptions = blocking(move || {
        Ok(state
            .backend
            .availability_exceptions(range.advisor_id, range.from, range.to)?)
    })
    .await?;
    Ok(Json(exceptions))
}

async fn add_exception<T: AvailabilityBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Json(exception): Json<NewAvailabilityException>,
) -> Result<Json<AvailabilityException>, AppError> {
    exception.validate()?;
    let exception =
        blocking(move || Ok(state.backend.add_availability_exception(exception)?)).await?;
    info!(advisor_id = %exception.advisor_id, date = %exception.exception_date, "Availability exception added");
    Ok(Json(exception))
}

async fn remove_exception<T: AvailabilityBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Json(request): Json<RemoveRequest>,
) -> Result<(StatusCode, String), AppError> {
    blocking(move || Ok(state.backend.remove_availability_exception(request.id)?)).await?;
    Ok((
        StatusCode::OK,
        "Availability exception removed successfully".to_string(),
    ))
}

async fn get_appointments<T: AvailabilityBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Query(filter): Query<AppointmentFilter>,
) -> Result<Json<Vec<Appointment>>, AppError> {
    let appointments = blocking(move || Ok(state.backend.appointments(&filter)?)).await?;
    Ok(Json(appointments))
}

async fn get_appointment<T: AvailabilityBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Appointment>, AppError> {
    let appointment = blocking(move || Ok(state.backend.appointment(id)?)).await?;
    Ok(Json(appointment))
}

async fn book_appointment<T: AvailabilityBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Json(appointment): Json<NewAppointment>,
) -> Result<Json<Appointment>, AppError> {
    appointment.validate()?;

    let query = SlotQuery {
        advisor_id: appointment.advisor_id,
        date: appointment.start_time.date_naive(),
        duration: appointment.duration_minutes(),
    };
    let appointment = blocking(move || {
        let slots = state
            .slot_selector
            .resolve(&query)
            .map_err(AppError::SlotsUnavailable)?;
        validate_selection(&slots, appointment.start_time.time())?;
        Ok(state.backend.create_appointment(appointment)?)
    })
    .await?;
    info!(id = %appointment.id, advisor_id = %appointment.advisor_id, start = %appointment.start_time, "Appointment booked");
    Ok(Json(appointment))
}

async fn update_status<T: AvailabilityBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Appointment>, AppError> {
    let appointment = blocking(move || {
        Ok(state
            .backend
            .update_appointment_status(request.id, request.status)?)
    })
    .await?;
    info!(id = %appointment.id, status = %appointment.status, "Appointment status changed");
    Ok(Json(appointment))
}

async fn reschedule_appointment<T: AvailabilityBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Json(request): Json<RescheduleAppointment>,
) -> Result<Json<Appointment>, AppError> {
    request.validate()?;
    let appointment = blocking(move || {
        Ok(state
            .backend
            .reschedule_appointment(request.id, request.start_time, request.end_time)?)
    })
    .await?;
    info!(id = %appointment.id, start = %appointment.start_time, "Appointment rescheduled");
    Ok(Json(appointment))
}

async fn remove_appointment<T: AvailabilityBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Json(request): Json<RemoveRequest>,
) -> Result<(StatusCode, String), AppError> {
    let id = request.id;
    blocking(move || Ok(state.backend.remove_appointment(id)?)).await?;
    info!(%id, "Appointment removed");
    Ok((StatusCode::OK, "Appointment removed successfully".to_string()))
}
