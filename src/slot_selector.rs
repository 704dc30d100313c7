use crate::{
    availability::{describe, resolve_slots, AvailabilitySnapshot, SlotPolicy, SlotQuery},
    backend::AvailabilityBackend,
    clock::Clock,
    error::BackendError,
    types::{AppointmentFilter, TimeSlot},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};
use tokio::sync::watch::{self, Sender};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error};
use uuid::Uuid;

/// Latest published resolution for one advisor and date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    pub sequence: u64,
    pub query: Option<SlotQuery>,
    pub slots: Vec<TimeSlot>,
    /// Set when the backend could not be read. No slot is bookable then.
    pub error: Option<String>,
}

/// Requests for the same advisor and date form one input stream. Only the
/// most recent request of a stream may publish.
type StreamKey = (Uuid, NaiveDate);

struct SlotChannel {
    sequence: AtomicU64,
    sender: Sender<SlotView>,
}

pub struct SlotTicket {
    sequence: u64,
    query: SlotQuery,
    channel: Arc<SlotChannel>,
}

impl SlotTicket {
    pub fn query(&self) -> &SlotQuery {
        &self.query
    }
}

/// Resolves slots against a backend and publishes results in request order,
/// separately for every advisor and date. A result is only published if no
/// newer request for the same advisor and date was started in the meantime.
#[derive(Clone)]
pub struct SlotSelector<T: AvailabilityBackend> {
    backend: T,
    policy: Arc<SlotPolicy>,
    clock: Arc<dyn Clock>,
    channels: Arc<Mutex<HashMap<StreamKey, Arc<SlotChannel>>>>,
}

impl<T: AvailabilityBackend> SlotSelector<T> {
    pub fn new(backend: T, policy: SlotPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            policy: Arc::new(policy),
            clock,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn channel(&self, advisor_id: Uuid, date: NaiveDate) -> Arc<SlotChannel> {
        // The map holds no invariant a panicking holder could break.
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry((advisor_id, date))
            .or_insert_with(|| {
                let (sender, _) = watch::channel(SlotView::default());
                Arc::new(SlotChannel {
                    sequence: AtomicU64::new(0),
                    sender,
                })
            })
            .clone()
    }

    pub fn fetch_snapshot(&self, query: &SlotQuery) -> Result<AvailabilitySnapshot, BackendError> {
        let weekly = self.backend.advisor_availability(query.advisor_id)?;
        let exceptions =
            self.backend
                .availability_exceptions(query.advisor_id, query.date, query.date)?;
        let appointments = self
            .backend
            .appointments(&AppointmentFilter::for_advisor_on(query.advisor_id, query.date))?;

        Ok(AvailabilitySnapshot {
            weekly,
            exceptions,
            appointments,
        })
    }

    /// Fetches fresh records and resolves `query` without publishing.
    pub fn resolve(&self, query: &SlotQuery) -> Result<Vec<TimeSlot>, BackendError> {
        let snapshot = self.fetch_snapshot(query).map_err(|err| {
            error!(?err, advisor_id = %query.advisor_id, date = %query.date, "Failed to load availability");
            err
        })?;
        let slots = resolve_slots(query, &snapshot, &self.policy, self.clock.now());
        debug!(advisor_id = %query.advisor_id, date = %query.date, selectable = %describe(&slots), "Slots resolved");
        Ok(slots)
    }

    /// Starts a new request. Every ticket issued earlier for the same advisor
    /// and date becomes stale.
    pub fn begin(&self, query: SlotQuery) -> SlotTicket {
        let channel = self.channel(query.advisor_id, query.date);
        let sequence = channel.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        SlotTicket {
            sequence,
            query,
            channel,
        }
    }

    pub fn is_current(&self, ticket: &SlotTicket) -> bool {
        ticket.channel.sequence.load(Ordering::SeqCst) == ticket.sequence
    }

    /// Publishes the outcome of `ticket` and returns the published view, or
    /// `None` if the ticket was stale.
    pub fn publish(
        &self,
        ticket: SlotTicket,
        outcome: Result<Vec<TimeSlot>, BackendError>,
    ) -> Option<SlotView> {
        if !self.is_current(&ticket) {
            debug!(sequence = ticket.sequence, advisor_id = %ticket.query.advisor_id, "Discarding stale slot resolution");
            return None;
        }

        let (slots, error) = match outcome {
            Ok(slots) => (slots, None),
            Err(err) => (vec![], Some(err.to_string())),
        };
        let view = SlotView {
            sequence: ticket.sequence,
            query: Some(ticket.query),
            slots,
            error,
        };
        let published = ticket.channel.sender.send_if_modified(|current| {
            if current.sequence >= view.sequence {
                return false;
            }
            *current = view.clone();
            true
        });
        published.then_some(view)
    }

    /// Resolves `query` and publishes the result unless a newer refresh for
    /// the same advisor and date started meanwhile. Blocks on the backend.
    pub fn refresh(&self, query: SlotQuery) -> Result<Option<SlotView>, BackendError> {
        let ticket = self.begin(query);
        match self.resolve(ticket.query()) {
            Ok(slots) => Ok(self.publish(ticket, Ok(slots))),
            Err(err) => {
                let message = err.to_string();
                self.publish(ticket, Err(err));
                Err(BackendError::Unavailable(message))
            }
        }
    }

    pub fn current(&self, advisor_id: Uuid, date: NaiveDate) -> SlotView {
        self.channel(advisor_id, date).sender.borrow().clone()
    }

    /// Views published for `advisor_id` on `date`, starting with the current
    /// one.
    pub fn subscribe(&self, advisor_id: Uuid, date: NaiveDate) -> WatchStream<SlotView> {
        WatchStream::new(self.channel(advisor_id, date).sender.subscribe())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        availability::DEFAULT_DURATION_MINUTES,
        clock::MockClock,
        testutils::MockAvailabilityBackend,
        types::{SlotReason, WeeklyAvailability},
    };
    use chrono::{Duration, NaiveDate, NaiveTime, Weekday};
    use futures::StreamExt;
    use uuid::Uuid;

    fn monday() -> NaiveDate {
        NaiveDate::from_isoywd_opt(2030, 20, Weekday::Mon).unwrap()
    }

    fn clock() -> Arc<dyn Clock> {
        let mut clock = MockClock::new();
        clock
            .expect_now()
            .return_const((monday() - Duration::days(3)).and_hms_opt(12, 0, 0).unwrap());
        Arc::new(clock)
    }

    fn query(advisor_id: Uuid) -> SlotQuery {
        SlotQuery {
            advisor_id,
            date: monday(),
            duration: DEFAULT_DURATION_MINUTES,
        }
    }

    fn init() -> (SlotSelector<MockAvailabilityBackend>, MockAvailabilityBackend, Uuid) {
        let mock_backend = MockAvailabilityBackend::new();
        let advisor_id = Uuid::new_v4();
        mock_backend.0.weekly.lock().unwrap().push(WeeklyAvailability {
            id: Uuid::new_v4(),
            advisor_id,
            day_of_week: 1,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            is_available: true,
        });
        let selector = SlotSelector::new(mock_backend.clone(), SlotPolicy::default(), clock());
        (selector, mock_backend, advisor_id)
    }

    #[test]
    fn test_resolve_fetches_all_three_sources() {
        let (selector, mock_backend, advisor_id) = init();

        let slots = selector.resolve(&query(advisor_id)).unwrap();
        assert_eq!(slots.len(), 15);
        assert!(slots.iter().all(TimeSlot::is_selectable));

        assert_eq!(mock_backend.0.calls_to_advisor_availability.load(Ordering::SeqCst), 1);
        assert_eq!(mock_backend.0.calls_to_availability_exceptions.load(Ordering::SeqCst), 1);
        assert_eq!(mock_backend.0.calls_to_appointments.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_surfaces_backend_failure() {
        let (selector, mock_backend, advisor_id) = init();
        mock_backend.0.success.store(false, Ordering::SeqCst);

        selector.resolve(&query(advisor_id)).unwrap_err();
    }

    #[test]
    fn test_stale_result_is_discarded() {
        let (selector, _, advisor_id) = init();
        let slow = selector.begin(query(advisor_id));
        let fast = selector.begin(SlotQuery {
            duration: 120,
            ..query(advisor_id)
        });
        assert!(!selector.is_current(&slow));

        let fast_slots = selector.resolve(fast.query()).unwrap();
        let slow_slots = selector.resolve(slow.query()).unwrap();
        let published = selector.publish(fast, Ok(fast_slots.clone())).unwrap();
        assert!(selector.publish(slow, Ok(slow_slots)).is_none());

        let view = selector.current(advisor_id, monday());
        assert_eq!(view, published);
        assert_eq!(view.sequence, 2);
        assert_eq!(view.slots, fast_slots);
        assert_eq!(view.query.unwrap().duration, 120);
    }

    #[test]
    fn test_other_advisors_do_not_make_a_request_stale() {
        let (selector, _, advisor_id) = init();
        let other_advisor_id = Uuid::new_v4();

        let first = selector.begin(query(advisor_id));
        let other = selector.begin(query(other_advisor_id));
        let next_day = selector.begin(SlotQuery {
            date: monday() + Duration::days(1),
            ..query(advisor_id)
        });
        assert!(selector.is_current(&first));
        assert!(selector.is_current(&other));
        assert!(selector.is_current(&next_day));

        let first_view = selector.publish(first, Ok(vec![])).unwrap();
        selector.publish(other, Ok(vec![])).unwrap();
        assert_eq!(first_view.query.unwrap().advisor_id, advisor_id);
        assert_eq!(first_view.sequence, 1);

        assert_eq!(
            selector.current(advisor_id, monday()).query.unwrap().advisor_id,
            advisor_id
        );
        assert_eq!(
            selector.current(other_advisor_id, monday()).query.unwrap().advisor_id,
            other_advisor_id
        );
        assert_eq!(
            selector.current(advisor_id, monday() + Duration::days(1)),
            SlotView::default()
        );
    }

    #[test]
    fn test_failed_resolution_publishes_no_slots() {
        let (selector, _, advisor_id) = init();
        let ticket = selector.begin(query(advisor_id));

        let view = selector
            .publish(ticket, Err(BackendError::Unavailable("offline".into())))
            .unwrap();
        assert!(view.slots.is_empty());
        assert_eq!(view.error.unwrap(), "Backend unavailable: offline");
        assert!(selector.current(advisor_id, monday()).error.is_some());
    }

    #[tokio::test]
    async fn test_refresh_notifies_subscribers() {
        let (selector, mock_backend, advisor_id) = init();
        let mut stream = selector.subscribe(advisor_id, monday());
        let mut other_stream = selector.subscribe(Uuid::new_v4(), monday());
        assert_eq!(stream.next().await.unwrap(), SlotView::default());
        assert_eq!(other_stream.next().await.unwrap(), SlotView::default());

        mock_backend.0.appointments.lock().unwrap().push(crate::testutils::appointment_at(
            advisor_id,
            monday().and_hms_opt(10, 0, 0).unwrap(),
            60,
        ));
        let refreshed = selector.refresh(query(advisor_id)).unwrap().unwrap();

        let view = stream.next().await.unwrap();
        assert_eq!(view, refreshed);
        assert_eq!(view.sequence, 1);
        let ten = view
            .slots
            .iter()
            .find(|slot| slot.time == NaiveTime::from_hms_opt(10, 0, 0).unwrap())
            .unwrap();
        assert_eq!(ten.reason, Some(SlotReason::Conflict));

        let nothing =
            tokio::time::timeout(std::time::Duration::from_millis(50), other_stream.next()).await;
        assert!(nothing.is_err());
    }

    #[test]
    fn test_refresh_failure_blocks_booking() {
        let (selector, mock_backend, advisor_id) = init();
        mock_backend.0.success.store(false, Ordering::SeqCst);

        selector.refresh(query(advisor_id)).unwrap_err();
        let view = selector.current(advisor_id, monday());
        assert!(view.slots.is_empty());
        assert!(view.error.is_some());
    }
}
