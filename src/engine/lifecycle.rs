use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now_ms, validate_interval, validate_span_limits};
use super::{Engine, EngineError};

/// Stateless checks that run before any lookup: interval and timestamp range.
pub(super) fn validate_request(req: &NewReservation) -> Result<Span, EngineError> {
    let span = validate_interval(req.start, req.end)?;
    validate_span_limits(&span)?;
    Ok(span)
}

/// Title, description and attendee count. Runs once room and requester are known.
fn validate_fields(req: &NewReservation) -> Result<(), EngineError> {
    if req.title.trim().is_empty() {
        return Err(EngineError::LimitExceeded("title must not be empty"));
    }
    if req.title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    if req
        .description
        .as_ref()
        .is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN)
    {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    if req.attendees == 0 {
        return Err(EngineError::LimitExceeded("at least one attendee required"));
    }
    Ok(())
}

impl Engine {
    /// Room active, requester known, fields sane, attendees fit, start not in
    /// the past. Caller holds the room's write lock.
    pub(super) fn check_bookable(
        &self,
        rs: &RoomState,
        req: &NewReservation,
        span: &Span,
        now: Ms,
    ) -> Result<(), EngineError> {
        if !rs.profile.active {
            return Err(EngineError::ResourceInactive(rs.id));
        }
        if !self.user_exists(&req.user_id) {
            return Err(EngineError::RequesterNotFound(req.user_id));
        }
        validate_fields(req)?;
        if req.attendees > rs.profile.capacity {
            return Err(EngineError::CapacityExceeded {
                requested: req.attendees,
                capacity: rs.profile.capacity,
            });
        }
        if span.start < now {
            return Err(EngineError::PastDateRejected {
                start: span.start,
                now,
            });
        }
        Ok(())
    }

    pub async fn create_reservation(&self, req: NewReservation) -> Result<Reservation, EngineError> {
        self.create_reservation_at(req, now_ms()).await
    }

    pub async fn create_reservation_at(
        &self,
        req: NewReservation,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        let span = validate_request(&req)?;
        let rs = self
            .get_room_state(&req.room_id)
            .ok_or(EngineError::ResourceNotFound(req.room_id))?;
        let mut guard = rs.write().await;
        self.check_bookable(&guard, &req, &span, now)?;
        check_no_conflict(&guard, &span)?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }

        let reservation = Reservation {
            id: Ulid::new(),
            room_id: req.room_id,
            user_id: req.user_id,
            title: req.title,
            description: req.description,
            span,
            status: ReservationStatus::Confirmed,
            attendees: req.attendees,
            series: None,
            created_at: now,
            updated_at: now,
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(
            room = %reservation.room_id,
            start = reservation.span.start,
            end = reservation.span.end,
            "reservation {} created",
            reservation.id
        );
        Ok(reservation)
    }

    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.cancel_reservation_at(id, now_ms()).await
    }

    pub async fn cancel_reservation_at(&self, id: Ulid, now: Ms) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard
            .get(&id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        if current.status == ReservationStatus::Cancelled {
            return Err(EngineError::AlreadyCancelled(id));
        }
        if current.span.start < now {
            return Err(EngineError::PastCancellationRejected(id));
        }
        // Only reachable for a completed reservation whose start is still ahead.
        if current.status == ReservationStatus::Completed {
            return Err(EngineError::InvalidTransition {
                id,
                from: ReservationStatus::Completed,
            });
        }

        let event = Event::ReservationCancelled {
            id,
            room_id: guard.id,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("reservation {id} cancelled");
        guard
            .get(&id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))
    }

    /// Mark every confirmed reservation that ended before `now` as completed.
    /// One WAL record per room touched. Returns how many changed.
    pub async fn sweep_completions(&self, now: Ms) -> Result<usize, EngineError> {
        let mut total = 0;
        let mut rooms = 0;
        for rs in self.room_handles() {
            let mut guard = rs.write().await;
            let ids: Vec<Ulid> = guard
                .reservations
                .iter()
                .filter(|r| r.status == ReservationStatus::Confirmed && r.span.end < now)
                .map(|r| r.id)
                .collect();
            if ids.is_empty() {
                continue;
            }
            let count = ids.len();
            let event = Event::ReservationsCompleted {
                room_id: guard.id,
                ids,
                at: now,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            rooms += 1;
            total += count;
        }

        if total > 0 {
            metrics::counter!(crate::observability::COMPLETIONS_SWEPT_TOTAL).increment(total as u64);
            info!(rooms, "completed {total} past reservations");
        } else {
            debug!("completion sweep found nothing to do");
        }
        Ok(total)
    }
}
