use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{find_conflict, now_ms, validate_span_limits};
use super::lifecycle::validate_request;
use super::{Engine, EngineError};

/// Occurrence spans for a series: `first`, then `first` shifted by one
/// frequency step per occurrence.
pub fn plan_occurrences(first: Span, frequency: Frequency, count: u32) -> Vec<Span> {
    let step = frequency.offset_ms();
    (0..count as i64).map(|i| first.shifted(i * step)).collect()
}

fn series_conflict(with: Ulid, start: Ms, index: usize) -> EngineError {
    metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
    EngineError::Conflict {
        with,
        start,
        occurrence: Some(index as u32 + 1),
    }
}

impl Engine {
    pub async fn create_series(
        &self,
        req: NewSeries,
    ) -> Result<(Ulid, Vec<Reservation>), EngineError> {
        self.create_series_at(req, now_ms()).await
    }

    /// Book every occurrence or none of them.
    ///
    /// The whole batch is validated under the room's write lock and written as
    /// one `SeriesCreated` record.
    pub async fn create_series_at(
        &self,
        req: NewSeries,
        now: Ms,
    ) -> Result<(Ulid, Vec<Reservation>), EngineError> {
        let NewSeries {
            first,
            frequency,
            occurrences,
        } = req;
        let first_span = validate_request(&first)?;
        if occurrences == 0 || occurrences > MAX_SERIES_OCCURRENCES {
            return Err(EngineError::InvalidOccurrenceCount(occurrences));
        }
        let spans = plan_occurrences(first_span, frequency, occurrences);
        for span in &spans {
            validate_span_limits(span)?;
        }

        let rs = self
            .get_room_state(&first.room_id)
            .ok_or(EngineError::ResourceNotFound(first.room_id))?;
        let mut guard = rs.write().await;
        self.check_bookable(&guard, &first, &first_span, now)?;
        if guard.reservations.len() + spans.len() > MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }

        let tag = SeriesTag {
            id: Ulid::new(),
            frequency,
        };
        let mut planned: Vec<Reservation> = Vec::with_capacity(spans.len());
        for (index, span) in spans.into_iter().enumerate() {
            if let Some(existing) = find_conflict(&guard, &span, None) {
                return Err(series_conflict(existing.id, span.start, index));
            }
            // Offsets are at least a day, so only a multi-day occurrence can
            // reach into the one planned right before it.
            if let Some(prev) = planned.last()
                && prev.span.overlaps(&span)
            {
                return Err(series_conflict(prev.id, span.start, index));
            }
            planned.push(Reservation {
                id: Ulid::new(),
                room_id: first.room_id,
                user_id: first.user_id,
                title: first.title.clone(),
                description: first.description.clone(),
                span,
                status: ReservationStatus::Confirmed,
                attendees: first.attendees,
                series: Some(tag),
                created_at: now,
                updated_at: now,
            });
        }

        let event = Event::SeriesCreated {
            room_id: first.room_id,
            series: tag,
            reservations: planned.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::SERIES_CREATED_TOTAL).increment(1);
        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL)
            .increment(planned.len() as u64);
        info!(
            room = %first.room_id,
            frequency = %frequency,
            "series {} created with {} occurrences",
            tag.id,
            planned.len()
        );
        Ok((tag.id, planned))
    }

    /// Remove every reservation of the series, whatever its status.
    /// Unknown ids remove nothing.
    pub async fn delete_series(&self, series_id: Ulid) -> Result<usize, EngineError> {
        let Some(room_id) = self.index.room_of_series(&series_id) else {
            return Ok(0);
        };
        let Some(rs) = self.get_room_state(&room_id) else {
            return Ok(0);
        };
        let mut guard = rs.write().await;
        let count = guard
            .reservations
            .iter()
            .filter(|r| r.series_id() == Some(series_id))
            .count();
        if count == 0 {
            return Ok(0);
        }

        let event = Event::SeriesDeleted { series_id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("series {series_id} deleted ({count} reservations)");
        Ok(count)
    }

    /// Members of a series ordered by start; empty for unknown ids.
    pub async fn get_series(&self, series_id: Ulid) -> Vec<Reservation> {
        let Some(rs) = self
            .index
            .room_of_series(&series_id)
            .and_then(|room_id| self.get_room_state(&room_id))
        else {
            return Vec::new();
        };
        let guard = rs.read().await;
        guard
            .reservations
            .iter()
            .filter(|r| r.series_id() == Some(series_id))
            .cloned()
            .collect()
    }
}
