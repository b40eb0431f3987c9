use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// `start < end`, checked before anything else.
pub(crate) fn validate_interval(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInterval { start, end });
    }
    Ok(Span::new(start, end))
}

pub(crate) fn validate_span_limits(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_RESERVATION_DURATION_MS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    Ok(())
}

/// First non-cancelled reservation on the room overlapping `span`, skipping `exclude`.
pub fn find_conflict<'a>(
    rs: &'a RoomState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<&'a Reservation> {
    rs.overlapping(span)
        .find(|r| r.occupies() && Some(r.id) != exclude)
}

pub(crate) fn check_no_conflict(rs: &RoomState, span: &Span) -> Result<(), EngineError> {
    match find_conflict(rs, span, None) {
        Some(existing) => {
            metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict {
                with: existing.id,
                start: span.start,
                occurrence: None,
            })
        }
        None => Ok(()),
    }
}

impl Engine {
    /// Whether `[start, end)` is free on the room, ignoring `exclude` (for edits).
    ///
    /// Advisory only: the commit paths repeat the check under the room's write lock.
    pub async fn is_available(
        &self,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let span = validate_interval(start, end)?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::ResourceNotFound(room_id))?;
        let guard = rs.read().await;
        Ok(find_conflict(&guard, &span, exclude).is_none())
    }
}
