use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{find_conflict, validate_interval};
use super::{Engine, EngineError};

// ── Free-slot algorithm ──────────────────────────────────────────

/// Gaps inside `query` not covered by any non-cancelled reservation.
/// Gaps shorter than `min_duration` are dropped.
pub fn free_slots(rs: &RoomState, query: &Span, min_duration: Option<Ms>) -> Vec<Span> {
    let busy: Vec<Span> = rs
        .overlapping(query)
        .filter(|r| r.occupies())
        .map(|r| Span::new(r.span.start.max(query.start), r.span.end.min(query.end)))
        .collect();
    // `overlapping` yields in start order, so `busy` is already sorted.
    let busy = merge_overlapping(&busy);
    let mut free = subtract_intervals(&[*query], &busy);
    if let Some(min) = min_duration {
        free.retain(|s| s.duration_ms() >= min);
    }
    free
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted and disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

fn validate_query_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = validate_interval(start, end)?;
    if span.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(span)
}

impl Engine {
    pub async fn free_slots(
        &self,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        min_duration: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        let query = validate_query_window(start, end)?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::ResourceNotFound(room_id))?;
        let guard = rs.read().await;
        Ok(free_slots(&guard, &query, min_duration))
    }

    /// Active rooms passing the capacity/equipment filter that are free for
    /// the whole of `[start, end)`, ordered by name.
    pub async fn list_available_rooms(
        &self,
        start: Ms,
        end: Ms,
        filter: &RoomFilter,
    ) -> Result<Vec<RoomInfo>, EngineError> {
        let span = validate_interval(start, end)?;
        let mut rooms = Vec::new();
        for rs in self.room_handles() {
            let guard = rs.read().await;
            if guard.profile.active
                && filter.matches(&guard.profile)
                && find_conflict(&guard, &span, None).is_none()
            {
                rooms.push(guard.info());
            }
        }
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(rooms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = HOUR_MS;
    const M: Ms = MINUTE_MS;

    fn room_with(bookings: &[(Ms, Ms, ReservationStatus)]) -> RoomState {
        let id = Ulid::new();
        let mut rs = RoomState::new(id, RoomProfile::new("Aula", 10));
        for &(start, end, status) in bookings {
            rs.insert_reservation(Reservation {
                id: Ulid::new(),
                room_id: id,
                user_id: Ulid::new(),
                title: "x".into(),
                description: None,
                span: Span::new(start, end),
                status,
                attendees: 1,
                series: None,
                created_at: 0,
                updated_at: 0,
            });
        }
        rs
    }

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        assert_eq!(subtract_intervals(&base, &remove), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 250)];
        assert!(subtract_intervals(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![Span::new(100, 150), Span::new(200, 300)]
        );
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Span::new(0, 1000)];
        let remove = vec![Span::new(100, 200), Span::new(400, 500), Span::new(800, 900)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![Span::new(100, 300), Span::new(200, 400), Span::new(500, 600)];
        assert_eq!(
            merge_overlapping(&spans),
            vec![Span::new(100, 400), Span::new(500, 600)]
        );
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 300)]);
    }

    // ── free_slots ───────────────────────────────────────

    #[test]
    fn free_slots_around_bookings() {
        let rs = room_with(&[
            (9 * H, 10 * H, ReservationStatus::Confirmed),
            (13 * H, 14 * H, ReservationStatus::Completed),
        ]);
        let free = free_slots(&rs, &Span::new(8 * H, 18 * H), None);
        assert_eq!(
            free,
            vec![
                Span::new(8 * H, 9 * H),
                Span::new(10 * H, 13 * H),
                Span::new(14 * H, 18 * H),
            ]
        );
    }

    #[test]
    fn cancelled_bookings_leave_slot_free() {
        let rs = room_with(&[(9 * H, 10 * H, ReservationStatus::Cancelled)]);
        let free = free_slots(&rs, &Span::new(8 * H, 12 * H), None);
        assert_eq!(free, vec![Span::new(8 * H, 12 * H)]);
    }

    #[test]
    fn booking_straddling_window_is_clamped() {
        let rs = room_with(&[(7 * H, 9 * H, ReservationStatus::Confirmed)]);
        let free = free_slots(&rs, &Span::new(8 * H, 12 * H), None);
        assert_eq!(free, vec![Span::new(9 * H, 12 * H)]);
    }

    #[test]
    fn min_duration_drops_short_gaps() {
        let rs = room_with(&[
            (9 * H, 10 * H, ReservationStatus::Confirmed),
            (10 * H + 15 * M, 11 * H, ReservationStatus::Confirmed),
        ]);
        let free = free_slots(&rs, &Span::new(9 * H, 12 * H), Some(30 * M));
        assert_eq!(free, vec![Span::new(11 * H, 12 * H)]);
    }

    #[test]
    fn fully_booked_window_has_no_slots() {
        let rs = room_with(&[(0, 24 * H, ReservationStatus::Pending)]);
        assert!(free_slots(&rs, &Span::new(9 * H, 17 * H), None).is_empty());
    }
}
