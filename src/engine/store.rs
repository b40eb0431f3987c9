use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;
use crate::notify::Notification;

/// Secondary indexes over room state: reservation → room and series → room.
/// Both are rebuilt from the WAL on replay.
#[derive(Default)]
pub struct Indexes {
    reservation_room: DashMap<Ulid, Ulid>,
    series_room: DashMap<Ulid, Ulid>,
}

impl Indexes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_of_reservation(&self, id: &Ulid) -> Option<Ulid> {
        self.reservation_room.get(id).map(|e| *e.value())
    }

    pub fn room_of_series(&self, series_id: &Ulid) -> Option<Ulid> {
        self.series_room.get(series_id).map(|e| *e.value())
    }

    pub fn reservation_count(&self) -> usize {
        self.reservation_room.len()
    }

    fn index_reservation(&self, r: &Reservation) {
        self.reservation_room.insert(r.id, r.room_id);
        if let Some(tag) = r.series {
            self.series_room.insert(tag.id, r.room_id);
        }
    }

    /// Apply an event to a room. Caller holds the write lock.
    pub fn apply(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::RoomUpdated { profile, .. } => {
                rs.profile = profile.clone();
            }
            Event::ReservationCreated { reservation } => {
                self.index_reservation(reservation);
                rs.insert_reservation(reservation.clone());
            }
            Event::SeriesCreated { reservations, .. } => {
                for r in reservations {
                    self.index_reservation(r);
                    rs.insert_reservation(r.clone());
                }
            }
            Event::ReservationCancelled { id, at, .. } => {
                if let Some(r) = rs.get_mut(id) {
                    r.status = ReservationStatus::Cancelled;
                    r.updated_at = *at;
                }
            }
            Event::ReservationsCompleted { ids, at, .. } => {
                for id in ids {
                    if let Some(r) = rs.get_mut(id)
                        && r.status == ReservationStatus::Confirmed
                    {
                        r.status = ReservationStatus::Completed;
                        r.updated_at = *at;
                    }
                }
            }
            Event::SeriesDeleted { series_id, .. } => {
                for id in rs.remove_series(series_id) {
                    self.reservation_room.remove(&id);
                }
                self.series_room.remove(series_id);
            }
            // Room creation and user registration live above the room level.
            Event::RoomCreated { .. } | Event::UserRegistered { .. } => {}
        }
    }

    /// Notifications owed to the external notifier once `event` has been applied.
    pub fn notifications(rs: &RoomState, event: &Event) -> Vec<Notification> {
        match event {
            Event::ReservationCreated { reservation } => vec![Notification::ReservationCreated {
                reservation: reservation.clone(),
            }],
            Event::SeriesCreated { reservations, .. } => reservations
                .iter()
                .map(|r| Notification::ReservationCreated { reservation: r.clone() })
                .collect(),
            Event::ReservationCancelled { id, .. } => rs
                .get(id)
                .map(|r| Notification::ReservationCancelled { reservation: r.clone() })
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// The room an event belongs to, for events applied at room level.
pub fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RoomUpdated { id, .. } => Some(*id),
        Event::ReservationCreated { reservation } => Some(reservation.room_id),
        Event::SeriesCreated { room_id, .. }
        | Event::ReservationCancelled { room_id, .. }
        | Event::ReservationsCompleted { room_id, .. }
        | Event::SeriesDeleted { room_id, .. } => Some(*room_id),
        Event::RoomCreated { .. } | Event::UserRegistered { .. } => None,
    }
}
