use ulid::Ulid;

use crate::model::*;

use super::Engine;

impl Engine {
    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        let room_id = self.index.room_of_reservation(&id)?;
        let rs = self.get_room_state(&room_id)?;
        let guard = rs.read().await;
        guard.get(&id).cloned()
    }

    /// Reservations matching `filter`, newest start first.
    pub async fn list_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        let handles = match filter.room_id {
            Some(room_id) => self.get_room_state(&room_id).into_iter().collect(),
            None => self.room_handles(),
        };

        let mut out = Vec::new();
        for rs in handles {
            let guard = rs.read().await;
            match &filter.window {
                Some(window) => out.extend(
                    guard
                        .overlapping(window)
                        .filter(|r| filter.matches(r))
                        .cloned(),
                ),
                None => out.extend(
                    guard
                        .reservations
                        .iter()
                        .filter(|r| filter.matches(r))
                        .cloned(),
                ),
            }
        }
        out.sort_by(|a, b| b.span.start.cmp(&a.span.start).then(b.id.cmp(&a.id)));
        out
    }
}
