use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Reservation;

const CHANNEL_CAPACITY: usize = 256;

/// Lifecycle events handed to the external notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    ReservationCreated { reservation: Reservation },
    ReservationCancelled { reservation: Reservation },
}

impl Notification {
    pub fn reservation(&self) -> &Reservation {
        match self {
            Notification::ReservationCreated { reservation }
            | Notification::ReservationCancelled { reservation } => reservation,
        }
    }

    /// JSON payload for delivery channels.
    pub fn payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

/// Broadcast hub: one channel per room plus a firehose for all rooms.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
    all: broadcast::Sender<Notification>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one room. Creates the channel if needed.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Notification> {
        self.all.subscribe()
    }

    /// Publish a notification. No-op if nobody is listening.
    pub fn send(&self, notification: Notification) {
        let room_id = notification.reservation().room_id;
        if let Some(sender) = self.channels.get(&room_id) {
            let _ = sender.send(notification.clone());
        }
        let _ = self.all.send(notification);
    }
}
