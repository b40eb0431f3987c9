use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{now_ms, Engine};

/// Background task that periodically marks finished reservations completed.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match engine.sweep_completions(now_ms()).await {
            Ok(0) => {}
            Ok(n) => debug!("sweeper completed {n} reservations"),
            Err(e) => warn!("completion sweep failed: {e}"),
        }
    }
}

/// Background task that rewrites the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweeper_completes_finished_reservations() {
        let path = test_wal_path("sweeper.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify).unwrap());

        let room = Ulid::new();
        engine.create_room(room, RoomProfile::new("Focus", 2)).await.unwrap();
        let user = UserInfo {
            id: Ulid::new(),
            name: "Dana".into(),
            email: "dana@example.com".into(),
            department: Some("Ops".into()),
            is_admin: false,
        };
        let uid = user.id;
        engine.register_user(user).await.unwrap();

        // Booked "yesterday" relative to a clock pinned two days back.
        let now = now_ms();
        let start = now - DAY_MS;
        let r = engine
            .create_reservation_at(
                NewReservation {
                    room_id: room,
                    user_id: uid,
                    title: "Retro".into(),
                    description: None,
                    start,
                    end: start + HOUR_MS,
                    attendees: 2,
                },
                now - 2 * DAY_MS,
            )
            .await
            .unwrap();

        let task = tokio::spawn(run_sweeper(engine.clone(), Duration::from_millis(10)));
        for _ in 0..100 {
            let status = engine.get_reservation(r.id).await.unwrap().status;
            if status == ReservationStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();

        let status = engine.get_reservation(r.id).await.unwrap().status;
        assert_eq!(status, ReservationStatus::Completed);
    }
}
