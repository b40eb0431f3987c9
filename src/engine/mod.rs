mod availability;
mod conflict;
mod error;
mod lifecycle;
mod queries;
mod registry;
mod series;
mod store;

pub use availability::{free_slots, merge_overlapping, subtract_intervals};
pub use conflict::{find_conflict, now_ms};
pub use error::{EngineError, ErrorKind};
pub use series::plan_occurrences;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use store::{event_room_id, Indexes};

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
/// A non-append command ends the batch; it runs after the batch is flushed.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

/// Write and fsync a batch. On failure the file is cut back to where the batch
/// began, so no frame of a failed batch outlives its error response.
fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let committed = wal.committed_len()?;
    let result = append_all(wal, batch).and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        warn!("WAL batch of {} failed, rolling back: {e}", batch.len());
        if let Err(rollback_err) = wal.rollback_to(committed) {
            error!("WAL rollback failed, refusing appends until compaction: {rollback_err}");
        }
    }
    result
}

fn append_all(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    for (event, _) in batch {
        wal.append_buffered(event)?;
    }
    Ok(())
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            // A poisoned log only heals through compaction, so report it as overdue.
            let appends = if wal.is_poisoned() {
                u64::MAX
            } else {
                wal.appends_since_compact()
            };
            let _ = response.send(appends);
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// The booking core: room registry, user directory, reservations and series.
///
/// Each room's state sits behind its own `RwLock`. Every mutation takes the
/// room's write lock before validating and keeps it until the WAL append is
/// acknowledged and the change is applied, so check-then-insert is serialized
/// per room while different rooms proceed in parallel.
pub struct Engine {
    pub state: DashMap<Ulid, SharedRoomState>,
    pub(super) users: DashMap<Ulid, UserInfo>,
    /// Lower-cased e-mail → user id.
    pub(super) emails: DashMap<String, Ulid>,
    pub(super) index: Indexes,
    /// Serializes room creation, user registration and compaction.
    pub(super) registry: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            users: DashMap::new(),
            emails: DashMap::new(),
            index: Indexes::new(),
            registry: Mutex::new(()),
            wal_tx,
            notify,
        };

        // We are the sole owner of these locks during replay, so try_write
        // always succeeds. Never block here: this may run inside a runtime.
        for event in &events {
            match event {
                Event::RoomCreated { id, profile } => {
                    let rs = RoomState::new(*id, profile.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::UserRegistered { user } => engine.insert_user(user.clone()),
                other => {
                    if let Some(room_id) = event_room_id(other)
                        && let Some(rs) = engine.get_room_state(&room_id)
                    {
                        let mut guard = rs.try_write().map_err(|_| {
                            io::Error::other("replay: room lock unexpectedly contended")
                        })?;
                        engine.index.apply(&mut guard, other);
                    }
                }
            }
        }

        info!(
            events = events.len(),
            rooms = engine.state.len(),
            users = engine.users.len(),
            reservations = engine.index.reservation_count(),
            "engine state restored from {}",
            wal_path.display()
        );
        Ok(engine)
    }

    fn insert_user(&self, user: UserInfo) {
        self.emails.insert(user.email.to_lowercase(), user.id);
        self.users.insert(user.id, user);
    }

    /// Write an event through the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::StorageFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageFailure(e.to_string()))
    }

    pub fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// WAL-append, apply, notify. State only changes after the append is durable.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.index.apply(rs, event);
        for notification in Indexes::notifications(rs, event) {
            self.notify.send(notification);
        }
        Ok(())
    }

    /// Lookup reservation → room, then take the room's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let room_id = self
            .index
            .room_of_reservation(reservation_id)
            .ok_or(EngineError::ReservationNotFound(*reservation_id))?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::ResourceNotFound(room_id))?;
        Ok(rs.write_owned().await)
    }

    /// Rooms as cloned handles, so callers can await locks without holding map shards.
    pub(super) fn room_handles(&self) -> Vec<SharedRoomState> {
        self.state.iter().map(|e| e.value().clone()).collect()
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    ///
    /// Holds the registry lock and a read lock on every room until the writer
    /// has swapped the file, so no append can land between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;
        let mut guards = Vec::new();
        for rs in self.room_handles() {
            guards.push(rs.read_owned().await);
        }

        let mut events: Vec<Event> = self
            .users
            .iter()
            .map(|e| Event::UserRegistered { user: e.value().clone() })
            .collect();
        for guard in &guards {
            events.push(Event::RoomCreated {
                id: guard.id,
                profile: guard.profile.clone(),
            });
            events.extend(
                guard
                    .reservations
                    .iter()
                    .map(|r| Event::ReservationCreated { reservation: r.clone() }),
            );
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StorageFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageFailure(e.to_string()))?;
        drop(guards);
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
