mod availability;
mod error;
mod mutations;
mod queries;
mod store;
pub mod validator;

pub use availability::{describe, free_slots, is_available, is_available_at, merge_overlapping, subtract_intervals};
pub use error::{EngineError, Rejection};
pub use store::{InMemoryStore, SeatRepository, SharedSeatState};
pub use validator::BookingPolicy;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use ulid::{Generator, Ulid};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

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

/// Owns the WAL file. Takes the first pending append, drains whatever else is
/// already queued, then fsyncs once for the whole batch before answering.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        // Compaction must observe every append acknowledged before it.
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so half-written bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
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
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// Reservation engine for one library: seats, their bookings and the WAL
/// backing them.
pub struct Engine {
    pub(super) store: Arc<dyn SeatRepository>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) policy: BookingPolicy,
    /// Serializes seat creation and pruning against compaction snapshots.
    pub(super) registry: Mutex<()>,
    /// Booking ids increase strictly, even within one millisecond, so id order
    /// is creation order.
    ids: std::sync::Mutex<Generator>,
}

/// Apply an event to a seat whose write lock the caller holds.
fn apply_to_seat(seat: &mut SeatState, event: &Event, store: &dyn SeatRepository) {
    match event {
        Event::PhysicalStatusChanged { physical_status, .. } => {
            seat.physical_status = *physical_status;
        }
        Event::BookingConfirmed(booking) => {
            if let Err(e) = seat.bookings.insert(booking.slot) {
                tracing::warn!("seat {}: booking {} not applied: {e}", seat.id, booking.id);
                return;
            }
            store.save_booking(booking.clone());
        }
        Event::BookingCancelled { id, .. } | Event::BookingExpired { id, .. } => {
            let Some(mut booking) = store.get_booking(id) else {
                tracing::warn!("seat {}: unknown booking {id} released", seat.id);
                return;
            };
            if booking.is_confirmed()
                && let Err(e) = seat.bookings.remove(&booking.slot)
            {
                tracing::warn!("seat {}: booking {id}: {e}", seat.id);
            }
            booking.status = BookingStatus::Cancelled;
            store.save_booking(booking);
        }
        Event::BookingCheckedIn { id, .. } => {
            if let Some(mut booking) = store.get_booking(id) {
                booking.checked_in = true;
                store.save_booking(booking);
            }
        }
        // Seat creation happens at the repository level.
        Event::SeatCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_store(wal_path, notify, Arc::new(InMemoryStore::new()))
    }

    /// Replay the WAL at `wal_path` into `store` and start the WAL writer.
    pub fn with_store(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        store: Arc<dyn SeatRepository>,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::open_and_replay(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store,
            wal_tx,
            notify,
            policy: BookingPolicy::default(),
            registry: Mutex::new(()),
            ids: std::sync::Mutex::new(Generator::new()),
        };

        // The engine is not shared yet, so try_write never contends. Blocking
        // lock calls are off limits: this may run inside the async runtime.
        for event in &events {
            match event {
                Event::SeatCreated { seat_id, physical_status } => {
                    engine
                        .store
                        .save_seat(SeatState::new(seat_id.clone(), *physical_status));
                }
                other => {
                    let Some(seat) = engine.store.get_seat(other.seat_id()) else {
                        tracing::warn!("replay: event for unknown seat {}", other.seat_id());
                        continue;
                    };
                    match seat.try_write() {
                        Ok(mut guard) => apply_to_seat(&mut guard, other, engine.store.as_ref()),
                        Err(_) => tracing::warn!("replay: seat {} locked", other.seat_id()),
                    }
                }
            }
        }
        if !events.is_empty() {
            tracing::debug!(
                "replayed {} events into {} seats",
                events.len(),
                engine.store.seat_count()
            );
        }

        Ok(engine)
    }

    pub fn with_policy(mut self, policy: BookingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> BookingPolicy {
        self.policy
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) fn next_booking_id(&self) -> Ulid {
        let mut ids = self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Overflow needs 2^80 ids in one millisecond.
        ids.generate().unwrap_or_else(|_| Ulid::new())
    }

    pub fn get_seat(&self, seat_id: &str) -> Option<SharedSeatState> {
        self.store.get_seat(seat_id)
    }

    /// WAL-append, then apply, then notify. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(&self, seat: &mut SeatState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_seat(seat, event, self.store.as_ref());
        self.notify.send(&seat.id, event);
        Ok(())
    }
}
