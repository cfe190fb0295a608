use std::collections::HashSet;

use tokio::sync::oneshot;
use crate::calendar::{current_slot, day_of, now_ms};
use crate::limits::*;
use crate::model::*;
use crate::observability::BOOKINGS_TOTAL;

use super::validator;
use super::{Engine, EngineError, Rejection, WalCommand};

impl Engine {
    pub async fn create_seat(&self, seat_id: &str, physical_status: PhysicalStatus) -> Result<(), EngineError> {
        self.create_seats(vec![(seat_id.to_string(), physical_status)]).await
    }

    /// Register several seats. All-or-nothing: a duplicate or oversized id
    /// anywhere in the batch rejects the whole batch.
    pub async fn create_seats(&self, seats: Vec<(String, PhysicalStatus)>) -> Result<(), EngineError> {
        if seats.is_empty() {
            return Ok(());
        }
        if seats.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }

        let _registry = self.registry.lock().await;
        if self.store.seat_count() + seats.len() > MAX_SEATS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many seats"));
        }
        let mut seen = HashSet::new();
        for (seat_id, _) in &seats {
            if seat_id.is_empty() || seat_id.len() > MAX_SEAT_ID_LEN {
                return Err(EngineError::LimitExceeded("seat id must be 1 to 32 bytes"));
            }
            if !seen.insert(seat_id.as_str()) || self.store.get_seat(seat_id).is_some() {
                return Err(EngineError::AlreadyExists(seat_id.clone()));
            }
        }

        for (seat_id, physical_status) in seats {
            let event = Event::SeatCreated {
                seat_id: seat_id.clone(),
                physical_status,
            };
            self.wal_append(&event).await?;
            self.store.save_seat(SeatState::new(seat_id.clone(), physical_status));
            self.notify.send(&seat_id, &event);
            tracing::debug!("seat {seat_id} created ({})", physical_status.as_str());
        }
        Ok(())
    }

    /// Record the presence sensor's reading. Repeating the current reading is a no-op.
    pub async fn set_physical_status(&self, seat_id: &str, physical_status: PhysicalStatus) -> Result<(), EngineError> {
        let seat = self
            .store
            .get_seat(seat_id)
            .ok_or_else(|| Rejection::SeatNotFound(seat_id.to_string()))?;
        let mut guard = seat.write().await;
        if guard.physical_status == physical_status {
            return Ok(());
        }
        let event = Event::PhysicalStatusChanged {
            seat_id: seat_id.to_string(),
            physical_status,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn create_booking(&self, req: BookingRequest) -> Result<BookingInfo, EngineError> {
        self.create_booking_at(req, now_ms()).await
    }

    /// Validate and commit a booking as of `now`. The seat's write lock is held
    /// from the overlap check until the booking is applied.
    pub async fn create_booking_at(&self, req: BookingRequest, now: Ms) -> Result<BookingInfo, EngineError> {
        if req.student_id.len() > MAX_STUDENT_ID_LEN {
            return Err(EngineError::LimitExceeded("student id too long"));
        }

        let seat = self.store.get_seat(&req.seat_id);
        let mut guard = match &seat {
            Some(seat) => Some(seat.write().await),
            None => None,
        };
        let slot = match validator::validate_booking(guard.as_deref(), &req, &self.policy, current_slot(now)) {
            Ok(slot) => slot,
            Err(rejection) => {
                metrics::counter!(BOOKINGS_TOTAL, "outcome" => rejection.label()).increment(1);
                tracing::debug!("booking on seat {} rejected: {rejection}", req.seat_id);
                return Err(rejection.into());
            }
        };
        let Some(state) = guard.as_mut() else {
            return Err(Rejection::SeatNotFound(req.seat_id).into());
        };

        let booking = Booking {
            id: self.next_booking_id(),
            seat_id: req.seat_id,
            student_id: req.student_id,
            slot,
            pin_code: req.pin_code,
            status: BookingStatus::Confirmed,
            created_at: now,
            day: day_of(now),
            checked_in: false,
        };
        let info = booking.info();
        self.persist_and_apply(state, &Event::BookingConfirmed(booking)).await?;

        metrics::counter!(BOOKINGS_TOTAL, "outcome" => "confirmed").increment(1);
        tracing::debug!(
            "booking {} confirmed: seat {} {} for {}",
            info.booking_id,
            info.seat_id,
            slot,
            info.student_id
        );
        Ok(info)
    }

    /// Cancel a confirmed booking and free its interval.
    pub async fn cancel_booking(&self, req: CancelRequest) -> Result<CancelledInfo, EngineError> {
        let seat_id = self
            .store
            .get_booking(&req.booking_id)
            .map(|b| b.seat_id)
            .ok_or(Rejection::NotFound(req.booking_id))?;
        let seat = self
            .store
            .get_seat(&seat_id)
            .ok_or(Rejection::NotFound(req.booking_id))?;
        let mut guard = seat.write().await;

        // Re-read under the lock: a concurrent cancel may have won.
        let current = self.store.get_booking(&req.booking_id);
        if let Err(rejection) = validator::validate_cancel(current.as_ref(), &req) {
            tracing::debug!("cancel of {} rejected: {rejection}", req.booking_id);
            return Err(rejection.into());
        }

        let event = Event::BookingCancelled {
            id: req.booking_id,
            seat_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => "cancelled").increment(1);
        tracing::debug!("booking {} cancelled", req.booking_id);

        Ok(CancelledInfo {
            booking_id: req.booking_id,
            status: BookingStatus::Cancelled,
        })
    }

    pub async fn check_in(&self, seat_id: &str, pin: &str) -> Result<BookingInfo, EngineError> {
        self.check_in_at(seat_id, pin, now_ms()).await
    }

    /// Keypad check-in: mark the booking running on `seat_id` at `now` as
    /// checked in. Checking in twice returns the same booking.
    pub async fn check_in_at(&self, seat_id: &str, pin: &str, now: Ms) -> Result<BookingInfo, EngineError> {
        let (now_slot, today) = (current_slot(now), day_of(now));
        let seat = self.store.get_seat(seat_id);
        let mut guard = match &seat {
            Some(seat) => Some(seat.write().await),
            None => None,
        };
        let running = guard.as_ref().and_then(|_| {
            self.store
                .bookings_for_seat(seat_id)
                .into_iter()
                .find(|b| b.is_confirmed() && b.day == today && b.slot.contains_slot(now_slot))
        });
        let id = validator::validate_check_in(seat_id, guard.as_deref(), running.as_ref(), pin)?;
        let (Some(state), Some(mut booking)) = (guard.as_mut(), running) else {
            return Err(Rejection::NoActiveBooking(seat_id.to_string()).into());
        };
        if booking.checked_in {
            return Ok(booking.info());
        }

        let event = Event::BookingCheckedIn {
            id,
            seat_id: seat_id.to_string(),
        };
        self.persist_and_apply(state, &event).await?;
        tracing::debug!("booking {id} checked in on seat {seat_id}");

        booking.checked_in = true;
        Ok(booking.info())
    }

    /// Expire every confirmed booking that is over at `now`: its slot has ended
    /// today, or it was made on an earlier day. Released bookings from earlier
    /// days are then dropped from memory. Returns how many were expired.
    pub async fn expire_finished_bookings(&self, now: Ms) -> Result<usize, EngineError> {
        let (today, now_slot) = (day_of(now), current_slot(now));
        let finished = |b: &Booking| b.is_confirmed() && (b.day < today || (b.day == today && b.slot.end <= now_slot));
        let due: Vec<Booking> = self.store.bookings().into_iter().filter(|b| finished(b)).collect();

        let mut expired = 0;
        for booking in due {
            let Some(seat) = self.store.get_seat(&booking.seat_id) else {
                continue;
            };
            let mut guard = seat.write().await;
            if !self.store.get_booking(&booking.id).is_some_and(|b| finished(&b)) {
                continue;
            }
            let event = Event::BookingExpired {
                id: booking.id,
                seat_id: booking.seat_id,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            expired += 1;
        }
        if expired > 0 {
            metrics::counter!(BOOKINGS_TOTAL, "outcome" => "expired").increment(expired as u64);
        }

        let pruned = {
            let _registry = self.registry.lock().await;
            self.store.prune_released_before(today)
        };
        if pruned > 0 {
            tracing::debug!("pruned {pruned} released bookings from previous days");
        }
        Ok(expired)
    }

    /// Rewrite the WAL as the minimal event list that rebuilds current state.
    ///
    /// Every seat is read-locked while the snapshot is taken and written, so no
    /// mutation can land between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;
        let mut guards = Vec::new();
        for seat_id in self.store.seat_ids() {
            if let Some(seat) = self.store.get_seat(&seat_id) {
                guards.push(seat.read_owned().await);
            }
        }

        let mut events = Vec::new();
        for seat in &guards {
            events.push(Event::SeatCreated {
                seat_id: seat.id.clone(),
                physical_status: seat.physical_status,
            });
            // Creation order, so a released slot is free again before a later booking reuses it.
            for booking in self.store.bookings_for_seat(&seat.id) {
                let (id, cancelled) = (booking.id, !booking.is_confirmed());
                events.push(Event::BookingConfirmed(Booking {
                    status: BookingStatus::Confirmed,
                    ..booking
                }));
                if cancelled {
                    events.push(Event::BookingCancelled {
                        id,
                        seat_id: seat.id.clone(),
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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
