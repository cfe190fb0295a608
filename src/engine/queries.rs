use ulid::Ulid;

use crate::calendar::Slot;
use crate::model::*;
use crate::phantom;

use super::availability;
use super::validator::validate_range;
use super::{Engine, EngineError, Rejection};

fn seat_info(seat: &SeatState, now: Slot) -> SeatInfo {
    SeatInfo {
        seat_id: seat.id.clone(),
        physical_status: seat.physical_status,
        today_bookings: seat.bookings.iter().copied().collect(),
        next_booking_start: seat.bookings.next_after(now).map(|s| s.start),
        phantom: phantom::project_seat(seat, now),
    }
}

impl Engine {
    /// Every seat with its bookings and walk-in projection, ordered by id.
    pub async fn list_seats(&self, now: Slot) -> Vec<SeatInfo> {
        let mut seats = Vec::with_capacity(self.store.seat_count());
        for seat_id in self.store.seat_ids() {
            if let Some(seat) = self.store.get_seat(&seat_id) {
                seats.push(seat_info(&*seat.read().await, now));
            }
        }
        seats
    }

    pub async fn seat_info(&self, seat_id: &str, now: Slot) -> Option<SeatInfo> {
        let seat = self.store.get_seat(seat_id)?;
        let guard = seat.read().await;
        Some(seat_info(&guard, now))
    }

    /// A student's confirmed bookings in creation order. Never includes PINs.
    pub fn student_bookings(&self, student_id: &str) -> Vec<BookingInfo> {
        self.store
            .bookings_for_student(student_id)
            .iter()
            .filter(|b| b.is_confirmed())
            .map(Booking::info)
            .collect()
    }

    /// Every booking, cancelled ones included, in creation order.
    pub fn all_bookings(&self) -> Vec<BookingInfo> {
        self.store.bookings().iter().map(Booking::info).collect()
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<BookingInfo> {
        self.store.get_booking(id).map(|b| b.info())
    }

    pub async fn is_seat_available(&self, seat_id: &str, range: &TimeSlot) -> Result<bool, EngineError> {
        let seat = self
            .store
            .get_seat(seat_id)
            .ok_or_else(|| Rejection::SeatNotFound(seat_id.to_string()))?;
        let guard = seat.read().await;
        Ok(availability::is_available(&guard, range))
    }

    /// Describe `[start, end)` on one seat, or on every seat when `seat_id`
    /// is `None`.
    pub async fn describe_availability(
        &self,
        seat_id: Option<&str>,
        start: i64,
        end: i64,
        now: Slot,
    ) -> Result<Vec<(String, Availability)>, EngineError> {
        let range = validate_range(start, end)?;
        let seat_ids = match seat_id {
            Some(id) if self.store.get_seat(id).is_none() => {
                return Err(Rejection::SeatNotFound(id.to_string()).into());
            }
            Some(id) => vec![id.to_string()],
            None => self.store.seat_ids(),
        };

        let mut rows = Vec::with_capacity(seat_ids.len());
        for id in seat_ids {
            if let Some(seat) = self.store.get_seat(&id) {
                let guard = seat.read().await;
                rows.push((id, availability::describe(&guard, &range, now)));
            }
        }
        Ok(rows)
    }

    pub async fn seat_free_slots(&self, seat_id: &str, now: Slot) -> Result<Vec<TimeSlot>, EngineError> {
        let seat = self
            .store
            .get_seat(seat_id)
            .ok_or_else(|| Rejection::SeatNotFound(seat_id.to_string()))?;
        let guard = seat.read().await;
        Ok(availability::free_slots(&guard, now))
    }

    pub fn seat_count(&self) -> usize {
        self.store.seat_count()
    }
}
