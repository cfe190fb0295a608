use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedSeatState = Arc<RwLock<SeatState>>;

/// Storage seam for seats and bookings. The engine serializes writes per seat
/// by holding the seat's lock; implementations only need to be thread-safe.
pub trait SeatRepository: Send + Sync {
    fn get_seat(&self, seat_id: &str) -> Option<SharedSeatState>;
    fn save_seat(&self, seat: SeatState) -> SharedSeatState;
    fn seat_count(&self) -> usize;
    /// Seat ids in ascending order.
    fn seat_ids(&self) -> Vec<String>;

    fn get_booking(&self, id: &Ulid) -> Option<Booking>;
    fn save_booking(&self, booking: Booking);
    /// All bookings in creation order.
    fn bookings(&self) -> Vec<Booking>;
    fn bookings_for_student(&self, student_id: &str) -> Vec<Booking>;
    fn bookings_for_seat(&self, seat_id: &str) -> Vec<Booking>;
    /// Forget released bookings made before `day`. Returns how many went.
    fn prune_released_before(&self, day: i64) -> usize;
}

pub struct InMemoryStore {
    seats: DashMap<String, SharedSeatState>,
    bookings: DashMap<Ulid, Booking>,
    /// Secondary indexes: seat/student → booking ids.
    by_seat: DashMap<String, Vec<Ulid>>,
    by_student: DashMap<String, Vec<Ulid>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            seats: DashMap::new(),
            bookings: DashMap::new(),
            by_seat: DashMap::new(),
            by_student: DashMap::new(),
        }
    }

    fn collect(&self, ids: Option<Vec<Ulid>>) -> Vec<Booking> {
        let mut ids = ids.unwrap_or_default();
        ids.sort();
        ids.iter()
            .filter_map(|id| self.bookings.get(id).map(|b| b.value().clone()))
            .collect()
    }
}

impl SeatRepository for InMemoryStore {
    fn get_seat(&self, seat_id: &str) -> Option<SharedSeatState> {
        self.seats.get(seat_id).map(|e| e.value().clone())
    }

    fn save_seat(&self, seat: SeatState) -> SharedSeatState {
        let id = seat.id.clone();
        let shared = Arc::new(RwLock::new(seat));
        self.seats.insert(id, shared.clone());
        shared
    }

    fn seat_count(&self) -> usize {
        self.seats.len()
    }

    fn seat_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.seats.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    fn save_booking(&self, booking: Booking) {
        let id = booking.id;
        if !self.bookings.contains_key(&id) {
            self.by_seat.entry(booking.seat_id.clone()).or_default().push(id);
            self.by_student
                .entry(booking.student_id.clone())
                .or_default()
                .push(id);
        }
        self.bookings.insert(id, booking);
    }

    fn bookings(&self) -> Vec<Booking> {
        let mut all: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|b| b.id);
        all
    }

    fn bookings_for_student(&self, student_id: &str) -> Vec<Booking> {
        self.collect(self.by_student.get(student_id).map(|e| e.value().clone()))
    }

    fn bookings_for_seat(&self, seat_id: &str) -> Vec<Booking> {
        self.collect(self.by_seat.get(seat_id).map(|e| e.value().clone()))
    }

    fn prune_released_before(&self, day: i64) -> usize {
        let stale: Vec<(Ulid, String, String)> = self
            .bookings
            .iter()
            .filter(|e| !e.is_confirmed() && e.day < day)
            .map(|e| (e.id, e.seat_id.clone(), e.student_id.clone()))
            .collect();
        for (id, seat_id, student_id) in &stale {
            self.bookings.remove(id);
            if let Some(mut ids) = self.by_seat.get_mut(seat_id) {
                ids.retain(|b| b != id);
            }
            if let Some(mut ids) = self.by_student.get_mut(student_id) {
                ids.retain(|b| b != id);
            }
        }
        self.by_student.retain(|_, ids| !ids.is_empty());
        stale.len()
    }
}
