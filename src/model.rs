use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar::{Slot, SLOTS_PER_DAY};
use crate::intervals::IntervalSet;

/// Unix milliseconds.
pub type Ms = i64;

/// Half-open slot interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    #[serde(rename = "startSlot")]
    pub start: Slot,
    #[serde(rename = "endSlot")]
    pub end: Slot,
}

impl TimeSlot {
    pub fn new(start: Slot, end: Slot) -> Self {
        debug_assert!(start < end, "TimeSlot start must be before end");
        debug_assert!(end <= SLOTS_PER_DAY, "TimeSlot end past end of day");
        Self { start, end }
    }

    /// Validating constructor for untrusted bounds.
    pub fn try_new(start: i64, end: i64) -> Option<Self> {
        if start < 0 || end > SLOTS_PER_DAY as i64 || start >= end {
            return None;
        }
        Some(Self { start: start as Slot, end: end as Slot })
    }

    /// The single slot `[slot, slot + 1)`.
    pub fn at(slot: Slot) -> Self {
        Self::new(slot, slot + 1)
    }

    pub fn whole_day() -> Self {
        Self::new(0, SLOTS_PER_DAY)
    }

    pub fn len(&self) -> u8 {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        crate::intervals::overlaps(self, other)
    }

    pub fn contains_slot(&self, slot: Slot) -> bool {
        self.start <= slot && slot < self.end
    }
}

impl std::fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// What the seat's presence sensor last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhysicalStatus {
    /// No signal received yet.
    Unknown,
    Empty,
    Occupied,
}

impl PhysicalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhysicalStatus::Unknown => "unknown",
            PhysicalStatus::Empty => "empty",
            PhysicalStatus::Occupied => "occupied",
        }
    }

    /// Accepts the sensor vocabulary: `occupied`, `empty`/`free`, `unknown`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "occupied" => Some(PhysicalStatus::Occupied),
            "empty" | "free" => Some(PhysicalStatus::Empty),
            "unknown" => Some(PhysicalStatus::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

/// A stored booking. The PIN never leaves the engine: read paths go through
/// [`BookingInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub seat_id: String,
    pub student_id: String,
    pub slot: TimeSlot,
    pub pin_code: String,
    pub status: BookingStatus,
    pub created_at: Ms,
    /// UTC day number the slots refer to.
    pub day: i64,
    pub checked_in: bool,
}

impl Booking {
    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }

    pub fn info(&self) -> BookingInfo {
        BookingInfo {
            booking_id: self.id,
            seat_id: self.seat_id.clone(),
            student_id: self.student_id.clone(),
            start_slot: self.slot.start,
            end_slot: self.slot.end,
            status: self.status,
            created_at: self.created_at,
            checked_in: self.checked_in,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeatState {
    pub id: String,
    pub physical_status: PhysicalStatus,
    /// Confirmed bookings of the day.
    pub bookings: IntervalSet,
}

impl SeatState {
    pub fn new(id: String, physical_status: PhysicalStatus) -> Self {
        Self {
            id,
            physical_status,
            bookings: IntervalSet::new(),
        }
    }
}

/// WAL record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SeatCreated {
        seat_id: String,
        physical_status: PhysicalStatus,
    },
    PhysicalStatusChanged {
        seat_id: String,
        physical_status: PhysicalStatus,
    },
    BookingConfirmed(Booking),
    BookingCancelled {
        id: Ulid,
        seat_id: String,
    },
    BookingCheckedIn {
        id: Ulid,
        seat_id: String,
    },
    /// Day rolled over; same effect as a cancellation.
    BookingExpired {
        id: Ulid,
        seat_id: String,
    },
}

impl Event {
    pub fn seat_id(&self) -> &str {
        match self {
            Event::SeatCreated { seat_id, .. }
            | Event::PhysicalStatusChanged { seat_id, .. }
            | Event::BookingCancelled { seat_id, .. }
            | Event::BookingCheckedIn { seat_id, .. }
            | Event::BookingExpired { seat_id, .. } => seat_id,
            Event::BookingConfirmed(b) => &b.seat_id,
        }
    }

    /// Public projection sent to `LISTEN` subscribers. Carries no PIN.
    pub fn notice(&self) -> Notice<'_> {
        match self {
            Event::SeatCreated { seat_id, physical_status }
            | Event::PhysicalStatusChanged { seat_id, physical_status } => Notice {
                kind: if matches!(self, Event::SeatCreated { .. }) {
                    "seat_created"
                } else {
                    "physical_status_changed"
                },
                seat_id,
                booking_id: None,
                start_slot: None,
                end_slot: None,
                physical_status: Some(physical_status.as_str()),
            },
            Event::BookingConfirmed(b) => Notice {
                kind: "booking_confirmed",
                seat_id: &b.seat_id,
                booking_id: Some(b.id.to_string()),
                start_slot: Some(b.slot.start),
                end_slot: Some(b.slot.end),
                physical_status: None,
            },
            Event::BookingCancelled { id, seat_id }
            | Event::BookingCheckedIn { id, seat_id }
            | Event::BookingExpired { id, seat_id } => Notice {
                kind: match self {
                    Event::BookingCancelled { .. } => "booking_cancelled",
                    Event::BookingCheckedIn { .. } => "booking_checked_in",
                    _ => "booking_expired",
                },
                seat_id,
                booking_id: Some(id.to_string()),
                start_slot: None,
                end_slot: None,
                physical_status: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice<'a> {
    pub kind: &'static str,
    pub seat_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_slot: Option<Slot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_slot: Option<Slot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_status: Option<&'static str>,
}

// ── Requests ─────────────────────────────────────────────────────

/// Raw booking request; bounds are unchecked until validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub seat_id: String,
    pub student_id: String,
    pub start_slot: i64,
    pub end_slot: i64,
    pub pin_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelRequest {
    pub booking_id: Ulid,
    pub student_id: String,
    pub pin_code: String,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatInfo {
    pub seat_id: String,
    pub physical_status: PhysicalStatus,
    pub today_bookings: Vec<TimeSlot>,
    /// Start of the booking running at or next after `now`.
    pub next_booking_start: Option<Slot>,
    pub phantom: Option<TimeSlot>,
}

/// Booking as seen by clients: everything but the PIN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub booking_id: Ulid,
    pub seat_id: String,
    pub student_id: String,
    pub start_slot: Slot,
    pub end_slot: Slot,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub checked_in: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledInfo {
    pub booking_id: Ulid,
    pub status: BookingStatus,
}

/// Why a range is not free. Real bookings rank above walk-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedBy {
    Booking(TimeSlot),
    Phantom(TimeSlot),
}

impl BlockedBy {
    pub fn kind(&self) -> &'static str {
        match self {
            BlockedBy::Booking(_) => "booking",
            BlockedBy::Phantom(_) => "phantom",
        }
    }

    pub fn slot(&self) -> TimeSlot {
        match self {
            BlockedBy::Booking(s) | BlockedBy::Phantom(s) => *s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub blocked_by: Option<BlockedBy>,
    /// When blocked: slot at which the occupied run covering the range ends.
    pub next_free: Option<Slot>,
    /// Start of the first booking at or after the range end.
    pub next_booking: Option<Slot>,
}
