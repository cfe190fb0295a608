use ulid::Ulid;

use crate::model::TimeSlot;

/// Why a booking, cancellation or check-in was refused. Never fatal; the
/// caller maps each reason to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    InvalidRange { start: i64, end: i64 },
    SeatNotFound(String),
    Overlap(TimeSlot),
    InvalidPin,
    NotFound(Ulid),
    StudentMismatch,
    WrongPin,
    AlreadyCancelled(Ulid),
    /// Start slot has already begun (opt-in policy).
    SlotStarted { start: u8, now: u8 },
    /// Overlaps a walk-in occupant (opt-in policy).
    WalkInOccupied(TimeSlot),
    /// Check-in found no confirmed booking running on the seat.
    NoActiveBooking(String),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::InvalidRange { start, end } => write!(
                f,
                "invalid range [{start}, {end}): start must be before end, within [0, 48]"
            ),
            Rejection::SeatNotFound(id) => write!(f, "seat {id} not found"),
            Rejection::Overlap(slot) => {
                write!(f, "seat already booked during {slot}")
            }
            Rejection::InvalidPin => write!(f, "pin must be exactly 4 decimal digits"),
            Rejection::NotFound(id) => write!(f, "booking {id} not found"),
            Rejection::StudentMismatch => write!(f, "student id does not match this booking"),
            Rejection::WrongPin => write!(f, "incorrect pin"),
            Rejection::AlreadyCancelled(id) => write!(f, "booking {id} is already cancelled"),
            Rejection::SlotStarted { start, now } => write!(
                f,
                "slot {start} has already started (current slot {now})"
            ),
            Rejection::WalkInOccupied(slot) => {
                write!(f, "seat is occupied by a walk-in during {slot}")
            }
            Rejection::NoActiveBooking(id) => {
                write!(f, "no booking is running on seat {id}")
            }
        }
    }
}

impl std::error::Error for Rejection {}

impl Rejection {
    /// Short label for the `outcome` metric dimension.
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::InvalidRange { .. } => "invalid_range",
            Rejection::SeatNotFound(_) => "seat_not_found",
            Rejection::Overlap(_) => "overlap",
            Rejection::InvalidPin => "invalid_pin",
            Rejection::NotFound(_) => "not_found",
            Rejection::StudentMismatch => "student_mismatch",
            Rejection::WrongPin => "wrong_pin",
            Rejection::AlreadyCancelled(_) => "already_cancelled",
            Rejection::SlotStarted { .. } => "slot_started",
            Rejection::WalkInOccupied(_) => "walk_in_occupied",
            Rejection::NoActiveBooking(_) => "no_active_booking",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    Rejected(Rejection),
    AlreadyExists(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl From<Rejection> for EngineError {
    fn from(r: Rejection) -> Self {
        EngineError::Rejected(r)
    }
}

impl EngineError {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            EngineError::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Rejected(r) => write!(f, "{r}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
