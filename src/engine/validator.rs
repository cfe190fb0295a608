//! Accept/reject decisions for bookings, cancellations and check-ins.
//!
//! Everything here is a pure function of its inputs. The engine calls these
//! while holding the seat's write lock, so check-then-mutate is atomic per seat.

use ulid::Ulid;

use crate::calendar::Slot;
use crate::model::*;
use crate::phantom;

use super::error::Rejection;

/// Optional tightenings on top of the reference rules. All off by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingPolicy {
    /// Refuse bookings whose start slot is at or before the current slot.
    pub reject_started_slots: bool,
    /// Treat a walk-in occupant's phantom interval as blocking.
    pub walk_in_blocks: bool,
}

pub fn validate_range(start: i64, end: i64) -> Result<TimeSlot, Rejection> {
    TimeSlot::try_new(start, end).ok_or(Rejection::InvalidRange { start, end })
}

/// Exactly four ASCII decimal digits.
pub fn validate_pin(pin: &str) -> Result<(), Rejection> {
    if pin.len() == 4 && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(Rejection::InvalidPin)
    }
}

/// Decide a booking request against the seat's current state.
///
/// Order: range, seat existence, pin format, started-slot policy, overlap with
/// confirmed bookings, walk-in policy. Pin format is checked before any
/// overlap test so a malformed request is reported as such regardless of the
/// seat's schedule.
pub fn validate_booking(
    seat: Option<&SeatState>,
    req: &BookingRequest,
    policy: &BookingPolicy,
    now: Slot,
) -> Result<TimeSlot, Rejection> {
    let slot = validate_range(req.start_slot, req.end_slot)?;
    let seat = seat.ok_or_else(|| Rejection::SeatNotFound(req.seat_id.clone()))?;
    validate_pin(&req.pin_code)?;

    if policy.reject_started_slots && slot.start <= now {
        return Err(Rejection::SlotStarted { start: slot.start, now });
    }
    if let Some(existing) = seat.bookings.find_overlap(&slot) {
        return Err(Rejection::Overlap(existing));
    }
    if policy.walk_in_blocks
        && let Some(walk_in) = phantom::project_seat(seat, now)
        && walk_in.overlaps(&slot)
    {
        return Err(Rejection::WalkInOccupied(walk_in));
    }
    Ok(slot)
}

/// Decide a cancellation. Returns the interval to release.
pub fn validate_cancel(booking: Option<&Booking>, req: &CancelRequest) -> Result<TimeSlot, Rejection> {
    let booking = booking.ok_or(Rejection::NotFound(req.booking_id))?;
    if booking.student_id != req.student_id {
        return Err(Rejection::StudentMismatch);
    }
    if booking.pin_code != req.pin_code {
        return Err(Rejection::WrongPin);
    }
    if booking.status == BookingStatus::Cancelled {
        return Err(Rejection::AlreadyCancelled(booking.id));
    }
    Ok(booking.slot)
}

/// Decide a keypad check-in: the pin must match the booking running now.
pub fn validate_check_in(
    seat_id: &str,
    seat: Option<&SeatState>,
    running: Option<&Booking>,
    pin: &str,
) -> Result<Ulid, Rejection> {
    if seat.is_none() {
        return Err(Rejection::SeatNotFound(seat_id.to_string()));
    }
    validate_pin(pin)?;
    let booking = running.ok_or_else(|| Rejection::NoActiveBooking(seat_id.to_string()))?;
    if booking.pin_code != pin {
        return Err(Rejection::WrongPin);
    }
    Ok(booking.id)
}
