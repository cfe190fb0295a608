//! Walk-in occupancy projection.
//!
//! A seat reported occupied by its presence sensor is treated as held by an
//! unregistered occupant from the current slot until the next real booking
//! starts (or end of day). The projection is derived on every query and never
//! stored.

use crate::calendar::{Slot, SLOTS_PER_DAY};
use crate::intervals::IntervalSet;
use crate::model::{PhysicalStatus, SeatState, TimeSlot};

/// Phantom interval for a seat with the given sensor state and bookings at `now`.
pub fn project(status: PhysicalStatus, bookings: &IntervalSet, now: Slot) -> Option<TimeSlot> {
    if status != PhysicalStatus::Occupied || now >= SLOTS_PER_DAY {
        return None;
    }
    let end = bookings
        .first_start_after(now)
        .map_or(SLOTS_PER_DAY, |next| next.start);
    Some(TimeSlot::new(now, end))
}

pub fn project_seat(seat: &SeatState, now: Slot) -> Option<TimeSlot> {
    project(seat.physical_status, &seat.bookings, now)
}

/// True if the walk-in projection overlaps `range`.
pub fn blocks(seat: &SeatState, range: &TimeSlot, now: Slot) -> bool {
    project_seat(seat, now).is_some_and(|p| p.overlaps(range))
}
