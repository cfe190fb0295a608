use crate::calendar::{Slot, SLOTS_PER_DAY};
use crate::model::*;
use crate::phantom;

// ── Availability ──────────────────────────────────────────────────

/// True if no confirmed booking overlaps `range`. Walk-ins are ignored.
pub fn is_available(seat: &SeatState, range: &TimeSlot) -> bool {
    seat.bookings.find_overlap(range).is_none()
}

pub fn is_available_at(seat: &SeatState, slot: Slot) -> bool {
    slot < SLOTS_PER_DAY && is_available(seat, &TimeSlot::at(slot))
}

/// Occupied spans for the day: bookings plus the walk-in phantom, merged.
fn occupied(seat: &SeatState, phantom: Option<TimeSlot>) -> Vec<TimeSlot> {
    let mut spans: Vec<TimeSlot> = seat.bookings.iter().copied().collect();
    if let Some(p) = phantom {
        spans.push(p);
        spans.sort_by_key(|s| s.start);
    }
    merge_overlapping(&spans)
}

/// Full answer for one seat and range. Real bookings outrank the phantom.
pub fn describe(seat: &SeatState, range: &TimeSlot, now: Slot) -> Availability {
    let walk_in = phantom::project_seat(seat, now);
    let blocked_by = seat
        .bookings
        .find_overlap(range)
        .map(BlockedBy::Booking)
        .or_else(|| walk_in.filter(|p| p.overlaps(range)).map(BlockedBy::Phantom));

    let next_free = blocked_by.and_then(|_| {
        occupied(seat, walk_in)
            .into_iter()
            .find(|run| run.overlaps(range))
            .map(|run| run.end)
            .filter(|&end| end < SLOTS_PER_DAY)
    });

    Availability {
        available: blocked_by.is_none(),
        blocked_by,
        next_free,
        next_booking: seat.bookings.first_start_from(range.end).map(|s| s.start),
    }
}

/// Free spans of the day: `[0, 48)` minus bookings minus the phantom.
pub fn free_slots(seat: &SeatState, now: Slot) -> Vec<TimeSlot> {
    let walk_in = phantom::project_seat(seat, now);
    subtract_intervals(&[TimeSlot::whole_day()], &occupied(seat, walk_in))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[TimeSlot]) -> Vec<TimeSlot> {
    let mut merged: Vec<TimeSlot> = Vec::new();
    for &slot in sorted {
        if let Some(last) = merged.last_mut()
            && slot.start <= last.end
        {
            last.end = last.end.max(slot.end);
            continue;
        }
        merged.push(slot);
    }
    merged
}

/// `base` minus `to_remove`. Both sorted by start; `to_remove` disjoint.
pub fn subtract_intervals(base: &[TimeSlot], to_remove: &[TimeSlot]) -> Vec<TimeSlot> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(TimeSlot::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(TimeSlot::new(current_start, current_end));
        }
    }

    result
}
