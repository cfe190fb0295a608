use crate::model::Ms;

/// Index of a half-hour bucket within a UTC day. `0..=47` are real buckets;
/// `48` only ever appears as an exclusive end bound.
pub type Slot = u8;

pub const SLOTS_PER_DAY: Slot = 48;
pub const SLOT_MINUTES: u32 = 30;
pub const SLOT_MS: Ms = 30 * 60_000;
pub const DAY_MS: Ms = SLOTS_PER_DAY as Ms * SLOT_MS;

/// Format a slot boundary as `"HH:MM"`. Slot 48 formats as `"24:00"`.
pub fn slot_to_label(slot: Slot) -> String {
    let hour = slot / 2;
    let minute = if slot % 2 == 0 { "00" } else { "30" };
    format!("{hour:02}:{minute}")
}

/// Inverse of [`slot_to_label`]. Only labels on a slot boundary parse.
pub fn parse_label(label: &str) -> Option<Slot> {
    let (h, m) = label.trim().split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    let hour: u8 = h.parse().ok()?;
    let half = match m {
        "00" => 0,
        "30" => 1,
        _ => return None,
    };
    let slot = hour.checked_mul(2)?.checked_add(half)?;
    (slot <= SLOTS_PER_DAY).then_some(slot)
}

/// Slot containing the wall-clock time `hours:minutes`.
pub fn slot_at(hours: u32, minutes: u32) -> Slot {
    let slot = (hours * 60 + minutes) / SLOT_MINUTES;
    slot.min(SLOTS_PER_DAY as u32 - 1) as Slot
}

/// Slot containing `now` (unix ms, UTC). Always in `0..=47`.
pub fn current_slot(now: Ms) -> Slot {
    (now.rem_euclid(DAY_MS) / SLOT_MS) as Slot
}

/// UTC day number (days since the unix epoch) containing `now`.
pub fn day_of(now: Ms) -> i64 {
    now.div_euclid(DAY_MS)
}

/// The instant at which `slot` starts on the UTC day containing `now`.
pub fn with_slot(now: Ms, slot: Slot) -> Ms {
    day_of(now) * DAY_MS + slot as Ms * SLOT_MS
}

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}
