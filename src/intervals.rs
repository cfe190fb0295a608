use crate::calendar::Slot;
use crate::model::TimeSlot;

/// Two half-open intervals overlap iff `max(a.start, b.start) < min(a.end, b.end)`.
///
/// Every overlap decision in the crate (validation, phantom blocking, availability)
/// goes through this function. Adjacent intervals (`a.end == b.start`) do not overlap.
pub fn overlaps(a: &TimeSlot, b: &TimeSlot) -> bool {
    a.start.max(b.start) < a.end.min(b.end)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalError {
    /// The new interval overlaps this stored one.
    Overlap(TimeSlot),
    /// No stored interval has exactly these bounds.
    NotFound(TimeSlot),
}

impl std::fmt::Display for IntervalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntervalError::Overlap(s) => write!(f, "overlaps [{}, {})", s.start, s.end),
            IntervalError::NotFound(s) => write!(f, "no interval [{}, {})", s.start, s.end),
        }
    }
}

impl std::error::Error for IntervalError {}

/// One seat's bookings for the day: sorted by `start`, pairwise disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    slots: Vec<TimeSlot>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeSlot> {
        self.slots.iter()
    }

    pub fn as_slice(&self) -> &[TimeSlot] {
        &self.slots
    }

    /// First stored interval overlapping `slot`, if any.
    pub fn find_overlap(&self, slot: &TimeSlot) -> Option<TimeSlot> {
        self.overlapping(slot).next().copied()
    }

    /// Stored intervals overlapping `query`, in ascending order.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping<'a>(&'a self, query: &'a TimeSlot) -> impl Iterator<Item = &'a TimeSlot> {
        let right_bound = self.slots.partition_point(|s| s.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |s| overlaps(s, query))
    }

    /// Insert keeping ascending order. Fails if `slot` overlaps any member.
    pub fn insert(&mut self, slot: TimeSlot) -> Result<(), IntervalError> {
        if let Some(existing) = self.find_overlap(&slot) {
            return Err(IntervalError::Overlap(existing));
        }
        let pos = self.slots.partition_point(|s| s.start < slot.start);
        self.slots.insert(pos, slot);
        Ok(())
    }

    /// Remove the member with exactly these bounds.
    pub fn remove(&mut self, slot: &TimeSlot) -> Result<(), IntervalError> {
        match self.slots.iter().position(|s| s == slot) {
            Some(pos) => {
                self.slots.remove(pos);
                Ok(())
            }
            None => Err(IntervalError::NotFound(*slot)),
        }
    }

    /// First interval, in ascending order, that has not ended by `slot`.
    /// This is the running booking if one covers `slot`, else the next one.
    pub fn next_after(&self, slot: Slot) -> Option<TimeSlot> {
        self.slots.iter().find(|s| s.end > slot).copied()
    }

    /// Earliest interval starting strictly after `slot`.
    pub fn first_start_after(&self, slot: Slot) -> Option<TimeSlot> {
        let pos = self.slots.partition_point(|s| s.start <= slot);
        self.slots.get(pos).copied()
    }

    /// Earliest interval starting at or after `slot`.
    pub fn first_start_from(&self, slot: Slot) -> Option<TimeSlot> {
        let pos = self.slots.partition_point(|s| s.start < slot);
        self.slots.get(pos).copied()
    }
}

impl FromIterator<TimeSlot> for IntervalSet {
    /// Builds a set from trusted, disjoint input (WAL replay, tests).
    fn from_iter<I: IntoIterator<Item = TimeSlot>>(iter: I) -> Self {
        let mut slots: Vec<TimeSlot> = iter.into_iter().collect();
        slots.sort_by_key(|s| s.start);
        Self { slots }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(start: Slot, end: Slot) -> TimeSlot {
        TimeSlot::new(start, end)
    }

    fn assert_sorted_disjoint(set: &IntervalSet) {
        for pair in set.as_slice().windows(2) {
            assert!(pair[0].start < pair[1].start);
            assert!(pair[0].end <= pair[1].start, "{:?} overlaps {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn overlap_formula() {
        assert!(overlaps(&ts(20, 24), &ts(22, 26)));
        assert!(overlaps(&ts(20, 24), &ts(21, 22)));
        assert!(overlaps(&ts(20, 24), &ts(20, 24)));
        assert!(!overlaps(&ts(20, 24), &ts(24, 26))); // adjacent
        assert!(!overlaps(&ts(20, 24), &ts(10, 20))); // adjacent
        assert!(!overlaps(&ts(0, 1), &ts(47, 48)));
    }

    #[test]
    fn overlap_is_symmetric() {
        for a_start in 0..48u8 {
            for a_end in (a_start + 1)..=48 {
                for b_start in (0..48u8).step_by(3) {
                    for b_end in ((b_start + 1)..=48).step_by(5) {
                        let a = ts(a_start, a_end);
                        let b = ts(b_start, b_end);
                        assert_eq!(overlaps(&a, &b), overlaps(&b, &a), "{a:?} {b:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn insert_keeps_order() {
        let mut set = IntervalSet::new();
        set.insert(ts(28, 32)).unwrap();
        set.insert(ts(16, 19)).unwrap();
        set.insert(ts(20, 24)).unwrap();
        set.insert(ts(24, 28)).unwrap();
        assert_eq!(
            set.as_slice(),
            &[ts(16, 19), ts(20, 24), ts(24, 28), ts(28, 32)]
        );
        assert_sorted_disjoint(&set);
    }

    #[test]
    fn insert_rejects_overlap() {
        let mut set = IntervalSet::new();
        set.insert(ts(20, 24)).unwrap();
        assert_eq!(set.insert(ts(22, 26)), Err(IntervalError::Overlap(ts(20, 24))));
        assert_eq!(set.insert(ts(18, 21)), Err(IntervalError::Overlap(ts(20, 24))));
        assert_eq!(set.insert(ts(0, 48)), Err(IntervalError::Overlap(ts(20, 24))));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn many_inserts_stay_sorted_and_disjoint() {
        // Deterministic pseudo-random sequence of candidate intervals.
        let mut set = IntervalSet::new();
        let mut x: u32 = 7;
        for _ in 0..500 {
            x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let start = ((x >> 8) % 48) as Slot;
            let len = ((x >> 16) % 4 + 1) as Slot;
            let end = (start + len).min(48);
            let _ = set.insert(ts(start, end));
            assert_sorted_disjoint(&set);
        }
        assert!(!set.is_empty());
    }

    #[test]
    fn remove_exact_only() {
        let mut set: IntervalSet = [ts(20, 24), ts(28, 32)].into_iter().collect();
        assert_eq!(set.remove(&ts(20, 23)), Err(IntervalError::NotFound(ts(20, 23))));
        assert_eq!(set.remove(&ts(19, 24)), Err(IntervalError::NotFound(ts(19, 24))));
        assert_eq!(set.len(), 2);
        set.remove(&ts(20, 24)).unwrap();
        assert_eq!(set.as_slice(), &[ts(28, 32)]);
    }

    #[test]
    fn insert_then_remove_restores() {
        let before: IntervalSet = [ts(16, 19), ts(26, 30)].into_iter().collect();
        let mut set = before.clone();
        set.insert(ts(20, 24)).unwrap();
        set.remove(&ts(20, 24)).unwrap();
        assert_eq!(set, before);
    }

    #[test]
    fn next_after_prefers_running_interval() {
        let set: IntervalSet = [ts(19, 24), ts(28, 32)].into_iter().collect();
        assert_eq!(set.next_after(10), Some(ts(19, 24)));
        assert_eq!(set.next_after(20), Some(ts(19, 24))); // still running
        assert_eq!(set.next_after(24), Some(ts(28, 32)));
        assert_eq!(set.next_after(32), None);
    }

    #[test]
    fn first_start_after_is_strict() {
        let set: IntervalSet = [ts(19, 24), ts(28, 32)].into_iter().collect();
        assert_eq!(set.first_start_after(19), Some(ts(28, 32)));
        assert_eq!(set.first_start_after(18), Some(ts(19, 24)));
        assert_eq!(set.first_start_after(28), None);
        assert_eq!(set.first_start_from(28), Some(ts(28, 32)));
    }

    #[test]
    fn overlapping_skips_adjacent() {
        let set: IntervalSet = [ts(10, 12), ts(14, 16), ts(20, 22)].into_iter().collect();
        let query = ts(12, 20);
        let hits: Vec<_> = set.overlapping(&query).copied().collect();
        assert_eq!(hits, vec![ts(14, 16)]);
    }
}
