//! Ring-buffered sequence windows.
//!
//! A window of size `W` maps sequence `s` to slot `s % W`. Because `W` divides
//! the sequence space, a slot is reused by exactly the sequences that are
//! congruent modulo `W`, so each slot carries the full sequence it currently
//! holds as a 32-bit tag. Testing the tag against the expected sequence is the
//! only way to tell a live entry from a stale one after wrap-around - a mere
//! in-window check is not enough.

/// Tag value marking a slot that holds no live entry.
const EMPTY_TAG: u32 = u32::MAX;

struct Slot<T> {
    tag: u32,
    item: T,
}

pub struct SequenceBuffer<T> {
    slots: Vec<Slot<T>>,
}

impl<T: Default> SequenceBuffer<T> {
    /// `size` must be a nonzero divisor of 65536 (validated by the config).
    pub fn new(size: usize) -> SequenceBuffer<T> {
        debug_assert!(size > 0 && 65536 % size == 0);

        let mut slots = Vec::new();
        slots.resize_with(size, || Slot {
            tag: EMPTY_TAG,
            item: T::default(),
        });
        SequenceBuffer { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn index(&self, sequence: u16) -> usize {
        sequence as usize % self.slots.len()
    }

    /// The entry for `sequence`, if its slot currently holds that sequence.
    pub fn get(&self, sequence: u16) -> Option<&T> {
        let slot = &self.slots[self.index(sequence)];
        if slot.tag == sequence as u32 {
            Some(&slot.item)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, sequence: u16) -> Option<&mut T> {
        let index = self.index(sequence);
        let slot = &mut self.slots[index];
        if slot.tag == sequence as u32 {
            Some(&mut slot.item)
        } else {
            None
        }
    }

    pub fn contains(&self, sequence: u16) -> bool {
        self.get(sequence).is_some()
    }

    /// Claim the slot for `sequence`, returning whatever item occupied it
    /// before - live or stale - so the caller can reclaim its resources.
    pub fn insert(&mut self, sequence: u16, item: T) -> T {
        let index = self.index(sequence);
        let slot = &mut self.slots[index];
        slot.tag = sequence as u32;
        std::mem::replace(&mut slot.item, item)
    }

    /// Mark every slot in `start..=end` (wrapping) empty. Items stay in place;
    /// they are reclaimed when their slot is next claimed.
    pub fn clear_range(&mut self, start: u16, end: u16) {
        let count = end.wrapping_sub(start) as usize + 1;
        if count >= self.slots.len() {
            for slot in &mut self.slots {
                slot.tag = EMPTY_TAG;
            }
            return;
        }

        for k in 0..count {
            let index = self.index(start.wrapping_add(k as u16));
            self.slots[index].tag = EMPTY_TAG;
        }
    }

    /// All items, live and stale, for teardown.
    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.slots.iter_mut().map(|slot| &mut slot.item)
    }
}
