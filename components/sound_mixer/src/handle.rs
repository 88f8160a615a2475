use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Caller-side reference to a playing channel.
///
/// The value is the channel's slot index + 1 while it plays, and drops back
/// to `0` as soon as the mixer destroys the channel, whether it ran out of
/// data or was stopped. The mixer keeps a clone only to write that `0`; it
/// never owns the channel through it.
#[derive(Clone, Default)]
pub struct SoundHandle {
    slot: Arc<AtomicU32>,
}

impl SoundHandle {
    /// A handle that refers to no sound.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn value(&self) -> u32 {
        self.slot.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.value() != 0
    }

    pub(crate) fn slot_index(&self) -> Option<usize> {
        match self.value() {
            0 => None,
            value => Some(value as usize - 1),
        }
    }

    pub(crate) fn assign(&self, index: usize) {
        self.slot.store(index as u32 + 1, Ordering::Release);
    }

    pub(crate) fn clear(&self) {
        self.slot.store(0, Ordering::Release);
    }

    /// Whether both handles track the same channel.
    pub(crate) fn same_as(&self, other: &SoundHandle) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl fmt::Debug for SoundHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SoundHandle").field(&self.value()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_inactive() {
        let handle = SoundHandle::none();
        assert_eq!(handle.value(), 0);
        assert!(!handle.is_active());
        assert_eq!(handle.slot_index(), None);
    }

    #[test]
    fn value_is_slot_plus_one() {
        let handle = SoundHandle::none();
        handle.assign(3);
        assert_eq!(handle.value(), 4);
        assert_eq!(handle.slot_index(), Some(3));
    }

    #[test]
    fn clear_is_seen_through_every_clone() {
        let handle = SoundHandle::none();
        let caller_copy = handle.clone();
        handle.assign(0);
        assert!(caller_copy.is_active());

        handle.clear();
        assert!(!caller_copy.is_active());
        assert!(handle.same_as(&caller_copy));
        assert!(!handle.same_as(&SoundHandle::none()));
    }
}
