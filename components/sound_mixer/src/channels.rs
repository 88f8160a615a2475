use crate::channel::Channel;
use crate::error::MixerError;
use crate::handle::SoundHandle;
use sound_primitives::SoundId;

/// Fixed table of channel slots. Empty slots are `None`.
pub(crate) struct Channels {
    slots: Vec<Option<Channel>>,
}

impl Channels {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Place `channel` in the lowest free slot and point its handle there.
    pub fn insert(&mut self, channel: Channel) -> Result<SoundHandle, MixerError> {
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            tracing::warn!("No free channel slot for {} channel", channel.kind());
            return Err(MixerError::ResourceExhausted {
                capacity: self.capacity(),
            });
        };

        channel.handle().assign(index);
        let handle = channel.handle().clone();
        tracing::debug!("Started {} channel in slot {}", channel.kind(), index);
        self.slots[index] = Some(channel);
        Ok(handle)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Channel> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// The live channel `handle` refers to, if it still plays.
    pub fn find_mut(&mut self, handle: &SoundHandle) -> Option<&mut Channel> {
        let index = handle.slot_index()?;
        self.get_mut(index)
            .filter(|channel| channel.handle().same_as(handle))
    }

    /// Empty slot `index`, handing back whatever played there.
    pub fn take(&mut self, index: usize) -> Option<Channel> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    pub fn remove_slot(&mut self, index: usize) -> bool {
        match self.take(index) {
            Some(channel) => {
                tracing::debug!("Stopped {} channel in slot {}", channel.kind(), index);
                true
            }
            None => {
                tracing::warn!("No channel playing in slot {}", index);
                false
            }
        }
    }

    pub fn remove_handle(&mut self, handle: &SoundHandle) -> bool {
        if !handle.is_active() {
            return false;
        }
        let live = self.find_mut(handle).is_some();
        match handle.slot_index() {
            Some(index) if live => self.remove_slot(index),
            _ => {
                tracing::warn!("Handle {} does not refer to a live channel", handle.value());
                false
            }
        }
    }

    /// Remove every channel tagged with `id`. Returns how many were stopped.
    pub fn remove_id(&mut self, id: SoundId) -> usize {
        let mut removed = 0;
        for slot in self.slots.iter_mut() {
            if slot.as_ref().and_then(Channel::id) == Some(id) {
                *slot = None;
                removed += 1;
            }
        }
        if removed == 0 {
            tracing::warn!("No channel playing sound {}", id);
        }
        removed
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }

    pub fn contains_id(&self, id: SoundId) -> bool {
        self.iter().any(|channel| channel.id() == Some(id))
    }

    pub fn has_non_music(&self) -> bool {
        self.iter().any(|channel| !channel.is_music())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.slots.iter().flatten()
    }
}
