// in mixer.rs
use crate::channel::{Channel, DecodeOptions, MixStatus, Volumes};
use crate::channels::Channels;
use crate::config::MixerConfig;
use crate::error::MixerError;
use crate::handle::SoundHandle;
use crate::source::FrameDecoder;
use parking_lot::Mutex;
use sound_primitives::{SoundFlags, SoundId, Volume};
use std::sync::Arc;

/// Fills the given slice with mono samples ahead of channel mixing.
pub type PremixHook = Box<dyn FnMut(&mut [i16]) + Send>;

struct MixerState {
    channels: Channels,
    output_rate: Option<u32>,
    volume: Volume,
    music_volume: Volume,
    paused: bool,
    premix: Option<PremixHook>,
}

/// Software mixer shared between control threads and the audio callback.
///
/// Every operation, [`mix`](Self::mix) included, runs under one lock held for
/// the length of that call only.
pub struct Mixer {
    state: Mutex<MixerState>,
    max_frames_per_tick: usize,
}

impl Mixer {
    pub fn new(config: MixerConfig) -> Self {
        tracing::info!(
            "Creating mixer: {} slots, {} frames per tick",
            config.channel_slots,
            config.max_frames_per_tick
        );
        Self {
            state: Mutex::new(MixerState {
                channels: Channels::new(config.channel_slots),
                output_rate: None,
                volume: config.volume,
                music_volume: config.music_volume,
                paused: false,
                premix: None,
            }),
            max_frames_per_tick: config.max_frames_per_tick.max(1),
        }
    }

    /// Fix the output rate. Channels created afterwards convert to it.
    pub fn bind_output(&self, sample_rate: u32) -> Result<(), MixerError> {
        if sample_rate == 0 {
            return Err(MixerError::InvalidSampleRate(sample_rate));
        }
        let mut state = self.state.lock();
        if state.channels.len() > 0 {
            tracing::warn!("Rebinding output with channels still playing");
        }
        state.output_rate = Some(sample_rate);
        tracing::info!("Mixer bound to {}Hz output", sample_rate);
        Ok(())
    }

    pub fn output_rate(&self) -> Option<u32> {
        self.state.lock().output_rate
    }

    /// Play a PCM clip held in memory.
    pub fn play_raw(
        &self,
        data: impl Into<Arc<[u8]>>,
        sample_rate: u32,
        flags: SoundFlags,
        id: Option<SoundId>,
    ) -> Result<SoundHandle, MixerError> {
        let output_rate = self.state.lock().admit(id)?;
        let channel = Channel::raw(data.into(), sample_rate, output_rate, flags, id)?;
        self.insert_built(channel, id, output_rate)
    }

    /// Open a stream channel fed later through [`append_stream`](Self::append_stream).
    pub fn create_stream(
        &self,
        initial: &[u8],
        sample_rate: u32,
        flags: SoundFlags,
        capacity: usize,
    ) -> Result<SoundHandle, MixerError> {
        let output_rate = self.state.lock().admit(None)?;
        let channel = Channel::stream(
            initial,
            sample_rate,
            output_rate,
            flags,
            capacity,
            self.max_frames_per_tick,
        )?;
        self.insert_built(channel, None, output_rate)
    }

    pub fn play_decoder(
        &self,
        decoder: Box<dyn FrameDecoder>,
        options: DecodeOptions,
    ) -> Result<SoundHandle, MixerError> {
        let id = options.id;
        let output_rate = self.state.lock().admit(id)?;
        let channel = Channel::decode(decoder, output_rate, options)?;
        self.insert_built(channel, id, output_rate)
    }

    /// Admission is checked again: the lock was released while the channel was built.
    fn insert_built(
        &self,
        channel: Channel,
        id: Option<SoundId>,
        built_for: u32,
    ) -> Result<SoundHandle, MixerError> {
        let mut state = self.state.lock();
        let output_rate = state.admit(id)?;
        if output_rate != built_for {
            tracing::warn!(
                "Output rebound to {}Hz while a {}Hz channel was being built",
                output_rate,
                built_for
            );
        }
        state.channels.insert(channel)
    }

    /// Queue more bytes on a stream. A chunk that does not fit is dropped whole.
    pub fn append_stream(&self, handle: &SoundHandle, bytes: &[u8]) -> Result<(), MixerError> {
        let mut state = self.state.lock();
        let channel = state.live_channel(handle)?;
        if let Err(e) = channel.append(bytes) {
            tracing::warn!("Dropping append: {}", e);
            return Err(e);
        }
        Ok(())
    }

    /// No more data will follow; the stream ends once its buffer drains.
    pub fn end_stream(&self, handle: &SoundHandle) -> Result<(), MixerError> {
        let mut state = self.state.lock();
        let channel = state.live_channel(handle)?;
        if let Err(e) = channel.finish() {
            tracing::warn!("{}", e);
            return Err(e);
        }
        tracing::debug!("Stream {} finished by producer", handle.value());
        Ok(())
    }

    pub fn stop_slot(&self, index: usize) {
        self.state.lock().channels.remove_slot(index);
    }

    pub fn stop_handle(&self, handle: &SoundHandle) {
        self.state.lock().channels.remove_handle(handle);
    }

    pub fn stop_id(&self, id: SoundId) {
        self.state.lock().channels.remove_id(id);
    }

    pub fn stop_all(&self) {
        let mut state = self.state.lock();
        tracing::debug!("Stopping {} channels", state.channels.len());
        state.channels.clear();
    }

    /// Clamped to 0..=256.
    pub fn set_volume(&self, level: i32) {
        let volume = Volume::clamped(level);
        self.state.lock().volume = volume;
        tracing::debug!("Volume set to {}", volume.level());
    }

    /// Clamped to 0..=256.
    pub fn set_music_volume(&self, level: i32) {
        let volume = Volume::clamped(level);
        self.state.lock().music_volume = volume;
        tracing::debug!("Music volume set to {}", volume.level());
    }

    pub fn volume(&self) -> Volume {
        self.state.lock().volume
    }

    pub fn music_volume(&self) -> Volume {
        self.state.lock().music_volume
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
        tracing::debug!("Mixer {}", if paused { "paused" } else { "resumed" });
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// True while any sound effect (a non-music channel) is playing.
    pub fn has_active_non_music_channel(&self) -> bool {
        self.state.lock().channels.has_non_music()
    }

    pub fn active_channels(&self) -> usize {
        self.state.lock().channels.len()
    }

    pub fn set_premix(&self, hook: Option<PremixHook>) {
        self.state.lock().premix = hook;
    }

    /// Stop every channel and drop the pre-mix hook.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        tracing::info!("Shutting down mixer with {} channels", state.channels.len());
        state.channels.clear();
        state.premix = None;
    }

    /// Render `out.len() / 2` interleaved stereo frames.
    pub fn mix(&self, out: &mut [i16]) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let frames = out.len() / 2;

        match state.premix.as_mut() {
            Some(hook) if !state.paused => {
                out[frames * 2..].fill(0);
                hook(&mut out[..frames]);
                for i in (0..frames).rev() {
                    let sample = out[i];
                    out[i * 2] = sample;
                    out[i * 2 + 1] = sample;
                }
            }
            _ => out.fill(0),
        }

        if state.paused {
            return;
        }

        let volumes = Volumes {
            global: state.volume,
            music: state.music_volume,
        };
        for block in out[..frames * 2].chunks_mut(self.max_frames_per_tick * 2) {
            for index in 0..state.channels.capacity() {
                let Some(channel) = state.channels.get_mut(index) else {
                    continue;
                };
                match channel.mix(block, volumes) {
                    Ok(MixStatus::Playing) => {}
                    Ok(MixStatus::Finished) => {
                        if let Some(channel) = state.channels.take(index) {
                            tracing::debug!("{} channel in slot {} finished", channel.kind(), index);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Dropping channel in slot {}: {}", index, e);
                        state.channels.take(index);
                    }
                }
            }
        }
    }
}

impl MixerState {
    /// Checks shared by every create call. Returns the bound output rate.
    fn admit(&self, id: Option<SoundId>) -> Result<u32, MixerError> {
        if let Some(id) = id {
            if self.channels.contains_id(id) {
                tracing::debug!("Sound {} is already playing", id);
                return Err(MixerError::DuplicateSuppressed(id));
            }
        }
        self.output_rate.ok_or(MixerError::NotBound)
    }

    fn live_channel(&mut self, handle: &SoundHandle) -> Result<&mut Channel, MixerError> {
        let value = handle.value();
        self.channels.find_mut(handle).ok_or_else(|| {
            tracing::warn!("Handle {} does not refer to a live channel", value);
            MixerError::InvalidHandle(value)
        })
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
