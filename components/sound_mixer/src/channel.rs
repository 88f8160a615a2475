// components/sound_mixer/src/channel.rs
use std::fmt;
use std::sync::Arc;

use sound_primitives::{Frame, PcmFormat, SoundFlags, SoundId, Volume};

use crate::buffer::StreamBuffer;
use crate::error::{DecodeError, MixerError};
use crate::handle::SoundHandle;
use crate::pcm::{PcmReader, SampleSource};
use crate::rate::RateConverter;
use crate::source::FrameDecoder;

/// Damaged blocks tolerated in a row before a decode channel gives up.
const MAX_CONSECUTIVE_DECODE_ERRORS: u32 = 16;

/// Settings for a channel fed by a [`FrameDecoder`].
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Only `REVERSE_STEREO` applies; the decoder defines the sample layout.
    pub flags: SoundFlags,
    pub id: Option<SoundId>,
    /// Play at the music volume instead of the global one.
    pub music: bool,
    /// Stop after this many source frames even if the decoder has more.
    pub duration: Option<u64>,
}

/// What a channel reports back after each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MixStatus {
    Playing,
    Finished,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Volumes {
    pub global: Volume,
    pub music: Volume,
}

/// One independently playing sound.
pub(crate) struct Channel {
    id: Option<SoundId>,
    music: bool,
    reverse_stereo: bool,
    handle: SoundHandle,
    converter: RateConverter,
    source: ChannelSource,
}

enum ChannelSource {
    Raw(RawSource),
    Stream(StreamSource),
    Decode(DecodeSource),
}

impl Channel {
    pub fn raw(
        data: Arc<[u8]>,
        rate: u32,
        output_rate: u32,
        flags: SoundFlags,
        id: Option<SoundId>,
    ) -> Result<Self, MixerError> {
        Ok(Self {
            id,
            music: false,
            reverse_stereo: flags.contains(SoundFlags::REVERSE_STEREO),
            handle: SoundHandle::none(),
            converter: RateConverter::new(rate, output_rate)?,
            source: ChannelSource::Raw(RawSource {
                data,
                format: flags.format(),
                position: 0,
                looping: flags.contains(SoundFlags::LOOP),
                autofree: flags.contains(SoundFlags::AUTOFREE),
            }),
        })
    }

    /// `max_frames_per_tick` sizes the wrap guard behind the ring.
    pub fn stream(
        initial: &[u8],
        rate: u32,
        output_rate: u32,
        flags: SoundFlags,
        capacity: usize,
        max_frames_per_tick: usize,
    ) -> Result<Self, MixerError> {
        if capacity == 0 || initial.len() > capacity {
            return Err(MixerError::InvalidCapacity {
                capacity,
                initial: initial.len(),
            });
        }

        let converter = RateConverter::new(rate, output_rate)?;
        let format = flags.format();
        let guard = converter.max_input_frames(max_frames_per_tick) * format.bytes_per_frame();
        let mut buffer = StreamBuffer::new(capacity, guard);
        buffer.append(initial)?;

        Ok(Self {
            id: None,
            music: true,
            reverse_stereo: flags.contains(SoundFlags::REVERSE_STEREO),
            handle: SoundHandle::none(),
            converter,
            source: ChannelSource::Stream(StreamSource {
                buffer,
                format,
                finished: false,
            }),
        })
    }

    pub fn decode(
        decoder: Box<dyn FrameDecoder>,
        output_rate: u32,
        options: DecodeOptions,
    ) -> Result<Self, MixerError> {
        let channels = decoder.channels();
        if !(1..=2).contains(&channels) {
            return Err(MixerError::UnsupportedChannels(channels));
        }

        Ok(Self {
            id: options.id,
            music: options.music,
            reverse_stereo: options.flags.contains(SoundFlags::REVERSE_STEREO),
            handle: SoundHandle::none(),
            converter: RateConverter::new(decoder.sample_rate(), output_rate)?,
            source: ChannelSource::Decode(DecodeSource {
                decoder,
                block: Vec::new(),
                position: 0,
                channels: channels as usize,
                remaining: options.duration,
                ended: false,
                errors: 0,
            }),
        })
    }

    pub fn id(&self) -> Option<SoundId> {
        self.id
    }

    pub fn is_music(&self) -> bool {
        self.music
    }

    pub fn handle(&self) -> &SoundHandle {
        &self.handle
    }

    pub fn kind(&self) -> &'static str {
        match self.source {
            ChannelSource::Raw(_) => "raw",
            ChannelSource::Stream(_) => "stream",
            ChannelSource::Decode(_) => "decode",
        }
    }

    /// Size of the clip an `AUTOFREE` raw channel lets go of when dropped.
    ///
    /// Only a channel that made it into a slot owns its clip; one rejected at
    /// insertion leaves the data with the caller.
    fn released_clip_bytes(&self) -> Option<usize> {
        match &self.source {
            ChannelSource::Raw(raw) if raw.autofree && self.handle.is_active() => {
                Some(raw.data.len())
            }
            _ => None,
        }
    }

    /// Producer side of a stream channel.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), MixerError> {
        match &mut self.source {
            ChannelSource::Stream(stream) => stream.buffer.append(bytes),
            _ => Err(MixerError::NotAStream(self.handle.value())),
        }
    }

    /// Let a stream channel end once its buffered audio has played.
    pub fn finish(&mut self) -> Result<(), MixerError> {
        match &mut self.source {
            ChannelSource::Stream(stream) => {
                stream.finished = true;
                Ok(())
            }
            _ => Err(MixerError::NotAStream(self.handle.value())),
        }
    }

    /// Add this channel's next `dest.len() / 2` frames into `dest`.
    pub fn mix(&mut self, dest: &mut [i16], volumes: Volumes) -> Result<MixStatus, DecodeError> {
        let volume = if self.music {
            volumes.music
        } else {
            volumes.global
        };
        let reverse = self.reverse_stereo;
        let converter = &mut self.converter;

        match &mut self.source {
            ChannelSource::Raw(raw) => raw.mix(converter, dest, volume, reverse),
            ChannelSource::Stream(stream) => stream.mix(converter, dest, volume, reverse),
            ChannelSource::Decode(decode) => {
                let flow = converter.flow(decode, dest, volume, reverse)?;
                Ok(if flow.exhausted {
                    MixStatus::Finished
                } else {
                    MixStatus::Playing
                })
            }
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("kind", &self.kind())
            .field("id", &self.id)
            .field("music", &self.music)
            .field("handle", &self.handle)
            .finish()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(bytes) = self.released_clip_bytes() {
            tracing::trace!("Releasing {} byte clip", bytes);
        }
        self.handle.clear();
    }
}

struct RawSource {
    data: Arc<[u8]>,
    format: PcmFormat,
    position: usize,
    looping: bool,
    autofree: bool,
}

impl RawSource {
    fn mix(
        &mut self,
        converter: &mut RateConverter,
        dest: &mut [i16],
        volume: Volume,
        reverse: bool,
    ) -> Result<MixStatus, DecodeError> {
        let mut filled = 0;
        loop {
            let mut reader = PcmReader::new(&self.data[self.position..], self.format);
            let flow = converter.flow(&mut reader, &mut dest[filled * 2..], volume, reverse)?;
            self.position += reader.consumed();
            filled += flow.produced;

            if !flow.exhausted {
                return Ok(MixStatus::Playing);
            }
            if !self.looping || self.data.len() < self.format.bytes_per_frame() {
                return Ok(MixStatus::Finished);
            }
            // Rewind and keep filling so the loop point is seamless.
            self.position = 0;
        }
    }
}

struct StreamSource {
    buffer: StreamBuffer,
    format: PcmFormat,
    finished: bool,
}

impl StreamSource {
    fn mix(
        &mut self,
        converter: &mut RateConverter,
        dest: &mut [i16],
        volume: Volume,
        reverse: bool,
    ) -> Result<MixStatus, DecodeError> {
        let frame_bytes = self.format.bytes_per_frame();

        if self.buffer.unread() < frame_bytes && converter.is_idle() {
            if self.finished {
                return Ok(MixStatus::Finished);
            }
            // A trailing partial frame waits for the rest of its bytes.
            if self.buffer.is_empty() {
                self.buffer.reset();
                converter.reset();
            }
            return Ok(MixStatus::Playing);
        }

        let max_bytes = converter.max_input_frames(dest.len() / 2) * frame_bytes;
        let consumed = {
            let mut reader = PcmReader::new(self.buffer.readable(max_bytes), self.format);
            converter.flow(&mut reader, dest, volume, reverse)?;
            reader.consumed()
        };
        self.buffer.consume(consumed);

        Ok(MixStatus::Playing)
    }
}

struct DecodeSource {
    decoder: Box<dyn FrameDecoder>,
    block: Vec<i16>,
    position: usize,
    channels: usize,
    remaining: Option<u64>,
    ended: bool,
    errors: u32,
}

impl SampleSource for DecodeSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.remaining == Some(0) {
            return Ok(None);
        }

        while self.position + self.channels > self.block.len() {
            if self.ended {
                return Ok(None);
            }
            self.position = 0;
            match self.decoder.decode_next(&mut self.block) {
                Ok(true) => self.errors = 0,
                Ok(false) => {
                    self.ended = true;
                    self.block.clear();
                }
                Err(DecodeError::Recoverable(message)) => {
                    self.errors += 1;
                    self.block.clear();
                    tracing::debug!("Skipping damaged block: {}", message);
                    if self.errors >= MAX_CONSECUTIVE_DECODE_ERRORS {
                        return Err(DecodeError::Fatal(format!(
                            "{} damaged blocks in a row",
                            self.errors
                        )));
                    }
                }
                Err(fatal) => return Err(fatal),
            }
        }

        let samples = &self.block[self.position..self.position + self.channels];
        let frame = if self.channels == 2 {
            Frame::stereo(samples[0], samples[1])
        } else {
            Frame::mono(samples[0])
        };
        self.position += self.channels;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Ok(Some(frame))
    }
}
