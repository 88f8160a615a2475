use sound_primitives::SoundId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MixerError {
    #[error("Out of mixer slots (all {capacity} in use)")]
    ResourceExhausted { capacity: usize },

    #[error("Sound {0} is already playing")]
    DuplicateSuppressed(SoundId),

    #[error("Handle {0} does not refer to a live channel")]
    InvalidHandle(u32),

    #[error("Handle {0} does not refer to a stream channel")]
    NotAStream(u32),

    #[error("Stream buffer full: {requested} bytes requested, {free} bytes free")]
    BufferOverflowRejected { requested: usize, free: usize },

    #[error("Invalid stream capacity {capacity} for {initial} bytes of initial data")]
    InvalidCapacity { capacity: usize, initial: usize },

    #[error("Invalid sample rate: {0}Hz")]
    InvalidSampleRate(u32),

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u16),

    #[error("Mixer is not bound to an output")]
    NotBound,

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Config error: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by a frame decoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A damaged block; decoding can skip it and resynchronise.
    #[error("Recoverable decode error: {0}")]
    Recoverable(String),

    /// The source cannot produce any more audio.
    #[error("Unrecoverable decode error: {0}")]
    Fatal(String),
}
