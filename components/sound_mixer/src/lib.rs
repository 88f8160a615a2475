mod audio;
mod buffer;
mod channel;
mod channels;
mod config;
mod error;
mod handle;
mod mixer;
mod pcm;
mod rate;
mod source;

pub use audio::AudioOutput;
pub use channel::DecodeOptions;
pub use config::{MixerConfig, OutputConfig};
pub use error::{DecodeError, MixerError};
pub use handle::SoundHandle;
pub use mixer::{Mixer, PremixHook};
pub use pcm::clamped_add;
pub use source::{FrameDecoder, SymphoniaDecoder};
pub use sound_primitives::{SoundFlags, SoundId, Volume};
