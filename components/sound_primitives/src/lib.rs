use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrimitiveError {
    #[error("Volume {0} is out of range (0..=256)")]
    VolumeOutOfRange(u16),
}

/// Linear gain on the 0..=256 scale, where 256 is unity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Volume(u16);

impl Volume {
    const MAX: u16 = 256;

    pub const SILENT: Self = Self(0);
    pub const UNITY: Self = Self(Self::MAX);

    pub fn new(level: u16) -> Result<Self, PrimitiveError> {
        if level <= Self::MAX {
            Ok(Self(level))
        } else {
            Err(PrimitiveError::VolumeOutOfRange(level))
        }
    }

    /// Saturates any integer into the valid range instead of failing.
    pub fn clamped(level: i32) -> Self {
        Self(level.clamp(0, Self::MAX as i32) as u16)
    }

    pub fn level(self) -> u16 {
        self.0
    }

    /// Scales a sample by this volume. The result may exceed the i16 range
    /// only when the input already sits at the rails.
    #[inline]
    pub fn apply(self, sample: i16) -> i32 {
        (sample as i32 * self.0 as i32) / Self::MAX as i32
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::UNITY
    }
}

impl TryFrom<u16> for Volume {
    type Error = PrimitiveError;

    fn try_from(level: u16) -> Result<Self, Self::Error> {
        Self::new(level)
    }
}

impl From<Volume> for u16 {
    fn from(volume: Volume) -> Self {
        volume.0
    }
}

/// Caller-chosen tag used to keep two copies of the same effect from
/// playing at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SoundId(pub i32);

impl fmt::Display for SoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// Flags recognised when creating a channel.
    ///
    /// The absence of `UNSIGNED`, `STEREO` and `BITS_16` selects signed,
    /// mono and 8-bit samples respectively.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SoundFlags: u8 {
        const UNSIGNED = 1 << 0;
        const STEREO = 1 << 1;
        const BITS_16 = 1 << 2;
        /// The mixer drops its share of a raw clip when the channel ends.
        /// Memory is returned once the caller's copies are gone too.
        const AUTOFREE = 1 << 3;
        const REVERSE_STEREO = 1 << 4;
        const LOOP = 1 << 5;
        /// 16-bit samples are big-endian unless this is set.
        const LITTLE_ENDIAN = 1 << 6;
    }
}

impl SoundFlags {
    pub fn format(self) -> PcmFormat {
        PcmFormat {
            bits_16: self.contains(Self::BITS_16),
            stereo: self.contains(Self::STEREO),
            unsigned: self.contains(Self::UNSIGNED),
            little_endian: self.contains(Self::LITTLE_ENDIAN),
        }
    }
}

/// One output frame: a left/right sample pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Frame {
    pub left: i16,
    pub right: i16,
}

impl Frame {
    pub fn mono(sample: i16) -> Self {
        Self {
            left: sample,
            right: sample,
        }
    }

    pub fn stereo(left: i16, right: i16) -> Self {
        Self { left, right }
    }

    pub fn swapped(self) -> Self {
        Self {
            left: self.right,
            right: self.left,
        }
    }

    /// Linear interpolation towards `next`; `frac` is a 16.16 fraction in
    /// `0..0x10000`.
    #[inline]
    pub fn lerp(self, next: Frame, frac: u32) -> Frame {
        #[inline]
        fn mix(a: i16, b: i16, frac: u32) -> i16 {
            let delta = (b as i64 - a as i64) * frac as i64;
            (a as i64 + (delta >> 16)) as i16
        }
        Frame {
            left: mix(self.left, next.left, frac),
            right: mix(self.right, next.right, frac),
        }
    }
}

/// Byte layout of a PCM source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PcmFormat {
    pub bits_16: bool,
    pub stereo: bool,
    pub unsigned: bool,
    pub little_endian: bool,
}

impl PcmFormat {
    pub fn bytes_per_sample(&self) -> usize {
        if self.bits_16 {
            2
        } else {
            1
        }
    }

    pub fn channels(&self) -> usize {
        if self.stereo {
            2
        } else {
            1
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels()
    }

    /// Decodes one frame from the start of `bytes`, which must hold at
    /// least `bytes_per_frame()` bytes. 8-bit samples are widened to 16 bits.
    #[inline]
    pub fn decode_frame(&self, bytes: &[u8]) -> Frame {
        let width = self.bytes_per_sample();
        let left = self.decode_sample(&bytes[..width]);
        if self.stereo {
            Frame::stereo(left, self.decode_sample(&bytes[width..2 * width]))
        } else {
            Frame::mono(left)
        }
    }

    #[inline]
    fn decode_sample(&self, bytes: &[u8]) -> i16 {
        if self.bits_16 {
            let raw = if self.little_endian {
                u16::from_le_bytes([bytes[0], bytes[1]])
            } else {
                u16::from_be_bytes([bytes[0], bytes[1]])
            };
            if self.unsigned {
                (raw ^ 0x8000) as i16
            } else {
                raw as i16
            }
        } else {
            let raw = if self.unsigned {
                bytes[0] ^ 0x80
            } else {
                bytes[0]
            };
            ((raw as i8) as i16) << 8
        }
    }
}
