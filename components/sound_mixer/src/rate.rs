//! Sample-rate conversion into the mixer's stereo output.
//!
//! The converter walks the source with a 16.16 fixed-point accumulator that
//! advances by `input_rate / output_rate` per output frame and interpolates
//! linearly between the current source frame and the next one. Volume is
//! applied and the result is added into the destination in the same pass.

use crate::error::{DecodeError, MixerError};
use crate::pcm::{clamped_add, SampleSource};
use sound_primitives::{Frame, Volume};

const FRAC_BITS: u32 = 16;
const FRAC_ONE: u64 = 1 << FRAC_BITS;

/// Outcome of a single [`RateConverter::flow`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow {
    /// Output frames written, never more than requested.
    pub produced: usize,
    /// The source ran dry before the request was satisfied.
    pub exhausted: bool,
}

#[derive(Debug)]
pub struct RateConverter {
    step: u64,
    frac: u64,
    current: Option<Frame>,
    next: Option<Frame>,
}

impl RateConverter {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self, MixerError> {
        if input_rate == 0 {
            return Err(MixerError::InvalidSampleRate(input_rate));
        }
        if output_rate == 0 {
            return Err(MixerError::InvalidSampleRate(output_rate));
        }
        Ok(Self {
            step: ((input_rate as u64) << FRAC_BITS) / output_rate as u64,
            frac: 0,
            current: None,
            next: None,
        })
    }

    /// Upper bound on source frames a flow of `output_frames` can pull.
    pub fn max_input_frames(&self, output_frames: usize) -> usize {
        ((output_frames as u64 * self.step) >> FRAC_BITS) as usize + 3
    }

    /// True when no source frames are held between calls.
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.next.is_none()
    }

    pub fn reset(&mut self) {
        self.frac = 0;
        self.current = None;
        self.next = None;
    }

    /// Mixes up to `dest.len() / 2` frames from `source` into `dest`.
    pub fn flow<S: SampleSource>(
        &mut self,
        source: &mut S,
        dest: &mut [i16],
        volume: Volume,
        reverse_stereo: bool,
    ) -> Result<Flow, DecodeError> {
        let frames = dest.len() / 2;
        let mut produced = 0;

        while produced < frames {
            let current = match self.current {
                Some(frame) => frame,
                None => match source.next_frame()? {
                    Some(frame) => {
                        self.current = Some(frame);
                        frame
                    }
                    None => {
                        return Ok(Flow {
                            produced,
                            exhausted: true,
                        })
                    }
                },
            };

            let mut frame = if self.frac == 0 {
                current
            } else {
                if self.next.is_none() {
                    self.next = source.next_frame()?;
                }
                // Hold the current frame until the next one shows up.
                match self.next {
                    Some(next) => current.lerp(next, self.frac as u32),
                    None => current,
                }
            };
            if reverse_stereo {
                frame = frame.swapped();
            }

            let out = &mut dest[produced * 2..produced * 2 + 2];
            out[0] = clamped_add(out[0], volume.apply(frame.left));
            out[1] = clamped_add(out[1], volume.apply(frame.right));
            produced += 1;

            self.frac += self.step;
            while self.frac >= FRAC_ONE {
                self.frac -= FRAC_ONE;
                self.current = match self.next.take() {
                    Some(next) => Some(next),
                    None => source.next_frame()?,
                };
                if self.current.is_none() {
                    self.frac = 0;
                    break;
                }
            }
        }

        Ok(Flow {
            produced,
            exhausted: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    struct VecSource {
        frames: Vec<Frame>,
        position: usize,
    }

    impl VecSource {
        fn mono(samples: &[i16]) -> Self {
            Self {
                frames: samples.iter().copied().map(Frame::mono).collect(),
                position: 0,
            }
        }

        fn stereo(pairs: &[(i16, i16)]) -> Self {
            Self {
                frames: pairs.iter().map(|&(l, r)| Frame::stereo(l, r)).collect(),
                position: 0,
            }
        }
    }

    impl SampleSource for VecSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
            let frame = self.frames.get(self.position).copied();
            if frame.is_some() {
                self.position += 1;
            }
            Ok(frame)
        }
    }

    struct BrokenSource;

    impl SampleSource for BrokenSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
            Err(DecodeError::Fatal("bad header".into()))
        }
    }

    fn left_channel(dest: &[i16]) -> Vec<i16> {
        dest.chunks(2).map(|pair| pair[0]).collect()
    }

    #[test]
    fn equal_rates_pass_through_and_duplicate_mono() {
        let mut converter = RateConverter::new(22050, 22050).unwrap();
        let mut source = VecSource::mono(&[100, 200, 300, 400]);

        let mut dest = [0i16; 4];
        let flow = converter
            .flow(&mut source, &mut dest, Volume::UNITY, false)
            .unwrap();
        assert_eq!(flow, Flow { produced: 2, exhausted: false });
        assert_eq!(dest, [100, 100, 200, 200]);

        let mut dest = [0i16; 4];
        converter
            .flow(&mut source, &mut dest, Volume::UNITY, false)
            .unwrap();
        assert_eq!(dest, [300, 300, 400, 400]);

        let mut dest = [0i16; 4];
        let flow = converter
            .flow(&mut source, &mut dest, Volume::UNITY, false)
            .unwrap();
        assert_eq!(flow, Flow { produced: 0, exhausted: true });
        assert_eq!(dest, [0; 4]);
    }

    #[test]
    fn upsampling_interpolates_between_frames() {
        let mut converter = RateConverter::new(11025, 22050).unwrap();
        let mut source = VecSource::mono(&[0, 100, 200]);
        let mut dest = [0i16; 16];

        let flow = converter
            .flow(&mut source, &mut dest, Volume::UNITY, false)
            .unwrap();

        assert_eq!(flow, Flow { produced: 6, exhausted: true });
        assert_eq!(left_channel(&dest)[..6], [0, 50, 100, 150, 200, 200]);
    }

    #[test]
    fn downsampling_skips_frames() {
        let mut converter = RateConverter::new(44100, 22050).unwrap();
        let mut source = VecSource::mono(&[0, 10, 20, 30, 40, 50]);
        let mut dest = [0i16; 8];

        let flow = converter
            .flow(&mut source, &mut dest, Volume::UNITY, false)
            .unwrap();

        assert_eq!(flow, Flow { produced: 3, exhausted: true });
        assert_eq!(left_channel(&dest)[..3], [0, 20, 40]);
    }

    #[test]
    fn never_writes_past_the_request() {
        let mut converter = RateConverter::new(8000, 8000).unwrap();
        let mut source = VecSource::mono(&[7; 32]);
        let mut buffer = [0i16; 8];

        let flow = converter
            .flow(&mut source, &mut buffer[..4], Volume::UNITY, false)
            .unwrap();

        assert_eq!(flow.produced, 2);
        assert_eq!(buffer, [7, 7, 7, 7, 0, 0, 0, 0]);
    }

    #[test]
    fn applies_volume_and_saturates_on_top_of_existing_mix() {
        let mut converter = RateConverter::new(8000, 8000).unwrap();
        let mut source = VecSource::mono(&[2000, 2000]);
        let mut dest = [32000i16, 32000, 0, 0];

        converter
            .flow(&mut source, &mut dest, Volume::new(128).unwrap(), false)
            .unwrap();

        assert_eq!(dest, [32767, 32767, 1000, 1000]);
    }

    #[test]
    fn reverse_stereo_swaps_sides() {
        let mut converter = RateConverter::new(8000, 8000).unwrap();
        let mut source = VecSource::stereo(&[(1, 2), (3, 4)]);
        let mut dest = [0i16; 4];

        converter
            .flow(&mut source, &mut dest, Volume::UNITY, true)
            .unwrap();

        assert_eq!(dest, [2, 1, 4, 3]);
    }

    #[test]
    fn hard_errors_propagate() {
        let mut converter = RateConverter::new(8000, 8000).unwrap();
        let mut dest = [0i16; 4];
        assert_matches!(
            converter.flow(&mut BrokenSource, &mut dest, Volume::UNITY, false),
            Err(DecodeError::Fatal(_))
        );
    }

    #[test]
    fn rejects_zero_rates() {
        assert_matches!(
            RateConverter::new(0, 44100),
            Err(MixerError::InvalidSampleRate(0))
        );
        assert_matches!(
            RateConverter::new(44100, 0),
            Err(MixerError::InvalidSampleRate(0))
        );
    }

    #[rstest]
    #[case(8000, 48000)]
    #[case(11025, 22050)]
    #[case(22050, 22050)]
    #[case(44100, 22050)]
    #[case(48000, 8000)]
    #[case(44100, 48000)]
    fn input_bound_covers_every_tick(#[case] input_rate: u32, #[case] output_rate: u32) {
        let mut converter = RateConverter::new(input_rate, output_rate).unwrap();
        let mut source = VecSource::mono(&[1; 50_000]);
        for frames in [1usize, 7, 64, 333] {
            let before = source.position;
            let mut dest = vec![0i16; frames * 2];
            converter
                .flow(&mut source, &mut dest, Volume::UNITY, false)
                .unwrap();
            assert!(source.position - before <= converter.max_input_frames(frames));
        }
    }
}
