use crate::error::DecodeError;
use sound_primitives::{Frame, PcmFormat};

/// Adds `delta` to `sample`, saturating at the i16 rails instead of wrapping.
#[inline]
pub fn clamped_add(sample: i16, delta: i32) -> i16 {
    let value = sample as i32 + delta;
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Anything that yields stereo frames at its own native rate.
pub trait SampleSource {
    /// Next frame, or `Ok(None)` when no more data is available right now.
    fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError>;
}

/// Reads whole frames out of a borrowed byte span.
pub struct PcmReader<'a> {
    bytes: &'a [u8],
    format: PcmFormat,
    frame_bytes: usize,
    position: usize,
}

impl<'a> PcmReader<'a> {
    pub fn new(bytes: &'a [u8], format: PcmFormat) -> Self {
        Self {
            bytes,
            format,
            frame_bytes: format.bytes_per_frame(),
            position: 0,
        }
    }

    /// Bytes consumed so far; always a whole number of frames.
    pub fn consumed(&self) -> usize {
        self.position
    }
}

impl SampleSource for PcmReader<'_> {
    #[inline]
    fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        let end = self.position + self.frame_bytes;
        if end > self.bytes.len() {
            return Ok(None);
        }
        let frame = self.format.decode_frame(&self.bytes[self.position..end]);
        self.position = end;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use sound_primitives::SoundFlags;

    #[rstest]
    #[case(0, 0, 0)]
    #[case(100, 200, 300)]
    #[case(32767, 0, 32767)]
    #[case(32000, 1000, 32767)]
    #[case(-32000, -1000, -32768)]
    #[case(-32768, 65535, 32767)]
    #[case(32767, -65535, -32768)]
    fn clamped_add_saturates(#[case] sample: i16, #[case] delta: i32, #[case] expected: i16) {
        assert_eq!(clamped_add(sample, delta), expected);
    }

    #[test]
    fn clamped_add_is_exact_in_range() {
        for sample in (i16::MIN..=i16::MAX).step_by(997) {
            for delta in (-70_000i32..=70_000).step_by(1_231) {
                let sum = sample as i32 + delta;
                let result = clamped_add(sample, delta) as i32;
                assert!((-32768..=32767).contains(&result));
                if (-32768..=32767).contains(&sum) {
                    assert_eq!(result, sum);
                }
            }
        }
    }

    #[test]
    fn reader_stops_before_partial_frame() {
        let bytes = [0x00, 0x01, 0x00, 0x02, 0x00];
        let mut reader = PcmReader::new(&bytes, SoundFlags::BITS_16.format());
        assert_eq!(reader.next_frame().unwrap(), Some(Frame::mono(1)));
        assert_eq!(reader.next_frame().unwrap(), Some(Frame::mono(2)));
        assert_eq!(reader.next_frame().unwrap(), None);
        assert_eq!(reader.consumed(), 4);
    }
}
