use crate::error::{DecodeError, MixerError};
use std::fmt;
use std::path::Path;
use symphonia::core::{
    audio::{SampleBuffer, SignalSpec},
    codecs::{Decoder, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::{MediaSource, MediaSourceStream},
    meta::MetadataOptions,
    probe::Hint,
};

/// External bitstream decoder feeding a decode channel.
///
/// Implementations produce interleaved 16-bit blocks at their native rate;
/// the mixer takes care of rate conversion and volume.
pub trait FrameDecoder: Send {
    fn sample_rate(&self) -> u32;

    /// 1 (mono) or 2 (stereo).
    fn channels(&self) -> u16;

    /// Replace the contents of `out` with the next decoded block.
    ///
    /// Returns `Ok(false)` once the stream has ended.
    fn decode_next(&mut self, out: &mut Vec<i16>) -> Result<bool, DecodeError>;
}

/// [`FrameDecoder`] over anything symphonia can probe.
pub struct SymphoniaDecoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    // Reused across packets; replaced only when a packet outgrows it.
    sample_buffer: Option<(SampleBuffer<i16>, SignalSpec, usize)>,
}

impl SymphoniaDecoder {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MixerError> {
        let path = path.as_ref();
        tracing::debug!("Opening file: {:?}", path);

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let file = std::fs::File::open(path)?;
        Self::from_media_source(Box::new(file), hint)
    }

    /// Decode from an in-memory file image.
    pub fn from_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<Self, MixerError> {
        let mut hint = Hint::new();
        if let Some(extension) = extension {
            hint.with_extension(extension);
        }
        Self::from_media_source(Box::new(std::io::Cursor::new(bytes)), hint)
    }

    fn from_media_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<Self, MixerError> {
        let mss = MediaSourceStream::new(source, Default::default());

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::Fatal(e.to_string()))?;

        let track = probed
            .format
            .default_track()
            .ok_or_else(|| DecodeError::Fatal("No default track found".into()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let channels = codec_params.channels.map(|c| c.count()).unwrap_or(2) as u16;
        if !(1..=2).contains(&channels) {
            return Err(MixerError::UnsupportedChannels(channels));
        }
        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| DecodeError::Fatal("Track has no sample rate".into()))?;

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Fatal(e.to_string()))?;

        Ok(Self {
            format_reader: probed.format,
            decoder,
            track_id,
            sample_rate,
            channels,
            sample_buffer: None,
        })
    }
}

fn is_end_of_stream(error: &SymphoniaError) -> bool {
    matches!(error, SymphoniaError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}

impl FrameDecoder for SymphoniaDecoder {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn decode_next(&mut self, out: &mut Vec<i16>) -> Result<bool, DecodeError> {
        out.clear();

        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(e) if is_end_of_stream(&e) => return Ok(false),
                Err(e) => return Err(DecodeError::Fatal(e.to_string())),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(message)) => {
                    return Err(DecodeError::Recoverable(message.to_string()))
                }
                Err(e) if is_end_of_stream(&e) => return Ok(false),
                Err(e) => return Err(DecodeError::Fatal(e.to_string())),
            };

            let spec = *decoded.spec();
            let frames = decoded.capacity();
            let reusable = matches!(
                &self.sample_buffer,
                Some((_, buffered_spec, buffered_frames))
                    if *buffered_spec == spec && *buffered_frames >= frames
            );
            if !reusable {
                self.sample_buffer = Some((SampleBuffer::new(frames as u64, spec), spec, frames));
            }

            if let Some((buffer, _, _)) = self.sample_buffer.as_mut() {
                buffer.copy_interleaved_ref(decoded);
                out.extend_from_slice(buffer.samples());
            }
            return Ok(true);
        }
    }
}

impl fmt::Debug for SymphoniaDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymphoniaDecoder")
            .field("track_id", &self.track_id)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}

impl Drop for SymphoniaDecoder {
    fn drop(&mut self) {
        tracing::trace!("SymphoniaDecoder dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn wav_bytes(channels: u16, sample_rate: u32, samples: &[i16]) -> Vec<u8> {
        let mut bytes = Vec::new();
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(std::io::Cursor::new(&mut bytes), spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
        bytes
    }

    fn decode_all(decoder: &mut dyn FrameDecoder) -> Vec<i16> {
        let mut all = Vec::new();
        let mut block = Vec::new();
        while decoder.decode_next(&mut block).unwrap() {
            all.extend_from_slice(&block);
        }
        all
    }

    #[test]
    fn reads_stream_parameters() {
        let bytes = wav_bytes(2, 22050, &[0; 64]);
        let decoder = SymphoniaDecoder::from_bytes(bytes, Some("wav")).unwrap();
        assert_eq!(decoder.sample_rate(), 22050);
        assert_eq!(decoder.channels(), 2);
    }

    #[test]
    fn decodes_every_sample_in_order() {
        let samples: Vec<i16> = (0..5000).map(|i| ((i * 37) % 30000 - 15000) as i16).collect();
        let bytes = wav_bytes(1, 11025, &samples);
        let mut decoder = SymphoniaDecoder::from_bytes(bytes, Some("wav")).unwrap();

        assert_eq!(decode_all(&mut decoder), samples);
    }

    #[test]
    fn debug_output_names_stream_parameters() {
        let bytes = wav_bytes(1, 16000, &[0; 8]);
        let decoder = SymphoniaDecoder::from_bytes(bytes, Some("wav")).unwrap();
        let shown = format!("{:?}", decoder);
        assert!(shown.contains("sample_rate: 16000"));
        assert!(shown.contains("channels: 1"));
    }

    #[test]
    fn keeps_reporting_end_of_stream() {
        let bytes = wav_bytes(1, 8000, &[1, 2, 3]);
        let mut decoder = SymphoniaDecoder::from_bytes(bytes, Some("wav")).unwrap();
        decode_all(&mut decoder);

        let mut block = vec![99];
        assert_eq!(decoder.decode_next(&mut block), Ok(false));
        assert!(block.is_empty());
    }

    #[test]
    fn rejects_unrecognised_data() {
        let garbage = vec![0x42; 512];
        assert_matches!(
            SymphoniaDecoder::from_bytes(garbage, None),
            Err(MixerError::Decode(DecodeError::Fatal(_)))
        );
    }

    #[test]
    fn open_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            SymphoniaDecoder::open(dir.path().join("missing.flac")),
            Err(MixerError::Io(_))
        );
    }

    #[test]
    fn open_reads_files_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        std::fs::write(&path, wav_bytes(1, 8000, &[5, 6, 7, 8])).unwrap();

        let mut decoder = SymphoniaDecoder::open(&path).unwrap();
        assert_eq!(decode_all(&mut decoder), vec![5, 6, 7, 8]);
    }
}
