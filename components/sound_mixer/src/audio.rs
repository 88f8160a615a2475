use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::sync::Arc;

use crate::config::OutputConfig;
use crate::error::MixerError;
use crate::mixer::Mixer;

const CHANNELS: u16 = 2; // Stereo
const SCRATCH_FRAMES: usize = 4096;

/// Live connection between a [`Mixer`] and the default output device.
///
/// Playback stops when this is dropped.
pub struct AudioOutput {
    _stream: Stream,
    _device: Device,
    sample_rate: u32,
}

impl AudioOutput {
    pub fn open(mixer: Arc<Mixer>, output: &OutputConfig) -> Result<Self, MixerError> {
        let (device, config, sample_format) = Self::initialize_audio_device(output)?;
        mixer.bind_output(config.sample_rate.0)?;

        let stream = match sample_format {
            SampleFormat::I16 => Self::create_i16_stream(&device, &config, mixer)?,
            SampleFormat::F32 => Self::create_f32_stream(&device, &config, mixer)?,
            other => {
                return Err(MixerError::AudioDevice(format!(
                    "Unsupported device sample format: {:?}",
                    other
                )))
            }
        };
        stream.play().map_err(device_error)?;

        Ok(Self {
            sample_rate: config.sample_rate.0,
            _stream: stream,
            _device: device,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn initialize_audio_device(
        output: &OutputConfig,
    ) -> Result<(Device, StreamConfig, SampleFormat), MixerError> {
        let host = cpal::default_host();
        tracing::info!("Audio host: {}", host.id().name());

        let device = host
            .default_output_device()
            .ok_or_else(|| MixerError::AudioDevice("No output device found".into()))?;
        tracing::info!("Output device: {}", device.name().unwrap_or_default());

        let supported = device.default_output_config().map_err(device_error)?;
        let sample_rate = output.sample_rate.unwrap_or(supported.sample_rate().0);
        let buffer_size = match output.buffer_frames {
            Some(frames) => cpal::BufferSize::Fixed(frames),
            None => cpal::BufferSize::Default,
        };

        let config = StreamConfig {
            channels: CHANNELS,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size,
        };
        tracing::info!(
            "Audio config: {}Hz, {} channels, {:?} samples, buffer: {:?}",
            sample_rate,
            CHANNELS,
            supported.sample_format(),
            output.buffer_frames
        );

        Ok((device, config, supported.sample_format()))
    }

    fn create_i16_stream(
        device: &Device,
        config: &StreamConfig,
        mixer: Arc<Mixer>,
    ) -> Result<Stream, MixerError> {
        device
            .build_output_stream(
                config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| mixer.mix(data),
                |err| tracing::error!("Audio stream error: {}", err),
                None,
            )
            .map_err(device_error)
    }

    fn create_f32_stream(
        device: &Device,
        config: &StreamConfig,
        mixer: Arc<Mixer>,
    ) -> Result<Stream, MixerError> {
        let mut scratch = vec![0i16; SCRATCH_FRAMES * CHANNELS as usize];
        device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render_f32(&mixer, data, &mut scratch)
                },
                |err| tracing::error!("Audio stream error: {}", err),
                None,
            )
            .map_err(device_error)
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        tracing::info!("Closing audio output");
    }
}

fn device_error(err: impl std::fmt::Display) -> MixerError {
    MixerError::AudioDevice(err.to_string())
}

/// Mix into `scratch` piece by piece and convert to floats.
fn render_f32(mixer: &Mixer, out: &mut [f32], scratch: &mut [i16]) {
    for block in out.chunks_mut(scratch.len()) {
        let mixed = &mut scratch[..block.len()];
        mixer.mix(mixed);
        for (dst, &src) in block.iter_mut().zip(mixed.iter()) {
            *dst = src as f32 / 32768.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::tests::be16;
    use crate::config::MixerConfig;
    use sound_primitives::SoundFlags;

    #[test]
    fn test_float_output_spans_several_scratch_blocks() {
        let mixer = Mixer::new(MixerConfig::default());
        mixer.bind_output(8000).unwrap();
        mixer
            .play_raw(
                be16(&[16384, -16384, 8192, 0, 32767]),
                8000,
                SoundFlags::BITS_16,
                None,
            )
            .unwrap();

        let mut out = [1.0f32; 12];
        let mut scratch = [0i16; 4];
        render_f32(&mixer, &mut out, &mut scratch);

        assert_eq!(
            out,
            [0.5, 0.5, -0.5, -0.5, 0.25, 0.25, 0.0, 0.0, 32767.0 / 32768.0, 32767.0 / 32768.0, 0.0, 0.0]
        );
    }
}
