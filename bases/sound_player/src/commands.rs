use clap::Subcommand;
use color_eyre::Result;
use sound_mixer::{
    DecodeError, DecodeOptions, FrameDecoder, Mixer, MixerError, SoundFlags, SoundHandle,
    SoundId, SymphoniaDecoder,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const RETRY_DELAY: Duration = Duration::from_millis(5);

#[derive(Subcommand)]
pub enum Commands {
    /// Play an audio file through a decode channel
    Play {
        path: PathBuf,

        /// Play at the music volume
        #[arg(long)]
        music: bool,

        /// Refuse to start if a sound with this id is already playing
        #[arg(long)]
        repeat_id: Option<i32>,
    },

    /// Decode a file in the background and feed it to a stream channel
    Stream {
        path: PathBuf,

        /// Ring buffer size in bytes
        #[arg(long, default_value_t = 64 * 1024)]
        capacity: usize,
    },

    /// Play a synthesized sine tone
    Tone {
        /// Pitch in Hz
        #[arg(long, default_value_t = 440.0)]
        frequency: f32,

        #[arg(long, default_value_t = 2.0)]
        seconds: f32,

        /// Sample rate of the generated clip
        #[arg(long, default_value_t = 22050)]
        rate: u32,

        /// Repeat until interrupted
        #[arg(long = "loop")]
        looping: bool,
    },
}

/// A started sound plus the task feeding it, if any.
pub struct Playback {
    pub handle: SoundHandle,
    pub feeder: Option<JoinHandle<Result<()>>>,
}

pub fn run(command: Commands, mixer: &Arc<Mixer>) -> Result<Playback> {
    match command {
        Commands::Play {
            path,
            music,
            repeat_id,
        } => {
            let decoder = SymphoniaDecoder::open(&path)?;
            tracing::info!(
                "Playing {:?} ({}Hz, {} channels)",
                path,
                decoder.sample_rate(),
                decoder.channels()
            );
            let options = DecodeOptions {
                music,
                id: repeat_id.map(SoundId),
                ..Default::default()
            };
            let handle = mixer.play_decoder(Box::new(decoder), options)?;
            Ok(Playback {
                handle,
                feeder: None,
            })
        }

        Commands::Stream { path, capacity } => {
            let decoder = SymphoniaDecoder::open(&path)?;
            let mut flags = SoundFlags::BITS_16 | SoundFlags::LITTLE_ENDIAN;
            if decoder.channels() == 2 {
                flags |= SoundFlags::STEREO;
            }
            let handle = mixer.create_stream(&[], decoder.sample_rate(), flags, capacity)?;
            tracing::info!("Streaming {:?} through a {} byte buffer", path, capacity);

            let feeder = {
                let mixer = Arc::clone(mixer);
                let handle = handle.clone();
                tokio::task::spawn_blocking(move || {
                    feed_stream(&mixer, &handle, Box::new(decoder), capacity)
                })
            };
            Ok(Playback {
                handle,
                feeder: Some(feeder),
            })
        }

        Commands::Tone {
            frequency,
            seconds,
            rate,
            looping,
        } => {
            let mut flags = SoundFlags::BITS_16 | SoundFlags::LITTLE_ENDIAN | SoundFlags::AUTOFREE;
            if looping {
                flags |= SoundFlags::LOOP;
            }
            let clip = tone_clip(frequency, seconds, rate);
            tracing::info!("Playing {}Hz tone for {}s", frequency, seconds);
            let handle = mixer.play_raw(clip, rate, flags, None)?;
            Ok(Playback {
                handle,
                feeder: None,
            })
        }
    }
}

/// Wait for the sound to end on its own, or stop everything on Ctrl-C.
pub async fn wait_until_done(mixer: &Mixer, handle: &SoundHandle) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                tracing::info!("Interrupted, stopping playback");
                mixer.stop_all();
                return Ok(());
            }
            _ = ticker.tick() => {
                if !handle.is_active() {
                    tracing::info!("Playback finished");
                    return Ok(());
                }
            }
        }
    }
}

/// Push every decoded block into the stream, waiting out full buffers.
pub fn feed_stream(
    mixer: &Mixer,
    handle: &SoundHandle,
    mut decoder: Box<dyn FrameDecoder>,
    capacity: usize,
) -> Result<()> {
    let piece = (capacity / 2).max(1);
    let mut block = Vec::new();
    let mut bytes = Vec::new();

    loop {
        match decoder.decode_next(&mut block) {
            Ok(true) => {}
            Ok(false) => break,
            Err(DecodeError::Recoverable(message)) => {
                tracing::warn!("Skipping damaged block: {}", message);
                continue;
            }
            Err(e) => {
                tracing::error!("Decoding failed: {}", e);
                break;
            }
        }

        bytes.clear();
        bytes.extend(block.iter().flat_map(|sample| sample.to_le_bytes()));
        for chunk in bytes.chunks(piece) {
            loop {
                match mixer.append_stream(handle, chunk) {
                    Ok(()) => break,
                    Err(MixerError::BufferOverflowRejected { .. }) => std::thread::sleep(RETRY_DELAY),
                    Err(MixerError::InvalidHandle(_)) => {
                        tracing::debug!("Stream stopped, feeder exiting");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    match mixer.end_stream(handle) {
        Ok(()) | Err(MixerError::InvalidHandle(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Little-endian 16-bit mono sine at half scale.
pub fn tone_clip(frequency: f32, seconds: f32, rate: u32) -> Vec<u8> {
    let frames = (seconds.max(0.0) * rate as f32) as usize;
    let step = std::f32::consts::TAU * frequency / rate as f32;
    (0..frames)
        .map(|i| ((i as f32 * step).sin() * i16::MAX as f32 * 0.5) as i16)
        .flat_map(i16::to_le_bytes)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use sound_mixer::MixerConfig;
    use std::collections::VecDeque;

    struct CountingDecoder {
        blocks: VecDeque<Vec<i16>>,
    }

    impl FrameDecoder for CountingDecoder {
        fn sample_rate(&self) -> u32 {
            8000
        }

        fn channels(&self) -> u16 {
            1
        }

        fn decode_next(&mut self, out: &mut Vec<i16>) -> Result<bool, DecodeError> {
            out.clear();
            match self.blocks.pop_front() {
                Some(block) => {
                    out.extend(block);
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    #[rstest]
    #[case(440.0, 1.0, 22050, 22050)]
    #[case(1000.0, 0.5, 8000, 4000)]
    #[case(440.0, 0.0, 44100, 0)]
    fn tone_has_expected_length(
        #[case] frequency: f32,
        #[case] seconds: f32,
        #[case] rate: u32,
        #[case] frames: usize,
    ) {
        assert_eq!(tone_clip(frequency, seconds, rate).len(), frames * 2);
    }

    #[test]
    fn tone_is_little_endian_and_half_scale() {
        let clip = tone_clip(2000.0, 0.001, 8000);
        let samples: Vec<i16> = clip
            .chunks(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        // A quarter period per sample: 0, peak, 0, -peak, ...
        assert_eq!(samples[0], 0);
        assert_eq!(samples[1], 16383);
        assert!(samples.iter().all(|s| s.abs() <= 16383));
    }

    #[test]
    fn feeder_delivers_everything_through_a_small_buffer() {
        let mixer = Arc::new(Mixer::new(MixerConfig::default()));
        mixer.bind_output(8000).unwrap();
        let expected: Vec<i16> = (1..=300).collect();
        let decoder = CountingDecoder {
            blocks: expected.chunks(37).map(<[i16]>::to_vec).collect(),
        };
        let handle = mixer
            .create_stream(&[], 8000, SoundFlags::BITS_16 | SoundFlags::LITTLE_ENDIAN, 32)
            .unwrap();

        let feeder = {
            let mixer = Arc::clone(&mixer);
            let handle = handle.clone();
            std::thread::spawn(move || feed_stream(&mixer, &handle, Box::new(decoder), 32))
        };

        let mut played = Vec::new();
        let mut out = [0i16; 8];
        for _ in 0..10_000 {
            if !handle.is_active() {
                break;
            }
            mixer.mix(&mut out);
            played.extend(out.chunks(2).map(|pair| pair[0]).filter(|&s| s != 0));
            std::thread::sleep(Duration::from_micros(200));
        }
        feeder.join().unwrap().unwrap();

        assert!(!handle.is_active());
        assert_eq!(played, expected);
    }

    #[test]
    fn feeder_stops_when_stream_is_stopped() {
        let mixer = Arc::new(Mixer::new(MixerConfig::default()));
        mixer.bind_output(8000).unwrap();
        let decoder = CountingDecoder {
            blocks: vec![vec![1; 64]; 100].into(),
        };
        let handle = mixer
            .create_stream(&[], 8000, SoundFlags::BITS_16, 16)
            .unwrap();
        mixer.stop_handle(&handle);

        assert_matches!(feed_stream(&mixer, &handle, Box::new(decoder), 16), Ok(()));
    }
}
