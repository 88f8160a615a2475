// bases/sound_player/src/main.rs
use clap::Parser;
use color_eyre::Result;
use sound_mixer::{AudioOutput, Mixer, MixerConfig};
use std::path::PathBuf;
use std::sync::Arc;

mod commands;

use commands::Commands;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Mixer configuration file (YAML); defaults apply when it is missing
    #[arg(long, default_value = "sound-player.yaml")]
    config: PathBuf,

    /// Effects volume, 0 to 256
    #[arg(long)]
    volume: Option<i32>,

    /// Music volume, 0 to 256
    #[arg(long)]
    music_volume: Option<i32>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sound_player=info,sound_mixer=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = MixerConfig::load(&cli.config)?;

    let mixer = Arc::new(Mixer::new(config.clone()));
    if let Some(volume) = cli.volume {
        mixer.set_volume(volume);
    }
    if let Some(volume) = cli.music_volume {
        mixer.set_music_volume(volume);
    }

    let output = AudioOutput::open(Arc::clone(&mixer), &config.output)?;
    tracing::info!("Playing at {}Hz", output.sample_rate());

    let playback = commands::run(cli.command, &mixer)?;
    commands::wait_until_done(&mixer, &playback.handle).await?;
    if let Some(feeder) = playback.feeder {
        feeder.await??;
    }

    mixer.shutdown();
    drop(output);
    Ok(())
}
