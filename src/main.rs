// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{error::Error, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use tracing::info;
use tracing_subscriber::EnvFilter;
use voxmix::{
    audio::{
        self,
        source::{DecodedSource, ToneGenerator, ToneKind},
        AudioSource, Engine, Fade, MixerEvent, PlayOptions, PlayTarget,
    },
    config,
};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A real-time audio mixer."
)]
struct Cli {
    /// The path to a mixer config. VOXMIX_* environment variables override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Plays a test tone.
    Tone {
        /// The waveform: sine, square, saw or triangle.
        #[arg(short, long, default_value = "sine")]
        kind: String,
        /// The tone frequency in Hz.
        #[arg(short, long, default_value_t = 440.0)]
        frequency: f32,
        /// How long to play, e.g. 2s.
        #[arg(short, long, default_value = "2s")]
        duration: String,
    },
    /// Plays an audio file.
    Play {
        /// The file to play.
        path: PathBuf,
        /// Additional times to play the file. -1 loops until interrupted.
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        loops: i32,
        /// Fade in over this duration, e.g. 500ms.
        #[arg(long)]
        fade_in: Option<String>,
    },
}

fn parse_duration(value: &str) -> Result<Duration, Box<dyn Error>> {
    Ok(DurationString::from_string(value.to_string())?.into())
}

/// Plays `source` on a free voice and blocks until that voice finishes.
fn play_until_finished(
    engine: &Engine,
    source: &Arc<AudioSource>,
    options: PlayOptions,
) -> Result<(), Box<dyn Error>> {
    let events = engine.events();
    let voice = engine
        .mixer()?
        .play(PlayTarget::Free, source, options)?
        .ok_or("no free voice")?;
    info!(voice = voice.index(), "Playing");

    loop {
        match events.recv()? {
            MixerEvent::VoiceFinished { voice: finished } if finished == voice.index() => break,
            MixerEvent::Fault { voice, message } => {
                return Err(format!("mixer fault on voice {:?}: {}", voice, message).into())
            }
            MixerEvent::SourceFault { message, .. } => {
                return Err(format!("source failed: {}", message).into())
            }
            _ => {}
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Devices {} = cli.command {
        let devices = audio::cpal::list_devices()?;
        if devices.is_empty() {
            println!("No devices found.");
            return Ok(());
        }

        println!("Devices:");
        for device in devices {
            println!("- {}", device);
        }
        return Ok(());
    }

    let config = config::load(cli.config.as_deref())?;
    let engine = Engine::new(config.settings());
    let driver = audio::cpal::Driver::new(config.device().map(str::to_string));
    if !engine.initialize(config.request()?, Box::new(driver))? {
        println!("Opened {} instead of the requested format.", engine.mixer()?.format());
    }

    match cli.command {
        Commands::Devices {} => {}
        Commands::Tone {
            kind,
            frequency,
            duration,
        } => {
            let rate = engine.mixer()?.format().frequency;
            let duration = parse_duration(&duration)?;
            let frames = u64::from(rate) * duration.as_millis() as u64 / 1000;
            let tone = ToneGenerator::new(ToneKind::from_str(&kind)?, frequency, rate)?
                .with_length(frames);
            play_until_finished(&engine, &AudioSource::new(tone), PlayOptions::default())?;
        }
        Commands::Play {
            path,
            loops,
            fade_in,
        } => {
            let source = AudioSource::new(DecodedSource::open(&path)?);
            let mut options = PlayOptions::looping(loops);
            if let Some(fade_in) = fade_in {
                options.fade = Fade::In;
                options.fade_ms = parse_duration(&fade_in)?.as_millis() as u64;
            }
            play_until_finished(&engine, &source, options)?;
        }
    }

    engine.deinitialize()?;
    Ok(())
}
