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
use std::{str::FromStr, time::Duration};

use duration_string::DurationString;
use serde::Deserialize;

use crate::audio::{
    engine::{DEFAULT_BUFFER, DEFAULT_CHANNELS, DEFAULT_FREQUENCY},
    MixPolicy, MixerSettings, OutputRequest, PlayPolicy, SampleEncoding, MAX_VOLUME,
};

use super::ConfigError;

const DEFAULT_VOICES: usize = 8;

/// A YAML representation of the mixer configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Mixer {
    /// Output frequency in Hz (default: 22050).
    frequency: Option<u32>,

    /// Output sample encoding, e.g. "s16", "u8", "f32le" (default: native s16).
    sample_format: Option<String>,

    /// Output channels (default: 2).
    channels: Option<u8>,

    /// Output buffer duration, e.g. "50ms".
    buffer: Option<String>,

    /// Number of voices (default: 8).
    voices: Option<usize>,

    /// Voices kept out of free allocation.
    reserved_voices: Option<usize>,

    play_policy: Option<PlayPolicy>,

    mix_policy: Option<MixPolicy>,

    /// Master volume, 0-256.
    master_volume: Option<u16>,

    /// Output device name. The default output device is used when unset.
    device: Option<String>,
}

impl Mixer {
    pub fn frequency(&self) -> u32 {
        self.frequency.unwrap_or(DEFAULT_FREQUENCY)
    }

    pub fn sample_format(&self) -> Result<SampleEncoding, ConfigError> {
        match self.sample_format.as_deref() {
            Some(format) => SampleEncoding::from_str(format).map_err(|e| ConfigError::Invalid {
                name: "sample_format",
                reason: e.to_string(),
            }),
            None => Ok(SampleEncoding::S16_NATIVE),
        }
    }

    pub fn channels(&self) -> u8 {
        self.channels.unwrap_or(DEFAULT_CHANNELS)
    }

    pub fn buffer(&self) -> Result<Duration, ConfigError> {
        match &self.buffer {
            Some(buffer) => DurationString::from_string(buffer.clone())
                .map(Duration::from)
                .map_err(|e| ConfigError::Invalid {
                    name: "buffer",
                    reason: e.to_string(),
                }),
            None => Ok(DEFAULT_BUFFER),
        }
    }

    pub fn voices(&self) -> usize {
        self.voices.unwrap_or(DEFAULT_VOICES)
    }

    pub fn reserved_voices(&self) -> usize {
        self.reserved_voices.unwrap_or(0)
    }

    pub fn play_policy(&self) -> PlayPolicy {
        self.play_policy.unwrap_or_default()
    }

    pub fn mix_policy(&self) -> MixPolicy {
        self.mix_policy.unwrap_or_default()
    }

    pub fn master_volume(&self) -> u16 {
        self.master_volume.unwrap_or(MAX_VOLUME)
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Checks every value that has a restricted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.request()?;
        if self.master_volume() > MAX_VOLUME {
            return Err(ConfigError::Invalid {
                name: "master_volume",
                reason: format!("{} exceeds {}", self.master_volume(), MAX_VOLUME),
            });
        }
        Ok(())
    }

    /// The output format and buffer to ask of the driver.
    pub fn request(&self) -> Result<OutputRequest, ConfigError> {
        let request = OutputRequest {
            frequency: self.frequency(),
            encoding: self.sample_format()?,
            channels: self.channels(),
            buffer: self.buffer()?,
        };
        request.validate().map_err(|e| ConfigError::Invalid {
            name: "output",
            reason: e.to_string(),
        })?;
        Ok(request)
    }

    pub fn settings(&self) -> MixerSettings {
        MixerSettings {
            voices: self.voices(),
            reserved_voices: self.reserved_voices(),
            play_policy: self.play_policy(),
            mix_policy: self.mix_policy(),
            master_volume: self.master_volume(),
        }
    }
}

#[cfg(test)]
mod tests {
    use config::{Config, File, FileFormat};

    use super::*;

    fn parse(yaml: &str) -> Mixer {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let mixer = parse("{}");
        let request = mixer.request().unwrap();
        assert_eq!(request, OutputRequest::default());
        assert_eq!(mixer.settings(), MixerSettings::default());
        assert_eq!(mixer.device(), None);
    }

    #[test]
    fn test_full() {
        let yaml = r#"
            frequency: 44100
            sample_format: f32
            channels: 1
            buffer: 10ms
            voices: 32
            reserved_voices: 4
            play_policy: oldest_priority
            mix_policy: divide
            master_volume: 128
            device: UltraLite-mk5
        "#;
        let mixer = parse(yaml);
        let request = mixer.request().unwrap();
        assert_eq!(request.frequency, 44100);
        assert_eq!(request.encoding, SampleEncoding::F32_NATIVE);
        assert_eq!(request.channels, 1);
        assert_eq!(request.frames(), 441);

        let settings = mixer.settings();
        assert_eq!(settings.voices, 32);
        assert_eq!(settings.reserved_voices, 4);
        assert_eq!(settings.play_policy, PlayPolicy::OldestPriority);
        assert_eq!(settings.mix_policy, MixPolicy::Divide);
        assert_eq!(settings.master_volume, 128);
        assert_eq!(mixer.device(), Some("UltraLite-mk5"));
        assert!(mixer.validate().is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let mixer = parse("sample_format: s24");
        assert!(matches!(
            mixer.sample_format(),
            Err(ConfigError::Invalid {
                name: "sample_format",
                ..
            })
        ));
        assert!(parse("buffer: forever").buffer().is_err());
        assert!(parse("channels: 0").validate().is_err());
        assert!(parse("master_volume: 257").validate().is_err());
    }
}
