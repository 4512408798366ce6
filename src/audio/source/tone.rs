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
use std::{f64::consts::PI, fmt, str::FromStr};

use crate::audio::format::{AudioFormat, SampleEncoding};

use super::{error::SourceError, traits::PcmStream};

/// Sample rate used when none is given.
pub const DEFAULT_TONE_SAMPLE_RATE: u32 = 22050;

/// Tone frequency used when none is given.
pub const DEFAULT_TONE_FREQUENCY: f32 = 200.0;

const PEAK: f64 = 32767.0;

/// Waveform of a [`ToneGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToneKind {
    #[default]
    Sine,
    Square,
    Saw,
    Triangle,
}

impl FromStr for ToneKind {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sine" => Ok(ToneKind::Sine),
            "square" => Ok(ToneKind::Square),
            "saw" | "sawtooth" => Ok(ToneKind::Saw),
            "triangle" => Ok(ToneKind::Triangle),
            _ => Err(SourceError::InvalidArgument {
                name: "tone",
                reason: "expected sine, square, saw or triangle",
            }),
        }
    }
}

impl fmt::Display for ToneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToneKind::Sine => "sine",
            ToneKind::Square => "square",
            ToneKind::Saw => "saw",
            ToneKind::Triangle => "triangle",
        };
        write!(f, "{}", name)
    }
}

/// A mono signed 16-bit waveform generator.
///
/// Samples are a pure function of the absolute sample position, so seeking is exact.
/// Without a length the generator never ends.
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    kind: ToneKind,
    frequency: f32,
    format: AudioFormat,
    position: u64,
    length: Option<u64>,
}

impl ToneGenerator {
    pub fn new(kind: ToneKind, frequency: f32, sample_rate: u32) -> Result<Self, SourceError> {
        if !(frequency > 0.0) {
            return Err(SourceError::InvalidArgument {
                name: "frequency",
                reason: "must be positive",
            });
        }
        if sample_rate == 0 {
            return Err(SourceError::InvalidArgument {
                name: "sample_rate",
                reason: "must be positive",
            });
        }

        Ok(ToneGenerator {
            kind,
            frequency,
            format: AudioFormat {
                frequency: sample_rate,
                encoding: SampleEncoding::S16_NATIVE,
                channels: 1,
            },
            position: 0,
            length: None,
        })
    }

    /// Limits the generator to `frames` samples.
    pub fn with_length(mut self, frames: u64) -> Self {
        self.length = Some(frames);
        self
    }

    pub fn kind(&self) -> ToneKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: ToneKind) {
        self.kind = kind;
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn set_frequency(&mut self, frequency: f32) -> Result<(), SourceError> {
        if !(frequency > 0.0) {
            return Err(SourceError::InvalidArgument {
                name: "frequency",
                reason: "must be positive",
            });
        }
        self.frequency = frequency;
        Ok(())
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.frequency
    }

    /// The sample at absolute position `index`.
    pub fn sample_at(&self, index: u64) -> i16 {
        let rate = f64::from(self.format.frequency);
        let frequency = f64::from(self.frequency);
        let period = rate / frequency;
        let phase = (index as f64) % period;

        let value = match self.kind {
            ToneKind::Sine => {
                let angle = index as f64 * 2.0 * PI * frequency / rate;
                (angle.sin() * PEAK).round()
            }
            ToneKind::Saw => (phase / period * 65534.0).trunc() - PEAK,
            ToneKind::Triangle => {
                let half = period * 0.5;
                let rising = if phase > half { period - phase } else { phase };
                (rising / half * 65534.0).trunc() - PEAK
            }
            ToneKind::Square => {
                // One-sample linear ramps at each edge keep the transitions band limited.
                let half = period * 0.5;
                if phase < 1.0 {
                    (1.0 - phase) * PEAK
                } else if phase > period - 1.0 {
                    (phase - period) * PEAK
                } else if phase < half - 1.0 {
                    PEAK
                } else if phase > half + 1.0 {
                    -PEAK
                } else {
                    (half - phase) * PEAK
                }
            }
        };
        value.clamp(-PEAK, PEAK) as i16
    }
}

impl Default for ToneGenerator {
    /// A 200Hz sine at 22050Hz.
    fn default() -> Self {
        ToneGenerator {
            kind: ToneKind::Sine,
            frequency: DEFAULT_TONE_FREQUENCY,
            format: AudioFormat {
                frequency: DEFAULT_TONE_SAMPLE_RATE,
                encoding: SampleEncoding::S16_NATIVE,
                channels: 1,
            },
            position: 0,
            length: None,
        }
    }
}

impl PcmStream for ToneGenerator {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn length(&self) -> Option<u64> {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn is_unbounded(&self) -> bool {
        self.length.is_none()
    }

    fn seek(&mut self, frame: u64) -> Result<(), SourceError> {
        self.position = frame;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        let mut frames = (buf.len() / 2) as u64;
        if let Some(length) = self.length {
            frames = frames.min(length.saturating_sub(self.position));
        }

        for (i, out) in buf.chunks_exact_mut(2).take(frames as usize).enumerate() {
            let sample = self.sample_at(self.position + i as u64);
            out.copy_from_slice(&sample.to_ne_bytes());
        }
        self.position += frames;
        Ok(frames as usize * 2)
    }
}
