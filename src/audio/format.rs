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
//! Sample encodings and audio formats shared by sources, voices and the mixer.

use std::{fmt, str::FromStr};

/// Errors produced when describing or parsing an audio format.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("Unsupported sample encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Channel count must be at least 1")]
    NoChannels,

    #[error("Frequency must be greater than 0")]
    ZeroFrequency,
}

/// How a single sample is laid out in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleEncoding {
    /// Bits per sample.
    pub bits: u8,
    /// Whether integer samples are signed. Float samples are always signed.
    pub signed: bool,
    /// Whether multi-byte samples are stored big-endian.
    pub big_endian: bool,
    /// Whether samples are IEEE floating point.
    pub float: bool,
}

const NATIVE_BIG_ENDIAN: bool = cfg!(target_endian = "big");

impl SampleEncoding {
    pub const U8: SampleEncoding = SampleEncoding::int(8, false, false);
    pub const S8: SampleEncoding = SampleEncoding::int(8, true, false);
    pub const U16: SampleEncoding = SampleEncoding::int(16, false, false);
    pub const S16: SampleEncoding = SampleEncoding::int(16, true, false);
    pub const U16_BE: SampleEncoding = SampleEncoding::int(16, false, true);
    pub const S16_BE: SampleEncoding = SampleEncoding::int(16, true, true);
    pub const S32: SampleEncoding = SampleEncoding::int(32, true, false);
    pub const F32: SampleEncoding = SampleEncoding::float(32, false);
    pub const F64: SampleEncoding = SampleEncoding::float(64, false);

    /// Signed 16-bit in the byte order of the running machine.
    pub const S16_NATIVE: SampleEncoding = SampleEncoding::int(16, true, NATIVE_BIG_ENDIAN);
    /// 32-bit float in the byte order of the running machine.
    pub const F32_NATIVE: SampleEncoding = SampleEncoding::float(32, NATIVE_BIG_ENDIAN);

    const fn int(bits: u8, signed: bool, big_endian: bool) -> SampleEncoding {
        SampleEncoding {
            bits,
            signed,
            big_endian,
            float: false,
        }
    }

    const fn float(bits: u8, big_endian: bool) -> SampleEncoding {
        SampleEncoding {
            bits,
            signed: true,
            big_endian,
            float: true,
        }
    }

    /// Size of one sample in bytes.
    pub fn sample_size(&self) -> usize {
        usize::from(self.bits >> 3)
    }

    /// Returns an error if this combination of fields can't be mixed.
    pub fn validate(&self) -> Result<(), FormatError> {
        let valid = match (self.float, self.bits) {
            (false, 8 | 16 | 32) => true,
            (true, 32 | 64) => self.signed,
            _ => false,
        };
        if valid {
            Ok(())
        } else {
            Err(FormatError::UnsupportedEncoding(self.to_string()))
        }
    }

    /// The same encoding with the machine's byte order.
    pub fn to_native(self) -> SampleEncoding {
        SampleEncoding {
            big_endian: NATIVE_BIG_ENDIAN,
            ..self
        }
    }
}

impl Default for SampleEncoding {
    fn default() -> Self {
        SampleEncoding::S16_NATIVE
    }
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.float {
            "f"
        } else if self.signed {
            "s"
        } else {
            "u"
        };
        write!(f, "{}{}", kind, self.bits)?;
        if self.bits > 8 && self.big_endian {
            write!(f, "be")?;
        } else if self.bits > 8 {
            write!(f, "le")?;
        }
        Ok(())
    }
}

impl FromStr for SampleEncoding {
    type Err = FormatError;

    /// Parses names such as `s16`, `u8`, `s16be`, `f32le` or `float`.
    /// Without an explicit suffix the machine's byte order is used.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn named(body: &str) -> Option<SampleEncoding> {
            Some(match body {
                "u8" => SampleEncoding::U8,
                "s8" => SampleEncoding::S8,
                "u16" => SampleEncoding::U16,
                "s16" | "int" => SampleEncoding::S16,
                "s32" => SampleEncoding::S32,
                "f32" | "float" => SampleEncoding::F32,
                "f64" | "double" => SampleEncoding::F64,
                _ => return None,
            })
        }

        let lower = s.trim().to_ascii_lowercase();
        let (encoding, big_endian) = if let Some(encoding) = named(&lower) {
            (encoding, None)
        } else if let Some(encoding) = lower.strip_suffix("be").and_then(named) {
            (encoding, Some(true))
        } else if let Some(encoding) = lower.strip_suffix("le").and_then(named) {
            (encoding, Some(false))
        } else {
            return Err(FormatError::UnsupportedEncoding(s.to_string()));
        };

        let encoding = match big_endian {
            Some(big_endian) => SampleEncoding {
                big_endian,
                ..encoding
            },
            None => encoding.to_native(),
        };
        encoding.validate()?;
        Ok(encoding)
    }
}

/// The full description of a stream of interleaved PCM frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Frames per second.
    pub frequency: u32,
    /// Per-sample encoding.
    pub encoding: SampleEncoding,
    /// Interleaved channels per frame.
    pub channels: u8,
}

impl AudioFormat {
    /// Creates a validated audio format.
    pub fn new(
        frequency: u32,
        encoding: SampleEncoding,
        channels: u8,
    ) -> Result<AudioFormat, FormatError> {
        let format = AudioFormat {
            frequency,
            encoding,
            channels,
        };
        format.validate()?;
        Ok(format)
    }

    /// Checks the invariants of the format.
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.channels == 0 {
            return Err(FormatError::NoChannels);
        }
        if self.frequency == 0 {
            return Err(FormatError::ZeroFrequency);
        }
        self.encoding.validate()
    }

    pub fn sample_size(&self) -> usize {
        self.encoding.sample_size()
    }

    /// Bytes per interleaved frame.
    pub fn frame_size(&self) -> usize {
        self.sample_size() * usize::from(self.channels)
    }

    /// Bytes per second of audio.
    pub fn byte_rate(&self) -> usize {
        self.frame_size() * self.frequency as usize
    }

    pub fn with_frequency(self, frequency: u32) -> AudioFormat {
        AudioFormat { frequency, ..self }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz {} x{}",
            self.frequency, self.encoding, self.channels
        )
    }
}
