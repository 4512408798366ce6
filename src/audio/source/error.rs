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
use crate::audio::convert::ConversionError;
use crate::audio::format::FormatError;

/// Error types for audio source operations
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Position {position} is outside of the source length {length}")]
    OutOfRange { position: u64, length: u64 },

    #[error("Source does not support seeking")]
    NotSeekable,

    #[error("Source does not support rewinding")]
    NotRewindable,

    #[error("Source is unbounded and can't be read in its entirety")]
    Unbounded,

    #[error("Read of {len} bytes is not a whole number of {frame_size}-byte frames")]
    PartialFrame { len: usize, frame_size: usize },

    #[error("Volume {0} is outside of 0..=256")]
    InvalidVolume(u16),

    #[error("Invalid argument {name}: {reason}")]
    InvalidArgument {
        name: &'static str,
        reason: &'static str,
    },

    #[error("No playable track found")]
    NoTrack,

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Audio file error: {0}")]
    AudioError(#[from] symphonia::core::errors::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
