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
use super::{convert::ConversionError, filter::FilterError, format::FormatError, source::SourceError};

/// Usage and runtime errors of the mixer and engine.
#[derive(Debug, thiserror::Error)]
pub enum MixerError {
    #[error("The engine is already initialized")]
    AlreadyInitialized,

    #[error("The engine is not initialized")]
    NotInitialized,

    #[error("Volume {0} is out of range (0-256)")]
    InvalidVolume(u16),

    #[error("Rate {0} must be finite and not negative")]
    InvalidRate(f32),

    #[error("No voice with index {0}")]
    InvalidVoice(usize),

    #[error("No group with id {0}")]
    InvalidGroup(i32),

    #[error("The source cannot rewind, so it cannot loop")]
    CannotLoop,

    #[error("The source cannot seek and is already playing on another voice")]
    SourceBusy,

    #[error("Invalid argument {name}: {reason}")]
    InvalidArgument {
        name: &'static str,
        reason: &'static str,
    },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Output error: {0}")]
    Output(String),
}
