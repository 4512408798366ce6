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
pub mod clock;
pub mod convert;
pub mod cpal;
pub mod engine;
pub mod error;
pub mod events;
pub mod filter;
pub mod format;
pub mod mixer;
pub mod mock;
pub mod source;
pub mod thread_priority;
pub mod voice;

pub use engine::{Engine, Negotiated, OutputDriver, OutputRequest};
pub use error::MixerError;
pub use events::{EventSink, MixerEvent};
pub use format::{AudioFormat, SampleEncoding};
pub use mixer::{
    GroupId, MixPolicy, Mixer, MixerSettings, PlayPolicy, PlayTarget, Scope, VoiceHandle,
};
pub use source::AudioSource;
pub use voice::{Fade, PlayOptions, VoiceStatus};

/// Unity volume. Volumes range from 0 to this value.
pub const MAX_VOLUME: u16 = 256;

/// Loop count that repeats until the voice is stopped.
pub const INFINITE: i32 = -1;
