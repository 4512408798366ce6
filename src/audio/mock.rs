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
use std::{fmt, sync::Arc};

use tracing::info;

use super::{
    engine::{Negotiated, OutputDriver, OutputRequest},
    error::MixerError,
    format::AudioFormat,
    mixer::Mixer,
};

/// A mock output. Doesn't play anything or spawn a thread; callers pump
/// [`Mixer::mix`] or [`Mixer::render`] themselves.
#[derive(Default)]
pub struct Driver {
    substitute: Option<AudioFormat>,
    mixer: Option<Arc<Mixer>>,
}

impl Driver {
    /// A driver that grants whatever is requested.
    pub fn new() -> Driver {
        Driver::default()
    }

    /// A driver that always opens `format`, whatever is requested.
    pub fn substituting(format: AudioFormat) -> Driver {
        Driver {
            substitute: Some(format),
            mixer: None,
        }
    }

    /// Returns true between start and stop.
    pub fn is_started(&self) -> bool {
        self.mixer.is_some()
    }
}

impl OutputDriver for Driver {
    fn negotiate(&mut self, request: &OutputRequest) -> Result<Negotiated, MixerError> {
        let format = self.substitute.unwrap_or_else(|| request.format());
        Ok(Negotiated {
            format,
            frames: request.frames(),
        })
    }

    fn start(&mut self, mixer: Arc<Mixer>) -> Result<(), MixerError> {
        info!(format = %mixer.format(), "Starting mock output");
        self.mixer = Some(mixer);
        Ok(())
    }

    fn stop(&mut self) {
        self.mixer = None;
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.substitute {
            Some(format) => write!(f, "Mock ({})", format),
            None => write!(f, "Mock"),
        }
    }
}
