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
use std::{sync::Arc, time::Duration};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{info, span, Level};

use super::{
    clock::{Clock, SystemClock},
    error::MixerError,
    events::{EventSink, MixerEvent, DEFAULT_EVENT_CAPACITY},
    format::{AudioFormat, SampleEncoding},
    mixer::{Mixer, MixerSettings, Scope},
};

pub const DEFAULT_FREQUENCY: u32 = 22050;
pub const DEFAULT_CHANNELS: u8 = 2;
pub const DEFAULT_BUFFER: Duration = Duration::from_millis(50);

/// The output format and buffer duration asked of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputRequest {
    pub frequency: u32,
    pub encoding: SampleEncoding,
    pub channels: u8,
    pub buffer: Duration,
}

impl Default for OutputRequest {
    fn default() -> Self {
        OutputRequest {
            frequency: DEFAULT_FREQUENCY,
            encoding: SampleEncoding::S16_NATIVE,
            channels: DEFAULT_CHANNELS,
            buffer: DEFAULT_BUFFER,
        }
    }
}

impl OutputRequest {
    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            frequency: self.frequency,
            encoding: self.encoding,
            channels: self.channels,
        }
    }

    /// The buffer duration in frames, at least one.
    pub fn frames(&self) -> usize {
        let frames = u128::from(self.frequency) * self.buffer.as_millis() / 1000;
        (frames as usize).max(1)
    }

    pub fn validate(&self) -> Result<(), MixerError> {
        self.format().validate()?;
        if self.buffer.is_zero() {
            return Err(MixerError::InvalidArgument {
                name: "buffer",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

/// What the driver actually opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub format: AudioFormat,
    /// Largest number of frames the driver will ask for in one callback.
    pub frames: usize,
}

/// A platform audio output.
pub trait OutputDriver: Send {
    /// Opens the output as close to `request` as the platform allows.
    fn negotiate(&mut self, request: &OutputRequest) -> Result<Negotiated, MixerError>;

    /// Starts calling [`Mixer::mix`] from the platform's callback.
    fn start(&mut self, mixer: Arc<Mixer>) -> Result<(), MixerError>;

    /// Stops the callback. The driver may not be restarted.
    fn stop(&mut self);
}

struct Running {
    mixer: Arc<Mixer>,
    driver: Box<dyn OutputDriver>,
}

/// Owns the mixer and the output driver between [`Engine::initialize`] and
/// [`Engine::deinitialize`].
pub struct Engine {
    settings: MixerSettings,
    clock: Arc<dyn Clock>,
    sink: EventSink,
    events: Receiver<MixerEvent>,
    running: Mutex<Option<Running>>,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(MixerSettings::default())
    }
}

impl Engine {
    pub fn new(settings: MixerSettings) -> Engine {
        Engine::with_clock(settings, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(settings: MixerSettings, clock: Arc<dyn Clock>) -> Engine {
        let (sink, events) = EventSink::bounded(DEFAULT_EVENT_CAPACITY);
        Engine {
            settings,
            clock,
            sink,
            events,
            running: Mutex::new(None),
        }
    }

    /// Opens the output and starts mixing. Returns whether the driver granted exactly the
    /// requested format.
    pub fn initialize(
        &self,
        request: OutputRequest,
        mut driver: Box<dyn OutputDriver>,
    ) -> Result<bool, MixerError> {
        let span = span!(Level::INFO, "initialize engine");
        let _enter = span.enter();

        let mut running = self.running.lock();
        if running.is_some() {
            return Err(MixerError::AlreadyInitialized);
        }
        request.validate()?;

        let negotiated = driver.negotiate(&request)?;
        let exact = negotiated.format == request.format();
        let mixer = Arc::new(Mixer::new(
            negotiated.format,
            negotiated.frames,
            &self.settings,
            self.clock.clone(),
            self.sink.clone(),
        )?);
        driver.start(mixer.clone())?;

        info!(
            format = %negotiated.format,
            frames = negotiated.frames,
            exact,
            voices = self.settings.voices,
            "Engine initialized"
        );
        *running = Some(Running { mixer, driver });
        Ok(exact)
    }

    /// Stops every voice and the output.
    pub fn deinitialize(&self) -> Result<(), MixerError> {
        let Running { mixer, mut driver } =
            self.running.lock().take().ok_or(MixerError::NotInitialized)?;
        driver.stop();
        mixer.stop(Scope::All)?;
        info!("Engine deinitialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn mixer(&self) -> Result<Arc<Mixer>, MixerError> {
        self.running
            .lock()
            .as_ref()
            .map(|running| running.mixer.clone())
            .ok_or(MixerError::NotInitialized)
    }

    /// Events from the mixing thread.
    pub fn events(&self) -> Receiver<MixerEvent> {
        self.events.clone()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(mut running) = self.running.get_mut().take() {
            running.driver.stop();
        }
    }
}
