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
//! A voice is one playback slot of the mixer. It binds to an [`AudioSource`] and mixes
//! it into the accumulator on every callback.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{
    clock::Clock,
    convert::{self, Conversion},
    error::MixerError,
    events::{EventSink, MixerEvent},
    filter::{Filter, FilterChain},
    format::AudioFormat,
    source::{AudioSource, SourceError, SourceState},
    INFINITE, MAX_VOLUME,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceStatus {
    Stopped,
    Playing,
    Paused,
}

/// The direction of a volume envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fade {
    #[default]
    None,
    In,
    Out,
}

/// How a source should be played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayOptions {
    /// Additional times to play after the first pass. [`INFINITE`] loops until stopped.
    pub loops: i32,
    /// Starting frame.
    pub position: u64,
    pub fade: Fade,
    pub fade_ms: u64,
    /// Stops the voice this many milliseconds after it started.
    pub timeout_ms: Option<u64>,
}

impl Default for PlayOptions {
    fn default() -> Self {
        PlayOptions {
            loops: 0,
            position: 0,
            fade: Fade::None,
            fade_ms: 0,
            timeout_ms: None,
        }
    }
}

impl PlayOptions {
    pub fn looping(loops: i32) -> PlayOptions {
        PlayOptions {
            loops,
            ..Default::default()
        }
    }

    pub fn fade_in(fade_ms: u64) -> PlayOptions {
        PlayOptions {
            fade: Fade::In,
            fade_ms,
            ..Default::default()
        }
    }
}

pub struct Voice {
    index: usize,
    format: AudioFormat,
    max_frames: usize,
    clock: Arc<dyn Clock>,
    events: EventSink,

    source: Option<Arc<AudioSource>>,
    filters: FilterChain,
    // Set when the source format differs from the output format.
    conversion: Option<Conversion>,
    conv_in: Vec<u8>,
    conv_out: Vec<u8>,
    scratch: Vec<i32>,

    left: u16,
    right: u16,
    rate: f32,
    priority: i32,
    start_ms: u64,
    fade: Fade,
    fade_start_ms: u64,
    fade_ms: u64,
    fade_from: (u16, u16),
    timeout_ms: Option<u64>,
    position: u64,
    loops: i32,
    paused: bool,
}

impl Voice {
    pub(crate) fn new(
        index: usize,
        format: AudioFormat,
        max_frames: usize,
        clock: Arc<dyn Clock>,
        events: EventSink,
    ) -> Voice {
        Voice {
            index,
            format,
            max_frames,
            clock,
            events,
            source: None,
            filters: FilterChain::default(),
            conversion: None,
            conv_in: Vec::new(),
            conv_out: Vec::new(),
            scratch: Vec::new(),
            left: MAX_VOLUME,
            right: MAX_VOLUME,
            rate: 1.0,
            priority: 0,
            start_ms: 0,
            fade: Fade::None,
            fade_start_ms: 0,
            fade_ms: 0,
            fade_from: (0, 0),
            timeout_ms: None,
            position: 0,
            loops: 0,
            paused: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Stops the voice and restores volume, rate, priority and filters to their defaults.
    pub(crate) fn reset(&mut self) {
        self.stop();
        self.left = MAX_VOLUME;
        self.right = MAX_VOLUME;
        self.rate = 1.0;
        self.priority = 0;
        self.filters = FilterChain::default();
    }

    /// Binds `source` and starts playing it. Nothing changes when validation fails.
    pub fn start_playing(
        &mut self,
        source: Arc<AudioSource>,
        options: PlayOptions,
    ) -> Result<(), MixerError> {
        if options.loops < INFINITE {
            return Err(MixerError::InvalidArgument {
                name: "loops",
                reason: "must be -1 or greater",
            });
        }
        if options.loops != 0 && !source.can_rewind() {
            return Err(MixerError::CannotLoop);
        }
        let bound_here = self
            .source
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &source));
        if let Some(length) = source.length() {
            if options.position > length {
                return Err(SourceError::OutOfRange {
                    position: options.position,
                    length,
                }
                .into());
            }
        }
        if options.position != 0 && !source.can_seek() {
            return Err(SourceError::NotSeekable.into());
        }
        let conversion = Conversion::setup(source.format(), self.format)?;

        // A voice already bound to this source keeps its claim across the restart.
        if !bound_here {
            if source.can_seek() {
                source.attach_voice();
            } else if !source.try_attach_exclusive() {
                return Err(MixerError::SourceBusy);
            }
        }
        if !source.can_seek() && source.can_rewind() {
            if let Err(e) = source.rewind() {
                if !bound_here {
                    source.detach_voice();
                }
                return Err(e.into());
            }
        }

        if let Some(previous) = self.unbind() {
            if !bound_here {
                previous.detach_voice();
            }
        }

        let now = self.clock.now_ms();
        self.conversion = (!conversion.is_identity()).then_some(conversion);
        self.priority = source.priority();
        self.start_ms = now;
        self.position = options.position;
        self.loops = options.loops;
        self.timeout_ms = options.timeout_ms;
        self.paused = false;
        self.fade = options.fade;
        self.fade_ms = options.fade_ms;
        self.fade_start_ms = now;
        self.fade_from = match options.fade {
            Fade::Out => self.target_volume(&source),
            Fade::In | Fade::None => (0, 0),
        };

        let samples = self.max_frames * usize::from(self.format.channels);
        let dest_bytes = self.max_frames * self.format.frame_size();
        if self.scratch.len() < samples {
            self.scratch.resize(samples, 0);
        }
        if let Some(conversion) = &self.conversion {
            let src_bytes = conversion.src_len(dest_bytes);
            if self.conv_in.len() < src_bytes {
                self.conv_in.resize(src_bytes, 0);
            }
            if self.conv_out.len() < dest_bytes {
                self.conv_out.resize(dest_bytes, 0);
            }
        }

        debug!(
            voice = self.index,
            source = ?source,
            loops = options.loops,
            position = options.position,
            "Voice started"
        );
        self.source = Some(source);
        Ok(())
    }

    /// Unbinds the source. Emits [`MixerEvent::VoiceFinished`] if a source was bound.
    pub fn stop(&mut self) {
        if let Some(source) = self.unbind() {
            source.detach_voice();
        }
    }

    /// Stops without releasing the source's voice count, which the caller then owns.
    fn unbind(&mut self) -> Option<Arc<AudioSource>> {
        let source = self.source.take()?;
        self.filters.reset();
        self.paused = false;
        self.fade = Fade::None;
        self.timeout_ms = None;
        self.events.send(MixerEvent::VoiceFinished { voice: self.index });
        Some(source)
    }

    pub fn pause(&mut self) {
        if self.source.is_some() {
            self.paused = true;
        }
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Fades from the current volume to silence over `ms`, then stops.
    pub fn fade_out(&mut self, ms: u64) {
        let Some(source) = self.source.clone() else {
            return;
        };
        let now = self.clock.now_ms();
        let (volume, _) = self.envelope(now, self.target_volume(&source));
        self.fade = Fade::Out;
        self.fade_from = volume;
        self.fade_start_ms = now;
        self.fade_ms = ms;
    }

    pub fn status(&self) -> VoiceStatus {
        match (&self.source, self.paused) {
            (None, _) => VoiceStatus::Stopped,
            (Some(_), true) => VoiceStatus::Paused,
            (Some(_), false) => VoiceStatus::Playing,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.status() == VoiceStatus::Playing
    }

    pub fn source(&self) -> Option<&Arc<AudioSource>> {
        self.source.as_ref()
    }

    pub fn volume(&self) -> (u16, u16) {
        (self.left, self.right)
    }

    pub fn set_volume(&mut self, left: u16, right: u16) -> Result<(), MixerError> {
        for volume in [left, right] {
            if volume > MAX_VOLUME {
                return Err(MixerError::InvalidVolume(volume));
            }
        }
        self.left = left;
        self.right = right;
        Ok(())
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn set_rate(&mut self, rate: f32) -> Result<(), MixerError> {
        if !rate.is_finite() || rate < 0.0 {
            return Err(MixerError::InvalidRate(rate));
        }
        self.rate = rate;
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Moves playback to `frame`, applied on the next mix.
    pub fn set_position(&mut self, frame: u64) -> Result<(), MixerError> {
        if let Some(source) = &self.source {
            if !source.can_seek() {
                return Err(SourceError::NotSeekable.into());
            }
            if let Some(length) = source.length() {
                if frame > length {
                    return Err(SourceError::OutOfRange {
                        position: frame,
                        length,
                    }
                    .into());
                }
            }
        }
        self.position = frame;
        Ok(())
    }

    pub fn fade(&self) -> Fade {
        self.fade
    }

    /// Milliseconds since the current source was bound. Zero when stopped.
    pub fn age(&self) -> u64 {
        match self.source {
            Some(_) => self.clock.now_ms().saturating_sub(self.start_ms),
            None => 0,
        }
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    pub fn loops(&self) -> i32 {
        self.loops
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    /// Replaces the voice's filters, returning the previous chain.
    pub fn set_filters(&mut self, chain: FilterChain) -> FilterChain {
        std::mem::replace(&mut self.filters, chain)
    }

    /// The effective volume the voice would mix with right now, fades included.
    pub fn sampled_volume(&self) -> (u16, u16) {
        match &self.source {
            Some(source) => {
                self.envelope(self.clock.now_ms(), self.target_volume(source))
                    .0
            }
            None => (0, 0),
        }
    }

    /// The voice volume scaled by the source volume.
    fn target_volume(&self, source: &AudioSource) -> (u16, u16) {
        let (left, right) = source.volume();
        (
            ((u32::from(self.left) * u32::from(left)) >> 8) as u16,
            ((u32::from(self.right) * u32::from(right)) >> 8) as u16,
        )
    }

    /// The envelope volume at `now` and whether the fade has run its course.
    fn envelope(&self, now: u64, target: (u16, u16)) -> ((u16, u16), bool) {
        let elapsed = now.saturating_sub(self.fade_start_ms);
        let done = elapsed >= self.fade_ms;
        match self.fade {
            Fade::None => (target, false),
            Fade::In if done => (target, true),
            Fade::Out if done => ((0, 0), true),
            Fade::In => (
                (
                    lerp(self.fade_from.0, target.0, elapsed, self.fade_ms),
                    lerp(self.fade_from.1, target.1, elapsed, self.fade_ms),
                ),
                false,
            ),
            Fade::Out => (
                (
                    lerp(self.fade_from.0, 0, elapsed, self.fade_ms),
                    lerp(self.fade_from.1, 0, elapsed, self.fade_ms),
                ),
                false,
            ),
        }
    }

    /// Mixes one buffer of output into `acc`, an interleaved accumulator in the output
    /// format of at most `max_frames` frames. `pre_filters` run after the voice's own
    /// filters.
    pub(crate) fn mix(&mut self, acc: &mut [i32], pre_filters: &mut FilterChain) {
        let Some(source) = self.source.clone() else {
            return;
        };
        if self.paused {
            return;
        }

        let now = self.clock.now_ms();
        if let Some(timeout) = self.timeout_ms {
            if now.saturating_sub(self.start_ms) >= timeout {
                debug!(voice = self.index, "Voice timed out");
                self.stop();
                return;
            }
        }

        let ((left, right), fade_done) = self.envelope(now, self.target_volume(&source));
        if fade_done {
            match self.fade {
                Fade::Out => {
                    self.stop();
                    return;
                }
                _ => self.fade = Fade::None,
            }
        }

        let rate = self.rate * source.rate();
        let channels = usize::from(self.format.channels);
        let filtered = !self.filters.is_empty() || !pre_filters.is_empty();

        let mut state = source.lock();
        if state.length() == Some(0) {
            drop(state);
            self.stop();
            return;
        }
        if state.can_seek() && state.position() != self.position {
            if let Err(e) = state.set_position(self.position) {
                self.report(&e);
                drop(state);
                self.stop();
                return;
            }
        }

        let ended = if filtered {
            let mut scratch = std::mem::take(&mut self.scratch);
            scratch.clear();
            scratch.resize(acc.len(), 0);
            let ended = self.render(&mut state, &mut scratch, rate, MAX_VOLUME, MAX_VOLUME);
            self.filters.mix_filter(&mut scratch, &self.format);
            pre_filters.mix_filter(&mut scratch, &self.format);
            convert::mix(acc, &scratch, channels, left, right);
            self.scratch = scratch;
            ended
        } else {
            self.render(&mut state, acc, rate, left, right)
        };

        self.position = state.position();
        let exhausted = self.loops == 0 && state.length().is_some_and(|len| self.position >= len);
        drop(state);

        if ended || exhausted {
            self.stop();
        }
    }

    /// Renders from the source into `dest`. Returns true once the source ended with no
    /// loops left.
    fn render(
        &mut self,
        state: &mut SourceState,
        dest: &mut [i32],
        rate: f32,
        left: u16,
        right: u16,
    ) -> bool {
        if self.conversion.is_none() && rate == 1.0 {
            self.render_direct(state, dest, left, right)
        } else {
            self.render_converted(state, dest, rate, left, right)
        }
    }

    fn render_direct(
        &mut self,
        state: &mut SourceState,
        dest: &mut [i32],
        left: u16,
        right: u16,
    ) -> bool {
        let channels = usize::from(self.format.channels);
        let frames = dest.len() / channels;
        let mut done = 0;
        let mut empty_reads = 0;
        while done < frames {
            let read = match state.read_frames(&mut dest[done * channels..], frames - done, left, right)
            {
                Ok(read) => read,
                Err(e) => {
                    self.report(&e);
                    0
                }
            };
            if read > 0 {
                done += read;
                empty_reads = 0;
                continue;
            }
            empty_reads += 1;
            if empty_reads > 1 || !self.next_loop(state) {
                return true;
            }
        }
        false
    }

    fn render_converted(
        &mut self,
        state: &mut SourceState,
        dest: &mut [i32],
        rate: f32,
        left: u16,
        right: u16,
    ) -> bool {
        let src_format = state.format();
        let conversion = match self.conversion {
            Some(conversion) if rate == 1.0 => conversion,
            _ => {
                let frequency = (src_format.frequency as f32 * rate).round() as u32;
                if frequency == 0 {
                    return false;
                }
                match Conversion::setup(src_format.with_frequency(frequency), self.format) {
                    Ok(conversion) => conversion,
                    Err(e) => {
                        warn!(voice = self.index, err = %e, "Unable to convert source");
                        return true;
                    }
                }
            }
        };

        let channels = usize::from(self.format.channels);
        let dest_bytes = (dest.len() / channels) * self.format.frame_size();
        let src_bytes = conversion.src_len(dest_bytes);
        if self.conv_in.len() < src_bytes {
            self.conv_in.resize(src_bytes, 0);
        }
        if self.conv_out.len() < dest_bytes {
            self.conv_out.resize(dest_bytes, 0);
        }

        let mut filled = 0;
        let mut empty_reads = 0;
        let mut ended = false;
        while filled < src_bytes {
            let read = match state.read_bytes(&mut self.conv_in[filled..src_bytes]) {
                Ok(read) => read,
                Err(e) => {
                    self.report(&e);
                    0
                }
            };
            if read > 0 {
                filled += read;
                empty_reads = 0;
                continue;
            }
            empty_reads += 1;
            if empty_reads > 1 || !self.next_loop(state) {
                ended = true;
                break;
            }
        }
        if filled == 0 {
            return ended;
        }

        // Pad a short final read with silence so it is not stretched over the buffer.
        let sample_size = src_format.sample_size();
        for sample in self.conv_in[filled..src_bytes].chunks_exact_mut(sample_size) {
            convert::write_sample(0.0, src_format.encoding, sample);
        }

        let written =
            conversion.convert_into(&self.conv_in[..src_bytes], &mut self.conv_out[..dest_bytes]);
        convert::convert_and_mix(
            dest,
            &self.conv_out[..written],
            self.format.encoding,
            channels,
            left,
            right,
        );
        ended
    }

    /// Rewinds for another pass if any loops remain.
    fn next_loop(&mut self, state: &mut SourceState) -> bool {
        if self.loops == 0 {
            return false;
        }
        if let Err(e) = state.rewind() {
            self.report(&e);
            return false;
        }
        if self.loops > 0 {
            self.loops -= 1;
        }
        true
    }

    fn report(&self, error: &SourceError) {
        warn!(voice = self.index, err = %error, "Source read failed, treating as end of stream");
        self.events.send(MixerEvent::SourceFault {
            voice: self.index,
            message: error.to_string(),
        });
    }
}

impl Drop for Voice {
    fn drop(&mut self) {
        if let Some(source) = self.source.take() {
            source.detach_voice();
        }
    }
}

fn lerp(from: u16, to: u16, elapsed: u64, duration: u64) -> u16 {
    let from = i64::from(from);
    let to = i64::from(to);
    (from + (to - from) * elapsed as i64 / duration.max(1) as i64) as u16
}
