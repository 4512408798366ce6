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
//! Audio sources: the producers of PCM frames that voices play.
//!
//! An [`AudioSource`] is shared between client code and any voices playing it. Stream
//! state (position, decoder, scratch) sits behind the source's own lock, while volume,
//! rate and priority are atomics so the mixer can read them without locking.

use std::{
    fmt,
    path::Path,
    sync::{
        atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::{Mutex, MutexGuard};

use super::{convert, format::AudioFormat, MAX_VOLUME};

mod decoded;
mod error;
mod raw;
mod sample;
mod tone;
mod traits;


pub use decoded::{DecodedSource, SymphoniaDecoder};
pub use error::SourceError;
pub use raw::{RawSource, SeekableStream};
pub use sample::SampleSource;
pub use tone::{ToneGenerator, ToneKind, DEFAULT_TONE_FREQUENCY, DEFAULT_TONE_SAMPLE_RATE};
pub use traits::{Decoder, PcmStream};

/// Chunk size used when reading a source of unknown length in its entirety.
const READ_ALL_CHUNK: usize = 16384;

/// The closed set of source implementations.
#[derive(Debug)]
pub enum SourceKind {
    Tone(ToneGenerator),
    Raw(RawSource),
    Decoded(DecodedSource),
    Sample(SampleSource),
}

macro_rules! dispatch {
    ($kind:expr, $stream:ident => $body:expr) => {
        match $kind {
            SourceKind::Tone($stream) => $body,
            SourceKind::Raw($stream) => $body,
            SourceKind::Decoded($stream) => $body,
            SourceKind::Sample($stream) => $body,
        }
    };
}

impl PcmStream for SourceKind {
    fn format(&self) -> AudioFormat {
        dispatch!(self, s => s.format())
    }

    fn length(&self) -> Option<u64> {
        dispatch!(self, s => s.length())
    }

    fn position(&self) -> u64 {
        dispatch!(self, s => s.position())
    }

    fn can_seek(&self) -> bool {
        dispatch!(self, s => s.can_seek())
    }

    fn can_rewind(&self) -> bool {
        dispatch!(self, s => s.can_rewind())
    }

    fn is_unbounded(&self) -> bool {
        dispatch!(self, s => s.is_unbounded())
    }

    fn seek(&mut self, frame: u64) -> Result<(), SourceError> {
        dispatch!(self, s => s.seek(frame))
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        dispatch!(self, s => s.read_bytes(buf))
    }
}

impl From<ToneGenerator> for SourceKind {
    fn from(tone: ToneGenerator) -> Self {
        SourceKind::Tone(tone)
    }
}

impl From<RawSource> for SourceKind {
    fn from(raw: RawSource) -> Self {
        SourceKind::Raw(raw)
    }
}

impl From<DecodedSource> for SourceKind {
    fn from(decoded: DecodedSource) -> Self {
        SourceKind::Decoded(decoded)
    }
}

impl From<SampleSource> for SourceKind {
    fn from(sample: SampleSource) -> Self {
        SourceKind::Sample(sample)
    }
}

/// The locked part of a source: the stream plus a reusable read buffer.
#[derive(Debug)]
pub struct SourceState {
    kind: SourceKind,
    scratch: Vec<u8>,
}

impl SourceState {
    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut SourceKind {
        &mut self.kind
    }

    pub fn format(&self) -> AudioFormat {
        self.kind.format()
    }

    pub fn length(&self) -> Option<u64> {
        self.kind.length()
    }

    pub fn position(&self) -> u64 {
        self.kind.position()
    }

    pub fn can_seek(&self) -> bool {
        self.kind.can_seek()
    }

    pub fn can_rewind(&self) -> bool {
        self.kind.can_rewind()
    }

    /// Moves to `frame`, which may equal the length but not exceed it.
    pub fn set_position(&mut self, frame: u64) -> Result<(), SourceError> {
        if frame == self.position() {
            return Ok(());
        }
        if !self.can_seek() {
            return Err(SourceError::NotSeekable);
        }
        if let Some(length) = self.length() {
            if frame > length {
                return Err(SourceError::OutOfRange {
                    position: frame,
                    length,
                });
            }
        }
        self.kind.seek(frame)
    }

    pub fn rewind(&mut self) -> Result<(), SourceError> {
        if !self.can_rewind() {
            return Err(SourceError::NotRewindable);
        }
        self.kind.seek(0)
    }

    /// Reads whole frames into `buf`. Zero means end of stream.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        let frame_size = self.format().frame_size();
        if buf.len() % frame_size != 0 {
            return Err(SourceError::PartialFrame {
                len: buf.len(),
                frame_size,
            });
        }
        self.kind.read_bytes(buf)
    }

    /// Reads up to `frames` frames and adds them to `dest` with the given volume,
    /// converting to accumulator scale. The source must already be in the
    /// accumulator's channel layout. Returns the frames read.
    pub fn read_frames(
        &mut self,
        dest: &mut [i32],
        frames: usize,
        left: u16,
        right: u16,
    ) -> Result<usize, SourceError> {
        let format = self.format();
        let channels = usize::from(format.channels);
        let frames = frames.min(dest.len() / channels);

        if let SourceKind::Sample(sample) = &mut self.kind {
            return Ok(sample.mix_frames(dest, frames, left, right));
        }

        let len = frames * format.frame_size();
        if self.scratch.len() < len {
            self.scratch.resize(len, 0);
        }
        let read = self.kind.read_bytes(&mut self.scratch[..len])?;
        convert::convert_and_mix(
            dest,
            &self.scratch[..read],
            format.encoding,
            channels,
            left,
            right,
        );
        Ok(read / format.frame_size())
    }

    /// Reads the whole stream from the start, restoring the position of seekable sources.
    pub fn read_all(&mut self) -> Result<Vec<u8>, SourceError> {
        if self.kind.is_unbounded() {
            return Err(SourceError::Unbounded);
        }

        let saved = self.can_seek().then(|| self.position());
        if self.can_rewind() {
            self.kind.seek(0)?;
        }

        let frame_size = self.format().frame_size();
        let result = match self.length() {
            Some(length) => {
                let mut data = vec![0u8; length as usize * frame_size];
                let mut filled = 0;
                while filled < data.len() {
                    let read = self.kind.read_bytes(&mut data[filled..])?;
                    if read == 0 {
                        break;
                    }
                    filled += read;
                }
                data.truncate(filled);
                data
            }
            None => {
                let chunk = (READ_ALL_CHUNK / frame_size).max(1) * frame_size;
                let mut data = Vec::new();
                loop {
                    let start = data.len();
                    data.resize(start + chunk, 0);
                    let read = self.kind.read_bytes(&mut data[start..])?;
                    data.truncate(start + read);
                    if read == 0 {
                        break;
                    }
                }
                data
            }
        };

        if let Some(position) = saved {
            self.kind.seek(position)?;
        }
        Ok(result)
    }
}

/// A shareable audio source.
pub struct AudioSource {
    state: Mutex<SourceState>,
    format: AudioFormat,
    can_seek: bool,
    can_rewind: bool,
    // Left volume in the high half, right in the low half.
    volume: AtomicU32,
    // f32 bits.
    rate: AtomicU32,
    priority: AtomicI32,
    voices: AtomicUsize,
}

impl fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSource")
            .field("format", &self.format)
            .field("can_seek", &self.can_seek)
            .field("can_rewind", &self.can_rewind)
            .field("volume", &self.volume())
            .field("rate", &self.rate())
            .field("priority", &self.priority())
            .field("voices", &self.voice_count())
            .finish()
    }
}

fn pack_volume(left: u16, right: u16) -> u32 {
    (u32::from(left) << 16) | u32::from(right)
}

fn check_volume(volume: u16) -> Result<u16, SourceError> {
    if volume > MAX_VOLUME {
        return Err(SourceError::InvalidVolume(volume));
    }
    Ok(volume)
}

impl AudioSource {
    /// Wraps a stream in a shareable source.
    pub fn new<K: Into<SourceKind>>(kind: K) -> Arc<AudioSource> {
        let kind = kind.into();
        Arc::new(AudioSource {
            format: kind.format(),
            can_seek: kind.can_seek(),
            can_rewind: kind.can_rewind(),
            state: Mutex::new(SourceState {
                kind,
                scratch: Vec::new(),
            }),
            volume: AtomicU32::new(pack_volume(MAX_VOLUME, MAX_VOLUME)),
            rate: AtomicU32::new(1.0f32.to_bits()),
            priority: AtomicI32::new(0),
            voices: AtomicUsize::new(0),
        })
    }

    /// Opens an audio file through symphonia.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<AudioSource>, SourceError> {
        Ok(AudioSource::new(DecodedSource::open(path)?))
    }

    /// Locks the stream for a sequence of operations that must not interleave with
    /// other users of the source.
    pub fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock()
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn length(&self) -> Option<u64> {
        self.state.lock().length()
    }

    pub fn can_seek(&self) -> bool {
        self.can_seek
    }

    pub fn can_rewind(&self) -> bool {
        self.can_rewind
    }

    pub fn position(&self) -> u64 {
        self.state.lock().position()
    }

    pub fn set_position(&self, frame: u64) -> Result<(), SourceError> {
        self.state.lock().set_position(frame)
    }

    pub fn rewind(&self) -> Result<(), SourceError> {
        self.state.lock().rewind()
    }

    pub fn read_bytes(&self, buf: &mut [u8]) -> Result<usize, SourceError> {
        self.state.lock().read_bytes(buf)
    }

    pub fn read_frames(
        &self,
        dest: &mut [i32],
        frames: usize,
        left: u16,
        right: u16,
    ) -> Result<usize, SourceError> {
        self.state.lock().read_frames(dest, frames, left, right)
    }

    pub fn read_all(&self) -> Result<Vec<u8>, SourceError> {
        self.state.lock().read_all()
    }

    /// The (left, right) volume pair.
    pub fn volume(&self) -> (u16, u16) {
        let packed = self.volume.load(Ordering::Acquire);
        ((packed >> 16) as u16, packed as u16)
    }

    pub fn set_volume(&self, left: u16, right: u16) -> Result<(), SourceError> {
        let packed = pack_volume(check_volume(left)?, check_volume(right)?);
        self.volume.store(packed, Ordering::Release);
        Ok(())
    }

    /// Sets both channels to the same volume.
    pub fn set_both(&self, volume: u16) -> Result<(), SourceError> {
        self.set_volume(volume, volume)
    }

    pub fn set_left(&self, volume: u16) -> Result<(), SourceError> {
        let volume = check_volume(volume)?;
        let _ = self
            .volume
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |packed| {
                Some(pack_volume(volume, packed as u16))
            });
        Ok(())
    }

    pub fn set_right(&self, volume: u16) -> Result<(), SourceError> {
        let volume = check_volume(volume)?;
        let _ = self
            .volume
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |packed| {
                Some(pack_volume((packed >> 16) as u16, volume))
            });
        Ok(())
    }

    /// Playback rate multiplier, 1.0 being the natural rate.
    pub fn rate(&self) -> f32 {
        f32::from_bits(self.rate.load(Ordering::Acquire))
    }

    pub fn set_rate(&self, rate: f32) -> Result<(), SourceError> {
        if !(rate >= 0.0) || !rate.is_finite() {
            return Err(SourceError::InvalidArgument {
                name: "rate",
                reason: "must be a finite value of at least 0",
            });
        }
        self.rate.store(rate.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Acquire)
    }

    pub fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::Release);
    }

    /// The number of voices currently bound to this source.
    pub fn voice_count(&self) -> usize {
        self.voices.load(Ordering::Acquire)
    }

    pub(crate) fn attach_voice(&self) {
        self.voices.fetch_add(1, Ordering::AcqRel);
    }

    /// Binds the first voice only. Returns false if any voice is already bound.
    pub(crate) fn try_attach_exclusive(&self) -> bool {
        self.voices
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn detach_voice(&self) {
        let _ = self
            .voices
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}
