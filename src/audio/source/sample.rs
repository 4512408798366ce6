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

use crate::audio::{
    convert::{self, Conversion},
    format::AudioFormat,
};

use super::{error::SourceError, traits::PcmStream, AudioSource};

/// Fully decoded audio held in memory.
///
/// The data is shared, so cloning a sample for another voice is cheap and each clone
/// keeps its own position.
#[derive(Clone)]
pub struct SampleSource {
    data: Arc<[u8]>,
    format: AudioFormat,
    length: u64,
    position: u64,
}

impl fmt::Debug for SampleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleSource")
            .field("format", &self.format)
            .field("length", &self.length)
            .field("position", &self.position)
            .finish()
    }
}

impl SampleSource {
    /// Wraps PCM bytes in the given format.
    pub fn from_bytes(data: Vec<u8>, format: AudioFormat) -> Result<SampleSource, SourceError> {
        format.validate()?;
        let frame_size = format.frame_size();
        if data.len() % frame_size != 0 {
            return Err(SourceError::PartialFrame {
                len: data.len(),
                frame_size,
            });
        }
        Ok(SampleSource {
            length: (data.len() / frame_size) as u64,
            data: data.into(),
            format,
            position: 0,
        })
    }

    /// Reads all of `source` into memory, converting it to `target` when given.
    /// Usually `target` is the mixer's format so voices can skip conversion.
    pub fn load(
        source: &AudioSource,
        target: Option<AudioFormat>,
    ) -> Result<SampleSource, SourceError> {
        let data = source.read_all()?;
        let format = source.format();
        let sample = match target {
            Some(target) if target != format => {
                let converted = Conversion::setup(format, target)?.convert_all(&data)?;
                SampleSource::from_bytes(converted, target)?
            }
            _ => SampleSource::from_bytes(data, format)?,
        };
        info!(
            format = %sample.format,
            frames = sample.length,
            "Sample loaded"
        );
        Ok(sample)
    }

    /// The raw PCM bytes of the whole sample.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn remaining_bytes(&self, want: usize) -> &[u8] {
        let frame_size = self.format.frame_size();
        let start = (self.position as usize * frame_size).min(self.data.len());
        let frames = (want / frame_size).min((self.length - self.position) as usize);
        &self.data[start..start + frames * frame_size]
    }

    /// Mixes up to `frames` frames straight from memory into the accumulator.
    pub(super) fn mix_frames(
        &mut self,
        dest: &mut [i32],
        frames: usize,
        left: u16,
        right: u16,
    ) -> usize {
        let frame_size = self.format.frame_size();
        let channels = usize::from(self.format.channels);
        let frames = frames.min(dest.len() / channels);
        let src = self.remaining_bytes(frames * frame_size);
        let read = src.len() / frame_size;
        convert::convert_and_mix(
            &mut dest[..read * channels],
            src,
            self.format.encoding,
            channels,
            left,
            right,
        );
        self.position += read as u64;
        read
    }
}

impl PcmStream for SampleSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn length(&self) -> Option<u64> {
        Some(self.length)
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn seek(&mut self, frame: u64) -> Result<(), SourceError> {
        if frame > self.length {
            return Err(SourceError::OutOfRange {
                position: frame,
                length: self.length,
            });
        }
        self.position = frame;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        let src = self.remaining_bytes(buf.len());
        let len = src.len();
        buf[..len].copy_from_slice(src);
        self.position += (len / self.format.frame_size()) as u64;
        Ok(len)
    }
}
