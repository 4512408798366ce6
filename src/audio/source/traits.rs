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
use crate::audio::format::AudioFormat;

use super::error::SourceError;

/// A producer of interleaved PCM frames in a fixed format.
///
/// Implementations don't validate arguments; bounds and capability checks are done
/// once by the owning [`super::SourceState`].
pub trait PcmStream: Send {
    /// The format of the bytes produced by [`PcmStream::read_bytes`].
    fn format(&self) -> AudioFormat;

    /// Length in frames, or None when unknown or unbounded.
    fn length(&self) -> Option<u64>;

    /// Current position in frames.
    fn position(&self) -> u64;

    fn can_seek(&self) -> bool;

    fn can_rewind(&self) -> bool {
        self.can_seek()
    }

    /// True for generators that never reach end of stream.
    fn is_unbounded(&self) -> bool {
        false
    }

    /// Moves to the given frame.
    fn seek(&mut self, frame: u64) -> Result<(), SourceError>;

    /// Fills `buf` with whole frames. Returns the bytes written, zero at end of stream.
    /// A nonzero result shorter than `buf` means the source is rate limited.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, SourceError>;
}

/// The boundary to an external decoder producing signed 16-bit samples.
pub trait Decoder: Send {
    fn channels(&self) -> u8;

    fn sample_rate(&self) -> u32;

    /// Total length in frames, if the container reports it.
    fn total_frames(&self) -> Option<u64>;

    fn can_seek(&self) -> bool;

    /// Seeks to the given frame.
    fn seek(&mut self, frame: u64) -> Result<(), SourceError>;

    /// Decodes interleaved samples into `out`. Returns the frames written, zero at end
    /// of stream.
    fn read(&mut self, out: &mut [i16]) -> Result<usize, SourceError>;
}
