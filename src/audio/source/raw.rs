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
use std::{
    fmt,
    io::{self, ErrorKind, Read, Seek, SeekFrom},
};

use crate::audio::format::AudioFormat;

use super::{error::SourceError, traits::PcmStream};

/// A byte stream that can be repositioned.
pub trait SeekableStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekableStream for T {}

enum RawStream {
    Seekable(Box<dyn SeekableStream>),
    Forward(Box<dyn Read + Send>),
}

impl RawStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            RawStream::Seekable(stream) => stream.read(buf),
            RawStream::Forward(stream) => stream.read(buf),
        }
    }
}

/// Uncompressed PCM read straight from a byte stream in a caller-declared format.
pub struct RawSource {
    stream: RawStream,
    format: AudioFormat,
    start: u64,
    length: Option<u64>,
    position: u64,
}

impl fmt::Debug for RawSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSource")
            .field("format", &self.format)
            .field("start", &self.start)
            .field("length", &self.length)
            .field("position", &self.position)
            .field(
                "seekable",
                &matches!(self.stream, RawStream::Seekable(_)),
            )
            .finish()
    }
}

impl RawSource {
    /// Wraps a seekable stream whose audio starts at byte `start`. Without an explicit
    /// byte length, the audio runs to the end of the stream.
    pub fn seekable<S: SeekableStream + 'static>(
        mut stream: S,
        format: AudioFormat,
        start: u64,
        byte_length: Option<u64>,
    ) -> Result<RawSource, SourceError> {
        format.validate()?;
        let byte_length = match byte_length {
            Some(byte_length) => byte_length,
            None => stream.seek(SeekFrom::End(0))?.saturating_sub(start),
        };
        stream.seek(SeekFrom::Start(start))?;

        Ok(RawSource {
            stream: RawStream::Seekable(Box::new(stream)),
            format,
            start,
            length: Some(byte_length / format.frame_size() as u64),
            position: 0,
        })
    }

    /// Wraps a forward-only stream positioned at the first frame.
    pub fn forward<R: Read + Send + 'static>(
        stream: R,
        format: AudioFormat,
        byte_length: Option<u64>,
    ) -> Result<RawSource, SourceError> {
        format.validate()?;
        Ok(RawSource {
            stream: RawStream::Forward(Box::new(stream)),
            format,
            start: 0,
            length: byte_length.map(|len| len / format.frame_size() as u64),
            position: 0,
        })
    }
}

impl PcmStream for RawSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn length(&self) -> Option<u64> {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn can_seek(&self) -> bool {
        matches!(self.stream, RawStream::Seekable(_))
    }

    fn seek(&mut self, frame: u64) -> Result<(), SourceError> {
        if frame == self.position {
            return Ok(());
        }
        match &mut self.stream {
            RawStream::Seekable(stream) => {
                let offset = self.start + frame * self.format.frame_size() as u64;
                stream.seek(SeekFrom::Start(offset))?;
                self.position = frame;
                Ok(())
            }
            RawStream::Forward(_) => Err(SourceError::NotSeekable),
        }
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        let frame_size = self.format.frame_size();
        let mut want = buf.len() / frame_size;
        if let Some(length) = self.length {
            want = want.min(length.saturating_sub(self.position) as usize);
        }
        let want = want * frame_size;

        let mut total = 0;
        while total < want {
            match self.stream.read(&mut buf[total..want]) {
                Ok(0) => break,
                Ok(read) => total += read,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        // A trailing partial frame can only come from a truncated stream.
        let whole = total - total % frame_size;
        self.position += (whole / frame_size) as u64;
        Ok(whole)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::audio::format::SampleEncoding;

    use super::*;

    fn stereo() -> AudioFormat {
        AudioFormat::new(22050, SampleEncoding::S16, 2).unwrap()
    }

    #[test]
    fn test_seekable_length_and_offset() {
        let data: Vec<u8> = (0..44u8).collect();
        let mut source = RawSource::seekable(Cursor::new(data), stereo(), 4, None).unwrap();
        assert_eq!(source.length(), Some(10));
        assert!(source.can_seek());

        let mut buf = [0u8; 8];
        assert_eq!(source.read_bytes(&mut buf).unwrap(), 8);
        assert_eq!(buf, [4, 5, 6, 7, 8, 9, 10, 11]);
        assert_eq!(source.position(), 2);

        source.seek(9).unwrap();
        assert_eq!(source.read_bytes(&mut buf).unwrap(), 4);
        assert_eq!(buf[..4], [40, 41, 42, 43]);
        assert_eq!(source.read_bytes(&mut buf).unwrap(), 0);

        source.seek(0).unwrap();
        assert_eq!(source.read_bytes(&mut buf[..4]).unwrap(), 4);
        assert_eq!(buf[..4], [4, 5, 6, 7]);
    }

    #[test]
    fn test_explicit_byte_length() {
        let data = vec![1u8; 100];
        let mut source =
            RawSource::seekable(Cursor::new(data), stereo(), 0, Some(10)).unwrap();
        assert_eq!(source.length(), Some(2));
        let mut buf = [0u8; 16];
        assert_eq!(source.read_bytes(&mut buf).unwrap(), 8);
    }

    #[test]
    fn test_forward_only() {
        let data = vec![7u8; 10];
        let mut source = RawSource::forward(Cursor::new(data), stereo(), None).unwrap();
        assert!(!source.can_seek());
        assert!(!source.can_rewind());
        assert_eq!(source.length(), None);

        let mut buf = [0u8; 16];
        // Two whole frames; the trailing two bytes are an incomplete frame.
        assert_eq!(source.read_bytes(&mut buf).unwrap(), 8);
        assert_eq!(source.read_bytes(&mut buf).unwrap(), 0);
        assert!(matches!(source.seek(0), Err(SourceError::NotSeekable)));
    }
}
