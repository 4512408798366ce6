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
use std::{fmt, fs::File, path::Path};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, warn};

use crate::audio::format::{AudioFormat, SampleEncoding};

use super::{
    error::SourceError,
    traits::{Decoder, PcmStream},
};

/// Decodes compressed or containerized audio with symphonia into signed 16-bit frames.
pub struct SymphoniaDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    channels: u8,
    sample_rate: u32,
    total_frames: Option<u64>,
    seekable: bool,
    // Interleaved samples from the last packet not yet handed out.
    pending: Vec<i16>,
    pending_pos: usize,
    // Samples to discard after an accurate seek landed early.
    skip: usize,
    sample_buffer: Option<SampleBuffer<i16>>,
}

impl fmt::Debug for SymphoniaDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymphoniaDecoder")
            .field("track_id", &self.track_id)
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("total_frames", &self.total_frames)
            .field("seekable", &self.seekable)
            .finish()
    }
}

impl SymphoniaDecoder {
    /// Opens an audio file, using its extension as a format hint.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SymphoniaDecoder, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            SourceError::IoError(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }
        Self::from_media_source(Box::new(file), hint)
    }

    /// Decodes from any symphonia media source, e.g. an in-memory cursor.
    pub fn from_media_source(
        source: Box<dyn MediaSource>,
        hint: Hint,
    ) -> Result<SymphoniaDecoder, SourceError> {
        let seekable = source.is_seekable();
        let mss = MediaSourceStream::new(source, Default::default());

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();
        let probed = get_probe().format(&hint, mss, &fmt_opts, &meta_opts)?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(SourceError::NoTrack)?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| SourceError::Decoder("sample rate not specified".to_string()))?;
        let decoder = get_codecs().make(&params, &DecoderOptions::default())?;

        let mut decoder = SymphoniaDecoder {
            reader,
            decoder,
            track_id,
            channels: params.channels.map(|c| c.count() as u8).unwrap_or(0),
            sample_rate,
            total_frames: params.n_frames,
            seekable,
            pending: Vec::new(),
            pending_pos: 0,
            skip: 0,
            sample_buffer: None,
        };

        // Without container metadata the first packet tells us the channel count.
        if decoder.channels == 0 && !decoder.decode_next()? {
            return Err(SourceError::Decoder("no audio packets".to_string()));
        }
        if decoder.channels == 0 {
            return Err(SourceError::Decoder("channel count not specified".to_string()));
        }

        debug!(
            channels = decoder.channels,
            sample_rate,
            frames = ?decoder.total_frames,
            seekable,
            "Opened decoder"
        );
        Ok(decoder)
    }

    /// Reads the next packet for our track. `Ok(None)` at end of stream.
    fn next_packet(&mut self) -> Result<Option<Packet>, SourceError> {
        loop {
            match self.reader.next_packet() {
                Ok(packet) if packet.track_id() == self.track_id => return Ok(Some(packet)),
                Ok(_) => continue,
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Decodes one packet into `pending`. Returns false at end of stream.
    fn decode_next(&mut self) -> Result<bool, SourceError> {
        loop {
            let Some(packet) = self.next_packet()? else {
                return Ok(false);
            };
            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!(error = e, "Skipping undecodable packet");
                    continue;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            let needed = capacity as usize * spec.channels.count();
            if self
                .sample_buffer
                .as_ref()
                .map_or(true, |buffer| buffer.capacity() < needed)
            {
                self.sample_buffer = Some(SampleBuffer::<i16>::new(capacity, spec));
            }
            let Some(buffer) = self.sample_buffer.as_mut() else {
                continue;
            };
            buffer.copy_interleaved_ref(decoded);

            if self.channels == 0 {
                self.channels = spec.channels.count() as u8;
            }
            self.pending.clear();
            self.pending.extend_from_slice(buffer.samples());
            self.pending_pos = 0;
            if !self.pending.is_empty() {
                return Ok(true);
            }
        }
    }
}

impl Decoder for SymphoniaDecoder {
    fn channels(&self) -> u8 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    fn can_seek(&self) -> bool {
        self.seekable
    }

    fn seek(&mut self, frame: u64) -> Result<(), SourceError> {
        // Track timestamps are in frames for the PCM and compressed formats we decode.
        let seeked = self.reader.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: frame,
                track_id: self.track_id,
            },
        )?;
        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.skip = seeked.required_ts.saturating_sub(seeked.actual_ts) as usize
            * usize::from(self.channels);
        Ok(())
    }

    fn read(&mut self, out: &mut [i16]) -> Result<usize, SourceError> {
        let channels = usize::from(self.channels);
        let want = out.len() / channels * channels;
        let mut filled = 0;

        while filled < want {
            if self.pending_pos >= self.pending.len() {
                if !self.decode_next()? {
                    break;
                }
                continue;
            }

            let available = self.pending.len() - self.pending_pos;
            if self.skip > 0 {
                let skipped = self.skip.min(available);
                self.pending_pos += skipped;
                self.skip -= skipped;
                continue;
            }

            let count = available.min(want - filled);
            out[filled..filled + count]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + count]);
            self.pending_pos += count;
            filled += count;
        }
        Ok(filled / channels)
    }
}

/// A source backed by an external [`Decoder`], producing native-endian signed 16-bit.
pub struct DecodedSource {
    decoder: Box<dyn Decoder>,
    format: AudioFormat,
    position: u64,
    pcm: Vec<i16>,
}

impl fmt::Debug for DecodedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedSource")
            .field("format", &self.format)
            .field("position", &self.position)
            .field("length", &self.decoder.total_frames())
            .finish()
    }
}

impl DecodedSource {
    pub fn new<D: Decoder + 'static>(decoder: D) -> Result<DecodedSource, SourceError> {
        let format = AudioFormat::new(
            decoder.sample_rate(),
            SampleEncoding::S16_NATIVE,
            decoder.channels(),
        )?;
        Ok(DecodedSource {
            decoder: Box::new(decoder),
            format,
            position: 0,
            pcm: Vec::new(),
        })
    }

    /// Opens an audio file with symphonia.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<DecodedSource, SourceError> {
        DecodedSource::new(SymphoniaDecoder::open(path)?)
    }
}

impl PcmStream for DecodedSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn length(&self) -> Option<u64> {
        self.decoder.total_frames()
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn can_seek(&self) -> bool {
        self.decoder.can_seek()
    }

    fn seek(&mut self, frame: u64) -> Result<(), SourceError> {
        self.decoder.seek(frame)?;
        self.position = frame;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        let channels = usize::from(self.format.channels);
        let mut frames = buf.len() / self.format.frame_size();
        if let Some(length) = self.length() {
            frames = frames.min(length.saturating_sub(self.position) as usize);
        }

        self.pcm.resize(frames * channels, 0);
        let read = self.decoder.read(&mut self.pcm)?;
        for (out, sample) in buf.chunks_exact_mut(2).zip(&self.pcm[..read * channels]) {
            out.copy_from_slice(&sample.to_ne_bytes());
        }
        self.position += read as u64;
        Ok(read * self.format.frame_size())
    }
}
