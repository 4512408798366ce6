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
//! Sample conversion and accumulation primitives.
//!
//! The mixer accumulates into `i32` samples at 16-bit full scale, independent of the
//! output encoding. Everything here is a pure function over caller-provided buffers;
//! only [`Conversion::convert_all`] allocates.

use std::borrow::Cow;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::format::{AudioFormat, FormatError, SampleEncoding};

/// Scale between normalized float samples and accumulator samples.
pub const ACCUMULATOR_SCALE: f32 = 32768.0;

/// Input block size used for offline resampling.
const RESAMPLE_BLOCK_SIZE: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid format: {0}")]
    Format(#[from] FormatError),

    #[error("Buffer of {len} bytes is not a whole number of {frame_size}-byte frames")]
    PartialFrame { len: usize, frame_size: usize },

    #[error("Resampling failed: {0}Hz -> {1}Hz: {2}")]
    Resample(u32, u32, String),
}

/// A prepared conversion between two formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    src: AudioFormat,
    dest: AudioFormat,
    len_mul: u64,
    len_div: u64,
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn round_up(value: u64, multiple: u64) -> u64 {
    value.div_ceil(multiple) * multiple
}

impl Conversion {
    /// Validates both formats and computes the byte length ratio between them.
    pub fn setup(src: AudioFormat, dest: AudioFormat) -> Result<Conversion, ConversionError> {
        src.validate()?;
        dest.validate()?;

        let len_mul = dest.byte_rate() as u64;
        let len_div = src.byte_rate() as u64;
        let divisor = gcd(len_mul, len_div).max(1);
        Ok(Conversion {
            src,
            dest,
            len_mul: len_mul / divisor,
            len_div: len_div / divisor,
        })
    }

    pub fn src(&self) -> AudioFormat {
        self.src
    }

    pub fn dest(&self) -> AudioFormat {
        self.dest
    }

    pub fn is_identity(&self) -> bool {
        self.src == self.dest
    }

    /// Bytes produced from `src_bytes` of input, in whole destination frames.
    pub fn dest_len(&self, src_bytes: usize) -> usize {
        let frame = self.dest.frame_size() as u64;
        let len = src_bytes as u64 * self.len_mul / self.len_div;
        ((len / frame) * frame) as usize
    }

    /// Bytes of input needed to produce `dest_bytes` of output.
    ///
    /// Rounded up to a whole source frame, so the result can exceed the exact need by
    /// up to one frame. The extra input is absorbed by the rate interpolation.
    pub fn src_len(&self, dest_bytes: usize) -> usize {
        let exact = (dest_bytes as u64 * self.len_div).div_ceil(self.len_mul);
        round_up(exact, self.src.frame_size() as u64) as usize
    }

    /// Converts `src` into `dest` without allocating. Returns the bytes written.
    ///
    /// With equal rates, frames map one to one. Otherwise each output frame is
    /// linearly interpolated at the matching input position, clamped to the last
    /// input frame.
    pub fn convert_into(&self, src: &[u8], dest: &mut [u8]) -> usize {
        let src_fs = self.src.frame_size();
        let dest_fs = self.dest.frame_size();
        let src_frames = src.len() / src_fs;
        let dest_frames = dest.len() / dest_fs;
        if src_frames == 0 || dest_frames == 0 {
            return 0;
        }

        if self.is_identity() {
            let len = src_frames.min(dest_frames) * src_fs;
            dest[..len].copy_from_slice(&src[..len]);
            return len;
        }

        let same_rate = self.src.frequency == self.dest.frequency;
        let frames = if same_rate {
            src_frames.min(dest_frames)
        } else {
            dest_frames
        };
        let ratio = f64::from(self.src.frequency) / f64::from(self.dest.frequency);
        let dest_ss = self.dest.sample_size();
        let last = src_frames - 1;

        for j in 0..frames {
            let (i0, frac) = if same_rate {
                (j, 0.0)
            } else {
                let pos = j as f64 * ratio;
                let i0 = pos.floor() as usize;
                (i0.min(last), (pos - i0 as f64) as f32)
            };
            let i1 = (i0 + 1).min(last);

            for c in 0..usize::from(self.dest.channels) {
                let a = self.channel_sample(src, i0, c);
                let value = if frac > 0.0 && i1 != i0 {
                    a + (self.channel_sample(src, i1, c) - a) * frac
                } else {
                    a
                };
                let offset = j * dest_fs + c * dest_ss;
                write_sample(value, self.dest.encoding, &mut dest[offset..offset + dest_ss]);
            }
        }
        frames * dest_fs
    }

    /// Reads destination channel `channel` of source frame `frame`, normalized.
    fn channel_sample(&self, src: &[u8], frame: usize, channel: usize) -> f32 {
        let ss = self.src.sample_size();
        let base = frame * self.src.frame_size();
        let src_channels = usize::from(self.src.channels);
        let dest_channels = usize::from(self.dest.channels);

        if src_channels == dest_channels {
            let offset = base + channel * ss;
            read_sample(&src[offset..offset + ss], self.src.encoding)
        } else if dest_channels == 1 {
            let sum: f32 = (0..src_channels)
                .map(|c| {
                    let offset = base + c * ss;
                    read_sample(&src[offset..offset + ss], self.src.encoding)
                })
                .sum();
            sum / src_channels as f32
        } else {
            let offset = base + (channel % src_channels) * ss;
            read_sample(&src[offset..offset + ss], self.src.encoding)
        }
    }

    /// Converts a whole buffer, resampling with a windowed sinc when the rates differ.
    pub fn convert_all(&self, src: &[u8]) -> Result<Vec<u8>, ConversionError> {
        let src_fs = self.src.frame_size();
        if src.len() % src_fs != 0 {
            return Err(ConversionError::PartialFrame {
                len: src.len(),
                frame_size: src_fs,
            });
        }
        if self.is_identity() {
            return Ok(src.to_vec());
        }

        if self.src.frequency == self.dest.frequency {
            let mut dest = vec![0u8; self.dest_len(src.len())];
            let written = self.convert_into(src, &mut dest);
            dest.truncate(written);
            return Ok(dest);
        }

        let planar = self.resample(src)?;
        let frames = planar.first().map(Vec::len).unwrap_or(0);
        let dest_ss = self.dest.sample_size();
        let dest_fs = self.dest.frame_size();
        let mut dest = vec![0u8; frames * dest_fs];
        for (c, channel) in planar.iter().enumerate() {
            for (j, &value) in channel.iter().enumerate() {
                let offset = j * dest_fs + c * dest_ss;
                write_sample(value, self.dest.encoding, &mut dest[offset..offset + dest_ss]);
            }
        }
        Ok(dest)
    }

    /// Channel-maps `src` into planar floats and runs them through rubato.
    fn resample(&self, src: &[u8]) -> Result<Vec<Vec<f32>>, ConversionError> {
        let resample_error =
            |e: String| ConversionError::Resample(self.src.frequency, self.dest.frequency, e);

        let channels = usize::from(self.dest.channels);
        let src_frames = src.len() / self.src.frame_size();
        let planar: Vec<Vec<f32>> = (0..channels)
            .map(|c| {
                (0..src_frames)
                    .map(|frame| self.channel_sample(src, frame, c))
                    .collect()
            })
            .collect();

        let ratio = f64::from(self.dest.frequency) / f64::from(self.src.frequency);
        let expected = (src_frames as f64 * ratio).round() as usize;
        if src_frames == 0 {
            return Ok(vec![Vec::new(); channels]);
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            oversampling_factor: 128,
            interpolation: SincInterpolationType::Linear,
            window: WindowFunction::BlackmanHarris2,
        };
        let mut resampler =
            SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_BLOCK_SIZE, channels)
                .map_err(|e| resample_error(e.to_string()))?;

        let delay = resampler.output_delay();
        let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];
        let append = |output: &mut Vec<Vec<f32>>, block: Vec<Vec<f32>>| {
            for (out, samples) in output.iter_mut().zip(block) {
                out.extend_from_slice(&samples);
            }
        };

        let mut pos = 0;
        loop {
            let needed = resampler.input_frames_next();
            if pos + needed > src_frames {
                break;
            }
            let chunk: Vec<&[f32]> = planar.iter().map(|c| &c[pos..pos + needed]).collect();
            let block = resampler
                .process(&chunk, None)
                .map_err(|e| resample_error(e.to_string()))?;
            append(&mut output, block);
            pos += needed;
        }

        if pos < src_frames {
            let chunk: Vec<&[f32]> = planar.iter().map(|c| &c[pos..]).collect();
            let block = resampler
                .process_partial(Some(&chunk), None)
                .map_err(|e| resample_error(e.to_string()))?;
            append(&mut output, block);
        }

        while output[0].len() < expected + delay {
            let block = resampler
                .process_partial::<&[f32]>(None, None)
                .map_err(|e| resample_error(e.to_string()))?;
            if block.first().map_or(true, Vec::is_empty) {
                break;
            }
            append(&mut output, block);
        }

        for channel in output.iter_mut() {
            channel.drain(..delay.min(channel.len()));
            channel.resize(expected, 0.0);
        }
        Ok(output)
    }
}

/// Converts `src` from one format to another, borrowing when they are identical.
pub fn convert(
    src: &[u8],
    from: AudioFormat,
    to: AudioFormat,
) -> Result<Cow<'_, [u8]>, ConversionError> {
    if from == to {
        from.validate()?;
        return Ok(Cow::Borrowed(src));
    }
    Ok(Cow::Owned(Conversion::setup(from, to)?.convert_all(src)?))
}

fn bytes<const N: usize>(src: &[u8], big_endian: bool) -> [u8; N] {
    let mut raw = [0u8; N];
    raw.copy_from_slice(&src[..N]);
    if big_endian != cfg!(target_endian = "big") {
        raw.reverse();
    }
    raw
}

fn store<const N: usize>(mut raw: [u8; N], big_endian: bool, dest: &mut [u8]) {
    if big_endian != cfg!(target_endian = "big") {
        raw.reverse();
    }
    dest[..N].copy_from_slice(&raw);
}

/// Reads one sample as a float in `[-1, 1)`.
#[inline]
pub fn read_sample(src: &[u8], encoding: SampleEncoding) -> f32 {
    let be = encoding.big_endian;
    match (encoding.float, encoding.bits) {
        (true, 32) => f32::from_ne_bytes(bytes::<4>(src, be)),
        (true, 64) => f64::from_ne_bytes(bytes::<8>(src, be)) as f32,
        (false, 8) if encoding.signed => f32::from(src[0] as i8) / 128.0,
        (false, 8) => (f32::from(src[0]) - 128.0) / 128.0,
        (false, 16) => {
            let raw = u16::from_ne_bytes(bytes::<2>(src, be));
            if encoding.signed {
                f32::from(raw as i16) / 32768.0
            } else {
                (f32::from(raw) - 32768.0) / 32768.0
            }
        }
        (false, 32) => {
            let raw = u32::from_ne_bytes(bytes::<4>(src, be));
            let value = if encoding.signed {
                f64::from(raw as i32)
            } else {
                f64::from(raw) - 2_147_483_648.0
            };
            (value / 2_147_483_648.0) as f32
        }
        _ => 0.0,
    }
}

/// Writes one normalized float sample, clipping integer encodings to their range.
#[inline]
pub fn write_sample(value: f32, encoding: SampleEncoding, dest: &mut [u8]) {
    let be = encoding.big_endian;
    if encoding.float {
        match encoding.bits {
            64 => store(f64::from(value).to_ne_bytes(), be, dest),
            _ => store(value.to_ne_bytes(), be, dest),
        }
        return;
    }

    let full = (1i64 << (encoding.bits - 1)) as f64;
    let mut scaled = (f64::from(value) * full).round().clamp(-full, full - 1.0) as i64;
    if !encoding.signed {
        scaled += full as i64;
    }
    match encoding.bits {
        8 => dest[0] = scaled as u8,
        16 => store((scaled as u16).to_ne_bytes(), be, dest),
        32 => store((scaled as u32).to_ne_bytes(), be, dest),
        _ => {}
    }
}

/// Reads one sample at accumulator scale.
#[inline]
pub fn read_accumulator_sample(src: &[u8], encoding: SampleEncoding) -> i32 {
    let be = encoding.big_endian;
    match (encoding.float, encoding.bits) {
        (false, 8) if encoding.signed => i32::from(src[0] as i8) << 8,
        (false, 8) => (i32::from(src[0]) - 128) << 8,
        (false, 16) => {
            let raw = u16::from_ne_bytes(bytes::<2>(src, be));
            if encoding.signed {
                i32::from(raw as i16)
            } else {
                i32::from(raw) - 32768
            }
        }
        (false, 32) => {
            let raw = u32::from_ne_bytes(bytes::<4>(src, be));
            if encoding.signed {
                (raw as i32) >> 16
            } else {
                ((raw ^ 0x8000_0000) as i32) >> 16
            }
        }
        _ => (read_sample(src, encoding) * ACCUMULATOR_SCALE).round() as i32,
    }
}

/// Volume for interleaved sample `index`: even channels take left, odd channels right.
#[inline]
fn channel_volume(index: usize, channels: usize, left: u16, right: u16) -> i32 {
    if channels > 1 && (index % channels) % 2 == 1 {
        i32::from(right)
    } else {
        i32::from(left)
    }
}

/// Converts `src` to accumulator scale and adds it into `dest` with stereo volume.
/// Returns the number of samples mixed.
pub fn convert_and_mix(
    dest: &mut [i32],
    src: &[u8],
    encoding: SampleEncoding,
    channels: usize,
    left: u16,
    right: u16,
) -> usize {
    let ss = encoding.sample_size();
    let samples = dest.len().min(src.len() / ss);
    for (i, (acc, raw)) in dest[..samples]
        .iter_mut()
        .zip(src.chunks_exact(ss))
        .enumerate()
    {
        let sample = read_accumulator_sample(raw, encoding);
        *acc += (sample * channel_volume(i, channels, left, right)) >> 8;
    }
    samples
}

/// Adds accumulator samples from `src` into `dest` with stereo volume.
pub fn mix(dest: &mut [i32], src: &[i32], channels: usize, left: u16, right: u16) {
    for (i, (acc, &sample)) in dest.iter_mut().zip(src).enumerate() {
        *acc += (sample * channel_volume(i, channels, left, right)) >> 8;
    }
}

/// Scales the accumulator in place. A volume of 256 is unity.
pub fn volume_scale(buffer: &mut [i32], volume: u16) {
    if volume == crate::audio::MAX_VOLUME {
        return;
    }
    let volume = i32::from(volume);
    for sample in buffer.iter_mut() {
        *sample = (*sample * volume) >> 8;
    }
}

/// Divides the accumulator by `divisor`. Divisors below 2 leave it untouched.
pub fn divide_accumulator(buffer: &mut [i32], divisor: usize) {
    if divisor < 2 {
        return;
    }
    let divisor = divisor as i32;
    for sample in buffer.iter_mut() {
        *sample /= divisor;
    }
}

/// Clips an accumulator sample and normalizes it to `[-1, 1)`.
#[inline]
pub fn accumulator_to_f32(sample: i32) -> f32 {
    sample.clamp(-32768, 32767) as f32 / ACCUMULATOR_SCALE
}

/// Writes the accumulator to an output buffer in `encoding`. Returns the bytes written.
pub fn convert_accumulator(dest: &mut [u8], src: &[i32], encoding: SampleEncoding) -> usize {
    let ss = encoding.sample_size();
    let samples = src.len().min(dest.len() / ss);
    for (out, &sample) in dest.chunks_exact_mut(ss).zip(&src[..samples]) {
        write_sample(accumulator_to_f32(sample), encoding, out);
    }
    samples * ss
}

/// Splits an interleaved accumulator into per-channel float planes.
pub fn deinterlace(src: &[i32], channels: usize, planes: &mut [Vec<f32>]) {
    let frames = src.len() / channels;
    for (c, plane) in planes.iter_mut().enumerate().take(channels) {
        plane.clear();
        plane.extend(
            src.iter()
                .skip(c)
                .step_by(channels)
                .take(frames)
                .map(|&s| s as f32 / ACCUMULATOR_SCALE),
        );
    }
}

/// Writes per-channel float planes back over an interleaved accumulator.
pub fn interlace(planes: &[Vec<f32>], dest: &mut [i32]) {
    let channels = planes.len();
    if channels == 0 {
        return;
    }
    for (c, plane) in planes.iter().enumerate() {
        for (slot, &value) in dest.iter_mut().skip(c).step_by(channels).zip(plane) {
            *slot = (value * ACCUMULATOR_SCALE).round() as i32;
        }
    }
}
