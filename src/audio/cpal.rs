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
    sync::Arc,
    thread::{self, JoinHandle},
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SizedSample, StreamConfig, SupportedBufferSize,
};
use crossbeam_channel::{bounded, Sender};
use tracing::{error, info, span, warn, Level};

use super::{
    convert,
    engine::{Negotiated, OutputDriver, OutputRequest},
    error::MixerError,
    format::{AudioFormat, SampleEncoding},
    mixer::Mixer,
    thread_priority::{callback_thread_priority, configure_audio_thread_priority, rt_audio_enabled},
};

/// An output device as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub host: String,
    pub max_channels: u16,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name, self.max_channels, self.host
        )
    }
}

fn output_error(context: &str, err: impl fmt::Display) -> MixerError {
    MixerError::Output(format!("{}: {}", context, err))
}

/// Lists the output devices of every available host, sorted by name.
pub fn list_devices() -> Result<Vec<DeviceInfo>, MixerError> {
    Ok(list_cpal_devices()?
        .into_iter()
        .map(|(info, _)| info)
        .collect())
}

fn list_cpal_devices() -> Result<Vec<(DeviceInfo, cpal::Device)>, MixerError> {
    // Suppress noisy output here.
    let _shh_stdout = shh::stdout().map_err(|e| output_error("silencing stdout", e))?;
    let _shh_stderr = shh::stderr().map_err(|e| output_error("silencing stderr", e))?;

    let mut devices = Vec::new();
    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(host) => host,
            Err(e) => {
                error!(err = %e, host = host_id.name(), "Unable to open host");
                continue;
            }
        };
        let host_devices = match host.output_devices() {
            Ok(host_devices) => host_devices,
            Err(e) => {
                error!(err = %e, host = host_id.name(), "Unable to list devices for host");
                continue;
            }
        };

        for device in host_devices {
            let Ok(configs) = device.supported_output_configs() else {
                continue;
            };
            let max_channels = configs.map(|c| c.channels()).max().unwrap_or(0);
            if max_channels == 0 {
                continue;
            }
            let Ok(name) = device.name() else {
                continue;
            };
            devices.push((
                DeviceInfo {
                    name,
                    host: host_id.name().to_string(),
                    max_channels,
                },
                device,
            ));
        }
    }

    devices.sort_by(|(a, _), (b, _)| a.name.cmp(&b.name));
    Ok(devices)
}

fn sample_format(encoding: SampleEncoding) -> Option<SampleFormat> {
    Some(match (encoding.float, encoding.bits, encoding.signed) {
        (true, 32, _) => SampleFormat::F32,
        (true, 64, _) => SampleFormat::F64,
        (false, 8, true) => SampleFormat::I8,
        (false, 8, false) => SampleFormat::U8,
        (false, 16, true) => SampleFormat::I16,
        (false, 16, false) => SampleFormat::U16,
        (false, 32, true) => SampleFormat::I32,
        _ => return None,
    })
}

fn sample_encoding(format: SampleFormat) -> Option<SampleEncoding> {
    Some(match format {
        SampleFormat::I8 => SampleEncoding::S8,
        SampleFormat::U8 => SampleEncoding::U8,
        SampleFormat::I16 => SampleEncoding::S16_NATIVE,
        SampleFormat::U16 => SampleEncoding::U16.to_native(),
        SampleFormat::I32 => SampleEncoding::S32.to_native(),
        SampleFormat::F32 => SampleEncoding::F32_NATIVE,
        SampleFormat::F64 => SampleEncoding::F64.to_native(),
        _ => return None,
    })
}

/// Plays the mixer through a cpal output stream.
pub struct Driver {
    device_name: Option<String>,
    device: Option<cpal::Device>,
    config: Option<StreamConfig>,
    sample_format: SampleFormat,
    output: Option<(Sender<()>, JoinHandle<()>)>,
}

impl Driver {
    /// A driver for the named device, or the default output device of the default host.
    pub fn new(device_name: Option<String>) -> Driver {
        Driver {
            device_name,
            device: None,
            config: None,
            sample_format: SampleFormat::I16,
            output: None,
        }
    }

    fn find_device(&self) -> Result<cpal::Device, MixerError> {
        match &self.device_name {
            None => cpal::default_host()
                .default_output_device()
                .ok_or_else(|| MixerError::Output("no default output device".to_string())),
            Some(name) => list_cpal_devices()?
                .into_iter()
                .find(|(info, _)| info.name.trim() == name.trim())
                .map(|(_, device)| device)
                .ok_or_else(|| MixerError::Output(format!("no device found with name {}", name))),
        }
    }
}

impl OutputDriver for Driver {
    fn negotiate(&mut self, request: &OutputRequest) -> Result<Negotiated, MixerError> {
        let device = self.find_device()?;
        let wanted = sample_format(request.encoding);
        let rate = cpal::SampleRate(request.frequency);

        let exact = device
            .supported_output_configs()
            .map_err(|e| output_error("querying output configs", e))?
            .find(|range| {
                u32::from(range.channels()) == u32::from(request.channels)
                    && Some(range.sample_format()) == wanted
                    && range.min_sample_rate() <= rate
                    && rate <= range.max_sample_rate()
            })
            .map(|range| range.with_sample_rate(rate));
        let supported = match exact {
            Some(supported) => supported,
            None => {
                let fallback = device
                    .default_output_config()
                    .map_err(|e| output_error("querying default output config", e))?;
                warn!(
                    requested = %request.format(),
                    channels = fallback.channels(),
                    frequency = fallback.sample_rate().0,
                    sample_format = ?fallback.sample_format(),
                    "Requested format unsupported, using device default"
                );
                fallback
            }
        };

        let encoding = sample_encoding(supported.sample_format()).ok_or_else(|| {
            MixerError::Output(format!(
                "unsupported sample format {:?}",
                supported.sample_format()
            ))
        })?;
        let channels = u8::try_from(supported.channels())
            .map_err(|_| MixerError::Output(format!("{} channels", supported.channels())))?;
        let format = AudioFormat::new(supported.sample_rate().0, encoding, channels)?;
        let frames = OutputRequest {
            frequency: format.frequency,
            ..*request
        }
        .frames();

        let mut config = supported.config();
        config.buffer_size = match supported.buffer_size() {
            SupportedBufferSize::Range { min, max } => {
                cpal::BufferSize::Fixed((frames as u32).max(*min).min(*max))
            }
            SupportedBufferSize::Unknown => cpal::BufferSize::Default,
        };

        self.device = Some(device);
        self.config = Some(config);
        self.sample_format = supported.sample_format();
        Ok(Negotiated { format, frames })
    }

    fn start(&mut self, mixer: Arc<Mixer>) -> Result<(), MixerError> {
        let (Some(device), Some(config)) = (self.device.take(), self.config.clone()) else {
            return Err(MixerError::Output("driver was not negotiated".to_string()));
        };
        let sample_format = self.sample_format;
        let (ready_tx, ready_rx) = bounded::<Result<(), MixerError>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("voxmix-output".to_string())
            .spawn(move || {
                let span = span!(Level::INFO, "output stream");
                let _enter = span.enter();

                let stream = match sample_format {
                    SampleFormat::I8 => build::<i8>(&device, &config, mixer),
                    SampleFormat::U8 => build::<u8>(&device, &config, mixer),
                    SampleFormat::I16 => build::<i16>(&device, &config, mixer),
                    SampleFormat::U16 => build::<u16>(&device, &config, mixer),
                    SampleFormat::I32 => build::<i32>(&device, &config, mixer),
                    SampleFormat::F32 => build::<f32>(&device, &config, mixer),
                    SampleFormat::F64 => build::<f64>(&device, &config, mixer),
                    other => Err(MixerError::Output(format!(
                        "unsupported sample format {:?}",
                        other
                    ))),
                };
                let stream = match stream.and_then(|stream| {
                    stream
                        .play()
                        .map_err(|e| output_error("starting stream", e))
                        .map(|_| stream)
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                info!("Output stream started");
                let _ = ready_tx.send(Ok(()));

                // The stream lives until shutdown is signalled or the driver is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                info!("Output stream stopped");
            })
            .map_err(|e| output_error("spawning output thread", e))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.output = Some((shutdown_tx, handle));
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(MixerError::Output("output thread exited".to_string()))
            }
        }
    }

    fn stop(&mut self) {
        if let Some((shutdown, handle)) = self.output.take() {
            let _ = shutdown.send(());
            if handle.join().is_err() {
                error!("Output thread panicked");
            }
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device_name {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "default output"),
        }
    }
}

/// Builds a stream whose callback mixes straight into the device buffer.
fn build<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mixer: Arc<Mixer>,
) -> Result<cpal::Stream, MixerError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = usize::from(config.channels);
    let mut acc = vec![0i32; mixer.max_frames() * channels];
    let priority = callback_thread_priority();
    let rt_audio = rt_audio_enabled();
    let mut priority_set = false;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
                for chunk in data.chunks_mut(acc.len()) {
                    let acc = &mut acc[..chunk.len()];
                    acc.fill(0);
                    mixer.mix(acc);
                    for (out, &sample) in chunk.iter_mut().zip(acc.iter()) {
                        *out = T::from_sample(convert::accumulator_to_f32(sample));
                    }
                }
            },
            |err| error!(err = %err, "Output stream error"),
            None,
        )
        .map_err(|e| output_error("building stream", e))
}
