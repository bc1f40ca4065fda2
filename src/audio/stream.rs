use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, Stream, StreamConfig, StreamError};
use std::sync::Arc;
use tracing::{debug, info};

use super::{AudioStats, CaptureSink, PlaybackSource};
use crate::config::AudioSection;
use crate::control::AudioIo;
use crate::error::{LooperError, Result};

/// The running input and output streams.
///
/// Keep this on the thread that opened it; some backends do not allow moving
/// streams across threads.
pub struct AudioStreams {
    input: Option<Stream>,
    output: Option<Stream>,
    input_device_name: String,
    output_device_name: String,
    output_channels: u16,
}

/// Negotiated devices and configs, before the callbacks are attached.
pub struct DeviceSelection {
    input_device: Device,
    output_device: Device,
    input_config: StreamConfig,
    output_config: StreamConfig,
    input_device_name: String,
    output_device_name: String,
}

impl DeviceSelection {
    /// Resolve the configured (or default) devices. Input runs at the
    /// configured channel count; output keeps the device's native channel
    /// count. Both run at the configured sample rate and block size.
    pub fn resolve(section: &AudioSection) -> Result<Self> {
        let host = cpal::default_host();

        let input_device = find_device(&host, section.input_device.as_deref(), true)?;
        let output_device = find_device(&host, section.output_device.as_deref(), false)?;

        let output_default = output_device
            .default_output_config()
            .map_err(|e| LooperError::Device(format!("output config: {e}")))?;

        let input_device_name = input_device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string());
        let output_device_name = output_device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string());

        let input_config = StreamConfig {
            channels: section.channels,
            sample_rate: cpal::SampleRate(section.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(section.block_size),
        };

        let output_config = StreamConfig {
            channels: output_default.channels(),
            sample_rate: cpal::SampleRate(section.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(section.block_size),
        };

        debug!(
            input = %input_device_name,
            output = %output_device_name,
            sample_rate = section.sample_rate,
            input_channels = input_config.channels,
            output_channels = output_config.channels,
            block_size = section.block_size,
            "audio devices resolved"
        );

        Ok(Self {
            input_device,
            output_device,
            input_config,
            output_config,
            input_device_name,
            output_device_name,
        })
    }

    pub fn output_channels(&self) -> u16 {
        self.output_config.channels
    }

    pub fn input_channels(&self) -> u16 {
        self.input_config.channels
    }

    pub fn input_device_name(&self) -> &str {
        &self.input_device_name
    }

    pub fn output_device_name(&self) -> &str {
        &self.output_device_name
    }
}

fn find_device(host: &Host, name: Option<&str>, input: bool) -> Result<Device> {
    let kind = if input { "input" } else { "output" };

    match name {
        Some(name) => {
            let mut devices = if input {
                host.input_devices()?
            } else {
                host.output_devices()?
            };
            devices
                .find(|device| device.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| LooperError::Device(format!("{kind} device '{name}' not found")))
        }
        None => {
            let device = if input {
                host.default_input_device()
            } else {
                host.default_output_device()
            };
            device.ok_or_else(|| LooperError::Device(format!("No {kind} device available")))
        }
    }
}

impl AudioStreams {
    /// Build and start both streams. Any failure here is fatal at startup.
    pub fn start(
        selection: DeviceSelection,
        capture: CaptureSink,
        mut playback: PlaybackSource,
        stats: Arc<AudioStats>,
    ) -> Result<Self> {
        let input_stats = Arc::clone(&stats);
        let overrun_sink = capture.clone();
        let input = selection.input_device.build_input_stream(
            &selection.input_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                capture.process(data);
            },
            move |err| match err {
                StreamError::DeviceNotAvailable => input_stats.flag_device_lost(),
                _ => overrun_sink.report_overrun(),
            },
            None,
        )?;

        let output_stats = Arc::clone(&stats);
        let output = selection.output_device.build_output_stream(
            &selection.output_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                playback.process(data);
            },
            move |err| match err {
                StreamError::DeviceNotAvailable => output_stats.flag_device_lost(),
                _ => output_stats.record_output_underrun(),
            },
            None,
        )?;

        output.play()?;
        input.play()?;

        info!(
            "Audio streams started: {} -> {} at {} Hz",
            selection.input_device_name,
            selection.output_device_name,
            selection.input_config.sample_rate.0
        );

        Ok(Self {
            input: Some(input),
            output: Some(output),
            input_device_name: selection.input_device_name,
            output_device_name: selection.output_device_name,
            output_channels: selection.output_config.channels,
        })
    }

    pub fn input_device_name(&self) -> &str {
        &self.input_device_name
    }

    pub fn output_device_name(&self) -> &str {
        &self.output_device_name
    }

    pub fn output_channels(&self) -> u16 {
        self.output_channels
    }
}

impl AudioIo for AudioStreams {
    fn stop_input(&mut self) -> Result<()> {
        let Some(input) = self.input.take() else {
            return Ok(());
        };
        let paused = input.pause();
        drop(input);
        debug!("input stream released");
        paused.map_err(|e| LooperError::Shutdown(format!("pause input: {e}")))
    }

    fn stop_output(&mut self) -> Result<()> {
        let Some(output) = self.output.take() else {
            return Ok(());
        };
        let paused = output.pause();
        drop(output);
        debug!("output stream released");
        paused.map_err(|e| LooperError::Shutdown(format!("pause output: {e}")))
    }
}

impl Drop for AudioStreams {
    fn drop(&mut self) {
        let _ = self.stop_input();
        let _ = self.stop_output();
    }
}

/// Names of all input and output devices on the default host.
pub fn enumerate_device_names() -> Result<(Vec<String>, Vec<String>)> {
    let host = cpal::default_host();

    let inputs = host
        .input_devices()?
        .map(|device| device.name().unwrap_or_else(|_| "Unknown".to_string()))
        .collect();
    let outputs = host
        .output_devices()?
        .map(|device| device.name().unwrap_or_else(|_| "Unknown".to_string()))
        .collect();

    Ok((inputs, outputs))
}
