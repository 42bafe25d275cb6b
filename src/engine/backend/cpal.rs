//! CPAL-based audio backend for desktop platforms (Linux, macOS, Windows).

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};

use crate::audio::{InputCapture, OutputRenderer};
use crate::error::PlayerError;
use crate::model::{DeviceDirection, MixerDevice};

use super::{AudioBackend, StreamErrorSink, StreamHandle, StreamInfo, StreamRequest};

/// Backend on top of the CPAL default host.
#[derive(Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

struct CpalStream {
    info: StreamInfo,
    // Dropping the stream stops its callbacks
    _stream: cpal::Stream,
}

impl StreamHandle for CpalStream {
    fn info(&self) -> &StreamInfo {
        &self.info
    }
}

fn find_device(
    host: &cpal::Host,
    direction: DeviceDirection,
    name: Option<&str>,
) -> Result<cpal::Device, PlayerError> {
    let unavailable = |reason: String| PlayerError::DeviceUnavailable { reason };
    match name {
        None => match direction {
            DeviceDirection::Output => host.default_output_device(),
            DeviceDirection::Input => host.default_input_device(),
        }
        .ok_or_else(|| unavailable(format!("no default {} device", direction.as_str()))),
        Some(name) => {
            let mut devices = match direction {
                DeviceDirection::Output => host.output_devices(),
                DeviceDirection::Input => host.input_devices(),
            }
            .map_err(|e| unavailable(format!("failed to list devices: {}", e)))?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| unavailable(format!("no {} device named '{}'", direction.as_str(), name)))
        }
    }
}

/// Pick a config with the requested channel count and rate, falling back to
/// any config covering the rate and finally to the device default.
fn choose_config(
    device: &cpal::Device,
    direction: DeviceDirection,
    sample_rate: u32,
    channels: u16,
) -> Result<cpal::SupportedStreamConfig, PlayerError> {
    let open_failed = |reason: String| PlayerError::StreamOpenFailed { reason };
    let ranges: Vec<cpal::SupportedStreamConfigRange> = match direction {
        DeviceDirection::Output => device
            .supported_output_configs()
            .map(|c| c.collect())
            .map_err(|e| open_failed(format!("failed to query output configs: {}", e)))?,
        DeviceDirection::Input => device
            .supported_input_configs()
            .map(|c| c.collect())
            .map_err(|e| open_failed(format!("failed to query input configs: {}", e)))?,
    };

    let covers = |r: &cpal::SupportedStreamConfigRange| {
        r.min_sample_rate().0 <= sample_rate && sample_rate <= r.max_sample_rate().0
    };
    let pick = ranges
        .iter()
        .find(|&r| covers(r) && r.channels() == channels && r.sample_format() == SampleFormat::F32)
        .or_else(|| ranges.iter().find(|&r| covers(r) && r.channels() == channels))
        .or_else(|| ranges.iter().find(|&r| covers(r)));
    if let Some(range) = pick {
        return Ok(range.clone().with_sample_rate(cpal::SampleRate(sample_rate)));
    }

    match direction {
        DeviceDirection::Output => device.default_output_config(),
        DeviceDirection::Input => device.default_input_config(),
    }
    .map_err(|e| open_failed(format!("failed to get default config: {}", e)))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: OutputRenderer,
    on_error: StreamErrorSink,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    device.build_output_stream(
        config,
        move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
            let ts = info.timestamp();
            if let Some(latency) = ts.playback.duration_since(&ts.callback) {
                renderer.transport().note_latency_us(latency.as_micros() as u32);
            }
            renderer.render_converted(data, channels);
        },
        move |err| on_error(err.to_string()),
        None,
    )
}

fn build_output_f32(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: OutputRenderer,
    on_error: StreamErrorSink,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let channels = config.channels as usize;
    device.build_output_stream(
        config,
        move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
            let ts = info.timestamp();
            if let Some(latency) = ts.playback.duration_since(&ts.callback) {
                renderer.transport().note_latency_us(latency.as_micros() as u32);
            }
            renderer.render(data, channels);
        },
        move |err| on_error(err.to_string()),
        None,
    )
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut capture: InputCapture,
    on_error: StreamErrorSink,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| capture.process(data, channels),
        move |err| on_error(err.to_string()),
        None,
    )
}

fn device_name(device: &cpal::Device, fallback: Option<&str>) -> String {
    device
        .name()
        .ok()
        .or_else(|| fallback.map(str::to_string))
        .unwrap_or_else(|| "default".to_string())
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn enumerate(&self) -> Result<Vec<MixerDevice>, PlayerError> {
        let host = cpal::default_host();
        let mut devices = Vec::new();

        let outputs = host.output_devices().map_err(|e| PlayerError::DeviceUnavailable {
            reason: format!("failed to list output devices: {}", e),
        })?;
        for device in outputs {
            match device.name() {
                Ok(name) => devices.push(MixerDevice::output(name)),
                Err(e) => log::warn!("[CpalBackend] Skipping unnamed output device: {}", e),
            }
        }

        let inputs = host.input_devices().map_err(|e| PlayerError::DeviceUnavailable {
            reason: format!("failed to list input devices: {}", e),
        })?;
        for device in inputs {
            match device.name() {
                Ok(name) => devices.push(MixerDevice::input(name)),
                Err(e) => log::warn!("[CpalBackend] Skipping unnamed input device: {}", e),
            }
        }

        Ok(devices)
    }

    fn input_config(
        &self,
        device: Option<&str>,
        preferred_rate: u32,
    ) -> Result<StreamInfo, PlayerError> {
        let host = cpal::default_host();
        let dev = find_device(&host, DeviceDirection::Input, device)?;
        let config = choose_config(&dev, DeviceDirection::Input, preferred_rate, 1)
            .map_err(|e| PlayerError::DeviceUnavailable { reason: e.to_string() })?;
        Ok(StreamInfo {
            device: device_name(&dev, device),
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        })
    }

    fn open_output(
        &self,
        request: &StreamRequest,
        renderer: OutputRenderer,
        on_error: StreamErrorSink,
    ) -> Result<Box<dyn StreamHandle>, PlayerError> {
        let host = cpal::default_host();
        let device = find_device(&host, DeviceDirection::Output, request.device.as_deref())?;
        let supported = choose_config(
            &device,
            DeviceDirection::Output,
            request.sample_rate,
            request.channels,
        )?;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let stream = match format {
            SampleFormat::F32 => build_output_f32(&device, &config, renderer, on_error),
            SampleFormat::I16 => build_output::<i16>(&device, &config, renderer, on_error),
            SampleFormat::U16 => build_output::<u16>(&device, &config, renderer, on_error),
            SampleFormat::I32 => build_output::<i32>(&device, &config, renderer, on_error),
            other => {
                return Err(PlayerError::StreamOpenFailed {
                    reason: format!("unsupported output sample format {:?}", other),
                })
            }
        }
        .map_err(|e| PlayerError::StreamOpenFailed {
            reason: format!("failed to build output stream: {}", e),
        })?;

        stream.play().map_err(|e| PlayerError::StreamOpenFailed {
            reason: format!("failed to start output stream: {}", e),
        })?;

        let info = StreamInfo {
            device: device_name(&device, request.device.as_deref()),
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };
        log::info!(
            "[CpalBackend] Output '{}' running at {} Hz, {} ch, {:?}",
            info.device,
            info.sample_rate,
            info.channels,
            format
        );
        Ok(Box::new(CpalStream {
            info,
            _stream: stream,
        }))
    }

    fn open_input(
        &self,
        request: &StreamRequest,
        capture: InputCapture,
        on_error: StreamErrorSink,
    ) -> Result<Box<dyn StreamHandle>, PlayerError> {
        let host = cpal::default_host();
        let device = find_device(&host, DeviceDirection::Input, request.device.as_deref())?;
        let supported = choose_config(
            &device,
            DeviceDirection::Input,
            request.sample_rate,
            request.channels,
        )?;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let stream = match format {
            SampleFormat::F32 => build_input::<f32>(&device, &config, capture, on_error),
            SampleFormat::I16 => build_input::<i16>(&device, &config, capture, on_error),
            SampleFormat::U16 => build_input::<u16>(&device, &config, capture, on_error),
            SampleFormat::I32 => build_input::<i32>(&device, &config, capture, on_error),
            other => {
                return Err(PlayerError::StreamOpenFailed {
                    reason: format!("unsupported input sample format {:?}", other),
                })
            }
        }
        .map_err(|e| PlayerError::StreamOpenFailed {
            reason: format!("failed to build input stream: {}", e),
        })?;

        stream.play().map_err(|e| PlayerError::StreamOpenFailed {
            reason: format!("failed to start input stream: {}", e),
        })?;

        let info = StreamInfo {
            device: device_name(&device, request.device.as_deref()),
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };
        log::info!(
            "[CpalBackend] Input '{}' running at {} Hz, {} ch",
            info.device,
            info.sample_rate,
            info.channels
        );
        Ok(Box::new(CpalStream {
            info,
            _stream: stream,
        }))
    }
}
