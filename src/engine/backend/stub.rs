//! Deterministic virtual device backend.
//!
//! Runs the real renderer and capture code on plain threads, paced by a
//! virtual clock that can run faster than real time. Devices can be added or
//! removed at runtime to exercise hot-plug handling. Used by tests and by the
//! CLI's `--stub` mode.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::audio::{InputCapture, OutputRenderer};
use crate::error::PlayerError;
use crate::model::{DeviceDirection, MixerDevice};

use super::{AudioBackend, StreamErrorSink, StreamHandle, StreamInfo, StreamRequest};

#[derive(Debug, Clone)]
pub struct StubConfig {
    /// Virtual-clock multiple of real time
    pub speed: f64,
    pub block_frames: usize,
    pub outputs: Vec<String>,
    pub inputs: Vec<String>,
    /// Rates every stub device accepts; others fall back to the first entry
    pub supported_rates: Vec<u32>,
    /// Peak of the sine fed to input streams
    pub input_amplitude: f32,
    /// Keep every rendered output block for inspection
    pub capture_output: bool,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            block_frames: 256,
            outputs: vec!["Stub Output".to_string()],
            inputs: vec!["Stub Input".to_string()],
            supported_rates: vec![48_000, 44_100, 96_000],
            input_amplitude: 0.5,
            capture_output: false,
        }
    }
}

pub struct StubBackend {
    config: StubConfig,
    devices: Arc<Mutex<Vec<MixerDevice>>>,
    rendered: Arc<Mutex<Vec<f32>>>,
    rendered_frames: Arc<AtomicU64>,
    open_outputs: Arc<AtomicU64>,
}

impl StubBackend {
    pub fn new(config: StubConfig) -> Self {
        let mut devices: Vec<MixerDevice> =
            config.outputs.iter().map(MixerDevice::output).collect();
        devices.extend(config.inputs.iter().map(MixerDevice::input));
        Self {
            config,
            devices: Arc::new(Mutex::new(devices)),
            rendered: Arc::new(Mutex::new(Vec::new())),
            rendered_frames: Arc::new(AtomicU64::new(0)),
            open_outputs: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stub running `speed` times faster than real time.
    pub fn fast(speed: f64) -> Self {
        Self::new(StubConfig {
            speed,
            ..StubConfig::default()
        })
    }

    pub fn add_device(&self, device: MixerDevice) {
        if let Ok(mut devices) = self.devices.lock() {
            devices.push(device);
        }
    }

    /// Unplug a device; streams running on it fail on their next block.
    pub fn remove_device(&self, name: &str) {
        if let Ok(mut devices) = self.devices.lock() {
            devices.retain(|d| d.name != name);
        }
    }

    /// Interleaved output captured so far (requires `capture_output`).
    pub fn rendered(&self) -> Vec<f32> {
        self.rendered.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn rendered_frames(&self) -> u64 {
        self.rendered_frames.load(Ordering::Acquire)
    }

    /// Output streams opened over the backend's lifetime.
    pub fn output_opens(&self) -> u64 {
        self.open_outputs.load(Ordering::Acquire)
    }

    fn resolve(
        &self,
        direction: DeviceDirection,
        device: Option<&str>,
    ) -> Result<String, PlayerError> {
        let devices = self
            .devices
            .lock()
            .map_err(|_| PlayerError::DeviceUnavailable {
                reason: "stub device table poisoned".to_string(),
            })?;
        let found = match device {
            Some(name) => devices
                .iter()
                .find(|d| d.name == name && d.supports(direction)),
            None => devices.iter().find(|d| d.supports(direction)),
        };
        found
            .map(|d| d.name.clone())
            .ok_or_else(|| PlayerError::DeviceUnavailable {
                reason: match device {
                    Some(name) => format!("no {} device named '{}'", direction.as_str(), name),
                    None => format!("no {} device available", direction.as_str()),
                },
            })
    }

    fn rate_for(&self, preferred: u32) -> u32 {
        if self.config.supported_rates.contains(&preferred) {
            preferred
        } else {
            self.config.supported_rates.first().copied().unwrap_or(48_000)
        }
    }

    fn block_period(&self, rate: u32) -> Duration {
        let secs = self.config.block_frames as f64 / rate.max(1) as f64 / self.config.speed.max(0.001);
        Duration::from_secs_f64(secs)
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(StubConfig::default())
    }
}

struct StubStream {
    info: StreamInfo,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StreamHandle for StubStream {
    fn info(&self) -> &StreamInfo {
        &self.info
    }
}

impl Drop for StubStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn device_present(devices: &Mutex<Vec<MixerDevice>>, name: &str, direction: DeviceDirection) -> bool {
    devices
        .lock()
        .map(|d| d.iter().any(|d| d.name == name && d.supports(direction)))
        .unwrap_or(false)
}

fn spawn_device_thread<F>(
    name: &str,
    running: Arc<AtomicBool>,
    period: Duration,
    mut tick: F,
) -> Result<JoinHandle<()>, PlayerError>
where
    F: FnMut() -> bool + Send + 'static,
{
    std::thread::Builder::new()
        .name(format!("stub-{}", name))
        .spawn(move || {
            let mut next = Instant::now();
            while running.load(Ordering::Acquire) {
                if !tick() {
                    break;
                }
                next += period;
                let now = Instant::now();
                if next > now {
                    std::thread::sleep(next - now);
                } else {
                    next = now;
                }
            }
        })
        .map_err(|e| PlayerError::StreamOpenFailed {
            reason: format!("failed to spawn stub device thread: {}", e),
        })
}

impl AudioBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn enumerate(&self) -> Result<Vec<MixerDevice>, PlayerError> {
        self.devices
            .lock()
            .map(|d| d.clone())
            .map_err(|_| PlayerError::DeviceUnavailable {
                reason: "stub device table poisoned".to_string(),
            })
    }

    fn input_config(
        &self,
        device: Option<&str>,
        preferred_rate: u32,
    ) -> Result<StreamInfo, PlayerError> {
        let device = self.resolve(DeviceDirection::Input, device)?;
        Ok(StreamInfo {
            device,
            sample_rate: self.rate_for(preferred_rate),
            channels: 1,
        })
    }

    fn open_output(
        &self,
        request: &StreamRequest,
        mut renderer: OutputRenderer,
        on_error: StreamErrorSink,
    ) -> Result<Box<dyn StreamHandle>, PlayerError> {
        let device = self.resolve(DeviceDirection::Output, request.device.as_deref())?;
        let info = StreamInfo {
            device: device.clone(),
            sample_rate: self.rate_for(request.sample_rate),
            channels: request.channels.max(1),
        };
        let channels = info.channels as usize;
        let mut block = vec![0.0f32; self.config.block_frames * channels];
        let latency_us = (self.config.block_frames as f64 / info.sample_rate as f64 * 1e6) as u32;

        let running = Arc::new(AtomicBool::new(true));
        let devices = Arc::clone(&self.devices);
        let rendered = Arc::clone(&self.rendered);
        let rendered_frames = Arc::clone(&self.rendered_frames);
        let capture_output = self.config.capture_output;
        let name = device.clone();

        let period = self.block_period(info.sample_rate);
        let thread = spawn_device_thread(&device, Arc::clone(&running), period, move || {
            if !device_present(&devices, &name, DeviceDirection::Output) {
                on_error(format!("output device '{}' was removed", name));
                return false;
            }
            renderer.transport().note_latency_us(latency_us);
            renderer.render(&mut block, channels);
            if capture_output {
                if let Ok(mut out) = rendered.lock() {
                    out.extend_from_slice(&block);
                }
            }
            rendered_frames.fetch_add((block.len() / channels) as u64, Ordering::AcqRel);
            true
        })?;

        self.open_outputs.fetch_add(1, Ordering::AcqRel);
        log::debug!("[StubBackend] Output open on '{}' at {} Hz", info.device, info.sample_rate);
        Ok(Box::new(StubStream {
            info,
            running,
            thread: Some(thread),
        }))
    }

    fn open_input(
        &self,
        request: &StreamRequest,
        mut capture: InputCapture,
        on_error: StreamErrorSink,
    ) -> Result<Box<dyn StreamHandle>, PlayerError> {
        let device = self.resolve(DeviceDirection::Input, request.device.as_deref())?;
        let info = StreamInfo {
            device: device.clone(),
            sample_rate: self.rate_for(request.sample_rate),
            channels: 1,
        };
        let rate = info.sample_rate as f32;
        let amplitude = self.config.input_amplitude;
        let mut block = vec![0.0f32; self.config.block_frames];
        let mut phase = 0.0f32;
        let step = 2.0 * std::f32::consts::PI * 440.0 / rate;

        let running = Arc::new(AtomicBool::new(true));
        let devices = Arc::clone(&self.devices);
        let name = device.clone();

        let period = self.block_period(info.sample_rate);
        let thread = spawn_device_thread(&device, Arc::clone(&running), period, move || {
            if !device_present(&devices, &name, DeviceDirection::Input) {
                on_error(format!("input device '{}' was removed", name));
                return false;
            }
            for sample in block.iter_mut() {
                *sample = phase.sin() * amplitude;
                phase = (phase + step) % (2.0 * std::f32::consts::PI);
            }
            capture.process(&block, 1);
            true
        })?;

        log::debug!("[StubBackend] Input open on '{}' at {} Hz", info.device, info.sample_rate);
        Ok(Box::new(StubStream {
            info,
            running,
            thread: Some(thread),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::transport::TransportShared;

    #[test]
    fn test_enumerate_and_remove() {
        let backend = StubBackend::default();
        assert_eq!(backend.enumerate().unwrap().len(), 2);
        backend.remove_device("Stub Input");
        let devices = backend.enumerate().unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].is_output);
        assert!(backend.input_config(None, 48_000).is_err());
    }

    #[test]
    fn test_unsupported_rate_falls_back() {
        let backend = StubBackend::default();
        let info = backend.input_config(None, 22_050).unwrap();
        assert_eq!(info.sample_rate, 48_000);
    }

    #[test]
    fn test_output_stream_runs_and_reports_removal() {
        let backend = StubBackend::fast(50.0);
        let transport = Arc::new(TransportShared::new());
        let (tx, _rx) = rtrb::RingBuffer::new(8);
        let renderer = OutputRenderer::new(transport, tx, 1024);
        let failed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&failed);
        let sink: StreamErrorSink = Arc::new(move |_: String| flag.store(true, Ordering::Release));

        let request = StreamRequest {
            device: None,
            sample_rate: 48_000,
            channels: 2,
        };
        let stream = backend.open_output(&request, renderer, sink).unwrap();
        assert_eq!(stream.info().device, "Stub Output");

        std::thread::sleep(Duration::from_millis(30));
        assert!(backend.rendered_frames() > 0);

        backend.remove_device("Stub Output");
        std::thread::sleep(Duration::from_millis(30));
        assert!(failed.load(Ordering::Acquire));
        drop(stream);
    }
}
