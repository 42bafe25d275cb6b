//! Recorder
//!
//! Captures the selected input device to a mono 16-bit WAV file alongside
//! playback. `prepare` runs synchronously on the caller's thread so an
//! unusable destination fails immediately; everything after that is driven by
//! the control worker.

mod writer;

pub use writer::{WavFileWriter, WriterHandle};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};

use crate::audio::{BufferPool, InputCapture};
use crate::config::RecorderConfig;
use crate::engine::backend::{AudioBackend, StreamErrorSink, StreamHandle, StreamInfo, StreamRequest};
use crate::error::{ErrorCode, RecorderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum RecorderState {
    Idle = 0,
    Ready = 1,
    Recording = 2,
    Stopped = 3,
    Error = 4,
}

impl RecorderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecorderState::Idle => "IDLE",
            RecorderState::Ready => "READY",
            RecorderState::Recording => "RECORDING",
            RecorderState::Stopped => "STOPPED",
            RecorderState::Error => "ERROR",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => RecorderState::Ready,
            2 => RecorderState::Recording,
            3 => RecorderState::Stopped,
            4 => RecorderState::Error,
            _ => RecorderState::Idle,
        }
    }
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorder state visible to the input callback and the façade.
pub struct RecorderShared {
    state: AtomicU8,
    recording: AtomicBool,
    frames: AtomicU64,
    dropped: AtomicU64,
    level_bits: AtomicU32,
    sample_rate: AtomicU32,
}

impl RecorderShared {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(RecorderState::Idle as u8),
            recording: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            level_bits: AtomicU32::new(0f32.to_bits()),
            sample_rate: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> RecorderState {
        RecorderState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: RecorderState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub(crate) fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::Release);
    }

    #[inline]
    pub fn add_frames(&self, frames: u64) {
        if frames > 0 {
            self.frames.fetch_add(frames, Ordering::Relaxed);
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn add_dropped(&self, frames: u64) {
        if frames > 0 {
            self.dropped.fetch_add(frames, Ordering::Relaxed);
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_level(&self, level: f32) {
        self.level_bits.store(level.to_bits(), Ordering::Relaxed);
    }

    /// Peak of the most recent input callback, 0..1.
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }

    /// Seconds captured so far in the current take.
    pub fn elapsed_secs(&self) -> f64 {
        let rate = self.sample_rate.load(Ordering::Relaxed);
        if rate == 0 {
            0.0
        } else {
            self.frames() as f64 / rate as f64
        }
    }

    fn begin_take(&self, sample_rate: u32) {
        self.frames.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
    }
}

impl Default for RecorderShared {
    fn default() -> Self {
        Self::new()
    }
}

/// A destination that passed validation and already has its WAV header.
pub struct PreparedRecording {
    pub path: PathBuf,
    pub input: StreamInfo,
    writer: WavFileWriter,
}

impl std::fmt::Debug for PreparedRecording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedRecording")
            .field("path", &self.path)
            .field("input", &self.input)
            .finish()
    }
}

/// Validate the destination and input device, and create the file.
///
/// On failure nothing is left on disk that was not there before.
pub fn prepare(
    path: &Path,
    backend: &dyn AudioBackend,
    device: Option<&str>,
    preferred_rate: u32,
) -> Result<PreparedRecording, RecorderError> {
    let display = path.display().to_string();
    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
    if !is_wav {
        return Err(RecorderError::UnsupportedFormat { path: display });
    }

    let input = backend
        .input_config(device, preferred_rate)
        .map_err(|e| RecorderError::DeviceUnavailable { reason: e.message() })?;

    let existed = path.exists();
    let spec = WavSpec {
        channels: 1,
        sample_rate: input.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    match WavWriter::create(path, spec) {
        Ok(writer) => Ok(PreparedRecording {
            path: path.to_path_buf(),
            input,
            writer,
        }),
        Err(err) => {
            if !existed {
                let _ = fs::remove_file(path);
            }
            Err(RecorderError::Io {
                path: display,
                details: err.to_string(),
            })
        }
    }
}

struct Take {
    path: PathBuf,
    input: StreamInfo,
}

/// Control-worker side of the recorder.
pub struct Recorder {
    shared: Arc<RecorderShared>,
    config: RecorderConfig,
    state: RecorderState,
    take: Option<Take>,
    pending_writer: Option<WavFileWriter>,
    writer: Option<WriterHandle>,
    stream: Option<Box<dyn StreamHandle>>,
}

impl Recorder {
    pub fn new(shared: Arc<RecorderShared>, config: RecorderConfig) -> Self {
        Self {
            shared,
            config,
            state: RecorderState::Idle,
            take: None,
            pending_writer: None,
            writer: None,
            stream: None,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn shared(&self) -> &Arc<RecorderShared> {
        &self.shared
    }

    pub fn input_device(&self) -> Option<&str> {
        self.take.as_ref().map(|t| t.input.device.as_str())
    }

    fn set_state(&mut self, state: RecorderState) {
        self.state = state;
        self.shared.set_state(state);
    }

    /// Adopt a prepared destination; READY.
    pub fn accept_prepared(&mut self, prepared: PreparedRecording) -> Result<(), RecorderError> {
        if self.state == RecorderState::Recording {
            return Err(RecorderError::AlreadyRecording);
        }
        self.shared.begin_take(prepared.input.sample_rate);
        self.shared.set_level(0.0);
        self.pending_writer = Some(prepared.writer);
        self.take = Some(Take {
            path: prepared.path,
            input: prepared.input,
        });
        self.set_state(RecorderState::Ready);
        Ok(())
    }

    /// A prepare attempt failed; ERROR until the next successful prepare.
    pub fn reject_prepare(&mut self) {
        if self.state == RecorderState::Recording {
            return;
        }
        self.pending_writer = None;
        self.take = None;
        self.set_state(RecorderState::Error);
    }

    /// READY/STOPPED → RECORDING.
    pub fn start(
        &mut self,
        backend: &dyn AudioBackend,
        on_error: StreamErrorSink,
    ) -> Result<(), RecorderError> {
        let writer = match self.state {
            RecorderState::Recording => return Err(RecorderError::AlreadyRecording),
            RecorderState::Idle | RecorderState::Error => return Err(RecorderError::NotPrepared),
            RecorderState::Ready => self.pending_writer.take(),
            RecorderState::Stopped => None,
        };
        let (path, input) = match self.take.as_ref() {
            Some(take) => (take.path.clone(), take.input.clone()),
            None => return Err(RecorderError::NotPrepared),
        };
        let writer = match writer {
            Some(writer) => writer,
            None => WavWriter::append(&path).map_err(|e| RecorderError::Io {
                path: path.display().to_string(),
                details: e.to_string(),
            })?,
        };

        if let Err(err) = self.open_capture(writer, backend, &input, on_error) {
            self.teardown();
            self.set_state(RecorderState::Error);
            return Err(err);
        }
        self.set_state(RecorderState::Recording);
        log::info!("[Recorder] Recording to {} from '{}'", path.display(), input.device);
        Ok(())
    }

    fn open_capture(
        &mut self,
        writer: WavFileWriter,
        backend: &dyn AudioBackend,
        input: &StreamInfo,
        on_error: StreamErrorSink,
    ) -> Result<(), RecorderError> {
        let pool = BufferPool::new(self.config.buffer_pool_size, self.config.buffer_size);
        let handle = WriterHandle::spawn(
            writer,
            pool.data_consumer,
            pool.pool_producer,
            Duration::from_millis(self.config.writer_idle_ms.max(1)),
        )?;
        self.writer = Some(handle);

        let capture = InputCapture::new(
            Arc::clone(&self.shared),
            pool.pool_consumer,
            pool.data_producer,
        );
        let request = StreamRequest {
            device: Some(input.device.clone()),
            sample_rate: input.sample_rate,
            channels: input.channels,
        };
        self.shared.set_recording(true);
        let stream = backend
            .open_input(&request, capture, on_error)
            .map_err(|e| RecorderError::DeviceUnavailable { reason: e.message() })?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Close the input stream and finalize the file.
    fn close_capture(&mut self) -> Result<u64, RecorderError> {
        self.shared.set_recording(false);
        self.stream = None;
        match self.writer.take() {
            Some(writer) => writer.finish(),
            None => Ok(0),
        }
    }

    fn teardown(&mut self) {
        if let Err(err) = self.close_capture() {
            log::warn!("[Recorder] Finalize during teardown failed: {}", err);
        }
    }

    /// RECORDING → STOPPED.
    pub fn stop(&mut self) -> Result<bool, RecorderError> {
        if self.state != RecorderState::Recording {
            return Ok(false);
        }
        match self.close_capture() {
            Ok(frames) => {
                log::info!("[Recorder] Stopped after {} frames", frames);
                self.set_state(RecorderState::Stopped);
                Ok(true)
            }
            Err(err) => {
                self.set_state(RecorderState::Error);
                Err(err)
            }
        }
    }

    /// Device loss or writer failure; ERROR until re-prepared.
    pub fn fail(&mut self) {
        self.teardown();
        self.pending_writer = None;
        self.set_state(RecorderState::Error);
    }

    /// Writer stopped on its own with an error.
    pub fn poll_failure(&self) -> Option<RecorderError> {
        self.writer.as_ref().and_then(|w| w.failed())
    }

    /// Move an active recording to another input device, keeping the take
    /// and its elapsed time.
    pub fn switch_input(
        &mut self,
        device: Option<&str>,
        backend: &dyn AudioBackend,
        on_error: StreamErrorSink,
    ) -> Result<(), RecorderError> {
        let Some(take) = self.take.as_ref() else {
            return Ok(());
        };
        let current_rate = take.input.sample_rate;
        let path = take.path.clone();
        let next = backend
            .input_config(device, current_rate)
            .map_err(|e| RecorderError::DeviceUnavailable { reason: e.message() })?;
        if next.sample_rate != current_rate {
            return Err(RecorderError::DeviceUnavailable {
                reason: format!(
                    "'{}' cannot capture at {} Hz (offers {} Hz)",
                    next.device, current_rate, next.sample_rate
                ),
            });
        }
        if let Some(take) = self.take.as_mut() {
            take.input = next.clone();
        }
        if self.state != RecorderState::Recording {
            return Ok(());
        }

        self.close_capture()?;
        let writer = WavWriter::append(&path).map_err(|e| RecorderError::Io {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        self.open_capture(writer, backend, &next, on_error)?;
        log::info!("[Recorder] Capture moved to '{}'", next.device);
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.teardown();
        self.pending_writer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::{StubBackend, StubConfig};

    fn backend() -> StubBackend {
        StubBackend::new(StubConfig::default())
    }

    #[test]
    fn test_prepare_rejects_non_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.mp3");
        let err = prepare(&path, &backend(), None, 48_000).unwrap_err();
        assert!(matches!(err, RecorderError::UnsupportedFormat { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_prepare_unwritable_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing_dir").join("take.wav");
        let err = prepare(&path, &backend(), None, 48_000).unwrap_err();
        assert!(matches!(err, RecorderError::Io { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_prepare_unknown_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let err = prepare(&path, &backend(), Some("No Such Mic"), 48_000).unwrap_err();
        assert!(matches!(err, RecorderError::DeviceUnavailable { .. }));
    }

    #[test]
    fn test_start_requires_prepare() {
        let shared = Arc::new(RecorderShared::new());
        let mut recorder = Recorder::new(shared, RecorderConfig::default());
        let sink: StreamErrorSink = Arc::new(|_: String| {});
        let err = recorder.start(&backend(), sink).unwrap_err();
        assert_eq!(err, RecorderError::NotPrepared);
        assert_eq!(recorder.state(), RecorderState::Idle);
    }

    #[test]
    fn test_record_stop_resume_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let backend = StubBackend::new(StubConfig {
            speed: 20.0,
            ..StubConfig::default()
        });
        let shared = Arc::new(RecorderShared::new());
        let mut recorder = Recorder::new(Arc::clone(&shared), RecorderConfig::default());
        let sink: StreamErrorSink = Arc::new(|_: String| {});

        let prepared = prepare(&path, &backend, None, 48_000).unwrap();
        recorder.accept_prepared(prepared).unwrap();
        assert_eq!(shared.state(), RecorderState::Ready);

        recorder.start(&backend, Arc::clone(&sink)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(recorder.stop().unwrap());
        let first = hound::WavReader::open(&path).unwrap().duration();
        assert!(first > 0);

        recorder.start(&backend, sink).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(recorder.stop().unwrap());
        let second = hound::WavReader::open(&path).unwrap().duration();
        assert!(second > first);
        assert!(shared.elapsed_secs() > 0.0);
        assert!(shared.level() > 0.0);
    }
}
