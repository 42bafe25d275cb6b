//! MixPlayer: the thread-safe control surface.
//!
//! Every method validates its input on the caller's thread and enqueues a
//! command for the control worker; no call waits for decoding or device
//! work. Queries read shared atomics and snapshots directly. Events are
//! delivered on the worker thread (`mixplayer-control`).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::config::AppConfig;
use crate::decoder::{DecoderFactory, SymphoniaFactory};
use crate::engine::backend::{AudioBackend, CpalBackend};
use crate::engine::command::Command;
use crate::engine::controller::{Controller, ControllerParts};
use crate::engine::transport::{PlayerState, TransportAction, TransportShared};
use crate::error::{log_player_error, log_recorder_error, PlayerError, RecorderError};
use crate::managers::{DeviceManager, EventCategory, EventHub, ListenerFn, PlayerEvent};
use crate::mixer::TrackPatch;
use crate::model::{DeviceDirection, MixerDeviceList, MixerSession, MixerSettings};
use crate::recorder::{self, RecorderShared, RecorderState};

/// Construction options for [`MixPlayer`].
pub struct PlayerOptions {
    /// Enable the recorder
    pub record: bool,
    /// Enable playback
    pub play: bool,
    pub config: AppConfig,
    pub settings: MixerSettings,
    /// Defaults to the CPAL backend
    pub backend: Option<Arc<dyn AudioBackend>>,
    /// Defaults to the symphonia decoder
    pub decoder: Option<Arc<dyn DecoderFactory>>,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            record: true,
            play: true,
            config: AppConfig::default(),
            settings: MixerSettings::default(),
            backend: None,
            decoder: None,
        }
    }
}

impl PlayerOptions {
    pub fn new(record: bool, play: bool) -> Self {
        Self {
            record,
            play,
            ..Self::default()
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn AudioBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_settings(mut self, settings: MixerSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Output timing as measured on the running stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyInfo {
    pub sample_rate: u32,
    pub buffer_frames: u32,
    pub buffer_latency_ms: f64,
    pub output_latency_ms: f64,
}

struct Worker {
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

pub struct MixPlayer {
    record_enabled: bool,
    play_enabled: bool,
    backend: Arc<dyn AudioBackend>,
    transport: Arc<TransportShared>,
    recorder: Arc<RecorderShared>,
    events: Arc<EventHub>,
    devices: Arc<ArcSwap<MixerDeviceList>>,
    settings: Mutex<MixerSettings>,
    commands: mpsc::UnboundedSender<Command>,
    worker: Mutex<Option<Worker>>,
}

impl MixPlayer {
    /// Create an engine instance and start its control worker.
    pub fn new(options: PlayerOptions) -> Result<Self, PlayerError> {
        options.settings.validate()?;
        let backend: Arc<dyn AudioBackend> = options
            .backend
            .unwrap_or_else(|| Arc::new(CpalBackend::new()));
        let decoder: Arc<dyn DecoderFactory> = options
            .decoder
            .unwrap_or_else(|| Arc::new(SymphoniaFactory));

        let transport = Arc::new(TransportShared::new());
        let recorder = Arc::new(RecorderShared::new());
        let events = Arc::new(EventHub::default());
        let device_manager =
            DeviceManager::new(Duration::from_millis(options.config.audio.device_poll_ms.max(1)));
        let devices = device_manager.shared();
        let (commands, receiver) = mpsc::unbounded_channel();

        let parts = ControllerParts {
            config: options.config,
            settings: options.settings.clone(),
            play_enabled: options.play,
            record_enabled: options.record,
            backend: Arc::clone(&backend),
            decoder,
            transport: Arc::clone(&transport),
            recorder: Arc::clone(&recorder),
            events: Arc::clone(&events),
            devices: device_manager,
            commands: commands.clone(),
        };

        // Spawn a dedicated thread with its own Tokio runtime; callers may
        // not have one (C bridge, CLI)
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("mixplayer-control".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(PlayerError::Io {
                            details: format!("failed to create worker runtime: {}", e),
                        }));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                let controller = Controller::new(parts);
                runtime.block_on(controller.run(receiver));
                runtime.shutdown_timeout(Duration::from_secs(2));
            })
            .map_err(|e| PlayerError::Io {
                details: format!("failed to spawn control worker: {}", e),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = thread.join();
                return Err(err);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(PlayerError::EngineShutDown);
            }
        }

        let thread_id = thread.thread().id();
        log::info!(
            "[MixPlayer] Started (play: {}, record: {}, backend: {})",
            options.play,
            options.record,
            backend.name()
        );

        Ok(Self {
            record_enabled: options.record,
            play_enabled: options.play,
            backend,
            transport,
            recorder,
            events,
            devices,
            settings: Mutex::new(options.settings),
            commands,
            worker: Mutex::new(Some(Worker {
                thread: Some(thread),
                thread_id,
            })),
        })
    }

    fn send(&self, command: Command) -> Result<(), PlayerError> {
        self.commands
            .send(command)
            .map_err(|_| PlayerError::EngineShutDown)
    }

    /// Return `err` to the caller and publish it from the worker.
    fn fail<T>(&self, err: PlayerError, context: &str) -> Result<T, PlayerError> {
        log_player_error(&err, context);
        let _ = self.send(Command::ReportError(err.clone()));
        Err(err)
    }

    fn require_play(&self, operation: &str) -> Result<(), PlayerError> {
        if self.play_enabled {
            Ok(())
        } else {
            self.fail(
                PlayerError::NotEnabled {
                    operation: operation.to_string(),
                },
                operation,
            )
        }
    }

    // ========================================================================
    // SESSION & SETTINGS
    // ========================================================================

    /// Replace the session. Decoding happens on the worker; READY follows
    /// once the new tracks are in place.
    pub fn set_session_json(&self, json: &str) -> Result<(), PlayerError> {
        match MixerSession::from_json(json) {
            Ok(session) => self.set_session(session),
            Err(err) => self.fail(err, "set"),
        }
    }

    pub fn set_session(&self, session: MixerSession) -> Result<(), PlayerError> {
        self.require_play("set")?;
        if let Err(err) = session.validate() {
            return self.fail(err, "set");
        }
        self.send(Command::SetSession(session))
    }

    pub fn set_settings_json(&self, json: &str) -> Result<(), PlayerError> {
        match MixerSettings::from_json(json) {
            Ok(settings) => self.set_settings(settings),
            Err(err) => self.fail(err, "set_settings"),
        }
    }

    pub fn set_settings(&self, settings: MixerSettings) -> Result<(), PlayerError> {
        if let Err(err) = settings.validate() {
            return self.fail(err, "set_settings");
        }
        if let Ok(mut current) = self.settings.lock() {
            *current = settings.clone();
        }
        self.send(Command::ApplySettings(settings))
    }

    pub fn settings(&self) -> MixerSettings {
        self.settings
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    // ========================================================================
    // TRANSPORT
    // ========================================================================

    pub fn play(&self) -> Result<(), PlayerError> {
        self.require_play("play")?;
        self.send(Command::Transport(TransportAction::Play))
    }

    pub fn pause(&self) -> Result<(), PlayerError> {
        self.require_play("pause")?;
        self.send(Command::Transport(TransportAction::Pause))
    }

    pub fn stop(&self) -> Result<(), PlayerError> {
        self.require_play("stop")?;
        self.send(Command::Transport(TransportAction::Stop))
    }

    pub fn toggle_play_pause(&self) -> Result<(), PlayerError> {
        self.require_play("toggle_play_pause")?;
        self.send(Command::Transport(TransportAction::TogglePlayPause))
    }

    /// Jump to `fraction` of the duration, clamped to [0, 1].
    ///
    /// Applied immediately: `current_time()` reflects it on return.
    pub fn seek(&self, fraction: f64) -> Result<(), PlayerError> {
        self.require_play("seek")?;
        match self.transport.seek_fraction(fraction) {
            Ok(_) => Ok(()),
            Err(err) => self.fail(err, "seek"),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.transport.state() == PlayerState::Playing
    }

    pub fn state(&self) -> PlayerState {
        self.transport.state()
    }

    /// Session length in seconds; 0 without a session.
    pub fn duration(&self) -> f64 {
        self.transport.duration_secs()
    }

    pub fn current_time(&self) -> f64 {
        self.transport.position_secs()
    }

    pub fn progress(&self) -> f64 {
        self.transport.progress()
    }

    pub fn set_track_enabled(&self, id: &str, enabled: bool) -> Result<(), PlayerError> {
        self.require_play("set_track_enabled")?;
        self.send(Command::PatchTrack(TrackPatch {
            id: id.to_string(),
            enabled: Some(enabled),
            volume: None,
        }))
    }

    pub fn set_track_volume(&self, id: &str, volume: f32) -> Result<(), PlayerError> {
        self.require_play("set_track_volume")?;
        if !volume.is_finite() || volume < 0.0 {
            return self.fail(
                PlayerError::SessionInvalid {
                    reason: format!("volume must be >= 0, got {}", volume),
                },
                "set_track_volume",
            );
        }
        self.send(Command::PatchTrack(TrackPatch {
            id: id.to_string(),
            enabled: None,
            volume: Some(volume),
        }))
    }

    /// Render the loaded session to a WAV file; `None` uses the session's
    /// `output` path. The result arrives as an export event.
    pub fn export(&self, path: Option<&Path>) -> Result<(), PlayerError> {
        self.require_play("export")?;
        self.send(Command::Export {
            path: path.map(PathBuf::from),
        })
    }

    pub fn latency_info(&self) -> LatencyInfo {
        let sample_rate = self.transport.output_rate();
        let buffer_frames = self.transport.buffer_frames();
        let buffer_latency_ms = if sample_rate > 0 {
            buffer_frames as f64 * 1000.0 / sample_rate as f64
        } else {
            0.0
        };
        LatencyInfo {
            sample_rate,
            buffer_frames,
            buffer_latency_ms,
            output_latency_ms: self.transport.output_latency_us() as f64 / 1000.0,
        }
    }

    /// Samples clamped by the mix bus since creation.
    pub fn clipped_samples(&self) -> u64 {
        self.transport.clipped()
    }

    // ========================================================================
    // RECORDER
    // ========================================================================

    fn fail_recorder<T>(&self, err: RecorderError, context: &str) -> Result<T, RecorderError> {
        log_recorder_error(&err, context);
        let _ = self.send(Command::ReportRecorderError(err.clone()));
        Err(err)
    }

    fn require_record(&self, operation: &str) -> Result<(), RecorderError> {
        if self.record_enabled {
            Ok(())
        } else {
            self.fail_recorder(RecorderError::RecordingDisabled, operation)
        }
    }

    /// Open `path` for recording and validate the input device.
    ///
    /// Runs synchronously so an unwritable path is reported on return; the
    /// recorder state is ERROR in that case and no file is left behind.
    pub fn prepare_recorder(&self, path: impl AsRef<Path>) -> Result<(), RecorderError> {
        self.require_record("prepare_recorder")?;
        if self.recorder.state() == RecorderState::Recording {
            return self.fail_recorder(RecorderError::AlreadyRecording, "prepare_recorder");
        }
        let device = self.devices.load().selected_name(DeviceDirection::Input).map(str::to_string);
        let rate = self.settings().sample_rate;

        match recorder::prepare(path.as_ref(), self.backend.as_ref(), device.as_deref(), rate) {
            Ok(prepared) => {
                // visible to start_recorder before the worker adopts the take
                self.recorder.set_state(RecorderState::Ready);
                self.commands
                    .send(Command::RecorderPrepared(prepared))
                    .map_err(|_| RecorderError::EngineShutDown)
            }
            Err(err) => {
                log_recorder_error(&err, "prepare_recorder");
                self.recorder.set_state(RecorderState::Error);
                let _ = self.commands.send(Command::RecorderPrepareFailed(err.clone()));
                Err(err)
            }
        }
    }

    /// READY/STOPPED → RECORDING. A no-op returning `NotPrepared` until a
    /// prepare has succeeded.
    pub fn start_recorder(&self) -> Result<(), RecorderError> {
        self.require_record("start_recorder")?;
        match self.recorder.state() {
            RecorderState::Idle | RecorderState::Error => {
                self.fail_recorder(RecorderError::NotPrepared, "start_recorder")
            }
            _ => self
                .commands
                .send(Command::StartRecorder)
                .map_err(|_| RecorderError::EngineShutDown),
        }
    }

    pub fn stop_recorder(&self) -> Result<(), RecorderError> {
        self.require_record("stop_recorder")?;
        self.commands
            .send(Command::StopRecorder)
            .map_err(|_| RecorderError::EngineShutDown)
    }

    pub fn recorder_state(&self) -> RecorderState {
        self.recorder.state()
    }

    /// Seconds recorded in the current take.
    pub fn recorder_elapsed(&self) -> f64 {
        self.recorder.elapsed_secs()
    }

    // ========================================================================
    // DEVICES
    // ========================================================================

    pub fn devices(&self) -> MixerDeviceList {
        (*self.devices.load_full()).clone()
    }

    /// Re-enumerate now; a device-list event follows if anything changed.
    pub fn refresh_devices(&self) -> Result<(), PlayerError> {
        self.send(Command::RefreshDevices)
    }

    /// Select one device, clearing the previous selection of its direction.
    pub fn select_device(&self, direction: DeviceDirection, name: &str) -> Result<(), PlayerError> {
        if !self.devices.load().contains(direction, name) {
            return self.fail(
                PlayerError::DeviceSelectionInvalid {
                    reason: format!("no {} device named '{}'", direction.as_str(), name),
                },
                "select_device",
            );
        }
        self.send(Command::SelectDevice {
            direction,
            name: name.to_string(),
        })
    }

    /// Submit a whole device list; only its selection flags are applied.
    pub fn set_devices(&self, list: MixerDeviceList) -> Result<(), PlayerError> {
        if let Err(err) = list.validate() {
            return self.fail(err, "set_devices");
        }
        self.send(Command::ApplyDevices(list))
    }

    pub fn set_devices_json(&self, json: &str) -> Result<(), PlayerError> {
        match MixerDeviceList::from_json(json) {
            Ok(list) => self.set_devices(list),
            Err(err) => self.fail(err, "set_devices"),
        }
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<PlayerState> {
        self.events.subscribe_state()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<f64> {
        self.events.subscribe_progress()
    }

    pub fn subscribe_error(&self) -> broadcast::Receiver<(i32, String)> {
        self.events.subscribe_error()
    }

    pub fn subscribe_recorder_state(&self) -> broadcast::Receiver<RecorderState> {
        self.events.subscribe_recorder_state()
    }

    pub fn subscribe_recorder_progress(&self) -> broadcast::Receiver<f64> {
        self.events.subscribe_recorder_progress()
    }

    pub fn subscribe_recorder_level(&self) -> broadcast::Receiver<f32> {
        self.events.subscribe_recorder_level()
    }

    pub fn subscribe_device_list(&self) -> broadcast::Receiver<MixerDeviceList> {
        self.events.subscribe_device_list()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe_all()
    }

    /// Call `callback` for each event of `filter` (all when `None`).
    pub fn add_listener(&self, filter: Option<EventCategory>, callback: Arc<ListenerFn>) -> u64 {
        self.events.add_listener(filter, callback)
    }

    pub fn remove_listener(&self, id: u64) -> bool {
        self.events.remove_listener(id)
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Stop hardware callbacks and the worker. Idempotent.
    ///
    /// Called from a listener (the worker thread) the worker is told to stop
    /// but not joined.
    pub fn shutdown(&self) {
        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(mut worker) = worker else {
            return;
        };
        let _ = self.commands.send(Command::Shutdown);
        if std::thread::current().id() == worker.thread_id {
            return;
        }
        if let Some(thread) = worker.thread.take() {
            if thread.join().is_err() {
                log::error!("[MixPlayer] Control worker panicked");
            }
        }
        self.events.clear_listeners();
        log::info!("[MixPlayer] Shut down");
    }
}

impl Drop for MixPlayer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
