//! Control worker.
//!
//! Every state transition of the engine happens here, on one thread, in the
//! order commands arrive. The façade validates input and enqueues commands;
//! audio callbacks report back through a lock-free queue that is drained on
//! each housekeeping tick. All events reach subscribers from this thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rtrb::{Consumer, RingBuffer};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::audio::{OutputRenderer, RtEvent};
use crate::config::AppConfig;
use crate::decoder::{prebuffer, DecoderFactory};
use crate::engine::backend::{AudioBackend, StreamErrorSink, StreamHandle, StreamInfo, StreamRequest};
use crate::engine::command::{Command, LoadOutcome, LoadPurpose};
use crate::engine::transport::{transition, PlayerState, TransportAction, TransportShared, Transition};
use crate::error::{ErrorCode, PlayerError, RecorderError};
use crate::export;
use crate::managers::{DeviceManager, EventHub, PlayerEvent, SelectionChange};
use crate::mixer::{secs_to_frames, MixSnapshot, ScheduledTrack, TrackPatch};
use crate::model::{DeviceDirection, MixerDeviceList, MixerSession, MixerSettings};
use crate::recorder::{PreparedRecording, Recorder, RecorderShared, RecorderState};

/// Everything the worker needs, built on the caller's thread.
pub(crate) struct ControllerParts {
    pub config: AppConfig,
    pub settings: MixerSettings,
    pub play_enabled: bool,
    pub record_enabled: bool,
    pub backend: Arc<dyn AudioBackend>,
    pub decoder: Arc<dyn DecoderFactory>,
    pub transport: Arc<TransportShared>,
    pub recorder: Arc<RecorderShared>,
    pub events: Arc<EventHub>,
    pub devices: DeviceManager,
    pub commands: UnboundedSender<Command>,
}

struct PendingLoad {
    epoch: u64,
    session: MixerSession,
    purpose: LoadPurpose,
    play_requested: bool,
}

struct OutputStream {
    id: u64,
    handle: Box<dyn StreamHandle>,
    events: Consumer<RtEvent>,
}

pub(crate) struct Controller {
    config: AppConfig,
    settings: MixerSettings,
    play_enabled: bool,
    record_enabled: bool,
    backend: Arc<dyn AudioBackend>,
    decoder: Arc<dyn DecoderFactory>,
    transport: Arc<TransportShared>,
    events: Arc<EventHub>,
    devices: DeviceManager,
    commands: UnboundedSender<Command>,
    recorder: Recorder,

    state: PlayerState,
    recorder_published: RecorderState,
    session: Option<MixerSession>,
    pending: Option<PendingLoad>,
    output: Option<OutputStream>,
    input_stream: u64,
    next_stream: u64,
    epoch: u64,
    generation: u64,
    exporting: bool,
    last_progress: Instant,
    last_recorder_progress: Instant,
}

impl Controller {
    pub(crate) fn new(parts: ControllerParts) -> Self {
        let recorder = Recorder::new(Arc::clone(&parts.recorder), parts.config.recorder.clone());
        let now = Instant::now();
        Self {
            config: parts.config,
            settings: parts.settings,
            play_enabled: parts.play_enabled,
            record_enabled: parts.record_enabled,
            backend: parts.backend,
            decoder: parts.decoder,
            transport: parts.transport,
            events: parts.events,
            devices: parts.devices,
            commands: parts.commands,
            recorder,
            state: PlayerState::Idle,
            recorder_published: RecorderState::Idle,
            session: None,
            pending: None,
            output: None,
            input_stream: 0,
            next_stream: 1,
            epoch: 0,
            generation: 0,
            exporting: false,
            last_progress: now,
            last_recorder_progress: now,
        }
    }

    /// Worker entry point: process commands until shutdown.
    pub(crate) async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        self.startup();

        let tick_ms = self.config.audio.worker_tick_ms.max(1);
        let mut tick = tokio::time::interval(Duration::from_millis(tick_ms));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = tick.tick() => self.on_tick(),
            }
        }

        self.shutdown();
    }

    fn startup(&mut self) {
        self.refresh_devices();
        if self.play_enabled {
            if let Err(err) = self.open_output() {
                // Retried on the next set/play
                self.report(&err, "startup");
            }
        }
        info!(
            backend = self.backend.name(),
            play = self.play_enabled,
            record = self.record_enabled,
            "control worker started"
        );
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::SetSession(session) => self.set_session(session),
            Command::SessionLoaded(outcome) => self.session_loaded(outcome),
            Command::ApplySettings(settings) => self.apply_settings(settings),
            Command::Transport(action) => self.transport_action(action),
            Command::PatchTrack(patch) => self.patch_track(patch),
            Command::RecorderPrepared(prepared) => self.recorder_prepared(prepared),
            Command::RecorderPrepareFailed(err) => {
                self.recorder.reject_prepare();
                self.report(&err, "prepare_recorder");
                self.sync_recorder_state();
            }
            Command::StartRecorder => self.start_recorder(),
            Command::StopRecorder => self.stop_recorder(),
            Command::ApplyDevices(list) => {
                let result = self.devices.apply(&list);
                self.devices_changed(result);
            }
            Command::SelectDevice { direction, name } => {
                let result = self.devices.select(direction, &name);
                self.devices_changed(result);
            }
            Command::RefreshDevices => self.refresh_devices(),
            Command::DeviceFault {
                direction,
                stream,
                reason,
            } => self.device_fault(direction, stream, reason),
            Command::Export { path } => self.export(path),
            Command::ExportFinished { path, result } => self.export_finished(path, result),
            Command::ReportError(err) => self.report(&err, "request"),
            Command::ReportRecorderError(err) => self.report(&err, "recorder request"),
            Command::Shutdown => {}
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    fn report<E: ErrorCode + std::fmt::Display>(&self, err: &E, context: &str) {
        warn!(code = err.code(), context, "{}", err);
        self.events.publish(PlayerEvent::Error {
            code: err.code(),
            message: err.message(),
        });
    }

    /// Move the transport to `next`, publishing one event per change.
    fn enter(&mut self, next: PlayerState, always_emit: bool) {
        if next == self.state && !always_emit {
            return;
        }
        debug!(from = %self.state, to = %next, "transport state");
        self.state = next;
        self.transport.set_state(next);
        if next == PlayerState::Playing {
            self.last_progress = Instant::now();
        }
        self.events.publish(PlayerEvent::State(next));
    }

    fn sync_recorder_state(&mut self) {
        let state = self.recorder.state();
        if state == self.recorder_published {
            return;
        }
        self.recorder_published = state;
        if state == RecorderState::Recording {
            self.last_recorder_progress = Instant::now();
        }
        self.events.publish(PlayerEvent::RecorderState(state));
    }

    fn on_tick(&mut self) {
        self.drain_rt_events();
        self.transport.snapshot.reclaim(self.output.is_none());

        let now = Instant::now();
        let interval = Duration::from_secs_f64(self.settings.progress_update_interval);
        if self.state == PlayerState::Playing && now.duration_since(self.last_progress) >= interval {
            self.last_progress = now;
            self.events
                .publish(PlayerEvent::Progress(self.transport.progress()));
        }

        if self.recorder.state() == RecorderState::Recording {
            if let Some(err) = self.recorder.poll_failure() {
                self.recorder.fail();
                self.report(&err, "recorder writer");
                self.sync_recorder_state();
            } else if now.duration_since(self.last_recorder_progress) >= interval {
                self.last_recorder_progress = now;
                let shared = self.recorder.shared();
                self.events
                    .publish(PlayerEvent::RecorderProgress(shared.elapsed_secs()));
                self.events.publish(PlayerEvent::RecorderLevel(shared.level()));
            }
        }

        if self.devices.poll_due(now) {
            self.refresh_devices();
        }
    }

    fn drain_rt_events(&mut self) {
        let Some(output) = self.output.as_mut() else {
            return;
        };
        let mut drained = Vec::new();
        while let Ok(event) = output.events.pop() {
            drained.push(event);
        }
        for event in drained {
            match event {
                RtEvent::Completed { session } => self.completed(session),
                RtEvent::RenderFault => self.report(
                    &PlayerError::StreamFailure {
                        reason: "render callback panicked; block replaced by silence".to_string(),
                    },
                    "render",
                ),
            }
        }
    }

    // ------------------------------------------------------------------
    // Output stream
    // ------------------------------------------------------------------

    fn next_stream_id(&mut self) -> u64 {
        let id = self.next_stream;
        self.next_stream += 1;
        id
    }

    fn fault_sink(&self, direction: DeviceDirection, stream: u64) -> StreamErrorSink {
        let commands = self.commands.clone();
        Arc::new(move |reason: String| {
            let _ = commands.send(Command::DeviceFault {
                direction,
                stream,
                reason,
            });
        })
    }

    /// Rate sessions are decoded at: the open stream's, else the settings'.
    fn engine_rate(&self) -> u32 {
        self.output
            .as_ref()
            .map(|o| o.handle.info().sample_rate)
            .unwrap_or(self.settings.sample_rate)
    }

    fn output_channels(&self) -> u16 {
        self.output
            .as_ref()
            .map(|o| o.handle.info().channels)
            .unwrap_or(self.config.audio.output_channels)
    }

    fn close_output(&mut self) {
        self.drain_rt_events();
        if let Some(output) = self.output.take() {
            debug!(device = %output.handle.info().device, "closing output stream");
        }
    }

    fn open_output(&mut self) -> Result<StreamInfo, PlayerError> {
        self.close_output();
        let id = self.next_stream_id();
        let (producer, consumer) = RingBuffer::new(self.config.audio.rt_event_capacity.max(4));
        let renderer = OutputRenderer::new(
            Arc::clone(&self.transport),
            producer,
            self.config.audio.render_scratch_samples,
        );
        let request = StreamRequest {
            device: self.devices.selected_name(DeviceDirection::Output),
            sample_rate: self.settings.sample_rate,
            channels: self.config.audio.output_channels,
        };
        let sink = self.fault_sink(DeviceDirection::Output, id);
        let handle = self.backend.open_output(&request, renderer, sink)?;
        let info = handle.info().clone();
        self.transport.set_output_rate(info.sample_rate);
        info!(
            device = %info.device,
            rate = info.sample_rate,
            channels = info.channels,
            "output stream open"
        );
        self.output = Some(OutputStream {
            id,
            handle,
            events: consumer,
        });
        Ok(info)
    }

    /// Open the output if it is not running; on failure the transport goes
    /// to ERROR.
    fn ensure_output(&mut self) -> bool {
        if !self.play_enabled || self.output.is_some() {
            return self.output.is_some();
        }
        match self.open_output() {
            Ok(_) => true,
            Err(err) => {
                self.report(&err, "open output");
                self.transport.set_playing(false);
                self.enter(PlayerState::Error, false);
                false
            }
        }
    }

    /// Close and reopen the output, keeping position and play state.
    fn reopen_output(&mut self) {
        let was_playing = self.transport.is_playing();
        self.transport.set_playing(false);
        match self.open_output() {
            Ok(info) => {
                let snapshot = self.transport.snapshot.current();
                if snapshot.is_loaded() && snapshot.sample_rate != info.sample_rate {
                    self.reload();
                } else if was_playing {
                    self.transport.set_playing(true);
                }
            }
            Err(err) => {
                self.report(&err, "reopen output");
                self.enter(PlayerState::Error, false);
            }
        }
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    fn set_session(&mut self, session: MixerSession) {
        if !self.play_enabled {
            self.report(
                &PlayerError::NotEnabled {
                    operation: "set".to_string(),
                },
                "set",
            );
            return;
        }
        if self.output.is_none() {
            if let Err(err) = self.open_output() {
                // Decode at the settings rate; play reports the device error
                self.report(&err, "open output");
            }
        }
        self.start_load(session, LoadPurpose::NewSession, false);
    }

    /// Re-decode the current session at the engine rate.
    fn reload(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.start_load(pending.session, pending.purpose, pending.play_requested);
            return;
        }
        let Some(session) = self.session.clone() else {
            return;
        };
        let purpose = LoadPurpose::Reload {
            resume_secs: self.transport.position_secs(),
        };
        self.start_load(session, purpose, false);
    }

    fn start_load(&mut self, session: MixerSession, purpose: LoadPurpose, play_requested: bool) {
        self.epoch += 1;
        let epoch = self.epoch;
        let rate = self.engine_rate();
        self.pending = Some(PendingLoad {
            epoch,
            session: session.clone(),
            purpose,
            play_requested,
        });
        info!(epoch, rate, tracks = session.tracks.len(), "loading session");

        let decoder = Arc::clone(&self.decoder);
        let config = self.config.decoder.clone();
        let commands = self.commands.clone();
        tokio::task::spawn_blocking(move || {
            let mut tracks = Vec::with_capacity(session.tracks.len());
            let mut errors = Vec::new();
            for track in &session.tracks {
                let source = match prebuffer(decoder.as_ref(), track, rate, &config) {
                    Ok(source) => Some(Arc::new(source)),
                    Err(err) => {
                        errors.push(err.for_track(track));
                        None
                    }
                };
                tracks.push(ScheduledTrack::new(track, source, rate));
            }
            let _ = commands.send(Command::SessionLoaded(LoadOutcome {
                epoch,
                purpose,
                session,
                sample_rate: rate,
                tracks,
                errors,
            }));
        });
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn session_loaded(&mut self, outcome: LoadOutcome) {
        if outcome.epoch != self.epoch {
            debug!(epoch = outcome.epoch, current = self.epoch, "dropping stale load");
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        if outcome.sample_rate != self.engine_rate() {
            // Output rate moved while decoding
            self.start_load(outcome.session, outcome.purpose, pending.play_requested);
            return;
        }

        for err in &outcome.errors {
            self.report(err, "decode");
        }

        let resolvable = outcome.tracks.iter().any(|t| t.source.is_some());
        let generation = self.next_generation();
        let snapshot = MixSnapshot::from_tracks(
            generation,
            outcome.sample_rate,
            outcome.session.fixed_duration(),
            outcome.tracks,
        )
        .with_session(outcome.epoch);

        if !resolvable || snapshot.total_frames == 0 {
            let err = PlayerError::SessionInvalid {
                reason: if resolvable {
                    "session has zero duration".to_string()
                } else {
                    "no resolvable tracks".to_string()
                },
            };
            self.report(&err, "set");
            // Nothing left to play; the caller has to set a new session
            self.transport.set_playing(false);
            let generation = self.next_generation();
            self.transport.snapshot.publish(MixSnapshot {
                generation,
                ..MixSnapshot::empty()
            });
            self.transport.set_position(0);
            self.session = None;
            self.enter(PlayerState::Error, false);
            return;
        }

        match outcome.purpose {
            LoadPurpose::NewSession => {
                self.transport.set_playing(false);
                self.transport.snapshot.publish(snapshot);
                self.transport.set_position(0);
                self.session = Some(outcome.session);
                info!(
                    epoch = outcome.epoch,
                    duration = self.transport.duration_secs(),
                    "session ready"
                );
                self.enter(PlayerState::Ready, true);
                if pending.play_requested {
                    self.transport_action(TransportAction::Play);
                }
            }
            LoadPurpose::Reload { resume_secs } => {
                let resume = secs_to_frames(resume_secs, snapshot.sample_rate).min(snapshot.total_frames);
                self.transport.set_playing(false);
                self.transport.snapshot.publish(snapshot);
                self.transport.set_position(resume);
                self.session = Some(outcome.session);
                info!(epoch = outcome.epoch, resume_secs, "session reloaded");
                if self.state == PlayerState::Playing {
                    self.transport.set_playing(true);
                }
            }
        }
    }

    fn patch_track(&mut self, patch: TrackPatch) {
        let current = self.transport.snapshot.current();
        if !current.is_loaded() {
            self.report(
                &PlayerError::NoSession {
                    operation: "patch track".to_string(),
                },
                "patch",
            );
            return;
        }
        let generation = self.next_generation();
        let Some(next) = current.patched(&patch, generation) else {
            self.report(
                &PlayerError::SessionInvalid {
                    reason: format!("no track with id '{}'", patch.id),
                },
                "patch",
            );
            return;
        };
        self.transport.snapshot.publish(next);

        // Keep the model in step so a reload preserves the patch
        if let Some(track) = self
            .session
            .as_mut()
            .and_then(|s| s.tracks.iter_mut().find(|t| t.id == patch.id))
        {
            if let Some(enabled) = patch.enabled {
                track.enabled = enabled;
            }
            if let Some(volume) = patch.volume {
                track.volume = volume.max(0.0);
            }
        }
        debug!(id = %patch.id, enabled = ?patch.enabled, volume = ?patch.volume, "track patched");
    }

    fn apply_settings(&mut self, mut settings: MixerSettings) {
        let rate_changed = settings.sample_rate != self.settings.sample_rate;
        if rate_changed && self.recorder.state() == RecorderState::Recording {
            self.report(
                &PlayerError::Busy {
                    reason: "sample rate cannot change while recording".to_string(),
                },
                "set_settings",
            );
            settings.sample_rate = self.settings.sample_rate;
        }
        let rate_changed = settings.sample_rate != self.settings.sample_rate;
        self.settings = settings;
        info!(
            rate = self.settings.sample_rate,
            interval = self.settings.progress_update_interval,
            looping = self.settings.looping,
            "settings applied"
        );

        if !rate_changed {
            return;
        }
        if self.output.is_some() {
            self.reopen_output();
        } else {
            let snapshot = self.transport.snapshot.current();
            if self.pending.is_some()
                || (snapshot.is_loaded() && snapshot.sample_rate != self.engine_rate())
            {
                self.reload();
            }
        }
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    fn transport_action(&mut self, action: TransportAction) {
        let action = match action {
            TransportAction::TogglePlayPause => {
                let playing = self.state == PlayerState::Playing
                    || self.pending.as_ref().map_or(false, |p| p.play_requested);
                if playing {
                    TransportAction::Pause
                } else {
                    TransportAction::Play
                }
            }
            other => other,
        };

        if let Some(pending) = self.pending.as_mut() {
            if pending.purpose == LoadPurpose::NewSession {
                match action {
                    TransportAction::Play => {
                        pending.play_requested = true;
                        return;
                    }
                    _ => pending.play_requested = false,
                }
            }
        }

        if action == TransportAction::Play && self.exporting {
            self.report(
                &PlayerError::Busy {
                    reason: "export in progress".to_string(),
                },
                "play",
            );
            return;
        }

        match transition(self.state, action) {
            Transition::Ignore => {}
            Transition::Reject(err) => self.report(&err, "transport"),
            Transition::Move(PlayerState::Playing) => self.begin_playing(),
            Transition::Move(PlayerState::Paused) => {
                self.transport.set_playing(false);
                self.enter(PlayerState::Paused, false);
            }
            Transition::Move(PlayerState::Stopped) => {
                self.transport.set_playing(false);
                self.transport.set_position(0);
                self.transport.snapshot.current().reset_holds();
                self.enter(PlayerState::Stopped, false);
            }
            Transition::Move(other) => self.enter(other, false),
        }
    }

    fn begin_playing(&mut self) {
        if !self.transport.snapshot.current().is_loaded() {
            self.report(
                &PlayerError::NoSession {
                    operation: "play".to_string(),
                },
                "transport",
            );
            return;
        }
        if !self.ensure_output() {
            return;
        }
        let snapshot = self.transport.snapshot.current();
        if self.transport.position() >= snapshot.total_frames {
            self.transport.set_position(0);
            snapshot.reset_holds();
        }
        // A reload in flight resumes playback itself
        let reloading = matches!(
            self.pending.as_ref().map(|p| p.purpose),
            Some(LoadPurpose::Reload { .. })
        );
        if !reloading {
            self.transport.set_playing(true);
        }
        self.enter(PlayerState::Playing, false);
    }

    fn completed(&mut self, session: u64) {
        let current = self.transport.snapshot.current();
        if session != current.session || self.state != PlayerState::Playing {
            return;
        }
        self.events.publish(PlayerEvent::Progress(1.0));
        self.enter(PlayerState::Completed, false);

        if self.settings.looping && self.recorder.state() != RecorderState::Recording {
            self.transport.set_position(0);
            current.reset_holds();
            self.transport.set_playing(true);
            self.enter(PlayerState::Playing, false);
        }
    }

    // ------------------------------------------------------------------
    // Recorder
    // ------------------------------------------------------------------

    fn recorder_prepared(&mut self, prepared: PreparedRecording) {
        match self.recorder.accept_prepared(prepared) {
            Ok(()) => info!(
                device = self.recorder.input_device().unwrap_or("default"),
                "recorder ready"
            ),
            Err(err) => self.report(&err, "prepare_recorder"),
        }
        self.sync_recorder_state();
    }

    fn start_recorder(&mut self) {
        let stream = self.next_stream_id();
        let sink = self.fault_sink(DeviceDirection::Input, stream);
        match self.recorder.start(self.backend.as_ref(), sink) {
            Ok(()) => {
                self.input_stream = stream;
                self.sync_recorder_state();
                if self.settings.rec_bg_playback {
                    self.transport_action(TransportAction::Play);
                }
            }
            Err(RecorderError::AlreadyRecording) => {}
            Err(err) => {
                self.report(&err, "start_recorder");
                self.sync_recorder_state();
            }
        }
    }

    fn stop_recorder(&mut self) {
        match self.recorder.stop() {
            Ok(true) => {
                let elapsed = self.recorder.shared().elapsed_secs();
                self.events.publish(PlayerEvent::RecorderProgress(elapsed));
                self.sync_recorder_state();
            }
            Ok(false) => {}
            Err(err) => {
                self.report(&err, "stop_recorder");
                self.sync_recorder_state();
            }
        }
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    fn refresh_devices(&mut self) {
        match self.devices.refresh(self.backend.as_ref()) {
            Ok(Some(list)) => self.events.publish(PlayerEvent::DeviceList(list)),
            Ok(None) => {}
            Err(err) => self.report(&err, "enumerate devices"),
        }
    }

    fn devices_changed(&mut self, result: Result<SelectionChange, PlayerError>) {
        let change = match result {
            Ok(change) => change,
            Err(err) => {
                self.report(&err, "select device");
                return;
            }
        };
        let list: MixerDeviceList = (*self.devices.current()).clone();
        self.events.publish(PlayerEvent::DeviceList(list));
        if !change.any() {
            return;
        }

        if change.output && self.play_enabled && self.output.is_some() {
            self.reopen_output();
        }

        if change.input && self.record_enabled && self.recorder.state() != RecorderState::Idle {
            let device = self.devices.selected_name(DeviceDirection::Input);
            let stream = self.next_stream_id();
            let sink = self.fault_sink(DeviceDirection::Input, stream);
            match self
                .recorder
                .switch_input(device.as_deref(), self.backend.as_ref(), sink)
            {
                Ok(()) => self.input_stream = stream,
                Err(err) => {
                    self.report(&err, "switch input");
                    let lost_capture = self.recorder.state() == RecorderState::Recording
                        && !self.recorder.shared().is_recording();
                    if lost_capture {
                        self.recorder.fail();
                    }
                    self.sync_recorder_state();
                }
            }
        }
    }

    fn device_fault(&mut self, direction: DeviceDirection, stream: u64, reason: String) {
        match direction {
            DeviceDirection::Output => {
                if self.output.as_ref().map(|o| o.id) != Some(stream) {
                    return;
                }
                self.transport.set_playing(false);
                self.close_output();
                self.report(&PlayerError::StreamFailure { reason }, "output stream");
                self.enter(PlayerState::Error, false);
            }
            DeviceDirection::Input => {
                if stream != self.input_stream || self.recorder.state() != RecorderState::Recording {
                    return;
                }
                self.recorder.fail();
                self.report(&RecorderError::DeviceUnavailable { reason }, "input stream");
                self.sync_recorder_state();
            }
        }
        self.refresh_devices();
    }

    // ------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------

    fn export(&mut self, path: Option<PathBuf>) {
        let path = path.or_else(|| {
            self.session
                .as_ref()
                .and_then(|s| s.output.as_ref())
                .map(PathBuf::from)
        });
        let rejection = if self.exporting {
            Some(PlayerError::Busy {
                reason: "export already in progress".to_string(),
            })
        } else if self.state == PlayerState::Playing {
            Some(PlayerError::Busy {
                reason: "cannot export while playing".to_string(),
            })
        } else if self.recorder.state() == RecorderState::Recording {
            Some(PlayerError::Busy {
                reason: "cannot export while recording".to_string(),
            })
        } else if !self.transport.snapshot.current().is_loaded() {
            Some(PlayerError::NoSession {
                operation: "export".to_string(),
            })
        } else if path.is_none() {
            Some(PlayerError::ExportFailed {
                reason: "no output path given and the session has none".to_string(),
            })
        } else {
            None
        };

        let path_text = path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        if let Some(err) = rejection {
            self.report(&err, "export");
            self.events.publish(PlayerEvent::Export {
                path: path_text,
                error: Some(err.message()),
            });
            return;
        }
        let Some(path) = path else {
            return;
        };

        self.exporting = true;
        let snapshot = self.transport.snapshot.current();
        let channels = self.output_channels();
        let commands = self.commands.clone();
        info!(path = %path_text, "export started");
        tokio::task::spawn_blocking(move || {
            let result = export::render_to_wav(&snapshot, &path, channels);
            let _ = commands.send(Command::ExportFinished { path, result });
        });
    }

    fn export_finished(&mut self, path: PathBuf, result: Result<u64, PlayerError>) {
        self.exporting = false;
        let error = match result {
            Ok(frames) => {
                info!(path = %path.display(), frames, "export finished");
                None
            }
            Err(err) => {
                self.report(&err, "export");
                Some(err.message())
            }
        };
        self.events.publish(PlayerEvent::Export {
            path: path.display().to_string(),
            error,
        });
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    fn shutdown(&mut self) {
        self.transport.set_playing(false);
        // Stops hardware callbacks before anything they reference is dropped
        self.close_output();
        self.recorder.shutdown();
        self.transport.snapshot.reclaim(true);
        info!("control worker stopped");
    }
}
