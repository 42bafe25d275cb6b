//! Messages accepted by the control worker.

use std::path::PathBuf;

use crate::engine::transport::TransportAction;
use crate::error::{PlayerError, RecorderError};
use crate::mixer::{ScheduledTrack, TrackPatch};
use crate::model::{DeviceDirection, MixerDeviceList, MixerSession, MixerSettings};
use crate::recorder::PreparedRecording;

/// Why a session is being (re)decoded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum LoadPurpose {
    /// Caller submitted a new session
    NewSession,
    /// Engine rate changed; resume the same session where it was
    Reload { resume_secs: f64 },
}

/// Result of decoding a session on the blocking pool.
pub(crate) struct LoadOutcome {
    pub epoch: u64,
    pub purpose: LoadPurpose,
    pub session: MixerSession,
    pub sample_rate: u32,
    pub tracks: Vec<ScheduledTrack>,
    pub errors: Vec<PlayerError>,
}

pub(crate) enum Command {
    SetSession(MixerSession),
    SessionLoaded(LoadOutcome),
    ApplySettings(MixerSettings),
    Transport(TransportAction),
    PatchTrack(TrackPatch),
    RecorderPrepared(PreparedRecording),
    RecorderPrepareFailed(RecorderError),
    StartRecorder,
    StopRecorder,
    ApplyDevices(MixerDeviceList),
    SelectDevice {
        direction: DeviceDirection,
        name: String,
    },
    RefreshDevices,
    /// A backend reported a failure on stream `stream`
    DeviceFault {
        direction: DeviceDirection,
        stream: u64,
        reason: String,
    },
    Export {
        path: Option<PathBuf>,
    },
    ExportFinished {
        path: PathBuf,
        result: Result<u64, PlayerError>,
    },
    /// Publish an error detected on the caller's thread
    ReportError(PlayerError),
    ReportRecorderError(RecorderError),
    Shutdown,
}
