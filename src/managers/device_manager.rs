// DeviceManager: device enumeration snapshot and selection rules
// Single Responsibility: own the device list the engine and caller agree on

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;

use crate::engine::backend::AudioBackend;
use crate::error::PlayerError;
use crate::model::{DeviceDirection, MixerDeviceList};

/// Which directions had their selected device changed by an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionChange {
    pub input: bool,
    pub output: bool,
}

impl SelectionChange {
    pub fn any(&self) -> bool {
        self.input || self.output
    }

    pub fn touches(&self, direction: DeviceDirection) -> bool {
        match direction {
            DeviceDirection::Input => self.input,
            DeviceDirection::Output => self.output,
        }
    }
}

/// Holds the current device list snapshot.
///
/// Every change replaces the whole list through the swap cell; readers on
/// other threads always see a complete list.
pub struct DeviceManager {
    list: Arc<ArcSwap<MixerDeviceList>>,
    poll_interval: Duration,
    last_poll: Option<Instant>,
}

impl DeviceManager {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            list: Arc::new(ArcSwap::from_pointee(MixerDeviceList::default())),
            poll_interval,
            last_poll: None,
        }
    }

    /// Read side handed to the façade.
    pub fn shared(&self) -> Arc<ArcSwap<MixerDeviceList>> {
        Arc::clone(&self.list)
    }

    pub fn current(&self) -> Arc<MixerDeviceList> {
        self.list.load_full()
    }

    pub fn selected_name(&self, direction: DeviceDirection) -> Option<String> {
        self.list
            .load()
            .selected_name(direction)
            .map(str::to_string)
    }

    pub fn poll_due(&self, now: Instant) -> bool {
        match self.last_poll {
            None => true,
            Some(last) => now.duration_since(last) >= self.poll_interval,
        }
    }

    /// Re-enumerate; returns the new list only when it differs.
    pub fn refresh(
        &mut self,
        backend: &dyn AudioBackend,
    ) -> Result<Option<MixerDeviceList>, PlayerError> {
        self.last_poll = Some(Instant::now());
        let fresh = backend.enumerate()?;
        let current = self.list.load_full();
        let next = current.refreshed(fresh);
        if next == *current {
            return Ok(None);
        }
        log::info!(
            "[DeviceManager] Device list changed: {} devices",
            next.devices.len()
        );
        self.list.store(Arc::new(next.clone()));
        Ok(Some(next))
    }

    /// Adopt the selections of a caller-submitted list.
    ///
    /// The device set itself always comes from the last enumeration; only the
    /// `isSelected` flags are taken from `submitted`.
    pub fn apply(&mut self, submitted: &MixerDeviceList) -> Result<SelectionChange, PlayerError> {
        submitted.validate()?;
        let current = self.list.load_full();
        let mut next = MixerDeviceList::new(
            current
                .devices
                .iter()
                .cloned()
                .map(|mut d| {
                    d.is_selected = false;
                    d
                })
                .collect(),
        );

        for direction in [DeviceDirection::Input, DeviceDirection::Output] {
            if let Some(name) = submitted.selected_name(direction) {
                next = next.with_selection(direction, name)?;
            }
        }
        Ok(self.store(&current, next))
    }

    /// Select one device, clearing the previous selection of its direction.
    pub fn select(
        &mut self,
        direction: DeviceDirection,
        name: &str,
    ) -> Result<SelectionChange, PlayerError> {
        let current = self.list.load_full();
        let next = current.with_selection(direction, name)?;
        Ok(self.store(&current, next))
    }

    fn store(&self, current: &MixerDeviceList, next: MixerDeviceList) -> SelectionChange {
        let change = SelectionChange {
            input: current.selected_name(DeviceDirection::Input)
                != next.selected_name(DeviceDirection::Input),
            output: current.selected_name(DeviceDirection::Output)
                != next.selected_name(DeviceDirection::Output),
        };
        self.list.store(Arc::new(next));
        change
    }
}
