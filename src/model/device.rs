//! Device snapshot and selection rules.
//!
//! A device list is a value: selection produces a new list rather than
//! flipping flags on a shared one. Backends report one entry per direction,
//! so a duplex card appears once as an input and once as an output.

use crate::error::PlayerError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

impl DeviceDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceDirection::Input => "input",
            DeviceDirection::Output => "output",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixerDevice {
    /// Also used as the device id for selection
    pub name: String,
    #[serde(default)]
    pub is_input: bool,
    #[serde(default)]
    pub is_output: bool,
    #[serde(default)]
    pub is_selected: bool,
}

impl MixerDevice {
    pub fn input(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_input: true,
            is_output: false,
            is_selected: false,
        }
    }

    pub fn output(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_input: false,
            is_output: true,
            is_selected: false,
        }
    }

    pub fn supports(&self, direction: DeviceDirection) -> bool {
        match direction {
            DeviceDirection::Input => self.is_input,
            DeviceDirection::Output => self.is_output,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixerDeviceList {
    pub devices: Vec<MixerDevice>,
}

impl MixerDeviceList {
    pub fn new(devices: Vec<MixerDevice>) -> Self {
        Self { devices }
    }

    pub fn from_json(json: &str) -> Result<Self, PlayerError> {
        let list: MixerDeviceList =
            serde_json::from_str(json).map_err(|e| PlayerError::DeviceSelectionInvalid {
                reason: e.to_string(),
            })?;
        list.validate()?;
        Ok(list)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"devices\":[]}".to_string())
    }

    pub fn selected(&self, direction: DeviceDirection) -> Option<&MixerDevice> {
        self.devices
            .iter()
            .find(|d| d.is_selected && d.supports(direction))
    }

    pub fn selected_name(&self, direction: DeviceDirection) -> Option<&str> {
        self.selected(direction).map(|d| d.name.as_str())
    }

    pub fn contains(&self, direction: DeviceDirection, name: &str) -> bool {
        self.devices
            .iter()
            .any(|d| d.name == name && d.supports(direction))
    }

    /// At most one selected device per direction.
    pub fn validate(&self) -> Result<(), PlayerError> {
        for direction in [DeviceDirection::Input, DeviceDirection::Output] {
            let count = self
                .devices
                .iter()
                .filter(|d| d.is_selected && d.supports(direction))
                .count();
            if count > 1 {
                return Err(PlayerError::DeviceSelectionInvalid {
                    reason: format!("{} {} devices selected", count, direction.as_str()),
                });
            }
        }
        Ok(())
    }

    /// New list with `name` selected for `direction` and any previous
    /// selection of that direction cleared.
    pub fn with_selection(
        &self,
        direction: DeviceDirection,
        name: &str,
    ) -> Result<MixerDeviceList, PlayerError> {
        if !self.contains(direction, name) {
            return Err(PlayerError::DeviceSelectionInvalid {
                reason: format!("no {} device named '{}'", direction.as_str(), name),
            });
        }
        let devices = self
            .devices
            .iter()
            .map(|d| {
                let mut d = d.clone();
                if d.supports(direction) {
                    d.is_selected = d.name == name;
                }
                d
            })
            .collect();
        Ok(MixerDeviceList { devices })
    }

    /// Replace the device set with a fresh enumeration, keeping selections
    /// whose device is still present.
    pub fn refreshed(&self, fresh: Vec<MixerDevice>) -> MixerDeviceList {
        let devices = fresh
            .into_iter()
            .map(|mut d| {
                d.is_selected = self.devices.iter().any(|old| {
                    old.is_selected
                        && old.name == d.name
                        && old.is_input == d.is_input
                        && old.is_output == d.is_output
                });
                d
            })
            .collect();
        MixerDeviceList { devices }
    }
}
