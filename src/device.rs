use std::fmt;

use crate::{protocol::player as wire, track::PlaybackState};

/// Identifier of a playback device.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Device {
    /// `None` for devices the API cannot address.
    pub id: Option<DeviceId>,
    pub name: String,
    pub is_current: bool,
}

impl From<&wire::Device> for Device {
    fn from(device: &wire::Device) -> Self {
        Self {
            id: device.id.clone().map(DeviceId::from),
            name: device.name.clone(),
            is_current: device.is_active,
        }
    }
}

/// Devices in the order the API lists them. Rebuilt on every fetch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceList(Vec<Device>);

impl DeviceList {
    #[must_use]
    pub fn new(devices: Vec<Device>) -> Self {
        Self(devices)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.0.iter()
    }

    /// First addressable device other than `id`.
    #[must_use]
    pub fn other_than(&self, id: &DeviceId) -> Option<&Device> {
        self.0
            .iter()
            .find(|device| device.id.as_ref().is_some_and(|other| other != id))
    }

    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&Device> {
        self.0.iter().find(|device| device.name == name)
    }
}

impl From<&wire::Devices> for DeviceList {
    fn from(devices: &wire::Devices) -> Self {
        Self(devices.devices.iter().map(Device::from).collect())
    }
}

/// Result of fetching the device list together with the playback state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub devices: DeviceList,
    /// `None` when there is no active device.
    pub playback: Option<PlaybackState>,
}
