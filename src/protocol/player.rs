use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

/// `GET /me/player/currently-playing`
#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct CurrentlyPlaying {
    #[serde(default)]
    pub is_playing: bool,

    #[serde(rename = "progress_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub progress: Option<Duration>,

    #[serde(default)]
    pub currently_playing_type: PlayingType,

    #[serde(default)]
    pub item: Option<Item>,
}

/// `GET /me/player`
#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PlaybackState {
    pub device: Device,

    #[serde(default)]
    pub is_playing: bool,

    #[serde(rename = "progress_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub progress: Option<Duration>,

    #[serde(default)]
    pub currently_playing_type: PlayingType,

    #[serde(default)]
    pub item: Option<Item>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayingType {
    Track,
    Episode,
    Ad,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Item {
    Track(Track),
    Episode(Episode),
    #[serde(other)]
    Unknown,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Track {
    pub name: String,
    pub uri: String,

    #[serde(rename = "duration_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub duration: Duration,

    #[serde(default)]
    pub artists: Vec<Artist>,

    pub album: Album,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Episode {
    pub name: String,
    pub uri: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Artist {
    pub name: String,
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Album {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Image {
    pub url: String,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
}

/// `GET /me/player/devices`
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Devices {
    #[serde(default)]
    pub devices: Vec<Device>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Device {
    /// Absent for devices that cannot be addressed through the API.
    #[serde(default)]
    pub id: Option<String>,

    pub name: String,

    #[serde(default)]
    pub is_active: bool,

    #[serde(default)]
    pub is_restricted: bool,

    #[serde(default, rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub volume_percent: Option<u8>,
}

/// `PUT /me/player`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransferRequest {
    pub device_ids: Vec<String>,
    pub play: bool,
}
