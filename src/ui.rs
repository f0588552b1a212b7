//! What the user sees, derived from playback state.
//!
//! [`project`] maps ownership and the current track onto a [`View`]. The
//! [`Surface`] trait is what a UI binding implements to display views; the
//! binary uses [`Console`], which writes them to the log.
//!
//! Controls the user cannot use are hidden, never shown disabled.

use std::time::Duration;

use url::Url;

use crate::{
    device::{DeviceId, DeviceList},
    engine::LocalState,
    reconciler::Ownership,
    track::TrackInfo,
};

/// How much of the player is shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Transport controls, seek bar and volume.
    Full,
    /// Metadata only; playback is controlled elsewhere.
    Half,
    /// Nothing but placeholder artwork.
    Hidden,
}

impl Tier {
    #[must_use]
    pub fn shows_controls(self) -> bool {
        self == Self::Full
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Metadata {
    Track(TrackInfo),
    /// Leave whatever is displayed.
    Keep,
    /// Clear text and show placeholder artwork.
    Clear,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct View {
    pub tier: Tier,
    pub playing: bool,
    pub metadata: Metadata,
}

impl View {
    #[must_use]
    pub fn hidden() -> Self {
        Self {
            tier: Tier::Hidden,
            playing: false,
            metadata: Metadata::Clear,
        }
    }

    /// Content that cannot be displayed: controls go, metadata stays.
    #[must_use]
    pub fn unsupported(playing: bool) -> Self {
        Self {
            tier: Tier::Half,
            playing,
            metadata: Metadata::Keep,
        }
    }
}

/// Projects playback state onto a view.
#[must_use]
pub fn project(ownership: Ownership, playing: bool, track: Option<&TrackInfo>) -> View {
    let (tier, metadata) = match (ownership, track) {
        (Ownership::Owned, Some(track)) => (Tier::Full, Metadata::Track(track.clone())),
        (Ownership::Remote, Some(track)) => (Tier::Half, Metadata::Track(track.clone())),
        (Ownership::Remote, None) => (Tier::Half, Metadata::Keep),
        (Ownership::Owned | Ownership::Unknown, _) => (Tier::Hidden, Metadata::Clear),
    };

    View {
        tier,
        playing,
        metadata,
    }
}

/// Renders a duration as `m:ss`.
#[must_use]
pub fn format_clock(duration: Duration) -> String {
    let seconds = duration.as_secs();
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Seek bar and volume bar contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    pub position: Duration,
    pub duration: Duration,
    /// Volume in percent, when known.
    pub volume: Option<u8>,
}

impl Progress {
    #[must_use]
    pub fn elapsed(&self) -> String {
        format_clock(self.position)
    }

    #[must_use]
    pub fn total(&self) -> String {
        format_clock(self.duration)
    }
}

impl From<&LocalState> for Progress {
    fn from(state: &LocalState) -> Self {
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let volume = state
            .volume
            .filter(|volume| (0.0..=1.0).contains(volume))
            .map(|volume| (volume * 100.0).round() as u8);

        // A zero duration means unknown, not empty.
        let position = if state.duration.is_zero() {
            state.position
        } else {
            state.position.min(state.duration)
        };

        Self {
            position,
            duration: state.duration,
            volume,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MenuEntry {
    /// `None` for devices that cannot be selected.
    pub id: Option<DeviceId>,
    pub name: String,
    pub selected: bool,
}

/// Device selector contents, with the active device selected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceMenu {
    pub entries: Vec<MenuEntry>,
}

impl DeviceMenu {
    #[must_use]
    pub fn new(devices: &DeviceList, current: Option<&DeviceId>) -> Self {
        let entries = devices
            .iter()
            .map(|device| MenuEntry {
                id: device.id.clone(),
                name: device.name.clone(),
                selected: current.is_some() && device.id.as_ref() == current,
            })
            .collect();

        Self { entries }
    }

    #[must_use]
    pub fn selected(&self) -> Option<&MenuEntry> {
        self.entries.iter().find(|entry| entry.selected)
    }
}

/// Album art behind the player.
///
/// Only images from the configured host are accepted. The backdrop starts
/// shrunk and grows once the first image arrives, and a little more in
/// fullscreen.
#[derive(Clone, Debug, PartialEq)]
pub struct Background {
    host: String,
    scale: f32,
    image: Option<String>,
    fullscreen: bool,
}

impl Background {
    pub const INITIAL_SCALE: f32 = 0.2;
    pub const DISPLAY_SCALE: f32 = 2.0;
    pub const FULLSCREEN_SCALE: f32 = 2.8;

    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            scale: Self::INITIAL_SCALE,
            image: None,
            fullscreen: false,
        }
    }

    /// Enters or leaves fullscreen. Returns whether it is now fullscreen.
    pub fn toggle_fullscreen(&mut self) -> bool {
        self.fullscreen = !self.fullscreen;
        self.scale = if self.fullscreen {
            Self::FULLSCREEN_SCALE
        } else {
            Self::DISPLAY_SCALE
        };
        self.fullscreen
    }

    #[must_use]
    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    /// Sets the background image.
    ///
    /// Returns `false` and leaves the background unchanged when `url` is
    /// not on the image host.
    pub fn apply(&mut self, url: &str) -> bool {
        if !url.starts_with(&self.host) {
            warn!("invalid image url: {url}; should start with {}", self.host);
            return false;
        }

        if (self.scale - Self::INITIAL_SCALE).abs() < f32::EPSILON {
            self.scale = Self::DISPLAY_SCALE;
        }

        self.image = Some(url.to_owned());
        true
    }

    pub fn reset(&mut self) {
        self.scale = Self::INITIAL_SCALE;
        self.image = None;
        self.fullscreen = false;
    }

    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    #[must_use]
    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }
}

/// A UI binding.
pub trait Surface: Send {
    fn render(&mut self, view: &View);

    fn progress(&mut self, progress: &Progress);

    /// Shows play when `playing` is false, pause otherwise.
    fn play_state(&mut self, playing: bool);

    fn devices(&mut self, menu: &DeviceMenu);

    /// Single line of status text. Replaces the track name.
    fn status(&mut self, text: &str);

    fn background(&mut self, background: &Background);

    /// Leaves the player for another page.
    fn navigate(&mut self, url: &Url);
}

/// Surface that logs what it would display.
#[derive(Debug, Default)]
pub struct Console {
    current: Option<TrackInfo>,
    status: Option<String>,
    links: bool,
}

impl Console {
    /// Also logs the web player pages of every new track when `links` is
    /// set.
    #[must_use]
    pub fn new(links: bool) -> Self {
        Self {
            links,
            ..Self::default()
        }
    }
}

impl Surface for Console {
    fn render(&mut self, view: &View) {
        match &view.metadata {
            Metadata::Track(track) => {
                if self.current.as_ref() != Some(track) {
                    info!("now {}: {track}", if view.playing { "playing" } else { "paused" });
                    if self.links {
                        let links = track.links();
                        for link in [links.track, links.artist, links.album].into_iter().flatten() {
                            info!("{link}");
                        }
                    }
                    self.current = Some(track.clone());
                }
            }
            Metadata::Clear => self.current = None,
            Metadata::Keep => {}
        }

        let controls = if view.tier.shows_controls() {
            "shown"
        } else {
            "hidden"
        };
        debug!("view: {:?}; controls {controls}", view.tier);
    }

    fn progress(&mut self, progress: &Progress) {
        trace!(
            "{} / {}{}",
            progress.elapsed(),
            progress.total(),
            progress
                .volume
                .map(|volume| format!("; volume {volume}%"))
                .unwrap_or_default()
        );
    }

    fn play_state(&mut self, playing: bool) {
        debug!("{}", if playing { "playing" } else { "paused" });
    }

    fn devices(&mut self, menu: &DeviceMenu) {
        let names: Vec<_> = menu
            .entries
            .iter()
            .map(|entry| {
                if entry.selected {
                    format!("[{}]", entry.name)
                } else {
                    entry.name.clone()
                }
            })
            .collect();
        debug!("devices: {}", names.join(", "));
    }

    fn status(&mut self, text: &str) {
        if self.status.as_deref() != Some(text) {
            info!("{text}");
            self.status = Some(text.to_owned());
        }
    }

    fn background(&mut self, background: &Background) {
        if let Some(image) = background.image() {
            trace!("background {image} at scale {}", background.scale());
        }
    }

    fn navigate(&mut self, url: &Url) {
        info!("continue at {url}");
    }
}
