//! Playback model as the session manager sees it.
//!
//! [`TrackInfo`] snapshots are built from wire types and replaced wholesale
//! on every poll; they are never patched field by field.

use std::{fmt, time::Duration};

use url::Url;

use crate::{
    device::DeviceId,
    error::{Error, Result},
    protocol::player::{self as wire, Item, PlayingType},
    reconciler::{CONTENT_UNSUPPORTED, EPISODES_UNSUPPORTED},
};

/// Base of the web player's artist, album and track pages.
pub const LINK_BASE: &str = "https://open.spotify.com/";

/// Immutable snapshot of the current track's metadata.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TrackInfo {
    pub name: String,
    /// Artist names in credited order.
    pub artists: Vec<String>,
    pub album_image: Option<String>,
    pub track_id: String,
    pub album_id: Option<String>,
    pub artist_id: Option<String>,
    pub duration: Duration,
}

impl TrackInfo {
    /// Artist names joined for display.
    #[must_use]
    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }

    /// Web player pages of the track, its album and its first artist.
    #[must_use]
    pub fn links(&self) -> TrackLinks {
        let page = |kind: &str, id: &str| Url::parse(&format!("{LINK_BASE}{kind}/{id}")).ok();

        TrackLinks {
            track: page("track", &self.track_id),
            album: self.album_id.as_deref().and_then(|id| page("album", id)),
            artist: self.artist_id.as_deref().and_then(|id| page("artist", id)),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackLinks {
    pub track: Option<Url>,
    pub album: Option<Url>,
    pub artist: Option<Url>,
}

impl fmt::Display for TrackInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.artist_line(), self.name)
    }
}

impl From<&wire::Track> for TrackInfo {
    fn from(track: &wire::Track) -> Self {
        Self {
            name: track.name.clone(),
            artists: track.artists.iter().map(|artist| artist.name.clone()).collect(),
            album_image: track.album.images.first().map(|image| image.url.clone()),
            track_id: uri_id(&track.uri).to_owned(),
            album_id: track.album.uri.as_deref().map(|uri| uri_id(uri).to_owned()),
            artist_id: track
                .artists
                .first()
                .and_then(|artist| artist.uri.as_deref())
                .map(|uri| uri_id(uri).to_owned()),
            duration: track.duration,
        }
    }
}

/// Extracts the id from a `spotify:<type>:<id>` URI.
///
/// Strings that are not URIs are returned unchanged.
#[must_use]
pub fn uri_id(uri: &str) -> &str {
    uri.rsplit(':').next().unwrap_or(uri)
}

/// What the account is currently playing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Content {
    Track(TrackInfo),
    /// Podcast episodes are not supported.
    Episode,
    /// Ads and anything the API does not classify.
    Unsupported,
}

impl Content {
    /// Classifies a current item; `None` when nothing is playing.
    #[must_use]
    pub fn from_item(item: Option<&Item>, kind: PlayingType) -> Option<Self> {
        match item? {
            Item::Track(track) => Some(Self::Track(TrackInfo::from(track))),
            Item::Episode(_) => Some(Self::Episode),
            Item::Unknown if kind == PlayingType::Episode => Some(Self::Episode),
            Item::Unknown => Some(Self::Unsupported),
        }
    }

    /// The track, if this is one.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedContent` with the text to show instead.
    pub fn track(self) -> Result<TrackInfo> {
        match self {
            Self::Track(track) => Ok(track),
            Self::Episode => Err(Error::unsupported_content(EPISODES_UNSUPPORTED)),
            Self::Unsupported => Err(Error::unsupported_content(CONTENT_UNSUPPORTED)),
        }
    }
}

/// Remote playback state, fetched and never owned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackState {
    pub is_playing: bool,
    /// `None` for devices that cannot be addressed through the API.
    pub device_id: Option<DeviceId>,
}

impl From<&wire::PlaybackState> for PlaybackState {
    fn from(state: &wire::PlaybackState) -> Self {
        Self {
            is_playing: state.is_playing,
            device_id: state.device.id.clone().map(DeviceId::from),
        }
    }
}

/// Result of fetching the current item together with the playback state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackSnapshot {
    /// `None` when nothing is playing.
    pub content: Option<Content>,
    /// `None` when there is no active device.
    pub playback: Option<PlaybackState>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn ids_come_from_uris() {
        assert_eq!(uri_id("spotify:track:6rqhFgbbKwnb9MLmUQDhG6"), "6rqhFgbbKwnb9MLmUQDhG6");
        assert_eq!(uri_id("plain"), "plain");
    }

    #[test]
    fn episodes_are_classified_even_without_details() {
        assert_eq!(
            Content::from_item(Some(&Item::Unknown), PlayingType::Episode),
            Some(Content::Episode)
        );
        assert_eq!(
            Content::from_item(Some(&Item::Unknown), PlayingType::Ad),
            Some(Content::Unsupported)
        );
        assert_eq!(Content::from_item(None, PlayingType::Track), None);
    }

    #[test]
    fn track_info_from_wire() {
        let track = wire::Track {
            name: "Song".to_owned(),
            uri: "spotify:track:t1".to_owned(),
            duration: Duration::from_secs(200),
            artists: vec![
                wire::Artist {
                    name: "A".to_owned(),
                    uri: Some("spotify:artist:a1".to_owned()),
                },
                wire::Artist {
                    name: "B".to_owned(),
                    uri: None,
                },
            ],
            album: wire::Album {
                name: "Album".to_owned(),
                uri: Some("spotify:album:al1".to_owned()),
                images: vec![],
            },
        };

        let info = TrackInfo::from(&track);
        assert_eq!(info.track_id, "t1");
        assert_eq!(info.album_id.as_deref(), Some("al1"));
        assert_eq!(info.artist_id.as_deref(), Some("a1"));
        assert_eq!(info.album_image, None);
        assert_eq!(info.to_string(), "A, B - Song");

        let links = info.links();
        assert_eq!(
            links.track.unwrap().as_str(),
            "https://open.spotify.com/track/t1"
        );
        assert_eq!(
            links.album.unwrap().as_str(),
            "https://open.spotify.com/album/al1"
        );
        assert_eq!(
            links.artist.unwrap().as_str(),
            "https://open.spotify.com/artist/a1"
        );
    }

    #[test]
    fn only_tracks_are_displayable() {
        let err = Content::Episode.track().unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedContent);
        assert_eq!(err.error.to_string(), EPISODES_UNSUPPORTED);

        let err = Content::Unsupported.track().unwrap_err();
        assert_eq!(err.error.to_string(), CONTENT_UNSUPPORTED);
    }
}
