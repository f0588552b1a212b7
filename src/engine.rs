//! Contract with the local playback engine.
//!
//! The engine renders audio and exposes the local device to the playback
//! service. It is driven imperatively through [`Engine`] and reports back
//! asynchronously through [`EngineEvent`]s, which the host forwards into
//! the session's inbound event channel.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::{device::DeviceId, error::Result};

/// Error categories an engine reports, named after the events that carry
/// them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SdkErrorKind {
    /// `initialization_error`
    Initialization,
    /// `authentication_error`
    Authentication,
    /// `account_error`
    Account,
    /// `playback_error`
    Playback,
    /// `autoplay_failed`
    AutoplayFailed,
}

impl fmt::Display for SdkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialization => "initialization_error",
            Self::Authentication => "authentication_error",
            Self::Account => "account_error",
            Self::Playback => "playback_error",
            Self::AutoplayFailed => "autoplay_failed",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct SdkError {
    pub kind: SdkErrorKind,
    pub message: String,
}

impl SdkError {
    /// Message of an authentication error that requires a new session.
    pub const AUTHENTICATION_FAILED: &'static str = "Authentication failed";

    /// Message of a playback error caused by a token lacking scope.
    pub const OPERATION_NOT_ALLOWED: &'static str = "The operation is not allowed.";

    #[must_use]
    pub fn new(kind: SdkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Playback state as the local engine reports it.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalState {
    pub paused: bool,
    pub position: Duration,
    pub duration: Duration,
    /// Volume in `[0, 1]`, when the engine reports it alongside.
    pub volume: Option<f32>,
}

/// Asynchronous notifications from the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// The local device is registered with the service.
    Ready { device_id: DeviceId },
    /// The local device went offline.
    NotReady { device_id: DeviceId },
    /// Playback state changed locally. `None` when the engine has no state,
    /// for example after playback moved to another device.
    StateChanged(Option<LocalState>),
    Error(SdkError),
}

/// Imperative controls of the engine.
#[async_trait]
pub trait Engine: Send {
    /// Connects the local device. `Ok(false)` when the engine refused.
    async fn connect(&mut self) -> Result<bool>;

    /// Disconnects the local device. `Ok(false)` when the engine refused.
    async fn disconnect(&mut self) -> Result<bool>;

    async fn toggle_play(&mut self) -> Result<()>;

    async fn next_track(&mut self) -> Result<()>;

    async fn previous_track(&mut self) -> Result<()>;

    async fn seek(&mut self, position: Duration) -> Result<()>;

    /// Sets the volume, in `[0, 1]`.
    async fn set_volume(&mut self, volume: f32) -> Result<()>;

    /// Current volume, in `[0, 1]`.
    async fn volume(&mut self) -> Result<f32>;

    async fn current_state(&mut self) -> Result<Option<LocalState>>;
}

/// Command for the engine, as decided by the reconciler.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Connect,
    Disconnect,
    TogglePlay,
    NextTrack,
    PreviousTrack,
    Seek(Duration),
    SetVolume(f32),
}

/// Clamps a volume ratio into `[0, 1]`; NaN becomes silence.
#[must_use]
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sdk_error_display_uses_event_names() {
        let err = SdkError::new(SdkErrorKind::Playback, SdkError::OPERATION_NOT_ALLOWED);
        assert_eq!(
            err.to_string(),
            "playback_error: The operation is not allowed."
        );
    }

    #[test]
    fn volume_is_clamped() {
        assert!((clamp_volume(1.5) - 1.0).abs() < f32::EPSILON);
        assert!(clamp_volume(-0.2).abs() < f32::EPSILON);
        assert!(clamp_volume(f32::NAN).abs() < f32::EPSILON);
    }
}
