//! Engine that drives an existing Spotify Connect device.
//!
//! [`WebApiEngine`] does not render audio itself. It claims a device that is
//! already registered with the account, looked up by name, and controls it
//! through the Web API player endpoints. This makes any Connect speaker a
//! local player as far as the session is concerned.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    api::ApiClient,
    device::{DeviceId, DeviceList},
    engine::{clamp_volume, Engine, EngineEvent, LocalState, SdkError, SdkErrorKind},
    error::{Error, ErrorKind, Result, StatusError},
    events::Sender,
    protocol::player::Item,
};

pub struct WebApiEngine {
    api: ApiClient,
    name: String,
    /// Last known volume, in `[0, 1]`.
    volume: f32,
    events: Sender,
    device: Option<DeviceId>,
}

impl WebApiEngine {
    /// Creates an engine for the device called `name`. `volume` is applied
    /// on connect.
    pub fn new(api: ApiClient, name: impl Into<String>, volume: f32, events: Sender) -> Self {
        Self {
            api,
            name: name.into(),
            volume: clamp_volume(volume),
            events,
            device: None,
        }
    }

    #[must_use]
    pub fn device(&self) -> Option<&DeviceId> {
        self.device.as_ref()
    }

    fn claimed(&self) -> Result<&DeviceId> {
        self.device
            .as_ref()
            .ok_or_else(|| Error::unavailable(format!("{} is not connected", self.name)))
    }

    /// Reports the state after a command that changes it.
    async fn notify(&mut self) {
        match self.current_state().await {
            Ok(state) => self.events.send(EngineEvent::StateChanged(state)),
            Err(e) => debug!("failed to get player state: {e}"),
        }
    }
}

/// The player refuses commands it does not allow right now with a 403, for
/// example skipping during an ad. That is a playback error, not a failed
/// request.
fn restricted(e: Error) -> Error {
    let forbidden = e.kind == ErrorKind::RequestFailed
        && e.downcast::<StatusError>()
            .is_some_and(|details| details.status == http::StatusCode::FORBIDDEN);

    if forbidden {
        Error::sdk(SdkError::new(SdkErrorKind::Playback, SdkError::OPERATION_NOT_ALLOWED))
    } else {
        e
    }
}

#[async_trait]
impl Engine for WebApiEngine {
    async fn connect(&mut self) -> Result<bool> {
        let devices = DeviceList::from(&self.api.devices().await?);
        let device = devices
            .find_by_name(&self.name)
            .and_then(|device| device.id.clone())
            .ok_or_else(|| {
                Error::device_resolution_failed(format!("no controllable device named {}", self.name))
            })?;

        info!("claimed {} with device id {device}", self.name);
        self.device = Some(device.clone());

        if let Err(e) = self.set_volume(self.volume).await {
            warn!("failed to set initial volume: {e}");
        }

        self.events.send(EngineEvent::Ready { device_id: device });
        Ok(true)
    }

    async fn disconnect(&mut self) -> Result<bool> {
        match self.device.take() {
            Some(device_id) => {
                self.events.send(EngineEvent::NotReady { device_id });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn toggle_play(&mut self) -> Result<()> {
        let device = self.claimed()?.clone();
        let playing = self
            .api
            .playback_state()
            .await?
            .is_some_and(|state| state.is_playing && state.device.id.as_deref() == Some(device.as_str()));

        if playing {
            self.api.pause(Some(&device)).await.map_err(restricted)?;
        } else {
            self.api.play(Some(&device)).await.map_err(restricted)?;
        }

        self.notify().await;
        Ok(())
    }

    async fn next_track(&mut self) -> Result<()> {
        let device = self.claimed()?;
        self.api.next(Some(device)).await.map_err(restricted)
    }

    async fn previous_track(&mut self) -> Result<()> {
        let device = self.claimed()?;
        self.api.previous(Some(device)).await.map_err(restricted)
    }

    async fn seek(&mut self, position: Duration) -> Result<()> {
        let device = self.claimed()?.clone();
        self.api
            .seek(position, Some(&device))
            .await
            .map_err(restricted)?;
        self.notify().await;
        Ok(())
    }

    async fn set_volume(&mut self, volume: f32) -> Result<()> {
        let volume = clamp_volume(volume);
        let device = self.claimed()?;

        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percent = (volume * 100.0).round() as u8;
        self.api
            .set_volume(percent, Some(device))
            .await
            .map_err(restricted)?;

        self.volume = volume;
        Ok(())
    }

    async fn volume(&mut self) -> Result<f32> {
        Ok(self.volume)
    }

    /// State of the claimed device, or `None` when it is not the one
    /// playing.
    async fn current_state(&mut self) -> Result<Option<LocalState>> {
        let device = self.claimed()?;
        let Some(state) = self.api.playback_state().await? else {
            return Ok(None);
        };

        if state.device.id.as_deref() != Some(device.as_str()) {
            return Ok(None);
        }

        let volume = state
            .device
            .volume_percent
            .map(|percent| f32::from(percent.min(100)) / 100.0);
        if let Some(volume) = volume {
            self.volume = volume;
        }

        let duration = match &state.item {
            Some(Item::Track(track)) => track.duration,
            _ => Duration::ZERO,
        };

        Ok(Some(LocalState {
            paused: !state.is_playing,
            position: state.progress.unwrap_or_default(),
            duration,
            volume,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::StatusCode;
    use url::Url;

    use super::*;
    use crate::{
        api::tests::FakeTransport,
        error::ErrorKind,
        events::{self, Event},
        http::Response,
        session::Context,
        storage::SessionStorage,
        token::{tests::StaticAuthority, AccessToken, TokenProvider},
    };

    const DEVICES: &str = r#"{"devices": [
        {"id": "phone", "name": "Phone", "is_active": true, "type": "Smartphone"},
        {"id": "speaker", "name": "Kitchen", "is_active": false, "type": "Speaker", "volume_percent": 40}
    ]}"#;

    fn engine(responses: Vec<Response>) -> (WebApiEngine, Arc<FakeTransport>, events::Receiver) {
        let transport = FakeTransport::replying(responses);
        let context = Context::new(SessionStorage::new());
        let tokens = TokenProvider::new(context.storage.clone(), Arc::new(StaticAuthority::default()));
        tokens.store(&AccessToken::new("BQDtoken").unwrap());
        let api = ApiClient::new(
            transport.clone(),
            tokens,
            &context,
            Url::parse("https://api.spotify.com/v1").unwrap(),
        );

        let (tx, rx) = events::channel();
        (WebApiEngine::new(api, "Kitchen", 0.3, tx), transport, rx)
    }

    #[tokio::test]
    async fn connect_claims_device_by_name() {
        let (mut engine, transport, mut rx) = engine(vec![
            Response::new(StatusCode::OK, DEVICES),
            Response::no_content(),
        ]);

        assert!(engine.connect().await.unwrap());
        assert_eq!(engine.device(), Some(&DeviceId::from("speaker")));

        let requests = transport.requests.lock().unwrap();
        assert_eq!(
            requests[1].url.as_str(),
            "https://api.spotify.com/v1/me/player/volume?volume_percent=30&device_id=speaker"
        );
        drop(requests);

        assert!(matches!(
            rx.try_recv(),
            Some(Event::Engine(EngineEvent::Ready { device_id })) if device_id.as_str() == "speaker"
        ));
    }

    #[tokio::test]
    async fn unknown_device_fails_to_resolve() {
        let (mut engine, _, _rx) = engine(vec![Response::new(StatusCode::OK, r#"{"devices": []}"#)]);
        let err = engine.connect().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::DeviceResolutionFailed);
    }

    #[tokio::test]
    async fn commands_need_a_claimed_device() {
        let (mut engine, transport, _rx) = engine(vec![]);
        assert_eq!(engine.next_track().await.unwrap_err().kind, ErrorKind::Unavailable);
        assert!(!engine.disconnect().await.unwrap());
        assert!(transport.paths().is_empty());
    }

    #[tokio::test]
    async fn state_of_another_device_is_none() {
        let playing_elsewhere = r#"{
            "device": {"id": "phone", "name": "Phone"},
            "is_playing": true,
            "progress_ms": 1000
        }"#;
        let (mut engine, _, _rx) = engine(vec![
            Response::new(StatusCode::OK, DEVICES),
            Response::no_content(),
            Response::new(StatusCode::OK, playing_elsewhere),
        ]);

        engine.connect().await.unwrap();
        assert_eq!(engine.current_state().await.unwrap(), None);
    }

    #[tokio::test]
    async fn forbidden_commands_are_playback_errors() {
        let (mut engine, _, _rx) = engine(vec![
            Response::new(StatusCode::OK, DEVICES),
            Response::no_content(),
            Response::new(StatusCode::FORBIDDEN, r#"{"error": {"status": 403}}"#),
            Response::new(StatusCode::BAD_GATEWAY, ""),
        ]);
        engine.connect().await.unwrap();

        let err = engine.next_track().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Sdk);
        let sdk = err.downcast::<SdkError>().expect("sdk error");
        assert_eq!(sdk.kind, SdkErrorKind::Playback);
        assert_eq!(sdk.message, SdkError::OPERATION_NOT_ALLOWED);

        let err = engine.previous_track().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RequestFailed);
    }

    #[tokio::test]
    async fn disconnect_reports_not_ready() {
        let (mut engine, _, mut rx) = engine(vec![
            Response::new(StatusCode::OK, DEVICES),
            Response::no_content(),
        ]);
        engine.connect().await.unwrap();
        let _ready = rx.try_recv();

        assert!(engine.disconnect().await.unwrap());
        assert!(matches!(
            rx.try_recv(),
            Some(Event::Engine(EngineEvent::NotReady { .. }))
        ));
        assert_eq!(engine.device(), None);
    }
}
