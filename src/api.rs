//! Client for the Spotify Web API player endpoints.
//!
//! Every call goes through the same steps:
//!
//! 1. Refuse immediately when offline or without a bearer token
//! 2. Pass the shared [`RateLimiter`]
//! 3. Send with bearer authentication, abortable by the session
//! 4. Classify the response:
//!    * 401: invalidate and reload the token, fail with `AuthExpired`
//!    * 429: `RateLimitExceeded`
//!    * other non-2xx: `RequestFailed`
//!    * 204 or an empty body: `None`
//!    * other 2xx: the JSON body
//!
//! There is no retry. Whether and when to try again is the reconciler's
//! decision.

use std::{fmt::Debug, sync::Arc, time::Duration};

use futures_util::future;
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::{
    device::{DeviceId, DeviceList, DeviceSnapshot},
    error::{Error, Result},
    http::{Request, Transport},
    protocol::{
        self,
        player::{self as wire, TransferRequest},
    },
    rate_limit::RateLimiter,
    session::{AbortSignal, Connectivity, Context},
    token::TokenProvider,
    track::{Content, PlaybackState, TrackSnapshot},
};

pub const CURRENTLY_PLAYING: &str = "/me/player/currently-playing";
pub const PLAYER: &str = "/me/player";
pub const DEVICES: &str = "/me/player/devices";

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    tokens: TokenProvider,
    limiter: Arc<RateLimiter>,
    connectivity: Connectivity,
    abort: AbortSignal,
    base: Url,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: TokenProvider,
        context: &Context,
        base: Url,
    ) -> Self {
        Self {
            transport,
            tokens,
            limiter: Arc::clone(&context.limiter),
            connectivity: context.connectivity.clone(),
            abort: context.abort.clone(),
            base,
        }
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenProvider {
        &self.tokens
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    fn url(&self, endpoint: &str) -> Result<Url> {
        let base = self.base.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{endpoint}")).map_err(Into::into)
    }

    /// Sends one request and classifies the response.
    ///
    /// Returns the body text, or `None` for `204 No Content` and empty
    /// bodies.
    ///
    /// # Errors
    ///
    /// See the module documentation for the classification.
    pub async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<String>,
    ) -> Result<Option<String>> {
        if !self.connectivity.is_online() {
            return Err(Error::offline(
                "You are offline. Please check your internet connection.",
            ));
        }

        let token = self
            .tokens
            .token()
            .ok_or_else(|| Error::no_token("failed to retrieve access token"))?;

        // Check the URL early to not needlessly hit the rate limiter.
        let url = self.url(endpoint)?;
        self.limiter.acquire()?;

        let mut request = Request::new(method, url).with_bearer(token);
        if let Some(body) = body {
            request = request.with_body(body);
        }

        let abort = self.abort.token();
        let response = tokio::select! {
            biased;

            () = abort.cancelled() => {
                return Err(Error::cancelled(format!("request to {endpoint} aborted")));
            }
            response = self.transport.send(request) => response?,
        };

        match response.status {
            StatusCode::UNAUTHORIZED => {
                warn!("access token rejected by {endpoint}; reloading");
                self.tokens.reload().await;
                Err(Error::auth_expired("Invalid access token. Reloading..."))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(Error::rate_limit_exceeded(
                "Rate limit exceeded. Please try again later.",
            )),
            status if !status.is_success() => Err(Error::request_failed(endpoint, status)),
            StatusCode::NO_CONTENT => Ok(None),
            _ if response.body.trim().is_empty() => Ok(None),
            _ => Ok(Some(response.body)),
        }
    }

    /// `GET` returning the JSON body, or `None` for 204.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus `InvalidArgument` for bodies that are
    /// not JSON.
    pub async fn request(&self, endpoint: &str) -> Result<Option<serde_json::Value>> {
        self.get(endpoint).await
    }

    /// `GET` parsed into `T`.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus `InvalidArgument` for bodies that do
    /// not match `T`.
    pub async fn get<T>(&self, endpoint: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Debug,
    {
        match self.send(Method::GET, endpoint, None).await? {
            Some(body) => protocol::json(&body, endpoint).map(Some),
            None => Ok(None),
        }
    }

    pub async fn currently_playing(&self) -> Result<Option<wire::CurrentlyPlaying>> {
        self.get(CURRENTLY_PLAYING).await
    }

    pub async fn playback_state(&self) -> Result<Option<wire::PlaybackState>> {
        self.get(PLAYER).await
    }

    pub async fn devices(&self) -> Result<wire::Devices> {
        self.get(DEVICES).await.map(Option::unwrap_or_default)
    }

    /// Current item and playback state, fetched concurrently.
    ///
    /// # Errors
    ///
    /// Fails if either request fails.
    pub async fn track_snapshot(&self) -> Result<TrackSnapshot> {
        let (playing, playback) =
            future::try_join(self.currently_playing(), self.playback_state()).await?;

        let content = playing
            .as_ref()
            .and_then(|playing| Content::from_item(playing.item.as_ref(), playing.currently_playing_type));

        Ok(TrackSnapshot {
            content,
            playback: playback.as_ref().map(PlaybackState::from),
        })
    }

    /// Device list and playback state, fetched concurrently.
    ///
    /// # Errors
    ///
    /// Fails if either request fails.
    pub async fn device_snapshot(&self) -> Result<DeviceSnapshot> {
        let (devices, playback) =
            future::try_join(self.devices(), self.playback_state()).await?;

        Ok(DeviceSnapshot {
            devices: DeviceList::from(&devices),
            playback: playback.as_ref().map(PlaybackState::from),
        })
    }

    /// Moves playback to `device`, playing if `play`.
    ///
    /// # Errors
    ///
    /// Fails as [`send`](Self::send) does.
    pub async fn transfer(&self, device: &DeviceId, play: bool) -> Result<()> {
        let body = serde_json::to_string(&TransferRequest {
            device_ids: vec![device.to_string()],
            play,
        })?;

        self.send(Method::PUT, PLAYER, Some(body)).await?;
        Ok(())
    }

    pub async fn play(&self, device: Option<&DeviceId>) -> Result<()> {
        let endpoint = with_device("/me/player/play", device);
        self.send(Method::PUT, &endpoint, None).await.map(drop)
    }

    pub async fn pause(&self, device: Option<&DeviceId>) -> Result<()> {
        let endpoint = with_device("/me/player/pause", device);
        self.send(Method::PUT, &endpoint, None).await.map(drop)
    }

    pub async fn next(&self, device: Option<&DeviceId>) -> Result<()> {
        let endpoint = with_device("/me/player/next", device);
        self.send(Method::POST, &endpoint, None).await.map(drop)
    }

    pub async fn previous(&self, device: Option<&DeviceId>) -> Result<()> {
        let endpoint = with_device("/me/player/previous", device);
        self.send(Method::POST, &endpoint, None).await.map(drop)
    }

    pub async fn seek(&self, position: Duration, device: Option<&DeviceId>) -> Result<()> {
        let endpoint = with_device(
            &format!("/me/player/seek?position_ms={}", position.as_millis()),
            device,
        );
        self.send(Method::PUT, &endpoint, None).await.map(drop)
    }

    pub async fn set_volume(&self, percent: u8, device: Option<&DeviceId>) -> Result<()> {
        let endpoint = with_device(
            &format!("/me/player/volume?volume_percent={}", percent.min(100)),
            device,
        );
        self.send(Method::PUT, &endpoint, None).await.map(drop)
    }
}

/// Appends the `device_id` query parameter when a device is targeted.
fn with_device(endpoint: &str, device: Option<&DeviceId>) -> String {
    match device {
        Some(device) => {
            let separator = if endpoint.contains('?') { '&' } else { '?' };
            format!("{endpoint}{separator}device_id={device}")
        }
        None => endpoint.to_owned(),
    }
}
