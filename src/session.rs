//! Session lifecycle and the event loop that drives it.
//!
//! A [`Session`] owns everything that lives as long as one player session:
//! the shared [`Context`], the engine, the UI surface and the
//! [`Reconciler`]. It runs on a single task. Inbound events, in-flight
//! fetches and timers are multiplexed with `tokio::select!`, and the
//! effects the reconciler asks for are executed one at a time, in order.
//!
//! Fetches run concurrently and may complete out of order; the reconciler
//! discards stale results by sequence number.
//!
//! # Example
//!
//! ```no_run
//! let mut session = Session::new(&config, context, api, engine, Console::default(), events, inbound);
//! match session.run().await? {
//!     Outcome::Reset { .. } => info!("session reset"),
//!     Outcome::Shutdown => info!("session ended"),
//! }
//! ```

use std::{
    collections::VecDeque,
    future,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use futures_util::{future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use tokio::{
    sync::watch,
    time::{self, Instant, Interval, MissedTickBehavior, Sleep},
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    api::ApiClient,
    config::Config,
    device::DeviceId,
    engine::{Command, Engine, EngineEvent, LocalState, SdkError},
    error::{Error, Result},
    events::{Effect, Event, Receiver, Sender},
    rate_limit::RateLimiter,
    reconciler::{Reconciler, Timing},
    storage::{self, SessionStorage},
    ui::{Background, Metadata, Surface, View},
};

/// Process-wide cancellation of in-flight requests.
///
/// Aborting cancels every request issued so far and arms a fresh token for
/// the requests that follow.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
    token: Arc<Mutex<CancellationToken>>,
}

impl AbortSignal {
    /// The token requests should select on.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.lock().clone()
    }

    pub fn abort(&self) {
        let mut token = self.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whether the host believes it is online.
///
/// Sessions subscribe to changes and resume polling when the host comes
/// back online.
#[derive(Clone, Debug)]
pub struct Connectivity(Arc<watch::Sender<bool>>);

impl Connectivity {
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.0.borrow()
    }

    pub fn set_online(&self, online: bool) {
        self.0.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        let (tx, _) = watch::channel(true);
        Self(Arc::new(tx))
    }
}

/// State shared by everything that talks to the Web API.
#[derive(Clone)]
pub struct Context {
    pub storage: SessionStorage,
    pub limiter: Arc<RateLimiter>,
    pub abort: AbortSignal,
    pub connectivity: Connectivity,
}

impl Context {
    #[must_use]
    pub fn new(storage: SessionStorage) -> Self {
        Self::with_limiter(storage, Arc::new(RateLimiter::default()))
    }

    /// Shares `limiter` with other sessions of the same process.
    #[must_use]
    pub fn with_limiter(storage: SessionStorage, limiter: Arc<RateLimiter>) -> Self {
        Self {
            storage,
            limiter,
            abort: AbortSignal::default(),
            connectivity: Connectivity::default(),
        }
    }
}

/// Why [`Session::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The session was reset and should be started anew.
    Reset { redirect: bool },
    Shutdown,
}

pub struct Session<E, S> {
    context: Context,
    api: ApiClient,
    engine: E,
    surface: S,
    reconciler: Reconciler,
    background: Background,
    progress_interval: Duration,
    entry_page: Option<Url>,

    events: Sender,
    inbound: Receiver,
    queue: VecDeque<Event>,
    fetches: FuturesUnordered<BoxFuture<'static, Event>>,
    poll: Option<Interval>,
    sampler: Option<Interval>,
    refresh: Option<Pin<Box<Sleep>>>,
    toggle: Option<Pin<Box<Sleep>>>,
    online: watch::Receiver<bool>,
    outcome: Option<Outcome>,
}

impl<E: Engine, S: Surface> Session<E, S> {
    pub fn new(
        config: &Config,
        context: Context,
        api: ApiClient,
        engine: E,
        surface: S,
        events: Sender,
        inbound: Receiver,
    ) -> Self {
        let online = context.connectivity.subscribe();
        Self {
            context,
            api,
            engine,
            surface,
            reconciler: Reconciler::new(Timing::from(config)),
            background: Background::new(config.image_host.clone()),
            progress_interval: config.progress_interval,
            entry_page: config.entry_page.clone(),

            events,
            inbound,
            queue: VecDeque::new(),
            fetches: FuturesUnordered::new(),
            poll: None,
            sampler: None,
            refresh: None,
            toggle: None,
            online,
            outcome: None,
        }
    }

    /// Handle for UI bindings to send events with.
    #[must_use]
    pub fn sender(&self) -> Sender {
        self.events.clone()
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    #[must_use]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    #[must_use]
    pub fn background(&self) -> &Background {
        &self.background
    }

    /// Connects and runs the session until it is reset or shut down.
    ///
    /// # Errors
    ///
    /// Returns `NoToken` when no access token can be obtained at all.
    pub async fn run(&mut self) -> Result<Outcome> {
        let tokens = self.api.tokens();
        if tokens.token().is_none() && tokens.reload().await.is_none() {
            return Err(Error::no_token("no access token found"));
        }

        self.outcome = None;
        self.surface.status("Loading...");
        self.connect().await;

        loop {
            if let Some(outcome) = self.outcome.take() {
                return Ok(outcome);
            }

            let event = tokio::select! {
                biased;

                event = self.inbound.recv() => match event {
                    Some(event) => event,
                    None => return Ok(Outcome::Shutdown),
                },

                Some(event) = self.fetches.next(), if !self.fetches.is_empty() => event,

                () = tick(&mut self.poll) => Event::Tick,

                () = tick(&mut self.sampler) => match self.sample().await {
                    Some(state) => Event::Sample(state),
                    None => continue,
                },

                () = expire(&mut self.refresh) => {
                    self.refresh = None;
                    Event::RefreshDue
                }

                () = expire(&mut self.toggle) => {
                    self.toggle = None;
                    Event::ToggleDue
                }

                Ok(()) = self.online.changed() => {
                    Event::ConnectivityChanged(*self.online.borrow_and_update())
                }
            };

            self.dispatch(event).await;
        }
    }

    /// Feeds an event to the reconciler and executes the effects, including
    /// those of any follow-up events, before returning.
    pub async fn dispatch(&mut self, event: Event) {
        self.queue.push_back(event);
        while let Some(event) = self.queue.pop_front() {
            for effect in self.reconciler.handle(event) {
                self.execute(effect).await;
            }
        }
    }

    /// Connects the local player, or refreshes a connected one that does not
    /// own playback.
    pub async fn connect(&mut self) {
        self.dispatch(Event::ConnectRequested).await;
    }

    /// Hands playback off to another device if this one plays, then tears
    /// the session down.
    pub async fn disconnect(&mut self) {
        self.dispatch(Event::DisconnectRequested).await;
    }

    /// Aborts in-flight requests, clears session storage and logs out.
    /// Callable in any state, any number of times.
    pub async fn reset(&mut self, redirect: bool) {
        self.dispatch(Event::ResetRequested { redirect }).await;
    }

    /// Fetches and displays the current track.
    ///
    /// Returns `false` when offline, without a token, when nothing is
    /// playing or when the content is not a track. The display is never
    /// cleared in those cases.
    pub async fn refresh_track_info(&mut self) -> bool {
        if !self.context.connectivity.is_online() {
            return false;
        }

        if self.api.tokens().token().is_none() {
            error!("no access token found");
            return false;
        }

        let seq = self.reconciler.issue();
        let outcome = self.api.track_snapshot().await;
        self.dispatch(Event::TrackFetched { seq, outcome }).await;

        self.reconciler.last_refresh()
    }

    /// Disconnects a ready player and aborts whatever is in flight.
    pub async fn shutdown(&mut self) {
        if self.reconciler.phase().is_ready() {
            match self.engine.disconnect().await {
                Ok(true) => info!("player disconnected"),
                Ok(false) => warn!("player refused to disconnect"),
                Err(e) => error!("failed to disconnect player: {e}"),
            }
        }

        self.stop();
        self.outcome = Some(Outcome::Shutdown);
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::FetchTrack { seq } => {
                let api = self.api.clone();
                self.fetches.push(
                    async move {
                        let outcome = api.track_snapshot().await;
                        Event::TrackFetched { seq, outcome }
                    }
                    .boxed(),
                );
            }

            Effect::FetchDevices { seq } => {
                let api = self.api.clone();
                self.fetches.push(
                    async move {
                        let outcome = api.device_snapshot().await;
                        Event::DevicesFetched { seq, outcome }
                    }
                    .boxed(),
                );
            }

            Effect::Transfer { device_id, play } => {
                let api = self.api.clone();
                self.fetches.push(
                    async move {
                        let outcome = api.transfer(&device_id, play).await;
                        Event::TransferFinished { device_id, outcome }
                    }
                    .boxed(),
                );
            }

            Effect::Handoff { local } => {
                self.handoff(&local).await;
                self.queue.push_back(Event::HandoffFinished);
            }

            Effect::RefreshAfter(delay) => {
                self.refresh = Some(Box::pin(time::sleep(delay)));
            }

            Effect::ToggleAfter(delay) => {
                self.toggle = Some(Box::pin(time::sleep(delay)));
            }

            Effect::Engine(command) => self.command(command).await,

            Effect::Render(view) => self.render(&view),
            Effect::Progress(progress) => self.surface.progress(&progress),
            Effect::PlayState(playing) => self.surface.play_state(playing),
            Effect::Devices(menu) => self.surface.devices(&menu),
            Effect::Status(text) => self.surface.status(&text),
            Effect::ToggleFullscreen => {
                self.background.toggle_fullscreen();
                self.surface.background(&self.background);
            }

            Effect::StoreLocalDevice(device_id) => {
                self.context
                    .storage
                    .set(storage::LOCAL_DEVICE_ID, device_id.as_str());
            }

            Effect::ReloadToken => {
                let present = self.api.tokens().reload().await.is_some();
                self.queue.push_back(Event::TokenChecked(present));
            }

            Effect::CheckToken => {
                let present = self.api.tokens().token().is_some();
                self.queue.push_back(Event::TokenChecked(present));
            }

            Effect::Reset { redirect } => self.reset_session(redirect).await,

            Effect::Reschedule(period) => self.poll = Some(interval(period)),
            Effect::StopPolling => self.poll = None,
            Effect::Sampling(sampling) => {
                self.sampler = sampling.then(|| interval(self.progress_interval));
            }
        }
    }

    async fn command(&mut self, command: Command) {
        let result = match command {
            Command::Connect => {
                let result = self.engine.connect().await;
                let connected = *result.as_ref().unwrap_or(&false);
                self.queue.push_back(Event::ConnectFinished(connected));
                result.map(drop)
            }
            Command::Disconnect => self.engine.disconnect().await.map(|disconnected| {
                if !disconnected {
                    warn!("player refused to disconnect");
                }
            }),
            Command::TogglePlay => self.engine.toggle_play().await,
            Command::NextTrack => self.engine.next_track().await,
            Command::PreviousTrack => self.engine.previous_track().await,
            Command::Seek(position) => self.engine.seek(position).await,
            Command::SetVolume(volume) => self.engine.set_volume(volume).await,
        };

        if let Err(e) = result {
            match e.downcast::<SdkError>() {
                Some(sdk) => self
                    .queue
                    .push_back(Event::Engine(EngineEvent::Error(sdk.clone()))),
                None => error!("{e}"),
            }
        }
    }

    fn render(&mut self, view: &View) {
        self.surface.render(view);

        if let Metadata::Track(track) = &view.metadata {
            if let Some(image) = &track.album_image {
                if self.background.apply(image) {
                    self.surface.background(&self.background);
                }
            }
        }
    }

    async fn sample(&mut self) -> Option<LocalState> {
        match self.engine.current_state().await {
            Ok(Some(mut state)) => {
                if state.volume.is_none() {
                    state.volume = self.engine.volume().await.ok();
                }
                Some(state)
            }
            Ok(None) => None,
            Err(e) => {
                debug!("failed to sample player state: {e}");
                None
            }
        }
    }

    /// Moves playback to the first other device, keeping it playing if it
    /// was. Failures are logged and otherwise ignored.
    async fn handoff(&self, local: &DeviceId) {
        let snapshot = match self.api.device_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("failed to transfer playback to another device: {e}");
                return;
            }
        };

        let Some(other) = snapshot
            .devices
            .other_than(local)
            .and_then(|device| device.id.clone())
        else {
            info!("no other devices found to transfer playback to");
            return;
        };

        let play = snapshot
            .playback
            .as_ref()
            .is_some_and(|playback| playback.is_playing);

        match self.api.transfer(&other, play).await {
            Ok(()) => info!("playback transferred to {other}"),
            Err(e) => error!("failed to transfer playback to {other}: {e}"),
        }
    }

    fn stop(&mut self) {
        self.context.abort.abort();
        self.fetches = FuturesUnordered::new();
        self.poll = None;
        self.sampler = None;
        self.refresh = None;
        self.toggle = None;
        self.background.reset();
    }

    async fn reset_session(&mut self, redirect: bool) {
        info!("resetting session");
        self.stop();
        self.context.storage.clear();

        if let Err(e) = self.api.tokens().logout().await {
            error!("failed to logout: {e}");
        }

        if redirect {
            if let Some(url) = &self.entry_page {
                self.surface.navigate(url);
            }
        }

        self.outcome = Some(Outcome::Reset { redirect });
    }
}

/// Interval whose first tick is one period from now.
fn interval(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Waits for the next tick, or forever without an interval.
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn expire(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}
