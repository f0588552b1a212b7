//! Playback state reconciliation.
//!
//! The [`Reconciler`] merges three sources of truth into one picture of the
//! session: events pushed by the local engine, state polled from the Web
//! API, and user input. It performs no I/O. Each [`Event`] yields the
//! [`Effect`]s the session must execute, and the results of those effects
//! come back as further events.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Ready -> (Playing | Paused) -> Disconnected
//! ```
//!
//! Independently, playback is [`Owned`](Ownership::Owned) by the local
//! device, [`Remote`](Ownership::Remote) on another device, or
//! [`Unknown`](Ownership::Unknown) when either device id is missing.
//!
//! # Sequencing
//!
//! Polls and engine events race: a poll issued before a transfer may
//! complete after it. Every fetch carries a sequence number from one
//! monotonic counter, and a response older than the latest applied one of
//! its kind is discarded. Resetting the session moves all watermarks past
//! every number issued so far.

use std::time::Duration;

use crate::{
    config::Config,
    device::{DeviceId, DeviceList, DeviceSnapshot},
    engine::{clamp_volume, Command, EngineEvent, SdkError, SdkErrorKind},
    error::{Error, ErrorKind},
    events::{Control, Effect, Event},
    track::{Content, PlaybackState, TrackInfo, TrackSnapshot},
    ui::{self, DeviceMenu, Progress, View},
};

pub const NOT_CONNECTED: &str = "Not connected";
pub const OFFLINE: &str = "You are offline. Please check your internet connection.";
pub const TRANSFERRING: &str = "Transferring playback...";
pub const EPISODES_UNSUPPORTED: &str = "Currently doesnt support podcast episodes.";
pub const CONTENT_UNSUPPORTED: &str = "Unsupported content type";
pub const DEVICE_OFFLINE: &str = "Player went offline";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Disconnected,
    Connecting,
    Ready,
    Playing,
    Paused,
}

impl Phase {
    /// Whether the local device is registered with the service.
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready | Self::Playing | Self::Paused)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Ownership {
    Owned,
    Remote,
    Unknown,
}

impl Ownership {
    #[must_use]
    pub fn of(local: Option<&DeviceId>, current: Option<&DeviceId>) -> Self {
        match (local, current) {
            (Some(local), Some(current)) if local == current => Self::Owned,
            (Some(_), Some(_)) => Self::Remote,
            _ => Self::Unknown,
        }
    }
}

/// Timing and tolerance settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timing {
    pub poll_interval: Duration,
    pub backoff_interval: Duration,
    pub skip_refresh_delay: Duration,
    pub toggle_debounce: Duration,
    pub max_poll_failures: u32,
}

impl From<&Config> for Timing {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            backoff_interval: config.backoff_interval,
            skip_refresh_delay: config.skip_refresh_delay,
            toggle_debounce: config.toggle_debounce,
            max_poll_failures: config.max_poll_failures.max(1),
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

pub struct Reconciler {
    timing: Timing,

    phase: Phase,
    ownership: Ownership,
    local_device: Option<DeviceId>,
    current_device: Option<DeviceId>,
    playing: bool,
    track: Option<TrackInfo>,
    devices: DeviceList,

    polling: bool,
    interval: Duration,
    sampling: bool,
    failures: u32,
    disconnecting: bool,
    last_refresh: bool,

    next_seq: u64,
    track_seq: u64,
    devices_seq: u64,
    playback_seq: u64,
}

impl Reconciler {
    #[must_use]
    pub fn new(timing: Timing) -> Self {
        let interval = timing.poll_interval;
        Self {
            timing,
            phase: Phase::Disconnected,
            ownership: Ownership::Unknown,
            local_device: None,
            current_device: None,
            playing: false,
            track: None,
            devices: DeviceList::default(),
            polling: false,
            interval,
            sampling: false,
            failures: 0,
            disconnecting: false,
            last_refresh: false,
            next_seq: 1,
            track_seq: 0,
            devices_seq: 0,
            playback_seq: 0,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    #[must_use]
    pub fn local_device(&self) -> Option<&DeviceId> {
        self.local_device.as_ref()
    }

    #[must_use]
    pub fn track(&self) -> Option<&TrackInfo> {
        self.track.as_ref()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.polling
    }

    /// Current polling interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the latest applied track fetch displayed a track on a known
    /// device.
    #[must_use]
    pub fn last_refresh(&self) -> bool {
        self.last_refresh
    }

    /// Hands out the next sequence number.
    pub fn issue(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::Engine(event) => self.on_engine(event),

            Event::ConnectFinished(true) => {
                info!("player connected");
                Vec::new()
            }
            Event::ConnectFinished(false) => {
                error!("player failed to connect");
                self.reset(true)
            }

            Event::TokenChecked(true) => Vec::new(),
            Event::TokenChecked(false) => {
                error!("no access token found");
                let mut effects = self.stop_polling();
                effects.push(Effect::Status(NOT_CONNECTED.to_owned()));
                effects
            }

            Event::Tick => {
                if self.polling && self.phase.is_ready() && self.ownership == Ownership::Owned {
                    vec![self.fetch_track()]
                } else {
                    trace!("skipping poll: {:?}, {:?}", self.phase, self.ownership);
                    Vec::new()
                }
            }

            Event::RefreshDue => {
                if self.phase.is_ready() {
                    vec![self.fetch_track()]
                } else {
                    Vec::new()
                }
            }

            Event::ToggleDue => {
                if self.phase.is_ready() {
                    vec![Effect::Engine(Command::TogglePlay)]
                } else {
                    Vec::new()
                }
            }

            Event::ConnectivityChanged(false) => {
                warn!("connection lost");
                vec![Effect::Status(OFFLINE.to_owned())]
            }
            Event::ConnectivityChanged(true) => self.resume(),

            Event::Sample(state) => {
                if self.sampling {
                    vec![Effect::Progress(Progress::from(&state))]
                } else {
                    Vec::new()
                }
            }

            Event::TrackFetched { seq, outcome } => {
                if seq < self.track_seq {
                    debug!("discarding stale track info #{seq}");
                    return Vec::new();
                }
                self.track_seq = seq;
                self.last_refresh = false;

                match outcome {
                    Ok(snapshot) => self.apply_track(seq, snapshot),
                    Err(e) => self.on_poll_error(&e),
                }
            }

            Event::DevicesFetched { seq, outcome } => {
                if seq < self.devices_seq {
                    debug!("discarding stale device list #{seq}");
                    return Vec::new();
                }
                self.devices_seq = seq;

                match outcome {
                    Ok(snapshot) => self.apply_devices(seq, snapshot),
                    Err(e) => self.on_devices_error(&e),
                }
            }

            Event::TransferFinished { device_id, outcome } => match outcome {
                Ok(()) => self.on_transferred(device_id),
                Err(e) => {
                    error!("failed to transfer playback to {device_id}: {e}");
                    Vec::new()
                }
            },

            Event::HandoffFinished => {
                if self.disconnecting {
                    self.disconnecting = false;
                    self.teardown()
                } else {
                    Vec::new()
                }
            }

            Event::Control(control) => self.on_control(control),

            Event::DeviceSelected(device_id) => {
                if !self.phase.is_ready() {
                    debug!("ignoring device selection: player not ready");
                    return Vec::new();
                }

                let mut effects = Vec::with_capacity(2);
                if self.current_device.as_ref() != Some(&device_id) {
                    info!(
                        "transferring playback from {} to {device_id}",
                        self.current_device
                            .as_ref()
                            .map_or_else(|| "nowhere".to_owned(), ToString::to_string)
                    );
                    effects.push(Effect::Status(TRANSFERRING.to_owned()));
                }
                effects.push(Effect::Transfer {
                    device_id,
                    play: self.playing,
                });
                effects
            }

            Event::ConnectRequested => self.connect(),
            Event::DisconnectRequested => self.disconnect(),
            Event::ResetRequested { redirect } => self.reset(redirect),
        }
    }

    fn on_engine(&mut self, event: EngineEvent) -> Vec<Effect> {
        match event {
            EngineEvent::Ready { device_id } => {
                info!("ready with device id {device_id}");
                self.local_device = Some(device_id.clone());
                self.phase = Phase::Ready;
                self.ownership = Ownership::of(self.local_device.as_ref(), self.current_device.as_ref());

                let mut effects = vec![Effect::StoreLocalDevice(device_id)];
                effects.extend(self.refresh());
                effects
            }

            EngineEvent::NotReady { device_id } => {
                warn!("device {device_id} has gone offline");
                if self.phase.is_ready() {
                    self.phase = Phase::Connecting;
                }

                let mut effects = vec![Effect::Status(DEVICE_OFFLINE.to_owned())];
                effects.extend(self.sampling());
                effects
            }

            EngineEvent::StateChanged(None) => self.sampling().into_iter().collect(),

            EngineEvent::StateChanged(Some(state)) => {
                self.playing = !state.paused;
                if self.phase.is_ready() {
                    self.phase = if self.playing {
                        Phase::Playing
                    } else {
                        Phase::Paused
                    };
                }

                let mut effects = vec![
                    Effect::PlayState(self.playing),
                    Effect::Progress(Progress::from(&state)),
                ];
                effects.extend(self.refresh());
                effects.extend(self.sampling());
                effects
            }

            EngineEvent::Error(e) => self.on_sdk_error(&e),
        }
    }

    fn on_sdk_error(&mut self, e: &SdkError) -> Vec<Effect> {
        match e.kind {
            SdkErrorKind::Initialization => {
                error!("{e}");
                Vec::new()
            }
            SdkErrorKind::Authentication => {
                error!("{e}");
                if e.message == SdkError::AUTHENTICATION_FAILED {
                    let mut effects = vec![Effect::ReloadToken];
                    effects.extend(self.reset(true));
                    effects
                } else {
                    Vec::new()
                }
            }
            SdkErrorKind::Account => {
                error!("{e}");
                vec![Effect::Status(format!("Error: {}", e.message))]
            }
            SdkErrorKind::Playback => {
                error!("{e}");
                let mut effects = vec![Effect::Status(format!("Error: {}", e.message))];
                if e.message == SdkError::OPERATION_NOT_ALLOWED {
                    effects.push(Effect::ReloadToken);
                }
                effects
            }
            SdkErrorKind::AutoplayFailed => {
                info!("autoplay is not allowed: {}", e.message);
                Vec::new()
            }
        }
    }

    fn on_control(&mut self, control: Control) -> Vec<Effect> {
        if control == Control::ToggleFullscreen {
            return vec![Effect::ToggleFullscreen];
        }

        if !self.phase.is_ready() {
            debug!("ignoring {control:?}: player not ready");
            return Vec::new();
        }

        match control {
            Control::TogglePlay => vec![Effect::ToggleAfter(self.timing.toggle_debounce)],
            Control::Next => vec![
                Effect::Engine(Command::NextTrack),
                Effect::RefreshAfter(self.timing.skip_refresh_delay),
            ],
            Control::Previous => vec![
                Effect::Engine(Command::PreviousTrack),
                Effect::RefreshAfter(self.timing.skip_refresh_delay),
            ],
            Control::Seek(position) => vec![Effect::Engine(Command::Seek(position))],
            Control::SetVolume(volume) => {
                vec![Effect::Engine(Command::SetVolume(clamp_volume(volume)))]
            }
            Control::ToggleFullscreen => Vec::new(),
        }
    }

    fn connect(&mut self) -> Vec<Effect> {
        if self.phase.is_ready() && self.ownership == Ownership::Owned {
            debug!("already connected");
            return Vec::new();
        }

        self.polling = true;
        self.failures = 0;
        self.interval = self.timing.poll_interval;

        let mut effects = vec![Effect::ReloadToken];
        effects.extend(self.refresh());
        effects.push(Effect::Reschedule(self.interval));

        if !self.phase.is_ready() {
            self.phase = Phase::Connecting;
            effects.push(Effect::Engine(Command::Connect));
        }

        effects
    }

    /// Restarts polling that failed while the host was offline.
    fn resume(&mut self) -> Vec<Effect> {
        info!("connection restored");
        if !self.phase.is_ready() || self.polling {
            return Vec::new();
        }

        self.polling = true;
        self.failures = 0;
        self.interval = self.timing.poll_interval;

        let mut effects = Vec::from(self.refresh());
        effects.push(Effect::Reschedule(self.interval));
        effects
    }

    fn disconnect(&mut self) -> Vec<Effect> {
        if self.disconnecting {
            return Vec::new();
        }

        if !self.phase.is_ready() {
            let mut effects = vec![Effect::Render(View::hidden())];
            effects.extend(self.reset(true));
            return effects;
        }

        match (&self.local_device, self.ownership, &self.track) {
            (Some(local), Ownership::Owned, Some(_)) => {
                self.disconnecting = true;
                vec![Effect::Handoff {
                    local: local.clone(),
                }]
            }
            _ => self.teardown(),
        }
    }

    fn teardown(&mut self) -> Vec<Effect> {
        let mut effects = vec![
            Effect::Engine(Command::Disconnect),
            Effect::Render(View::hidden()),
        ];
        effects.extend(self.reset(true));
        effects
    }

    /// Forgets everything about the session. In-flight fetches become
    /// stale.
    fn reset(&mut self, redirect: bool) -> Vec<Effect> {
        let mut effects = vec![Effect::StopPolling];
        if self.sampling {
            effects.push(Effect::Sampling(false));
        }
        effects.push(Effect::Reset { redirect });

        self.phase = Phase::Disconnected;
        self.ownership = Ownership::Unknown;
        self.local_device = None;
        self.current_device = None;
        self.playing = false;
        self.track = None;
        self.devices = DeviceList::default();
        self.polling = false;
        self.interval = self.timing.poll_interval;
        self.sampling = false;
        self.failures = 0;
        self.disconnecting = false;
        self.last_refresh = false;

        self.track_seq = self.next_seq;
        self.devices_seq = self.next_seq;
        self.playback_seq = self.next_seq;

        effects
    }

    fn fetch_track(&mut self) -> Effect {
        Effect::FetchTrack { seq: self.issue() }
    }

    fn fetch_devices(&mut self) -> Effect {
        Effect::FetchDevices { seq: self.issue() }
    }

    fn refresh(&mut self) -> [Effect; 2] {
        [self.fetch_track(), self.fetch_devices()]
    }

    fn stop_polling(&mut self) -> Vec<Effect> {
        if self.polling {
            info!("stopped polling");
            self.polling = false;
            vec![Effect::StopPolling]
        } else {
            Vec::new()
        }
    }

    /// Samples the engine only while the local device plays.
    fn sampling(&mut self) -> Option<Effect> {
        let sampling =
            self.phase.is_ready() && self.ownership == Ownership::Owned && self.playing;
        (sampling != self.sampling).then(|| {
            self.sampling = sampling;
            Effect::Sampling(sampling)
        })
    }

    fn set_interval(&mut self, interval: Duration) -> Option<Effect> {
        if self.interval == interval {
            return None;
        }

        debug!("polling every {}s", interval.as_secs());
        self.interval = interval;
        self.polling.then_some(Effect::Reschedule(interval))
    }

    fn apply_playback(&mut self, seq: u64, playback: Option<&PlaybackState>) {
        if seq < self.playback_seq {
            debug!("discarding stale playback state #{seq}");
            return;
        }
        self.playback_seq = seq;

        self.current_device = playback.and_then(|playback| playback.device_id.clone());
        if let Some(playback) = playback {
            self.playing = playback.is_playing;
            if matches!(self.phase, Phase::Playing | Phase::Paused) {
                self.phase = if self.playing {
                    Phase::Playing
                } else {
                    Phase::Paused
                };
            }
        }

        let ownership = Ownership::of(self.local_device.as_ref(), self.current_device.as_ref());
        if ownership != self.ownership {
            debug!("ownership: {:?} -> {ownership:?}", self.ownership);
            self.ownership = ownership;
        }
    }

    fn apply_track(&mut self, seq: u64, snapshot: TrackSnapshot) -> Vec<Effect> {
        self.apply_playback(seq, snapshot.playback.as_ref());
        self.failures = 0;

        let mut effects = Vec::new();
        effects.extend(self.set_interval(self.timing.poll_interval));

        match snapshot.content.map(Content::track) {
            None => warn!("no track data available"),
            Some(Err(e)) => {
                warn!("{e}");
                effects.push(Effect::Status(e.error.to_string()));
                effects.push(Effect::Render(View::unsupported(self.playing)));
            }
            Some(Ok(track)) => {
                if self.ownership == Ownership::Unknown {
                    error!("local device id or current device id not found");
                } else {
                    self.last_refresh = true;
                }

                effects.push(Effect::Render(ui::project(
                    self.ownership,
                    self.playing,
                    Some(&track),
                )));
                self.track = Some(track);
            }
        }

        effects.extend(self.sampling());
        effects
    }

    fn on_poll_error(&mut self, e: &Error) -> Vec<Effect> {
        let mut effects = Vec::new();

        match e.kind {
            ErrorKind::RateLimitExceeded => {
                warn!("{e}");
                effects.extend(self.set_interval(self.timing.backoff_interval));
            }
            ErrorKind::Cancelled => debug!("{e}"),
            ErrorKind::Offline => effects.push(Effect::Status(OFFLINE.to_owned())),
            ErrorKind::NoToken => effects.push(Effect::Status(NOT_CONNECTED.to_owned())),
            ErrorKind::AuthExpired => effects.push(Effect::CheckToken),
            _ => error!("failed to get track info: {e}"),
        }

        if e.kind.is_poll_failure() {
            self.failures += 1;
            if self.failures >= self.timing.max_poll_failures && self.polling {
                warn!("{} consecutive failed polls", self.failures);
                effects.extend(self.stop_polling());
                effects.push(Effect::Status(NOT_CONNECTED.to_owned()));
            }
        }

        effects
    }

    fn apply_devices(&mut self, seq: u64, snapshot: DeviceSnapshot) -> Vec<Effect> {
        let previous = self.ownership;
        self.devices = snapshot.devices;
        self.apply_playback(seq, snapshot.playback.as_ref());

        // Playback may have moved; the view must follow.
        let render = (self.ownership != previous
            || (self.ownership == Ownership::Owned && self.playing && self.track.is_some()))
        .then(|| Effect::Render(ui::project(self.ownership, self.playing, self.track.as_ref())));

        if snapshot.playback.is_none() || self.devices.is_empty() {
            warn!("no devices found");
            let mut effects = vec![Effect::Status(NOT_CONNECTED.to_owned())];
            effects.extend(render);
            effects.extend(self.sampling());
            return effects;
        }

        let mut effects = vec![Effect::Devices(DeviceMenu::new(
            &self.devices,
            self.current_device.as_ref(),
        ))];
        effects.extend(render);
        effects.extend(self.sampling());
        effects
    }

    fn on_devices_error(&mut self, e: &Error) -> Vec<Effect> {
        match e.kind {
            ErrorKind::RateLimitExceeded => {
                warn!("{e}");
                self.set_interval(self.timing.backoff_interval)
                    .into_iter()
                    .collect()
            }
            ErrorKind::Cancelled => {
                debug!("{e}");
                Vec::new()
            }
            ErrorKind::Offline => vec![Effect::Status(OFFLINE.to_owned())],
            ErrorKind::NoToken => vec![Effect::Status(NOT_CONNECTED.to_owned())],
            _ => {
                error!("failed to get devices: {e}");
                self.reset(true)
            }
        }
    }

    fn on_transferred(&mut self, device_id: DeviceId) -> Vec<Effect> {
        info!("playback transferred to {device_id}");

        // Polls issued before the transfer describe the old device.
        self.playback_seq = self.next_seq;
        self.current_device = Some(device_id);
        self.ownership = Ownership::of(self.local_device.as_ref(), self.current_device.as_ref());

        let mut effects = vec![Effect::Render(ui::project(
            self.ownership,
            self.playing,
            self.track.as_ref(),
        ))];
        effects.push(self.fetch_devices());
        effects.extend(self.sampling());
        effects
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::{
        device::Device,
        engine::LocalState,
        ui::{Metadata, Tier},
    };

    const LOCAL: &str = "local";
    const PHONE: &str = "phone";

    fn track(name: &str) -> TrackInfo {
        TrackInfo {
            name: name.to_owned(),
            artists: vec!["Artist".to_owned()],
            album_image: Some("https://i.scdn.co/image/abc".to_owned()),
            track_id: "t1".to_owned(),
            album_id: Some("al1".to_owned()),
            artist_id: Some("a1".to_owned()),
            duration: Duration::from_secs(200),
        }
    }

    fn playback(device: Option<&str>, is_playing: bool) -> PlaybackState {
        PlaybackState {
            is_playing,
            device_id: device.map(DeviceId::from),
        }
    }

    fn snapshot(device: Option<&str>, is_playing: bool, content: Option<Content>) -> TrackSnapshot {
        TrackSnapshot {
            content,
            playback: Some(playback(device, is_playing)),
        }
    }

    fn playing_on(device: &str) -> TrackSnapshot {
        snapshot(Some(device), true, Some(Content::Track(track("Song"))))
    }

    fn devices(current: &str) -> DeviceSnapshot {
        let device = |id: &str| Device {
            id: Some(DeviceId::from(id)),
            name: id.to_owned(),
            is_current: id == current,
        };

        DeviceSnapshot {
            devices: DeviceList::new(vec![device(LOCAL), device(PHONE)]),
            playback: Some(playback(Some(current), true)),
        }
    }

    /// Connected, ready and polling; initial fetches not yet answered.
    fn connected() -> Reconciler {
        let mut reconciler = Reconciler::new(Timing::default());
        reconciler.handle(Event::ConnectRequested);
        reconciler.handle(Event::Engine(EngineEvent::Ready {
            device_id: DeviceId::from(LOCAL),
        }));
        reconciler
    }

    fn fetched(reconciler: &mut Reconciler, snapshot: TrackSnapshot) -> Vec<Effect> {
        let seq = reconciler.issue();
        reconciler.handle(Event::TrackFetched {
            seq,
            outcome: Ok(snapshot),
        })
    }

    fn failed(reconciler: &mut Reconciler, error: Error) -> Vec<Effect> {
        let seq = reconciler.issue();
        reconciler.handle(Event::TrackFetched {
            seq,
            outcome: Err(error),
        })
    }

    /// Connected with the local device playing a track.
    fn owned() -> Reconciler {
        let mut reconciler = connected();
        fetched(&mut reconciler, playing_on(LOCAL));
        reconciler
    }

    fn renders(effects: &[Effect]) -> Vec<&View> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Render(view) => Some(view),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn connecting_starts_engine_and_polling() {
        let mut reconciler = Reconciler::new(Timing::default());
        let effects = reconciler.handle(Event::ConnectRequested);

        assert_eq!(
            effects,
            vec![
                Effect::ReloadToken,
                Effect::FetchTrack { seq: 1 },
                Effect::FetchDevices { seq: 2 },
                Effect::Reschedule(Duration::from_secs(12)),
                Effect::Engine(Command::Connect),
            ]
        );
        assert_eq!(reconciler.phase(), Phase::Connecting);
        assert!(reconciler.is_polling());
    }

    #[test]
    fn ready_stores_device_and_refreshes() {
        let mut reconciler = Reconciler::new(Timing::default());
        let effects = reconciler.handle(Event::Engine(EngineEvent::Ready {
            device_id: DeviceId::from(LOCAL),
        }));

        assert_eq!(
            effects,
            vec![
                Effect::StoreLocalDevice(DeviceId::from(LOCAL)),
                Effect::FetchTrack { seq: 1 },
                Effect::FetchDevices { seq: 2 },
            ]
        );
        assert_eq!(reconciler.phase(), Phase::Ready);
        assert_eq!(reconciler.local_device(), Some(&DeviceId::from(LOCAL)));
    }

    #[test]
    fn connecting_while_owned_is_a_no_op() {
        let mut reconciler = owned();
        assert!(reconciler.handle(Event::ConnectRequested).is_empty());
    }

    #[test]
    fn reconnecting_a_ready_remote_player_does_not_reconnect_engine() {
        let mut reconciler = connected();
        fetched(&mut reconciler, playing_on(PHONE));

        let effects = reconciler.handle(Event::ConnectRequested);
        assert_eq!(effects[0], Effect::ReloadToken);
        assert!(!effects.contains(&Effect::Engine(Command::Connect)));
    }

    #[test]
    fn ownership_decides_tier() {
        let mut reconciler = connected();
        let effects = fetched(&mut reconciler, playing_on(LOCAL));
        assert_eq!(reconciler.ownership(), Ownership::Owned);
        assert_eq!(renders(&effects)[0].tier, Tier::Full);
        assert!(reconciler.last_refresh());

        let effects = fetched(&mut reconciler, playing_on(PHONE));
        assert_eq!(reconciler.ownership(), Ownership::Remote);
        let view = renders(&effects)[0];
        assert_eq!(view.tier, Tier::Half);
        assert_eq!(view.metadata, Metadata::Track(track("Song")));

        let effects = fetched(
            &mut reconciler,
            snapshot(None, true, Some(Content::Track(track("Song")))),
        );
        assert_eq!(reconciler.ownership(), Ownership::Unknown);
        assert_eq!(renders(&effects)[0].tier, Tier::Hidden);
        assert!(!reconciler.last_refresh());
    }

    #[test]
    fn stale_responses_are_discarded() {
        let mut reconciler = connected();
        let older = reconciler.issue();
        let newer = reconciler.issue();

        reconciler.handle(Event::TrackFetched {
            seq: newer,
            outcome: Ok(playing_on(PHONE)),
        });
        let effects = reconciler.handle(Event::TrackFetched {
            seq: older,
            outcome: Ok(playing_on(LOCAL)),
        });

        assert!(effects.is_empty());
        assert_eq!(reconciler.ownership(), Ownership::Remote);

        // Stale failures do not count either.
        let effects = reconciler.handle(Event::TrackFetched {
            seq: older,
            outcome: Err(Error::request_failed("/me/player", StatusCode::BAD_GATEWAY)),
        });
        assert!(effects.is_empty());
        assert!(reconciler.is_polling());
    }

    #[test]
    fn device_list_playback_state_is_sequenced_too() {
        let mut reconciler = connected();
        let earlier = reconciler.issue();
        fetched(&mut reconciler, playing_on(LOCAL));

        // Issued before the track fetch that was just applied.
        reconciler.handle(Event::DevicesFetched {
            seq: earlier,
            outcome: Ok(devices(PHONE)),
        });
        assert_eq!(reconciler.ownership(), Ownership::Owned);
    }

    #[test]
    fn polling_only_while_ready_and_owned() {
        let mut reconciler = Reconciler::new(Timing::default());
        assert!(reconciler.handle(Event::Tick).is_empty());

        let mut reconciler = owned();
        assert!(matches!(
            reconciler.handle(Event::Tick).as_slice(),
            [Effect::FetchTrack { .. }]
        ));

        fetched(&mut reconciler, playing_on(PHONE));
        assert!(reconciler.handle(Event::Tick).is_empty());
    }

    #[test]
    fn rate_limiting_lengthens_the_interval_until_a_poll_succeeds() {
        let mut reconciler = owned();

        let effects = failed(&mut reconciler, Error::rate_limit_exceeded("slow down"));
        assert_eq!(effects, vec![Effect::Reschedule(Duration::from_secs(18))]);
        assert!(reconciler.is_polling());

        // A second rejection changes nothing.
        assert!(failed(&mut reconciler, Error::rate_limit_exceeded("slow down")).is_empty());

        let effects = fetched(&mut reconciler, playing_on(LOCAL));
        assert_eq!(effects[0], Effect::Reschedule(Duration::from_secs(12)));
    }

    #[test]
    fn failed_poll_stops_polling() {
        let mut reconciler = owned();
        let effects = failed(
            &mut reconciler,
            Error::request_failed("/me/player", StatusCode::BAD_GATEWAY),
        );

        assert_eq!(
            effects,
            vec![
                Effect::StopPolling,
                Effect::Status(NOT_CONNECTED.to_owned())
            ]
        );
        assert!(!reconciler.is_polling());
        assert!(reconciler.handle(Event::Tick).is_empty());
        // The previous view is kept.
        assert_eq!(reconciler.track(), Some(&track("Song")));
    }

    #[test]
    fn failure_threshold_is_configurable() {
        let mut reconciler = Reconciler::new(Timing {
            max_poll_failures: 2,
            ..Timing::default()
        });
        reconciler.handle(Event::ConnectRequested);

        let error = || Error::request_failed("/me/player", StatusCode::BAD_GATEWAY);
        assert!(failed(&mut reconciler, error()).is_empty());
        assert!(reconciler.is_polling());
        assert!(failed(&mut reconciler, error()).contains(&Effect::StopPolling));
    }

    #[test]
    fn expired_token_is_checked_once_reloaded() {
        let mut reconciler = owned();
        let effects = failed(&mut reconciler, Error::auth_expired("expired"));
        assert_eq!(effects, vec![Effect::CheckToken]);
        assert!(reconciler.is_polling());

        // The reload worked: polling carries on.
        assert!(reconciler.handle(Event::TokenChecked(true)).is_empty());
        assert!(reconciler.is_polling());
        assert!(matches!(
            reconciler.handle(Event::Tick).as_slice(),
            [Effect::FetchTrack { .. }]
        ));
    }

    #[test]
    fn expired_token_without_replacement_stops_polling() {
        let mut reconciler = owned();
        failed(&mut reconciler, Error::auth_expired("expired"));

        let effects = reconciler.handle(Event::TokenChecked(false));
        assert_eq!(
            effects,
            vec![
                Effect::StopPolling,
                Effect::Status(NOT_CONNECTED.to_owned()),
            ]
        );
        assert!(!reconciler.is_polling());
        assert!(reconciler.handle(Event::Tick).is_empty());
    }

    #[test]
    fn restored_connectivity_resumes_polling() {
        let mut reconciler = owned();
        let effects = failed(&mut reconciler, Error::offline("no network"));
        assert!(effects.contains(&Effect::StopPolling));
        assert!(!reconciler.is_polling());

        assert_eq!(
            reconciler.handle(Event::ConnectivityChanged(false)),
            vec![Effect::Status(OFFLINE.to_owned())]
        );

        let effects = reconciler.handle(Event::ConnectivityChanged(true));
        assert!(matches!(
            effects.as_slice(),
            [
                Effect::FetchTrack { .. },
                Effect::FetchDevices { .. },
                Effect::Reschedule(interval),
            ] if *interval == Duration::from_secs(12)
        ));
        assert!(reconciler.is_polling());

        // Nothing to resume while polling or before the player is ready.
        assert!(reconciler.handle(Event::ConnectivityChanged(true)).is_empty());
        let mut reconciler = Reconciler::new(Timing::default());
        assert!(reconciler.handle(Event::ConnectivityChanged(true)).is_empty());
    }

    #[test]
    fn offline_shows_message() {
        let mut reconciler = owned();
        let effects = failed(&mut reconciler, Error::offline("no network"));
        assert_eq!(effects[0], Effect::Status(OFFLINE.to_owned()));
        assert!(renders(&effects).is_empty());
    }

    #[test]
    fn unsupported_content_keeps_metadata_and_polling() {
        let mut reconciler = owned();

        let effects = fetched(&mut reconciler, snapshot(Some(LOCAL), true, Some(Content::Episode)));
        assert_eq!(
            effects,
            vec![
                Effect::Status(EPISODES_UNSUPPORTED.to_owned()),
                Effect::Render(View::unsupported(true)),
            ]
        );
        assert!(!reconciler.last_refresh());
        assert!(reconciler.is_polling());
        assert_eq!(reconciler.track(), Some(&track("Song")));

        let effects = fetched(
            &mut reconciler,
            snapshot(Some(LOCAL), true, Some(Content::Unsupported)),
        );
        assert_eq!(effects[0], Effect::Status(CONTENT_UNSUPPORTED.to_owned()));
    }

    #[test]
    fn missing_item_changes_nothing() {
        let mut reconciler = owned();
        let effects = fetched(&mut reconciler, snapshot(Some(LOCAL), true, None));
        assert!(renders(&effects).is_empty());
        assert!(!reconciler.last_refresh());
        assert!(reconciler.is_polling());
    }

    #[test]
    fn state_change_applies_play_state_first() {
        let mut reconciler = owned();
        let effects = reconciler.handle(Event::Engine(EngineEvent::StateChanged(Some(
            LocalState {
                paused: true,
                position: Duration::from_secs(61),
                duration: Duration::from_secs(200),
                volume: None,
            },
        ))));

        assert_eq!(effects[0], Effect::PlayState(false));
        assert!(matches!(&effects[1], Effect::Progress(progress) if progress.elapsed() == "1:01"));
        assert!(matches!(effects[2], Effect::FetchTrack { .. }));
        assert!(matches!(effects[3], Effect::FetchDevices { .. }));
        assert_eq!(effects[4], Effect::Sampling(false));
        assert_eq!(reconciler.phase(), Phase::Paused);
    }

    #[test]
    fn samples_only_while_owned_and_playing() {
        let mut reconciler = connected();
        let sample = LocalState {
            paused: false,
            position: Duration::ZERO,
            duration: Duration::from_secs(1),
            volume: Some(0.5),
        };
        assert!(reconciler.handle(Event::Sample(sample.clone())).is_empty());

        let effects = fetched(&mut reconciler, playing_on(LOCAL));
        assert_eq!(effects.last(), Some(&Effect::Sampling(true)));
        assert!(matches!(
            reconciler.handle(Event::Sample(sample)).as_slice(),
            [Effect::Progress(Progress { volume: Some(50), .. })]
        ));
    }

    #[test]
    fn skipping_debounces_a_refresh() {
        let mut reconciler = owned();
        assert_eq!(
            reconciler.handle(Event::Control(Control::Next)),
            vec![
                Effect::Engine(Command::NextTrack),
                Effect::RefreshAfter(Duration::from_millis(1900)),
            ]
        );
        assert!(matches!(
            reconciler.handle(Event::RefreshDue).as_slice(),
            [Effect::FetchTrack { .. }]
        ));
    }

    #[test]
    fn toggling_play_is_debounced() {
        let mut reconciler = owned();
        assert_eq!(
            reconciler.handle(Event::Control(Control::TogglePlay)),
            vec![Effect::ToggleAfter(Duration::from_millis(80))]
        );
        assert_eq!(
            reconciler.handle(Event::ToggleDue),
            vec![Effect::Engine(Command::TogglePlay)]
        );

        let mut reconciler = Reconciler::new(Timing::default());
        assert!(reconciler.handle(Event::ToggleDue).is_empty());
        assert_eq!(
            reconciler.handle(Event::Control(Control::ToggleFullscreen)),
            vec![Effect::ToggleFullscreen]
        );
    }

    #[test]
    fn controls_need_a_ready_player() {
        let mut reconciler = Reconciler::new(Timing::default());
        assert!(reconciler.handle(Event::Control(Control::TogglePlay)).is_empty());

        let mut reconciler = owned();
        assert_eq!(
            reconciler.handle(Event::Control(Control::SetVolume(1.7))),
            vec![Effect::Engine(Command::SetVolume(1.0))]
        );
    }

    #[test]
    fn selecting_a_device_transfers_and_sets_ownership() {
        let mut reconciler = owned();

        let effects = reconciler.handle(Event::DeviceSelected(DeviceId::from(PHONE)));
        assert_eq!(
            effects,
            vec![
                Effect::Status(TRANSFERRING.to_owned()),
                Effect::Transfer {
                    device_id: DeviceId::from(PHONE),
                    play: true,
                },
            ]
        );

        let effects = reconciler.handle(Event::TransferFinished {
            device_id: DeviceId::from(PHONE),
            outcome: Ok(()),
        });
        assert_eq!(reconciler.ownership(), Ownership::Remote);
        assert_eq!(renders(&effects)[0].tier, Tier::Half);

        reconciler.handle(Event::TransferFinished {
            device_id: DeviceId::from(LOCAL),
            outcome: Ok(()),
        });
        assert_eq!(reconciler.ownership(), Ownership::Owned);
    }

    #[test]
    fn polls_issued_before_a_transfer_are_stale() {
        let mut reconciler = owned();
        let before = reconciler.issue();

        reconciler.handle(Event::TransferFinished {
            device_id: DeviceId::from(PHONE),
            outcome: Ok(()),
        });
        reconciler.handle(Event::TrackFetched {
            seq: before,
            outcome: Ok(playing_on(LOCAL)),
        });
        assert_eq!(reconciler.ownership(), Ownership::Remote);
    }

    #[test]
    fn failed_transfer_is_not_fatal() {
        let mut reconciler = owned();
        let effects = reconciler.handle(Event::TransferFinished {
            device_id: DeviceId::from(PHONE),
            outcome: Err(Error::request_failed("/me/player", StatusCode::NOT_FOUND)),
        });
        assert!(effects.is_empty());
        assert_eq!(reconciler.ownership(), Ownership::Owned);
    }

    #[test]
    fn disconnect_hands_off_before_teardown() {
        let mut reconciler = owned();

        let effects = reconciler.handle(Event::DisconnectRequested);
        assert_eq!(
            effects,
            vec![Effect::Handoff {
                local: DeviceId::from(LOCAL)
            }]
        );
        // Repeated clicks while handing off are ignored.
        assert!(reconciler.handle(Event::DisconnectRequested).is_empty());

        let effects = reconciler.handle(Event::HandoffFinished);
        assert_eq!(effects[0], Effect::Engine(Command::Disconnect));
        assert_eq!(effects[1], Effect::Render(View::hidden()));
        assert_eq!(effects.last(), Some(&Effect::Reset { redirect: true }));
        assert_eq!(reconciler.phase(), Phase::Disconnected);
        assert_eq!(reconciler.local_device(), None);
    }

    #[test]
    fn disconnect_without_local_playback_tears_down_directly() {
        let mut reconciler = connected();
        fetched(&mut reconciler, playing_on(PHONE));

        let effects = reconciler.handle(Event::DisconnectRequested);
        assert_eq!(effects[0], Effect::Engine(Command::Disconnect));
        assert!(!effects
            .iter()
            .any(|effect| matches!(effect, Effect::Handoff { .. })));
    }

    #[test]
    fn disconnect_before_ready_resets() {
        let mut reconciler = Reconciler::new(Timing::default());
        let effects = reconciler.handle(Event::DisconnectRequested);
        assert_eq!(
            effects,
            vec![
                Effect::Render(View::hidden()),
                Effect::StopPolling,
                Effect::Reset { redirect: true },
            ]
        );
    }

    #[test]
    fn reset_makes_in_flight_fetches_stale() {
        let mut reconciler = owned();
        let seq = reconciler.issue();

        let effects = reconciler.handle(Event::ResetRequested { redirect: false });
        assert_eq!(effects.last(), Some(&Effect::Reset { redirect: false }));

        let effects = reconciler.handle(Event::TrackFetched {
            seq,
            outcome: Ok(playing_on(LOCAL)),
        });
        assert!(effects.is_empty());
        assert_eq!(reconciler.ownership(), Ownership::Unknown);
        assert_eq!(reconciler.track(), None);
    }

    #[test]
    fn device_list_selects_current_device() {
        let mut reconciler = owned();
        let seq = reconciler.issue();
        let effects = reconciler.handle(Event::DevicesFetched {
            seq,
            outcome: Ok(devices(LOCAL)),
        });

        let Effect::Devices(menu) = &effects[0] else {
            panic!("expected a device menu");
        };
        assert_eq!(menu.entries.len(), 2);
        assert_eq!(menu.selected().unwrap().name, LOCAL);
        assert_eq!(renders(&effects)[0].tier, Tier::Full);
    }

    #[test]
    fn device_list_moving_playback_elsewhere_downgrades_the_view() {
        let mut reconciler = owned();
        let seq = reconciler.issue();
        let effects = reconciler.handle(Event::DevicesFetched {
            seq,
            outcome: Ok(devices(PHONE)),
        });

        assert_eq!(reconciler.ownership(), Ownership::Remote);
        let views = renders(&effects);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].tier, Tier::Half);
        assert!(matches!(&views[0].metadata, Metadata::Track(track) if track.name == "Song"));
        assert_eq!(effects.last(), Some(&Effect::Sampling(false)));

        // Nobody playing at all hides the player.
        let seq = reconciler.issue();
        let effects = reconciler.handle(Event::DevicesFetched {
            seq,
            outcome: Ok(DeviceSnapshot {
                devices: DeviceList::default(),
                playback: None,
            }),
        });
        assert_eq!(reconciler.ownership(), Ownership::Unknown);
        assert_eq!(effects[0], Effect::Status(NOT_CONNECTED.to_owned()));
        assert_eq!(renders(&effects)[0].tier, Tier::Hidden);
    }

    #[test]
    fn device_list_failure_resets_session() {
        let mut reconciler = owned();
        let seq = reconciler.issue();
        let effects = reconciler.handle(Event::DevicesFetched {
            seq,
            outcome: Err(Error::request_failed("/me/player/devices", StatusCode::NOT_FOUND)),
        });
        assert_eq!(effects.last(), Some(&Effect::Reset { redirect: true }));

        let mut reconciler = owned();
        let seq = reconciler.issue();
        let effects = reconciler.handle(Event::DevicesFetched {
            seq,
            outcome: Err(Error::rate_limit_exceeded("slow down")),
        });
        assert_eq!(effects, vec![Effect::Reschedule(Duration::from_secs(18))]);
    }

    #[test]
    fn sdk_errors() {
        let mut reconciler = owned();
        let effects = reconciler.handle(Event::Engine(EngineEvent::Error(SdkError::new(
            SdkErrorKind::Playback,
            SdkError::OPERATION_NOT_ALLOWED,
        ))));
        assert_eq!(
            effects,
            vec![
                Effect::Status("Error: The operation is not allowed.".to_owned()),
                Effect::ReloadToken,
            ]
        );

        let effects = reconciler.handle(Event::Engine(EngineEvent::Error(SdkError::new(
            SdkErrorKind::Account,
            "Premium required",
        ))));
        assert_eq!(effects, vec![Effect::Status("Error: Premium required".to_owned())]);

        let effects = reconciler.handle(Event::Engine(EngineEvent::Error(SdkError::new(
            SdkErrorKind::AutoplayFailed,
            "blocked",
        ))));
        assert!(effects.is_empty());

        let effects = reconciler.handle(Event::Engine(EngineEvent::Error(SdkError::new(
            SdkErrorKind::Authentication,
            SdkError::AUTHENTICATION_FAILED,
        ))));
        assert_eq!(effects[0], Effect::ReloadToken);
        assert_eq!(effects.last(), Some(&Effect::Reset { redirect: true }));
    }

    #[test]
    fn failed_connect_resets() {
        let mut reconciler = Reconciler::new(Timing::default());
        reconciler.handle(Event::ConnectRequested);
        let effects = reconciler.handle(Event::ConnectFinished(false));
        assert_eq!(effects.last(), Some(&Effect::Reset { redirect: true }));
    }
}
