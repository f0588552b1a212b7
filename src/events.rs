//! Messages in and out of the playback reconciler.
//!
//! Everything that can change the session enters as an [`Event`]: UI
//! actions, engine notifications, timer ticks and the results of fetches
//! the session issued earlier. The reconciler answers each event with a
//! list of [`Effect`]s that the session executes in order.
//!
//! Engines and UI bindings hold a [`Sender`] and never touch the session
//! directly.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::{
    device::{DeviceId, DeviceSnapshot},
    engine::{Command, EngineEvent, LocalState},
    error::Result,
    track::TrackSnapshot,
    ui::{DeviceMenu, Progress, View},
};

/// User input from the UI surface.
#[derive(Clone, Debug, PartialEq)]
pub enum Control {
    TogglePlay,
    Next,
    Previous,
    Seek(Duration),
    /// Volume in `[0, 1]`.
    SetVolume(f32),
    ToggleFullscreen,
}

#[derive(Debug)]
pub enum Event {
    Engine(EngineEvent),
    /// Outcome of [`Command::Connect`].
    ConnectFinished(bool),
    /// Whether a token is present after a reload or an expired token.
    TokenChecked(bool),

    /// The polling interval elapsed.
    Tick,
    /// The debounced refresh after skipping a track is due.
    RefreshDue,
    /// The debounced play/pause toggle is due.
    ToggleDue,
    /// The host went offline or came back.
    ConnectivityChanged(bool),
    /// Periodic sample of the local engine while it plays.
    Sample(LocalState),

    TrackFetched {
        seq: u64,
        outcome: Result<TrackSnapshot>,
    },
    DevicesFetched {
        seq: u64,
        outcome: Result<DeviceSnapshot>,
    },
    TransferFinished {
        device_id: DeviceId,
        outcome: Result<()>,
    },
    /// Playback was handed off before disconnecting, or there was nothing
    /// to hand off to.
    HandoffFinished,

    Control(Control),
    DeviceSelected(DeviceId),
    ConnectRequested,
    DisconnectRequested,
    ResetRequested {
        redirect: bool,
    },
}

impl From<EngineEvent> for Event {
    fn from(event: EngineEvent) -> Self {
        Self::Engine(event)
    }
}

impl From<Control> for Event {
    fn from(control: Control) -> Self {
        Self::Control(control)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Fetch the current item and playback state.
    FetchTrack { seq: u64 },
    /// Fetch the device list and playback state.
    FetchDevices { seq: u64 },
    /// Move playback to a device.
    Transfer { device_id: DeviceId, play: bool },
    /// Move playback off the local device ahead of a disconnect.
    Handoff { local: DeviceId },
    /// Fetch the current item once `delay` passes without another skip.
    RefreshAfter(Duration),
    /// Toggle play/pause once `delay` passes without another toggle.
    ToggleAfter(Duration),

    Engine(Command),

    Render(View),
    Progress(Progress),
    PlayState(bool),
    Devices(DeviceMenu),
    Status(String),
    ToggleFullscreen,

    StoreLocalDevice(DeviceId),
    /// Invalidate the token and fetch a fresh one.
    ReloadToken,
    /// Report whether a token is present.
    CheckToken,
    Reset { redirect: bool },

    /// (Re)start polling at this interval.
    Reschedule(Duration),
    StopPolling,
    /// Start or stop sampling the local engine.
    Sampling(bool),
}

/// Handle to the session's inbound event queue.
#[derive(Clone, Debug)]
pub struct Sender(mpsc::UnboundedSender<Event>);

impl Sender {
    /// Queues an event. Events sent after the session has gone are dropped.
    pub fn send(&self, event: impl Into<Event>) {
        if self.0.send(event.into()).is_err() {
            debug!("session gone; dropping event");
        }
    }
}

#[derive(Debug)]
pub struct Receiver(mpsc::UnboundedReceiver<Event>);

impl Receiver {
    pub async fn recv(&mut self) -> Option<Event> {
        self.0.recv().await
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.0.try_recv().ok()
    }
}

/// Creates an unbounded event queue.
#[must_use]
pub fn channel() -> (Sender, Receiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Sender(tx), Receiver(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (tx, mut rx) = channel();
        tx.send(Control::Next);
        tx.send(EngineEvent::StateChanged(None));

        assert!(matches!(rx.recv().await, Some(Event::Control(Control::Next))));
        assert!(matches!(
            rx.recv().await,
            Some(Event::Engine(EngineEvent::StateChanged(None)))
        ));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn sending_after_close_is_harmless() {
        let (tx, rx) = channel();
        drop(rx);
        tx.send(Event::Tick);
    }
}
