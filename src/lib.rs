//! Headless playback session manager for the Spotify Web API.
//!
//! Hosts a playback device for an account, keeps a UI in sync with what
//! plays where, and controls playback under the API's rate limits, expiring
//! tokens and competing devices.
//!
//! # Architecture
//!
//! * [`session`] drives the event loop and owns the shared [`Context`](session::Context)
//! * [`reconciler`] decides what each event means for playback and display
//! * [`api`] talks to the Web API through the [`rate_limit`]er with tokens
//!   from [`token`]
//! * [`engine`] is the contract with the playback device, implemented for
//!   Connect devices by [`remote`]
//! * [`ui`] projects state onto a display [`Surface`](ui::Surface)
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod api;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod http;
pub mod protocol;
pub mod rate_limit;
pub mod reconciler;
pub mod remote;
pub mod session;
pub mod signal;
pub mod storage;
pub mod token;
pub mod track;
pub mod ui;
