//! `ambientled` drives LED strips so their colors follow a region of the screen.
//!
//! # Structure
//!
//! * [config_store]: loads `config.json` and republishes it every time the file changes
//! * [transport]: serial and network links streaming raw RGB frames to a strip
//! * [updater]: per-strip loop smoothing target colors and pushing them to the transport
//! * [supervisor]: keeps one updater running per configured strip
//!
//! Screen capture is not part of this crate: a capture collaborator publishes target colors
//! through the [updater::TargetFrame] of each strip.

#[macro_use]
extern crate tracing;
#[macro_use]
extern crate serde_derive;

pub mod color;
pub mod config_store;
pub mod models;
pub mod pause;
pub mod serde;
pub mod supervisor;
pub mod transport;
pub mod updater;
