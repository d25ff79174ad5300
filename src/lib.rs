//! Mesh video rooms over WebRTC.
//!
//! The client side ([`session`]) joins a named room through a signaling
//! relay and keeps one direct peer connection per remote participant.  The
//! relay side ([`relay`]) is the axum server those clients talk to.

pub mod config;
pub mod error;
pub mod local;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod relay_client;
pub mod roster;
pub mod session;
pub mod signaling;
pub mod transport;

#[cfg(test)]
mod testing;
