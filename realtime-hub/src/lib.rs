//! Real-time connection hub: fans messages out to many concurrently
//! connected WebSocket clients without sharing the membership set.
//!
//! - [`envelope`] defines connection identities, the message unit, and its
//!   JSON wire shape.
//! - [`hub`] owns the membership set and runs the single event loop that
//!   serialises register, unregister, and broadcast.
//! - [`connection`] runs the inbound and outbound loops for one transport and
//!   its bounded mailbox.
//! - [`transport`] adapts an upgraded WebSocket to frames.
//! - [`server`] exposes the hub over HTTP (`/api/ws`, `/api/health`, static
//!   files).
//! - [`cli`], [`config`], and [`client`] provide the command line, typed
//!   settings, and a terminal chat client.

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod hub;
pub mod server;
pub mod transport;
