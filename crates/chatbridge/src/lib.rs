//! Chatbridge: a control plane for an automated messaging client.
//!
//! One [`client::ClientAdapter`] owns the messaging driver; lifecycle and
//! message events flow through the [`hub::EventHub`] to browser sockets
//! ([`ws`]) while the REST API ([`api`]) drives the adapter.

pub mod api;
pub mod client;
pub mod config;
pub mod driver;
pub mod hub;
pub mod ws;
