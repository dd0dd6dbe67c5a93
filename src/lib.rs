//! # Scrobble Relay
//!
//! Durable scrobble submission for music players.
//!
//! This crate provides:
//! - A validated scrobble record model and its JSON wire encoding
//! - A crash-recoverable on-disk queue of pending scrobbles
//! - A background worker submitting queued scrobbles with retry and backoff
//! - A client facade tying queue, worker and configuration together
//!
//! Ingestion is decoupled from submission: recording a scrobble never waits
//! on the network, and scrobbles recorded while the service is unreachable
//! or the configuration is invalid are kept until they can be submitted.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod delivery;
pub mod error;
pub mod queue;
pub mod record;
pub mod wire;
pub mod worker;

pub use client::ScrobbleClient;
pub use config::Config;
pub use error::{Error, Result};
pub use record::{meets_threshold, ScrobbleInfo, Track};
pub use worker::BackoffPolicy;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "scrobble-relay";
