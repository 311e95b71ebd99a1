//! Core domain and session lifecycle for the WhatsApp command bot.
//!
//! This crate is transport-agnostic. The protocol client, media search/fetch and
//! image encoding live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod connection;
pub mod domain;
pub mod download;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod pairing;
pub mod ports;
pub mod reconnect;
pub mod session;

pub use errors::{Error, Result};
