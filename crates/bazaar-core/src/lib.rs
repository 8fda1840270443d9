//! Core domain + application logic for the marketplace bot.
//!
//! This crate is intentionally framework-agnostic. Telegram (or any other chat
//! platform) lives behind ports (traits) implemented in adapter crates.

pub mod action;
pub mod catalog;
pub mod config;
pub mod cooldown;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod market;
pub mod messaging;
pub mod policy;
pub mod ports;
pub mod session;
pub mod utils;

pub use errors::{Error, Result};

#[cfg(test)]
pub(crate) mod testing;
