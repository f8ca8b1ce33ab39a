//! Core logic for the label print bot.
//!
//! This crate is framework-agnostic. Telegram and the CUPS print client live
//! behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod copies;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod handler;
pub mod logging;
pub mod messaging;
pub mod normalizer;
pub mod print;
pub mod security;

pub use errors::{Error, Result};
