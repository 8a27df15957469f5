//! Discord implementation of the voice transport contract
//!
//! serenity carries the gateway, songbird carries the voice driver. The
//! lifecycle states the core observes are synthesized from songbird's
//! driver events.

pub mod bot;
pub mod driver;

pub use driver::{DiscordOpener, DiscordSession, DiscordSink};
