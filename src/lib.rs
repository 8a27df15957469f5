//! # voicebeacon
//!
//! Unattended 24/7 presence in a single voice channel, looping one fixed
//! audio source forever and repairing its own connection.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                            voicebeacon                             │
//! │                                                                    │
//! │  ┌──────────┐   ready    ┌─────────────────┐                       │
//! │  │ Gateway  ├───────────►│ Session Manager │                       │
//! │  │ (discord)│            └────────┬────────┘                       │
//! │  └──────────┘      open/subscribe │ start once                     │
//! │                  ┌────────────────┼────────────────┐               │
//! │                  ▼                │                ▼               │
//! │        ┌──────────────┐          │       ┌───────────────┐        │
//! │        │ Reconnection │          │       │ Playback Loop │        │
//! │        │  Supervisor  │          │       │  (singleton)  │        │
//! │        └──────┬───────┘          │       └───────┬───────┘        │
//! │   state events│ destroy/rejoin   │    spawn/kill │               │
//! │               ▼                  ▼               ▼               │
//! │          [ Session ]◄──────┌───────────┐  ┌──────────────────┐   │
//! │               ▲            │ Audio Sink│◄─┤ ffmpeg process   │   │
//! │               └──subscribe─┤(long-lived)  │ s16le 48kHz 2ch  │   │
//! │                            └─────┬─────┘  └──────────────────┘   │
//! │                                  ▼                                 │
//! │                            voice channel       ┌────────────────┐  │
//! │                                                │ Uptime endpoint│  │
//! │                                                │  GET / → 200   │  │
//! │                                                └────────────────┘  │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The resilience core (`voice`) is generic over the transport contract so
//! tests can drive it with in-memory fakes; `discord` provides the
//! production implementation on top of serenity and songbird.

pub mod config;
pub mod decode;
pub mod discord;
pub mod error;
pub mod uptime;
pub mod voice;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate the decoder emits and the driver consumes
    pub const SAMPLE_RATE: u32 = 48_000;

    /// Channel count (stereo)
    pub const CHANNELS: u32 = 2;

    /// Pause between playback iterations once a track reaches idle
    pub const RESTART_DELAY_MS: u64 = 200;

    /// Pause after a failed playback iteration before the next attempt
    pub const ERROR_BACKOFF_MS: u64 = 2_000;

    /// Bounded wait for each renegotiation state after a disconnect
    pub const STATE_WAIT_MS: u64 = 5_000;

    /// Pause between failed rejoin attempts
    pub const REJOIN_BACKOFF_MS: u64 = 2_000;

    /// Default port for the uptime endpoint
    pub const DEFAULT_HTTP_PORT: u16 = 8080;

    /// Default audio source path
    pub const DEFAULT_AUDIO_PATH: &str = "audio.mp3";

    /// Grace delay between an interrupt signal and process exit
    pub const SHUTDOWN_GRACE_MS: u64 = 1_500;
}
