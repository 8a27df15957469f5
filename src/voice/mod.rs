//! Voice transport contract and resilience core
//!
//! The traits here are the interface the core needs from the underlying
//! voice library: opening sessions, observing their lifecycle, and feeding
//! one long-lived audio sink. `crate::discord` implements them for
//! production; the tests drive the core with in-memory fakes.

pub mod manager;
pub mod playback;
pub mod reconnect;

#[cfg(test)]
pub(crate) mod testutil;

pub use manager::{JoinOutcome, SessionManager};
pub use playback::{PlaybackLoop, PlaybackTiming};
pub use reconnect::{ReconnectSupervisor, RecoveryTiming};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

use crate::decode::PcmStream;
use crate::error::SessionError;

/// Slot holding the live session. The reconnection supervisor replaces
/// its contents on rejoin, so the owner can always reach the session
/// that is actually connected.
pub type SharedSession<S> = Arc<tokio::sync::Mutex<Arc<S>>>;

/// Buffer depth of the state event channels. Deep enough that a slow
/// observer never drops a transition during renegotiation.
pub(crate) const EVENT_CAPACITY: usize = 64;

/// Lifecycle states of a voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Signalling,
    Connecting,
    Ready,
    Disconnected,
    Destroyed,
}

/// Sink states. `Idle` is terminal for the current track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Playing,
    Idle,
}

/// What the sink does when nobody is left listening in the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoListenerPolicy {
    /// Keep transmitting; the default for an always-on stream.
    #[default]
    Continue,
    /// Pause until a listener returns.
    Pause,
}

/// A voice channel and its owning guild, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTarget {
    pub channel_id: u64,
    pub guild_id: u64,
}

/// Self-mute/self-deaf flags, applied identically on join and rejoin.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinFlags {
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// One active voice transport.
#[async_trait]
pub trait VoiceSession: Send + Sync + 'static {
    type Sink: AudioSink;

    fn current_state(&self) -> SessionState;

    /// The channel and guild this session is bound to.
    fn target(&self) -> ChannelTarget;

    /// Lifecycle events, delivered in emission order.
    fn state_events(&self) -> broadcast::Receiver<SessionState>;

    /// Route the sink's audio through this session.
    fn subscribe(&self, sink: &Self::Sink);

    /// Tear the session down. Succeeds silently if it is already gone.
    async fn destroy(&self);
}

/// The long-lived outbound audio pipeline. Created once per process; it
/// survives session replacement by being re-subscribed.
#[async_trait]
pub trait AudioSink: Send + Sync + 'static {
    /// Start playing a stream, preempting whatever was playing before.
    async fn play(&self, stream: PcmStream) -> Result<(), SessionError>;

    fn state_events(&self) -> broadcast::Receiver<SinkState>;
}

/// Opens voice sessions against a resolved channel target.
#[async_trait]
pub trait SessionOpener: Send + Sync + 'static {
    type Sink: AudioSink;
    type Session: VoiceSession<Sink = Self::Sink>;

    /// Resolve a raw channel identifier, rejecting unknown and
    /// non-voice-capable channels.
    async fn resolve(&self, channel_id: u64) -> Result<ChannelTarget, SessionError>;

    async fn open(
        &self,
        target: ChannelTarget,
        flags: JoinFlags,
    ) -> Result<Self::Session, SessionError>;
}

/// Wait on a state event stream until an event matches `predicate`.
///
/// Lagged receivers resume with the next event; a closed stream surfaces
/// as `SessionError::EventsClosed` so callers can unwind their watch.
pub(crate) async fn next_matching<T: Clone + Send + 'static>(
    rx: &mut broadcast::Receiver<T>,
    mut predicate: impl FnMut(&T) -> bool + Send,
) -> Result<T, SessionError> {
    loop {
        match rx.recv().await {
            Ok(event) if predicate(&event) => return Ok(event),
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("State event stream lagged, {} events dropped", missed);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return Err(SessionError::EventsClosed),
        }
    }
}
