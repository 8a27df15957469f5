//! Session reconnection supervision
//!
//! Watches a session's lifecycle events and distinguishes transient
//! transport flaps, which the session renegotiates on its own, from
//! terminal drops that need a destroy-and-rejoin with a fresh session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::constants::{REJOIN_BACKOFF_MS, STATE_WAIT_MS};

use super::{
    next_matching, ChannelTarget, JoinFlags, SessionOpener, SessionState, SharedSession,
    VoiceSession,
};

/// Bounds for the recovery protocol.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryTiming {
    /// Bounded wait for the session to re-enter `Signalling`, and again
    /// for `Connecting`, after a disconnect.
    pub state_wait: Duration,
    /// Pause between failed rejoin attempts.
    pub rejoin_backoff: Duration,
}

impl Default for RecoveryTiming {
    fn default() -> Self {
        Self {
            state_wait: Duration::from_millis(STATE_WAIT_MS),
            rejoin_backoff: Duration::from_millis(REJOIN_BACKOFF_MS),
        }
    }
}

/// Owns the current session and replaces it when recovery fails.
///
/// The playback loop never sees the replacement: it observes the sink,
/// and the sink is simply re-subscribed to whichever session is live.
pub struct ReconnectSupervisor<O: SessionOpener> {
    opener: Arc<O>,
    sink: Arc<O::Sink>,
    target: ChannelTarget,
    flags: JoinFlags,
    timing: RecoveryTiming,
}

impl<O: SessionOpener> ReconnectSupervisor<O> {
    pub fn new(
        opener: Arc<O>,
        sink: Arc<O::Sink>,
        target: ChannelTarget,
        flags: JoinFlags,
    ) -> Self {
        Self {
            opener,
            sink,
            target,
            flags,
            timing: RecoveryTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: RecoveryTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Supervise the session held in `slot` until it is destroyed
    /// externally or its event stream closes. Terminal recovery publishes
    /// the replacement session into the slot.
    pub async fn supervise(self, slot: SharedSession<O::Session>) {
        let mut events = {
            let session = slot.lock().await;
            debug!(
                "Supervising session for channel {}, currently {:?}",
                session.target().channel_id,
                session.current_state()
            );
            session.state_events()
        };
        loop {
            let state = match next_matching(&mut events, |_| true).await {
                Ok(state) => state,
                Err(_) => {
                    debug!("Session event stream closed; supervisor exiting");
                    return;
                }
            };

            match state {
                SessionState::Disconnected => {
                    if self.renegotiated(&mut events).await {
                        info!("Transient disconnect; session renegotiated on its own");
                    } else {
                        warn!(
                            "Session did not renegotiate within {:?}; rejoining channel {}",
                            self.timing.state_wait, self.target.channel_id
                        );
                        let stale = Arc::clone(&*slot.lock().await);
                        stale.destroy().await;
                        let fresh = Arc::new(self.rejoin().await);
                        events = fresh.state_events();
                        *slot.lock().await = fresh;
                    }
                }
                SessionState::Destroyed => {
                    warn!("Session destroyed externally; supervisor exiting");
                    return;
                }
                other => debug!("Session state: {:?}", other),
            }
        }
    }

    /// True if the session re-enters `Signalling` and then `Connecting`
    /// within the bounded waits. A timeout selects the rejoin branch; it
    /// is not an error.
    async fn renegotiated(&self, events: &mut broadcast::Receiver<SessionState>) -> bool {
        for expected in [SessionState::Signalling, SessionState::Connecting] {
            let reached = next_matching(events, move |s| *s == expected);
            match timeout(self.timing.state_wait, reached).await {
                Ok(Ok(_)) => {}
                _ => return false,
            }
        }
        true
    }

    /// Open a replacement session against the same target and flags, and
    /// re-subscribe the shared sink to it. Retries until one is obtained.
    async fn rejoin(&self) -> O::Session {
        loop {
            match self.opener.open(self.target, self.flags).await {
                Ok(session) => {
                    session.subscribe(self.sink.as_ref());
                    info!("Rejoined channel {} with a fresh session", self.target.channel_id);
                    return session;
                }
                Err(e) => {
                    warn!(
                        "Rejoin failed: {}; retrying in {:?}",
                        e, self.timing.rejoin_backoff
                    );
                    tokio::time::sleep(self.timing.rejoin_backoff).await;
                }
            }
        }
    }
}
