//! Session establishment and singleton playback startup
//!
//! The manager reacts to the gateway's readiness path: it resolves the
//! target channel, opens the session, wires the shared sink and the
//! reconnection supervisor, and launches the playback loop exactly once
//! for the process lifetime.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::decode::Decoder;

use super::{
    JoinFlags, PlaybackLoop, PlaybackTiming, ReconnectSupervisor, RecoveryTiming, SessionOpener,
    SharedSession, VoiceSession,
};

/// Outcome of one `join_and_play` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Whether this call opened a session.
    pub joined: bool,
    /// Whether this call launched the playback loop.
    pub playback_started: bool,
}

impl JoinOutcome {
    fn skipped() -> Self {
        Self {
            joined: false,
            playback_started: false,
        }
    }
}

/// The live session slot and the supervisor task watching it.
struct ActiveSession<S> {
    slot: SharedSession<S>,
    supervisor: JoinHandle<()>,
}

/// Owns the shared sink, the decoder, the live session and the
/// playback-started flag.
pub struct SessionManager<O: SessionOpener, D> {
    opener: Arc<O>,
    sink: Arc<O::Sink>,
    decoder: Arc<D>,
    source: PathBuf,
    flags: JoinFlags,
    playback_timing: PlaybackTiming,
    recovery_timing: RecoveryTiming,
    active: tokio::sync::Mutex<Option<ActiveSession<O::Session>>>,
    playback_started: AtomicBool,
}

impl<O: SessionOpener, D: Decoder> SessionManager<O, D> {
    pub fn new(
        opener: Arc<O>,
        sink: Arc<O::Sink>,
        decoder: Arc<D>,
        source: impl Into<PathBuf>,
        flags: JoinFlags,
    ) -> Self {
        Self {
            opener,
            sink,
            decoder,
            source: source.into(),
            flags,
            playback_timing: PlaybackTiming::default(),
            recovery_timing: RecoveryTiming::default(),
            active: tokio::sync::Mutex::new(None),
            playback_started: AtomicBool::new(false),
        }
    }

    pub fn with_playback_timing(mut self, timing: PlaybackTiming) -> Self {
        self.playback_timing = timing;
        self
    }

    pub fn with_recovery_timing(mut self, timing: RecoveryTiming) -> Self {
        self.recovery_timing = timing;
        self
    }

    /// Resolve the target channel, open a session, wire the shared sink
    /// and supervisor, and launch the playback loop if it is not running
    /// yet.
    ///
    /// Resolution and open failures leave the process alive but idle:
    /// they are logged, nothing is joined, and the caller does not need
    /// to distinguish them. The readiness path may legitimately fire more
    /// than once: each firing replaces the previous session and its
    /// supervisor, and the playback launch is guarded by the started
    /// flag, so supervision and playback both stay singletons.
    pub async fn join_and_play(&self, channel_id: u64) -> JoinOutcome {
        let target = match self.opener.resolve(channel_id).await {
            Ok(target) => target,
            Err(e) => {
                error!("Cannot join channel {}: {}", channel_id, e);
                return JoinOutcome::skipped();
            }
        };

        let session = match self.opener.open(target, self.flags).await {
            Ok(session) => Arc::new(session),
            Err(e) => {
                error!("Failed to open a session for channel {}: {}", channel_id, e);
                return JoinOutcome::skipped();
            }
        };
        session.subscribe(self.sink.as_ref());
        info!(
            "Joined voice channel {} in guild {}",
            target.channel_id, target.guild_id
        );

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.supervisor.abort();
            let stale = Arc::clone(&*previous.slot.lock().await);
            info!(
                "Replacing the session for channel {}",
                stale.target().channel_id
            );
            stale.destroy().await;
        }

        let slot: SharedSession<O::Session> = Arc::new(tokio::sync::Mutex::new(session));
        let supervisor = ReconnectSupervisor::new(
            Arc::clone(&self.opener),
            Arc::clone(&self.sink),
            target,
            self.flags,
        )
        .with_timing(self.recovery_timing);
        let task = tokio::spawn(supervisor.supervise(Arc::clone(&slot)));
        *active = Some(ActiveSession {
            slot,
            supervisor: task,
        });
        drop(active);

        JoinOutcome {
            joined: true,
            playback_started: self.start_playback_once(),
        }
    }

    /// Launch the playback loop; a no-op after the first call.
    fn start_playback_once(&self) -> bool {
        if self.playback_started.swap(true, Ordering::SeqCst) {
            debug!("Playback loop already running; not starting another");
            return false;
        }
        let playback = PlaybackLoop::new(
            Arc::clone(&self.sink),
            Arc::clone(&self.decoder),
            self.source.clone(),
        )
        .with_timing(self.playback_timing);
        tokio::spawn(playback.run());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::voice::testutil::{TestDecoder, TestOpener, TestSession, TestSink};
    use crate::voice::SessionState;
    use std::time::Duration;

    async fn wait_for(deadline_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..deadline_ms {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        cond()
    }

    fn manager_for(
        opener: Arc<TestOpener>,
        sink: Arc<TestSink>,
        decoder: Arc<TestDecoder>,
        source: impl Into<PathBuf>,
    ) -> SessionManager<TestOpener, TestDecoder> {
        SessionManager::new(opener, sink, decoder, source, JoinFlags::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_ready_starts_playback_exactly_once() {
        let source = tempfile::NamedTempFile::new().unwrap();
        let sink = Arc::new(TestSink::new());
        let decoder = Arc::new(TestDecoder::new());
        let stale = TestSession::new(1);
        let fresh = TestSession::new(2);
        let opener = Arc::new(TestOpener::new(vec![stale.clone(), fresh.clone()]));

        let manager = manager_for(
            Arc::clone(&opener),
            Arc::clone(&sink),
            Arc::clone(&decoder),
            source.path(),
        );

        let first = manager.join_and_play(7).await;
        let second = manager.join_and_play(7).await;

        assert!(first.joined && first.playback_started);
        assert!(second.joined);
        assert!(!second.playback_started);
        // Each readiness event re-joins; playback stays a singleton and
        // the replaced session is torn down.
        assert_eq!(opener.open_count(), 2);
        assert_eq!(*sink.subscribed_to.lock(), vec![1, 2]);
        assert_eq!(stale.destroy_count(), 1);
        assert_eq!(fresh.destroy_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_session_loses_its_supervisor() {
        let source = tempfile::NamedTempFile::new().unwrap();
        let sink = Arc::new(TestSink::new());
        let decoder = Arc::new(TestDecoder::new());
        let stale = TestSession::new(1);
        let fresh = TestSession::new(2);
        let opener = Arc::new(TestOpener::new(vec![stale.clone(), fresh.clone()]));

        let manager = manager_for(
            Arc::clone(&opener),
            Arc::clone(&sink),
            Arc::clone(&decoder),
            source.path(),
        );

        manager.join_and_play(7).await;
        tokio::task::yield_now().await;
        manager.join_and_play(7).await;
        tokio::task::yield_now().await;

        // A terminal disconnect on the replaced session goes unanswered:
        // its supervisor is gone, so no recovery opens happen.
        stale.emit(SessionState::Disconnected);
        tokio::time::sleep(Duration::from_millis(30_000)).await;
        assert_eq!(opener.open_count(), 2);
        assert_eq!(stale.destroy_count(), 1);

        // The live session's supervisor still recovers.
        fresh.emit(SessionState::Disconnected);
        assert!(wait_for(60_000, || opener.open_count() > 2).await);
        assert_eq!(fresh.destroy_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_voice_channel_degrades_without_joining() {
        let sink = Arc::new(TestSink::new());
        let decoder = Arc::new(TestDecoder::new());
        let opener = Arc::new(TestOpener::new(vec![TestSession::new(1)]));
        opener.reject_resolve(SessionError::NotVoice(7));

        let manager = manager_for(
            Arc::clone(&opener),
            Arc::clone(&sink),
            Arc::clone(&decoder),
            "/nonexistent/loop.mp3",
        );

        let outcome = manager.join_and_play(7).await;

        assert_eq!(
            outcome,
            JoinOutcome {
                joined: false,
                playback_started: false
            }
        );
        assert_eq!(opener.open_count(), 0);

        // No session, no playback, no decoding.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(decoder.start_count(), 0);
        assert!(sink.subscribed_to.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_is_nonfatal() {
        let source = tempfile::NamedTempFile::new().unwrap();
        let sink = Arc::new(TestSink::new());
        let decoder = Arc::new(TestDecoder::new());
        let opener = Arc::new(TestOpener::new(vec![]));
        opener.fail_next_opens(1);

        let manager = manager_for(
            Arc::clone(&opener),
            Arc::clone(&sink),
            Arc::clone(&decoder),
            source.path(),
        );

        let outcome = manager.join_and_play(7).await;
        assert!(!outcome.joined);
        assert!(!outcome.playback_started);
        assert!(sink.subscribed_to.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_joined_session_feeds_the_playback_loop() {
        let source = tempfile::NamedTempFile::new().unwrap();
        let sink = Arc::new(TestSink::new());
        let decoder = Arc::new(TestDecoder::new());
        let opener = Arc::new(TestOpener::new(vec![TestSession::new(1)]));

        let manager = manager_for(
            Arc::clone(&opener),
            Arc::clone(&sink),
            Arc::clone(&decoder),
            source.path(),
        );

        let outcome = manager.join_and_play(7).await;
        assert!(outcome.playback_started);

        // The singleton loop starts decoding into the subscribed sink.
        for _ in 0..5_000 {
            if decoder.start_count() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(decoder.start_count() >= 2);
        assert!(decoder.max_live() <= 1);
    }
}
