//! In-memory fakes for driving the resilience core in tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::decode::{ActiveDecode, DecodeHandle, Decoder, PcmStream};
use crate::error::{DecodeError, SessionError};

use super::{
    AudioSink, ChannelTarget, JoinFlags, SessionOpener, SessionState, SinkState, VoiceSession,
    EVENT_CAPACITY,
};

/// Sink that records plays and goes idle shortly after each one.
pub(crate) struct TestSink {
    tx: broadcast::Sender<SinkState>,
    pub plays: AtomicUsize,
    /// Ids of the sessions this sink has been subscribed to, in order.
    pub subscribed_to: Mutex<Vec<u64>>,
}

impl TestSink {
    pub fn new() -> Self {
        Self {
            tx: broadcast::channel(EVENT_CAPACITY).0,
            plays: AtomicUsize::new(0),
            subscribed_to: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AudioSink for TestSink {
    async fn play(&self, _stream: PcmStream) -> Result<(), SessionError> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = tx.send(SinkState::Idle);
        });
        Ok(())
    }

    fn state_events(&self) -> broadcast::Receiver<SinkState> {
        self.tx.subscribe()
    }
}

/// Session whose lifecycle the test script drives by hand.
#[derive(Clone)]
pub(crate) struct TestSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: u64,
    tx: broadcast::Sender<SessionState>,
    current: Mutex<SessionState>,
    destroys: AtomicUsize,
}

impl TestSession {
    /// A session bound to channel `id` in a fixed test guild.
    pub fn new(id: u64) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                tx: broadcast::channel(EVENT_CAPACITY).0,
                current: Mutex::new(SessionState::Ready),
                destroys: AtomicUsize::new(0),
            }),
        }
    }

    pub fn emit(&self, state: SessionState) {
        *self.inner.current.lock() = state;
        let _ = self.inner.tx.send(state);
    }

    pub fn destroy_count(&self) -> usize {
        self.inner.destroys.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceSession for TestSession {
    type Sink = TestSink;

    fn current_state(&self) -> SessionState {
        *self.inner.current.lock()
    }

    fn target(&self) -> ChannelTarget {
        ChannelTarget {
            channel_id: self.inner.id,
            guild_id: 9_000,
        }
    }

    fn state_events(&self) -> broadcast::Receiver<SessionState> {
        self.inner.tx.subscribe()
    }

    fn subscribe(&self, sink: &TestSink) {
        sink.subscribed_to.lock().push(self.inner.id);
    }

    async fn destroy(&self) {
        self.inner.destroys.fetch_add(1, Ordering::SeqCst);
    }
}

/// Opener handing out a scripted queue of sessions, with optional injected
/// resolve and open failures.
pub(crate) struct TestOpener {
    queue: Mutex<VecDeque<TestSession>>,
    opens: AtomicUsize,
    open_failures: AtomicUsize,
    resolve_error: Mutex<Option<SessionError>>,
}

impl TestOpener {
    pub fn new(sessions: Vec<TestSession>) -> Self {
        Self {
            queue: Mutex::new(sessions.into_iter().collect()),
            opens: AtomicUsize::new(0),
            open_failures: AtomicUsize::new(0),
            resolve_error: Mutex::new(None),
        }
    }

    /// Fail the next `n` open attempts before handing out sessions.
    pub fn fail_next_opens(&self, n: usize) {
        self.open_failures.store(n, Ordering::SeqCst);
    }

    pub fn reject_resolve(&self, error: SessionError) {
        *self.resolve_error.lock() = Some(error);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionOpener for TestOpener {
    type Sink = TestSink;
    type Session = TestSession;

    async fn resolve(&self, channel_id: u64) -> Result<ChannelTarget, SessionError> {
        if let Some(error) = self.resolve_error.lock().take() {
            return Err(error);
        }
        Ok(ChannelTarget {
            channel_id,
            guild_id: 9_000,
        })
    }

    async fn open(
        &self,
        _target: ChannelTarget,
        _flags: JoinFlags,
    ) -> Result<TestSession, SessionError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.open_failures.load(Ordering::SeqCst) > 0 {
            self.open_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(SessionError::JoinFailed("injected open failure".into()));
        }
        self.queue
            .lock()
            .pop_front()
            .ok_or_else(|| SessionError::JoinFailed("no scripted session left".into()))
    }
}

/// Counters shared between a [`TestDecoder`] and its handles.
#[derive(Default)]
pub(crate) struct DecodeCounters {
    pub started: AtomicUsize,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
}

/// Decoder producing instantly-exhausted streams, with an optional
/// injected failure on one iteration.
pub(crate) struct TestDecoder {
    pub counters: Arc<DecodeCounters>,
    fail_on: Option<usize>,
}

impl TestDecoder {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(DecodeCounters::default()),
            fail_on: None,
        }
    }

    /// Fail the `n`-th start (zero-based).
    pub fn failing_on(n: usize) -> Self {
        Self {
            counters: Arc::new(DecodeCounters::default()),
            fail_on: Some(n),
        }
    }

    pub fn start_count(&self) -> usize {
        self.counters.started.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.counters.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Decoder for TestDecoder {
    async fn start(&self) -> Result<ActiveDecode, DecodeError> {
        let n = self.counters.started.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(n) {
            return Err(DecodeError::Failed("injected decode failure".into()));
        }
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(ActiveDecode {
            stream: PcmStream::s16le(Box::new(tokio::io::empty())),
            handle: Box::new(TestHandle {
                counters: Arc::clone(&self.counters),
                killed: false,
            }),
        })
    }
}

struct TestHandle {
    counters: Arc<DecodeCounters>,
    killed: bool,
}

#[async_trait]
impl DecodeHandle for TestHandle {
    async fn kill(&mut self) {
        if !self.killed {
            self.killed = true;
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
