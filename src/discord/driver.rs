//! songbird-backed sessions and the process-wide audio sink

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::all::{Channel, ChannelId, ChannelType, GuildId};
use serenity::http::Http;
use songbird::input::{AudioStream, Input, LiveInput, RawAdapter};
use songbird::{Call, CoreEvent, Event, EventContext, Songbird, TrackEvent};
use symphonia::core::io::MediaSource;
use tokio::io::AsyncRead;
use tokio::sync::broadcast;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, warn};

use crate::decode::PcmStream;
use crate::error::SessionError;
use crate::voice::{
    AudioSink, ChannelTarget, JoinFlags, NoListenerPolicy, SessionOpener, SessionState, SinkState,
    VoiceSession, EVENT_CAPACITY,
};

type SharedCall = Arc<tokio::sync::Mutex<Call>>;

/// Opens songbird calls against the gateway's voice endpoints.
pub struct DiscordOpener {
    songbird: Arc<Songbird>,
    http: Arc<Http>,
}

impl DiscordOpener {
    pub fn new(songbird: Arc<Songbird>, http: Arc<Http>) -> Self {
        Self { songbird, http }
    }
}

#[async_trait]
impl SessionOpener for DiscordOpener {
    type Sink = DiscordSink;
    type Session = DiscordSession;

    async fn resolve(&self, channel_id: u64) -> Result<ChannelTarget, SessionError> {
        let channel = self
            .http
            .get_channel(ChannelId::new(channel_id))
            .await
            .map_err(|_| SessionError::ChannelNotFound(channel_id))?;

        match channel {
            Channel::Guild(channel)
                if matches!(channel.kind, ChannelType::Voice | ChannelType::Stage) =>
            {
                Ok(ChannelTarget {
                    channel_id,
                    guild_id: channel.guild_id.get(),
                })
            }
            _ => Err(SessionError::NotVoice(channel_id)),
        }
    }

    async fn open(
        &self,
        target: ChannelTarget,
        flags: JoinFlags,
    ) -> Result<DiscordSession, SessionError> {
        let guild = GuildId::new(target.guild_id);
        let call = self
            .songbird
            .join(guild, ChannelId::new(target.channel_id))
            .await
            .map_err(|e| SessionError::JoinFailed(e.to_string()))?;

        let state_tx = broadcast::channel(EVENT_CAPACITY).0;
        let current = Arc::new(Mutex::new(SessionState::Ready));

        {
            let mut handler = call.lock().await;
            handler
                .deafen(flags.self_deaf)
                .await
                .map_err(|e| SessionError::JoinFailed(e.to_string()))?;
            handler
                .mute(flags.self_mute)
                .await
                .map_err(|e| SessionError::JoinFailed(e.to_string()))?;

            let relay = StateRelay {
                tx: state_tx.clone(),
                current: Arc::clone(&current),
            };
            handler.add_global_event(Event::Core(CoreEvent::DriverConnect), relay.clone());
            handler.add_global_event(Event::Core(CoreEvent::DriverReconnect), relay.clone());
            handler.add_global_event(Event::Core(CoreEvent::DriverDisconnect), relay);
        }

        Ok(DiscordSession {
            songbird: Arc::clone(&self.songbird),
            target,
            call,
            state_tx,
            current,
        })
    }
}

/// Translates driver events into the lifecycle states the core observes.
///
/// The driver reports its renegotiation only once it has succeeded, so a
/// reconnect surfaces as the signalling and connecting transitions in one
/// burst; a driver that gives up never emits them, which is exactly what
/// the bounded waits upstream time out on.
#[derive(Clone)]
struct StateRelay {
    tx: broadcast::Sender<SessionState>,
    current: Arc<Mutex<SessionState>>,
}

impl StateRelay {
    fn emit(&self, state: SessionState) {
        *self.current.lock() = state;
        let _ = self.tx.send(state);
    }
}

#[async_trait]
impl songbird::EventHandler for StateRelay {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match ctx {
            EventContext::DriverConnect(_) => {
                self.emit(SessionState::Ready);
            }
            EventContext::DriverReconnect(_) => {
                self.emit(SessionState::Signalling);
                self.emit(SessionState::Connecting);
                self.emit(SessionState::Ready);
            }
            EventContext::DriverDisconnect(_) => {
                self.emit(SessionState::Disconnected);
            }
            _ => {}
        }
        None
    }
}

/// One songbird call plus the lifecycle view the core observes.
pub struct DiscordSession {
    songbird: Arc<Songbird>,
    target: ChannelTarget,
    call: SharedCall,
    state_tx: broadcast::Sender<SessionState>,
    current: Arc<Mutex<SessionState>>,
}

#[async_trait]
impl VoiceSession for DiscordSession {
    type Sink = DiscordSink;

    fn current_state(&self) -> SessionState {
        *self.current.lock()
    }

    fn target(&self) -> ChannelTarget {
        self.target
    }

    fn state_events(&self) -> broadcast::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    fn subscribe(&self, sink: &DiscordSink) {
        sink.attach(Arc::clone(&self.call));
    }

    async fn destroy(&self) {
        *self.current.lock() = SessionState::Destroyed;
        let guild = GuildId::new(self.target.guild_id);
        if let Err(e) = self.songbird.remove(guild).await {
            debug!("Session already torn down: {}", e);
        }
    }
}

/// The process-wide outbound audio pipeline. Created once at startup; it
/// survives session replacement by swapping the call it plays into.
pub struct DiscordSink {
    call: Mutex<Option<SharedCall>>,
    state_tx: broadcast::Sender<SinkState>,
}

impl DiscordSink {
    pub fn new(policy: NoListenerPolicy) -> Self {
        if policy == NoListenerPolicy::Pause {
            warn!("The driver cannot pause on an empty channel; audio keeps playing");
        }
        Self {
            call: Mutex::new(None),
            state_tx: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    fn attach(&self, call: SharedCall) {
        *self.call.lock() = Some(call);
    }
}

#[async_trait]
impl AudioSink for DiscordSink {
    async fn play(&self, stream: PcmStream) -> Result<(), SessionError> {
        let call = self
            .call
            .lock()
            .clone()
            .ok_or(SessionError::NotSubscribed)?;

        let input = raw_pcm_input(stream);
        let track = call.lock().await.play_only_input(input);

        let notifier = IdleNotifier {
            tx: self.state_tx.clone(),
        };
        track
            .add_event(Event::Track(TrackEvent::End), notifier.clone())
            .map_err(|e| SessionError::PlaybackFailed(e.to_string()))?;
        track
            .add_event(Event::Track(TrackEvent::Error), notifier)
            .map_err(|e| SessionError::PlaybackFailed(e.to_string()))?;

        let _ = self.state_tx.send(SinkState::Playing);
        Ok(())
    }

    fn state_events(&self) -> broadcast::Receiver<SinkState> {
        self.state_tx.subscribe()
    }
}

/// Reports the end of the current track, whether it drained or errored.
#[derive(Clone)]
struct IdleNotifier {
    tx: broadcast::Sender<SinkState>,
}

#[async_trait]
impl songbird::EventHandler for IdleNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        let _ = self.tx.send(SinkState::Idle);
        None
    }
}

/// Bridge the async PCM stream into the blocking media source the driver
/// mixes from. `RawAdapter` consumes interleaved f32le, so the decoder's
/// s16le samples are widened on the way through.
fn raw_pcm_input(stream: PcmStream) -> Input {
    let sample_rate = stream.sample_rate;
    let channels = stream.channels;
    let bridged = BridgedPcm {
        reader: SyncIoBridge::new(stream.reader),
        carry: None,
    };
    let adapter = RawAdapter::new(bridged, sample_rate, channels);
    let audio = AudioStream {
        input: Box::new(adapter) as Box<dyn MediaSource>,
        hint: None,
    };
    Input::Live(LiveInput::Raw(audio), None)
}

struct BridgedPcm {
    reader: SyncIoBridge<Box<dyn AsyncRead + Send + Sync + Unpin>>,
    /// Low byte of a sample split across two reads of the inner stream.
    carry: Option<u8>,
}

impl Read for BridgedPcm {
    /// Reads s16le samples from the decoder and writes them as f32le in
    /// the unit range, four output bytes per two input bytes.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let max_samples = buf.len() / 4;
        if max_samples == 0 {
            return Ok(0);
        }

        let mut raw = vec![0u8; max_samples * 2];
        let mut filled = 0;
        if let Some(byte) = self.carry.take() {
            raw[0] = byte;
            filled = 1;
        }
        while filled < 2 {
            let n = self.reader.read(&mut raw[filled..])?;
            if n == 0 {
                // EOF mid-sample drops the dangling byte.
                return Ok(0);
            }
            filled += n;
        }
        if filled % 2 == 1 {
            self.carry = Some(raw[filled - 1]);
            filled -= 1;
        }

        let mut written = 0;
        for pair in raw[..filled].chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            let widened = f32::from(sample) / 32_768.0;
            buf[written..written + 4].copy_from_slice(&widened.to_le_bytes());
            written += 4;
        }
        Ok(written)
    }
}

impl Seek for BridgedPcm {
    fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "live pcm stream is not seekable",
        ))
    }
}

impl MediaSource for BridgedPcm {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}
