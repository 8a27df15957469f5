//! The forever playback loop
//!
//! Sequentially decodes the configured source into the shared sink,
//! restarting after every track end or failure. Runs as a single task so
//! at most one decode process is alive at any instant.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::constants::{ERROR_BACKOFF_MS, RESTART_DELAY_MS};
use crate::decode::Decoder;
use crate::error::Error;

use super::{next_matching, AudioSink, SinkState};

/// Delays between playback iterations.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackTiming {
    /// Pause after a track reaches idle, so a zero-length decode cannot
    /// turn into a tight respawn loop.
    pub restart_delay: Duration,
    /// Longer pause after a failed iteration.
    pub error_backoff: Duration,
}

impl Default for PlaybackTiming {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_millis(RESTART_DELAY_MS),
            error_backoff: Duration::from_millis(ERROR_BACKOFF_MS),
        }
    }
}

/// Singleton task feeding the sink from a fixed audio source, forever.
pub struct PlaybackLoop<S, D> {
    sink: Arc<S>,
    decoder: Arc<D>,
    source: PathBuf,
    timing: PlaybackTiming,
}

impl<S: AudioSink, D: Decoder> PlaybackLoop<S, D> {
    pub fn new(sink: Arc<S>, decoder: Arc<D>, source: impl Into<PathBuf>) -> Self {
        Self {
            sink,
            decoder,
            source: source.into(),
            timing: PlaybackTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: PlaybackTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Run forever. Returns only if the source file is missing at the
    /// initial check; every in-loop failure is logged and retried.
    pub async fn run(self) {
        let exists = tokio::fs::metadata(&self.source)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !exists {
            error!(
                "Audio source {} not found; playback disabled",
                self.source.display()
            );
            return;
        }

        info!("Looping {} into the sink", self.source.display());
        loop {
            if let Err(e) = self.play_once().await {
                warn!(
                    "Playback iteration failed: {}; retrying in {:?}",
                    e, self.timing.error_backoff
                );
                tokio::time::sleep(self.timing.error_backoff).await;
            }
        }
    }

    /// One decode-play-drain cycle.
    async fn play_once(&self) -> Result<(), Error> {
        let decode = self.decoder.start().await?;
        let mut handle = decode.handle;

        // Subscribe before play so a track that ends instantly is not
        // missed.
        let mut events = self.sink.state_events();

        let drained = match self.sink.play(decode.stream).await {
            Ok(()) => next_matching(&mut events, |s| *s == SinkState::Idle)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        // The decode process dies with its iteration, whether the track
        // drained or the play failed.
        handle.kill().await;
        drained?;

        debug!("Track drained; restarting in {:?}", self.timing.restart_delay);
        tokio::time::sleep(self.timing.restart_delay).await;
        Ok(())
    }
}
