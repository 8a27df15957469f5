//! ffmpeg decode process management
//!
//! Spawns ffmpeg reading the source at native playback pace and emitting
//! raw s16le stereo samples at 48 kHz on stdout.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error};

use crate::constants::{CHANNELS, SAMPLE_RATE};
use crate::error::DecodeError;

use super::{ActiveDecode, DecodeHandle, Decoder, PcmStream};

/// Spawns one ffmpeg process per playback attempt and owns its teardown.
pub struct FfmpegDecoder {
    program: String,
    source: PathBuf,
    debug: bool,
}

impl FfmpegDecoder {
    pub fn new(source: impl Into<PathBuf>, debug: bool) -> Self {
        Self {
            program: "ffmpeg".to_string(),
            source: source.into(),
            debug,
        }
    }

    /// Override the decoder binary name (tests, non-standard installs).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl Decoder for FfmpegDecoder {
    async fn start(&self) -> Result<ActiveDecode, DecodeError> {
        let exists = tokio::fs::metadata(&self.source)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !exists {
            return Err(DecodeError::SourceMissing(
                self.source.display().to_string(),
            ));
        }

        let spawned = Command::new(&self.program)
            .arg("-re")
            .arg("-i")
            .arg(&self.source)
            .arg("-vn")
            .args(["-f", "s16le"])
            .arg("-ar")
            .arg(SAMPLE_RATE.to_string())
            .arg("-ac")
            .arg(CHANNELS.to_string())
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(if self.debug {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn decoder {:?}: {}", self.program, e);
                return Ok(ActiveDecode::empty());
            }
        };

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "voicebeacon::decode", "{}", line);
                }
            });
        }

        let stream = match child.stdout.take() {
            Some(stdout) => PcmStream::s16le(Box::new(stdout)),
            // Piped stdout cannot be absent, but an empty track beats a
            // crashed loop.
            None => PcmStream::s16le(Box::new(tokio::io::empty())),
        };

        Ok(ActiveDecode {
            stream,
            handle: Box::new(FfmpegHandle { child: Some(child) }),
        })
    }
}

struct FfmpegHandle {
    child: Option<Child>,
}

#[async_trait]
impl DecodeHandle for FfmpegHandle {
    async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!("Decode process already exited: {}", e);
            }
        }
    }
}
