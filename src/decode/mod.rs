//! Decode process supervision
//!
//! One external decode process is spawned per playback attempt. The
//! supervisor wires its stdout into a raw PCM stream and guarantees the
//! process is torn down when the track ends or the iteration fails.

pub mod ffmpeg;

pub use ffmpeg::FfmpegDecoder;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::constants::{CHANNELS, SAMPLE_RATE};
use crate::error::DecodeError;

/// Raw interleaved PCM byte stream produced by a decode process.
pub struct PcmStream {
    pub reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
    pub sample_rate: u32,
    pub channels: u32,
}

impl PcmStream {
    /// Signed 16-bit little-endian stereo at the fixed output rate.
    pub fn s16le(reader: Box<dyn AsyncRead + Send + Sync + Unpin>) -> Self {
        Self {
            reader,
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
        }
    }
}

/// Handle to one spawned decode process. Never reused across iterations.
#[async_trait]
pub trait DecodeHandle: Send {
    /// Forcefully terminate the process. Idempotent; errors from a process
    /// that already exited are swallowed.
    async fn kill(&mut self);
}

/// One decode attempt: the sample stream plus the owning process handle.
pub struct ActiveDecode {
    pub stream: PcmStream,
    pub handle: Box<dyn DecodeHandle>,
}

impl ActiveDecode {
    /// A decode that produces no samples. Returned when the spawn itself
    /// fails, so the playback loop sees an instantly-exhausted track
    /// instead of an error it cannot recover from.
    pub fn empty() -> Self {
        Self {
            stream: PcmStream::s16le(Box::new(tokio::io::empty())),
            handle: Box::new(InertHandle),
        }
    }
}

struct InertHandle;

#[async_trait]
impl DecodeHandle for InertHandle {
    async fn kill(&mut self) {}
}

/// Starts fresh decodes of a fixed audio source.
#[async_trait]
pub trait Decoder: Send + Sync + 'static {
    async fn start(&self) -> Result<ActiveDecode, DecodeError>;
}
