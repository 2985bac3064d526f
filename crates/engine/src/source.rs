//! The frame source contract (§6): the application submits one capture
//! per arrival, tagged with a microsecond timestamp whose epoch the
//! core never interprets — only ordering and equality matter.

use std::time::Duration;

use crate::graphics::TextureHandle;
use crate::pixel_format::PixelFormat;

/// One application-submitted capture. The three variants mirror the
/// three submission shapes §6 names: a raw pixel buffer, a pre-existing
/// GPU texture, and a platform-native buffer (modeled here as an opaque
/// handle the platform context already resolved to one of the other
/// two — the core has no notion of `CVPixelBufferRef`/`SurfaceTexture`
/// beyond what the platform context hands it).
#[derive(Debug, Clone)]
pub enum Capture {
    RawBuffer {
        width: u32,
        height: u32,
        format: PixelFormat,
        stride: usize,
        bytes: Vec<u8>,
        timestamp_us: i64,
    },
    Texture {
        texture: TextureHandle,
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp_us: i64,
    },
}

impl Capture {
    pub fn timestamp_us(&self) -> i64 {
        match self {
            Capture::RawBuffer { timestamp_us, .. } => *timestamp_us,
            Capture::Texture { timestamp_us, .. } => *timestamp_us,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Capture::RawBuffer { width, height, .. } => (*width, *height),
            Capture::Texture { width, height, .. } => (*width, *height),
        }
    }

    pub fn format(&self) -> PixelFormat {
        match self {
            Capture::RawBuffer { format, .. } => *format,
            Capture::Texture { format, .. } => *format,
        }
    }
}

/// What a source node pulls from on each re-arm (§4.5 "loop restart").
/// A platform capture source (camera pixel buffers, an external-OES
/// texture stream) is an external collaborator (§1) implementing this
/// trait; the core only ever calls it from the source node's queue.
pub trait FrameSource: Send {
    /// Blocks up to `timeout` (`None` = unbounded) for the next
    /// submitted capture. Returns `None` on timeout or if the source
    /// has been permanently exhausted.
    fn next_capture(&mut self, timeout: Option<Duration>) -> Option<Capture>;
}

/// A [FrameSource] backed by a channel the application pushes captures
/// into from whatever thread owns the platform capture callback.
/// Grounded on `util::channels::message_channel`'s `Inbox`/`Outbox`
/// pair, which decouples a fetch thread from its consumer the same way
/// a platform capture callback needs to be decoupled from the pipeline.
pub struct ChannelFrameSource {
    inbox: util::channels::message_channel::Inbox<Capture>,
}

impl ChannelFrameSource {
    pub fn new() -> (Self, ChannelFrameSourceHandle) {
        let (inbox, outbox) = util::channels::message_channel::new();
        (Self { inbox }, ChannelFrameSourceHandle { outbox: std::sync::Arc::new(outbox) })
    }
}

impl FrameSource for ChannelFrameSource {
    fn next_capture(&mut self, timeout: Option<Duration>) -> Option<Capture> {
        match timeout {
            None => self.inbox.wait().ok(),
            Some(d) => self.inbox.wait_timeout(d).ok(),
        }
    }
}

/// The application-facing half of a [ChannelFrameSource]: call
/// [Self::submit] from whatever thread owns the platform capture
/// callback.
#[derive(Clone)]
pub struct ChannelFrameSourceHandle {
    outbox: std::sync::Arc<util::channels::message_channel::Outbox<Capture>>,
}

impl ChannelFrameSourceHandle {
    pub fn submit(&self, capture: Capture) -> bool {
        self.outbox.send(capture).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn submitted_capture_is_observed() {
        let (mut source, handle) = ChannelFrameSource::new();
        assert!(handle.submit(Capture::RawBuffer {
            width: 16,
            height: 16,
            format: PixelFormat::Rgba8,
            stride: 64,
            bytes: vec![0u8; 16 * 16 * 4],
            timestamp_us: 1000,
        }));
        let capture = source.next_capture(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(capture.timestamp_us(), 1000);
    }

    #[test]
    fn timeout_with_no_submission_returns_none() {
        let (mut source, _handle) = ChannelFrameSource::new();
        assert!(source.next_capture(Some(Duration::from_millis(10))).is_none());
    }
}
