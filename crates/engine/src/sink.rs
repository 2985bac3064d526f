//! The frame sink contract (§6): a sink node forwards the final frame
//! packet of a frame to an external target. A sink failure is reported
//! but never aborts the pipeline frame (§7 `ExternalIO`).

use crate::context::PipelineContext;
use crate::frame_packet::FramePacketHandle;
use crate::pixel_format::PixelFormat;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink '{0}' failed: {1}")]
    DeliveryFailed(String, String),
}

/// An external delivery target a sink node forwards a completed frame
/// to (display surface, encoder, callback, file). Implementations must
/// not block the calling queue worker indefinitely — a display sink in
/// particular must not block on the packet's fence if the target can
/// accept a pending texture (§4.1).
pub trait FrameSink: Send {
    fn name(&self) -> &str;

    fn deliver(&mut self, packet: &FramePacketHandle, ctx: &PipelineContext) -> Result<(), SinkError>;
}

/// Invokes a user callback with raw bytes, width, height, format, and
/// timestamp — downloading the CPU buffer first if the packet only
/// carries a GPU texture (§3 I-FP-2).
pub struct CallbackSink<F>
where
    F: FnMut(&[u8], u32, u32, PixelFormat, i64) + Send,
{
    name: String,
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: FnMut(&[u8], u32, u32, PixelFormat, i64) + Send,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self { name: name.into(), callback }
    }
}

impl<F> FrameSink for CallbackSink<F>
where
    F: FnMut(&[u8], u32, u32, PixelFormat, i64) + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&mut self, packet: &FramePacketHandle, ctx: &PipelineContext) -> Result<(), SinkError> {
        let bytes = packet
            .cpu_buffer(ctx.backend().as_ref())
            .ok_or_else(|| SinkError::DeliveryFailed(self.name.clone(), "packet has no readable data".into()))?;
        let (width, height) = packet.dimensions();
        (self.callback)(&bytes, width, height, packet.format(), packet.timestamp_us());
        Ok(())
    }
}

/// Presents a texture to a platform surface of a given size. The
/// surface itself is an external collaborator (§1); this sink only
/// hands it the texture handle and does not wait on the packet's fence
/// (§4.1: a sink must not block on the fence if the target can accept
/// a pending texture).
pub trait PresentationSurface: Send {
    fn present(&mut self, texture: &crate::graphics::TextureHandle, width: u32, height: u32) -> Result<(), String>;
}

pub struct DisplaySink {
    name: String,
    surface: Box<dyn PresentationSurface>,
}

impl DisplaySink {
    pub fn new(name: impl Into<String>, surface: Box<dyn PresentationSurface>) -> Self {
        Self { name: name.into(), surface }
    }
}

impl FrameSink for DisplaySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&mut self, packet: &FramePacketHandle, _ctx: &PipelineContext) -> Result<(), SinkError> {
        let (width, height) = packet.dimensions();
        let texture = packet
            .texture()
            .ok_or_else(|| SinkError::DeliveryFailed(self.name.clone(), "packet has no texture".into()))?;
        self.surface
            .present(&texture, width, height)
            .map_err(|e| SinkError::DeliveryFailed(self.name.clone(), e))
    }
}

/// Hands a texture/surface to an external encoder. The encoder itself
/// is an external collaborator (§1); no codec is implemented here
/// (§1 Non-goals).
pub trait ExternalEncoder: Send {
    fn encode(&mut self, texture: &crate::graphics::TextureHandle, width: u32, height: u32, timestamp_us: i64) -> Result<(), String>;
}

pub struct EncoderSink {
    name: String,
    encoder: Box<dyn ExternalEncoder>,
}

impl EncoderSink {
    pub fn new(name: impl Into<String>, encoder: Box<dyn ExternalEncoder>) -> Self {
        Self { name: name.into(), encoder }
    }
}

impl FrameSink for EncoderSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&mut self, packet: &FramePacketHandle, _ctx: &PipelineContext) -> Result<(), SinkError> {
        let (width, height) = packet.dimensions();
        let texture = packet
            .texture()
            .ok_or_else(|| SinkError::DeliveryFailed(self.name.clone(), "packet has no texture".into()))?;
        self.encoder
            .encode(&texture, width, height, packet.timestamp_us())
            .map_err(|e| SinkError::DeliveryFailed(self.name.clone(), e))
    }
}

/// Writes raw frame bytes to disk for debug capture. Diagnostics only
/// (§6 "Persistent formats: None" — this is not a file-format encoder,
/// just a flat dump of whatever bytes the packet already carries).
pub struct FileSink {
    name: String,
    directory: std::path::PathBuf,
}

impl FileSink {
    pub fn new(name: impl Into<String>, directory: impl Into<std::path::PathBuf>) -> Self {
        Self { name: name.into(), directory: directory.into() }
    }
}

impl FrameSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&mut self, packet: &FramePacketHandle, ctx: &PipelineContext) -> Result<(), SinkError> {
        let bytes = packet
            .cpu_buffer(ctx.backend().as_ref())
            .ok_or_else(|| SinkError::DeliveryFailed(self.name.clone(), "packet has no readable data".into()))?;
        let path = self.directory.join(format!("frame_{}.raw", packet.timestamp_us()));
        std::fs::write(&path, &bytes)
            .map_err(|e| SinkError::DeliveryFailed(self.name.clone(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::graphics::NullBackend;
    use crate::pool::frame_packet_pool::{FramePacketPool, FramePacketPoolConfig};
    use std::sync::{Arc, Mutex};

    fn ctx() -> PipelineContext {
        PipelineContext::new(Arc::new(NullBackend::new()), PipelineConfig::default())
    }

    #[test]
    fn callback_sink_receives_dimensions_and_timestamp() {
        let pool = FramePacketPool::new(FramePacketPoolConfig::default());
        let packet = pool.acquire(4, 4, PixelFormat::Rgba8).unwrap();
        packet.set_texture(crate::graphics::TextureHandle(1));
        packet.set_timestamp_us(500);

        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        let mut sink = CallbackSink::new("cb", move |_bytes, w, h, _fmt, ts| {
            *seen2.lock().unwrap() = Some((w, h, ts));
        });
        sink.deliver(&packet, &ctx()).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some((4, 4, 500)));
    }

    #[test]
    fn callback_sink_errors_without_any_data() {
        let pool = FramePacketPool::new(FramePacketPoolConfig::default());
        let packet = pool.acquire(4, 4, PixelFormat::Rgba8).unwrap();
        let mut sink = CallbackSink::new("cb", |_, _, _, _, _| {});
        assert!(sink.deliver(&packet, &ctx()).is_err());
    }
}
