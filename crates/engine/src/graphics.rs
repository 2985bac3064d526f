//! The graphics-backend contract (§6): opaque handles for textures,
//! shaders, framebuffers, vertex buffers, and fences, plus the small
//! set of operations the core requires of whatever backend a platform
//! context negotiates. The core is generic over [GraphicsBackend]; it
//! never assumes a specific backend.

use thiserror::Error;

use crate::pixel_format::PixelFormat;

/// An opaque GPU texture handle. Equality is identity (two handles for
/// the same underlying texture are `==`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// An opaque compiled-shader handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub u64);

/// An opaque framebuffer handle bound to a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferHandle(pub u64);

/// An opaque vertex-buffer handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferHandle(pub u64);

/// A GPU-side signal used to sequence CPU readback after render
/// completion (§3, §5 suspension point (c)).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FenceHandle(pub u64);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    #[error("failed to create texture {width}x{height} ({format:?})")]
    TextureCreationFailed { width: u32, height: u32, format: PixelFormat },
    #[error("failed to compile shader: {0}")]
    ShaderCompilationFailed(String),
    #[error("fence {0:?} wait timed out")]
    FenceTimeout(FenceHandle),
    #[error("unknown handle passed to backend")]
    UnknownHandle,
}

/// The opaque-handle contract the pipeline core consumes from whatever
/// graphics backend the platform context negotiates (OpenGL ES, Metal,
/// or — for this workspace's desktop test/dev harness — `wgpu`).
/// Graphics backend access is assumed thread-affine to the GPU queue;
/// CPU nodes must never call through this trait (§5).
pub trait GraphicsBackend: Send + Sync {
    fn create_texture(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<TextureHandle, GraphicsError>;

    fn destroy_texture(&self, handle: TextureHandle);

    fn create_framebuffer(&self, texture: &TextureHandle) -> Result<FramebufferHandle, GraphicsError>;

    fn compile_shader(&self, source: &str) -> Result<ShaderHandle, GraphicsError>;

    fn allocate_vertex_buffer(&self, size_bytes: usize) -> Result<VertexBufferHandle, GraphicsError>;

    /// Inserts a new fence into the GPU command stream for `texture`'s
    /// current render work.
    fn insert_fence(&self, texture: &TextureHandle) -> FenceHandle;

    /// Blocks the calling thread until `fence` is signaled, or
    /// `timeout_ms` elapses (`None` = unbounded). Returns whether the
    /// fence was signaled before the timeout.
    fn wait_fence(&self, fence: &FenceHandle, timeout_ms: Option<u64>) -> bool;

    /// Downloads the current contents of `texture` into a freshly
    /// allocated CPU buffer, respecting `stride`. Used by the frame
    /// packet's lazy CPU-buffer accessor (I-FP-2).
    fn download_texture(
        &self,
        texture: &TextureHandle,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Vec<u8>, GraphicsError>;
}

/// A deterministic, allocation-counter-backed backend with no real GPU
/// behind it, used by unit and integration tests so they run without a
/// device. Fences are considered signaled immediately; "downloaded"
/// bytes are the zero-fill a freshly created texture would have.
#[derive(Debug, Default)]
pub struct NullBackend {
    next_handle: std::sync::atomic::AtomicU64,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

impl GraphicsBackend for NullBackend {
    fn create_texture(
        &self,
        _width: u32,
        _height: u32,
        _format: PixelFormat,
    ) -> Result<TextureHandle, GraphicsError> {
        Ok(TextureHandle(self.next()))
    }

    fn destroy_texture(&self, _handle: TextureHandle) {}

    fn create_framebuffer(&self, _texture: &TextureHandle) -> Result<FramebufferHandle, GraphicsError> {
        Ok(FramebufferHandle(self.next()))
    }

    fn compile_shader(&self, _source: &str) -> Result<ShaderHandle, GraphicsError> {
        Ok(ShaderHandle(self.next()))
    }

    fn allocate_vertex_buffer(&self, _size_bytes: usize) -> Result<VertexBufferHandle, GraphicsError> {
        Ok(VertexBufferHandle(self.next()))
    }

    fn insert_fence(&self, _texture: &TextureHandle) -> FenceHandle {
        FenceHandle(self.next())
    }

    fn wait_fence(&self, _fence: &FenceHandle, _timeout_ms: Option<u64>) -> bool {
        true
    }

    fn download_texture(
        &self,
        _texture: &TextureHandle,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Vec<u8>, GraphicsError> {
        Ok(vec![0u8; (width as usize) * (height as usize) * format.bytes_per_pixel()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_backend_issues_distinct_handles() {
        let backend = NullBackend::new();
        let a = backend.create_texture(4, 4, PixelFormat::Rgba8).unwrap();
        let b = backend.create_texture(4, 4, PixelFormat::Rgba8).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn null_backend_fences_signal_immediately() {
        let backend = NullBackend::new();
        let tex = backend.create_texture(2, 2, PixelFormat::Rgba8).unwrap();
        let fence = backend.insert_fence(&tex);
        assert!(backend.wait_fence(&fence, Some(0)));
    }
}
