//! The `wgpu`-backed [GraphicsBackend] used by desktop builds and the
//! workspace's own integration tests that want a real device behind
//! them. Grounded on the teacher's `renderer/surface.rs` adapter/device
//! request dance and `upload_stager.rs`'s texture-write idiom, adapted
//! here to the backend-agnostic opaque-handle contract instead of a
//! window-attached render loop — this backend never touches a surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::graphics::{
    FenceHandle, FramebufferHandle, GraphicsBackend, GraphicsError, ShaderHandle, TextureHandle,
    VertexBufferHandle,
};
use crate::pixel_format::PixelFormat;

fn wgpu_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
        // wgpu has no 3-byte-per-pixel texture format; pack into Rgba8
        // and let callers that care about stride compute it themselves.
        PixelFormat::Rgb8 => wgpu::TextureFormat::Rgba8Unorm,
        // Planar/subsampled YUV has no single wgpu texture format. We
        // stage the luma plane only, which is enough for this backend's
        // job of moving bytes on and off the GPU; real YUV sampling is
        // an application-level shader concern (§1 Non-goals).
        PixelFormat::Yuv420 | PixelFormat::Nv12 | PixelFormat::Nv21 => wgpu::TextureFormat::R8Unorm,
        PixelFormat::Oes | PixelFormat::Unknown => wgpu::TextureFormat::R8Unorm,
    }
}

/// A real GPU-backed [GraphicsBackend]. Handles are dense `u64` ids
/// into internal registries rather than raw `wgpu` types, so the rest
/// of the crate never has to name a `wgpu` type directly.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    next_handle: AtomicU64,
    textures: Mutex<HashMap<u64, (wgpu::Texture, PixelFormat)>>,
    framebuffers: Mutex<HashMap<u64, wgpu::TextureView>>,
    shaders: Mutex<HashMap<u64, wgpu::ShaderModule>>,
    vertex_buffers: Mutex<HashMap<u64, wgpu::Buffer>>,
    fences: Mutex<HashMap<u64, wgpu::SubmissionIndex>>,
}

impl WgpuBackend {
    /// Wraps an already-negotiated device/queue pair, e.g. one a
    /// platform context obtained alongside a window surface.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            next_handle: AtomicU64::new(0),
            textures: Mutex::new(HashMap::new()),
            framebuffers: Mutex::new(HashMap::new()),
            shaders: Mutex::new(HashMap::new()),
            vertex_buffers: Mutex::new(HashMap::new()),
            fences: Mutex::new(HashMap::new()),
        }
    }

    /// Requests a headless device with no compatible surface, for
    /// offscreen pipelines (server-side processing, tests) that never
    /// present to a window.
    pub async fn new_headless_async() -> Result<Self, GraphicsError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| GraphicsError::ShaderCompilationFailed("no suitable adapter".into()))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("engine_headless_device"),
                required_features: wgpu::Features::empty(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|_| GraphicsError::ShaderCompilationFailed("device request failed".into()))?;

        Ok(Self::new(device, queue))
    }

    /// Non-async helper for callers outside an async runtime.
    pub fn new_headless() -> Result<Self, GraphicsError> {
        pollster::block_on(Self::new_headless_async())
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

impl GraphicsBackend for WgpuBackend {
    fn create_texture(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<TextureHandle, GraphicsError> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::TextureCreationFailed { width, height, format });
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("engine_texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let handle = self.next();
        self.textures
            .lock()
            .expect(crate::THREAD_PANIC_MSG)
            .insert(handle, (texture, format));
        Ok(TextureHandle(handle))
    }

    fn destroy_texture(&self, handle: TextureHandle) {
        self.textures.lock().expect(crate::THREAD_PANIC_MSG).remove(&handle.0);
        self.framebuffers.lock().expect(crate::THREAD_PANIC_MSG).remove(&handle.0);
    }

    fn create_framebuffer(&self, texture: &TextureHandle) -> Result<FramebufferHandle, GraphicsError> {
        let textures = self.textures.lock().expect(crate::THREAD_PANIC_MSG);
        let (tex, _format) = textures.get(&texture.0).ok_or(GraphicsError::UnknownHandle)?;
        let view = tex.create_view(&wgpu::TextureViewDescriptor::default());
        drop(textures);

        let handle = self.next();
        self.framebuffers.lock().expect(crate::THREAD_PANIC_MSG).insert(handle, view);
        Ok(FramebufferHandle(handle))
    }

    fn compile_shader(&self, source: &str) -> Result<ShaderHandle, GraphicsError> {
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("engine_shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let handle = self.next();
        self.shaders.lock().expect(crate::THREAD_PANIC_MSG).insert(handle, module);
        Ok(ShaderHandle(handle))
    }

    fn allocate_vertex_buffer(&self, size_bytes: usize) -> Result<VertexBufferHandle, GraphicsError> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("engine_vertex_buffer"),
            size: size_bytes as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let handle = self.next();
        self.vertex_buffers
            .lock()
            .expect(crate::THREAD_PANIC_MSG)
            .insert(handle, buffer);
        Ok(VertexBufferHandle(handle))
    }

    fn insert_fence(&self, texture: &TextureHandle) -> FenceHandle {
        // An empty command buffer is enough to obtain a submission index
        // that orders after every command already queued against this
        // texture; `wait_fence` polls the device up to that index.
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("engine_fence") });
        let index = self.queue.submit(Some(encoder.finish()));

        let handle = self.next();
        self.fences.lock().expect(crate::THREAD_PANIC_MSG).insert(handle, index);
        let _ = texture;
        FenceHandle(handle)
    }

    fn wait_fence(&self, fence: &FenceHandle, timeout_ms: Option<u64>) -> bool {
        let index = match self.fences.lock().expect(crate::THREAD_PANIC_MSG).get(&fence.0) {
            Some(index) => index.clone(),
            None => return false,
        };
        let timeout = timeout_ms.map(std::time::Duration::from_millis);
        self.device
            .poll(wgpu::PollType::Wait { submission_index: Some(index), timeout })
            .is_ok()
    }

    fn download_texture(
        &self,
        texture: &TextureHandle,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Vec<u8>, GraphicsError> {
        let textures = self.textures.lock().expect(crate::THREAD_PANIC_MSG);
        let (tex, _) = textures.get(&texture.0).ok_or(GraphicsError::UnknownHandle)?;

        let bytes_per_pixel = format.bytes_per_pixel() as u32;
        // wgpu requires buffer-copy rows to be a multiple of 256 bytes.
        let unpadded_bytes_per_row = width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let buffer_size = (padded_bytes_per_row as u64) * (height as u64);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("engine_download_buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("engine_download_encoder") });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: tex,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        drop(textures);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait { submission_index: None, timeout: None })
            .map_err(|_| GraphicsError::TextureCreationFailed { width, height, format })?;
        rx.recv()
            .map_err(|_| GraphicsError::TextureCreationFailed { width, height, format })?
            .map_err(|_| GraphicsError::TextureCreationFailed { width, height, format })?;

        let data = slice.get_mapped_range();
        let mut out = Vec::with_capacity((unpadded_bytes_per_row as usize) * (height as usize));
        for row in 0..height as usize {
            let start = row * padded_bytes_per_row as usize;
            let end = start + unpadded_bytes_per_row as usize;
            out.extend_from_slice(&data[start..end]);
        }
        drop(data);
        staging.unmap();

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_texture_round_trips_through_download() {
        let backend = match WgpuBackend::new_headless() {
            Ok(backend) => backend,
            Err(_) => return, // no adapter available in this environment
        };

        let texture = backend.create_texture(4, 4, PixelFormat::Rgba8).unwrap();
        let downloaded = backend.download_texture(&texture, 4, 4, PixelFormat::Rgba8).unwrap();
        assert_eq!(downloaded.len(), 4 * 4 * 4);
        assert!(downloaded.iter().all(|&b| b == 0));
    }

    #[test]
    fn fence_signals_after_its_submission_completes() {
        let backend = match WgpuBackend::new_headless() {
            Ok(backend) => backend,
            Err(_) => return,
        };

        let texture = backend.create_texture(2, 2, PixelFormat::Rgba8).unwrap();
        let fence = backend.insert_fence(&texture);
        assert!(backend.wait_fence(&fence, Some(5_000)));
    }

    #[test]
    fn unknown_handle_is_rejected() {
        let backend = match WgpuBackend::new_headless() {
            Ok(backend) => backend,
            Err(_) => return,
        };

        let bogus = TextureHandle(u64::MAX);
        assert!(backend.create_framebuffer(&bogus).is_err());
    }
}
