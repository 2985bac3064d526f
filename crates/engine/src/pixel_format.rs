//! Pixel formats a frame packet or texture may carry (§3).

/// The closed set of pixel layouts the pipeline understands. `Oes`
/// covers Android's external camera textures (`GL_TEXTURE_EXTERNAL_OES`)
/// which must be sampled specially and never assumed to be linear RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    Rgb8,
    Yuv420,
    Nv12,
    Nv21,
    Oes,
    Unknown,
}

impl PixelFormat {
    /// Bytes per pixel for formats with a uniform per-pixel stride.
    /// Planar/subsampled YUV formats have no single per-pixel byte
    /// count, so callers needing their buffer size must compute it from
    /// width/height directly; this returns `1` for them as a safe lower
    /// bound rather than panicking.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Yuv420 | PixelFormat::Nv12 | PixelFormat::Nv21 => 1,
            PixelFormat::Oes | PixelFormat::Unknown => 1,
        }
    }

    /// Whether the format is planar/subsampled YUV, which callers
    /// computing buffer sizes must handle differently from packed
    /// formats (1.5 bytes/pixel total for 4:2:0).
    pub fn is_yuv420_family(self) -> bool {
        matches!(self, PixelFormat::Yuv420 | PixelFormat::Nv12 | PixelFormat::Nv21)
    }
}
