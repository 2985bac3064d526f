//! A bucketed, LRU-evicting pool of GPU textures keyed by `(width,
//! height, format)` (§4.2). Distinct from [crate::pool::frame_packet_pool],
//! which pools the lightweight packet wrapper rather than GPU memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::graphics::{GraphicsBackend, GraphicsError, TextureHandle};
use crate::pixel_format::PixelFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSpec {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexturePoolConfig {
    pub max_textures_per_bucket: usize,
    pub max_total_textures: usize,
    pub idle_timeout: Duration,
    pub enable_lru: bool,
}

impl Default for TexturePoolConfig {
    fn default() -> Self {
        Self {
            max_textures_per_bucket: 4,
            max_total_textures: 32,
            idle_timeout: Duration::from_millis(5000),
            enable_lru: true,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TexturePoolError {
    #[error("texture pool at total capacity ({0} textures)")]
    AtCapacity(usize),
    #[error(transparent)]
    Backend(#[from] GraphicsError),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TexturePoolStats {
    pub hits: u64,
    pub misses: u64,
}

impl TexturePoolStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry {
    texture: TextureHandle,
    last_used: Instant,
}

struct Bucket {
    idle: Vec<Entry>,
    in_use: usize,
}

impl Bucket {
    fn new() -> Self {
        Self { idle: Vec::new(), in_use: 0 }
    }
}

/// A texture pool bound to a single [GraphicsBackend]. Not `Clone`;
/// callers share it behind an `Arc` the way [crate::context::PipelineContext]
/// does.
pub struct TexturePool {
    backend: Arc<dyn GraphicsBackend>,
    config: Mutex<TexturePoolConfig>,
    buckets: Mutex<HashMap<TextureSpec, Bucket>>,
    stats: Mutex<TexturePoolStats>,
}

impl TexturePool {
    pub fn new(backend: Arc<dyn GraphicsBackend>, config: TexturePoolConfig) -> Self {
        Self {
            backend,
            config: Mutex::new(config),
            buckets: Mutex::new(HashMap::new()),
            stats: Mutex::new(TexturePoolStats::default()),
        }
    }

    pub fn acquire(&self, width: u32, height: u32, format: PixelFormat) -> Result<TextureHandle, TexturePoolError> {
        self.acquire_spec(TextureSpec { width, height, format })
    }

    pub fn acquire_spec(&self, spec: TextureSpec) -> Result<TextureHandle, TexturePoolError> {
        let mut buckets = self.buckets.lock().expect(crate::THREAD_PANIC_MSG);
        let bucket = buckets.entry(spec).or_insert_with(Bucket::new);
        if let Some(entry) = bucket.idle.pop() {
            bucket.in_use += 1;
            self.stats.lock().expect(crate::THREAD_PANIC_MSG).hits += 1;
            return Ok(entry.texture);
        }
        let total: usize = buckets.values().map(|b| b.idle.len() + b.in_use).sum();
        if total >= self.config.lock().expect(crate::THREAD_PANIC_MSG).max_total_textures {
            return Err(TexturePoolError::AtCapacity(total));
        }
        drop(buckets);
        let texture = self.backend.create_texture(spec.width, spec.height, spec.format)?;
        let mut buckets = self.buckets.lock().expect(crate::THREAD_PANIC_MSG);
        buckets.entry(spec).or_insert_with(Bucket::new).in_use += 1;
        self.stats.lock().expect(crate::THREAD_PANIC_MSG).misses += 1;
        Ok(texture)
    }

    /// Returns a texture to its bucket's idle list. `spec` must match
    /// the spec it was acquired with; a texture released under the
    /// wrong spec is simply destroyed rather than miscategorized.
    pub fn release(&self, spec: TextureSpec, texture: TextureHandle) {
        let mut buckets = self.buckets.lock().expect(crate::THREAD_PANIC_MSG);
        let config = *self.config.lock().expect(crate::THREAD_PANIC_MSG);
        let bucket = buckets.entry(spec).or_insert_with(Bucket::new);
        bucket.in_use = bucket.in_use.saturating_sub(1);
        if bucket.idle.len() >= config.max_textures_per_bucket {
            self.backend.destroy_texture(texture);
            return;
        }
        bucket.idle.push(Entry { texture, last_used: Instant::now() });
    }

    /// Pre-creates `count` idle textures for `spec` (§4.2 "warmup").
    pub fn warmup(&self, spec: TextureSpec, count: usize) -> Result<(), TexturePoolError> {
        for _ in 0..count {
            let texture = self.acquire_spec(spec)?;
            self.release(spec, texture);
        }
        Ok(())
    }

    /// Destroys idle textures that have sat unused longer than
    /// `idle_timeout`, oldest first, when `enable_lru` is set.
    pub fn cleanup(&self) {
        let config = *self.config.lock().expect(crate::THREAD_PANIC_MSG);
        if !config.enable_lru {
            return;
        }
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect(crate::THREAD_PANIC_MSG);
        for bucket in buckets.values_mut() {
            let (expired, kept): (Vec<_>, Vec<_>) = bucket
                .idle
                .drain(..)
                .partition(|e| now.duration_since(e.last_used) >= config.idle_timeout);
            bucket.idle = kept;
            for entry in expired {
                self.backend.destroy_texture(entry.texture);
            }
        }
    }

    /// Destroys every idle texture immediately, regardless of age.
    pub fn clear(&self) {
        let mut buckets = self.buckets.lock().expect(crate::THREAD_PANIC_MSG);
        for bucket in buckets.values_mut() {
            for entry in bucket.idle.drain(..) {
                self.backend.destroy_texture(entry.texture);
            }
        }
    }

    /// Evicts the single oldest idle texture across all buckets, used
    /// to free memory under pressure without waiting for the idle
    /// timeout.
    pub fn shrink(&self) -> bool {
        let mut buckets = self.buckets.lock().expect(crate::THREAD_PANIC_MSG);
        let oldest = buckets
            .iter_mut()
            .filter_map(|(spec, bucket)| {
                bucket
                    .idle
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, e)| e.last_used)
                    .map(|(idx, e)| (*spec, idx, e.last_used))
            })
            .min_by_key(|(_, _, last_used)| *last_used);
        let Some((spec, idx, _)) = oldest else { return false };
        let entry = buckets.get_mut(&spec).unwrap().idle.remove(idx);
        self.backend.destroy_texture(entry.texture);
        true
    }

    pub fn available_count(&self) -> usize {
        self.buckets.lock().expect(crate::THREAD_PANIC_MSG).values().map(|b| b.idle.len()).sum()
    }

    pub fn available_count_for(&self, spec: TextureSpec) -> usize {
        self.buckets.lock().expect(crate::THREAD_PANIC_MSG).get(&spec).map_or(0, |b| b.idle.len())
    }

    pub fn in_use_count(&self) -> usize {
        self.buckets.lock().expect(crate::THREAD_PANIC_MSG).values().map(|b| b.in_use).sum()
    }

    pub fn total_count(&self) -> usize {
        self.available_count() + self.in_use_count()
    }

    pub fn stats(&self) -> TexturePoolStats {
        *self.stats.lock().expect(crate::THREAD_PANIC_MSG)
    }

    pub fn reset_stats(&self) {
        *self.stats.lock().expect(crate::THREAD_PANIC_MSG) = TexturePoolStats::default();
    }

    pub fn config(&self) -> TexturePoolConfig {
        *self.config.lock().expect(crate::THREAD_PANIC_MSG)
    }

    pub fn set_config(&self, config: TexturePoolConfig) {
        *self.config.lock().expect(crate::THREAD_PANIC_MSG) = config;
    }
}
