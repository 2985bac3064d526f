//! Pipeline-wide configuration (§6 Configuration), persisted via
//! `util::saved_file::SavedFile` the same way the rest of this
//! workspace persists settings — plain `serde_json`, debug-pretty-printed.

use serde::{Deserialize, Serialize};

use crate::pool::{FramePacketPoolConfig, TexturePoolConfig};

/// Mirrors `original_source/include/pipeline/core/PipelineConfig.h`'s
/// field set. `prefer_metal`/`prefer_gles` are kept even though this
/// workspace's desktop backend is `wgpu`-only: a mobile build picking
/// up this same config format still needs them, and dropping fields a
/// config file might already contain would make old configs silently
/// lose settings on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub name: String,
    pub prefer_metal: bool,
    pub prefer_gles: bool,
    pub texture_pool_size: usize,
    pub frame_packet_pool_size: usize,
    pub buffer_pool_size: usize,
    pub max_concurrent_frames: usize,
    pub enable_parallel_execution: bool,
    pub enable_frame_skipping: bool,
    pub enable_profiling: bool,
    pub enable_validation: bool,
    pub enable_logging: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "Pipeline".to_string(),
            prefer_metal: true,
            prefer_gles: true,
            texture_pool_size: 16,
            frame_packet_pool_size: 5,
            buffer_pool_size: 8,
            max_concurrent_frames: 3,
            enable_parallel_execution: true,
            enable_frame_skipping: true,
            enable_profiling: false,
            enable_validation: true,
            enable_logging: false,
        }
    }
}

impl PipelineConfig {
    pub fn texture_pool_config(&self) -> TexturePoolConfig {
        TexturePoolConfig {
            max_total_textures: self.texture_pool_size,
            ..TexturePoolConfig::default()
        }
    }

    pub fn frame_packet_pool_config(&self) -> FramePacketPoolConfig {
        FramePacketPoolConfig {
            capacity: self.frame_packet_pool_size,
            ..FramePacketPoolConfig::default()
        }
    }
}

impl util::saved_file::SavedFile for PipelineConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_baseline() {
        let config = PipelineConfig::default();
        assert_eq!(config.name, "Pipeline");
        assert_eq!(config.max_concurrent_frames, 3);
        assert!(config.enable_parallel_execution);
        assert!(!config.enable_profiling);
    }

    #[test]
    fn round_trips_through_json() {
        let config = PipelineConfig { name: "Preview".to_string(), ..PipelineConfig::default() };
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let partial: PipelineConfig = serde_json::from_str(r#"{"name": "Partial"}"#).unwrap();
        assert_eq!(partial.name, "Partial");
        assert_eq!(partial.max_concurrent_frames, PipelineConfig::default().max_concurrent_frames);
    }
}
