//! Pooling for the three kinds of recyclable resource a pipeline uses:
//! frame packets, GPU textures, and CPU scratch buffers (§4.2).

pub mod buffer_pool;
pub mod frame_packet_pool;
pub mod texture_pool;

pub use buffer_pool::BufferPool;
pub use frame_packet_pool::{FramePacketPool, FramePacketPoolConfig, FramePacketPoolStats, PoolError};
pub use texture_pool::{TexturePool, TexturePoolConfig, TexturePoolError, TexturePoolStats, TextureSpec};
