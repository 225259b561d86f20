//! Chunk-server adapter
//!
//! Submodules:
//! - `conn`: one connection speaking the block READ/WRITE protocol
//! - `pool`: per-address free lists of idle connections
pub mod conn;
pub mod pool;

pub use conn::ChunkServerConn;
pub use pool::ChunkServerPool;
