//! Chunk layout and chunk I/O (chuck)
//!
//! Responsibilities:
//! - Map file offsets to (chunk index, block, in-block offset) for the fixed
//!   64 MiB / 64 KiB layout.
//! - Decode chunk location descriptors returned by the master.
//! - Drive the chunk-server transport: failover reads, single-target writes.
//!
//! Submodules:
//! - `chunk`: layout arithmetic and `ChunkDescriptor`
//! - `util`: splitting file ranges into chunk spans and chunk ranges into block spans
//! - `reader` / `writer`: read and write drivers over `cadapter`
pub mod chunk;
pub mod reader;
pub mod util;
pub mod writer;
