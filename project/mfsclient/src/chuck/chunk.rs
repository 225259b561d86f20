//! Chunk layout and chunk location descriptors
//!
//! A file is a flat byte stream cut into 64 MiB chunks; each chunk is moved
//! over the wire in 64 KiB blocks.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::error::{MfsError, Result};
use crate::proto::codec::BodyReader;

pub const CHUNK_SIZE: u64 = 1 << 26;
pub const BLOCK_SIZE: u32 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    pub chunk_size: u64,
    pub block_size: u32,
}

impl Default for ChunkLayout {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            block_size: BLOCK_SIZE,
        }
    }
}

impl ChunkLayout {
    #[inline]
    pub fn chunk_index_of(&self, file_offset: u64) -> u64 {
        file_offset / self.chunk_size
    }

    #[inline]
    pub fn within_chunk_offset(&self, file_offset: u64) -> u64 {
        file_offset % self.chunk_size
    }

    #[inline]
    pub fn block_index_of(&self, offset_in_chunk: u64) -> u32 {
        (offset_in_chunk / self.block_size as u64) as u32
    }

    #[inline]
    pub fn within_block_offset(&self, offset_in_chunk: u64) -> u32 {
        (offset_in_chunk % self.block_size as u64) as u32
    }

    /// File offset where chunk `index` starts.
    #[inline]
    pub fn chunk_start(&self, index: u64) -> u64 {
        index * self.chunk_size
    }
}

/// Chunk index as carried in master requests, which only have 32 bits for it.
pub fn wire_chunk_index(index: u64) -> Result<u32> {
    u32::try_from(index)
        .map_err(|_| MfsError::InvalidArgument(format!("chunk index {index} out of range")))
}

/// One chunk server candidate as sent by the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkServerAddr {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl ChunkServerAddr {
    pub const WIRE_LEN: usize = 6;

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[..4].copy_from_slice(&self.ip.octets());
        out[4..].copy_from_slice(&self.port.to_be_bytes());
        out
    }
}

impl From<SocketAddrV4> for ChunkServerAddr {
    fn from(addr: SocketAddrV4) -> Self {
        Self {
            ip: *addr.ip(),
            port: addr.port(),
        }
    }
}

/// Location of one chunk: id, version, the file length known to the master
/// and the candidate servers in preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub chunk_id: u64,
    pub version: u32,
    pub length: u64,
    pub servers: Vec<ChunkServerAddr>,
}

impl ChunkDescriptor {
    pub const HEADER_LEN: usize = 20;

    pub fn decode(op: &'static str, body: &[u8]) -> Result<Self> {
        if body.len() < Self::HEADER_LEN
            || (body.len() - Self::HEADER_LEN) % ChunkServerAddr::WIRE_LEN != 0
        {
            return Err(MfsError::BadLength {
                op,
                len: body.len(),
            });
        }
        let mut r = BodyReader::new(op, body);
        let length = r.u64()?;
        let chunk_id = r.u64()?;
        let version = r.u32()?;
        let mut servers = Vec::with_capacity(r.remaining() / ChunkServerAddr::WIRE_LEN);
        while !r.is_empty() {
            let ip = Ipv4Addr::from(r.u32()?);
            let port = r.u16()?;
            servers.push(ChunkServerAddr { ip, port });
        }
        Ok(Self {
            chunk_id,
            version,
            length,
            servers,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(Self::HEADER_LEN + self.servers.len() * ChunkServerAddr::WIRE_LEN);
        out.extend_from_slice(&self.length.to_be_bytes());
        out.extend_from_slice(&self.chunk_id.to_be_bytes());
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.servers_wire());
        out
    }

    /// Candidate list in wire form, relayed to the first server on write.
    pub fn servers_wire(&self) -> Vec<u8> {
        self.servers.iter().flat_map(|s| s.encode()).collect()
    }

    /// Chunk id 0 marks a hole: nothing stored yet, reads as zeros.
    pub fn is_hole(&self) -> bool {
        self.chunk_id == 0
    }

    /// Bytes of chunk `index` covered by the file, never beyond the chunk.
    pub fn readable_len(&self, layout: ChunkLayout, index: u64) -> u64 {
        self.length
            .saturating_sub(layout.chunk_start(index))
            .min(layout.chunk_size)
    }
}
