//! ChunkReader：按 chunk 描述符从 chunk server 读取数据，失败时依次切换候选服务器。

use tracing::warn;

use crate::cadapter::pool::ChunkServerPool;
use crate::error::{MfsError, Result};

use super::chunk::ChunkDescriptor;

/// Attempts per candidate server before moving to the next one.
pub const READ_TRIES_PER_SERVER: usize = 2;

pub struct ChunkReader<'a> {
    pool: &'a ChunkServerPool,
}

impl<'a> ChunkReader<'a> {
    pub fn new(pool: &'a ChunkServerPool) -> Self {
        Self { pool }
    }

    /// Fill `buf` from `offset_in_chunk`. Candidates are tried left to right;
    /// a connection that fails in any way is closed, a clean one goes back
    /// to the pool. Holes (chunk id 0) read as zeros.
    pub async fn read(
        &self,
        desc: &ChunkDescriptor,
        offset_in_chunk: u32,
        buf: &mut [u8],
    ) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        if desc.is_hole() {
            buf.fill(0);
            return Ok(());
        }
        for server in &desc.servers {
            let addr = server.socket_addr();
            for attempt in 0..READ_TRIES_PER_SERVER {
                let mut conn = match self.pool.checkout(addr).await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(%addr, chunk_id = desc.chunk_id, "connect failed: {e}");
                        break;
                    }
                };
                match conn
                    .read_block(desc.chunk_id, desc.version, offset_in_chunk, buf)
                    .await
                {
                    Ok(()) => {
                        self.pool.checkin(conn);
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(%addr, chunk_id = desc.chunk_id, attempt, "chunk read failed: {e}");
                    }
                }
            }
        }
        Err(MfsError::NoChunkServer {
            chunk_id: desc.chunk_id,
        })
    }
}
