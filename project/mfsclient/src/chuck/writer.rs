//! ChunkWriter：将写入缓冲按 block 拆分并推送到 chunk 的首个候选服务器。

use std::time::Duration;

use tracing::debug;

use crate::cadapter::conn::ChunkServerConn;
use crate::error::{MfsError, Result};

use super::chunk::{ChunkDescriptor, ChunkLayout};
use super::util::split_chunk_range_into_blocks;

/// 写会话独占一条新连接，不经过连接池。
pub struct ChunkWriter {
    layout: ChunkLayout,
    io_timeout: Option<Duration>,
}

impl ChunkWriter {
    pub fn new(layout: ChunkLayout, io_timeout: Option<Duration>) -> Self {
        Self { layout, io_timeout }
    }

    /// Write `data` at `offset_in_chunk`. There is no failover: the first
    /// candidate replicates to the others. On failure the error carries the
    /// number of bytes already acknowledged.
    pub async fn write(
        &self,
        desc: &ChunkDescriptor,
        offset_in_chunk: u32,
        data: &[u8],
    ) -> Result<usize> {
        let Some(first) = desc.servers.first() else {
            return Err(MfsError::NoChunkServer {
                chunk_id: desc.chunk_id,
            });
        };
        // the connection closes on drop
        let mut conn = ChunkServerConn::connect(first.socket_addr(), self.io_timeout).await?;
        conn.start_write(desc.chunk_id, desc.version, &desc.servers_wire())
            .await?;

        let mut done = 0usize;
        for (write_id, span) in split_chunk_range_into_blocks(
            self.layout,
            offset_in_chunk as u64,
            data.len(),
        )
        .into_iter()
        .enumerate()
        {
            let seg = &data[done..done + span.len_in_block as usize];
            conn.write_block(
                desc.chunk_id,
                write_id as u32,
                (span.block_index & 0x3FF) as u16,
                span.offset_in_block as u16,
                seg,
            )
            .await
            .map_err(|e| MfsError::partial(done, e))?;
            done += seg.len();
        }
        debug!(chunk_id = desc.chunk_id, offset_in_chunk, bytes = done, "chunk write done");
        Ok(done)
    }
}
