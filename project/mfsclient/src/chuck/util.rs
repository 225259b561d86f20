//! 通用工具：将文件范围按 chunk 拆分，再将 chunk 内范围按 block 拆分。

use super::chunk::ChunkLayout;

/// 文件范围在某个 chunk 内的一段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub chunk_index: u64,
    pub offset_in_chunk: u64,
    pub len: usize,
}

/// chunk 内范围在某个 block 内的一段（线上传输单位）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    pub block_index: u32,
    pub offset_in_block: u32,
    pub len_in_block: u32,
}

/// 将文件的 [file_offset, file_offset+len) 拆分为若干 chunk 局部范围。
pub fn split_file_range_into_chunks(
    layout: ChunkLayout,
    mut file_offset: u64,
    len: usize,
) -> Vec<ChunkSpan> {
    let mut remaining = len as u64;
    let mut out = Vec::new();
    while remaining > 0 {
        let chunk_index = layout.chunk_index_of(file_offset);
        let offset_in_chunk = layout.within_chunk_offset(file_offset);
        let cap = layout.chunk_size - offset_in_chunk;
        let take = cap.min(remaining) as usize;
        out.push(ChunkSpan {
            chunk_index,
            offset_in_chunk,
            len: take,
        });
        file_offset += take as u64;
        remaining -= take as u64;
    }
    out
}

/// 将 chunk 内的 [offset_in_chunk, offset_in_chunk+len) 按 block 边界拆分。
pub fn split_chunk_range_into_blocks(
    layout: ChunkLayout,
    mut offset_in_chunk: u64,
    len: usize,
) -> Vec<BlockSpan> {
    let mut remaining = len as u64;
    let mut out = Vec::new();
    while remaining > 0 {
        let block_index = layout.block_index_of(offset_in_chunk);
        let offset_in_block = layout.within_block_offset(offset_in_chunk);
        let cap = (layout.block_size - offset_in_block) as u64;
        let take = cap.min(remaining);
        out.push(BlockSpan {
            block_index,
            offset_in_block,
            len_in_block: take as u32,
        });
        offset_in_chunk += take;
        remaining -= take;
    }
    out
}
