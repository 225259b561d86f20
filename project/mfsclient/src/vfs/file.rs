//! Open file handle with read-ahead and write buffering.
//!
//! Reads are served from a read-ahead window refilled chunk by chunk; read
//! descriptors are cached per chunk index for the life of the handle. Writes
//! collect in a pending buffer that is flushed per 64 MiB chunk segment.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::chuck::chunk::{ChunkDescriptor, ChunkLayout, wire_chunk_index};
use crate::chuck::reader::ChunkReader;
use crate::chuck::util::split_file_range_into_chunks;
use crate::chuck::writer::ChunkWriter;
use crate::error::{MfsError, Result};
use crate::meta::ops::{DirEntry, DirEntryPlus};
use crate::proto::attr::Attr;

use super::client::ClientInner;

pub struct File {
    inner: Arc<ClientInner>,
    layout: ChunkLayout,
    path: String,
    inode: u32,
    parent: u32,
    name: String,
    attr: Attr,
    offset: u64,
    rbuf: Vec<u8>,
    roff: u64,
    wbuf: Vec<u8>,
    woff: u64,
    read_chunks: HashMap<u64, ChunkDescriptor>,
    dir_entries: Option<Vec<DirEntryPlus>>,
    dir_names: Option<Vec<DirEntry>>,
}

impl File {
    pub(crate) fn new(
        inner: Arc<ClientInner>,
        path: String,
        parent: u32,
        name: String,
        inode: u32,
        attr: Attr,
    ) -> Self {
        Self {
            inner,
            layout: ChunkLayout::default(),
            path,
            inode,
            parent,
            name,
            attr,
            offset: 0,
            rbuf: Vec::new(),
            roff: 0,
            wbuf: Vec::new(),
            woff: 0,
            read_chunks: HashMap::new(),
            dir_entries: None,
            dir_names: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn inode(&self) -> u32 {
        self.inode
    }

    /// Attribute snapshot taken at open, grown by local writes.
    pub fn attr(&self) -> &Attr {
        &self.attr
    }

    pub fn len(&self) -> u64 {
        self.attr.length
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Bytes written but not yet flushed.
    pub fn pending(&self) -> usize {
        self.wbuf.len()
    }

    /// Re-read attributes from the master.
    pub async fn refresh(&mut self) -> Result<&Attr> {
        self.sync().await?;
        self.attr = self.inner.master.getattr(self.inode).await?;
        Ok(&self.attr)
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(off) => Some(off),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => self.attr.length.checked_add_signed(delta),
        };
        let Some(target) = target else {
            return Err(MfsError::InvalidArgument(format!(
                "seek before start of {}",
                self.path
            )));
        };
        self.offset = target;
        Ok(target)
    }

    /// Sequential read through the read-ahead window. Returns `Ok(0)` at end
    /// of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.sync().await?;
        if buf.is_empty() || self.offset >= self.attr.length {
            return Ok(0);
        }
        if !self.window_contains(self.offset) {
            let left = self.attr.length - self.offset;
            let want = (self.inner.opts.read_ahead.max(buf.len()) as u64).min(left) as usize;
            let mut window = std::mem::take(&mut self.rbuf);
            window.resize(want, 0);
            let n = self.read_chunks_at(&mut window, self.offset).await?;
            window.truncate(n);
            self.rbuf = window;
            self.roff = self.offset;
            if n == 0 {
                return Ok(0);
            }
        }
        let start = (self.offset - self.roff) as usize;
        let n = (self.rbuf.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&self.rbuf[start..start + n]);
        self.offset += n as u64;
        Ok(n)
    }

    fn window_contains(&self, off: u64) -> bool {
        off >= self.roff && off < self.roff + self.rbuf.len() as u64
    }

    /// Positional read; does not move the cursor. Returns fewer bytes than
    /// requested only at end of file.
    pub async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.sync().await?;
        self.read_chunks_at(buf, offset).await
    }

    async fn read_chunks_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.attr.length {
            return Ok(0);
        }
        let len = ((self.attr.length - offset) as usize).min(buf.len());
        let mut done = 0usize;
        for span in split_file_range_into_chunks(self.layout, offset, len) {
            let desc = self
                .read_descriptor(span.chunk_index)
                .await
                .map_err(|e| MfsError::partial(done, e))?;
            let dst = &mut buf[done..done + span.len];
            let readable = desc.readable_len(self.layout, span.chunk_index);
            let stored = readable.saturating_sub(span.offset_in_chunk).min(span.len as u64) as usize;
            if stored > 0 {
                ChunkReader::new(&self.inner.chunks)
                    .read(&desc, span.offset_in_chunk as u32, &mut dst[..stored])
                    .await
                    .map_err(|e| MfsError::partial(done, e))?;
            }
            // beyond the data the master knows about: sparse tail
            dst[stored..].fill(0);
            done += span.len;
        }
        Ok(done)
    }

    async fn read_descriptor(&mut self, index: u64) -> Result<ChunkDescriptor> {
        if let Some(desc) = self.read_chunks.get(&index) {
            return Ok(desc.clone());
        }
        let desc = self
            .inner
            .master
            .read_chunk(self.inode, wire_chunk_index(index)?)
            .await?;
        self.read_chunks.insert(index, desc.clone());
        Ok(desc)
    }

    /// Buffered write at the cursor.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let n = self.write_at(data, self.offset).await?;
        self.offset += n as u64;
        Ok(n)
    }

    /// Buffered positional write. A write outside the pending window flushes
    /// it first; one inside overwrites in place and may extend the window.
    pub async fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let window_end = self.woff + self.wbuf.len() as u64;
        if !self.wbuf.is_empty() && (offset < self.woff || offset > window_end) {
            self.sync().await?;
        }
        if self.wbuf.is_empty() {
            self.woff = offset;
        }
        let start = (offset - self.woff) as usize;
        let overlap = (self.wbuf.len() - start).min(data.len());
        self.wbuf[start..start + overlap].copy_from_slice(&data[..overlap]);
        self.wbuf.extend_from_slice(&data[overlap..]);

        if self.wbuf.len() > self.inner.opts.write_flush_threshold {
            self.sync().await?;
        }
        Ok(data.len())
    }

    /// Flush pending writes: one write session per touched chunk, each closed
    /// with `write_end`. Unsent bytes stay buffered if a segment fails.
    pub async fn sync(&mut self) -> Result<()> {
        if self.wbuf.is_empty() {
            return Ok(());
        }
        let data = std::mem::take(&mut self.wbuf);
        let base = self.woff;
        let mut done = 0usize;
        let mut failure = None;
        for span in split_file_range_into_chunks(self.layout, base, data.len()) {
            let seg = &data[done..done + span.len];
            match self.flush_segment(span.chunk_index, span.offset_in_chunk, seg).await {
                Ok(end) => {
                    done += span.len;
                    self.attr.length = self.attr.length.max(end);
                }
                Err(e) => {
                    failure = Some(MfsError::partial(done, e));
                    break;
                }
            }
        }

        self.rbuf.clear();
        self.inner.cache.forget(self.parent, &self.name);
        if let Some(e) = failure {
            self.wbuf = data[done..].to_vec();
            self.woff = base + done as u64;
            return Err(e);
        }
        debug!(path = %self.path, offset = base, bytes = done, "flushed");
        self.woff = base + done as u64;
        Ok(())
    }

    /// Push one chunk segment; returns the file offset just past it.
    async fn flush_segment(&mut self, index: u64, offset_in_chunk: u64, seg: &[u8]) -> Result<u64> {
        let master = &self.inner.master;
        let desc = master.write_chunk(self.inode, wire_chunk_index(index)?).await?;
        ChunkWriter::new(self.layout, self.inner.opts.io_timeout_duration())
            .write(&desc, offset_in_chunk as u32, seg)
            .await?;
        let end = self.layout.chunk_start(index) + offset_in_chunk + seg.len() as u64;
        master.write_end(desc.chunk_id, self.inode, end).await?;
        self.read_chunks.remove(&index);
        Ok(end)
    }

    /// Discard pending writes and set the file length.
    pub async fn truncate(&mut self, size: u64) -> Result<()> {
        self.wbuf.clear();
        self.woff = 0;
        self.rbuf.clear();
        self.read_chunks.clear();
        self.attr = self.inner.master.truncate(self.inode, true, size).await?;
        self.inner.cache.forget(self.parent, &self.name);
        Ok(())
    }

    /// Directory listing with attributes; cached for the life of the handle.
    pub async fn read_dir(&mut self) -> Result<Vec<DirEntryPlus>> {
        if self.dir_entries.is_none() {
            self.dir_entries = Some(self.inner.master.getdir_plus(self.inode).await?);
        }
        Ok(self.dir_entries.clone().unwrap_or_default())
    }

    pub async fn read_dir_names(&mut self) -> Result<Vec<String>> {
        if self.dir_names.is_none() {
            self.dir_names = Some(self.inner.master.getdir(self.inode).await?);
        }
        Ok(self
            .dir_names
            .iter()
            .flatten()
            .filter(|e| e.name != "." && e.name != "..")
            .map(|e| e.name.clone())
            .collect())
    }

    /// Flush and release the handle.
    pub async fn close(mut self) -> Result<()> {
        self.sync().await
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if !self.wbuf.is_empty() {
            warn!(
                path = %self.path,
                pending = self.wbuf.len(),
                "file dropped with unflushed writes"
            );
        }
    }
}
