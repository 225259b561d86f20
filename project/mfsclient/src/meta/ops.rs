//! Typed master operations.
//!
//! Every method validates the exact reply length and decodes it right after
//! the generic exchange, so callers never see raw reply bodies.

use tracing::warn;

use crate::chuck::chunk::ChunkDescriptor;
use crate::config::ClientOptions;
use crate::error::{MfsError, Result};
use crate::proto::attr::{ATTR_RECORD_LEN, Attr, FileType};
use crate::proto::codec::{Arg, BodyReader};
use crate::proto::consts::*;

use super::pool::MasterConnPool;

/// Resolved directory entry: inode plus its attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub inode: u32,
    pub attr: Attr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub inode: u32,
    pub kind: FileType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryPlus {
    pub name: String,
    pub inode: u32,
    pub attr: Attr,
}

/// Trash or reserved listing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedInode {
    pub name: String,
    pub inode: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub total_space: u64,
    pub avail_space: u64,
    pub trash_space: u64,
    pub reserved_space: u64,
    pub inodes: u32,
}

/// Fields to change in a setattr call; `None` leaves the field untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttr {
    pub mode: Option<u16>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
}

impl SetAttr {
    pub fn mask(&self) -> u8 {
        let mut mask = 0;
        if self.mode.is_some() {
            mask |= SET_MODE_FLAG;
        }
        if self.uid.is_some() {
            mask |= SET_UID_FLAG;
        }
        if self.gid.is_some() {
            mask |= SET_GID_FLAG;
        }
        if self.atime.is_some() {
            mask |= SET_ATIME_FLAG;
        }
        if self.mtime.is_some() {
            mask |= SET_MTIME_FLAG;
        }
        mask
    }
}

fn check_name(name: &str) -> Result<u8> {
    if name.is_empty() || name.len() > MFS_NAME_MAX {
        return Err(MfsError::InvalidArgument(format!(
            "name must be 1..={MFS_NAME_MAX} bytes: {name:?}"
        )));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(MfsError::InvalidArgument(format!(
            "name contains a separator: {name:?}"
        )));
    }
    Ok(name.len() as u8)
}

fn expect_len(op: &'static str, body: &[u8], len: usize) -> Result<()> {
    if body.len() != len {
        return Err(MfsError::BadLength {
            op,
            len: body.len(),
        });
    }
    Ok(())
}

fn decode_entry(op: &'static str, body: &[u8]) -> Result<Entry> {
    expect_len(op, body, 4 + ATTR_RECORD_LEN)?;
    let inode = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    Ok(Entry {
        inode,
        attr: Attr::parse(&body[4..])?,
    })
}

fn decode_attr(op: &'static str, body: &[u8]) -> Result<Attr> {
    expect_len(op, body, ATTR_RECORD_LEN)?;
    Attr::parse(body)
}

fn decode_name(r: &mut BodyReader<'_>) -> Result<String> {
    let len = r.u8()? as usize;
    let raw = r.bytes(len)?;
    Ok(String::from_utf8_lossy(raw).into_owned())
}

/// `len:u32 + path` where the length may include a trailing NUL.
fn decode_path(op: &'static str, body: &[u8]) -> Result<String> {
    let mut r = BodyReader::new(op, body);
    let len = r.u32()? as usize;
    if len != r.remaining() {
        return Err(MfsError::BadLength {
            op,
            len: body.len(),
        });
    }
    let raw = r.rest();
    let raw = raw.strip_suffix(b"\0").unwrap_or(raw);
    Ok(String::from_utf8_lossy(raw).into_owned())
}

/// Decode repeated records until the body is exhausted. A truncated trailing
/// record ends the listing.
fn decode_records<T>(
    op: &'static str,
    body: &[u8],
    mut one: impl FnMut(&mut BodyReader<'_>) -> Result<T>,
) -> Result<Vec<T>> {
    let mut r = BodyReader::new(op, body);
    let mut out = Vec::new();
    while !r.is_empty() {
        match one(&mut r) {
            Ok(v) => out.push(v),
            Err(MfsError::Decode(msg)) => {
                warn!(op, "truncated listing: {msg}");
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

/// Master operation set over a pool of sessions.
pub struct MasterClient {
    pool: MasterConnPool,
    uid: u32,
    gid: u32,
}

impl MasterClient {
    pub fn new(pool: MasterConnPool, uid: u32, gid: u32) -> Self {
        Self { pool, uid, gid }
    }

    pub fn from_options(opts: &ClientOptions) -> Self {
        Self::new(MasterConnPool::from_options(opts), opts.uid, opts.gid)
    }

    pub fn pool(&self) -> &MasterConnPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn call(&self, cmd: u32, args: &[Arg<'_>]) -> Result<Vec<u8>> {
        self.pool.send_and_receive(cmd, args).await
    }

    /// Calls whose only reply is a status byte.
    async fn call_status(&self, cmd: u32, args: &[Arg<'_>]) -> Result<()> {
        self.call(cmd, args).await.map(|_| ())
    }

    pub async fn statfs(&self) -> Result<StatFs> {
        let body = self.call(CUTOMA_FUSE_STATFS, &[]).await?;
        expect_len("statfs", &body, 36)?;
        let mut r = BodyReader::new("statfs", &body);
        Ok(StatFs {
            total_space: r.u64()?,
            avail_space: r.u64()?,
            trash_space: r.u64()?,
            reserved_space: r.u64()?,
            inodes: r.u32()?,
        })
    }

    pub async fn access(&self, inode: u32, mask: u8) -> Result<()> {
        self.call_status(
            CUTOMA_FUSE_ACCESS,
            &[
                Arg::U32(inode),
                Arg::U32(self.uid),
                Arg::U32(self.gid),
                Arg::U8(mask),
            ],
        )
        .await
    }

    pub async fn lookup(&self, parent: u32, name: &str) -> Result<Entry> {
        let nlen = check_name(name)?;
        let body = self
            .call(
                CUTOMA_FUSE_LOOKUP,
                &[
                    Arg::U32(parent),
                    Arg::U8(nlen),
                    Arg::Bytes(name.as_bytes()),
                    Arg::U32(self.uid),
                    Arg::U32(self.gid),
                ],
            )
            .await?;
        decode_entry("lookup", &body)
    }

    pub async fn getattr(&self, inode: u32) -> Result<Attr> {
        let body = self
            .call(
                CUTOMA_FUSE_GETATTR,
                &[Arg::U32(inode), Arg::U32(self.uid), Arg::U32(self.gid)],
            )
            .await?;
        decode_attr("getattr", &body)
    }

    pub async fn setattr(&self, inode: u32, set: SetAttr) -> Result<Attr> {
        let body = self
            .call(
                CUTOMA_FUSE_SETATTR,
                &[
                    Arg::U32(inode),
                    Arg::U32(self.uid),
                    Arg::U32(self.gid),
                    Arg::U8(set.mask()),
                    Arg::U16(set.mode.unwrap_or(0) & 0o7777),
                    Arg::U32(set.uid.unwrap_or(0)),
                    Arg::U32(set.gid.unwrap_or(0)),
                    Arg::U32(set.atime.unwrap_or(0)),
                    Arg::U32(set.mtime.unwrap_or(0)),
                ],
            )
            .await?;
        decode_attr("setattr", &body)
    }

    pub async fn truncate(&self, inode: u32, opened: bool, length: u64) -> Result<Attr> {
        let body = self
            .call(
                CUTOMA_FUSE_TRUNCATE,
                &[
                    Arg::U32(inode),
                    Arg::U8(opened as u8),
                    Arg::U32(self.uid),
                    Arg::U32(self.gid),
                    Arg::U64(length),
                ],
            )
            .await?;
        decode_attr("truncate", &body)
    }

    pub async fn readlink(&self, inode: u32) -> Result<String> {
        let body = self.call(CUTOMA_FUSE_READLINK, &[Arg::U32(inode)]).await?;
        decode_path("readlink", &body)
    }

    pub async fn symlink(&self, parent: u32, name: &str, target: &str) -> Result<Entry> {
        let nlen = check_name(name)?;
        let body = self
            .call(
                CUTOMA_FUSE_SYMLINK,
                &[
                    Arg::U32(parent),
                    Arg::U8(nlen),
                    Arg::Bytes(name.as_bytes()),
                    Arg::U32(target.len() as u32 + 1),
                    Arg::Bytes(target.as_bytes()),
                    Arg::U8(0),
                    Arg::U32(self.uid),
                    Arg::U32(self.gid),
                ],
            )
            .await?;
        decode_entry("symlink", &body)
    }

    pub async fn mknod(
        &self,
        parent: u32,
        name: &str,
        kind: FileType,
        mode: u16,
        rdev: u32,
    ) -> Result<Entry> {
        let nlen = check_name(name)?;
        let body = self
            .call(
                CUTOMA_FUSE_MKNOD,
                &[
                    Arg::U32(parent),
                    Arg::U8(nlen),
                    Arg::Bytes(name.as_bytes()),
                    Arg::U8(kind.as_byte()),
                    Arg::U16(mode & 0o7777),
                    Arg::U32(self.uid),
                    Arg::U32(self.gid),
                    Arg::U32(rdev),
                ],
            )
            .await?;
        decode_entry("mknod", &body)
    }

    pub async fn mkdir(&self, parent: u32, name: &str, mode: u16) -> Result<Entry> {
        let nlen = check_name(name)?;
        let body = self
            .call(
                CUTOMA_FUSE_MKDIR,
                &[
                    Arg::U32(parent),
                    Arg::U8(nlen),
                    Arg::Bytes(name.as_bytes()),
                    Arg::U16(mode & 0o7777),
                    Arg::U32(self.uid),
                    Arg::U32(self.gid),
                ],
            )
            .await?;
        decode_entry("mkdir", &body)
    }

    async fn remove_entry(&self, cmd: u32, parent: u32, name: &str) -> Result<()> {
        let nlen = check_name(name)?;
        self.call_status(
            cmd,
            &[
                Arg::U32(parent),
                Arg::U8(nlen),
                Arg::Bytes(name.as_bytes()),
                Arg::U32(self.uid),
                Arg::U32(self.gid),
            ],
        )
        .await
    }

    pub async fn unlink(&self, parent: u32, name: &str) -> Result<()> {
        self.remove_entry(CUTOMA_FUSE_UNLINK, parent, name).await
    }

    pub async fn rmdir(&self, parent: u32, name: &str) -> Result<()> {
        self.remove_entry(CUTOMA_FUSE_RMDIR, parent, name).await
    }

    pub async fn rename(
        &self,
        src_parent: u32,
        src_name: &str,
        dst_parent: u32,
        dst_name: &str,
    ) -> Result<()> {
        let src_len = check_name(src_name)?;
        let dst_len = check_name(dst_name)?;
        self.call_status(
            CUTOMA_FUSE_RENAME,
            &[
                Arg::U32(src_parent),
                Arg::U8(src_len),
                Arg::Bytes(src_name.as_bytes()),
                Arg::U32(dst_parent),
                Arg::U8(dst_len),
                Arg::Bytes(dst_name.as_bytes()),
                Arg::U32(self.uid),
                Arg::U32(self.gid),
            ],
        )
        .await
    }

    pub async fn link(&self, inode: u32, dst_parent: u32, name: &str) -> Result<Entry> {
        let nlen = check_name(name)?;
        let body = self
            .call(
                CUTOMA_FUSE_LINK,
                &[
                    Arg::U32(inode),
                    Arg::U32(dst_parent),
                    Arg::U8(nlen),
                    Arg::Bytes(name.as_bytes()),
                    Arg::U32(self.uid),
                    Arg::U32(self.gid),
                ],
            )
            .await?;
        decode_entry("link", &body)
    }

    pub async fn getdir(&self, inode: u32) -> Result<Vec<DirEntry>> {
        let body = self
            .call(
                CUTOMA_FUSE_GETDIR,
                &[Arg::U32(inode), Arg::U32(self.uid), Arg::U32(self.gid)],
            )
            .await?;
        decode_records("getdir", &body, |r| {
            let name = decode_name(r)?;
            let inode = r.u32()?;
            let kind = FileType::from_byte(r.u8()?)?;
            Ok(DirEntry { name, inode, kind })
        })
    }

    pub async fn getdir_plus(&self, inode: u32) -> Result<Vec<DirEntryPlus>> {
        let body = self
            .call(
                CUTOMA_FUSE_GETDIR,
                &[
                    Arg::U32(inode),
                    Arg::U32(self.uid),
                    Arg::U32(self.gid),
                    Arg::U8(GETDIR_FLAG_WITHATTR),
                ],
            )
            .await?;
        decode_records("getdir_plus", &body, |r| {
            let name = decode_name(r)?;
            let inode = r.u32()?;
            let attr = Attr::parse(r.bytes(ATTR_RECORD_LEN)?)?;
            Ok(DirEntryPlus { name, inode, attr })
        })
    }

    /// Permission check before opening. Newer masters answer with fresh
    /// attributes, older ones with a bare status.
    pub async fn open_check(&self, inode: u32, flags: u8) -> Result<Option<Attr>> {
        let body = self
            .call(
                CUTOMA_FUSE_OPEN,
                &[
                    Arg::U32(inode),
                    Arg::U32(self.uid),
                    Arg::U32(self.gid),
                    Arg::U8(flags),
                ],
            )
            .await?;
        match body.len() {
            1 => Ok(None),
            ATTR_RECORD_LEN => Attr::parse(&body).map(Some),
            len => Err(MfsError::BadLength { op: "open", len }),
        }
    }

    pub async fn read_chunk(&self, inode: u32, index: u32) -> Result<ChunkDescriptor> {
        let body = self
            .call(CUTOMA_FUSE_READ_CHUNK, &[Arg::U32(inode), Arg::U32(index)])
            .await?;
        ChunkDescriptor::decode("read_chunk", &body)
    }

    pub async fn write_chunk(&self, inode: u32, index: u32) -> Result<ChunkDescriptor> {
        let body = self
            .call(CUTOMA_FUSE_WRITE_CHUNK, &[Arg::U32(inode), Arg::U32(index)])
            .await?;
        ChunkDescriptor::decode("write_chunk", &body)
    }

    /// Close a write session, reporting the file length covered by the write.
    pub async fn write_end(&self, chunk_id: u64, inode: u32, length: u64) -> Result<()> {
        self.call_status(
            CUTOMA_FUSE_WRITE_CHUNK_END,
            &[Arg::U64(chunk_id), Arg::U32(inode), Arg::U64(length)],
        )
        .await
    }

    async fn named_inodes(&self, cmd: u32, op: &'static str) -> Result<Vec<NamedInode>> {
        let body = self.call(cmd, &[]).await?;
        decode_records(op, &body, |r| {
            let name = decode_name(r)?;
            let inode = r.u32()?;
            Ok(NamedInode { name, inode })
        })
    }

    pub async fn get_reserved(&self) -> Result<Vec<NamedInode>> {
        self.named_inodes(CUTOMA_FUSE_GETRESERVED, "get_reserved")
            .await
    }

    pub async fn get_trash(&self) -> Result<Vec<NamedInode>> {
        self.named_inodes(CUTOMA_FUSE_GETTRASH, "get_trash").await
    }

    pub async fn get_detached_attr(&self, inode: u32) -> Result<Attr> {
        let body = self
            .call(CUTOMA_FUSE_GETDETACHEDATTR, &[Arg::U32(inode)])
            .await?;
        decode_attr("get_detached_attr", &body)
    }

    pub async fn get_trash_path(&self, inode: u32) -> Result<String> {
        let body = self
            .call(CUTOMA_FUSE_GETTRASHPATH, &[Arg::U32(inode)])
            .await?;
        decode_path("get_trash_path", &body)
    }

    pub async fn set_trash_path(&self, inode: u32, path: &str) -> Result<()> {
        self.call_status(
            CUTOMA_FUSE_SETTRASHPATH,
            &[
                Arg::U32(inode),
                Arg::U32(path.len() as u32 + 1),
                Arg::Bytes(path.as_bytes()),
                Arg::U8(0),
            ],
        )
        .await
    }

    pub async fn undel(&self, inode: u32) -> Result<()> {
        self.call_status(CUTOMA_FUSE_UNDEL, &[Arg::U32(inode)]).await
    }

    pub async fn purge(&self, inode: u32) -> Result<()> {
        self.call_status(CUTOMA_FUSE_PURGE, &[Arg::U32(inode)]).await
    }
}
