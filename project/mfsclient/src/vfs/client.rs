//! Path-level client: resolves paths through the inode cache and exposes
//! POSIX-like namespace operations plus open files.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::debug;

use crate::cadapter::pool::ChunkServerPool;
use crate::config::ClientOptions;
use crate::error::{MfsError, MfsStatus, Result};
use crate::meta::ops::{DirEntryPlus, Entry, MasterClient, SetAttr, StatFs};
use crate::proto::attr::{Attr, FileType};
use crate::proto::consts::{AFTER_CREATE, MFS_ROOT_ID, WANT_READ, WANT_WRITE};

use super::cache::InodeCache;
use super::file::File;

/// Symlinks followed during one resolution before giving up.
pub const MAX_SYMLINK_HOPS: usize = 40;

pub(crate) struct ClientInner {
    pub(crate) opts: ClientOptions,
    pub(crate) master: MasterClient,
    pub(crate) chunks: ChunkServerPool,
    pub(crate) cache: InodeCache,
    cwd: Mutex<String>,
}

/// How to open a file, in the manner of `std::fs::OpenOptions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub create_new: bool,
    pub truncate: bool,
    pub mode: u16,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            create: false,
            create_new: false,
            truncate: false,
            mode: 0o644,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(self, read: bool) -> Self {
        Self { read, ..self }
    }

    pub fn write(self, write: bool) -> Self {
        Self { write, ..self }
    }

    pub fn create(self, create: bool) -> Self {
        Self { create, ..self }
    }

    pub fn create_new(self, create_new: bool) -> Self {
        Self { create_new, ..self }
    }

    pub fn truncate(self, truncate: bool) -> Self {
        Self { truncate, ..self }
    }

    pub fn mode(self, mode: u16) -> Self {
        Self { mode, ..self }
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.read {
            flags |= WANT_READ;
        }
        if self.write {
            flags |= WANT_WRITE;
        }
        flags
    }
}

/// Outcome of a path walk.
struct Resolved {
    path: String,
    parent: u32,
    name: String,
    inode: u32,
    attr: Attr,
}

impl Resolved {
    fn entry(&self) -> Entry {
        Entry {
            inode: self.inode,
            attr: self.attr,
        }
    }

    fn is_root(&self) -> bool {
        self.inode == MFS_ROOT_ID && self.name.is_empty()
    }
}

struct Step {
    name: String,
    entry: Entry,
}

fn split_components(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn unix_secs(t: SystemTime) -> u32 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Build a client; nothing is dialed until the first request.
    pub fn new(opts: ClientOptions) -> Result<Self> {
        opts.validate()?;
        let inner = ClientInner {
            master: MasterClient::from_options(&opts),
            chunks: ChunkServerPool::new(opts.io_timeout_duration()),
            cache: InodeCache::new(opts.cache_enabled),
            cwd: Mutex::new("/".to_string()),
            opts,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.opts
    }

    /// Raw master operations, including the trash/reserved subset.
    pub fn master(&self) -> &MasterClient {
        &self.inner.master
    }

    pub fn cache(&self) -> &InodeCache {
        &self.inner.cache
    }

    fn absolute(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            let cwd = self.inner.cwd.lock();
            format!("{}/{}", cwd.trim_end_matches('/'), path)
        }
    }

    async fn lookup(&self, parent: u32, name: &str) -> Result<Entry> {
        if let Some(entry) = self.inner.cache.get(parent, name) {
            return Ok(*entry);
        }
        let entry = self.inner.master.lookup(parent, name).await?;
        self.inner.cache.insert(parent, name, entry);
        Ok(entry)
    }

    /// Walk `path` segment by segment. Intermediate symlinks are always
    /// followed, the last one only with `follow_last`.
    async fn resolve(&self, path: &str, follow_last: bool) -> Result<Resolved> {
        let abs = self.absolute(path);
        let mut pending: VecDeque<String> = split_components(&abs).into();
        let mut chain: Vec<Step> = Vec::new();
        let mut hops = 0usize;

        while let Some(seg) = pending.pop_front() {
            match seg.as_str() {
                "." => continue,
                ".." => {
                    chain.pop();
                    continue;
                }
                _ => {}
            }
            let dir = chain.last().map_or(MFS_ROOT_ID, |s| s.entry.inode);
            let entry = self.lookup(dir, &seg).await?;
            let is_last = pending.is_empty();

            if entry.attr.is_symlink() && (!is_last || follow_last) {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(MfsError::SymlinkLoop(abs));
                }
                let target = self.inner.master.readlink(entry.inode).await?;
                if target.starts_with('/') {
                    chain.clear();
                }
                for part in split_components(&target).into_iter().rev() {
                    pending.push_front(part);
                }
                continue;
            }
            if !is_last && !entry.attr.is_dir() {
                return Err(MfsError::Status(MfsStatus::ENOTDIR));
            }
            chain.push(Step { name: seg, entry });
        }

        let Some(last) = chain.pop() else {
            let attr = self.inner.master.getattr(MFS_ROOT_ID).await?;
            return Ok(Resolved {
                path: "/".to_string(),
                parent: MFS_ROOT_ID,
                name: String::new(),
                inode: MFS_ROOT_ID,
                attr,
            });
        };
        let parent = chain.last().map_or(MFS_ROOT_ID, |s| s.entry.inode);
        let mut canonical = String::new();
        for step in chain.iter().chain(std::iter::once(&last)) {
            canonical.push('/');
            canonical.push_str(&step.name);
        }
        Ok(Resolved {
            path: canonical,
            parent,
            name: last.name,
            inode: last.entry.inode,
            attr: last.entry.attr,
        })
    }

    /// Resolve the directory that holds `path` and return it with the final
    /// name component.
    async fn resolve_parent(&self, path: &str) -> Result<(Resolved, String)> {
        let abs = self.absolute(path);
        let mut parts = split_components(&abs);
        let Some(name) = parts.pop() else {
            return Err(MfsError::InvalidArgument(format!("{path}: no name component")));
        };
        if name == "." || name == ".." {
            return Err(MfsError::InvalidArgument(format!("{path}: invalid name")));
        }
        let dir = self.resolve(&format!("/{}", parts.join("/")), true).await?;
        if !dir.attr.is_dir() {
            return Err(MfsError::Status(MfsStatus::ENOTDIR));
        }
        Ok((dir, name))
    }

    fn child_path(dir: &Resolved, name: &str) -> String {
        format!("{}/{}", dir.path.trim_end_matches('/'), name)
    }

    /// Drop whatever this client cached at `(parent, name)`, subtree included.
    fn invalidate(&self, parent: u32, name: &str) -> usize {
        match self.inner.cache.get(parent, name) {
            Some(entry) => self.inner.cache.purge(parent, name, entry.inode),
            None => 0,
        }
    }

    pub async fn open(&self, path: &str) -> Result<File> {
        self.open_with(path, OpenOptions::new()).await
    }

    /// Open for writing, creating or truncating as needed.
    pub async fn create(&self, path: &str) -> Result<File> {
        let opts = OpenOptions::new().write(true).create(true).truncate(true);
        self.open_with(path, opts).await
    }

    pub async fn open_with(&self, path: &str, opts: OpenOptions) -> Result<File> {
        let found = match self.resolve(path, true).await {
            Ok(r) if opts.create_new => {
                debug!(path = %r.path, "create_new on existing file");
                return Err(MfsError::Status(MfsStatus::EEXIST));
            }
            Ok(r) => Some(r),
            Err(e) if e.is_status(MfsStatus::ENOENT) && (opts.create || opts.create_new) => None,
            Err(e) => return Err(e),
        };

        let (resolved, created) = match found {
            Some(r) => (r, false),
            None => {
                let (dir, name) = self.resolve_parent(path).await?;
                let entry = self
                    .inner
                    .master
                    .mknod(dir.inode, &name, FileType::File, opts.mode, 0)
                    .await?;
                self.invalidate(dir.inode, &name);
                let resolved = Resolved {
                    path: Self::child_path(&dir, &name),
                    parent: dir.inode,
                    name,
                    inode: entry.inode,
                    attr: entry.attr,
                };
                (resolved, true)
            }
        };
        if opts.write && resolved.attr.is_dir() {
            return Err(MfsError::InvalidArgument(format!(
                "{} is a directory",
                resolved.path
            )));
        }

        let mut flags = opts.flags();
        if created {
            flags |= AFTER_CREATE;
        }
        let attr = if resolved.attr.is_dir() {
            resolved.attr
        } else {
            self.inner
                .master
                .open_check(resolved.inode, flags)
                .await?
                .unwrap_or(resolved.attr)
        };

        let mut file = File::new(
            self.inner.clone(),
            resolved.path,
            resolved.parent,
            resolved.name,
            resolved.inode,
            attr,
        );
        if opts.truncate && opts.write && !created && attr.length > 0 {
            file.truncate(0).await?;
        }
        Ok(file)
    }

    pub async fn stat(&self, path: &str) -> Result<Entry> {
        Ok(self.resolve(path, true).await?.entry())
    }

    /// Like `stat` but does not follow a trailing symlink.
    pub async fn lstat(&self, path: &str) -> Result<Entry> {
        Ok(self.resolve(path, false).await?.entry())
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self.resolve(path, false).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_status(MfsStatus::ENOENT) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn mkdir(&self, path: &str, mode: u16) -> Result<Entry> {
        let (dir, name) = self.resolve_parent(path).await?;
        let entry = self.inner.master.mkdir(dir.inode, &name, mode).await?;
        self.invalidate(dir.inode, &name);
        Ok(entry)
    }

    /// Create `path` and any missing parents. Existing directories are fine.
    pub async fn mkdir_all(&self, path: &str, mode: u16) -> Result<()> {
        let mut cur = String::new();
        for part in split_components(&self.absolute(path)) {
            cur.push('/');
            cur.push_str(&part);
            match self.stat(&cur).await {
                Ok(e) if e.attr.is_dir() => continue,
                Ok(_) => return Err(MfsError::Status(MfsStatus::ENOTDIR)),
                Err(e) if e.is_status(MfsStatus::ENOENT) => match self.mkdir(&cur, mode).await {
                    Ok(_) => {}
                    Err(e) if e.is_status(MfsStatus::EEXIST) => {}
                    Err(e) => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Remove a file, symlink or empty directory.
    pub async fn remove(&self, path: &str) -> Result<()> {
        let r = self.resolve(path, false).await?;
        if r.is_root() {
            return Err(MfsError::Status(MfsStatus::EPERM));
        }
        if r.attr.is_dir() {
            self.inner.master.rmdir(r.parent, &r.name).await?;
        } else {
            self.inner.master.unlink(r.parent, &r.name).await?;
        }
        self.inner.cache.purge(r.parent, &r.name, r.inode);
        Ok(())
    }

    pub async fn rmdir(&self, path: &str) -> Result<()> {
        let (dir, name) = self.resolve_parent(path).await?;
        self.inner.master.rmdir(dir.inode, &name).await?;
        self.invalidate(dir.inode, &name);
        Ok(())
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (src_dir, src_name) = self.resolve_parent(from).await?;
        let (dst_dir, dst_name) = self.resolve_parent(to).await?;
        self.inner
            .master
            .rename(src_dir.inode, &src_name, dst_dir.inode, &dst_name)
            .await?;
        self.invalidate(src_dir.inode, &src_name);
        self.invalidate(dst_dir.inode, &dst_name);
        Ok(())
    }

    /// Create `link` pointing at `target`; the target is stored verbatim.
    pub async fn symlink(&self, target: &str, link: &str) -> Result<Entry> {
        let (dir, name) = self.resolve_parent(link).await?;
        let entry = self.inner.master.symlink(dir.inode, &name, target).await?;
        self.invalidate(dir.inode, &name);
        Ok(entry)
    }

    /// Hard link `new` to the inode at `existing`.
    pub async fn link(&self, existing: &str, new: &str) -> Result<Entry> {
        let src = self.resolve(existing, false).await?;
        let (dir, name) = self.resolve_parent(new).await?;
        let entry = self.inner.master.link(src.inode, dir.inode, &name).await?;
        self.invalidate(dir.inode, &name);
        self.invalidate(src.parent, &src.name);
        Ok(entry)
    }

    pub async fn readlink(&self, path: &str) -> Result<String> {
        let r = self.resolve(path, false).await?;
        if !r.attr.is_symlink() {
            return Err(MfsError::InvalidArgument(format!("{} is not a symlink", r.path)));
        }
        self.inner.master.readlink(r.inode).await
    }

    pub async fn truncate(&self, path: &str, size: u64) -> Result<Attr> {
        let r = self.resolve(path, true).await?;
        let attr = self.inner.master.truncate(r.inode, false, size).await?;
        self.invalidate(r.parent, &r.name);
        Ok(attr)
    }

    async fn setattr(&self, path: &str, set: SetAttr) -> Result<Attr> {
        let r = self.resolve(path, true).await?;
        let attr = self.inner.master.setattr(r.inode, set).await?;
        self.invalidate(r.parent, &r.name);
        Ok(attr)
    }

    pub async fn chmod(&self, path: &str, mode: u16) -> Result<Attr> {
        self.setattr(
            path,
            SetAttr {
                mode: Some(mode),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<Attr> {
        self.setattr(
            path,
            SetAttr {
                uid: Some(uid),
                gid: Some(gid),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_times(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<Attr> {
        self.setattr(
            path,
            SetAttr {
                atime: Some(unix_secs(atime)),
                mtime: Some(unix_secs(mtime)),
                ..Default::default()
            },
        )
        .await
    }

    /// Ask the master whether the caller may access `path` with `mask`
    /// (`MODE_MASK_R | MODE_MASK_W | MODE_MASK_X`).
    pub async fn access(&self, path: &str, mask: u8) -> Result<()> {
        let r = self.resolve(path, true).await?;
        self.inner.master.access(r.inode, mask).await
    }

    pub async fn read_dir(&self, path: &str) -> Result<Vec<DirEntryPlus>> {
        let r = self.resolve(path, true).await?;
        if !r.attr.is_dir() {
            return Err(MfsError::Status(MfsStatus::ENOTDIR));
        }
        let mut entries = self.inner.master.getdir_plus(r.inode).await?;
        entries.retain(|e| e.name != "." && e.name != "..");
        Ok(entries)
    }

    pub async fn read_dir_names(&self, path: &str) -> Result<Vec<String>> {
        let r = self.resolve(path, true).await?;
        if !r.attr.is_dir() {
            return Err(MfsError::Status(MfsStatus::ENOTDIR));
        }
        Ok(self
            .inner
            .master
            .getdir(r.inode)
            .await?
            .into_iter()
            .filter(|e| e.name != "." && e.name != "..")
            .map(|e| e.name)
            .collect())
    }

    pub fn getwd(&self) -> String {
        self.inner.cwd.lock().clone()
    }

    pub async fn chdir(&self, path: &str) -> Result<()> {
        let r = self.resolve(path, true).await?;
        if !r.attr.is_dir() {
            return Err(MfsError::Status(MfsStatus::ENOTDIR));
        }
        *self.inner.cwd.lock() = r.path;
        Ok(())
    }

    pub async fn statfs(&self) -> Result<StatFs> {
        self.inner.master.statfs().await
    }

    /// Forget cached attributes for `path` and everything below it. Only the
    /// parent directory is resolved, so an uncached path purges nothing.
    pub async fn purge_inode_cache(&self, path: &str) -> Result<usize> {
        let abs = self.absolute(path);
        let purged = if split_components(&abs).is_empty() {
            self.inner.cache.purge_children(MFS_ROOT_ID)
        } else {
            let (dir, name) = self.resolve_parent(&abs).await?;
            self.invalidate(dir.inode, &name)
        };
        debug!(path = %abs, purged, "purged inode cache");
        Ok(purged)
    }

    /// Close master sessions and idle chunk-server connections.
    pub async fn close(&self) {
        self.inner.master.close().await;
        self.inner.chunks.clear();
    }
}
