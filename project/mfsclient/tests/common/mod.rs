//! In-process mock master and chunk servers on loopback listeners.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use mfsclient::ClientOptions;
use mfsclient::chuck::chunk::{CHUNK_SIZE, ChunkDescriptor, ChunkServerAddr};
use mfsclient::proto::attr::{Attr, FileType};
use mfsclient::proto::codec::{Arg, BodyReader, pack, read_frame};
use mfsclient::proto::consts::*;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

pub const FIRST_SESSION_ID: u32 = 0x5eed;

const ST_OK: u8 = 0;
const ST_ENOTDIR: u8 = 2;
const ST_ENOENT: u8 = 3;
const ST_EEXIST: u8 = 5;
const ST_EINVAL: u8 = 6;
const ST_ENOTEMPTY: u8 = 7;
const ST_BADSESSIONID: u8 = 35;

type ChunkStore = Arc<Mutex<HashMap<u64, Vec<u8>>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Register { reconnect: bool, session_id: u32 },
    Nop,
    Request { cmd: u32 },
    WriteChunk { inode: u32, index: u32 },
    WriteEnd { chunk_id: u64, inode: u32, length: u64 },
}

struct Node {
    attr: Attr,
    children: BTreeMap<String, u32>,
    target: String,
    chunks: HashMap<u32, (u64, u32)>,
}

impl Node {
    fn new(kind: FileType, mode: u16) -> Self {
        Self {
            attr: Attr {
                kind,
                mode,
                uid: 0,
                gid: 0,
                atime: 0,
                mtime: 0,
                ctime: 0,
                nlink: if kind == FileType::Directory { 2 } else { 1 },
                length: 0,
                rdev: 0,
            },
            children: BTreeMap::new(),
            target: String::new(),
            chunks: HashMap::new(),
        }
    }
}

pub struct MasterState {
    nodes: HashMap<u32, Node>,
    trash: BTreeMap<u32, (u32, String)>,
    next_inode: u32,
    next_chunk: u64,
    next_session: u32,
    pub events: Vec<Event>,
    /// Send a NOP frame in front of every reply.
    pub nop_before_reply: bool,
    /// Body length of a new-session register reply: 13, 21, 25 or 35.
    pub register_reply_len: usize,
    /// Answer every registration with this status byte.
    pub reject_register: Option<u8>,
    /// Send a reply with the wrong request id once.
    pub corrupt_next_reply: bool,
    /// Listed ahead of the mock chunk servers in every descriptor.
    pub leading_servers: Vec<ChunkServerAddr>,
}

fn entry_bytes(inode: u32, attr: &Attr) -> Vec<u8> {
    let mut out = inode.to_be_bytes().to_vec();
    out.extend_from_slice(&attr.encode());
    out
}

fn name_of(r: &mut BodyReader<'_>) -> String {
    let len = r.u8().unwrap() as usize;
    String::from_utf8(r.bytes(len).unwrap().to_vec()).unwrap()
}

enum Reply {
    Status(u8),
    Body(Vec<u8>),
}

impl MasterState {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(MFS_ROOT_ID, Node::new(FileType::Directory, 0o755));
        Self {
            nodes,
            trash: BTreeMap::new(),
            next_inode: 2,
            next_chunk: 1,
            next_session: FIRST_SESSION_ID,
            events: Vec::new(),
            nop_before_reply: false,
            register_reply_len: 13,
            reject_register: None,
            corrupt_next_reply: false,
            leading_servers: Vec::new(),
        }
    }

    fn register(&mut self, body: &[u8]) -> Vec<u8> {
        let mut r = BodyReader::new("register", body);
        let blob = r.bytes(64).unwrap();
        assert_eq!(blob, FUSE_REGISTER_BLOB_ACL);
        let kind = r.u8().unwrap();
        if let Some(status) = self.reject_register {
            return pack(MATOCU_FUSE_REGISTER, &[Arg::U8(status)]).to_vec();
        }
        if kind == REGISTER_RECONNECT {
            let session_id = r.u32().unwrap();
            assert_eq!(r.u32().unwrap(), PROTOCOL_VERSION);
            self.events.push(Event::Register {
                reconnect: true,
                session_id,
            });
            let status = if session_id >= FIRST_SESSION_ID && session_id < self.next_session {
                ST_OK
            } else {
                ST_BADSESSIONID
            };
            return pack(MATOCU_FUSE_REGISTER, &[Arg::U8(status)]).to_vec();
        }

        assert_eq!(kind, REGISTER_NEWSESSION);
        assert_eq!(r.u32().unwrap(), PROTOCOL_VERSION);
        let info_len = r.u32().unwrap() as usize;
        r.bytes(info_len).unwrap();
        let path_len = r.u32().unwrap() as usize;
        let path = r.bytes(path_len).unwrap();
        assert_eq!(path.last(), Some(&0));
        assert!(r.is_empty());

        let session_id = self.next_session;
        self.next_session += 1;
        self.events.push(Event::Register {
            reconnect: false,
            session_id,
        });
        let mut reply = vec![0u8; self.register_reply_len];
        let at = if self.register_reply_len < 25 { 0 } else { 4 };
        reply[at..at + 4].copy_from_slice(&session_id.to_be_bytes());
        pack(MATOCU_FUSE_REGISTER, &[Arg::Bytes(&reply)]).to_vec()
    }

    fn alloc(&mut self, parent: u32, name: &str, node: Node) -> Result<(u32, Attr), u8> {
        let dir = self.nodes.get(&parent).ok_or(ST_ENOENT)?;
        if dir.attr.kind != FileType::Directory {
            return Err(ST_ENOTDIR);
        }
        if dir.children.contains_key(name) {
            return Err(ST_EEXIST);
        }
        let inode = self.next_inode;
        self.next_inode += 1;
        let attr = node.attr;
        self.nodes.insert(inode, node);
        if let Some(dir) = self.nodes.get_mut(&parent) {
            dir.children.insert(name.to_string(), inode);
        }
        Ok((inode, attr))
    }

    fn child(&self, parent: u32, name: &str) -> Result<u32, u8> {
        let dir = self.nodes.get(&parent).ok_or(ST_ENOENT)?;
        if dir.attr.kind != FileType::Directory {
            return Err(ST_ENOTDIR);
        }
        dir.children.get(name).copied().ok_or(ST_ENOENT)
    }

    fn attr(&self, inode: u32) -> Result<Attr, u8> {
        self.nodes.get(&inode).map(|n| n.attr).ok_or(ST_ENOENT)
    }

    fn descriptor(&self, inode: u32, index: u32, servers: &[ChunkServerAddr]) -> Result<Vec<u8>, u8> {
        let node = self.nodes.get(&inode).ok_or(ST_ENOENT)?;
        let (chunk_id, version) = node.chunks.get(&index).copied().unwrap_or((0, 0));
        let desc = ChunkDescriptor {
            chunk_id,
            version,
            length: node.attr.length,
            servers: if chunk_id == 0 {
                Vec::new()
            } else {
                self.leading_servers.iter().chain(servers).copied().collect()
            },
        };
        Ok(desc.encode())
    }

    fn truncate_data(&mut self, inode: u32, length: u64, store: &ChunkStore) {
        let Some(node) = self.nodes.get_mut(&inode) else {
            return;
        };
        node.attr.length = length;
        let mut store = store.lock();
        node.chunks.retain(|&index, &mut (chunk_id, _)| {
            let start = index as u64 * CHUNK_SIZE;
            if start >= length {
                store.remove(&chunk_id);
                false
            } else {
                if let Some(data) = store.get_mut(&chunk_id) {
                    data.truncate((length - start).min(CHUNK_SIZE) as usize);
                }
                true
            }
        });
    }

    fn handle(
        &mut self,
        cmd: u32,
        args: &[u8],
        store: &ChunkStore,
        servers: &[ChunkServerAddr],
    ) -> std::result::Result<Reply, u8> {
        let mut r = BodyReader::new("mock", args);
        let reply = match cmd {
            CUTOMA_FUSE_STATFS => {
                let mut out = Vec::new();
                out.extend_from_slice(&(1u64 << 40).to_be_bytes());
                out.extend_from_slice(&(1u64 << 39).to_be_bytes());
                out.extend_from_slice(&0u64.to_be_bytes());
                out.extend_from_slice(&0u64.to_be_bytes());
                out.extend_from_slice(&(self.nodes.len() as u32).to_be_bytes());
                Reply::Body(out)
            }
            CUTOMA_FUSE_ACCESS => {
                self.attr(r.u32().unwrap())?;
                Reply::Status(ST_OK)
            }
            CUTOMA_FUSE_LOOKUP => {
                let parent = r.u32().unwrap();
                let name = name_of(&mut r);
                let inode = self.child(parent, &name)?;
                Reply::Body(entry_bytes(inode, &self.attr(inode)?))
            }
            CUTOMA_FUSE_GETATTR | CUTOMA_FUSE_GETDETACHEDATTR => {
                Reply::Body(self.attr(r.u32().unwrap())?.encode().to_vec())
            }
            CUTOMA_FUSE_SETATTR => {
                let inode = r.u32().unwrap();
                r.u32().unwrap();
                r.u32().unwrap();
                let mask = r.u8().unwrap();
                let mode = r.u16().unwrap();
                let uid = r.u32().unwrap();
                let gid = r.u32().unwrap();
                let atime = r.u32().unwrap();
                let mtime = r.u32().unwrap();
                let node = self.nodes.get_mut(&inode).ok_or(ST_ENOENT)?;
                if mask & SET_MODE_FLAG != 0 {
                    node.attr.mode = mode;
                }
                if mask & SET_UID_FLAG != 0 {
                    node.attr.uid = uid;
                }
                if mask & SET_GID_FLAG != 0 {
                    node.attr.gid = gid;
                }
                if mask & SET_ATIME_FLAG != 0 {
                    node.attr.atime = atime;
                }
                if mask & SET_MTIME_FLAG != 0 {
                    node.attr.mtime = mtime;
                }
                Reply::Body(node.attr.encode().to_vec())
            }
            CUTOMA_FUSE_READLINK => {
                let node = self.nodes.get(&r.u32().unwrap()).ok_or(ST_ENOENT)?;
                if node.attr.kind != FileType::Symlink {
                    return Err(ST_EINVAL);
                }
                let mut out = (node.target.len() as u32 + 1).to_be_bytes().to_vec();
                out.extend_from_slice(node.target.as_bytes());
                out.push(0);
                Reply::Body(out)
            }
            CUTOMA_FUSE_SYMLINK => {
                let parent = r.u32().unwrap();
                let name = name_of(&mut r);
                let len = r.u32().unwrap() as usize;
                let raw = r.bytes(len).unwrap();
                let mut node = Node::new(FileType::Symlink, 0o777);
                node.target = String::from_utf8(raw[..len - 1].to_vec()).unwrap();
                let (inode, attr) = self.alloc(parent, &name, node)?;
                Reply::Body(entry_bytes(inode, &attr))
            }
            CUTOMA_FUSE_MKNOD => {
                let parent = r.u32().unwrap();
                let name = name_of(&mut r);
                let kind = FileType::from_byte(r.u8().unwrap()).map_err(|_| ST_EINVAL)?;
                let mode = r.u16().unwrap();
                let (inode, attr) = self.alloc(parent, &name, Node::new(kind, mode))?;
                Reply::Body(entry_bytes(inode, &attr))
            }
            CUTOMA_FUSE_MKDIR => {
                let parent = r.u32().unwrap();
                let name = name_of(&mut r);
                let mode = r.u16().unwrap();
                let node = Node::new(FileType::Directory, mode);
                let (inode, attr) = self.alloc(parent, &name, node)?;
                Reply::Body(entry_bytes(inode, &attr))
            }
            CUTOMA_FUSE_UNLINK | CUTOMA_FUSE_RMDIR => {
                let parent = r.u32().unwrap();
                let name = name_of(&mut r);
                let inode = self.child(parent, &name)?;
                let node = self.nodes.get(&inode).ok_or(ST_ENOENT)?;
                if cmd == CUTOMA_FUSE_RMDIR {
                    if node.attr.kind != FileType::Directory {
                        return Err(ST_ENOTDIR);
                    }
                    if !node.children.is_empty() {
                        return Err(ST_ENOTEMPTY);
                    }
                } else if node.attr.kind == FileType::Directory {
                    return Err(1);
                }
                if let Some(dir) = self.nodes.get_mut(&parent) {
                    dir.children.remove(&name);
                }
                if cmd == CUTOMA_FUSE_UNLINK && self.nodes[&inode].attr.kind == FileType::File {
                    self.trash.insert(inode, (parent, name));
                } else {
                    self.nodes.remove(&inode);
                }
                Reply::Status(ST_OK)
            }
            CUTOMA_FUSE_RENAME => {
                let src_parent = r.u32().unwrap();
                let src_name = name_of(&mut r);
                let dst_parent = r.u32().unwrap();
                let dst_name = name_of(&mut r);
                let inode = self.child(src_parent, &src_name)?;
                self.attr(dst_parent)?;
                if let Some(dir) = self.nodes.get_mut(&src_parent) {
                    dir.children.remove(&src_name);
                }
                if let Some(dir) = self.nodes.get_mut(&dst_parent) {
                    dir.children.insert(dst_name, inode);
                }
                Reply::Status(ST_OK)
            }
            CUTOMA_FUSE_LINK => {
                let inode = r.u32().unwrap();
                let parent = r.u32().unwrap();
                let name = name_of(&mut r);
                self.attr(inode)?;
                if self.child(parent, &name).is_ok() {
                    return Err(ST_EEXIST);
                }
                if let Some(dir) = self.nodes.get_mut(&parent) {
                    dir.children.insert(name, inode);
                }
                let node = self.nodes.get_mut(&inode).ok_or(ST_ENOENT)?;
                node.attr.nlink += 1;
                Reply::Body(entry_bytes(inode, &node.attr))
            }
            CUTOMA_FUSE_GETDIR => {
                let inode = r.u32().unwrap();
                r.u32().unwrap();
                r.u32().unwrap();
                let with_attr = !r.is_empty() && r.u8().unwrap() & GETDIR_FLAG_WITHATTR != 0;
                let dir = self.nodes.get(&inode).ok_or(ST_ENOENT)?;
                if dir.attr.kind != FileType::Directory {
                    return Err(ST_ENOTDIR);
                }
                let mut listing: Vec<(String, u32)> = vec![(".".into(), inode), ("..".into(), inode)];
                listing.extend(dir.children.iter().map(|(n, i)| (n.clone(), *i)));
                let mut out = Vec::new();
                for (name, child) in listing {
                    let attr = self.nodes[&child].attr;
                    out.push(name.len() as u8);
                    out.extend_from_slice(name.as_bytes());
                    out.extend_from_slice(&child.to_be_bytes());
                    if with_attr {
                        out.extend_from_slice(&attr.encode());
                    } else {
                        out.push(attr.kind.as_byte());
                    }
                }
                Reply::Body(out)
            }
            CUTOMA_FUSE_OPEN => {
                self.attr(r.u32().unwrap())?;
                Reply::Status(ST_OK)
            }
            CUTOMA_FUSE_READ_CHUNK => {
                let inode = r.u32().unwrap();
                let index = r.u32().unwrap();
                Reply::Body(self.descriptor(inode, index, servers)?)
            }
            CUTOMA_FUSE_WRITE_CHUNK => {
                let inode = r.u32().unwrap();
                let index = r.u32().unwrap();
                let next_chunk = self.next_chunk;
                let node = self.nodes.get_mut(&inode).ok_or(ST_ENOENT)?;
                let slot = node.chunks.entry(index).or_insert((next_chunk, 0));
                if slot.0 == next_chunk {
                    self.next_chunk += 1;
                }
                slot.1 += 1;
                self.events.push(Event::WriteChunk { inode, index });
                Reply::Body(self.descriptor(inode, index, servers)?)
            }
            CUTOMA_FUSE_WRITE_CHUNK_END => {
                let chunk_id = r.u64().unwrap();
                let inode = r.u32().unwrap();
                let length = r.u64().unwrap();
                let node = self.nodes.get_mut(&inode).ok_or(ST_ENOENT)?;
                node.attr.length = node.attr.length.max(length);
                self.events.push(Event::WriteEnd {
                    chunk_id,
                    inode,
                    length,
                });
                Reply::Status(ST_OK)
            }
            CUTOMA_FUSE_TRUNCATE => {
                let inode = r.u32().unwrap();
                r.u8().unwrap();
                r.u32().unwrap();
                r.u32().unwrap();
                let length = r.u64().unwrap();
                self.attr(inode)?;
                self.truncate_data(inode, length, store);
                Reply::Body(self.attr(inode)?.encode().to_vec())
            }
            CUTOMA_FUSE_GETTRASH => {
                let mut out = Vec::new();
                for (inode, (_, name)) in &self.trash {
                    let label = format!("{inode:08X}|{name}");
                    out.push(label.len() as u8);
                    out.extend_from_slice(label.as_bytes());
                    out.extend_from_slice(&inode.to_be_bytes());
                }
                Reply::Body(out)
            }
            CUTOMA_FUSE_GETRESERVED => Reply::Body(Vec::new()),
            CUTOMA_FUSE_GETTRASHPATH => {
                let inode = r.u32().unwrap();
                let (_, name) = self.trash.get(&inode).ok_or(ST_ENOENT)?;
                let mut out = (name.len() as u32).to_be_bytes().to_vec();
                out.extend_from_slice(name.as_bytes());
                Reply::Body(out)
            }
            CUTOMA_FUSE_SETTRASHPATH => {
                let inode = r.u32().unwrap();
                let len = r.u32().unwrap() as usize;
                let raw = r.bytes(len).unwrap();
                let path = String::from_utf8(raw[..len - 1].to_vec()).unwrap();
                let entry = self.trash.get_mut(&inode).ok_or(ST_ENOENT)?;
                entry.1 = path.trim_start_matches('/').to_string();
                Reply::Status(ST_OK)
            }
            CUTOMA_FUSE_UNDEL => {
                let inode = r.u32().unwrap();
                let (parent, name) = self.trash.remove(&inode).ok_or(ST_ENOENT)?;
                if let Some(dir) = self.nodes.get_mut(&parent) {
                    dir.children.insert(name, inode);
                }
                Reply::Status(ST_OK)
            }
            CUTOMA_FUSE_PURGE => {
                let inode = r.u32().unwrap();
                self.trash.remove(&inode).ok_or(ST_ENOENT)?;
                self.truncate_data(inode, 0, store);
                self.nodes.remove(&inode);
                Reply::Status(ST_OK)
            }
            other => panic!("mock master: unexpected command {other}"),
        };
        Ok(reply)
    }

    fn respond(&mut self, cmd: u32, body: &[u8], store: &ChunkStore, servers: &[ChunkServerAddr]) -> Option<Vec<u8>> {
        if cmd == ANTOAN_NOP {
            self.events.push(Event::Nop);
            return None;
        }
        if cmd == CUTOMA_FUSE_REGISTER {
            return Some(self.register(body));
        }
        self.events.push(Event::Request { cmd });
        let mut r = BodyReader::new("mock", body);
        let mut id = r.u32().unwrap();
        let payload = match self.handle(cmd, r.rest(), store, servers) {
            Ok(Reply::Body(b)) => b,
            Ok(Reply::Status(s)) | Err(s) => vec![s],
        };
        if self.corrupt_next_reply {
            self.corrupt_next_reply = false;
            id += 1;
        }
        let mut out = Vec::new();
        if self.nop_before_reply {
            out.extend_from_slice(&pack(ANTOAN_NOP, &[Arg::U32(0)]));
        }
        out.extend_from_slice(&pack(cmd + 1, &[Arg::U32(id), Arg::Bytes(&payload)]));
        Some(out)
    }
}

async fn serve_master(
    mut stream: TcpStream,
    state: Arc<Mutex<MasterState>>,
    store: ChunkStore,
    servers: Vec<ChunkServerAddr>,
) {
    while let Ok((header, body)) = read_frame(&mut stream).await {
        let out = state.lock().respond(header.cmd, &body, &store, &servers);
        if let Some(out) = out {
            if stream.write_all(&out).await.is_err() {
                return;
            }
        }
    }
}

pub struct MockChunkServer {
    pub addr: SocketAddr,
    /// Flip a payload byte after computing the CRC.
    pub corrupt: Arc<AtomicBool>,
    /// Put an all-zero 8-byte header in front of write acknowledgements.
    pub anon_prefix: Arc<AtomicBool>,
    pub reads: Arc<AtomicUsize>,
    pub write_sessions: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockChunkServer {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_sessions(&self) -> usize {
        self.write_sessions.load(Ordering::SeqCst)
    }

    async fn start(store: ChunkStore) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let corrupt = Arc::new(AtomicBool::new(false));
        let anon_prefix = Arc::new(AtomicBool::new(false));
        let reads = Arc::new(AtomicUsize::new(0));
        let write_sessions = Arc::new(AtomicUsize::new(0));
        let (c, a, rd, w) = (
            corrupt.clone(),
            anon_prefix.clone(),
            reads.clone(),
            write_sessions.clone(),
        );
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_chunk(
                    stream,
                    store.clone(),
                    c.clone(),
                    a.clone(),
                    rd.clone(),
                    w.clone(),
                ));
            }
        });
        Self {
            addr,
            corrupt,
            anon_prefix,
            reads,
            write_sessions,
            handle,
        }
    }
}

impl Drop for MockChunkServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_chunk(
    mut stream: TcpStream,
    store: ChunkStore,
    corrupt: Arc<AtomicBool>,
    anon_prefix: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
    write_sessions: Arc<AtomicUsize>,
) {
    while let Ok((header, body)) = read_frame(&mut stream).await {
        let mut r = BodyReader::new("chunkserver", &body);
        let out = match header.cmd {
            CUTOCS_READ => {
                reads.fetch_add(1, Ordering::SeqCst);
                let chunk_id = r.u64().unwrap();
                let _version = r.u32().unwrap();
                let offset = r.u32().unwrap() as usize;
                let size = r.u32().unwrap() as usize;
                let mut data = vec![0u8; size];
                if let Some(chunk) = store.lock().get(&chunk_id) {
                    if offset < chunk.len() {
                        let n = (chunk.len() - offset).min(size);
                        data[..n].copy_from_slice(&chunk[offset..offset + n]);
                    }
                }
                let mut out = Vec::new();
                let mut pos = 0usize;
                while pos < size {
                    let off = offset + pos;
                    let block_off = off & 0xFFFF;
                    let n = (0x10000 - block_off).min(size - pos);
                    let mut payload = data[pos..pos + n].to_vec();
                    let crc = crc32fast::hash(&payload);
                    if corrupt.load(Ordering::SeqCst) {
                        payload[0] ^= 0xFF;
                    }
                    out.extend_from_slice(&pack(
                        CSTOCU_READ_DATA,
                        &[
                            Arg::U64(chunk_id),
                            Arg::U16((off >> 16) as u16),
                            Arg::U16(block_off as u16),
                            Arg::U32(n as u32),
                            Arg::U32(crc),
                            Arg::Bytes(&payload),
                        ],
                    ));
                    pos += n;
                }
                out.extend_from_slice(&pack(CSTOCU_READ_STATUS, &[Arg::U64(chunk_id), Arg::U8(0)]));
                out
            }
            CUTOCS_WRITE => {
                write_sessions.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            CUTOCS_WRITE_DATA => {
                let chunk_id = r.u64().unwrap();
                let write_id = r.u32().unwrap();
                let block_no = r.u16().unwrap() as usize;
                let block_off = r.u16().unwrap() as usize;
                let size = r.u32().unwrap() as usize;
                let crc = r.u32().unwrap();
                let data = r.bytes(size).unwrap();
                let status = if crc32fast::hash(data) == crc {
                    let pos = block_no * 0x10000 + block_off;
                    let mut store = store.lock();
                    let chunk = store.entry(chunk_id).or_default();
                    if chunk.len() < pos + size {
                        chunk.resize(pos + size, 0);
                    }
                    chunk[pos..pos + size].copy_from_slice(data);
                    0
                } else {
                    29
                };
                let mut out = Vec::new();
                if anon_prefix.load(Ordering::SeqCst) {
                    out.extend_from_slice(&[0u8; 8]);
                }
                out.extend_from_slice(&pack(
                    CSTOCU_WRITE_STATUS,
                    &[Arg::U64(chunk_id), Arg::U32(write_id), Arg::U8(status)],
                ));
                out
            }
            _ => return,
        };
        if stream.write_all(&out).await.is_err() {
            return;
        }
    }
}

pub struct MockCluster {
    pub master: SocketAddr,
    pub state: Arc<Mutex<MasterState>>,
    pub chunkservers: Vec<MockChunkServer>,
    store: ChunkStore,
    conns: Arc<Mutex<Vec<JoinHandle<()>>>>,
    accept: JoinHandle<()>,
}

impl MockCluster {
    pub async fn start(n_chunkservers: usize) -> Self {
        let store: ChunkStore = Arc::new(Mutex::new(HashMap::new()));
        let mut chunkservers = Vec::new();
        for _ in 0..n_chunkservers {
            chunkservers.push(MockChunkServer::start(store.clone()).await);
        }
        let servers: Vec<ChunkServerAddr> = chunkservers
            .iter()
            .map(|cs| match cs.addr {
                SocketAddr::V4(v4) => ChunkServerAddr::from(v4),
                SocketAddr::V6(_) => unreachable!("mock binds IPv4"),
            })
            .collect();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let master = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(MasterState::new()));
        let conns: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));
        let (st, sto, cs) = (state.clone(), store.clone(), conns.clone());
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let task = tokio::spawn(serve_master(stream, st.clone(), sto.clone(), servers.clone()));
                cs.lock().push(task);
            }
        });
        Self {
            master,
            state,
            chunkservers,
            store,
            conns,
            accept,
        }
    }

    /// Options for a client of this cluster: one master session, no cache.
    pub fn options(&self) -> ClientOptions {
        ClientOptions::new(self.master.to_string()).master_conns(1)
    }

    /// Close every master connection from the server side.
    pub async fn drop_master_connections(&self) {
        let tasks: Vec<JoinHandle<()>> = self.conns.lock().drain(..).collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.state.lock().events.iter().filter(|e| pred(e)).count()
    }

    pub fn requests(&self, cmd: u32) -> usize {
        self.count(|e| *e == Event::Request { cmd })
    }

    pub fn write_ends(&self) -> Vec<u64> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::WriteEnd { length, .. } => Some(*length),
                _ => None,
            })
            .collect()
    }

    pub fn write_chunks(&self) -> Vec<u32> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::WriteChunk { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    pub fn stored_chunks(&self) -> usize {
        self.store.lock().len()
    }
}

impl Drop for MockCluster {
    fn drop(&mut self) {
        self.accept.abort();
        for task in self.conns.lock().drain(..) {
            task.abort();
        }
    }
}

/// A loopback address with nothing listening on it.
pub async fn dead_addr() -> SocketAddrV4 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    match listener.local_addr().unwrap() {
        SocketAddr::V4(v4) => v4,
        SocketAddr::V6(_) => unreachable!(),
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mfsclient=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
