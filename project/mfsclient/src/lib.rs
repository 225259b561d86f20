//! mfsclient: an async client for MooseFS-style distributed filesystems.
//!
//! Layers, leaves first:
//! - `proto`: frame codec, protocol constants and the packed attribute record
//! - `meta`: master sessions (register/reconnect/keepalive), the round-robin
//!   session pool and the typed master operation set
//! - `cadapter`: pooled chunk-server connections and the block read/write protocol
//! - `chuck`: chunk/block layout arithmetic and the chunk read/write drivers
//! - `vfs`: the inode cache, open files and the path-level `Client`

pub mod cadapter;
pub mod chuck;
pub mod config;
pub mod error;
pub mod meta;
pub mod proto;
pub mod vfs;

pub use config::{ClientOptions, ConfigError};
pub use error::{MfsError, MfsStatus, Result};
pub use meta::ops::{DirEntry, DirEntryPlus, Entry, MasterClient, NamedInode, SetAttr, StatFs};
pub use proto::attr::{Attr, FileType};
pub use vfs::client::{Client, OpenOptions};
pub use vfs::file::File;
