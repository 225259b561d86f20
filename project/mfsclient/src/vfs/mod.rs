//! VFS layer
//!
//! Responsibilities:
//! - Resolve paths through the inode cache, following symlinks.
//! - Provide POSIX-like namespace calls on top of the master operation set.
//! - Manage open file handles with read-ahead and buffered writes.
//!
//! Submodules:
//! - `cache`: (parent, name) attribute cache with subtree purge
//! - `file`: open file handles
//! - `client`: path-level client facade
pub mod cache;
pub mod client;
pub mod file;

pub use cache::InodeCache;
pub use client::{Client, OpenOptions};
pub use file::File;
