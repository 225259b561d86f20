//! Packed attribute record.
//!
//! Layout (35 bytes): `type:u8, mode:u16, uid, gid, atime, mtime, ctime,
//! nlink (u32 each), tail[8]`. The tail is a 64-bit length for regular files
//! and `rdev:u32` (plus padding) for block/char devices.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{MfsError, Result};
use crate::proto::codec::BodyReader;
use crate::proto::consts::*;

pub const ATTR_RECORD_LEN: usize = 35;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    File,
    Directory,
    Symlink,
    Fifo,
    Socket,
    BlockDevice,
    CharDevice,
}

impl FileType {
    pub fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            b'f' => FileType::File,
            b'd' => FileType::Directory,
            b'l' => FileType::Symlink,
            b'q' => FileType::Fifo,
            b's' => FileType::Socket,
            b'b' => FileType::BlockDevice,
            b'c' => FileType::CharDevice,
            other => {
                return Err(MfsError::Decode(format!(
                    "unknown entry type {other:#04x}"
                )));
            }
        })
    }

    pub fn as_byte(self) -> u8 {
        match self {
            FileType::File => b'f',
            FileType::Directory => b'd',
            FileType::Symlink => b'l',
            FileType::Fifo => b'q',
            FileType::Socket => b's',
            FileType::BlockDevice => b'b',
            FileType::CharDevice => b'c',
        }
    }

    /// `S_IFMT` bits for this type.
    pub fn mode_bits(self) -> u32 {
        match self {
            FileType::File => S_IFREG,
            FileType::Directory => S_IFDIR,
            FileType::Symlink => S_IFLNK,
            FileType::Fifo => S_IFIFO,
            FileType::Socket => S_IFSOCK,
            FileType::BlockDevice => S_IFBLK,
            FileType::CharDevice => S_IFCHR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub kind: FileType,
    /// Permission bits (07777).
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub nlink: u32,
    /// Byte length; always zero for anything but regular files.
    pub length: u64,
    pub rdev: u32,
}

impl Attr {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() != ATTR_RECORD_LEN {
            return Err(MfsError::BadLength {
                op: "attr",
                len: buf.len(),
            });
        }
        let mut r = BodyReader::new("attr", buf);
        let kind = FileType::from_byte(r.u8()?)?;
        let mode = r.u16()? & 0o7777;
        let uid = r.u32()?;
        let gid = r.u32()?;
        let atime = r.u32()?;
        let mtime = r.u32()?;
        let ctime = r.u32()?;
        let nlink = r.u32()?;
        let tail = r.bytes(8)?;
        let (length, rdev) = match kind {
            FileType::File => (u64::from_be_bytes(tail.try_into().unwrap_or([0; 8])), 0),
            FileType::BlockDevice | FileType::CharDevice => {
                (0, u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]))
            }
            _ => (0, 0),
        };
        Ok(Self {
            kind,
            mode,
            uid,
            gid,
            atime,
            mtime,
            ctime,
            nlink,
            length,
            rdev,
        })
    }

    pub fn encode(&self) -> [u8; ATTR_RECORD_LEN] {
        let mut out = [0u8; ATTR_RECORD_LEN];
        out[0] = self.kind.as_byte();
        out[1..3].copy_from_slice(&(self.mode & 0o7777).to_be_bytes());
        let words = [
            self.uid, self.gid, self.atime, self.mtime, self.ctime, self.nlink,
        ];
        for (i, w) in words.iter().enumerate() {
            out[3 + i * 4..7 + i * 4].copy_from_slice(&w.to_be_bytes());
        }
        match self.kind {
            FileType::File => out[27..35].copy_from_slice(&self.length.to_be_bytes()),
            FileType::BlockDevice | FileType::CharDevice => {
                out[27..31].copy_from_slice(&self.rdev.to_be_bytes())
            }
            _ => {}
        }
        out
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileType::File
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileType::Symlink
    }

    /// Full `st_mode`: type bits plus permissions.
    pub fn st_mode(&self) -> u32 {
        self.kind.mode_bits() | self.mode as u32
    }

    pub fn modified(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.mtime as u64)
    }

    pub fn accessed(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.atime as u64)
    }

    pub fn changed(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.ctime as u64)
    }
}
