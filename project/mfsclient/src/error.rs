//! Error taxonomy shared by every layer of the client.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, MfsError>;

/// Single-byte status code returned by the master or a chunk server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MfsStatus(pub u8);

impl MfsStatus {
    pub const OK: Self = Self(0);
    pub const EPERM: Self = Self(1);
    pub const ENOTDIR: Self = Self(2);
    pub const ENOENT: Self = Self(3);
    pub const EACCES: Self = Self(4);
    pub const EEXIST: Self = Self(5);
    pub const EINVAL: Self = Self(6);
    pub const ENOTEMPTY: Self = Self(7);
    pub const CHUNKLOST: Self = Self(8);
    pub const OUTOFMEMORY: Self = Self(9);
    pub const INDEXTOOBIG: Self = Self(10);
    pub const LOCKED: Self = Self(11);
    pub const NOCHUNKSERVERS: Self = Self(12);
    pub const NOCHUNK: Self = Self(13);
    pub const CHUNKBUSY: Self = Self(14);
    pub const REGISTER: Self = Self(15);
    pub const NOTDONE: Self = Self(16);
    pub const NOTOPENED: Self = Self(17);
    pub const NOTSTARTED: Self = Self(18);
    pub const WRONGVERSION: Self = Self(19);
    pub const CHUNKEXIST: Self = Self(20);
    pub const NOSPACE: Self = Self(21);
    pub const IO: Self = Self(22);
    pub const BNUMTOOBIG: Self = Self(23);
    pub const WRONGSIZE: Self = Self(24);
    pub const WRONGOFFSET: Self = Self(25);
    pub const CANTCONNECT: Self = Self(26);
    pub const WRONGCHUNKID: Self = Self(27);
    pub const DISCONNECTED: Self = Self(28);
    pub const CRC: Self = Self(29);
    pub const DELAYED: Self = Self(30);
    pub const CANTCREATEPATH: Self = Self(31);
    pub const MISMATCH: Self = Self(32);
    pub const EROFS: Self = Self(33);
    pub const QUOTA: Self = Self(34);
    pub const BADSESSIONID: Self = Self(35);
    pub const NOPASSWORD: Self = Self(36);
    pub const BADPASSWORD: Self = Self(37);

    pub fn code(self) -> u8 {
        self.0
    }

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    pub fn message(self) -> &'static str {
        match self.0 {
            0 => "OK",
            1 => "Operation not permitted",
            2 => "Not a directory",
            3 => "No such file or directory",
            4 => "Permission denied",
            5 => "File exists",
            6 => "Invalid argument",
            7 => "Directory not empty",
            8 => "Chunk lost",
            9 => "Out of memory",
            10 => "Index too big",
            11 => "Chunk locked",
            12 => "No chunk servers",
            13 => "No such chunk",
            14 => "Chunk is busy",
            15 => "Incorrect register BLOB",
            16 => "None of chunk servers performed requested operation",
            17 => "File not opened",
            18 => "Write not started",
            19 => "Wrong chunk version",
            20 => "Chunk already exists",
            21 => "No space left",
            22 => "IO error",
            23 => "Incorrect block number",
            24 => "Incorrect size",
            25 => "Incorrect offset",
            26 => "Can't connect",
            27 => "Incorrect chunk id",
            28 => "Disconnected",
            29 => "CRC error",
            30 => "Operation delayed",
            31 => "Can't create path",
            32 => "Data mismatch",
            33 => "Read-only file system",
            34 => "Quota exceeded",
            35 => "Bad session id",
            36 => "Password is needed",
            37 => "Incorrect password",
            _ => "Unknown MFS error",
        }
    }

    /// Closest POSIX errno for this status.
    pub fn errno(self) -> i32 {
        match self {
            Self::OK => 0,
            Self::EPERM => libc::EPERM,
            Self::ENOTDIR => libc::ENOTDIR,
            Self::ENOENT => libc::ENOENT,
            Self::EACCES | Self::NOPASSWORD | Self::BADPASSWORD => libc::EACCES,
            Self::EEXIST => libc::EEXIST,
            Self::EINVAL | Self::INDEXTOOBIG => libc::EINVAL,
            Self::ENOTEMPTY => libc::ENOTEMPTY,
            Self::CHUNKLOST => libc::ENXIO,
            Self::OUTOFMEMORY => libc::ENOMEM,
            Self::LOCKED | Self::CHUNKBUSY | Self::DELAYED => libc::EAGAIN,
            Self::NOSPACE | Self::NOCHUNKSERVERS => libc::ENOSPC,
            Self::EROFS => libc::EROFS,
            Self::QUOTA => libc::EDQUOT,
            _ => libc::EIO,
        }
    }
}

impl fmt::Display for MfsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status {})", self.message(), self.0)
    }
}

#[derive(Debug, Error)]
pub enum MfsError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("operation timed out")]
    TimedOut,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("register failed: {0}")]
    Register(String),

    #[error("crc mismatch in chunk {chunk_id:#018x} block {block}")]
    Checksum { chunk_id: u64, block: u16 },

    #[error("{0}")]
    Status(MfsStatus),

    #[error("unexpected reply length {len} for {op}")]
    BadLength { op: &'static str, len: usize },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("no chunk server available for chunk {chunk_id:#018x}")]
    NoChunkServer { chunk_id: u64 },

    #[error("too many levels of symbolic links: {0}")]
    SymlinkLoop(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{source} (after {transferred} bytes)")]
    Partial {
        transferred: usize,
        #[source]
        source: Box<MfsError>,
    },
}

impl MfsError {
    /// Attach the number of bytes already moved to an error. Nested partial
    /// counts are summed so callers always see the total.
    pub fn partial(transferred: usize, err: MfsError) -> MfsError {
        match err {
            MfsError::Partial {
                transferred: inner,
                source,
            } => MfsError::partial(transferred + inner, *source),
            err if transferred == 0 => err,
            err => MfsError::Partial {
                transferred,
                source: Box::new(err),
            },
        }
    }

    pub fn status(&self) -> Option<MfsStatus> {
        match self {
            MfsError::Status(s) => Some(*s),
            MfsError::Partial { source, .. } => source.status(),
            _ => None,
        }
    }

    pub fn is_status(&self, status: MfsStatus) -> bool {
        self.status() == Some(status)
    }

    pub fn transferred(&self) -> usize {
        match self {
            MfsError::Partial { transferred, .. } => *transferred,
            _ => 0,
        }
    }

    /// Socket-level failures and malformed frames, i.e. errors after which the
    /// connection must not be reused.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MfsError::Io(_)
                | MfsError::TimedOut
                | MfsError::Protocol(_)
                | MfsError::Checksum { .. }
        )
    }
}

impl From<MfsStatus> for MfsError {
    fn from(s: MfsStatus) -> Self {
        MfsError::Status(s)
    }
}

impl From<MfsError> for io::Error {
    fn from(e: MfsError) -> Self {
        match e {
            MfsError::Io(e) => e,
            MfsError::Status(s) => io::Error::from_raw_os_error(s.errno()),
            MfsError::TimedOut => io::Error::new(io::ErrorKind::TimedOut, "operation timed out"),
            MfsError::SymlinkLoop(_) => io::Error::from_raw_os_error(libc::ELOOP),
            MfsError::InvalidArgument(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            other => io::Error::other(other),
        }
    }
}
