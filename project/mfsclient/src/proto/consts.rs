//! Protocol constants (MooseFS 1.6 family).

pub const ANTOAN_NOP: u32 = 0;

// client <-> master
pub const CUTOMA_FUSE_REGISTER: u32 = 400;
pub const MATOCU_FUSE_REGISTER: u32 = 401;
pub const CUTOMA_FUSE_STATFS: u32 = 402;
pub const CUTOMA_FUSE_ACCESS: u32 = 404;
pub const CUTOMA_FUSE_LOOKUP: u32 = 406;
pub const CUTOMA_FUSE_GETATTR: u32 = 408;
pub const CUTOMA_FUSE_SETATTR: u32 = 410;
pub const CUTOMA_FUSE_READLINK: u32 = 412;
pub const CUTOMA_FUSE_SYMLINK: u32 = 414;
pub const CUTOMA_FUSE_MKNOD: u32 = 416;
pub const CUTOMA_FUSE_MKDIR: u32 = 418;
pub const CUTOMA_FUSE_UNLINK: u32 = 420;
pub const CUTOMA_FUSE_RMDIR: u32 = 422;
pub const CUTOMA_FUSE_RENAME: u32 = 424;
pub const CUTOMA_FUSE_LINK: u32 = 426;
pub const CUTOMA_FUSE_GETDIR: u32 = 428;
pub const CUTOMA_FUSE_OPEN: u32 = 430;
pub const CUTOMA_FUSE_READ_CHUNK: u32 = 432;
pub const CUTOMA_FUSE_WRITE_CHUNK: u32 = 434;
pub const CUTOMA_FUSE_WRITE_CHUNK_END: u32 = 436;
pub const CUTOMA_FUSE_GETTRASH: u32 = 450;
pub const CUTOMA_FUSE_GETDETACHEDATTR: u32 = 452;
pub const CUTOMA_FUSE_GETTRASHPATH: u32 = 454;
pub const CUTOMA_FUSE_SETTRASHPATH: u32 = 456;
pub const CUTOMA_FUSE_UNDEL: u32 = 458;
pub const CUTOMA_FUSE_PURGE: u32 = 460;
pub const CUTOMA_FUSE_TRUNCATE: u32 = 464;
pub const CUTOMA_FUSE_GETRESERVED: u32 = 470;

// client <-> chunk server
pub const CUTOCS_READ: u32 = 200;
pub const CSTOCU_READ_STATUS: u32 = 201;
pub const CSTOCU_READ_DATA: u32 = 202;
pub const CUTOCS_WRITE: u32 = 210;
pub const CSTOCU_WRITE_STATUS: u32 = 211;
pub const CUTOCS_WRITE_DATA: u32 = 212;

/// Password blob expected by masters without ACL passwords.
pub const FUSE_REGISTER_BLOB_ACL: &[u8; 64] =
    b"DjI1GAQDULI5d2YjA26ypc3ovkhjvhciTQVx3CS4nYgtBoUcsljiVpsErJENHaw0";
pub const REGISTER_NEWSESSION: u8 = 2;
pub const REGISTER_RECONNECT: u8 = 3;

/// Client version advertised at registration: 1.6.27.
pub const PROTOCOL_VERSION: u32 = (1 << 16) | (6 << 8) | 27;

/// Register reply body lengths accepted across protocol revisions.
pub const REGISTER_REPLY_LENGTHS: [u32; 5] = [1, 13, 21, 25, 35];

/// Requests on one session are never pipelined, so the id is constant.
pub const REQUEST_ID: u32 = 1;

pub const MFS_ROOT_ID: u32 = 1;
pub const MFS_NAME_MAX: usize = 255;

pub const GETDIR_FLAG_WITHATTR: u8 = 1;

pub const WANT_READ: u8 = 1;
pub const WANT_WRITE: u8 = 2;
pub const AFTER_CREATE: u8 = 4;

pub const SET_MODE_FLAG: u8 = 1 << 2;
pub const SET_UID_FLAG: u8 = 1 << 3;
pub const SET_GID_FLAG: u8 = 1 << 4;
pub const SET_MTIME_FLAG: u8 = 1 << 5;
pub const SET_ATIME_FLAG: u8 = 1 << 6;

// access(2) style masks
pub const MODE_MASK_R: u8 = 4;
pub const MODE_MASK_W: u8 = 2;
pub const MODE_MASK_X: u8 = 1;

// st_mode type bits, fixed by POSIX rather than by the host's mode_t
pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;
