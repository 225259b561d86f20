//! Frame codec: `cmd:u32, len:u32, body`, big-endian throughout.
//!
//! There is no resynchronization: a frame that fails to parse leaves the
//! stream in an unknown state and the connection has to be dropped.

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{MfsError, Result};

pub const HEADER_LEN: usize = 8;

/// Upper bound for a single frame body; larger lengths mean a corrupt stream.
pub const MAX_BODY_LEN: u32 = 1 << 28;

/// One typed field of a request body.
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I64(i64),
    Bytes(&'a [u8]),
}

impl Arg<'_> {
    pub fn byte_len(&self) -> usize {
        match self {
            Arg::U8(_) => 1,
            Arg::U16(_) => 2,
            Arg::U32(_) => 4,
            Arg::U64(_) | Arg::I64(_) => 8,
            Arg::Bytes(b) => b.len(),
        }
    }

    fn put(&self, buf: &mut BytesMut) {
        match *self {
            Arg::U8(v) => buf.put_u8(v),
            Arg::U16(v) => buf.put_u16(v),
            Arg::U32(v) => buf.put_u32(v),
            Arg::U64(v) => buf.put_u64(v),
            Arg::I64(v) => buf.put_i64(v),
            Arg::Bytes(b) => buf.put_slice(b),
        }
    }
}

/// Encode a full frame. The body length is the sum of the argument sizes.
pub fn pack(cmd: u32, args: &[Arg<'_>]) -> Bytes {
    let body_len: usize = args.iter().map(Arg::byte_len).sum();
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
    buf.put_u32(cmd);
    buf.put_u32(body_len as u32);
    for arg in args {
        arg.put(&mut buf);
    }
    buf.freeze()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub cmd: u32,
    pub len: u32,
}

impl FrameHeader {
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        Self {
            cmd: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            len: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&self.cmd.to_be_bytes());
        out[4..].copy_from_slice(&self.len.to_be_bytes());
        out
    }
}

pub async fn read_header<R: AsyncRead + Unpin>(r: &mut R) -> Result<FrameHeader> {
    let mut buf = [0u8; HEADER_LEN];
    r.read_exact(&mut buf).await?;
    Ok(FrameHeader::decode(&buf))
}

/// Read exactly one frame. A short read is surfaced as `UnexpectedEof`.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<(FrameHeader, Vec<u8>)> {
    let header = read_header(r).await?;
    if header.len > MAX_BODY_LEN {
        return Err(MfsError::Protocol(format!(
            "frame body too large: cmd {} len {}",
            header.cmd, header.len
        )));
    }
    let mut body = vec![0u8; header.len as usize];
    r.read_exact(&mut body).await?;
    Ok((header, body))
}

/// Run a socket operation under an optional deadline.
pub async fn with_deadline<T, F>(deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match deadline {
        Some(d) => match tokio::time::timeout(d, fut).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(MfsError::TimedOut),
        },
        None => Ok(fut.await?),
    }
}

/// Checked big-endian cursor over a reply body.
pub struct BodyReader<'a> {
    op: &'static str,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    pub fn new(op: &'static str, buf: &'a [u8]) -> Self {
        Self { op, buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(MfsError::Decode(format!(
                "{}: need {} bytes at offset {}, have {}",
                self.op,
                n,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }
}
