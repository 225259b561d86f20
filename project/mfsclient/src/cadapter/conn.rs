//! One TCP connection to a chunk server and the block transfer protocol.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use crate::error::{MfsError, MfsStatus, Result};
use crate::proto::codec::{Arg, BodyReader, FrameHeader, HEADER_LEN, pack, with_deadline};
use crate::proto::consts::*;

/// Fixed part of a READ_DATA body before the payload.
const READ_DATA_HEADER_LEN: u32 = 20;
const READ_STATUS_LEN: u32 = 9;
/// `cmd, len, chunk_id, write_id, status`
const WRITE_STATUS_FRAME_LEN: usize = 21;
const WRITE_STATUS_BODY_LEN: u32 = 13;
const MAX_BLOCK: u32 = 1 << 16;

pub struct ChunkServerConn {
    addr: SocketAddr,
    stream: TcpStream,
    io_timeout: Option<Duration>,
}

impl ChunkServerConn {
    pub async fn connect(addr: SocketAddr, io_timeout: Option<Duration>) -> Result<Self> {
        let stream = with_deadline(io_timeout, TcpStream::connect(addr)).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            addr,
            stream,
            io_timeout,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        with_deadline(self.io_timeout, self.stream.write_all(frame)).await
    }

    async fn recv_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        with_deadline(self.io_timeout, self.stream.read_exact(buf)).await?;
        Ok(())
    }

    /// Read `buf.len()` bytes of a chunk starting at `offset` (in-chunk).
    /// Each DATA frame is checked against the running offset and its CRC.
    pub async fn read_block(
        &mut self,
        chunk_id: u64,
        version: u32,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<()> {
        let size = buf.len() as u32;
        self.send(&pack(
            CUTOCS_READ,
            &[
                Arg::U64(chunk_id),
                Arg::U32(version),
                Arg::U32(offset),
                Arg::U32(size),
            ],
        ))
        .await?;

        let mut offset = offset;
        let mut remaining = size;
        let mut got = 0usize;
        loop {
            let mut hdr = [0u8; HEADER_LEN];
            self.recv_exact(&mut hdr).await?;
            let FrameHeader { cmd, len } = FrameHeader::decode(&hdr);
            match cmd {
                CSTOCU_READ_STATUS => {
                    if len != READ_STATUS_LEN {
                        return Err(MfsError::Protocol(format!(
                            "READ_STATUS: bad length {len}"
                        )));
                    }
                    let mut body = [0u8; READ_STATUS_LEN as usize];
                    self.recv_exact(&mut body).await?;
                    let mut r = BodyReader::new("READ_STATUS", &body);
                    let cid = r.u64()?;
                    let status = r.u8()?;
                    if cid != chunk_id {
                        return Err(MfsError::Protocol(format!(
                            "READ_STATUS: chunk id {cid:#x} != {chunk_id:#x}"
                        )));
                    }
                    if status != 0 {
                        return Err(MfsError::Status(MfsStatus(status)));
                    }
                    if got != buf.len() {
                        return Err(MfsError::Protocol(format!(
                            "READ_STATUS: got {got} of {} bytes",
                            buf.len()
                        )));
                    }
                    return Ok(());
                }
                CSTOCU_READ_DATA => {
                    if len < READ_DATA_HEADER_LEN {
                        return Err(MfsError::Protocol(format!("READ_DATA: bad length {len}")));
                    }
                    let mut head = [0u8; READ_DATA_HEADER_LEN as usize];
                    self.recv_exact(&mut head).await?;
                    let mut r = BodyReader::new("READ_DATA", &head);
                    let cid = r.u64()?;
                    let block_no = r.u16()?;
                    let block_off = r.u16()?;
                    let block_size = r.u32()?;
                    let crc = r.u32()?;
                    if cid != chunk_id {
                        return Err(MfsError::Protocol(format!(
                            "READ_DATA: chunk id {cid:#x} != {chunk_id:#x}"
                        )));
                    }
                    if len != READ_DATA_HEADER_LEN + block_size {
                        return Err(MfsError::Protocol(format!(
                            "READ_DATA: length {len} does not match block size {block_size}"
                        )));
                    }
                    if block_size == 0 {
                        return Err(MfsError::Protocol("READ_DATA: empty block".into()));
                    }
                    if block_no != (offset >> 16) as u16 || block_off != (offset & 0xFFFF) as u16 {
                        return Err(MfsError::Protocol(format!(
                            "READ_DATA: block {block_no}/{block_off} at offset {offset}"
                        )));
                    }
                    let expected = (MAX_BLOCK - block_off as u32).min(remaining);
                    if block_size != expected {
                        return Err(MfsError::Protocol(format!(
                            "READ_DATA: block size {block_size}, expected {expected}"
                        )));
                    }
                    let dst = &mut buf[got..got + block_size as usize];
                    with_deadline(self.io_timeout, self.stream.read_exact(dst)).await?;
                    if crc32fast::hash(dst) != crc {
                        return Err(MfsError::Checksum {
                            chunk_id,
                            block: block_no,
                        });
                    }
                    trace!(chunk_id, block_no, block_size, "read block");
                    got += block_size as usize;
                    offset += block_size;
                    remaining -= block_size;
                }
                other => {
                    return Err(MfsError::Protocol(format!(
                        "unknown message {other} from chunk server {}",
                        self.addr
                    )));
                }
            }
        }
    }

    /// Open a write session; the first server relays to `servers_wire`.
    pub async fn start_write(&mut self, chunk_id: u64, version: u32, servers_wire: &[u8]) -> Result<()> {
        self.send(&pack(
            CUTOCS_WRITE,
            &[
                Arg::U64(chunk_id),
                Arg::U32(version),
                Arg::Bytes(servers_wire),
            ],
        ))
        .await
    }

    /// Send one block segment and wait for its acknowledgement.
    pub async fn write_block(
        &mut self,
        chunk_id: u64,
        write_id: u32,
        block_no: u16,
        block_off: u16,
        data: &[u8],
    ) -> Result<()> {
        let crc = crc32fast::hash(data);
        self.send(&pack(
            CUTOCS_WRITE_DATA,
            &[
                Arg::U64(chunk_id),
                Arg::U32(write_id),
                Arg::U16(block_no),
                Arg::U16(block_off),
                Arg::U32(data.len() as u32),
                Arg::U32(crc),
                Arg::Bytes(data),
            ],
        ))
        .await?;

        let mut reply = [0u8; WRITE_STATUS_FRAME_LEN];
        self.recv_exact(&mut reply).await?;
        if reply[..HEADER_LEN].iter().all(|&b| b == 0) {
            // anonymous zero header in front of the real reply
            reply.copy_within(HEADER_LEN.., 0);
            let tail = WRITE_STATUS_FRAME_LEN - HEADER_LEN;
            self.recv_exact(&mut reply[tail..]).await?;
        }
        let mut r = BodyReader::new("WRITE_STATUS", &reply);
        let header = FrameHeader {
            cmd: r.u32()?,
            len: r.u32()?,
        };
        if header.cmd != CSTOCU_WRITE_STATUS || header.len != WRITE_STATUS_BODY_LEN {
            return Err(MfsError::Protocol(format!(
                "WRITE_STATUS: unexpected frame cmd {} len {}",
                header.cmd, header.len
            )));
        }
        let cid = r.u64()?;
        let wid = r.u32()?;
        let status = r.u8()?;
        if cid != chunk_id || wid != write_id {
            return Err(MfsError::Protocol(format!(
                "WRITE_STATUS: reply for {cid:#x}/{wid}, expected {chunk_id:#x}/{write_id}"
            )));
        }
        match status {
            0 => Ok(()),
            status => Err(MfsError::Status(MfsStatus(status))),
        }
    }
}
