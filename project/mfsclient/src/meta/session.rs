//! One registered session with the master.
//!
//! A session owns a single TCP connection guarded by an async mutex held for
//! the whole request/response exchange. It connects lazily, re-registers with
//! its held session id after a failure, and keeps the connection alive with a
//! periodic NOP sent from a cancellable background task.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{MfsError, MfsStatus, Result};
use crate::proto::codec::{self, Arg, MAX_BODY_LEN, pack, with_deadline};
use crate::proto::consts::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Registering,
    Established,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub addr: String,
    pub subdir: String,
    pub keepalive_interval: Duration,
    pub io_timeout: Option<Duration>,
}

struct Shared {
    conn: Mutex<Option<TcpStream>>,
    phase: SyncMutex<SessionPhase>,
}

impl Shared {
    fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock() = phase;
    }
}

pub struct MasterSession {
    cfg: SessionConfig,
    session_id: AtomicU32,
    shared: Arc<Shared>,
    keepalive: SyncMutex<Option<CancellationToken>>,
}

impl MasterSession {
    pub fn new(cfg: SessionConfig) -> Self {
        Self {
            cfg,
            session_id: AtomicU32::new(0),
            shared: Arc::new(Shared {
                conn: Mutex::new(None),
                phase: SyncMutex::new(SessionPhase::Disconnected),
            }),
            keepalive: SyncMutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.cfg.addr
    }

    /// Id assigned by the master, 0 until the first registration succeeds.
    pub fn session_id(&self) -> u32 {
        self.session_id.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> SessionPhase {
        *self.shared.phase.lock()
    }

    /// Single request/response primitive. Prepends the request id, holds the
    /// connection for the whole exchange and retries once from connect when
    /// the reply is malformed or the socket fails. A one-byte nonzero body is
    /// a status error and is returned as-is.
    pub async fn send_and_receive(&self, cmd: u32, args: &[Arg<'_>]) -> Result<Vec<u8>> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(Arg::U32(REQUEST_ID));
        full.extend_from_slice(args);
        let frame = pack(cmd, &full);

        let mut guard = self.shared.conn.lock().await;
        let mut last_err = None;
        for attempt in 0..2 {
            if guard.is_none() {
                *guard = Some(self.connect().await?);
            }
            let Some(stream) = guard.as_mut() else {
                return Err(MfsError::Protocol("master connection unavailable".into()));
            };
            match self.exchange(stream, cmd, &frame).await {
                Ok(body) => {
                    if body.len() == 1 && body[0] != 0 {
                        return Err(MfsError::Status(MfsStatus(body[0])));
                    }
                    return Ok(body);
                }
                Err(e) => {
                    warn!(addr = %self.cfg.addr, cmd, attempt, "master exchange failed: {e}");
                    *guard = None;
                    self.shared.set_phase(SessionPhase::Disconnected);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| MfsError::Protocol("master exchange failed".into())))
    }

    async fn exchange(&self, stream: &mut TcpStream, cmd: u32, frame: &[u8]) -> Result<Vec<u8>> {
        let deadline = self.cfg.io_timeout;
        with_deadline(deadline, stream.write_all(frame)).await?;
        loop {
            let mut hdr = [0u8; 12];
            with_deadline(deadline, stream.read_exact(&mut hdr)).await?;
            let rcmd = u32::from_be_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]);
            let size = u32::from_be_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]);
            let id = u32::from_be_bytes([hdr[8], hdr[9], hdr[10], hdr[11]]);
            if rcmd == ANTOAN_NOP && size == 4 {
                continue;
            }
            if rcmd != cmd + 1 {
                return Err(MfsError::Protocol(format!(
                    "unexpected reply command {rcmd} to {cmd}"
                )));
            }
            if id != REQUEST_ID {
                return Err(MfsError::Protocol(format!(
                    "reply id {id} does not match request id {REQUEST_ID}"
                )));
            }
            if size <= 4 || size > MAX_BODY_LEN {
                return Err(MfsError::Protocol(format!(
                    "bad reply size {size} to {cmd}"
                )));
            }
            let mut body = vec![0u8; size as usize - 4];
            with_deadline(deadline, stream.read_exact(&mut body)).await?;
            debug!(cmd, len = body.len(), "master reply");
            return Ok(body);
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        self.shared.set_phase(SessionPhase::Connecting);
        let deadline = self.cfg.io_timeout;
        let mut stream = match with_deadline(deadline, TcpStream::connect(&self.cfg.addr)).await {
            Ok(s) => s,
            Err(e) => {
                self.shared.set_phase(SessionPhase::Disconnected);
                return Err(e);
            }
        };
        stream.set_nodelay(true)?;

        self.shared.set_phase(SessionPhase::Registering);
        if let Err(e) = self.register(&mut stream).await {
            // a rejected reconnect must not be retried with the same id
            self.session_id.store(0, Ordering::Release);
            self.shared.set_phase(SessionPhase::Disconnected);
            return Err(e);
        }
        self.shared.set_phase(SessionPhase::Established);
        self.spawn_keepalive();
        Ok(stream)
    }

    async fn register(&self, stream: &mut TcpStream) -> Result<()> {
        let held = self.session_id();
        let subdir = self.cfg.subdir.as_bytes();
        let frame = if held == 0 {
            pack(
                CUTOMA_FUSE_REGISTER,
                &[
                    Arg::Bytes(FUSE_REGISTER_BLOB_ACL),
                    Arg::U8(REGISTER_NEWSESSION),
                    Arg::U32(PROTOCOL_VERSION),
                    Arg::U32(2),
                    Arg::Bytes(b"/\0"),
                    Arg::U32(subdir.len() as u32 + 1),
                    Arg::Bytes(subdir),
                    Arg::U8(0),
                ],
            )
        } else {
            pack(
                CUTOMA_FUSE_REGISTER,
                &[
                    Arg::Bytes(FUSE_REGISTER_BLOB_ACL),
                    Arg::U8(REGISTER_RECONNECT),
                    Arg::U32(held),
                    Arg::U32(PROTOCOL_VERSION),
                ],
            )
        };

        let deadline = self.cfg.io_timeout;
        with_deadline(deadline, stream.write_all(&frame)).await?;
        let (header, body) = match deadline {
            Some(d) => tokio::time::timeout(d, codec::read_frame(stream))
                .await
                .map_err(|_| MfsError::TimedOut)??,
            None => codec::read_frame(stream).await?,
        };

        if header.cmd != MATOCU_FUSE_REGISTER {
            return Err(MfsError::Register(format!(
                "unexpected reply command {}",
                header.cmd
            )));
        }
        if !REGISTER_REPLY_LENGTHS.contains(&header.len) {
            return Err(MfsError::Register(format!(
                "unexpected reply length {}",
                header.len
            )));
        }
        if body.len() == 1 {
            if body[0] != 0 {
                return Err(MfsError::Register(MfsStatus(body[0]).to_string()));
            }
            if held == 0 {
                warn!(addr = %self.cfg.addr, "master accepted registration without a session id");
            }
            return Ok(());
        }

        if held == 0 {
            // newer masters prefix the reply with their version
            let at = if body.len() < 25 { 0 } else { 4 };
            let id = u32::from_be_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]]);
            self.session_id.store(id, Ordering::Release);
            info!(addr = %self.cfg.addr, session_id = id, "registered new master session");
        } else {
            info!(addr = %self.cfg.addr, session_id = held, "reconnected master session");
        }
        Ok(())
    }

    fn spawn_keepalive(&self) {
        let token = CancellationToken::new();
        if let Some(old) = self.keepalive.lock().replace(token.clone()) {
            old.cancel();
        }
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let interval = self.cfg.keepalive_interval;
        let deadline = self.cfg.io_timeout;
        let addr = self.cfg.addr.clone();
        let nop = pack(ANTOAN_NOP, &[Arg::U32(0)]);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(shared) = shared.upgrade() else { break };
                        let mut guard = shared.conn.lock().await;
                        if token.is_cancelled() {
                            break;
                        }
                        let Some(stream) = guard.as_mut() else { break };
                        if let Err(e) = with_deadline(deadline, stream.write_all(&nop)).await {
                            error!(addr = %addr, "keepalive failed, dropping master connection: {e}");
                            *guard = None;
                            shared.set_phase(SessionPhase::Disconnected);
                            break;
                        }
                    }
                }
            }
            debug!(addr = %addr, "keepalive stopped");
        });
    }

    /// Drop the connection and stop the keepalive. The held session id is
    /// kept, so the next request reconnects with it.
    pub async fn close(&self) {
        if let Some(token) = self.keepalive.lock().take() {
            token.cancel();
        }
        let mut guard = self.shared.conn.lock().await;
        if let Some(mut stream) = guard.take() {
            let _ = stream.shutdown().await;
        }
        self.shared.set_phase(SessionPhase::Disconnected);
    }
}

impl Drop for MasterSession {
    fn drop(&mut self) {
        if let Some(token) = self.keepalive.get_mut().take() {
            token.cancel();
        }
    }
}
