//! Round-robin pool of master sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ClientOptions;
use crate::error::Result;
use crate::proto::codec::Arg;

use super::session::{MasterSession, SessionConfig};

pub struct MasterConnPool {
    sessions: Vec<Arc<MasterSession>>,
    next_conn: AtomicUsize,
}

impl MasterConnPool {
    pub fn new(cfg: SessionConfig, size: usize) -> Self {
        let size = size.max(1);
        let mut sessions = Vec::with_capacity(size);
        for _ in 0..size {
            sessions.push(Arc::new(MasterSession::new(cfg.clone())));
        }
        Self {
            sessions,
            next_conn: AtomicUsize::new(0),
        }
    }

    pub fn from_options(opts: &ClientOptions) -> Self {
        let cfg = SessionConfig {
            addr: opts.master_endpoint(),
            subdir: opts.subdir.clone(),
            keepalive_interval: opts.keepalive_interval_duration(),
            io_timeout: opts.io_timeout_duration(),
        };
        Self::new(cfg, opts.master_conns)
    }

    fn get_session(&self) -> &Arc<MasterSession> {
        let idx = self.next_conn.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        &self.sessions[idx]
    }

    pub fn sessions(&self) -> &[Arc<MasterSession>] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub async fn send_and_receive(&self, cmd: u32, args: &[Arg<'_>]) -> Result<Vec<u8>> {
        self.get_session().send_and_receive(cmd, args).await
    }

    pub async fn close(&self) {
        for session in &self.sessions {
            session.close().await;
        }
    }
}
