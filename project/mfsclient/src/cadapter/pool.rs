//! Per-address pool of idle chunk-server connections.
//!
//! The lock only covers free-list bookkeeping. A checked-out connection is
//! owned by the caller until it is returned with `checkin` or dropped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;

use super::conn::ChunkServerConn;

#[derive(Default)]
pub struct ChunkServerPool {
    idle: Mutex<HashMap<SocketAddr, Vec<ChunkServerConn>>>,
    io_timeout: Option<Duration>,
}

impl ChunkServerPool {
    pub fn new(io_timeout: Option<Duration>) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            io_timeout,
        }
    }

    /// Pop an idle connection to `addr` or dial a new one.
    pub async fn checkout(&self, addr: SocketAddr) -> Result<ChunkServerConn> {
        let pooled = self.idle.lock().get_mut(&addr).and_then(Vec::pop);
        match pooled {
            Some(conn) => Ok(conn),
            None => {
                debug!(%addr, "dialing chunk server");
                ChunkServerConn::connect(addr, self.io_timeout).await
            }
        }
    }

    /// Return a connection after a clean exchange.
    pub fn checkin(&self, conn: ChunkServerConn) {
        self.idle.lock().entry(conn.addr()).or_default().push(conn);
    }

    pub fn idle_count(&self, addr: SocketAddr) -> usize {
        self.idle.lock().get(&addr).map_or(0, Vec::len)
    }

    /// Close every idle connection.
    pub fn clear(&self) {
        self.idle.lock().clear();
    }
}
