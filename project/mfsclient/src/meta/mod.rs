//! Metadata channel to the master
//!
//! Submodules:
//! - `session`: one registered connection with reconnect and keepalive
//! - `pool`: fixed-size round-robin set of sessions
//! - `ops`: typed request/response methods built on the pool
pub mod ops;
pub mod pool;
pub mod session;

pub use ops::MasterClient;
pub use pool::MasterConnPool;
pub use session::{MasterSession, SessionConfig, SessionPhase};
