//! Wire protocol shared by the master and chunk-server channels.
//!
//! Submodules:
//! - `codec`: `cmd:u32, len:u32, body` framing and typed argument packing
//! - `consts`: command ids, register constants, open/setattr flags
//! - `attr`: the 35-byte packed attribute record
pub mod attr;
pub mod codec;
pub mod consts;
