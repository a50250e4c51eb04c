//! Connection lifecycle management
//!
//! - `machine`: the pure lifecycle state machine
//! - `manager`: the driver task that performs its effects, plus the handle
//!   other components use to connect, disconnect and send

mod machine;
mod manager;

pub use machine::{ConnectionState, Effect, Input, Machine, ReconnectPolicy};
pub use manager::{
    ConnectionConfig, ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionStats,
};
