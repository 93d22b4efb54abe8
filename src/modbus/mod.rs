pub mod client;
pub mod session;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{ModbusClient, TcpModbusClient};
pub use session::{ModbusSession, SessionManager};
