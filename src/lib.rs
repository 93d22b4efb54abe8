//! LoRa Mesh to Modbus-TCP Gateway
//!
//! Receives framed requests over a radio mesh, executes them as single-register
//! Modbus-TCP calls against the addressed device and replies to the requesting
//! node with the values read, an acknowledgement or an error token.

pub mod cli;
pub mod config;
pub mod mesh;
pub mod modbus;
pub mod protocol;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use mesh::{Datagram, MeshTransport, UdpMeshTransport};
pub use modbus::{ModbusClient, SessionManager, TcpModbusClient};
pub use protocol::{ParsedRequest, Reply, ReplyFrame};
pub use services::Gateway;
pub use utils::error::GatewayError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
