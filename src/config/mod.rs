pub mod settings;

pub use settings::{Config, GatewaySettings, MeshSettings, ModbusSettings, ModemConfig};
