use clap::ArgMatches;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::mesh::{MeshAddress, BROADCAST_ADDRESS};
use crate::utils::error::GatewayError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewaySettings,
    pub mesh: MeshSettings,
    pub modbus: ModbusSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub name: String,
    pub uuid: String,
    pub stats_interval: u64,            // Requests between statistics logs, 0 = only on shutdown
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshSettings {
    pub bind_address: String,           // UDP socket of the radio bridge
    pub node_address: MeshAddress,      // This gateway's mesh address
    pub central_address: MeshAddress,   // Only node allowed to issue requests
    pub ack_timeout_ms: u64,
    pub retries: u8,
    // Radio parameters handed to the bridge
    pub frequency_mhz: f32,
    pub tx_power_dbm: i8,
    pub modem_config: ModemConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusSettings {
    pub port: u16,
    pub unit_id: u8,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub register_delay_ms: u64,         // Device turnaround between single-register calls
}

/// RF95 modem presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModemConfig {
    Bw125Cr45Sf128,   // Default medium range
    Bw500Cr45Sf128,   // Fast, short range
    Bw31_25Cr48Sf512, // Slow, long range
    Bw125Cr48Sf4096,  // Slow, long range, low data rate
    Bw125Cr45Sf2048,  // Slow, long range
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            name: "LoRa Modbus Gateway".to_string(),
            uuid: Uuid::new_v4().to_string(),
            stats_interval: 100,
        }
    }
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4210".to_string(),
            node_address: 1,
            central_address: 0,
            ack_timeout_ms: 3000,
            retries: 3,
            frequency_mhz: 868.0,
            tx_power_dbm: 13,
            modem_config: ModemConfig::Bw125Cr45Sf128,
        }
    }
}

impl Default for ModbusSettings {
    fn default() -> Self {
        Self {
            port: 502,
            unit_id: 1,
            connect_timeout_ms: 1000,
            request_timeout_ms: 1000,
            register_delay_ms: 20,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GatewayError::ConfigError(format!("Cannot read {}: {}", path.as_ref().display(), e))
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Generate gateway UUID if not present
        if config.gateway.uuid.is_empty() {
            config.gateway.uuid = Uuid::new_v4().to_string();
        }

        info!("📋 Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), GatewayError> {
        // Create directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply command line overrides on top of file/default values.
    pub fn apply_matches(&mut self, matches: &ArgMatches) -> Result<(), GatewayError> {
        if let Some(bind) = matches.get_one::<String>("bind") {
            self.mesh.bind_address = bind.clone();
        }
        if let Some(node) = matches.get_one::<String>("node-address") {
            self.mesh.node_address = parse_mesh_address("node-address", node)?;
        }
        if let Some(central) = matches.get_one::<String>("central-address") {
            self.mesh.central_address = parse_mesh_address("central-address", central)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        let mesh = &self.mesh;
        if mesh.node_address == mesh.central_address {
            return Err(GatewayError::ConfigError(format!(
                "node address and central address are both 0x{:02X}",
                mesh.node_address
            )));
        }
        if mesh.node_address == BROADCAST_ADDRESS || mesh.central_address == BROADCAST_ADDRESS {
            return Err(GatewayError::ConfigError(
                "the broadcast address cannot be a node or central address".to_string(),
            ));
        }
        if mesh.ack_timeout_ms == 0 {
            return Err(GatewayError::ConfigError("mesh.ack_timeout_ms must be > 0".to_string()));
        }

        let modbus = &self.modbus;
        if modbus.port == 0 {
            return Err(GatewayError::ConfigError("modbus.port must be > 0".to_string()));
        }
        if modbus.connect_timeout_ms == 0 || modbus.request_timeout_ms == 0 {
            return Err(GatewayError::ConfigError("modbus timeouts must be > 0".to_string()));
        }
        Ok(())
    }
}

fn parse_mesh_address(option: &str, value: &str) -> Result<MeshAddress, GatewayError> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse::<u8>(),
    };
    parsed.map_err(|_| GatewayError::ConfigError(format!("--{}: invalid mesh address '{}'", option, value)))
}
