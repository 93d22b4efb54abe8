use anyhow::{Context, Result};
use log::info;
use std::time::Duration;

use lora_modbus_gateway::cli::{build_cli, handle_subcommands};
use lora_modbus_gateway::config::Config;
use lora_modbus_gateway::{Gateway, SessionManager, TcpModbusClient, UdpMeshTransport};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let log_level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if handle_subcommands(&matches)? {
        return Ok(());
    }

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path))?,
        None => Config::default(),
    };
    config.apply_matches(&matches)?;
    config.validate()?;

    run_gateway(config).await
}

async fn run_gateway(config: Config) -> Result<()> {
    info!("🖥️  {} v{} [{}]", config.gateway.name, lora_modbus_gateway::VERSION, config.gateway.uuid);
    info!(
        "📻 Radio: {:.1} MHz, {} dBm, {:?}",
        config.mesh.frequency_mhz, config.mesh.tx_power_dbm, config.mesh.modem_config
    );
    info!(
        "⚙️  Modbus: port {}, unit {}, {} ms between registers",
        config.modbus.port, config.modbus.unit_id, config.modbus.register_delay_ms
    );

    let transport = UdpMeshTransport::bind(&config.mesh).await?;
    let sessions = SessionManager::new(
        TcpModbusClient::new(&config.modbus),
        Duration::from_millis(config.modbus.register_delay_ms),
    );
    let mut gateway = Gateway::new(transport, sessions, config.mesh.central_address)
        .with_stats_interval(config.gateway.stats_interval);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Stopping gateway...");
        }
        _ = gateway.run() => {}
    }

    gateway.log_stats();
    info!("👋 Goodbye!");
    Ok(())
}
