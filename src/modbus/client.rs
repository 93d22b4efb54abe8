use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::time::{error::Elapsed, timeout};
use tokio_modbus::client::{tcp, Context, Reader, Writer};
use tokio_modbus::Slave;

use crate::config::settings::ModbusSettings;
use crate::utils::error::GatewayError;

/// Per-register Modbus-TCP operations against a target device.
#[async_trait]
pub trait ModbusClient: Send {
    /// Best-effort connect; callers check [`ModbusClient::is_connected`] afterwards.
    async fn connect(&mut self, target: Ipv4Addr) -> Result<(), GatewayError>;

    fn is_connected(&self, target: Ipv4Addr) -> bool;

    async fn read_coil(&mut self, target: Ipv4Addr, address: u16) -> Result<bool, GatewayError>;

    async fn read_holding_register(&mut self, target: Ipv4Addr, address: u16) -> Result<u16, GatewayError>;

    async fn read_input_register(&mut self, target: Ipv4Addr, address: u16) -> Result<u16, GatewayError>;

    async fn write_coil(&mut self, target: Ipv4Addr, address: u16, value: bool) -> Result<(), GatewayError>;

    async fn write_holding_register(
        &mut self,
        target: Ipv4Addr,
        address: u16,
        value: u16,
    ) -> Result<(), GatewayError>;

    /// Let the underlying connection state machines make progress.
    async fn pump_events(&mut self) {
        tokio::task::yield_now().await;
    }
}

/// tokio-modbus backed client holding one TCP context per target.
pub struct TcpModbusClient {
    port: u16,
    unit_id: u8,
    connect_timeout: Duration,
    request_timeout: Duration,
    contexts: HashMap<Ipv4Addr, Context>,
}

impl TcpModbusClient {
    pub fn new(settings: &ModbusSettings) -> Self {
        Self {
            port: settings.port,
            unit_id: settings.unit_id,
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
            contexts: HashMap::new(),
        }
    }

    fn context(&mut self, target: Ipv4Addr) -> Result<&mut Context, GatewayError> {
        self.contexts
            .get_mut(&target)
            .ok_or_else(|| GatewayError::ModbusUnreachable(format!("{} is not connected", target)))
    }

    /// Flatten the timeout/transport/exception layers of a call result.
    /// Transport failures and timeouts drop the connection so the next request reconnects.
    fn settle<T>(
        &mut self,
        target: Ipv4Addr,
        operation: &str,
        address: u16,
        result: Result<tokio_modbus::Result<T>, Elapsed>,
    ) -> Result<T, GatewayError> {
        match result {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(exception))) => {
                warn!("⚠️  {} {} @{}: exception {:?}", operation, target, address, exception);
                Err(GatewayError::ModbusOperationFailed {
                    address,
                    completed: 0,
                    reason: format!("exception {:?}", exception),
                })
            }
            Ok(Err(e)) => {
                warn!("🔌 {} {} @{}: transport error {}, dropping connection", operation, target, address, e);
                self.contexts.remove(&target);
                Err(GatewayError::ModbusUnreachable(format!("{}: {}", target, e)))
            }
            Err(_) => {
                warn!("⏰ {} {} @{}: no response within {:?}", operation, target, address, self.request_timeout);
                self.contexts.remove(&target);
                Err(GatewayError::Timeout)
            }
        }
    }
}

#[async_trait]
impl ModbusClient for TcpModbusClient {
    async fn connect(&mut self, target: Ipv4Addr) -> Result<(), GatewayError> {
        let socket_addr = SocketAddr::from((target, self.port));
        debug!("🔌 Connecting to Modbus TCP device {} (unit {})", socket_addr, self.unit_id);

        match timeout(self.connect_timeout, tcp::connect_slave(socket_addr, Slave(self.unit_id))).await {
            Ok(Ok(context)) => {
                info!("✅ Connected to Modbus TCP device {}", socket_addr);
                self.contexts.insert(target, context);
                Ok(())
            }
            Ok(Err(e)) => Err(GatewayError::ModbusUnreachable(format!("{}: {}", socket_addr, e))),
            Err(_) => Err(GatewayError::ModbusUnreachable(format!(
                "{}: connect timed out after {:?}",
                socket_addr, self.connect_timeout
            ))),
        }
    }

    fn is_connected(&self, target: Ipv4Addr) -> bool {
        self.contexts.contains_key(&target)
    }

    async fn read_coil(&mut self, target: Ipv4Addr, address: u16) -> Result<bool, GatewayError> {
        let request_timeout = self.request_timeout;
        let result = timeout(request_timeout, self.context(target)?.read_coils(address, 1)).await;
        let coils = self.settle(target, "read coil", address, result)?;
        coils.first().copied().ok_or_else(|| empty_response(address))
    }

    async fn read_holding_register(&mut self, target: Ipv4Addr, address: u16) -> Result<u16, GatewayError> {
        let request_timeout = self.request_timeout;
        let result = timeout(request_timeout, self.context(target)?.read_holding_registers(address, 1)).await;
        let words = self.settle(target, "read holding register", address, result)?;
        words.first().copied().ok_or_else(|| empty_response(address))
    }

    async fn read_input_register(&mut self, target: Ipv4Addr, address: u16) -> Result<u16, GatewayError> {
        let request_timeout = self.request_timeout;
        let result = timeout(request_timeout, self.context(target)?.read_input_registers(address, 1)).await;
        let words = self.settle(target, "read input register", address, result)?;
        words.first().copied().ok_or_else(|| empty_response(address))
    }

    async fn write_coil(&mut self, target: Ipv4Addr, address: u16, value: bool) -> Result<(), GatewayError> {
        let request_timeout = self.request_timeout;
        let result = timeout(request_timeout, self.context(target)?.write_single_coil(address, value)).await;
        self.settle(target, "write coil", address, result)
    }

    async fn write_holding_register(
        &mut self,
        target: Ipv4Addr,
        address: u16,
        value: u16,
    ) -> Result<(), GatewayError> {
        let request_timeout = self.request_timeout;
        let result = timeout(request_timeout, self.context(target)?.write_single_register(address, value)).await;
        self.settle(target, "write holding register", address, result)
    }
}

fn empty_response(address: u16) -> GatewayError {
    GatewayError::ModbusOperationFailed {
        address,
        completed: 0,
        reason: "empty response".to_string(),
    }
}
