//! In-memory Modbus device used by the session and gateway tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use super::client::ModbusClient;
use crate::utils::error::GatewayError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Connect(Ipv4Addr),
    ReadCoil(u16),
    ReadHolding(u16),
    ReadInput(u16),
    WriteCoil(u16, bool),
    WriteHolding(u16, u16),
}

#[derive(Default)]
pub struct MockModbusClient {
    pub reachable: HashSet<Ipv4Addr>,
    pub connected: HashSet<Ipv4Addr>,
    pub coils: HashMap<u16, bool>,
    pub holding: HashMap<u16, u16>,
    pub input: HashMap<u16, u16>,
    pub fail_at: Option<u16>,
    pub calls: Vec<MockCall>,
    pub pumps: usize,
}

impl MockModbusClient {
    pub fn reachable(target: Ipv4Addr) -> Self {
        let mut client = Self::default();
        client.reachable.insert(target);
        client
    }

    pub fn with_coils(mut self, start: u16, bits: &[bool]) -> Self {
        for (i, &bit) in bits.iter().enumerate() {
            self.coils.insert(start + i as u16, bit);
        }
        self
    }

    pub fn data_calls(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| !matches!(c, MockCall::Connect(_)))
            .count()
    }

    fn check(&self, target: Ipv4Addr, address: u16) -> Result<(), GatewayError> {
        if !self.connected.contains(&target) {
            return Err(GatewayError::ModbusUnreachable(format!("{} is not connected", target)));
        }
        if self.fail_at == Some(address) {
            return Err(GatewayError::ModbusOperationFailed {
                address,
                completed: 0,
                reason: "exception IllegalDataAddress".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ModbusClient for MockModbusClient {
    async fn connect(&mut self, target: Ipv4Addr) -> Result<(), GatewayError> {
        self.calls.push(MockCall::Connect(target));
        if self.reachable.contains(&target) {
            self.connected.insert(target);
            Ok(())
        } else {
            Err(GatewayError::ModbusUnreachable(format!("{} refused", target)))
        }
    }

    fn is_connected(&self, target: Ipv4Addr) -> bool {
        self.connected.contains(&target)
    }

    async fn read_coil(&mut self, target: Ipv4Addr, address: u16) -> Result<bool, GatewayError> {
        self.calls.push(MockCall::ReadCoil(address));
        self.check(target, address)?;
        Ok(self.coils.get(&address).copied().unwrap_or(false))
    }

    async fn read_holding_register(&mut self, target: Ipv4Addr, address: u16) -> Result<u16, GatewayError> {
        self.calls.push(MockCall::ReadHolding(address));
        self.check(target, address)?;
        Ok(self.holding.get(&address).copied().unwrap_or(0))
    }

    async fn read_input_register(&mut self, target: Ipv4Addr, address: u16) -> Result<u16, GatewayError> {
        self.calls.push(MockCall::ReadInput(address));
        self.check(target, address)?;
        Ok(self.input.get(&address).copied().unwrap_or(0))
    }

    async fn write_coil(&mut self, target: Ipv4Addr, address: u16, value: bool) -> Result<(), GatewayError> {
        self.calls.push(MockCall::WriteCoil(address, value));
        self.check(target, address)?;
        self.coils.insert(address, value);
        Ok(())
    }

    async fn write_holding_register(
        &mut self,
        target: Ipv4Addr,
        address: u16,
        value: u16,
    ) -> Result<(), GatewayError> {
        self.calls.push(MockCall::WriteHolding(address, value));
        self.check(target, address)?;
        self.holding.insert(address, value);
        Ok(())
    }

    async fn pump_events(&mut self) {
        self.pumps += 1;
    }
}
