use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::sleep;

use super::client::ModbusClient;
use crate::protocol::{OperationPayload, Outcome, ParsedRequest, RegisterTable, RegisterValue};
use crate::utils::error::GatewayError;

/// Connectivity bookkeeping for one Modbus-TCP target.
#[derive(Debug, Clone)]
pub struct ModbusSession {
    pub target: Ipv4Addr,
    pub connected: bool,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub requests: u64,
    pub failures: u64,
}

impl ModbusSession {
    fn new(target: Ipv4Addr) -> Self {
        let now = Utc::now();
        Self {
            target,
            connected: false,
            created_at: now,
            last_used: now,
            requests: 0,
            failures: 0,
        }
    }
}

/// Owns the per-target session cache and drives single-register calls.
pub struct SessionManager<C: ModbusClient> {
    client: C,
    sessions: HashMap<Ipv4Addr, ModbusSession>,
    register_delay: Duration,
}

impl<C: ModbusClient> SessionManager<C> {
    pub fn new(client: C, register_delay: Duration) -> Self {
        Self {
            client,
            sessions: HashMap::new(),
            register_delay,
        }
    }

    pub fn session(&self, target: Ipv4Addr) -> Option<&ModbusSession> {
        self.sessions.get(&target)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &ModbusSession> {
        self.sessions.values()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Execute `request` one register at a time.
    ///
    /// A single failed call fails the whole request; values read before the
    /// failure are discarded rather than reported.
    pub async fn execute(&mut self, request: &ParsedRequest) -> Result<Outcome, GatewayError> {
        request.payload.validate()?;
        let target = request.target;
        let session = self.sessions.entry(target).or_insert_with(|| {
            info!("🆕 Opening Modbus session for {}", target);
            ModbusSession::new(target)
        });
        session.requests += 1;
        session.last_used = Utc::now();

        if !self.client.is_connected(target) {
            if let Err(e) = self.client.connect(target).await {
                warn!("🔌 Connect to {} failed: {}", target, e);
            }
        }
        let connected = self.client.is_connected(target);

        let result = match &request.payload {
            OperationPayload::ReadRange { start, count } => self
                .read_range(request.function.table(), target, *start, *count, connected)
                .await
                .map(Outcome::Values),
            OperationPayload::WriteRange { start, values } => self
                .write_range(target, *start, values, connected)
                .await
                .map(|_| Outcome::Written),
        };

        let connected_after = self.client.is_connected(target);
        if let Some(session) = self.sessions.get_mut(&target) {
            session.connected = connected_after;
            if result.is_err() {
                session.failures += 1;
            }
        }

        result
    }

    async fn read_range(
        &mut self,
        table: RegisterTable,
        target: Ipv4Addr,
        start: u16,
        count: u16,
        connected: bool,
    ) -> Result<Vec<RegisterValue>, GatewayError> {
        let mut values = Vec::with_capacity(count as usize);

        for offset in 0..count {
            let address = register_address(start, offset)?;
            self.pace(offset).await;

            let value = match table {
                RegisterTable::Coils => self.client.read_coil(target, address).await.map(RegisterValue::Coil),
                RegisterTable::HoldingRegisters => self
                    .client
                    .read_holding_register(target, address)
                    .await
                    .map(RegisterValue::Holding),
                RegisterTable::InputRegisters => self
                    .client
                    .read_input_register(target, address)
                    .await
                    .map(RegisterValue::Input),
            };

            match value {
                Ok(value) => values.push(value),
                Err(e) => {
                    debug!("🗑️  Discarding {} partial values from {}", values.len(), target);
                    return Err(call_failed(target, address, values.len(), connected, e));
                }
            }
        }

        Ok(values)
    }

    async fn write_range(
        &mut self,
        target: Ipv4Addr,
        start: u16,
        values: &[RegisterValue],
        connected: bool,
    ) -> Result<(), GatewayError> {
        for (offset, value) in values.iter().enumerate() {
            let offset = u16::try_from(offset).map_err(|_| out_of_range(start, offset))?;
            let address = register_address(start, offset)?;
            self.pace(offset).await;

            let written = match *value {
                RegisterValue::Coil(on) => self.client.write_coil(target, address, on).await,
                RegisterValue::Holding(word) => self.client.write_holding_register(target, address, word).await,
                RegisterValue::Input(_) => Err(GatewayError::MalformedPayload(
                    "input registers are read-only".to_string(),
                )),
            };

            if let Err(e) = written {
                return Err(call_failed(target, address, offset as usize, connected, e));
            }
        }

        Ok(())
    }

    /// Turnaround delay between consecutive calls, then give the client a chance
    /// to process pending I/O.
    async fn pace(&mut self, offset: u16) {
        if offset > 0 && !self.register_delay.is_zero() {
            sleep(self.register_delay).await;
        }
        self.client.pump_events().await;
    }
}

fn register_address(start: u16, offset: u16) -> Result<u16, GatewayError> {
    start
        .checked_add(offset)
        .ok_or_else(|| out_of_range(start, offset as usize))
}

fn out_of_range(start: u16, offset: usize) -> GatewayError {
    GatewayError::MalformedPayload(format!(
        "register {}+{} is outside the address space",
        start, offset
    ))
}

fn call_failed(target: Ipv4Addr, address: u16, completed: usize, connected: bool, cause: GatewayError) -> GatewayError {
    match cause {
        GatewayError::MalformedPayload(_) => cause,
        // Nothing went through and the connect attempt had already failed.
        _ if completed == 0 && !connected => GatewayError::ModbusUnreachable(format!("{}: {}", target, cause)),
        _ => GatewayError::ModbusOperationFailed {
            address,
            completed,
            reason: cause.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::mock::{MockCall, MockModbusClient};
    use crate::protocol::{FunctionCode, MAX_OPERATION_COUNT};

    const TARGET: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 180);

    fn read(function: FunctionCode, start: u16, count: u16) -> ParsedRequest {
        ParsedRequest {
            function,
            target: TARGET,
            payload: OperationPayload::ReadRange { start, count },
        }
    }

    fn manager(client: MockModbusClient) -> SessionManager<MockModbusClient> {
        SessionManager::new(client, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_read_coils_in_address_order() {
        let client = MockModbusClient::reachable(TARGET).with_coils(0, &[true, false, true, true]);
        let mut sessions = manager(client);

        let outcome = sessions.execute(&read(FunctionCode::ReadCoils, 0, 4)).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Values(vec![
                RegisterValue::Coil(true),
                RegisterValue::Coil(false),
                RegisterValue::Coil(true),
                RegisterValue::Coil(true),
            ])
        );
        assert_eq!(
            sessions.client().calls[1..],
            [
                MockCall::ReadCoil(0),
                MockCall::ReadCoil(1),
                MockCall::ReadCoil(2),
                MockCall::ReadCoil(3)
            ]
        );
        assert_eq!(sessions.client().pumps, 4);
    }

    #[tokio::test]
    async fn test_session_is_created_once_and_reused() {
        let mut sessions = manager(MockModbusClient::reachable(TARGET));

        sessions.execute(&read(FunctionCode::ReadHoldingRegisters, 0, 1)).await.unwrap();
        sessions.execute(&read(FunctionCode::ReadInputRegisters, 5, 2)).await.unwrap();

        let connects = sessions
            .client()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::Connect(_)))
            .count();
        assert_eq!(connects, 1);

        let session = sessions.session(TARGET).unwrap();
        assert!(session.connected);
        assert_eq!(session.requests, 2);
        assert_eq!(sessions.sessions().count(), 1);
    }

    #[tokio::test]
    async fn test_write_registers() {
        let mut sessions = manager(MockModbusClient::reachable(TARGET));
        let request = ParsedRequest {
            function: FunctionCode::WriteMultipleRegisters,
            target: TARGET,
            payload: OperationPayload::WriteRange {
                start: 10,
                values: vec![RegisterValue::Holding(1000), RegisterValue::Holding(1001)],
            },
        };

        assert_eq!(sessions.execute(&request).await.unwrap(), Outcome::Written);
        assert_eq!(sessions.client().holding.get(&10), Some(&1000));
        assert_eq!(sessions.client().holding.get(&11), Some(&1001));
    }

    #[tokio::test]
    async fn test_unreachable_target_still_attempts_call() {
        let mut sessions = manager(MockModbusClient::default());

        let result = sessions.execute(&read(FunctionCode::ReadCoils, 0, 3)).await;
        assert!(matches!(result, Err(GatewayError::ModbusUnreachable(_))));
        // Connect is fire-and-forget: the first register call is still issued.
        assert_eq!(
            sessions.client().calls,
            vec![MockCall::Connect(TARGET), MockCall::ReadCoil(0)]
        );

        let session = sessions.session(TARGET).unwrap();
        assert!(!session.connected);
        assert_eq!(session.failures, 1);
    }

    #[tokio::test]
    async fn test_partial_failure_discards_values() {
        let mut client = MockModbusClient::reachable(TARGET);
        client.fail_at = Some(2);
        let mut sessions = manager(client);

        match sessions.execute(&read(FunctionCode::ReadHoldingRegisters, 0, 4)).await {
            Err(GatewayError::ModbusOperationFailed { address, completed, .. }) => {
                assert_eq!(address, 2);
                assert_eq!(completed, 2);
            }
            other => panic!("unexpected result {:?}", other),
        }
        // The sequence stops at the failing register.
        assert_eq!(sessions.client().data_calls(), 3);
    }

    #[tokio::test]
    async fn test_unvalidated_range_is_rejected_without_calls() {
        let mut sessions = manager(MockModbusClient::reachable(TARGET));

        for request in [
            read(FunctionCode::ReadHoldingRegisters, 65535, 2),
            read(FunctionCode::ReadCoils, 0, MAX_OPERATION_COUNT as u16 + 1),
            ParsedRequest {
                function: FunctionCode::WriteMultipleRegisters,
                target: TARGET,
                payload: OperationPayload::WriteRange {
                    start: 65534,
                    values: vec![RegisterValue::Holding(1); 3],
                },
            },
        ] {
            assert!(matches!(
                sessions.execute(&request).await,
                Err(GatewayError::MalformedPayload(_))
            ));
        }
        assert!(sessions.client().calls.is_empty());
        assert!(sessions.session(TARGET).is_none());
    }

    #[tokio::test]
    async fn test_last_register_is_addressable() {
        let mut client = MockModbusClient::reachable(TARGET);
        client.holding.insert(u16::MAX, 7);
        let mut sessions = manager(client);

        let outcome = sessions.execute(&read(FunctionCode::ReadHoldingRegisters, u16::MAX, 1)).await.unwrap();
        assert_eq!(outcome, Outcome::Values(vec![RegisterValue::Holding(7)]));
    }

    #[tokio::test]
    async fn test_reconnects_after_connection_lost() {
        let mut sessions = manager(MockModbusClient::reachable(TARGET));
        sessions.execute(&read(FunctionCode::ReadCoils, 0, 1)).await.unwrap();

        sessions.client.connected.clear();
        sessions.execute(&read(FunctionCode::ReadCoils, 0, 1)).await.unwrap();

        let connects = sessions
            .client()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::Connect(_)))
            .count();
        assert_eq!(connects, 2);
    }
}
