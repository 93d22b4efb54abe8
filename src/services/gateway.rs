use log::{debug, error, info, warn};
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;

use crate::mesh::{Datagram, MeshAddress, MeshTransport};
use crate::modbus::{ModbusClient, SessionManager};
use crate::protocol::{
    decode_request, resolve_target, Frame, Outcome, ReplyFrame, FRAME_MARKER,
};
use crate::utils::error::GatewayError;

const RECEIVE_BACKOFF: Duration = Duration::from_millis(100);

/// Processing stage of the request currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    WaitForDatagram,
    Validate,
    Parse,
    Resolve,
    Decode,
    Execute,
    Encode,
    Reply,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub received: u64,
    pub dropped: u64,
    pub ignored: u64,
    pub served: u64,
    pub errors: u64,
    pub truncated: u64,
    pub reply_failures: u64,
}

/// Receives mesh requests, runs them against Modbus targets and replies to the origin.
pub struct Gateway<T: MeshTransport, C: ModbusClient> {
    transport: T,
    sessions: SessionManager<C>,
    central_address: MeshAddress,
    stats_interval: u64,
    stats: GatewayStats,
}

impl<T: MeshTransport, C: ModbusClient> Gateway<T, C> {
    pub fn new(transport: T, sessions: SessionManager<C>, central_address: MeshAddress) -> Self {
        Self {
            transport,
            sessions,
            central_address,
            stats_interval: 0,
            stats: GatewayStats::default(),
        }
    }

    pub fn with_stats_interval(mut self, interval: u64) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn stats(&self) -> &GatewayStats {
        &self.stats
    }

    pub fn sessions(&self) -> &SessionManager<C> {
        &self.sessions
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Serve requests until the task is dropped. Receive errors are logged and the
    /// loop goes back to waiting for the next datagram.
    pub async fn run(&mut self) {
        info!("🚀 Gateway serving requests from mesh node 0x{:02X}", self.central_address);
        loop {
            if let Err(e) = self.step().await {
                error!("❌ [{}] {}", Stage::WaitForDatagram, e);
                sleep(RECEIVE_BACKOFF).await;
            }
        }
    }

    /// Wait for one datagram and process it completely.
    pub async fn step(&mut self) -> Result<(), GatewayError> {
        let datagram = self.transport.receive().await?;
        let origin = datagram.from;

        if let Some(reply) = self.handle_datagram(datagram).await {
            match self.transport.send(reply.as_bytes(), origin).await {
                Ok(()) => debug!("📤 Reply to 0x{:02X}: {}", origin, String::from_utf8_lossy(reply.as_bytes())),
                Err(e) => {
                    self.stats.reply_failures += 1;
                    error!("❌ [{}] reply to 0x{:02X} failed: {}", Stage::Reply, origin, e);
                }
            }
        }

        if self.stats_interval > 0 && self.stats.received % self.stats_interval == 0 {
            self.log_stats();
        }
        Ok(())
    }

    /// Validate and execute one datagram, returning the reply to send (if any).
    pub async fn handle_datagram(&mut self, datagram: Datagram) -> Option<ReplyFrame> {
        self.stats.received += 1;
        debug!(
            "📥 0x{:02X} → 0x{:02X}: {}",
            datagram.from,
            datagram.to,
            hex::encode(&datagram.payload)
        );

        if datagram.from != self.central_address {
            warn!(
                "🚫 [{}] dropping datagram from 0x{:02X}: not the central controller",
                Stage::Validate,
                datagram.from
            );
            self.stats.dropped += 1;
            return None;
        }
        if datagram.payload.first() != Some(&FRAME_MARKER) {
            debug!("Ignoring non-frame traffic from 0x{:02X}", datagram.from);
            self.stats.ignored += 1;
            return None;
        }

        let result = match self.process(&datagram.payload).await {
            Ok(outcome) => Ok(outcome),
            Err((_, e)) if !e.is_reportable() => {
                self.stats.ignored += 1;
                return None;
            }
            Err((stage, e)) => {
                warn!("⚠️  [{}] request from 0x{:02X} failed: {}", stage, datagram.from, e);
                Err(e)
            }
        };

        // Encode
        let reply = ReplyFrame::from_outcome(&result, self.transport.max_payload());
        if result.is_ok() {
            self.stats.served += 1;
        } else {
            self.stats.errors += 1;
        }
        if reply.is_truncated() {
            self.stats.truncated += 1;
        }
        Some(reply)
    }

    async fn process(&mut self, payload: &[u8]) -> Result<Outcome, (Stage, GatewayError)> {
        let frame = Frame::parse(payload, payload.len()).map_err(|e| (Stage::Parse, e))?;
        let target = resolve_target(&frame.target_ip).map_err(|e| (Stage::Resolve, e))?;
        let request =
            decode_request(&frame.function_code, target, &frame.payload).map_err(|e| (Stage::Decode, e))?;

        info!("🔧 {}", request);
        self.sessions.execute(&request).await.map_err(|e| (Stage::Execute, e))
    }

    pub fn log_stats(&self) {
        let s = &self.stats;
        info!("📊 Gateway statistics:");
        info!("   📥 Received: {} (dropped {}, ignored {})", s.received, s.dropped, s.ignored);
        info!("   ✅ Served: {}  ❌ Errors: {}  ✂️  Truncated: {}", s.served, s.errors, s.truncated);
        info!("   📤 Reply failures: {}", s.reply_failures);
        for session in self.sessions.sessions() {
            info!(
                "   🔌 {} connected={} requests={} failures={} last used {}",
                session.target,
                session.connected,
                session.requests,
                session.failures,
                session.last_used.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::mock::MockTransport;
    use crate::modbus::mock::MockModbusClient;
    use crate::protocol::{Reply, ACK_TOKEN, ERROR_TOKEN, MAX_OPERATION_COUNT};
    use std::net::Ipv4Addr;

    const CENTRAL: MeshAddress = 0;
    const DEVICE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 180);

    fn gateway(client: MockModbusClient) -> Gateway<MockTransport, MockModbusClient> {
        Gateway::new(
            MockTransport::default(),
            SessionManager::new(client, Duration::ZERO),
            CENTRAL,
        )
    }

    async fn exchange(gateway: &mut Gateway<MockTransport, MockModbusClient>, from: MeshAddress, frame: &str) {
        gateway.transport.push(from, frame.as_bytes());
        gateway.step().await.unwrap();
    }

    fn last_reply(gateway: &Gateway<MockTransport, MockModbusClient>) -> (String, MeshAddress) {
        let (payload, to) = gateway.transport().sent.last().cloned().unwrap();
        (String::from_utf8(payload).unwrap(), to)
    }

    #[tokio::test]
    async fn test_read_coils_scenario() {
        let client = MockModbusClient::reachable(DEVICE).with_coils(0, &[true, false, true, true]);
        let mut gateway = gateway(client);

        exchange(&mut gateway, CENTRAL, "#1#10,0,0,180#0#4\n").await;

        assert_eq!(last_reply(&gateway), ("1,0,1,1,".to_string(), CENTRAL));
        assert_eq!(gateway.stats().served, 1);
    }

    #[tokio::test]
    async fn test_write_registers_scenario() {
        let mut gateway = gateway(MockModbusClient::reachable(DEVICE));

        exchange(&mut gateway, CENTRAL, "#16#10,0,0,180#0#5,1000,1001,1002,1003,1004\n").await;

        assert_eq!(last_reply(&gateway).0, ACK_TOKEN);
        let holding = &gateway.sessions().client().holding;
        assert_eq!((0..5).map(|a| holding[&a]).collect::<Vec<_>>(), vec![1000, 1001, 1002, 1003, 1004]);
    }

    #[tokio::test]
    async fn test_unsupported_function_scenario() {
        let mut gateway = gateway(MockModbusClient::reachable(DEVICE));

        exchange(&mut gateway, CENTRAL, "#99#10,0,0,180#0#1\n").await;

        assert_eq!(last_reply(&gateway).0, ERROR_TOKEN);
        assert!(gateway.sessions().client().calls.is_empty());
        assert_eq!(gateway.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_malformed_address_scenario() {
        let mut gateway = gateway(MockModbusClient::reachable(DEVICE));

        exchange(&mut gateway, CENTRAL, "#1#10,0,0#0#1\n").await;

        assert_eq!(last_reply(&gateway).0, ERROR_TOKEN);
        assert!(gateway.sessions().client().calls.is_empty());
    }

    #[tokio::test]
    async fn test_foreign_sender_gets_no_reply() {
        let mut gateway = gateway(MockModbusClient::reachable(DEVICE));

        exchange(&mut gateway, 5, "#1#10,0,0,180#0#4\n").await;

        assert!(gateway.transport().sent.is_empty());
        assert!(gateway.sessions().client().calls.is_empty());
        assert_eq!(gateway.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_non_frame_is_ignored() {
        let mut gateway = gateway(MockModbusClient::reachable(DEVICE));

        exchange(&mut gateway, CENTRAL, "hello\n").await;

        assert!(gateway.transport().sent.is_empty());
        assert_eq!(gateway.stats().ignored, 1);
    }

    #[tokio::test]
    async fn test_write_count_mismatch_issues_no_write() {
        let mut gateway = gateway(MockModbusClient::reachable(DEVICE));

        exchange(&mut gateway, CENTRAL, "#16#10,0,0,180#0#5,1000,1001\n").await;

        assert_eq!(last_reply(&gateway).0, ERROR_TOKEN);
        assert!(gateway.sessions().client().calls.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_boundary() {
        let mut gateway = gateway(MockModbusClient::reachable(DEVICE));

        exchange(&mut gateway, CENTRAL, &format!("#1#10,0,0,180#0#{}\n", MAX_OPERATION_COUNT)).await;
        match Reply::parse(&last_reply(&gateway).0).unwrap() {
            Reply::Values { values, truncated } => {
                assert_eq!(values.len(), MAX_OPERATION_COUNT);
                assert!(!truncated);
            }
            other => panic!("unexpected reply {:?}", other),
        }

        exchange(&mut gateway, CENTRAL, &format!("#1#10,0,0,180#0#{}\n", MAX_OPERATION_COUNT + 1)).await;
        assert_eq!(last_reply(&gateway).0, ERROR_TOKEN);
    }

    #[tokio::test]
    async fn test_unreachable_device_reports_error() {
        let mut gateway = gateway(MockModbusClient::default());

        exchange(&mut gateway, CENTRAL, "#3#10,0,0,99#0#2\n").await;

        assert_eq!(last_reply(&gateway).0, ERROR_TOKEN);
        assert_eq!(gateway.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_reply_failure_is_counted_not_fatal() {
        let mut gateway = gateway(MockModbusClient::reachable(DEVICE));
        gateway.transport.fail_sends = true;

        exchange(&mut gateway, CENTRAL, "#4#10,0,0,180#0#1\n").await;
        exchange(&mut gateway, CENTRAL, "#4#10,0,0,180#1#1\n").await;

        assert_eq!(gateway.transport().sent.len(), 2);
        assert_eq!(gateway.stats().reply_failures, 2);
    }
}
