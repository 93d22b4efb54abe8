//! Scripted mesh transport used by the gateway tests.

use async_trait::async_trait;
use std::collections::VecDeque;

use super::transport::{Datagram, MeshAddress, MeshTransport};
use crate::utils::error::GatewayError;

#[derive(Default)]
pub struct MockTransport {
    pub inbound: VecDeque<Datagram>,
    pub sent: Vec<(Vec<u8>, MeshAddress)>,
    pub fail_sends: bool,
}

impl MockTransport {
    pub fn push(&mut self, from: MeshAddress, payload: &[u8]) {
        self.inbound.push_back(Datagram {
            from,
            to: 1,
            payload: payload.to_vec(),
        });
    }
}

#[async_trait]
impl MeshTransport for MockTransport {
    async fn receive(&mut self) -> Result<Datagram, GatewayError> {
        self.inbound
            .pop_front()
            .ok_or_else(|| GatewayError::IoError("no more scripted datagrams".to_string()))
    }

    async fn send(&mut self, payload: &[u8], destination: MeshAddress) -> Result<(), GatewayError> {
        self.sent.push((payload.to_vec(), destination));
        if self.fail_sends {
            return Err(GatewayError::TransportAckFailed(destination));
        }
        Ok(())
    }
}
