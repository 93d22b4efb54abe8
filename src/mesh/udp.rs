//! Mesh transport bridged over UDP.
//!
//! Each UDP packet carries one mesh frame: a four byte header
//! `[to, from, id, flags]` followed by the payload. A frame with
//! [`FLAG_ACK`] set acknowledges the DATA frame with the same `id`.
//! The UDP peer for a mesh address is learned from the frames it sends.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

use super::transport::{Datagram, MeshAddress, MeshTransport, BROADCAST_ADDRESS, MESH_MAX_MESSAGE_LEN};
use crate::config::settings::MeshSettings;
use crate::utils::error::GatewayError;

pub const HEADER_LEN: usize = 4;
pub const FLAG_ACK: u8 = 0x80;

const MAX_PACKET_LEN: usize = HEADER_LEN + MESH_MAX_MESSAGE_LEN;

enum Inbound {
    Data(Datagram),
    Ack { from: MeshAddress, id: u8 },
}

pub struct UdpMeshTransport {
    socket: UdpSocket,
    node_address: MeshAddress,
    ack_timeout: Duration,
    retries: u8,
    routes: HashMap<MeshAddress, SocketAddr>,
    last_delivered: HashMap<MeshAddress, u8>,
    pending: VecDeque<Datagram>,
    next_id: u8,
}

impl UdpMeshTransport {
    pub async fn bind(settings: &MeshSettings) -> Result<Self, GatewayError> {
        let socket = UdpSocket::bind(&settings.bind_address).await.map_err(|e| {
            GatewayError::IoError(format!("Failed to bind mesh socket {}: {}", settings.bind_address, e))
        })?;
        info!(
            "📡 Mesh node 0x{:02X} listening on {}",
            settings.node_address,
            socket.local_addr()?
        );

        Ok(Self {
            socket,
            node_address: settings.node_address,
            ack_timeout: Duration::from_millis(settings.ack_timeout_ms),
            retries: settings.retries,
            routes: HashMap::new(),
            last_delivered: HashMap::new(),
            pending: VecDeque::new(),
            next_id: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, GatewayError> {
        Ok(self.socket.local_addr()?)
    }

    /// Pre-seed the UDP peer of a mesh address.
    pub fn add_route(&mut self, address: MeshAddress, peer: SocketAddr) {
        self.routes.insert(address, peer);
    }

    async fn accept_packet(&mut self, packet: &[u8], peer: SocketAddr) -> Result<Option<Inbound>, GatewayError> {
        if packet.len() < HEADER_LEN {
            debug!("Dropping runt packet ({} bytes) from {}", packet.len(), peer);
            return Ok(None);
        }
        let (to, from, id, flags) = (packet[0], packet[1], packet[2], packet[3]);
        if to != self.node_address && to != BROADCAST_ADDRESS {
            return Ok(None);
        }
        self.routes.insert(from, peer);

        if flags & FLAG_ACK != 0 {
            return Ok(Some(Inbound::Ack { from, id }));
        }

        let payload = &packet[HEADER_LEN..];
        if payload.len() > MESH_MAX_MESSAGE_LEN {
            warn!("Dropping oversized datagram ({} bytes) from 0x{:02X}", payload.len(), from);
            return Ok(None);
        }

        if to == self.node_address {
            let ack = [from, self.node_address, id, FLAG_ACK];
            self.socket.send_to(&ack, peer).await?;

            if self.last_delivered.get(&from) == Some(&id) {
                debug!("Duplicate datagram {} from 0x{:02X} re-acknowledged", id, from);
                return Ok(None);
            }
            self.last_delivered.insert(from, id);
        }

        Ok(Some(Inbound::Data(Datagram {
            from,
            to,
            payload: payload.to_vec(),
        })))
    }
}

#[async_trait]
impl MeshTransport for UdpMeshTransport {
    async fn receive(&mut self) -> Result<Datagram, GatewayError> {
        if let Some(datagram) = self.pending.pop_front() {
            return Ok(datagram);
        }

        let mut buf = [0u8; MAX_PACKET_LEN + 1];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            if let Some(Inbound::Data(datagram)) = self.accept_packet(&buf[..len], peer).await? {
                return Ok(datagram);
            }
        }
    }

    async fn send(&mut self, payload: &[u8], destination: MeshAddress) -> Result<(), GatewayError> {
        if payload.len() > MESH_MAX_MESSAGE_LEN {
            return Err(GatewayError::ReplyTooLarge {
                needed: payload.len(),
                capacity: MESH_MAX_MESSAGE_LEN,
            });
        }
        let peer = match self.routes.get(&destination) {
            Some(peer) => *peer,
            None => {
                warn!("No route to mesh node 0x{:02X}", destination);
                return Err(GatewayError::TransportAckFailed(destination));
            }
        };

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
        packet.extend_from_slice(&[destination, self.node_address, id, 0]);
        packet.extend_from_slice(payload);

        let mut buf = [0u8; MAX_PACKET_LEN + 1];
        for attempt in 0..=self.retries {
            if attempt > 0 {
                debug!("🔁 Retransmitting {} to 0x{:02X} (attempt {})", id, destination, attempt + 1);
            }
            self.socket.send_to(&packet, peer).await?;

            let deadline = Instant::now() + self.ack_timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let (len, from_peer) = match timeout(remaining, self.socket.recv_from(&mut buf)).await {
                    Ok(received) => received?,
                    Err(_) => break,
                };
                match self.accept_packet(&buf[..len], from_peer).await? {
                    Some(Inbound::Ack { from, id: acked }) if from == destination && acked == id => {
                        return Ok(());
                    }
                    Some(Inbound::Data(datagram)) => self.pending.push_back(datagram),
                    _ => {}
                }
            }
        }

        Err(GatewayError::TransportAckFailed(destination))
    }
}
