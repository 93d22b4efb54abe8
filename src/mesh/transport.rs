use async_trait::async_trait;

use crate::utils::error::GatewayError;

pub type MeshAddress = u8;

/// Mesh address that every node accepts.
pub const BROADCAST_ADDRESS: MeshAddress = 0xFF;

/// Largest application payload a mesh datagram can carry (RF95 frame minus
/// router and mesh headers).
pub const MESH_MAX_MESSAGE_LEN: usize = 245;

/// An addressed datagram delivered by the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub from: MeshAddress,
    pub to: MeshAddress,
    pub payload: Vec<u8>,
}

/// Reliable, acknowledged point-to-point datagram delivery.
#[async_trait]
pub trait MeshTransport: Send {
    /// Wait for the next datagram addressed to this node.
    async fn receive(&mut self) -> Result<Datagram, GatewayError>;

    /// Send `payload` to `destination` and wait for its acknowledgement.
    async fn send(&mut self, payload: &[u8], destination: MeshAddress) -> Result<(), GatewayError>;

    fn max_payload(&self) -> usize {
        MESH_MAX_MESSAGE_LEN
    }
}
