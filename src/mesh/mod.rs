pub mod transport;
pub mod udp;

#[cfg(test)]
pub(crate) mod mock;

pub use transport::{Datagram, MeshAddress, MeshTransport, BROADCAST_ADDRESS, MESH_MAX_MESSAGE_LEN};
pub use udp::UdpMeshTransport;
