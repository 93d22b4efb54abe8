use std::net::Ipv4Addr;

use super::parse_decimal;
use crate::utils::error::GatewayError;

/// Resolve the `target-ip` field (`a,b,c,d`) into an IPv4 address.
pub fn resolve_target(field: &str) -> Result<Ipv4Addr, GatewayError> {
    let parts: Vec<&str> = field.split(',').collect();
    if parts.len() != 4 {
        return Err(GatewayError::MalformedAddress(format!(
            "expected 4 octets, found {} in '{}'",
            parts.len(),
            field
        )));
    }

    let mut octets = [0u8; 4];
    for (slot, part) in octets.iter_mut().zip(&parts) {
        *slot = parse_decimal::<u8>(part).ok_or_else(|| {
            GatewayError::MalformedAddress(format!("invalid octet '{}' in '{}'", part, field))
        })?;
    }

    Ok(Ipv4Addr::from(octets))
}
