use log::warn;

use super::codec::RegisterValue;
use super::parse_decimal;
use crate::utils::error::GatewayError;

/// Reply sent for a successful write.
pub const ACK_TOKEN: &str = "OK";
/// Reply sent for any failure. Never a valid data reply.
pub const ERROR_TOKEN: &str = "ERR";
/// Appended after the last value when a read result did not fit.
pub const TRUNCATION_MARKER: &str = "TRUNC";
/// Smallest capacity that can hold every fixed token.
pub const MIN_REPLY_CAPACITY: usize = 8;

const VALUE_SEPARATOR: u8 = b',';

/// Successful result of executing a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Values(Vec<RegisterValue>),
    Written,
}

/// Encoded reply datagram. Never longer than the capacity it was built with,
/// once that capacity is raised to [`MIN_REPLY_CAPACITY`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFrame {
    bytes: Vec<u8>,
    truncated: bool,
}

impl ReplyFrame {
    pub fn ack() -> Self {
        Self::token(ACK_TOKEN)
    }

    pub fn error() -> Self {
        Self::token(ERROR_TOKEN)
    }

    fn token(token: &str) -> Self {
        Self {
            bytes: token.as_bytes().to_vec(),
            truncated: false,
        }
    }

    /// Encode read values as `v1,v2,...,vN,`.
    ///
    /// When the full list exceeds `capacity`, as many values as fit are kept and
    /// [`TRUNCATION_MARKER`] is appended in place of the rest. Capacities below
    /// [`MIN_REPLY_CAPACITY`] are raised to it so the marker always fits.
    pub fn values(values: &[RegisterValue], capacity: usize) -> Self {
        let capacity = capacity.max(MIN_REPLY_CAPACITY);
        let encoded: Vec<String> = values.iter().map(|v| v.as_u16().to_string()).collect();
        let needed: usize = encoded.iter().map(|s| s.len() + 1).sum();

        let mut bytes = Vec::with_capacity(needed.min(capacity));
        if needed <= capacity {
            for value in &encoded {
                bytes.extend_from_slice(value.as_bytes());
                bytes.push(VALUE_SEPARATOR);
            }
            return Self {
                bytes,
                truncated: false,
            };
        }

        warn!(
            "✂️  {}",
            GatewayError::ReplyTooLarge { needed, capacity }
        );
        let budget = capacity - TRUNCATION_MARKER.len();
        for value in &encoded {
            if bytes.len() + value.len() + 1 > budget {
                break;
            }
            bytes.extend_from_slice(value.as_bytes());
            bytes.push(VALUE_SEPARATOR);
        }
        bytes.extend_from_slice(TRUNCATION_MARKER.as_bytes());

        Self {
            bytes,
            truncated: true,
        }
    }

    pub fn from_outcome(result: &Result<Outcome, GatewayError>, capacity: usize) -> Self {
        match result {
            Ok(Outcome::Values(values)) => Self::values(values, capacity),
            Ok(Outcome::Written) => Self::ack(),
            Err(_) => Self::error(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn is_error(&self) -> bool {
        self.bytes == ERROR_TOKEN.as_bytes()
    }
}

/// A reply as seen by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Values { values: Vec<u16>, truncated: bool },
    Ack,
    Error,
}

impl Reply {
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        let text = text.trim_end_matches(['\n', '\r', '\0']);
        match text {
            ACK_TOKEN => return Ok(Reply::Ack),
            ERROR_TOKEN => return Ok(Reply::Error),
            "" => return Err(GatewayError::MalformedFrame("empty reply".to_string())),
            _ => {}
        }

        let mut fields: Vec<&str> = text.split(VALUE_SEPARATOR as char).collect();
        if fields.last() == Some(&"") {
            fields.pop();
        }
        let truncated = fields.last() == Some(&TRUNCATION_MARKER);
        if truncated {
            fields.pop();
        }

        let values = fields
            .iter()
            .map(|f| {
                parse_decimal::<u16>(f)
                    .ok_or_else(|| GatewayError::MalformedFrame(format!("invalid reply value '{}'", f)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Reply::Values { values, truncated })
    }
}
