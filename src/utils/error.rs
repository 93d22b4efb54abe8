use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Datagram is not a gateway frame")]
    NotAFrame,

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Malformed target address: {0}")]
    MalformedAddress(String),

    #[error("Unsupported function code: {0}")]
    UnsupportedFunction(String),

    #[error("Malformed operation payload: {0}")]
    MalformedPayload(String),

    #[error("Modbus target unreachable: {0}")]
    ModbusUnreachable(String),

    #[error("Modbus operation failed at register {address} after {completed} successful calls: {reason}")]
    ModbusOperationFailed {
        address: u16,
        completed: usize,
        reason: String,
    },

    #[error("Reply too large: {needed} bytes needed, capacity {capacity}")]
    ReplyTooLarge { needed: usize, capacity: usize },

    #[error("No acknowledgement from mesh node {0}")]
    TransportAckFailed(u8),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Timeout occurred")]
    Timeout,
}

impl GatewayError {
    /// Whether the requesting controller should receive an error reply for this failure.
    /// `NotAFrame` traffic is silently ignored.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, GatewayError::NotAFrame)
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::IoError(err.to_string())
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        GatewayError::ConfigError(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for GatewayError {
    fn from(err: toml::ser::Error) -> Self {
        GatewayError::ConfigError(format!("TOML serialize error: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for GatewayError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        GatewayError::Timeout
    }
}
