use std::fmt;
use std::net::Ipv4Addr;

use super::parse_decimal;
use crate::utils::error::GatewayError;

/// Upper bound on registers/coils handled by one request.
pub const MAX_OPERATION_COUNT: usize = 64;

const PAYLOAD_DELIMITER: char = '#';
const VALUE_SEPARATOR: char = ',';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    ReadCoils,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteCoil,
    WriteRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
}

/// The Modbus data table a function code operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterTable {
    Coils,
    HoldingRegisters,
    InputRegisters,
}

impl FunctionCode {
    pub fn from_code(code: u16) -> Result<Self, GatewayError> {
        match code {
            1 => Ok(Self::ReadCoils),
            3 => Ok(Self::ReadHoldingRegisters),
            4 => Ok(Self::ReadInputRegisters),
            5 => Ok(Self::WriteCoil),
            6 => Ok(Self::WriteRegister),
            15 => Ok(Self::WriteMultipleCoils),
            16 => Ok(Self::WriteMultipleRegisters),
            other => Err(GatewayError::UnsupportedFunction(other.to_string())),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::ReadCoils => 1,
            Self::ReadHoldingRegisters => 3,
            Self::ReadInputRegisters => 4,
            Self::WriteCoil => 5,
            Self::WriteRegister => 6,
            Self::WriteMultipleCoils => 15,
            Self::WriteMultipleRegisters => 16,
        }
    }

    pub fn table(self) -> RegisterTable {
        match self {
            Self::ReadCoils | Self::WriteCoil | Self::WriteMultipleCoils => RegisterTable::Coils,
            Self::ReadHoldingRegisters | Self::WriteRegister | Self::WriteMultipleRegisters => {
                RegisterTable::HoldingRegisters
            }
            Self::ReadInputRegisters => RegisterTable::InputRegisters,
        }
    }

    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::WriteCoil | Self::WriteRegister | Self::WriteMultipleCoils | Self::WriteMultipleRegisters
        )
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadCoils => "read coils",
            Self::ReadHoldingRegisters => "read holding registers",
            Self::ReadInputRegisters => "read input registers",
            Self::WriteCoil => "write coils",
            Self::WriteRegister => "write holding registers",
            Self::WriteMultipleCoils => "write multiple coils",
            Self::WriteMultipleRegisters => "write multiple holding registers",
        };
        write!(f, "{} (fc {})", name, self.code())
    }
}

/// A single coil or register value, tagged with the table it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterValue {
    Coil(bool),
    Holding(u16),
    Input(u16),
}

impl RegisterValue {
    /// Numeric form used on the wire: coils as 0/1.
    pub fn as_u16(self) -> u16 {
        match self {
            RegisterValue::Coil(on) => on as u16,
            RegisterValue::Holding(v) | RegisterValue::Input(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationPayload {
    ReadRange { start: u16, count: u16 },
    WriteRange { start: u16, values: Vec<RegisterValue> },
}

impl OperationPayload {
    pub fn start(&self) -> u16 {
        match self {
            OperationPayload::ReadRange { start, .. } | OperationPayload::WriteRange { start, .. } => *start,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            OperationPayload::ReadRange { count, .. } => *count as usize,
            OperationPayload::WriteRange { values, .. } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check the operation count and address range, for payloads that were
    /// built directly instead of going through [`decode_request`].
    pub fn validate(&self) -> Result<(), GatewayError> {
        let count = u16::try_from(self.len())
            .ok()
            .filter(|&count| count > 0 && count as usize <= MAX_OPERATION_COUNT)
            .ok_or_else(|| {
                malformed(format!(
                    "count {} outside 1..={}",
                    self.len(),
                    MAX_OPERATION_COUNT
                ))
            })?;
        check_range(self.start(), count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub function: FunctionCode,
    pub target: Ipv4Addr,
    pub payload: OperationPayload,
}

impl fmt::Display for ParsedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} [{}..{})",
            self.function,
            self.target,
            self.payload.start(),
            self.payload.start() as usize + self.payload.len()
        )
    }
}

/// Decode the function-code and operation-payload fields of a frame.
pub fn decode_request(
    function_field: &str,
    target: Ipv4Addr,
    payload: &str,
) -> Result<ParsedRequest, GatewayError> {
    if !is_digits(function_field) {
        return Err(GatewayError::MalformedFrame(format!(
            "function code '{}' is not numeric",
            function_field
        )));
    }
    // Numeric codes too wide for u16 are unsupported too.
    let function = parse_decimal::<u16>(function_field)
        .ok_or_else(|| GatewayError::UnsupportedFunction(function_field.to_string()))
        .and_then(FunctionCode::from_code)?;

    let (start_field, tail) = payload
        .split_once(PAYLOAD_DELIMITER)
        .ok_or_else(|| malformed(format!("missing '{}' in '{}'", PAYLOAD_DELIMITER, payload)))?;
    if tail.contains(PAYLOAD_DELIMITER) {
        return Err(malformed(format!("unexpected '{}' in '{}'", PAYLOAD_DELIMITER, payload)));
    }

    let start = parse_decimal::<u16>(start_field)
        .ok_or_else(|| malformed(format!("invalid start address '{}'", start_field)))?;

    let payload = if function.is_write() {
        decode_write(function.table(), start, tail)?
    } else {
        let count = parse_count(tail)?;
        check_range(start, count)?;
        OperationPayload::ReadRange { start, count }
    };

    Ok(ParsedRequest {
        function,
        target,
        payload,
    })
}

fn decode_write(table: RegisterTable, start: u16, tail: &str) -> Result<OperationPayload, GatewayError> {
    let mut fields = tail.split(VALUE_SEPARATOR);
    // `split` always yields at least one item.
    let count = parse_count(fields.next().unwrap_or_default())?;
    check_range(start, count)?;

    let actual = fields.clone().count();
    if actual != count as usize {
        return Err(malformed(format!(
            "declared {} values but {} present",
            count, actual
        )));
    }

    let mut values = Vec::with_capacity(actual);
    for field in fields {
        let value = match table {
            RegisterTable::Coils => {
                if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(malformed(format!("invalid coil value '{}'", field)));
                }
                RegisterValue::Coil(field.bytes().any(|b| b != b'0'))
            }
            RegisterTable::HoldingRegisters => RegisterValue::Holding(
                parse_decimal::<u16>(field)
                    .ok_or_else(|| malformed(format!("invalid register value '{}'", field)))?,
            ),
            RegisterTable::InputRegisters => {
                return Err(malformed("input registers are read-only".to_string()))
            }
        };
        values.push(value);
    }

    Ok(OperationPayload::WriteRange { start, values })
}

fn parse_count(field: &str) -> Result<u16, GatewayError> {
    let count = parse_decimal::<u16>(field)
        .ok_or_else(|| malformed(format!("invalid count '{}'", field)))?;
    if count == 0 || count as usize > MAX_OPERATION_COUNT {
        return Err(malformed(format!(
            "count {} outside 1..={}",
            count, MAX_OPERATION_COUNT
        )));
    }
    Ok(count)
}

fn check_range(start: u16, count: u16) -> Result<(), GatewayError> {
    if start as usize + count as usize > u16::MAX as usize + 1 {
        return Err(malformed(format!(
            "range {}+{} exceeds the register address space",
            start, count
        )));
    }
    Ok(())
}

fn is_digits(field: &str) -> bool {
    !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit())
}

fn malformed(reason: String) -> GatewayError {
    GatewayError::MalformedPayload(reason)
}
