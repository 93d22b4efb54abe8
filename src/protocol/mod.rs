pub mod codec;
pub mod frame;
pub mod reply;
pub mod target;

use std::str::FromStr;

pub use codec::{
    decode_request, FunctionCode, OperationPayload, ParsedRequest, RegisterTable, RegisterValue,
    MAX_OPERATION_COUNT,
};
pub use frame::{Frame, FRAME_MARKER};
pub use reply::{Outcome, Reply, ReplyFrame, ACK_TOKEN, ERROR_TOKEN, TRUNCATION_MARKER};
pub use target::resolve_target;

use crate::utils::error::GatewayError;

/// Run a raw datagram through frame parsing, target resolution and payload decoding.
pub fn parse_request(buf: &[u8], len: usize) -> Result<ParsedRequest, GatewayError> {
    let frame = Frame::parse(buf, len)?;
    let target = resolve_target(&frame.target_ip)?;
    decode_request(&frame.function_code, target, &frame.payload)
}

/// Strict unsigned decimal: ASCII digits only, no sign, no whitespace.
pub(crate) fn parse_decimal<T: FromStr>(field: &str) -> Option<T> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}
