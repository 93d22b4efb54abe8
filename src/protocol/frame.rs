use crate::utils::error::GatewayError;

/// First byte of every gateway frame; also separates the top-level fields.
pub const FRAME_MARKER: u8 = b'#';

/// A request frame split into its three top-level fields.
///
/// Field contents are not interpreted here: the target field is handled by
/// [`crate::protocol::target`], the function code and payload by
/// [`crate::protocol::codec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub function_code: String,
    pub target_ip: String,
    pub payload: String,
}

impl Frame {
    /// Parse the first `len` bytes of `buf` into a [`Frame`].
    ///
    /// Bytes past `len` are never read, so a reused receive buffer with stale
    /// contents cannot leak into the parse. Trailing `\n`, `\r\n` and NUL padding
    /// are accepted and stripped.
    pub fn parse(buf: &[u8], len: usize) -> Result<Self, GatewayError> {
        let data = &buf[..len.min(buf.len())];

        match data.first() {
            Some(&FRAME_MARKER) => {}
            _ => return Err(GatewayError::NotAFrame),
        }

        let body = trim_terminator(&data[1..]);
        let text = std::str::from_utf8(body)
            .ok()
            .filter(|s| s.is_ascii())
            .ok_or_else(|| GatewayError::MalformedFrame("frame is not ASCII".to_string()))?;

        if text.contains(['\n', '\r', '\0']) {
            return Err(GatewayError::MalformedFrame(
                "embedded line terminator".to_string(),
            ));
        }

        // The payload itself may contain the delimiter (`start#count`), so only the
        // first two delimiters split top-level fields.
        let mut fields = text.splitn(3, FRAME_MARKER as char);
        let (function_code, target_ip, payload) = match (fields.next(), fields.next(), fields.next()) {
            (Some(f), Some(t), Some(p)) => (f, t, p),
            _ => {
                return Err(GatewayError::MalformedFrame(format!(
                    "expected 3 fields in '{}'",
                    text
                )))
            }
        };

        if function_code.is_empty() || target_ip.is_empty() || payload.is_empty() {
            return Err(GatewayError::MalformedFrame(format!("empty field in '{}'", text)));
        }
        // `start#count[,values]` holds exactly one delimiter; more means extra fields.
        if payload.matches(FRAME_MARKER as char).count() > 1 {
            return Err(GatewayError::MalformedFrame(format!("too many fields in '{}'", text)));
        }

        Ok(Self {
            function_code: function_code.to_string(),
            target_ip: target_ip.to_string(),
            payload: payload.to_string(),
        })
    }
}

fn trim_terminator(mut body: &[u8]) -> &[u8] {
    while let Some((&last, rest)) = body.split_last() {
        if last == b'\0' || last == b'\n' || last == b'\r' {
            body = rest;
        } else {
            break;
        }
    }
    body
}
