//! Framed sub-protocol of register-mapped devices.
//!
//! ```text
//! +-------+-----+--------+--------+-------+--------------+----------+
//! | 0x1B  | SEQ | LEN_HI | LEN_LO | 0x0E  | BODY (LEN)   | CHECKSUM |
//! +-------+-----+--------+--------+-------+--------------+----------+
//! ```
//!
//! The checksum is the XOR of every preceding byte of the frame. A reply
//! carries the sequence number of its request; its body starts with the
//! command byte echoed back followed by a status byte (`0x00` = OK).

use crate::error::{BenchError, BenchResult};
use bytes::{BufMut, Bytes, BytesMut};

/// First byte of every frame.
pub const MESSAGE_START: u8 = 0x1B;
/// Marker between the header and the body.
pub const TOKEN: u8 = 0x0E;
/// Bytes before the body.
pub const HEADER_LEN: usize = 5;
/// Largest body a device accepts.
pub const MAX_BODY_LEN: usize = 512;
/// Status byte for success.
pub const STATUS_OK: u8 = 0x00;

/// Sign-on: the device answers with its identification string.
pub const CMD_SIGN_ON: u8 = 0x01;
/// Read one 16-bit value.
pub const CMD_READ_VALUE: u8 = 0x20;
/// Write one 16-bit value.
pub const CMD_WRITE_VALUE: u8 = 0x21;

/// XOR checksum over `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Build a complete frame around `body`.
pub fn encode(seq: u8, body: &[u8]) -> BenchResult<Bytes> {
    if body.is_empty() || body.len() > MAX_BODY_LEN {
        return Err(BenchError::Frame(format!(
            "body length {} outside 1..={}",
            body.len(),
            MAX_BODY_LEN
        )));
    }
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len() + 1);
    buf.put_u8(MESSAGE_START);
    buf.put_u8(seq);
    buf.put_u16(body.len() as u16);
    buf.put_u8(TOKEN);
    buf.put_slice(body);
    let sum = checksum(&buf);
    buf.put_u8(sum);
    Ok(buf.freeze())
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Sequence number.
    pub seq: u8,
    /// Number of body bytes that follow.
    pub body_len: usize,
}

/// Validate the fixed header bytes.
pub fn decode_header(header: &[u8]) -> BenchResult<FrameHeader> {
    if header.len() != HEADER_LEN {
        return Err(BenchError::Frame(format!(
            "header must be {} bytes, got {}",
            HEADER_LEN,
            header.len()
        )));
    }
    if header[0] != MESSAGE_START {
        return Err(BenchError::Frame(format!(
            "bad start byte 0x{:02X}",
            header[0]
        )));
    }
    if header[4] != TOKEN {
        return Err(BenchError::Frame(format!("bad token 0x{:02X}", header[4])));
    }
    let body_len = usize::from(u16::from_be_bytes([header[2], header[3]]));
    if body_len == 0 || body_len > MAX_BODY_LEN {
        return Err(BenchError::Frame(format!("body length {} out of range", body_len)));
    }
    Ok(FrameHeader {
        seq: header[1],
        body_len,
    })
}

/// Check the trailing checksum of a frame split into header and remainder
/// (`rest` = body followed by the checksum byte).
pub fn verify(header: &[u8], rest: &[u8]) -> BenchResult<()> {
    let (body, sum) = match rest.split_last() {
        Some((sum, body)) => (body, *sum),
        None => return Err(BenchError::Frame("missing checksum".into())),
    };
    let expected = checksum(header) ^ checksum(body);
    if expected != sum {
        return Err(BenchError::Frame(format!(
            "checksum mismatch: expected 0x{:02X}, got 0x{:02X}",
            expected, sum
        )));
    }
    Ok(())
}

/// Decode one complete frame held in memory. Returns `(seq, body)`.
pub fn decode(frame: &[u8]) -> BenchResult<(u8, Vec<u8>)> {
    if frame.len() < HEADER_LEN + 2 {
        return Err(BenchError::Frame(format!("frame too short: {} bytes", frame.len())));
    }
    let (header, rest) = frame.split_at(HEADER_LEN);
    let parsed = decode_header(header)?;
    if rest.len() != parsed.body_len + 1 {
        return Err(BenchError::Frame(format!(
            "length field says {} body bytes, frame holds {}",
            parsed.body_len,
            rest.len().saturating_sub(1)
        )));
    }
    verify(header, rest)?;
    Ok((parsed.seq, rest[..parsed.body_len].to_vec()))
}

/// Requests of the register sub-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterRequest {
    /// Ask the device to identify itself.
    SignOn,
    /// Read the 16-bit value at `address`.
    ReadValue {
        /// Register address.
        address: u16,
    },
    /// Write `value` to `address`.
    WriteValue {
        /// Register address.
        address: u16,
        /// Raw 16-bit value.
        value: u16,
    },
}

impl RegisterRequest {
    /// Command byte.
    pub fn command(&self) -> u8 {
        match self {
            RegisterRequest::SignOn => CMD_SIGN_ON,
            RegisterRequest::ReadValue { .. } => CMD_READ_VALUE,
            RegisterRequest::WriteValue { .. } => CMD_WRITE_VALUE,
        }
    }

    /// Request body.
    pub fn body(&self) -> Vec<u8> {
        let mut body = vec![self.command()];
        match self {
            RegisterRequest::SignOn => {}
            RegisterRequest::ReadValue { address } => body.extend_from_slice(&address.to_be_bytes()),
            RegisterRequest::WriteValue { address, value } => {
                body.extend_from_slice(&address.to_be_bytes());
                body.extend_from_slice(&value.to_be_bytes());
            }
        }
        body
    }
}

/// Validate a reply body against its request and return the payload after
/// the command and status bytes.
pub fn reply_payload(request: &RegisterRequest, body: &[u8]) -> BenchResult<Vec<u8>> {
    let command = request.command();
    match body {
        [echo, ..] if *echo != command => Err(BenchError::Frame(format!(
            "reply to 0x{:02X} echoes 0x{:02X}",
            command, echo
        ))),
        [_, status, ..] if *status != STATUS_OK => Err(BenchError::DeviceStatus {
            command,
            status: *status,
        }),
        [_, _, payload @ ..] => Ok(payload.to_vec()),
        _ => Err(BenchError::Frame(format!(
            "reply to 0x{:02X} too short ({} bytes)",
            command,
            body.len()
        ))),
    }
}

/// Payload of a read-value reply as a 16-bit word.
pub fn word(payload: &[u8]) -> BenchResult<u16> {
    match payload {
        [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(BenchError::Frame(format!(
            "expected 2-byte value, got {} bytes",
            payload.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout() {
        let frame = encode(7, &[CMD_READ_VALUE, 0x01, 0x00]).unwrap();
        assert_eq!(&frame[..HEADER_LEN], &[0x1B, 7, 0x00, 0x03, 0x0E]);
        assert_eq!(&frame[HEADER_LEN..HEADER_LEN + 3], &[0x20, 0x01, 0x00]);
        assert_eq!(checksum(&frame), 0, "XOR over a whole frame cancels out");
    }

    #[test]
    fn decode_accepts_encoded_frame() {
        let body = RegisterRequest::WriteValue { address: 0x0102, value: 1 }.body();
        let frame = encode(42, &body).unwrap();
        let (seq, decoded) = decode(&frame).unwrap();
        assert_eq!(seq, 42);
        assert_eq!(decoded, vec![0x21, 0x01, 0x02, 0x00, 0x01]);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut frame = encode(1, &[CMD_SIGN_ON]).unwrap().to_vec();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(matches!(decode(&frame), Err(BenchError::Frame(_))));
    }

    #[test]
    fn bad_header_is_rejected() {
        assert!(decode_header(&[0x1C, 0, 0, 1, 0x0E]).is_err());
        assert!(decode_header(&[0x1B, 0, 0, 1, 0x0F]).is_err());
        assert!(decode_header(&[0x1B, 0, 0, 0, 0x0E]).is_err());
        assert!(encode(0, &[]).is_err());
    }

    #[test]
    fn reply_status_is_checked() {
        let request = RegisterRequest::ReadValue { address: 4 };
        assert_eq!(
            reply_payload(&request, &[CMD_READ_VALUE, STATUS_OK, 0x00, 0x2A]).unwrap(),
            vec![0x00, 0x2A]
        );
        assert!(matches!(
            reply_payload(&request, &[CMD_READ_VALUE, 0xC0]),
            Err(BenchError::DeviceStatus { command: 0x20, status: 0xC0 })
        ));
        assert!(matches!(
            reply_payload(&request, &[CMD_WRITE_VALUE, STATUS_OK]),
            Err(BenchError::Frame(_))
        ));
        assert!(reply_payload(&request, &[CMD_READ_VALUE]).is_err());
    }

    #[test]
    fn word_needs_two_bytes() {
        assert_eq!(word(&[0x01, 0x02]).unwrap(), 0x0102);
        assert!(word(&[0x01]).is_err());
    }
}
