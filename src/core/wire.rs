//! Register wire codec for the persistent socket channel
//!
//! Frames follow the MBAP-style layout: a 7-byte header (transaction id,
//! protocol id, length, unit id) followed by the function PDU. Only the two
//! functions the channel needs are implemented: read holding registers and
//! write multiple registers. Samples always live at register base address 0.

use thiserror::Error;

/// Base register address for sample reads and writes
pub const REGISTER_BASE: u16 = 0;

/// Fixed MBAP header length in bytes
pub const HEADER_LEN: usize = 7;

/// Read Holding Registers function code
pub const FN_READ_REGISTERS: u8 = 0x03;

/// Write Multiple Registers function code
pub const FN_WRITE_REGISTERS: u8 = 0x10;

/// Largest register count a single write frame can carry (protocol cap for
/// write-multiple; also keeps the one-byte byte-count field from wrapping)
pub const MAX_WRITE_REGISTERS: usize = 123;

/// Wire-level decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Frame shorter than the minimum for its shape
    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    /// Header declared a protocol id other than 0
    #[error("Invalid protocol id: {0:#06x}")]
    InvalidProtocolId(u16),

    /// Header length field disagrees with the received body
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame {
        /// Length the header promised
        expected: usize,
        /// Length actually received
        actual: usize,
    },

    /// Function code the codec does not handle
    #[error("Unknown function code: {0:#04x}")]
    UnknownFunction(u8),
}

/// Decoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireResponse {
    /// Register values returned by a read
    Registers(Vec<u16>),
    /// Acknowledgement of a multi-register write
    WriteAck {
        /// Starting address that was written
        address: u16,
        /// Number of registers written
        quantity: u16,
    },
    /// Exception reported by the remote side
    Exception(u8),
}

/// Build a read request for `quantity` registers at the base address.
pub fn build_read_request(transaction_id: u16, quantity: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(FN_READ_REGISTERS);
    pdu.extend_from_slice(&REGISTER_BASE.to_be_bytes());
    pdu.extend_from_slice(&quantity.to_be_bytes());
    wrap_frame(transaction_id, &pdu)
}

/// Build a write request for the given register values at the base address.
pub fn build_write_request(transaction_id: u16, values: &[u16]) -> Vec<u8> {
    let quantity = values.len() as u16;
    let byte_count = (values.len() * 2) as u8;

    let mut pdu = Vec::with_capacity(6 + values.len() * 2);
    pdu.push(FN_WRITE_REGISTERS);
    pdu.extend_from_slice(&REGISTER_BASE.to_be_bytes());
    pdu.extend_from_slice(&quantity.to_be_bytes());
    pdu.push(byte_count);
    for value in values {
        pdu.extend_from_slice(&value.to_be_bytes());
    }
    wrap_frame(transaction_id, &pdu)
}

/// Prefix a PDU with the MBAP header.
fn wrap_frame(transaction_id: u16, pdu: &[u8]) -> Vec<u8> {
    let length = (pdu.len() + 1) as u16; // +1 for the unit id
    let mut frame = Vec::with_capacity(HEADER_LEN + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes()); // protocol id
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(0); // unit id
    frame.extend_from_slice(pdu);
    frame
}

/// Body length promised by a header, excluding the unit id byte.
///
/// Callers read `HEADER_LEN` bytes first, then exactly this many more.
pub fn body_len(header: &[u8]) -> Result<usize, WireError> {
    if header.len() < HEADER_LEN {
        return Err(WireError::FrameTooShort(header.len()));
    }
    let protocol_id = u16::from_be_bytes([header[2], header[3]]);
    if protocol_id != 0 {
        return Err(WireError::InvalidProtocolId(protocol_id));
    }
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    if length < 1 {
        return Err(WireError::IncompleteFrame { expected: 1, actual: 0 });
    }
    Ok(length - 1)
}

/// Parse a complete frame (header + body) into a response.
pub fn parse_response(frame: &[u8]) -> Result<WireResponse, WireError> {
    if frame.len() < HEADER_LEN + 1 {
        return Err(WireError::FrameTooShort(frame.len()));
    }
    let expected = HEADER_LEN + body_len(&frame[..HEADER_LEN])?;
    if frame.len() < expected {
        return Err(WireError::IncompleteFrame {
            expected,
            actual: frame.len(),
        });
    }

    let function = frame[HEADER_LEN];

    // Exception responses set bit 7 of the function code
    if function & 0x80 != 0 {
        if frame.len() < HEADER_LEN + 2 {
            return Err(WireError::FrameTooShort(frame.len()));
        }
        return Ok(WireResponse::Exception(frame[HEADER_LEN + 1]));
    }

    match function {
        FN_READ_REGISTERS => {
            if frame.len() < HEADER_LEN + 2 {
                return Err(WireError::FrameTooShort(frame.len()));
            }
            let byte_count = frame[HEADER_LEN + 1] as usize;
            let data_start = HEADER_LEN + 2;
            if frame.len() < data_start + byte_count {
                return Err(WireError::IncompleteFrame {
                    expected: data_start + byte_count,
                    actual: frame.len(),
                });
            }
            Ok(WireResponse::Registers(parse_registers(
                &frame[data_start..data_start + byte_count],
            )))
        }
        FN_WRITE_REGISTERS => {
            if frame.len() < HEADER_LEN + 5 {
                return Err(WireError::FrameTooShort(frame.len()));
            }
            let address = u16::from_be_bytes([frame[HEADER_LEN + 1], frame[HEADER_LEN + 2]]);
            let quantity = u16::from_be_bytes([frame[HEADER_LEN + 3], frame[HEADER_LEN + 4]]);
            Ok(WireResponse::WriteAck { address, quantity })
        }
        other => Err(WireError::UnknownFunction(other)),
    }
}

/// Split big-endian register data into values.
pub fn parse_registers(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Build a read response frame (used by test fixtures and simulators).
pub fn build_read_response(transaction_id: u16, values: &[u16]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(2 + values.len() * 2);
    pdu.push(FN_READ_REGISTERS);
    pdu.push((values.len() * 2) as u8);
    for value in values {
        pdu.extend_from_slice(&value.to_be_bytes());
    }
    wrap_frame(transaction_id, &pdu)
}

/// Build a write acknowledgement frame (used by test fixtures and simulators).
pub fn build_write_ack(transaction_id: u16, quantity: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(FN_WRITE_REGISTERS);
    pdu.extend_from_slice(&REGISTER_BASE.to_be_bytes());
    pdu.extend_from_slice(&quantity.to_be_bytes());
    wrap_frame(transaction_id, &pdu)
}

/// Build an exception frame (used by test fixtures and simulators).
pub fn build_exception(transaction_id: u16, function: u8, code: u8) -> Vec<u8> {
    wrap_frame(transaction_id, &[function | 0x80, code])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_request_layout() {
        let frame = build_read_request(7, 10);
        assert_eq!(frame.len(), HEADER_LEN + 5);
        assert_eq!(u16::from_be_bytes([frame[0], frame[1]]), 7);
        assert_eq!(frame[HEADER_LEN], FN_READ_REGISTERS);
        assert_eq!(u16::from_be_bytes([frame[10], frame[11]]), 10);
    }

    #[test]
    fn test_write_request_layout() {
        let frame = build_write_request(3, &[100, 300]);
        assert_eq!(frame[HEADER_LEN], FN_WRITE_REGISTERS);
        // quantity
        assert_eq!(u16::from_be_bytes([frame[10], frame[11]]), 2);
        // byte count
        assert_eq!(frame[12], 4);
        assert_eq!(parse_registers(&frame[13..]), vec![100, 300]);
    }

    #[test]
    fn test_write_request_byte_count_at_cap() {
        // 123 registers is the largest batch whose byte count (246) still
        // fits the one-byte field.
        let values = vec![1u16; MAX_WRITE_REGISTERS];
        let frame = build_write_request(9, &values);
        assert_eq!(
            u16::from_be_bytes([frame[10], frame[11]]),
            MAX_WRITE_REGISTERS as u16
        );
        assert_eq!(frame[12], (MAX_WRITE_REGISTERS * 2) as u8);
        assert_eq!(frame.len(), HEADER_LEN + 6 + MAX_WRITE_REGISTERS * 2);
    }

    #[test]
    fn test_parse_read_response() {
        let frame = build_read_response(1, &[450, 612]);
        let response = parse_response(&frame).unwrap();
        assert_eq!(response, WireResponse::Registers(vec![450, 612]));
    }

    #[test]
    fn test_parse_write_ack() {
        let frame = build_write_ack(1, 5);
        let response = parse_response(&frame).unwrap();
        assert_eq!(
            response,
            WireResponse::WriteAck {
                address: REGISTER_BASE,
                quantity: 5
            }
        );
    }

    #[test]
    fn test_parse_exception() {
        let frame = build_exception(1, FN_READ_REGISTERS, 0x02);
        let response = parse_response(&frame).unwrap();
        assert_eq!(response, WireResponse::Exception(0x02));
    }

    #[test]
    fn test_rejects_bad_protocol_id() {
        let mut frame = build_read_response(1, &[1]);
        frame[2] = 0xFF;
        assert!(matches!(
            parse_response(&frame),
            Err(WireError::InvalidProtocolId(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_frame() {
        let frame = build_read_response(1, &[450, 612]);
        assert!(parse_response(&frame[..frame.len() - 2]).is_err());
    }

    #[test]
    fn test_body_len() {
        let frame = build_read_request(1, 4);
        let body = body_len(&frame[..HEADER_LEN]).unwrap();
        assert_eq!(HEADER_LEN + body, frame.len());
    }
}
