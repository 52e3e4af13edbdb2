use std::fmt::Write as _;
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::constants::READ_QUANTITY_MAX;
use crate::error::TransportError;

pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

const EXCEPTION_FLAG: u8 = 0x80;

/// unit + function + byte count/exception code: enough to know the rest of the frame
const RESPONSE_HEADER_LEN: usize = 3;
const WRITE_RESPONSE_LEN: usize = 8;
const CRC_LEN: usize = 2;

const IDLE_BACKOFF: Duration = Duration::from_millis(1);

pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Appends the CRC low byte first, as RTU framing requires.
pub fn append_crc(frame: &[u8]) -> Vec<u8> {
    let crc = crc16_modbus(frame);
    let mut out = Vec::with_capacity(frame.len() + CRC_LEN);
    out.extend_from_slice(frame);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

pub fn validate_crc(frame: &[u8]) -> Result<(), TransportError> {
    if frame.len() < 4 {
        return Err(TransportError::FrameTooShort(frame.len()));
    }
    let body_len = frame.len() - CRC_LEN;
    let expected = crc16_modbus(&frame[..body_len]);
    let seen = u16::from_le_bytes([frame[body_len], frame[body_len + 1]]);
    if expected != seen {
        return Err(TransportError::InvalidCrc { expected, seen });
    }
    Ok(())
}

pub fn check_read_quantity(count: u16) -> Result<(), TransportError> {
    if count == 0 || count > READ_QUANTITY_MAX {
        return Err(TransportError::InvalidQuantity(count));
    }
    Ok(())
}

pub fn build_read_request(unit: u8, start: u16, count: u16) -> Result<Vec<u8>, TransportError> {
    check_read_quantity(count)?;
    let [start_hi, start_lo] = start.to_be_bytes();
    let [count_hi, count_lo] = count.to_be_bytes();
    Ok(append_crc(&[
        unit,
        FC_READ_HOLDING_REGISTERS,
        start_hi,
        start_lo,
        count_hi,
        count_lo,
    ]))
}

pub fn build_write_request(unit: u8, address: u16, value: u16) -> Vec<u8> {
    let [address_hi, address_lo] = address.to_be_bytes();
    let [value_hi, value_lo] = value.to_be_bytes();
    append_crc(&[
        unit,
        FC_WRITE_SINGLE_REGISTER,
        address_hi,
        address_lo,
        value_hi,
        value_lo,
    ])
}

/// Sends `request` and blocks until the matching response frame for `function`
/// has been read in full or `timeout` elapses.
pub fn exchange<P: Read + Write + ?Sized>(
    port: &mut P,
    request: &[u8],
    unit: u8,
    function: u8,
    timeout: Duration,
) -> Result<Vec<u8>, TransportError> {
    debug!(frame = %hex(request), "tx");
    port.write_all(request)?;
    port.flush()?;
    let response = read_response(port, unit, function, timeout)?;
    debug!(frame = %hex(&response), "rx");
    Ok(response)
}

pub fn read_response<R: Read + ?Sized>(
    port: &mut R,
    unit: u8,
    function: u8,
    timeout: Duration,
) -> Result<Vec<u8>, TransportError> {
    let deadline = Instant::now() + timeout;
    let mut frame = read_exact_until(port, RESPONSE_HEADER_LEN, deadline)?;
    let seen_unit = frame[0];
    let seen_function = frame[1];

    if seen_unit != unit {
        return Err(TransportError::UnitMismatch {
            expected: unit,
            seen: seen_unit,
        });
    }

    if seen_function == (function | EXCEPTION_FLAG) {
        let tail = read_exact_until(port, CRC_LEN, deadline)?;
        frame.extend_from_slice(&tail);
        validate_crc(&frame)?;
        return Err(TransportError::Exception {
            function,
            code: frame[2].into(),
        });
    }

    if seen_function != function {
        return Err(TransportError::FunctionMismatch {
            expected: function,
            seen: seen_function,
        });
    }

    let remaining = if function == FC_READ_HOLDING_REGISTERS {
        usize::from(frame[2]) + CRC_LEN
    } else {
        WRITE_RESPONSE_LEN - RESPONSE_HEADER_LEN
    };
    let tail = read_exact_until(port, remaining, deadline)?;
    frame.extend_from_slice(&tail);
    Ok(frame)
}

pub fn parse_read_response(frame: &[u8], unit: u8, count: u16) -> Result<Vec<u16>, TransportError> {
    validate_crc(frame)?;
    if frame.len() < 5 {
        return Err(TransportError::FrameTooShort(frame.len()));
    }
    check_header(frame, unit, FC_READ_HOLDING_REGISTERS)?;

    let expected_bytes = usize::from(count) * 2;
    let byte_count = usize::from(frame[2]);
    if byte_count != expected_bytes {
        return Err(TransportError::LengthMismatch {
            expected: expected_bytes,
            seen: byte_count,
        });
    }
    if frame.len() != byte_count + 5 {
        return Err(TransportError::LengthMismatch {
            expected: byte_count + 5,
            seen: frame.len(),
        });
    }

    let values = frame[3..3 + byte_count]
        .chunks_exact(2)
        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
        .collect();
    Ok(values)
}

pub fn parse_write_response(
    frame: &[u8],
    unit: u8,
    address: u16,
    value: u16,
) -> Result<(), TransportError> {
    validate_crc(frame)?;
    if frame.len() != WRITE_RESPONSE_LEN {
        return Err(TransportError::LengthMismatch {
            expected: WRITE_RESPONSE_LEN,
            seen: frame.len(),
        });
    }
    check_header(frame, unit, FC_WRITE_SINGLE_REGISTER)?;

    let echo_address = u16::from_be_bytes([frame[2], frame[3]]);
    let echo_value = u16::from_be_bytes([frame[4], frame[5]]);
    if echo_address != address || echo_value != value {
        return Err(TransportError::EchoMismatch {
            address,
            value,
            echo_address,
            echo_value,
        });
    }
    Ok(())
}

fn check_header(frame: &[u8], unit: u8, function: u8) -> Result<(), TransportError> {
    if frame[0] != unit {
        return Err(TransportError::UnitMismatch {
            expected: unit,
            seen: frame[0],
        });
    }
    if frame[1] == (function | EXCEPTION_FLAG) {
        return Err(TransportError::Exception {
            function,
            code: frame[2].into(),
        });
    }
    if frame[1] != function {
        return Err(TransportError::FunctionMismatch {
            expected: function,
            seen: frame[1],
        });
    }
    Ok(())
}

/// Reads exactly `len` bytes, giving up once `deadline` has passed.
pub fn read_exact_until<R: Read + ?Sized>(
    port: &mut R,
    len: usize,
    deadline: Instant,
) -> Result<Vec<u8>, TransportError> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;

    while filled < len {
        match port.read(&mut buf[filled..]) {
            Ok(0) => thread::sleep(IDLE_BACKOFF),
            Ok(read) => filled += read,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(err) => return Err(err.into()),
        }

        if filled < len && Instant::now() >= deadline {
            return Err(TransportError::Timeout {
                expected: len,
                received: filled,
            });
        }
    }

    trace!(bytes = %hex(&buf), "read");
    Ok(buf)
}

pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02X}");
    }
    out
}
