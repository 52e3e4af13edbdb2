use std::fmt;
use std::io;

use thiserror::Error;

/// Exception codes a slave may return with the high bit of the function code set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    SlaveDeviceFailure,
    Other(u8),
}

impl ExceptionCode {
    pub const fn code(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::SlaveDeviceFailure => 0x04,
            Self::Other(code) => code,
        }
    }
}

impl From<u8> for ExceptionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::SlaveDeviceFailure,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::SlaveDeviceFailure => "slave device failure",
            Self::Other(_) => "unknown exception",
        };
        write!(f, "{name} (0x{:02X})", self.code())
    }
}

#[derive(Debug, Error)]
#[error("open serial port {port} at {baud} baud: {reason}")]
pub struct ConnectionError {
    pub port: String,
    pub baud: u32,
    pub reason: String,
}

/// Everything that can go wrong inside a single request/response exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("response timed out: expected {expected} bytes, got {received}")]
    Timeout { expected: usize, received: usize },
    #[error("serial i/o: {0}")]
    Io(#[from] io::Error),
    #[error("rtu frame too short: {0} bytes")]
    FrameTooShort(usize),
    #[error("invalid frame crc: expected 0x{expected:04X}, got 0x{seen:04X}")]
    InvalidCrc { expected: u16, seen: u16 },
    #[error("unexpected response unit: expected {expected}, got {seen}")]
    UnitMismatch { expected: u8, seen: u8 },
    #[error("unexpected response function: expected 0x{expected:02X}, got 0x{seen:02X}")]
    FunctionMismatch { expected: u8, seen: u8 },
    #[error("device exception for function 0x{function:02X}: {code}")]
    Exception { function: u8, code: ExceptionCode },
    #[error("response length mismatch: expected {expected} bytes, got {seen}")]
    LengthMismatch { expected: usize, seen: usize },
    #[error("write response echo mismatch: register 0x{address:04X}={value} echoed as 0x{echo_address:04X}={echo_value}")]
    EchoMismatch {
        address: u16,
        value: u16,
        echo_address: u16,
        echo_value: u16,
    },
    #[error("invalid register quantity: {0}")]
    InvalidQuantity(u16),
    #[error("modbus driver: {0}")]
    Device(String),
}

/// A fatal condition that ends the session.
#[derive(Debug, Error)]
pub enum Fault {
    #[error("MODBUS error while {context}: {source}")]
    Protocol {
        context: &'static str,
        #[source]
        source: TransportError,
    },
    #[error("MODBUS active mask I/O failure: expected {expected:#06b}, got {actual:#06b}")]
    ConfigMismatch { expected: u16, actual: u16 },
    #[error(
        "new value must always be greater than the old one, but previous[{index}] >= current[{index}]: {previous} >= {current}"
    )]
    Monotonicity {
        index: usize,
        previous: u16,
        current: u16,
    },
    #[error("reporting a reading failed: {source}")]
    Report {
        #[source]
        source: io::Error,
    },
}

impl Fault {
    pub fn protocol(context: &'static str, source: TransportError) -> Self {
        Self::Protocol { context, source }
    }

    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Protocol { .. } => 3,
            Self::ConfigMismatch { .. } => 4,
            Self::Monotonicity { .. } => 5,
            Self::Report { .. } => 6,
        }
    }
}

impl ConnectionError {
    pub const EXIT_CODE: u8 = 2;
}
