use std::io;
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};

use crate::backend::Backend;
use crate::error::{ConnectionError, TransportError};
use crate::rtu::{
    build_read_request, build_write_request, exchange, parse_read_response,
    parse_write_response, FC_READ_HOLDING_REGISTERS, FC_WRITE_SINGLE_REGISTER,
};

pub(crate) struct SerialBackend {
    port: Box<dyn SerialPort>,
    io_timeout: Duration,
}

impl SerialBackend {
    pub(crate) fn new(path: &str, baud: u32, io_timeout: Duration) -> Result<Self, ConnectionError> {
        let port = serialport::new(path, baud)
            .timeout(io_timeout)
            .open()
            .map_err(|err| ConnectionError {
                port: path.to_owned(),
                baud,
                reason: err.to_string(),
            })?;
        Ok(Self { port, io_timeout })
    }

    // A reply that arrived after an earlier timeout must not be read as this one.
    fn discard_stale_input(&mut self) -> Result<(), TransportError> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|err| TransportError::Io(io::Error::from(err)))
    }
}

impl Backend for SerialBackend {
    fn write_holding_register(
        &mut self,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        let request = build_write_request(unit, address, value);
        self.discard_stale_input()?;
        let response = exchange(
            &mut *self.port,
            &request,
            unit,
            FC_WRITE_SINGLE_REGISTER,
            self.io_timeout,
        )?;
        parse_write_response(&response, unit, address, value)
    }

    fn read_holding_registers(
        &mut self,
        unit: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let request = build_read_request(unit, start, count)?;
        self.discard_stale_input()?;
        let response = exchange(
            &mut *self.port,
            &request,
            unit,
            FC_READ_HOLDING_REGISTERS,
            self.io_timeout,
        )?;
        parse_read_response(&response, unit, count)
    }
}
