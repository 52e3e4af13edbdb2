use std::time::Duration;

use modbus_rtu::error::Error as DriverError;
use modbus_rtu::{Exception, Function, Master, Request, Response};

use crate::backend::Backend;
use crate::error::{ConnectionError, TransportError};
use crate::rtu::{check_read_quantity, FC_READ_HOLDING_REGISTERS, FC_WRITE_SINGLE_REGISTER};

pub(crate) struct Rs485Backend {
    master: Master,
    timeout: Duration,
}

impl Rs485Backend {
    pub(crate) fn new(port: &str, baud: u32, timeout: Duration) -> Result<Self, ConnectionError> {
        let master = Master::new_rs485(port, baud).map_err(|err| ConnectionError {
            port: port.to_owned(),
            baud,
            reason: err.to_string(),
        })?;
        Ok(Self { master, timeout })
    }
}

impl Backend for Rs485Backend {
    fn write_holding_register(
        &mut self,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        let function = Function::WriteSingleRegister { address, value };
        let request = Request::new(unit, &function, self.timeout);
        let response = self
            .master
            .send(&request)
            .map_err(|err| driver_error(FC_WRITE_SINGLE_REGISTER, err))?;
        match response {
            Response::Success => Ok(()),
            Response::Exception(exception) => {
                Err(device_exception(FC_WRITE_SINGLE_REGISTER, &exception))
            }
            _ => Err(TransportError::Device(
                "unexpected response to register write".to_owned(),
            )),
        }
    }

    fn read_holding_registers(
        &mut self,
        unit: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        check_read_quantity(count)?;
        let function = Function::ReadHoldingRegisters {
            starting_address: start,
            quantity: count,
        };
        let request = Request::new(unit, &function, self.timeout);
        let response = self
            .master
            .send(&request)
            .map_err(|err| driver_error(FC_READ_HOLDING_REGISTERS, err))?;
        match response {
            Response::Value(values) => expect_count(values.into_vec(), count),
            Response::Exception(exception) => {
                Err(device_exception(FC_READ_HOLDING_REGISTERS, &exception))
            }
            _ => Err(TransportError::Device(
                "unexpected response to register read".to_owned(),
            )),
        }
    }
}

fn device_exception(function: u8, exception: &Exception) -> TransportError {
    TransportError::Exception {
        function,
        code: exception.as_code().into(),
    }
}

// The driver reports exceptions either as a response or as an error.
fn driver_error(function: u8, err: DriverError) -> TransportError {
    match err {
        DriverError::Exception(exception) => device_exception(function, &exception),
        DriverError::IO(err) => TransportError::Io(err),
        other => TransportError::Device(other.to_string()),
    }
}

fn expect_count(values: Vec<u16>, count: u16) -> Result<Vec<u16>, TransportError> {
    let expected = usize::from(count);
    if values.len() == expected {
        Ok(values)
    } else {
        Err(TransportError::LengthMismatch {
            expected,
            seen: values.len(),
        })
    }
}
