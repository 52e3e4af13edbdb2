use crate::error::{ConnectionError, TransportError};
use crate::interface::InterfaceMode;
use crate::session::SessionConfig;

mod rs485;
mod serial;

#[cfg(debug_assertions)]
mod sim;

/// One MODBUS master link. Every call is a complete, blocking transaction.
pub(crate) trait Backend {
    fn write_holding_register(
        &mut self,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError>;

    fn read_holding_registers(
        &mut self,
        unit: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError>;
}

pub(crate) fn build_backend(
    config: &SessionConfig,
) -> Result<Box<dyn Backend + Send>, ConnectionError> {
    match config.interface {
        InterfaceMode::Serial => {
            let backend = serial::SerialBackend::new(&config.port, config.baud, config.timeout)?;
            Ok(Box::new(backend))
        }
        InterfaceMode::Rs485 => {
            let backend = rs485::Rs485Backend::new(&config.port, config.baud, config.timeout)?;
            Ok(Box::new(backend))
        }
        InterfaceMode::Simulation => {
            #[cfg(debug_assertions)]
            {
                Ok(Box::new(sim::SimBackend::new()))
            }
            #[cfg(not(debug_assertions))]
            {
                Err(ConnectionError {
                    port: config.port.clone(),
                    baud: config.baud,
                    reason: "simulation not available in release builds".to_owned(),
                })
            }
        }
    }
}
