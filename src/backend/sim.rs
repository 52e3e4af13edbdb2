use crate::backend::Backend;
use crate::error::TransportError;
use crate::rtu::{FC_READ_HOLDING_REGISTERS, FC_WRITE_SINGLE_REGISTER};
use crate::sim::SimBoard;

pub(crate) struct SimBackend {
    board: SimBoard,
}

impl SimBackend {
    pub(crate) fn new() -> Self {
        Self {
            board: SimBoard::new(),
        }
    }
}

impl Backend for SimBackend {
    fn write_holding_register(
        &mut self,
        _unit: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        self.board
            .write(address, value)
            .map_err(|code| TransportError::Exception {
                function: FC_WRITE_SINGLE_REGISTER,
                code,
            })
    }

    fn read_holding_registers(
        &mut self,
        _unit: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        self.board
            .read(start, count)
            .map_err(|code| TransportError::Exception {
                function: FC_READ_HOLDING_REGISTERS,
                code,
            })
    }
}
