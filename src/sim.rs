use crate::constants::{REG_ACTIVE, REG_VALUE1, REG_VALUE3, REGISTER_COUNT};
use crate::error::ExceptionCode;

/// Register-level model of the sensors board.
///
/// Enabled measurements are `u16` counters that step by one per read, so they
/// wrap (and fail the increase check) after 65 535 polls.
#[derive(Debug, Clone, Default)]
pub struct SimBoard {
    registers: [u16; REGISTER_COUNT as usize],
}

impl SimBoard {
    pub fn new() -> Self {
        Self {
            registers: [0; REGISTER_COUNT as usize],
        }
    }

    pub fn write(&mut self, address: u16, value: u16) -> Result<(), ExceptionCode> {
        if address != REG_ACTIVE {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        self.registers[usize::from(REG_ACTIVE)] = value;
        Ok(())
    }

    pub fn read(&mut self, start: u16, count: u16) -> Result<Vec<u16>, ExceptionCode> {
        let end = u32::from(start) + u32::from(count);
        if count == 0 || end > u32::from(REGISTER_COUNT) {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        if end > u32::from(REG_VALUE1) {
            self.collect();
        }
        let range = usize::from(start)..usize::from(start + count);
        Ok(self.registers[range].to_vec())
    }

    // Every enabled measurement takes a new sample per read.
    fn collect(&mut self) {
        let active = self.registers[usize::from(REG_ACTIVE)];
        for register in REG_VALUE1..REGISTER_COUNT {
            let bit = register.min(REG_VALUE3);
            if active & (1 << bit) == 0 {
                continue;
            }
            let slot = &mut self.registers[usize::from(register)];
            *slot = slot.wrapping_add(1);
        }
    }
}
