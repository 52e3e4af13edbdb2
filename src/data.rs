use std::fmt;

use crate::constants::SNAPSHOT_REG_COUNT;
use crate::error::Fault;

pub const SNAPSHOT_LEN: usize = SNAPSHOT_REG_COUNT as usize;

/// One poll's worth of measurements, registers `Value1` through the end of the Value3 block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot([u16; SNAPSHOT_LEN]);

impl Snapshot {
    /// Stands in for "no prior reading": every real value compares above it.
    pub const ZERO: Self = Self::new([0; SNAPSHOT_LEN]);

    pub const fn new(values: [u16; SNAPSHOT_LEN]) -> Self {
        Self(values)
    }

    pub fn from_registers(registers: &[u16]) -> Option<Self> {
        let values: [u16; SNAPSHOT_LEN] = registers.try_into().ok()?;
        Some(Self(values))
    }

    pub const fn value1(&self) -> u16 {
        self.0[0]
    }

    pub const fn value2(&self) -> u16 {
        self.0[1]
    }

    pub const fn value3(&self) -> [u16; 3] {
        [self.0[2], self.0[3], self.0[4]]
    }

    /// Checks that every value strictly increased since `previous`.
    /// Reports only the first index that did not.
    pub fn ensure_advanced_from(&self, previous: &Self) -> Result<(), Fault> {
        match previous
            .0
            .iter()
            .zip(self.0.iter())
            .position(|(old, new)| old >= new)
        {
            Some(index) => Err(Fault::Monotonicity {
                index,
                previous: previous.0[index],
                current: self.0[index],
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.value3();
        writeln!(f, "Value1 = {}", self.value1())?;
        writeln!(f, "Value2 = {}", self.value2())?;
        write!(f, "Value3 = {a}, {b}, {c}")
    }
}
