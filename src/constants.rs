use std::time::Duration;

pub const REG_ACTIVE: u16 = 0x0000;
pub const REG_VALUE1: u16 = 0x0001;
pub const REG_VALUE2: u16 = 0x0002;
pub const REG_VALUE3: u16 = 0x0003;

/// Value3 is a block of three consecutive registers starting at `REG_VALUE3`.
pub const VALUE3_COMPONENTS: u16 = 3;

/// Registers the board exposes: `Active`, `Value1`, `Value2` and the Value3 block.
pub const REGISTER_COUNT: u16 = REG_VALUE3 + VALUE3_COMPONENTS;

pub const SNAPSHOT_REG_START: u16 = REG_VALUE1;
pub const SNAPSHOT_REG_COUNT: u16 = REGISTER_COUNT - REG_VALUE1;

/// Enables collection of Value1, Value2 and the Value3 block.
pub const ACTIVE_MASK: u16 = (1 << REG_VALUE1) | (1 << REG_VALUE2) | (1 << REG_VALUE3);

pub const DEFAULT_BAUD: u32 = 9_600;
pub const DEFAULT_UNIT: u8 = 1;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

pub const UNIT_MIN: u8 = 1;
pub const UNIT_MAX: u8 = 247;

/// Largest quantity a single read holding registers request may carry.
pub const READ_QUANTITY_MAX: u16 = 125;
