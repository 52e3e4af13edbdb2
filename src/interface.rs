use clap::ValueEnum;

/// How transactions reach the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum InterfaceMode {
    /// RTU frames built and checked here, sent over a plain serial port
    #[default]
    Serial,
    /// The modbus-rtu master with RS-485 direction control
    Rs485,
    /// In-process simulated sensor board (debug builds only)
    Simulation,
}

impl InterfaceMode {
    pub const fn needs_port(self) -> bool {
        !matches!(self, Self::Simulation)
    }
}
