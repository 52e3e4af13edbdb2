use std::convert::Infallible;
use std::fmt;
use std::io;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::backend::{Backend, build_backend};
use crate::constants::{REG_ACTIVE, SNAPSHOT_REG_COUNT, SNAPSHOT_REG_START, UNIT_MAX, UNIT_MIN};
use crate::data::Snapshot;
use crate::error::{ConnectionError, Fault, TransportError};
use crate::interface::InterfaceMode;

/// Slave unit id, 1..=247.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitId(u8);

impl UnitId {
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for UnitId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (UNIT_MIN..=UNIT_MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(value)
        }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub port: String,
    pub baud: u32,
    pub unit: UnitId,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub interface: InterfaceMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Activated,
    Polling,
    Faulted,
}

/// Exclusive owner of the link to one board. The port closes when this is dropped.
pub struct Session {
    backend: Box<dyn Backend + Send>,
    unit: UnitId,
    state: SessionState,
}

impl Session {
    pub fn connect(config: &SessionConfig) -> Result<Self, ConnectionError> {
        let backend = build_backend(config)?;
        info!(
            port = %config.port,
            baud = config.baud,
            unit = %config.unit,
            interface = ?config.interface,
            "connected"
        );
        Ok(Self::with_backend(backend, config.unit))
    }

    pub(crate) fn with_backend(backend: Box<dyn Backend + Send>, unit: UnitId) -> Self {
        Self {
            backend,
            unit,
            state: SessionState::Connected,
        }
    }

    pub fn write_holding_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        self.backend
            .write_holding_register(self.unit.get(), address, value)
    }

    pub fn read_holding_registers(
        &mut self,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        self.backend
            .read_holding_registers(self.unit.get(), start, count)
    }

    /// Writes `mask` to the `Active` register and reads it back.
    pub fn activate_and_verify(&mut self, mask: u16) -> Result<(), Fault> {
        let result = self.try_activate(mask);
        self.settle(result)?;
        self.state = SessionState::Activated;
        info!("active mask {mask:#06b} verified");
        Ok(())
    }

    fn try_activate(&mut self, mask: u16) -> Result<(), Fault> {
        self.write_holding_register(REG_ACTIVE, mask)
            .map_err(|err| Fault::protocol("writing the active mask", err))?;

        let readback = self
            .read_holding_registers(REG_ACTIVE, 1)
            .map_err(|err| Fault::protocol("checking the active mask", err))?;
        let actual = readback.first().copied().ok_or_else(|| {
            Fault::protocol(
                "checking the active mask",
                TransportError::LengthMismatch {
                    expected: 1,
                    seen: 0,
                },
            )
        })?;

        if actual != mask {
            return Err(Fault::ConfigMismatch {
                expected: mask,
                actual,
            });
        }
        Ok(())
    }

    /// Reads one snapshot and checks it against `previous`.
    pub fn poll_once(&mut self, previous: &Snapshot) -> Result<Snapshot, Fault> {
        let registers = self
            .read_holding_registers(SNAPSHOT_REG_START, SNAPSHOT_REG_COUNT)
            .map_err(|err| Fault::protocol("reading values", err))?;
        let current = Snapshot::from_registers(&registers).ok_or_else(|| {
            Fault::protocol(
                "reading values",
                TransportError::LengthMismatch {
                    expected: usize::from(SNAPSHOT_REG_COUNT),
                    seen: registers.len(),
                },
            )
        })?;
        current.ensure_advanced_from(previous)?;
        Ok(current)
    }

    /// Polls until the first fault. `on_reading` sees every accepted snapshot;
    /// an error from it ends the loop like any other fault.
    pub fn poll_forever<F>(
        &mut self,
        poll_interval: Duration,
        mut on_reading: F,
    ) -> Result<Infallible, Fault>
    where
        F: FnMut(&Snapshot) -> io::Result<()>,
    {
        self.state = SessionState::Polling;
        let mut previous = Snapshot::ZERO;
        loop {
            let result = self.poll_once(&previous);
            let current = self.settle(result)?;
            let reported = on_reading(&current).map_err(|source| Fault::Report { source });
            self.settle(reported)?;
            previous = current;

            if !poll_interval.is_zero() {
                thread::sleep(poll_interval);
            }
        }
    }

    fn settle<T>(&mut self, result: Result<T, Fault>) -> Result<T, Fault> {
        result.inspect_err(|fault| {
            self.state = SessionState::Faulted;
            error!(exit_code = fault.exit_code(), "{fault}");
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!(unit = %self.unit, state = ?self.state, "closing session");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{Session, SessionState, UnitId};
    use crate::backend::Backend;
    use crate::constants::{ACTIVE_MASK, REG_ACTIVE, SNAPSHOT_REG_COUNT, SNAPSHOT_REG_START};
    use crate::data::Snapshot;
    use crate::error::{ExceptionCode, Fault, TransportError};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Write { unit: u8, address: u16, value: u16 },
        Read { unit: u8, start: u16, count: u16 },
    }

    #[derive(Default)]
    struct Script {
        writes: VecDeque<Result<(), TransportError>>,
        reads: VecDeque<Result<Vec<u16>, TransportError>>,
        calls: Vec<Call>,
    }

    // Replies from a queue; an exhausted queue behaves like a silent line.
    #[derive(Clone, Default)]
    struct ScriptedBackend(Arc<Mutex<Script>>);

    impl ScriptedBackend {
        fn reply_write(&self, reply: Result<(), TransportError>) -> &Self {
            self.0.lock().expect("script lock").writes.push_back(reply);
            self
        }

        fn reply_read(&self, reply: Result<Vec<u16>, TransportError>) -> &Self {
            self.0.lock().expect("script lock").reads.push_back(reply);
            self
        }

        fn calls(&self) -> Vec<Call> {
            self.0.lock().expect("script lock").calls.clone()
        }

        fn session(&self) -> Session {
            let unit = UnitId::try_from(1).expect("unit 1 is valid");
            Session::with_backend(Box::new(self.clone()), unit)
        }
    }

    fn silence() -> TransportError {
        TransportError::Timeout {
            expected: 3,
            received: 0,
        }
    }

    impl Backend for ScriptedBackend {
        fn write_holding_register(
            &mut self,
            unit: u8,
            address: u16,
            value: u16,
        ) -> Result<(), TransportError> {
            let mut script = self.0.lock().expect("script lock");
            script.calls.push(Call::Write {
                unit,
                address,
                value,
            });
            script.writes.pop_front().unwrap_or_else(|| Err(silence()))
        }

        fn read_holding_registers(
            &mut self,
            unit: u8,
            start: u16,
            count: u16,
        ) -> Result<Vec<u16>, TransportError> {
            let mut script = self.0.lock().expect("script lock");
            script.calls.push(Call::Read { unit, start, count });
            script.reads.pop_front().unwrap_or_else(|| Err(silence()))
        }
    }

    #[test]
    fn unit_id_accepts_slave_range_only() {
        assert!(UnitId::try_from(0).is_err());
        assert_eq!(UnitId::try_from(1).map(UnitId::get), Ok(1));
        assert_eq!(UnitId::try_from(247).map(UnitId::get), Ok(247));
        assert_eq!(UnitId::try_from(248), Err(248));
    }

    #[test]
    fn echoed_mask_activates_session() {
        let backend = ScriptedBackend::default();
        backend.reply_write(Ok(())).reply_read(Ok(vec![ACTIVE_MASK]));
        let mut session = backend.session();

        session
            .activate_and_verify(ACTIVE_MASK)
            .expect("mask should verify");

        assert_eq!(session.state, SessionState::Activated);
        assert_eq!(
            backend.calls(),
            vec![
                Call::Write {
                    unit: 1,
                    address: REG_ACTIVE,
                    value: 0b1110
                },
                Call::Read {
                    unit: 1,
                    start: REG_ACTIVE,
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn any_mask_round_trips() {
        for mask in [0x0000, 0x0001, 0b1110, 0x8000, 0xFFFF] {
            let backend = ScriptedBackend::default();
            backend.reply_write(Ok(())).reply_read(Ok(vec![mask]));
            backend
                .session()
                .activate_and_verify(mask)
                .expect("echoed mask should verify");
        }
    }

    #[test]
    fn wrong_readback_is_config_mismatch() {
        let backend = ScriptedBackend::default();
        backend.reply_write(Ok(())).reply_read(Ok(vec![0b0110]));
        let mut session = backend.session();

        let fault = session
            .activate_and_verify(0b1110)
            .expect_err("mismatch should fault");

        assert!(matches!(
            fault,
            Fault::ConfigMismatch {
                expected: 0b1110,
                actual: 0b0110
            }
        ));
        assert_ne!(fault.exit_code(), 0);
        assert_eq!(session.state, SessionState::Faulted);
    }

    #[test]
    fn failed_readback_is_protocol_error() {
        let backend = ScriptedBackend::default();
        backend.reply_write(Ok(())).reply_read(Err(TransportError::Exception {
            function: 0x03,
            code: ExceptionCode::SlaveDeviceFailure,
        }));

        let fault = backend
            .session()
            .activate_and_verify(ACTIVE_MASK)
            .expect_err("exception should fault");

        assert!(matches!(
            fault,
            Fault::Protocol {
                context: "checking the active mask",
                ..
            }
        ));
    }

    #[test]
    fn failed_mask_write_stops_before_readback() {
        let backend = ScriptedBackend::default();
        backend.reply_write(Err(silence()));

        let fault = backend
            .session()
            .activate_and_verify(ACTIVE_MASK)
            .expect_err("write timeout should fault");

        assert!(matches!(fault, Fault::Protocol { .. }));
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn first_poll_is_admitted_against_zero() {
        let backend = ScriptedBackend::default();
        backend.reply_read(Ok(vec![1, 1, 1, 1, 1]));

        let snapshot = backend
            .session()
            .poll_once(&Snapshot::ZERO)
            .expect("values >= 1 pass");

        assert_eq!(snapshot, Snapshot::new([1, 1, 1, 1, 1]));
        assert_eq!(
            backend.calls(),
            vec![Call::Read {
                unit: 1,
                start: SNAPSHOT_REG_START,
                count: SNAPSHOT_REG_COUNT
            }]
        );
    }

    #[test]
    fn increasing_polls_continue_until_line_goes_silent() {
        let backend = ScriptedBackend::default();
        backend
            .reply_read(Ok(vec![1, 1, 1, 1, 1]))
            .reply_read(Ok(vec![2, 2, 2, 2, 2]));
        let mut session = backend.session();
        let mut seen = Vec::new();

        let fault = session
            .poll_forever(Duration::ZERO, |snapshot| {
                seen.push(*snapshot);
                Ok(())
            })
            .expect_err("loop ends only on a fault");

        assert_eq!(
            seen,
            vec![
                Snapshot::new([1, 1, 1, 1, 1]),
                Snapshot::new([2, 2, 2, 2, 2])
            ]
        );
        assert!(matches!(
            fault,
            Fault::Protocol {
                context: "reading values",
                source: TransportError::Timeout { .. }
            }
        ));
        assert_eq!(session.state, SessionState::Faulted);
    }

    #[test]
    fn stalled_value_faults_at_first_index() {
        let backend = ScriptedBackend::default();
        backend
            .reply_read(Ok(vec![10, 20, 30, 40, 50]))
            .reply_read(Ok(vec![10, 21, 31, 41, 51]))
            .reply_read(Ok(vec![11, 22, 32, 42, 52]));
        let mut seen = Vec::new();

        let fault = backend
            .session()
            .poll_forever(Duration::ZERO, |snapshot| {
                seen.push(*snapshot);
                Ok(())
            })
            .expect_err("index 0 stalled");

        assert!(matches!(
            fault,
            Fault::Monotonicity {
                index: 0,
                previous: 10,
                current: 10
            }
        ));
        assert_eq!(seen, vec![Snapshot::new([10, 20, 30, 40, 50])]);
        assert_eq!(backend.calls().len(), 2);
    }

    #[test]
    fn rejected_reading_is_not_reported() {
        let backend = ScriptedBackend::default();
        backend
            .reply_read(Ok(vec![5, 5, 5, 5, 5]))
            .reply_read(Ok(vec![6, 6, 6, 6, 4]));
        let mut seen = Vec::new();

        let fault = backend
            .session()
            .poll_forever(Duration::ZERO, |snapshot| {
                seen.push(*snapshot);
                Ok(())
            })
            .expect_err("index 4 went backwards");

        assert!(matches!(fault, Fault::Monotonicity { index: 4, .. }));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn short_register_read_is_protocol_error() {
        let backend = ScriptedBackend::default();
        backend.reply_read(Ok(vec![1, 2, 3]));

        let fault = backend
            .session()
            .poll_once(&Snapshot::ZERO)
            .expect_err("three values are not a snapshot");

        assert!(matches!(
            fault,
            Fault::Protocol {
                source: TransportError::LengthMismatch {
                    expected: 5,
                    seen: 3
                },
                ..
            }
        ));
    }

    #[test]
    fn crc_failure_mid_loop_is_fatal() {
        let backend = ScriptedBackend::default();
        backend
            .reply_read(Ok(vec![1, 2, 3, 4, 5]))
            .reply_read(Err(TransportError::InvalidCrc {
                expected: 0x1234,
                seen: 0x4321,
            }));

        let fault = backend
            .session()
            .poll_forever(Duration::ZERO, |_| Ok(()))
            .expect_err("bad crc should fault");

        assert!(matches!(
            fault,
            Fault::Protocol {
                source: TransportError::InvalidCrc { .. },
                ..
            }
        ));
        assert_eq!(fault.exit_code(), 3);
    }

    #[test]
    fn failed_report_ends_the_loop() {
        let backend = ScriptedBackend::default();
        backend
            .reply_read(Ok(vec![1, 1, 1, 1, 1]))
            .reply_read(Ok(vec![2, 2, 2, 2, 2]))
            .reply_read(Ok(vec![3, 3, 3, 3, 3]));
        let mut session = backend.session();
        let mut reported = 0;

        let fault = session
            .poll_forever(Duration::ZERO, |_| {
                reported += 1;
                if reported == 2 {
                    Err(io::Error::from(io::ErrorKind::BrokenPipe))
                } else {
                    Ok(())
                }
            })
            .expect_err("closed output should end polling");

        assert!(matches!(fault, Fault::Report { .. }));
        assert_eq!(fault.exit_code(), 6);
        assert_eq!(reported, 2);
        assert_eq!(backend.calls().len(), 2);
        assert_eq!(session.state, SessionState::Faulted);
    }
}
