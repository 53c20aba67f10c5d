/*
 * This file is part of Acerfan.
 *
 * Copyright (C) 2025 Acerfan contributors
 *
 * Acerfan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Acerfan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Acerfan. If not, see <https://www.gnu.org/licenses/>.
 */

//! EC register interface
//!
//! Talks to the embedded controller through its status, instruction and data
//! ports. Every register access is a short handshake:
//!
//! 1. wait until the status register reports "ready to accept an instruction"
//! 2. write the read/write opcode to the instruction port
//! 3. wait again, then write the register address to the location port
//! 4. read: wait for "data ready" and read the data port;
//!    write: wait for "ready to accept" and write the value to the data port
//!
//! Each wait busy-polls the status port with a short spin in between. EC
//! responses arrive in microseconds, so sleeping would be far too coarse. A
//! wait fails with [`AcerfanError::Timeout`] once the time since the start of
//! the operation exceeds the configured timeout.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::error::{AcerfanError, Result};
use crate::transport::PortTransport;

const STAGE_WRITE_READY: &str = "write-ready";
const STAGE_READ_READY: &str = "read-ready";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    pub fn apply(self, lhs: u8, rhs: u8) -> bool {
        match self {
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
        }
    }
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "==" => Ok(CompareOp::Eq),
            "!=" => Ok(CompareOp::Ne),
            "<" => Ok(CompareOp::Lt),
            "<=" => Ok(CompareOp::Le),
            ">" => Ok(CompareOp::Gt),
            ">=" => Ok(CompareOp::Ge),
            other => Err(format!("unknown comparison operator '{other}'")),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(raw & mask) <op> value`, evaluated against a status byte.
///
/// The condition describes the *ready* state: wait loops spin while it is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteCondition {
    pub mask: u8,
    pub op: CompareOp,
    pub value: u8,
}

impl ByteCondition {
    pub const fn new(mask: u8, op: CompareOp, value: u8) -> Self {
        Self { mask, op, value }
    }

    pub fn matches(&self, raw: u8) -> bool {
        self.op.apply(raw & self.mask, self.value)
    }
}

impl fmt::Display for ByteCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(status & {:#04x}) {} {:#04x}", self.mask, self.op, self.value)
    }
}

/// Port addresses, opcodes and register map of the EC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcPorts {
    pub status_address: u16,
    /// Status says the EC has data for us
    pub can_read: ByteCondition,
    /// Status says the EC will accept an instruction/byte
    pub can_write: ByteCondition,
    pub instruction_address: u16,
    pub instruct_read: u8,
    pub instruct_write: u8,
    pub location_address: u16,
    pub data_address: u16,
    pub control_register: u8,
    pub control_manual: u8,
    pub control_bios: u8,
    pub cpu_temp_register: u8,
    pub fan_speed_register: u8,
}

impl Default for EcPorts {
    /// ACPI EC on 0x62/0x66 with the Aspire register map.
    fn default() -> Self {
        Self {
            status_address: 0x66,
            can_read: ByteCondition::new(0x01, CompareOp::Ne, 0x00),
            can_write: ByteCondition::new(0x02, CompareOp::Eq, 0x00),
            instruction_address: 0x66,
            instruct_read: 0x80,
            instruct_write: 0x81,
            location_address: 0x62,
            data_address: 0x62,
            control_register: 0x93,
            control_manual: 0x14,
            control_bios: 0x04,
            cpu_temp_register: 0xA8,
            fan_speed_register: 0x94,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcTiming {
    /// Upper bound for a whole register operation
    pub timeout: Duration,
    /// Spin-loop iterations between two status polls
    pub spin_cycles: u32,
}

impl Default for EcTiming {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(100),
            spin_cycles: 50,
        }
    }
}

/// Who is driving the fan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// The EC's own fan logic
    Firmware,
    /// Speed written by us
    Manual,
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMode::Firmware => f.write_str("firmware"),
            ControlMode::Manual => f.write_str("manual"),
        }
    }
}

pub struct EmbeddedController<T: PortTransport> {
    transport: T,
    ports: EcPorts,
    timing: EcTiming,
    clock: SharedClock,
    available: bool,
}

impl<T: PortTransport> EmbeddedController<T> {
    /// The transport is not used until [`check_availability`](Self::check_availability)
    /// confirmed it; before that every access is a no-op.
    pub fn new(transport: T, ports: EcPorts, timing: EcTiming, clock: SharedClock) -> Self {
        Self {
            transport,
            ports,
            timing,
            clock,
            available: false,
        }
    }

    /// Query the transport. Unavailability is not an error: reads return 0 and
    /// writes are dropped.
    pub fn check_availability(&mut self) -> bool {
        self.available = self.transport.is_available();
        if self.available {
            info!("EC port access available");
        } else {
            warn!("EC port access unavailable; fan control is disabled");
        }
        self.available
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn ports(&self) -> &EcPorts {
        &self.ports
    }

    pub fn timing(&self) -> EcTiming {
        self.timing
    }

    /// New timeout and spin settings apply from the next register operation.
    pub fn set_timing(&mut self, timing: EcTiming) {
        self.timing = timing;
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn read_register(&mut self, register: u8) -> Result<u8> {
        if !self.available {
            return Ok(0);
        }
        let started = self.clock.now();
        let can_write = self.ports.can_write;
        let can_read = self.ports.can_read;

        self.wait_for(can_write, STAGE_WRITE_READY, started)?;
        self.write_port(self.ports.instruction_address, self.ports.instruct_read)?;
        self.wait_for(can_write, STAGE_WRITE_READY, started)?;
        self.write_port(self.ports.location_address, register)?;
        self.wait_for(can_read, STAGE_READ_READY, started)?;
        self.read_port(self.ports.data_address)
    }

    pub fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
        if !self.available {
            return Ok(());
        }
        let started = self.clock.now();
        let can_write = self.ports.can_write;

        self.wait_for(can_write, STAGE_WRITE_READY, started)?;
        self.write_port(self.ports.instruction_address, self.ports.instruct_write)?;
        self.wait_for(can_write, STAGE_WRITE_READY, started)?;
        self.write_port(self.ports.location_address, register)?;
        self.wait_for(can_write, STAGE_WRITE_READY, started)?;
        self.write_port(self.ports.data_address, value)
    }

    pub fn read_temperature_raw(&mut self) -> Result<u8> {
        self.read_register(self.ports.cpu_temp_register)
    }

    pub fn read_fan_speed_raw(&mut self) -> Result<u8> {
        self.read_register(self.ports.fan_speed_register)
    }

    pub fn write_fan_speed_raw(&mut self, raw: u8) -> Result<()> {
        self.write_register(self.ports.fan_speed_register, raw)
    }

    pub fn control_mode(&mut self) -> Result<ControlMode> {
        let raw = self.read_register(self.ports.control_register)?;
        Ok(if raw == self.ports.control_bios {
            ControlMode::Firmware
        } else {
            ControlMode::Manual
        })
    }

    pub fn set_control_mode(&mut self, mode: ControlMode) -> Result<()> {
        let value = match mode {
            ControlMode::Firmware => self.ports.control_bios,
            ControlMode::Manual => self.ports.control_manual,
        };
        self.write_register(self.ports.control_register, value)
    }

    fn wait_for(&mut self, ready: ByteCondition, stage: &'static str, started: Instant) -> Result<()> {
        loop {
            let status = self.read_port(self.ports.status_address)?;
            if ready.matches(status) {
                return Ok(());
            }
            let waited = self.clock.now().saturating_duration_since(started);
            if waited > self.timing.timeout {
                debug!("EC stuck waiting for {stage}: status {status:#04x}, expected {ready}");
                return Err(AcerfanError::Timeout {
                    stage,
                    waited_ms: waited.as_millis() as u64,
                });
            }
            spin(self.timing.spin_cycles);
        }
    }

    fn read_port(&mut self, addr: u16) -> Result<u8> {
        self.transport
            .read_port(addr)
            .map_err(|source| AcerfanError::Port { addr, source })
    }

    fn write_port(&mut self, addr: u16, value: u8) -> Result<()> {
        self.transport
            .write_port(addr, value)
            .map_err(|source| AcerfanError::Port { addr, source })
    }
}

fn spin(cycles: u32) {
    for _ in 0..cycles {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    use crate::clock::{ManualClock, SystemClock};
    use crate::test_utils::FakeEc;
    use crate::transport::MockPortTransport;

    fn ec_over(fake: FakeEc, clock: SharedClock) -> EmbeddedController<FakeEc> {
        let mut ec = EmbeddedController::new(fake, EcPorts::default(), EcTiming::default(), clock);
        assert!(ec.check_availability());
        ec
    }

    #[test]
    fn test_compare_op_parse_and_apply() {
        for (s, op) in [
            ("==", CompareOp::Eq),
            ("!=", CompareOp::Ne),
            ("<", CompareOp::Lt),
            ("<=", CompareOp::Le),
            (">", CompareOp::Gt),
            (">=", CompareOp::Ge),
        ] {
            assert_eq!(s.parse::<CompareOp>().unwrap(), op);
            assert_eq!(op.as_str(), s);
        }
        assert!("=>".parse::<CompareOp>().is_err());
        assert!(CompareOp::Le.apply(3, 3));
        assert!(!CompareOp::Gt.apply(3, 3));
    }

    #[test]
    fn test_byte_condition_masks_before_compare() {
        let ibf_clear = ByteCondition::new(0x02, CompareOp::Eq, 0x00);
        assert!(ibf_clear.matches(0x00));
        assert!(ibf_clear.matches(0xFD));
        assert!(!ibf_clear.matches(0x02));

        let obf_set = ByteCondition::new(0x01, CompareOp::Ne, 0x00);
        assert!(obf_set.matches(0x01));
        assert!(!obf_set.matches(0xFE));
    }

    #[test]
    fn test_byte_condition_display() {
        let c = ByteCondition::new(0x02, CompareOp::Eq, 0x00);
        assert_eq!(c.to_string(), "(status & 0x02) == 0x00");
    }

    #[test]
    fn test_read_register_handshake() {
        let mut fake = FakeEc::new();
        fake.set_register(0xA8, 57);
        let mut ec = ec_over(fake, Arc::new(SystemClock));
        assert_eq!(ec.read_register(0xA8).unwrap(), 57);
        assert_eq!(ec.transport().reads_completed(), 1);
    }

    #[test]
    fn test_write_register_handshake() {
        let mut ec = ec_over(FakeEc::new(), Arc::new(SystemClock));
        ec.write_register(0x94, 0x80).unwrap();
        assert_eq!(ec.transport().register(0x94), 0x80);
        assert_eq!(ec.transport().writes_completed(), 1);
    }

    #[test]
    fn test_semantic_wrappers_use_configured_registers() {
        let mut fake = FakeEc::new();
        fake.set_register(0xA8, 61);
        fake.set_register(0x94, 200);
        fake.set_register(0x93, 0x04);
        let mut ec = ec_over(fake, Arc::new(SystemClock));

        assert_eq!(ec.read_temperature_raw().unwrap(), 61);
        assert_eq!(ec.read_fan_speed_raw().unwrap(), 200);
        assert_eq!(ec.control_mode().unwrap(), ControlMode::Firmware);

        ec.set_control_mode(ControlMode::Manual).unwrap();
        assert_eq!(ec.transport().register(0x93), 0x14);
        assert_eq!(ec.control_mode().unwrap(), ControlMode::Manual);

        ec.write_fan_speed_raw(77).unwrap();
        assert_eq!(ec.transport().register(0x94), 77);
    }

    #[test]
    fn test_unavailable_transport_is_noop() {
        let mut mock = MockPortTransport::new();
        mock.expect_is_available().return_const(false);
        mock.expect_read_port().never();
        mock.expect_write_port().never();

        let mut ec = EmbeddedController::new(mock, EcPorts::default(), EcTiming::default(), Arc::new(SystemClock));
        assert!(!ec.check_availability());
        assert_eq!(ec.read_register(0xA8).unwrap(), 0);
        assert!(ec.write_register(0x94, 10).is_ok());
        assert_eq!(ec.control_mode().unwrap(), ControlMode::Manual);
    }

    #[test]
    fn test_unchecked_transport_is_noop() {
        let mut mock = MockPortTransport::new();
        mock.expect_read_port().never();
        let mut ec = EmbeddedController::new(mock, EcPorts::default(), EcTiming::default(), Arc::new(SystemClock));
        assert_eq!(ec.read_temperature_raw().unwrap(), 0);
    }

    /// Mock whose port reads come from a script and whose writes are recorded.
    fn scripted_mock(reads: Vec<(u16, u8)>) -> (MockPortTransport, Arc<Mutex<Vec<(u16, u8)>>>) {
        let script = Arc::new(Mutex::new(VecDeque::from(reads)));
        let written = Arc::new(Mutex::new(Vec::new()));
        let mut mock = MockPortTransport::new();
        mock.expect_is_available().return_const(true);
        mock.expect_read_port().returning(move |addr| {
            let (expected, value) = script.lock().unwrap().pop_front().expect("unexpected port read");
            assert_eq!(addr, expected);
            Ok(value)
        });
        let log = written.clone();
        mock.expect_write_port().returning(move |addr, value| {
            log.lock().unwrap().push((addr, value));
            Ok(())
        });
        (mock, written)
    }

    #[test]
    fn test_read_register_port_sequence() {
        // IBF clear, IBF clear, OBF set, data
        let (mock, written) = scripted_mock(vec![(0x66, 0x00), (0x66, 0x00), (0x66, 0x01), (0x62, 48)]);
        let mut ec = EmbeddedController::new(mock, EcPorts::default(), EcTiming::default(), Arc::new(SystemClock));
        ec.check_availability();
        assert_eq!(ec.read_temperature_raw().unwrap(), 48);
        assert_eq!(*written.lock().unwrap(), vec![(0x66, 0x80), (0x62, 0xA8)]);
    }

    #[test]
    fn test_write_register_port_sequence() {
        let (mock, written) = scripted_mock(vec![(0x66, 0x00), (0x66, 0x00), (0x66, 0x00)]);
        let mut ec = EmbeddedController::new(mock, EcPorts::default(), EcTiming::default(), Arc::new(SystemClock));
        ec.check_availability();
        ec.write_fan_speed_raw(0x33).unwrap();
        assert_eq!(*written.lock().unwrap(), vec![(0x66, 0x81), (0x62, 0x94), (0x62, 0x33)]);
    }

    #[test]
    fn test_wait_spins_until_ready() {
        let mut fake = FakeEc::new();
        fake.set_register(0xA8, 40);
        fake.set_busy_polls(5);
        let mut ec = ec_over(fake, Arc::new(SystemClock));
        assert_eq!(ec.read_register(0xA8).unwrap(), 40);
        assert!(ec.transport().status_polls() >= 5);
    }

    #[test]
    fn test_timeout_when_input_buffer_never_clears() {
        let mut fake = FakeEc::new();
        fake.set_stuck(true);
        let clock = Arc::new(ManualClock::auto_advancing(Duration::from_millis(1)));
        let mut ec = ec_over(fake, clock.clone());

        let err = ec.read_register(0xA8).unwrap_err();
        match err {
            AcerfanError::Timeout { stage, waited_ms } => {
                assert_eq!(stage, STAGE_WRITE_READY);
                assert!(waited_ms > 100);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Bounded: roughly one poll per simulated millisecond
        assert!(ec.transport().status_polls() < 200);
    }

    #[test]
    fn test_timeout_waiting_for_data() {
        let mut fake = FakeEc::new();
        fake.set_data_never_ready(true);
        let clock = Arc::new(ManualClock::auto_advancing(Duration::from_millis(5)));
        let mut ec = ec_over(fake, clock);
        let err = ec.read_register(0xA8).unwrap_err();
        assert!(matches!(err, AcerfanError::Timeout { stage: STAGE_READ_READY, .. }));
        // Writes never wait on read-ready
        assert!(ec.write_register(0x94, 1).is_ok());
    }

    #[test]
    fn test_timeout_counts_from_operation_start() {
        let fake = FakeEc::new();
        let clock = Arc::new(ManualClock::new());
        let mut ec = ec_over(fake, clock.clone());
        // Time passing between operations must not count against the next one
        clock.advance(Duration::from_secs(10));
        assert!(ec.read_register(0xA8).is_ok());
    }

    #[test]
    fn test_port_error_is_reported_with_address() {
        let mut mock = MockPortTransport::new();
        mock.expect_is_available().return_const(true);
        mock.expect_read_port()
            .returning(|_| Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")));
        let mut ec = EmbeddedController::new(mock, EcPorts::default(), EcTiming::default(), Arc::new(SystemClock));
        ec.check_availability();
        let err = ec.read_register(0xA8).unwrap_err();
        assert!(matches!(err, AcerfanError::Port { addr: 0x66, .. }));
        assert!(err.is_ec_fault());
    }
}
