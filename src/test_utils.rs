/*
 * Test utilities and mock helpers for Acerfan
 *
 * This module provides a simulated embedded controller, a recording display
 * sink and profile fixtures shared by the unit tests.
 */

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::Duration;

use tempfile::NamedTempFile;

use crate::curves::CurvePoint;
use crate::display::DisplaySink;
use crate::ec::EcPorts;
use crate::profile::FanProfile;
use crate::transport::PortTransport;

const IBF: u8 = 0x02;
const OBF: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    ReadAddress,
    WriteAddress,
    WriteData(u8),
}

/// In-memory ACPI-style EC speaking the status/instruction/data handshake.
#[derive(Debug)]
pub struct FakeEc {
    ports: EcPorts,
    registers: [u8; 256],
    phase: Phase,
    output: Option<u8>,
    busy_polls: u32,
    stuck: bool,
    data_never_ready: bool,
    port_error: bool,
    status_polls: u64,
    reads_completed: u64,
    writes_completed: u64,
    write_log: Vec<(u8, u8)>,
}

impl FakeEc {
    pub fn new() -> Self {
        Self {
            ports: EcPorts::default(),
            registers: [0; 256],
            phase: Phase::Idle,
            output: None,
            busy_polls: 0,
            stuck: false,
            data_never_ready: false,
            port_error: false,
            status_polls: 0,
            reads_completed: 0,
            writes_completed: 0,
            write_log: Vec::new(),
        }
    }

    /// EC with the given temperature and control register preset to firmware mode
    pub fn with_temperature(temp: u8) -> Self {
        let mut ec = Self::new();
        ec.set_register(ec.ports.cpu_temp_register, temp);
        ec.set_register(ec.ports.control_register, ec.ports.control_bios);
        ec
    }

    pub fn set_register(&mut self, reg: u8, value: u8) {
        self.registers[reg as usize] = value;
    }

    pub fn register(&self, reg: u8) -> u8 {
        self.registers[reg as usize]
    }

    pub fn set_temperature(&mut self, temp: u8) {
        let reg = self.ports.cpu_temp_register;
        self.set_register(reg, temp);
    }

    /// Report busy for the next `n` status polls
    pub fn set_busy_polls(&mut self, n: u32) {
        self.busy_polls = n;
    }

    /// Input buffer never drains: every wait times out
    pub fn set_stuck(&mut self, stuck: bool) {
        self.stuck = stuck;
    }

    pub fn set_data_never_ready(&mut self, never: bool) {
        self.data_never_ready = never;
    }

    /// Every port access fails at the OS level
    pub fn set_port_error(&mut self, fail: bool) {
        self.port_error = fail;
    }

    pub fn status_polls(&self) -> u64 {
        self.status_polls
    }

    pub fn reads_completed(&self) -> u64 {
        self.reads_completed
    }

    pub fn writes_completed(&self) -> u64 {
        self.writes_completed
    }

    /// Values written to `reg`, oldest first
    pub fn writes_to(&self, reg: u8) -> Vec<u8> {
        self.write_log.iter().filter(|(r, _)| *r == reg).map(|(_, v)| *v).collect()
    }

    fn status(&mut self) -> u8 {
        self.status_polls += 1;
        if self.stuck {
            return IBF;
        }
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            return IBF;
        }
        if self.output.is_some() && !self.data_never_ready {
            OBF
        } else {
            0
        }
    }
}

impl Default for FakeEc {
    fn default() -> Self {
        Self::new()
    }
}

impl PortTransport for FakeEc {
    fn is_available(&self) -> bool {
        true
    }

    fn read_port(&mut self, addr: u16) -> io::Result<u8> {
        if self.port_error {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated port failure"));
        }
        if addr == self.ports.status_address {
            return Ok(self.status());
        }
        if addr == self.ports.data_address {
            self.reads_completed += 1;
            return Ok(self.output.take().unwrap_or(0));
        }
        Ok(0xFF)
    }

    fn write_port(&mut self, addr: u16, value: u8) -> io::Result<()> {
        if self.port_error {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated port failure"));
        }
        if addr == self.ports.instruction_address {
            self.phase = if value == self.ports.instruct_read {
                Phase::ReadAddress
            } else if value == self.ports.instruct_write {
                Phase::WriteAddress
            } else {
                Phase::Idle
            };
            return Ok(());
        }
        if addr == self.ports.data_address {
            match self.phase {
                Phase::ReadAddress => {
                    self.output = Some(self.registers[value as usize]);
                    self.phase = Phase::Idle;
                }
                Phase::WriteAddress => self.phase = Phase::WriteData(value),
                Phase::WriteData(reg) => {
                    self.registers[reg as usize] = value;
                    self.write_log.push((reg, value));
                    self.writes_completed += 1;
                    self.phase = Phase::Idle;
                }
                Phase::Idle => {}
            }
        }
        Ok(())
    }
}

pub type StatusLog = Rc<RefCell<Vec<(String, u8, u8)>>>;

/// Display sink that keeps every status report
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub log: StatusLog,
}

impl RecordingSink {
    pub fn new() -> (Self, StatusLog) {
        let sink = Self::default();
        let log = sink.log.clone();
        (sink, log)
    }
}

impl DisplaySink for RecordingSink {
    fn on_status(&mut self, profile: &FanProfile, temperature_c: u8, fan_speed_pct: u8) {
        self.log
            .borrow_mut()
            .push((profile.name().to_string(), temperature_c, fan_speed_pct));
    }
}

/// Curve profile `[(0,0),(40,0),(60,50),(80,100)]`, hysteresis up 3 / down 5
pub fn create_test_curve_profile() -> FanProfile {
    FanProfile::curve(
        "Balanced",
        Duration::from_millis(1000),
        vec![
            CurvePoint::new(0, 0),
            CurvePoint::new(40, 0),
            CurvePoint::new(60, 50),
            CurvePoint::new(80, 100),
        ],
    )
    .unwrap()
    .with_hysteresis(3, 5)
}

/// Creates a temporary file with the given content
pub fn create_temp_file(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}
