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

//! Closed-loop fan regulation
//!
//! The regulator is passive: the host calls [`Regulator::tick`] once per poll
//! interval of the active profile and must never overlap two ticks.
//!
//! # States
//! - **Firmware**: the EC's own logic drives the fan, we only observe it
//! - **Manual**: we computed and wrote the current speed
//!
//! The regulator starts in Firmware. It switches to Manual the first time a
//! curve profile computes a speed different from the last observed one, and
//! back to Firmware when the firmware profile is run. Setting a speed directly
//! always takes the fan over. [`Regulator::shutdown`]
//! (also run on drop) forces Firmware unconditionally.
//!
//! # Fault tolerance
//! EC faults inside a tick are swallowed unless two others happened within the
//! last ten poll intervals; the third one in that window is returned to the
//! caller. A successful tick forgets earlier faults.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::curves::{crosses_hysteresis, Scales, MAX_FAN_PCT};
use crate::display::DisplaySink;
use crate::ec::{ControlMode, EmbeddedController};
use crate::error::Result;
use crate::profile::FanProfile;
use crate::transport::PortTransport;

/// Fault window length in poll intervals of the active profile
pub const FAULT_WINDOW_INTERVALS: u32 = 10;

/// Mutable state owned by the regulator
#[derive(Debug, Clone, PartialEq)]
pub struct RegulatorState {
    pub fan_speed_pct: u8,
    pub temperature_c: u8,
    pub firmware_control: bool,
    pub active_profile: Option<Arc<FanProfile>>,
}

impl RegulatorState {
    pub fn control_mode(&self) -> ControlMode {
        if self.firmware_control {
            ControlMode::Firmware
        } else {
            ControlMode::Manual
        }
    }
}

impl Default for RegulatorState {
    fn default() -> Self {
        Self {
            fan_speed_pct: 0,
            temperature_c: 0,
            firmware_control: true,
            active_profile: None,
        }
    }
}

/// Timestamps of the two most recent swallowed faults.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FaultWindow {
    recent: [Option<Instant>; 2],
}

impl FaultWindow {
    /// Record a fault at `now`. Returns true when both remembered faults are
    /// newer than `now - window`, i.e. this is the third within the window.
    pub fn record(&mut self, now: Instant, window: Duration) -> bool {
        let cutoff = now.checked_sub(window);
        let within = |t: Option<Instant>| match (t, cutoff) {
            (Some(t), Some(cutoff)) => t > cutoff,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if self.recent.iter().all(|t| within(*t)) {
            return true;
        }
        // Oldest (or empty) slot goes to the front, then gets replaced
        self.recent.sort();
        self.recent[0] = Some(now);
        false
    }

    pub fn clear(&mut self) {
        self.recent = [None, None];
    }

    pub fn count(&self) -> usize {
        self.recent.iter().filter(|t| t.is_some()).count()
    }
}

pub struct Regulator<T: PortTransport> {
    ec: EmbeddedController<T>,
    scales: Scales,
    sink: Box<dyn DisplaySink>,
    state: RegulatorState,
    /// Temperature at the last speed change; reference for hysteresis
    prior_temp_c: u8,
    faults: FaultWindow,
    shut_down: bool,
}

impl<T: PortTransport> Regulator<T> {
    pub fn new(ec: EmbeddedController<T>, scales: Scales, sink: impl DisplaySink + 'static) -> Self {
        Self {
            ec,
            scales,
            sink: Box::new(sink),
            state: RegulatorState::default(),
            prior_temp_c: 0,
            faults: FaultWindow::default(),
            shut_down: false,
        }
    }

    pub fn state(&self) -> &RegulatorState {
        &self.state
    }

    pub fn active_profile(&self) -> Option<&Arc<FanProfile>> {
        self.state.active_profile.as_ref()
    }

    /// Interval the host should wait between ticks
    pub fn poll_interval(&self) -> Option<Duration> {
        self.state.active_profile.as_ref().map(|p| p.poll_interval())
    }

    pub fn ec(&self) -> &EmbeddedController<T> {
        &self.ec
    }

    pub fn ec_mut(&mut self) -> &mut EmbeddedController<T> {
        &mut self.ec
    }

    pub fn faults(&self) -> &FaultWindow {
        &self.faults
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Make `profile` active and apply it right away with one tick.
    pub fn run_profile(&mut self, profile: Arc<FanProfile>) -> Result<()> {
        info!(
            "Running profile '{}' (interval {} ms)",
            profile.name(),
            profile.poll_interval().as_millis()
        );
        self.state.active_profile = Some(profile);
        self.prior_temp_c = 0;
        self.tick()
    }

    /// One control-loop iteration. Returns an error only for the third EC fault
    /// within the fault window.
    pub fn tick(&mut self) -> Result<()> {
        if self.shut_down {
            debug!("Tick after shutdown ignored");
            return Ok(());
        }
        let Some(profile) = self.state.active_profile.clone() else {
            debug!("Tick without an active profile ignored");
            return Ok(());
        };

        match self.tick_inner(&profile) {
            Ok(()) => {
                self.faults.clear();
                Ok(())
            }
            Err(e) => {
                let now = self.ec.clock().now();
                let window = profile.poll_interval() * FAULT_WINDOW_INTERVALS;
                if self.faults.record(now, window) {
                    error!("EC fault repeated within {} ms: {e}", window.as_millis());
                    Err(e)
                } else {
                    warn!("EC fault ignored ({} in window): {e}", self.faults.count());
                    Ok(())
                }
            }
        }
    }

    fn tick_inner(&mut self, profile: &FanProfile) -> Result<()> {
        let raw = self.ec.read_temperature_raw()?;
        let temp = self.scales.temperature_c(raw);
        self.state.temperature_c = temp;

        if profile.is_firmware() {
            let raw_fan = self.ec.read_fan_speed_raw()?;
            self.state.fan_speed_pct = self.scales.fan_percent(raw_fan);
            self.set_firmware_control(true)?;
        } else if crosses_hysteresis(self.prior_temp_c, temp, profile.up_hysteresis(), profile.down_hysteresis()) {
            if let Some(target) = profile.target_percent(temp) {
                self.change_speed(target)?;
            }
        }

        self.sink.on_status(profile, temp, self.state.fan_speed_pct);
        Ok(())
    }

    /// Set the fan directly, bypassing the curve. Values above 100 are
    /// clamped. From firmware control this always takes the fan over and
    /// writes, even when the firmware happens to run at the same speed; in
    /// manual control an unchanged speed writes nothing.
    pub fn set_fan_speed(&mut self, pct: u8) -> Result<()> {
        let pct = pct.min(MAX_FAN_PCT);
        if pct == self.state.fan_speed_pct && !self.state.firmware_control {
            return Ok(());
        }
        self.write_speed(pct)
    }

    /// Curve path: only a changed speed is written, so a curve that agrees
    /// with the firmware leaves it in charge.
    fn change_speed(&mut self, pct: u8) -> Result<()> {
        let pct = pct.min(MAX_FAN_PCT);
        if pct == self.state.fan_speed_pct {
            return Ok(());
        }
        self.write_speed(pct)
    }

    fn write_speed(&mut self, pct: u8) -> Result<()> {
        if self.state.firmware_control {
            self.set_firmware_control(false)?;
        }
        self.ec.write_fan_speed_raw(self.scales.fan_raw(pct))?;
        debug!(
            "Fan speed {}% -> {}% at {}°C",
            self.state.fan_speed_pct, pct, self.state.temperature_c
        );
        self.prior_temp_c = self.state.temperature_c;
        self.state.fan_speed_pct = pct;
        Ok(())
    }

    /// Replace the raw conversion scales, e.g. after a configuration reload.
    /// Takes effect on the next register access.
    pub fn set_scales(&mut self, scales: Scales) {
        self.scales = scales;
    }

    pub fn scales(&self) -> Scales {
        self.scales
    }

    /// Switch between firmware and manual control; writes only on change.
    pub fn set_firmware_control(&mut self, enabled: bool) -> Result<()> {
        if self.state.firmware_control == enabled {
            return Ok(());
        }
        let mode = if enabled { ControlMode::Firmware } else { ControlMode::Manual };
        self.ec.set_control_mode(mode)?;
        self.state.firmware_control = enabled;
        info!("Fan control mode: {mode}");
        Ok(())
    }

    /// Hand the fan back to the firmware. Always writes the control register
    /// and never fails; errors are logged.
    pub fn shutdown(&mut self) {
        self.shut_down = true;
        match self.ec.set_control_mode(ControlMode::Firmware) {
            Ok(()) => info!("Fan control returned to firmware"),
            Err(e) => error!("Failed to return fan control to firmware: {e}"),
        }
        self.state.firmware_control = true;
    }
}

impl<T: PortTransport> Drop for Regulator<T> {
    fn drop(&mut self) {
        if !self.shut_down {
            self.shutdown();
        }
    }
}
