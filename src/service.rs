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

//! Host side of the regulator: profile selection, the tick loop and the
//! one-shot commands.
//!
//! Ticks are run on the calling thread, so two ticks never overlap. Signals
//! only raise flags; the loop notices them within [`SLEEP_SLICE`] and acts on
//! them between ticks.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::curves::Scales;
use crate::display::LogSink;
use crate::ec::{ControlMode, EcPorts, EmbeddedController};
use crate::error::{AcerfanError, Result};
use crate::profile::{FanProfile, ProfileSet};
use crate::regulator::Regulator;
use crate::transport::{open_or_unavailable, PortTransport, DEV_PORT_PATH};

/// Longest uninterrupted sleep between flag checks
pub const SLEEP_SLICE: Duration = Duration::from_millis(50);

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);
static RELOAD_REQUESTED: AtomicBool = AtomicBool::new(false);
static NEXT_PROFILE_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Requests the host loop polls between ticks.
#[derive(Debug, Clone, Copy)]
pub struct HostSignals<'a> {
    /// Hand the fan back and exit
    pub stop: &'a AtomicBool,
    /// Re-read the configuration
    pub reload: &'a AtomicBool,
    /// Cycle to the next profile in menu order
    pub next_profile: &'a AtomicBool,
}

extern "C" fn on_reload_signal(_: libc::c_int) {
    RELOAD_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn on_next_profile_signal(_: libc::c_int) {
    NEXT_PROFILE_REQUESTED.store(true, Ordering::SeqCst);
}

fn set_flag_handler(signum: libc::c_int, handler: extern "C" fn(libc::c_int)) -> Result<()> {
    // SAFETY: the handler only stores to a static atomic
    let previous = unsafe { libc::signal(signum, handler as libc::sighandler_t) };
    if previous == libc::SIG_ERR {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

/// SIGINT/SIGTERM raise `stop`, SIGHUP raises `reload` and SIGUSR1 raises
/// `next_profile`. Can only be installed once per process.
pub fn install_signal_handlers() -> Result<HostSignals<'static>> {
    ctrlc::set_handler(|| {
        info!("SIGNAL: received SIGINT/SIGTERM, returning fan to firmware");
        STOP_REQUESTED.store(true, Ordering::SeqCst);
    })?;
    // Replaces the SIGHUP handler ctrlc just installed: hangup means reload
    set_flag_handler(libc::SIGHUP, on_reload_signal)?;
    set_flag_handler(libc::SIGUSR1, on_next_profile_signal)?;
    Ok(HostSignals {
        stop: &STOP_REQUESTED,
        reload: &RELOAD_REQUESTED,
        next_profile: &NEXT_PROFILE_REQUESTED,
    })
}

/// Open `/dev/port` (or degrade) and check that port access works.
pub fn open_controller(config: &Config) -> EmbeddedController<Box<dyn PortTransport>> {
    let clock: SharedClock = Arc::new(SystemClock);
    let mut ec = EmbeddedController::new(
        open_or_unavailable(DEV_PORT_PATH),
        config.ports.clone(),
        config.timing,
        clock,
    );
    ec.check_availability();
    ec
}

pub fn build_regulator(config: &Config) -> Regulator<Box<dyn PortTransport>> {
    Regulator::new(open_controller(config), config.scales, LogSink::new())
}

/// Named profile, or the configured default when `name` is `None`.
pub fn select_profile(profiles: &ProfileSet, name: Option<&str>) -> Result<Arc<FanProfile>> {
    match name {
        None => Ok(profiles.default_profile()),
        Some(name) => profiles.find(name).ok_or_else(|| {
            let known: Vec<&str> = profiles.iter().map(|p| p.name()).collect();
            AcerfanError::Config(format!("unknown profile '{name}' (available: {})", known.join(", ")))
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Due,
    Stop,
    Reload,
    NextProfile,
}

/// Sleep until `deadline` or until one of `signals` is raised. Stop wins over
/// the other requests; a reload or profile request is consumed.
fn wait_for_wake(clock: &SharedClock, deadline: Instant, signals: &HostSignals<'_>) -> Wake {
    loop {
        if signals.stop.load(Ordering::SeqCst) {
            return Wake::Stop;
        }
        if signals.reload.swap(false, Ordering::SeqCst) {
            return Wake::Reload;
        }
        if signals.next_profile.swap(false, Ordering::SeqCst) {
            return Wake::NextProfile;
        }
        let now = clock.now();
        if now >= deadline {
            return Wake::Due;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

/// Sleep until `deadline` or until `stop` is raised. Returns false when stopped.
fn wait_until(clock: &SharedClock, deadline: Instant, stop: &AtomicBool) -> bool {
    let idle = AtomicBool::new(false);
    let signals = HostSignals { stop, reload: &idle, next_profile: &idle };
    wait_for_wake(clock, deadline, &signals) == Wake::Due
}

/// Long-running host for `acerfan run`. Owns the current configuration
/// snapshot and applies reload and profile requests between ticks.
pub struct ServiceHost<'a, L> {
    signals: HostSignals<'a>,
    profiles: ProfileSet,
    ports: EcPorts,
    loader: L,
}

impl<'a, L> ServiceHost<'a, L>
where
    L: FnMut() -> Result<Config>,
{
    /// `loader` produces a fresh configuration whenever a reload is requested.
    pub fn new(config: &Config, signals: HostSignals<'a>, loader: L) -> Self {
        Self {
            signals,
            profiles: config.profiles.clone(),
            ports: config.ports.clone(),
            loader,
        }
    }

    /// Profiles of the current snapshot
    pub fn profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    /// Run `profile` until stop is requested. The fan is handed back to the
    /// firmware on every exit path; a fatal EC fault is returned after that.
    pub fn run<T: PortTransport>(&mut self, regulator: &mut Regulator<T>, profile: Arc<FanProfile>) -> Result<()> {
        let result = self.drive(regulator, profile);
        if let Err(e) = &result {
            error!("Stopping after fatal EC fault: {e}");
        }
        regulator.shutdown();
        result
    }

    fn drive<T: PortTransport>(&mut self, regulator: &mut Regulator<T>, profile: Arc<FanProfile>) -> Result<()> {
        let clock = regulator.ec().clock().clone();
        let mut next = clock.now();

        regulator.run_profile(profile)?;
        loop {
            next += regulator.poll_interval().unwrap_or(SLEEP_SLICE);
            // Don't try to catch up after a stall
            let now = clock.now();
            if next < now {
                next = now;
            }
            match wait_for_wake(&clock, next, &self.signals) {
                Wake::Stop => return Ok(()),
                Wake::Due => regulator.tick()?,
                Wake::Reload => {
                    self.reload(regulator)?;
                    next = clock.now();
                }
                Wake::NextProfile => {
                    self.next_profile(regulator)?;
                    next = clock.now();
                }
            }
        }
    }

    /// Swap in a freshly loaded configuration and rerun the active profile
    /// under its new definition, or the new default when its name is gone.
    /// A failed load keeps the current snapshot running.
    pub fn reload<T: PortTransport>(&mut self, regulator: &mut Regulator<T>) -> Result<()> {
        info!("SIGNAL: reloading configuration");
        let config = match (self.loader)() {
            Ok(config) => config,
            Err(e) => {
                warn!("Configuration reload failed, keeping current settings: {e}");
                return Ok(());
            }
        };
        if config.ports != self.ports {
            warn!("EC port map changed; restart acerfan to apply it");
        }
        regulator.set_scales(config.scales);
        regulator.ec_mut().set_timing(config.timing);

        let current = regulator.active_profile().map(|p| p.name().to_string());
        let profile = match current.as_deref().and_then(|name| config.profiles.find(name)) {
            Some(profile) => profile,
            None => {
                let fallback = config.profiles.default_profile();
                if let Some(name) = &current {
                    warn!("Profile '{name}' no longer configured, switching to '{}'", fallback.name());
                }
                fallback
            }
        };
        self.profiles = config.profiles;
        regulator.run_profile(profile)
    }

    /// Advance to the next profile in menu order, wrapping back to the
    /// firmware sentinel after the last configured profile.
    pub fn next_profile<T: PortTransport>(&mut self, regulator: &mut Regulator<T>) -> Result<()> {
        let menu: Vec<&Arc<FanProfile>> = self.profiles.iter().collect();
        let position = regulator
            .active_profile()
            .and_then(|active| menu.iter().position(|p| p.name().eq_ignore_ascii_case(active.name())));
        let next = match position {
            Some(i) => menu[(i + 1) % menu.len()].clone(),
            None => self.profiles.default_profile(),
        };
        info!("SIGNAL: switching to profile '{}'", next.name());
        regulator.run_profile(next)
    }
}

/// Hold a fixed speed until `stop` is raised or `hold` has elapsed, then
/// return control to the firmware.
pub fn hold_fan_speed<T: PortTransport>(
    regulator: &mut Regulator<T>,
    pct: u8,
    hold: Option<Duration>,
    stop: &AtomicBool,
) -> Result<()> {
    let clock = regulator.ec().clock().clone();
    let result = regulator.set_fan_speed(pct);
    match &result {
        Ok(()) => {
            info!("Holding fan at {}%", regulator.state().fan_speed_pct);
            match hold {
                Some(hold) => {
                    let deadline = clock.now() + hold;
                    wait_until(&clock, deadline, stop);
                }
                None => while wait_until(&clock, clock.now() + SLEEP_SLICE, stop) {},
            }
        }
        Err(e) => warn!("Failed to set fan speed: {e}"),
    }
    regulator.shutdown();
    result
}

/// One-shot reading of the EC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcStatus {
    pub available: bool,
    pub temperature_c: u8,
    pub fan_speed_pct: u8,
    pub mode: ControlMode,
}

impl fmt::Display for EcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.available {
            return write!(f, "EC unavailable (run as root with /dev/port present)");
        }
        write!(
            f,
            "CPU {}°C, fan {}%, control: {}",
            self.temperature_c, self.fan_speed_pct, self.mode
        )
    }
}

pub fn read_status<T: PortTransport>(ec: &mut EmbeddedController<T>, scales: &Scales) -> Result<EcStatus> {
    if !ec.is_available() {
        return Ok(EcStatus {
            available: false,
            temperature_c: 0,
            fan_speed_pct: 0,
            mode: ControlMode::Firmware,
        });
    }
    Ok(EcStatus {
        available: true,
        temperature_c: scales.temperature_c(ec.read_temperature_raw()?),
        fan_speed_pct: scales.fan_percent(ec.read_fan_speed_raw()?),
        mode: ec.control_mode()?,
    })
}
