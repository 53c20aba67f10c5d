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

//! Acerfan - laptop fan control through the embedded controller
//!
//! This library speaks the EC's status/instruction/data port handshake, maps
//! temperatures to fan speeds with piecewise-linear curves, and runs a
//! closed-loop regulator that hands the fan back to the firmware whenever it
//! stops or gives up.

pub mod clock;
pub mod config;
pub mod curves;
pub mod display;
pub mod ec;
pub mod error;
pub mod logger;
pub mod profile;
pub mod regulator;
pub mod service;
pub mod transport;

pub use error::{AcerfanError, Result};

#[cfg(test)]
pub mod test_utils;
