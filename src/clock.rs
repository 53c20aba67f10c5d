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

//! Time source used by the EC handshake timeout and the regulator fault window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Shared handle to a time source.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by `Instant::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Deterministic clock for simulations and tests.
///
/// Time only moves when [`ManualClock::advance`] is called, or by `auto_step`
/// on every read. Auto-stepping lets a busy-wait loop observe time passing
/// without real delays.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset_ns: AtomicU64,
    auto_step_ns: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ns: AtomicU64::new(0),
            auto_step_ns: AtomicU64::new(0),
        }
    }

    /// Clock that advances by `step` each time it is read.
    pub fn auto_advancing(step: Duration) -> Self {
        let clock = Self::new();
        clock.set_auto_step(step);
        clock
    }

    pub fn set_auto_step(&self, step: Duration) {
        self.auto_step_ns.store(saturating_nanos(step), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ns.fetch_add(saturating_nanos(by), Ordering::SeqCst);
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_ns.load(Ordering::SeqCst))
    }
}

/// Nanoseconds of `d`, saturating at `u64::MAX` (about 584 years).
fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let step = self.auto_step_ns.load(Ordering::SeqCst);
        let offset = self.offset_ns.fetch_add(step, Ordering::SeqCst);
        self.base + Duration::from_nanos(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::new();
        let a = clock.now();
        let b = clock.now();
        assert_eq!(a, b);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now() - a, Duration::from_millis(250));
    }

    #[test]
    fn test_auto_advancing_clock() {
        let clock = ManualClock::auto_advancing(Duration::from_millis(1));
        let a = clock.now();
        let b = clock.now();
        assert_eq!(b - a, Duration::from_millis(1));
        assert_eq!(clock.elapsed(), Duration::from_millis(2));
    }

    #[test]
    fn test_huge_step_saturates() {
        assert_eq!(saturating_nanos(Duration::from_secs(u64::MAX)), u64::MAX);
        assert_eq!(saturating_nanos(Duration::from_millis(3)), 3_000_000);
        let clock = ManualClock::new();
        clock.set_auto_step(Duration::MAX);
        assert_eq!(clock.auto_step_ns.load(Ordering::SeqCst), u64::MAX);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
