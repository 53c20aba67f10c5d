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

//! Temperature → fan speed curve evaluation and raw register conversions.

use serde::{Deserialize, Serialize};

/// Lower anchor used when no breakpoint lies at or below the temperature.
pub const LOWER_DEFAULT: CurvePoint = CurvePoint { temp_c: 0, fan_pct: 0 };
/// Upper anchor used when no breakpoint lies at or above the temperature.
pub const UPPER_DEFAULT: CurvePoint = CurvePoint { temp_c: 99, fan_pct: 100 };

pub const MAX_FAN_PCT: u8 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    #[serde(rename = "temp")]
    pub temp_c: u8,
    #[serde(rename = "fan")]
    pub fan_pct: u8,
}

impl CurvePoint {
    pub const fn new(temp_c: u8, fan_pct: u8) -> Self {
        Self { temp_c, fan_pct }
    }
}

/// Bracket `temp_c` between the highest point at or below it and the lowest
/// point at or above it. Points need not be sorted.
pub fn bracket(points: &[CurvePoint], temp_c: u8) -> (CurvePoint, CurvePoint) {
    let mut lower: Option<CurvePoint> = None;
    let mut upper: Option<CurvePoint> = None;
    for p in points {
        if p.temp_c <= temp_c && lower.map_or(true, |l| p.temp_c > l.temp_c) {
            lower = Some(*p);
        }
        if p.temp_c >= temp_c && upper.map_or(true, |u| p.temp_c < u.temp_c) {
            upper = Some(*p);
        }
    }
    (lower.unwrap_or(LOWER_DEFAULT), upper.unwrap_or(UPPER_DEFAULT))
}

/// Piecewise-linear fan speed for `temp_c`, truncated and clamped to 0..=100.
pub fn interp_fan_percent(points: &[CurvePoint], temp_c: u8) -> u8 {
    let (lower, upper) = bracket(points, temp_c);
    // Exact breakpoint, or past the upper anchor
    if lower.temp_c >= upper.temp_c {
        return upper.fan_pct.min(MAX_FAN_PCT);
    }
    let slope = (f32::from(upper.fan_pct) - f32::from(lower.fan_pct))
        / f32::from(upper.temp_c - lower.temp_c);
    let v = f32::from(lower.fan_pct) + slope * f32::from(temp_c - lower.temp_c);
    v.clamp(0.0, f32::from(MAX_FAN_PCT)) as u8
}

/// True when `temp_c` moved far enough from `prior_c` to recompute the speed.
pub fn crosses_hysteresis(prior_c: u8, temp_c: u8, up: u8, down: u8) -> bool {
    let (prior, temp) = (i32::from(prior_c), i32::from(temp_c));
    temp >= prior + i32::from(up) || temp <= prior - i32::from(down)
}

/// Raw EC units per human unit. A negative scale means the raw encoding counts
/// down from 255.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scale(pub f32);

impl Scale {
    pub fn is_inverted(self) -> bool {
        self.0 < 0.0
    }

    fn offset(self) -> f32 {
        if self.is_inverted() { 255.0 } else { 0.0 }
    }

    pub fn to_value(self, raw: u8) -> f32 {
        (f32::from(raw) - self.offset()) / self.0
    }

    pub fn to_raw(self, value: f32) -> u8 {
        (self.offset() + value * self.0).round().clamp(0.0, 255.0) as u8
    }
}

/// Conversion pair for the two EC registers the regulator uses.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Scales {
    pub temperature: Scale,
    pub fan_speed: Scale,
}

impl Scales {
    /// Celsius, truncated like the EC reports whole degrees.
    pub fn temperature_c(&self, raw: u8) -> u8 {
        self.temperature.to_value(raw).clamp(0.0, 255.0) as u8
    }

    pub fn fan_percent(&self, raw: u8) -> u8 {
        self.fan_speed
            .to_value(raw)
            .round()
            .clamp(0.0, f32::from(MAX_FAN_PCT)) as u8
    }

    pub fn fan_raw(&self, pct: u8) -> u8 {
        self.fan_speed.to_raw(f32::from(pct.min(MAX_FAN_PCT)))
    }
}

impl Default for Scales {
    fn default() -> Self {
        Self {
            temperature: Scale(1.0),
            fan_speed: Scale(2.55),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(raw: &[(u8, u8)]) -> Vec<CurvePoint> {
        raw.iter().map(|&(t, f)| CurvePoint::new(t, f)).collect()
    }

    #[test]
    fn test_interp_worked_example() {
        let points = pts(&[(0, 0), (40, 0), (60, 50), (80, 100)]);
        assert_eq!(bracket(&points, 70), (CurvePoint::new(60, 50), CurvePoint::new(80, 100)));
        assert_eq!(interp_fan_percent(&points, 70), 75);
    }

    #[test]
    fn test_interp_exact_breakpoints() {
        let points = pts(&[(30, 20), (50, 50), (70, 80)]);
        assert_eq!(interp_fan_percent(&points, 30), 20);
        assert_eq!(interp_fan_percent(&points, 50), 50);
        assert_eq!(interp_fan_percent(&points, 70), 80);
    }

    #[test]
    fn test_interp_linear_segments_truncate() {
        let points = pts(&[(30, 20), (50, 50), (70, 80)]);
        assert_eq!(interp_fan_percent(&points, 40), 35);
        assert_eq!(interp_fan_percent(&points, 60), 65);
        // 20 + 1.5 * 3 = 24.5 → 24
        assert_eq!(interp_fan_percent(&points, 33), 24);
    }

    #[test]
    fn test_interp_below_curve_uses_zero_anchor() {
        let points = pts(&[(30, 30), (70, 80)]);
        // (0,0) → (30,30): 1% per degree
        assert_eq!(interp_fan_percent(&points, 20), 20);
        assert_eq!(interp_fan_percent(&points, 0), 0);
    }

    #[test]
    fn test_interp_below_curve_with_zero_point() {
        let points = pts(&[(0, 25), (60, 25), (80, 100)]);
        assert_eq!(interp_fan_percent(&points, 10), 25);
        assert_eq!(interp_fan_percent(&points, 0), 25);
    }

    #[test]
    fn test_interp_above_curve() {
        let points = pts(&[(40, 10), (99, 60)]);
        assert_eq!(interp_fan_percent(&points, 99), 60);
        // Past 99 nothing brackets from above; lower == last point beyond anchor
        assert_eq!(interp_fan_percent(&points, 120), 100);

        let capped = pts(&[(40, 10), (80, 100)]);
        // (80,100) → (99,100)
        assert_eq!(interp_fan_percent(&capped, 90), 100);
    }

    #[test]
    fn test_interp_empty_curve_uses_anchors() {
        assert_eq!(interp_fan_percent(&[], 0), 0);
        assert_eq!(interp_fan_percent(&[], 120), 100);
        // 0 + 100/99 * 50 = 50.5 → 50
        assert_eq!(interp_fan_percent(&[], 50), 50);
    }

    #[test]
    fn test_interp_unsorted_points() {
        let points = pts(&[(80, 100), (0, 0), (60, 50), (40, 0)]);
        assert_eq!(interp_fan_percent(&points, 70), 75);
    }

    #[test]
    fn test_interp_clamps_bad_breakpoint() {
        let points = pts(&[(50, 250)]);
        assert_eq!(interp_fan_percent(&points, 50), 100);
        assert_eq!(interp_fan_percent(&points, 49), 100);
    }

    #[test]
    fn test_interp_monotonic_between_breakpoints() {
        let points = pts(&[(0, 0), (40, 10), (60, 50), (80, 100)]);
        let mut last = 0;
        for t in 0..=99u8 {
            let v = interp_fan_percent(&points, t);
            assert!(v >= last, "not monotonic at {t}: {v} < {last}");
            assert!(v <= 100);
            last = v;
        }
    }

    #[test]
    fn test_hysteresis_thresholds() {
        assert!(!crosses_hysteresis(50, 52, 3, 5));
        assert!(crosses_hysteresis(50, 53, 3, 5));
        assert!(!crosses_hysteresis(50, 46, 3, 5));
        assert!(crosses_hysteresis(50, 45, 3, 5));
        assert!(!crosses_hysteresis(50, 50, 3, 5));
    }

    #[test]
    fn test_hysteresis_from_reset_reference() {
        // After a profile switch the reference is 0: any warm reading recomputes
        assert!(crosses_hysteresis(0, 35, 2, 4));
        // Down threshold below zero never fires
        assert!(!crosses_hysteresis(0, 0, 2, 4));
        assert!(crosses_hysteresis(0, 0, 0, 4));
    }

    #[test]
    fn test_scale_plain() {
        let s = Scales::default();
        assert_eq!(s.temperature_c(57), 57);
        assert_eq!(s.fan_raw(0), 0);
        assert_eq!(s.fan_raw(40), 102);
        assert_eq!(s.fan_raw(100), 255);
        assert_eq!(s.fan_percent(255), 100);
        assert_eq!(s.fan_percent(128), 50);
    }

    #[test]
    fn test_scale_inverted() {
        let s = Scales { temperature: Scale(-1.0), fan_speed: Scale(-2.55) };
        assert!(s.fan_speed.is_inverted());
        assert_eq!(s.temperature_c(255 - 60), 60);
        assert_eq!(s.fan_raw(0), 255);
        assert_eq!(s.fan_raw(100), 0);
        assert_eq!(s.fan_percent(255), 0);
        assert_eq!(s.fan_percent(0), 100);
    }

    #[test]
    fn test_scale_clamps() {
        let s = Scales::default();
        assert_eq!(s.fan_raw(180), 255);
        let wide = Scales { temperature: Scale(0.5), fan_speed: Scale(1.0) };
        assert_eq!(wide.fan_percent(200), 100);
        assert_eq!(wide.temperature_c(200), 255);
    }

    #[test]
    fn test_curve_point_serde_names() {
        let json = serde_json::to_string(&CurvePoint::new(60, 50)).unwrap();
        assert_eq!(json, r#"{"temp":60,"fan":50}"#);
        let p: CurvePoint = serde_json::from_str(r#"{"temp":40,"fan":0}"#).unwrap();
        assert_eq!(p, CurvePoint::new(40, 0));
    }
}
