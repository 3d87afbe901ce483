//! Temperature to duty mapping.
//!
//! A [`SpeedProfile`] is either a table of half-open temperature rows or a
//! pair of interpolated curves. Whatever the sensor says, the result is
//! clamped into the safe range for the channel kind.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::descriptor::ChannelKind;

pub const FAN_MIN: u8 = 20;
pub const PUMP_MIN: u8 = 50;
pub const PUMP_CHANNEL_MIN: u8 = 70;
pub const DUTY_MAX: u8 = 100;

/// Substitute for an absent sensor reading.
pub const FALLBACK_TEMPERATURE: f32 = 50.0;

/// Where a speed profile reads its input temperature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "sensor", rename_all = "kebab-case")]
pub enum SensorSource {
    Cpu,
    Gpu,
    CpuGpuMax,
    Liquid,
    Hwmon { chip: String, input: String },
    External { path: PathBuf },
    MultiGpu { index: u32 },
    Global { serial: String, channel: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub min: f32,
    pub max: f32,
    pub pump: u8,
    pub fan: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub temp: f32,
    pub duty: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SpeedMode {
    Table { rows: Vec<TableRow> },
    Curve { pump: Vec<CurvePoint>, fan: Vec<CurvePoint> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedProfile {
    #[serde(flatten)]
    pub sensor: SensorSource,
    pub mode: SpeedMode,
    /// Stored and returned to clients as written. The fan floor of
    /// [`FAN_MIN`] still applies, so the flag never stops a fan.
    #[serde(default)]
    pub zero_rpm: bool,
    /// Only valid on power supplies.
    #[serde(default)]
    pub psu: bool,
}

impl SpeedProfile {
    pub fn table(sensor: SensorSource, rows: &[(f32, f32, u8, u8)]) -> Self {
        Self {
            sensor,
            mode: SpeedMode::Table {
                rows: rows
                    .iter()
                    .map(|&(min, max, pump, fan)| TableRow {
                        min,
                        max,
                        pump,
                        fan,
                    })
                    .collect(),
            },
            zero_rpm: false,
            psu: false,
        }
    }

    /// Raw `(pump, fan)` duty for `temp` before clamping.
    pub fn raw_duty(&self, temp: f32) -> (u8, u8) {
        match &self.mode {
            SpeedMode::Table { rows } => table_lookup(rows, temp)
                .map(|r| (r.pump, r.fan))
                .unwrap_or((DUTY_MAX, DUTY_MAX)),
            SpeedMode::Curve { pump, fan } => (interpolate(pump, temp), interpolate(fan, temp)),
        }
    }

    /// Clamped duty for one channel.
    pub fn duty_for(&self, temp: f32, kind: ChannelKind, contains_pump: bool) -> u8 {
        let (pump, fan) = self.raw_duty(temp);
        clamp_duty(if kind == ChannelKind::Pump { pump } else { fan }, kind, contains_pump)
    }

    /// Converts a table into two curves through the row upper bounds.
    pub fn to_curve(&self) -> SpeedProfile {
        let SpeedMode::Table { rows } = &self.mode else {
            return self.clone();
        };
        let mut pump = Vec::with_capacity(rows.len() + 1);
        let mut fan = Vec::with_capacity(rows.len() + 1);
        if let Some(first) = rows.first() {
            pump.push(CurvePoint { temp: first.min, duty: first.pump });
            fan.push(CurvePoint { temp: first.min, duty: first.fan });
        }
        for row in rows {
            pump.push(CurvePoint { temp: row.max, duty: row.pump });
            fan.push(CurvePoint { temp: row.max, duty: row.fan });
        }
        SpeedProfile {
            mode: SpeedMode::Curve { pump, fan },
            ..self.clone()
        }
    }
}

/// Clamps a duty into the safe range of the channel kind.
pub fn clamp_duty(duty: u8, kind: ChannelKind, contains_pump: bool) -> u8 {
    let min = match kind {
        ChannelKind::Pump if contains_pump => PUMP_CHANNEL_MIN,
        ChannelKind::Pump => PUMP_MIN,
        ChannelKind::Fan | ChannelKind::Lighting => FAN_MIN,
    };
    duty.clamp(min, DUTY_MAX)
}

/// Finds the row whose interval `(min, max]` contains `temp`.
///
/// Values at or below the first row's lower bound use the first row; values
/// above the last row use the last row.
pub fn table_lookup(rows: &[TableRow], temp: f32) -> Option<&TableRow> {
    rows.iter()
        .find(|r| temp > r.min && temp <= r.max)
        .or_else(|| match rows.first() {
            Some(first) if temp <= first.min => Some(first),
            _ => rows.last(),
        })
}

fn interpolate(points: &[CurvePoint], temp: f32) -> u8 {
    let Some(first) = points.first() else {
        return DUTY_MAX;
    };
    if temp <= first.temp {
        return first.duty;
    }
    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if temp <= b.temp {
            let span = b.temp - a.temp;
            if span <= f32::EPSILON {
                return b.duty;
            }
            let t = (temp - a.temp) / span;
            let duty = f32::from(a.duty) + (f32::from(b.duty) - f32::from(a.duty)) * t;
            return duty.round().clamp(0.0, 100.0) as u8;
        }
    }
    points.last().map(|p| p.duty).unwrap_or(DUTY_MAX)
}

/// Profiles available when the configuration defines none.
pub fn builtin_profiles() -> BTreeMap<String, SpeedProfile> {
    let cpu_rows = |scale: f32| -> Vec<(f32, f32, u8, u8)> {
        let d = |v: f32| (v * scale).round().clamp(0.0, 100.0) as u8;
        vec![
            (0.0, 40.0, 70, d(30.0)),
            (40.0, 60.0, 80, d(50.0)),
            (60.0, 75.0, 90, d(75.0)),
            (75.0, 200.0, 100, 100),
        ]
    };
    let mut out = BTreeMap::new();
    out.insert(
        "Quiet".to_string(),
        SpeedProfile::table(SensorSource::Cpu, &cpu_rows(0.8)),
    );
    out.insert(
        "Normal".to_string(),
        SpeedProfile::table(SensorSource::Cpu, &cpu_rows(1.0)),
    );
    out.insert(
        "Performance".to_string(),
        SpeedProfile::table(SensorSource::Cpu, &cpu_rows(1.3)),
    );
    out.insert(
        "Liquid".to_string(),
        SpeedProfile::table(
            SensorSource::Liquid,
            &[
                (0.0, 30.0, 70, 30),
                (30.0, 35.0, 80, 50),
                (35.0, 40.0, 90, 75),
                (40.0, 100.0, 100, 100),
            ],
        ),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn normal_liquid() -> SpeedProfile {
        SpeedProfile::table(
            SensorSource::Liquid,
            &[(0.0, 40.0, 70, 30), (40.0, 60.0, 85, 60), (60.0, 100.0, 100, 100)],
        )
    }

    #[test]
    fn row_max_selects_its_own_row() {
        let p = normal_liquid();
        assert_eq!(p.raw_duty(40.0), (70, 30));
        assert_eq!(p.raw_duty(40.01), (85, 60));
        assert_eq!(p.raw_duty(60.0), (85, 60));
    }

    #[test]
    fn out_of_table_values_use_edge_rows() {
        let p = normal_liquid();
        assert_eq!(p.raw_duty(0.0), (70, 30));
        assert_eq!(p.raw_duty(-5.0), (70, 30));
        assert_eq!(p.raw_duty(130.0), (100, 100));
    }

    #[test]
    fn clamps_depend_on_channel_kind() {
        assert_eq!(clamp_duty(0, ChannelKind::Fan, false), 20);
        assert_eq!(clamp_duty(0, ChannelKind::Pump, false), 50);
        assert_eq!(clamp_duty(0, ChannelKind::Pump, true), 70);
        assert_eq!(clamp_duty(150, ChannelKind::Fan, false), 100);
    }

    #[test]
    fn curve_interpolates_linearly() {
        let p = SpeedProfile {
            sensor: SensorSource::Cpu,
            mode: SpeedMode::Curve {
                pump: vec![CurvePoint { temp: 20.0, duty: 60 }, CurvePoint { temp: 80.0, duty: 100 }],
                fan: vec![CurvePoint { temp: 20.0, duty: 20 }, CurvePoint { temp: 80.0, duty: 80 }],
            },
            zero_rpm: false,
            psu: false,
        };
        assert_eq!(p.raw_duty(50.0), (80, 50));
        assert_eq!(p.raw_duty(10.0), (60, 20));
        assert_eq!(p.raw_duty(95.0), (100, 80));
    }

    #[test]
    fn table_to_curve_keeps_row_endpoints() {
        let curve = normal_liquid().to_curve();
        assert_eq!(curve.raw_duty(40.0), (70, 30));
        assert_eq!(curve.raw_duty(60.0), (85, 60));
        assert_eq!(curve.raw_duty(50.0), (78, 45));
        assert_eq!(curve.sensor, SensorSource::Liquid);
    }

    #[test]
    fn sensor_source_serializes_with_tag() {
        let p = SpeedProfile::table(
            SensorSource::Global {
                serial: "ABC".into(),
                channel: 2,
            },
            &[(0.0, 100.0, 80, 40)],
        );
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains(r#""sensor":"global""#));
        let back: SpeedProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn zero_rpm_is_kept_but_fans_stay_above_the_floor() {
        let mut p = SpeedProfile::table(SensorSource::Cpu, &[(0.0, 100.0, 50, 0)]);
        p.zero_rpm = true;
        assert_eq!(p.duty_for(30.0, ChannelKind::Fan, false), FAN_MIN);
        let back: SpeedProfile = serde_json::from_str(&serde_json::to_string(&p).unwrap()).unwrap();
        assert!(back.zero_rpm);
    }

    #[test]
    fn builtins_include_normal() {
        let b = builtin_profiles();
        assert!(b.contains_key("Normal"));
        assert_eq!(b["Liquid"].sensor, SensorSource::Liquid);
    }

    proptest! {
        #[test]
        fn emitted_duty_stays_in_safe_range(temp in -50.0f32..250.0, pump in 0u8..=255, fan in 0u8..=255) {
            let p = SpeedProfile::table(SensorSource::Cpu, &[(0.0, 50.0, pump, fan), (50.0, 100.0, fan, pump)]);
            let f = p.duty_for(temp, ChannelKind::Fan, false);
            prop_assert!((20..=100).contains(&f));
            let pm = p.duty_for(temp, ChannelKind::Pump, false);
            prop_assert!((50..=100).contains(&pm));
            let pc = p.duty_for(temp, ChannelKind::Pump, true);
            prop_assert!((70..=100).contains(&pc));
        }
    }
}
