use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Reading;

/// The four telemetry fields that are judged independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Temperature,
    Battery,
    Smoke,
    Co2,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Temperature => "temperature",
            Field::Battery => "battery",
            Field::Smoke => "smoke",
            Field::Co2 => "co2",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Nominal,
    /// Value is plausible but crosses a safety limit
    Dangerous,
    /// Value is physically impossible, the sensor is faulty
    Malfunction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Judgment {
    pub field: Field,
    pub verdict: Verdict,
    pub cause: Option<String>,
}

impl Judgment {
    fn nominal(field: Field) -> Self {
        Self {
            field,
            verdict: Verdict::Nominal,
            cause: None,
        }
    }

    fn failed(field: Field, verdict: Verdict, cause: String) -> Self {
        Self {
            field,
            verdict,
            cause: Some(cause),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.verdict == Verdict::Nominal
    }
}

/// Per-field judgments for one [`Reading`]. Computed fresh for every
/// reading, never stored
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub temperature: Judgment,
    pub battery: Judgment,
    pub smoke: Judgment,
    pub co2: Judgment,
}

impl ValidationResult {
    pub fn judgments(&self) -> [&Judgment; 4] {
        [&self.temperature, &self.battery, &self.smoke, &self.co2]
    }

    pub fn violations(&self) -> impl Iterator<Item = &Judgment> {
        self.judgments().into_iter().filter(|j| !j.is_valid())
    }

    pub fn is_nominal(&self) -> bool {
        self.violations().next().is_none()
    }
}

/// Safety limits applied to every reading. Malfunction bounds are checked
/// before danger bounds.
///
/// NOTE: the CO2 check only accepts the exact reference value, every other
/// level is reported as dangerous. This is kept configurable until someone
/// with domain knowledge supplies a real range
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    /// Absolute zero, anything below is a broken sensor
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub min_battery: i32,
    pub max_battery: i32,
    /// At or below this percentage the battery is reported low
    pub low_battery: i32,
    pub min_smoke: i32,
    pub max_smoke: i32,
    /// Smoke levels above this are dangerous
    pub danger_smoke: i32,
    pub co2_reference: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl Thresholds {
    pub const DEFAULT: Self = Self {
        min_temperature: -273.15,
        max_temperature: 50.0,
        min_battery: 0,
        max_battery: 100,
        low_battery: 30,
        min_smoke: 1,
        max_smoke: 10,
        danger_smoke: 7,
        co2_reference: 300.0,
    };

    pub fn validate(&self, reading: &Reading) -> ValidationResult {
        let id = reading.sensor_id();
        ValidationResult {
            temperature: self.temperature(id, reading.temperature()),
            battery: self.battery(id, reading.battery_percentage()),
            smoke: self.smoke(id, reading.smoke_level()),
            co2: self.co2(id, reading.co2_level()),
        }
    }

    pub fn temperature(&self, sensor_id: &str, celsius: f64) -> Judgment {
        if celsius < self.min_temperature {
            Judgment::failed(
                Field::Temperature,
                Verdict::Malfunction,
                format!(
                    "{sensor_id}: sensor malfunction, temperature of {celsius} C is below absolute zero"
                ),
            )
        } else if celsius > self.max_temperature {
            Judgment::failed(
                Field::Temperature,
                Verdict::Dangerous,
                format!("{sensor_id}: temperature is at a dangerous level of {celsius} C"),
            )
        } else {
            Judgment::nominal(Field::Temperature)
        }
    }

    pub fn battery(&self, sensor_id: &str, percentage: i32) -> Judgment {
        if percentage < self.min_battery || percentage > self.max_battery {
            Judgment::failed(
                Field::Battery,
                Verdict::Malfunction,
                format!("{sensor_id}: battery malfunction, reported {percentage}%"),
            )
        } else if percentage <= self.low_battery {
            Judgment::failed(
                Field::Battery,
                Verdict::Dangerous,
                format!("{sensor_id}: low battery at {percentage}%"),
            )
        } else {
            Judgment::nominal(Field::Battery)
        }
    }

    pub fn smoke(&self, sensor_id: &str, level: i32) -> Judgment {
        if level < self.min_smoke || level > self.max_smoke {
            Judgment::failed(
                Field::Smoke,
                Verdict::Malfunction,
                format!("{sensor_id}: smoke sensor malfunction, reported level {level}"),
            )
        } else if level > self.danger_smoke {
            Judgment::failed(
                Field::Smoke,
                Verdict::Dangerous,
                format!("{sensor_id}: smoke is at a dangerous level of {level}"),
            )
        } else {
            Judgment::nominal(Field::Smoke)
        }
    }

    pub fn co2(&self, sensor_id: &str, ppm: f64) -> Judgment {
        if ppm != self.co2_reference {
            Judgment::failed(
                Field::Co2,
                Verdict::Dangerous,
                format!("{sensor_id}: co2 is at a dangerous level of {ppm} ppm"),
            )
        } else {
            Judgment::nominal(Field::Co2)
        }
    }
}

/// Validate against the default [`Thresholds`]
pub fn validate(reading: &Reading) -> ValidationResult {
    Thresholds::DEFAULT.validate(reading)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn reading(temperature: f64, battery: i32, smoke: i32, co2: f64) -> Reading {
        Reading::new("t-1", temperature, battery, smoke, co2, Local::now()).unwrap()
    }

    #[test]
    fn nominal_readings_pass_every_check() {
        for (t, b, s) in [(-273.15, 31, 1), (20.0, 70, 3), (50.0, 100, 7)] {
            let result = validate(&reading(t, b, s, 300.0));
            assert!(result.is_nominal(), "{t} {b} {s}: {result:?}");
            assert_eq!(result.violations().count(), 0);
        }
    }

    #[test]
    fn temperature_limits() {
        let hot = validate(&reading(50.1, 70, 3, 300.0)).temperature;
        assert_eq!(hot.verdict, Verdict::Dangerous);
        let cause = hot.cause.unwrap();
        assert!(cause.contains("dangerous"));
        assert!(cause.contains("t-1"));
        assert!(cause.contains("50.1"));

        let frozen = validate(&reading(-273.16, 70, 3, 300.0)).temperature;
        assert_eq!(frozen.verdict, Verdict::Malfunction);
        assert!(frozen.cause.unwrap().contains("malfunction"));
    }

    #[test]
    fn battery_limits() {
        let t = Thresholds::default();
        assert_eq!(t.battery("b", 30).verdict, Verdict::Dangerous);
        assert_eq!(t.battery("b", 0).verdict, Verdict::Dangerous);
        assert!(t.battery("b", 31).is_valid());
        assert_eq!(t.battery("b", -1).verdict, Verdict::Malfunction);
        assert_eq!(t.battery("b", 101).verdict, Verdict::Malfunction);
    }

    #[test]
    fn smoke_limits() {
        let t = Thresholds::default();
        assert_eq!(t.smoke("s", 0).verdict, Verdict::Malfunction);
        assert_eq!(t.smoke("s", 11).verdict, Verdict::Malfunction);
        assert!(t.smoke("s", 7).is_valid());
        assert_eq!(t.smoke("s", 8).verdict, Verdict::Dangerous);
        assert_eq!(t.smoke("s", 10).verdict, Verdict::Dangerous);
    }

    #[test]
    fn co2_only_accepts_reference_level() {
        let t = Thresholds::default();
        assert!(t.co2("c", 300.0).is_valid());
        assert_eq!(t.co2("c", 299.9).verdict, Verdict::Dangerous);
        assert_eq!(t.co2("c", 280.0).verdict, Verdict::Dangerous);

        let relaxed = Thresholds {
            co2_reference: 280.0,
            ..Thresholds::default()
        };
        assert!(relaxed.co2("c", 280.0).is_valid());
    }

    #[test]
    fn every_field_can_fail_at_once() {
        let result = validate(&reading(55.0, 10, 9, 280.0));
        let fields: Vec<Field> = result.violations().map(|j| j.field).collect();
        assert_eq!(
            fields,
            vec![Field::Temperature, Field::Battery, Field::Smoke, Field::Co2]
        );
    }
}
