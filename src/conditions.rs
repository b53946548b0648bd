//! suggested storage conditions for a food kind at a given methane level
//!
//! treated as a pure function by the rest of the crate. the stock
//! estimator interpolates between calibration points per food kind.

use std::collections::HashMap;

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SuggestedConditions {
    /// celsius, one decimal
    pub temperature: f64,
    /// hPa
    pub pressure: f64,
    /// percent
    pub humidity: f64,
}

impl Default for SuggestedConditions {
    fn default() -> Self {
        Self {
            temperature: 10.0,
            pressure: 1013.0,
            humidity: 85.0,
        }
    }
}

pub trait ConditionEstimator: Send + Sync {
    fn suggest(&self, food_kind: &str, methane_level: f64) -> SuggestedConditions;
}

#[derive(Clone, Copy, Debug)]
struct CalibrationPoint {
    methane: f64,
    temperature: f64,
    pressure: f64,
    humidity: f64,
}

/// piecewise-linear over methane, clamped at both ends
#[derive(Clone, Debug, Default)]
pub struct CalibrationEstimator {
    curves: HashMap<String, Vec<CalibrationPoint>>,
}

impl CalibrationEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `points` are (methane ppm, temperature, pressure, humidity)
    pub fn with_curve(mut self, food_kind: &str, points: &[(f64, f64, f64, f64)]) -> Self {
        let mut curve: Vec<CalibrationPoint> = points
            .iter()
            .map(|&(methane, temperature, pressure, humidity)| CalibrationPoint {
                methane,
                temperature,
                pressure,
                humidity,
            })
            .collect();
        curve.sort_by(|a, b| a.methane.total_cmp(&b.methane));
        self.curves.insert(food_kind.to_lowercase(), curve);
        self
    }

    /// spinach and beef curves from the dashboard's sample data
    pub fn stock() -> Self {
        Self::new()
            .with_curve(
                "spinach",
                &[(5.0, 10.0, 1013.0, 85.0), (20.0, 8.0, 1015.0, 90.0), (50.0, 5.0, 1018.0, 95.0)],
            )
            .with_curve(
                "beef",
                &[(10.0, 2.0, 1010.0, 90.0), (30.0, 1.0, 1012.0, 92.0), (60.0, 0.0, 1015.0, 95.0)],
            )
    }

    fn curve_for(&self, food_kind: &str) -> Option<&[CalibrationPoint]> {
        let wanted = food_kind.to_lowercase();
        // "Fresh Spinach" and "Ground Beef" should still find their curve
        self.curves
            .get(&wanted)
            .or_else(|| {
                self.curves
                    .iter()
                    .find(|(name, _)| wanted.split_whitespace().any(|w| w == name.as_str()))
                    .map(|(_, c)| c)
            })
            .map(Vec::as_slice)
            .filter(|c| !c.is_empty())
    }
}

impl ConditionEstimator for CalibrationEstimator {
    fn suggest(&self, food_kind: &str, methane_level: f64) -> SuggestedConditions {
        let Some(curve) = self.curve_for(food_kind) else {
            return SuggestedConditions::default();
        };
        if !methane_level.is_finite() {
            return SuggestedConditions::default();
        }

        let first = curve[0];
        let last = curve[curve.len() - 1];
        let point = if methane_level <= first.methane {
            first
        } else if methane_level >= last.methane {
            last
        } else {
            let upper = curve
                .iter()
                .position(|p| p.methane >= methane_level)
                .unwrap_or(curve.len() - 1);
            let (a, b) = (curve[upper - 1], curve[upper]);
            let t = (methane_level - a.methane) / (b.methane - a.methane);
            let lerp = |x: f64, y: f64| x + (y - x) * t;
            CalibrationPoint {
                methane: methane_level,
                temperature: lerp(a.temperature, b.temperature),
                pressure: lerp(a.pressure, b.pressure),
                humidity: lerp(a.humidity, b.humidity),
            }
        };

        SuggestedConditions {
            temperature: (point.temperature * 10.0).round() / 10.0,
            pressure: point.pressure.round(),
            humidity: point.humidity.round(),
        }
    }
}
