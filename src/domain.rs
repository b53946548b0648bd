//! ==============================================================================
//! domain.rs - telemetry records shared by every view
//! ==============================================================================
//!
//! purpose:
//!     the canonical SensorReading plus the wire decoding that turns an
//!     origin record (snapshot entry or push frame) into one.
//!
//! relationships:
//!     - used by: store/reading.rs (keyed table), reconciler.rs (feed parsing)
//!     - used by: remote.rs (snapshot decoding)
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// composite identity of one rack inside one container
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReadingKey {
    pub container_id: String,
    pub rack_id: String,
}

impl ReadingKey {
    pub fn new(container_id: impl Into<String>, rack_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            rack_id: rack_id.into(),
        }
    }
}

/// origin-assigned spoilage classification
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpoilageStatus {
    #[default]
    Nominal,
    EarlySpoilage,
    Spoiled,
}

/// display colour bucket for a status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Success,
    Warning,
    Danger,
}

impl SpoilageStatus {
    /// unknown or missing labels fall back to nominal
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("Spoiled") => SpoilageStatus::Spoiled,
            Some("Early Spoilage") => SpoilageStatus::EarlySpoilage,
            _ => SpoilageStatus::Nominal,
        }
    }

    pub fn tone(self) -> Tone {
        match self {
            SpoilageStatus::Nominal => Tone::Success,
            SpoilageStatus::EarlySpoilage => Tone::Warning,
            SpoilageStatus::Spoiled => Tone::Danger,
        }
    }
}

/// one telemetry sample for a specific container + rack
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub container_id: String,
    pub rack_id: String,
    /// what is stored on the rack (origin field `fruit`)
    pub food_kind: String,
    /// celsius
    pub temperature: f64,
    /// relative humidity (0-100%)
    pub humidity: f64,
    /// ppm
    pub methane_level: f64,
    /// origin timestamp, kept verbatim; never used for ordering
    pub captured_at: Option<String>,
    pub status: SpoilageStatus,
}

impl SensorReading {
    pub fn key(&self) -> ReadingKey {
        ReadingKey::new(self.container_id.clone(), self.rack_id.clone())
    }

    /// decode an origin record; `None` when ids or measurements are missing
    ///
    /// extra origin fields (`_id`, `email`, `image`, ...) are ignored.
    pub fn from_wire(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let container_id = id_field(obj.get("container_id"))?;
        let rack_id = id_field(obj.get("rack_id"))?;

        Some(Self {
            container_id,
            rack_id,
            food_kind: obj
                .get("fruit")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            temperature: number_field(obj.get("temperature"))?,
            humidity: number_field(obj.get("humidity"))?,
            methane_level: number_field(obj.get("methane"))?,
            captured_at: obj
                .get("timestamp")
                .and_then(Value::as_str)
                .map(str::to_string),
            status: SpoilageStatus::from_label(obj.get("status").and_then(Value::as_str)),
        })
    }

    /// decode one push-feed frame
    pub fn from_frame(frame: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(frame).ok()?;
        Self::from_wire(&value)
    }
}

// ids show up as strings or bare numbers depending on the producer.
// an integral float names the same id as the integer; any other float is not an id
fn id_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_f64() => {
            let f = n.as_f64()?;
            (f.is_finite() && f.fract() == 0.0).then(|| format!("{:.0}", f))
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_field(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// what a view is looking at; decides snapshot query and feed filtering
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ViewScope {
    /// every container/rack visible to `email`
    Dashboard { email: String },
    /// a single rack page
    Rack {
        email: String,
        container_id: String,
        rack_id: String,
    },
}

impl ViewScope {
    pub fn email(&self) -> &str {
        match self {
            ViewScope::Dashboard { email } | ViewScope::Rack { email, .. } => email,
        }
    }

    /// whether a feed reading belongs to this view
    pub fn admits(&self, reading: &SensorReading) -> bool {
        match self {
            ViewScope::Dashboard { .. } => true,
            ViewScope::Rack {
                container_id,
                rack_id,
                ..
            } => reading.container_id == *container_id && reading.rack_id == *rack_id,
        }
    }
}

/// one point on a rack's live chart
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartPoint {
    pub captured_at: Option<String>,
    pub temperature: f64,
    pub humidity: f64,
    pub methane_level: f64,
}

impl From<&SensorReading> for ChartPoint {
    fn from(r: &SensorReading) -> Self {
        Self {
            captured_at: r.captured_at.clone(),
            temperature: r.temperature,
            humidity: r.humidity,
            methane_level: r.methane_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_origin_record() {
        let raw = json!({
            "_id": "65f0",
            "email": "owner@example.com",
            "container_id": "1",
            "rack_id": "2",
            "fruit": "banana",
            "temperature": 4.5,
            "humidity": 88.0,
            "methane": 12.25,
            "timestamp": "2025-03-23T17:00:00+00:00",
            "status": "Early Spoilage",
            "image": "Missing image"
        });

        let r = SensorReading::from_wire(&raw).unwrap();
        assert_eq!(r.key(), ReadingKey::new("1", "2"));
        assert_eq!(r.food_kind, "banana");
        assert_eq!(r.methane_level, 12.25);
        assert_eq!(r.captured_at.as_deref(), Some("2025-03-23T17:00:00+00:00"));
        assert_eq!(r.status, SpoilageStatus::EarlySpoilage);
    }

    #[test]
    fn numeric_ids_and_string_measurements_normalise() {
        let raw = json!({
            "container_id": 7,
            "rack_id": 3,
            "temperature": "5.0",
            "humidity": 90,
            "methane": 1
        });

        let r = SensorReading::from_wire(&raw).unwrap();
        assert_eq!(r.container_id, "7");
        assert_eq!(r.rack_id, "3");
        assert_eq!(r.temperature, 5.0);
        assert_eq!(r.food_kind, "");
        assert_eq!(r.captured_at, None);
    }

    #[test]
    fn float_ids_match_their_integer_form() {
        let raw = json!({
            "container_id": 1.0,
            "rack_id": 12,
            "temperature": 1, "humidity": 1, "methane": 1
        });
        let r = SensorReading::from_wire(&raw).unwrap();
        assert_eq!(r.container_id, "1");
        assert_eq!(r.key(), ReadingKey::new("1", "12"));

        assert!(SensorReading::from_wire(&json!({
            "container_id": 1.5, "rack_id": 2, "temperature": 1, "humidity": 1, "methane": 1
        }))
        .is_none());
    }

    #[test]
    fn missing_id_or_measurement_is_rejected() {
        assert!(SensorReading::from_wire(&json!({
            "rack_id": "1", "temperature": 1, "humidity": 1, "methane": 1
        }))
        .is_none());
        assert!(SensorReading::from_wire(&json!({
            "container_id": "", "rack_id": "1", "temperature": 1, "humidity": 1, "methane": 1
        }))
        .is_none());
        assert!(SensorReading::from_wire(&json!({
            "container_id": "1", "rack_id": "1", "temperature": 1, "humidity": 1
        }))
        .is_none());
        assert!(SensorReading::from_frame("not json").is_none());
        assert!(SensorReading::from_frame("[1,2,3]").is_none());
    }

    #[test]
    fn rack_scope_admits_only_its_own_rack() {
        let scope = ViewScope::Rack {
            email: "owner@example.com".into(),
            container_id: "1".into(),
            rack_id: "2".into(),
        };
        let mut r = SensorReading::from_wire(&json!({
            "container_id": "1", "rack_id": "2", "temperature": 1, "humidity": 1, "methane": 1
        }))
        .unwrap();
        assert!(scope.admits(&r));

        r.rack_id = "3".into();
        assert!(!scope.admits(&r));
        assert!(ViewScope::Dashboard { email: "owner@example.com".into() }.admits(&r));
    }

    #[test]
    fn unknown_status_falls_back_to_nominal() {
        assert_eq!(SpoilageStatus::from_label(Some("Fresh")), SpoilageStatus::Nominal);
        assert_eq!(
            SpoilageStatus::from_label(Some("Missing image and metrics")),
            SpoilageStatus::Nominal
        );
        assert_eq!(SpoilageStatus::from_label(None), SpoilageStatus::Nominal);
        assert_eq!(SpoilageStatus::Spoiled.tone(), Tone::Danger);
        assert_eq!(SpoilageStatus::EarlySpoilage.tone(), Tone::Warning);
        assert_eq!(SpoilageStatus::Nominal.tone(), Tone::Success);
    }
}
