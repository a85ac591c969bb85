//! GPS ping records as they move through the pipeline.
//!
//! Raw dumps mix Portuguese keys (`linha`, `ordem`, `datahora`,
//! `velocidade`) with numbers sent as strings and coordinates written with a
//! decimal comma. [`RawPing`] accepts all of that; [`Ping`] is the subset
//! that can be sequenced; [`EnrichedPing`] adds the derived features.

use chrono::DateTime;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PipelineError, Result};

/// A JSON scalar that may arrive either quoted or bare.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Number(n) => n.to_string(),
        }
    }
}

/// A latitude or longitude exactly as received.
///
/// The raw text is kept so that cleaned artifacts round-trip the source
/// formatting; [`Coordinate::degrees`] gives the numeric value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Scalar", into = "String")]
pub struct Coordinate(String);

impl Coordinate {
    pub fn new(raw: impl Into<String>) -> Self {
        Coordinate(raw.into())
    }

    pub fn raw(&self) -> &str {
        &self.0
    }

    /// Parses the value in degrees, accepting `-22,9` as well as `-22.9`.
    pub fn degrees(&self) -> Result<f64> {
        let normalized = self.0.trim().replace(',', ".");
        match normalized.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(PipelineError::Parse {
                field: "coordinate",
                value: self.0.clone(),
            }),
        }
    }
}

impl From<Scalar> for Coordinate {
    fn from(value: Scalar) -> Self {
        Coordinate(value.into_text())
    }
}

impl From<Coordinate> for String {
    fn from(value: Coordinate) -> Self {
        value.0
    }
}

fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Scalar>::deserialize(deserializer)?;
    Ok(value
        .map(Scalar::into_text)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

fn lenient_millis<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Scalar>::deserialize(deserializer)?;
    let millis = value.and_then(|v| match v {
        Scalar::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(whole_millis)),
        Scalar::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(whole_millis))
        }
    });
    // instants chrono cannot represent are treated as missing
    Ok(millis.filter(|&ms| DateTime::from_timestamp_millis(ms).is_some()))
}

fn whole_millis(f: f64) -> Option<i64> {
    (f.is_finite() && f.abs() < i64::MAX as f64).then_some(f as i64)
}

fn lenient_float<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Scalar>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Scalar::Number(n) => n.as_f64(),
        Scalar::Text(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
    }))
}

/// One decoded record. Every field is optional; later stages decide what
/// they require.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPing {
    #[serde(
        alias = "linha",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub line_id: Option<String>,

    #[serde(
        alias = "ordem",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub vehicle_id: Option<String>,

    #[serde(
        alias = "datahora",
        default,
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp_ms: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<Coordinate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<Coordinate>,

    #[serde(
        alias = "velocidade",
        default,
        deserialize_with = "lenient_float",
        skip_serializing_if = "Option::is_none"
    )]
    pub speed: Option<f64>,
}

/// A record that belongs to a line and has a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPing")]
pub struct Ping {
    pub line_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    pub timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<Coordinate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<Coordinate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

impl TryFrom<RawPing> for Ping {
    type Error = PipelineError;

    fn try_from(raw: RawPing) -> Result<Self> {
        let line_id = raw
            .line_id
            .ok_or(PipelineError::MissingField { field: "line_id" })?;
        let timestamp_ms = raw
            .timestamp_ms
            .ok_or(PipelineError::MissingField {
                field: "timestamp_ms",
            })?;

        Ok(Ping {
            line_id,
            vehicle_id: raw.vehicle_id,
            timestamp_ms,
            latitude: raw.latitude,
            longitude: raw.longitude,
            speed: raw.speed,
        })
    }
}

impl Ping {
    /// `(latitude, longitude)` in degrees.
    pub fn position(&self) -> Result<(f64, f64)> {
        let lat = self
            .latitude
            .as_ref()
            .ok_or(PipelineError::MissingField { field: "latitude" })?;
        let lon = self
            .longitude
            .as_ref()
            .ok_or(PipelineError::MissingField { field: "longitude" })?;
        Ok((lat.degrees()?, lon.degrees()?))
    }

    /// The coordinate pair as received, used as route-membership identity.
    pub fn raw_position(&self) -> Option<(&Coordinate, &Coordinate)> {
        Some((self.latitude.as_ref()?, self.longitude.as_ref()?))
    }
}

/// A [`Ping`] plus the features derived from its place in the line sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedPing {
    #[serde(flatten)]
    pub ping: Ping,

    /// `None` for the first ping of a sequence: unknown, not stationary.
    #[serde(default)]
    pub real_velocity_kmh: Option<f64>,

    /// ISO weekday, 0 = Monday.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_holiday: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour_of_day: Option<u8>,
}

impl EnrichedPing {
    /// Wraps a ping with every derived field unset.
    pub fn bare(ping: Ping) -> Self {
        EnrichedPing {
            ping,
            real_velocity_kmh: None,
            day_of_week: None,
            is_holiday: None,
            hour_of_day: None,
        }
    }
}

impl AsRef<Ping> for Ping {
    fn as_ref(&self) -> &Ping {
        self
    }
}

impl AsRef<Ping> for EnrichedPing {
    fn as_ref(&self) -> &Ping {
        &self.ping
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_ping_accepts_portuguese_keys() {
        let raw: RawPing = serde_json::from_str(
            r#"{"ordem":"B31143","latitude":"-22,87802","longitude":"-43,34293",
                "datahora":"1715486429000","velocidade":"12","linha":"107"}"#,
        )
        .unwrap();

        assert_eq!(raw.line_id.as_deref(), Some("107"));
        assert_eq!(raw.vehicle_id.as_deref(), Some("B31143"));
        assert_eq!(raw.timestamp_ms, Some(1715486429000));
        assert_eq!(raw.speed, Some(12.0));
        assert_eq!(raw.latitude, Some(Coordinate::new("-22,87802")));
    }

    #[test]
    fn test_raw_ping_accepts_numbers() {
        let raw: RawPing = serde_json::from_str(
            r#"{"line_id":107,"timestamp_ms":1715486429000,"latitude":-22.5,"longitude":-43.1}"#,
        )
        .unwrap();

        assert_eq!(raw.line_id.as_deref(), Some("107"));
        assert_eq!(raw.timestamp_ms, Some(1715486429000));
        assert_eq!(raw.latitude.unwrap().degrees().unwrap(), -22.5);
        assert_eq!(raw.speed, None);
    }

    #[test]
    fn test_unparseable_timestamp_is_missing() {
        let raw: RawPing =
            serde_json::from_str(r#"{"linha":"107","datahora":"yesterday"}"#).unwrap();
        assert_eq!(raw.timestamp_ms, None);

        let err = Ping::try_from(raw).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingField {
                field: "timestamp_ms"
            }
        ));
    }

    #[test]
    fn test_out_of_range_timestamp_is_missing() {
        for stamp in [r#""-1e300""#, "1e300", r#""9223372036854775807""#, "-9223372036854775808"] {
            let raw: RawPing =
                serde_json::from_str(&format!(r#"{{"linha":"107","datahora":{stamp}}}"#)).unwrap();
            assert_eq!(raw.timestamp_ms, None, "{stamp}");
        }

        let raw: RawPing =
            serde_json::from_str(r#"{"linha":"107","datahora":"1725710400000.0"}"#).unwrap();
        assert_eq!(raw.timestamp_ms, Some(1_725_710_400_000));
    }

    #[test]
    fn test_blank_line_is_missing() {
        let raw: RawPing = serde_json::from_str(r#"{"linha":"  ","datahora":1}"#).unwrap();
        assert_eq!(raw.line_id, None);
    }

    #[test]
    fn test_coordinate_decimal_comma() {
        assert_eq!(Coordinate::new("-22,5").degrees().unwrap(), -22.5);
        assert_eq!(Coordinate::new("-22.5").degrees().unwrap(), -22.5);
        assert!(Coordinate::new("abc").degrees().is_err());
        assert!(Coordinate::new("").degrees().is_err());
    }

    #[test]
    fn test_ping_serializes_raw_coordinates() {
        let ping = Ping {
            line_id: "107".into(),
            vehicle_id: Some("A1".into()),
            timestamp_ms: 10,
            latitude: Some(Coordinate::new("-22,1")),
            longitude: Some(Coordinate::new("-43,2")),
            speed: None,
        };

        let json = serde_json::to_value(&ping).unwrap();
        assert_eq!(json["latitude"], "-22,1");
        assert!(json.get("speed").is_none());

        let back: Ping = serde_json::from_value(json).unwrap();
        assert_eq!(back, ping);
    }

    #[test]
    fn test_enriched_ping_round_trips_flattened() {
        let enriched = EnrichedPing {
            ping: Ping {
                line_id: "3".into(),
                vehicle_id: None,
                timestamp_ms: 1_000,
                latitude: None,
                longitude: None,
                speed: Some(4.0),
            },
            real_velocity_kmh: None,
            day_of_week: Some(3),
            is_holiday: Some(false),
            hour_of_day: Some(0),
        };

        let text = serde_json::to_string(&enriched).unwrap();
        assert!(text.contains("\"real_velocity_kmh\":null"));

        let back: EnrichedPing = serde_json::from_str(&text).unwrap();
        assert_eq!(back, enriched);
    }
}
