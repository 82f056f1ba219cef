use metering_client::domain::Sample;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::ingest::IngestError;

/// Telemetry message as published by the meter.
///
/// The device does not send a timestamp; capture time is assigned on arrival.
/// Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TelemetryPayload {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub energy: f64,
    pub frequency: f64,
    #[serde(rename = "pf", alias = "powerFactor")]
    pub power_factor: f64,
}

impl TelemetryPayload {
    pub fn into_sample(self, captured_at: OffsetDateTime) -> Sample {
        Sample {
            captured_at,
            voltage: self.voltage,
            current: self.current,
            power: self.power,
            energy: self.energy,
            frequency: self.frequency,
            power_factor: self.power_factor,
        }
    }
}

/// Decode raw message bytes into a payload.
pub fn decode_telemetry(raw: &[u8]) -> Result<TelemetryPayload, IngestError> {
    serde_json::from_slice(raw).map_err(|e| IngestError::malformed(e.to_string(), raw))
}

/// Pure validation of a decoded payload.
///
/// Rules:
/// - every reading must be a finite number.
pub fn validate_telemetry(payload: &TelemetryPayload, raw: &[u8]) -> Result<(), IngestError> {
    let fields = [
        ("voltage", payload.voltage),
        ("current", payload.current),
        ("power", payload.power),
        ("energy", payload.energy),
        ("frequency", payload.frequency),
        ("pf", payload.power_factor),
    ];

    match fields.iter().find(|(_, v)| !v.is_finite()) {
        Some((name, v)) => Err(IngestError::malformed(format!("{name} is not finite ({v})"), raw)),
        None => Ok(()),
    }
}

/// Decode and validate in one step.
pub fn parse_telemetry(raw: &[u8]) -> Result<TelemetryPayload, IngestError> {
    let payload = decode_telemetry(raw)?;
    validate_telemetry(&payload, raw)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE_MESSAGE: &[u8] = br#"{"voltage":221.40,"current":0.45,"power":87.30,"energy":12.50,"frequency":50.00,"pf":0.88}"#;

    #[test]
    fn decodes_device_message_and_maps_pf() {
        let payload = parse_telemetry(DEVICE_MESSAGE).expect("valid payload");
        assert_eq!(payload.power, 87.30);
        assert_eq!(payload.power_factor, 0.88);
    }

    #[test]
    fn accepts_integers_and_ignores_extra_keys() {
        let raw = br#"{"voltage":220,"current":1,"power":220,"energy":0,"frequency":50,"powerFactor":1,"rssi":-60}"#;
        let payload = parse_telemetry(raw).expect("valid payload");
        assert_eq!(payload.voltage, 220.0);
        assert_eq!(payload.power_factor, 1.0);
    }

    #[test]
    fn rejects_missing_power() {
        let raw = br#"{"voltage":220,"current":1,"energy":0,"frequency":50,"pf":1}"#;
        let err = parse_telemetry(raw).unwrap_err();
        assert!(
            matches!(&err, IngestError::MalformedPayload { reason, .. } if reason.contains("power")),
            "{err:?}"
        );
    }

    #[test]
    fn rejects_non_numeric_field() {
        let raw = br#"{"voltage":"220","current":1,"power":1,"energy":0,"frequency":50,"pf":1}"#;
        assert!(matches!(
            parse_telemetry(raw),
            Err(IngestError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn rejects_device_nan_output() {
        // The firmware formats unreadable values as `nan`, which is not JSON.
        let raw = br#"{"voltage":nan,"current":1,"power":1,"energy":0,"frequency":50,"pf":1}"#;
        assert!(matches!(
            parse_telemetry(raw),
            Err(IngestError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn rejects_non_finite_values() {
        let payload = TelemetryPayload {
            voltage: 220.0,
            current: 1.0,
            power: f64::INFINITY,
            energy: 0.0,
            frequency: 50.0,
            power_factor: 1.0,
        };
        let err = validate_telemetry(&payload, b"{}").unwrap_err();
        assert!(matches!(err, IngestError::MalformedPayload { reason, .. } if reason.starts_with("power")));
    }
}
