//! Measurement sample value type and register transforms
//!
//! A [`Sample`] is the atomic unit of data exchanged by every channel. It is
//! immutable once produced and freely copied across channel boundaries; the
//! serialized form uses camelCase field names for compatibility with the
//! existing HTTP and hub endpoints.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One measurement sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Unique sample identifier
    pub id: Uuid,
    /// Signal frequency in Hz
    pub frequency: f64,
    /// Signal power
    pub power: f64,
    /// Time the sample was produced
    pub timestamp: DateTime<Utc>,
    /// Tag of the protocol that produced or carried the sample
    pub protocol_type: String,
    /// Coil state reported alongside the sample
    #[serde(default)]
    pub coil_status: bool,
    /// Discrete input state reported alongside the sample
    #[serde(default)]
    pub discrete_input_status: bool,
}

impl Sample {
    /// Create a sample with the given frequency and power, stamped now.
    pub fn new(frequency: f64, power: f64, protocol_type: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            frequency,
            power,
            timestamp: Utc::now(),
            protocol_type: protocol_type.to_string(),
            coil_status: false,
            discrete_input_status: false,
        }
    }

    /// Decode a raw register value into a sample.
    ///
    /// Registers carry frequency scaled by 10; power is derived as twice the
    /// raw value. Coil and discrete-input flags are not present in register
    /// reads and default to `false`.
    pub fn from_register(raw: u16, protocol_type: &str) -> Self {
        Self::new(f64::from(raw) / 10.0, f64::from(raw) * 2.0, protocol_type)
    }

    /// Encode the sample back into its raw register value.
    ///
    /// The frequency is scaled by 10 and truncated toward zero.
    pub fn to_register(&self) -> u16 {
        (self.frequency * 10.0) as u16
    }

    /// Generate `count` randomized samples within a frequency band.
    ///
    /// Used by the probe CLI and load tests to produce realistic traffic.
    pub fn generate(count: usize, min_frequency: f64, max_frequency: f64, protocol_type: &str) -> Vec<Self> {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| Self {
                id: Uuid::new_v4(),
                frequency: rng.gen_range(min_frequency..=max_frequency),
                power: rng.gen_range(0.0..=100.0),
                timestamp: Utc::now(),
                protocol_type: protocol_type.to_string(),
                coil_status: rng.gen_bool(0.5),
                discrete_input_status: rng.gen_bool(0.5),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_decode() {
        let sample = Sample::from_register(450, "modbus");
        assert!((sample.frequency - 45.0).abs() < f64::EPSILON);
        assert!((sample.power - 900.0).abs() < f64::EPSILON);
        assert_eq!(sample.protocol_type, "modbus");
        assert!(!sample.coil_status);
        assert!(!sample.discrete_input_status);
    }

    #[test]
    fn test_register_encode_truncates() {
        let mut sample = Sample::new(45.67, 0.0, "modbus");
        assert_eq!(sample.to_register(), 456);

        sample.frequency = 45.0;
        assert_eq!(sample.to_register(), 450);
    }

    #[test]
    fn test_register_round_trip() {
        let sample = Sample::from_register(612, "modbus");
        assert_eq!(sample.to_register(), 612);
    }

    #[test]
    fn test_generate_respects_bounds() {
        let samples = Sample::generate(50, 40.0, 70.0, "http");
        assert_eq!(samples.len(), 50);
        for s in &samples {
            assert!(s.frequency >= 40.0 && s.frequency <= 70.0);
            assert!(s.power >= 0.0 && s.power <= 100.0);
            assert_eq!(s.protocol_type, "http");
        }
    }

    #[test]
    fn test_serde_field_names() {
        let sample = Sample::new(50.0, 25.0, "http");
        let json = serde_json::to_string(&sample).unwrap();
        assert!(json.contains("\"protocolType\""));
        assert!(json.contains("\"coilStatus\""));
        assert!(json.contains("\"discreteInputStatus\""));

        let back: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample);
    }
}
