//! Typed payload schemas and validation.
//!
//! Payloads are validated against their schema before encryption, at the
//! publishing node. The relay never validates anything.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Schema ID for temperature readings.
pub const SCHEMA_TEMPERATURE: &str = "sensor.Temperature";
/// Schema ID for humidity readings.
pub const SCHEMA_HUMIDITY: &str = "sensor.Humidity";
/// Schema ID for actuator commands.
pub const SCHEMA_COMMAND: &str = "control.Command";

/// A temperature sensor reading.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Temperature {
    /// Measured temperature in degrees Celsius.
    pub celsius: f64,
    /// Measurement time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Identifier of the reporting sensor.
    pub sensor_id: String,
}

/// A humidity sensor reading.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Humidity {
    /// Relative humidity in percent.
    pub percent: f64,
    /// Measurement time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Identifier of the reporting sensor.
    pub sensor_id: String,
}

/// A command for an actuator. `action` is required to be non-empty.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Command {
    /// The action to perform.
    pub action: String,
    /// Free-form action parameters.
    pub params: HashMap<String, String>,
}

type Validator = fn(&[u8]) -> Result<(), String>;

/// Immutable mapping from schema ID to payload validator.
///
/// Built once with the built-in schemas; there is no registration API after
/// construction.
pub struct SchemaRegistry {
    validators: HashMap<&'static str, Validator>,
}

impl SchemaRegistry {
    /// The registry holding the built-in schemas.
    pub fn builtin() -> Self {
        let mut validators: HashMap<&'static str, Validator> = HashMap::new();
        validators.insert(SCHEMA_TEMPERATURE, validate_temperature);
        validators.insert(SCHEMA_HUMIDITY, validate_humidity);
        validators.insert(SCHEMA_COMMAND, validate_command);
        Self { validators }
    }

    /// All registered schema IDs, sorted.
    pub fn known_ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.validators.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Whether `schema_id` is registered.
    pub fn contains(&self, schema_id: &str) -> bool {
        self.validators.contains_key(schema_id)
    }

    /// Validate `payload` against `schema_id`.
    ///
    /// The empty schema ID is not a registered schema: subscribers may use it
    /// to mean "no filter", but nothing can be validated against it.
    pub fn validate(&self, schema_id: &str, payload: &[u8]) -> Result<(), ProtoError> {
        let validator = self
            .validators
            .get(schema_id)
            .ok_or_else(|| ProtoError::SchemaUnknown(schema_id.to_string()))?;
        validator(payload).map_err(|reason| ProtoError::SchemaInvalid {
            schema_id: schema_id.to_string(),
            reason,
        })
    }
}

fn validate_temperature(payload: &[u8]) -> Result<(), String> {
    serde_json::from_slice::<Temperature>(payload)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn validate_humidity(payload: &[u8]) -> Result<(), String> {
    serde_json::from_slice::<Humidity>(payload)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn validate_command(payload: &[u8]) -> Result<(), String> {
    let command: Command = serde_json::from_slice(payload).map_err(|e| e.to_string())?;
    if command.action.is_empty() {
        return Err("action required".to_string());
    }
    Ok(())
}

/// The shared built-in registry.
pub fn registry() -> &'static SchemaRegistry {
    static REGISTRY: OnceLock<SchemaRegistry> = OnceLock::new();
    REGISTRY.get_or_init(SchemaRegistry::builtin)
}

/// Validate `payload` against `schema_id` using the built-in registry.
pub fn validate_payload(schema_id: &str, payload: &[u8]) -> Result<(), ProtoError> {
    registry().validate(schema_id, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_temperature_passes() {
        let payload = br#"{"celsius":22.5,"timestamp_ms":1000,"sensor_id":"a"}"#;
        validate_payload(SCHEMA_TEMPERATURE, payload).unwrap();
    }

    #[test]
    fn valid_humidity_passes() {
        let payload = br#"{"percent":40.0,"timestamp_ms":1000,"sensor_id":"h1"}"#;
        validate_payload(SCHEMA_HUMIDITY, payload).unwrap();
    }

    #[test]
    fn missing_fields_default_to_zero_values() {
        // Decoding is lenient: absent fields are not an error.
        validate_payload(SCHEMA_TEMPERATURE, b"{}").unwrap();
    }

    #[test]
    fn malformed_json_is_schema_invalid() {
        match validate_payload(SCHEMA_TEMPERATURE, b"not json") {
            Err(ProtoError::SchemaInvalid { schema_id, .. }) => {
                assert_eq!(schema_id, SCHEMA_TEMPERATURE);
            }
            other => panic!("expected SchemaInvalid, got {:?}", other),
        }
    }

    #[test]
    fn wrong_type_is_schema_invalid() {
        let payload = br#"{"celsius":"warm"}"#;
        assert!(matches!(
            validate_payload(SCHEMA_TEMPERATURE, payload),
            Err(ProtoError::SchemaInvalid { .. })
        ));
    }

    #[test]
    fn unknown_schema_is_rejected() {
        match validate_payload("made.Up", b"{}") {
            Err(ProtoError::SchemaUnknown(id)) => assert_eq!(id, "made.Up"),
            other => panic!("expected SchemaUnknown, got {:?}", other),
        }
    }

    #[test]
    fn empty_schema_id_is_rejected() {
        assert!(matches!(
            validate_payload("", b"{}"),
            Err(ProtoError::SchemaUnknown(_))
        ));
    }

    #[test]
    fn command_requires_action() {
        let payload = br#"{"action":"","params":{}}"#;
        assert!(matches!(
            validate_payload(SCHEMA_COMMAND, payload),
            Err(ProtoError::SchemaInvalid { .. })
        ));

        let payload = br#"{"action":"reboot","params":{"delay":"5"}}"#;
        validate_payload(SCHEMA_COMMAND, payload).unwrap();
    }

    #[test]
    fn registry_lists_builtin_schemas() {
        let ids = registry().known_ids();
        assert_eq!(
            ids,
            vec![SCHEMA_COMMAND, SCHEMA_HUMIDITY, SCHEMA_TEMPERATURE]
        );
        assert!(registry().contains(SCHEMA_TEMPERATURE));
        assert!(!registry().contains(""));
    }
}
