//! Protocol definitions for endpoint messages

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use super::error::ListenerError;

/// Key whose presence marks a file-location message
pub const DATA_LOCATION_KEY: &str = "DataLocation";

/// Messages an endpoint sends to its clients
///
/// Serialized with serde's external tagging, so `WelcomeClient` goes out as
/// the bare string `"WelcomeClient"` and `DataLocation` as
/// `{"DataLocation": "/path"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// Greeting sent once per connection
    WelcomeClient,
    /// Path of a file the client should load
    DataLocation(String),
}

/// A decoded inbound text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The frame names a file to load into the payload slot
    DataLocation(PathBuf),
    /// Any other JSON value; accepted and ignored
    Unrecognized(Value),
}

impl Notification {
    /// Decode one text frame
    ///
    /// Only a JSON object carrying a string `DataLocation` is recognized. Other
    /// keys on the same object are ignored, and so is every non-object value.
    pub fn decode(text: &str) -> Result<Self, ListenerError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Classify an already parsed JSON value, same rules as [`Notification::decode`]
    pub fn from_value(value: Value) -> Result<Self, ListenerError> {
        let location = match &value {
            Value::Object(map) => map.get(DATA_LOCATION_KEY),
            _ => None,
        };

        match location {
            Some(Value::String(path)) => Ok(Notification::DataLocation(PathBuf::from(path))),
            Some(other) => Err(ListenerError::InvalidLocation(other.clone())),
            None => Ok(Notification::Unrecognized(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_data_location() {
        let msg = Notification::decode(r#"{"DataLocation": "/tmp/sample.bin"}"#).unwrap();
        assert_eq!(msg, Notification::DataLocation(PathBuf::from("/tmp/sample.bin")));
    }

    #[test]
    fn test_decode_ignores_extra_keys() {
        let msg =
            Notification::decode(r#"{"Foo": 1, "DataLocation": "/dev/shm/frame"}"#).unwrap();
        assert_eq!(msg, Notification::DataLocation(PathBuf::from("/dev/shm/frame")));
    }

    #[test]
    fn test_decode_unrecognized_object() {
        let msg = Notification::decode(r#"{"Foo": "bar"}"#).unwrap();
        assert!(matches!(msg, Notification::Unrecognized(Value::Object(_))));
    }

    #[test]
    fn test_decode_non_object_values() {
        for text in [r#""WelcomeClient""#, "42", "null", r#"["DataLocation"]"#] {
            let msg = Notification::decode(text).unwrap();
            assert!(matches!(msg, Notification::Unrecognized(_)), "{}", text);
        }
    }

    #[test]
    fn test_decode_non_string_location() {
        let err = Notification::decode(r#"{"DataLocation": 7}"#).unwrap_err();
        assert!(matches!(err, ListenerError::InvalidLocation(_)));
    }

    #[test]
    fn test_from_value_matches_decode() {
        let value = serde_json::json!({ "DataLocation": "/dev/shm/frame", "seq": 3 });
        assert_eq!(
            Notification::from_value(value).unwrap(),
            Notification::DataLocation(PathBuf::from("/dev/shm/frame"))
        );
        assert!(matches!(
            Notification::from_value(Value::Bool(true)).unwrap(),
            Notification::Unrecognized(Value::Bool(true))
        ));
    }

    #[test]
    fn test_decode_invalid_json() {
        let err = Notification::decode("not valid json").unwrap_err();
        assert!(matches!(err, ListenerError::Decode(_)));
    }

    #[test]
    fn test_endpoint_messages_decode() {
        let welcome = serde_json::to_string(&Protocol::WelcomeClient).unwrap();
        assert_eq!(welcome, r#""WelcomeClient""#);
        assert!(matches!(
            Notification::decode(&welcome).unwrap(),
            Notification::Unrecognized(_)
        ));

        let location =
            serde_json::to_string(&Protocol::DataLocation("/dev/shm/frame".to_string())).unwrap();
        assert_eq!(location, r#"{"DataLocation":"/dev/shm/frame"}"#);
        assert_eq!(
            Notification::decode(&location).unwrap(),
            Notification::DataLocation(PathBuf::from("/dev/shm/frame"))
        );
    }
}
