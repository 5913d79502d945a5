//! Pluggable payload serialization.

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializationError {
    #[error("failed to serialize {type_name}: {message}")]
    Serialize { type_name: String, message: String },

    #[error("failed to deserialize {type_name}: {message}")]
    Deserialize { type_name: String, message: String },

    #[error("expected {expected} argument buffers, got {actual}")]
    ArgumentCount { expected: usize, actual: usize },
}

impl SerializationError {
    pub fn serialize(type_name: &str, err: impl std::fmt::Display) -> Self {
        Self::Serialize {
            type_name: type_name.to_string(),
            message: err.to_string(),
        }
    }

    pub fn deserialize(type_name: &str, err: impl std::fmt::Display) -> Self {
        Self::Deserialize {
            type_name: type_name.to_string(),
            message: err.to_string(),
        }
    }
}

/// Turns argument and return values into opaque wire buffers and back.
///
/// `type_name` is the declared type of the value, for diagnostics and for
/// formats that are not self-describing. Both peers must use the same
/// implementation.
pub trait Serializer: Send + Sync + 'static {
    fn serialize<T>(&self, value: &T, type_name: &str) -> Result<Vec<u8>, SerializationError>
    where
        T: Serialize + ?Sized;

    fn deserialize<T>(&self, bytes: &[u8], type_name: &str) -> Result<T, SerializationError>
    where
        T: DeserializeOwned;
}

/// JSON payloads via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<T>(&self, value: &T, type_name: &str) -> Result<Vec<u8>, SerializationError>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value).map_err(|e| SerializationError::serialize(type_name, e))
    }

    fn deserialize<T>(&self, bytes: &[u8], type_name: &str) -> Result<T, SerializationError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(bytes).map_err(|e| SerializationError::deserialize(type_name, e))
    }
}
