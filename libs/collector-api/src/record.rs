use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::StorageError;

/// Untyped record as submitted by producers: a type discriminator plus
/// the entity payload.
///
/// ```json
/// {"type": "instance", "payload": {"instance_id": 7, "heartbeat_time": 15}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

impl Record {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Wrap a typed entity.
    pub fn from_entity<R: Entity>(entity: &R) -> Result<Self, StorageError> {
        Ok(Self {
            kind: R::KIND.to_string(),
            payload: serde_json::to_value(entity)?,
        })
    }

    /// Decode the payload as `R`. The caller is responsible for routing by kind.
    pub fn into_entity<R: Entity>(self) -> Result<R, StorageError> {
        serde_json::from_value(self.payload)
            .map_err(|e| StorageError::from(e).with_context(R::KIND))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_field_is_renamed() {
        let record: Record =
            serde_json::from_str(r#"{"type":"instance","payload":{"instance_id":7}}"#).unwrap();
        assert_eq!(record.kind, "instance");
        assert_eq!(record.payload["instance_id"], 7);
    }
}
