use collector_api::{DimensionCache, Entity, Merge};
use serde::{Deserialize, Serialize};

use crate::APPLICATION_NAMESPACE;

/// Agent instance. Built from registration events (uuid, os info,
/// register time) and heartbeats (heartbeat time only); either kind of
/// record may be the first one seen by a collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Merge)]
pub struct Instance {
    pub instance_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[merge(coalesce)]
    pub application_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[merge(coalesce)]
    pub agent_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[merge(coalesce)]
    pub register_time: Option<i64>,
    #[serde(default)]
    #[merge(max)]
    pub heartbeat_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[merge(coalesce)]
    pub os_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[merge(coalesce)]
    pub application_code: Option<String>,
}

impl Instance {
    /// A heartbeat-only observation.
    pub fn heartbeat(instance_id: i32, heartbeat_time: i64) -> Self {
        Self {
            instance_id,
            application_id: None,
            agent_uuid: None,
            register_time: None,
            heartbeat_time,
            os_info: None,
            application_code: None,
        }
    }
}

impl Entity for Instance {
    const KIND: &'static str = "instance";

    fn id(&self) -> String {
        self.instance_id.to_string()
    }

    fn enrich(&mut self, cache: &dyn DimensionCache) {
        if self.application_code.is_some() {
            return;
        }
        if let Some(application_id) = self.application_id {
            self.application_code =
                cache.resolve(APPLICATION_NAMESPACE, &application_id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use collector_api::merge::merged;

    use super::*;

    fn registration() -> Instance {
        Instance {
            instance_id: 7,
            application_id: Some(2),
            agent_uuid: Some("6a1f".to_string()),
            register_time: Some(100),
            heartbeat_time: 100,
            os_info: Some("linux".to_string()),
            application_code: None,
        }
    }

    #[test]
    fn heartbeat_keeps_registration_fields() {
        let value = merged(registration(), Instance::heartbeat(7, 150));
        assert_eq!(value.heartbeat_time, 150);
        assert_eq!(value.agent_uuid.as_deref(), Some("6a1f"));
        assert_eq!(value.register_time, Some(100));
        assert_eq!(value.os_info.as_deref(), Some("linux"));
    }

    #[test]
    fn registration_after_heartbeat_fills_fields() {
        let value = merged(Instance::heartbeat(7, 150), registration());
        assert_eq!(value.heartbeat_time, 150);
        assert_eq!(value.application_id, Some(2));
    }

    #[test]
    fn stale_heartbeat_is_ignored() {
        let value = merged(Instance::heartbeat(7, 15), Instance::heartbeat(7, 9));
        assert_eq!(value.heartbeat_time, 15);
    }

    #[test]
    fn heartbeat_payload_decodes_with_defaults() {
        let value: Instance =
            serde_json::from_str(r#"{"instance_id": 7, "heartbeat_time": 15}"#).unwrap();
        assert_eq!(value, Instance::heartbeat(7, 15));
    }
}
