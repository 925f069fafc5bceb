use std::collections::BTreeSet;

use collector_api::{DimensionCache, Entity, Merge};
use serde::{Deserialize, Serialize};

use crate::APPLICATION_NAMESPACE;

/// Topology edge: an application calling out to a peer address within one
/// time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Merge)]
pub struct NodeMapping {
    pub application_id: i32,
    pub address_id: i32,
    pub address: String,
    pub time_bucket: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[merge(coalesce)]
    pub application_code: Option<String>,
}

impl Entity for NodeMapping {
    const KIND: &'static str = "node_mapping";

    fn id(&self) -> String {
        format!("{}_{}_{}", self.time_bucket, self.application_id, self.address_id)
    }

    fn enrich(&mut self, cache: &dyn DimensionCache) {
        if self.application_code.is_none() {
            self.application_code =
                cache.resolve(APPLICATION_NAMESPACE, &self.application_id.to_string());
        }
    }
}

/// Set of peer applications an application talked to within one time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Merge)]
pub struct ApplicationTopology {
    pub application_id: i32,
    pub time_bucket: i64,
    #[serde(default)]
    #[merge(union)]
    pub peers: BTreeSet<i32>,
}

impl Entity for ApplicationTopology {
    const KIND: &'static str = "application_topology";

    fn id(&self) -> String {
        format!("{}_{}", self.time_bucket, self.application_id)
    }
}

#[cfg(test)]
mod tests {
    use collector_api::merge::merged;
    use collector_api::NoCache;

    use super::*;

    struct Apps;

    impl DimensionCache for Apps {
        fn resolve(&self, namespace: &str, key: &str) -> Option<String> {
            (namespace == APPLICATION_NAMESPACE && key == "3").then(|| "checkout".to_string())
        }
    }

    fn mapping(address: &str) -> NodeMapping {
        NodeMapping {
            application_id: 3,
            address_id: 12,
            address: address.to_string(),
            time_bucket: 201_710_101_200,
            application_code: None,
        }
    }

    #[test]
    fn id_combines_bucket_application_and_address() {
        assert_eq!(mapping("10.0.0.1:8080").id(), "201710101200_3_12");
    }

    #[test]
    fn enrichment_fails_open() {
        let mut hit = mapping("a");
        hit.enrich(&Apps);
        assert_eq!(hit.application_code.as_deref(), Some("checkout"));

        let mut miss = mapping("a");
        miss.enrich(&NoCache);
        assert_eq!(miss.application_code, None);
    }

    #[test]
    fn enriched_code_survives_later_plain_record() {
        let mut first = mapping("old");
        first.enrich(&Apps);
        let value = merged(first, mapping("new"));
        assert_eq!(value.address, "new");
        assert_eq!(value.application_code.as_deref(), Some("checkout"));
    }

    #[test]
    fn topology_peers_union() {
        let a = ApplicationTopology { application_id: 1, time_bucket: 5, peers: [2, 3].into() };
        let b = ApplicationTopology { application_id: 1, time_bucket: 5, peers: [3, 4].into() };
        assert_eq!(merged(a, b).peers, BTreeSet::from([2, 3, 4]));
    }
}
