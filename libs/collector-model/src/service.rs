use collector_api::{Entity, Merge};
use serde::{Deserialize, Serialize};

/// Call statistics between two services within one time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Merge)]
pub struct ServiceReferenceMetric {
    pub front_service_id: i32,
    pub behind_service_id: i32,
    pub time_bucket: i64,
    #[serde(default)]
    #[merge(sum)]
    pub calls: u64,
    #[serde(default)]
    #[merge(sum)]
    pub error_calls: u64,
    #[serde(default)]
    #[merge(sum)]
    pub duration_sum: u64,
    #[serde(default)]
    #[merge(max)]
    pub max_duration: u64,
    #[serde(default = "unset_min")]
    #[merge(min)]
    pub min_duration: u64,
}

fn unset_min() -> u64 {
    u64::MAX
}

impl ServiceReferenceMetric {
    /// Single observed call.
    pub fn call(front: i32, behind: i32, time_bucket: i64, duration: u64, error: bool) -> Self {
        Self {
            front_service_id: front,
            behind_service_id: behind,
            time_bucket,
            calls: 1,
            error_calls: u64::from(error),
            duration_sum: duration,
            max_duration: duration,
            min_duration: duration,
        }
    }
}

impl Entity for ServiceReferenceMetric {
    const KIND: &'static str = "service_reference_metric";

    fn id(&self) -> String {
        format!("{}_{}_{}", self.time_bucket, self.front_service_id, self.behind_service_id)
    }
}

#[cfg(test)]
mod tests {
    use collector_api::merge::merged;

    use super::*;

    #[test]
    fn counters_sum_and_extremes_track() {
        let a = ServiceReferenceMetric::call(1, 2, 10, 40, false);
        let b = ServiceReferenceMetric::call(1, 2, 10, 15, true);
        let c = ServiceReferenceMetric::call(1, 2, 10, 90, false);

        let abc = merged(merged(a.clone(), b.clone()), c.clone());
        let cab = merged(merged(c, a), b);

        assert_eq!(abc, cab);
        assert_eq!(abc.calls, 3);
        assert_eq!(abc.error_calls, 1);
        assert_eq!(abc.duration_sum, 145);
        assert_eq!(abc.max_duration, 90);
        assert_eq!(abc.min_duration, 15);
    }

    #[test]
    fn missing_min_does_not_win() {
        let partial: ServiceReferenceMetric = serde_json::from_str(
            r#"{"front_service_id":1,"behind_service_id":2,"time_bucket":10,"calls":4}"#,
        )
        .unwrap();
        let value = merged(ServiceReferenceMetric::call(1, 2, 10, 30, false), partial);
        assert_eq!(value.calls, 5);
        assert_eq!(value.min_duration, 30);
    }
}
