use collector_api::{Entity, Merge};
use serde::{Deserialize, Serialize};

/// Link from a global trace id to one of its segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Merge)]
pub struct GlobalTrace {
    pub global_trace_id: String,
    pub segment_id: String,
    pub time_bucket: i64,
}

impl Entity for GlobalTrace {
    const KIND: &'static str = "global_trace";

    /// `{len}:{global_trace_id}_{segment_id}`. The length prefix keeps ids
    /// distinct when either part contains `_`.
    fn id(&self) -> String {
        format!(
            "{}:{}_{}",
            self.global_trace_id.len(),
            self.global_trace_id,
            self.segment_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(global_trace_id: &str, segment_id: &str) -> GlobalTrace {
        GlobalTrace {
            global_trace_id: global_trace_id.to_string(),
            segment_id: segment_id.to_string(),
            time_bucket: 1,
        }
    }

    #[test]
    fn underscores_do_not_collide() {
        assert_ne!(trace("a_b", "c").id(), trace("a", "b_c").id());
        assert_eq!(trace("2.41.1509", "7.9").id(), "9:2.41.1509_7.9");
    }
}
