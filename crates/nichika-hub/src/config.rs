//! Hub configuration.

use serde::{Deserialize, Serialize};

/// Sizing for the hub's queues.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubConfig {
    /// Capacity of each intake queue (register, unregister, broadcast).
    /// Producers wait when an intake is full.
    pub intake_capacity: usize,
    /// Delivery buffer size for each client, in payloads.
    pub client_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            intake_capacity: 256,
            client_buffer: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.intake_capacity, 256);
        assert_eq!(cfg.client_buffer, 256);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: HubConfig = serde_json::from_str(r#"{"clientBuffer": 8}"#).unwrap();
        assert_eq!(cfg.client_buffer, 8);
        assert_eq!(cfg.intake_capacity, 256);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(HubConfig::default()).unwrap();
        assert_eq!(json["intakeCapacity"], 256);
        assert_eq!(json["clientBuffer"], 256);
    }
}
