//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tuning knobs for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Vote-sign pass weight used when a node does not set `passWeight`.
    pub default_pass_weight: u32,
    /// Actor recorded on automatic operations (timers, triggers, schedulers).
    pub system_actor_id: String,
    pub system_actor_name: String,
    /// Archive approval nodes that resolve to no actors as auto-completed
    /// instead of failing with `NoActors`.
    pub skip_empty_approval: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_pass_weight: 50,
            system_actor_id: "0".into(),
            system_actor_name: "system".into(),
            skip_empty_approval: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "default_pass_weight": 60 }"#).expect("parse");
        assert_eq!(config.default_pass_weight, 60);
        assert_eq!(config.system_actor_name, "system");
        assert!(!config.skip_empty_approval);
    }
}
