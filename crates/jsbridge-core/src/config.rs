//! Session configuration
//!
//! [`SessionConfig`] can be built in code or deserialized (every field has a
//! default), which is how the CLI reads the `[session]` table of its TOML
//! file.

use serde::{Deserialize, Serialize};

/// Tuning knobs for an [`crate::EngineSession`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Slots reserved up front in the handle table.
    /// Default: 1000
    pub initial_handle_capacity: usize,

    /// Buffers reserved up front in the string cache.
    /// Default: 1000
    pub initial_string_capacity: usize,

    /// Ask the engine for an idle collection before appending a brand new
    /// slot, so weak handles get a chance to free theirs first.
    /// Default: true
    pub idle_collect_on_growth: bool,

    /// Detect type descriptor objects by their `$__TypeID`/`$__Value`
    /// properties when no explicit type tag is attached.
    /// Default: true
    pub duck_typed_type_descriptors: bool,

    /// Entries applied from each transition list per safe point.
    /// Default: 1
    pub drain_per_safe_point: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_handle_capacity: 1000,
            initial_string_capacity: 1000,
            idle_collect_on_growth: true,
            duck_typed_type_descriptors: true,
            drain_per_safe_point: 1,
        }
    }
}

impl SessionConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial handle table capacity.
    pub fn initial_handle_capacity(mut self, capacity: usize) -> Self {
        self.initial_handle_capacity = capacity;
        self
    }

    /// Set the initial string cache capacity.
    pub fn initial_string_capacity(mut self, capacity: usize) -> Self {
        self.initial_string_capacity = capacity;
        self
    }

    /// Enable or disable the idle collection before table growth.
    pub fn idle_collect_on_growth(mut self, enabled: bool) -> Self {
        self.idle_collect_on_growth = enabled;
        self
    }

    /// Enable or disable property based type descriptor detection.
    pub fn duck_typed_type_descriptors(mut self, enabled: bool) -> Self {
        self.duck_typed_type_descriptors = enabled;
        self
    }

    /// Set how many transitions per list a safe point applies (at least 1).
    pub fn drain_per_safe_point(mut self, count: usize) -> Self {
        self.drain_per_safe_point = count.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.initial_handle_capacity, 1000);
        assert_eq!(config.initial_string_capacity, 1000);
        assert!(config.idle_collect_on_growth);
        assert!(config.duck_typed_type_descriptors);
        assert_eq!(config.drain_per_safe_point, 1);
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::new()
            .initial_handle_capacity(16)
            .idle_collect_on_growth(false)
            .drain_per_safe_point(0);
        assert_eq!(config.initial_handle_capacity, 16);
        assert!(!config.idle_collect_on_growth);
        assert_eq!(config.drain_per_safe_point, 1);
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "drain_per_safe_point": 4 }"#).unwrap();
        assert_eq!(config.drain_per_safe_point, 4);
        assert_eq!(config.initial_handle_capacity, 1000);
        assert!(config.duck_typed_type_descriptors);
    }
}
