//! Plain configuration consumed by the simulation core.
//!
//! Hosts typically keep a [`SimConfig`] behind their UI controls and hand it
//! to the core each frame. It serializes to JSON so presets can be shipped as
//! data. Every field has a default, so partial documents are accepted.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::readback::{DEFAULT_MAX_PENDING, DEFAULT_READBACK_BUDGET};

/// Simulation and trail parameters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    /// Number of particles. Fixed for the lifetime of a simulation.
    pub count: u32,
    /// Ring capacity of each trail.
    pub nodes_per_trail: u32,
    /// Number of trails.
    pub trail_count: u32,
    /// Minimum distance the tracked point must move before a new node is
    /// recorded.
    pub update_distance_min: f32,
    /// Particle lifetime in seconds (0 = immortal).
    pub lifetime: f32,
    /// Speed limit applied by behaviors that clamp speed.
    pub speed: f32,
    /// Spatial frequency of flow noise.
    pub noise_scale: f32,
    /// Acceleration along the flow field.
    pub noise_strength: f32,
    /// Velocity damping coefficient.
    pub damping: f32,
    /// Readback requests serviced per frame.
    pub readback_budget: usize,
    /// Pending readback requests before new ones are refused.
    pub max_pending_readbacks: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            count: 4096,
            nodes_per_trail: 64,
            trail_count: 16,
            update_distance_min: 0.01,
            lifetime: 0.0,
            speed: 1.0,
            noise_scale: 1.5,
            noise_strength: 0.5,
            damping: 0.5,
            readback_budget: DEFAULT_READBACK_BUDGET,
            max_pending_readbacks: DEFAULT_MAX_PENDING,
        }
    }
}

impl SimConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every field for values the core cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.count == 0 {
            return Err(ConfigError::Invalid("count must be greater than zero".into()));
        }
        if self.trail_count == 0 {
            return Err(ConfigError::Invalid("trail_count must be greater than zero".into()));
        }
        if self.nodes_per_trail == 0 {
            return Err(ConfigError::Invalid("nodes_per_trail must be greater than zero".into()));
        }
        let non_negative = [
            ("update_distance_min", self.update_distance_min),
            ("lifetime", self.lifetime),
            ("speed", self.speed),
            ("noise_scale", self.noise_scale),
            ("damping", self.damping),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a finite non-negative number, got {}",
                    name, value
                )));
            }
        }
        if !self.noise_strength.is_finite() {
            return Err(ConfigError::Invalid("noise_strength must be finite".into()));
        }
        if self.max_pending_readbacks == 0 {
            return Err(ConfigError::Invalid(
                "max_pending_readbacks must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let config = SimConfig {
            count: 128,
            lifetime: 3.5,
            ..Default::default()
        };
        let json = config.to_json().unwrap();
        assert_eq!(SimConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config = SimConfig::from_json(r#"{ "count": 10, "damping": 2.0 }"#).unwrap();
        assert_eq!(config.count, 10);
        assert_eq!(config.damping, 2.0);
        assert_eq!(config.nodes_per_trail, SimConfig::default().nodes_per_trail);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            SimConfig::from_json(r#"{ "count": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SimConfig::from_json(r#"{ "trail_count": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SimConfig::from_json(r#"{ "update_distance_min": -1.0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(SimConfig::from_json("{ nope"), Err(ConfigError::Parse(_))));
        assert!(SimConfig::default().validate().is_ok());
    }
}
