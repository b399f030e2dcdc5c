//! Universe configuration.
//!
//! A universe is described by how many participants it runs and how many of
//! them share a node; the latter drives locality splits. Both values are
//! validated newtypes, and the whole configuration can come from JSON or
//! from the environment:
//!
//! ```rust,ignore
//! let config = UniverseConfig::from_json(r#"{ "world_size": 8, "ranks_per_node": 4 }"#)?;
//! let config = UniverseConfig::from_env()?; // PARCOMM_WORLD_SIZE, PARCOMM_RANKS_PER_NODE
//! ```

use std::env;

use nutype::nutype;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable holding the number of participants.
pub const WORLD_SIZE_VAR: &str = "PARCOMM_WORLD_SIZE";

/// Environment variable holding the number of participants per node.
pub const RANKS_PER_NODE_VAR: &str = "PARCOMM_RANKS_PER_NODE";

/// Number of participants in a universe, between 1 and 1024.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1024),
    default = 4,
    derive(Debug, Clone, Copy, PartialEq, Eq, Display, Into, Default, Serialize, Deserialize)
)]
pub struct WorldSize(usize);

/// Number of consecutive ranks placed on one node, between 1 and 1024.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1024),
    default = 1024,
    derive(Debug, Clone, Copy, PartialEq, Eq, Display, Into, Default, Serialize, Deserialize)
)]
pub struct RanksPerNode(usize);

/// Errors building a [`UniverseConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    #[error("invalid universe configuration")]
    Json(#[from] serde_json::Error),

    /// The world size is out of range.
    #[error("invalid world size")]
    WorldSize(#[from] WorldSizeError),

    /// The node size is out of range.
    #[error("invalid ranks per node")]
    RanksPerNode(#[from] RanksPerNodeError),

    /// An environment variable is not a number.
    #[error("{name} must be a positive integer, got {value:?}")]
    Variable {
        /// Name of the variable.
        name: &'static str,
        /// Its value.
        value: String,
    },
}

/// Shape of an in-process job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    /// Number of participants.
    pub world_size: WorldSize,
    /// Participants per node.
    pub ranks_per_node: RanksPerNode,
}

impl UniverseConfig {
    /// A universe of `world_size` participants on one node.
    pub fn new(world_size: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            world_size: WorldSize::try_new(world_size)?,
            ..Self::default()
        })
    }

    /// Place `ranks_per_node` consecutive ranks on each node.
    pub fn with_ranks_per_node(mut self, ranks_per_node: usize) -> Result<Self, ConfigError> {
        self.ranks_per_node = RanksPerNode::try_new(ranks_per_node)?;
        Ok(self)
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read the configuration from `PARCOMM_WORLD_SIZE` and
    /// `PARCOMM_RANKS_PER_NODE`; unset variables take their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(size) = read_var(WORLD_SIZE_VAR)? {
            config.world_size = WorldSize::try_new(size)?;
        }
        if let Some(per_node) = read_var(RANKS_PER_NODE_VAR)? {
            config.ranks_per_node = RanksPerNode::try_new(per_node)?;
        }
        Ok(config)
    }

    /// Number of participants.
    pub fn world_size(&self) -> usize {
        self.world_size.into_inner()
    }

    /// Participants per node.
    pub fn ranks_per_node(&self) -> usize {
        self.ranks_per_node.into_inner()
    }

    /// Node hosting world rank `rank`.
    pub fn node_of(&self, rank: usize) -> usize {
        rank / self.ranks_per_node()
    }
}

fn read_var(name: &'static str) -> Result<Option<usize>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Variable { name, value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_put_four_ranks_on_one_node() {
        let config = UniverseConfig::default();
        assert_eq!(config.world_size(), 4);
        assert_eq!(config.node_of(3), 0);
    }

    #[test]
    fn world_size_is_validated() {
        assert!(matches!(UniverseConfig::new(0), Err(ConfigError::WorldSize(_))));
        assert!(matches!(UniverseConfig::new(1025), Err(ConfigError::WorldSize(_))));
        assert_eq!(UniverseConfig::new(16).unwrap().world_size(), 16);
    }

    #[test]
    fn ranks_are_grouped_into_nodes() {
        let config = UniverseConfig::new(6).unwrap().with_ranks_per_node(2).unwrap();
        let nodes: Vec<usize> = (0..6).map(|rank| config.node_of(rank)).collect();
        assert_eq!(nodes, [0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = UniverseConfig::from_json(r#"{ "world_size": 8 }"#).unwrap();
        assert_eq!(config.world_size(), 8);
        assert_eq!(config.ranks_per_node(), 1024);
    }

    #[test]
    fn json_rejects_out_of_range_values() {
        assert!(matches!(
            UniverseConfig::from_json(r#"{ "world_size": 0 }"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn json_round_trips() {
        let config = UniverseConfig::new(3).unwrap().with_ranks_per_node(1).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(UniverseConfig::from_json(&json).unwrap(), config);
    }
}
