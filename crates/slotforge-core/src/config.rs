//! Lowering configuration that callers can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoweringConfig {
    /// Upper bound on path-lowering/const-eval rounds before giving up.
    pub max_rewrite_rounds: usize,

    /// Worker count recorded on parallel-eligible scans and exchanges.
    pub partitions: usize,

    /// Register the shard-filterer runtime slot up front, as a sharded
    /// deployment would before lowering.
    pub register_shard_filterer: bool,

    /// First id handed out for let/lambda frames.
    pub first_frame_id: u64,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            max_rewrite_rounds: 100,
            partitions: 1,
            register_shard_filterer: false,
            first_frame_id: 100,
        }
    }
}

impl LoweringConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `SLOTFORGE_MAX_REWRITE_ROUNDS`: rewrite round cap
    /// - `SLOTFORGE_PARTITIONS`: partition count for parallel stages
    /// - `SLOTFORGE_REGISTER_SHARD_FILTERER`: `true`/`1` to pre-register the filterer slot
    /// - `SLOTFORGE_FIRST_FRAME_ID`: first local-variable frame id
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("SLOTFORGE_MAX_REWRITE_ROUNDS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_rewrite_rounds = v;
            }
        }

        if let Ok(s) = std::env::var("SLOTFORGE_PARTITIONS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.partitions = v;
            }
        }

        if let Ok(s) = std::env::var("SLOTFORGE_REGISTER_SHARD_FILTERER") {
            cfg.register_shard_filterer = matches!(s.trim(), "1" | "true" | "yes");
        }

        if let Ok(s) = std::env::var("SLOTFORGE_FIRST_FRAME_ID") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.first_frame_id = v;
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_rewrite_rounds == 0 {
            return Err(Error::Config("max_rewrite_rounds must be at least 1".into()));
        }
        if self.partitions == 0 {
            return Err(Error::Config("partitions must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = LoweringConfig::default();
        assert_eq!(cfg.max_rewrite_rounds, 100);
        assert_eq!(cfg.first_frame_id, 100);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_partitions_rejected() {
        let cfg = LoweringConfig {
            partitions: 0,
            ..LoweringConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }
}
