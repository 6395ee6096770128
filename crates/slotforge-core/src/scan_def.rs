//! Collection metadata the lowering pass consults (namespace, UUID, shard key).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::abt::{CollationOp, Path};
use crate::error::{Error, Result};

/// Key-string format version used for index bounds.
pub const INDEX_VERSION: i64 = 1;
/// All-ascending ordering bits for key-string bounds.
pub const ORDERING_BITS: i32 = 0;

/// One component of a shard key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexCollationEntry {
    pub path: Path,
    pub op: CollationOp,
}

impl IndexCollationEntry {
    pub fn new(path: Path, op: CollationOp) -> Self {
        Self { path, op }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanDefinition {
    pub db_name: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default = "default_exists")]
    pub exists: bool,
    #[serde(default)]
    pub shard_key: Vec<IndexCollationEntry>,
}

fn default_exists() -> bool {
    true
}

impl ScanDefinition {
    pub fn new(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            options: BTreeMap::new(),
            uuid: None,
            exists: true,
            shard_key: Vec::new(),
        }
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_shard_key(mut self, shard_key: Vec<IndexCollationEntry>) -> Self {
        self.shard_key = shard_key;
        self
    }

    pub fn is_sharded(&self) -> bool {
        !self.shard_key.is_empty()
    }
}

/// Collection name -> definition.
pub type ScanDefinitions = BTreeMap<String, ScanDefinition>;

pub fn require_scan_def<'a>(defs: &'a ScanDefinitions, name: &str) -> Result<&'a ScanDefinition> {
    defs.get(name)
        .ok_or_else(|| Error::MissingScanDefinition(name.to_string()))
}
