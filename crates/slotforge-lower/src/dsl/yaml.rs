//! YAML catalog -> `ScanDefinitions`.
//!
//! Example:
//! ```yaml
//! collections:
//!   c1:
//!     db_name: test.c1
//!     uuid: "5f1c0c2e-8d4b-4a55-9f34-6e1f7b0b1a11"
//!     options: { readConcern: local }
//!     shard_key:
//!       - { path: "a.b", op: Ascending }
//!       - { path: "c", op: Clustered }
//!   gone:
//!     db_name: test.gone
//!     exists: false
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use slotforge_core::abt::{CollationOp, Path};
use slotforge_core::error::{Error, Result};
use slotforge_core::scan_def::{IndexCollationEntry, ScanDefinition, ScanDefinitions};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDef {
    pub db_name: String,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default = "default_exists")]
    pub exists: bool,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub shard_key: Vec<ShardKeyDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardKeyDef {
    /// Dotted field path, e.g. `a.b`.
    pub path: String,
    #[serde(default = "default_op")]
    pub op: CollationOp,
}

fn default_exists() -> bool {
    true
}

fn default_op() -> CollationOp {
    CollationOp::Ascending
}

/// `a.b.c` -> `Get a (Get b (Get c Identity))`.
fn parse_dotted_path(dotted: &str) -> Result<Path> {
    let parts: Vec<&str> = dotted.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(Error::Catalog(format!("invalid shard key path '{dotted}'")));
    }
    Ok(parts
        .into_iter()
        .rev()
        .fold(Path::Identity, |inner, field| Path::get(field, inner)))
}

fn to_scan_def(def: CollectionDef) -> Result<ScanDefinition> {
    let shard_key = def
        .shard_key
        .iter()
        .map(|k| -> Result<IndexCollationEntry> {
            Ok(IndexCollationEntry::new(parse_dotted_path(&k.path)?, k.op))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ScanDefinition {
        db_name: def.db_name,
        options: def.options,
        uuid: def.uuid,
        exists: def.exists,
        shard_key,
    })
}

pub fn parse_yaml_catalog(yaml_src: &str) -> Result<ScanDefinitions> {
    let doc: Catalog =
        serde_yaml::from_str(yaml_src).map_err(|e| Error::Catalog(e.to_string()))?;
    doc.collections
        .into_iter()
        .map(|(name, def)| -> Result<(String, ScanDefinition)> { Ok((name, to_scan_def(def)?)) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shard_keys_and_defaults() {
        let src = r#"
collections:
  c1:
    db_name: test.c1
    uuid: "5f1c0c2e-8d4b-4a55-9f34-6e1f7b0b1a11"
    shard_key:
      - { path: "a.b", op: Ascending }
      - { path: "c", op: Clustered }
  gone:
    db_name: test.gone
    exists: false
"#;
        let defs = parse_yaml_catalog(src).unwrap();
        let c1 = &defs["c1"];
        assert!(c1.exists && c1.is_sharded() && c1.uuid.is_some());
        assert_eq!(
            c1.shard_key[0].path,
            Path::get("a", Path::get("b", Path::Identity))
        );
        assert_eq!(c1.shard_key[0].path.dotted_field_name().as_deref(), Some("a.b"));
        assert_eq!(c1.shard_key[1].op, CollationOp::Clustered);
        assert!(!defs["gone"].exists);
    }

    #[test]
    fn bad_documents_are_catalog_errors() {
        assert!(matches!(parse_yaml_catalog("collections: [1, 2]"), Err(Error::Catalog(_))));
        let src = "collections:\n  c:\n    db_name: x\n    shard_key: [{ path: \"a..b\" }]\n";
        assert!(matches!(parse_yaml_catalog(src), Err(Error::Catalog(_))));
    }
}
