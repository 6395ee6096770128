//! JSON plan documents: a physical tree plus its per-node properties.

use serde::{Deserialize, Serialize};

use slotforge_core::abt::Node;
use slotforge_core::error::{Error, Result};
use slotforge_core::props::NodePropsTable;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDocument {
    pub root: Node,
    pub props: NodePropsTable,
}

impl PlanDocument {
    /// Every node in the tree must have a properties entry.
    pub fn check_props(&self) -> Result<()> {
        let mut missing = None;
        self.root.walk(&mut |n| {
            if missing.is_none() && self.props.get(n.id).is_none() {
                missing = Some(n.id);
            }
        });
        match missing {
            Some(id) => Err(Error::MissingNodeProps(id)),
            None => Ok(()),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn parse_plan_json(src: &str) -> Result<PlanDocument> {
    let doc: PlanDocument =
        serde_json::from_str(src).map_err(|e| Error::Catalog(format!("plan document: {e}")))?;
    doc.check_props()?;
    Ok(doc)
}
