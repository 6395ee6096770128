//! Per-node lowering properties, keyed by `NodeId` rather than node identity.

use serde::{Deserialize, Serialize};

use crate::abt::{LimitSkipRequirement, ProjectionName, ProjectionSet};
use crate::error::{Error, Result};
use crate::id::{NodeId, PlanNodeId};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeProps {
    /// Sequential id stamped onto the lowered stage.
    pub plan_node_id: PlanNodeId,

    /// Index definition active for shard filtering below this node.
    #[serde(default)]
    pub index_scan_def_name: Option<String>,

    /// Projections the parent needs from this node; `None` keeps everything.
    #[serde(default)]
    pub projections: Option<ProjectionSet>,

    /// Limit/skip attached by the optimizer (drives top-k sorts).
    #[serde(default)]
    pub limit_skip: Option<LimitSkipRequirement>,

    /// Row-id projection the node's output carries.
    #[serde(default)]
    pub rid_projection: Option<ProjectionName>,
}

impl NodeProps {
    pub fn new(plan_node_id: PlanNodeId) -> Self {
        Self {
            plan_node_id,
            ..Self::default()
        }
    }

    pub fn with_projections<N: Into<ProjectionName>>(
        mut self,
        names: impl IntoIterator<Item = N>,
    ) -> Self {
        self.projections = Some(names.into_iter().collect());
        self
    }

    pub fn with_limit_skip(mut self, req: LimitSkipRequirement) -> Self {
        self.limit_skip = Some(req);
        self
    }

    pub fn with_rid_projection(mut self, name: impl Into<ProjectionName>) -> Self {
        self.rid_projection = Some(name.into());
        self
    }

    pub fn with_index_scan_def(mut self, name: impl Into<String>) -> Self {
        self.index_scan_def_name = Some(name.into());
        self
    }
}

/// Dense table of `NodeProps` indexed by `NodeId`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePropsTable(Vec<Option<NodeProps>>);

impl NodePropsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: NodeId, props: NodeProps) {
        let idx = id.get() as usize;
        if self.0.len() <= idx {
            self.0.resize(idx + 1, None);
        }
        self.0[idx] = Some(props);
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeProps> {
        self.0.get(id.get() as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeProps> {
        self.0.get_mut(id.get() as usize).and_then(Option::as_mut)
    }

    /// Lookup that treats a missing entry as fatal.
    pub fn require(&self, id: NodeId) -> Result<&NodeProps> {
        self.get(id).ok_or(Error::MissingNodeProps(id))
    }

    pub fn len(&self) -> usize {
        self.0.iter().filter(|p| p.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_inserts_and_missing_lookup() {
        let mut table = NodePropsTable::new();
        table.insert(NodeId::new(3), NodeProps::new(PlanNodeId::new(9)));
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.require(NodeId::new(3)).map(|p| p.plan_node_id).ok(),
            Some(PlanNodeId::new(9))
        );
        assert!(matches!(
            table.require(NodeId::new(1)),
            Err(Error::MissingNodeProps(id)) if id == NodeId::new(1)
        ));
        assert!(table.get(NodeId::new(40)).is_none());
    }
}
