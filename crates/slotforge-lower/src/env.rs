//! Static variable analysis over one tree snapshot.
//!
//! A `VariableEnvironment` answers "where is this name defined", "how often
//! is it read" and "what does this node read from outside". It is only valid
//! for the exact tree it was built from; `is_current_for` compares
//! fingerprints so callers can tell when a rewrite has made it stale.

use std::collections::{BTreeMap, BTreeSet};

use slotforge_core::abt::{Expr, Node, NodeKind, Path, ProjectionName};
use slotforge_core::error::Result;
use slotforge_core::hash::{hash_serde, Hash256};
use slotforge_core::id::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    /// Bound by a plan node (scan, evaluation, group-by, union, ...).
    Projection,
    Let,
    Lambda,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub kind: DefinitionKind,
    /// Plan node that defines (or whose expressions contain) the binding.
    pub node: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct VariableEnvironment {
    definitions: BTreeMap<ProjectionName, Definition>,
    uses: BTreeMap<ProjectionName, usize>,
    free_vars: BTreeMap<NodeId, BTreeSet<ProjectionName>>,
    fingerprint: Hash256,
}

impl VariableEnvironment {
    pub fn build(root: &Node) -> Result<Self> {
        let mut env = Self::empty(hash_serde(root)?);
        root.walk(&mut |n| env.visit_node(n));
        Ok(env)
    }

    /// Environment for a standalone expression (no plan nodes).
    pub fn for_expr(e: &Expr) -> Result<Self> {
        let mut env = Self::empty(hash_serde(e)?);
        env.visit_expr(e, None);
        Ok(env)
    }

    fn empty(fingerprint: Hash256) -> Self {
        Self {
            definitions: BTreeMap::new(),
            uses: BTreeMap::new(),
            free_vars: BTreeMap::new(),
            fingerprint,
        }
    }

    /// True if this environment was built from a tree equal to `root`.
    pub fn is_current_for(&self, root: &Node) -> Result<bool> {
        Ok(hash_serde(root)? == self.fingerprint)
    }

    pub fn is_current_for_expr(&self, e: &Expr) -> Result<bool> {
        Ok(hash_serde(e)? == self.fingerprint)
    }

    pub fn definition(&self, name: &ProjectionName) -> Option<&Definition> {
        self.definitions.get(name)
    }

    pub fn use_count(&self, name: &ProjectionName) -> usize {
        self.uses.get(name).copied().unwrap_or(0)
    }

    /// Variables read by `node`'s own expressions and not bound inside them.
    pub fn free_variables(&self, node: NodeId) -> Option<&BTreeSet<ProjectionName>> {
        self.free_vars.get(&node)
    }

    /// Names read somewhere but never defined anywhere in the tree.
    pub fn unresolved(&self) -> BTreeSet<ProjectionName> {
        self.uses
            .keys()
            .filter(|n| !self.definitions.contains_key(*n))
            .cloned()
            .collect()
    }

    fn define(&mut self, name: &ProjectionName, kind: DefinitionKind, node: Option<NodeId>) {
        self.definitions
            .entry(name.clone())
            .or_insert(Definition { kind, node });
    }

    fn visit_node(&mut self, n: &Node) {
        let id = Some(n.id);
        let projection = DefinitionKind::Projection;
        match &n.kind {
            NodeKind::PhysicalScan { fpm, .. }
            | NodeKind::IndexScan { fpm, .. }
            | NodeKind::Seek { fpm, .. } => {
                for p in fpm.projections() {
                    self.define(&p, projection, id);
                }
            }
            NodeKind::Evaluation { projection: p, .. } => self.define(p, projection, id),
            NodeKind::GroupBy {
                agg_projections, ..
            } => {
                for p in agg_projections {
                    self.define(p, projection, id);
                }
            }
            NodeKind::Union { projections, .. }
            | NodeKind::SortedMerge { projections, .. }
            | NodeKind::SpoolConsumer { projections, .. } => {
                for p in projections {
                    self.define(p, projection, id);
                }
            }
            NodeKind::Unwind { pid_projection, .. } => self.define(pid_projection, projection, id),
            NodeKind::Scan { projection: p, .. } => self.define(p, projection, id),
            _ => {}
        }
        for name in node_reads(n) {
            *self.uses.entry(name).or_insert(0) += 1;
        }
        let mut free = BTreeSet::new();
        for e in n.exprs() {
            free.extend(e.free_variables());
            self.visit_expr(e, id);
        }
        self.free_vars.insert(n.id, free);
    }

    fn visit_expr(&mut self, e: &Expr, node: Option<NodeId>) {
        e.visit(&mut |sub| match sub {
            Expr::Variable(v) => *self.uses.entry(v.clone()).or_insert(0) += 1,
            Expr::Let { var, .. } => self.define(var, DefinitionKind::Let, node),
            Expr::LambdaAbstraction { var, .. } => self.define(var, DefinitionKind::Lambda, node),
            _ => {}
        });
    }
}

/// Projection names a node reads structurally (outside its expressions).
fn node_reads(n: &Node) -> Vec<ProjectionName> {
    match &n.kind {
        NodeKind::Seek { rid_projection, .. } => vec![rid_projection.clone()],
        NodeKind::GroupBy { group_keys, .. } => group_keys.clone(),
        NodeKind::HashJoin {
            left_keys,
            right_keys,
            ..
        }
        | NodeKind::MergeJoin {
            left_keys,
            right_keys,
            ..
        } => left_keys.iter().chain(right_keys).cloned().collect(),
        NodeKind::NestedLoopJoin { correlated, .. } => correlated.iter().cloned().collect(),
        NodeKind::Collation { spec, .. } => spec.iter().map(|(p, _)| p.clone()).collect(),
        NodeKind::Unique { keys, .. } => keys.clone(),
        NodeKind::Unwind { projection, .. } => vec![projection.clone()],
        NodeKind::SpoolProducer { projections, .. } => projections.clone(),
        NodeKind::Root { projections, .. } => projections.iter().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Every name bound by a let or lambda anywhere inside `e` (paths included).
pub fn binders(e: &Expr) -> BTreeSet<ProjectionName> {
    let mut out = BTreeSet::new();
    e.visit(&mut |sub| match sub {
        Expr::Let { var, .. } | Expr::LambdaAbstraction { var, .. } => {
            out.insert(var.clone());
        }
        _ => {}
    });
    out
}

/// Binders inside the expressions embedded in `p`.
pub fn path_binders(p: &Path) -> BTreeSet<ProjectionName> {
    let mut out = BTreeSet::new();
    p.visit_exprs(&mut |e| out.extend(binders(e)));
    out
}
