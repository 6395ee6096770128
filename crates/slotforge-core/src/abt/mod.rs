//! The ABT: one closed IR for scalar expressions, paths and plan nodes.
//!
//! Trees are values. Rewrites rebuild them; nothing is mutated in place and
//! node identity is carried by an explicit `NodeId`, never by address.

pub mod builder;
pub mod expr;
pub mod node;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use builder::PlanBuilder;
pub use expr::{Expr, Path};
pub use node::{
    CompoundBound, CompoundInterval, FieldProjectionMap, LimitSkipRequirement, Node, NodeKind,
};

/// Name of a value flowing between plan nodes (or a let/lambda variable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectionName(String);

impl ProjectionName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectionName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProjectionName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

pub type FieldName = String;

/// Insertion-ordered set of projection names (no duplicates).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectionSet(Vec<ProjectionName>);

impl ProjectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the name was already present.
    pub fn insert(&mut self, name: ProjectionName) -> bool {
        if self.0.contains(&name) {
            return false;
        }
        self.0.push(name);
        true
    }

    pub fn contains(&self, name: &ProjectionName) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProjectionName> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<ProjectionName>> FromIterator<N> for ProjectionSet {
    fn from_iter<I: IntoIterator<Item = N>>(iter: I) -> Self {
        let mut set = ProjectionSet::new();
        for name in iter {
            set.insert(name.into());
        }
        set
    }
}

/// Unary and binary operators of the expression sublanguage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operations {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Cmp3w,
    EqMember,
    Add,
    Sub,
    Mult,
    Div,
    And,
    Or,
    FillEmpty,
    Neg,
    Not,
}

impl Operations {
    pub fn is_unary(self) -> bool {
        matches!(self, Operations::Neg | Operations::Not)
    }

    pub fn is_comparison(self) -> bool {
        use Operations::*;
        matches!(self, Eq | Neq | Gt | Gte | Lt | Lte | Cmp3w)
    }

    pub fn name(self) -> &'static str {
        use Operations::*;
        match self {
            Eq => "Eq",
            Neq => "Neq",
            Gt => "Gt",
            Gte => "Gte",
            Lt => "Lt",
            Lte => "Lte",
            Cmp3w => "Cmp3w",
            EqMember => "EqMember",
            Add => "Add",
            Sub => "Sub",
            Mult => "Mult",
            Div => "Div",
            And => "And",
            Or => "Or",
            FillEmpty => "FillEmpty",
            Neg => "Neg",
            Not => "Not",
        }
    }
}

/// Sort direction of one collation component.
///
/// `Clustered` only appears in shard keys, where it marks a hashed component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollationOp {
    Ascending,
    Descending,
    Clustered,
}

impl CollationOp {
    pub fn name(self) -> &'static str {
        match self {
            CollationOp::Ascending => "Ascending",
            CollationOp::Descending => "Descending",
            CollationOp::Clustered => "Clustered",
        }
    }
}

pub type CollationSpec = Vec<(ProjectionName, CollationOp)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
}

/// Aggregation phase. Always explicit; never derived from tree shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupNodeType {
    Complete,
    Local,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpoolProducerType {
    Eager,
    Lazy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpoolConsumerType {
    Regular,
    Stack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionType {
    Centralized,
    RoundRobin,
    HashPartitioning(Vec<ProjectionName>),
    Broadcast,
    Replicated,
}

macro_rules! debug_name {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:?}", self)
            }
        })*
    };
}

debug_name!(JoinType, GroupNodeType, SpoolProducerType, SpoolConsumerType);
