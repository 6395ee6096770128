//! Strongly-typed identifiers used across the lowering pipeline.
//!
//! Downstream crates should *not* use raw integers for IDs. Generators are
//! plain values owned by one compilation; nothing here is process-wide.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident, $prefix:literal) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            Default,
            PartialEq,
            Eq,
            Hash,
            Serialize,
            Deserialize,
            Ord,
            PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

new_id!(NodeId, "n");
new_id!(PlanNodeId, "");
new_id!(SlotId, "s");
new_id!(FrameId, "l");

/// Id of a runtime-bound query parameter (`getParam(<id>, <tag>)`).
pub type InputParamId = i32;

/// Shared id correlating a spool producer with its consumers.
pub type SpoolId = i64;

/// Hands out `NodeId`s while a tree is constructed.
#[derive(Debug, Clone, Default)]
pub struct NodeIdGenerator {
    next: u64,
}

impl NodeIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&mut self) -> NodeId {
        let id = NodeId::new(self.next);
        self.next += 1;
        id
    }
}

/// Monotonic slot allocator. Slot 0 is never handed out.
#[derive(Debug, Clone)]
pub struct SlotIdGenerator {
    next: u64,
}

impl Default for SlotIdGenerator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl SlotIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&mut self) -> SlotId {
        let id = SlotId::new(self.next);
        self.next += 1;
        id
    }

    /// Number of slots handed out so far.
    pub fn allocated(&self) -> u64 {
        self.next - 1
    }
}

/// Allocator for local-variable frames (`let` / `lambda`).
#[derive(Debug, Clone)]
pub struct FrameIdGenerator {
    next: u64,
}

impl FrameIdGenerator {
    pub fn new(start: u64) -> Self {
        Self { next: start }
    }

    pub fn generate(&mut self) -> FrameId {
        let id = FrameId::new(self.next);
        self.next += 1;
        id
    }
}

impl Default for FrameIdGenerator {
    fn default() -> Self {
        Self::new(100)
    }
}
