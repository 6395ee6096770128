#![forbid(unsafe_code)]
//! slotforge-core: the closed ABT IR plus everything the lowering passes share.
//!
//! Contents:
//! - `abt`: expressions, paths and physical/logical plan nodes
//! - `value`: typed constants (exact width/precision is preserved)
//! - `id`: strongly-typed ids and the per-compilation generators
//! - `props`: per-node lowering properties keyed by `NodeId`
//! - `scan_def`: collection metadata consulted during lowering
//! - `explain`: deterministic textual rendering of ABT trees
//!
//! No I/O, no async, no global state lives here.

pub mod abt;
pub mod config;
pub mod error;
pub mod explain;
pub mod hash;
pub mod id;
pub mod names;
pub mod prelude;
pub mod props;
pub mod scan_def;
pub mod value;

pub use error::{Error, Result};

/// Crate version, surfaced in explain headers.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
