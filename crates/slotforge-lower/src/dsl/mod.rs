//! Text formats accepted by the lowering entry points.

pub mod plan;
pub mod yaml;
