//! Tracing hooks for the lowering passes.
//!
//! Compiled to no-ops without the `tracing` feature so the library carries
//! no logging dependency when embedded.

#[cfg(feature = "tracing")]
pub fn rewrite_round(round: usize, path_changed: bool, const_changed: bool, paths_left: usize) {
    tracing::debug!(round, path_changed, const_changed, paths_left, "rewrite round");
}

#[cfg(not(feature = "tracing"))]
pub fn rewrite_round(_round: usize, _path_changed: bool, _const_changed: bool, _paths_left: usize) {
}

#[cfg(feature = "tracing")]
pub fn lowered_node(kind: &str, plan_node_id: u64, bound_slots: usize) {
    tracing::debug!(kind, plan_node_id, bound_slots, "lowered node");
}

#[cfg(not(feature = "tracing"))]
pub fn lowered_node(_kind: &str, _plan_node_id: u64, _bound_slots: usize) {}

#[cfg(feature = "tracing")]
pub fn emit_span(event: &str, key_values: &[(&str, String)]) {
    let span = tracing::span!(tracing::Level::TRACE, "slotforge", event);
    let _guard = span.enter();
    for (k, v) in key_values {
        tracing::trace!(%event, %k, %v, "lowering");
    }
}

#[cfg(not(feature = "tracing"))]
pub fn emit_span(_event: &str, _key_values: &[(&str, String)]) {}
