//! Lowering output: the stage tree plus everything the engine needs to bind
//! it at runtime.

use slotforge_core::abt::{Node, ProjectionName};
use slotforge_core::explain::explain_abt;
use slotforge_core::hash::{hash_str, Hash256};
use slotforge_core::id::SlotId;
use slotforge_stage::{strip_uuids, DebugPrinter, InputParamToSlotMap, RuntimeEnvironment, Stage};

#[derive(Debug, Clone)]
pub struct LoweredPlan {
    pub stage: Stage,
    /// Root projections in declared order, each with its final slot.
    pub output_slots: Vec<(ProjectionName, SlotId)>,
    /// Present when the root's properties ask for a row id.
    pub rid_slot: Option<SlotId>,
    pub input_params: InputParamToSlotMap,
    pub runtime_env: RuntimeEnvironment,
    /// The path-free tree that was lowered.
    pub rewritten: Node,
    /// Rewrite rounds needed to reach the fixpoint.
    pub rounds: usize,
}

impl LoweredPlan {
    pub fn output_slot(&self, name: &str) -> Option<SlotId> {
        self.output_slots
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, s)| *s)
    }

    /// Rewritten ABT followed by the stage tree.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        out.push_str("-- abt --\n");
        out.push_str(&explain_abt(&self.rewritten));
        out.push_str("-- stages --\n");
        out.push_str(&DebugPrinter::new().print(&self.stage));
        out
    }

    /// `explain` with collection UUIDs masked, for golden comparison.
    pub fn explain_stripped(&self) -> String {
        strip_uuids(&self.explain())
    }

    /// Fingerprint of the stripped explain text.
    pub fn fingerprint(&self) -> Hash256 {
        hash_str(&self.explain_stripped())
    }
}
