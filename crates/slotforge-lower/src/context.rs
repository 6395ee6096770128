//! Per-invocation state shared by the rewrite and lowering passes.

use std::sync::Arc;

use slotforge_core::config::LoweringConfig;
use slotforge_core::error::Result;
use slotforge_core::id::{FrameIdGenerator, SlotId, SlotIdGenerator};
use slotforge_core::names::NameGenerator;
use slotforge_core::value::Value;
use slotforge_stage::runtime::SHARD_FILTERER_SLOT_NAME;
use slotforge_stage::{InputParamToSlotMap, RuntimeEnvironment, YieldPolicy};

/// Caller-supplied knobs. The yield policy is passed through untouched.
#[derive(Debug, Clone, Default)]
pub struct LoweringOptions {
    pub config: LoweringConfig,
    pub yield_policy: Option<Arc<dyn YieldPolicy>>,
}

impl LoweringOptions {
    pub fn new(config: LoweringConfig) -> Self {
        Self {
            config,
            yield_policy: None,
        }
    }

    pub fn with_yield_policy(mut self, policy: Arc<dyn YieldPolicy>) -> Self {
        self.yield_policy = Some(policy);
        self
    }
}

/// Generators and environments owned by exactly one compilation.
#[derive(Debug)]
pub struct CompilationContext {
    pub names: NameGenerator,
    pub slot_ids: SlotIdGenerator,
    pub frame_ids: FrameIdGenerator,
    pub runtime_env: RuntimeEnvironment,
    pub input_params: InputParamToSlotMap,
}

impl CompilationContext {
    pub fn new(config: &LoweringConfig) -> Result<Self> {
        let mut ctx = Self {
            names: NameGenerator::new(),
            slot_ids: SlotIdGenerator::new(),
            frame_ids: FrameIdGenerator::new(config.first_frame_id),
            runtime_env: RuntimeEnvironment::new(),
            input_params: InputParamToSlotMap::new(),
        };
        if config.register_shard_filterer {
            ctx.register_shard_filterer()?;
        }
        Ok(ctx)
    }

    /// Register the shard-filterer runtime slot, as a sharded deployment
    /// does before lowering.
    pub fn register_shard_filterer(&mut self) -> Result<SlotId> {
        self.runtime_env.register_slot(
            Some(SHARD_FILTERER_SLOT_NAME),
            Value::Nothing,
            &mut self.slot_ids,
        )
    }

    pub fn shard_filterer_slot(&self) -> Option<SlotId> {
        self.runtime_env.get_slot(SHARD_FILTERER_SLOT_NAME)
    }
}
