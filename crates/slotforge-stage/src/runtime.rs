//! Per-compilation runtime environment and parameter bookkeeping.

use std::collections::BTreeMap;
use std::fmt;

use slotforge_core::error::{Error, Result};
use slotforge_core::id::{InputParamId, SlotId, SlotIdGenerator};
use slotforge_core::value::Value;

/// Name of the runtime slot holding the shard-filterer context.
pub const SHARD_FILTERER_SLOT_NAME: &str = "shardFilterer";

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSlot {
    pub id: SlotId,
    pub name: Option<String>,
    pub value: Value,
}

/// Slots that live for the whole query rather than flowing through stages.
///
/// Owned by exactly one lowering invocation.
#[derive(Debug, Clone, Default)]
pub struct RuntimeEnvironment {
    slots: Vec<RuntimeSlot>,
}

impl RuntimeEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a slot from `ids` and register it, optionally under a name.
    ///
    /// Names are unique; registering one twice is an error.
    pub fn register_slot(
        &mut self,
        name: Option<&str>,
        value: Value,
        ids: &mut SlotIdGenerator,
    ) -> Result<SlotId> {
        if let Some(n) = name {
            if self.get_slot(n).is_some() {
                return Err(Error::DuplicateSlot(n.to_string()));
            }
        }
        let id = ids.generate();
        self.slots.push(RuntimeSlot {
            id,
            name: name.map(str::to_string),
            value,
        });
        Ok(id)
    }

    pub fn get_slot(&self, name: &str) -> Option<SlotId> {
        self.slots
            .iter()
            .find(|s| s.name.as_deref() == Some(name))
            .map(|s| s.id)
    }

    pub fn value_of(&self, id: SlotId) -> Option<&Value> {
        self.slots.iter().find(|s| s.id == id).map(|s| &s.value)
    }

    /// Replace the value held by a registered slot; false if unknown.
    pub fn reset_value(&mut self, id: SlotId, value: Value) -> bool {
        match self.slots.iter_mut().find(|s| s.id == id) {
            Some(slot) => {
                slot.value = value;
                true
            }
            None => false,
        }
    }

    pub fn slots(&self) -> &[RuntimeSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Parameter id -> slot, so repeated references share one slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputParamToSlotMap(BTreeMap<InputParamId, SlotId>);

impl InputParamToSlotMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: InputParamId) -> Option<SlotId> {
        self.0.get(&id).copied()
    }

    pub fn insert(&mut self, id: InputParamId, slot: SlotId) {
        self.0.insert(id, slot);
    }

    pub fn iter(&self) -> impl Iterator<Item = (InputParamId, SlotId)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Interruption policy handed to parallel-eligible stages untouched.
pub trait YieldPolicy: fmt::Debug + Send + Sync {
    fn should_yield(&self) -> bool {
        false
    }
}

/// Policy that never yields.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoYield;

impl YieldPolicy for NoYield {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_slots_are_unique() {
        let mut ids = SlotIdGenerator::new();
        let mut env = RuntimeEnvironment::new();
        let s = env
            .register_slot(Some(SHARD_FILTERER_SLOT_NAME), Value::Nothing, &mut ids)
            .ok();
        assert_eq!(s, Some(SlotId::new(1)));
        assert_eq!(env.get_slot(SHARD_FILTERER_SLOT_NAME), Some(SlotId::new(1)));
        assert!(matches!(
            env.register_slot(Some(SHARD_FILTERER_SLOT_NAME), Value::Nothing, &mut ids),
            Err(Error::DuplicateSlot(_))
        ));
        let unnamed = env.register_slot(None, Value::int32(1), &mut ids).ok();
        assert_eq!(unnamed, Some(SlotId::new(2)));
        assert!(env.reset_value(SlotId::new(2), Value::int32(5)));
        assert_eq!(env.value_of(SlotId::new(2)), Some(&Value::int32(5)));
    }
}
