// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory backing store for exercising capture and rollback.

use std::collections::{BTreeMap, BTreeSet};

use echo_txn::{
    BackingStore, EntityHandle, EntityIntent, ItemSnapshot, MutationRecord, PlayerId, SlotRef,
    StoreError,
};

/// One call the engine made against the store, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// `apply_mutation(target: original → replacement)`.
    Apply(SlotRef, ItemSnapshot, ItemSnapshot),
    /// `apply_inverse(target: replacement → original)`.
    Invert(SlotRef, ItemSnapshot, ItemSnapshot),
    /// `spawn` returned this handle.
    Spawn(EntityHandle),
    /// `despawn(handle)`.
    Despawn(EntityHandle),
    /// `select_hotbar(player, index)`.
    Select(PlayerId, u8),
}

/// Slot map plus entity table implementing [`BackingStore`].
///
/// Slots that were never written read as empty. Writes are checked: a
/// record whose expected prior value does not match the stored one fails with
/// [`StoreError::SnapshotMismatch`], which is what catches out-of-order
/// restoration in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackingStore {
    slots: BTreeMap<SlotRef, ItemSnapshot>,
    entities: BTreeMap<EntityHandle, EntityIntent>,
    held: BTreeMap<PlayerId, u8>,
    next_entity: u64,
    calls: Vec<StoreCall>,
    refuse: BTreeSet<SlotRef>,
    refuse_spawn: bool,
    refuse_despawn: bool,
}

impl InMemoryBackingStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `slot` with `value` without recording a call.
    pub fn with_slot(mut self, slot: SlotRef, value: ItemSnapshot) -> Self {
        self.set(slot, value);
        self
    }

    /// Writes `slot` directly, bypassing checks and the call log.
    pub fn set(&mut self, slot: SlotRef, value: ItemSnapshot) {
        if value.is_empty() {
            self.slots.remove(&slot);
        } else {
            self.slots.insert(slot, value);
        }
    }

    /// Current value of `slot`.
    pub fn get(&self, slot: SlotRef) -> ItemSnapshot {
        self.slots.get(&slot).copied().unwrap_or_default()
    }

    /// Every non-empty slot.
    pub fn slots(&self) -> &BTreeMap<SlotRef, ItemSnapshot> {
        &self.slots
    }

    /// `true` while `handle` names a live entity.
    pub fn is_live(&self, handle: EntityHandle) -> bool {
        self.entities.contains_key(&handle)
    }

    /// Number of live entities.
    pub fn live_entities(&self) -> usize {
        self.entities.len()
    }

    /// Selected hotbar slot of `player`, if ever selected.
    pub fn held(&self, player: PlayerId) -> Option<u8> {
        self.held.get(&player).copied()
    }

    /// Calls made so far.
    pub fn calls(&self) -> &[StoreCall] {
        &self.calls
    }

    /// Number of inverse applications so far.
    pub fn inversions(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, StoreCall::Invert(..)))
            .count()
    }

    /// Forgets the call log.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Makes every write to `slot` fail with [`StoreError::Unavailable`].
    pub fn refuse_slot(&mut self, slot: SlotRef) {
        self.refuse.insert(slot);
    }

    /// Makes every write to `slot` succeed again.
    pub fn allow_slot(&mut self, slot: SlotRef) {
        self.refuse.remove(&slot);
    }

    /// Makes `spawn` fail.
    pub fn set_refuse_spawn(&mut self, refuse: bool) {
        self.refuse_spawn = refuse;
    }

    /// Makes `despawn` fail.
    pub fn set_refuse_despawn(&mut self, refuse: bool) {
        self.refuse_despawn = refuse;
    }

    fn write(
        &mut self,
        target: SlotRef,
        expected: ItemSnapshot,
        value: ItemSnapshot,
    ) -> Result<(), StoreError> {
        if self.refuse.contains(&target) {
            return Err(StoreError::Unavailable(format!("writes to {target} refused")));
        }
        let found = self.get(target);
        if found != expected {
            return Err(StoreError::SnapshotMismatch {
                target,
                expected,
                found,
            });
        }
        self.set(target, value);
        Ok(())
    }
}

impl BackingStore for InMemoryBackingStore {
    fn apply_mutation(&mut self, record: &MutationRecord) -> Result<(), StoreError> {
        self.write(record.target(), record.original(), record.replacement())?;
        self.calls.push(StoreCall::Apply(
            record.target(),
            record.original(),
            record.replacement(),
        ));
        Ok(())
    }

    fn apply_inverse(&mut self, record: &MutationRecord) -> Result<(), StoreError> {
        self.write(record.target(), record.replacement(), record.original())?;
        self.calls.push(StoreCall::Invert(
            record.target(),
            record.replacement(),
            record.original(),
        ));
        Ok(())
    }

    fn spawn(&mut self, intent: &EntityIntent) -> Result<EntityHandle, StoreError> {
        if self.refuse_spawn {
            return Err(StoreError::Unavailable("spawns refused".into()));
        }
        self.next_entity += 1;
        let handle = EntityHandle(self.next_entity);
        self.entities.insert(handle, intent.clone());
        self.calls.push(StoreCall::Spawn(handle));
        Ok(handle)
    }

    fn despawn(&mut self, handle: EntityHandle) -> Result<(), StoreError> {
        if self.refuse_despawn {
            return Err(StoreError::Unavailable("despawns refused".into()));
        }
        self.entities
            .remove(&handle)
            .ok_or(StoreError::UnknownEntity(handle))?;
        self.calls.push(StoreCall::Despawn(handle));
        Ok(())
    }

    fn select_hotbar(&mut self, player: PlayerId, index: u8) -> Result<(), StoreError> {
        self.held.insert(player, index);
        self.calls.push(StoreCall::Select(player, index));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echo_txn::{make_container_id, make_item_id, BlockPos};

    #[test]
    fn mismatched_original_is_rejected() {
        let slot = SlotRef::index(make_container_id("chest"), 0);
        let stone = make_item_id("stone");
        let mut store = InMemoryBackingStore::new().with_slot(slot, ItemSnapshot::stack(stone, 2));
        let stale = MutationRecord::new(slot, ItemSnapshot::Empty, ItemSnapshot::stack(stone, 5));
        assert!(matches!(
            store.apply_mutation(&stale),
            Err(StoreError::SnapshotMismatch { .. })
        ));
        assert_eq!(store.get(slot), ItemSnapshot::stack(stone, 2));
        assert!(store.calls().is_empty());
    }

    #[test]
    fn inverse_puts_original_back() -> Result<(), StoreError> {
        let slot = SlotRef::index(make_container_id("chest"), 0);
        let record = MutationRecord::new(
            slot,
            ItemSnapshot::Empty,
            ItemSnapshot::stack(make_item_id("stone"), 5),
        );
        let mut store = InMemoryBackingStore::new();
        store.apply_mutation(&record)?;
        store.apply_inverse(&record)?;
        assert_eq!(store.get(slot), ItemSnapshot::Empty);
        assert!(store.slots().is_empty());
        assert_eq!(store.inversions(), 1);
        Ok(())
    }

    #[test]
    fn despawn_of_unknown_entity_fails() -> Result<(), StoreError> {
        let mut store = InMemoryBackingStore::new();
        let handle = store.spawn(&EntityIntent::item_drop(
            ItemSnapshot::stack(make_item_id("stone"), 1),
            BlockPos::new(0, 0, 0),
        ))?;
        store.despawn(handle)?;
        assert_eq!(store.despawn(handle), Err(StoreError::UnknownEntity(handle)));
        Ok(())
    }
}
