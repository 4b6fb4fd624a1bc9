// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Mutation records and entity intents captured by transactions.

use crate::ident::EntityHandle;
use crate::snapshot::{BlockPos, ItemSnapshot, SlotRef};

/// One atomic before/after change to one slot.
///
/// The before/after pair is immutable once captured. Only two things move:
/// the `valid` flag (the unit of rollback granularity) and the `custom`
/// override a listener may substitute for the final value. The `restored`
/// marker makes restoration idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    target: SlotRef,
    original: ItemSnapshot,
    replacement: ItemSnapshot,
    valid: bool,
    custom: Option<ItemSnapshot>,
    restored: bool,
    sequence: u64,
}

impl MutationRecord {
    /// Creates a valid record.
    #[must_use]
    pub const fn new(target: SlotRef, original: ItemSnapshot, replacement: ItemSnapshot) -> Self {
        Self {
            target,
            original,
            replacement,
            valid: true,
            custom: None,
            restored: false,
            sequence: 0,
        }
    }

    pub(crate) const fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Capture order of the record within its batch (starts at 1; zero for
    /// records that were never captured by a batch).
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Slot this record changes.
    #[must_use]
    pub const fn target(&self) -> SlotRef {
        self.target
    }

    /// Slot value before the change.
    #[must_use]
    pub const fn original(&self) -> ItemSnapshot {
        self.original
    }

    /// Slot value after the change.
    #[must_use]
    pub const fn replacement(&self) -> ItemSnapshot {
        self.replacement
    }

    /// Whether the change still stands.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// Listener-substituted final value, if any.
    #[must_use]
    pub const fn custom(&self) -> Option<ItemSnapshot> {
        self.custom
    }

    /// Value the slot ends up with when the record is accepted.
    #[must_use]
    pub fn final_value(&self) -> ItemSnapshot {
        self.custom.unwrap_or(self.replacement)
    }

    /// `true` when the record does not change the slot.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.original == self.replacement
    }

    /// `true` once the inverse has been applied to the backing store.
    #[must_use]
    pub const fn is_restored(&self) -> bool {
        self.restored
    }

    /// Marks the record as rejected. Returns `true` if it was valid before.
    pub fn invalidate(&mut self) -> bool {
        std::mem::replace(&mut self.valid, false)
    }

    /// Substitutes the final value of the slot.
    pub fn set_custom(&mut self, value: ItemSnapshot) {
        self.custom = Some(value);
    }

    pub(crate) fn mark_restored(&mut self) {
        self.restored = true;
    }

    /// Extends the record with a later change to the same slot.
    pub(crate) fn merge_later(&mut self, later: &Self) {
        debug_assert_eq!(self.target, later.target);
        self.replacement = later.replacement;
    }
}

/// What kind of entity an intent spawns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A dropped item stack.
    ItemDrop,
    /// An experience orb (e.g. from taking a smelting result).
    Experience,
    /// Any other host entity type, by name.
    Other(String),
}

/// Deferred "spawn this entity" request produced by an inventory action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityIntent {
    /// Entity type.
    pub kind: EntityKind,
    /// Spawn position.
    pub at: BlockPos,
    /// Carried stack for item drops.
    pub item: Option<ItemSnapshot>,
}

impl EntityIntent {
    /// Intent to drop `item` as an item entity at `at`.
    #[must_use]
    pub const fn item_drop(item: ItemSnapshot, at: BlockPos) -> Self {
        Self {
            kind: EntityKind::ItemDrop,
            at,
            item: Some(item),
        }
    }
}

/// An intent that was spawned through the backing store during capture.
///
/// The entity stays owned by the event pipeline until its event resolves;
/// if its event component ends up invalid it is despawned exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnedEntity {
    intent: EntityIntent,
    handle: EntityHandle,
    valid: bool,
    despawned: bool,
    sequence: u64,
}

impl SpawnedEntity {
    pub(crate) const fn new(intent: EntityIntent, handle: EntityHandle, sequence: u64) -> Self {
        Self {
            intent,
            handle,
            valid: true,
            despawned: false,
            sequence,
        }
    }

    /// Capture order of the spawn within its batch.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The original spawn request.
    #[must_use]
    pub const fn intent(&self) -> &EntityIntent {
        &self.intent
    }

    /// Handle issued by the backing store.
    #[must_use]
    pub const fn handle(&self) -> EntityHandle {
        self.handle
    }

    /// Whether the entity survives resolution.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// `true` once the entity has been despawned by restoration.
    #[must_use]
    pub const fn is_despawned(&self) -> bool {
        self.despawned
    }

    /// Marks the entity as rejected. Returns `true` if it was valid before.
    pub fn invalidate(&mut self) -> bool {
        std::mem::replace(&mut self.valid, false)
    }

    pub(crate) fn mark_despawned(&mut self) {
        self.despawned = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{make_container_id, make_item_id};

    #[test]
    fn invalidate_reports_first_flip_only() {
        let slot = SlotRef::index(make_container_id("c"), 0);
        let mut record = MutationRecord::new(
            slot,
            ItemSnapshot::Empty,
            ItemSnapshot::stack(make_item_id("stone"), 1),
        );
        assert!(record.invalidate());
        assert!(!record.invalidate());
        assert!(!record.is_valid());
    }

    #[test]
    fn custom_value_overrides_replacement() {
        let stone = make_item_id("stone");
        let slot = SlotRef::index(make_container_id("c"), 0);
        let mut record =
            MutationRecord::new(slot, ItemSnapshot::Empty, ItemSnapshot::stack(stone, 8));
        assert_eq!(record.final_value(), ItemSnapshot::stack(stone, 8));
        record.set_custom(ItemSnapshot::stack(stone, 2));
        assert_eq!(record.final_value(), ItemSnapshot::stack(stone, 2));
        assert_eq!(record.replacement(), ItemSnapshot::stack(stone, 8));
    }
}
