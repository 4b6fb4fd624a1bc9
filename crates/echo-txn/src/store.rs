// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Backing store port: the only way the engine touches game state.

use thiserror::Error;

use crate::ident::{EntityHandle, PlayerId};
use crate::record::{EntityIntent, MutationRecord};
use crate::snapshot::{ItemSnapshot, SlotRef};

/// Errors reported by a [`BackingStore`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The slot does not exist in the store.
    #[error("unknown slot: {0}")]
    UnknownSlot(SlotRef),
    /// The slot did not hold the value the record expected.
    #[error("snapshot mismatch at {target}: expected {expected}, found {found}")]
    SnapshotMismatch {
        /// Slot that was checked.
        target: SlotRef,
        /// Value the record expected.
        expected: ItemSnapshot,
        /// Value actually stored.
        found: ItemSnapshot,
    },
    /// The entity handle is not (or no longer) live.
    #[error("unknown entity: {0:?}")]
    UnknownEntity(EntityHandle),
    /// The store refused the operation for a host-specific reason.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Mutation primitives over game state.
///
/// Implementations own the concrete containers, slots and entities. The
/// engine captures what happens and decides what to undo; the store decides
/// how a change is physically applied. All calls happen on the simulation's
/// main work context and must not block.
pub trait BackingStore {
    /// Sets `record.target` to `record.replacement`.
    fn apply_mutation(&mut self, record: &MutationRecord) -> Result<(), StoreError>;

    /// Sets `record.target` back to `record.original`.
    fn apply_inverse(&mut self, record: &MutationRecord) -> Result<(), StoreError>;

    /// Spawns the entity described by `intent` and returns its handle.
    fn spawn(&mut self, intent: &EntityIntent) -> Result<EntityHandle, StoreError>;

    /// Removes a previously spawned entity.
    fn despawn(&mut self, handle: EntityHandle) -> Result<(), StoreError>;

    /// Selects hotbar slot `index` as `player`'s held item.
    fn select_hotbar(&mut self, player: PlayerId, index: u8) -> Result<(), StoreError>;
}

impl<S: BackingStore + ?Sized> BackingStore for &mut S {
    fn apply_mutation(&mut self, record: &MutationRecord) -> Result<(), StoreError> {
        (**self).apply_mutation(record)
    }

    fn apply_inverse(&mut self, record: &MutationRecord) -> Result<(), StoreError> {
        (**self).apply_inverse(record)
    }

    fn spawn(&mut self, intent: &EntityIntent) -> Result<EntityHandle, StoreError> {
        (**self).spawn(intent)
    }

    fn despawn(&mut self, handle: EntityHandle) -> Result<(), StoreError> {
        (**self).despawn(handle)
    }

    fn select_hotbar(&mut self, player: PlayerId, index: u8) -> Result<(), StoreError> {
        (**self).select_hotbar(player, index)
    }
}
