// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Synthesized events, listener verdicts and the dispatch port.
//!
//! An event is the only externally visible surface of a batch: its kind,
//! its cause frame, the coalesced mutation records, the entities spawned as
//! secondary effects and (for composite actions) the child events.

use std::collections::{BTreeMap, BTreeSet};

use blake3::Hasher;
use thiserror::Error;

use crate::cause::CauseFrame;
use crate::ident::{ContainerId, EntityHandle, Hash, PlayerId, RecipeId};
use crate::kind::{ClickType, CompositeAction};
use crate::record::{MutationRecord, SpawnedEntity};
use crate::snapshot::{ItemSnapshot, SlotRef};
use crate::tx::TxId;

/// Crafting preview observed while a click was in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewState {
    /// Recipe matched by the grid, `None` when the grid matches nothing.
    pub recipe: Option<RecipeId>,
}

/// Plugin-visible event shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A click inside an open container.
    ClickContainer {
        /// Container clicked in.
        container: ContainerId,
        /// Mouse button / hotbar key.
        button: u8,
        /// Click mode.
        click: ClickType,
        /// Crafting preview folded into the click, if any.
        preview: Option<PreviewState>,
        /// Recipe crafted by the click, if the click took a craft result.
        crafted: Option<RecipeId>,
    },
    /// A container was opened.
    OpenContainer {
        /// Container opened.
        container: ContainerId,
    },
    /// A container was closed.
    CloseContainer {
        /// Container closed.
        container: ContainerId,
    },
    /// The selected hotbar slot changed.
    ChangeHeldItem {
        /// Player whose selection changed.
        player: PlayerId,
        /// Previously selected hotbar slot.
        previous: u8,
        /// Newly selected hotbar slot.
        next: u8,
    },
    /// Items were thrown out of an inventory.
    DropItem {
        /// Inventory dropped from.
        container: ContainerId,
    },
    /// The crafting output preview was updated.
    CraftPreview {
        /// Crafting container.
        container: ContainerId,
        /// Recipe matched by the grid.
        recipe: Option<RecipeId>,
    },
    /// An item was crafted.
    CraftItem {
        /// Crafting container.
        container: ContainerId,
        /// Recipe used.
        recipe: RecipeId,
    },
    /// Slots changed with no more specific action behind them.
    ChangeInventory {
        /// Container whose slots changed.
        container: ContainerId,
    },
    /// Entities spawned by an inventory action outside any container.
    SpawnEntity,
    /// An aggregate action whose children are events in their own right.
    Composite {
        /// Container the aggregate ran in.
        container: ContainerId,
        /// Aggregate action.
        action: CompositeAction,
    },
}

impl EventKind {
    /// Whether listeners may veto this event.
    #[must_use]
    pub const fn is_cancellable(&self) -> bool {
        !matches!(self, Self::CloseContainer { .. } | Self::CraftPreview { .. })
    }

    /// Container the event is about, if any.
    #[must_use]
    pub const fn container(&self) -> Option<ContainerId> {
        match self {
            Self::ClickContainer { container, .. }
            | Self::OpenContainer { container }
            | Self::CloseContainer { container }
            | Self::DropItem { container }
            | Self::CraftPreview { container, .. }
            | Self::CraftItem { container, .. }
            | Self::ChangeInventory { container }
            | Self::Composite { container, .. } => Some(*container),
            Self::ChangeHeldItem { .. } | Self::SpawnEntity => None,
        }
    }

    const fn tag(&self) -> u8 {
        match self {
            Self::ClickContainer { .. } => 1,
            Self::OpenContainer { .. } => 2,
            Self::CloseContainer { .. } => 3,
            Self::ChangeHeldItem { .. } => 4,
            Self::DropItem { .. } => 5,
            Self::CraftPreview { .. } => 6,
            Self::CraftItem { .. } => 7,
            Self::ChangeInventory { .. } => 8,
            Self::SpawnEntity => 9,
            Self::Composite { .. } => 10,
        }
    }
}

/// An event synthesized from one partition of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEvent {
    kind: EventKind,
    origin: TxId,
    cause: CauseFrame,
    records: Vec<MutationRecord>,
    secondary_effects: Vec<SpawnedEntity>,
    cancelled: bool,
    children: Vec<TransactionEvent>,
}

impl TransactionEvent {
    /// Fresh, uncancelled event with no records attached yet.
    pub(crate) fn new(kind: EventKind, origin: TxId, cause: CauseFrame) -> Self {
        Self {
            kind,
            origin,
            cause,
            records: Vec::new(),
            secondary_effects: Vec::new(),
            cancelled: false,
            children: Vec::new(),
        }
    }

    /// Event shape.
    #[must_use]
    pub const fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Transaction whose `generate_event` produced this event.
    #[must_use]
    pub const fn origin(&self) -> TxId {
        self.origin
    }

    /// Cause frame, root first.
    #[must_use]
    pub const fn cause(&self) -> &CauseFrame {
        &self.cause
    }

    /// Coalesced records, one per slot, in first-touch order.
    #[must_use]
    pub fn records(&self) -> &[MutationRecord] {
        &self.records
    }

    /// Coalesced record for `slot`, if the event touches it.
    #[must_use]
    pub fn record_for(&self, slot: SlotRef) -> Option<&MutationRecord> {
        self.records.iter().find(|r| r.target() == slot)
    }

    /// Entities spawned as a side effect of the action.
    #[must_use]
    pub fn secondary_effects(&self) -> &[SpawnedEntity] {
        &self.secondary_effects
    }

    /// Child events (composite actions only).
    #[must_use]
    pub fn children(&self) -> &[TransactionEvent] {
        &self.children
    }

    /// Whether the event has been vetoed.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Whether the event may be vetoed at all.
    #[must_use]
    pub const fn is_cancellable(&self) -> bool {
        self.kind.is_cancellable()
    }

    /// Cancels the event and every cancellable descendant.
    ///
    /// Cancellation is settable once; returns `false` when the event was
    /// already cancelled or does not support cancellation.
    pub fn cancel(&mut self) -> bool {
        if self.cancelled || !self.is_cancellable() {
            return false;
        }
        self.cancelled = true;
        self.cascade_to_children();
        true
    }

    /// Cancels regardless of cancellability. Used when dispatch failed and
    /// nothing may be left half-applied.
    pub(crate) fn force_cancel(&mut self) {
        self.cancelled = true;
        self.cascade_to_children();
    }

    fn cascade_to_children(&mut self) {
        for child in &mut self.children {
            if child.is_cancellable() && !child.cancelled {
                child.cancelled = true;
                child.cascade_to_children();
            }
        }
    }

    /// `true` when any record or entity in the tree has been rejected.
    #[must_use]
    pub fn has_invalid_parts(&self) -> bool {
        self.records.iter().any(|r| !r.is_valid())
            || self.secondary_effects.iter().any(|e| !e.is_valid())
            || self.children.iter().any(Self::has_invalid_parts)
    }

    /// Slots whose records have been rejected anywhere in the tree.
    #[must_use]
    pub fn invalid_slots(&self) -> BTreeSet<SlotRef> {
        let mut out = BTreeSet::new();
        self.collect_invalid(&mut out, &mut BTreeSet::new());
        out
    }

    /// Entities rejected anywhere in the tree.
    #[must_use]
    pub fn rejected_entities(&self) -> BTreeSet<EntityHandle> {
        let mut out = BTreeSet::new();
        self.collect_invalid(&mut BTreeSet::new(), &mut out);
        out
    }

    fn collect_invalid(&self, slots: &mut BTreeSet<SlotRef>, entities: &mut BTreeSet<EntityHandle>) {
        slots.extend(
            self.records
                .iter()
                .filter(|r| !r.is_valid())
                .map(MutationRecord::target),
        );
        entities.extend(
            self.secondary_effects
                .iter()
                .filter(|e| !e.is_valid())
                .map(SpawnedEntity::handle),
        );
        for child in &self.children {
            child.collect_invalid(slots, entities);
        }
    }

    /// Rejects the record for `slot` in this event and every descendant.
    /// Returns `true` if anything flipped.
    pub fn invalidate_slot(&mut self, slot: SlotRef) -> bool {
        let mut flipped = false;
        for record in self.records.iter_mut().filter(|r| r.target() == slot) {
            flipped |= record.invalidate();
        }
        for child in &mut self.children {
            flipped |= child.invalidate_slot(slot);
        }
        flipped
    }

    /// Rejects the entity `handle` in this event and every descendant.
    pub fn reject_entity(&mut self, handle: EntityHandle) -> bool {
        let mut flipped = false;
        for entity in self
            .secondary_effects
            .iter_mut()
            .filter(|e| e.handle() == handle)
        {
            flipped |= entity.invalidate();
        }
        for child in &mut self.children {
            flipped |= child.reject_entity(handle);
        }
        flipped
    }

    /// Rejects every record and entity reachable from this event.
    pub fn invalidate_all(&mut self) {
        for record in &mut self.records {
            record.invalidate();
        }
        for entity in &mut self.secondary_effects {
            entity.invalidate();
        }
        for child in &mut self.children {
            child.invalidate_all();
        }
    }

    /// Number of records in the tree, children included.
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.records.len() + self.children.iter().map(Self::total_records).sum::<usize>()
    }

    pub(crate) fn attach(&mut self, records: Vec<MutationRecord>, spawns: Vec<SpawnedEntity>) {
        self.records = records;
        self.secondary_effects = spawns;
    }

    pub(crate) fn push_child(&mut self, child: Self) {
        self.children.push(child);
    }

    /// Sets `value` as the custom final value of every valid record for
    /// `slot` in this event and every descendant. Returns `true` on a hit.
    pub fn set_override(&mut self, slot: SlotRef, value: ItemSnapshot) -> bool {
        let mut hit = false;
        for record in self
            .records
            .iter_mut()
            .filter(|r| r.target() == slot && r.is_valid())
        {
            record.set_custom(value);
            hit = true;
        }
        for child in &mut self.children {
            hit |= child.set_override(slot, value);
        }
        hit
    }

    /// Custom final values carried by valid records anywhere in the tree.
    #[must_use]
    pub fn overrides(&self) -> BTreeMap<SlotRef, ItemSnapshot> {
        let mut out = BTreeMap::new();
        self.collect_overrides(&mut out);
        out
    }

    fn collect_overrides(&self, out: &mut BTreeMap<SlotRef, ItemSnapshot>) {
        for record in self.records.iter().filter(|r| r.is_valid()) {
            if let Some(custom) = record.custom() {
                out.entry(record.target()).or_insert(custom);
            }
        }
        for child in &self.children {
            child.collect_overrides(out);
        }
    }

    /// Canonical digest of the synthesized content.
    ///
    /// Covers the kind tag, the coalesced records in order, the spawned
    /// entity handles and the child digests. Cancellation, validity and
    /// listener overrides are not included so the digest identifies what was
    /// synthesized, not how it was judged. The cause frame is not included
    /// either.
    #[must_use]
    pub fn digest(&self) -> Hash {
        let mut hasher = Hasher::new();
        // Event digest format version tag.
        hasher.update(&1u16.to_le_bytes());
        hasher.update(&[self.kind.tag()]);
        if let Some(container) = self.kind.container() {
            hasher.update(container.as_bytes());
        }
        hasher.update(&(self.records.len() as u64).to_le_bytes());
        for record in &self.records {
            record.target().hash_into(&mut hasher);
            record.original().hash_into(&mut hasher);
            record.replacement().hash_into(&mut hasher);
        }
        hasher.update(&(self.secondary_effects.len() as u64).to_le_bytes());
        for entity in &self.secondary_effects {
            hasher.update(&entity.handle().0.to_le_bytes());
        }
        hasher.update(&(self.children.len() as u64).to_le_bytes());
        for child in &self.children {
            hasher.update(&child.digest());
        }
        hasher.finalize().into()
    }
}

/// Final listener decision on one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    /// Veto the whole event.
    pub cancelled: bool,
    /// Substitute final values for individual slots of an accepted event.
    pub per_record_overrides: BTreeMap<SlotRef, ItemSnapshot>,
    /// Slots whose change is rejected while the rest of the event proceeds.
    pub invalidated: BTreeSet<SlotRef>,
    /// Spawned entities rejected while the rest of the event proceeds.
    pub rejected_entities: BTreeSet<EntityHandle>,
}

impl Verdict {
    /// Accept everything as synthesized.
    #[must_use]
    pub fn accept() -> Self {
        Self::default()
    }

    /// Veto the whole event.
    #[must_use]
    pub fn cancel() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }

    /// Rejects the change to `slot`.
    #[must_use]
    pub fn invalidate(mut self, slot: SlotRef) -> Self {
        self.invalidated.insert(slot);
        self
    }

    /// Replaces the final value of `slot`.
    #[must_use]
    pub fn override_slot(mut self, slot: SlotRef, value: ItemSnapshot) -> Self {
        self.per_record_overrides.insert(slot, value);
        self
    }

    /// Rejects the spawned entity `handle`.
    #[must_use]
    pub fn reject_entity(mut self, handle: EntityHandle) -> Self {
        self.rejected_entities.insert(handle);
        self
    }
}

/// Failure raised by listener dispatch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// A listener failed while handling the event.
    #[error("listener {listener} failed: {reason}")]
    ListenerFailed {
        /// Listener name.
        listener: String,
        /// Failure description.
        reason: String,
    },
    /// Dispatch did not reach a verdict.
    #[error("dispatch aborted: {0}")]
    Aborted(String),
}

/// Listener dispatch port.
pub trait EventDispatcher {
    /// Hands `event` to listeners and returns their combined verdict.
    fn dispatch(&mut self, event: &TransactionEvent) -> Result<Verdict, DispatchError>;
}

impl<F> EventDispatcher for F
where
    F: FnMut(&TransactionEvent) -> Result<Verdict, DispatchError>,
{
    fn dispatch(&mut self, event: &TransactionEvent) -> Result<Verdict, DispatchError> {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::CauseEntry;
    use crate::ident::{make_container_id, make_item_id};
    use crate::tx::BatchId;

    fn origin() -> TxId {
        TxId::new(BatchId::from_raw(1), 0)
    }

    fn event(kind: EventKind) -> TransactionEvent {
        TransactionEvent::new(kind, origin(), CauseFrame::rooted(CauseEntry::Action("test")))
    }

    #[test]
    fn cancel_is_settable_once_and_respects_cancellability() {
        let grid = make_container_id("grid");
        let mut open = event(EventKind::OpenContainer { container: grid });
        assert!(open.cancel());
        assert!(!open.cancel());
        assert!(open.is_cancelled());

        let mut close = event(EventKind::CloseContainer { container: grid });
        assert!(!close.cancel());
        assert!(!close.is_cancelled());
    }

    #[test]
    fn cancel_cascades_to_cancellable_children_only() {
        let grid = make_container_id("grid");
        let recipe = crate::ident::make_recipe_id("planks");
        let mut root = event(EventKind::Composite {
            container: grid,
            action: CompositeAction::ShiftCraft,
        });
        root.push_child(event(EventKind::CraftItem {
            container: grid,
            recipe,
        }));
        root.push_child(event(EventKind::CraftPreview {
            container: grid,
            recipe: Some(recipe),
        }));
        assert!(root.cancel());
        assert!(root.children()[0].is_cancelled());
        assert!(!root.children()[1].is_cancelled());
    }

    #[test]
    fn overrides_reach_child_records() {
        let grid = make_container_id("grid");
        let stone = make_item_id("stone");
        let slot = SlotRef::index(grid, 0);
        let mut child = event(EventKind::CraftItem {
            container: grid,
            recipe: crate::ident::make_recipe_id("slab"),
        });
        child.attach(
            vec![MutationRecord::new(
                slot,
                ItemSnapshot::stack(stone, 3),
                ItemSnapshot::stack(stone, 2),
            )],
            Vec::new(),
        );
        let mut root = event(EventKind::Composite {
            container: grid,
            action: CompositeAction::ShiftCraft,
        });
        root.push_child(child);

        assert!(root.set_override(slot, ItemSnapshot::stack(stone, 1)));
        assert!(!root.set_override(SlotRef::index(grid, 1), ItemSnapshot::Empty));
        assert_eq!(
            root.overrides().get(&slot).copied(),
            Some(ItemSnapshot::stack(stone, 1))
        );

        root.invalidate_slot(slot);
        assert!(root.overrides().is_empty());
    }

    #[test]
    fn digest_ignores_verdict_state() {
        let grid = make_container_id("grid");
        let slot = SlotRef::index(grid, 0);
        let mut a = event(EventKind::ChangeInventory { container: grid });
        a.attach(
            vec![MutationRecord::new(
                slot,
                ItemSnapshot::Empty,
                ItemSnapshot::stack(make_item_id("stone"), 4),
            )],
            Vec::new(),
        );
        let before = a.digest();
        a.cancel();
        a.invalidate_slot(slot);
        assert_eq!(before, a.digest());
    }

    #[test]
    fn closures_are_dispatchers() {
        let grid = make_container_id("grid");
        let mut seen = 0usize;
        let mut dispatcher = |_: &TransactionEvent| -> Result<Verdict, DispatchError> {
            seen += 1;
            Ok(Verdict::cancel())
        };
        let verdict = dispatcher
            .dispatch(&event(EventKind::OpenContainer { container: grid }))
            .unwrap_or_default();
        assert!(verdict.cancelled);
        assert_eq!(seen, 1);
    }
}
