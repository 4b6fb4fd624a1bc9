// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transaction batches and the absorption protocol.
//!
//! A batch is an arena of transactions recorded under one root cause plus a
//! stack of the ones still open. Incoming slot changes, spawns and nested
//! actions walk that stack from the most recently opened transaction down;
//! the first one that accepts wins and the walk stops. Anything nobody
//! accepts becomes a standalone transaction, so no mutation is ever dropped.

use thiserror::Error;
use tracing::trace;

use crate::cause::CauseEntry;
use crate::ident::{ContainerId, EntityHandle, PlayerId};
use crate::kind::{Attachment, TransactionKind};
use crate::record::{EntityIntent, MutationRecord, SpawnedEntity};
use crate::snapshot::{ItemSnapshot, SlotRef};
use crate::store::{BackingStore, StoreError};
use crate::synthesis::{self, SynthesizedEvent};
use crate::transaction::{Transaction, TxState};
use crate::tx::{BatchId, TxId};

/// Errors raised by batch bookkeeping.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BatchError {
    /// The id does not name a transaction of this batch.
    #[error("unknown transaction: {0}")]
    UnknownTransaction(TxId),
    /// The transaction belongs to another batch.
    #[error("transaction {tx} does not belong to batch {batch}")]
    ForeignBatch {
        /// Transaction named by the caller.
        tx: TxId,
        /// Batch the call was made against.
        batch: BatchId,
    },
    /// The transaction is not open.
    #[error("transaction {0} is not open")]
    NotOpen(TxId),
    /// Transactions close innermost first.
    #[error("transaction {tx} is not the innermost open transaction ({innermost} is)")]
    NotInnermost {
        /// Transaction named by the caller.
        tx: TxId,
        /// Innermost open transaction.
        innermost: TxId,
    },
    /// The batch cannot address more transactions.
    #[error("batch {0} is full")]
    Exhausted(BatchId),
}

/// Who ended up owning a captured slot change or spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution {
    /// An open transaction accepted it.
    Absorbed {
        /// Transaction whose hook accepted.
        by: TxId,
        /// Transaction that stores it (`by` or the root of its merge chain).
        owner: TxId,
    },
    /// Nobody accepted; a standalone transaction was opened for it.
    Standalone(TxId),
}

impl Attribution {
    /// Transaction holding the captured item.
    #[must_use]
    pub const fn owner(self) -> TxId {
        match self {
            Self::Absorbed { owner, .. } | Self::Standalone(owner) => owner,
        }
    }

    /// `true` for the fallback path.
    #[must_use]
    pub const fn is_standalone(self) -> bool {
        matches!(self, Self::Standalone(_))
    }
}

/// Ordered sibling transactions sharing one root cause.
#[derive(Debug, Clone)]
pub struct TransactionBatch {
    id: BatchId,
    root: CauseEntry,
    arena: Vec<Transaction>,
    open: Vec<TxId>,
    container: Option<ContainerId>,
    next_sequence: u64,
}

impl TransactionBatch {
    /// Empty batch recorded under `root`.
    #[must_use]
    pub const fn new(id: BatchId, root: CauseEntry) -> Self {
        Self {
            id,
            root,
            arena: Vec::new(),
            open: Vec::new(),
            container: None,
            next_sequence: 1,
        }
    }

    /// Batch id.
    #[must_use]
    pub const fn id(&self) -> BatchId {
        self.id
    }

    /// Root cause every event of this batch starts from.
    #[must_use]
    pub const fn root(&self) -> &CauseEntry {
        &self.root
    }

    /// Container identity: the container of the first container-bearing
    /// transaction opened in the batch.
    #[must_use]
    pub const fn container(&self) -> Option<ContainerId> {
        self.container
    }

    /// Every transaction, in creation order.
    #[must_use]
    pub fn transactions(&self) -> &[Transaction] {
        &self.arena
    }

    /// Number of transactions recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// `true` when nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Transaction `id`, if it belongs to this batch.
    #[must_use]
    pub fn get(&self, id: TxId) -> Option<&Transaction> {
        if id.batch() != self.id {
            return None;
        }
        self.arena.get(id.slot())
    }

    pub(crate) fn get_mut(&mut self, id: TxId) -> Option<&mut Transaction> {
        if id.batch() != self.id {
            return None;
        }
        self.arena.get_mut(id.slot())
    }

    /// Members of `ids`, mutably, in creation order.
    pub(crate) fn members_mut<'a>(
        &'a mut self,
        ids: &'a [TxId],
    ) -> impl Iterator<Item = &'a mut Transaction> + 'a {
        self.arena
            .iter_mut()
            .filter(move |tx| ids.contains(&tx.id()))
    }

    /// Coalesced record count and spawn count over the members `ids`.
    pub(crate) fn captured_counts(&self, ids: &[TxId]) -> (usize, usize) {
        let members: Vec<&Transaction> = self
            .arena
            .iter()
            .filter(|tx| ids.contains(&tx.id()))
            .collect();
        let mut raw: Vec<&MutationRecord> = members
            .iter()
            .copied()
            .flat_map(Transaction::mutations)
            .collect();
        raw.sort_by_key(|r| r.sequence());
        let records = synthesis::coalesce(raw).len();
        let entities = members.iter().map(|tx| tx.spawns().len()).sum();
        (records, entities)
    }

    /// Open transactions, innermost first.
    pub fn open_transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.open.iter().rev().filter_map(|id| self.get(*id))
    }

    /// Innermost open transaction.
    #[must_use]
    pub fn innermost(&self) -> Option<TxId> {
        self.open.last().copied()
    }

    /// `true` when `container` differs from the batch's container identity.
    /// A batch without an identity yet is foreign to nothing.
    #[must_use]
    pub fn is_foreign(&self, container: ContainerId) -> bool {
        self.container.is_some_and(|own| own != container)
    }

    /// `true` when some open transaction would accept a change to `target`.
    #[must_use]
    pub fn would_absorb_slot(&self, target: SlotRef) -> bool {
        self.open_transactions()
            .any(|tx| tx.absorb_slot_change(target))
    }

    /// `true` when some open transaction would fold in an action of `kind`.
    #[must_use]
    pub fn would_absorb_sub_action(&self, kind: &TransactionKind) -> bool {
        self.open_transactions()
            .any(|tx| tx.absorb_sub_action(kind).is_some())
    }

    /// Transaction that stores items accepted by `id`: `id` itself, or the
    /// top of the chain of merged parents above it.
    #[must_use]
    pub fn owner_of(&self, id: TxId) -> TxId {
        let mut owner = id;
        while let Some(tx) = self.get(owner) {
            match (tx.parent(), tx.attachment()) {
                (Some(parent), Some(Attachment::Merged)) => owner = parent,
                _ => break,
            }
        }
        owner
    }

    fn push(&mut self, kind: TransactionKind) -> Result<TxId, BatchError> {
        let index = u32::try_from(self.arena.len()).map_err(|_| BatchError::Exhausted(self.id))?;
        let id = TxId::new(self.id, index);
        if self.container.is_none() {
            self.container = kind.container();
        }
        let opened_under = self.innermost();
        self.arena.push(Transaction::new(id, kind, opened_under));
        Ok(id)
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Opens a transaction for `kind` and pushes it onto the open stack.
    ///
    /// The open stack is offered the new action first; if a transaction
    /// accepts it, the new one is attached to it. A merged crafting preview or
    /// craft result is also recorded on the owner so its event can report it.
    pub fn open(&mut self, kind: TransactionKind) -> Result<TxId, BatchError> {
        let accepted = self
            .open_transactions()
            .find_map(|tx| tx.absorb_sub_action(&kind).map(|a| (tx.id(), a)));
        let folded = match (&kind, accepted) {
            (TransactionKind::CraftPreview { recipe, .. }, Some((by, Attachment::Merged))) => {
                Some((by, Some(*recipe), None))
            }
            (TransactionKind::CraftResult { recipe, .. }, Some((by, Attachment::Merged))) => {
                Some((by, None, Some(*recipe)))
            }
            _ => None,
        };
        let id = self.push(kind)?;
        if let Some((parent, attachment)) = accepted {
            if let Some(tx) = self.get_mut(id) {
                tx.attach_to(parent, attachment);
            }
        }
        if let Some((by, preview, crafted)) = folded {
            let owner = self.owner_of(by);
            if let Some(tx) = self.get_mut(owner) {
                if let Some(recipe) = preview {
                    tx.accept_crafting_preview(recipe);
                }
                if let Some(recipe) = crafted {
                    tx.accept_craft_result(recipe);
                }
            }
        }
        self.open.push(id);
        trace!(batch = %self.id, tx = %id, parent = ?accepted, "transaction opened");
        Ok(id)
    }

    /// Closes `id`, which must be the innermost open transaction.
    pub fn close(&mut self, id: TxId) -> Result<(), BatchError> {
        if id.batch() != self.id {
            return Err(BatchError::ForeignBatch {
                tx: id,
                batch: self.id,
            });
        }
        let tx = self.get(id).ok_or(BatchError::UnknownTransaction(id))?;
        if !tx.is_open() {
            return Err(BatchError::NotOpen(id));
        }
        match self.innermost() {
            Some(innermost) if innermost == id => {}
            Some(innermost) => return Err(BatchError::NotInnermost { tx: id, innermost }),
            None => return Err(BatchError::NotOpen(id)),
        }
        self.open.pop();
        if let Some(tx) = self.get_mut(id) {
            tx.close();
        }
        trace!(batch = %self.id, tx = %id, "transaction closed");
        Ok(())
    }

    /// Closes every open transaction, innermost first. Returns how many
    /// were closed.
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        while let Some(id) = self.open.pop() {
            if let Some(tx) = self.get_mut(id) {
                tx.close();
            }
            closed += 1;
        }
        closed
    }

    /// Opens and immediately closes a standalone transaction.
    fn standalone(&mut self, kind: TransactionKind) -> Result<TxId, BatchError> {
        let id = self.push(kind)?;
        if let Some(tx) = self.get_mut(id) {
            tx.close();
        }
        Ok(id)
    }

    fn attribute(&self, accepted: Option<TxId>) -> Option<Attribution> {
        accepted.map(|by| Attribution::Absorbed {
            by,
            owner: self.owner_of(by),
        })
    }

    /// Applies `original → replacement` at `target` through `store` and
    /// captures the record.
    ///
    /// A failed apply leaves nothing captured. Otherwise the record goes to
    /// the owner of the first open transaction (innermost first) that accepts
    /// the slot, or to a new standalone slot-change transaction.
    pub fn record_slot_change<S: BackingStore + ?Sized>(
        &mut self,
        store: &mut S,
        target: SlotRef,
        original: ItemSnapshot,
        replacement: ItemSnapshot,
    ) -> Result<Attribution, RecordError> {
        let record =
            MutationRecord::new(target, original, replacement).with_sequence(self.next_sequence);
        store.apply_mutation(&record)?;
        self.take_sequence();
        let accepted = self
            .open_transactions()
            .find(|tx| tx.absorb_slot_change(target))
            .map(Transaction::id);
        let attribution = match self.attribute(accepted) {
            Some(attribution) => attribution,
            None => Attribution::Standalone(self.standalone(TransactionKind::SlotChange {
                container: target.container,
            })?),
        };
        if let Some(owner) = self.get_mut(attribution.owner()) {
            owner.push_mutation(record);
        }
        trace!(batch = %self.id, %target, owner = %attribution.owner(), "slot change captured");
        Ok(attribution)
    }

    /// Spawns `intent` through `store` and captures the entity.
    pub fn record_spawn<S: BackingStore + ?Sized>(
        &mut self,
        store: &mut S,
        intent: EntityIntent,
    ) -> Result<(EntityHandle, Attribution), RecordError> {
        let handle = store.spawn(&intent)?;
        let sequence = self.take_sequence();
        let accepted = self
            .open_transactions()
            .find(|tx| tx.absorb_spawn())
            .map(Transaction::id);
        let attribution = match self.attribute(accepted) {
            Some(attribution) => attribution,
            None => Attribution::Standalone(self.standalone(TransactionKind::SpawnEntity)?),
        };
        if let Some(owner) = self.get_mut(attribution.owner()) {
            owner.push_spawn(SpawnedEntity::new(intent, handle, sequence));
        }
        trace!(batch = %self.id, entity = handle.0, owner = %attribution.owner(), "spawn captured");
        Ok((handle, attribution))
    }

    /// Selects hotbar slot `next` through `store` and records a closed
    /// held-item transaction remembering `previous`.
    pub fn record_held_item_change<S: BackingStore + ?Sized>(
        &mut self,
        store: &mut S,
        player: PlayerId,
        container: ContainerId,
        previous: u8,
        next: u8,
    ) -> Result<TxId, RecordError> {
        store.select_hotbar(player, next)?;
        let id = self.standalone(TransactionKind::SetHeldItem {
            player,
            container,
            previous,
            next,
        })?;
        trace!(batch = %self.id, tx = %id, previous, next, "held item changed");
        Ok(id)
    }

    /// Closes anything still open and synthesizes one entry per container
    /// partition. Transactions consumed by an earlier call are skipped, so a
    /// second call yields nothing.
    pub fn synthesize(&mut self) -> Vec<SynthesizedEvent> {
        self.close_all();
        synthesis::synthesize(&mut self.arena, &self.root)
    }

    /// `true` when no transaction still waits for a verdict.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.arena.iter().all(|tx| {
            matches!(
                tx.state(),
                TxState::Accepted | TxState::Restored | TxState::Cancelled | TxState::PartiallyCancelled
            ) || tx.parent().is_some()
        })
    }

    /// Multi-line human-readable report of the batch, for post-mortem debugging.
    #[must_use]
    pub fn describe(&self) -> String {
        use core::fmt::Write as _;
        let mut out = String::new();
        let _ = write!(out, "batch {} root={:?}", self.id, self.root);
        if let Some(container) = self.container {
            let _ = write!(out, " container={container}");
        }
        let _ = write!(out, " open={}", self.open.len());
        for tx in &self.arena {
            let _ = write!(out, "\n  {tx}");
        }
        out
    }
}

/// Failure while capturing a change.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The backing store refused the change; nothing was captured.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Batch bookkeeping failed after the change was applied.
    #[error(transparent)]
    Batch(#[from] BatchError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{make_container_id, make_item_id, make_recipe_id};
    use crate::kind::ClickType;
    use crate::snapshot::BlockPos;

    #[derive(Default)]
    struct Accepting {
        applied: usize,
        spawned: u64,
    }

    impl BackingStore for Accepting {
        fn apply_mutation(&mut self, _: &MutationRecord) -> Result<(), StoreError> {
            self.applied += 1;
            Ok(())
        }
        fn apply_inverse(&mut self, _: &MutationRecord) -> Result<(), StoreError> {
            Ok(())
        }
        fn spawn(&mut self, _: &EntityIntent) -> Result<EntityHandle, StoreError> {
            self.spawned += 1;
            Ok(EntityHandle(self.spawned))
        }
        fn despawn(&mut self, _: EntityHandle) -> Result<(), StoreError> {
            Ok(())
        }
        fn select_hotbar(&mut self, _: PlayerId, _: u8) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn batch() -> TransactionBatch {
        TransactionBatch::new(BatchId::from_raw(1), CauseEntry::Player(PlayerId(1)))
    }

    fn click(container: ContainerId) -> TransactionKind {
        TransactionKind::ClickContainer {
            container,
            button: 0,
            click: ClickType::Pickup,
        }
    }

    #[test]
    fn innermost_acceptor_wins() -> Result<(), RecordError> {
        let grid = make_container_id("grid");
        let stone = make_item_id("stone");
        let mut b = batch();
        let mut store = Accepting::default();
        let outer = b.open(click(grid))?;
        let inner = b.open(TransactionKind::CraftResult {
            container: grid,
            recipe: make_recipe_id("planks"),
        })?;
        let attribution = b.record_slot_change(
            &mut store,
            SlotRef::index(grid, 1),
            ItemSnapshot::stack(stone, 1),
            ItemSnapshot::Empty,
        )?;
        assert_eq!(
            attribution,
            Attribution::Absorbed {
                by: inner,
                owner: outer
            }
        );
        assert_eq!(b.get(outer).map(|t| t.mutations().len()), Some(1));
        assert_eq!(b.get(inner).map(|t| t.mutations().len()), Some(0));
        assert_eq!(b.get(outer).and_then(Transaction::crafted), Some(make_recipe_id("planks")));
        Ok(())
    }

    #[test]
    fn captured_counts_use_coalesced_records() -> Result<(), RecordError> {
        let chest = make_container_id("chest");
        let stone = make_item_id("stone");
        let mut b = batch();
        let mut store = Accepting::default();
        let tx = b.open(click(chest))?;
        let slot = SlotRef::index(chest, 0);
        b.record_slot_change(&mut store, slot, ItemSnapshot::Empty, ItemSnapshot::stack(stone, 2))?;
        b.record_slot_change(
            &mut store,
            slot,
            ItemSnapshot::stack(stone, 2),
            ItemSnapshot::stack(stone, 5),
        )?;
        let drop = EntityIntent::item_drop(ItemSnapshot::stack(stone, 1), BlockPos::new(0, 0, 0));
        b.record_spawn(&mut store, drop)?;
        assert_eq!(b.get(tx).map(|t| t.mutations().len()), Some(2));
        assert_eq!(b.captured_counts(&[tx]), (1, 1));
        Ok(())
    }

    #[test]
    fn nobody_accepting_opens_standalone() -> Result<(), RecordError> {
        let chest = make_container_id("chest");
        let mut b = batch();
        let mut store = Accepting::default();
        let attribution = b.record_slot_change(
            &mut store,
            SlotRef::index(chest, 0),
            ItemSnapshot::Empty,
            ItemSnapshot::stack(make_item_id("stone"), 3),
        )?;
        assert!(attribution.is_standalone());
        let tx = b.get(attribution.owner());
        assert_eq!(tx.map(Transaction::state), Some(TxState::Closed));
        assert_eq!(b.container(), Some(chest));
        assert_eq!(store.applied, 1);
        Ok(())
    }

    #[test]
    fn close_enforces_nesting() -> Result<(), BatchError> {
        let grid = make_container_id("grid");
        let mut b = batch();
        let outer = b.open(click(grid))?;
        let inner = b.open(TransactionKind::DropFromInventory { container: grid })?;
        assert_eq!(
            b.close(outer),
            Err(BatchError::NotInnermost {
                tx: outer,
                innermost: inner
            })
        );
        b.close(inner)?;
        b.close(outer)?;
        assert_eq!(b.close(outer), Err(BatchError::NotOpen(outer)));
        let stranger = TxId::new(BatchId::from_raw(9), 0);
        assert!(matches!(
            b.close(stranger),
            Err(BatchError::ForeignBatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn spawns_go_to_accepting_transaction() -> Result<(), RecordError> {
        let inv = make_container_id("inventory");
        let mut b = batch();
        let mut store = Accepting::default();
        let drop = b.open(TransactionKind::DropFromInventory { container: inv })?;
        let intent = EntityIntent::item_drop(
            ItemSnapshot::stack(make_item_id("stone"), 1),
            crate::snapshot::BlockPos::new(0, 64, 0),
        );
        let (handle, attribution) = b.record_spawn(&mut store, intent)?;
        assert_eq!(attribution.owner(), drop);
        assert_eq!(
            b.get(drop).map(|t| t.spawns()[0].handle()),
            Some(handle)
        );
        Ok(())
    }

    #[test]
    fn describe_lists_every_transaction() -> Result<(), BatchError> {
        let grid = make_container_id("grid");
        let mut b = batch();
        b.open(click(grid))?;
        b.open(TransactionKind::CraftPreview {
            container: grid,
            recipe: None,
        })?;
        let report = b.describe();
        assert!(report.contains("click-container"));
        assert!(report.contains("craft-preview"));
        assert!(report.contains("Merged into"));
        Ok(())
    }
}
