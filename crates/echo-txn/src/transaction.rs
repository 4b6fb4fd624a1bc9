// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transactions: one attempted action and everything it captured.
//!
//! A transaction lives in the arena of its [`crate::TransactionBatch`] and is
//! addressed by [`TxId`]. Parent links are ids into the same arena, never
//! references, so a batch can hand out `&mut` access to any member without
//! fighting the borrow checker.

use std::collections::BTreeSet;

use crate::cause::CauseContribution;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::event::{EventKind, PreviewState, TransactionEvent};
use crate::ident::{EntityHandle, RecipeId};
use crate::kind::{Attachment, TransactionKind};
use crate::record::{MutationRecord, SpawnedEntity};
use crate::snapshot::SlotRef;
use crate::store::{BackingStore, StoreError};
use crate::synthesis::SynthesisContext;
use crate::tx::TxId;

/// Lifecycle state of a transaction.
///
/// `Open → Absorbed | Closed`; `Closed → Accepted | Cancelled |
/// PartiallyCancelled`; `Cancelled | PartiallyCancelled → Restored`.
/// `Accepted` and `Restored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxState {
    /// On the open stack; may still accept mutations.
    Open,
    /// Closed after being folded into a parent transaction.
    Absorbed,
    /// Closed as the root of its own event component.
    Closed,
    /// Its event was accepted as a whole.
    Accepted,
    /// Its event was cancelled.
    Cancelled,
    /// Its event was accepted but some records or entities were rejected.
    PartiallyCancelled,
    /// Rejected changes have been reverted.
    Restored,
}

impl TxState {
    /// `true` for states no transition leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Restored)
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Absorbed => "absorbed",
            Self::Closed => "closed",
            Self::Accepted => "accepted",
            Self::Cancelled => "cancelled",
            Self::PartiallyCancelled => "partially-cancelled",
            Self::Restored => "restored",
        }
    }
}

/// Counters produced by restoration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Records whose inverse was applied.
    pub inverted: usize,
    /// Entities despawned.
    pub despawned: usize,
    /// Held-item selections put back.
    pub selections: usize,
    /// Store calls that failed (each one also produced a diagnostic).
    pub failures: usize,
}

impl RestoreReport {
    /// `true` when restoration touched nothing and nothing failed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.inverted == 0 && self.despawned == 0 && self.selections == 0 && self.failures == 0
    }
}

impl core::ops::AddAssign for RestoreReport {
    fn add_assign(&mut self, rhs: Self) {
        self.inverted += rhs.inverted;
        self.despawned += rhs.despawned;
        self.selections += rhs.selections;
        self.failures += rhs.failures;
    }
}

/// One attempted action plus the mutations and spawns it owns.
#[derive(Debug, Clone)]
pub struct Transaction {
    id: TxId,
    kind: TransactionKind,
    state: TxState,
    parent: Option<(TxId, Attachment)>,
    opened_under: Option<TxId>,
    mutations: Vec<MutationRecord>,
    spawns: Vec<SpawnedEntity>,
    used: bool,
    crafted: Option<RecipeId>,
    preview: Option<PreviewState>,
    selection_restored: bool,
}

impl Transaction {
    pub(crate) const fn new(id: TxId, kind: TransactionKind, opened_under: Option<TxId>) -> Self {
        Self {
            id,
            kind,
            state: TxState::Open,
            parent: None,
            opened_under,
            mutations: Vec::new(),
            spawns: Vec::new(),
            used: false,
            crafted: None,
            preview: None,
            selection_restored: false,
        }
    }

    /// Arena id.
    #[must_use]
    pub const fn id(&self) -> TxId {
        self.id
    }

    /// Wrapped action.
    #[must_use]
    pub const fn kind(&self) -> &TransactionKind {
        &self.kind
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> TxState {
        self.state
    }

    /// Transaction this one was absorbed into, if any.
    #[must_use]
    pub fn parent(&self) -> Option<TxId> {
        self.parent.map(|(id, _)| id)
    }

    /// How this transaction was absorbed, if it was.
    #[must_use]
    pub fn attachment(&self) -> Option<Attachment> {
        self.parent.map(|(_, a)| a)
    }

    /// Innermost transaction that was open when this one was opened.
    #[must_use]
    pub const fn opened_under(&self) -> Option<TxId> {
        self.opened_under
    }

    /// Records owned by this transaction, in capture order.
    #[must_use]
    pub fn mutations(&self) -> &[MutationRecord] {
        &self.mutations
    }

    /// Entities spawned on behalf of this transaction.
    #[must_use]
    pub fn spawns(&self) -> &[SpawnedEntity] {
        &self.spawns
    }

    /// Whether a synthesis pass already consumed this transaction.
    #[must_use]
    pub const fn is_used(&self) -> bool {
        self.used
    }

    /// Whether the transaction is still on the open stack.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == TxState::Open
    }

    /// Recipe of a craft result merged into this transaction.
    #[must_use]
    pub const fn crafted(&self) -> Option<RecipeId> {
        self.crafted
    }

    /// Crafting preview merged into this transaction.
    #[must_use]
    pub const fn preview(&self) -> Option<PreviewState> {
        self.preview
    }

    /// Whether this open transaction takes responsibility for a change to `target`.
    #[must_use]
    pub fn absorb_slot_change(&self, target: SlotRef) -> bool {
        self.is_open() && self.kind.accepts_slot(target)
    }

    /// Whether this open transaction takes responsibility for a spawn.
    #[must_use]
    pub fn absorb_spawn(&self) -> bool {
        self.is_open() && self.kind.accepts_spawn()
    }

    /// Whether (and how) this open transaction folds in a nested action of kind `child`.
    #[must_use]
    pub fn absorb_sub_action(&self, child: &TransactionKind) -> Option<Attachment> {
        if self.is_open() {
            self.kind.accepts_sub_action(child)
        } else {
            None
        }
    }

    /// Records the crafting preview of a merged sub-action.
    pub(crate) fn accept_crafting_preview(&mut self, recipe: Option<RecipeId>) {
        self.preview = Some(PreviewState { recipe });
    }

    /// Records the recipe of a merged craft result.
    pub(crate) fn accept_craft_result(&mut self, recipe: RecipeId) {
        self.crafted = Some(recipe);
    }

    pub(crate) fn attach_to(&mut self, parent: TxId, attachment: Attachment) {
        self.parent = Some((parent, attachment));
    }

    pub(crate) fn push_mutation(&mut self, record: MutationRecord) {
        self.mutations.push(record);
    }

    pub(crate) fn push_spawn(&mut self, spawn: SpawnedEntity) {
        self.spawns.push(spawn);
    }

    /// Leaves the open stack.
    pub(crate) fn close(&mut self) {
        self.state = if self.parent.is_some() {
            TxState::Absorbed
        } else {
            TxState::Closed
        };
    }

    pub(crate) fn mark_used(&mut self) {
        self.used = true;
    }

    /// Records the verdict on the event this closed root transaction fed.
    /// Absorbed and already settled transactions keep their state.
    pub(crate) fn settle(&mut self, state: TxState) {
        if self.state == TxState::Closed {
            self.state = state;
        }
    }

    /// Entries this transaction pushes onto the cause frame.
    #[must_use]
    pub fn cause_contribution(&self, parent: Option<&TransactionKind>) -> Option<CauseContribution> {
        self.kind.cause_contribution(parent)
    }

    /// Candidate event for this transaction, without records attached.
    ///
    /// Bookkeeping kinds return `None`. Whether the candidate wins its
    /// partition is decided by synthesis.
    #[must_use]
    pub fn generate_event(&self, ctx: &SynthesisContext) -> Option<TransactionEvent> {
        let kind = match &self.kind {
            TransactionKind::ClickContainer {
                container,
                button,
                click,
            } => EventKind::ClickContainer {
                container: *container,
                button: *button,
                click: *click,
                preview: self.preview,
                crafted: self.crafted,
            },
            TransactionKind::OpenContainer { container } => EventKind::OpenContainer {
                container: *container,
            },
            TransactionKind::CloseContainer { container } => EventKind::CloseContainer {
                container: *container,
            },
            TransactionKind::SetHeldItem {
                player,
                previous,
                next,
                ..
            } => EventKind::ChangeHeldItem {
                player: *player,
                previous: *previous,
                next: *next,
            },
            TransactionKind::DropFromInventory { container } => EventKind::DropItem {
                container: *container,
            },
            TransactionKind::CraftPreview { container, recipe } => EventKind::CraftPreview {
                container: *container,
                recipe: *recipe,
            },
            TransactionKind::CraftResult { container, recipe } => EventKind::CraftItem {
                container: *container,
                recipe: *recipe,
            },
            TransactionKind::SlotChange { container } => EventKind::ChangeInventory {
                container: *container,
            },
            TransactionKind::InteractBlockWithItem { .. } => return None,
            TransactionKind::SpawnEntity => EventKind::SpawnEntity,
            TransactionKind::Composite { container, action } => EventKind::Composite {
                container: *container,
                action: *action,
            },
        };
        Some(TransactionEvent::new(kind, self.id, ctx.cause().clone()))
    }

    /// Flips `valid = false` on owned records targeting `slots` and owned
    /// entities in `entities`. Returns `true` if anything flipped.
    pub(crate) fn invalidate_matching(
        &mut self,
        slots: &BTreeSet<SlotRef>,
        entities: &BTreeSet<EntityHandle>,
    ) -> bool {
        let mut flipped = false;
        for record in &mut self.mutations {
            if slots.contains(&record.target()) {
                flipped |= record.invalidate();
            }
        }
        for spawn in &mut self.spawns {
            if entities.contains(&spawn.handle()) {
                flipped |= spawn.invalidate();
            }
        }
        flipped
    }

    /// Capture sequence of every invalid record not yet reverted, with its index.
    pub(crate) fn pending_inversions(&self) -> impl Iterator<Item = (u64, usize)> + '_ {
        self.mutations
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_valid() && !r.is_restored())
            .map(|(i, r)| (r.sequence(), i))
    }

    /// Applies the inverse of record `index` once. `Ok(false)` when the record
    /// is valid or already reverted.
    pub(crate) fn invert_record<S: BackingStore + ?Sized>(
        &mut self,
        index: usize,
        store: &mut S,
    ) -> Result<bool, StoreError> {
        let Some(record) = self.mutations.get_mut(index) else {
            return Ok(false);
        };
        if record.is_valid() || record.is_restored() {
            return Ok(false);
        }
        store.apply_inverse(record)?;
        record.mark_restored();
        Ok(true)
    }

    /// Inverts record `index`, counting the outcome into `report`.
    pub(crate) fn invert_logged<S: BackingStore + ?Sized>(
        &mut self,
        index: usize,
        store: &mut S,
        diagnostics: &mut Diagnostics,
        report: &mut RestoreReport,
    ) {
        match self.invert_record(index, store) {
            Ok(true) => report.inverted += 1,
            Ok(false) => {}
            Err(error) => {
                report.failures += 1;
                diagnostics.push(Diagnostic::RestoreFailed {
                    tx: self.id,
                    target: self.mutations.get(index).map(MutationRecord::target),
                    entity: None,
                    error,
                });
            }
        }
    }

    /// Reverts what this transaction owns and its event rejected.
    ///
    /// Invalid records are inverted latest-first, invalid entities are
    /// despawned and, for a cancelled held-item change, the previous hotbar
    /// slot is selected again. Everything already reverted is skipped, so
    /// calling this twice is a no-op the second time. Store failures are
    /// reported to `diagnostics` and counted; restoration carries on with
    /// the remaining items.
    pub fn restore<S: BackingStore + ?Sized>(
        &mut self,
        store: &mut S,
        diagnostics: &mut Diagnostics,
    ) -> RestoreReport {
        let mut report = RestoreReport::default();
        let mut pending: Vec<(u64, usize)> = self.pending_inversions().collect();
        pending.sort_unstable_by(|a, b| b.cmp(a));
        for (_, index) in pending {
            self.invert_logged(index, store, diagnostics, &mut report);
        }
        self.restore_effects(store, diagnostics, &mut report);
        report
    }

    /// Despawns rejected entities and puts back a cancelled selection, then
    /// moves to `Restored` once nothing rejected is left standing.
    pub(crate) fn restore_effects<S: BackingStore + ?Sized>(
        &mut self,
        store: &mut S,
        diagnostics: &mut Diagnostics,
        report: &mut RestoreReport,
    ) {
        for spawn in self.spawns.iter_mut().rev() {
            if spawn.is_valid() || spawn.is_despawned() {
                continue;
            }
            match store.despawn(spawn.handle()) {
                Ok(()) => {
                    spawn.mark_despawned();
                    report.despawned += 1;
                }
                Err(error) => {
                    report.failures += 1;
                    diagnostics.push(Diagnostic::RestoreFailed {
                        tx: self.id,
                        target: None,
                        entity: Some(spawn.handle()),
                        error,
                    });
                }
            }
        }

        if let TransactionKind::SetHeldItem {
            player, previous, ..
        } = self.kind
        {
            if self.state == TxState::Cancelled && !self.selection_restored {
                match store.select_hotbar(player, previous) {
                    Ok(()) => {
                        self.selection_restored = true;
                        report.selections += 1;
                    }
                    Err(error) => {
                        report.failures += 1;
                        diagnostics.push(Diagnostic::RestoreFailed {
                            tx: self.id,
                            target: None,
                            entity: None,
                            error,
                        });
                    }
                }
            }
        }

        if matches!(self.state, TxState::Cancelled | TxState::PartiallyCancelled)
            && self.fully_reverted()
        {
            self.state = TxState::Restored;
        }
    }

    fn fully_reverted(&self) -> bool {
        let selection_done = !matches!(self.kind, TransactionKind::SetHeldItem { .. })
            || self.state != TxState::Cancelled
            || self.selection_restored;
        selection_done
            && self.pending_inversions().next().is_none()
            && self
                .spawns
                .iter()
                .all(|s| s.is_valid() || s.is_despawned())
    }
}

impl core::fmt::Display for Transaction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.id, self.kind.label())?;
        match &self.kind {
            TransactionKind::ClickContainer {
                container,
                button,
                click,
            } => write!(f, " {container} button={button} {click:?}")?,
            TransactionKind::SetHeldItem {
                player,
                previous,
                next,
                ..
            } => write!(f, " player={} {previous}->{next}", player.0)?,
            TransactionKind::CraftPreview {
                container,
                recipe: Some(recipe),
            } => write!(f, " {container} {recipe}")?,
            TransactionKind::CraftResult { container, recipe } => {
                write!(f, " {container} {recipe}")?;
            }
            TransactionKind::InteractBlockWithItem {
                block,
                used,
                inventory,
            } => write!(
                f,
                " at ({}, {}, {}) with {used} from {inventory}",
                block.x, block.y, block.z
            )?,
            TransactionKind::Composite { container, action } => {
                write!(f, " {container} {action:?}")?;
            }
            other => {
                if let Some(container) = other.container() {
                    write!(f, " {container}")?;
                }
            }
        }
        write!(f, " [{}", self.state.label())?;
        if self.used {
            f.write_str(", used")?;
        }
        f.write_str("]")?;
        if let Some((parent, attachment)) = self.parent {
            write!(f, " {attachment:?} into {parent}")?;
        }
        write!(
            f,
            " mutations={} spawns={}",
            self.mutations.len(),
            self.spawns.len()
        )?;
        for record in &self.mutations {
            write!(
                f,
                "\n    {}: {} -> {}",
                record.target(),
                record.original(),
                record.replacement()
            )?;
            if !record.is_valid() {
                f.write_str(" (rejected")?;
                if record.is_restored() {
                    f.write_str(", restored")?;
                }
                f.write_str(")")?;
            }
        }
        Ok(())
    }
}
