// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Restoration engine: turn a listener verdict into backing-store calls.
//!
//! A verdict is first folded into the event tree ([`apply_verdict`]), then
//! propagated to the raw records of every contributing transaction
//! ([`mark_cancelled_transactions`]), then the rejected records are inverted
//! and rejected entities despawned ([`restore_event`]). Records are inverted
//! in strictly descending capture order across all contributing
//! transactions, so interleaved changes to one slot unwind exactly.

use tracing::debug;

use crate::batch::TransactionBatch;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::event::{TransactionEvent, Verdict};
use crate::record::MutationRecord;
use crate::store::BackingStore;
use crate::synthesis::SynthesizedEvent;
use crate::transaction::{RestoreReport, Transaction, TxState};

/// How a verdict landed on an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerdictEffect {
    /// The event ended up cancelled.
    pub cancelled: bool,
    /// A cancellation was requested on a non-cancellable event and dropped.
    pub ignored_cancellation: bool,
    /// Records that flipped to invalid.
    pub invalidated: usize,
    /// Entities that flipped to invalid.
    pub rejected: usize,
    /// Overrides recorded as custom final values.
    pub overrides: usize,
}

/// Final outcome of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Everything stands.
    Accepted,
    /// The whole event was vetoed and reverted.
    Cancelled,
    /// The event stands except for the rejected records and entities.
    PartiallyCancelled,
}

impl Resolution {
    const fn state(self) -> TxState {
        match self {
            Self::Accepted => TxState::Accepted,
            Self::Cancelled => TxState::Cancelled,
            Self::PartiallyCancelled => TxState::PartiallyCancelled,
        }
    }
}

/// Folds `verdict` into `event`.
///
/// A cancellation cancels the event (cascading to cancellable children) and
/// invalidates every record and entity in the tree. A cancellation aimed at
/// a non-cancellable event is ignored and reported in the effect. On an
/// event that stands, listed slots and entities are invalidated anywhere in
/// the tree and overrides become custom final values on every record for
/// the slot that is still valid, children included.
pub fn apply_verdict(event: &mut TransactionEvent, verdict: &Verdict) -> VerdictEffect {
    let mut effect = VerdictEffect::default();
    if verdict.cancelled && !event.cancel() && !event.is_cancelled() {
        effect.ignored_cancellation = true;
    }
    if event.is_cancelled() {
        effect.cancelled = true;
        let slots_before = event.invalid_slots().len();
        let entities_before = event.rejected_entities().len();
        event.invalidate_all();
        effect.invalidated = event.invalid_slots().len().saturating_sub(slots_before);
        effect.rejected = event.rejected_entities().len().saturating_sub(entities_before);
        return effect;
    }
    for slot in &verdict.invalidated {
        if event.invalidate_slot(*slot) {
            effect.invalidated += 1;
        }
    }
    for handle in &verdict.rejected_entities {
        if event.reject_entity(*handle) {
            effect.rejected += 1;
        }
    }
    for (slot, value) in &verdict.per_record_overrides {
        if event.set_override(*slot, *value) {
            effect.overrides += 1;
        }
    }
    effect
}

/// Flips `valid = false` on the raw records and entities of `siblings` that
/// match what the event rejected. Returns `true` if anything flipped, which
/// tells the caller restoration is needed.
pub fn mark_cancelled_transactions<'a, I>(event: &TransactionEvent, siblings: I) -> bool
where
    I: IntoIterator<Item = &'a mut Transaction>,
{
    let slots = event.invalid_slots();
    let entities = event.rejected_entities();
    if slots.is_empty() && entities.is_empty() {
        return false;
    }
    let mut flipped = false;
    for tx in siblings {
        flipped |= tx.invalidate_matching(&slots, &entities);
    }
    flipped
}

/// Reverts everything the members of `synthesized` captured and their event
/// rejected.
///
/// Rejected records are inverted in descending capture order across all
/// members. Then every member, latest-created first, despawns its rejected
/// entities and puts back a cancelled held-item selection. Anything already
/// reverted is skipped, so a second call changes nothing.
pub fn restore_event<S: BackingStore + ?Sized>(
    batch: &mut TransactionBatch,
    synthesized: &SynthesizedEvent,
    store: &mut S,
    diagnostics: &mut Diagnostics,
) -> RestoreReport {
    let mut report = RestoreReport::default();
    let mut members: Vec<&mut Transaction> = batch.members_mut(&synthesized.members).collect();

    let mut pending: Vec<(u64, usize, usize)> = members
        .iter()
        .enumerate()
        .flat_map(|(m, tx)| tx.pending_inversions().map(move |(seq, r)| (seq, m, r)))
        .collect();
    pending.sort_unstable_by(|a, b| b.cmp(a));
    for (_, member, record) in pending {
        if let Some(tx) = members.get_mut(member) {
            tx.invert_logged(record, store, diagnostics, &mut report);
        }
    }

    for tx in members.iter_mut().rev() {
        tx.restore_effects(store, diagnostics, &mut report);
    }
    debug!(
        inverted = report.inverted,
        despawned = report.despawned,
        selections = report.selections,
        failures = report.failures,
        "event restored"
    );
    report
}

/// Applies `verdict` to the event of `synthesized` and performs whatever
/// restoration it calls for.
///
/// Members are settled as accepted, cancelled or partially cancelled. An
/// ignored cancellation on a non-cancellable event is reported. Accepted
/// overrides are pushed to the store as a change from the synthesized
/// replacement to the custom value. A partition without an event is
/// accepted as-is.
pub fn resolve_event<S: BackingStore + ?Sized>(
    batch: &mut TransactionBatch,
    synthesized: &mut SynthesizedEvent,
    verdict: &Verdict,
    store: &mut S,
    diagnostics: &mut Diagnostics,
) -> (Resolution, RestoreReport) {
    let Some(event) = synthesized.event.as_mut() else {
        for tx in batch.members_mut(&synthesized.members) {
            tx.settle(TxState::Accepted);
        }
        return (Resolution::Accepted, RestoreReport::default());
    };

    let origin = event.origin();
    let effect = apply_verdict(event, verdict);
    if effect.ignored_cancellation {
        diagnostics.push(Diagnostic::IgnoredCancellation { origin });
    }
    let flipped = mark_cancelled_transactions(event, batch.members_mut(&synthesized.members));

    let resolution = if event.is_cancelled() {
        Resolution::Cancelled
    } else if event.has_invalid_parts() {
        Resolution::PartiallyCancelled
    } else {
        Resolution::Accepted
    };
    for tx in batch.members_mut(&synthesized.members) {
        tx.settle(resolution.state());
    }

    let mut report = RestoreReport::default();
    if flipped || resolution == Resolution::Cancelled {
        report = restore_event(batch, synthesized, store, diagnostics);
    }

    apply_overrides(batch, synthesized, store, diagnostics);
    debug!(%origin, ?resolution, "event resolved");
    (resolution, report)
}

/// Pushes accepted overrides to the store.
///
/// The step starts from the replacement of the latest raw record for the
/// slot across all members, which is what the store holds when a slot was
/// written by both a composite and one of its children.
fn apply_overrides<S: BackingStore + ?Sized>(
    batch: &TransactionBatch,
    synthesized: &SynthesizedEvent,
    store: &mut S,
    diagnostics: &mut Diagnostics,
) {
    let Some(event) = synthesized.event.as_ref() else {
        return;
    };
    if event.is_cancelled() {
        return;
    }
    for (target, custom) in event.overrides() {
        let live = synthesized
            .members
            .iter()
            .filter_map(|id| batch.get(*id))
            .flat_map(Transaction::mutations)
            .filter(|r| r.target() == target)
            .max_by_key(|r| r.sequence())
            .map(MutationRecord::replacement);
        let Some(live) = live else {
            continue;
        };
        if live == custom {
            continue;
        }
        let step = MutationRecord::new(target, live, custom);
        if let Err(error) = store.apply_mutation(&step) {
            diagnostics.push(Diagnostic::OverrideFailed { target, error });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::{CauseEntry, CauseFrame};
    use crate::event::EventKind;
    use crate::ident::{make_container_id, make_item_id};
    use crate::snapshot::{ItemSnapshot, SlotRef};
    use crate::tx::{BatchId, TxId};

    fn event_with(records: Vec<MutationRecord>) -> TransactionEvent {
        let grid = make_container_id("grid");
        let mut event = TransactionEvent::new(
            EventKind::ChangeInventory { container: grid },
            TxId::new(BatchId::from_raw(1), 0),
            CauseFrame::rooted(CauseEntry::Action("test")),
        );
        event.attach(records, Vec::new());
        event
    }

    #[test]
    fn cancellation_invalidates_everything() {
        let grid = make_container_id("grid");
        let stone = make_item_id("stone");
        let mut event = event_with(vec![
            MutationRecord::new(SlotRef::index(grid, 0), ItemSnapshot::Empty, ItemSnapshot::stack(stone, 1)),
            MutationRecord::new(SlotRef::index(grid, 1), ItemSnapshot::Empty, ItemSnapshot::stack(stone, 2)),
        ]);
        let effect = apply_verdict(&mut event, &Verdict::cancel());
        assert!(effect.cancelled);
        assert!(!effect.ignored_cancellation);
        assert_eq!(event.invalid_slots().len(), 2);
    }

    #[test]
    fn overrides_skip_rejected_records() {
        let grid = make_container_id("grid");
        let stone = make_item_id("stone");
        let a = SlotRef::index(grid, 0);
        let b = SlotRef::index(grid, 1);
        let mut event = event_with(vec![
            MutationRecord::new(a, ItemSnapshot::Empty, ItemSnapshot::stack(stone, 4)),
            MutationRecord::new(b, ItemSnapshot::Empty, ItemSnapshot::stack(stone, 4)),
        ]);
        let verdict = Verdict::accept()
            .invalidate(a)
            .override_slot(a, ItemSnapshot::stack(stone, 1))
            .override_slot(b, ItemSnapshot::stack(stone, 2));
        let effect = apply_verdict(&mut event, &verdict);
        assert_eq!(effect.invalidated, 1);
        assert_eq!(effect.overrides, 1);
        assert_eq!(event.record_for(a).and_then(MutationRecord::custom), None);
        assert_eq!(
            event.record_for(b).map(MutationRecord::final_value),
            Some(ItemSnapshot::stack(stone, 2))
        );
    }

    #[test]
    fn cancelling_a_close_is_ignored() {
        let grid = make_container_id("grid");
        let mut event = TransactionEvent::new(
            EventKind::CloseContainer { container: grid },
            TxId::new(BatchId::from_raw(1), 0),
            CauseFrame::default(),
        );
        let effect = apply_verdict(&mut event, &Verdict::cancel());
        assert!(effect.ignored_cancellation);
        assert!(!effect.cancelled);
    }
}
