// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Event synthesis: from a closed batch to at most one event per container.
//!
//! The pass is deterministic. Transactions are visited in creation order,
//! records in capture order, and partitions are emitted in the order their
//! container first appears. Nothing here touches the backing store.

use rustc_hash::FxHashMap;

use crate::cause::{CauseEntry, CauseFrame};
use crate::event::TransactionEvent;
use crate::ident::ContainerId;
use crate::kind::{Attachment, TransactionKind};
use crate::record::{MutationRecord, SpawnedEntity};
use crate::snapshot::SlotRef;
use crate::transaction::Transaction;
use crate::tx::TxId;

/// Inputs a transaction sees when generating its candidate event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisContext {
    cause: CauseFrame,
}

impl SynthesisContext {
    /// Context carrying `cause` as the event's cause frame.
    #[must_use]
    pub const fn new(cause: CauseFrame) -> Self {
        Self { cause }
    }

    /// Cause frame the event will carry.
    #[must_use]
    pub const fn cause(&self) -> &CauseFrame {
        &self.cause
    }
}

/// Output of synthesis for one container partition.
#[derive(Debug, Clone)]
pub struct SynthesizedEvent {
    /// Partition container (`None` for container-neutral transactions).
    pub container: Option<ContainerId>,
    /// Winning event with coalesced records attached, if any transaction
    /// of the partition produced one.
    pub event: Option<TransactionEvent>,
    /// Every transaction of the partition, in creation order.
    pub members: Vec<TxId>,
    /// `true` when the partition applied records or spawns but produced no
    /// event to carry them.
    pub dangling: bool,
}

/// Coalesces records by target slot.
///
/// Input must be in capture order. For each slot the output keeps the first
/// `original` and the last `replacement`. A no-op record is skipped when it
/// is the first one seen for its slot; once a slot has an entry, later
/// records always extend it, so a change that nets out (A→B→A) is still
/// reported. Output order is first appearance.
#[must_use]
pub fn coalesce<'a, I>(records: I) -> Vec<MutationRecord>
where
    I: IntoIterator<Item = &'a MutationRecord>,
{
    let mut out: Vec<MutationRecord> = Vec::new();
    let mut index: FxHashMap<SlotRef, usize> = FxHashMap::default();
    for record in records {
        if let Some(&at) = index.get(&record.target()) {
            if let Some(entry) = out.get_mut(at) {
                entry.merge_later(record);
            }
        } else if !record.is_noop() {
            index.insert(record.target(), out.len());
            out.push(
                MutationRecord::new(record.target(), record.original(), record.replacement())
                    .with_sequence(record.sequence()),
            );
        }
    }
    out
}

/// Arena position of `id`, if it lives in `arena`.
fn position(arena: &[Transaction], id: TxId) -> Option<usize> {
    arena.get(id.slot()).filter(|tx| tx.id() == id).map(|_| id.slot())
}

/// Top of the absorption chain `index` belongs to.
fn event_root(arena: &[Transaction], mut index: usize) -> usize {
    while let Some(parent) = arena[index].parent().and_then(|p| position(arena, p)) {
        index = parent;
    }
    index
}

/// Cause frame for the event transaction `index` would generate.
///
/// Root entry, then the contribution of every transaction on the
/// `opened_under` chain (outermost first), then `index`'s own.
pub(crate) fn cause_frame(arena: &[Transaction], root: &CauseEntry, index: usize) -> CauseFrame {
    let mut chain = vec![index];
    let mut cursor = index;
    while let Some(up) = arena[cursor].opened_under().and_then(|p| position(arena, p)) {
        chain.push(up);
        cursor = up;
    }
    let mut frame = CauseFrame::rooted(root.clone());
    for &at in chain.iter().rev() {
        let tx = &arena[at];
        let parent_kind: Option<&TransactionKind> = tx
            .parent()
            .and_then(|p| position(arena, p))
            .map(|p| arena[p].kind());
        if let Some(contribution) = tx.cause_contribution(parent_kind) {
            frame.push(contribution);
        }
    }
    frame
}

fn collect_sorted<'a>(
    arena: &'a [Transaction],
    members: impl Iterator<Item = usize> + Clone,
) -> (Vec<&'a MutationRecord>, Vec<SpawnedEntity>) {
    let mut records: Vec<&MutationRecord> = members
        .clone()
        .flat_map(|i| arena[i].mutations().iter())
        .collect();
    records.sort_by_key(|r| r.sequence());
    let mut spawns: Vec<SpawnedEntity> = members
        .flat_map(|i| arena[i].spawns().iter().cloned())
        .collect();
    spawns.sort_by_key(SpawnedEntity::sequence);
    (records, spawns)
}

fn synthesize_partition(
    arena: &[Transaction],
    root: &CauseEntry,
    container: Option<ContainerId>,
    members: &[usize],
) -> SynthesizedEvent {
    let winner = members.iter().copied().find_map(|index| {
        if arena[index].parent().is_some() {
            return None;
        }
        let ctx = SynthesisContext::new(cause_frame(arena, root, index));
        arena[index].generate_event(&ctx).map(|event| (index, event))
    });

    let Some((winner, mut event)) = winner else {
        let (records, spawns) = collect_sorted(arena, members.iter().copied());
        return SynthesizedEvent {
            container,
            event: None,
            members: Vec::new(),
            dangling: !coalesce(records).is_empty() || !spawns.is_empty(),
        };
    };

    let winner_id = arena[winner].id();
    let children: Vec<usize> = if matches!(arena[winner].kind(), TransactionKind::Composite { .. }) {
        members
            .iter()
            .copied()
            .filter(|&i| {
                arena[i].parent() == Some(winner_id)
                    && arena[i].attachment() == Some(Attachment::Child)
            })
            .collect()
    } else {
        Vec::new()
    };
    for &child in &children {
        let ctx = SynthesisContext::new(cause_frame(arena, root, child));
        if let Some(mut child_event) = arena[child].generate_event(&ctx) {
            let (records, spawns) = collect_sorted(arena, std::iter::once(child));
            child_event.attach(coalesce(records), spawns);
            event.push_child(child_event);
        }
    }
    let own = members.iter().copied().filter(|i| !children.contains(i));
    let (records, spawns) = collect_sorted(arena, own);
    event.attach(coalesce(records), spawns);
    SynthesizedEvent {
        container,
        event: Some(event),
        members: Vec::new(),
        dangling: false,
    }
}

/// Runs synthesis over every unused transaction of `arena`.
///
/// Transactions are partitioned by the container of their absorption root.
/// In each partition the first root transaction (creation order) whose
/// `generate_event` yields an event wins; the partition's coalesced records
/// and spawns are attached to it. A composite winner gets one child event per
/// transaction attached to it as [`Attachment::Child`], each carrying that
/// child's own records. Every visited transaction is marked used.
pub(crate) fn synthesize(arena: &mut [Transaction], root: &CauseEntry) -> Vec<SynthesizedEvent> {
    let mut partitions: Vec<(Option<ContainerId>, Vec<usize>)> = Vec::new();
    let mut by_container: FxHashMap<Option<ContainerId>, usize> = FxHashMap::default();
    for index in 0..arena.len() {
        if arena[index].is_used() {
            continue;
        }
        let key = arena[event_root(arena, index)].kind().container();
        let slot = *by_container.entry(key).or_insert_with(|| {
            partitions.push((key, Vec::new()));
            partitions.len() - 1
        });
        partitions[slot].1.push(index);
    }

    let mut out = Vec::with_capacity(partitions.len());
    for (container, members) in partitions {
        let view: &[Transaction] = arena;
        let mut synthesized = synthesize_partition(view, root, container, &members);
        for &index in &members {
            arena[index].mark_used();
            synthesized.members.push(arena[index].id());
        }
        out.push(synthesized);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{make_container_id, make_item_id};
    use crate::snapshot::{ItemSnapshot, SlotRef};

    fn rec(slot: SlotRef, from: ItemSnapshot, to: ItemSnapshot) -> MutationRecord {
        MutationRecord::new(slot, from, to)
    }

    #[test]
    fn sequential_changes_to_one_slot_coalesce() {
        let stone = make_item_id("stone");
        let slot5 = SlotRef::index(make_container_id("chest"), 5);
        let raw = [
            rec(slot5, ItemSnapshot::Empty, ItemSnapshot::stack(stone, 10)),
            rec(
                slot5,
                ItemSnapshot::stack(stone, 10),
                ItemSnapshot::stack(stone, 5),
            ),
        ];
        let out = coalesce(&raw);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].original(), ItemSnapshot::Empty);
        assert_eq!(out[0].replacement(), ItemSnapshot::stack(stone, 5));
    }

    #[test]
    fn leading_noop_is_dropped_but_net_noop_is_kept() {
        let stone = make_item_id("stone");
        let chest = make_container_id("chest");
        let a = SlotRef::index(chest, 0);
        let b = SlotRef::index(chest, 1);
        let raw = [
            rec(a, ItemSnapshot::Empty, ItemSnapshot::Empty),
            rec(b, ItemSnapshot::Empty, ItemSnapshot::stack(stone, 1)),
            rec(b, ItemSnapshot::stack(stone, 1), ItemSnapshot::Empty),
        ];
        let out = coalesce(&raw);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target(), b);
        assert!(out[0].is_noop());
    }

    #[test]
    fn output_follows_first_appearance() {
        let stone = make_item_id("stone");
        let chest = make_container_id("chest");
        let a = SlotRef::index(chest, 7);
        let b = SlotRef::index(chest, 2);
        let raw = [
            rec(a, ItemSnapshot::Empty, ItemSnapshot::stack(stone, 1)),
            rec(b, ItemSnapshot::Empty, ItemSnapshot::stack(stone, 2)),
            rec(a, ItemSnapshot::stack(stone, 1), ItemSnapshot::stack(stone, 3)),
        ];
        let targets: Vec<SlotRef> = coalesce(&raw).iter().map(MutationRecord::target).collect();
        assert_eq!(targets, vec![a, b]);
    }
}
