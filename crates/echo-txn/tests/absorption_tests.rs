// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use echo_dry_tests::{
    chest, click, craft_preview, craft_result, drop_from, player_inventory, player_root,
    shift_craft, slot, stone, workbench, InMemoryBackingStore,
};
use echo_txn::{
    Attachment, Attribution, BatchError, BatchId, BlockPos, CauseEntry, EntityIntent, EventKind,
    ItemSnapshot, SlotRef, TransactionBatch, TransactionKind, TxState,
};

fn batch() -> TransactionBatch {
    TransactionBatch::new(BatchId::from_raw(1), player_root())
}

fn drop_intent() -> EntityIntent {
    EntityIntent::item_drop(stone(1), BlockPos::new(0, 64, 0))
}

#[test]
fn innermost_acceptor_wins_and_merged_records_go_to_the_owner() {
    let mut store = InMemoryBackingStore::new();
    let mut batch = batch();
    let outer = batch.open(click(chest())).expect("click");
    let inner = batch.open(drop_from(chest())).expect("drop");
    assert_eq!(
        batch.get(inner).and_then(|tx| tx.attachment()),
        Some(Attachment::Merged)
    );

    let attribution = batch
        .record_slot_change(&mut store, slot(chest(), 0), ItemSnapshot::Empty, stone(2))
        .expect("capture");
    assert_eq!(
        attribution,
        Attribution::Absorbed {
            by: inner,
            owner: outer
        }
    );
    assert_eq!(batch.get(outer).map(|tx| tx.mutations().len()), Some(1));
    assert_eq!(batch.get(inner).map(|tx| tx.mutations().len()), Some(0));
}

#[test]
fn unclaimed_change_opens_a_closed_standalone_transaction() {
    let mut store = InMemoryBackingStore::new();
    let mut batch = batch();
    let preview = batch
        .open(craft_preview(workbench(), None))
        .expect("preview");

    // The preview only claims the result slot.
    let attribution = batch
        .record_slot_change(&mut store, slot(workbench(), 1), ItemSnapshot::Empty, stone(1))
        .expect("capture");
    let Attribution::Standalone(id) = attribution else {
        panic!("expected a standalone transaction, got {attribution:?}");
    };
    let standalone = batch.get(id).expect("standalone exists");
    assert_eq!(
        standalone.kind(),
        &TransactionKind::SlotChange {
            container: workbench()
        }
    );
    assert_eq!(standalone.state(), TxState::Closed);
    assert_eq!(standalone.opened_under(), Some(preview));
    assert_eq!(standalone.mutations().len(), 1);
    assert_eq!(batch.innermost(), Some(preview));

    let claimed = batch
        .record_slot_change(
            &mut store,
            SlotRef::craft_result(workbench()),
            ItemSnapshot::Empty,
            stone(1),
        )
        .expect("capture");
    assert_eq!(claimed.owner(), preview);
}

#[test]
fn refused_change_is_not_captured() {
    let mut store = InMemoryBackingStore::new();
    store.refuse_slot(slot(chest(), 3));
    let mut batch = batch();
    batch.open(click(chest())).expect("click");
    let result =
        batch.record_slot_change(&mut store, slot(chest(), 3), ItemSnapshot::Empty, stone(1));
    assert!(result.is_err());
    assert!(batch.transactions().iter().all(|tx| tx.mutations().is_empty()));
    assert_eq!(batch.len(), 1);
}

#[test]
fn spawns_follow_the_open_stack() {
    let mut store = InMemoryBackingStore::new();
    let mut batch = batch();
    let (_, loose) = batch
        .record_spawn(&mut store, drop_intent())
        .expect("spawn");
    assert!(loose.is_standalone());
    assert_eq!(
        batch.get(loose.owner()).map(|tx| tx.kind().clone()),
        Some(TransactionKind::SpawnEntity)
    );

    let tx = batch.open(click(chest())).expect("click");
    let (handle, claimed) = batch
        .record_spawn(&mut store, drop_intent())
        .expect("spawn");
    assert_eq!(claimed.owner(), tx);
    assert!(store.is_live(handle));
    assert_eq!(
        batch
            .get(tx)
            .and_then(|t| t.spawns().first())
            .map(|s| s.handle()),
        Some(handle)
    );
}

#[test]
fn composite_children_keep_their_own_records() {
    let mut store = InMemoryBackingStore::new().with_slot(slot(workbench(), 0), stone(2));
    let mut batch = batch();
    let composite = batch.open(shift_craft(workbench())).expect("composite");
    let craft = batch
        .open(craft_result(workbench(), "slab"))
        .expect("craft");
    assert_eq!(
        batch.get(craft).and_then(|tx| tx.attachment()),
        Some(Attachment::Child)
    );
    let attribution = batch
        .record_slot_change(&mut store, slot(workbench(), 0), stone(2), stone(1))
        .expect("capture");
    assert_eq!(attribution.owner(), craft);
    batch.close(craft).expect("close craft");
    assert_eq!(
        batch.get(craft).map(|tx| tx.state()),
        Some(TxState::Absorbed)
    );
    batch.close(composite).expect("close composite");
    assert_eq!(
        batch.get(composite).map(|tx| tx.state()),
        Some(TxState::Closed)
    );
}

#[test]
fn merged_preview_and_craft_are_reported_on_the_click() {
    let mut store = InMemoryBackingStore::new();
    let mut batch = batch();
    let tx = batch.open(click(workbench())).expect("click");
    let craft = batch
        .open(craft_result(workbench(), "slab"))
        .expect("craft");
    let preview = batch
        .open(craft_preview(workbench(), Some("slab")))
        .expect("preview");
    // The preview is folded into the craft, whose owner is the click.
    assert_eq!(batch.get(preview).and_then(|t| t.parent()), Some(craft));
    assert_eq!(batch.owner_of(preview), tx);
    batch
        .record_slot_change(
            &mut store,
            SlotRef::craft_result(workbench()),
            ItemSnapshot::Empty,
            stone(1),
        )
        .expect("capture");

    let synthesized = batch.synthesize();
    assert_eq!(synthesized.len(), 1);
    let event = synthesized[0].event.as_ref().expect("event");
    let EventKind::ClickContainer {
        preview, crafted, ..
    } = event.kind()
    else {
        panic!("expected a click event, got {:?}", event.kind());
    };
    assert!(preview.is_some());
    assert_eq!(*crafted, Some(echo_txn::make_recipe_id("slab")));
    assert_eq!(event.records().len(), 1);
    assert_eq!(synthesized[0].members.len(), 3);
}

#[test]
fn close_enforces_the_open_stack() {
    let mut batch = batch();
    let outer = batch.open(click(chest())).expect("click");
    let inner = batch.open(drop_from(chest())).expect("drop");
    assert_eq!(
        batch.close(outer),
        Err(BatchError::NotInnermost {
            tx: outer,
            innermost: inner
        })
    );
    batch.close(inner).expect("close inner");
    assert_eq!(batch.close(inner), Err(BatchError::NotOpen(inner)));

    let mut other = TransactionBatch::new(BatchId::from_raw(2), player_root());
    assert!(matches!(
        other.close(outer),
        Err(BatchError::ForeignBatch { .. })
    ));
    assert_eq!(batch.close_all(), 1);
    assert!(batch.open_transactions().next().is_none());
}

#[test]
fn interaction_contributes_cause_to_the_changes_it_triggers() {
    let mut store = InMemoryBackingStore::new().with_slot(slot(player_inventory(), 0), stone(1));
    let mut batch = batch();
    let block = BlockPos::new(4, 70, -2);
    let interact = batch
        .open(TransactionKind::InteractBlockWithItem {
            block,
            used: stone(1),
            inventory: player_inventory(),
        })
        .expect("interact");
    let attribution = batch
        .record_slot_change(&mut store, slot(player_inventory(), 0), stone(1), ItemSnapshot::Empty)
        .expect("capture");
    assert!(attribution.is_standalone());
    batch.close(interact).expect("close");

    let synthesized = batch.synthesize();
    let event = synthesized
        .iter()
        .find_map(|s| s.event.as_ref())
        .expect("inventory event");
    assert!(matches!(event.kind(), EventKind::ChangeInventory { .. }));
    assert_eq!(event.cause().root(), Some(&player_root()));
    assert!(event.cause().contains(&CauseEntry::Block(block)));
    assert!(event.cause().contains(&CauseEntry::UsedItem(stone(1))));
    assert!(synthesized.iter().all(|s| !s.dangling));
}

#[test]
fn partitions_follow_container_identity_and_are_consumed_once() {
    let mut store = InMemoryBackingStore::new();
    let mut batch = batch();
    let tx = batch.open(click(chest())).expect("click");
    batch
        .record_slot_change(&mut store, slot(chest(), 0), ItemSnapshot::Empty, stone(1))
        .expect("capture");
    batch.close(tx).expect("close");
    batch
        .record_slot_change(&mut store, slot(workbench(), 0), ItemSnapshot::Empty, stone(1))
        .expect("capture");
    batch
        .record_slot_change(&mut store, slot(chest(), 1), ItemSnapshot::Empty, stone(1))
        .expect("capture");

    let synthesized = batch.synthesize();
    let containers: Vec<_> = synthesized.iter().map(|s| s.container).collect();
    assert_eq!(containers, vec![Some(chest()), Some(workbench())]);
    // The later chest change joins the click's event.
    let chest_event = synthesized[0].event.as_ref().expect("chest event");
    assert_eq!(chest_event.records().len(), 2);
    assert!(matches!(chest_event.kind(), EventKind::ClickContainer { .. }));
    assert!(batch.transactions().iter().all(|tx| tx.is_used()));
    assert!(batch.synthesize().is_empty());
}
