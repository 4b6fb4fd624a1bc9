// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ids, stacks, transaction kinds and an engine builder for tests.

use echo_txn::{
    make_container_id, make_item_id, make_recipe_id, CauseEntry, ClickType, CompositeAction,
    ContainerId, ContextToken, ItemSnapshot, PlayerId, SlotRef, TransactionEngine,
    TransactionKind, TxnConfig,
};

use crate::dispatch::ScriptedDispatcher;
use crate::store::InMemoryBackingStore;

/// Player every fixture acts as.
pub const PLAYER: PlayerId = PlayerId(1);

/// Context token engines built by [`EngineTestBuilder`] expect.
pub const CTX: ContextToken = ContextToken(7);

/// Engine over the in-memory store and scripted dispatcher.
pub type TestEngine = TransactionEngine<InMemoryBackingStore, ScriptedDispatcher>;

/// A chest.
pub fn chest() -> ContainerId {
    make_container_id("chest")
}

/// A second chest, for cross-container tests.
pub fn barrel() -> ContainerId {
    make_container_id("barrel")
}

/// A crafting table.
pub fn workbench() -> ContainerId {
    make_container_id("workbench")
}

/// The player's own inventory (hotbar included).
pub fn player_inventory() -> ContainerId {
    make_container_id("player")
}

/// Slot `index` of `container`.
pub fn slot(container: ContainerId, index: u32) -> SlotRef {
    SlotRef::index(container, index)
}

/// `count` stone.
pub fn stone(count: u32) -> ItemSnapshot {
    ItemSnapshot::stack(make_item_id("stone"), count)
}

/// `count` planks.
pub fn planks(count: u32) -> ItemSnapshot {
    ItemSnapshot::stack(make_item_id("planks"), count)
}

/// Plain left click in `container`.
pub fn click(container: ContainerId) -> TransactionKind {
    TransactionKind::ClickContainer {
        container,
        button: 0,
        click: ClickType::Pickup,
    }
}

/// Shift-click in `container`.
pub fn quick_move(container: ContainerId) -> TransactionKind {
    TransactionKind::ClickContainer {
        container,
        button: 0,
        click: ClickType::QuickMove,
    }
}

/// Preview recomputation in `container` for the recipe labelled `recipe`.
pub fn craft_preview(container: ContainerId, recipe: Option<&str>) -> TransactionKind {
    TransactionKind::CraftPreview {
        container,
        recipe: recipe.map(make_recipe_id),
    }
}

/// Taking the result of the recipe labelled `recipe`.
pub fn craft_result(container: ContainerId, recipe: &str) -> TransactionKind {
    TransactionKind::CraftResult {
        container,
        recipe: make_recipe_id(recipe),
    }
}

/// Shift-craft in `container`.
pub fn shift_craft(container: ContainerId) -> TransactionKind {
    TransactionKind::Composite {
        container,
        action: CompositeAction::ShiftCraft,
    }
}

/// Dropping items out of `container`.
pub fn drop_from(container: ContainerId) -> TransactionKind {
    TransactionKind::DropFromInventory { container }
}

/// Root cause for a player-initiated batch.
pub fn player_root() -> CauseEntry {
    CauseEntry::Player(PLAYER)
}

/// Builder for engines over the test doubles.
///
/// # Example
///
/// ```
/// use echo_dry_tests::{chest, slot, stone, EngineTestBuilder, CTX};
///
/// let engine = EngineTestBuilder::new()
///     .with_slot(slot(chest(), 0), stone(4))
///     .build();
/// assert_eq!(engine.context(), CTX);
/// assert_eq!(engine.store().get(slot(chest(), 0)), stone(4));
/// ```
#[derive(Debug, Clone)]
pub struct EngineTestBuilder {
    store: InMemoryBackingStore,
    dispatcher: ScriptedDispatcher,
    config: TxnConfig,
    context: ContextToken,
}

impl Default for EngineTestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineTestBuilder {
    /// Empty store, accept-all dispatcher, default config, context [`CTX`].
    pub fn new() -> Self {
        Self {
            store: InMemoryBackingStore::new(),
            dispatcher: ScriptedDispatcher::new(),
            config: TxnConfig::default(),
            context: CTX,
        }
    }

    /// Seeds a slot of the store.
    pub fn with_slot(mut self, target: SlotRef, value: ItemSnapshot) -> Self {
        self.store.set(target, value);
        self
    }

    /// Replaces the store.
    pub fn with_store(mut self, store: InMemoryBackingStore) -> Self {
        self.store = store;
        self
    }

    /// Replaces the dispatcher.
    pub fn with_dispatcher(mut self, dispatcher: ScriptedDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Replaces the config.
    pub fn with_config(mut self, config: TxnConfig) -> Self {
        self.config = config;
        self
    }

    /// Disables batch splitting on foreign containers.
    pub fn without_split(mut self) -> Self {
        self.config.split_on_foreign_container = false;
        self
    }

    /// Sets the context the engine expects.
    pub fn with_context(mut self, context: ContextToken) -> Self {
        self.context = context;
        self
    }

    /// Builds the engine.
    pub fn build(self) -> TestEngine {
        TransactionEngine::new(self.store, self.dispatcher, self.config, self.context)
    }
}
