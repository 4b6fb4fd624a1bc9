// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Closed set of transaction kinds and their absorption policy.
//!
//! Each kind has a fixed shape, so the set is an enum rather than a trait
//! hierarchy. The per-kind answers to "do you accept this slot change /
//! spawn / sub-action" and "what do you push onto the cause frame" live here;
//! [`crate::Transaction`] wraps a kind with the captured state.

use crate::cause::{CauseContribution, CauseEntry};
use crate::ident::{ContainerId, PlayerId, RecipeId};
use crate::snapshot::{BlockPos, ItemSnapshot, SlotKey, SlotRef};

/// Click mode of a container click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClickType {
    /// Plain pick-up / put-down.
    Pickup,
    /// Shift-click transfer between inventories.
    QuickMove,
    /// Number-key swap with a hotbar slot.
    Swap,
    /// Creative middle-click clone.
    Clone,
    /// Throw the hovered stack (or one item of it).
    Throw,
    /// Drag-distribute across several slots.
    QuickCraft,
    /// Double-click collect.
    PickupAll,
}

/// Aggregate actions whose parts are events in their own right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositeAction {
    /// Shift-click on a crafting result: repeated crafts until the grid runs out.
    ShiftCraft,
    /// Recipe-book placement: fills the grid, then previews the result.
    PlaceRecipe,
}

impl CompositeAction {
    const fn label(self) -> &'static str {
        match self {
            Self::ShiftCraft => "shift_craft",
            Self::PlaceRecipe => "place_recipe",
        }
    }
}

/// How a sub-action is folded into the transaction that accepted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    /// The sub-action's records belong to the accepting transaction's owner
    /// and it never produces an event of its own.
    Merged,
    /// The sub-action keeps its own records and becomes a child event of the
    /// accepting (composite) transaction.
    Child,
}

/// The action a transaction wraps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionKind {
    /// Click inside an open container.
    ClickContainer {
        /// Container clicked in.
        container: ContainerId,
        /// Mouse button / hotbar key.
        button: u8,
        /// Click mode.
        click: ClickType,
    },
    /// A container is being opened.
    OpenContainer {
        /// Container opened.
        container: ContainerId,
    },
    /// A container is being closed.
    CloseContainer {
        /// Container closed.
        container: ContainerId,
    },
    /// The player selected a different hotbar slot.
    SetHeldItem {
        /// Acting player.
        player: PlayerId,
        /// Player inventory holding the hotbar.
        container: ContainerId,
        /// Previously selected hotbar slot.
        previous: u8,
        /// Newly selected hotbar slot.
        next: u8,
    },
    /// Items thrown out of an inventory.
    DropFromInventory {
        /// Inventory dropped from.
        container: ContainerId,
    },
    /// Crafting output preview recomputed.
    CraftPreview {
        /// Crafting container.
        container: ContainerId,
        /// Recipe matched by the grid, if any.
        recipe: Option<RecipeId>,
    },
    /// A crafting result was taken.
    CraftResult {
        /// Crafting container.
        container: ContainerId,
        /// Recipe crafted.
        recipe: RecipeId,
    },
    /// Slot changes nobody else claimed.
    SlotChange {
        /// Container whose slot changed.
        container: ContainerId,
    },
    /// Using an item on a block. Bookkeeping only: contributes cause entries
    /// to nested actions and owns the entities the use spawns, but claims no
    /// slots and never produces an event of its own.
    InteractBlockWithItem {
        /// Block interacted with.
        block: BlockPos,
        /// Stack used.
        used: ItemSnapshot,
        /// Inventory the used stack lives in.
        inventory: ContainerId,
    },
    /// Entity spawns nobody else claimed.
    SpawnEntity,
    /// Aggregate action with child events.
    Composite {
        /// Container the aggregate runs in.
        container: ContainerId,
        /// Aggregate action.
        action: CompositeAction,
    },
}

impl TransactionKind {
    /// Container identity used for batch partitioning and split detection.
    ///
    /// `InteractBlockWithItem` and `SpawnEntity` are container-neutral.
    #[must_use]
    pub const fn container(&self) -> Option<ContainerId> {
        match self {
            Self::ClickContainer { container, .. }
            | Self::OpenContainer { container }
            | Self::CloseContainer { container }
            | Self::SetHeldItem { container, .. }
            | Self::DropFromInventory { container }
            | Self::CraftPreview { container, .. }
            | Self::CraftResult { container, .. }
            | Self::SlotChange { container }
            | Self::Composite { container, .. } => Some(*container),
            Self::InteractBlockWithItem { .. } | Self::SpawnEntity => None,
        }
    }

    /// Short human-readable name.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ClickContainer { .. } => "click-container",
            Self::OpenContainer { .. } => "open-container",
            Self::CloseContainer { .. } => "close-container",
            Self::SetHeldItem { .. } => "set-held-item",
            Self::DropFromInventory { .. } => "drop-from-inventory",
            Self::CraftPreview { .. } => "craft-preview",
            Self::CraftResult { .. } => "craft-result",
            Self::SlotChange { .. } => "slot-change",
            Self::InteractBlockWithItem { .. } => "interact-block-with-item",
            Self::SpawnEntity => "spawn-entity",
            Self::Composite { .. } => "composite",
        }
    }

    /// Whether a transaction of this kind takes responsibility for a change
    /// to `target`.
    #[must_use]
    pub fn accepts_slot(&self, target: SlotRef) -> bool {
        match self {
            Self::ClickContainer { container, .. }
            | Self::OpenContainer { container }
            | Self::CloseContainer { container }
            | Self::DropFromInventory { container }
            | Self::CraftResult { container, .. }
            | Self::SlotChange { container }
            | Self::Composite { container, .. } => target.container == *container,
            Self::CraftPreview { container, .. } => {
                target.container == *container && target.slot == SlotKey::CraftResult
            }
            Self::InteractBlockWithItem { .. } | Self::SetHeldItem { .. } | Self::SpawnEntity => {
                false
            }
        }
    }

    /// Whether a transaction of this kind takes responsibility for an
    /// entity spawned while it is open.
    #[must_use]
    pub const fn accepts_spawn(&self) -> bool {
        matches!(
            self,
            Self::ClickContainer { .. }
                | Self::DropFromInventory { .. }
                | Self::Composite { .. }
                | Self::InteractBlockWithItem { .. }
                | Self::SpawnEntity
        )
    }

    /// Whether (and how) a transaction of this kind folds in a nested
    /// sub-action of kind `child`.
    #[must_use]
    pub fn accepts_sub_action(&self, child: &Self) -> Option<Attachment> {
        match (self, child) {
            (
                Self::ClickContainer { container, .. },
                Self::CraftPreview { container: c, .. }
                | Self::CraftResult { container: c, .. }
                | Self::DropFromInventory { container: c },
            )
            | (Self::CraftResult { container, .. }, Self::CraftPreview { container: c, .. })
                if c == container =>
            {
                Some(Attachment::Merged)
            }
            (
                Self::Composite { container, .. },
                Self::CraftResult { container: c, .. } | Self::CraftPreview { container: c, .. },
            ) if c == container => Some(Attachment::Child),
            _ => None,
        }
    }

    /// Entries pushed onto the cause frame for this kind.
    ///
    /// `parent` is the kind of the transaction this one was absorbed into,
    /// if any; a nested craft does not repeat the container its parent
    /// already contributed.
    #[must_use]
    pub fn cause_contribution(&self, parent: Option<&Self>) -> Option<CauseContribution> {
        let nested = parent.is_some();
        match self {
            Self::ClickContainer { container, .. } => Some(CauseContribution::of([
                CauseEntry::Container(*container),
                CauseEntry::Action("click"),
            ])),
            Self::OpenContainer { container } => Some(CauseContribution::of([
                CauseEntry::Container(*container),
                CauseEntry::Action("open"),
            ])),
            Self::CloseContainer { container } => Some(CauseContribution::of([
                CauseEntry::Container(*container),
                CauseEntry::Action("close"),
            ])),
            Self::SetHeldItem { player, .. } => Some(CauseContribution::of([
                CauseEntry::Player(*player),
                CauseEntry::Action("select_hotbar"),
            ])),
            Self::DropFromInventory { .. } if nested => {
                Some(CauseContribution::of([CauseEntry::Action("drop")]))
            }
            Self::DropFromInventory { container } => Some(CauseContribution::of([
                CauseEntry::Container(*container),
                CauseEntry::Action("drop"),
            ])),
            Self::CraftPreview { recipe, .. } => {
                recipe.map(|r| CauseContribution::of([CauseEntry::Recipe(r)]))
            }
            Self::CraftResult { recipe, .. } if nested => {
                Some(CauseContribution::of([CauseEntry::Recipe(*recipe)]))
            }
            Self::CraftResult { container, recipe } => Some(CauseContribution::of([
                CauseEntry::Container(*container),
                CauseEntry::Recipe(*recipe),
            ])),
            Self::SlotChange { .. } => None,
            Self::InteractBlockWithItem { block, used, .. } => Some(CauseContribution::of([
                CauseEntry::Block(*block),
                CauseEntry::UsedItem(*used),
            ])),
            Self::SpawnEntity => Some(CauseContribution::of([CauseEntry::Action("spawn")])),
            Self::Composite { container, action } => Some(CauseContribution::of([
                CauseEntry::Container(*container),
                CauseEntry::Action(action.label()),
            ])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{make_container_id, make_recipe_id};

    #[test]
    fn click_merges_crafting_in_its_own_container_only() {
        let grid = make_container_id("grid");
        let chest = make_container_id("chest");
        let click = TransactionKind::ClickContainer {
            container: grid,
            button: 0,
            click: ClickType::Pickup,
        };
        let same = TransactionKind::CraftPreview {
            container: grid,
            recipe: None,
        };
        let other = TransactionKind::CraftPreview {
            container: chest,
            recipe: None,
        };
        assert_eq!(click.accepts_sub_action(&same), Some(Attachment::Merged));
        assert_eq!(click.accepts_sub_action(&other), None);
    }

    #[test]
    fn composite_adopts_crafts_as_children() {
        let grid = make_container_id("grid");
        let composite = TransactionKind::Composite {
            container: grid,
            action: CompositeAction::ShiftCraft,
        };
        let craft = TransactionKind::CraftResult {
            container: grid,
            recipe: make_recipe_id("planks"),
        };
        assert_eq!(composite.accepts_sub_action(&craft), Some(Attachment::Child));
        assert_eq!(
            composite.accepts_sub_action(&TransactionKind::SpawnEntity),
            None
        );
    }

    #[test]
    fn preview_only_claims_the_result_slot() {
        let grid = make_container_id("grid");
        let preview = TransactionKind::CraftPreview {
            container: grid,
            recipe: None,
        };
        assert!(preview.accepts_slot(SlotRef::craft_result(grid)));
        assert!(!preview.accepts_slot(SlotRef::index(grid, 1)));
    }

    #[test]
    fn nested_craft_does_not_repeat_container() {
        let grid = make_container_id("grid");
        let recipe = make_recipe_id("planks");
        let craft = TransactionKind::CraftResult {
            container: grid,
            recipe,
        };
        let standalone = craft.cause_contribution(None).unwrap_or_default();
        assert_eq!(standalone.entries().len(), 2);
        let click = TransactionKind::ClickContainer {
            container: grid,
            button: 0,
            click: ClickType::Pickup,
        };
        let nested = craft.cause_contribution(Some(&click)).unwrap_or_default();
        assert_eq!(nested.entries(), &[CauseEntry::Recipe(recipe)]);
    }
}
