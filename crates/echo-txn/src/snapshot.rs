// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Addressable slots and the item snapshots stored in them.

use blake3::Hasher;

use crate::ident::{ContainerId, ItemId};

/// Immutable value of one slot at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ItemSnapshot {
    /// Nothing in the slot.
    #[default]
    Empty,
    /// A non-empty stack.
    Stack {
        /// Item type of the stack.
        item: ItemId,
        /// Stack size, always non-zero.
        count: u32,
    },
}

impl ItemSnapshot {
    /// Builds a stack snapshot; a zero count normalises to [`ItemSnapshot::Empty`].
    #[must_use]
    pub const fn stack(item: ItemId, count: u32) -> Self {
        if count == 0 {
            Self::Empty
        } else {
            Self::Stack { item, count }
        }
    }

    /// Returns `true` for an empty slot.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Stack size (zero for an empty slot).
    #[must_use]
    pub const fn count(&self) -> u32 {
        match self {
            Self::Empty => 0,
            Self::Stack { count, .. } => *count,
        }
    }

    /// Item type, if any.
    #[must_use]
    pub const fn item(&self) -> Option<ItemId> {
        match self {
            Self::Empty => None,
            Self::Stack { item, .. } => Some(*item),
        }
    }

    pub(crate) fn hash_into(&self, hasher: &mut Hasher) {
        match self {
            Self::Empty => {
                hasher.update(&[0u8]);
            }
            Self::Stack { item, count } => {
                hasher.update(&[1u8]);
                hasher.update(item.as_bytes());
                hasher.update(&count.to_le_bytes());
            }
        }
    }
}

impl core::fmt::Display for ItemSnapshot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Empty => f.write_str("empty"),
            Self::Stack { item, count } => write!(f, "{count}x{item}"),
        }
    }
}

/// Slot position inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotKey {
    /// Numbered slot (grid, hotbar, chest cell).
    Index(u32),
    /// Crafting output slot.
    CraftResult,
    /// Stack carried on the player's cursor while the container is open.
    Cursor,
}

impl SlotKey {
    const fn tag(self) -> u8 {
        match self {
            Self::Index(_) => 1,
            Self::CraftResult => 2,
            Self::Cursor => 3,
        }
    }
}

/// Fully qualified address of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotRef {
    /// Container holding the slot.
    pub container: ContainerId,
    /// Position inside the container.
    pub slot: SlotKey,
}

impl SlotRef {
    /// Numbered slot in `container`.
    #[must_use]
    pub const fn index(container: ContainerId, index: u32) -> Self {
        Self {
            container,
            slot: SlotKey::Index(index),
        }
    }

    /// Crafting output slot of `container`.
    #[must_use]
    pub const fn craft_result(container: ContainerId) -> Self {
        Self {
            container,
            slot: SlotKey::CraftResult,
        }
    }

    /// Cursor slot associated with `container`.
    #[must_use]
    pub const fn cursor(container: ContainerId) -> Self {
        Self {
            container,
            slot: SlotKey::Cursor,
        }
    }

    pub(crate) fn hash_into(&self, hasher: &mut Hasher) {
        hasher.update(self.container.as_bytes());
        hasher.update(&[self.slot.tag()]);
        if let SlotKey::Index(i) = self.slot {
            hasher.update(&i.to_le_bytes());
        }
    }
}

impl core::fmt::Display for SlotRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.slot {
            SlotKey::Index(i) => write!(f, "{}[{i}]", self.container),
            SlotKey::CraftResult => write!(f, "{}[result]", self.container),
            SlotKey::Cursor => write!(f, "{}[cursor]", self.container),
        }
    }
}

/// Integer block position in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockPos {
    /// East/west coordinate.
    pub x: i32,
    /// Vertical coordinate.
    pub y: i32,
    /// North/south coordinate.
    pub z: i32,
}

impl BlockPos {
    /// Convenience constructor.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{make_container_id, make_item_id};

    #[test]
    fn zero_count_stack_is_empty() {
        let stone = make_item_id("stone");
        assert_eq!(ItemSnapshot::stack(stone, 0), ItemSnapshot::Empty);
        assert_eq!(ItemSnapshot::stack(stone, 3).count(), 3);
        assert_eq!(ItemSnapshot::stack(stone, 3).item(), Some(stone));
    }

    #[test]
    fn slot_refs_sort_by_container_then_slot() {
        let c = make_container_id("grid");
        let mut slots = vec![
            SlotRef::cursor(c),
            SlotRef::index(c, 4),
            SlotRef::craft_result(c),
            SlotRef::index(c, 1),
        ];
        slots.sort();
        assert_eq!(
            slots,
            vec![
                SlotRef::index(c, 1),
                SlotRef::index(c, 4),
                SlotRef::craft_result(c),
                SlotRef::cursor(c),
            ]
        );
    }
}
