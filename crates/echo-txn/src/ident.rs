// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier and hashing utilities.
use blake3::Hasher;

/// Canonical 256-bit hash used for label-derived identifiers and event digests.
pub type Hash = [u8; 32];

/// Strongly typed identifier for an item type (`stone`, `oak_planks`, ...).
///
/// Produced by [`make_item_id`]; the id is not reversible back into a label.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ItemId(pub Hash);

impl ItemId {
    /// Returns the canonical byte representation of this id.
    #[must_use]
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

/// Identifier for a logical container (an open menu, a player inventory, a chest).
///
/// Container identity is what a batch is partitioned by and what forces a
/// batch split when a later transaction targets a different container.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ContainerId(pub Hash);

impl ContainerId {
    /// Returns the canonical byte representation of this id.
    #[must_use]
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

/// Identifier for a crafting recipe.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RecipeId(pub Hash);

impl RecipeId {
    /// Returns the canonical byte representation of this id.
    #[must_use]
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

/// Opaque player handle issued by the host.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PlayerId(pub u64);

/// Opaque handle of an entity spawned through the backing store.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EntityHandle(pub u64);

/// Opaque execution-context identity.
///
/// The engine is told which context it expects (the simulation's main work
/// context) and every operation carries the caller's token. A mismatch only
/// produces a diagnostic; it never changes behavior.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ContextToken(pub u64);

/// Produces a stable, domain‑separated item identifier (prefix `b"item:"`) using BLAKE3.
pub fn make_item_id(label: &str) -> ItemId {
    let mut hasher = Hasher::new();
    hasher.update(b"item:");
    hasher.update(label.as_bytes());
    ItemId(hasher.finalize().into())
}

/// Produces a stable, domain‑separated container identifier (prefix `b"container:"`) using BLAKE3.
pub fn make_container_id(label: &str) -> ContainerId {
    let mut hasher = Hasher::new();
    hasher.update(b"container:");
    hasher.update(label.as_bytes());
    ContainerId(hasher.finalize().into())
}

/// Produces a stable, domain‑separated recipe identifier (prefix `b"recipe:"`) using BLAKE3.
pub fn make_recipe_id(label: &str) -> RecipeId {
    let mut hasher = Hasher::new();
    hasher.update(b"recipe:");
    hasher.update(label.as_bytes());
    RecipeId(hasher.finalize().into())
}

#[inline]
pub(crate) fn short_hex(h: &Hash) -> String {
    let mut short = [0u8; 8];
    short.copy_from_slice(&h[0..8]);
    hex::encode(short)
}

impl core::fmt::Display for ItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "item:{}", short_hex(&self.0))
    }
}

impl core::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "container:{}", short_hex(&self.0))
    }
}

impl core::fmt::Display for RecipeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "recipe:{}", short_hex(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_domain_separated() {
        assert_ne!(make_item_id("chest").0, make_container_id("chest").0);
        assert_ne!(make_container_id("chest").0, make_recipe_id("chest").0);
        assert_eq!(make_item_id("stone"), make_item_id("stone"));
    }

    #[test]
    fn display_uses_short_hex_prefix() {
        let id = make_container_id("workbench");
        let rendered = id.to_string();
        assert!(rendered.starts_with("container:"));
        assert_eq!(rendered.len(), "container:".len() + 16);
    }
}
