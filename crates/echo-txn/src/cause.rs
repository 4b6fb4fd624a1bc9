// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cause frames: the "why is this happening" stack attached to every event.

use crate::ident::{ContainerId, PlayerId, RecipeId};
use crate::snapshot::{BlockPos, ItemSnapshot};

/// One entry in a cause frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CauseEntry {
    /// The acting player.
    Player(PlayerId),
    /// The container an action happened in.
    Container(ContainerId),
    /// A block the player interacted with.
    Block(BlockPos),
    /// The stack used for an interaction.
    UsedItem(ItemSnapshot),
    /// The recipe behind a craft.
    Recipe(RecipeId),
    /// Free-form action label (`"click"`, `"drop"`, ...).
    Action(&'static str),
}

/// Ordered cause entries, root first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CauseFrame {
    entries: Vec<CauseEntry>,
}

impl CauseFrame {
    /// Frame holding only the batch's root cause.
    #[must_use]
    pub fn rooted(root: CauseEntry) -> Self {
        Self {
            entries: vec![root],
        }
    }

    /// Appends a contribution.
    pub fn push(&mut self, contribution: CauseContribution) {
        self.entries.extend(contribution.entries);
    }

    /// Root cause (first entry), if any.
    #[must_use]
    pub fn root(&self) -> Option<&CauseEntry> {
        self.entries.first()
    }

    /// All entries, root first.
    #[must_use]
    pub fn entries(&self) -> &[CauseEntry] {
        &self.entries
    }

    /// Innermost entry matching `pred`.
    pub fn last_matching(&self, pred: impl Fn(&CauseEntry) -> bool) -> Option<&CauseEntry> {
        self.entries.iter().rev().find(|e| pred(e))
    }

    /// `true` if the frame contains `entry`.
    #[must_use]
    pub fn contains(&self, entry: &CauseEntry) -> bool {
        self.entries.contains(entry)
    }
}

/// Entries a transaction pushes onto the frame before synthesis runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CauseContribution {
    entries: Vec<CauseEntry>,
}

impl CauseContribution {
    /// Builds a contribution from entries in push order.
    #[must_use]
    pub fn of(entries: impl IntoIterator<Item = CauseEntry>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Entries in push order.
    #[must_use]
    pub fn entries(&self) -> &[CauseEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::make_container_id;

    #[test]
    fn contributions_append_after_root() {
        let chest = make_container_id("chest");
        let mut frame = CauseFrame::rooted(CauseEntry::Player(PlayerId(7)));
        frame.push(CauseContribution::of([
            CauseEntry::Container(chest),
            CauseEntry::Action("click"),
        ]));
        assert_eq!(frame.root(), Some(&CauseEntry::Player(PlayerId(7))));
        assert_eq!(frame.entries().len(), 3);
        assert_eq!(
            frame.last_matching(|e| matches!(e, CauseEntry::Container(_))),
            Some(&CauseEntry::Container(chest))
        );
    }
}
