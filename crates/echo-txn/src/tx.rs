// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Batch and transaction identifier types.

/// Thin wrapper around a batch identifier.
///
/// The engine issues monotonically increasing identifiers via
/// [`crate::TransactionEngine::begin_batch`] (and again for every forced
/// split).
///
/// # Invariants
/// - Zero (`BatchId(0)`) is reserved as invalid. The engine never issues it.
/// - The counter wraps at `u64::MAX` and resumes at `1`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct BatchId(u64);

impl BatchId {
    /// Constructs a `BatchId` from a raw `u64` value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns the identifier following `self`, skipping zero on wrap.
    #[must_use]
    pub(crate) const fn next(self) -> Self {
        let raw = self.0.wrapping_add(1);
        if raw == 0 {
            Self(1)
        } else {
            Self(raw)
        }
    }
}

impl core::fmt::Display for BatchId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of one transaction inside the arena of one batch.
///
/// Transactions never hold references to each other; parents, children and
/// open-time ancestors are all expressed as `TxId`s into the same arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct TxId {
    batch: BatchId,
    index: u32,
}

impl TxId {
    pub(crate) const fn new(batch: BatchId, index: u32) -> Self {
        Self { batch, index }
    }

    /// Batch that owns the transaction.
    #[must_use]
    pub const fn batch(self) -> BatchId {
        self.batch
    }

    /// Position of the transaction in its batch, in creation order.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    pub(crate) const fn slot(self) -> usize {
        self.index as usize
    }
}

impl core::fmt::Display for TxId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}", self.batch, self.index)
    }
}
