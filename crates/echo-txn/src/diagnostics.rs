// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Structured diagnostic stream.
//!
//! Absorption, synthesis and restoration never log ad hoc. They push typed
//! [`Diagnostic`] values into a bounded [`Diagnostics`] buffer which the
//! caller may drain or ignore. Every entry is mirrored to `tracing` so hosts
//! with a subscriber installed see it without draining anything.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::event::DispatchError;
use crate::ident::{ContainerId, ContextToken, EntityHandle};
use crate::snapshot::SlotRef;
use crate::store::StoreError;
use crate::tx::{BatchId, TxId};

/// How loud a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Expected bookkeeping worth recording.
    Info,
    /// Something operators should look at; the action still ended in a safe state.
    Warning,
}

/// One diagnostic entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// No open transaction accepted a slot change; a standalone one was opened.
    UnattributedMutation {
        /// Batch the change landed in.
        batch: BatchId,
        /// Slot changed.
        target: SlotRef,
        /// Standalone transaction now owning the change.
        standalone: TxId,
    },
    /// No open transaction accepted a spawn; a standalone one was opened.
    UnattributedSpawn {
        /// Batch the spawn landed in.
        batch: BatchId,
        /// Entity spawned.
        entity: EntityHandle,
        /// Standalone transaction now owning the spawn.
        standalone: TxId,
    },
    /// Mutations were applied but no event carried them to listeners.
    DanglingMutations {
        /// Batch that produced them.
        batch: BatchId,
        /// Partition container.
        container: Option<ContainerId>,
        /// Coalesced records nobody could veto.
        records: usize,
        /// Spawned entities nobody could veto.
        entities: usize,
    },
    /// A batch produced no event at all.
    EmptySynthesis {
        /// Batch that was synthesized.
        batch: BatchId,
    },
    /// An operation arrived from an unexpected execution context.
    OffContext {
        /// Operation name.
        operation: &'static str,
        /// Context the engine expects.
        expected: ContextToken,
        /// Context the caller supplied.
        actual: ContextToken,
    },
    /// A transaction targeting another container force-closed the batch.
    BatchSplit {
        /// Batch that was closed early.
        closed: BatchId,
        /// Batch that replaced it.
        opened: BatchId,
        /// Container identity of the closed batch.
        from: Option<ContainerId>,
        /// Container that forced the split.
        to: ContainerId,
    },
    /// Listener dispatch failed; the event was treated as cancelled.
    DispatchFailed {
        /// Transaction whose event failed to dispatch.
        origin: TxId,
        /// Failure reported by the dispatcher.
        error: DispatchError,
    },
    /// A listener tried to cancel an event that cannot be cancelled.
    IgnoredCancellation {
        /// Transaction whose event was not cancellable.
        origin: TxId,
    },
    /// The backing store refused part of a restoration.
    RestoreFailed {
        /// Transaction being restored.
        tx: TxId,
        /// Slot that could not be reverted, if the failure was a slot.
        target: Option<SlotRef>,
        /// Entity that could not be despawned, if the failure was an entity.
        entity: Option<EntityHandle>,
        /// Store error.
        error: StoreError,
    },
    /// A listener override could not be applied.
    OverrideFailed {
        /// Slot that kept its synthesized value.
        target: SlotRef,
        /// Store error.
        error: StoreError,
    },
    /// A transaction of an already force-closed batch was closed.
    StaleClose {
        /// Transaction that was closed late.
        tx: TxId,
    },
}

impl Diagnostic {
    /// Severity of the entry.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::EmptySynthesis { .. } | Self::BatchSplit { .. } | Self::StaleClose { .. } => {
                Severity::Info
            }
            _ => Severity::Warning,
        }
    }

    /// Stable short code, used as the `kind` field in log output.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnattributedMutation { .. } => "unattributed_mutation",
            Self::UnattributedSpawn { .. } => "unattributed_spawn",
            Self::DanglingMutations { .. } => "dangling_mutations",
            Self::EmptySynthesis { .. } => "empty_synthesis",
            Self::OffContext { .. } => "off_context",
            Self::BatchSplit { .. } => "batch_split",
            Self::DispatchFailed { .. } => "dispatch_failed",
            Self::IgnoredCancellation { .. } => "ignored_cancellation",
            Self::RestoreFailed { .. } => "restore_failed",
            Self::OverrideFailed { .. } => "override_failed",
            Self::StaleClose { .. } => "stale_close",
        }
    }
}

impl core::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UnattributedMutation {
                batch,
                target,
                standalone,
            } => write!(
                f,
                "batch {batch}: change to {target} had no open owner, opened standalone {standalone}"
            ),
            Self::UnattributedSpawn {
                batch,
                entity,
                standalone,
            } => write!(
                f,
                "batch {batch}: spawn of {entity:?} had no open owner, opened standalone {standalone}"
            ),
            Self::DanglingMutations {
                batch,
                container,
                records,
                entities,
            } => {
                write!(f, "batch {batch}: {records} record(s) and {entities} entity(ies)")?;
                if let Some(c) = container {
                    write!(f, " in {c}")?;
                }
                f.write_str(" applied without an event; listeners could not veto them")
            }
            Self::EmptySynthesis { batch } => write!(f, "batch {batch}: no event synthesized"),
            Self::OffContext {
                operation,
                expected,
                actual,
            } => write!(
                f,
                "{operation} called from context {} (expected {})",
                actual.0, expected.0
            ),
            Self::BatchSplit {
                closed,
                opened,
                from,
                to,
            } => {
                write!(f, "batch {closed} force-closed")?;
                if let Some(c) = from {
                    write!(f, " (was {c})")?;
                }
                write!(f, "; batch {opened} opened for {to}")
            }
            Self::DispatchFailed { origin, error } => {
                write!(f, "dispatch of event from {origin} failed ({error}); treated as cancelled")
            }
            Self::IgnoredCancellation { origin } => {
                write!(f, "event from {origin} is not cancellable; cancellation ignored")
            }
            Self::RestoreFailed {
                tx,
                target,
                entity,
                error,
            } => {
                write!(f, "restore of {tx} failed")?;
                if let Some(t) = target {
                    write!(f, " at {t}")?;
                }
                if let Some(e) = entity {
                    write!(f, " for {e:?}")?;
                }
                write!(f, ": {error}")
            }
            Self::OverrideFailed { target, error } => {
                write!(f, "override of {target} not applied: {error}")
            }
            Self::StaleClose { tx } => write!(f, "{tx} closed after its batch was force-closed"),
        }
    }
}

/// Bounded buffer of diagnostics, oldest evicted first.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    entries: VecDeque<Diagnostic>,
    capacity: usize,
    evicted: u64,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::with_capacity(crate::config::DEFAULT_DIAGNOSTICS_CAPACITY)
    }
}

impl Diagnostics {
    /// Buffer keeping at most `capacity` entries. A capacity of zero keeps
    /// nothing (entries are still logged).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            evicted: 0,
        }
    }

    /// Records `diagnostic` and mirrors it to `tracing`.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity() {
            Severity::Warning => warn!(kind = diagnostic.code(), "{diagnostic}"),
            Severity::Info => debug!(kind = diagnostic.code(), "{diagnostic}"),
        }
        if self.capacity == 0 {
            self.evicted += 1;
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(diagnostic);
    }

    /// Buffered entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// Number of buffered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries dropped because the buffer was full.
    #[must_use]
    pub const fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Number of buffered entries with the given code.
    #[must_use]
    pub fn count(&self, code: &str) -> usize {
        self.entries.iter().filter(|d| d.code() == code).count()
    }

    /// Removes and returns every buffered entry.
    pub fn drain(&mut self) -> Vec<Diagnostic> {
        self.entries.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty(batch: u64) -> Diagnostic {
        Diagnostic::EmptySynthesis {
            batch: BatchId::from_raw(batch),
        }
    }

    #[test]
    fn full_buffer_evicts_oldest() {
        let mut diagnostics = Diagnostics::with_capacity(2);
        diagnostics.push(empty(1));
        diagnostics.push(empty(2));
        diagnostics.push(empty(3));
        assert_eq!(diagnostics.evicted(), 1);
        let drained = diagnostics.drain();
        assert_eq!(drained, vec![empty(2), empty(3)]);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut diagnostics = Diagnostics::with_capacity(0);
        diagnostics.push(empty(1));
        assert!(diagnostics.is_empty());
        assert_eq!(diagnostics.evicted(), 1);
    }

    #[test]
    fn split_is_informational() {
        let d = Diagnostic::BatchSplit {
            closed: BatchId::from_raw(1),
            opened: BatchId::from_raw(2),
            from: None,
            to: crate::ident::make_container_id("chest"),
        };
        assert_eq!(d.severity(), Severity::Info);
        assert!(d.to_string().contains("force-closed"));
    }
}
