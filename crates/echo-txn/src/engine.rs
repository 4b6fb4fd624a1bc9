// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine driver: one batch at a time, from first capture to final verdict.
//!
//! [`TransactionEngine`] owns the backing store, the listener dispatcher, the
//! configuration and the diagnostics buffer. The host drives it from the
//! simulation's work context: `begin_batch`, then any interleaving of
//! `open`/`close` and the `record_*` captures, then `end_batch`, which
//! synthesizes, dispatches and restores.

use rustc_hash::FxHashSet;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::batch::{Attribution, BatchError, RecordError, TransactionBatch};
use crate::cause::CauseEntry;
use crate::config::TxnConfig;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::event::{EventDispatcher, TransactionEvent, Verdict};
use crate::ident::{ContainerId, ContextToken, EntityHandle, PlayerId};
use crate::kind::TransactionKind;
use crate::record::EntityIntent;
use crate::restore::{self, Resolution};
use crate::snapshot::{ItemSnapshot, SlotRef};
use crate::store::{BackingStore, StoreError};
use crate::transaction::RestoreReport;
use crate::tx::{BatchId, TxId};

/// Errors returned by the engine driver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The call needs an active batch and none is open.
    #[error("no active batch")]
    NoActiveBatch,
    /// `begin_batch` was called while a batch is still active.
    #[error("batch {0} is still active")]
    BatchAlreadyActive(BatchId),
    /// Batch bookkeeping rejected the call.
    #[error(transparent)]
    Batch(#[from] BatchError),
    /// The backing store refused a change; nothing was captured.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RecordError> for EngineError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::Store(e) => Self::Store(e),
            RecordError::Batch(e) => Self::Batch(e),
        }
    }
}

/// What happened to one synthesized event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventOutcome {
    /// Partition container.
    pub container: Option<ContainerId>,
    /// The event as listeners left it; `None` for partitions without one.
    pub event: Option<TransactionEvent>,
    /// Transactions that fed the partition.
    pub members: Vec<TxId>,
    /// Final outcome.
    pub resolution: Resolution,
    /// Restoration counters.
    pub restored: RestoreReport,
}

/// Everything one batch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Batch id.
    pub batch: BatchId,
    /// `true` when the batch was closed early by a foreign container.
    pub forced: bool,
    /// One entry per partition, in synthesis order.
    pub events: Vec<EventOutcome>,
    /// Diagnostic report of the batch as it was resolved.
    pub report: String,
}

impl BatchOutcome {
    /// Events that reached listeners (partitions with an event).
    pub fn dispatched(&self) -> impl Iterator<Item = &TransactionEvent> {
        self.events.iter().filter_map(|e| e.event.as_ref())
    }
}

/// Transaction engine over a backing store `S` and a dispatcher `D`.
pub struct TransactionEngine<S, D> {
    store: S,
    dispatcher: D,
    config: TxnConfig,
    diagnostics: Diagnostics,
    context: ContextToken,
    batch: Option<TransactionBatch>,
    next_batch: BatchId,
    force_closed: FxHashSet<BatchId>,
    pending: Vec<BatchOutcome>,
}

impl<S, D> core::fmt::Debug for TransactionEngine<S, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransactionEngine")
            .field("config", &self.config)
            .field("context", &self.context)
            .field("batch", &self.batch.as_ref().map(TransactionBatch::id))
            .field("next_batch", &self.next_batch)
            .field("diagnostics", &self.diagnostics.len())
            .finish_non_exhaustive()
    }
}

impl<S: BackingStore, D: EventDispatcher> TransactionEngine<S, D> {
    /// Engine expecting every call from `context`.
    pub fn new(store: S, dispatcher: D, config: TxnConfig, context: ContextToken) -> Self {
        let diagnostics = Diagnostics::with_capacity(config.diagnostics_capacity);
        Self {
            store,
            dispatcher,
            config,
            diagnostics,
            context,
            batch: None,
            next_batch: BatchId::from_raw(1),
            force_closed: FxHashSet::default(),
            pending: Vec::new(),
        }
    }

    /// Engine with default configuration and context token zero.
    pub fn with_defaults(store: S, dispatcher: D) -> Self {
        Self::new(store, dispatcher, TxnConfig::default(), ContextToken(0))
    }

    /// Backing store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Backing store, mutably. Changes made here bypass capture.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Listener dispatcher.
    pub const fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Listener dispatcher, mutably.
    pub fn dispatcher_mut(&mut self) -> &mut D {
        &mut self.dispatcher
    }

    /// Active configuration.
    pub const fn config(&self) -> &TxnConfig {
        &self.config
    }

    /// Buffered diagnostics.
    pub const fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Removes and returns every buffered diagnostic.
    pub fn drain_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.drain()
    }

    /// Context the engine expects calls from.
    pub const fn context(&self) -> ContextToken {
        self.context
    }

    /// Batch currently being recorded.
    pub const fn current_batch(&self) -> Option<&TransactionBatch> {
        self.batch.as_ref()
    }

    /// Consumes the engine, returning the store and dispatcher.
    pub fn into_parts(self) -> (S, D) {
        (self.store, self.dispatcher)
    }

    fn check_context(&mut self, operation: &'static str, actual: ContextToken) {
        if self.config.warn_off_context && actual != self.context {
            self.diagnostics.push(Diagnostic::OffContext {
                operation,
                expected: self.context,
                actual,
            });
        }
    }

    fn start_batch(&mut self, root: CauseEntry) -> BatchId {
        let id = self.next_batch;
        self.next_batch = id.next();
        self.batch = Some(TransactionBatch::new(id, root));
        debug!(batch = %id, "batch started");
        id
    }

    /// Starts a batch for a new root action.
    #[instrument(level = "debug", skip(self))]
    pub fn begin_batch(&mut self, ctx: ContextToken, root: CauseEntry) -> Result<BatchId, EngineError> {
        self.check_context("begin_batch", ctx);
        if let Some(batch) = &self.batch {
            return Err(EngineError::BatchAlreadyActive(batch.id()));
        }
        self.force_closed.clear();
        Ok(self.start_batch(root))
    }

    fn active(&mut self) -> Result<&mut TransactionBatch, EngineError> {
        self.batch.as_mut().ok_or(EngineError::NoActiveBatch)
    }

    /// Resolves the current batch early and continues in a fresh one with
    /// the same root cause.
    fn split(&mut self, to: ContainerId) -> Result<(), EngineError> {
        let batch = self.batch.take().ok_or(EngineError::NoActiveBatch)?;
        let closed = batch.id();
        let from = batch.container();
        let root = batch.root().clone();
        let outcome = self.resolve(batch, true);
        self.pending.push(outcome);
        self.force_closed.insert(closed);
        let opened = self.start_batch(root);
        self.diagnostics.push(Diagnostic::BatchSplit {
            closed,
            opened,
            from,
            to,
        });
        Ok(())
    }

    fn splits_for(&self, container: ContainerId, absorbed: bool) -> bool {
        self.config.split_on_foreign_container
            && !absorbed
            && self
                .batch
                .as_ref()
                .is_some_and(|b| b.is_foreign(container))
    }

    /// Opens a transaction for `kind`.
    ///
    /// When the kind targets a container other than the batch's and no open
    /// transaction would fold it in, the batch is force-closed first.
    pub fn open(&mut self, ctx: ContextToken, kind: TransactionKind) -> Result<TxId, EngineError> {
        self.check_context("open", ctx);
        let absorbed = self.active()?.would_absorb_sub_action(&kind);
        if let Some(container) = kind.container() {
            if self.splits_for(container, absorbed) {
                self.split(container)?;
            }
        }
        Ok(self.active()?.open(kind)?)
    }

    /// Closes `tx`. Closing a transaction of a force-closed batch is a no-op.
    pub fn close(&mut self, ctx: ContextToken, tx: TxId) -> Result<(), EngineError> {
        self.check_context("close", ctx);
        if self.force_closed.contains(&tx.batch()) {
            self.diagnostics.push(Diagnostic::StaleClose { tx });
            return Ok(());
        }
        Ok(self.active()?.close(tx)?)
    }

    /// Applies and captures a slot change.
    pub fn record_slot_change(
        &mut self,
        ctx: ContextToken,
        target: SlotRef,
        original: ItemSnapshot,
        replacement: ItemSnapshot,
    ) -> Result<Attribution, EngineError> {
        self.check_context("record_slot_change", ctx);
        let absorbed = self.active()?.would_absorb_slot(target);
        if self.splits_for(target.container, absorbed) {
            self.split(target.container)?;
        }
        let batch = self.batch.as_mut().ok_or(EngineError::NoActiveBatch)?;
        let attribution = batch.record_slot_change(&mut self.store, target, original, replacement)?;
        if let Attribution::Standalone(standalone) = attribution {
            self.diagnostics.push(Diagnostic::UnattributedMutation {
                batch: standalone.batch(),
                target,
                standalone,
            });
        }
        Ok(attribution)
    }

    /// Spawns and captures an entity.
    pub fn record_spawn(
        &mut self,
        ctx: ContextToken,
        intent: EntityIntent,
    ) -> Result<(EntityHandle, Attribution), EngineError> {
        self.check_context("record_spawn", ctx);
        let batch = self.batch.as_mut().ok_or(EngineError::NoActiveBatch)?;
        let (entity, attribution) = batch.record_spawn(&mut self.store, intent)?;
        if let Attribution::Standalone(standalone) = attribution {
            self.diagnostics.push(Diagnostic::UnattributedSpawn {
                batch: standalone.batch(),
                entity,
                standalone,
            });
        }
        Ok((entity, attribution))
    }

    /// Selects a hotbar slot and captures the change.
    pub fn record_held_item_change(
        &mut self,
        ctx: ContextToken,
        player: PlayerId,
        container: ContainerId,
        previous: u8,
        next: u8,
    ) -> Result<TxId, EngineError> {
        self.check_context("record_held_item_change", ctx);
        self.active()?;
        if self.splits_for(container, false) {
            self.split(container)?;
        }
        let batch = self.batch.as_mut().ok_or(EngineError::NoActiveBatch)?;
        Ok(batch.record_held_item_change(&mut self.store, player, container, previous, next)?)
    }

    /// Closes the current batch and resolves it.
    ///
    /// Returns the outcomes of every batch force-closed since
    /// `begin_batch`, followed by the current one.
    #[instrument(level = "debug", skip(self))]
    pub fn end_batch(&mut self, ctx: ContextToken) -> Result<Vec<BatchOutcome>, EngineError> {
        self.check_context("end_batch", ctx);
        let batch = self.batch.take().ok_or(EngineError::NoActiveBatch)?;
        let outcome = self.resolve(batch, false);
        let mut outcomes = std::mem::take(&mut self.pending);
        outcomes.push(outcome);
        Ok(outcomes)
    }

    fn dispatch(&mut self, event: &mut TransactionEvent) -> Verdict {
        match self.dispatcher.dispatch(event) {
            Ok(verdict) => verdict,
            Err(error) => {
                self.diagnostics.push(Diagnostic::DispatchFailed {
                    origin: event.origin(),
                    error,
                });
                event.force_cancel();
                Verdict::accept()
            }
        }
    }

    fn resolve(&mut self, mut batch: TransactionBatch, forced: bool) -> BatchOutcome {
        let id = batch.id();
        let closed = batch.close_all();
        if closed > 0 {
            debug!(batch = %id, closed, "closed transactions left open at batch end");
        }
        let synthesized = batch.synthesize();
        if synthesized.iter().all(|s| s.event.is_none()) {
            self.diagnostics.push(Diagnostic::EmptySynthesis { batch: id });
        }

        let mut events = Vec::with_capacity(synthesized.len());
        for mut entry in synthesized {
            if entry.event.is_none() && entry.dangling && self.config.report_dangling_mutations {
                let (records, entities) = batch.captured_counts(&entry.members);
                self.diagnostics.push(Diagnostic::DanglingMutations {
                    batch: id,
                    container: entry.container,
                    records,
                    entities,
                });
            }
            let verdict = match entry.event.as_mut() {
                Some(event) => self.dispatch(event),
                None => Verdict::accept(),
            };
            let (resolution, restored) = restore::resolve_event(
                &mut batch,
                &mut entry,
                &verdict,
                &mut self.store,
                &mut self.diagnostics,
            );
            events.push(EventOutcome {
                container: entry.container,
                event: entry.event,
                members: entry.members,
                resolution,
                restored,
            });
        }
        info!(batch = %id, forced, events = events.len(), "batch resolved");
        BatchOutcome {
            batch: id,
            forced,
            events,
            report: batch.describe(),
        }
    }
}
