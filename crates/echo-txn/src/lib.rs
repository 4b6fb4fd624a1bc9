// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! echo-txn: mutation capture, event synthesis and rollback for inventory actions.
//!
//! Every state-changing inventory action (a container click, a craft, a drop,
//! a held-item switch) runs inside a [`TransactionBatch`]. Slot changes and
//! entity spawns are applied to the backing store as they happen and captured
//! as [`MutationRecord`]s and [`SpawnedEntity`]s. Nested actions are folded
//! into the transaction that caused them (absorption). When the batch ends the
//! captured state is coalesced into one [`TransactionEvent`] per container,
//! handed to listeners, and whatever listeners reject is reverted exactly,
//! latest change first.
//!
//! [`TransactionEngine`] drives that lifecycle against a [`BackingStore`] and
//! an [`EventDispatcher`]; the lower-level pieces are public so hosts can run
//! the steps themselves.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod batch;
mod cause;
/// Engine configuration and its JSON storage port.
pub mod config;
mod diagnostics;
mod engine;
mod event;
mod ident;
mod kind;
mod record;
/// Verdict application and restoration steps.
pub mod restore;
mod snapshot;
mod store;
/// Coalescing and event synthesis.
pub mod synthesis;
mod transaction;
mod tx;

/// Batches, absorption and attribution.
pub use batch::{Attribution, BatchError, RecordError, TransactionBatch};
/// Cause frames.
pub use cause::{CauseContribution, CauseEntry, CauseFrame};
/// Engine configuration.
pub use config::{ConfigError, ConfigService, ConfigStore, TxnConfig};
/// Structured diagnostics.
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
/// Engine driver.
pub use engine::{BatchOutcome, EngineError, EventOutcome, TransactionEngine};
/// Events, verdicts and the dispatch port.
pub use event::{
    DispatchError, EventDispatcher, EventKind, PreviewState, TransactionEvent, Verdict,
};
/// Identifiers.
pub use ident::{
    make_container_id, make_item_id, make_recipe_id, ContainerId, ContextToken, EntityHandle,
    Hash, ItemId, PlayerId, RecipeId,
};
/// Transaction kinds and absorption policy.
pub use kind::{Attachment, ClickType, CompositeAction, TransactionKind};
/// Captured records and entities.
pub use record::{EntityIntent, EntityKind, MutationRecord, SpawnedEntity};
/// Verdict outcomes.
pub use restore::{Resolution, VerdictEffect};
/// Slot model.
pub use snapshot::{BlockPos, ItemSnapshot, SlotKey, SlotRef};
/// Backing store port.
pub use store::{BackingStore, StoreError};
/// Synthesis output.
pub use synthesis::{coalesce, SynthesisContext, SynthesizedEvent};
/// Transactions.
pub use transaction::{RestoreReport, Transaction, TxState};
/// Batch and transaction ids.
pub use tx::{BatchId, TxId};
