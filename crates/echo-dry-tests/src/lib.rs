// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for echo-txn.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`dispatch`] - Scripted listener dispatcher
//! - [`fixtures`] - Ids, stacks, transaction kinds and the engine builder
//! - [`store`] - In-memory backing store with failure injection

pub mod config;
pub mod dispatch;
pub mod fixtures;
pub mod store;

// Re-export commonly used items at crate root for convenience
pub use config::{Access, Fault, InMemoryConfigStore};
pub use dispatch::ScriptedDispatcher;
pub use fixtures::{
    barrel, chest, click, craft_preview, craft_result, drop_from, planks, player_inventory,
    player_root, quick_move, shift_craft, slot, stone, workbench, EngineTestBuilder, TestEngine,
    CTX, PLAYER,
};
pub use store::{InMemoryBackingStore, StoreCall};
