// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted listener dispatcher.

use std::collections::VecDeque;

use echo_txn::{DispatchError, EventDispatcher, TransactionEvent, Verdict};

/// Dispatcher answering from a script and remembering what it saw.
///
/// Each dispatch pops the next scripted answer; once the script runs out the
/// fallback verdict is returned (accept everything unless changed).
///
/// # Example
///
/// ```
/// use echo_dry_tests::ScriptedDispatcher;
/// use echo_txn::Verdict;
///
/// let dispatcher = ScriptedDispatcher::new()
///     .then(Verdict::cancel())
///     .then_fail("boom");
/// assert_eq!(dispatcher.remaining(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct ScriptedDispatcher {
    script: VecDeque<Result<Verdict, DispatchError>>,
    fallback: Verdict,
    seen: Vec<TransactionEvent>,
}

impl Default for ScriptedDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDispatcher {
    /// Dispatcher that accepts every event.
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            fallback: Verdict::accept(),
            seen: Vec::new(),
        }
    }

    /// Dispatcher that cancels every event.
    pub fn cancelling() -> Self {
        Self::new().otherwise(Verdict::cancel())
    }

    /// Queues `verdict` as the next answer.
    pub fn then(mut self, verdict: Verdict) -> Self {
        self.script.push_back(Ok(verdict));
        self
    }

    /// Queues a listener failure as the next answer.
    pub fn then_fail(mut self, reason: &str) -> Self {
        self.script.push_back(Err(DispatchError::ListenerFailed {
            listener: "scripted".into(),
            reason: reason.into(),
        }));
        self
    }

    /// Answer used once the script is exhausted.
    pub fn otherwise(mut self, verdict: Verdict) -> Self {
        self.fallback = verdict;
        self
    }

    /// Scripted answers not consumed yet.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    /// Events dispatched so far, as listeners received them.
    pub fn seen(&self) -> &[TransactionEvent] {
        &self.seen
    }
}

impl EventDispatcher for ScriptedDispatcher {
    fn dispatch(&mut self, event: &TransactionEvent) -> Result<Verdict, DispatchError> {
        self.seen.push(event.clone());
        self.script
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}
