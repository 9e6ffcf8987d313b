//! Read-and-subscribe merge
//!
//! Combines a historical read and a live subscription that run concurrently
//! into one ordered, gap-free, duplicate-free callback sequence.
//!
//! ## Phases
//! ```text
//!            live push                     history completes
//!   ┌───────────┐ ───────► queue   ┌──────────┐            ┌───────────┐
//!   │ Buffering │ ────────────────►│ Draining │ ──────────►│ Streaming │
//!   └───────────┘                  └──────────┘            └───────────┘
//!        │ history fails           history, then queued      live push
//!        ▼                         events > last history     ──► callback
//!   ┌────────┐
//!   │ Failed │  live pushes discarded
//!   └────────┘
//! ```
//!
//! Draining happens inside [`CatchUpMerge::on_history`] and is never
//! observable from outside.

/// Externally visible phase of a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePhase {
    Buffering,
    Streaming,
    Failed,
}

enum MergeState<T> {
    Buffering(Vec<T>),
    Streaming,
    Failed,
}

/// Anything ordered by a stream position
pub trait Sequenced {
    fn sequence_number(&self) -> i64;
}

impl Sequenced for crate::protocol::RecordedEvent {
    fn sequence_number(&self) -> i64 {
        self.event_number as i64
    }
}

/// State machine merging history with live pushes
///
/// Both inputs must be driven from the same thread (the connection's reader
/// thread), which keeps live events in arrival order.
pub struct CatchUpMerge<T, E, F>
where
    F: FnMut(Result<T, E>),
{
    state: MergeState<Result<T, E>>,
    callback: F,
}

impl<T, E, F> CatchUpMerge<T, E, F>
where
    T: Sequenced,
    F: FnMut(Result<T, E>),
{
    pub fn new(callback: F) -> Self {
        Self {
            state: MergeState::Buffering(Vec::new()),
            callback,
        }
    }

    pub fn phase(&self) -> MergePhase {
        match self.state {
            MergeState::Buffering(_) => MergePhase::Buffering,
            MergeState::Streaming => MergePhase::Streaming,
            MergeState::Failed => MergePhase::Failed,
        }
    }

    /// Number of live items waiting for history to finish
    pub fn queued(&self) -> usize {
        match &self.state {
            MergeState::Buffering(queue) => queue.len(),
            _ => 0,
        }
    }

    /// One live push from the subscription
    pub fn on_live(&mut self, item: Result<T, E>) {
        match &mut self.state {
            MergeState::Buffering(queue) => queue.push(item),
            MergeState::Streaming => (self.callback)(item),
            MergeState::Failed => {}
        }
    }

    /// Completion of the historical read; only the first call has effect
    pub fn on_history(&mut self, history: Result<Vec<T>, E>) {
        let queue = match std::mem::replace(&mut self.state, MergeState::Failed) {
            MergeState::Buffering(queue) => queue,
            other => {
                tracing::warn!("Historical read completed twice; ignoring");
                self.state = other;
                return;
            }
        };

        let events = match history {
            Ok(events) => events,
            Err(e) => {
                (self.callback)(Err(e));
                return;
            }
        };

        // Draining
        let last_historical = events.last().map(|e| e.sequence_number()).unwrap_or(-1);
        for event in events {
            (self.callback)(Ok(event));
        }

        let mut discarded = 0usize;
        for item in queue {
            match item {
                Ok(event) if event.sequence_number() <= last_historical => discarded += 1,
                other => (self.callback)(other),
            }
        }
        if discarded > 0 {
            tracing::trace!(
                "Discarded {} live events already covered by history (last: {})",
                discarded,
                last_historical
            );
        }

        self.state = MergeState::Streaming;
    }
}
