//! Incremental order book reconstruction engine
//!
//! Folds per-instrument book fragments into complete books and fans the
//! result out to every interested subscriber, including all-instruments
//! subscribers and pass-through subscribers who want the raw fragments.

use crate::messages::{BookUpdate, RequestId, SubscribeCommand};
use crate::normalize::book_builder::BookBuilder;
use crate::normalize::error::NormalizeError;
use crate::normalize::tracker::TrackerTable;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

const ENGINE: &str = "book increment engine";

/// Result of applying one fragment for one request id
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// No tracking entry owns this id; the caller forwards the message raw
    Untracked,
    /// The update is already a complete book; the caller forwards it raw
    AlreadyFull,
    /// The fragment was absorbed; nothing to deliver yet
    Absorbed,
    /// A complete book was produced for the fan-out set.
    ///
    /// The same set is stamped on the book's `subscription_ids`.
    Built {
        /// The reconstructed book
        book: BookUpdate,
        /// Every id the book must be delivered to
        fan_out: Vec<RequestId>,
    },
}

/// Result of routing a whole book message through the engine
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessedBook {
    /// The original message, reduced to the ids that want it raw;
    /// `None` when reconstruction consumed every id
    pub forward: Option<BookUpdate>,
    /// Complete books produced by reconstruction, one per tracking entry
    pub built: Vec<BookUpdate>,
}

#[derive(Debug, Default)]
struct IncrementState {
    table: TrackerTable<BookBuilder>,
    /// Ids receiving every built book regardless of instrument
    all_instruments: BTreeSet<RequestId>,
    /// Ids that want raw fragments for their own instrument
    pass_through: BTreeSet<RequestId>,
    /// Ids that want raw fragments for every instrument
    all_pass_through: BTreeSet<RequestId>,
}

impl IncrementState {
    fn is_known(&self, request_id: RequestId) -> bool {
        self.table.contains_id(request_id)
            || self.all_instruments.contains(&request_id)
            || self.pass_through.contains(&request_id)
            || self.all_pass_through.contains(&request_id)
    }
}

/// Order book reconstruction with subscriber tracking.
///
/// One instance serves one connection. Methods take `&self` and may be
/// called concurrently from the inbound and outbound lanes; a single
/// internal lock serializes them.
///
/// # Thread Safety
///
/// All state lives behind one `Mutex`. No method performs I/O or blocks
/// beyond that lock.
#[derive(Debug, Default)]
pub struct BookIncrementEngine {
    inner: Mutex<IncrementState>,
}

impl BookIncrementEngine {
    /// Create an engine with no subscriptions
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, IncrementState>, NormalizeError> {
        self.inner
            .lock()
            .map_err(|_| NormalizeError::MutexPoisoned { engine: ENGINE })
    }

    /// Register a subscription.
    ///
    /// Pass-through requests and all-instruments requests go into their own
    /// sets; everything else gets a tracking entry with a fresh builder.
    ///
    /// # Errors
    ///
    /// `DuplicateRequest` if the id is already registered anywhere in the
    /// engine.
    pub fn subscribe(&self, command: &SubscribeCommand) -> Result<(), NormalizeError> {
        let mut state = self.lock()?;
        if state.is_known(command.request_id) {
            return Err(NormalizeError::DuplicateRequest {
                request_id: command.request_id,
            });
        }
        match (command.pass_through, command.instrument.is_all()) {
            (true, true) => {
                state.all_pass_through.insert(command.request_id);
                debug!(
                    "Subscription {} wants raw fragments for all instruments",
                    command.request_id
                );
            }
            (true, false) => {
                state.pass_through.insert(command.request_id);
                debug!(
                    "Subscription {} wants raw fragments for {}",
                    command.request_id, command.instrument
                );
            }
            (false, true) => {
                state.all_instruments.insert(command.request_id);
                debug!(
                    "Subscription {} receives every built book",
                    command.request_id
                );
            }
            (false, false) => {
                let builder = BookBuilder::new(command.instrument.clone());
                state
                    .table
                    .insert(command.request_id, command.key(), builder)?;
            }
        }
        Ok(())
    }

    /// Promote a subscription to online, coalescing with an entry already
    /// online for the same instrument and kind.
    ///
    /// Unknown ids are a no-op; other stages may own them.
    pub fn mark_online(&self, request_id: RequestId) -> Result<(), NormalizeError> {
        let mut state = self.lock()?;
        state.table.mark_online(request_id)?;
        Ok(())
    }

    /// Apply one fragment on behalf of one request id.
    ///
    /// Returns [`ApplyOutcome::Untracked`] when the id has no tracking
    /// entry, which the caller treats as "forward unmodified".
    pub fn apply_increment(
        &self,
        request_id: RequestId,
        diff: &BookUpdate,
    ) -> Result<ApplyOutcome, NormalizeError> {
        let mut state = self.lock()?;
        let extra: Vec<RequestId> = state.all_instruments.iter().copied().collect();
        let Some(entry) = state.table.entry_by_id_mut(request_id)? else {
            return Ok(ApplyOutcome::Untracked);
        };
        if diff.is_full() {
            return Ok(ApplyOutcome::AlreadyFull);
        }
        match entry.builder.apply(diff) {
            None => Ok(ApplyOutcome::Absorbed),
            Some(mut book) => {
                let mut fan_out = entry.fan_out();
                fan_out.extend(extra);
                book.subscription_ids = fan_out.clone();
                trace!(
                    "Built book for {} with {} bids / {} asks, fan-out {:?}",
                    book.instrument,
                    book.bids.len(),
                    book.asks.len(),
                    fan_out
                );
                Ok(ApplyOutcome::Built { book, fan_out })
            }
        }
    }

    /// Route a whole book message: raw copies to pass-through and unknown
    /// ids, reconstruction for tracked ids.
    ///
    /// The original message is suppressed (`forward: None`) only when every
    /// id on it was consumed by reconstruction.
    pub fn process_book(&self, update: BookUpdate) -> Result<ProcessedBook, NormalizeError> {
        let mut state = self.lock()?;

        if update.subscription_ids.is_empty() || update.is_full() {
            // Nothing to reconstruct: full books and unrouted messages
            // travel unchanged.
            return Ok(ProcessedBook {
                forward: Some(update),
                built: Vec::new(),
            });
        }

        let extra: Vec<RequestId> = state.all_instruments.iter().copied().collect();
        let mut raw_ids: Vec<RequestId> = Vec::new();
        let mut built: Vec<BookUpdate> = Vec::new();
        let mut consumed: BTreeSet<RequestId> = BTreeSet::new();

        for id in &update.subscription_ids {
            if consumed.contains(id) {
                continue;
            }
            let Some(entry) = state.table.entry_by_id_mut(*id)? else {
                raw_ids.push(*id);
                continue;
            };
            consumed.extend(entry.subscribers.iter().copied());
            if let Some(mut book) = entry.builder.apply(&update) {
                let mut fan_out = entry.fan_out();
                fan_out.extend(extra.iter().copied());
                book.subscription_ids = fan_out;
                built.push(book);
            }
        }

        // All-instrument pass-through subscribers get every raw fragment,
        // listed on the message or not.
        for id in &state.all_pass_through {
            if !raw_ids.contains(id) {
                raw_ids.push(*id);
            }
        }

        let forward = if raw_ids.is_empty() {
            None
        } else {
            let mut raw = update;
            raw.subscription_ids = raw_ids;
            Some(raw)
        };
        Ok(ProcessedBook { forward, built })
    }

    /// Drop a subscription from every index and set.
    pub fn unsubscribe(&self, request_id: RequestId) -> Result<(), NormalizeError> {
        let mut state = self.lock()?;
        state.table.remove(request_id)?;
        state.all_instruments.remove(&request_id);
        state.pass_through.remove(&request_id);
        state.all_pass_through.remove(&request_id);
        Ok(())
    }

    /// Drop a subscription that ended through an error response or a
    /// finished notification.
    pub fn remove_on_result(&self, request_id: RequestId) -> Result<(), NormalizeError> {
        debug!("Subscription {} ended, dropping tracking", request_id);
        self.unsubscribe(request_id)
    }

    /// Drop all engine state.
    pub fn reset(&self) -> Result<(), NormalizeError> {
        let mut state = self.lock()?;
        state.table.clear();
        state.all_instruments.clear();
        state.pass_through.clear();
        state.all_pass_through.clear();
        Ok(())
    }

    /// Ids registered as pass-through for this instrument or for all
    /// instruments; the shell forwards raw fragments to these without
    /// calling [`BookIncrementEngine::apply_increment`].
    pub fn pass_through_ids(&self) -> Result<Vec<RequestId>, NormalizeError> {
        let state = self.lock()?;
        let mut ids: Vec<RequestId> = state.pass_through.iter().copied().collect();
        ids.extend(state.all_pass_through.iter().copied());
        Ok(ids)
    }

    /// Whether an id is registered anywhere in this engine.
    pub fn is_tracking(&self, request_id: RequestId) -> Result<bool, NormalizeError> {
        Ok(self.lock()?.is_known(request_id))
    }
}
