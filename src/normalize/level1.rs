//! Level1-to-depth synthesis engine
//!
//! Some venues publish no depth at all. This engine rewrites a depth
//! subscription into a level1 subscription on the way down and synthesizes
//! one-level books from the best bid/ask fields on the way up, with
//! mandatory duplicate suppression so unchanged quotes produce no output.

use crate::messages::{
    BookLevel, BookUpdate, DataKind, Level1Field, Level1Update, RequestId, SubscribeCommand,
    SubscriptionKey,
};
use crate::normalize::error::NormalizeError;
use crate::normalize::tracker::TrackerTable;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

const ENGINE: &str = "level1 depth engine";

/// The best bid/ask values last emitted for one instrument.
///
/// Values reflect the most recent emission only; a field absent from an
/// update is absent here too, so the comparison sees exactly what the feed
/// said last time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Quote {
    bid_price: Option<u128>,
    ask_price: Option<u128>,
    bid_volume: Option<u64>,
    ask_volume: Option<u64>,
}

impl Quote {
    fn from_update(update: &Level1Update) -> Self {
        Self {
            bid_price: update
                .get(Level1Field::BestBidPrice)
                .and_then(|v| v.as_price()),
            ask_price: update
                .get(Level1Field::BestAskPrice)
                .and_then(|v| v.as_price()),
            bid_volume: update
                .get(Level1Field::BestBidVolume)
                .and_then(|v| v.as_volume()),
            ask_volume: update
                .get(Level1Field::BestAskVolume)
                .and_then(|v| v.as_volume()),
        }
    }
}

/// Builds one-level books from level1 field updates for one instrument.
#[derive(Debug, Default)]
pub struct Level1Builder {
    last: Quote,
}

impl Level1Builder {
    /// Synthesize a book from an update's best bid/ask fields.
    ///
    /// Returns `None` when the update carries no price on either side, or
    /// when all four values match the last emission. A price without a
    /// volume gets volume zero.
    pub fn build(&mut self, update: &Level1Update) -> Option<BookUpdate> {
        let quote = Quote::from_update(update);
        if quote.bid_price.is_none() && quote.ask_price.is_none() {
            return None;
        }
        if quote == self.last {
            trace!("Unchanged quote for {}, suppressing", update.instrument);
            return None;
        }
        self.last = quote;

        let mut book = BookUpdate::new(update.instrument.clone(), update.server_time);
        if let Some(price) = quote.bid_price {
            book.bids
                .push(BookLevel::new(price, quote.bid_volume.unwrap_or(0)));
        }
        if let Some(price) = quote.ask_price {
            book.asks
                .push(BookLevel::new(price, quote.ask_volume.unwrap_or(0)));
        }
        book.built_from = Some(DataKind::Level1);
        Some(book)
    }
}

/// Result of routing a level1 message through the engine
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessedLevel1 {
    /// The original update, reduced to the ids the builders did not
    /// consume; `None` when every id was replaced by a built book
    pub forward: Option<Level1Update>,
    /// Books synthesized from the update, one per tracking entry
    pub built: Vec<BookUpdate>,
}

#[derive(Debug, Default)]
struct Level1State {
    table: TrackerTable<Level1Builder>,
}

/// Depth synthesis from best bid/ask updates, with subscriber tracking.
///
/// Index and coalesce-on-online semantics match the increment engine; the
/// two share the same tracking table underneath.
#[derive(Debug, Default)]
pub struct Level1DepthEngine {
    inner: Mutex<Level1State>,
}

impl Level1DepthEngine {
    /// Create an engine with no subscriptions
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Level1State>, NormalizeError> {
        self.inner
            .lock()
            .map_err(|_| NormalizeError::MutexPoisoned { engine: ENGINE })
    }

    /// Take ownership of a depth subscription and return the level1
    /// subscription to send downward in its place.
    ///
    /// The original command is never mutated; the rewrite is a clone with
    /// the data kind switched to level1. Returns `Ok(None)` for requests
    /// this engine declines: non-depth kinds, the all-instruments sentinel
    /// and explicit pass-through. Declined requests travel down unchanged.
    ///
    /// # Errors
    ///
    /// `DuplicateRequest` if the id is already tracked.
    pub fn subscribe(
        &self,
        command: &SubscribeCommand,
    ) -> Result<Option<SubscribeCommand>, NormalizeError> {
        if command.kind != DataKind::Depth || command.instrument.is_all() || command.pass_through {
            return Ok(None);
        }
        let mut state = self.lock()?;
        state.table.insert(
            command.request_id,
            command.key(),
            Level1Builder::default(),
        )?;
        debug!(
            "Building depth from level1 for {} (subscription {})",
            command.instrument, command.request_id
        );
        let mut rewritten = command.clone();
        rewritten.kind = DataKind::Level1;
        Ok(Some(rewritten))
    }

    /// Promote a subscription to online, coalescing with an entry already
    /// online for the same instrument. Unknown ids are a no-op.
    pub fn mark_online(&self, request_id: RequestId) -> Result<(), NormalizeError> {
        let mut state = self.lock()?;
        state.table.mark_online(request_id)?;
        Ok(())
    }

    /// Build a book from a field update on behalf of one request id.
    ///
    /// Returns `None` for untracked ids, priceless updates and unchanged
    /// quotes. An emitted book carries the entry's full fan-out set.
    pub fn process_field_update(
        &self,
        request_id: RequestId,
        update: &Level1Update,
    ) -> Result<Option<BookUpdate>, NormalizeError> {
        let mut state = self.lock()?;
        let Some(entry) = state.table.entry_by_id_mut(request_id)? else {
            return Ok(None);
        };
        Ok(entry.builder.build(update).map(|mut book| {
            book.subscription_ids = entry.fan_out();
            book
        }))
    }

    /// Route a whole level1 message: synthesize books for tracked ids,
    /// keep the rest of the ids on the forwarded original.
    ///
    /// Ids whose entry produced a book move onto the book; ids whose entry
    /// suppressed (unchanged quote, no prices) stay on the forwarded
    /// update, as do ids this engine does not track. An update without ids
    /// is matched by instrument against the online index and always
    /// forwarded.
    pub fn process_update(
        &self,
        update: Level1Update,
    ) -> Result<ProcessedLevel1, NormalizeError> {
        let mut state = self.lock()?;

        if update.subscription_ids.is_empty() {
            let key = SubscriptionKey::new(update.instrument.clone(), DataKind::Depth);
            let built = match state.table.entry_by_key_mut(&key)? {
                Some(entry) => entry.builder.build(&update).map(|mut book| {
                    book.subscription_ids = entry.fan_out();
                    book
                }),
                None => None,
            };
            return Ok(ProcessedLevel1 {
                forward: Some(update),
                built: built.into_iter().collect(),
            });
        }

        let mut left: Vec<RequestId> = Vec::new();
        let mut built: Vec<BookUpdate> = Vec::new();
        let mut consumed: BTreeSet<RequestId> = BTreeSet::new();
        let mut declined: BTreeSet<RequestId> = BTreeSet::new();

        for id in &update.subscription_ids {
            if consumed.contains(id) {
                continue;
            }
            if declined.contains(id) {
                left.push(*id);
                continue;
            }
            let Some(entry) = state.table.entry_by_id_mut(*id)? else {
                left.push(*id);
                continue;
            };
            match entry.builder.build(&update) {
                Some(mut book) => {
                    book.subscription_ids = entry.fan_out();
                    consumed.extend(entry.subscribers.iter().copied());
                    built.push(book);
                }
                None => {
                    declined.extend(entry.subscribers.iter().copied());
                    left.push(*id);
                }
            }
        }

        let forward = if left.is_empty() {
            None
        } else {
            let mut residual = update;
            residual.subscription_ids = left;
            Some(residual)
        };
        Ok(ProcessedLevel1 { forward, built })
    }

    /// Drop a subscription from both indexes.
    pub fn unsubscribe(&self, request_id: RequestId) -> Result<(), NormalizeError> {
        let mut state = self.lock()?;
        state.table.remove(request_id)?;
        Ok(())
    }

    /// Drop a subscription that ended through an error response or a
    /// finished notification.
    pub fn remove_on_result(&self, request_id: RequestId) -> Result<(), NormalizeError> {
        debug!("Subscription {} ended, dropping level1 builder", request_id);
        self.unsubscribe(request_id)
    }

    /// Whether an id is tracked by this engine.
    pub fn is_tracking(&self, request_id: RequestId) -> Result<bool, NormalizeError> {
        Ok(self.lock()?.table.contains_id(request_id))
    }

    /// Drop all engine state.
    pub fn reset(&self) -> Result<(), NormalizeError> {
        self.lock()?.table.clear();
        Ok(())
    }
}
