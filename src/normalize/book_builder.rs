//! Incremental order book accumulation
//!
//! One [`BookBuilder`] holds the working book of a single instrument and
//! folds incremental fragments into it. The builder is plain data with no
//! locking; the owning engine serializes access.

use crate::messages::{BookLevel, BookState, BookUpdate, InstrumentId};
use std::collections::BTreeMap;
use tracing::warn;

/// Accumulates incremental book fragments into complete books.
///
/// Fragments follow a four-phase protocol: `SnapshotStarted` discards prior
/// state and opens a new snapshot, `SnapshotBuilding` continues it,
/// `SnapshotComplete` closes it and emits the assembled book, and
/// `Increment` mutates the last complete book and emits. An `Increment`
/// arriving before any snapshot completed is dropped with a warning, since
/// a diff without a base would produce a phantom book.
#[derive(Debug)]
pub struct BookBuilder {
    instrument: InstrumentId,
    /// Bid volumes keyed by price; iterated in reverse for best-first order
    bids: BTreeMap<u128, u64>,
    asks: BTreeMap<u128, u64>,
    has_snapshot: bool,
}

impl BookBuilder {
    /// Create an empty builder for one instrument
    pub fn new(instrument: InstrumentId) -> Self {
        Self {
            instrument,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            has_snapshot: false,
        }
    }

    /// The instrument this builder accumulates
    #[must_use]
    pub fn instrument(&self) -> &InstrumentId {
        &self.instrument
    }

    /// Returns `true` once a complete snapshot has been assembled
    #[must_use]
    #[inline]
    pub fn has_snapshot(&self) -> bool {
        self.has_snapshot
    }

    /// Fold one fragment into the working book.
    ///
    /// Returns the assembled complete book when the fragment closes a
    /// snapshot or applies a valid increment; `None` while a snapshot is
    /// still being collected, for a pre-snapshot increment, and for a
    /// fragment that is already a complete book (nothing to reconstruct).
    pub fn apply(&mut self, diff: &BookUpdate) -> Option<BookUpdate> {
        match diff.state {
            None => None,
            Some(BookState::SnapshotStarted) => {
                self.bids.clear();
                self.asks.clear();
                self.has_snapshot = false;
                self.merge(diff);
                None
            }
            Some(BookState::SnapshotBuilding) => {
                self.merge(diff);
                None
            }
            Some(BookState::SnapshotComplete) => {
                self.merge(diff);
                self.has_snapshot = true;
                Some(self.assemble(diff.server_time))
            }
            Some(BookState::Increment) => {
                if !self.has_snapshot {
                    warn!(
                        "Dropping increment for {}: no snapshot assembled yet",
                        self.instrument
                    );
                    return None;
                }
                self.merge(diff);
                Some(self.assemble(diff.server_time))
            }
        }
    }

    /// Upsert/delete the fragment's levels into the working sides.
    ///
    /// Zero volume deletes the price, nonzero volume replaces it.
    fn merge(&mut self, diff: &BookUpdate) {
        for level in &diff.bids {
            if level.volume == 0 {
                self.bids.remove(&level.price);
            } else {
                self.bids.insert(level.price, level.volume);
            }
        }
        for level in &diff.asks {
            if level.volume == 0 {
                self.asks.remove(&level.price);
            } else {
                self.asks.insert(level.price, level.volume);
            }
        }
    }

    /// Materialize the working book as a complete update, best levels first
    fn assemble(&self, server_time: u64) -> BookUpdate {
        BookUpdate {
            instrument: self.instrument.clone(),
            server_time,
            bids: self
                .bids
                .iter()
                .rev()
                .map(|(price, volume)| BookLevel::new(*price, *volume))
                .collect(),
            asks: self
                .asks
                .iter()
                .map(|(price, volume)| BookLevel::new(*price, *volume))
                .collect(),
            state: None,
            built_from: None,
            subscription_ids: Vec::new(),
        }
    }
}
