//! Depth truncation and fan-out grouping
//!
//! Remembers which truncation depth each subscriber asked for so one
//! reconstructed book can be sliced differently per subscriber. Grouping by
//! identical depth keeps the slicing work at one pass per distinct depth,
//! which matters for heavily fanned-out all-instruments subscriptions.

use crate::messages::{BookUpdate, RequestId};
use crate::normalize::error::NormalizeError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::trace;

const ENGINE: &str = "depth truncator";

/// Slice the best `depth` levels from each side of a complete book.
///
/// Sides are expected best-first, as the reconstruction engines emit them.
#[must_use]
pub fn truncate(book: &BookUpdate, depth: usize) -> BookUpdate {
    let mut sliced = book.clone();
    sliced.bids.truncate(depth);
    sliced.asks.truncate(depth);
    sliced
}

/// Per-subscriber depth registry.
///
/// Depths live in their own map, independent of book tracking; an id may
/// have a depth without a tracking entry and the other way round.
#[derive(Debug, Default)]
pub struct DepthTruncator {
    inner: Mutex<HashMap<RequestId, usize>>,
}

impl DepthTruncator {
    /// Create a registry with no depths
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<RequestId, usize>>, NormalizeError> {
        self.inner
            .lock()
            .map_err(|_| NormalizeError::MutexPoisoned { engine: ENGINE })
    }

    /// Remember the depth a subscriber asked for.
    ///
    /// # Errors
    ///
    /// `InvalidDepth` for a zero depth; "no levels" is not a subscription.
    pub fn set_depth(&self, request_id: RequestId, depth: usize) -> Result<(), NormalizeError> {
        if depth == 0 {
            return Err(NormalizeError::InvalidDepth { request_id });
        }
        self.lock()?.insert(request_id, depth);
        Ok(())
    }

    /// Forget a subscriber's depth; it falls back to full books.
    pub fn clear_depth(&self, request_id: RequestId) -> Result<(), NormalizeError> {
        self.lock()?.remove(&request_id);
        Ok(())
    }

    /// The depth a subscriber asked for; `None` means full depth.
    pub fn get_depth(&self, request_id: RequestId) -> Result<Option<usize>, NormalizeError> {
        Ok(self.lock()?.get(&request_id).copied())
    }

    /// Partition ids by identical requested depth, `None` meaning full
    /// depth. Groups come out in order of first appearance.
    pub fn group_by_depth(
        &self,
        request_ids: &[RequestId],
    ) -> Result<Vec<(Option<usize>, Vec<RequestId>)>, NormalizeError> {
        let depths = self.lock()?;
        let mut groups: Vec<(Option<usize>, Vec<RequestId>)> = Vec::new();
        for id in request_ids {
            let depth = depths.get(id).copied();
            match groups.iter_mut().find(|(d, _)| *d == depth) {
                Some((_, ids)) => ids.push(*id),
                None => groups.push((depth, vec![*id])),
            }
        }
        Ok(groups)
    }

    /// Emit one copy of a complete book per distinct depth among its ids.
    ///
    /// The full-depth group keeps the original levels; every other group
    /// gets a single truncated copy shared by its ids. A book without ids
    /// passes through untouched.
    pub fn process_book(&self, book: BookUpdate) -> Result<Vec<BookUpdate>, NormalizeError> {
        if book.subscription_ids.is_empty() {
            return Ok(vec![book]);
        }
        let groups = self.group_by_depth(&book.subscription_ids)?;
        if groups.len() == 1 && groups[0].0.is_none() {
            return Ok(vec![book]);
        }
        trace!(
            "Slicing book for {} into {} depth groups",
            book.instrument,
            groups.len()
        );
        let mut out = Vec::with_capacity(groups.len());
        for (depth, ids) in groups {
            let mut copy = match depth {
                Some(depth) => truncate(&book, depth),
                None => book.clone(),
            };
            copy.subscription_ids = ids;
            out.push(copy);
        }
        Ok(out)
    }

    /// Drop every remembered depth.
    pub fn reset(&self) -> Result<(), NormalizeError> {
        self.lock()?.clear();
        Ok(())
    }
}
