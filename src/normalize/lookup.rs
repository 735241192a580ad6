//! Timeout-driven lookup scheduling
//!
//! Reference-data lookups are slow and some venues answer them one at a
//! time. The scheduler serializes same-kind lookups through a FIFO so at
//! most one is in flight, and counts each armed lookup down against an
//! externally driven clock. There is no timer thread; the surrounding
//! adapter calls [`LookupScheduler::tick`] with elapsed time.

use crate::messages::{LookupKind, LookupRequest, RequestId};
use crate::normalize::error::NormalizeError;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, trace};

const ENGINE: &str = "lookup scheduler";

/// A lookup that ran out of time, paired with its successor
#[derive(Debug, Clone, PartialEq)]
pub struct TimedOutLookup {
    /// The request that timed out; already removed from tracking
    pub request: LookupRequest,
    /// The next queued request of the same kind, now clear to send
    pub next: Option<LookupRequest>,
}

#[derive(Debug)]
struct LookupEntry {
    request: LookupRequest,
    /// Remaining time in signed milliseconds. Signed so a subtraction that
    /// cannot be represented surfaces as an overflow instead of wrapping.
    left_ms: i64,
    /// The configured timeout, restored by `extend_timeout`
    timeout_ms: i64,
}

#[derive(Debug, Default)]
struct SchedulerState {
    /// Armed countdowns by id; ordered map keeps tick output deterministic
    armed: BTreeMap<RequestId, LookupEntry>,
    /// Per-kind FIFO; the head is the in-flight lookup, the rest wait
    queues: HashMap<LookupKind, VecDeque<LookupRequest>>,
}

/// Lookup timeout tracking and per-kind serialization.
///
/// Arming and queueing are separate concerns on purpose: a lookup is
/// queued when the caller wants to send it and armed (`add`) only once it
/// is actually sent, so waiting lookups cannot time out before they start.
#[derive(Debug, Default)]
pub struct LookupScheduler {
    inner: Mutex<SchedulerState>,
}

impl LookupScheduler {
    /// Create a scheduler with nothing armed or queued
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SchedulerState>, NormalizeError> {
        self.inner
            .lock()
            .map_err(|_| NormalizeError::MutexPoisoned { engine: ENGINE })
    }

    /// Arm a timeout for a lookup that was just sent.
    ///
    /// # Errors
    ///
    /// `InvalidTimeout` for a zero timeout or one that does not fit
    /// millisecond ticks; `DuplicateRequest` if the id is already armed.
    pub fn add(&self, request: LookupRequest, timeout: Duration) -> Result<(), NormalizeError> {
        let request_id = request.request_id;
        let timeout_ms = match i64::try_from(timeout.as_millis()) {
            Ok(ms) if ms > 0 => ms,
            _ => {
                return Err(NormalizeError::InvalidTimeout {
                    request_id,
                    timeout,
                });
            }
        };
        let mut state = self.lock()?;
        if state.armed.contains_key(&request_id) {
            return Err(NormalizeError::DuplicateRequest { request_id });
        }
        debug!(
            "Armed {} lookup {} with {}ms timeout",
            request.kind, request_id, timeout_ms
        );
        state.armed.insert(
            request_id,
            LookupEntry {
                request,
                left_ms: timeout_ms,
                timeout_ms,
            },
        );
        Ok(())
    }

    /// Count armed lookups down by `elapsed` and collect the ones that ran
    /// out, each paired with the next queued lookup of its kind.
    ///
    /// Ids in `ignore` just produced data in this pass and are skipped
    /// entirely. A zero `elapsed` is a no-op.
    ///
    /// # Errors
    ///
    /// `TimeoutOverflow` when a countdown cannot be decremented without
    /// wrapping, which means the stored value is corrupt.
    pub fn tick(
        &self,
        elapsed: Duration,
        ignore: &[RequestId],
    ) -> Result<Vec<TimedOutLookup>, NormalizeError> {
        if elapsed.is_zero() {
            return Ok(Vec::new());
        }
        let elapsed_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);

        let mut state = self.lock()?;
        let state = &mut *state;
        let mut expired: Vec<RequestId> = Vec::new();
        for (id, entry) in state.armed.iter_mut() {
            if ignore.contains(id) {
                continue;
            }
            entry.left_ms = entry
                .left_ms
                .checked_sub(elapsed_ms)
                .ok_or(NormalizeError::TimeoutOverflow { request_id: *id })?;
            if entry.left_ms <= 0 {
                expired.push(*id);
            }
        }

        let mut out = Vec::with_capacity(expired.len());
        for id in expired {
            let Some(entry) = state.armed.remove(&id) else {
                continue;
            };
            info!(
                "{} lookup {} timed out after {}ms",
                entry.request.kind, id, entry.timeout_ms
            );
            let next = advance_queue(&mut state.queues, entry.request.kind, id);
            out.push(TimedOutLookup {
                request: entry.request,
                next,
            });
        }
        Ok(out)
    }

    /// Reset the countdowns of the given ids back to their configured
    /// timeouts. Used when partial data keeps arriving for a slow lookup.
    /// Unknown ids are skipped.
    pub fn extend_timeout(&self, request_ids: &[RequestId]) -> Result<(), NormalizeError> {
        let mut state = self.lock()?;
        for id in request_ids {
            if let Some(entry) = state.armed.get_mut(id) {
                entry.left_ms = entry.timeout_ms;
                trace!("Extended lookup {} back to {}ms", id, entry.timeout_ms);
            }
        }
        Ok(())
    }

    /// Queue a lookup behind any in-flight lookup of the same kind.
    ///
    /// Returns `false` when the kind was idle, meaning the caller sends
    /// the request now; `true` when it went behind an in-flight one.
    pub fn enqueue(&self, request: LookupRequest) -> Result<bool, NormalizeError> {
        let mut state = self.lock()?;
        let queue = state.queues.entry(request.kind).or_default();
        let busy = !queue.is_empty();
        if busy {
            debug!(
                "{} lookup {} queued behind {} outstanding",
                request.kind,
                request.request_id,
                queue.len()
            );
        }
        queue.push_back(request);
        Ok(busy)
    }

    /// Retire a completed lookup and return the next one of its kind to
    /// send, or `None` when the queue emptied (the kind entry is dropped).
    ///
    /// The returned request stays at the head of its queue as the new
    /// in-flight lookup; the caller sends it and arms its timeout.
    pub fn dequeue_next(
        &self,
        kind: LookupKind,
        completed_id: RequestId,
    ) -> Result<Option<LookupRequest>, NormalizeError> {
        let mut state = self.lock()?;
        let next = advance_queue(&mut state.queues, kind, completed_id);
        if let Some(request) = &next {
            debug!("{} lookup {} is next in line", kind, request.request_id);
        }
        Ok(next)
    }

    /// Remaining time for an armed lookup, if the id is armed.
    pub fn remaining(&self, request_id: RequestId) -> Result<Option<Duration>, NormalizeError> {
        let state = self.lock()?;
        Ok(state
            .armed
            .get(&request_id)
            .map(|entry| Duration::from_millis(entry.left_ms.max(0) as u64)))
    }

    /// Disarm a lookup without timing it out, e.g. when its final result
    /// arrived. The per-kind queue is advanced separately via
    /// [`LookupScheduler::dequeue_next`].
    pub fn complete(&self, request_id: RequestId) -> Result<Option<LookupRequest>, NormalizeError> {
        let mut state = self.lock()?;
        Ok(state.armed.remove(&request_id).map(|entry| entry.request))
    }

    /// Drop every armed countdown and queue.
    pub fn reset(&self) -> Result<(), NormalizeError> {
        let mut state = self.lock()?;
        state.armed.clear();
        state.queues.clear();
        Ok(())
    }
}

/// Remove `completed_id` from its kind's queue and return the new head.
fn advance_queue(
    queues: &mut HashMap<LookupKind, VecDeque<LookupRequest>>,
    kind: LookupKind,
    completed_id: RequestId,
) -> Option<LookupRequest> {
    let queue = queues.get_mut(&kind)?;
    if let Some(position) = queue
        .iter()
        .position(|request| request.request_id == completed_id)
    {
        queue.remove(position);
    }
    let next = queue.front().cloned();
    if queue.is_empty() {
        queues.remove(&kind);
    }
    next
}
