//! Dual-index subscription tracking
//!
//! Tracking entries live in an arena; two maps index into it, one by
//! request id and one by subscription key. A freshly subscribed id is
//! reachable by id only. Marking it online adds the key index, and when the
//! key is already online the pending entry is coalesced into the existing
//! one so both ids share a single builder. The merge is an explicit index
//! rewrite, which keeps it observable and testable.

use crate::messages::{RequestId, SubscriptionKey};
use crate::normalize::error::NormalizeError;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// One tracked subscription target: reconstruction state for exactly one
/// instrument plus the set of request ids attached to it.
#[derive(Debug)]
pub struct TrackingEntry<B> {
    /// Logical key of the subscription
    pub key: SubscriptionKey,
    /// Reconstruction state shared by every attached subscriber
    pub builder: B,
    /// Attached request ids; never empty for a live entry
    pub subscribers: BTreeSet<RequestId>,
    /// Id representing the entry upstream; settles on the lowest attached
    /// id when the original one leaves
    pub primary: RequestId,
    /// Whether the entry is reachable through the key index
    pub online: bool,
}

impl<B> TrackingEntry<B> {
    fn new(request_id: RequestId, key: SubscriptionKey, builder: B) -> Self {
        let mut subscribers = BTreeSet::new();
        subscribers.insert(request_id);
        Self {
            key,
            builder,
            subscribers,
            primary: request_id,
            online: false,
        }
    }

    /// All attached ids, ascending
    #[must_use]
    pub fn fan_out(&self) -> Vec<RequestId> {
        self.subscribers.iter().copied().collect()
    }
}

/// Outcome of [`TrackerTable::mark_online`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineOutcome {
    /// The id is not tracked here
    NotTracked,
    /// The entry went online under its own key
    Online,
    /// The entry was coalesced into one already online for the same key
    Joined {
        /// Primary id of the surviving entry
        primary: RequestId,
    },
}

/// Outcome of [`TrackerTable::remove`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The id is not tracked here
    NotTracked,
    /// The id was detached; other subscribers keep the entry alive
    Shrunk,
    /// The last subscriber left and the entry was destroyed
    Destroyed,
}

/// Arena of [`TrackingEntry`] values with by-id and by-key indexes.
///
/// Not internally synchronized; the owning engine serializes access.
#[derive(Debug)]
pub struct TrackerTable<B> {
    entries: Vec<Option<TrackingEntry<B>>>,
    free: Vec<usize>,
    by_id: HashMap<RequestId, usize>,
    by_key: HashMap<SubscriptionKey, usize>,
}

impl<B> TrackerTable<B> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            by_id: HashMap::new(),
            by_key: HashMap::new(),
        }
    }

    fn alloc(&mut self, entry: TrackingEntry<B>) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.entries[slot] = Some(entry);
                slot
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        }
    }

    /// Resolve an id to its arena slot. A mapped id whose slot is empty
    /// means the indexes diverged, which is fatal.
    fn slot_of(&self, request_id: RequestId) -> Result<Option<usize>, NormalizeError> {
        let Some(&slot) = self.by_id.get(&request_id) else {
            return Ok(None);
        };
        match self.entries.get(slot) {
            Some(Some(_)) => Ok(Some(slot)),
            _ => Err(NormalizeError::IndexDesync {
                detail: format!("request {request_id} points at a freed slot"),
            }),
        }
    }

    /// Track a new subscription under its request id.
    ///
    /// The entry starts pending: reachable by id, not yet by key.
    ///
    /// # Errors
    ///
    /// `DuplicateRequest` if the id is already tracked.
    pub fn insert(
        &mut self,
        request_id: RequestId,
        key: SubscriptionKey,
        builder: B,
    ) -> Result<(), NormalizeError> {
        if self.by_id.contains_key(&request_id) {
            return Err(NormalizeError::DuplicateRequest { request_id });
        }
        let slot = self.alloc(TrackingEntry::new(request_id, key, builder));
        self.by_id.insert(request_id, slot);
        debug!("Tracking subscription {} (pending)", request_id);
        Ok(())
    }

    /// Move an id's entry into the key index, coalescing with an entry
    /// already online for the same key.
    ///
    /// Unknown ids are a no-op; marking an online entry again is a no-op.
    ///
    /// # Errors
    ///
    /// `IndexDesync` if the indexes no longer agree.
    pub fn mark_online(&mut self, request_id: RequestId) -> Result<OnlineOutcome, NormalizeError> {
        let Some(slot) = self.slot_of(request_id)? else {
            return Ok(OnlineOutcome::NotTracked);
        };
        let (key, already_online) = {
            let Some(entry) = self.entries[slot].as_ref() else {
                return Err(NormalizeError::IndexDesync {
                    detail: format!("request {request_id} points at a freed slot"),
                });
            };
            (entry.key.clone(), entry.online)
        };
        if already_online {
            return Ok(OnlineOutcome::Online);
        }

        match self.by_key.get(&key) {
            Some(&target) if target != slot => {
                // Another entry is already streaming this key; fold the
                // pending entry into it and retire the pending slot.
                let Some(source) = self.entries[slot].take() else {
                    return Err(NormalizeError::IndexDesync {
                        detail: format!("request {request_id} points at a freed slot"),
                    });
                };
                self.free.push(slot);
                let Some(target_entry) = self.entries.get_mut(target).and_then(Option::as_mut)
                else {
                    return Err(NormalizeError::IndexDesync {
                        detail: format!(
                            "key {}/{} points at a freed slot",
                            key.instrument, key.kind
                        ),
                    });
                };
                for id in &source.subscribers {
                    self.by_id.insert(*id, target);
                }
                target_entry.subscribers.extend(source.subscribers.iter().copied());
                info!(
                    "Subscription {} joined to {}",
                    request_id, target_entry.primary
                );
                Ok(OnlineOutcome::Joined {
                    primary: target_entry.primary,
                })
            }
            _ => {
                if let Some(entry) = self.entries[slot].as_mut() {
                    entry.online = true;
                }
                self.by_key.insert(key.clone(), slot);
                debug!(
                    "Subscription {} online for {}/{}",
                    request_id, key.instrument, key.kind
                );
                Ok(OnlineOutcome::Online)
            }
        }
    }

    /// Detach an id; destroys the entry when the last subscriber leaves.
    ///
    /// When the departing id was the entry's primary, the lowest remaining
    /// id takes over so the succession is deterministic.
    ///
    /// # Errors
    ///
    /// `IndexDesync` if the indexes no longer agree.
    pub fn remove(&mut self, request_id: RequestId) -> Result<RemoveOutcome, NormalizeError> {
        let Some(slot) = self.slot_of(request_id)? else {
            return Ok(RemoveOutcome::NotTracked);
        };
        self.by_id.remove(&request_id);

        let destroy = {
            let Some(entry) = self.entries[slot].as_mut() else {
                return Err(NormalizeError::IndexDesync {
                    detail: format!("request {request_id} points at a freed slot"),
                });
            };
            entry.subscribers.remove(&request_id);
            if entry.subscribers.is_empty() {
                true
            } else {
                if entry.primary == request_id
                    && let Some(lowest) = entry.subscribers.first()
                {
                    entry.primary = *lowest;
                    debug!(
                        "Subscription {} left, {} is now primary for {}/{}",
                        request_id, entry.primary, entry.key.instrument, entry.key.kind
                    );
                }
                false
            }
        };

        if destroy {
            let Some(entry) = self.entries[slot].take() else {
                return Err(NormalizeError::IndexDesync {
                    detail: format!("request {request_id} points at a freed slot"),
                });
            };
            self.free.push(slot);
            if entry.online {
                match self.by_key.get(&entry.key) {
                    Some(&mapped) if mapped == slot => {
                        self.by_key.remove(&entry.key);
                    }
                    _ => {
                        return Err(NormalizeError::IndexDesync {
                            detail: format!(
                                "online entry for {}/{} not reachable through the key index",
                                entry.key.instrument, entry.key.kind
                            ),
                        });
                    }
                }
            }
            debug!(
                "Subscription {} removed, entry for {}/{} destroyed",
                request_id, entry.key.instrument, entry.key.kind
            );
            Ok(RemoveOutcome::Destroyed)
        } else {
            Ok(RemoveOutcome::Shrunk)
        }
    }

    /// The entry an id is attached to, if any
    pub fn entry_by_id(
        &self,
        request_id: RequestId,
    ) -> Result<Option<&TrackingEntry<B>>, NormalizeError> {
        match self.slot_of(request_id)? {
            Some(slot) => Ok(self.entries[slot].as_ref()),
            None => Ok(None),
        }
    }

    /// Mutable access to the entry an id is attached to, if any
    pub fn entry_by_id_mut(
        &mut self,
        request_id: RequestId,
    ) -> Result<Option<&mut TrackingEntry<B>>, NormalizeError> {
        match self.slot_of(request_id)? {
            Some(slot) => Ok(self.entries[slot].as_mut()),
            None => Ok(None),
        }
    }

    /// The online entry for a key, if any
    pub fn entry_by_key(
        &self,
        key: &SubscriptionKey,
    ) -> Result<Option<&TrackingEntry<B>>, NormalizeError> {
        let Some(&slot) = self.by_key.get(key) else {
            return Ok(None);
        };
        match self.entries.get(slot) {
            Some(Some(entry)) => Ok(Some(entry)),
            _ => Err(NormalizeError::IndexDesync {
                detail: format!("key {}/{} points at a freed slot", key.instrument, key.kind),
            }),
        }
    }

    /// Mutable access to the online entry for a key, if any
    pub fn entry_by_key_mut(
        &mut self,
        key: &SubscriptionKey,
    ) -> Result<Option<&mut TrackingEntry<B>>, NormalizeError> {
        let Some(&slot) = self.by_key.get(key) else {
            return Ok(None);
        };
        match self.entries.get_mut(slot) {
            Some(Some(_)) => Ok(self.entries[slot].as_mut()),
            _ => Err(NormalizeError::IndexDesync {
                detail: format!("key {}/{} points at a freed slot", key.instrument, key.kind),
            }),
        }
    }

    /// Whether an id is tracked
    #[must_use]
    pub fn contains_id(&self, request_id: RequestId) -> bool {
        self.by_id.contains_key(&request_id)
    }

    /// Number of live entries
    #[must_use]
    pub fn live_entries(&self) -> usize {
        self.entries.iter().filter(|slot| slot.is_some()).count()
    }

    /// Drop every entry and index
    pub fn clear(&mut self) {
        self.entries.clear();
        self.free.clear();
        self.by_id.clear();
        self.by_key.clear();
    }
}

impl<B> Default for TrackerTable<B> {
    fn default() -> Self {
        Self::new()
    }
}
