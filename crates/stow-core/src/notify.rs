//! # Change Notifications
//!
//! Every committed write scope produces a [`ChangeSet`] describing which
//! records were inserted, modified and deleted. Observers registered on a
//! session receive it after the commit, strictly in commit order.
//!
//! Observers are held until their [`NotificationToken`] is stopped or
//! dropped. Delivery copies the registered callbacks out of the registry
//! before calling them, so a callback may stop its own token or register
//! further observers. An observer added during delivery first hears about
//! the next change set.

use crate::RecordId;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, TryLockError, Weak};

// =============================================================================
// CHANGE SET
// =============================================================================

/// Net effect of one committed write scope, keyed by record id.
///
/// A record inserted and deleted inside the same scope does not appear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub inserted: BTreeMap<RecordId, String>,
    pub modified: BTreeMap<RecordId, String>,
    pub deleted: BTreeMap<RecordId, String>,
}

/// Changes of a single record type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeChanges {
    pub inserted: Vec<RecordId>,
    pub modified: Vec<RecordId>,
    pub deleted: Vec<RecordId>,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub(crate) fn record_insert(&mut self, id: RecordId, record_type: &str) {
        self.inserted.insert(id, record_type.to_string());
    }

    pub(crate) fn record_modify(&mut self, id: RecordId, record_type: &str) {
        if !self.inserted.contains_key(&id) {
            self.modified.insert(id, record_type.to_string());
        }
    }

    pub(crate) fn record_delete(&mut self, id: RecordId, record_type: &str) {
        if self.inserted.remove(&id).is_none() {
            self.modified.remove(&id);
            self.deleted.insert(id, record_type.to_string());
        }
    }

    /// Every record type touched by this change set.
    #[must_use]
    pub fn types(&self) -> BTreeSet<&str> {
        self.inserted
            .values()
            .chain(self.modified.values())
            .chain(self.deleted.values())
            .map(String::as_str)
            .collect()
    }

    /// Changes restricted to one record type.
    #[must_use]
    pub fn for_type(&self, record_type: &str) -> TypeChanges {
        let pick = |map: &BTreeMap<RecordId, String>| {
            map.iter()
                .filter(|(_, t)| t.as_str() == record_type)
                .map(|(id, _)| *id)
                .collect()
        };
        TypeChanges {
            inserted: pick(&self.inserted),
            modified: pick(&self.modified),
            deleted: pick(&self.deleted),
        }
    }
}

// =============================================================================
// OBSERVERS
// =============================================================================

type Callback = Arc<Mutex<dyn FnMut(&ChangeSet) + Send>>;

#[derive(Default)]
struct Registry {
    next_token: u64,
    callbacks: BTreeMap<u64, Callback>,
}

impl Registry {
    fn is_registered(registry: &Mutex<Self>, id: u64) -> bool {
        registry
            .lock()
            .map(|r| r.callbacks.contains_key(&id))
            .unwrap_or(false)
    }
}

/// Observers attached to a session.
#[derive(Clone, Default)]
pub struct Observers {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .registry
            .lock()
            .map(|r| r.callbacks.len())
            .unwrap_or_default();
        f.debug_struct("Observers").field("count", &count).finish()
    }
}

impl Observers {
    /// Register a callback. It stays registered while the token is alive.
    #[must_use = "dropping the token unregisters the observer"]
    pub fn add(&self, callback: impl FnMut(&ChangeSet) + Send + 'static) -> NotificationToken {
        let mut registry = self
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let id = registry.next_token;
        registry.next_token = registry.next_token.saturating_add(1);
        registry
            .callbacks
            .insert(id, Arc::new(Mutex::new(callback)));
        NotificationToken {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver a change set to every observer in registration order.
    ///
    /// An observer stopped by an earlier callback of the same delivery is
    /// skipped. A callback that is already running further up the stack is
    /// not re-entered.
    pub fn notify(&self, changes: &ChangeSet) {
        if changes.is_empty() {
            return;
        }
        let snapshot: Vec<(u64, Callback)> = {
            let registry = self
                .registry
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            registry
                .callbacks
                .iter()
                .map(|(id, callback)| (*id, Arc::clone(callback)))
                .collect()
        };
        for (id, callback) in snapshot {
            if !Registry::is_registered(&self.registry, id) {
                continue;
            }
            let mut callback = match callback.try_lock() {
                Ok(callback) => callback,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    tracing::debug!(observer = id, "skipping re-entrant notification");
                    continue;
                }
            };
            (&mut *callback)(changes);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registry
            .lock()
            .map(|r| r.callbacks.len())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle keeping an observer registered.
#[derive(Debug)]
pub struct NotificationToken {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl NotificationToken {
    /// Unregister the observer. Idempotent, and safe to call from inside
    /// the observer's own callback.
    pub fn stop(&self) {
        if let Some(registry) = self.registry.upgrade() {
            let removed = registry
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .callbacks
                .remove(&self.id);
            // Dropped outside the registry lock; it may own further tokens.
            drop(removed);
        }
    }
}

impl Drop for NotificationToken {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// TESTS
// =============================================================================
