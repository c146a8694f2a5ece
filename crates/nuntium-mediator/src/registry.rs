//! The in-memory transaction registry.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use nuntium_storage::Store;
use nuntium_types::MessageUuid;

/// Maps a non-empty operator Transaction-Id to the one live UUID
/// whose outcome the user currently sees for that transaction.
///
/// Operators re-push the same Transaction-Id on a retry cadence; this
/// map is what coalesces those pushes onto a single user-visible
/// artifact. Only the mediator loop and its handlers touch it; a
/// single mutex with short critical sections guards the map.
#[derive(Default)]
pub struct TransactionRegistry {
    inner: Mutex<HashMap<String, MessageUuid>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MessageUuid>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The UUID currently representing `transaction_id`, if any.
    pub fn get(&self, transaction_id: &str) -> Option<MessageUuid> {
        if transaction_id.is_empty() {
            return None;
        }
        self.lock().get(transaction_id).copied()
    }

    /// Applies the arrival rule for a fresh notification.
    ///
    /// Inserts `uuid` when the transaction is unknown. When the
    /// transaction is known but its pointed record no longer exists
    /// in the store (the user triggered a redownload and the old
    /// record was destroyed), the pointer is replaced. Otherwise the
    /// existing pointer wins.
    pub fn insert_or_adopt(&self, transaction_id: &str, uuid: MessageUuid, store: &Store) {
        if transaction_id.is_empty() {
            return;
        }
        let mut map = self.lock();
        match map.get(transaction_id).copied() {
            None => {
                map.insert(transaction_id.to_string(), uuid);
            }
            Some(current) => {
                if store.get_mms_state(current).is_err() {
                    map.insert(transaction_id.to_string(), uuid);
                }
            }
        }
    }

    /// Forces the pointer for `transaction_id` to `uuid`.
    pub fn point_at(&self, transaction_id: &str, uuid: MessageUuid) {
        if transaction_id.is_empty() {
            return;
        }
        self.lock().insert(transaction_id.to_string(), uuid);
    }

    /// Drops the entry for `transaction_id`.
    pub fn remove(&self, transaction_id: &str) {
        if transaction_id.is_empty() {
            return;
        }
        self.lock().remove(transaction_id);
    }

    /// Whether any entry exists for `transaction_id`.
    pub fn contains(&self, transaction_id: &str) -> bool {
        self.get(transaction_id).is_some()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
