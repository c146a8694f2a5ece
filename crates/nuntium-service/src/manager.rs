//! Facade registration across SIM lifecycle events.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use nuntium_storage::Store;
use nuntium_types::adapters::{AccountsService, MessageBus};
use nuntium_types::pdu::MNotificationInd;
use nuntium_types::{BusPath, NuntiumError, Result, TransactionState};

use crate::service::{MmsService, OutgoingRequest, ServiceHandle};

struct ServiceEntry {
    handle: ServiceHandle,
    watchers: Vec<JoinHandle<()>>,
}

/// Owns one facade per registered account identity.
///
/// `add_service` spawns the delete and redownload watcher tasks next
/// to the facade; `remove_service` closes the facade and stops them.
pub struct ServiceManager {
    bus: Arc<dyn MessageBus>,
    store: Arc<Store>,
    accounts: Arc<dyn AccountsService>,
    use_delivery_reports: bool,
    services: HashMap<String, ServiceEntry>,
}

impl ServiceManager {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        store: Arc<Store>,
        accounts: Arc<dyn AccountsService>,
        use_delivery_reports: bool,
    ) -> Self {
        Self {
            bus,
            store,
            accounts,
            use_delivery_reports,
            services: HashMap::new(),
        }
    }

    /// Registers a facade for `identity`.
    ///
    /// `outgoing_tx` receives `SendMessage` submissions and
    /// `notification_tx` receives the synthesized notifications of
    /// user redownloads.
    pub fn add_service(
        &mut self,
        identity: &str,
        modem_path: BusPath,
        outgoing_tx: mpsc::UnboundedSender<OutgoingRequest>,
        notification_tx: mpsc::UnboundedSender<MNotificationInd>,
    ) -> Result<ServiceHandle> {
        if self.services.contains_key(identity) {
            return Err(NuntiumError::Service {
                reason: format!("a service for {identity} is already registered"),
            });
        }

        let (delete_tx, delete_rx) = mpsc::unbounded_channel();
        let (redownload_tx, redownload_rx) = mpsc::unbounded_channel();
        let service = MmsService::new(
            identity,
            modem_path,
            self.use_delivery_reports,
            Arc::clone(&self.bus),
            Arc::clone(&self.store),
            Arc::clone(&self.accounts),
            delete_tx,
            redownload_tx,
            outgoing_tx,
        );
        let handle: ServiceHandle = Arc::new(Mutex::new(service));

        let watchers = vec![
            tokio::spawn(run_delete_watcher(
                Arc::clone(&handle),
                Arc::clone(&self.store),
                delete_rx,
            )),
            tokio::spawn(run_redownload_watcher(
                Arc::clone(&handle),
                Arc::clone(&self.store),
                notification_tx,
                redownload_rx,
            )),
        ];

        self.services.insert(
            identity.to_string(),
            ServiceEntry {
                handle: Arc::clone(&handle),
                watchers,
            },
        );
        Ok(handle)
    }

    /// Unregisters the facade for `identity` and stops its watchers.
    pub async fn remove_service(&mut self, identity: &str) -> Result<()> {
        let Some(entry) = self.services.remove(identity) else {
            return Err(NuntiumError::Service {
                reason: format!("no service registered for {identity}"),
            });
        };
        entry.handle.lock().await.close();
        for watcher in entry.watchers {
            watcher.abort();
        }
        Ok(())
    }

    /// The facade registered for `identity`, if any.
    pub fn service(&self, identity: &str) -> Option<ServiceHandle> {
        self.services.get(identity).map(|e| Arc::clone(&e.handle))
    }
}

// ---------------------------------------------------------------------------
// Watchers
// ---------------------------------------------------------------------------

/// Handles user `Delete()` requests.
///
/// An unresolved inbound (still in `notification`, not yet expired)
/// is kept: the user would lose the only handle to a message the
/// operator still holds. Everything else is honoured.
async fn run_delete_watcher(
    service: ServiceHandle,
    store: Arc<Store>,
    mut delete_rx: mpsc::UnboundedReceiver<BusPath>,
) {
    while let Some(path) = delete_rx.recv().await {
        if let Ok(uuid) = path.uuid() {
            if let Ok(state) = store.get_mms_state(uuid) {
                if state.state == TransactionState::Notification {
                    let unresolved = state
                        .m_notification_ind
                        .as_ref()
                        .is_some_and(|n| !n.expired());
                    if unresolved {
                        tracing::info!(path = %path, "message is not resolved and not expired, not deleting");
                        continue;
                    }
                }
            }
        }
        if let Err(e) = service.lock().await.message_removed(&path).await {
            tracing::warn!(path = %path, error = %e, "failed to delete message");
        }
    }
}

/// Handles user `Redownload()` requests.
///
/// Only a failed download (record still in `notification`) can be
/// redownloaded. The old surface and record are removed first, then a
/// synthesized notification with a fresh UUID and a back-reference is
/// fed into the mediator as if the operator had pushed it.
async fn run_redownload_watcher(
    service: ServiceHandle,
    store: Arc<Store>,
    notification_tx: mpsc::UnboundedSender<MNotificationInd>,
    mut redownload_rx: mpsc::UnboundedReceiver<BusPath>,
) {
    while let Some(path) = redownload_rx.recv().await {
        let uuid = match path.uuid() {
            Ok(uuid) => uuid,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "redownload for malformed path");
                continue;
            }
        };
        let state = match store.get_mms_state(uuid) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "redownload: cannot load message state");
                continue;
            }
        };
        if state.state != TransactionState::Notification {
            tracing::warn!(path = %path, state = %state.state, "redownload: message was already downloaded");
            continue;
        }
        let Some(notification) = state.m_notification_ind else {
            tracing::warn!(path = %path, "redownload: record has no notification");
            continue;
        };

        if let Err(e) = service.lock().await.message_removed(&path).await {
            tracing::warn!(path = %path, error = %e, "redownload: removing old message failed");
        }

        let fresh = notification.redownload();
        if let Err(e) = store.create(&state.modem_id, &fresh) {
            tracing::warn!(uuid = %fresh.uuid, error = %e, "redownload: cannot store new notification");
            continue;
        }
        if notification_tx.send(fresh).is_err() {
            tracing::warn!(path = %path, "redownload: mediator is gone");
        }
    }
}
