//! The per-modem mediator: event loop and input channels.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use nuntium_service::{OutgoingRequest, ServiceHandle, ServiceManager};
use nuntium_storage::Store;
use nuntium_types::adapters::{
    AccountsService, HistoryService, MmsTransport, PduCodec, RadioContextManager,
};
use nuntium_types::pdu::{MNotificationInd, PushPdu};
use nuntium_types::BusPath;

use crate::registry::TransactionRegistry;
use crate::{inbound, outbound, reconcile};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// An encoded submission waiting to be posted to the message center.
#[derive(Debug)]
pub struct SendFileRequest {
    /// Scratch file holding the encoded M-Send.req.
    pub file_path: std::path::PathBuf,
    /// UUID of the submission.
    pub uuid: nuntium_types::MessageUuid,
}

/// Cloneable senders feeding the mediator loop.
///
/// The radio integration feeds `push_tx` and the SIM events; the
/// facade feeds `outbound_tx` and (via the redownload watcher)
/// `notification_tx`. Tests drive all of them directly.
#[derive(Clone)]
pub struct MediatorHandle {
    pub push_tx: mpsc::UnboundedSender<PushPdu>,
    pub notification_tx: mpsc::UnboundedSender<MNotificationInd>,
    pub outbound_tx: mpsc::UnboundedSender<OutgoingRequest>,
    pub identity_added_tx: mpsc::UnboundedSender<String>,
    pub identity_removed_tx: mpsc::UnboundedSender<String>,
    pub push_available_tx: mpsc::UnboundedSender<bool>,
    pub terminate_tx: mpsc::UnboundedSender<()>,
}

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

/// Modem-level configuration of a mediator instance.
#[derive(Clone, Debug)]
pub struct MediatorConfig {
    /// Radio object path of the modem this mediator serves.
    pub modem_path: BusPath,
    /// Whether outbound submissions request delivery reports.
    pub use_delivery_reports: bool,
}

/// Shared state handed to every spawned transaction task.
pub(crate) struct MediatorCore {
    pub(crate) modem_path: BusPath,
    pub(crate) use_delivery_reports: bool,
    pub(crate) store: Arc<Store>,
    pub(crate) registry: Arc<TransactionRegistry>,
    pub(crate) codec: Arc<dyn PduCodec>,
    pub(crate) radio: Arc<dyn RadioContextManager>,
    pub(crate) transport: Arc<dyn MmsTransport>,
    pub(crate) history: Arc<dyn HistoryService>,
    pub(crate) accounts: Arc<dyn AccountsService>,
    /// Serializes every handler that activates the data context.
    pub(crate) context_lock: Mutex<()>,
    pub(crate) notification_tx: mpsc::UnboundedSender<MNotificationInd>,
    pub(crate) send_file_tx: mpsc::UnboundedSender<SendFileRequest>,
    /// Lets handlers end the loop on unrecoverable conditions.
    pub(crate) terminate_tx: mpsc::UnboundedSender<()>,
}

// ---------------------------------------------------------------------------
// Mediator
// ---------------------------------------------------------------------------

/// Single-threaded cooperative event loop for one modem.
///
/// Each input dispatches a handler; long-running handlers (context
/// activation, network transfers) run as spawned tasks so the loop
/// stays responsive. All mutable loop state (the current identity and
/// its facade) lives here and is only touched between dispatches.
pub struct Mediator {
    core: Arc<MediatorCore>,
    manager: Arc<Mutex<ServiceManager>>,
    handle: MediatorHandle,
    identity: Option<String>,
    service: Option<ServiceHandle>,
    push_rx: mpsc::UnboundedReceiver<PushPdu>,
    notification_rx: mpsc::UnboundedReceiver<MNotificationInd>,
    outbound_rx: mpsc::UnboundedReceiver<OutgoingRequest>,
    send_file_rx: mpsc::UnboundedReceiver<SendFileRequest>,
    identity_added_rx: mpsc::UnboundedReceiver<String>,
    identity_removed_rx: mpsc::UnboundedReceiver<String>,
    push_available_rx: mpsc::UnboundedReceiver<bool>,
    terminate_rx: mpsc::UnboundedReceiver<()>,
}

impl Mediator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MediatorConfig,
        store: Arc<Store>,
        codec: Arc<dyn PduCodec>,
        radio: Arc<dyn RadioContextManager>,
        transport: Arc<dyn MmsTransport>,
        history: Arc<dyn HistoryService>,
        accounts: Arc<dyn AccountsService>,
        manager: Arc<Mutex<ServiceManager>>,
    ) -> Self {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (send_file_tx, send_file_rx) = mpsc::unbounded_channel();
        let (identity_added_tx, identity_added_rx) = mpsc::unbounded_channel();
        let (identity_removed_tx, identity_removed_rx) = mpsc::unbounded_channel();
        let (push_available_tx, push_available_rx) = mpsc::unbounded_channel();
        let (terminate_tx, terminate_rx) = mpsc::unbounded_channel();

        let core = Arc::new(MediatorCore {
            modem_path: config.modem_path,
            use_delivery_reports: config.use_delivery_reports,
            store,
            registry: Arc::new(TransactionRegistry::new()),
            codec,
            radio,
            transport,
            history,
            accounts,
            context_lock: Mutex::new(()),
            notification_tx: notification_tx.clone(),
            send_file_tx,
            terminate_tx: terminate_tx.clone(),
        });

        let handle = MediatorHandle {
            push_tx,
            notification_tx,
            outbound_tx,
            identity_added_tx,
            identity_removed_tx,
            push_available_tx,
            terminate_tx,
        };

        Self {
            core,
            manager,
            handle,
            identity: None,
            service: None,
            push_rx,
            notification_rx,
            outbound_rx,
            send_file_rx,
            identity_added_rx,
            identity_removed_rx,
            push_available_rx,
            terminate_rx,
        }
    }

    /// Cloneable senders for the loop inputs.
    pub fn handle(&self) -> MediatorHandle {
        self.handle.clone()
    }

    /// The transaction registry of this mediator.
    pub fn registry(&self) -> Arc<TransactionRegistry> {
        Arc::clone(&self.core.registry)
    }

    /// Spawns the event loop.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(push) = self.push_rx.recv() => {
                    self.on_push(push);
                }
                Some(notification) = self.notification_rx.recv() => {
                    self.on_notification(notification);
                }
                Some(request) = self.outbound_rx.recv() => {
                    self.on_outgoing(request);
                }
                Some(send_file) = self.send_file_rx.recv() => {
                    self.on_send_file(send_file);
                }
                Some(identity) = self.identity_added_rx.recv() => {
                    if !self.on_identity_added(identity).await {
                        break;
                    }
                }
                Some(identity) = self.identity_removed_rx.recv() => {
                    self.on_identity_removed(identity).await;
                }
                Some(available) = self.push_available_rx.recv() => {
                    if !self.on_push_available(available).await {
                        break;
                    }
                }
                Some(()) = self.terminate_rx.recv() => {
                    break;
                }
            }
        }
        tracing::info!(modem = %self.core.modem_path, "ending mediator loop for modem");
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    fn on_push(&self, push: PushPdu) {
        let Some(identity) = self.identity.clone() else {
            tracing::warn!("push received before an identity was added, dropping");
            return;
        };
        let core = Arc::clone(&self.core);
        tokio::spawn(inbound::handle_push(core, identity, push));
    }

    fn on_notification(&self, notification: MNotificationInd) {
        let Some(service) = self.service.clone() else {
            tracing::warn!(uuid = %notification.uuid, "no service registered, dropping notification");
            return;
        };
        let core = Arc::clone(&self.core);
        tokio::spawn(inbound::handle_notification(core, service, notification));
    }

    fn on_outgoing(&self, request: OutgoingRequest) {
        let Some(service) = self.service.clone() else {
            tracing::warn!("no service registered, dropping outbound request");
            return;
        };
        let core = Arc::clone(&self.core);
        tokio::spawn(outbound::handle_outgoing(core, service, request));
    }

    fn on_send_file(&self, send_file: SendFileRequest) {
        let Some(service) = self.service.clone() else {
            tracing::warn!(uuid = %send_file.uuid, "no service registered, dropping encoded submission");
            return;
        };
        let core = Arc::clone(&self.core);
        tokio::spawn(outbound::send_send_req(core, service, send_file));
    }

    /// Returns false when the failure is fatal for this mediator.
    async fn on_identity_added(&mut self, identity: String) -> bool {
        let service = {
            let mut manager = self.manager.lock().await;
            manager.add_service(
                &identity,
                self.core.modem_path.clone(),
                self.handle.outbound_tx.clone(),
                self.core.notification_tx.clone(),
            )
        };
        match service {
            Ok(service) => {
                self.service = Some(Arc::clone(&service));
                self.identity = Some(identity.clone());
                tokio::spawn(reconcile::initialize_messages(
                    Arc::clone(&self.core),
                    service,
                    identity,
                ));
                true
            }
            Err(e) => {
                tracing::error!(identity = %identity, error = %e, "cannot register service");
                false
            }
        }
    }

    async fn on_identity_removed(&mut self, identity: String) {
        if let Err(e) = self.manager.lock().await.remove_service(&identity).await {
            tracing::warn!(identity = %identity, error = %e, "cannot unregister service");
        }
        self.service = None;
        self.identity = None;
    }

    /// Returns false when the push agent cannot be registered, which
    /// is fatal for this mediator.
    async fn on_push_available(&self, available: bool) -> bool {
        if available {
            if let Err(e) = self.core.radio.register_push_agent().await {
                tracing::error!(error = %e, "cannot register push agent");
                return false;
            }
        } else if let Err(e) = self.core.radio.unregister_push_agent().await {
            tracing::warn!(error = %e, "cannot unregister push agent");
        }
        true
    }
}
