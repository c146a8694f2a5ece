//! The per-account service facade.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, Mutex};

use nuntium_storage::Store;
use nuntium_types::adapters::{AccountsService, BusSignal, MessageBus};
use nuntium_types::pdu::{DebugErrorKind, MNotificationInd, MRetrieveConf};
use nuntium_types::variant::{prop, status, PropertyMap, Variant};
use nuntium_types::{BusPath, DownloadError, MessageUuid, NuntiumError, Result};

use crate::properties::{self, parse_message, strip_plmn};
use crate::surface::MessageSurface;

/// Shared handle to a facade; the mutex serializes inbound method
/// calls so they are handled one at a time.
pub type ServiceHandle = Arc<Mutex<MmsService>>;

// ---------------------------------------------------------------------------
// Outbound submission
// ---------------------------------------------------------------------------

/// One attachment descriptor of a `SendMessage` call, unvalidated.
#[derive(Clone, Debug)]
pub struct OutAttachment {
    pub id: String,
    pub content_type: String,
    pub file_path: std::path::PathBuf,
}

/// An outbound submission handed from the facade to the mediator.
///
/// The reply channel carries the path of the freshly registered
/// message object back to the submission caller.
pub struct OutgoingRequest {
    pub recipients: Vec<String>,
    pub attachments: Vec<OutAttachment>,
    pub reply: oneshot::Sender<Result<BusPath>>,
}

impl std::fmt::Debug for OutgoingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingRequest")
            .field("recipients", &self.recipients)
            .field("attachments", &self.attachments)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// MmsService
// ---------------------------------------------------------------------------

/// Account-level surface: registers per-message objects, broadcasts
/// add/remove signals and serializes outbound submission requests.
pub struct MmsService {
    identity: String,
    service_path: BusPath,
    modem_path: BusPath,
    use_delivery_reports: bool,
    bus: Arc<dyn MessageBus>,
    store: Arc<Store>,
    accounts: Arc<dyn AccountsService>,
    surfaces: HashMap<BusPath, MessageSurface>,
    delete_tx: mpsc::UnboundedSender<BusPath>,
    redownload_tx: mpsc::UnboundedSender<BusPath>,
    outgoing_tx: mpsc::UnboundedSender<OutgoingRequest>,
}

impl MmsService {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        identity: &str,
        modem_path: BusPath,
        use_delivery_reports: bool,
        bus: Arc<dyn MessageBus>,
        store: Arc<Store>,
        accounts: Arc<dyn AccountsService>,
        delete_tx: mpsc::UnboundedSender<BusPath>,
        redownload_tx: mpsc::UnboundedSender<BusPath>,
        outgoing_tx: mpsc::UnboundedSender<OutgoingRequest>,
    ) -> Self {
        Self {
            identity: identity.to_string(),
            service_path: BusPath::service(identity),
            modem_path,
            use_delivery_reports,
            bus,
            store,
            accounts,
            surfaces: HashMap::new(),
            delete_tx,
            redownload_tx,
            outgoing_tx,
        }
    }

    /// Account identity this facade serves.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Object path of the service object.
    pub fn path(&self) -> &BusPath {
        &self.service_path
    }

    /// Object path of the message object for `uuid`.
    pub fn message_path(&self, uuid: MessageUuid) -> BusPath {
        BusPath::message(&self.identity, uuid)
    }

    /// The stored preferred context for this account, when set.
    pub fn preferred_context(&self) -> Option<BusPath> {
        self.store.get_preferred_context(&self.identity).ok()
    }

    /// Borrow the surface registered at `path`.
    pub fn surface(&self, path: &BusPath) -> Option<&MessageSurface> {
        self.surfaces.get(path)
    }

    /// Paths of all live surfaces, sorted for deterministic output.
    pub fn surface_paths(&self) -> Vec<BusPath> {
        let mut paths: Vec<BusPath> = self.surfaces.keys().cloned().collect();
        paths.sort();
        paths
    }

    // -----------------------------------------------------------------------
    // Service-interface methods
    // -----------------------------------------------------------------------

    /// `GetMessages`: the stored-message listing is not exposed yet.
    pub fn get_messages(&self) -> Vec<(BusPath, PropertyMap)> {
        Vec::new()
    }

    /// `GetProperties` on the service object.
    pub fn get_properties(&self) -> PropertyMap {
        let mut properties = PropertyMap::new();
        properties.insert(
            prop::USE_DELIVERY_REPORTS.into(),
            Variant::from(self.use_delivery_reports),
        );
        properties.insert(
            prop::MODEM_OBJECT_PATH.into(),
            Variant::from(self.modem_path.clone()),
        );
        let preferred = self.preferred_context().unwrap_or_else(BusPath::unset);
        properties.insert(prop::PREFERRED_CONTEXT.into(), Variant::from(preferred));
        properties
    }

    /// `SetProperty` on the service object. Only the preferred
    /// context is settable.
    pub async fn set_property(&mut self, name: &str, value: Variant) -> Result<()> {
        if name != prop::PREFERRED_CONTEXT {
            return Err(NuntiumError::InvalidArguments {
                reason: format!("property {name} cannot be set"),
            });
        }
        let context = match value {
            Variant::Path(path) => path,
            Variant::Str(raw) => BusPath::new(raw),
            other => {
                return Err(NuntiumError::InvalidArguments {
                    reason: format!("preferred context must be a path, got {other:?}"),
                })
            }
        };
        self.set_preferred_context(context).await
    }

    /// Persists the preferred context and broadcasts the change.
    ///
    /// Setting the already stored value is a no-op.
    pub async fn set_preferred_context(&mut self, context: BusPath) -> Result<()> {
        if self.preferred_context().as_ref() == Some(&context) {
            return Ok(());
        }
        self.store.set_preferred_context(&self.identity, &context)?;
        self.emit_best_effort(BusSignal::PropertyChanged {
            path: self.service_path.clone(),
            name: prop::PREFERRED_CONTEXT.into(),
            value: Variant::from(context),
        })
        .await;
        Ok(())
    }

    /// `SendMessage`: enqueues an outbound submission and returns the
    /// channel the message path will arrive on.
    pub fn send_message(
        &self,
        recipients: Vec<String>,
        attachments: Vec<OutAttachment>,
    ) -> Result<oneshot::Receiver<Result<BusPath>>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.outgoing_tx
            .send(OutgoingRequest {
                recipients,
                attachments,
                reply: reply_tx,
            })
            .map_err(|_| NuntiumError::Service {
                reason: "outbound submission channel is closed".into(),
            })?;
        Ok(reply_rx)
    }

    // -----------------------------------------------------------------------
    // Inbound surfaces
    // -----------------------------------------------------------------------

    /// Registers the surface for a retrieved message and broadcasts
    /// `MessageAdded` with its full properties.
    pub async fn incoming_message_added(
        &mut self,
        retrieve_conf: &MRetrieveConf,
        notification: &mut MNotificationInd,
    ) -> Result<()> {
        if notification.pop_debug_error(DebugErrorKind::ReceiveHandle).is_some() {
            tracing::warn!(uuid = %notification.uuid, "forcing receive-handle debug error");
            if let Err(e) = self.store.update_m_notification_ind(notification) {
                tracing::warn!(uuid = %notification.uuid, error = %e, "cannot persist debug mutation");
            }
            return Err(NuntiumError::Service {
                reason: "forced receive-handle error".into(),
            });
        }

        let mut properties = parse_message(&self.store, retrieve_conf)?;
        if let Some(prior) = notification.redownload_of {
            properties.insert(
                prop::DELETE_EVENT.into(),
                Variant::from(self.message_path(prior)),
            );
        }
        properties.insert(
            prop::RECEIVED.into(),
            Variant::from(notification.received.timestamp() as u32),
        );

        let path = self.message_path(retrieve_conf.uuid);
        self.register_surface(path.clone(), status::RECEIVED, false);
        self.bus
            .emit(BusSignal::MessageAdded { path, properties })
            .await
    }

    /// Registers a failure surface and broadcasts `MessageAdded` with
    /// the error payload.
    pub async fn incoming_message_fail_added(
        &mut self,
        notification: &mut MNotificationInd,
        error: &DownloadError,
    ) -> Result<()> {
        if notification.pop_debug_error(DebugErrorKind::ErrorNotify).is_some() {
            tracing::warn!(uuid = %notification.uuid, "forcing error-notify debug error");
            if let Err(e) = self.store.update_m_notification_ind(notification) {
                tracing::warn!(uuid = %notification.uuid, error = %e, "cannot persist debug mutation");
            }
            return Err(NuntiumError::Service {
                reason: "forced error-notify error".into(),
            });
        }

        let mut allow_redownload = error.allow_redownload();
        if allow_redownload && notification.expired() {
            tracing::info!(uuid = %notification.uuid, expire = %notification.expire, "message expired, not offering redownload");
            allow_redownload = false;
        }

        let mobile_data = match self.accounts.mobile_data_enabled().await {
            Ok(enabled) => Some(enabled),
            Err(e) => {
                tracing::warn!(error = %e, "cannot detect whether mobile data is enabled");
                None
            }
        };

        let mut properties = PropertyMap::new();
        properties.insert(prop::STATUS.into(), Variant::from(status::RECEIVED));
        properties.insert(prop::DATE.into(), Variant::from(Utc::now().to_rfc3339()));
        properties.insert(
            prop::SENDER.into(),
            Variant::from(strip_plmn(&notification.from)),
        );
        properties.insert(
            prop::ERROR.into(),
            Variant::from(properties::error_payload(error, notification, mobile_data)),
        );
        properties.insert(prop::ALLOW_REDOWNLOAD.into(), Variant::from(allow_redownload));
        if let Some(prior) = notification.redownload_of {
            properties.insert(
                prop::DELETE_EVENT.into(),
                Variant::from(self.message_path(prior)),
            );
        }
        properties.insert(
            prop::RECEIVED.into(),
            Variant::from(notification.received.timestamp() as u32),
        );

        let path = self.message_path(notification.uuid);
        self.register_surface(path.clone(), status::RECEIVED, allow_redownload);
        self.bus
            .emit(BusSignal::MessageAdded { path, properties })
            .await
    }

    /// Re-registers a surface for a record rescued at startup.
    ///
    /// It is an error to call this when a surface already exists for
    /// the UUID.
    pub async fn initialization_message_added(
        &mut self,
        retrieve_conf: Option<&MRetrieveConf>,
        notification: &MNotificationInd,
    ) -> Result<()> {
        let path = self.message_path(notification.uuid);
        if self.surfaces.contains_key(&path) {
            return Err(NuntiumError::Service {
                reason: format!("message {path} is already handled"),
            });
        }

        let mut properties = PropertyMap::new();
        properties.insert(prop::STATUS.into(), Variant::from(status::RECEIVED));
        properties.insert(
            prop::SENDER.into(),
            Variant::from(strip_plmn(&notification.from)),
        );
        properties.insert(prop::RESCUED.into(), Variant::from(true));
        properties.insert(prop::SILENT.into(), Variant::from(true));

        if let Some(retrieve_conf) = retrieve_conf {
            match parse_message(&self.store, retrieve_conf) {
                Ok(parsed) => {
                    for key in [prop::SENDER, prop::RECIPIENTS] {
                        if let Some(value) = parsed.get(key) {
                            properties.insert(key.into(), value.clone());
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "cannot parse retrieve-conf for rescued message");
                }
            }
        }

        // Rescued surfaces keep a redownload channel; the watcher's
        // state check decides whether a request is honoured.
        self.register_surface(path.clone(), status::RECEIVED, true);
        self.bus
            .emit(BusSignal::MessageAdded { path, properties })
            .await
    }

    // -----------------------------------------------------------------------
    // Outbound surfaces
    // -----------------------------------------------------------------------

    /// Replies to a submission caller with the new message path and
    /// registers the outbound surface.
    pub async fn reply_send_message(
        &mut self,
        reply: oneshot::Sender<Result<BusPath>>,
        uuid: MessageUuid,
    ) -> Result<BusPath> {
        let path = self.message_path(uuid);
        reply
            .send(Ok(path.clone()))
            .map_err(|_| NuntiumError::Service {
                reason: format!("submission caller for {path} went away"),
            })?;

        self.register_surface(path.clone(), status::DRAFT, false);
        let mut properties = PropertyMap::new();
        properties.insert(prop::STATUS.into(), Variant::from(status::DRAFT));
        self.emit_best_effort(BusSignal::MessageAdded {
            path: path.clone(),
            properties,
        })
        .await;
        Ok(path)
    }

    // -----------------------------------------------------------------------
    // Per-UUID mutations
    // -----------------------------------------------------------------------

    /// Pushes a status transition on the message object.
    pub async fn message_status_changed(&mut self, uuid: MessageUuid, status: &str) -> Result<()> {
        let path = self.message_path(uuid);
        let Some(surface) = self.surfaces.get_mut(&path) else {
            return Err(NuntiumError::Service {
                reason: format!("no message surface at {path}"),
            });
        };
        surface.set_status(status);
        self.bus
            .emit(BusSignal::PropertyChanged {
                path,
                name: prop::STATUS.into(),
                value: Variant::from(status),
            })
            .await
    }

    /// Closes a surface without touching the store or signalling.
    pub fn message_destroy(&mut self, uuid: MessageUuid) -> Result<()> {
        let path = self.message_path(uuid);
        if self.surfaces.remove(&path).is_none() {
            return Err(NuntiumError::Service {
                reason: format!("no message surface at {path}"),
            });
        }
        Ok(())
    }

    /// Closes the surface, destroys the store record and broadcasts
    /// `MessageRemoved`, in exactly that order.
    pub async fn message_removed(&mut self, path: &BusPath) -> Result<()> {
        if self.surfaces.remove(path).is_none() {
            return Err(NuntiumError::Service {
                reason: format!("no message surface at {path}"),
            });
        }
        let uuid = path.uuid()?;
        self.store.destroy(uuid)?;
        self.signal_message_removed(path).await
    }

    /// Broadcasts `MessageRemoved` without touching surface or store.
    ///
    /// Used when a stored record is discarded before any surface was
    /// spawned for it (startup expiry).
    pub async fn signal_message_removed(&self, path: &BusPath) -> Result<()> {
        self.bus
            .emit(BusSignal::MessageRemoved { path: path.clone() })
            .await
    }

    /// Drops every live surface. Used when the account goes away.
    pub fn close(&mut self) {
        self.surfaces.clear();
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn register_surface(&mut self, path: BusPath, status: &str, with_redownload: bool) {
        let redownload_tx = with_redownload.then(|| self.redownload_tx.clone());
        let surface = MessageSurface::new(path.clone(), status, self.delete_tx.clone(), redownload_tx);
        self.surfaces.insert(path, surface);
    }

    async fn emit_best_effort(&self, signal: BusSignal) {
        if let Err(e) = self.bus.emit(signal).await {
            tracing::warn!(error = %e, "signal emission failed");
        }
    }
}
