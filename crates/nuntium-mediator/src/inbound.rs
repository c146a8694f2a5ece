//! Inbound transaction handling: push ingestion, download, forward,
//! acknowledgement, and failure surfacing.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use nuntium_service::ServiceHandle;
use nuntium_types::adapters::{MmsContext, ProxyInfo};
use nuntium_types::pdu::{DebugErrorKind, MNotificationInd, MNotifyRespInd, MRetrieveConf, PushPdu};
use nuntium_types::{
    DownloadError, DownloadErrorKind, MessageUuid, NuntiumError, Result, TransactionState,
};

use crate::mediator::MediatorCore;

// ---------------------------------------------------------------------------
// Push ingestion
// ---------------------------------------------------------------------------

/// Decodes a pushed notification and feeds it into the pipeline.
///
/// When the operator re-pushes a transaction already represented in
/// the registry, the fresh notification keeps the first push's
/// `received` stamp so the user-visible reception time is stable.
pub(crate) async fn handle_push(core: Arc<MediatorCore>, identity: String, push: PushPdu) {
    if !core.accounts.mms_enabled().await {
        tracing::info!("MMS is disabled");
        return;
    }

    let (decoded, decode_log) = core.codec.decode_notification(&push.data, Utc::now());
    let mut notification = match decoded {
        Ok(notification) => notification,
        Err(e) => {
            tracing::warn!(error = %e, log = %decode_log, "unable to decode m-notification.ind");
            return;
        }
    };

    if !notification.transaction_id.is_empty() {
        if let Some(prior_uuid) = core.registry.get(&notification.transaction_id) {
            tracing::info!(
                transaction = %notification.transaction_id,
                uuid = %prior_uuid,
                "pushed transaction is already tracked"
            );
            match core.store.get_mms_state(prior_uuid) {
                Ok(state) => match state.m_notification_ind {
                    Some(prior) => notification.received = prior.received,
                    None => {
                        tracing::warn!(uuid = %prior_uuid, "tracked record has no notification")
                    }
                },
                Err(e) => tracing::warn!(uuid = %prior_uuid, error = %e, "cannot load tracked record"),
            }
        }
    }

    if let Err(e) = core.store.create(&identity, &notification) {
        tracing::error!(uuid = %notification.uuid, error = %e, "cannot store fresh notification");
        return;
    }
    if core.notification_tx.send(notification).is_err() {
        tracing::warn!("mediator loop is gone, dropping notification");
    }
}

// ---------------------------------------------------------------------------
// Inbound transaction
// ---------------------------------------------------------------------------

/// Drives one notification through download, forward and
/// acknowledgement.
///
/// Held under the context lock for its whole duration; the activated
/// context is released on every exit path.
pub(crate) async fn handle_notification(
    core: Arc<MediatorCore>,
    service: ServiceHandle,
    mut notification: MNotificationInd,
) {
    let _context_guard = core.context_lock.lock().await;

    core.registry
        .insert_or_adopt(&notification.transaction_id, notification.uuid, &core.store);

    let mut context = None;
    if notification.is_debug() {
        tracing::info!(uuid = %notification.uuid, "local test, skipping context activation and proxy settings");
        if let Some(kind) = debug_context_error(&mut notification) {
            if let Err(e) = core.store.update_m_notification_ind(&notification) {
                tracing::warn!(uuid = %notification.uuid, error = %e, "cannot persist debug mutation");
            }
            let error = DownloadError::new(kind, "forced debug error");
            tracing::warn!(uuid = %notification.uuid, error = %error, "forcing debug error");
            download_failed(&core, &service, notification, error).await;
            return;
        }
    } else {
        let preferred = service.lock().await.preferred_context();
        match core.radio.activate_mms_context(preferred.as_ref()).await {
            Ok(activated) => {
                if let Err(e) = service
                    .lock()
                    .await
                    .set_preferred_context(activated.object_path.clone())
                    .await
                {
                    tracing::warn!(error = %e, "unable to store the preferred context for MMS");
                }
                context = Some(activated);
            }
            Err(e) => {
                tracing::warn!(uuid = %notification.uuid, error = %e, "cannot activate data context");
                let error = DownloadError::new(DownloadErrorKind::ActivateContext, e);
                download_failed(&core, &service, notification, error).await;
                return;
            }
        }
    }

    let outcome = retrieve_and_respond(&core, &service, &mut notification, context.as_ref()).await;

    if let Some(context) = context {
        if let Err(e) = core.radio.deactivate_mms_context(&context).await {
            tracing::warn!(context = %context.object_path, error = %e, "issues while deactivating context");
        }
    }

    if let Err(error) = outcome {
        download_failed(&core, &service, notification, error).await;
    }
}

/// Steps download through acknowledgement. Returns the failures that
/// must be surfaced to the user; later failures only log.
async fn retrieve_and_respond(
    core: &Arc<MediatorCore>,
    service: &ServiceHandle,
    notification: &mut MNotificationInd,
    context: Option<&MmsContext>,
) -> std::result::Result<(), DownloadError> {
    let proxy: Option<ProxyInfo> = match context {
        Some(context) => match context.proxy() {
            Ok(proxy) => Some(proxy.clone()),
            Err(e) => {
                tracing::warn!(error = %e, "error retrieving proxy");
                return Err(DownloadError::new(DownloadErrorKind::GetProxy, e));
            }
        },
        None => None,
    };

    let content_path = core
        .transport
        .download(&notification.content_location, proxy.as_ref())
        .await
        .map_err(|e| {
            tracing::warn!(uuid = %notification.uuid, error = %e, "download issues");
            DownloadError::new(DownloadErrorKind::DownloadContent, e)
        })?;

    core.store
        .update_downloaded(notification.uuid, &content_path)
        .map_err(|e| {
            tracing::warn!(uuid = %notification.uuid, error = %e, "error updating storage");
            DownloadError::new(DownloadErrorKind::Storage, e)
        })?;

    let retrieve_conf = forward_retrieve_conf(core, service, notification)
        .await
        .map_err(|e| {
            tracing::warn!(uuid = %notification.uuid, error = %e, "handling m-retrieve.conf failed");
            DownloadError::new(DownloadErrorKind::Forward, e)
        })?;

    if let Err(e) = core.store.update_received(retrieve_conf.uuid) {
        tracing::error!(uuid = %retrieve_conf.uuid, error = %e, "error updating storage");
        return Ok(());
    }

    let notify_resp = retrieve_conf.notify_resp(core.use_delivery_reports);
    if !notification.is_debug() {
        let response_file = match encode_notify_resp(core, &notify_resp) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(uuid = %notify_resp.uuid, error = %e, "unable to encode m-notifyresp.ind");
                return Ok(());
            }
        };
        let Some(context) = context else {
            tracing::warn!(uuid = %notify_resp.uuid, "no context to acknowledge over");
            let _ = fs::remove_file(&response_file);
            return Ok(());
        };
        if let Err(e) = upload_notify_resp(core, &response_file, context).await {
            tracing::warn!(uuid = %notify_resp.uuid, error = %e, "error sending m-notifyresp.ind");
            return Ok(());
        }
    } else {
        tracing::info!(uuid = %notify_resp.uuid, "local test, skipping m-notifyresp.ind");
        if notification.pop_debug_error(DebugErrorKind::RespondHandle).is_some() {
            tracing::warn!(uuid = %notification.uuid, "forcing respond-handle debug error");
            if let Err(e) = core.store.update_m_notification_ind(notification) {
                tracing::warn!(uuid = %notification.uuid, error = %e, "cannot persist debug mutation");
            }
            return Ok(());
        }
    }

    if let Err(e) = core.store.update_responded(notify_resp.uuid) {
        tracing::error!(uuid = %notify_resp.uuid, error = %e, "error updating storage");
        return Ok(());
    }
    core.registry.remove(&notification.transaction_id);
    Ok(())
}

fn debug_context_error(notification: &mut MNotificationInd) -> Option<DownloadErrorKind> {
    if notification.pop_debug_error(DebugErrorKind::ActivateContext).is_some() {
        Some(DownloadErrorKind::ActivateContext)
    } else if notification.pop_debug_error(DebugErrorKind::GetProxy).is_some() {
        Some(DownloadErrorKind::GetProxy)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Forwarding
// ---------------------------------------------------------------------------

/// Decodes the stored content for `uuid` into an M-Retrieve.conf.
pub(crate) fn decode_retrieve_conf(core: &MediatorCore, uuid: MessageUuid) -> Result<MRetrieveConf> {
    let content_path = core.store.get_mms(uuid)?;
    let data = fs::read(&content_path).map_err(|e| NuntiumError::Storage {
        reason: format!("reading downloaded file {}: {e}", content_path.display()),
    })?;
    let (decoded, decode_log) = core.codec.decode_retrieve_conf(&data, uuid);
    decoded.map_err(|e| NuntiumError::Decode {
        reason: format!("unable to decode m-retrieve.conf: {e} with log {decode_log}"),
    })
}

/// Decodes the downloaded message and hands it to the facade.
///
/// When an error surface for the same transaction was shown earlier
/// (and no redownload intervened), the new message supersedes it: the
/// add carries a `DeleteEvent` for the old surface, which is removed
/// right after the add succeeds.
pub(crate) async fn forward_retrieve_conf(
    core: &Arc<MediatorCore>,
    service: &ServiceHandle,
    notification: &mut MNotificationInd,
) -> Result<MRetrieveConf> {
    let retrieve_conf = decode_retrieve_conf(core, notification.uuid)?;

    let prior = if !notification.transaction_id.is_empty() && notification.redownload_of.is_none() {
        core.registry
            .get(&notification.transaction_id)
            .filter(|uuid| *uuid != notification.uuid)
    } else {
        None
    };

    let mut remove_prior = None;
    if let Some(prior_uuid) = prior {
        match core.store.get_mms_state(prior_uuid) {
            Ok(state) if state.telepathy_error_notified => {
                notification.redownload_of = Some(prior_uuid);
                remove_prior = Some(prior_uuid);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(uuid = %prior_uuid, error = %e, "cannot load prior record for transaction")
            }
        }
    }

    let mut facade = service.lock().await;
    facade
        .incoming_message_added(&retrieve_conf, notification)
        .await
        .map_err(|e| NuntiumError::Service {
            reason: format!("cannot notify about new message: {e}"),
        })?;

    if let Some(prior_uuid) = remove_prior {
        let prior_path = facade.message_path(prior_uuid);
        if let Err(e) = facade.message_removed(&prior_path).await {
            tracing::warn!(path = %prior_path, error = %e, "error closing superseded message");
        }
    }

    Ok(retrieve_conf)
}

// ---------------------------------------------------------------------------
// Acknowledgement
// ---------------------------------------------------------------------------

/// Encodes the acknowledgement into its scratch file.
pub(crate) fn encode_notify_resp(
    core: &MediatorCore,
    notify_resp: &MNotifyRespInd,
) -> Result<PathBuf> {
    let (mut file, path) = core.store.create_response_file(notify_resp.uuid)?;
    if let Err(e) = core.codec.encode_notify_resp(notify_resp, &mut file) {
        let _ = fs::remove_file(&path);
        return Err(e);
    }
    if let Err(e) = file.sync_all() {
        let _ = fs::remove_file(&path);
        return Err(NuntiumError::Storage {
            reason: format!("syncing {}: {e}", path.display()),
        });
    }
    drop(file);
    tracing::debug!(file = %path.display(), uuid = %notify_resp.uuid, "encoded m-notifyresp.ind");
    Ok(path)
}

/// Posts the encoded acknowledgement to the message center.
///
/// The scratch file is unlinked whatever the outcome.
pub(crate) async fn upload_notify_resp(
    core: &MediatorCore,
    response_file: &std::path::Path,
    context: &MmsContext,
) -> Result<()> {
    let outcome = async {
        let proxy = context.proxy()?.clone();
        let message_center = context.message_center()?.to_string();
        let reply_file = core
            .transport
            .upload(response_file, &message_center, Some(&proxy))
            .await?;
        // The acknowledgement reply body is of no further use.
        let _ = fs::remove_file(reply_file);
        Ok(())
    }
    .await;
    if let Err(e) = fs::remove_file(response_file) {
        tracing::warn!(file = %response_file.display(), error = %e, "cannot remove m-notifyresp.ind encoded file");
    }
    outcome
}

// ---------------------------------------------------------------------------
// Failure surfacing
// ---------------------------------------------------------------------------

/// Communicates a download failure to the user surface, at most once
/// per operator transaction.
///
/// Operators re-push the same Transaction-Id until acknowledged. If a
/// surface (message or error) already exists for the transaction, the
/// fresh notification is silently dropped and its record destroyed.
/// Otherwise the error is surfaced, the record flagged, and when an
/// older never-surfaced record was superseded, its surface is removed
/// after the new add and the registry re-pointed.
pub(crate) async fn download_failed(
    core: &Arc<MediatorCore>,
    service: &ServiceHandle,
    mut notification: MNotificationInd,
    error: DownloadError,
) {
    let superseded = if !notification.transaction_id.is_empty() && notification.redownload_of.is_none() {
        core.registry
            .get(&notification.transaction_id)
            .filter(|uuid| *uuid != notification.uuid)
    } else {
        None
    };

    if let Some(prior_uuid) = superseded {
        match core.store.get_mms_state(prior_uuid) {
            Ok(state)
                if state.telepathy_error_notified
                    || matches!(
                        state.state,
                        TransactionState::Received | TransactionState::Responded
                    ) =>
            {
                tracing::info!(
                    transaction = %notification.transaction_id,
                    uuid = %prior_uuid,
                    "transaction outcome was already communicated, dropping duplicate"
                );
                destroy_record(core, notification.uuid);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(uuid = %prior_uuid, error = %e, "cannot load prior record for transaction")
            }
        }
    }

    let added = service
        .lock()
        .await
        .incoming_message_fail_added(&mut notification, &error)
        .await;
    if let Err(e) = added {
        tracing::warn!(uuid = %notification.uuid, error = %e, "sending download error to service failed");
        if superseded.is_some() {
            destroy_record(core, notification.uuid);
        }
        return;
    }

    if let Err(e) = core.store.set_telepathy_error_notified(notification.uuid) {
        tracing::error!(uuid = %notification.uuid, error = %e, "cannot flag record as error-notified");
        if superseded.is_some() {
            destroy_record(core, notification.uuid);
        }
        return;
    }

    if let Some(prior_uuid) = superseded {
        let mut facade = service.lock().await;
        let prior_path = facade.message_path(prior_uuid);
        if let Err(e) = facade.message_removed(&prior_path).await {
            tracing::warn!(path = %prior_path, error = %e, "error closing superseded message");
        }
        drop(facade);
        core.registry
            .point_at(&notification.transaction_id, notification.uuid);
    }
}

fn destroy_record(core: &MediatorCore, uuid: MessageUuid) {
    match core.store.destroy(uuid) {
        Ok(()) => tracing::info!(uuid = %uuid, "record removed from storage"),
        Err(e) => tracing::error!(uuid = %uuid, error = %e, "error removing record from storage"),
    }
}
