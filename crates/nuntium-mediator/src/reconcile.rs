//! Startup reconciliation of stored transactions.
//!
//! Every stored record belonging to this modem is driven to a stable
//! state: deleted, re-fed into the pipeline, re-forwarded,
//! re-acknowledged, or re-exposed as a rescued surface. Advancement
//! is opportunistic: each step that succeeds moves the record forward
//! immediately, a step that fails leaves it where it is for the next
//! startup.

use std::sync::Arc;

use std::collections::HashMap;

use nuntium_service::ServiceHandle;
use nuntium_types::pdu::{DebugErrorKind, MNotificationInd};
use nuntium_types::{MessageUuid, MmsState, NuntiumError, Result, TransactionState};

use crate::inbound;
use crate::mediator::MediatorCore;

pub(crate) async fn initialize_messages(
    core: Arc<MediatorCore>,
    service: ServiceHandle,
    modem_id: String,
) {
    let uuids = match core.store.get_stored_uuids() {
        Ok(uuids) => uuids,
        Err(e) => {
            // The store is unusable; nothing this mediator does can
            // be trusted any more.
            tracing::error!(error = %e, "cannot list stored messages, terminating");
            let _ = core.terminate_tx.send(());
            return;
        }
    };
    tracing::info!(count = uuids.len(), "initializing messages from storage");

    let mut handled_transactions: HashMap<String, MessageUuid> = HashMap::new();

    for uuid in uuids {
        let state = match core.store.get_mms_state(uuid) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(uuid = %uuid, error = %e, "cannot check state of stored message");
                destroy(&core, uuid);
                continue;
            }
        };

        if !state.is_incoming() {
            tracing::debug!(uuid = %uuid, state = %state.state, "not an incoming message, skipping");
            continue;
        }

        // Housekeeping: old records that predate modem scoping.
        if state.modem_id.is_empty() {
            tracing::info!(uuid = %uuid, state = %state.state, "old unscoped record, deleting");
            destroy(&core, uuid);
            continue;
        }
        if state.modem_id != modem_id {
            continue;
        }

        let Some(notification) = state.m_notification_ind.clone() else {
            tracing::info!(uuid = %uuid, "stored record has no notification, deleting");
            destroy(&core, uuid);
            continue;
        };

        let transaction_id = notification.transaction_id.clone();
        if transaction_id.is_empty() {
            tracing::warn!(uuid = %uuid, "stored notification has an empty transaction id");
        } else {
            if handled_transactions.contains_key(&transaction_id) {
                tracing::info!(
                    uuid = %uuid,
                    transaction = %transaction_id,
                    "duplicate of an already handled transaction, deleting"
                );
                destroy(&core, uuid);
                continue;
            }
            handled_transactions.insert(transaction_id.clone(), uuid);
            // Track it so a fresh operator push coalesces instead of
            // surfacing a second artifact.
            core.registry.point_at(&transaction_id, uuid);
        }

        settle_record(&core, &service, uuid, state, notification).await;
    }
}

/// Drives one incoming record as far forward as possible, then spawns
/// its rescued surface when one is still warranted.
async fn settle_record(
    core: &Arc<MediatorCore>,
    service: &ServiceHandle,
    uuid: MessageUuid,
    mut state: MmsState,
    notification: MNotificationInd,
) {
    let expired = notification.expired();
    let transaction_id = notification.transaction_id.clone();

    let mut current = state.state;
    let mut spawn_surface = false;
    let mut check_history = true;

    if current == TransactionState::Notification {
        if !state.telepathy_error_notified {
            // The failure was never surfaced; run the download again
            // as if the push had just arrived.
            if core.notification_tx.send(notification).is_err() {
                tracing::warn!(uuid = %uuid, "mediator loop is gone, dropping stored notification");
            }
            return;
        }
        if expired {
            // Expired and already surfaced: nothing left to offer.
            destroy(core, uuid);
            let path = service.lock().await.message_path(uuid);
            if let Err(e) = service.lock().await.signal_message_removed(&path).await {
                tracing::warn!(path = %path, error = %e, "error signalling removed message");
            }
            core.registry.remove(&transaction_id);
            return;
        }
        spawn_surface = true;
    }

    if current == TransactionState::Downloaded {
        // Downloaded but never forwarded; try the forward again.
        let mut refreshed = notification.clone();
        match inbound::forward_retrieve_conf(core, service, &mut refreshed).await {
            Ok(retrieve_conf) => match core.store.update_received(retrieve_conf.uuid) {
                Ok(updated) => {
                    state = updated;
                    current = TransactionState::Received;
                    // The surface was just fed; history cannot know
                    // the message yet.
                    check_history = false;
                }
                Err(e) => {
                    tracing::error!(uuid = %uuid, error = %e, "error updating storage");
                    spawn_surface = true;
                }
            },
            Err(e) => {
                tracing::warn!(uuid = %uuid, error = %e, "handling m-retrieve.conf failed");
                spawn_surface = true;
            }
        }
    }

    if current == TransactionState::Received && !spawn_surface {
        let mut acknowledged = true;
        if !expired {
            if let Err(e) = respond_message(core, service, &state).await {
                tracing::warn!(uuid = %uuid, error = %e, "error responding to message center");
                acknowledged = false;
            }
        }
        if acknowledged {
            match core.store.update_responded(uuid) {
                Ok(updated) => {
                    state = updated;
                    current = TransactionState::Responded;
                }
                Err(e) => {
                    tracing::error!(uuid = %uuid, error = %e, "error updating storage");
                    spawn_surface = true;
                }
            }
        } else {
            spawn_surface = true;
        }
    }

    if current == TransactionState::Responded && !spawn_surface {
        core.registry.remove(&transaction_id);

        if check_history {
            let path = service.lock().await.message_path(uuid);
            match core.history.get_message(path.as_str()).await {
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "error querying history service")
                }
                Ok(message) => {
                    if !message.exists() {
                        tracing::info!(uuid = %uuid, "message unknown to history service, deleting");
                        destroy(core, uuid);
                        return;
                    }
                    match message.is_new() {
                        Err(e) => {
                            tracing::warn!(uuid = %uuid, error = %e, "error checking history read state")
                        }
                        Ok(false) => {
                            tracing::info!(uuid = %uuid, "message already read, deleting");
                            destroy(core, uuid);
                            return;
                        }
                        Ok(true) => {}
                    }
                }
            }
        }
        spawn_surface = true;
    }

    if spawn_surface {
        let retrieve_conf = inbound::decode_retrieve_conf(core, uuid).ok();
        let notification = state.m_notification_ind.clone().unwrap_or(notification);
        if let Err(e) = service
            .lock()
            .await
            .initialization_message_added(retrieve_conf.as_ref(), &notification)
            .await
        {
            tracing::warn!(uuid = %uuid, error = %e, "error adding rescued message");
        }
    }
}

/// Re-acknowledges a forwarded message to the message center.
async fn respond_message(
    core: &Arc<MediatorCore>,
    service: &ServiceHandle,
    state: &MmsState,
) -> Result<()> {
    let _context_guard = core.context_lock.lock().await;

    let notification = state
        .m_notification_ind
        .as_ref()
        .ok_or_else(|| NuntiumError::Storage {
            reason: "record has no notification to respond for".into(),
        })?;
    let retrieve_conf = inbound::decode_retrieve_conf(core, notification.uuid)?;
    let notify_resp = retrieve_conf.notify_resp(core.use_delivery_reports);

    if notification.is_debug() {
        tracing::info!(uuid = %notification.uuid, "local test, skipping m-notifyresp.ind");
        let mut refreshed = notification.clone();
        if refreshed.pop_debug_error(DebugErrorKind::RespondHandle).is_some() {
            tracing::warn!(uuid = %refreshed.uuid, "forcing respond-handle debug error");
            if let Err(e) = core.store.update_m_notification_ind(&refreshed) {
                tracing::warn!(uuid = %refreshed.uuid, error = %e, "cannot persist debug mutation");
            }
            return Err(NuntiumError::Service {
                reason: "forced respond-handle error".into(),
            });
        }
        return Ok(());
    }

    let preferred = service.lock().await.preferred_context();
    let context = core
        .radio
        .activate_mms_context(preferred.as_ref())
        .await
        .map_err(|e| NuntiumError::Radio {
            reason: format!("error activating context: {e}"),
        })?;

    let outcome = async {
        let response_file = inbound::encode_notify_resp(core, &notify_resp)?;
        inbound::upload_notify_resp(core, &response_file, &context).await
    }
    .await;

    if let Err(e) = core.radio.deactivate_mms_context(&context).await {
        tracing::warn!(context = %context.object_path, error = %e, "issues while deactivating context");
    }
    outcome
}

fn destroy(core: &MediatorCore, uuid: MessageUuid) {
    if let Err(e) = core.store.destroy(uuid) {
        tracing::error!(uuid = %uuid, error = %e, "error destroying record");
    }
}
