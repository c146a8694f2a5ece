//! Outbound submission handling.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nuntium_service::{OutgoingRequest, ServiceHandle};
use nuntium_types::pdu::{MSendReq, SendAttachment, SendErrorClass};
use nuntium_types::variant::status;
use nuntium_types::{NuntiumError, Result};

use crate::mediator::{MediatorCore, SendFileRequest};

/// Builds the submission, registers its surface and encodes it.
///
/// The submission caller is answered with the new message path as
/// soon as the surface exists; encoding and posting happen after.
pub(crate) async fn handle_outgoing(
    core: Arc<MediatorCore>,
    service: ServiceHandle,
    request: OutgoingRequest,
) {
    let mut attachments = Vec::with_capacity(request.attachments.len());
    for descriptor in &request.attachments {
        match SendAttachment::load(&descriptor.id, &descriptor.content_type, &descriptor.file_path) {
            Ok(attachment) => attachments.push(attachment),
            Err(e) => {
                tracing::error!(id = %descriptor.id, error = %e, "cannot build attachment");
                let _ = request.reply.send(Err(e));
                return;
            }
        }
    }

    let send_req = MSendReq::new(request.recipients, attachments, core.use_delivery_reports);
    let uuid = send_req.uuid;
    if let Err(e) = service
        .lock()
        .await
        .reply_send_message(request.reply, uuid)
        .await
    {
        tracing::error!(uuid = %uuid, error = %e, "cannot register outbound surface");
        return;
    }

    tracing::debug!(uuid = %uuid, "encoding m-send.req");
    let file_path = match encode_send_req(&core, &send_req) {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!(uuid = %uuid, error = %e, "unable to encode m-send.req");
            let mut facade = service.lock().await;
            if let Err(e) = facade
                .message_status_changed(uuid, status::PERMANENT_ERROR)
                .await
            {
                tracing::warn!(uuid = %uuid, error = %e, "cannot push status");
            }
            return;
        }
    };

    if core
        .send_file_tx
        .send(SendFileRequest { file_path, uuid })
        .is_err()
    {
        tracing::warn!(uuid = %uuid, "mediator loop is gone, dropping encoded submission");
    }
}

/// Encodes the submission into its scratch file.
fn encode_send_req(core: &MediatorCore, send_req: &MSendReq) -> Result<PathBuf> {
    let (mut file, path) = core.store.create_send_file(send_req.uuid)?;
    if let Err(e) = core.codec.encode_send_req(send_req, &mut file) {
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
    tracing::debug!(file = %path.display(), uuid = %send_req.uuid, "encoded m-send.req");
    Ok(path)
}

/// Posts an encoded submission and settles its surface.
///
/// Whatever happens, the scratch files are unlinked and the surface
/// is destroyed after its final status was pushed.
pub(crate) async fn send_send_req(
    core: Arc<MediatorCore>,
    service: ServiceHandle,
    send_file: SendFileRequest,
) {
    let uuid = send_file.uuid;

    let final_status = match upload_send_req(&core, &service, &send_file.file_path).await {
        Ok(reply_file) => {
            let status = match read_send_conf(&core, &reply_file) {
                Ok(None) => status::SENT,
                Ok(Some(SendErrorClass::Permanent)) => status::PERMANENT_ERROR,
                Ok(Some(SendErrorClass::Transient)) => status::TRANSIENT_ERROR,
                Err(e) => {
                    tracing::warn!(uuid = %uuid, error = %e, "error while decoding m-send.conf");
                    status::TRANSIENT_ERROR
                }
            };
            if let Err(e) = fs::remove_file(&reply_file) {
                tracing::warn!(file = %reply_file.display(), error = %e, "cannot remove m-send.conf file");
            }
            status
        }
        Err(e) => {
            tracing::warn!(uuid = %uuid, error = %e, "cannot upload m-send.req to message center");
            status::TRANSIENT_ERROR
        }
    };

    let mut facade = service.lock().await;
    if let Err(e) = facade.message_status_changed(uuid, final_status).await {
        tracing::warn!(uuid = %uuid, error = %e, "cannot push status");
    }
    if let Err(e) = facade.message_destroy(uuid) {
        tracing::warn!(uuid = %uuid, error = %e, "cannot destroy outbound surface");
    }
    drop(facade);

    if let Err(e) = fs::remove_file(&send_file.file_path) {
        tracing::warn!(file = %send_file.file_path.display(), error = %e, "cannot remove m-send.req file");
    }
}

/// Uploads the encoded submission under the context lock.
async fn upload_send_req(
    core: &MediatorCore,
    service: &ServiceHandle,
    file: &Path,
) -> Result<PathBuf> {
    let _context_guard = core.context_lock.lock().await;

    let preferred = service.lock().await.preferred_context();
    let context = core.radio.activate_mms_context(preferred.as_ref()).await?;

    let outcome = async {
        if let Err(e) = service
            .lock()
            .await
            .set_preferred_context(context.object_path.clone())
            .await
        {
            tracing::warn!(error = %e, "unable to store the preferred context for MMS");
        }
        let proxy = context.proxy()?.clone();
        let message_center = context.message_center()?.to_string();
        core.transport
            .upload(file, &message_center, Some(&proxy))
            .await
    }
    .await;

    if let Err(e) = core.radio.deactivate_mms_context(&context).await {
        tracing::warn!(context = %context.object_path, error = %e, "issues while deactivating context");
    }
    outcome
}

/// Reads and classifies the message center's reply.
fn read_send_conf(core: &MediatorCore, reply_file: &Path) -> Result<Option<SendErrorClass>> {
    let data = fs::read(reply_file).map_err(|e| NuntiumError::Storage {
        reason: format!("reading {}: {e}", reply_file.display()),
    })?;
    let (decoded, decode_log) = core.codec.decode_send_conf(&data);
    let send_conf = decoded.map_err(|e| NuntiumError::Decode {
        reason: format!("unable to decode m-send.conf: {e} with log {decode_log}"),
    })?;
    tracing::info!(status = ?send_conf.response_status, "m-send.conf response status");
    Ok(send_conf.class())
}
