//! Outbound submission tests.

mod support;

use nuntium_service::OutAttachment;
use nuntium_types::pdu::{MSendReq, SendResponseStatus};
use nuntium_types::variant::status;
use nuntium_types::NuntiumError;

use support::*;

fn attachment(dir: &std::path::Path, name: &str) -> OutAttachment {
    let file_path = dir.join(name);
    std::fs::write(&file_path, b"attachment-bytes").unwrap();
    OutAttachment {
        id: "att0".into(),
        content_type: "image/jpeg".into(),
        file_path,
    }
}

/// No state or scratch files may survive a settled submission.
async fn assert_no_leftovers(harness: &Harness) {
    let store_dir = harness.dir.join("store");
    let leftovers = move || -> Vec<std::path::PathBuf> {
        std::fs::read_dir(&store_dir)
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    };
    wait_until_sync("scratch files cleaned", || leftovers().is_empty()).await;
    let transport = harness.transport.clone();
    wait_until_sync("transport spool cleaned", move || {
        transport.spooled_files().is_empty()
    })
    .await;
    assert!(harness.store.get_stored_uuids().unwrap().is_empty());
}

#[tokio::test]
async fn submission_reaches_sent() {
    let harness = Harness::start_with_identity().await;
    harness
        .transport
        .script_upload(Ok(send_conf_bytes(SendResponseStatus::Ok)));

    let reply = harness
        .service()
        .await
        .lock()
        .await
        .send_message(
            vec!["+15551234".into()],
            vec![attachment(&harness.dir, "photo.jpg")],
        )
        .unwrap();
    let path = reply.await.unwrap().unwrap();

    let bus = harness.bus.clone();
    wait_until_sync("status pushed", || !bus.status_changes().is_empty()).await;
    assert_eq!(
        harness.bus.status_changes(),
        vec![(path.clone(), status::SENT.to_string())]
    );
    assert_eq!(harness.bus.added_paths(), vec![path.clone()]);

    // The encoded submission carried the normalized recipient.
    let body = harness.transport.uploaded_bodies.lock().unwrap()[0].clone();
    let send_req: MSendReq = bincode::deserialize(&body).unwrap();
    assert_eq!(send_req.recipients, vec!["+15551234/TYPE=PLMN".to_string()]);
    assert_eq!(send_req.attachments.len(), 1);

    // Surface destroyed, files cleaned up.
    let service = harness.service().await;
    wait_until("surface destroyed", move || {
        let service = service.clone();
        let path = path.clone();
        async move { service.lock().await.surface(&path).is_none() }
    })
    .await;
    assert_no_leftovers(&harness).await;
}

#[tokio::test]
async fn permanent_send_failure_is_pushed_and_cleaned_up() {
    let harness = Harness::start_with_identity().await;
    harness.transport.script_upload(Ok(send_conf_bytes(
        SendResponseStatus::ErrorPermanentServiceDenied,
    )));

    let reply = harness
        .service()
        .await
        .lock()
        .await
        .send_message(
            vec!["+15551234".into()],
            vec![attachment(&harness.dir, "clip.mp4")],
        )
        .unwrap();
    let path = reply.await.unwrap().unwrap();

    let bus = harness.bus.clone();
    wait_until_sync("status pushed", || !bus.status_changes().is_empty()).await;
    assert_eq!(
        harness.bus.status_changes(),
        vec![(path.clone(), status::PERMANENT_ERROR.to_string())]
    );

    let service = harness.service().await;
    wait_until("surface destroyed", move || {
        let service = service.clone();
        let path = path.clone();
        async move { service.lock().await.surface(&path).is_none() }
    })
    .await;
    assert_no_leftovers(&harness).await;
}

#[tokio::test]
async fn upload_failure_is_transient() {
    let harness = Harness::start_with_identity().await;
    harness.transport.script_upload(Err(NuntiumError::Transport {
        reason: "mmsc unreachable".into(),
    }));

    let reply = harness
        .service()
        .await
        .lock()
        .await
        .send_message(
            vec!["+15551234".into()],
            vec![attachment(&harness.dir, "note.txt")],
        )
        .unwrap();
    let path = reply.await.unwrap().unwrap();

    let bus = harness.bus.clone();
    wait_until_sync("status pushed", || !bus.status_changes().is_empty()).await;
    assert_eq!(
        harness.bus.status_changes(),
        vec![(path, status::TRANSIENT_ERROR.to_string())]
    );
    assert_no_leftovers(&harness).await;
}

#[tokio::test]
async fn unreadable_attachment_rejects_the_submission() {
    let harness = Harness::start_with_identity().await;

    let reply = harness
        .service()
        .await
        .lock()
        .await
        .send_message(
            vec!["+15551234".into()],
            vec![OutAttachment {
                id: "gone".into(),
                content_type: "image/jpeg".into(),
                file_path: harness.dir.join("does-not-exist.jpg"),
            }],
        )
        .unwrap();

    // The submission is answered with the attachment error; no
    // surface ever appears.
    let outcome = reply.await.unwrap();
    assert!(matches!(outcome, Err(NuntiumError::InvalidArguments { .. })));
    assert_eq!(harness.bus.added_count(), 0);
    assert_no_leftovers(&harness).await;
}
