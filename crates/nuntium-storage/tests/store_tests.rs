//! Integration tests for the per-message store.
//!
//! All tests run against a throwaway directory and re-open the store
//! where restart behavior matters.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{Duration, TimeZone, Utc};

use nuntium_storage::Store;
use nuntium_types::pdu::MNotificationInd;
use nuntium_types::{BusPath, MessageUuid, NuntiumError, TransactionState};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Returns a unique temporary directory for each test.
fn temp_dir() -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "nuntium-store-test-{}-{}-{}",
        std::process::id(),
        id,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    ));
    let _ = std::fs::create_dir_all(&dir);
    dir
}

fn notification(transaction_id: &str) -> MNotificationInd {
    let base = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).single().unwrap();
    MNotificationInd {
        uuid: MessageUuid::random(),
        redownload_of: None,
        transaction_id: transaction_id.to_string(),
        from: "+15550001111/TYPE=PLMN".into(),
        content_location: "http://mmsc.example/content/1".into(),
        expire: base + Duration::hours(1),
        size: 2048,
        received: base,
        debug_errors: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn create_and_read_back() {
    let store = Store::open(temp_dir()).unwrap();
    let notif = notification("tx-1");

    let state = store.create("sim0", &notif).unwrap();
    assert_eq!(state.state, TransactionState::Notification);
    assert!(!state.telepathy_error_notified);

    let loaded = store.get_mms_state(notif.uuid).unwrap();
    assert_eq!(loaded.modem_id, "sim0");
    assert_eq!(loaded.m_notification_ind.as_ref().unwrap().transaction_id, "tx-1");
    assert_eq!(loaded.m_notification_ind.unwrap().received, notif.received);
}

#[test]
fn records_survive_a_reopen() {
    let dir = temp_dir();
    let notif = notification("tx-restart");
    {
        let store = Store::open(&dir).unwrap();
        store.create("sim0", &notif).unwrap();
    }
    let store = Store::open(&dir).unwrap();
    let uuids = store.get_stored_uuids().unwrap();
    assert_eq!(uuids, vec![notif.uuid]);
    let state = store.get_mms_state(notif.uuid).unwrap();
    assert_eq!(state.state, TransactionState::Notification);
}

#[test]
fn missing_records_report_not_found() {
    let store = Store::open(temp_dir()).unwrap();
    let err = store.get_mms_state(MessageUuid::random()).unwrap_err();
    assert!(matches!(err, NuntiumError::NotFound { .. }));
}

#[test]
fn transitions_walk_the_full_ladder() {
    let dir = temp_dir();
    let store = Store::open(&dir).unwrap();
    let notif = notification("tx-ladder");
    store.create("sim0", &notif).unwrap();

    let content = dir.join("content.mms");
    std::fs::write(&content, b"pdu-bytes").unwrap();

    let state = store.update_downloaded(notif.uuid, &content).unwrap();
    assert_eq!(state.state, TransactionState::Downloaded);
    assert_eq!(state.content_path.as_deref(), Some(content.as_path()));

    let state = store.update_received(notif.uuid).unwrap();
    assert_eq!(state.state, TransactionState::Received);

    let state = store.update_responded(notif.uuid).unwrap();
    assert_eq!(state.state, TransactionState::Responded);
}

#[test]
fn out_of_order_transitions_are_rejected() {
    let dir = temp_dir();
    let store = Store::open(&dir).unwrap();
    let notif = notification("tx-order");
    store.create("sim0", &notif).unwrap();

    // Skipping downloaded is refused.
    assert!(store.update_received(notif.uuid).is_err());
    assert!(store.update_responded(notif.uuid).is_err());

    let content = dir.join("c.mms");
    std::fs::write(&content, b"x").unwrap();
    store.update_downloaded(notif.uuid, &content).unwrap();

    // Re-running a completed transition is refused and the record is
    // left untouched.
    assert!(store.update_downloaded(notif.uuid, &content).is_err());
    let state = store.get_mms_state(notif.uuid).unwrap();
    assert_eq!(state.state, TransactionState::Downloaded);

    store.update_received(notif.uuid).unwrap();
    store.update_responded(notif.uuid).unwrap();
    assert!(store.update_received(notif.uuid).is_err());
    let state = store.get_mms_state(notif.uuid).unwrap();
    assert_eq!(state.state, TransactionState::Responded);
}

#[test]
fn error_notified_flag_is_idempotent() {
    let store = Store::open(temp_dir()).unwrap();
    let notif = notification("tx-flag");
    store.create("sim0", &notif).unwrap();

    let state = store.set_telepathy_error_notified(notif.uuid).unwrap();
    assert!(state.telepathy_error_notified);
    let state = store.set_telepathy_error_notified(notif.uuid).unwrap();
    assert!(state.telepathy_error_notified);
    assert_eq!(state.state, TransactionState::Notification);
}

#[test]
fn update_m_notification_ind_overwrites_in_place() {
    let store = Store::open(temp_dir()).unwrap();
    let mut notif = notification("tx-mut");
    store.create("sim0", &notif).unwrap();

    notif.size = 9999;
    store.update_m_notification_ind(&notif).unwrap();
    let state = store.get_mms_state(notif.uuid).unwrap();
    assert_eq!(state.m_notification_ind.unwrap().size, 9999);
}

#[test]
fn destroy_removes_record_and_content() {
    let dir = temp_dir();
    let store = Store::open(&dir).unwrap();
    let notif = notification("tx-destroy");
    store.create("sim0", &notif).unwrap();

    let content = dir.join("owned.mms");
    std::fs::write(&content, b"pdu").unwrap();
    store.update_downloaded(notif.uuid, &content).unwrap();

    store.destroy(notif.uuid).unwrap();
    assert!(!content.exists());
    assert!(matches!(
        store.get_mms_state(notif.uuid),
        Err(NuntiumError::NotFound { .. })
    ));
    assert!(store.get_stored_uuids().unwrap().is_empty());
}

#[test]
fn scratch_files_are_created_and_listed_nowhere() {
    let store = Store::open(temp_dir()).unwrap();
    let uuid = MessageUuid::random();

    let (mut resp, resp_path) = store.create_response_file(uuid).unwrap();
    use std::io::Write;
    resp.write_all(b"encoded-notifyresp").unwrap();
    resp.sync_all().unwrap();
    drop(resp);
    assert!(resp_path.exists());

    let (_send, send_path) = store.create_send_file(uuid).unwrap();
    assert!(send_path.exists());

    // Scratch files are not records.
    assert!(store.get_stored_uuids().unwrap().is_empty());
}

#[test]
fn get_mms_requires_downloaded_content() {
    let dir = temp_dir();
    let store = Store::open(&dir).unwrap();
    let notif = notification("tx-content");
    store.create("sim0", &notif).unwrap();

    assert!(matches!(
        store.get_mms(notif.uuid),
        Err(NuntiumError::NotFound { .. })
    ));

    let content = dir.join("body.mms");
    std::fs::write(&content, b"pdu").unwrap();
    store.update_downloaded(notif.uuid, &content).unwrap();
    assert_eq!(store.get_mms(notif.uuid).unwrap(), content);
}

#[test]
fn preferred_context_roundtrips_per_identity() {
    let dir = temp_dir();
    {
        let store = Store::open(&dir).unwrap();
        assert!(matches!(
            store.get_preferred_context("sim0"),
            Err(NuntiumError::NotFound { .. })
        ));
        store
            .set_preferred_context("sim0", &BusPath::new("/ril_0/context1"))
            .unwrap();
        store
            .set_preferred_context("sim1", &BusPath::new("/ril_1/context2"))
            .unwrap();
    }
    // Survives a reopen and stays per-identity.
    let store = Store::open(&dir).unwrap();
    assert_eq!(
        store.get_preferred_context("sim0").unwrap(),
        BusPath::new("/ril_0/context1")
    );
    assert_eq!(
        store.get_preferred_context("sim1").unwrap(),
        BusPath::new("/ril_1/context2")
    );
}
