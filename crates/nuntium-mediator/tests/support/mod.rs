//! Shared fakes and harness for the mediator integration tests.
//!
//! Every adapter is a scripted fake: tests queue the outcomes they
//! expect the outside world to produce, run the pipeline through the
//! real event loop, and assert on the recorded signals, the store and
//! the registry. No real radio, network or bus is involved, and no
//! test depends on wall-clock timing beyond a bounded poll.

// Each test binary uses its own slice of this module.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use tokio::sync::Mutex;

use nuntium_mediator::{Mediator, MediatorConfig, MediatorHandle, TransactionRegistry};
use nuntium_service::{ServiceHandle, ServiceManager};
use nuntium_storage::Store;
use nuntium_types::adapters::{
    AccountsService, BusSignal, DecodeLog, HistoryMessage, HistoryService, MessageBus, MmsContext,
    MmsTransport, PduCodec, ProxyInfo, RadioContextManager,
};
use nuntium_types::pdu::{
    DataPart, MNotificationInd, MNotifyRespInd, MRetrieveConf, MSendConf, MSendReq, PushPdu,
};
use nuntium_types::{BusPath, MessageUuid, NuntiumError, Result};

pub const IDENTITY: &str = "sim0";

// ---------------------------------------------------------------------------
// Temp dirs
// ---------------------------------------------------------------------------

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Returns a unique temporary directory for each test.
pub fn temp_dir() -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "nuntium-mediator-test-{}-{}-{}",
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

// ---------------------------------------------------------------------------
// PDU builders
// ---------------------------------------------------------------------------

/// Fixed base instant so timestamps are deterministic.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// A fresh inbound notification expiring one hour from now.
pub fn notification(transaction_id: &str) -> MNotificationInd {
    MNotificationInd {
        uuid: MessageUuid::random(),
        redownload_of: None,
        transaction_id: transaction_id.to_string(),
        from: "12345/TYPE=PLMN".into(),
        content_location: "http://mmsc.example/get/1".into(),
        expire: Utc::now() + ChronoDuration::hours(1),
        size: 2048,
        received: base_time(),
        debug_errors: Vec::new(),
    }
}

/// Wire bytes of a push carrying `notification`.
pub fn push_bytes(notification: &MNotificationInd) -> PushPdu {
    PushPdu {
        data: bincode::serialize(notification).expect("serializing push"),
    }
}

/// A retrieve-conf with one attachment part, as wire bytes.
pub fn retrieve_conf_bytes(transaction_id: &str, subject: Option<&str>) -> Vec<u8> {
    let retrieve_conf = MRetrieveConf {
        uuid: MessageUuid::random(),
        transaction_id: transaction_id.to_string(),
        from: "12345/TYPE=PLMN".into(),
        to: vec!["54321/TYPE=PLMN".into()],
        date: base_time().timestamp() as u64,
        subject: subject.map(|s| s.to_string()),
        parts: vec![DataPart {
            content_id: "<part0>".into(),
            media_type: "image/jpeg".into(),
            offset: 0,
            length: 16,
        }],
    };
    bincode::serialize(&retrieve_conf).expect("serializing retrieve-conf")
}

/// Wire bytes of a send-conf with the given response status.
pub fn send_conf_bytes(status: nuntium_types::pdu::SendResponseStatus) -> Vec<u8> {
    bincode::serialize(&MSendConf {
        response_status: status,
    })
    .expect("serializing send-conf")
}

// ---------------------------------------------------------------------------
// Codec fake
// ---------------------------------------------------------------------------

/// Bincode codec mirroring what the daemon's local harness speaks.
pub struct TestCodec;

impl PduCodec for TestCodec {
    fn decode_notification(
        &self,
        data: &[u8],
        received: DateTime<Utc>,
    ) -> (Result<MNotificationInd>, DecodeLog) {
        match bincode::deserialize::<MNotificationInd>(data) {
            Ok(mut notification) => {
                notification.uuid = MessageUuid::random();
                notification.received = received;
                (Ok(notification), DecodeLog::default())
            }
            Err(e) => (
                Err(NuntiumError::Decode {
                    reason: e.to_string(),
                }),
                DecodeLog(format!("bincode: {e}")),
            ),
        }
    }

    fn decode_retrieve_conf(
        &self,
        data: &[u8],
        uuid: MessageUuid,
    ) -> (Result<MRetrieveConf>, DecodeLog) {
        match bincode::deserialize::<MRetrieveConf>(data) {
            Ok(mut retrieve_conf) => {
                retrieve_conf.uuid = uuid;
                (Ok(retrieve_conf), DecodeLog::default())
            }
            Err(e) => (
                Err(NuntiumError::Decode {
                    reason: e.to_string(),
                }),
                DecodeLog(format!("bincode: {e}")),
            ),
        }
    }

    fn decode_send_conf(&self, data: &[u8]) -> (Result<MSendConf>, DecodeLog) {
        match bincode::deserialize::<MSendConf>(data) {
            Ok(send_conf) => (Ok(send_conf), DecodeLog::default()),
            Err(e) => (
                Err(NuntiumError::Decode {
                    reason: e.to_string(),
                }),
                DecodeLog(format!("bincode: {e}")),
            ),
        }
    }

    fn encode_notify_resp(&self, resp: &MNotifyRespInd, sink: &mut dyn std::io::Write) -> Result<()> {
        bincode::serialize_into(sink, resp).map_err(|e| NuntiumError::Encode {
            reason: e.to_string(),
        })
    }

    fn encode_send_req(&self, req: &MSendReq, sink: &mut dyn std::io::Write) -> Result<()> {
        bincode::serialize_into(sink, req).map_err(|e| NuntiumError::Encode {
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Radio fake
// ---------------------------------------------------------------------------

/// Scripted radio: activation hands out whatever the test configured.
pub struct FakeRadio {
    outcome: StdMutex<Result<MmsContext>>,
    pub activations: AtomicUsize,
    pub deactivations: AtomicUsize,
}

impl FakeRadio {
    /// A radio whose context has proxy and message center configured.
    pub fn working() -> Self {
        Self {
            outcome: StdMutex::new(Ok(Self::context_with_proxy())),
            activations: AtomicUsize::new(0),
            deactivations: AtomicUsize::new(0),
        }
    }

    pub fn context_with_proxy() -> MmsContext {
        MmsContext {
            object_path: BusPath::new("/ril_0/context1"),
            proxy: Some(ProxyInfo {
                host: "10.0.0.1".into(),
                port: 8080,
            }),
            message_center: Some("http://mmsc.example/send".into()),
        }
    }

    /// Future activations yield this context.
    pub fn set_context(&self, context: MmsContext) {
        *self.outcome.lock().unwrap() = Ok(context);
    }

    /// Future activations fail.
    pub fn fail_activation(&self, reason: &str) {
        *self.outcome.lock().unwrap() = Err(NuntiumError::Radio {
            reason: reason.to_string(),
        });
    }
}

#[async_trait]
impl RadioContextManager for FakeRadio {
    async fn activate_mms_context(&self, _preferred: Option<&BusPath>) -> Result<MmsContext> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        self.outcome.lock().unwrap().clone()
    }

    async fn deactivate_mms_context(&self, _context: &MmsContext) -> Result<()> {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn register_push_agent(&self) -> Result<()> {
        Ok(())
    }

    async fn unregister_push_agent(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transport fake
// ---------------------------------------------------------------------------

/// Scripted transport: tests queue download/upload outcomes in order.
pub struct FakeTransport {
    dir: PathBuf,
    downloads: StdMutex<VecDeque<Result<Vec<u8>>>>,
    uploads: StdMutex<VecDeque<Result<Vec<u8>>>>,
    pub downloaded_urls: StdMutex<Vec<String>>,
    pub uploaded_bodies: StdMutex<Vec<Vec<u8>>>,
}

impl FakeTransport {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            downloads: StdMutex::new(VecDeque::new()),
            uploads: StdMutex::new(VecDeque::new()),
            downloaded_urls: StdMutex::new(Vec::new()),
            uploaded_bodies: StdMutex::new(Vec::new()),
        }
    }

    pub fn script_download(&self, outcome: Result<Vec<u8>>) {
        self.downloads.lock().unwrap().push_back(outcome);
    }

    pub fn script_upload(&self, outcome: Result<Vec<u8>>) {
        self.uploads.lock().unwrap().push_back(outcome);
    }

    pub fn upload_count(&self) -> usize {
        self.uploaded_bodies.lock().unwrap().len()
    }

    /// Files still sitting in the transport spool.
    pub fn spooled_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
    }

    fn spool(&self, label: &str, body: &[u8]) -> Result<PathBuf> {
        let path = self.dir.join(format!("{label}-{}", MessageUuid::random()));
        std::fs::write(&path, body).map_err(|e| NuntiumError::Transport {
            reason: format!("writing {}: {e}", path.display()),
        })?;
        Ok(path)
    }
}

#[async_trait]
impl MmsTransport for FakeTransport {
    async fn download(&self, url: &str, _proxy: Option<&ProxyInfo>) -> Result<PathBuf> {
        self.downloaded_urls.lock().unwrap().push(url.to_string());
        let outcome = self
            .downloads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(NuntiumError::Transport {
                    reason: "unscripted download".into(),
                })
            });
        let body = outcome?;
        self.spool("retrieve", &body)
    }

    async fn upload(
        &self,
        file: &std::path::Path,
        _message_center: &str,
        _proxy: Option<&ProxyInfo>,
    ) -> Result<PathBuf> {
        let body = std::fs::read(file).map_err(|e| NuntiumError::Transport {
            reason: format!("reading {}: {e}", file.display()),
        })?;
        self.uploaded_bodies.lock().unwrap().push(body);
        let outcome = self.uploads.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(NuntiumError::Transport {
                reason: "unscripted upload".into(),
            })
        });
        let reply = outcome?;
        self.spool("reply", &reply)
    }
}

// ---------------------------------------------------------------------------
// History fake
// ---------------------------------------------------------------------------

struct FakeHistoryMessage {
    exists: bool,
    is_new: bool,
}

impl HistoryMessage for FakeHistoryMessage {
    fn exists(&self) -> bool {
        self.exists
    }

    fn is_new(&self) -> Result<bool> {
        Ok(self.is_new)
    }
}

/// History fake: unknown paths count as present and unread.
pub struct FakeHistory {
    entries: StdMutex<HashMap<String, (bool, bool)>>,
}

impl FakeHistory {
    pub fn new() -> Self {
        Self {
            entries: StdMutex::new(HashMap::new()),
        }
    }

    /// Scripts the `(exists, is_new)` answer for one message path.
    pub fn set(&self, event_id: &str, exists: bool, is_new: bool) {
        self.entries
            .lock()
            .unwrap()
            .insert(event_id.to_string(), (exists, is_new));
    }
}

#[async_trait]
impl HistoryService for FakeHistory {
    async fn get_message(&self, event_id: &str) -> Result<Box<dyn HistoryMessage>> {
        let (exists, is_new) = self
            .entries
            .lock()
            .unwrap()
            .get(event_id)
            .copied()
            .unwrap_or((true, true));
        Ok(Box::new(FakeHistoryMessage { exists, is_new }))
    }
}

// ---------------------------------------------------------------------------
// Accounts fake
// ---------------------------------------------------------------------------

pub struct FakeAccounts {
    mms_enabled: AtomicBool,
}

impl FakeAccounts {
    pub fn new() -> Self {
        Self {
            mms_enabled: AtomicBool::new(true),
        }
    }

    pub fn set_mms_enabled(&self, enabled: bool) {
        self.mms_enabled.store(enabled, Ordering::SeqCst);
    }
}

#[async_trait]
impl AccountsService for FakeAccounts {
    async fn mms_enabled(&self) -> bool {
        self.mms_enabled.load(Ordering::SeqCst)
    }

    async fn mobile_data_enabled(&self) -> Result<bool> {
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Bus recorder
// ---------------------------------------------------------------------------

/// Records every emitted signal; can be told to fail the next emits.
pub struct RecordingBus {
    signals: StdMutex<Vec<BusSignal>>,
    fail_next: AtomicUsize,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self {
            signals: StdMutex::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
        }
    }

    pub fn signals(&self) -> Vec<BusSignal> {
        self.signals.lock().unwrap().clone()
    }

    /// The next `count` emissions will fail.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Scripted failures not yet consumed by an emission.
    pub fn pending_failures(&self) -> usize {
        self.fail_next.load(Ordering::SeqCst)
    }

    pub fn added_paths(&self) -> Vec<BusPath> {
        self.signals()
            .into_iter()
            .filter_map(|signal| match signal {
                BusSignal::MessageAdded { path, .. } => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn removed_paths(&self) -> Vec<BusPath> {
        self.signals()
            .into_iter()
            .filter_map(|signal| match signal {
                BusSignal::MessageRemoved { path } => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn added_count(&self) -> usize {
        self.added_paths().len()
    }

    /// Properties of the `MessageAdded` for `path`, if recorded.
    pub fn added_properties(&self, path: &BusPath) -> Option<nuntium_types::variant::PropertyMap> {
        self.signals().into_iter().find_map(|signal| match signal {
            BusSignal::MessageAdded {
                path: added,
                properties,
            } if added == *path => Some(properties),
            _ => None,
        })
    }

    /// `(path, status)` pairs of every Status property change.
    pub fn status_changes(&self) -> Vec<(BusPath, String)> {
        self.signals()
            .into_iter()
            .filter_map(|signal| match signal {
                BusSignal::PropertyChanged { path, name, value }
                    if name == nuntium_types::variant::prop::STATUS =>
                {
                    value.as_str().map(|s| (path, s.to_string()))
                }
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn emit(&self, signal: BusSignal) -> Result<()> {
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(NuntiumError::Service {
                reason: "scripted bus failure".into(),
            });
        }
        self.signals.lock().unwrap().push(signal);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub dir: PathBuf,
    pub store: Arc<Store>,
    pub bus: Arc<RecordingBus>,
    pub radio: Arc<FakeRadio>,
    pub transport: Arc<FakeTransport>,
    pub history: Arc<FakeHistory>,
    pub accounts: Arc<FakeAccounts>,
    pub manager: Arc<Mutex<ServiceManager>>,
    pub registry: Arc<TransactionRegistry>,
    pub handle: MediatorHandle,
}

impl Harness {
    /// Builds the full stack around scripted fakes and starts the
    /// mediator loop. The identity is not added yet.
    pub fn start() -> Self {
        let dir = temp_dir();
        let store = Arc::new(Store::open(&dir).expect("opening store"));
        let bus = Arc::new(RecordingBus::new());
        let radio = Arc::new(FakeRadio::working());
        let transport = Arc::new(FakeTransport::new(dir.join("transport")));
        let _ = std::fs::create_dir_all(dir.join("transport"));
        let history = Arc::new(FakeHistory::new());
        let accounts = Arc::new(FakeAccounts::new());

        let manager = Arc::new(Mutex::new(ServiceManager::new(
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            Arc::clone(&store),
            Arc::clone(&accounts) as Arc<dyn AccountsService>,
            false,
        )));

        let mediator = Mediator::new(
            MediatorConfig {
                modem_path: BusPath::new("/ril_0"),
                use_delivery_reports: false,
            },
            Arc::clone(&store),
            Arc::new(TestCodec),
            Arc::clone(&radio) as Arc<dyn RadioContextManager>,
            Arc::clone(&transport) as Arc<dyn MmsTransport>,
            Arc::clone(&history) as Arc<dyn HistoryService>,
            Arc::clone(&accounts) as Arc<dyn AccountsService>,
            Arc::clone(&manager),
        );
        let registry = mediator.registry();
        let handle = mediator.handle();
        mediator.start();

        Self {
            dir,
            store,
            bus,
            radio,
            transport,
            history,
            accounts,
            manager,
            registry,
            handle,
        }
    }

    /// Starts the stack and brings the identity up.
    pub async fn start_with_identity() -> Self {
        let harness = Self::start();
        harness.add_identity().await;
        harness
    }

    pub async fn add_identity(&self) {
        self.handle
            .identity_added_tx
            .send(IDENTITY.to_string())
            .expect("mediator loop alive");
        let manager = Arc::clone(&self.manager);
        wait_until("service registered", move || {
            let manager = Arc::clone(&manager);
            async move { manager.lock().await.service(IDENTITY).is_some() }
        })
        .await;
    }

    pub async fn remove_identity(&self) {
        self.handle
            .identity_removed_tx
            .send(IDENTITY.to_string())
            .expect("mediator loop alive");
        let manager = Arc::clone(&self.manager);
        wait_until("service unregistered", move || {
            let manager = Arc::clone(&manager);
            async move { manager.lock().await.service(IDENTITY).is_none() }
        })
        .await;
    }

    pub async fn service(&self) -> ServiceHandle {
        self.manager
            .lock()
            .await
            .service(IDENTITY)
            .expect("service registered")
    }

    pub fn message_path(&self, uuid: MessageUuid) -> BusPath {
        BusPath::message(IDENTITY, uuid)
    }

    /// Ingests a notification the way the push handler would, with a
    /// caller-chosen UUID: stores the record, then feeds the loop.
    pub fn inject_notification(&self, notification: &MNotificationInd) {
        self.store
            .create(IDENTITY, notification)
            .expect("storing notification");
        self.handle
            .notification_tx
            .send(notification.clone())
            .expect("mediator loop alive");
    }
}

// ---------------------------------------------------------------------------
// Waiting
// ---------------------------------------------------------------------------

/// Polls `condition` until it holds, panicking after five seconds.
pub async fn wait_until<F, Fut>(label: &str, condition: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if condition().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {label}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Synchronous flavour of [`wait_until`].
pub async fn wait_until_sync(label: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if condition() {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {label}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
