//! Contracts for the external collaborators of the mediator.
//!
//! Everything the mediator needs from the outside world comes through
//! these traits: the PDU wire codec, the radio data-context manager,
//! the HTTP transport to the message center, the history service, the
//! accounts feature flags, and the message bus the service facade
//! broadcasts on. Production implementations live in the daemon (or
//! an embedding process); tests substitute scripted fakes.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::pdu::{MNotificationInd, MNotifyRespInd, MRetrieveConf, MSendConf, MSendReq};
use crate::variant::{PropertyMap, Variant};
use crate::{BusPath, NuntiumError, Result};

// ---------------------------------------------------------------------------
// PDU codec
// ---------------------------------------------------------------------------

/// Diagnostics trail produced by a decode run.
///
/// Included verbatim in log lines when a decode fails; empty when the
/// codec has nothing to report.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodeLog(pub String);

impl fmt::Display for DecodeLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire encoder/decoder for the MMS PDUs.
///
/// Decoders return their diagnostics log alongside the result so a
/// failure can be reported together with what the decoder saw.
pub trait PduCodec: Send + Sync {
    /// Decodes a pushed M-Notification.ind.
    ///
    /// The codec mints the local transaction UUID and stamps the
    /// notification with `received`.
    fn decode_notification(
        &self,
        data: &[u8],
        received: DateTime<Utc>,
    ) -> (Result<MNotificationInd>, DecodeLog);

    /// Decodes a downloaded M-Retrieve.conf for the given transaction.
    fn decode_retrieve_conf(
        &self,
        data: &[u8],
        uuid: crate::MessageUuid,
    ) -> (Result<MRetrieveConf>, DecodeLog);

    /// Decodes an M-Send.conf response body.
    fn decode_send_conf(&self, data: &[u8]) -> (Result<MSendConf>, DecodeLog);

    /// Encodes an M-NotifyResp.ind into the sink.
    fn encode_notify_resp(&self, resp: &MNotifyRespInd, sink: &mut dyn Write) -> Result<()>;

    /// Encodes an M-Send.req into the sink.
    fn encode_send_req(&self, req: &MSendReq, sink: &mut dyn Write) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Radio context
// ---------------------------------------------------------------------------

/// HTTP proxy coordinates exposed by an active data context.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProxyInfo {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ProxyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An activated MMS-capable data context.
#[derive(Clone, Debug, PartialEq)]
pub struct MmsContext {
    /// Radio object path of the context; persisted as the preferred
    /// context once a transaction succeeds over it.
    pub object_path: BusPath,
    /// Proxy coordinates, when the context configures one.
    pub proxy: Option<ProxyInfo>,
    /// Message-center URL, when the context configures one.
    pub message_center: Option<String>,
}

impl MmsContext {
    /// The proxy for MMS traffic, or an error when none is configured.
    pub fn proxy(&self) -> Result<&ProxyInfo> {
        self.proxy.as_ref().ok_or_else(|| NuntiumError::Radio {
            reason: format!("context {} has no MMS proxy configured", self.object_path),
        })
    }

    /// The message-center URL, or an error when none is configured.
    pub fn message_center(&self) -> Result<&str> {
        self.message_center
            .as_deref()
            .ok_or_else(|| NuntiumError::Radio {
                reason: format!("context {} has no message center configured", self.object_path),
            })
    }
}

/// Modem-side operations: data-context activation and the push agent.
///
/// Implementations classify activation failures themselves and retry
/// the "needs wait" class (activation in progress, attach in
/// progress, not attached, failed) a bounded number of times before
/// giving up; the mediator only ever sees the final outcome.
#[async_trait]
pub trait RadioContextManager: Send + Sync {
    /// Activates an MMS-capable context, preferring `preferred` when
    /// it is still available.
    async fn activate_mms_context(&self, preferred: Option<&BusPath>) -> Result<MmsContext>;

    /// Releases a previously activated context.
    async fn deactivate_mms_context(&self, context: &MmsContext) -> Result<()>;

    /// Registers the push agent with the radio stack.
    async fn register_push_agent(&self) -> Result<()>;

    /// Unregisters the push agent.
    async fn unregister_push_agent(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

/// HTTP transfer to and from the message center.
///
/// Implementations enforce their own timeouts; the mediator does not
/// cancel in-flight transfers.
#[async_trait]
pub trait MmsTransport: Send + Sync {
    /// Fetches `url` (optionally through `proxy`) into a local file
    /// and returns its path. The caller owns the file.
    async fn download(&self, url: &str, proxy: Option<&ProxyInfo>) -> Result<PathBuf>;

    /// Posts `file` to the message center and writes the response
    /// body to a local file, returning its path. The caller owns the
    /// response file.
    async fn upload(
        &self,
        file: &Path,
        message_center: &str,
        proxy: Option<&ProxyInfo>,
    ) -> Result<PathBuf>;
}

// ---------------------------------------------------------------------------
// History service
// ---------------------------------------------------------------------------

/// One message as seen by the history service.
pub trait HistoryMessage: Send {
    /// Whether the history service knows the message at all.
    fn exists(&self) -> bool;

    /// Whether the message is still unread.
    fn is_new(&self) -> Result<bool>;
}

/// Read access to the conversation history service.
#[async_trait]
pub trait HistoryService: Send + Sync {
    /// Looks up a message by its event identifier (the bus path of
    /// the message object).
    async fn get_message(&self, event_id: &str) -> Result<Box<dyn HistoryMessage>>;
}

// ---------------------------------------------------------------------------
// Accounts service
// ---------------------------------------------------------------------------

/// Per-user feature flags read from the accounts service.
#[async_trait]
pub trait AccountsService: Send + Sync {
    /// Whether MMS handling is enabled for the active user.
    ///
    /// Queried live for every push. Implementations must answer
    /// `true` whenever the underlying IPC fails; only an explicit
    /// opt-out disables MMS.
    async fn mms_enabled(&self) -> bool;

    /// Whether mobile data is currently enabled.
    async fn mobile_data_enabled(&self) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Message bus
// ---------------------------------------------------------------------------

/// A broadcast emitted by the service facade.
#[derive(Clone, Debug, PartialEq)]
pub enum BusSignal {
    /// A message object appeared, with its full properties.
    MessageAdded {
        path: BusPath,
        properties: PropertyMap,
    },
    /// A message object disappeared.
    MessageRemoved { path: BusPath },
    /// A property changed on a service or message object.
    PropertyChanged {
        path: BusPath,
        name: String,
        value: Variant,
    },
}

/// Outbound signal emission towards bus subscribers.
///
/// Emission is best-effort: the facade logs failures and moves on,
/// it never retries a broadcast.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Emits one signal.
    async fn emit(&self, signal: BusSignal) -> Result<()>;
}
