//! Core shared types for the nuntium MMS mediator.
//!
//! This crate defines all fundamental types used across the workspace.
//! No other crate should define shared types, everything lives here:
//! message identifiers, bus object paths, the per-message transaction
//! state, the durable [`MmsState`] record, the PDU structures
//! ([`pdu`]), the bus variant sum ([`variant`]) and the adapter
//! contracts ([`adapters`]) for the collaborators the mediator talks
//! to (radio, transport, codec, history, accounts, message bus).

pub mod adapters;
pub mod pdu;
pub mod variant;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pdu::MNotificationInd;

/// Workspace-wide result alias.
pub type Result<T> = std::result::Result<T, NuntiumError>;

// ---------------------------------------------------------------------------
// Bus constants
// ---------------------------------------------------------------------------

/// Root object path of the MMS service tree.
pub const MMS_BUS_ROOT: &str = "/org/nuntium/mms";

/// Interface of the per-account service object.
pub const MMS_SERVICE_INTERFACE: &str = "org.nuntium.MMSService";

/// Interface of the per-message object.
pub const MMS_MESSAGE_INTERFACE: &str = "org.nuntium.MMSMessage";

/// Suffix operators append to telephone numbers in PDU headers.
pub const PLMN_SUFFIX: &str = "/TYPE=PLMN";

// ---------------------------------------------------------------------------
// MessageUuid
// ---------------------------------------------------------------------------

/// Locally generated identifier of one MMS transaction.
///
/// Assigned when a notification is first ingested and stable for the
/// whole life of the message. A user-initiated redownload mints a new
/// one and links back to the old via `redownload_of`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MessageUuid([u8; 16]);

impl MessageUuid {
    /// The fixed byte length of a message UUID.
    pub const LEN: usize = 16;

    /// Creates a `MessageUuid` from raw bytes.
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Generates a fresh random UUID.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for MessageUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for MessageUuid {
    type Err = NuntiumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| NuntiumError::InvalidArguments {
            reason: "invalid hex encoding for message uuid".into(),
        })?;
        if bytes.len() != Self::LEN {
            return Err(NuntiumError::InvalidArguments {
                reason: format!("expected {} bytes for message uuid, got {}", Self::LEN, bytes.len()),
            });
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

// ---------------------------------------------------------------------------
// BusPath
// ---------------------------------------------------------------------------

/// A message-bus object path.
///
/// The service object for an account lives at
/// `/org/nuntium/mms/<identity>` and each message object directly
/// below it at `/org/nuntium/mms/<identity>/<uuid>`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BusPath(String);

impl BusPath {
    /// Wraps a raw object path string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The "unset" placeholder path.
    pub fn unset() -> Self {
        Self("/".into())
    }

    /// Object path of the per-account service object.
    pub fn service(identity: &str) -> Self {
        Self(format!("{MMS_BUS_ROOT}/{identity}"))
    }

    /// Object path of a per-message object.
    pub fn message(identity: &str, uuid: MessageUuid) -> Self {
        Self(format!("{MMS_BUS_ROOT}/{identity}/{uuid}"))
    }

    /// Returns the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts the message UUID from the final path component.
    ///
    /// Rejects paths whose last component is empty, `.` or `..` the
    /// same way the service refuses malformed message paths.
    pub fn uuid(&self) -> Result<MessageUuid> {
        let base = self.0.rsplit('/').next().unwrap_or("");
        if base.is_empty() || base == "." || base == ".." {
            return Err(NuntiumError::InvalidArguments {
                reason: format!("{} is not a proper object path for a message", self.0),
            });
        }
        base.parse()
    }
}

impl fmt::Display for BusPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// TransactionState
// ---------------------------------------------------------------------------

/// Lifecycle state of a stored message record.
///
/// The inbound path only ever moves forward:
///
/// ```text
/// notification ──▶ downloaded ──▶ received ──▶ responded
/// ```
///
/// `draft` and `sent` belong to the legacy outbound layout; records
/// carrying them are not incoming and are skipped on startup.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    /// A notification was ingested, content not yet fetched.
    Notification,
    /// Content was fetched and stored, not yet decoded/forwarded.
    Downloaded,
    /// The message was handed to the local messaging surface.
    Received,
    /// The MMS center was acknowledged.
    Responded,
    /// Legacy outbound draft.
    Draft,
    /// Legacy outbound sent record.
    Sent,
}

impl TransactionState {
    /// True for every state on the inbound path.
    pub fn is_incoming(self) -> bool {
        matches!(
            self,
            Self::Notification | Self::Downloaded | Self::Received | Self::Responded
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self {
            Self::Notification => "notification",
            Self::Downloaded => "downloaded",
            Self::Received => "received",
            Self::Responded => "responded",
            Self::Draft => "draft",
            Self::Sent => "sent",
        };
        write!(f, "{word}")
    }
}

// ---------------------------------------------------------------------------
// MmsState
// ---------------------------------------------------------------------------

/// Durable per-UUID record of one MMS transaction.
///
/// Serialized to its own file in the store; must survive process
/// restart so startup can drive every record to a stable state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MmsState {
    /// Radio account that owns the record.
    pub modem_id: String,
    /// Current lifecycle state.
    pub state: TransactionState,
    /// The decoded inbound notification. Absent for outbound records.
    pub m_notification_ind: Option<MNotificationInd>,
    /// Whether the user surface was already informed of a failure.
    pub telepathy_error_notified: bool,
    /// Path of the downloaded PDU once present. Owned by the record.
    pub content_path: Option<PathBuf>,
}

impl MmsState {
    /// True when the record belongs to the inbound path.
    pub fn is_incoming(&self) -> bool {
        self.state.is_incoming()
    }
}

// ---------------------------------------------------------------------------
// NuntiumError
// ---------------------------------------------------------------------------

/// All errors that can occur within nuntium.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum NuntiumError {
    /// A store lookup did not find the requested record.
    #[error("not found: {reason}")]
    NotFound {
        /// Human-readable description of what was missing.
        reason: String,
    },

    /// A storage or filesystem operation failed.
    #[error("storage error: {reason}")]
    Storage {
        /// Human-readable description of the storage failure.
        reason: String,
    },

    /// A PDU could not be decoded.
    #[error("decode error: {reason}")]
    Decode {
        /// Human-readable description of the decode failure.
        reason: String,
    },

    /// A PDU could not be encoded.
    #[error("encode error: {reason}")]
    Encode {
        /// Human-readable description of the encode failure.
        reason: String,
    },

    /// A radio/context operation failed.
    #[error("radio error: {reason}")]
    Radio {
        /// Human-readable description of the radio failure.
        reason: String,
    },

    /// An HTTP transfer to or from the message center failed.
    #[error("transport error: {reason}")]
    Transport {
        /// Human-readable description of the transport failure.
        reason: String,
    },

    /// A service-facade or bus operation failed.
    #[error("service error: {reason}")]
    Service {
        /// Human-readable description of the service failure.
        reason: String,
    },

    /// The history service query failed.
    #[error("history error: {reason}")]
    History {
        /// Human-readable description of the history failure.
        reason: String,
    },

    /// A caller-supplied argument is invalid.
    #[error("invalid arguments: {reason}")]
    InvalidArguments {
        /// Human-readable description of the rejected argument.
        reason: String,
    },

    /// A configuration value is invalid or missing.
    #[error("config error: {reason}")]
    Config {
        /// Human-readable description of the configuration problem.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Download error taxonomy
// ---------------------------------------------------------------------------

/// Classification of an inbound download failure.
///
/// The kind decides the error code surfaced to the user and whether a
/// user-initiated redownload makes sense (radio and HTTP trouble can
/// be retried, local storage or decode trouble cannot).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DownloadErrorKind {
    /// Activating an MMS-capable data context failed.
    ActivateContext,
    /// The activated context exposes no usable proxy.
    GetProxy,
    /// Fetching the PDU from the message center failed.
    DownloadContent,
    /// A local store operation failed.
    Storage,
    /// Decoding or forwarding to the messaging surface failed.
    Forward,
    /// Anything else.
    Unknown,
}

impl DownloadErrorKind {
    /// The error code carried in the user-facing error payload.
    pub fn code(self) -> &'static str {
        match self {
            Self::ActivateContext => "x-ubports-nuntium-mms-error-activate-context",
            Self::GetProxy => "x-ubports-nuntium-mms-error-get-proxy",
            Self::DownloadContent => "x-ubports-nuntium-mms-error-download-content",
            Self::Storage => "x-ubports-nuntium-mms-error-storage",
            Self::Forward => "x-ubports-nuntium-mms-error-forward",
            Self::Unknown => "x-ubports-nuntium-mms-error-unknown",
        }
    }

    /// Whether a user-initiated redownload may succeed.
    pub fn allow_redownload(self) -> bool {
        matches!(
            self,
            Self::ActivateContext | Self::GetProxy | Self::DownloadContent
        )
    }
}

impl fmt::Display for DownloadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A failed inbound download, carrying its taxonomy kind.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{kind}: {reason}")]
pub struct DownloadError {
    /// Failure classification.
    pub kind: DownloadErrorKind,
    /// Human-readable description of the underlying failure.
    pub reason: String,
}

impl DownloadError {
    /// Wraps an underlying error under the given kind.
    pub fn new(kind: DownloadErrorKind, source: impl fmt::Display) -> Self {
        Self {
            kind,
            reason: source.to_string(),
        }
    }

    /// The user-facing error code.
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Whether a user-initiated redownload may succeed.
    pub fn allow_redownload(&self) -> bool {
        self.kind.allow_redownload()
    }
}
