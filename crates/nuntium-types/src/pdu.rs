//! Typed representations of the MMS PDUs the mediator handles.
//!
//! The wire encoder/decoder is an external collaborator reached
//! through [`crate::adapters::PduCodec`]; these structs are what it
//! produces and consumes. Field semantics follow the M-Notification,
//! M-Retrieve, M-NotifyResp and M-Send transactions of the MMS
//! encapsulation protocol.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MessageUuid, NuntiumError, Result, PLMN_SUFFIX};

/// Media type of the presentation part of a multipart message.
pub const SMIL_MEDIA_TYPE: &str = "application/smil";

// ---------------------------------------------------------------------------
// Debug-error side door
// ---------------------------------------------------------------------------

/// In-band markers that force a failure at a specific pipeline point.
///
/// Only the local test harness plants these; no production adapter
/// ever produces them. Each marker is consumed (popped) the first
/// time its pipeline point is reached, and the mutated notification
/// is written back to the store so the consumption is observable.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DebugErrorKind {
    /// Fail context activation.
    ActivateContext,
    /// Fail proxy resolution.
    GetProxy,
    /// Fail the content download.
    DownloadContent,
    /// Fail the store update.
    Storage,
    /// Fail the hand-over to the messaging surface.
    ReceiveHandle,
    /// Fail the acknowledgement to the message center.
    RespondHandle,
    /// Fail the error notification itself.
    ErrorNotify,
}

// ---------------------------------------------------------------------------
// MNotificationInd
// ---------------------------------------------------------------------------

/// Operator-originated announcement that a message awaits download.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MNotificationInd {
    /// Locally assigned transaction UUID.
    pub uuid: MessageUuid,
    /// Set when this notification was synthesized for a redownload;
    /// points at the UUID it replaces.
    pub redownload_of: Option<MessageUuid>,
    /// Operator-assigned transaction identifier. Repeats on re-push.
    pub transaction_id: String,
    /// Sender address, possibly carrying the PLMN suffix.
    pub from: String,
    /// URL the content must be fetched from.
    pub content_location: String,
    /// Instant the operator stops holding the message.
    pub expire: DateTime<Utc>,
    /// Advertised message size in bytes, zero when unknown.
    pub size: u64,
    /// When the first push for this transaction was observed.
    pub received: DateTime<Utc>,
    /// Test-only forced failures, see [`DebugErrorKind`].
    #[serde(default)]
    pub debug_errors: Vec<DebugErrorKind>,
}

impl MNotificationInd {
    /// True once wall-clock time is past the Expire header.
    pub fn expired(&self) -> bool {
        Utc::now() > self.expire
    }

    /// True for locally injected notifications.
    ///
    /// A real operator push always points at an http(s) URL; anything
    /// else (a plain file path, a marker with forced errors) comes
    /// from the local test harness and must skip radio interaction.
    pub fn is_debug(&self) -> bool {
        let location = self.content_location.as_str();
        let http = location.starts_with("http://") || location.starts_with("https://");
        !http || !self.debug_errors.is_empty()
    }

    /// Consumes the first matching debug marker, if planted.
    pub fn pop_debug_error(&mut self, kind: DebugErrorKind) -> Option<DebugErrorKind> {
        let idx = self.debug_errors.iter().position(|k| *k == kind)?;
        Some(self.debug_errors.remove(idx))
    }

    /// Builds the synthesized notification for a user redownload.
    ///
    /// Fresh UUID, back-reference to this one, everything else copied.
    pub fn redownload(&self) -> Self {
        let mut copy = self.clone();
        copy.redownload_of = Some(self.uuid);
        copy.uuid = MessageUuid::random();
        copy
    }
}

// ---------------------------------------------------------------------------
// MRetrieveConf
// ---------------------------------------------------------------------------

/// One body part of a downloaded message.
///
/// Parts are windows into the stored content file; the bytes
/// themselves stay on disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPart {
    /// Content-Id header of the part.
    pub content_id: String,
    /// Media type of the part.
    pub media_type: String,
    /// Byte offset of the part body within the content file.
    pub offset: u64,
    /// Byte length of the part body.
    pub length: u64,
}

/// The downloaded multimedia message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MRetrieveConf {
    /// UUID of the transaction this content belongs to.
    pub uuid: MessageUuid,
    /// Operator transaction identifier, echoed in the acknowledgement.
    pub transaction_id: String,
    /// Sender address, possibly carrying the PLMN suffix.
    pub from: String,
    /// Recipient addresses, possibly carrying the PLMN suffix.
    pub to: Vec<String>,
    /// Submission date as unix seconds.
    pub date: u64,
    /// Optional subject header.
    pub subject: Option<String>,
    /// All body parts, presentation part included.
    pub parts: Vec<DataPart>,
}

impl MRetrieveConf {
    /// The attachment parts, with the SMIL presentation filtered out.
    pub fn data_parts(&self) -> Vec<&DataPart> {
        self.parts
            .iter()
            .filter(|p| p.media_type != SMIL_MEDIA_TYPE)
            .collect()
    }

    /// The SMIL presentation part, when the message carries one.
    pub fn smil_part(&self) -> Option<&DataPart> {
        self.parts.iter().find(|p| p.media_type == SMIL_MEDIA_TYPE)
    }

    /// Builds the acknowledgement for this retrieval.
    pub fn notify_resp(&self, report_allowed: bool) -> MNotifyRespInd {
        MNotifyRespInd {
            uuid: self.uuid,
            transaction_id: self.transaction_id.clone(),
            status: RetrievalStatus::Retrieved,
            report_allowed,
        }
    }
}

// ---------------------------------------------------------------------------
// MNotifyRespInd
// ---------------------------------------------------------------------------

/// X-Mms-Status vocabulary of the retrieval acknowledgement.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStatus {
    None,
    Expired,
    Retrieved,
    Rejected,
    Deferred,
    Indeterminate,
    Forwarded,
    Unreachable,
}

/// Client-originated acknowledgement sent after retrieval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MNotifyRespInd {
    /// UUID of the acknowledged transaction.
    pub uuid: MessageUuid,
    /// Operator transaction identifier being acknowledged.
    pub transaction_id: String,
    /// Retrieval outcome reported to the message center.
    pub status: RetrievalStatus,
    /// Whether the operator may generate a delivery report.
    pub report_allowed: bool,
}

// ---------------------------------------------------------------------------
// MSendReq / MSendConf
// ---------------------------------------------------------------------------

/// One outbound attachment, validated against the filesystem.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SendAttachment {
    /// Caller-chosen part identifier.
    pub id: String,
    /// Media type of the part.
    pub content_type: String,
    /// Location of the part body on disk.
    pub file_path: PathBuf,
}

impl SendAttachment {
    /// Builds an attachment descriptor, verifying the file is usable.
    pub fn load(id: &str, content_type: &str, file_path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(file_path).map_err(|e| NuntiumError::InvalidArguments {
            reason: format!("attachment {id}: cannot read {}: {e}", file_path.display()),
        })?;
        if !meta.is_file() {
            return Err(NuntiumError::InvalidArguments {
                reason: format!("attachment {id}: {} is not a regular file", file_path.display()),
            });
        }
        Ok(Self {
            id: id.to_string(),
            content_type: content_type.to_string(),
            file_path: file_path.to_path_buf(),
        })
    }
}

/// Outbound submission request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MSendReq {
    /// Locally assigned UUID of the submission.
    pub uuid: MessageUuid,
    /// Recipient addresses with the PLMN suffix applied.
    pub recipients: Vec<String>,
    /// Attachment descriptors.
    pub attachments: Vec<SendAttachment>,
    /// Whether a delivery report is requested.
    pub delivery_report: bool,
}

impl MSendReq {
    /// Builds a submission, minting its UUID and normalizing the
    /// recipient addresses to carry the PLMN suffix.
    pub fn new(recipients: Vec<String>, attachments: Vec<SendAttachment>, delivery_report: bool) -> Self {
        let recipients = recipients
            .into_iter()
            .map(|r| {
                if r.ends_with(PLMN_SUFFIX) {
                    r
                } else {
                    format!("{r}{PLMN_SUFFIX}")
                }
            })
            .collect();
        Self {
            uuid: MessageUuid::random(),
            recipients,
            attachments,
            delivery_report,
        }
    }
}

/// Failure class of a submission response.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SendErrorClass {
    /// Worth retrying later.
    Transient,
    /// Retrying will not help.
    Permanent,
}

/// X-Mms-Response-Status vocabulary of the submission response.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SendResponseStatus {
    Ok,
    ErrorTransientFailure,
    ErrorTransientSendingAddressUnresolved,
    ErrorTransientMessageNotFound,
    ErrorTransientNetworkProblem,
    ErrorPermanentFailure,
    ErrorPermanentServiceDenied,
    ErrorPermanentMessageFormatCorrupt,
    ErrorPermanentSendingAddressUnresolved,
    ErrorPermanentContentNotAccepted,
    ErrorPermanentLackOfPrepaid,
}

/// The message center's response to a submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MSendConf {
    /// Response status reported by the message center.
    pub response_status: SendResponseStatus,
}

impl MSendConf {
    /// Classifies the response: `None` means accepted.
    pub fn class(&self) -> Option<SendErrorClass> {
        use SendResponseStatus::*;
        match self.response_status {
            Ok => None,
            ErrorTransientFailure
            | ErrorTransientSendingAddressUnresolved
            | ErrorTransientMessageNotFound
            | ErrorTransientNetworkProblem => Some(SendErrorClass::Transient),
            ErrorPermanentFailure
            | ErrorPermanentServiceDenied
            | ErrorPermanentMessageFormatCorrupt
            | ErrorPermanentSendingAddressUnresolved
            | ErrorPermanentContentNotAccepted
            | ErrorPermanentLackOfPrepaid => Some(SendErrorClass::Permanent),
        }
    }
}

// ---------------------------------------------------------------------------
// Push PDU
// ---------------------------------------------------------------------------

/// Raw push payload handed over by the radio push agent.
#[derive(Clone, Debug, PartialEq)]
pub struct PushPdu {
    /// Undecoded notification bytes.
    pub data: Vec<u8>,
}
