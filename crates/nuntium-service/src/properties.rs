//! Property-dictionary builders for bus payloads.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{TimeZone, Utc};
use serde::Serialize;

use nuntium_storage::Store;
use nuntium_types::pdu::{DataPart, MNotificationInd, MRetrieveConf};
use nuntium_types::variant::{prop, status, Attachment, PropertyMap, Variant};
use nuntium_types::{DownloadError, NuntiumError, Result, PLMN_SUFFIX};

/// Strips the operator PLMN suffix from an address.
pub fn strip_plmn(address: &str) -> String {
    address.trim_end_matches(PLMN_SUFFIX).to_string()
}

/// Renders unix seconds as the RFC 3339 date the bus carries.
pub fn format_date(unix_seconds: u64) -> String {
    match Utc.timestamp_opt(unix_seconds as i64, 0).single() {
        Some(date) => date.to_rfc3339(),
        None => Utc::now().to_rfc3339(),
    }
}

/// Builds the full property dictionary for a retrieved message.
///
/// The attachment entries point into the stored content file; the
/// SMIL presentation, when present and valid UTF-8, is inlined.
pub fn parse_message(store: &Store, retrieve_conf: &MRetrieveConf) -> Result<PropertyMap> {
    let content_path = store.get_mms(retrieve_conf.uuid)?;

    let mut properties = PropertyMap::new();
    properties.insert(prop::STATUS.into(), Variant::from(status::RECEIVED));
    properties.insert(prop::DATE.into(), Variant::from(format_date(retrieve_conf.date)));
    properties.insert(prop::SENDER.into(), Variant::from(strip_plmn(&retrieve_conf.from)));
    if let Some(subject) = &retrieve_conf.subject {
        if !subject.is_empty() {
            properties.insert(prop::SUBJECT.into(), Variant::from(subject.clone()));
        }
    }
    let recipients: Vec<String> = retrieve_conf.to.iter().map(|r| strip_plmn(r)).collect();
    properties.insert(prop::RECIPIENTS.into(), Variant::from(recipients));

    if let Some(part) = retrieve_conf.smil_part() {
        match read_part(&content_path, part) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(smil) => {
                    properties.insert(prop::SMIL.into(), Variant::from(smil));
                }
                Err(_) => tracing::warn!(uuid = %retrieve_conf.uuid, "smil part is not utf-8"),
            },
            Err(e) => tracing::warn!(uuid = %retrieve_conf.uuid, error = %e, "cannot read smil part"),
        }
    }

    let attachments: Vec<Attachment> = retrieve_conf
        .data_parts()
        .into_iter()
        .map(|part| Attachment {
            id: part.content_id.clone(),
            media_type: part.media_type.clone(),
            file_path: content_path.clone(),
            offset: part.offset,
            length: part.length,
        })
        .collect();
    properties.insert(prop::ATTACHMENTS.into(), Variant::from(attachments));

    Ok(properties)
}

/// Reads one part body out of the content file.
fn read_part(content_path: &Path, part: &DataPart) -> Result<Vec<u8>> {
    let mut file = File::open(content_path).map_err(|e| NuntiumError::Storage {
        reason: format!("opening {}: {e}", content_path.display()),
    })?;
    file.seek(SeekFrom::Start(part.offset))
        .map_err(|e| NuntiumError::Storage {
            reason: format!("seeking {}: {e}", content_path.display()),
        })?;
    let mut bytes = vec![0u8; part.length as usize];
    file.read_exact(&mut bytes).map_err(|e| NuntiumError::Storage {
        reason: format!("reading {}: {e}", content_path.display()),
    })?;
    Ok(bytes)
}

// ---------------------------------------------------------------------------
// Error payload
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ErrorPayload<'a> {
    #[serde(rename = "Code")]
    code: &'a str,
    #[serde(rename = "Message")]
    message: String,
    #[serde(rename = "Expire")]
    expire: String,
    #[serde(rename = "Size", skip_serializing_if = "size_is_zero")]
    size: u64,
    #[serde(rename = "MobileData", skip_serializing_if = "Option::is_none")]
    mobile_data: Option<bool>,
}

fn size_is_zero(size: &u64) -> bool {
    *size == 0
}

/// Renders the JSON error payload carried by failure surfaces.
///
/// Falls back to `{}` when serialization itself fails, so the user
/// always gets some payload.
pub(crate) fn error_payload(
    error: &DownloadError,
    notification: &MNotificationInd,
    mobile_data: Option<bool>,
) -> String {
    let payload = ErrorPayload {
        code: error.code(),
        message: error.to_string(),
        expire: notification.expire.to_rfc3339(),
        size: notification.size,
        mobile_data,
    };
    serde_json::to_string(&payload).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "cannot serialize error payload");
        "{}".to_string()
    })
}
