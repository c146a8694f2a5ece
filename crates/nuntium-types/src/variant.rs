//! Bus property dictionaries and their dynamically typed values.
//!
//! The message-bus wire format is owned by the bus adapter; inside
//! the process a property value is the [`Variant`] tagged sum and a
//! property dictionary is an ordered [`PropertyMap`], so signal
//! payloads compare deterministically in tests.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::BusPath;

/// Property dictionary attached to bus objects and signals.
pub type PropertyMap = BTreeMap<String, Variant>;

// ---------------------------------------------------------------------------
// Property and status vocabulary
// ---------------------------------------------------------------------------

/// Property names used on the service and message interfaces.
pub mod prop {
    pub const STATUS: &str = "Status";
    pub const DATE: &str = "Date";
    pub const SENDER: &str = "Sender";
    pub const RECIPIENTS: &str = "Recipients";
    pub const SUBJECT: &str = "Subject";
    pub const SMIL: &str = "Smil";
    pub const ATTACHMENTS: &str = "Attachments";
    pub const RECEIVED: &str = "Received";
    pub const DELETE_EVENT: &str = "DeleteEvent";
    pub const ERROR: &str = "Error";
    pub const ALLOW_REDOWNLOAD: &str = "AllowRedownload";
    pub const RESCUED: &str = "Rescued";
    pub const SILENT: &str = "Silent";
    pub const USE_DELIVERY_REPORTS: &str = "UseDeliveryReports";
    pub const MODEM_OBJECT_PATH: &str = "ModemObjectPath";
    pub const PREFERRED_CONTEXT: &str = "PreferredContext";
}

/// Values of the per-message `Status` property.
pub mod status {
    pub const RECEIVED: &str = "received";
    pub const DRAFT: &str = "draft";
    pub const SENT: &str = "sent";
    pub const PERMANENT_ERROR: &str = "permanent-error";
    pub const TRANSIENT_ERROR: &str = "transient-error";
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// Bus-facing attachment descriptor.
///
/// `offset`/`length` locate the part body inside the content file at
/// `file_path`; consumers read the bytes themselves.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub media_type: String,
    pub file_path: PathBuf,
    pub offset: u64,
    pub length: u64,
}

// ---------------------------------------------------------------------------
// Variant
// ---------------------------------------------------------------------------

/// Dynamically typed bus property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Variant {
    Str(String),
    Bool(bool),
    U32(u32),
    I64(i64),
    Path(BusPath),
    StrList(Vec<String>),
    Attachments(Vec<Attachment>),
    Map(BTreeMap<String, Variant>),
}

impl Variant {
    /// Borrows the string payload, if this is a string variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean payload, if this is a bool variant.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrows the path payload, if this is a path variant.
    pub fn as_path(&self) -> Option<&BusPath> {
        match self {
            Self::Path(p) => Some(p),
            _ => None,
        }
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<u32> for Variant {
    fn from(value: u32) -> Self {
        Self::U32(value)
    }
}

impl From<BusPath> for Variant {
    fn from(value: BusPath) -> Self {
        Self::Path(value)
    }
}

impl From<Vec<String>> for Variant {
    fn from(value: Vec<String>) -> Self {
        Self::StrList(value)
    }
}

impl From<Vec<Attachment>> for Variant {
    fn from(value: Vec<Attachment>) -> Self {
        Self::Attachments(value)
    }
}
