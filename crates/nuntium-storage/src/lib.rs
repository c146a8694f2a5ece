//! Durable per-message store.
//!
//! Every transaction owns one state file (`store/<uuid>.state`,
//! bincode-serialized [`MmsState`]) plus, once downloaded, a content
//! file whose path the record carries. All writes are atomic:
//! serialize, write to a temp file, fsync, rename. Scratch files for
//! encoded acknowledgements and submissions live next to the state
//! files and are owned by the task that created them.
//!
//! State transitions are guarded: an update demands the record is in
//! the expected predecessor state and fails without touching disk
//! otherwise, so a record can never move backwards.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use nuntium_types::pdu::MNotificationInd;
use nuntium_types::{BusPath, MessageUuid, MmsState, NuntiumError, Result, TransactionState};

/// Directory for state, content and scratch files.
const STORE_DIR: &str = "store";

/// Directory for per-identity preferred-context records.
const CONTEXT_DIR: &str = "context";

const STATE_EXT: &str = "state";
const RESPONSE_EXT: &str = "m-notifyresp.ind";
const SEND_EXT: &str = "m-send.req";

fn storage_err(context: &str, err: impl std::fmt::Display) -> NuntiumError {
    NuntiumError::Storage {
        reason: format!("{context}: {err}"),
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Filesystem-backed store, shared process-wide behind an `Arc`.
///
/// Mutations are serialized by a single lock; the intended writer is
/// the mediator loop, so contention is negligible.
pub struct Store {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl Store {
    /// Opens (or creates) the store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [STORE_DIR, CONTEXT_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .map_err(|e| storage_err(&format!("creating {}", path.display()), e))?;
        }
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn state_path(&self, uuid: MessageUuid) -> PathBuf {
        self.root.join(STORE_DIR).join(format!("{uuid}.{STATE_EXT}"))
    }

    fn scratch_path(&self, uuid: MessageUuid, ext: &str) -> PathBuf {
        self.root.join(STORE_DIR).join(format!("{uuid}.{ext}"))
    }

    fn context_path(&self, identity: &str) -> PathBuf {
        self.root.join(CONTEXT_DIR).join(identity)
    }

    /// Inserts a fresh record in state `notification`.
    pub fn create(&self, modem_id: &str, notification: &MNotificationInd) -> Result<MmsState> {
        let state = MmsState {
            modem_id: modem_id.to_string(),
            state: TransactionState::Notification,
            m_notification_ind: Some(notification.clone()),
            telepathy_error_notified: false,
            content_path: None,
        };
        let _guard = self.lock();
        self.write_state(notification.uuid, &state)?;
        Ok(state)
    }

    /// Loads the record for `uuid`.
    pub fn get_mms_state(&self, uuid: MessageUuid) -> Result<MmsState> {
        let path = self.state_path(uuid);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(NuntiumError::NotFound {
                    reason: format!("no record stored for {uuid}"),
                });
            }
            Err(e) => return Err(storage_err(&format!("reading {}", path.display()), e)),
        };
        bincode::deserialize(&bytes)
            .map_err(|e| storage_err(&format!("deserializing {}", path.display()), e))
    }

    /// Lists every UUID with a state file.
    pub fn get_stored_uuids(&self) -> Result<Vec<MessageUuid>> {
        let dir = self.root.join(STORE_DIR);
        let entries =
            fs::read_dir(&dir).map_err(|e| storage_err(&format!("listing {}", dir.display()), e))?;
        let mut uuids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| storage_err("listing store entries", e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STATE_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<MessageUuid>() {
                Ok(uuid) => uuids.push(uuid),
                Err(_) => tracing::warn!(file = %path.display(), "skipping non-uuid state file"),
            }
        }
        Ok(uuids)
    }

    /// Advances `notification -> downloaded`, recording the content path.
    pub fn update_downloaded(&self, uuid: MessageUuid, content_path: &Path) -> Result<MmsState> {
        self.advance(uuid, TransactionState::Notification, TransactionState::Downloaded, |state| {
            state.content_path = Some(content_path.to_path_buf());
        })
    }

    /// Advances `downloaded -> received`.
    pub fn update_received(&self, uuid: MessageUuid) -> Result<MmsState> {
        self.advance(uuid, TransactionState::Downloaded, TransactionState::Received, |_| {})
    }

    /// Advances `received -> responded`.
    pub fn update_responded(&self, uuid: MessageUuid) -> Result<MmsState> {
        self.advance(uuid, TransactionState::Received, TransactionState::Responded, |_| {})
    }

    /// Overwrites the embedded notification of an existing record.
    pub fn update_m_notification_ind(&self, notification: &MNotificationInd) -> Result<MmsState> {
        let _guard = self.lock();
        let mut state = self.get_mms_state(notification.uuid)?;
        state.m_notification_ind = Some(notification.clone());
        self.write_state(notification.uuid, &state)?;
        Ok(state)
    }

    /// Marks the record as having had its failure surfaced. Idempotent.
    pub fn set_telepathy_error_notified(&self, uuid: MessageUuid) -> Result<MmsState> {
        let _guard = self.lock();
        let mut state = self.get_mms_state(uuid)?;
        if !state.telepathy_error_notified {
            state.telepathy_error_notified = true;
            self.write_state(uuid, &state)?;
        }
        Ok(state)
    }

    /// Removes the record, its content file and any scratch files.
    pub fn destroy(&self, uuid: MessageUuid) -> Result<()> {
        let _guard = self.lock();
        let state = self.get_mms_state(uuid)?;
        let path = self.state_path(uuid);
        fs::remove_file(&path).map_err(|e| storage_err(&format!("removing {}", path.display()), e))?;
        if let Some(content) = &state.content_path {
            if let Err(e) = fs::remove_file(content) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(file = %content.display(), error = %e, "leaking content file");
                }
            }
        }
        for ext in [RESPONSE_EXT, SEND_EXT] {
            let _ = fs::remove_file(self.scratch_path(uuid, ext));
        }
        Ok(())
    }

    /// Allocates the scratch file for an encoded M-NotifyResp.ind.
    pub fn create_response_file(&self, uuid: MessageUuid) -> Result<(File, PathBuf)> {
        self.create_scratch(uuid, RESPONSE_EXT)
    }

    /// Allocates the scratch file for an encoded M-Send.req.
    pub fn create_send_file(&self, uuid: MessageUuid) -> Result<(File, PathBuf)> {
        self.create_scratch(uuid, SEND_EXT)
    }

    /// Path of the downloaded content for `uuid`.
    pub fn get_mms(&self, uuid: MessageUuid) -> Result<PathBuf> {
        let state = self.get_mms_state(uuid)?;
        state.content_path.ok_or_else(|| NuntiumError::NotFound {
            reason: format!("no content stored for {uuid}"),
        })
    }

    /// Persists the preferred radio context for an account identity.
    pub fn set_preferred_context(&self, identity: &str, context: &BusPath) -> Result<()> {
        let _guard = self.lock();
        let path = self.context_path(identity);
        let bytes = bincode::serialize(context)
            .map_err(|e| storage_err("serializing preferred context", e))?;
        atomic_write(&path, &bytes)
    }

    /// Loads the preferred radio context for an account identity.
    pub fn get_preferred_context(&self, identity: &str) -> Result<BusPath> {
        let path = self.context_path(identity);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(NuntiumError::NotFound {
                    reason: format!("no preferred context stored for {identity}"),
                });
            }
            Err(e) => return Err(storage_err(&format!("reading {}", path.display()), e)),
        };
        bincode::deserialize(&bytes)
            .map_err(|e| storage_err(&format!("deserializing {}", path.display()), e))
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Guarded transition: requires `expect`, then applies `next`.
    fn advance(
        &self,
        uuid: MessageUuid,
        expect: TransactionState,
        next: TransactionState,
        mutate: impl FnOnce(&mut MmsState),
    ) -> Result<MmsState> {
        let _guard = self.lock();
        let mut state = self.get_mms_state(uuid)?;
        if state.state != expect {
            return Err(NuntiumError::Storage {
                reason: format!(
                    "cannot move {uuid} to {next}: record is {}, expected {expect}",
                    state.state
                ),
            });
        }
        state.state = next;
        mutate(&mut state);
        self.write_state(uuid, &state)?;
        Ok(state)
    }

    fn write_state(&self, uuid: MessageUuid, state: &MmsState) -> Result<()> {
        let bytes =
            bincode::serialize(state).map_err(|e| storage_err("serializing mms state", e))?;
        atomic_write(&self.state_path(uuid), &bytes)
    }

    fn create_scratch(&self, uuid: MessageUuid, ext: &str) -> Result<(File, PathBuf)> {
        let path = self.scratch_path(uuid, ext);
        let file =
            File::create(&path).map_err(|e| storage_err(&format!("creating {}", path.display()), e))?;
        Ok((file, path))
    }
}

/// Write to a sibling temp file, fsync, rename over the target.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file =
        File::create(&tmp).map_err(|e| storage_err(&format!("creating {}", tmp.display()), e))?;
    file.write_all(bytes)
        .map_err(|e| storage_err(&format!("writing {}", tmp.display()), e))?;
    file.sync_all()
        .map_err(|e| storage_err(&format!("syncing {}", tmp.display()), e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        storage_err(&format!("renaming {} into place", tmp.display()), e)
    })
}
