//! Per-message surface objects.

use nuntium_types::{BusPath, NuntiumError, Result};
use tokio::sync::mpsc;

/// The outward-facing object for one message.
///
/// A surface is owned by its facade; it carries only its own path,
/// the channels user requests are routed through, and the last status
/// word pushed to subscribers. The redownload channel is present only
/// when the surface was created for a redownload-allowed failure (or
/// as a rescued startup surface, where the watcher's state check
/// decides).
pub struct MessageSurface {
    path: BusPath,
    status: String,
    delete_tx: mpsc::UnboundedSender<BusPath>,
    redownload_tx: Option<mpsc::UnboundedSender<BusPath>>,
}

impl MessageSurface {
    pub(crate) fn new(
        path: BusPath,
        status: &str,
        delete_tx: mpsc::UnboundedSender<BusPath>,
        redownload_tx: Option<mpsc::UnboundedSender<BusPath>>,
    ) -> Self {
        Self {
            path,
            status: status.to_string(),
            delete_tx,
            redownload_tx,
        }
    }

    /// Object path of this surface.
    pub fn path(&self) -> &BusPath {
        &self.path
    }

    /// Last status word pushed for this surface.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub(crate) fn set_status(&mut self, status: &str) {
        self.status = status.to_string();
    }

    /// Whether a redownload channel is configured.
    pub fn allows_redownload(&self) -> bool {
        self.redownload_tx.is_some()
    }

    /// Routes a user `Delete()` call to the delete watcher.
    pub fn request_delete(&self) -> Result<()> {
        self.delete_tx
            .send(self.path.clone())
            .map_err(|_| NuntiumError::Service {
                reason: format!("delete channel for {} is closed", self.path),
            })
    }

    /// Routes a user `Redownload()` call to the redownload watcher.
    ///
    /// Fails when the surface was created without a redownload
    /// channel.
    pub fn request_redownload(&self) -> Result<()> {
        let Some(tx) = &self.redownload_tx else {
            return Err(NuntiumError::Service {
                reason: format!("no redownload configured for {}", self.path),
            });
        };
        tx.send(self.path.clone()).map_err(|_| NuntiumError::Service {
            reason: format!("redownload channel for {} is closed", self.path),
        })
    }
}
