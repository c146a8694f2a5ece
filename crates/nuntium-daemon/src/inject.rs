//! Push injection over a unix socket.
//!
//! Each connection carries length-prefixed frames (u32 big-endian
//! length, then that many payload bytes); every frame is handed to
//! the mediator as one push PDU. This stands in for the radio push
//! agent on headless deployments and is what the local test tooling
//! talks to.

use std::path::PathBuf;

use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use nuntium_types::pdu::PushPdu;
use nuntium_types::{NuntiumError, Result};

/// Upper bound on one injected frame. Notifications are tiny; this
/// only guards against garbage on the socket.
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Binds the socket and accepts injection connections until the
/// process ends.
pub async fn run_push_socket(path: PathBuf, push_tx: mpsc::UnboundedSender<PushPdu>) -> Result<()> {
    // A stale socket file from a previous run would block the bind.
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path).map_err(|e| NuntiumError::Config {
        reason: format!("binding push socket {}: {e}", path.display()),
    })?;
    tracing::info!(socket = %path.display(), "accepting push injections");

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                tokio::spawn(read_frames(stream, push_tx.clone()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "push socket accept failed");
            }
        }
    }
}

async fn read_frames(mut stream: UnixStream, push_tx: mpsc::UnboundedSender<PushPdu>) {
    loop {
        let mut len_buf = [0u8; 4];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return;
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 || len > MAX_FRAME_LEN {
            tracing::warn!(len, "dropping push frame with unreasonable length");
            return;
        }
        let mut data = vec![0u8; len];
        if let Err(e) = stream.read_exact(&mut data).await {
            tracing::warn!(error = %e, "truncated push frame");
            return;
        }
        tracing::debug!(bytes = len, "push frame injected");
        if push_tx.send(PushPdu { data }).is_err() {
            return;
        }
    }
}
