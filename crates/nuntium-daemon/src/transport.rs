//! reqwest-based HTTP transport to the message center.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use nuntium_types::adapters::{MmsTransport, ProxyInfo};
use nuntium_types::{MessageUuid, NuntiumError, Result};

/// Content type of encoded MMS PDUs on the wire.
const MMS_CONTENT_TYPE: &str = "application/vnd.wap.mms-message";

/// Per-request timeout. Message centers are slow but not that slow.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

fn transport_err(context: &str, err: impl std::fmt::Display) -> NuntiumError {
    NuntiumError::Transport {
        reason: format!("{context}: {err}"),
    }
}

/// HTTP GET/POST through the operator proxy.
///
/// Downloaded bodies land in files under `spool_dir`; the caller owns
/// the returned files.
pub struct HttpTransport {
    spool_dir: PathBuf,
}

impl HttpTransport {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Result<Self> {
        let spool_dir = spool_dir.into();
        std::fs::create_dir_all(&spool_dir)
            .map_err(|e| transport_err("creating spool directory", e))?;
        Ok(Self { spool_dir })
    }

    /// Builds a client routed through `proxy` when one is given.
    fn client(&self, proxy: Option<&ProxyInfo>) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(proxy) = proxy {
            let url = format!("http://{}:{}", proxy.host, proxy.port);
            builder = builder
                .proxy(reqwest::Proxy::all(&url).map_err(|e| transport_err("building proxy", e))?);
        }
        builder.build().map_err(|e| transport_err("building client", e))
    }

    async fn spool(&self, label: &str, body: &[u8]) -> Result<PathBuf> {
        let path = self
            .spool_dir
            .join(format!("{label}-{}", MessageUuid::random()));
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| transport_err(&format!("writing {}", path.display()), e))?;
        Ok(path)
    }
}

#[async_trait]
impl MmsTransport for HttpTransport {
    async fn download(&self, url: &str, proxy: Option<&ProxyInfo>) -> Result<PathBuf> {
        let response = self
            .client(proxy)?
            .get(url)
            .send()
            .await
            .map_err(|e| transport_err("download request", e))?;
        if !response.status().is_success() {
            return Err(NuntiumError::Transport {
                reason: format!("download of {url} answered {}", response.status()),
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_err("download body", e))?;
        self.spool("retrieve", &body).await
    }

    async fn upload(
        &self,
        file: &Path,
        message_center: &str,
        proxy: Option<&ProxyInfo>,
    ) -> Result<PathBuf> {
        let body = tokio::fs::read(file)
            .await
            .map_err(|e| transport_err(&format!("reading {}", file.display()), e))?;
        let response = self
            .client(proxy)?
            .post(message_center)
            .header(reqwest::header::CONTENT_TYPE, MMS_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| transport_err("upload request", e))?;
        if !response.status().is_success() {
            return Err(NuntiumError::Transport {
                reason: format!("upload to {message_center} answered {}", response.status()),
            });
        }
        let reply = response
            .bytes()
            .await
            .map_err(|e| transport_err("upload reply body", e))?;
        self.spool("reply", &reply).await
    }
}
