//! Default adapter implementations for headless deployments.

use std::time::Duration;

use async_trait::async_trait;

use nuntium_types::adapters::{
    AccountsService, BusSignal, HistoryMessage, HistoryService, MessageBus, MmsContext, ProxyInfo,
    RadioContextManager,
};
use nuntium_types::{BusPath, NuntiumError, Result};

// ---------------------------------------------------------------------------
// Radio
// ---------------------------------------------------------------------------

/// Activation attempts before an error bubbles up.
const ACTIVATION_ATTEMPTS: u32 = 3;

/// Spacing between activation attempts.
const ACTIVATION_RETRY_WAIT: Duration = Duration::from_secs(2);

/// Radio error names that may clear up after a short wait.
///
/// A plain `Failed` can mean network trouble or a wrong APN; the two
/// are indistinguishable here, and the retry delay only ever costs
/// something the first time (once an APN works it is saved as the
/// preferred context).
const NEEDS_WAIT_MARKERS: [&str; 4] = [
    "org.ofono.Error.InProgress",
    "org.ofono.Error.AttachInProgress",
    "org.ofono.Error.NotAttached",
    "org.ofono.Error.Failed",
];

fn activation_needs_wait(error: &NuntiumError) -> bool {
    match error {
        NuntiumError::Radio { reason } => {
            NEEDS_WAIT_MARKERS.iter().any(|marker| reason.contains(marker))
        }
        _ => false,
    }
}

/// Decorator adding the bounded activation retry around any context
/// manager.
pub struct RetryingRadio<R> {
    inner: R,
}

impl<R: RadioContextManager> RetryingRadio<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: RadioContextManager> RadioContextManager for RetryingRadio<R> {
    async fn activate_mms_context(&self, preferred: Option<&BusPath>) -> Result<MmsContext> {
        let mut attempt = 1;
        loop {
            match self.inner.activate_mms_context(preferred).await {
                Ok(context) => return Ok(context),
                Err(e) if attempt < ACTIVATION_ATTEMPTS && activation_needs_wait(&e) => {
                    tracing::warn!(
                        attempt,
                        error = %e,
                        "context activation failed, waiting before retry"
                    );
                    tokio::time::sleep(ACTIVATION_RETRY_WAIT).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn deactivate_mms_context(&self, context: &MmsContext) -> Result<()> {
        self.inner.deactivate_mms_context(context).await
    }

    async fn register_push_agent(&self) -> Result<()> {
        self.inner.register_push_agent().await
    }

    async fn unregister_push_agent(&self) -> Result<()> {
        self.inner.unregister_push_agent().await
    }
}

/// Radio adapter for deployments where the data context is managed
/// externally (always-on APN, container networking, tests).
///
/// Activation hands out the one configured context and deactivation
/// is a no-op; there is no radio stack to register a push agent with,
/// pushes arrive on the injection socket instead.
pub struct StaticContextRadio {
    context: MmsContext,
}

impl StaticContextRadio {
    pub fn new(
        context_path: BusPath,
        proxy: Option<ProxyInfo>,
        message_center: Option<String>,
    ) -> Self {
        Self {
            context: MmsContext {
                object_path: context_path,
                proxy,
                message_center,
            },
        }
    }
}

#[async_trait]
impl RadioContextManager for StaticContextRadio {
    async fn activate_mms_context(&self, _preferred: Option<&BusPath>) -> Result<MmsContext> {
        Ok(self.context.clone())
    }

    async fn deactivate_mms_context(&self, _context: &MmsContext) -> Result<()> {
        Ok(())
    }

    async fn register_push_agent(&self) -> Result<()> {
        tracing::debug!("static radio, push agent registration is a no-op");
        Ok(())
    }

    async fn unregister_push_agent(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

struct AlwaysNewMessage;

impl HistoryMessage for AlwaysNewMessage {
    fn exists(&self) -> bool {
        true
    }

    fn is_new(&self) -> Result<bool> {
        Ok(true)
    }
}

/// History adapter that reports every message as present and unread,
/// so startup reconciliation keeps rescued records around.
pub struct AlwaysNewHistory;

#[async_trait]
impl HistoryService for AlwaysNewHistory {
    async fn get_message(&self, _event_id: &str) -> Result<Box<dyn HistoryMessage>> {
        Ok(Box::new(AlwaysNewMessage))
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Accounts adapter with fixed answers.
///
/// MMS stays enabled unless explicitly disabled, matching the
/// default-true contract of the live accounts query.
pub struct StaticAccounts {
    mms_enabled: bool,
    mobile_data: bool,
}

impl StaticAccounts {
    pub fn new(mms_enabled: bool, mobile_data: bool) -> Self {
        Self {
            mms_enabled,
            mobile_data,
        }
    }
}

impl Default for StaticAccounts {
    fn default() -> Self {
        Self::new(true, true)
    }
}

#[async_trait]
impl AccountsService for StaticAccounts {
    async fn mms_enabled(&self) -> bool {
        self.mms_enabled
    }

    async fn mobile_data_enabled(&self) -> Result<bool> {
        Ok(self.mobile_data)
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Bus adapter that renders every signal into the log.
///
/// Stands in until a real bus connection is attached; lets headless
/// runs observe the full signal traffic.
pub struct LoggingBus;

#[async_trait]
impl MessageBus for LoggingBus {
    async fn emit(&self, signal: BusSignal) -> Result<()> {
        match &signal {
            BusSignal::MessageAdded { path, properties } => {
                tracing::info!(path = %path, ?properties, "MessageAdded");
            }
            BusSignal::MessageRemoved { path } => {
                tracing::info!(path = %path, "MessageRemoved");
            }
            BusSignal::PropertyChanged { path, name, value } => {
                tracing::info!(path = %path, name = %name, ?value, "PropertyChanged");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;

    struct FlakyRadio {
        failures: Mutex<Vec<NuntiumError>>,
        attempts: AtomicU32,
    }

    impl FlakyRadio {
        fn new(failures: Vec<NuntiumError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl RadioContextManager for FlakyRadio {
        async fn activate_mms_context(&self, _preferred: Option<&BusPath>) -> Result<MmsContext> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.failures.lock().unwrap().pop() {
                Some(error) => Err(error),
                None => Ok(MmsContext {
                    object_path: BusPath::new("/ctx"),
                    proxy: None,
                    message_center: None,
                }),
            }
        }

        async fn deactivate_mms_context(&self, _context: &MmsContext) -> Result<()> {
            Ok(())
        }

        async fn register_push_agent(&self) -> Result<()> {
            Ok(())
        }

        async fn unregister_push_agent(&self) -> Result<()> {
            Ok(())
        }
    }

    fn attach_error() -> NuntiumError {
        NuntiumError::Radio {
            reason: "org.ofono.Error.AttachInProgress: operation in progress".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_activation_failures_are_retried() {
        let radio = RetryingRadio::new(FlakyRadio::new(vec![attach_error(), attach_error()]));
        radio.activate_mms_context(None).await.unwrap();
        assert_eq!(radio.inner.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let radio = RetryingRadio::new(FlakyRadio::new(vec![
            attach_error(),
            attach_error(),
            attach_error(),
        ]));
        assert!(radio.activate_mms_context(None).await.is_err());
        assert_eq!(radio.inner.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn wrong_apn_style_failures_are_not_retried() {
        let radio = RetryingRadio::new(FlakyRadio::new(vec![NuntiumError::Radio {
            reason: "org.ofono.Error.InvalidFormat".into(),
        }]));
        assert!(radio.activate_mms_context(None).await.is_err());
        assert_eq!(radio.inner.attempts.load(Ordering::SeqCst), 1);
    }
}
