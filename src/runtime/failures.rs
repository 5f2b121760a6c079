//! Per-item failure reporting. Failures are isolated to the sub-resource
//! they belong to and never reject the aggregate; consumers that want them
//! attach a channel, everyone else gets a structured log line.

use tokio::sync::mpsc;

/// Notification describing a failed sub-resource fetch or materialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFailure {
    pub endpoint_url: String,
    pub message: String,
}

/// Destination for [`ContentFailure`] notifications.
#[derive(Debug, Clone, Default)]
pub struct FailureSink {
    tx: Option<mpsc::UnboundedSender<ContentFailure>>,
}

impl FailureSink {
    /// Sink without a listener; every report falls back to the log.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Sink paired with a receiver the consumer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ContentFailure>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn report(&self, failure: ContentFailure) {
        match &self.tx {
            Some(tx) => {
                if let Err(returned) = tx.send(failure) {
                    Self::log(&returned.0);
                }
            }
            None => Self::log(&failure),
        }
    }

    fn log(failure: &ContentFailure) {
        tracing::warn!(
            endpoint_url = %failure.endpoint_url,
            message = %failure.message,
            "content failure (no listener attached)"
        );
    }
}
