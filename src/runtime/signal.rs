//! Per-attempt completion handles. A `CompletionSignal` settles exactly once
//! (resolve or reject) and every `SignalWaiter` cloned from it observes the
//! outcome. Signals are created fresh for each scheduling attempt and
//! discarded on cancellation so a stale attempt can never leak into a new
//! attempt's callbacks.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Terminal failure observed by signal waiters.
#[derive(Debug, Clone)]
pub enum SignalError {
    /// The attempt that owned the signal was discarded before settling it.
    Abandoned,
    /// The signal was rejected with the given error.
    Failed(Arc<anyhow::Error>),
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalError::Abandoned => write!(f, "completion signal abandoned before settling"),
            SignalError::Failed(error) => write!(f, "completion signal rejected: {error}"),
        }
    }
}

impl std::error::Error for SignalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SignalError::Abandoned => None,
            SignalError::Failed(error) => Some(error.as_ref().as_ref()),
        }
    }
}

#[derive(Debug, Clone)]
enum SignalState<T> {
    Pending,
    Resolved(T),
    Rejected(SignalError),
}

/// Single-use completion handle held by the side that settles the outcome.
#[derive(Debug)]
pub struct CompletionSignal<T> {
    tx: watch::Sender<SignalState<T>>,
}

impl<T: Clone + Send + Sync + 'static> CompletionSignal<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SignalState::Pending);
        Self { tx }
    }

    /// Returns a waiter observing this signal. Waiters stay valid after the
    /// signal settles and after the `CompletionSignal` is dropped.
    pub fn waiter(&self) -> SignalWaiter<T> {
        SignalWaiter {
            rx: self.tx.subscribe(),
        }
    }

    pub fn resolve(self, value: T) {
        let _ = self.tx.send(SignalState::Resolved(value));
    }

    pub fn reject(self, error: SignalError) {
        let _ = self.tx.send(SignalState::Rejected(error));
    }
}

impl<T: Clone + Send + Sync + 'static> Default for CompletionSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer half of a [`CompletionSignal`]; cheap to clone.
#[derive(Debug, Clone)]
pub struct SignalWaiter<T> {
    rx: watch::Receiver<SignalState<T>>,
}

impl<T: Clone + Send + Sync + 'static> SignalWaiter<T> {
    /// Waits until the signal settles. Returns [`SignalError::Abandoned`] if
    /// the owning side was dropped without resolving or rejecting.
    pub async fn wait(&mut self) -> Result<T, SignalError> {
        loop {
            if let Some(outcome) = self.peek() {
                return outcome;
            }
            if self.rx.changed().await.is_err() {
                return self.peek().unwrap_or(Err(SignalError::Abandoned));
            }
        }
    }

    /// Non-blocking probe; `None` while the signal is still pending.
    pub fn peek(&self) -> Option<Result<T, SignalError>> {
        match &*self.rx.borrow() {
            SignalState::Pending => None,
            SignalState::Resolved(value) => Some(Ok(value.clone())),
            SignalState::Rejected(error) => Some(Err(error.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn waiters_observe_resolution() {
        let signal = CompletionSignal::new();
        let mut first = signal.waiter();
        let mut second = signal.waiter();

        let pending = first.peek();
        assert!(pending.is_none(), "signal should start pending");

        signal.resolve(7u32);

        assert_eq!(first.wait().await.expect("first waiter"), 7);
        assert_eq!(second.wait().await.expect("second waiter"), 7);
    }

    #[tokio::test]
    async fn waiters_observe_rejection() {
        let signal = CompletionSignal::<()>::new();
        let mut waiter = signal.waiter();

        signal.reject(SignalError::Failed(Arc::new(anyhow!("content never loaded"))));

        let err = waiter.wait().await.expect_err("signal was rejected");
        assert!(matches!(err, SignalError::Failed(_)));
        assert!(format!("{err}").contains("content never loaded"));
    }

    #[tokio::test]
    async fn dropped_signal_abandons_waiters() {
        let signal = CompletionSignal::<()>::new();
        let mut waiter = signal.waiter();
        drop(signal);

        let err = timeout(Duration::from_millis(250), waiter.wait())
            .await
            .expect("wait should settle promptly")
            .expect_err("abandoned signal should error");
        assert!(matches!(err, SignalError::Abandoned));
    }

    #[tokio::test]
    async fn resolution_before_first_wait_is_not_lost() {
        let signal = CompletionSignal::new();
        let mut waiter = signal.waiter();
        signal.resolve("payload".to_string());

        assert_eq!(waiter.wait().await.expect("late waiter"), "payload");
        assert_eq!(
            waiter.peek().expect("settled").expect("resolved"),
            "payload"
        );
    }
}
