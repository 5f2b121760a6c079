//! Cancellable request handles. Each scheduling attempt builds one
//! `ContentRequest` per sub-resource; cancellation is cooperative through the
//! embedded token, and the priority resolver is evaluated when the transport
//! asks, not when the request was built.

use crate::content::descriptor::EndpointKey;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Callback producing the owning unit's priority at evaluation time.
pub type PriorityResolver = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Tag describing what a request is fetching, used by transport accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Content,
    Manifest,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Unissued,
    Active,
    Done,
    Cancelled,
    Failed,
}

const STATE_UNISSUED: u8 = 0;
const STATE_ACTIVE: u8 = 1;
const STATE_DONE: u8 = 2;
const STATE_CANCELLED: u8 = 3;
const STATE_FAILED: u8 = 4;

impl RequestState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            STATE_ACTIVE => RequestState::Active,
            STATE_DONE => RequestState::Done,
            STATE_CANCELLED => RequestState::Cancelled,
            STATE_FAILED => RequestState::Failed,
            _ => RequestState::Unissued,
        }
    }

    fn raw(self) -> u8 {
        match self {
            RequestState::Unissued => STATE_UNISSUED,
            RequestState::Active => STATE_ACTIVE,
            RequestState::Done => STATE_DONE,
            RequestState::Cancelled => STATE_CANCELLED,
            RequestState::Failed => STATE_FAILED,
        }
    }
}

pub struct RequestOptions {
    pub throttle: bool,
    pub throttle_by_endpoint: bool,
    pub kind: RequestKind,
    pub endpoint: EndpointKey,
    pub priority: PriorityResolver,
}

/// One in-flight fetch. Cancellation never blocks: `cancel` flips the state
/// and fires the token; the transport observes it at its next suspension
/// point.
pub struct ContentRequest {
    throttle: bool,
    throttle_by_endpoint: bool,
    kind: RequestKind,
    endpoint: EndpointKey,
    priority: PriorityResolver,
    state: AtomicU8,
    token: CancellationToken,
}

impl ContentRequest {
    pub fn new(options: RequestOptions) -> Self {
        Self {
            throttle: options.throttle,
            throttle_by_endpoint: options.throttle_by_endpoint,
            kind: options.kind,
            endpoint: options.endpoint,
            priority: options.priority,
            state: AtomicU8::new(STATE_UNISSUED),
            token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> RequestState {
        RequestState::from_raw(self.state.load(Ordering::SeqCst))
    }

    pub fn throttle(&self) -> bool {
        self.throttle
    }

    pub fn throttle_by_endpoint(&self) -> bool {
        self.throttle_by_endpoint
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn endpoint(&self) -> &EndpointKey {
        &self.endpoint
    }

    /// Evaluates the priority resolver now.
    pub fn priority(&self) -> f64 {
        (self.priority)()
    }

    /// Requests cooperative cancellation. Settled requests keep their
    /// terminal state; in-flight ones move to `Cancelled`.
    pub fn cancel(&self) {
        for from in [STATE_UNISSUED, STATE_ACTIVE] {
            if self
                .state
                .compare_exchange(from, STATE_CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }
        self.token.cancel();
    }

    /// Resolves once cancellation has been requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Transition hooks for transports driving the request lifecycle. A
    /// request that was cancelled keeps its `Cancelled` state; late
    /// completions must not resurrect it.
    pub fn mark_active(&self) {
        let _ = self.state.compare_exchange(
            STATE_UNISSUED,
            STATE_ACTIVE,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn mark_done(&self) {
        let _ = self.state.compare_exchange(
            STATE_ACTIVE,
            STATE_DONE,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn mark_failed(&self) {
        let _ = self.state.compare_exchange(
            STATE_ACTIVE,
            STATE_FAILED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

impl fmt::Debug for ContentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentRequest")
            .field("state", &self.state())
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("throttle", &self.throttle)
            .field("throttle_by_endpoint", &self.throttle_by_endpoint)
            .finish()
    }
}

/// Shared mutable priority for one content unit. Requests read it through
/// their resolver each time the transport evaluates them, so priority
/// changes made while a request is queued still take effect.
#[derive(Debug, Clone)]
pub struct PriorityHandle {
    bits: Arc<AtomicU64>,
}

impl PriorityHandle {
    pub fn new(priority: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(priority.to_bits())),
        }
    }

    pub fn set(&self, priority: f64) {
        self.bits.store(priority.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn resolver(&self) -> PriorityResolver {
        let bits = Arc::clone(&self.bits);
        Arc::new(move || f64::from_bits(bits.load(Ordering::Relaxed)))
    }
}

impl Default for PriorityHandle {
    fn default() -> Self {
        Self::new(0.0)
    }
}
