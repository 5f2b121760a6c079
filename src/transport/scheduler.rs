//! Slot-based capacity accounting for the shared transport layer: the
//! admission gate consulted before a unit commits to scheduling, plus the
//! occupancy wrapper that charges throttle-enabled requests against the
//! per-endpoint and global budgets.

use crate::content::descriptor::{EndpointKey, ResourceHandle};
use crate::runtime::config::LoaderConfig;
use crate::transport::client::{ContentClient, FetchError};
use crate::transport::request::ContentRequest;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Mutex};

/// Capacity queries and the shared pending-request counter.
///
/// `endpoint_has_capacity`/`global_has_capacity` are pure queries: they must
/// not reserve anything, so a caller can probe every endpoint it needs
/// before committing to any of them.
pub trait AdmissionGate: Send + Sync {
    fn endpoint_has_capacity(&self, endpoint: &EndpointKey, count: usize) -> bool;
    fn global_has_capacity(&self, count: usize) -> bool;
    fn add_pending(&self, delta: isize);
    fn pending_count(&self) -> isize;
}

#[derive(Debug, Default)]
struct ActiveSlots {
    total: usize,
    per_endpoint: HashMap<EndpointKey, usize>,
}

/// Default [`AdmissionGate`]: tracks active transfers globally and per
/// endpoint against fixed budgets, and carries the pending-request gauge
/// that content units charge when they schedule.
#[derive(Debug)]
pub struct SlotScheduler {
    max_active: usize,
    max_active_per_endpoint: usize,
    active: Mutex<ActiveSlots>,
    pending: AtomicIsize,
}

impl SlotScheduler {
    pub fn new(max_active: usize, max_active_per_endpoint: usize) -> Self {
        Self {
            max_active,
            max_active_per_endpoint,
            active: Mutex::new(ActiveSlots::default()),
            pending: AtomicIsize::new(0),
        }
    }

    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::new(
            config.max_active_requests(),
            config.max_active_per_endpoint(),
        )
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().total
    }

    pub fn active_for(&self, endpoint: &EndpointKey) -> usize {
        self.active
            .lock()
            .unwrap()
            .per_endpoint
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    /// Occupies one slot until the returned guard is dropped. `endpoint` is
    /// `None` for requests that are not throttled per endpoint.
    pub fn begin_request(scheduler: &Arc<Self>, endpoint: Option<EndpointKey>) -> SlotGuard {
        let mut active = scheduler.active.lock().unwrap();
        active.total += 1;
        if let Some(endpoint) = &endpoint {
            *active.per_endpoint.entry(endpoint.clone()).or_default() += 1;
        }
        drop(active);
        SlotGuard {
            scheduler: Arc::clone(scheduler),
            endpoint,
        }
    }

    fn end_request(&self, endpoint: Option<&EndpointKey>) {
        let mut active = self.active.lock().unwrap();
        active.total = active.total.saturating_sub(1);
        if let Some(endpoint) = endpoint {
            if let Some(count) = active.per_endpoint.get_mut(endpoint) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    active.per_endpoint.remove(endpoint);
                }
            }
        }
    }
}

impl AdmissionGate for SlotScheduler {
    fn endpoint_has_capacity(&self, endpoint: &EndpointKey, count: usize) -> bool {
        let active = self.active.lock().unwrap();
        let occupied = active.per_endpoint.get(endpoint).copied().unwrap_or(0);
        occupied.saturating_add(count) <= self.max_active_per_endpoint
    }

    fn global_has_capacity(&self, count: usize) -> bool {
        let active = self.active.lock().unwrap();
        active.total.saturating_add(count) <= self.max_active
    }

    fn add_pending(&self, delta: isize) {
        self.pending.fetch_add(delta, Ordering::SeqCst);
    }

    fn pending_count(&self) -> isize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Releases the occupied slot on drop.
pub struct SlotGuard {
    scheduler: Arc<SlotScheduler>,
    endpoint: Option<EndpointKey>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.scheduler.end_request(self.endpoint.as_ref());
    }
}

/// Wraps an inner client so throttle-enabled requests occupy scheduler slots
/// for the lifetime of the transfer.
pub struct ThrottledClient {
    inner: Arc<dyn ContentClient>,
    scheduler: Arc<SlotScheduler>,
}

impl ThrottledClient {
    pub fn new(inner: Arc<dyn ContentClient>, scheduler: Arc<SlotScheduler>) -> Self {
        Self { inner, scheduler }
    }

    pub fn scheduler(&self) -> &Arc<SlotScheduler> {
        &self.scheduler
    }
}

impl ContentClient for ThrottledClient {
    fn fetch(
        &self,
        resource: ResourceHandle,
        request: Arc<ContentRequest>,
    ) -> BoxFuture<'static, Result<Vec<u8>, FetchError>> {
        let inner = Arc::clone(&self.inner);
        let scheduler = Arc::clone(&self.scheduler);
        Box::pin(async move {
            let _slot = if request.throttle() {
                let endpoint = request
                    .throttle_by_endpoint()
                    .then(|| request.endpoint().clone());
                Some(SlotScheduler::begin_request(&scheduler, endpoint))
            } else {
                None
            };
            inner.fetch(resource, request).await
        })
    }
}
