//! Composite content orchestration.
//!
//! `MultiContent` assembles one logical content unit out of N independently
//! addressed payloads. Scheduling is all-or-nothing: capacity for every
//! fetch is checked before any request is issued, so a refused tick has no
//! side effects and can simply be retried. Once scheduled, each fetch runs
//! as its own task; a monotonically increasing cancellation generation lets
//! every continuation detect that the attempt it belongs to has been
//! cancelled and discard its result instead of mutating shared state.

use crate::content::admission;
use crate::content::descriptor::{ContentManifest, EndpointKey, ResourceHandle, SubResource};
use crate::content::factory::{
    detect_payload, Content, ContentFactory, ContentMetrics, DebugSettings, GroupMetadata,
    MaterializeError, UpdateTick,
};
use crate::runtime::config::LoaderConfig;
use crate::runtime::failures::{ContentFailure, FailureSink};
use crate::runtime::signal::{CompletionSignal, SignalError, SignalWaiter};
use crate::runtime::telemetry::Telemetry;
use crate::transport::client::ContentClient;
use crate::transport::http::HttpContentClient;
use crate::transport::request::{
    ContentRequest, PriorityHandle, RequestKind, RequestOptions, RequestState,
};
use crate::transport::scheduler::{AdmissionGate, SlotScheduler, ThrottledClient};
use anyhow::{anyhow, bail, Result};
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Collaborators shared by every content unit a loader creates.
#[derive(Clone)]
pub struct LoaderContext {
    client: Arc<dyn ContentClient>,
    gate: Arc<dyn AdmissionGate>,
    factory: Arc<dyn ContentFactory>,
    failures: FailureSink,
    telemetry: Arc<Telemetry>,
}

impl LoaderContext {
    pub fn new(
        client: Arc<dyn ContentClient>,
        gate: Arc<dyn AdmissionGate>,
        factory: Arc<dyn ContentFactory>,
    ) -> Self {
        Self {
            client,
            gate,
            factory,
            failures: FailureSink::disabled(),
            telemetry: Arc::new(Telemetry::default()),
        }
    }

    /// Wires the default HTTP transport behind slot-based throttling, all
    /// sized from `config`.
    pub fn with_http_transport(
        config: &LoaderConfig,
        factory: Arc<dyn ContentFactory>,
    ) -> Result<Self> {
        let scheduler = Arc::new(SlotScheduler::from_config(config));
        let http = Arc::new(HttpContentClient::from_config(config)?);
        let client = Arc::new(ThrottledClient::new(http, Arc::clone(&scheduler)));
        Ok(Self::new(client, scheduler, factory))
    }

    pub fn with_failure_sink(mut self, failures: FailureSink) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn gate(&self) -> &Arc<dyn AdmissionGate> {
        &self.gate
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }
}

/// Externally visible lifecycle of a composite unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// No attempt in flight; eligible for scheduling.
    Unloaded,
    /// Fetches issued, payloads still arriving.
    Loading,
    /// All payloads settled and materialized; waiting on content readiness.
    Processing,
    /// Every materialized content reported ready.
    Ready,
    /// The aggregation machinery or a content readiness future failed.
    Failed,
}

struct UnitState {
    phase: LoadState,
    generation: u64,
    in_flight: usize,
    items: Vec<SubResource>,
    contents: Vec<Box<dyn Content>>,
    fetched: Option<SignalWaiter<()>>,
    ready: Option<SignalWaiter<()>>,
}

struct MultiContentInner {
    ctx: LoaderContext,
    priority: PriorityHandle,
    state: Mutex<UnitState>,
}

/// Everything one scheduling attempt owns: the per-attempt resource clones,
/// the spawned fetch tasks, and the completion signals created for exactly
/// this attempt.
struct Attempt {
    generation: u64,
    resources: Vec<ResourceHandle>,
    groups: Vec<Option<GroupMetadata>>,
    fetches: Vec<JoinHandle<Option<Vec<u8>>>>,
    fetched: CompletionSignal<()>,
    ready: CompletionSignal<()>,
}

/// One logical content unit assembled from many sub-resource payloads.
pub struct MultiContent {
    inner: Arc<MultiContentInner>,
}

impl std::fmt::Debug for MultiContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiContent").finish_non_exhaustive()
    }
}

impl MultiContent {
    /// Builds a unit over the given sub-resources. At least one is required.
    pub fn new(
        ctx: LoaderContext,
        items: Vec<SubResource>,
        priority: PriorityHandle,
    ) -> Result<Self> {
        if items.is_empty() {
            bail!("a composite content unit needs at least one sub-resource");
        }
        Ok(Self {
            inner: Arc::new(MultiContentInner {
                ctx,
                priority,
                state: Mutex::new(UnitState {
                    phase: LoadState::Unloaded,
                    generation: 0,
                    in_flight: 0,
                    items,
                    contents: Vec::new(),
                    fetched: None,
                    ready: None,
                }),
            }),
        })
    }

    /// Builds a unit from a parsed manifest, resolving entry URIs against
    /// `base`.
    pub fn from_manifest(
        ctx: LoaderContext,
        base: &ResourceHandle,
        manifest: &ContentManifest,
        priority: PriorityHandle,
    ) -> Result<Self> {
        let mut items = Vec::with_capacity(manifest.contents.len());
        for entry in &manifest.contents {
            let resource = base.derive(&entry.uri)?;
            let mut item = SubResource::new(resource);
            if let Some(group) = &entry.group {
                item = item.with_group(group.clone());
            }
            items.push(item);
        }
        Self::new(ctx, items, priority)
    }

    /// Attempts to schedule every sub-resource fetch. Returns 0 once the
    /// attempt is launched (or one is already in flight); otherwise returns
    /// the number of items that could not be scheduled, with no side
    /// effects, so the caller can retry on a later tick.
    ///
    /// Must be called from within a tokio runtime.
    pub fn request_contents(&self) -> usize {
        let inner = &self.inner;
        let mut state = inner.state.lock().unwrap();
        if state.phase != LoadState::Unloaded {
            return 0;
        }

        let total = state.items.len();
        let endpoints: Vec<EndpointKey> = state
            .items
            .iter()
            .map(|item| item.resource().endpoint().clone())
            .collect();
        if !admission::can_schedule_all(inner.ctx.gate.as_ref(), &endpoints) {
            inner.ctx.telemetry.record_admission_refusal();
            tracing::debug!(total, "transport capacity exhausted; deferring fetch");
            return total;
        }

        let generation = state.generation;
        let fetched = CompletionSignal::new();
        let ready = CompletionSignal::new();
        state.fetched = Some(fetched.waiter());
        state.ready = Some(ready.waiter());

        // Counters are charged before the first fetch task exists so a fast
        // continuation can never observe its own decrement ahead of the
        // attempt's increment.
        state.in_flight = total;
        state.phase = LoadState::Loading;
        inner.ctx.gate.add_pending(total as isize);

        let mut resources = Vec::with_capacity(total);
        let mut groups = Vec::with_capacity(total);
        let mut fetches = Vec::with_capacity(total);
        for item in state.items.iter_mut() {
            let resource = item.resource().clone_for_attempt();
            let request = Arc::new(ContentRequest::new(RequestOptions {
                throttle: true,
                throttle_by_endpoint: true,
                kind: RequestKind::Content,
                endpoint: resource.endpoint().clone(),
                priority: inner.priority.resolver(),
            }));
            item.attach_request(Arc::clone(&request));
            fetches.push(spawn_fetch(
                Arc::clone(inner),
                resource.clone(),
                request,
                generation,
            ));
            groups.push(item.group().cloned());
            resources.push(resource);
        }
        drop(state);

        inner.ctx.telemetry.record_scheduled_fetches(total as u64);
        tracing::debug!(total, "composite fetch scheduled");

        tokio::spawn(run_aggregation(
            Arc::clone(inner),
            Attempt {
                generation,
                resources,
                groups,
                fetches,
                fetched,
                ready,
            },
        ));
        0
    }

    /// Cancels every outstanding fetch of the current attempt. Never
    /// blocks; the bookkeeping rollback happens inside the fetch
    /// continuations once they observe the cancelled requests.
    pub fn cancel_requests(&self) {
        let state = self.inner.state.lock().unwrap();
        for item in &state.items {
            if let Some(request) = item.request() {
                request.cancel();
            }
        }
    }

    /// Waiter for the current attempt's "all payloads settled and
    /// materialized" signal; `None` while no attempt is in flight.
    pub fn contents_fetched(&self) -> Option<SignalWaiter<()>> {
        self.inner.state.lock().unwrap().fetched.clone()
    }

    /// Waiter for the current attempt's "all contents ready" signal; `None`
    /// while no attempt is in flight.
    pub fn ready_signal(&self) -> Option<SignalWaiter<()>> {
        self.inner.state.lock().unwrap().ready.clone()
    }

    pub fn load_state(&self) -> LoadState {
        self.inner.state.lock().unwrap().phase
    }

    pub fn sub_resource_count(&self) -> usize {
        self.inner.state.lock().unwrap().items.len()
    }

    /// Fetches currently charged against the transport pending counter.
    pub fn in_flight_count(&self) -> usize {
        self.inner.state.lock().unwrap().in_flight
    }

    /// Number of successfully materialized contents.
    pub fn content_count(&self) -> usize {
        self.inner.state.lock().unwrap().contents.len()
    }

    /// Visits every materialized content in declaration order.
    pub fn for_each_content(&self, mut visit: impl FnMut(&dyn Content)) {
        let state = self.inner.state.lock().unwrap();
        for content in &state.contents {
            visit(content.as_ref());
        }
    }

    /// Forwards a frame update to every materialized content.
    pub fn update(&self, tick: &UpdateTick) {
        let mut state = self.inner.state.lock().unwrap();
        for content in &mut state.contents {
            content.update(tick);
        }
    }

    /// Forwards debug settings to every materialized content.
    pub fn apply_debug_settings(&self, settings: &DebugSettings) {
        let mut state = self.inner.state.lock().unwrap();
        for content in &mut state.contents {
            content.apply_debug_settings(settings);
        }
    }

    pub fn priority(&self) -> &PriorityHandle {
        &self.inner.priority
    }
}

/// Item-only measurements are meaningless on the composite; it reports the
/// placeholder 0 for all of them. Query the inner contents for real values.
impl ContentMetrics for MultiContent {}

impl MultiContentInner {
    /// Rollback run by the first settled-fetch continuation that observes a
    /// cancelled request. Later continuations of the same attempt find the
    /// generation already advanced and no-op.
    fn reset_after_cancel(&self, generation: u64) {
        let released;
        {
            let mut state = self.state.lock().unwrap();
            if state.generation != generation {
                return;
            }
            state.generation += 1;
            released = state.in_flight;
            state.in_flight = 0;
            state.phase = LoadState::Unloaded;
            for item in state.items.iter_mut() {
                item.clear_request();
            }
            state.fetched = None;
            state.ready = None;
            self.ctx.gate.add_pending(-(released as isize));
        }
        self.ctx.telemetry.record_cancellation();
        tracing::debug!(released, "composite fetch cancelled; unit reset");
    }
}

fn spawn_fetch(
    inner: Arc<MultiContentInner>,
    resource: ResourceHandle,
    request: Arc<ContentRequest>,
    generation: u64,
) -> JoinHandle<Option<Vec<u8>>> {
    tokio::spawn(async move {
        let result = inner
            .ctx
            .client
            .fetch(resource.clone(), Arc::clone(&request))
            .await;
        match result {
            Ok(bytes) => {
                let mut state = inner.state.lock().unwrap();
                if state.generation != generation {
                    // cancellation already released this attempt's counters
                    return None;
                }
                state.in_flight = state.in_flight.saturating_sub(1);
                inner.ctx.gate.add_pending(-1);
                drop(state);
                inner.ctx.telemetry.record_completed_payload(bytes.len() as u64);
                Some(bytes)
            }
            Err(error) => {
                {
                    let state = inner.state.lock().unwrap();
                    if state.generation != generation {
                        return None;
                    }
                }
                if request.state() == RequestState::Cancelled {
                    inner.reset_after_cancel(generation);
                    return None;
                }
                let mut state = inner.state.lock().unwrap();
                if state.generation != generation {
                    return None;
                }
                state.in_flight = state.in_flight.saturating_sub(1);
                inner.ctx.gate.add_pending(-1);
                drop(state);
                inner.ctx.telemetry.record_fetch_failure();
                inner.ctx.failures.report(ContentFailure {
                    endpoint_url: resource.url().to_string(),
                    message: error.to_string(),
                });
                None
            }
        }
    })
}

#[tracing::instrument(name = "aggregate", skip_all, fields(generation = attempt.generation))]
async fn run_aggregation(inner: Arc<MultiContentInner>, attempt: Attempt) {
    let Attempt {
        generation,
        resources,
        groups,
        fetches,
        fetched,
        ready,
    } = attempt;

    let settled = join_all(fetches).await;

    let mut payloads: Vec<Option<Vec<u8>>> = Vec::with_capacity(settled.len());
    let mut defect: Option<anyhow::Error> = None;
    for joined in settled {
        match joined {
            Ok(value) => payloads.push(value),
            Err(error) => {
                if defect.is_none() {
                    defect = Some(anyhow!("fetch task aborted: {error}"));
                }
                payloads.push(None);
            }
        }
    }

    // A panicked fetch task is a defect in the machinery itself, not a
    // per-item content problem; it is the one thing allowed to reject the
    // fetched signal.
    if let Some(defect) = defect {
        tracing::error!(error = %defect, "composite aggregation failed");
        {
            let mut state = inner.state.lock().unwrap();
            if state.generation == generation {
                state.phase = LoadState::Failed;
            }
        }
        let error = SignalError::Failed(Arc::new(defect));
        fetched.reject(error.clone());
        ready.reject(error);
        return;
    }

    let stale = {
        let state = inner.state.lock().unwrap();
        state.generation != generation
    };
    if stale {
        // The attempt was cancelled while payloads were in flight. Settle
        // the old fetched signal with no payload; the consumer detects the
        // cancellation through the unit's state.
        fetched.resolve(());
        return;
    }

    let mut contents: Vec<Box<dyn Content>> = Vec::new();
    for (index, payload) in payloads.into_iter().enumerate() {
        let Some(bytes) = payload else { continue };
        let resource = &resources[index];
        match inner
            .ctx
            .factory
            .materialize(detect_payload(bytes), resource)
        {
            Ok(mut content) => {
                content.set_group_metadata(groups[index].clone());
                contents.push(content);
            }
            Err(error @ MaterializeError::ExternalAggregate) => {
                inner.ctx.telemetry.record_structural_violation();
                tracing::error!(url = resource.url(), "nested composite payload rejected");
                inner.ctx.failures.report(ContentFailure {
                    endpoint_url: resource.url().to_string(),
                    message: error.to_string(),
                });
            }
            Err(error) => {
                inner.ctx.telemetry.record_materialize_failure();
                inner.ctx.failures.report(ContentFailure {
                    endpoint_url: resource.url().to_string(),
                    message: error.to_string(),
                });
            }
        }
    }

    let ready_futures: Vec<_> = contents.iter().map(|content| content.ready()).collect();
    {
        let mut state = inner.state.lock().unwrap();
        if state.generation != generation {
            fetched.resolve(());
            return;
        }
        state.contents = contents;
        state.phase = LoadState::Processing;
        for item in state.items.iter_mut() {
            item.clear_request();
        }
    }
    fetched.resolve(());

    let results = join_all(ready_futures).await;
    let mut first_failure: Option<anyhow::Error> = None;
    for result in results {
        if let Err(error) = result {
            if first_failure.is_none() {
                first_failure = Some(error);
            } else {
                tracing::warn!(error = %error, "additional content readiness failure");
            }
        }
    }

    match first_failure {
        None => {
            inner.state.lock().unwrap().phase = LoadState::Ready;
            ready.resolve(());
        }
        Some(error) => {
            inner.state.lock().unwrap().phase = LoadState::Failed;
            ready.reject(SignalError::Failed(Arc::new(error)));
        }
    }
}
