#![allow(dead_code)]

pub mod content_server;

use anyhow::anyhow;
use futures::future::BoxFuture;
use multicontent::{
    AdmissionGate, Content, ContentClient, ContentFactory, ContentMetrics, ContentRequest,
    DebugSettings, EndpointKey, FetchError, GroupMetadata, MaterializeError, Payload,
    ResourceHandle, UpdateTick,
};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

static TRACING: Lazy<()> = Lazy::new(multicontent::init_tracing);

pub fn init_test_tracing() {
    Lazy::force(&TRACING);
}

/// Scripted transport: each URL resolves to a canned behavior.
#[derive(Clone)]
pub enum Behavior {
    Bytes(Vec<u8>),
    Status(u16),
    /// Parks until the request is cancelled.
    HangUntilCancelled,
    /// Parks until the notify fires, then yields the bytes (cancellable).
    GateThen(Arc<Notify>, Vec<u8>),
}

pub struct ScriptedClient {
    behaviors: Mutex<HashMap<String, Behavior>>,
    default_behavior: Mutex<Behavior>,
    seen_priorities: Arc<Mutex<Vec<f64>>>,
}

impl ScriptedClient {
    pub fn new(default_behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(HashMap::new()),
            default_behavior: Mutex::new(default_behavior),
            seen_priorities: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn script(&self, url: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(url.to_string(), behavior);
    }

    pub fn set_default(&self, behavior: Behavior) {
        *self.default_behavior.lock().unwrap() = behavior;
    }

    pub fn seen_priorities(&self) -> Vec<f64> {
        self.seen_priorities.lock().unwrap().clone()
    }

    fn behavior_for(&self, url: &str) -> Behavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| self.default_behavior.lock().unwrap().clone())
    }
}

impl ContentClient for ScriptedClient {
    fn fetch(
        &self,
        resource: ResourceHandle,
        request: Arc<ContentRequest>,
    ) -> BoxFuture<'static, Result<Vec<u8>, FetchError>> {
        let behavior = self.behavior_for(resource.url());
        let url = resource.url().to_string();
        self.seen_priorities.lock().unwrap().push(request.priority());
        Box::pin(async move {
            request.mark_active();
            match behavior {
                Behavior::Bytes(bytes) => {
                    request.mark_done();
                    Ok(bytes)
                }
                Behavior::Status(status) => {
                    request.mark_failed();
                    Err(FetchError::Status { url, status })
                }
                Behavior::HangUntilCancelled => {
                    request.cancelled().await;
                    Err(FetchError::Cancelled)
                }
                Behavior::GateThen(gate, bytes) => {
                    tokio::select! {
                        _ = request.cancelled() => Err(FetchError::Cancelled),
                        _ = gate.notified() => {
                            request.mark_done();
                            Ok(bytes)
                        }
                    }
                }
            }
        })
    }
}

/// Admission gate with scriptable refusals and a real pending counter.
#[derive(Default)]
pub struct StubGate {
    pending: AtomicIsize,
    denied_endpoints: Mutex<HashSet<String>>,
    global_denied: AtomicBool,
}

impl StubGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny_endpoint(&self, endpoint: &EndpointKey) {
        self.denied_endpoints
            .lock()
            .unwrap()
            .insert(endpoint.as_str().to_string());
    }

    pub fn allow_endpoint(&self, endpoint: &EndpointKey) {
        self.denied_endpoints
            .lock()
            .unwrap()
            .remove(endpoint.as_str());
    }

    pub fn deny_global(&self, denied: bool) {
        self.global_denied.store(denied, Ordering::SeqCst);
    }
}

impl AdmissionGate for StubGate {
    fn endpoint_has_capacity(&self, endpoint: &EndpointKey, _count: usize) -> bool {
        !self
            .denied_endpoints
            .lock()
            .unwrap()
            .contains(endpoint.as_str())
    }

    fn global_has_capacity(&self, _count: usize) -> bool {
        !self.global_denied.load(Ordering::SeqCst)
    }

    fn add_pending(&self, delta: isize) {
        self.pending.fetch_add(delta, Ordering::SeqCst);
    }

    fn pending_count(&self) -> isize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Byte prefix that makes [`TestFactory`] fail materialization.
pub const REJECT_PREFIX: &[u8] = b"reject:";
/// Byte prefix that produces a content whose readiness future fails.
pub const UNREADY_PREFIX: &[u8] = b"unready:";

pub struct StubContent {
    group: Option<GroupMetadata>,
    ready_error: Option<String>,
    length: usize,
}

impl ContentMetrics for StubContent {
    fn feature_count(&self) -> usize {
        self.length
    }

    fn geometry_byte_length(&self) -> usize {
        self.length * 16
    }
}

impl Content for StubContent {
    fn ready(&self) -> BoxFuture<'static, anyhow::Result<()>> {
        let ready_error = self.ready_error.clone();
        Box::pin(async move {
            match ready_error {
                Some(message) => Err(anyhow!(message)),
                None => Ok(()),
            }
        })
    }

    fn set_group_metadata(&mut self, metadata: Option<GroupMetadata>) {
        self.group = metadata;
    }

    fn group_metadata(&self) -> Option<&GroupMetadata> {
        self.group.as_ref()
    }

    fn update(&mut self, _tick: &UpdateTick) {}

    fn apply_debug_settings(&mut self, _settings: &DebugSettings) {}
}

/// Factory for tests: structured payloads that look like a composite
/// manifest are rejected as nested aggregates, `reject:` payloads fail to
/// decode, `unready:` payloads materialize but never become ready.
pub struct TestFactory;

impl ContentFactory for TestFactory {
    fn materialize(
        &self,
        payload: Payload,
        _resource: &ResourceHandle,
    ) -> Result<Box<dyn Content>, MaterializeError> {
        match payload {
            Payload::Json(value) if value.get("contents").is_some() => {
                Err(MaterializeError::ExternalAggregate)
            }
            Payload::Json(value) => Ok(Box::new(StubContent {
                group: None,
                ready_error: None,
                length: value.to_string().len(),
            })),
            Payload::Binary { bytes, .. } => {
                if bytes.starts_with(REJECT_PREFIX) {
                    return Err(MaterializeError::Decode(anyhow!(
                        "scripted decode failure"
                    )));
                }
                let ready_error = bytes
                    .strip_prefix(UNREADY_PREFIX)
                    .map(|rest| String::from_utf8_lossy(rest).into_owned());
                Ok(Box::new(StubContent {
                    group: None,
                    ready_error,
                    length: bytes.len(),
                }))
            }
        }
    }
}

pub fn resource(url: &str) -> ResourceHandle {
    ResourceHandle::new(url).expect("test url should be valid")
}

pub fn endpoint(url: &str) -> EndpointKey {
    EndpointKey::from_url(url).expect("test url should be valid")
}
