//! Fetch orchestration for composite streaming content: all-or-nothing
//! admission against a shared transport budget, throttled cancellable
//! fetches grouped by endpoint, and aggregation of many sub-resource
//! payloads into one unit with single "fetched" and "ready" signals.

pub mod content;
pub mod runtime;
pub mod transport;

pub use content::admission::can_schedule_all;
pub use content::descriptor::{ContentEntry, ContentManifest, EndpointKey, ResourceHandle, SubResource};
pub use content::factory::{
    detect_payload, Content, ContentFactory, ContentMetrics, DebugSettings, GroupMetadata,
    MaterializeError, Payload, UpdateTick,
};
pub use content::multi::{LoadState, LoaderContext, MultiContent};
pub use runtime::config::{LoaderConfig, LoaderConfigBuilder};
pub use runtime::failures::{ContentFailure, FailureSink};
pub use runtime::signal::{CompletionSignal, SignalError, SignalWaiter};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use transport::client::{ContentClient, FetchError};
pub use transport::http::{HttpClientOptions, HttpContentClient};
pub use transport::request::{
    ContentRequest, PriorityHandle, PriorityResolver, RequestKind, RequestOptions, RequestState,
};
pub use transport::scheduler::{AdmissionGate, SlotScheduler, ThrottledClient};
