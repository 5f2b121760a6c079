//! Transport plumbing: cancellable request handles, the byte-fetch client
//! seam, the HTTP implementation, and slot-based capacity accounting.

pub mod client;
pub mod http;
pub mod request;
pub mod scheduler;

pub use client::{ContentClient, FetchError};
pub use http::{HttpClientOptions, HttpContentClient};
pub use request::{ContentRequest, PriorityHandle, RequestKind, RequestOptions, RequestState};
pub use scheduler::{AdmissionGate, SlotGuard, SlotScheduler, ThrottledClient};
