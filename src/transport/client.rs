//! The byte-fetch seam between the orchestration core and the transport:
//! "fetch bytes from an endpoint, cancellable". Houses the `ContentClient`
//! trait consumed by content units and the typed fetch error.

use crate::content::descriptor::ResourceHandle;
use crate::transport::request::ContentRequest;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Transport capable of fetching one resource's raw payload.
///
/// Implementations must observe `request.cancelled()` at their suspension
/// points and return [`FetchError::Cancelled`] instead of blocking until the
/// transfer finishes.
pub trait ContentClient: Send + Sync {
    fn fetch(
        &self,
        resource: ResourceHandle,
        request: Arc<ContentRequest>,
    ) -> BoxFuture<'static, Result<Vec<u8>, FetchError>>;
}

#[derive(Debug)]
pub enum FetchError {
    Cancelled,
    Timeout { url: String },
    Status { url: String, status: u16 },
    Transport { url: String, message: String },
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Cancelled => write!(f, "fetch was cancelled"),
            FetchError::Timeout { url } => write!(f, "fetch of {url} timed out"),
            FetchError::Status { url, status } => {
                write!(f, "fetch of {url} failed with http status {status}")
            }
            FetchError::Transport { url, message } => {
                write!(f, "fetch of {url} failed: {message}")
            }
        }
    }
}

impl std::error::Error for FetchError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failing_url() {
        let err = FetchError::Status {
            url: "https://tiles.example.com/a.bin".into(),
            status: 503,
        };
        let text = format!("{err}");
        assert!(text.contains("tiles.example.com"));
        assert!(text.contains("503"));

        assert!(FetchError::Cancelled.is_cancelled());
        assert!(!err.is_cancelled());
    }
}
