//! Materialization seam: the payload handed to the external content
//! factory, the traits a typed content object exposes back to the loader,
//! and the factory's error surface.

use crate::content::descriptor::ResourceHandle;
use anyhow::Result;
use futures::future::BoxFuture;
use serde::Deserialize;
use std::time::Duration;

/// Raw payload handed to the factory, classified by sniffing the fetched
/// bytes. Binary payloads are passed through at offset 0; payloads that
/// parse as JSON arrive pre-parsed.
#[derive(Debug, Clone)]
pub enum Payload {
    Binary { bytes: Vec<u8>, byte_offset: usize },
    Json(serde_json::Value),
}

/// Classifies fetched bytes for the factory. Anything that does not parse
/// as a JSON document is treated as an opaque binary payload.
pub fn detect_payload(bytes: Vec<u8>) -> Payload {
    let looks_structured = bytes
        .iter()
        .find(|byte| !byte.is_ascii_whitespace())
        .is_some_and(|byte| *byte == b'{');
    if looks_structured {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) {
            return Payload::Json(value);
        }
    }
    Payload::Binary {
        bytes,
        byte_offset: 0,
    }
}

/// Metadata group assigned to a materialized content object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GroupMetadata {
    pub name: String,
    #[serde(default)]
    pub properties: serde_json::Value,
}

/// Frame context forwarded to per-content update hooks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateTick {
    pub frame: u64,
    pub elapsed: Duration,
}

/// Debug visualization settings forwarded to contents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugSettings {
    pub enabled: bool,
    pub color: [f32; 4],
}

/// Read-only measurements shared by individual contents and composites.
///
/// Composites report the documented placeholder 0 for item-only
/// measurements; callers wanting real numbers query each inner content.
pub trait ContentMetrics {
    fn feature_count(&self) -> usize {
        0
    }

    fn geometry_byte_length(&self) -> usize {
        0
    }

    fn texture_byte_length(&self) -> usize {
        0
    }
}

/// Typed in-memory content object produced by the factory.
///
/// Destruction is `Drop`; the owning unit drops its contents when it is
/// dropped itself.
pub trait Content: ContentMetrics + Send {
    /// Settles once the content has finished its own internal preparation.
    fn ready(&self) -> BoxFuture<'static, Result<()>>;

    fn set_group_metadata(&mut self, metadata: Option<GroupMetadata>);

    fn group_metadata(&self) -> Option<&GroupMetadata>;

    fn update(&mut self, tick: &UpdateTick);

    fn apply_debug_settings(&mut self, settings: &DebugSettings);
}

/// Converts one fetched payload into a typed content object.
pub trait ContentFactory: Send + Sync {
    fn materialize(
        &self,
        payload: Payload,
        resource: &ResourceHandle,
    ) -> std::result::Result<Box<dyn Content>, MaterializeError>;
}

#[derive(Debug)]
pub enum MaterializeError {
    /// The payload is itself a composite manifest; composites cannot nest.
    ExternalAggregate,
    /// The payload's format could not be recognized.
    UnsupportedFormat { detected: String },
    /// The payload was recognized but decoding it failed.
    Decode(anyhow::Error),
}

impl std::fmt::Display for MaterializeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaterializeError::ExternalAggregate => {
                write!(f, "composite manifests are disallowed inside a composite")
            }
            MaterializeError::UnsupportedFormat { detected } => {
                write!(f, "unsupported payload format: {detected}")
            }
            MaterializeError::Decode(error) => write!(f, "failed to decode payload: {error}"),
        }
    }
}

impl std::error::Error for MaterializeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MaterializeError::Decode(error) => Some(error.as_ref()),
            _ => None,
        }
    }
}
