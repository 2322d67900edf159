//! Error kinds surfaced by the overlay engine.
//!
//! Only three failure kinds are part of the public contract:
//!
//! - `MalformedDetection`: one provider record failed validation. The record is
//!   dropped and the rest of the batch is kept.
//! - `AcquisitionError`: the camera stream or rendering context could not be
//!   acquired. The AR view never reaches `Running`.
//! - `ProviderError`: the remote detection call failed. Surfaced to the caller,
//!   never retried.
//!
//! Everything else (I/O, decode, config) travels as `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MalformedDetection {
    #[error("detection entry is not an object")]
    NotAnObject,
    #[error("detection entry has no class")]
    MissingClass,
    #[error("detection field `{0}` is missing or not a finite number")]
    MissingField(&'static str),
    #[error("detection size must be positive: {width}x{height}")]
    NonPositiveSize { width: f64, height: f64 },
    #[error("detection confidence out of range: {0}")]
    ConfidenceOutOfRange(f64),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("camera access denied: {0}")]
    CameraDenied(String),
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("rendering context unavailable: {0}")]
    ContextUnavailable(String),
    #[error("camera stream has no live video track")]
    NoVideoTrack,
    #[error("acquisition cancelled")]
    Cancelled,
    #[error("view already active")]
    AlreadyActive,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider transport failed: {0}")]
    Transport(String),
    #[error("provider payload malformed: {0}")]
    MalformedPayload(String),
}
