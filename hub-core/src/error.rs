//! Centralized error taxonomy for the hub.
//!
//! Every variant here corresponds to one of the error kinds spec'd for the
//! hub's recovery behavior: most are local to a single session or datagram
//! and never propagate past the component that raised them. Only
//! [`HubError::Fatal`] is meant to reach the composition root.

use thiserror::Error;

/// Error kinds raised by hub components.
///
/// Recovery is local by default — see the module docs. Only bind failures
/// (wrapped as [`HubError::Fatal`]) are expected to surface all the way to
/// `main`.
#[derive(Debug, Error)]
pub enum HubError {
    /// A control line or datagram was too short or not valid UTF-8/grammar.
    #[error("malformed message: {0}")]
    Protocol(String),

    /// A control stream hit EOF or a write error.
    #[error("peer gone: {0}")]
    PeerGone(String),

    /// A UDP send failed. Always swallowed by the caller; kept for logging.
    #[error("datagram send failed: {0}")]
    DatagramSend(#[source] std::io::Error),

    /// A TCP stream read or write failed (control, screen-control, or file
    /// session). Distinct from [`HubError::DatagramSend`], which is UDP-only.
    #[error("stream io error: {0}")]
    StreamIo(#[source] std::io::Error),

    /// The presenter lease is held by someone else.
    #[error("presenter lease busy")]
    ResourceConflict,

    /// An upload's body was shorter than its declared size.
    #[error("upload incomplete: expected {expected} bytes, got {got}")]
    UploadIncomplete { expected: u64, got: u64 },

    /// An upload declared a size over the configured limit.
    #[error("upload too large: {size} bytes exceeds limit of {limit} bytes")]
    UploadTooLarge { size: u64, limit: u64 },

    /// A delete was attempted by someone other than the uploader.
    #[error("unauthorized delete of file {file_id} by participant {by}")]
    UnauthorizedDelete { file_id: u32, by: u32 },

    /// A file id did not resolve to a stored file.
    #[error("file not found: {0}")]
    FileNotFound(u32),

    /// Registry is at capacity.
    #[error("hub is full ({max_users} participants)")]
    HubFull { max_users: usize },

    /// Unrecoverable error: bind failure or similar. Shuts down the hub.
    #[error("fatal: {0}")]
    Fatal(#[source] std::io::Error),
}

/// Convenience alias used throughout `hub-core`.
pub type HubResult<T> = Result<T, HubError>;
