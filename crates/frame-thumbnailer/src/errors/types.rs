//! Error type definitions for the thumbnailer
//!
//! Every failure to produce a thumbnail is non-fatal: the service logs it and
//! hands `None` back to the caller. The variants exist so that the log line
//! (and tests) can say precisely which stage gave up.

use std::time::Duration;
use thiserror::Error;

/// Why a request did not produce a thumbnail
#[derive(Error, Debug)]
pub enum ThumbnailError {
    /// The source could not be fetched or parsed at all
    #[error("Load failure: {locator} - {message}")]
    LoadFailure { locator: String, message: String },

    /// The renderer never reported decodable metadata
    #[error("Renderer not ready after {waited:?}: {locator}")]
    ReadyTimeout { locator: String, waited: Duration },

    /// Decodable, but no validated frame within the attempt budget
    #[error("Capture exhausted after {attempts} attempts (last failure: {last_failure})")]
    CaptureExhausted {
        attempts: u32,
        last_failure: CaptureFailure,
    },

    /// Frames were drawn, but the last attempt could not serialize one
    #[error("Encode failure after {attempts} attempts: {message}")]
    EncodeFailure { attempts: u32, message: String },

    /// The request itself is unusable (e.g. zero width)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// The concurrency gate was closed during shutdown
    #[error("Render gate closed")]
    GateClosed,

    /// Renderer infrastructure failure (helper processes, session state)
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
}

/// Outcome of a single failed capture attempt; every variant is retryable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureFailure {
    #[error("no frame available yet")]
    NotReady,

    #[error("frame is blank")]
    Blank,

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("renderer error: {0}")]
    Renderer(String),
}

/// Errors raised by renderer backends
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A helper process could not be started
    #[error("Failed to execute {command}: {message}")]
    Spawn { command: String, message: String },

    /// A helper process exited unsuccessfully
    #[error("{command} exited with {status}: {stderr}")]
    Process {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Output that could not be interpreted (bad JSON, short frame buffer)
    #[error("Invalid renderer output: {message}")]
    InvalidOutput { message: String },

    /// Operation issued in the wrong lifecycle state
    #[error("Invalid session state: {message}")]
    InvalidState { message: String },
}

/// Errors raised by the thumbnail store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Disk tier error: {0}")]
    Disk(#[from] sandboxed_file_manager::SandboxedFileError),

    #[error("Corrupt cache entry {entry}: {message}")]
    Corrupt { entry: String, message: String },
}

/// Configuration validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {field} - {message}")]
    Invalid { field: String, message: String },
}

impl ThumbnailError {
    pub fn load_failure<L: Into<String>, M: Into<String>>(locator: L, message: M) -> Self {
        Self::LoadFailure {
            locator: locator.into(),
            message: message.into(),
        }
    }

    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Short stable label, used as a structured log field
    pub fn error_type(&self) -> &'static str {
        match self {
            ThumbnailError::LoadFailure { .. } => "load_failure",
            ThumbnailError::ReadyTimeout { .. } => "ready_timeout",
            ThumbnailError::CaptureExhausted { .. } => "capture_exhausted",
            ThumbnailError::EncodeFailure { .. } => "encode_failure",
            ThumbnailError::InvalidRequest { .. } => "invalid_request",
            ThumbnailError::GateClosed => "gate_closed",
            ThumbnailError::Render(_) => "render_error",
        }
    }
}

impl RenderError {
    pub fn spawn<C: Into<String>, M: Into<String>>(command: C, message: M) -> Self {
        Self::Spawn {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn invalid_output<S: Into<String>>(message: S) -> Self {
        Self::InvalidOutput {
            message: message.into(),
        }
    }

    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }
}

impl ConfigError {
    pub fn invalid<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}
