//! Per-node bridge, route and annotation bootstrap for the kbr overlay.
//!
//! Every entry point performs one synchronous pass: read configuration, observe
//! the host, apply the missing mutations and exit. Nothing here serialises
//! concurrent runs on the same node; the invoking hook must ensure only one
//! instance runs at a time.

use std::io::Write;
use std::process::ExitCode;

use serde::Serialize;
use serde_with::skip_serializing_none;
use thiserror::Error;
use tracing::*;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config Error: {0}")]
    ConfigError(String),

    #[error("Identification Error: {0}")]
    IdentificationError(String),

    #[error("Activation Error: {message}")]
    ActivationError {
        message: String,
        details: Option<String>,
    },

    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("IO Error: {0}")]
    IoError(std::io::Error),

    /// NB: this is a catch-all for any other errors
    #[error("Other Error: {0}")]
    OtherError(String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn activation(message: impl Into<String>, details: impl ToString) -> Self {
        Error::ActivationError {
            message: message.into(),
            details: Some(details.to_string()),
        }
    }

    /// Numeric code reported to the invoking hook
    pub fn code(&self) -> u32 {
        match self {
            Error::ConfigError(_) => 102,
            Error::IdentificationError(_) => 105,
            Error::ActivationError { .. } => 108,
            _ => 200,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        let (message, details) = match self {
            Error::ConfigError(msg) | Error::IdentificationError(msg) => (msg.clone(), None),
            Error::ActivationError { message, details } => (message.clone(), details.clone()),
            other => (other.to_string(), None),
        };
        ErrorResponse {
            code: self.code(),
            message,
            details,
        }
    }
}

#[skip_serializing_none]
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
    pub details: Option<String>,
}

/// Map the outcome of an entry point to its exit code, writing the JSON error
/// object to stdout on failure.
pub fn finish(result: Result<()>) -> ExitCode {
    finish_to(result, &mut std::io::stdout())
}

/// [`finish`] writing to `out` instead of stdout
pub fn finish_to(result: Result<()>, out: &mut impl Write) -> ExitCode {
    let err = match result {
        Ok(()) => return ExitCode::SUCCESS,
        Err(err) => err,
    };
    error!("{err}");
    let body = serde_json::to_string(&err.to_response())
        .unwrap_or_else(|e| format!(r#"{{"code":200,"message":"{e}"}}"#));
    if let Err(e) = writeln!(out, "{body}").and_then(|_| out.flush()) {
        error!("Failed to write error response: {e}");
    }
    ExitCode::FAILURE
}

pub mod annotations;
pub mod cidr;
pub mod cluster;
pub mod config;
pub mod descriptor;
pub mod desired;
pub mod helper;
pub mod host;
pub mod reconcile;

/// Log and trace integrations
pub mod telemetry;
