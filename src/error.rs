//! Error types for agent-checks.

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RecordType;
use thiserror::Error;

/// Errors that abort a whole poll of one check instance.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The statistics request exceeded the configured timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// URL that was being fetched.
        url: String,
    },

    /// HTTP transport error (connection refused, reset, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// URL that was being fetched.
        url: String,
        /// Status code returned by the server.
        status: u16,
    },

    /// The statistics document was not well-formed.
    #[error("malformed statistics document: {0}")]
    Parse(#[from] quick_xml::DeError),

    /// IO error (file, process spawn, ...).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CheckError {
    /// True for failures to reach the monitored server, false for failures to
    /// understand what it returned.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            CheckError::Timeout { .. } | CheckError::Http(_) | CheckError::Status { .. }
        )
    }
}

/// Errors scoped to the DNS walk of a single zone.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// Transport failure, timeout or negative answer from the queried server.
    #[error("DNS lookup failed: {0}")]
    Resolve(#[from] hickory_resolver::ResolveError),

    /// Malformed name, query or response.
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// The resolver answered with an error code (NXDOMAIN, SERVFAIL, ...).
    #[error("{name} {record_type}: server answered {code}")]
    ResponseCode {
        /// Queried name.
        name: String,
        /// Queried record type.
        record_type: RecordType,
        /// Response code returned.
        code: ResponseCode,
    },

    /// The response carried no record of the requested type.
    #[error("no {record_type} record in answer for {name}")]
    NoAnswer {
        /// Queried name.
        name: String,
        /// Queried record type.
        record_type: RecordType,
    },
}
