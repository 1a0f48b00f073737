//! Unified error types for Waypoint.
//!
//! Defines [`WaypointError`] (process-level failures: configuration,
//! binding, CLI helpers), [`ProxyError`] (per-request failures, each
//! mapped to an HTTP status) and [`ValidationError`] for config
//! validation failures. Error messages include contextual hints to
//! guide the user toward a fix.

use std::path::PathBuf;

use axum::http::StatusCode;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub route: String,
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "  route {}: {}: {}", self.route, self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

fn format_errors(errors: &[ValidationError]) -> String {
    use std::fmt::Write;
    let mut buf = String::new();
    for (i, e) in errors.iter().enumerate() {
        if i > 0 {
            buf.push('\n');
        }
        // write! to String is infallible
        let _ = write!(buf, "{e}");
    }
    buf
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WaypointError {
    #[error("No config source found.\n\n  {hint}")]
    NoConfigSource { hint: String },

    #[error("Config file not found: {}", path.display())]
    ConfigFileNotFound { path: PathBuf },

    #[error("Config parse error in {path}:\n  {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Config validation failed:\n{}", format_errors(.errors))]
    ConfigValidation { errors: Vec<ValidationError> },

    #[error("Unsupported config format: '{0}'")]
    UnsupportedFormat(String),

    #[error("Invalid address: {0}")]
    AddressParse(#[from] std::net::AddrParseError),

    #[error("Invalid URI: {source}")]
    UriParse {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("HTTP request failed: {source}")]
    HttpRequest {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Health check failed with status {0}")]
    HealthCheckFailed(StatusCode),
}

/// Failures scoped to a single proxied request.
///
/// None of these ever escape the task handling the request; the handler
/// turns them into a status line (or, for a vanished client, nothing).
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no route matches {path}")]
    RouteNotFound { path: String },

    #[error("upstream {upstream} unreachable: {source}")]
    UpstreamUnreachable {
        upstream: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("upstream {upstream} timed out during {phase}")]
    UpstreamTimeout {
        upstream: String,
        phase: &'static str,
    },

    #[error("upstream {upstream} protocol error: {source}")]
    UpstreamProtocolError {
        upstream: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("request body exceeds the configured limit")]
    PayloadTooLarge,

    #[error("failed to build upstream request: {0}")]
    InvalidRequest(String),
}

impl ProxyError {
    /// Status code reported to the client for this failure.
    ///
    /// `ClientDisconnected` has no meaningful status since nobody is left
    /// to read it; 499 is used purely for logging.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UpstreamUnreachable { .. }
            | Self::UpstreamTimeout { .. }
            | Self::UpstreamProtocolError { .. }
            | Self::InvalidRequest(_) => StatusCode::BAD_GATEWAY,
            Self::ClientDisconnected => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }
        }
    }
}
