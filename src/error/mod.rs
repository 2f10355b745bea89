//! Error taxonomy and the shared failure funnel.
//!
//! # Responsibilities
//! - Typed configuration/runtime error values
//! - HTTP status reason lookup
//! - One rendering path for every failure (HTML, JSON or plain text)
//!
//! # Design Decisions
//! - Configuration errors (bad pattern, unknown alias, no routes) are fatal
//!   and always surface through the funnel; routing outcomes (404, 405, 403,
//!   304) are ordinary responses, never `Err` values
//! - Handler panics are caught at the dispatch boundary and re-enter the
//!   funnel as 500s

mod funnel;

pub use funnel::{
    capture_trace, loggable, render_cli, render_html, render_json, ErrorReport,
};

use thiserror::Error;

/// Failures raised by the framework itself.
///
/// Registration-time variants end request processing (or server startup)
/// unconditionally. `Handler` and `Panic` wrap application failures captured
/// during dispatch.
#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("Invalid routing pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid named route alias: {0}")]
    InvalidAlias(String),

    #[error("Named route does not exist: {0}")]
    UnknownAlias(String),

    #[error("Unsupported verb: {0}")]
    UnsupportedVerb(String),

    #[error("No routes specified")]
    NoRoutes,

    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    #[error("Invalid hive key: {0}")]
    InvalidKey(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Handler(String),

    #[error("Fatal error: {0}")]
    Panic(String),
}

impl FrameworkError {
    /// HTTP status the error surfaces as.
    pub fn status(&self) -> u16 {
        match self {
            FrameworkError::UnsupportedVerb(_) => 501,
            FrameworkError::UnknownHandler(_) => 404,
            _ => 500,
        }
    }
}

/// Reason phrase for a 3-digit HTTP status code.
pub fn reason(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        103 => "Early Hints",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Requested Range Not Satisfiable",
        417 => "Expectation Failed",
        421 => "Misdirected Request",
        422 => "Unprocessable Entity",
        423 => "Locked",
        429 => "Too Many Requests",
        451 => "Unavailable For Legal Reasons",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        507 => "Insufficient Storage",
        511 => "Network Authentication Required",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_phrases() {
        assert_eq!(reason(404), "Not Found");
        assert_eq!(reason(501), "Not Implemented");
        assert_eq!(reason(999), "");
    }

    #[test]
    fn error_status_mapping() {
        assert_eq!(FrameworkError::UnsupportedVerb("BREW".into()).status(), 501);
        assert_eq!(FrameworkError::UnknownHandler("x".into()).status(), 404);
        assert_eq!(FrameworkError::NoRoutes.status(), 500);
    }
}
