//! Image acquisition error types.

use thiserror::Error;

/// HTTP status codes whose failure is considered transient.
pub const TRANSIENT_HTTP_STATUSES: [u16; 7] = [404, 408, 429, 500, 502, 503, 504];

/// Kind of transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The request or body read timed out.
    Timeout,
    /// The connection could not be established (DNS, refused, TLS).
    Connect,
    /// The connection broke while streaming the body.
    Body,
    /// Any other transport failure.
    Other,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Connect => write!(f, "connect"),
            Self::Body => write!(f, "body"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Errors raised while acquiring, decoding or storing an image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum ImageError {
    #[error("invalid image URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP {code}: {message}")]
    Http { code: u16, message: String },

    #[error("network error ({kind}): {cause}")]
    Transport { kind: TransportKind, cause: String },

    #[error("failed to decode image: {message}")]
    Decode { message: String },

    #[error("image cache storage error: {message}")]
    Storage { message: String },
}

impl ImageError {
    /// Creates invalid URL error.
    #[must_use]
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates HTTP status error.
    #[must_use]
    pub fn http(code: u16, message: impl Into<String>) -> Self {
        Self::Http {
            code,
            message: message.into(),
        }
    }

    /// Creates transport error.
    #[must_use]
    pub fn transport(kind: TransportKind, cause: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            cause: cause.into(),
        }
    }

    /// Creates decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Returns whether a later attempt may succeed.
    ///
    /// Transport failures are always transient. HTTP failures are transient
    /// only for the codes in [`TRANSIENT_HTTP_STATUSES`]; everything else is
    /// treated as permanent.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Http { code, .. } => TRANSIENT_HTTP_STATUSES.contains(code),
            Self::InvalidUrl { .. } | Self::Decode { .. } | Self::Storage { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(ImageError::invalid_url("nope", "relative URL"), false ; "invalid url")]
    #[test_case(ImageError::http(404, "Not Found"), true ; "not found")]
    #[test_case(ImageError::http(408, "Request Timeout"), true ; "request timeout")]
    #[test_case(ImageError::http(503, "Service Unavailable"), true ; "unavailable")]
    #[test_case(ImageError::http(403, "Forbidden"), false ; "forbidden")]
    #[test_case(ImageError::http(400, "Bad Request"), false ; "bad request")]
    #[test_case(ImageError::transport(TransportKind::Timeout, "timed out"), true ; "timeout")]
    #[test_case(ImageError::transport(TransportKind::Connect, "refused"), true ; "connect")]
    #[test_case(ImageError::decode("bad magic"), false ; "decode")]
    #[test_case(ImageError::storage("disk full"), false ; "storage")]
    fn test_retry_classification(error: ImageError, retryable: bool) {
        assert_eq!(error.is_retryable(), retryable);
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            ImageError::http(500, "Internal Server Error").to_string(),
            "HTTP 500: Internal Server Error"
        );
        assert_eq!(
            ImageError::transport(TransportKind::Timeout, "deadline elapsed").to_string(),
            "network error (timeout): deadline elapsed"
        );
    }
}
