//! Provider failure taxonomy.
//!
//! Every RPC failure is classified once, at the provider boundary, into the
//! kind that decides how callers react: shrink the block span, back off,
//! retry a bounded number of times, or give up on the item.

use alloy::transports::{RpcError as TransportRpcError, TransportError, TransportErrorKind};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RangeTooLarge,
    RateLimited,
    Transient,
    Unknown,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    /// The provider refused the block span of an `eth_getLogs` query.
    #[error("block range too large: {0}")]
    RangeTooLarge(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Timeouts, dropped connections, 5xx responses.
    #[error("transient failure: {0}")]
    Transient(String),
    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("rpc error: {0}")]
    Unknown(String),
}

const RATE_LIMIT_MARKERS: &[&str] = &[
    "too many requests",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "compute units per second",
    "http error 429",
    "status code 429",
];

const RANGE_MARKERS: &[&str] = &[
    "block range",
    "range is too large",
    "range too large",
    "range exceeds",
    "query returned more than",
    "response size exceeded",
    "too many blocks",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "reset by peer",
    "broken pipe",
    "temporarily unavailable",
    "service unavailable",
    "bad gateway",
    "unexpected eof",
    "header not found",
];

/// HTTP 429 echoed as a JSON-RPC error code.
const TOO_MANY_REQUESTS: i64 = 429;
/// JSON-RPC code some providers return for oversized log queries.
const LIMIT_EXCEEDED_CODE: i64 = -32005;
/// JSON-RPC "invalid request", which Arbitrum endpoints use for span limits.
const INVALID_REQUEST_CODE: i64 = -32600;

impl RpcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::RangeTooLarge(_) => ErrorKind::RangeTooLarge,
            RpcError::RateLimited(_) => ErrorKind::RateLimited,
            RpcError::Transient(_) => ErrorKind::Transient,
            RpcError::Decode(_) | RpcError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Classify a provider failure from whatever the transport exposed.
    ///
    /// Rate limiting wins over range markers: "rate limit exceeded" must
    /// back off, not shrink the span.
    pub fn classify(code: Option<i64>, http_status: Option<u16>, message: &str) -> Self {
        let lower = message.to_lowercase();
        let detail = match code {
            Some(code) => format!("{} (code {})", message, code),
            None => message.to_string(),
        };

        if http_status == Some(429)
            || code == Some(TOO_MANY_REQUESTS)
            || RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
        {
            return RpcError::RateLimited(detail);
        }

        if matches!(code, Some(LIMIT_EXCEEDED_CODE) | Some(INVALID_REQUEST_CODE))
            || RANGE_MARKERS.iter().any(|m| lower.contains(m))
        {
            return RpcError::RangeTooLarge(detail);
        }

        if http_status.is_some_and(|s| s >= 500)
            || TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
        {
            return RpcError::Transient(detail);
        }

        RpcError::Unknown(detail)
    }
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        match &err {
            TransportRpcError::ErrorResp(payload) => {
                RpcError::classify(Some(payload.code), None, &payload.message)
            },
            TransportRpcError::Transport(TransportErrorKind::HttpError(http)) => {
                RpcError::classify(None, Some(http.status), &http.body)
            },
            TransportRpcError::DeserError { .. } | TransportRpcError::SerError(_) => {
                RpcError::Decode(err.to_string())
            },
            TransportRpcError::NullResp => RpcError::Transient(err.to_string()),
            _ => RpcError::classify(None, None, &err.to_string()),
        }
    }
}

impl From<alloy::contract::Error> for RpcError {
    fn from(err: alloy::contract::Error) -> Self {
        match err {
            alloy::contract::Error::TransportError(e) => e.into(),
            other => RpcError::Decode(other.to_string()),
        }
    }
}
