//! Shared error type across herald crates.

use thiserror::Error;

/// Stable machine-readable error codes (operator/API surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed target set (e.g. multicast with fewer than two targets).
    InvalidRoute,
    /// Message expired before delivery.
    Expired,
    /// Recipient never subscribed or was evicted.
    UnknownSubscriber,
    /// Subscriber already registered (strict registration mode only).
    AlreadyActive,
    /// Pending queue rejected the message.
    QueueFull,
    /// Transient transport/handoff error; retried with backoff.
    DeliveryFailed,
    /// No acknowledgment arrived within the message timeout.
    AckTimeout,
    /// Wire frame could not be decoded.
    Decode,
    /// Unsupported schema or config version.
    UnsupportedVersion,
    /// Invalid input / malformed request.
    BadRequest,
    /// Referenced entity does not exist.
    NotFound,
    /// Internal engine error.
    Internal,
}

impl ErrorCode {
    /// String representation used in results and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidRoute => "INVALID_ROUTE",
            ErrorCode::Expired => "EXPIRED",
            ErrorCode::UnknownSubscriber => "UNKNOWN_SUBSCRIBER",
            ErrorCode::AlreadyActive => "ALREADY_ACTIVE",
            ErrorCode::QueueFull => "QUEUE_FULL",
            ErrorCode::DeliveryFailed => "DELIVERY_FAILED",
            ErrorCode::AckTimeout => "ACK_TIMEOUT",
            ErrorCode::Decode => "DECODE",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, HeraldError>;

/// Unified error type used by core and engine.
///
/// Note that a filtered-out delivery is *not* an error: it is a deliberate
/// policy outcome and is reported through delivery outcomes instead.
#[derive(Debug, Error)]
pub enum HeraldError {
    #[error("invalid route: {0}")]
    InvalidRoute(String),
    #[error("message expired")]
    Expired,
    #[error("unknown subscriber: {0}")]
    UnknownSubscriber(String),
    #[error("subscriber already active: {0}")]
    AlreadyActive(String),
    #[error("queue full for subscriber: {0}")]
    QueueFull(String),
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
    #[error("acknowledgment timed out")]
    AckTimeout,
    #[error("decode error: {0}")]
    Decode(String),
    #[error("unsupported version")]
    UnsupportedVersion,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl HeraldError {
    /// Map internal error to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            HeraldError::InvalidRoute(_) => ErrorCode::InvalidRoute,
            HeraldError::Expired => ErrorCode::Expired,
            HeraldError::UnknownSubscriber(_) => ErrorCode::UnknownSubscriber,
            HeraldError::AlreadyActive(_) => ErrorCode::AlreadyActive,
            HeraldError::QueueFull(_) => ErrorCode::QueueFull,
            HeraldError::DeliveryFailed(_) => ErrorCode::DeliveryFailed,
            HeraldError::AckTimeout => ErrorCode::AckTimeout,
            HeraldError::Decode(_) => ErrorCode::Decode,
            HeraldError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
            HeraldError::BadRequest(_) => ErrorCode::BadRequest,
            HeraldError::NotFound(_) => ErrorCode::NotFound,
            HeraldError::Internal(_) => ErrorCode::Internal,
        }
    }
}
