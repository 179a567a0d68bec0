//! Status codes and the crate-wide error type.
//!
//! One enum, one `Display`/`Debug` impl, and conversions into each
//! transport's native error type (`tonic::Status` for gRPC, an HTTP
//! response for REST) so the two surfaces can never drift on status-code
//! mapping.

use std::fmt;

/// The closed set of status codes used across both transports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    NoContent,
}

/// `(status, message)` pair propagated by every handler and `Device` method.
#[derive(Clone, Debug)]
pub struct DmStatus {
    pub code: StatusCode,
    pub message: String,
}

impl DmStatus {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, "")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PermissionDenied, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(StatusCode::OutOfRange, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(StatusCode::AlreadyExists, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unauthenticated, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FailedPrecondition, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

impl fmt::Display for DmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for DmStatus {}

impl Default for DmStatus {
    fn default() -> Self {
        Self::ok()
    }
}

/// Any error type not explicitly modelled collapses to `INTERNAL`, per §7.
impl From<std::io::Error> for DmStatus {
    fn from(err: std::io::Error) -> Self {
        DmStatus::internal(err.to_string())
    }
}

/// Maps each status to its HTTP equivalent.
impl StatusCode {
    pub fn http_status(self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::NoContent => 204,
            StatusCode::InvalidArgument => 406,
            StatusCode::Unauthenticated => 407,
            StatusCode::DeadlineExceeded => 408,
            StatusCode::AlreadyExists => 409,
            StatusCode::PermissionDenied => 401,
            StatusCode::NotFound => 410,
            StatusCode::FailedPrecondition => 412,
            StatusCode::OutOfRange => 416,
            StatusCode::Unimplemented => 501,
            StatusCode::Internal => 500,
            StatusCode::Unavailable => 503,
            StatusCode::Cancelled => 410,
            StatusCode::Unknown | StatusCode::Aborted => 500,
        }
    }

    pub fn tonic_code(self) -> tonic::Code {
        match self {
            StatusCode::Ok | StatusCode::NoContent => tonic::Code::Ok,
            StatusCode::Cancelled => tonic::Code::Cancelled,
            StatusCode::Unknown => tonic::Code::Unknown,
            StatusCode::InvalidArgument => tonic::Code::InvalidArgument,
            StatusCode::DeadlineExceeded => tonic::Code::DeadlineExceeded,
            StatusCode::NotFound => tonic::Code::NotFound,
            StatusCode::AlreadyExists => tonic::Code::AlreadyExists,
            StatusCode::PermissionDenied => tonic::Code::PermissionDenied,
            StatusCode::Unauthenticated => tonic::Code::Unauthenticated,
            StatusCode::FailedPrecondition => tonic::Code::FailedPrecondition,
            StatusCode::Aborted => tonic::Code::Aborted,
            StatusCode::OutOfRange => tonic::Code::OutOfRange,
            StatusCode::Unimplemented => tonic::Code::Unimplemented,
            StatusCode::Internal => tonic::Code::Internal,
            StatusCode::Unavailable => tonic::Code::Unavailable,
        }
    }
}

impl From<DmStatus> for tonic::Status {
    fn from(value: DmStatus) -> Self {
        tonic::Status::new(value.code.tonic_code(), value.message)
    }
}

pub type DmResult<T> = Result<T, DmStatus>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping_matches_spec_table() {
        assert_eq!(StatusCode::Ok.http_status(), 200);
        assert_eq!(StatusCode::NoContent.http_status(), 204);
        assert_eq!(StatusCode::InvalidArgument.http_status(), 406);
        assert_eq!(StatusCode::Unauthenticated.http_status(), 407);
        assert_eq!(StatusCode::DeadlineExceeded.http_status(), 408);
        assert_eq!(StatusCode::AlreadyExists.http_status(), 409);
        assert_eq!(StatusCode::PermissionDenied.http_status(), 401);
        assert_eq!(StatusCode::NotFound.http_status(), 410);
        assert_eq!(StatusCode::FailedPrecondition.http_status(), 412);
        assert_eq!(StatusCode::OutOfRange.http_status(), 416);
        assert_eq!(StatusCode::Unimplemented.http_status(), 501);
        assert_eq!(StatusCode::Internal.http_status(), 500);
        assert_eq!(StatusCode::Unavailable.http_status(), 503);
        assert_eq!(StatusCode::Cancelled.http_status(), 410);
    }

    #[test]
    fn dm_status_ok_has_empty_message() {
        let s = DmStatus::ok();
        assert!(s.is_ok());
        assert_eq!(s.message, "");
    }

    #[test]
    fn io_error_collapses_to_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let status: DmStatus = io.into();
        assert_eq!(status.code, StatusCode::Internal);
    }
}
