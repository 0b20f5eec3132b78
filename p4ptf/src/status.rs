/*
Copyright (c) 2021 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! `google.rpc` status codes and the statuses that carry them.

use std::fmt::{self, Display};

/// Canonical `google.rpc.Code` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    const ALL: [Code; 17] = [
        Code::Ok,
        Code::Cancelled,
        Code::Unknown,
        Code::InvalidArgument,
        Code::DeadlineExceeded,
        Code::NotFound,
        Code::AlreadyExists,
        Code::PermissionDenied,
        Code::ResourceExhausted,
        Code::FailedPrecondition,
        Code::Aborted,
        Code::OutOfRange,
        Code::Unimplemented,
        Code::Internal,
        Code::Unavailable,
        Code::DataLoss,
        Code::Unauthenticated,
    ];

    /// Returns the code with numeric value `value`, if there is one.
    pub fn from_i32(value: i32) -> Option<Code> {
        Self::ALL.iter().copied().find(|c| *c as i32 == value)
    }

    /// The upper-case name used by the protobuf enum, e.g. `NOT_FOUND`.
    pub fn name(self) -> &'static str {
        use Code::*;
        match self {
            Ok => "OK",
            Cancelled => "CANCELLED",
            Unknown => "UNKNOWN",
            InvalidArgument => "INVALID_ARGUMENT",
            DeadlineExceeded => "DEADLINE_EXCEEDED",
            NotFound => "NOT_FOUND",
            AlreadyExists => "ALREADY_EXISTS",
            PermissionDenied => "PERMISSION_DENIED",
            ResourceExhausted => "RESOURCE_EXHAUSTED",
            FailedPrecondition => "FAILED_PRECONDITION",
            Aborted => "ABORTED",
            OutOfRange => "OUT_OF_RANGE",
            Unimplemented => "UNIMPLEMENTED",
            Internal => "INTERNAL",
            Unavailable => "UNAVAILABLE",
            DataLoss => "DATA_LOSS",
            Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A `p4.v1.Error`: the outcome of one update within a write batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateError {
    /// A `google.rpc.Code` value.  Kept as the raw integer because a
    /// misbehaving device can send anything here.
    pub canonical_code: i32,
    pub message: String,
    /// Target-specific error space and code, both optional.
    pub space: String,
    pub code: i32,
}

impl UpdateError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        UpdateError {
            canonical_code: code as i32,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn ok() -> Self {
        Self::new(Code::Ok, "")
    }
}

/// One element of `google.rpc.Status.details`, after an attempt to unpack
/// the `Any` it arrived in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusDetail {
    UpdateError(UpdateError),
    /// Anything that did not unpack as a `p4.v1.Error`.
    Other { type_url: String },
}

/// `google.rpc.Status`, as embedded in the binary details of a failed RPC.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Status {
    pub code: i32,
    pub message: String,
    pub details: Vec<StatusDetail>,
}

/// The status of a failed RPC, as reported by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcStatus {
    pub code: Code,
    pub message: String,
    /// The `grpc-status-details-bin` payload, if the device sent one.
    pub details: Option<Status>,
}

impl RpcStatus {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        RpcStatus {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: Code, message: impl Into<String>, details: Status) -> Self {
        RpcStatus {
            code,
            message: message.into(),
            details: Some(details),
        }
    }
}

impl Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcStatus {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_numbers() {
        for code in Code::ALL {
            assert_eq!(Code::from_i32(code as i32), Some(code));
        }
        assert_eq!(Code::from_i32(6), Some(Code::AlreadyExists));
        assert_eq!(Code::from_i32(17), None);
        assert_eq!(Code::from_i32(-1), None);
    }

    #[test]
    fn display() {
        assert_eq!(Code::NotFound.to_string(), "NOT_FOUND");
        assert_eq!(RpcStatus::new(Code::Unavailable, "no route").to_string(),
                   "UNAVAILABLE: no route");
        assert_eq!(RpcStatus::new(Code::Unknown, "").to_string(), "UNKNOWN");
    }
}
