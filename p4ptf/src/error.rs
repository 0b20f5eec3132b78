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

use crate::schema::EntityKind;
use crate::status::RpcStatus;
use crate::stream::StreamState;
use crate::write_error::WriteErrors;

use thiserror::Error;

/// Errors reported by the harness.
///
/// Validation errors (`NotFound`, `ValueOverflow`, `InvalidArgument`,
/// `UnsupportedMatchKind`) indicate a bug in the calling test.  `Write` is
/// the normal way for a device to reject part of a batch and carries the
/// per-update outcome as data.
#[derive(Debug, Error)]
pub enum P4Error {
    #[error("malformed P4Info: {0}")]
    SchemaParse(String),

    #[error("no {kind} named {name:?}{} (check your P4Info)", in_scope(.scope))]
    NotFound {
        kind: EntityKind,
        name: String,
        scope: Option<String>,
    },

    #[error("value {value} does not fit in {bit_width} bits")]
    ValueOverflow { value: String, bit_width: u32 },

    #[error("{field}: unsupported match kind {kind}")]
    UnsupportedMatchKind { field: String, kind: String },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("device {device_id}: arbitration failed ({reason})")]
    ArbitrationFailed { device_id: u64, reason: String },

    #[error("stream is {state}, not active")]
    NotActive { state: StreamState },

    #[error("malformed write error: {0}")]
    MalformedError(String),

    #[error("{0}")]
    Write(WriteErrors),

    #[error("RPC failed ({0})")]
    Rpc(RpcStatus),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl P4Error {
    pub(crate) fn not_found(kind: EntityKind, name: impl Into<String>) -> Self {
        P4Error::NotFound {
            kind,
            name: name.into(),
            scope: None,
        }
    }

    pub(crate) fn not_found_in(kind: EntityKind, name: impl Into<String>, scope: &str) -> Self {
        P4Error::NotFound {
            kind,
            name: name.into(),
            scope: Some(scope.into()),
        }
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        P4Error::SchemaParse(message.into())
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        P4Error::InvalidArgument(message.into())
    }
}

fn in_scope(scope: &Option<String>) -> String {
    match scope {
        Some(scope) => format!(" in {}", scope),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, P4Error>;
