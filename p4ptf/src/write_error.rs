/*
Copyright (c) 2022 VMware, Inc.
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

//! Decoding of batched write errors.
//!
//! When some updates in a write batch fail, the device fails the whole RPC
//! with code `UNKNOWN` and packs one `p4.v1.Error` per update, in batch
//! order, into the details of the `google.rpc.Status` it attaches to the
//! failure.  Updates that succeeded are reported with code `OK`.

use std::fmt::{self, Display};

use crate::error::{P4Error, Result};
use crate::status::{Code, RpcStatus, StatusDetail};

/// The failure of one update in a write batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedError {
    /// Position of the failed update within its batch.
    pub index: usize,
    pub code: Code,
    pub message: String,
    /// Target-specific error space and code; empty and 0 when unused.
    pub space: String,
    pub error_code: i32,
}

/// The failed updates of one write batch, ordered by batch position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteErrors(pub Vec<DecodedError>);

impl WriteErrors {
    pub fn iter(&self) -> std::slice::Iter<'_, DecodedError> {
        self.0.iter()
    }

    /// The error for the update at `index`, if that update failed.
    pub fn at(&self, index: usize) -> Option<&DecodedError> {
        self.0.iter().find(|e| e.index == index)
    }
}

impl Display for WriteErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error(s) during Write:")?;
        for e in &self.0 {
            writeln!(f, "\t* At index {}: {}, '{}'", e.index, e.code, e.message)?;
        }
        Ok(())
    }
}

/// Extracts the per-update errors from a failed write.
///
/// Fails with `MalformedError` unless every detail in the status is a
/// `p4.v1.Error` with a known canonical code.
pub fn decode_write_error(status: &RpcStatus) -> Result<Vec<DecodedError>> {
    let details = match &status.details {
        Some(details) => details,
        None => {
            return Err(P4Error::MalformedError(format!(
                "{}: status has no binary details",
                status
            )))
        }
    };
    if details.details.is_empty() {
        return Err(P4Error::MalformedError(format!(
            "{}: binary details have no entries",
            status
        )));
    }

    let mut errors = Vec::new();
    for (index, detail) in details.details.iter().enumerate() {
        let e = match detail {
            StatusDetail::UpdateError(e) => e,
            StatusDetail::Other { type_url } => {
                return Err(P4Error::MalformedError(format!(
                    "detail {} is a {}, not a p4.v1.Error",
                    index, type_url
                )))
            }
        };
        let code = Code::from_i32(e.canonical_code).ok_or_else(|| {
            P4Error::MalformedError(format!(
                "detail {} has unknown canonical code {}",
                index, e.canonical_code
            ))
        })?;
        if code == Code::Ok {
            continue;
        }
        errors.push(DecodedError {
            index,
            code,
            message: e.message.clone(),
            space: e.space.clone(),
            error_code: e.code,
        });
    }
    Ok(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{Status, UpdateError};

    fn failed_write(details: Vec<StatusDetail>) -> RpcStatus {
        RpcStatus::with_details(
            Code::Unknown,
            "write failed",
            Status {
                code: Code::Unknown as i32,
                message: "write failed".into(),
                details,
            },
        )
    }

    #[test]
    fn skips_ok_entries() {
        let status = failed_write(vec![
            StatusDetail::UpdateError(UpdateError::ok()),
            StatusDetail::UpdateError(UpdateError::new(Code::NotFound, "no such table")),
            StatusDetail::UpdateError(UpdateError::ok()),
            StatusDetail::UpdateError(UpdateError::new(Code::AlreadyExists, "dup")),
        ]);
        let errors = decode_write_error(&status).unwrap();
        let summary: Vec<(usize, Code, &str)> = errors
            .iter()
            .map(|e| (e.index, e.code, e.message.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![(1, Code::NotFound, "no such table"), (3, Code::AlreadyExists, "dup")]
        );

        let errors = WriteErrors(errors);
        assert_eq!(errors.at(3).map(|e| e.code), Some(Code::AlreadyExists));
        assert!(errors.at(0).is_none());
        assert_eq!(
            errors.to_string(),
            "Error(s) during Write:\n\
             \t* At index 1: NOT_FOUND, 'no such table'\n\
             \t* At index 3: ALREADY_EXISTS, 'dup'\n"
        );
    }

    #[test]
    fn target_specific_codes() {
        let mut e = UpdateError::new(Code::ResourceExhausted, "table full");
        e.space = "bmv2".into();
        e.code = 7;
        let errors = decode_write_error(&failed_write(vec![StatusDetail::UpdateError(e)])).unwrap();
        assert_eq!((errors[0].space.as_str(), errors[0].error_code), ("bmv2", 7));
    }

    #[test]
    fn malformed() {
        let is_malformed = |status: &RpcStatus| {
            matches!(decode_write_error(status), Err(P4Error::MalformedError(_)))
        };
        assert!(is_malformed(&RpcStatus::new(Code::Unknown, "no details")));
        assert!(is_malformed(&failed_write(vec![])));
        assert!(is_malformed(&failed_write(vec![
            StatusDetail::UpdateError(UpdateError::ok()),
            StatusDetail::Other {
                type_url: "type.googleapis.com/google.rpc.DebugInfo".into()
            },
        ])));
        let mut bogus = UpdateError::ok();
        bogus.canonical_code = 42;
        assert!(is_malformed(&failed_write(vec![StatusDetail::UpdateError(bogus)])));
    }
}
