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

//! Undo log for the writes a test makes.

use tracing::debug;

use crate::error::Result;
use crate::runtime::{Update, UpdateType, WriteRequest};
use crate::stream::ControlStream;

/// The write batches a test has sent successfully, oldest first.
#[derive(Clone, Debug, Default)]
pub struct TransactionLog {
    requests: Vec<WriteRequest>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `request`.  Call this only after the device accepted it.
    pub fn record(&mut self, request: WriteRequest) {
        self.requests.push(request);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn batches(&self) -> &[WriteRequest] {
        &self.requests
    }

    /// The updates that undo the recorded inserts, newest first: every
    /// INSERT becomes a DELETE of the same entity.  Modifications and
    /// deletions are not reverted.
    pub fn inverse_updates(&self) -> Vec<Update> {
        self.requests
            .iter()
            .rev()
            .flat_map(|request| request.updates.iter().rev())
            .filter(|update| update.update_type == UpdateType::Insert)
            .map(|update| Update {
                update_type: UpdateType::Delete,
                entity: update.entity.clone(),
            })
            .collect()
    }

    /// Deletes everything the recorded batches inserted, in one batch sent
    /// through `stream`.  The log is empty afterwards even if the write
    /// fails.
    pub async fn undo_all(&mut self, stream: &ControlStream) -> Result<()> {
        let updates = self.inverse_updates();
        self.requests.clear();
        if updates.is_empty() {
            return Ok(());
        }
        debug!(
            "device {}: undoing {} insert(s)",
            stream.device_id(),
            updates.len()
        );
        stream.write(stream.new_write_request(updates)).await
    }
}
