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

//! Data-plane packet I/O.
//!
//! Tests inject packets into switch ports and capture what the switch emits
//! through a [`DataPlane`].  Crafting and dissecting packets is up to the
//! caller; packets here are plain byte strings.

use async_trait::async_trait;

use tokio::sync::Notify;
use tokio::time::{self, Instant};

use tracing::debug;

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::Result;

#[async_trait]
pub trait DataPlane: Send + Sync {
    /// Sends `packet` into the switch on `port`.
    async fn send_packet(&self, port: u32, packet: &[u8]) -> Result<()>;

    /// Waits up to `timeout` for a packet on `port`.  Returns `None` if
    /// nothing arrived in time.
    async fn capture_packet(&self, port: u32, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

/// A data plane with a wire looped back on every port: a packet sent on a
/// port is captured on the same port.
#[derive(Default)]
pub struct LoopbackDataPlane {
    queues: Mutex<HashMap<u32, VecDeque<Vec<u8>>>>,
    arrived: Notify,
}

impl LoopbackDataPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<u32, VecDeque<Vec<u8>>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop(&self, port: u32) -> Option<Vec<u8>> {
        self.queues().get_mut(&port).and_then(VecDeque::pop_front)
    }

    /// Number of packets waiting to be captured on `port`.
    pub fn pending(&self, port: u32) -> usize {
        self.queues().get(&port).map_or(0, VecDeque::len)
    }

    /// Discards every queued packet.
    pub fn flush(&self) {
        self.queues().clear();
    }
}

#[async_trait]
impl DataPlane for LoopbackDataPlane {
    async fn send_packet(&self, port: u32, packet: &[u8]) -> Result<()> {
        debug!("port {}: sending {} bytes", port, packet.len());
        self.queues().entry(port).or_default().push_back(packet.to_vec());
        self.arrived.notify_waiters();
        Ok(())
    }

    async fn capture_packet(&self, port: u32, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register for wakeups before looking, so a packet that arrives
            // in between is not missed.
            let arrived = self.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            if let Some(packet) = self.pop(port) {
                return Ok(Some(packet));
            }
            if time::timeout_at(deadline, arrived).await.is_err() {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn loopback() -> anyhow::Result<()> {
        let dataplane = LoopbackDataPlane::new();
        dataplane.send_packet(1, b"one").await?;
        dataplane.send_packet(1, b"two").await?;
        dataplane.send_packet(2, b"three").await?;
        assert_eq!(dataplane.pending(1), 2);

        let timeout = Duration::from_millis(100);
        assert_eq!(dataplane.capture_packet(1, timeout).await?, Some(b"one".to_vec()));
        assert_eq!(dataplane.capture_packet(1, timeout).await?, Some(b"two".to_vec()));
        assert_eq!(dataplane.capture_packet(1, timeout).await?, None);

        dataplane.flush();
        assert_eq!(dataplane.capture_packet(2, timeout).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn capture_waits_for_arrival() -> anyhow::Result<()> {
        let dataplane = Arc::new(LoopbackDataPlane::new());
        let sender = dataplane.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            sender.send_packet(3, &[0xaa]).await
        });
        let packet = dataplane.capture_packet(3, Duration::from_secs(2)).await?;
        assert_eq!(packet, Some(vec![0xaa]));
        Ok(())
    }
}
