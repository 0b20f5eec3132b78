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

//! Per-test control-plane fixture.
//!
//! [`P4RuntimeTest`] bundles what a test case needs: an active
//! [`ControlStream`] to the device, the device's [`Schema`], a
//! [`DataPlane`] and a [`TransactionLog`] of the writes made so far.
//!
//! ```ignore
//! let mut test = P4RuntimeTest::set_up(config, transport, dataplane).await?;
//! test.autocleanup(|t| async move {
//!     let entry = t.schema()?.build_table_entry(...)?;
//!     t.insert(entry).await?;
//!     t.send_packet(t.swport(0)?, &pkt).await?;
//!     t.verify_packet(&pkt, t.swport(1)?).await?;
//!     Ok::<(), anyhow::Error>(())
//! }.boxed()).await?;
//! test.tear_down().await;
//! ```

use anyhow::{anyhow, bail, Context};

use futures::future::BoxFuture;
use futures::FutureExt;

use itertools::Itertools;

use tracing::{debug, error, info};

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::config::TestConfig;
use crate::dataplane::DataPlane;
use crate::runtime::{
    CloneSessionEntry,
    Entity,
    ForwardingPipelineConfig,
    MulticastGroupEntry,
    PacketIn,
    PacketMetadata,
    PacketOut,
    SetPipelineAction,
    StreamMessageKind,
    StreamMessageRequest,
    StreamMessageResponse,
    Update,
    WriteRequest,
};
use crate::schema::Schema;
use crate::stream::ControlStream;
use crate::transport::P4RuntimeTransport;
use crate::txlog::TransactionLog;

/// Priority for entries of tables that need one, when the test does not
/// care.
pub const DEFAULT_PRIORITY: i32 = 10;

/// How long [`P4RuntimeTest::verify_no_packet`] listens.
pub const NO_PACKET_TIMEOUT: Duration = Duration::from_millis(100);

pub struct P4RuntimeTest {
    config: TestConfig,
    schema: Option<Arc<Schema>>,
    stream: ControlStream,
    dataplane: Arc<dyn DataPlane>,
    log: TransactionLog,
}

fn metadata_map(metadata: &[PacketMetadata]) -> BTreeMap<u32, &[u8]> {
    metadata
        .iter()
        .map(|m| (m.metadata_id, m.value.as_slice()))
        .collect()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).join("")
}

impl P4RuntimeTest {
    /// Connects to the device described by `config`: loads the P4Info named
    /// there (if any), opens the stream channel, becomes primary and, if a
    /// pipeline action is configured, pushes the pipeline.
    pub async fn set_up(
        config: TestConfig,
        transport: Arc<dyn P4RuntimeTransport>,
        dataplane: Arc<dyn DataPlane>,
    ) -> anyhow::Result<Self> {
        let schema = match &config.p4info {
            Some(path) => Some(
                Schema::load(path).with_context(|| format!("loading {}", path.display()))?,
            ),
            None => None,
        };
        let test = Self::with_schema(config, schema, transport, dataplane).await?;
        if let Some(action) = test.config.pipeline_action()? {
            test.push_configured_pipeline(action).await?;
        }
        Ok(test)
    }

    /// Like [`P4RuntimeTest::set_up`], with an already loaded schema and
    /// without pushing a pipeline.
    pub async fn with_schema(
        config: TestConfig,
        schema: Option<Schema>,
        transport: Arc<dyn P4RuntimeTransport>,
        dataplane: Arc<dyn DataPlane>,
    ) -> anyhow::Result<Self> {
        let mut stream = ControlStream::new(config.device_id, transport)
            .with_role_id(config.role_id)
            .with_arbitration_timeout(config.arbitration_timeout());
        stream.open()?;
        stream
            .handshake(u128::from(config.election_id))
            .await
            .context("failed to establish handshake")?;
        info!(
            "device {}: connected to {} as primary",
            config.device_id, config.grpc_addr
        );
        Ok(P4RuntimeTest {
            config,
            schema: schema.map(Arc::new),
            stream,
            dataplane,
            log: TransactionLog::new(),
        })
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    pub fn schema(&self) -> anyhow::Result<&Arc<Schema>> {
        self.schema.as_ref().ok_or_else(|| anyhow!("no P4Info is configured"))
    }

    pub fn stream(&self) -> &ControlStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut ControlStream {
        &mut self.stream
    }

    pub fn dataplane(&self) -> &Arc<dyn DataPlane> {
        &self.dataplane
    }

    /// The writes recorded for cleanup.
    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    pub fn cpu_port(&self) -> u32 {
        self.config.cpu_port
    }

    /// The data-plane port at position `index` of the configured port list.
    pub fn swport(&self, index: usize) -> anyhow::Result<u32> {
        self.config
            .ports
            .get(index)
            .copied()
            .ok_or_else(|| anyhow!("index {} is out of bounds of the port map", index))
    }

    async fn push_configured_pipeline(&self, action: SetPipelineAction) -> anyhow::Result<()> {
        let p4info = match &self.config.p4info {
            Some(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?,
            None => bail!("a pipeline action is configured but no P4Info"),
        };
        let device_config = match &self.config.device_config {
            Some(path) => tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?,
            None => Vec::new(),
        };
        self.push_pipeline(action, p4info, device_config).await
    }

    /// Sets the device's forwarding pipeline, with the configured cookie.
    pub async fn push_pipeline(
        &self,
        action: SetPipelineAction,
        p4info: String,
        p4_device_config: Vec<u8>,
    ) -> anyhow::Result<()> {
        self.stream
            .set_forwarding_pipeline_config(
                action,
                ForwardingPipelineConfig {
                    p4info,
                    p4_device_config,
                    cookie: self.config.cookie,
                },
            )
            .await
            .context("failed to set the forwarding pipeline")?;
        Ok(())
    }

    /// A write request with no updates, addressed from this test.
    pub fn new_write_request(&self) -> WriteRequest {
        self.stream.new_write_request(Vec::new())
    }

    /// Sends `request`; if it succeeds and `store` is set, records it for
    /// [`P4RuntimeTest::undo_write_requests`].
    pub async fn write_request(&mut self, request: WriteRequest, store: bool) -> crate::Result<()> {
        self.stream.write(request.clone()).await?;
        if store {
            self.log.record(request);
        }
        Ok(())
    }

    async fn write_updates(&mut self, updates: Vec<Update>) -> crate::Result<WriteRequest> {
        let request = self.stream.new_write_request(updates);
        self.write_request(request.clone(), true).await?;
        Ok(request)
    }

    pub async fn insert(&mut self, entity: impl Into<Entity>) -> crate::Result<()> {
        self.write_updates(vec![Update::insert(entity)]).await.map(|_| ())
    }

    /// Inserts each entity with its own write request, in order.
    pub async fn insert_all<I>(&mut self, entities: I) -> crate::Result<()>
    where
        I: IntoIterator<Item = Entity>,
    {
        for entity in entities {
            self.insert(entity).await?;
        }
        Ok(())
    }

    pub async fn modify(&mut self, entity: impl Into<Entity>) -> crate::Result<()> {
        self.write_updates(vec![Update::modify(entity)]).await.map(|_| ())
    }

    pub async fn delete(&mut self, entity: impl Into<Entity>) -> crate::Result<()> {
        self.write_updates(vec![Update::delete(entity)]).await.map(|_| ())
    }

    /// Inserts a multicast group replicating to `ports`.
    pub async fn insert_multicast_group(
        &mut self,
        group_id: u32,
        ports: &[u32],
    ) -> crate::Result<WriteRequest> {
        let entry = MulticastGroupEntry::with_ports(group_id, ports.iter().copied());
        self.write_updates(vec![Update::insert(entry)]).await
    }

    /// Inserts a clone session to `ports`.
    pub async fn insert_clone_session(
        &mut self,
        session_id: u32,
        ports: &[u32],
        class_of_service: u32,
        packet_length_bytes: i32,
    ) -> crate::Result<WriteRequest> {
        let entry = CloneSessionEntry::with_ports(
            session_id,
            ports.iter().copied(),
            class_of_service,
            packet_length_bytes,
        );
        self.write_updates(vec![Update::insert(entry)]).await
    }

    pub async fn read(&self, entities: Vec<Entity>) -> crate::Result<Vec<Entity>> {
        self.stream.read(entities).await
    }

    /// Deletes everything this test inserted, newest first.
    pub async fn undo_write_requests(&mut self) -> crate::Result<()> {
        self.log.undo_all(&self.stream).await
    }

    /// Runs `body`, then undoes its writes however it ends: by returning,
    /// failing or panicking.  A panic is resumed after the cleanup.  A
    /// failed cleanup is logged and does not replace the body's result.
    pub async fn autocleanup<T, F>(&mut self, body: F) -> anyhow::Result<T>
    where
        F: for<'a> FnOnce(&'a mut Self) -> BoxFuture<'a, anyhow::Result<T>>,
    {
        let outcome = AssertUnwindSafe(body(self)).catch_unwind().await;
        if let Err(e) = self.undo_write_requests().await {
            error!("device {}: cleanup failed: {}", self.config.device_id, e);
        }
        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    pub fn send_packet_out(&self, packet: PacketOut) -> crate::Result<()> {
        debug!("sending packet-out of {} bytes", packet.payload.len());
        self.stream.send(StreamMessageRequest::Packet(packet))
    }

    /// Waits for the next packet-in, up to `timeout` or the configured
    /// packet timeout.
    pub async fn get_packet_in(&mut self, timeout: Option<Duration>) -> anyhow::Result<PacketIn> {
        let timeout = timeout.unwrap_or_else(|| self.config.packet_timeout());
        match self.stream.await_message(StreamMessageKind::Packet, timeout).await {
            Some(StreamMessageResponse::Packet(packet)) => Ok(packet),
            _ => bail!("PacketIn message not received within {:?}", timeout),
        }
    }

    /// Waits for a packet-in and checks that it equals `expected`: the same
    /// payload, and the same metadata regardless of order.
    pub async fn verify_packet_in(
        &mut self,
        expected: &PacketIn,
        timeout: Option<Duration>,
    ) -> anyhow::Result<PacketIn> {
        let received = self.get_packet_in(timeout).await?;
        if received.payload != expected.payload {
            bail!(
                "received PacketIn payload is not the expected one\n  expected: {}\n  received: {}",
                hex(&expected.payload),
                hex(&received.payload)
            );
        }
        if metadata_map(&received.metadata) != metadata_map(&expected.metadata) {
            let show = |m: &[PacketMetadata]| {
                m.iter()
                    .map(|m| format!("{}={}", m.metadata_id, hex(&m.value)))
                    .join(", ")
            };
            bail!(
                concat!(
                    "received PacketIn metadata is not the expected one\n",
                    "  expected: {}\n",
                    "  received: {}"
                ),
                show(&expected.metadata),
                show(&received.metadata)
            );
        }
        Ok(received)
    }

    pub async fn send_packet(&self, port: u32, packet: &[u8]) -> anyhow::Result<()> {
        Ok(self.dataplane.send_packet(port, packet).await?)
    }

    /// Checks that `expected` arrives on `port` within the packet timeout.
    pub async fn verify_packet(&self, expected: &[u8], port: u32) -> anyhow::Result<()> {
        match self
            .dataplane
            .capture_packet(port, self.config.packet_timeout())
            .await?
        {
            Some(packet) if packet == expected => Ok(()),
            Some(packet) => bail!(
                "port {}: received packet is not the expected one\n  expected: {}\n  received: {}",
                port,
                hex(expected),
                hex(&packet)
            ),
            None => bail!("port {}: expected packet not received", port),
        }
    }

    /// Checks that nothing arrives on `port`.
    pub async fn verify_no_packet(&self, port: u32) -> anyhow::Result<()> {
        if let Some(packet) = self.dataplane.capture_packet(port, NO_PACKET_TIMEOUT).await? {
            bail!("port {}: unexpected packet {}", port, hex(&packet));
        }
        Ok(())
    }

    /// Checks that nothing arrives on any configured port.
    pub async fn verify_no_other_packets(&self) -> anyhow::Result<()> {
        for port in &self.config.ports {
            self.verify_no_packet(*port).await?;
        }
        Ok(())
    }

    /// Closes the stream channel.
    pub async fn tear_down(mut self) {
        self.stream.close().await;
    }
}
