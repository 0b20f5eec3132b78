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

//! The control-plane session with one device.
//!
//! A [`ControlStream`] owns the device's stream channel and the unary RPCs
//! that go with it.  Its lifecycle is
//!
//! ```text
//! Disconnected --open--> Arbitrating --handshake--> Active --close--> Closed
//! ```
//!
//! A failed handshake leaves the stream in `Arbitrating`.  Writes, pipeline
//! changes and packet-outs need `Active`.
//!
//! A background task drains inbound messages into a FIFO queue.  There is a
//! single waiter: [`ControlStream::await_message`] takes `&mut self`, and it
//! discards messages of other kinds that arrive ahead of the one it waits
//! for.

use futures::channel::mpsc as fmpsc;
use futures::StreamExt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use tracing::{debug, info, warn};

use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{P4Error, Result};
use crate::runtime::{
    Entity,
    ForwardingPipelineConfig,
    GetForwardingPipelineConfigRequest,
    MasterArbitrationUpdate,
    PipelineResponseType,
    ReadRequest,
    SetForwardingPipelineConfigRequest,
    SetPipelineAction,
    StreamMessageKind,
    StreamMessageRequest,
    StreamMessageResponse,
    Uint128,
    Update,
    WriteRequest,
};
use crate::status::{Code, RpcStatus};
use crate::transport::P4RuntimeTransport;
use crate::write_error::{decode_write_error, WriteErrors};

/// How long [`ControlStream::handshake`] waits for the device's reply,
/// unless configured otherwise.
pub const ARBITRATION_TIMEOUT: Duration = Duration::from_secs(2);

/// How long [`ControlStream::close`] waits for the receiver task.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Arbitrating,
    Active,
    Closed,
}

impl Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use StreamState::*;
        let s = match self {
            Disconnected => "disconnected",
            Arbitrating => "arbitrating",
            Active => "active",
            Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

pub struct ControlStream {
    device_id: u64,
    role_id: u64,
    transport: Arc<dyn P4RuntimeTransport>,
    state: StreamState,
    election_id: Option<Uint128>,
    arbitration_timeout: Duration,
    outbound: Option<fmpsc::UnboundedSender<StreamMessageRequest>>,
    inbound: Option<mpsc::UnboundedReceiver<StreamMessageResponse>>,
    receiver: Option<JoinHandle<()>>,
}

impl ControlStream {
    pub fn new(device_id: u64, transport: Arc<dyn P4RuntimeTransport>) -> Self {
        ControlStream {
            device_id,
            role_id: 0,
            transport,
            state: StreamState::Disconnected,
            election_id: None,
            arbitration_timeout: ARBITRATION_TIMEOUT,
            outbound: None,
            inbound: None,
            receiver: None,
        }
    }

    pub fn with_role_id(mut self, role_id: u64) -> Self {
        self.role_id = role_id;
        self
    }

    pub fn with_arbitration_timeout(mut self, timeout: Duration) -> Self {
        self.arbitration_timeout = timeout;
        self
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// The election id the device accepted, once the stream is active.
    pub fn election_id(&self) -> Option<Uint128> {
        self.election_id
    }

    pub fn transport(&self) -> &Arc<dyn P4RuntimeTransport> {
        &self.transport
    }

    fn require(&self, state: StreamState) -> Result<()> {
        if self.state != state {
            return Err(P4Error::NotActive { state: self.state });
        }
        Ok(())
    }

    /// Opens the stream channel and starts the receiver task.  Must be
    /// called from within a tokio runtime.
    pub fn open(&mut self) -> Result<()> {
        if self.state != StreamState::Disconnected {
            return Err(P4Error::invalid(format!(
                "device {}: cannot open a stream that is {}",
                self.device_id, self.state
            )));
        }

        let (outbound, requests) = fmpsc::unbounded();
        let mut responses = self
            .transport
            .stream_channel(requests.boxed())
            .map_err(P4Error::Rpc)?;

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let device_id = self.device_id;
        let receiver = tokio::spawn(async move {
            while let Some(item) = responses.next().await {
                match item {
                    Ok(message) => {
                        debug!("device {}: received {} message", device_id, message.kind());
                        if inbound_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(status) => {
                        warn!("device {}: stream channel failed ({})", device_id, status);
                        break;
                    }
                }
            }
            debug!("device {}: stream channel ended", device_id);
        });

        self.outbound = Some(outbound);
        self.inbound = Some(inbound);
        self.receiver = Some(receiver);
        self.state = StreamState::Arbitrating;
        Ok(())
    }

    fn enqueue(&self, message: StreamMessageRequest) -> Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or(P4Error::NotActive { state: self.state })?;
        outbound.unbounded_send(message).map_err(|_| {
            P4Error::Rpc(RpcStatus::new(Code::Unavailable, "stream channel is closed"))
        })
    }

    /// Asks to become the primary controller with `election_id` and waits
    /// for the device's answer.
    ///
    /// A reply without a status, or with status OK, makes the stream
    /// active.  Anything else, including no reply within the arbitration
    /// timeout, fails with `ArbitrationFailed` and leaves the stream
    /// arbitrating.
    pub async fn handshake(&mut self, election_id: u128) -> Result<()> {
        self.require(StreamState::Arbitrating)?;
        let election_id = Uint128::from(election_id);

        self.enqueue(StreamMessageRequest::Arbitration(MasterArbitrationUpdate {
            device_id: self.device_id,
            role_id: self.role_id,
            election_id: Some(election_id),
            status: None,
        }))?;

        let device_id = self.device_id;
        let failed = move |reason: String| P4Error::ArbitrationFailed { device_id, reason };
        let timeout = self.arbitration_timeout;
        let reply = match self.await_message(StreamMessageKind::Arbitration, timeout).await {
            Some(StreamMessageResponse::Arbitration(reply)) => reply,
            _ => {
                return Err(failed(format!(
                    "no arbitration reply within {:?}",
                    timeout
                )))
            }
        };
        if let Some(status) = reply.status.as_ref().filter(|s| s.code != Code::Ok as i32) {
            let code = Code::from_i32(status.code)
                .map_or_else(|| status.code.to_string(), |c| c.to_string());
            return Err(failed(format!("{}: {}", code, status.message)));
        }

        info!("device {}: primary with election id {}", self.device_id, election_id);
        self.election_id = Some(election_id);
        self.state = StreamState::Active;
        Ok(())
    }

    /// Queues `message` for the device without waiting.
    pub fn send(&self, message: StreamMessageRequest) -> Result<()> {
        self.require(StreamState::Active)?;
        self.enqueue(message)
    }

    /// Waits up to `timeout` for an inbound message of kind `kind`.
    /// Messages of other kinds that are ahead of it in the queue are
    /// dropped.  Returns `None` on timeout or when the stream has ended.
    pub async fn await_message(
        &mut self,
        kind: StreamMessageKind,
        timeout: Duration,
    ) -> Option<StreamMessageResponse> {
        let device_id = self.device_id;
        let inbound = self.inbound.as_mut()?;
        let deadline = Instant::now() + timeout;
        loop {
            match time::timeout_at(deadline, inbound.recv()).await {
                Ok(Some(message)) if message.kind() == kind => return Some(message),
                Ok(Some(message)) => debug!(
                    "device {}: dropping {} message while waiting for {}",
                    device_id,
                    message.kind(),
                    kind
                ),
                Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Ends the stream channel and waits (briefly) for the receiver task to
    /// finish.  Closing a closed stream does nothing.
    pub async fn close(&mut self) {
        if self.state == StreamState::Closed {
            return;
        }
        if let Some(outbound) = self.outbound.take() {
            outbound.close_channel();
        }
        if let Some(mut receiver) = self.receiver.take() {
            if time::timeout(CLOSE_TIMEOUT, &mut receiver).await.is_err() {
                warn!(
                    "device {}: stream channel did not end within {:?}",
                    self.device_id, CLOSE_TIMEOUT
                );
                receiver.abort();
            }
        }
        self.inbound = None;
        self.state = StreamState::Closed;
        debug!("device {}: stream closed", self.device_id);
    }

    /// Returns a write request for `updates`, addressed from this session.
    pub fn new_write_request(&self, updates: Vec<Update>) -> WriteRequest {
        WriteRequest {
            device_id: self.device_id,
            role_id: self.role_id,
            election_id: self.election_id,
            updates,
            ..Default::default()
        }
    }

    /// Sends a write batch, tagged with the session's election id.
    ///
    /// If the device rejects some of the updates, the error is
    /// `P4Error::Write` listing them; other RPC failures are
    /// `P4Error::Rpc`.
    pub async fn write(&self, mut request: WriteRequest) -> Result<()> {
        self.require(StreamState::Active)?;
        request.election_id = self.election_id;
        debug!(
            "device {}: writing {} update(s)",
            self.device_id,
            request.updates.len()
        );
        match self.transport.write(request).await {
            Ok(()) => Ok(()),
            Err(status) if status.code == Code::Unknown => {
                let errors = decode_write_error(&status)?;
                if errors.is_empty() {
                    return Err(P4Error::Rpc(status));
                }
                Err(P4Error::Write(WriteErrors(errors)))
            }
            Err(status) => Err(P4Error::Rpc(status)),
        }
    }

    /// Reads `entities`, which may use zero ids and empty fields as
    /// wildcards.
    pub async fn read(&self, entities: Vec<Entity>) -> Result<Vec<Entity>> {
        if self.state == StreamState::Closed {
            return Err(P4Error::NotActive { state: self.state });
        }
        self.transport
            .read(ReadRequest {
                device_id: self.device_id,
                entities,
            })
            .await
            .map_err(P4Error::Rpc)
    }

    pub async fn set_forwarding_pipeline_config(
        &self,
        action: SetPipelineAction,
        config: ForwardingPipelineConfig,
    ) -> Result<()> {
        self.require(StreamState::Active)?;
        info!("device {}: setting forwarding pipeline ({:?})", self.device_id, action);
        self.transport
            .set_forwarding_pipeline_config(SetForwardingPipelineConfigRequest {
                device_id: self.device_id,
                role_id: self.role_id,
                election_id: self.election_id,
                action,
                config,
            })
            .await
            .map_err(P4Error::Rpc)
    }

    pub async fn get_forwarding_pipeline_config(
        &self,
        response_type: PipelineResponseType,
    ) -> Result<ForwardingPipelineConfig> {
        self.transport
            .get_forwarding_pipeline_config(GetForwardingPipelineConfigRequest {
                device_id: self.device_id,
                response_type,
            })
            .await
            .map_err(P4Error::Rpc)
    }
}

impl Drop for ControlStream {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{DigestList, MulticastGroupEntry, PacketIn, PacketOut};
    use crate::sim::{Arbitration, SimDevice};
    use anyhow::Result;
    use tracing_test::traced_test;

    /// Returns an active stream to `device`.
    async fn active_stream(device: &Arc<SimDevice>, election_id: u128) -> Result<ControlStream> {
        let mut stream = ControlStream::new(1, device.clone());
        stream.open()?;
        stream.handshake(election_id).await?;
        Ok(stream)
    }

    #[tokio::test]
    #[traced_test]
    async fn handshake() -> Result<()> {
        let device = Arc::new(SimDevice::new(1));
        let mut stream = ControlStream::new(1, device.clone());
        assert_eq!(stream.state(), StreamState::Disconnected);
        assert!(stream.handshake(1).await.is_err());

        stream.open()?;
        assert_eq!(stream.state(), StreamState::Arbitrating);
        stream.handshake(1).await?;
        assert_eq!(stream.state(), StreamState::Active);
        assert_eq!(stream.election_id(), Some(Uint128 { high: 0, low: 1 }));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn rejected_handshake() -> Result<()> {
        let device = Arc::new(SimDevice::new(1));
        device.set_arbitration(Arbitration::Reject(Code::PermissionDenied));
        let mut stream = ControlStream::new(1, device.clone());
        stream.open()?;
        let err = stream.handshake(1).await.unwrap_err();
        assert!(matches!(err, P4Error::ArbitrationFailed { device_id: 1, .. }), "{}", err);
        assert!(err.to_string().contains("PERMISSION_DENIED"), "{}", err);
        assert_eq!(stream.state(), StreamState::Arbitrating);

        let request = stream.new_write_request(vec![]);
        assert!(matches!(
            stream.write(request).await,
            Err(P4Error::NotActive { state: StreamState::Arbitrating })
        ));
        assert!(matches!(
            stream.send(StreamMessageRequest::Packet(PacketOut::default())),
            Err(P4Error::NotActive { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn silent_device() -> Result<()> {
        let device = Arc::new(SimDevice::new(1));
        device.set_arbitration(Arbitration::Silent);
        let mut stream = ControlStream::new(1, device.clone())
            .with_arbitration_timeout(Duration::from_millis(100));
        stream.open()?;
        let start = Instant::now();
        assert!(matches!(
            stream.handshake(1).await,
            Err(P4Error::ArbitrationFailed { .. })
        ));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(stream.state(), StreamState::Arbitrating);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn await_message_drops_other_kinds() -> Result<()> {
        let device = Arc::new(SimDevice::new(1));
        let mut stream = active_stream(&device, 1).await?;

        device.inject(StreamMessageResponse::Digest(DigestList::default()));
        let start = Instant::now();
        let message = stream
            .await_message(StreamMessageKind::Packet, Duration::from_secs(1))
            .await;
        let elapsed = start.elapsed();
        assert!(message.is_none());
        assert!(elapsed >= Duration::from_millis(950), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(3), "{:?}", elapsed);

        // The digest was dropped; a packet-in behind it is still delivered.
        device.inject(StreamMessageResponse::Digest(DigestList::default()));
        device.inject_packet_in(PacketIn {
            payload: vec![1, 2, 3],
            metadata: vec![],
        });
        match stream
            .await_message(StreamMessageKind::Packet, Duration::from_secs(1))
            .await
        {
            Some(StreamMessageResponse::Packet(p)) => assert_eq!(p.payload, vec![1, 2, 3]),
            other => panic!("expected a packet-in, got {:?}", other),
        }
        assert!(stream
            .await_message(StreamMessageKind::Digest, Duration::from_millis(10))
            .await
            .is_none());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn packet_out_order() -> Result<()> {
        let device = Arc::new(SimDevice::new(1));
        let mut stream = active_stream(&device, 1).await?;
        for i in 0..3u8 {
            stream.send(StreamMessageRequest::Packet(PacketOut {
                payload: vec![i],
                metadata: vec![],
            }))?;
        }
        // Closing drains the outbound queue before the channel ends.
        stream.close().await;
        let payloads: Vec<Vec<u8>> = device.packets_out().into_iter().map(|p| p.payload).collect();
        assert_eq!(payloads, vec![vec![0], vec![1], vec![2]]);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn close_is_idempotent() -> Result<()> {
        let device = Arc::new(SimDevice::new(1));
        let mut stream = active_stream(&device, 1).await?;
        stream.close().await;
        assert_eq!(stream.state(), StreamState::Closed);
        stream.close().await;
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(stream
            .await_message(StreamMessageKind::Packet, Duration::from_millis(10))
            .await
            .is_none());
        assert!(stream.read(vec![]).await.is_err());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn write_errors() -> Result<()> {
        let device = Arc::new(SimDevice::new(1));
        let stream = active_stream(&device, 1).await?;

        let group = MulticastGroupEntry::with_ports(1, vec![1, 2]);
        stream
            .write(stream.new_write_request(vec![Update::insert(group.clone())]))
            .await?;
        let request = stream.new_write_request(vec![
            Update::modify(group.clone()),
            Update::insert(group.clone()),
            Update::delete(MulticastGroupEntry::with_ports(2, vec![])),
        ]);
        match stream.write(request).await {
            Err(P4Error::Write(errors)) => {
                let codes: Vec<(usize, Code)> = errors.iter().map(|e| (e.index, e.code)).collect();
                assert_eq!(codes, vec![(1, Code::AlreadyExists), (2, Code::NotFound)]);
            }
            other => panic!("expected write errors, got {:?}", other),
        }

        // A second controller takes over; the first one's writes are refused
        // as a whole.
        let _other = active_stream(&device, 2).await?;
        match stream.write(stream.new_write_request(vec![Update::delete(group)])).await {
            Err(P4Error::Rpc(status)) => assert_eq!(status.code, Code::PermissionDenied),
            other => panic!("expected an RPC failure, got {:?}", other),
        }
        Ok(())
    }
}
