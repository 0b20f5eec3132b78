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

//! The connection to a P4Runtime device.

use async_trait::async_trait;

use futures::stream::BoxStream;

use crate::runtime::{
    Entity,
    ForwardingPipelineConfig,
    GetForwardingPipelineConfigRequest,
    ReadRequest,
    SetForwardingPipelineConfigRequest,
    StreamMessageRequest,
    StreamMessageResponse,
    WriteRequest,
};
use crate::status::RpcStatus;

/// Inbound half of a stream channel.  It ends when the device closes the
/// stream; an `Err` item reports a broken stream and is the last item.
pub type ResponseStream = BoxStream<'static, Result<StreamMessageResponse, RpcStatus>>;

/// Outbound half of a stream channel.  The transport forwards requests in
/// order and half-closes the channel when this stream ends.
pub type RequestStream = BoxStream<'static, StreamMessageRequest>;

/// The P4Runtime service, as seen by a client.
///
/// Implementations are the gRPC client in [`crate::grpc`] and the in-memory
/// device in [`crate::sim`].
#[async_trait]
pub trait P4RuntimeTransport: Send + Sync {
    /// Opens the bidirectional stream channel.
    fn stream_channel(&self, requests: RequestStream) -> Result<ResponseStream, RpcStatus>;

    async fn write(&self, request: WriteRequest) -> Result<(), RpcStatus>;

    async fn read(&self, request: ReadRequest) -> Result<Vec<Entity>, RpcStatus>;

    async fn set_forwarding_pipeline_config(
        &self,
        request: SetForwardingPipelineConfigRequest,
    ) -> Result<(), RpcStatus>;

    async fn get_forwarding_pipeline_config(
        &self,
        request: GetForwardingPipelineConfigRequest,
    ) -> Result<ForwardingPipelineConfig, RpcStatus>;
}
