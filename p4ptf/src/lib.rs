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

//! A control-plane test harness for P4Runtime devices.
//!
//! Tests describe forwarding state by name, using the device's P4Info
//! ([`Schema`]), install it over an arbitrated [`ControlStream`], exchange
//! packet-ins and packet-outs on the same stream, and undo everything they
//! installed when they finish ([`TransactionLog`], [`P4RuntimeTest`]).
//!
//! The device connection is a [`P4RuntimeTransport`]: [`grpc::GrpcTransport`]
//! talks to a switch, and [`sim::SimDevice`] is an in-memory device for
//! testing the harness and tests without one.

pub mod config;
pub mod dataplane;
pub mod error;
pub mod grpc;
pub mod harness;
pub mod runtime;
pub mod schema;
pub mod sim;
pub mod status;
pub mod stream;
pub mod transport;
pub mod txlog;
pub mod wire;
pub mod write_error;

pub use config::TestConfig;
pub use dataplane::{DataPlane, LoopbackDataPlane};
pub use error::{P4Error, Result};
pub use harness::{P4RuntimeTest, DEFAULT_PRIORITY};
pub use schema::{EntityKind, MatchValue, Schema};
pub use stream::{ControlStream, StreamState};
pub use transport::P4RuntimeTransport;
pub use txlog::TransactionLog;
pub use wire::Value;
pub use write_error::{decode_write_error, DecodedError, WriteErrors};

use tracing_subscriber::EnvFilter;

/// Logs to stderr, filtered by `RUST_LOG` (default `info`).  Does nothing if
/// a subscriber is already installed.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
