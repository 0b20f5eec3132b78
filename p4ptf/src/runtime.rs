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

//! P4Runtime messages as plain Rust values.
//!
//! These mirror the `p4.v1` protobuf messages that the harness sends and
//! receives.  Everything except the gRPC adapter works with these types, so
//! tests can build, compare and print entities without a protobuf runtime.
//! All byte strings are already in wire form (see [`crate::wire`]).

use std::fmt::{self, Display};
use std::str::FromStr;

use crate::error::{P4Error, Result};
use crate::status::Status;

/// Election ids and other 128-bit quantities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uint128 {
    pub high: u64,
    pub low: u64,
}

impl From<u128> for Uint128 {
    fn from(x: u128) -> Self {
        Uint128 {
            high: (x >> 64) as u64,
            low: x as u64,
        }
    }
}

impl From<Uint128> for u128 {
    fn from(x: Uint128) -> Self {
        ((x.high as u128) << 64) | x.low as u128
    }
}

impl FromStr for Uint128 {
    type Err = <u128 as FromStr>::Err;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(s.parse::<u128>()?.into())
    }
}

impl Display for Uint128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u128::from(*self))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldMatchKind {
    Exact { value: Vec<u8> },
    Lpm { value: Vec<u8>, prefix_len: i32 },
    Ternary { value: Vec<u8>, mask: Vec<u8> },
    Range { low: Vec<u8>, high: Vec<u8> },
    Optional { value: Vec<u8> },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldMatch {
    pub field_id: u32,
    pub kind: FieldMatchKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActionParam {
    pub param_id: u32,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Action {
    pub action_id: u32,
    pub params: Vec<ActionParam>,
}

/// What a table entry does on a hit: run an action directly, or go through
/// an action profile member or group.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TableAction {
    Action(Action),
    MemberId(u32),
    GroupId(u32),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TableEntry {
    pub table_id: u32,
    /// Predicates in the table's declared field order.
    pub matches: Vec<FieldMatch>,
    /// `None` only for a default entry that resets the table's default
    /// action.
    pub action: Option<TableAction>,
    pub priority: i32,
    pub is_default_action: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActionProfileMember {
    pub action_profile_id: u32,
    pub member_id: u32,
    pub action: Action,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupMember {
    pub member_id: u32,
    pub weight: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActionProfileGroup {
    pub action_profile_id: u32,
    pub group_id: u32,
    pub members: Vec<GroupMember>,
    pub max_size: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Replica {
    pub egress_port: u32,
    pub instance: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MulticastGroupEntry {
    pub multicast_group_id: u32,
    pub replicas: Vec<Replica>,
}

impl MulticastGroupEntry {
    /// A multicast group that replicates to each of `ports` once, with
    /// replica instance 0.
    pub fn with_ports<I: IntoIterator<Item = u32>>(multicast_group_id: u32, ports: I) -> Self {
        MulticastGroupEntry {
            multicast_group_id,
            replicas: ports
                .into_iter()
                .map(|egress_port| Replica {
                    egress_port,
                    instance: 0,
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CloneSessionEntry {
    pub session_id: u32,
    pub replicas: Vec<Replica>,
    pub class_of_service: u32,
    /// Truncation length; 0 clones the whole packet.
    pub packet_length_bytes: i32,
}

impl CloneSessionEntry {
    /// A clone session to each of `ports`, with replica instance 1.
    pub fn with_ports<I: IntoIterator<Item = u32>>(
        session_id: u32,
        ports: I,
        class_of_service: u32,
        packet_length_bytes: i32,
    ) -> Self {
        CloneSessionEntry {
            session_id,
            replicas: ports
                .into_iter()
                .map(|egress_port| Replica {
                    egress_port,
                    instance: 1,
                })
                .collect(),
            class_of_service,
            packet_length_bytes,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Entity {
    TableEntry(TableEntry),
    ActionProfileMember(ActionProfileMember),
    ActionProfileGroup(ActionProfileGroup),
    MulticastGroupEntry(MulticastGroupEntry),
    CloneSessionEntry(CloneSessionEntry),
}

impl Entity {
    /// A short description for log messages, e.g. `table entry (table 7)`.
    pub fn summary(&self) -> String {
        match self {
            Entity::TableEntry(e) => format!("table entry (table {})", e.table_id),
            Entity::ActionProfileMember(m) => format!(
                "action profile member {} (profile {})",
                m.member_id, m.action_profile_id
            ),
            Entity::ActionProfileGroup(g) => format!(
                "action profile group {} (profile {})",
                g.group_id, g.action_profile_id
            ),
            Entity::MulticastGroupEntry(m) => format!("multicast group {}", m.multicast_group_id),
            Entity::CloneSessionEntry(c) => format!("clone session {}", c.session_id),
        }
    }
}

impl From<TableEntry> for Entity {
    fn from(e: TableEntry) -> Self {
        Entity::TableEntry(e)
    }
}

impl From<ActionProfileMember> for Entity {
    fn from(m: ActionProfileMember) -> Self {
        Entity::ActionProfileMember(m)
    }
}

impl From<ActionProfileGroup> for Entity {
    fn from(g: ActionProfileGroup) -> Self {
        Entity::ActionProfileGroup(g)
    }
}

impl From<MulticastGroupEntry> for Entity {
    fn from(m: MulticastGroupEntry) -> Self {
        Entity::MulticastGroupEntry(m)
    }
}

impl From<CloneSessionEntry> for Entity {
    fn from(c: CloneSessionEntry) -> Self {
        Entity::CloneSessionEntry(c)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpdateType {
    Unspecified,
    Insert,
    Modify,
    Delete,
}

impl Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use UpdateType::*;
        let s = match self {
            Unspecified => "UNSPECIFIED",
            Insert => "INSERT",
            Modify => "MODIFY",
            Delete => "DELETE",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Update {
    pub update_type: UpdateType,
    pub entity: Entity,
}

impl Update {
    pub fn insert(entity: impl Into<Entity>) -> Self {
        Update {
            update_type: UpdateType::Insert,
            entity: entity.into(),
        }
    }

    pub fn modify(entity: impl Into<Entity>) -> Self {
        Update {
            update_type: UpdateType::Modify,
            entity: entity.into(),
        }
    }

    pub fn delete(entity: impl Into<Entity>) -> Self {
        Update {
            update_type: UpdateType::Delete,
            entity: entity.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Atomicity {
    #[default]
    ContinueOnError,
    RollbackOnError,
    DataplaneAtomic,
}

/// A write batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteRequest {
    pub device_id: u64,
    pub role_id: u64,
    pub election_id: Option<Uint128>,
    pub updates: Vec<Update>,
    pub atomicity: Atomicity,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadRequest {
    pub device_id: u64,
    pub entities: Vec<Entity>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketMetadata {
    pub metadata_id: u32,
    pub value: Vec<u8>,
}

/// A packet sent by the controller to the device's CPU port.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketOut {
    pub payload: Vec<u8>,
    pub metadata: Vec<PacketMetadata>,
}

/// A packet the device sends to the controller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketIn {
    pub payload: Vec<u8>,
    pub metadata: Vec<PacketMetadata>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MasterArbitrationUpdate {
    pub device_id: u64,
    pub role_id: u64,
    pub election_id: Option<Uint128>,
    /// Set by the device in its replies.
    pub status: Option<Status>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DigestList {
    pub digest_id: u32,
    pub list_id: u64,
    /// Each element is an encoded `p4.v1.P4Data`; the harness does not
    /// interpret digests.
    pub data: Vec<Vec<u8>>,
    pub timestamp: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdleTimeoutNotification {
    pub table_entries: Vec<TableEntry>,
    pub timestamp: i64,
}

/// An asynchronous error report for a stream message the device could not
/// handle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamError {
    pub canonical_code: i32,
    pub message: String,
    pub packet_out: Option<PacketOut>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessageRequest {
    Arbitration(MasterArbitrationUpdate),
    Packet(PacketOut),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessageResponse {
    Arbitration(MasterArbitrationUpdate),
    Packet(PacketIn),
    Digest(DigestList),
    IdleTimeoutNotification(IdleTimeoutNotification),
    Error(StreamError),
}

/// The kinds of inbound stream messages, for selecting among them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamMessageKind {
    Arbitration,
    Packet,
    Digest,
    IdleTimeoutNotification,
    Error,
}

impl Display for StreamMessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use StreamMessageKind::*;
        let s = match self {
            Arbitration => "arbitration",
            Packet => "packet",
            Digest => "digest",
            IdleTimeoutNotification => "idle_timeout_notification",
            Error => "error",
        };
        write!(f, "{}", s)
    }
}

impl StreamMessageResponse {
    pub fn kind(&self) -> StreamMessageKind {
        match self {
            StreamMessageResponse::Arbitration(_) => StreamMessageKind::Arbitration,
            StreamMessageResponse::Packet(_) => StreamMessageKind::Packet,
            StreamMessageResponse::Digest(_) => StreamMessageKind::Digest,
            StreamMessageResponse::IdleTimeoutNotification(_) => {
                StreamMessageKind::IdleTimeoutNotification
            }
            StreamMessageResponse::Error(_) => StreamMessageKind::Error,
        }
    }
}

/// A forwarding pipeline: the P4Info (in text format) plus the
/// target-specific device configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ForwardingPipelineConfig {
    pub p4info: String,
    pub p4_device_config: Vec<u8>,
    pub cookie: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetPipelineAction {
    Verify,
    VerifyAndSave,
    VerifyAndCommit,
    Commit,
    ReconcileAndCommit,
}

impl FromStr for SetPipelineAction {
    type Err = P4Error;

    fn from_str(s: &str) -> Result<Self> {
        use SetPipelineAction::*;
        match s {
            "verify" => Ok(Verify),
            "verify-and-save" => Ok(VerifyAndSave),
            "verify-and-commit" => Ok(VerifyAndCommit),
            "commit" => Ok(Commit),
            "reconcile-and-commit" => Ok(ReconcileAndCommit),
            _ => Err(P4Error::invalid(format!("{:?}: unknown pipeline action", s))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PipelineResponseType {
    #[default]
    All,
    CookieOnly,
    P4InfoAndCookie,
    DeviceConfigAndCookie,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetForwardingPipelineConfigRequest {
    pub device_id: u64,
    pub role_id: u64,
    pub election_id: Option<Uint128>,
    pub action: SetPipelineAction,
    pub config: ForwardingPipelineConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetForwardingPipelineConfigRequest {
    pub device_id: u64,
    pub response_type: PipelineResponseType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint128() {
        let x: Uint128 = "18446744073709551617".parse().unwrap();
        assert_eq!(x, Uint128 { high: 1, low: 1 });
        assert_eq!(u128::from(x), (1u128 << 64) + 1);
        assert_eq!(x.to_string(), "18446744073709551617");
        assert!("-1".parse::<Uint128>().is_err());
    }

    #[test]
    fn replication_entries() {
        let mc = MulticastGroupEntry::with_ports(1, vec![1, 2, 3]);
        assert_eq!(mc.replicas.len(), 3);
        assert!(mc.replicas.iter().all(|r| r.instance == 0));
        assert_eq!(mc.replicas[2].egress_port, 3);

        let cs = CloneSessionEntry::with_ports(99, vec![255], 0, 0);
        assert_eq!(cs.replicas, vec![Replica { egress_port: 255, instance: 1 }]);

        assert_eq!(Entity::from(mc).summary(), "multicast group 1");
    }

    #[test]
    fn pipeline_actions() {
        assert_eq!("verify".parse::<SetPipelineAction>().unwrap(), SetPipelineAction::Verify);
        assert_eq!(
            "verify-and-commit".parse::<SetPipelineAction>().unwrap(),
            SetPipelineAction::VerifyAndCommit
        );
        assert!("reconcile".parse::<SetPipelineAction>().is_err());
    }
}
