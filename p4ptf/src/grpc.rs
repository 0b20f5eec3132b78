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

//! [`P4RuntimeTransport`] over gRPC.
//!
//! Converts between the harness's message types and the generated
//! `p4.v1` protobuf messages.  The P4Info travels as a protobuf message on
//! the wire and as text everywhere else, so pipeline configs go through
//! `protobuf::text_format`.

use async_trait::async_trait;

use futures::future;
use futures::{SinkExt, StreamExt, TryStreamExt};

use grpcio::{ChannelBuilder, EnvBuilder, WriteFlags};

use protobuf::{Message, RepeatedField};

use proto::p4runtime as p4;
use proto::p4runtime_grpc::P4RuntimeClient;

use tracing::{debug, warn};

use std::convert::TryFrom;
use std::sync::Arc;

use crate::runtime::{
    Action,
    ActionParam,
    ActionProfileGroup,
    ActionProfileMember,
    Atomicity,
    CloneSessionEntry,
    DigestList,
    Entity,
    FieldMatch,
    FieldMatchKind,
    ForwardingPipelineConfig,
    GetForwardingPipelineConfigRequest,
    GroupMember,
    IdleTimeoutNotification,
    MasterArbitrationUpdate,
    MulticastGroupEntry,
    PacketIn,
    PacketMetadata,
    PacketOut,
    PipelineResponseType,
    ReadRequest,
    Replica,
    SetForwardingPipelineConfigRequest,
    SetPipelineAction,
    StreamError,
    StreamMessageRequest,
    StreamMessageResponse,
    TableAction,
    TableEntry,
    Uint128,
    Update,
    UpdateType,
    WriteRequest,
};
use crate::schema;
use crate::status::{Code, RpcStatus, Status, StatusDetail, UpdateError};
use crate::transport::{P4RuntimeTransport, RequestStream, ResponseStream};

const P4_ERROR_TYPE_URL: &str = "type.googleapis.com/p4.v1.Error";

pub struct GrpcTransport {
    target: String,
    client: P4RuntimeClient,
}

impl GrpcTransport {
    /// Creates a client for the P4Runtime server at `target`, e.g.
    /// `localhost:50051`.  The channel connects lazily.
    pub fn connect(target: &str) -> Self {
        let env = Arc::new(EnvBuilder::new().build());
        let ch = ChannelBuilder::new(env).connect(target);
        GrpcTransport {
            target: target.to_string(),
            client: P4RuntimeClient::new(ch),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

fn invalid_message(message: impl Into<String>) -> RpcStatus {
    RpcStatus::new(Code::Internal, message)
}

/// Unpacks `google.rpc.Status` from the binary details of a failed call.
fn decode_details(bytes: &[u8]) -> Option<Status> {
    let status = proto::status::Status::parse_from_bytes(bytes).ok()?;
    let details = status
        .get_details()
        .iter()
        .map(|any| {
            let e = match any.get_type_url() {
                P4_ERROR_TYPE_URL => p4::Error::parse_from_bytes(any.get_value()).ok(),
                _ => None,
            };
            match e {
                Some(e) => StatusDetail::UpdateError(UpdateError {
                    canonical_code: e.get_canonical_code(),
                    message: e.get_message().into(),
                    space: e.get_space().into(),
                    code: e.get_code(),
                }),
                None => StatusDetail::Other {
                    type_url: any.get_type_url().into(),
                },
            }
        })
        .collect();
    Some(Status {
        code: status.get_code(),
        message: status.get_message().into(),
        details,
    })
}

fn rpc_status(e: grpcio::Error) -> RpcStatus {
    match e {
        grpcio::Error::RpcFailure(status) => {
            let code = Code::from_i32(status.code().into()).unwrap_or(Code::Unknown);
            let details = if status.details().is_empty() {
                None
            } else {
                decode_details(status.details())
            };
            RpcStatus {
                code,
                message: status.message().to_string(),
                details,
            }
        }
        e => RpcStatus::new(Code::Unavailable, e.to_string()),
    }
}

impl From<Uint128> for p4::Uint128 {
    fn from(x: Uint128) -> Self {
        let mut u = p4::Uint128::new();
        u.set_high(x.high);
        u.set_low(x.low);
        u
    }
}

impl From<&p4::Uint128> for Uint128 {
    fn from(x: &p4::Uint128) -> Self {
        Uint128 {
            high: x.get_high(),
            low: x.get_low(),
        }
    }
}

impl From<&FieldMatch> for p4::FieldMatch {
    fn from(m: &FieldMatch) -> Self {
        let mut fm = p4::FieldMatch::new();
        fm.set_field_id(m.field_id);
        match &m.kind {
            FieldMatchKind::Exact { value } => {
                let mut exact = p4::FieldMatch_Exact::new();
                exact.set_value(value.clone());
                fm.set_exact(exact);
            }
            FieldMatchKind::Lpm { value, prefix_len } => {
                let mut lpm = p4::FieldMatch_LPM::new();
                lpm.set_value(value.clone());
                lpm.set_prefix_len(*prefix_len);
                fm.set_lpm(lpm);
            }
            FieldMatchKind::Ternary { value, mask } => {
                let mut ternary = p4::FieldMatch_Ternary::new();
                ternary.set_value(value.clone());
                ternary.set_mask(mask.clone());
                fm.set_ternary(ternary);
            }
            FieldMatchKind::Range { low, high } => {
                let mut range = p4::FieldMatch_Range::new();
                range.set_low(low.clone());
                range.set_high(high.clone());
                fm.set_range(range);
            }
            FieldMatchKind::Optional { value } => {
                let mut optional = p4::FieldMatch_Optional::new();
                optional.set_value(value.clone());
                fm.set_optional(optional);
            }
        }
        fm
    }
}

impl TryFrom<&p4::FieldMatch> for FieldMatch {
    type Error = RpcStatus;

    fn try_from(fm: &p4::FieldMatch) -> Result<Self, RpcStatus> {
        let kind = if fm.has_exact() {
            FieldMatchKind::Exact {
                value: fm.get_exact().get_value().to_vec(),
            }
        } else if fm.has_lpm() {
            FieldMatchKind::Lpm {
                value: fm.get_lpm().get_value().to_vec(),
                prefix_len: fm.get_lpm().get_prefix_len(),
            }
        } else if fm.has_ternary() {
            FieldMatchKind::Ternary {
                value: fm.get_ternary().get_value().to_vec(),
                mask: fm.get_ternary().get_mask().to_vec(),
            }
        } else if fm.has_range() {
            FieldMatchKind::Range {
                low: fm.get_range().get_low().to_vec(),
                high: fm.get_range().get_high().to_vec(),
            }
        } else if fm.has_optional() {
            FieldMatchKind::Optional {
                value: fm.get_optional().get_value().to_vec(),
            }
        } else {
            return Err(invalid_message(format!(
                "field {}: unsupported match",
                fm.get_field_id()
            )));
        };
        Ok(FieldMatch {
            field_id: fm.get_field_id(),
            kind,
        })
    }
}

impl From<&Action> for p4::Action {
    fn from(a: &Action) -> Self {
        let mut action = p4::Action::new();
        action.set_action_id(a.action_id);
        action.set_params(
            a.params
                .iter()
                .map(|p| {
                    let mut param = p4::Action_Param::new();
                    param.set_param_id(p.param_id);
                    param.set_value(p.value.clone());
                    param
                })
                .collect(),
        );
        action
    }
}

impl From<&p4::Action> for Action {
    fn from(a: &p4::Action) -> Self {
        Action {
            action_id: a.get_action_id(),
            params: a
                .get_params()
                .iter()
                .map(|p| ActionParam {
                    param_id: p.get_param_id(),
                    value: p.get_value().to_vec(),
                })
                .collect(),
        }
    }
}

impl From<&TableEntry> for p4::TableEntry {
    fn from(e: &TableEntry) -> Self {
        let mut entry = p4::TableEntry::new();
        entry.set_table_id(e.table_id);
        entry.set_field_match(e.matches.iter().map(p4::FieldMatch::from).collect());
        if let Some(action) = &e.action {
            let mut table_action = p4::TableAction::new();
            match action {
                TableAction::Action(a) => table_action.set_action(a.into()),
                TableAction::MemberId(id) => table_action.set_action_profile_member_id(*id),
                TableAction::GroupId(id) => table_action.set_action_profile_group_id(*id),
            }
            entry.set_action(table_action);
        }
        entry.set_priority(e.priority);
        entry.set_is_default_action(e.is_default_action);
        entry
    }
}

impl TryFrom<&p4::TableEntry> for TableEntry {
    type Error = RpcStatus;

    fn try_from(e: &p4::TableEntry) -> Result<Self, RpcStatus> {
        let action = if e.has_action() {
            let a = e.get_action();
            if a.has_action() {
                Some(TableAction::Action(a.get_action().into()))
            } else if a.has_action_profile_member_id() {
                Some(TableAction::MemberId(a.get_action_profile_member_id()))
            } else if a.has_action_profile_group_id() {
                Some(TableAction::GroupId(a.get_action_profile_group_id()))
            } else {
                None
            }
        } else {
            None
        };
        Ok(TableEntry {
            table_id: e.get_table_id(),
            matches: e
                .get_field_match()
                .iter()
                .map(FieldMatch::try_from)
                .collect::<Result<Vec<_>, _>>()?,
            action,
            priority: e.get_priority(),
            is_default_action: e.get_is_default_action(),
        })
    }
}

fn replicas_to_proto(replicas: &[Replica]) -> RepeatedField<p4::Replica> {
    replicas
        .iter()
        .map(|r| {
            let mut replica = p4::Replica::new();
            replica.set_egress_port(r.egress_port);
            replica.set_instance(r.instance);
            replica
        })
        .collect()
}

fn replicas_from_proto(replicas: &[p4::Replica]) -> Vec<Replica> {
    replicas
        .iter()
        .map(|r| Replica {
            egress_port: r.get_egress_port(),
            instance: r.get_instance(),
        })
        .collect()
}

impl From<&Entity> for p4::Entity {
    fn from(entity: &Entity) -> Self {
        let mut e = p4::Entity::new();
        match entity {
            Entity::TableEntry(t) => e.set_table_entry(t.into()),
            Entity::ActionProfileMember(m) => {
                let mut member = p4::ActionProfileMember::new();
                member.set_action_profile_id(m.action_profile_id);
                member.set_member_id(m.member_id);
                member.set_action((&m.action).into());
                e.set_action_profile_member(member);
            }
            Entity::ActionProfileGroup(g) => {
                let mut group = p4::ActionProfileGroup::new();
                group.set_action_profile_id(g.action_profile_id);
                group.set_group_id(g.group_id);
                group.set_members(
                    g.members
                        .iter()
                        .map(|m| {
                            let mut member = p4::ActionProfileGroup_Member::new();
                            member.set_member_id(m.member_id);
                            member.set_weight(m.weight);
                            member
                        })
                        .collect(),
                );
                group.set_max_size(g.max_size);
                e.set_action_profile_group(group);
            }
            Entity::MulticastGroupEntry(m) => {
                let mut group = p4::MulticastGroupEntry::new();
                group.set_multicast_group_id(m.multicast_group_id);
                group.set_replicas(replicas_to_proto(&m.replicas));
                let mut pre = p4::PacketReplicationEngineEntry::new();
                pre.set_multicast_group_entry(group);
                e.set_packet_replication_engine_entry(pre);
            }
            Entity::CloneSessionEntry(c) => {
                let mut session = p4::CloneSessionEntry::new();
                session.set_session_id(c.session_id);
                session.set_replicas(replicas_to_proto(&c.replicas));
                session.set_class_of_service(c.class_of_service);
                session.set_packet_length_bytes(c.packet_length_bytes);
                let mut pre = p4::PacketReplicationEngineEntry::new();
                pre.set_clone_session_entry(session);
                e.set_packet_replication_engine_entry(pre);
            }
        }
        e
    }
}

impl TryFrom<&p4::Entity> for Entity {
    type Error = RpcStatus;

    fn try_from(e: &p4::Entity) -> Result<Self, RpcStatus> {
        if e.has_table_entry() {
            Ok(TableEntry::try_from(e.get_table_entry())?.into())
        } else if e.has_action_profile_member() {
            let m = e.get_action_profile_member();
            Ok(ActionProfileMember {
                action_profile_id: m.get_action_profile_id(),
                member_id: m.get_member_id(),
                action: m.get_action().into(),
            }
            .into())
        } else if e.has_action_profile_group() {
            let g = e.get_action_profile_group();
            Ok(ActionProfileGroup {
                action_profile_id: g.get_action_profile_id(),
                group_id: g.get_group_id(),
                members: g
                    .get_members()
                    .iter()
                    .map(|m| GroupMember {
                        member_id: m.get_member_id(),
                        weight: m.get_weight(),
                    })
                    .collect(),
                max_size: g.get_max_size(),
            }
            .into())
        } else if e.has_packet_replication_engine_entry() {
            let pre = e.get_packet_replication_engine_entry();
            if pre.has_multicast_group_entry() {
                let m = pre.get_multicast_group_entry();
                Ok(MulticastGroupEntry {
                    multicast_group_id: m.get_multicast_group_id(),
                    replicas: replicas_from_proto(m.get_replicas()),
                }
                .into())
            } else if pre.has_clone_session_entry() {
                let c = pre.get_clone_session_entry();
                Ok(CloneSessionEntry {
                    session_id: c.get_session_id(),
                    replicas: replicas_from_proto(c.get_replicas()),
                    class_of_service: c.get_class_of_service(),
                    packet_length_bytes: c.get_packet_length_bytes(),
                }
                .into())
            } else {
                Err(invalid_message("unsupported packet replication entry"))
            }
        } else {
            Err(invalid_message("unsupported entity"))
        }
    }
}

fn metadata_to_proto(metadata: &[PacketMetadata]) -> RepeatedField<p4::PacketMetadata> {
    metadata
        .iter()
        .map(|m| {
            let mut pm = p4::PacketMetadata::new();
            pm.set_metadata_id(m.metadata_id);
            pm.set_value(m.value.clone());
            pm
        })
        .collect()
}

fn metadata_from_proto(metadata: &[p4::PacketMetadata]) -> Vec<PacketMetadata> {
    metadata
        .iter()
        .map(|m| PacketMetadata {
            metadata_id: m.get_metadata_id(),
            value: m.get_value().to_vec(),
        })
        .collect()
}

fn status_to_proto(status: &Status) -> proto::status::Status {
    let mut s = proto::status::Status::new();
    s.set_code(status.code);
    s.set_message(status.message.clone());
    s
}

fn status_from_proto(s: &proto::status::Status) -> Status {
    Status {
        code: s.get_code(),
        message: s.get_message().into(),
        details: Vec::new(),
    }
}

fn stream_request_to_proto(request: StreamMessageRequest) -> p4::StreamMessageRequest {
    let mut r = p4::StreamMessageRequest::new();
    match request {
        StreamMessageRequest::Arbitration(update) => {
            let mut arbitration = p4::MasterArbitrationUpdate::new();
            arbitration.set_device_id(update.device_id);
            if update.role_id != 0 {
                let mut role = p4::Role::new();
                role.set_id(update.role_id);
                arbitration.set_role(role);
            }
            if let Some(election_id) = update.election_id {
                arbitration.set_election_id(election_id.into());
            }
            if let Some(status) = &update.status {
                arbitration.set_status(status_to_proto(status));
            }
            r.set_arbitration(arbitration);
        }
        StreamMessageRequest::Packet(packet) => {
            let mut packet_out = p4::PacketOut::new();
            packet_out.set_metadata(metadata_to_proto(&packet.metadata));
            packet_out.set_payload(packet.payload);
            r.set_packet(packet_out);
        }
    }
    r
}

/// Converts an inbound stream message.  `None` for message types the
/// harness does not model.
fn stream_response_from_proto(
    r: &p4::StreamMessageResponse,
) -> Option<Result<StreamMessageResponse, RpcStatus>> {
    if r.has_arbitration() {
        let a = r.get_arbitration();
        Some(Ok(StreamMessageResponse::Arbitration(MasterArbitrationUpdate {
            device_id: a.get_device_id(),
            role_id: a.get_role().get_id(),
            election_id: if a.has_election_id() {
                Some(a.get_election_id().into())
            } else {
                None
            },
            status: if a.has_status() {
                Some(status_from_proto(a.get_status()))
            } else {
                None
            },
        })))
    } else if r.has_packet() {
        let p = r.get_packet();
        Some(Ok(StreamMessageResponse::Packet(PacketIn {
            payload: p.get_payload().to_vec(),
            metadata: metadata_from_proto(p.get_metadata()),
        })))
    } else if r.has_digest() {
        let d = r.get_digest();
        let data = d
            .get_data()
            .iter()
            .map(|data| data.write_to_bytes().map_err(|e| invalid_message(e.to_string())))
            .collect::<Result<Vec<Vec<u8>>, RpcStatus>>();
        Some(data.map(|data| {
            StreamMessageResponse::Digest(DigestList {
                digest_id: d.get_digest_id(),
                list_id: d.get_list_id(),
                data,
                timestamp: d.get_timestamp(),
            })
        }))
    } else if r.has_idle_timeout_notification() {
        let n = r.get_idle_timeout_notification();
        let entries = n
            .get_table_entry()
            .iter()
            .map(TableEntry::try_from)
            .collect::<Result<Vec<_>, _>>();
        Some(entries.map(|table_entries| {
            StreamMessageResponse::IdleTimeoutNotification(IdleTimeoutNotification {
                table_entries,
                timestamp: n.get_timestamp(),
            })
        }))
    } else if r.has_error() {
        let e = r.get_error();
        let packet_out = if e.has_packet_out() {
            let p = e.get_packet_out().get_packet_out();
            Some(PacketOut {
                payload: p.get_payload().to_vec(),
                metadata: metadata_from_proto(p.get_metadata()),
            })
        } else {
            None
        };
        Some(Ok(StreamMessageResponse::Error(StreamError {
            canonical_code: e.get_canonical_code(),
            message: e.get_message().into(),
            packet_out,
        })))
    } else {
        None
    }
}

fn write_request_to_proto(request: &WriteRequest) -> p4::WriteRequest {
    let mut r = p4::WriteRequest::new();
    r.set_device_id(request.device_id);
    r.set_role_id(request.role_id);
    if let Some(election_id) = request.election_id {
        r.set_election_id(election_id.into());
    }
    r.set_updates(
        request
            .updates
            .iter()
            .map(|u: &Update| {
                let mut update = p4::Update::new();
                update.set_field_type(match u.update_type {
                    UpdateType::Unspecified => p4::Update_Type::UNSPECIFIED,
                    UpdateType::Insert => p4::Update_Type::INSERT,
                    UpdateType::Modify => p4::Update_Type::MODIFY,
                    UpdateType::Delete => p4::Update_Type::DELETE,
                });
                update.set_entity((&u.entity).into());
                update
            })
            .collect(),
    );
    r.set_atomicity(match request.atomicity {
        Atomicity::ContinueOnError => p4::WriteRequest_Atomicity::CONTINUE_ON_ERROR,
        Atomicity::RollbackOnError => p4::WriteRequest_Atomicity::ROLLBACK_ON_ERROR,
        Atomicity::DataplaneAtomic => p4::WriteRequest_Atomicity::DATAPLANE_ATOMIC,
    });
    r
}

fn pipeline_to_proto(
    config: &ForwardingPipelineConfig,
) -> Result<p4::ForwardingPipelineConfig, RpcStatus> {
    schema::check_nesting(&config.p4info)
        .map_err(|e| RpcStatus::new(Code::InvalidArgument, e.to_string()))?;
    let p4info = protobuf::text_format::parse_from_str(&config.p4info).map_err(|e| {
        RpcStatus::new(Code::InvalidArgument, format!("malformed P4Info ({})", e))
    })?;
    let mut c = p4::ForwardingPipelineConfig::new();
    c.set_p4info(p4info);
    c.set_p4_device_config(config.p4_device_config.clone());
    if let Some(cookie) = config.cookie {
        let mut jar = p4::ForwardingPipelineConfig_Cookie::new();
        jar.set_cookie(cookie);
        c.set_cookie(jar);
    }
    Ok(c)
}

fn pipeline_from_proto(c: &p4::ForwardingPipelineConfig) -> ForwardingPipelineConfig {
    ForwardingPipelineConfig {
        p4info: if c.has_p4info() {
            protobuf::text_format::print_to_string(c.get_p4info())
        } else {
            String::new()
        },
        p4_device_config: c.get_p4_device_config().to_vec(),
        cookie: if c.has_cookie() {
            Some(c.get_cookie().get_cookie())
        } else {
            None
        },
    }
}

#[async_trait]
impl P4RuntimeTransport for GrpcTransport {
    fn stream_channel(&self, requests: RequestStream) -> Result<ResponseStream, RpcStatus> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RpcStatus::new(Code::Unavailable, e.to_string()))?;
        let (mut sink, receiver) = self.client.stream_channel().map_err(rpc_status)?;

        let target = self.target.clone();
        runtime.spawn(async move {
            let mut requests =
                requests.map(|r| Ok((stream_request_to_proto(r), WriteFlags::default())));
            if let Err(e) = sink.send_all(&mut requests).await {
                warn!("{}: stream channel send failed ({})", target, e);
                return;
            }
            // Half-close, so the server ends its side of the stream.
            if let Err(e) = sink.close().await {
                debug!("{}: closing stream channel failed ({})", target, e);
            }
        });

        Ok(receiver
            .map_err(rpc_status)
            .filter_map(|r| {
                future::ready(match r {
                    Ok(response) => stream_response_from_proto(&response),
                    Err(e) => Some(Err(e)),
                })
            })
            .boxed())
    }

    async fn write(&self, request: WriteRequest) -> Result<(), RpcStatus> {
        let r = write_request_to_proto(&request);
        self.client
            .write_async(&r)
            .map_err(rpc_status)?
            .await
            .map_err(rpc_status)?;
        Ok(())
    }

    async fn read(&self, request: ReadRequest) -> Result<Vec<Entity>, RpcStatus> {
        let mut r = p4::ReadRequest::new();
        r.set_device_id(request.device_id);
        r.set_entities(request.entities.iter().map(p4::Entity::from).collect());

        let mut responses = self.client.read(&r).map_err(rpc_status)?;
        let mut entities = Vec::new();
        while let Some(response) = responses.next().await {
            for e in response.map_err(rpc_status)?.get_entities() {
                entities.push(Entity::try_from(e)?);
            }
        }
        Ok(entities)
    }

    async fn set_forwarding_pipeline_config(
        &self,
        request: SetForwardingPipelineConfigRequest,
    ) -> Result<(), RpcStatus> {
        use p4::SetForwardingPipelineConfigRequest_Action as A;

        let mut r = p4::SetForwardingPipelineConfigRequest::new();
        r.set_device_id(request.device_id);
        r.set_role_id(request.role_id);
        if let Some(election_id) = request.election_id {
            r.set_election_id(election_id.into());
        }
        r.set_action(match request.action {
            SetPipelineAction::Verify => A::VERIFY,
            SetPipelineAction::VerifyAndSave => A::VERIFY_AND_SAVE,
            SetPipelineAction::VerifyAndCommit => A::VERIFY_AND_COMMIT,
            SetPipelineAction::Commit => A::COMMIT,
            SetPipelineAction::ReconcileAndCommit => A::RECONCILE_AND_COMMIT,
        });
        r.set_config(pipeline_to_proto(&request.config)?);
        self.client
            .set_forwarding_pipeline_config_async(&r)
            .map_err(rpc_status)?
            .await
            .map_err(rpc_status)?;
        Ok(())
    }

    async fn get_forwarding_pipeline_config(
        &self,
        request: GetForwardingPipelineConfigRequest,
    ) -> Result<ForwardingPipelineConfig, RpcStatus> {
        use p4::GetForwardingPipelineConfigRequest_ResponseType as T;

        let mut r = p4::GetForwardingPipelineConfigRequest::new();
        r.set_device_id(request.device_id);
        r.set_response_type(match request.response_type {
            PipelineResponseType::All => T::ALL,
            PipelineResponseType::CookieOnly => T::COOKIE_ONLY,
            PipelineResponseType::P4InfoAndCookie => T::P4INFO_AND_COOKIE,
            PipelineResponseType::DeviceConfigAndCookie => T::DEVICE_CONFIG_AND_COOKIE,
        });
        let response = self
            .client
            .get_forwarding_pipeline_config_async(&r)
            .map_err(rpc_status)?
            .await
            .map_err(rpc_status)?;
        Ok(pipeline_from_proto(response.get_config()))
    }
}
