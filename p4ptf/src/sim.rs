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

//! An in-memory P4Runtime device.
//!
//! [`SimDevice`] implements [`P4RuntimeTransport`] with the control-plane
//! behavior a harness depends on: primary election over the stream channel,
//! write validation with per-update errors, wildcard reads and forwarding
//! pipeline storage.  It does not forward packets: packet-outs are recorded
//! and packet-ins are injected by the test.

use async_trait::async_trait;

use futures::channel::mpsc as fmpsc;
use futures::StreamExt;

use tracing::{debug, warn};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::runtime::{
    Atomicity,
    Entity,
    FieldMatch,
    ForwardingPipelineConfig,
    GetForwardingPipelineConfigRequest,
    MasterArbitrationUpdate,
    PacketIn,
    PacketOut,
    PipelineResponseType,
    ReadRequest,
    SetForwardingPipelineConfigRequest,
    SetPipelineAction,
    StreamMessageRequest,
    StreamMessageResponse,
    TableAction,
    TableEntry,
    Uint128,
    Update,
    UpdateType,
    WriteRequest,
};
use crate::schema::Schema;
use crate::status::{Code, RpcStatus, Status, StatusDetail, UpdateError};
use crate::transport::{P4RuntimeTransport, RequestStream, ResponseStream};

/// How the device answers arbitration requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arbitration {
    /// The highest election id seen so far is primary.
    Elect,
    /// Every request is answered with this status code.
    Reject(Code),
    /// Requests are ignored.
    Silent,
}

/// Identity of an installed entity: everything except its payload.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum EntityKey {
    TableEntry {
        table_id: u32,
        matches: Vec<FieldMatch>,
        priority: i32,
    },
    ActionProfileMember {
        action_profile_id: u32,
        member_id: u32,
    },
    ActionProfileGroup {
        action_profile_id: u32,
        group_id: u32,
    },
    MulticastGroup(u32),
    CloneSession(u32),
}

impl From<&Entity> for EntityKey {
    fn from(entity: &Entity) -> Self {
        match entity {
            Entity::TableEntry(e) => {
                let mut matches = e.matches.clone();
                matches.sort();
                EntityKey::TableEntry {
                    table_id: e.table_id,
                    matches,
                    priority: e.priority,
                }
            }
            Entity::ActionProfileMember(m) => EntityKey::ActionProfileMember {
                action_profile_id: m.action_profile_id,
                member_id: m.member_id,
            },
            Entity::ActionProfileGroup(g) => EntityKey::ActionProfileGroup {
                action_profile_id: g.action_profile_id,
                group_id: g.group_id,
            },
            Entity::MulticastGroupEntry(m) => EntityKey::MulticastGroup(m.multicast_group_id),
            Entity::CloneSessionEntry(c) => EntityKey::CloneSession(c.session_id),
        }
    }
}

struct Channel {
    election_id: Option<Uint128>,
    sender: fmpsc::UnboundedSender<Result<StreamMessageResponse, RpcStatus>>,
}

struct State {
    arbitration: Arbitration,
    primary: Option<Uint128>,
    channels: BTreeMap<u64, Channel>,
    next_channel: u64,
    entities: BTreeMap<EntityKey, Entity>,
    defaults: BTreeMap<u32, TableEntry>,
    pipeline: Option<ForwardingPipelineConfig>,
    saved_pipeline: Option<ForwardingPipelineConfig>,
    schema: Option<Arc<Schema>>,
    writes: Vec<WriteRequest>,
    packets_out: Vec<PacketOut>,
}

pub struct SimDevice {
    device_id: u64,
    state: Arc<Mutex<State>>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn update_error(code: Code, message: impl Into<String>) -> UpdateError {
    UpdateError::new(code, message)
}

impl State {
    fn arbitrate(&mut self, channel_id: u64, device_id: u64, update: MasterArbitrationUpdate) {
        let (election_id, code, message) = match self.arbitration {
            Arbitration::Silent => {
                debug!("device {}: ignoring arbitration request", device_id);
                return;
            }
            Arbitration::Reject(code) => {
                (update.election_id, code, "arbitration rejected".to_string())
            }
            Arbitration::Elect if update.device_id != device_id => (
                update.election_id,
                Code::NotFound,
                format!("no device {}", update.device_id),
            ),
            Arbitration::Elect => {
                let election_id = update.election_id.unwrap_or_default();
                if let Some(channel) = self.channels.get_mut(&channel_id) {
                    channel.election_id = Some(election_id);
                }
                if self.primary.map_or(true, |primary| election_id >= primary) {
                    self.primary = Some(election_id);
                    (self.primary, Code::Ok, String::new())
                } else {
                    (self.primary, Code::AlreadyExists, "not the primary controller".into())
                }
            }
        };
        let reply = StreamMessageResponse::Arbitration(MasterArbitrationUpdate {
            device_id: update.device_id,
            role_id: update.role_id,
            election_id,
            status: Some(Status {
                code: code as i32,
                message,
                details: Vec::new(),
            }),
        });
        if let Some(channel) = self.channels.get(&channel_id) {
            let _ = channel.sender.unbounded_send(Ok(reply));
        }
    }

    fn check_primary(&self, election_id: Option<Uint128>) -> Result<(), RpcStatus> {
        if self.primary.is_none() || election_id != self.primary {
            return Err(RpcStatus::new(
                Code::PermissionDenied,
                "not the primary controller",
            ));
        }
        Ok(())
    }

    fn check_known(&self, entity: &Entity) -> Result<(), UpdateError> {
        let schema = match &self.schema {
            Some(schema) => schema,
            None => return Ok(()),
        };
        let profile_id = match entity {
            Entity::TableEntry(e) => {
                let table = schema
                    .table_by_id(e.table_id)
                    .map_err(|_| update_error(Code::NotFound, "no such table"))?;
                if let Some(TableAction::Action(a)) = &e.action {
                    if !table.actions.iter().any(|ar| ar.action.preamble.id == a.action_id) {
                        return Err(update_error(
                            Code::InvalidArgument,
                            "action not valid for table",
                        ));
                    }
                }
                return Ok(());
            }
            Entity::ActionProfileMember(m) => m.action_profile_id,
            Entity::ActionProfileGroup(g) => g.action_profile_id,
            Entity::MulticastGroupEntry(_) | Entity::CloneSessionEntry(_) => return Ok(()),
        };
        schema
            .action_profile_by_id(profile_id)
            .map(|_| ())
            .map_err(|_| update_error(Code::NotFound, "no such action profile"))
    }

    fn validate_write(op: UpdateType, entity_exists: bool) -> Result<(), UpdateError> {
        match (op, entity_exists) {
            (UpdateType::Unspecified, _) => {
                Err(update_error(Code::InvalidArgument, "update type is unspecified"))
            }
            (UpdateType::Insert, true) => {
                Err(update_error(Code::AlreadyExists, "entity already exists"))
            }
            (UpdateType::Modify | UpdateType::Delete, false) => {
                Err(update_error(Code::NotFound, "entity does not exist"))
            }
            _ => Ok(()),
        }
    }

    fn apply(
        &self,
        entities: &mut BTreeMap<EntityKey, Entity>,
        defaults: &mut BTreeMap<u32, TableEntry>,
        update: &Update,
    ) -> Result<(), UpdateError> {
        self.check_known(&update.entity)?;
        match &update.entity {
            Entity::TableEntry(e) if e.is_default_action => {
                if update.update_type != UpdateType::Modify {
                    return Err(update_error(
                        Code::InvalidArgument,
                        "the default entry can only be modified",
                    ));
                }
                defaults.insert(e.table_id, e.clone());
                return Ok(());
            }
            Entity::MulticastGroupEntry(m) if m.multicast_group_id == 0 => {
                return Err(update_error(
                    Code::InvalidArgument,
                    "multicast_group_id must not be zero",
                ));
            }
            Entity::CloneSessionEntry(c) if c.session_id == 0 => {
                return Err(update_error(Code::InvalidArgument, "session_id must not be zero"));
            }
            _ => (),
        }

        let key = EntityKey::from(&update.entity);
        Self::validate_write(update.update_type, entities.contains_key(&key))?;
        match update.update_type {
            UpdateType::Insert | UpdateType::Modify => {
                entities.insert(key, update.entity.clone());
            }
            UpdateType::Delete => {
                entities.remove(&key);
            }
            UpdateType::Unspecified => (),
        }
        Ok(())
    }

    fn read_matches(&self, wanted: &Entity) -> Vec<Entity> {
        if let Entity::TableEntry(w) = wanted {
            if w.is_default_action {
                return self
                    .defaults
                    .values()
                    .filter(|d| w.table_id == 0 || w.table_id == d.table_id)
                    .cloned()
                    .map(Entity::from)
                    .collect();
            }
        }

        let key = EntityKey::from(wanted);
        let matching = |entity: &&Entity| match (wanted, *entity) {
            (Entity::TableEntry(w), Entity::TableEntry(e)) => {
                w.table_id == 0
                    || (w.table_id == e.table_id
                        && (w.matches.is_empty() || key == EntityKey::from(*entity)))
            }
            (Entity::ActionProfileMember(w), Entity::ActionProfileMember(e)) => {
                w.action_profile_id == 0
                    || (w.action_profile_id == e.action_profile_id
                        && (w.member_id == 0 || w.member_id == e.member_id))
            }
            (Entity::ActionProfileGroup(w), Entity::ActionProfileGroup(e)) => {
                w.action_profile_id == 0
                    || (w.action_profile_id == e.action_profile_id
                        && (w.group_id == 0 || w.group_id == e.group_id))
            }
            (Entity::MulticastGroupEntry(w), Entity::MulticastGroupEntry(e)) => {
                w.multicast_group_id == 0 || w.multicast_group_id == e.multicast_group_id
            }
            (Entity::CloneSessionEntry(w), Entity::CloneSessionEntry(e)) => {
                w.session_id == 0 || w.session_id == e.session_id
            }
            _ => false,
        };
        self.entities.values().filter(matching).cloned().collect()
    }

    fn deliver(&self, message: StreamMessageResponse) {
        let primary = self
            .channels
            .values()
            .find(|c| c.election_id.is_some() && c.election_id == self.primary);
        match primary {
            Some(channel) => {
                let _ = channel.sender.unbounded_send(Ok(message));
            }
            None => {
                for channel in self.channels.values() {
                    let _ = channel.sender.unbounded_send(Ok(message.clone()));
                }
            }
        }
    }
}

impl SimDevice {
    pub fn new(device_id: u64) -> Self {
        SimDevice {
            device_id,
            state: Arc::new(Mutex::new(State {
                arbitration: Arbitration::Elect,
                primary: None,
                channels: BTreeMap::new(),
                next_channel: 0,
                entities: BTreeMap::new(),
                defaults: BTreeMap::new(),
                pipeline: None,
                saved_pipeline: None,
                schema: None,
                writes: Vec::new(),
                packets_out: Vec::new(),
            })),
        }
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn set_arbitration(&self, arbitration: Arbitration) {
        lock(&self.state).arbitration = arbitration;
    }

    /// The election id of the current primary controller.
    pub fn primary(&self) -> Option<Uint128> {
        lock(&self.state).primary
    }

    /// Sends `message` on the primary controller's stream, or on every open
    /// stream when there is no primary.
    pub fn inject(&self, message: StreamMessageResponse) {
        lock(&self.state).deliver(message);
    }

    pub fn inject_packet_in(&self, packet: PacketIn) {
        self.inject(StreamMessageResponse::Packet(packet));
    }

    /// Packet-outs received so far, in arrival order.
    pub fn packets_out(&self) -> Vec<PacketOut> {
        lock(&self.state).packets_out.clone()
    }

    /// Every write request received, including rejected ones.
    pub fn writes(&self) -> Vec<WriteRequest> {
        lock(&self.state).writes.clone()
    }

    /// The installed entities, excluding default entries.
    pub fn entities(&self) -> Vec<Entity> {
        lock(&self.state).entities.values().cloned().collect()
    }

    /// Installs a pipeline directly, as if a controller had committed it.
    pub fn install_pipeline(&self, config: ForwardingPipelineConfig) -> crate::Result<()> {
        let schema = Schema::from_text(&config.p4info)?;
        let mut state = lock(&self.state);
        state.schema = Some(Arc::new(schema));
        state.pipeline = Some(config);
        Ok(())
    }

    fn check_device(&self, device_id: u64) -> Result<(), RpcStatus> {
        if device_id != self.device_id {
            return Err(RpcStatus::new(
                Code::NotFound,
                format!("no device {}", device_id),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl P4RuntimeTransport for SimDevice {
    /// Must be called from within a tokio runtime; the device serves each
    /// stream from its own task.
    fn stream_channel(&self, mut requests: RequestStream) -> Result<ResponseStream, RpcStatus> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RpcStatus::new(Code::Unavailable, e.to_string()))?;

        let (sender, responses) = fmpsc::unbounded();
        let channel_id = {
            let mut state = lock(&self.state);
            let id = state.next_channel;
            state.next_channel += 1;
            state.channels.insert(
                id,
                Channel {
                    election_id: None,
                    sender,
                },
            );
            id
        };

        let state = self.state.clone();
        let device_id = self.device_id;
        runtime.spawn(async move {
            while let Some(request) = requests.next().await {
                let mut guard = lock(&state);
                match request {
                    StreamMessageRequest::Arbitration(update) => {
                        guard.arbitrate(channel_id, device_id, update)
                    }
                    StreamMessageRequest::Packet(packet) => {
                        debug!(
                            "device {}: packet-out of {} bytes",
                            device_id,
                            packet.payload.len()
                        );
                        guard.packets_out.push(packet);
                    }
                }
            }
            // Dropping the channel ends the response stream.
            lock(&state).channels.remove(&channel_id);
            debug!("device {}: stream {} closed by the controller", device_id, channel_id);
        });
        Ok(responses.boxed())
    }

    async fn write(&self, request: WriteRequest) -> Result<(), RpcStatus> {
        let mut state = lock(&self.state);
        state.writes.push(request.clone());
        self.check_device(request.device_id)?;
        state.check_primary(request.election_id)?;

        let mut entities = state.entities.clone();
        let mut defaults = state.defaults.clone();
        let results: Vec<Result<(), UpdateError>> = request
            .updates
            .iter()
            .map(|update| state.apply(&mut entities, &mut defaults, update))
            .collect();
        let failed = results.iter().any(Result::is_err);
        if !failed || request.atomicity == Atomicity::ContinueOnError {
            state.entities = entities;
            state.defaults = defaults;
        }
        if !failed {
            return Ok(());
        }

        let details: Vec<StatusDetail> = results
            .into_iter()
            .enumerate()
            .map(|(index, result)| match result {
                Ok(()) => StatusDetail::UpdateError(UpdateError::ok()),
                Err(e) => {
                    warn!(
                        "device {}: update {} failed ({}: {})",
                        self.device_id,
                        index,
                        Code::from_i32(e.canonical_code).unwrap_or(Code::Unknown),
                        e.message
                    );
                    StatusDetail::UpdateError(e)
                }
            })
            .collect();
        Err(RpcStatus::with_details(
            Code::Unknown,
            "write failed",
            Status {
                code: Code::Unknown as i32,
                message: "write failed".into(),
                details,
            },
        ))
    }

    async fn read(&self, request: ReadRequest) -> Result<Vec<Entity>, RpcStatus> {
        self.check_device(request.device_id)?;
        let state = lock(&self.state);
        Ok(request
            .entities
            .iter()
            .flat_map(|wanted| state.read_matches(wanted))
            .collect())
    }

    async fn set_forwarding_pipeline_config(
        &self,
        request: SetForwardingPipelineConfigRequest,
    ) -> Result<(), RpcStatus> {
        self.check_device(request.device_id)?;
        let mut state = lock(&self.state);
        state.check_primary(request.election_id)?;

        use SetPipelineAction::*;
        let config = match request.action {
            Commit => state.saved_pipeline.take().ok_or_else(|| {
                RpcStatus::new(Code::FailedPrecondition, "no saved forwarding pipeline")
            })?,
            _ => request.config,
        };
        let schema = Schema::from_text(&config.p4info)
            .map_err(|e| RpcStatus::new(Code::InvalidArgument, e.to_string()))?;
        match request.action {
            Verify => (),
            VerifyAndSave => state.saved_pipeline = Some(config),
            VerifyAndCommit | Commit | ReconcileAndCommit => {
                if request.action != ReconcileAndCommit {
                    state.entities.clear();
                    state.defaults.clear();
                }
                state.schema = Some(Arc::new(schema));
                state.pipeline = Some(config);
            }
        }
        Ok(())
    }

    async fn get_forwarding_pipeline_config(
        &self,
        request: GetForwardingPipelineConfigRequest,
    ) -> Result<ForwardingPipelineConfig, RpcStatus> {
        self.check_device(request.device_id)?;
        let state = lock(&self.state);
        let mut config = state.pipeline.clone().ok_or_else(|| {
            RpcStatus::new(Code::FailedPrecondition, "no forwarding pipeline is set")
        })?;
        match request.response_type {
            PipelineResponseType::All => (),
            PipelineResponseType::CookieOnly => {
                config.p4info.clear();
                config.p4_device_config.clear();
            }
            PipelineResponseType::P4InfoAndCookie => config.p4_device_config.clear(),
            PipelineResponseType::DeviceConfigAndCookie => config.p4info.clear(),
        }
        Ok(config)
    }
}
