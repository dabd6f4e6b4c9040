//! Node hierarchy command handling.
//!
//! The coordinator drives a node through the domain → cluster → channel
//! overlay by sending one command at a time. Each command is answered with a
//! [`CommandResponse`] carrying the same `requestId`; handlers never panic
//! and every failure becomes `{success:false, error}`.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use canopy_shared::constants::{
    CMD_ADD_NODE_TO_CHANNEL, CMD_REGISTER_TO_CHANNEL, CMD_REGISTER_TO_CLUSTER,
};
use canopy_shared::protocol::{
    AddNodeToChannel, CommandResponse, ConfirmRegistration, Envelope, NodeCommand,
    RegisterToChannel, RegisterToCluster, RegisterToDomain,
};
use canopy_shared::types::{GroupLevel, RegistrationState};
use canopy_store::{
    ChannelMainNode, ChannelMemberNode, ClusterMainNode, DomainMainNode, StoreError,
    STATUS_ACTIVE,
};

use crate::capacity::{Assignment, CapacityAssigner};
use crate::error::CommandError;
use crate::registry::NodeRegistry;
use crate::state::ClientState;

/// What a handler produced, before it is wrapped into a response.
enum Reply {
    Done(Map<String, Value>),
    /// `success:false` without an error, e.g. `requiresNewCluster`.
    Signal(Map<String, Value>),
}

/// Result of `add_node_to_channel`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelAddition {
    /// The target is this machine. The membership is stored and nothing is forwarded.
    ReflexiveRegistration {
        member: ChannelMemberNode,
        stored: bool,
    },
    /// The target is remote. `payload` is what the coordinator should relay.
    Forward {
        member: ChannelMemberNode,
        stored: bool,
        payload: Value,
    },
}

impl ChannelAddition {
    fn into_fields(self) -> Map<String, Value> {
        match self {
            Self::ReflexiveRegistration { member, stored } => object(json!({
                "reflexive": true,
                "stored": stored,
                "nodeId": member.node_id,
                "channelId": member.channel_id,
            })),
            Self::Forward {
                member,
                stored,
                payload,
            } => object(json!({
                "reflexive": false,
                "stored": stored,
                "nodeId": member.node_id,
                "channelId": member.channel_id,
                "forward": payload,
            })),
        }
    }
}

pub struct NodeHierarchyCoordinator {
    registry: NodeRegistry,
    state: Arc<ClientState>,
    assigner: CapacityAssigner,
}

impl NodeHierarchyCoordinator {
    pub fn new(registry: NodeRegistry, state: Arc<ClientState>) -> Self {
        Self {
            registry,
            state,
            assigner: CapacityAssigner::default(),
        }
    }

    pub fn with_assigner(mut self, assigner: CapacityAssigner) -> Self {
        self.assigner = assigner;
        self
    }

    /// Parse and execute one command envelope.
    pub fn process_command(&self, envelope: &Envelope) -> CommandResponse {
        let request_id = envelope.request_id.clone().unwrap_or_default();
        match NodeCommand::parse(&envelope.kind, &envelope.data) {
            Ok(command) => self.execute(&request_id, &command),
            Err(e) => {
                warn!(kind = %envelope.kind, request_id = %request_id, error = %e, "Rejected command");
                CommandResponse::failure(&request_id, &envelope.kind, e.to_string())
            }
        }
    }

    /// Execute an already parsed command.
    pub fn execute(&self, request_id: &str, command: &NodeCommand) -> CommandResponse {
        let name = command.name();
        debug!(command = name, request_id, "Processing command");

        match self.dispatch(command) {
            Ok(Reply::Done(extra)) => CommandResponse::ok(request_id, name, extra),
            Ok(Reply::Signal(extra)) => CommandResponse::signal(request_id, name, extra),
            Err(e) => {
                warn!(command = name, request_id, error = %e, "Command failed");
                CommandResponse::failure(request_id, name, e.to_string())
            }
        }
    }

    fn dispatch(&self, command: &NodeCommand) -> Result<Reply, CommandError> {
        match command {
            NodeCommand::CreateDomainNode(_) => self.create_domain_node().map(Reply::Done),
            NodeCommand::CreateClusterNode(r) => self.create_cluster_node(&r.node_id).map(Reply::Done),
            NodeCommand::CreateChannelNode(r) => self.create_channel_node(&r.node_id).map(Reply::Done),
            NodeCommand::RegisterToDomain(cmd) => self.register_to_domain(cmd),
            NodeCommand::RegisterToCluster(cmd) => self.register_to_cluster(cmd),
            NodeCommand::RegisterToChannel(cmd) => self.register_to_channel(cmd).map(Reply::Done),
            NodeCommand::AddNodeToChannel(cmd) => self
                .add_node_to_channel(cmd)
                .map(|addition| Reply::Done(addition.into_fields())),
            NodeCommand::ConfirmRegistration(cmd) => self.confirm_registration(cmd).map(Reply::Done),
            NodeCommand::GetNodeStatus(r) => self.get_node_status(&r.node_id).map(Reply::Done),
            NodeCommand::UpdateNodeInfo(r) => self.update_node_info(&r.node_id).map(Reply::Done),
        }
    }

    // ------------------------------------------------------------------
    // Group creation
    // ------------------------------------------------------------------

    fn create_domain_node(&self) -> Result<Map<String, Value>, CommandError> {
        let client_id = self.state.client_id();
        let node = self
            .registry
            .with(|db| {
                let Some(user) = db.get_current_user(client_id)? else {
                    return Ok(None);
                };
                let node_id = match user.node_id {
                    Some(id) => id,
                    None => db.ensure_node_id(client_id)?,
                };
                let now = Utc::now();
                let node = DomainMainNode {
                    node_id,
                    domain_id: GroupLevel::Domain.generate_id(),
                    status: STATUS_ACTIVE.to_string(),
                    member_count: 1,
                    created_at: now,
                    updated_at: now,
                };
                db.insert_domain_node(&node)?;
                db.update_user_assignment(&node.node_id, Some(&node.domain_id), None, None)?;
                Ok(Some(node))
            })?
            .ok_or_else(|| CommandError::Precondition("No current user set".into()))?;

        info!(domain_id = %node.domain_id, node_id = %node.node_id, "Domain created");
        Ok(object(json!({
            "domain_id": node.domain_id,
            "node_id": node.node_id,
        })))
    }

    fn create_cluster_node(&self, node_id: &str) -> Result<Map<String, Value>, CommandError> {
        let cluster = self
            .registry
            .with(|db| {
                let Some(domain) = db.find_domain_by_node(node_id)? else {
                    return Ok(None);
                };
                let now = Utc::now();
                let cluster = ClusterMainNode {
                    node_id: node_id.to_string(),
                    domain_id: domain.domain_id,
                    cluster_id: GroupLevel::Cluster.generate_id(),
                    status: STATUS_ACTIVE.to_string(),
                    member_count: 1,
                    created_at: now,
                    updated_at: now,
                };
                db.insert_cluster_node(&cluster)?;
                db.update_user_assignment(
                    node_id,
                    Some(&cluster.domain_id),
                    Some(&cluster.cluster_id),
                    None,
                )?;
                Ok(Some(cluster))
            })?
            .ok_or_else(|| {
                CommandError::Precondition(format!("No domain found for node_id: {node_id}"))
            })?;

        info!(cluster_id = %cluster.cluster_id, domain_id = %cluster.domain_id, node_id, "Cluster created");
        Ok(object(json!({
            "cluster_id": cluster.cluster_id,
            "domain_id": cluster.domain_id,
            "node_id": cluster.node_id,
        })))
    }

    fn create_channel_node(&self, node_id: &str) -> Result<Map<String, Value>, CommandError> {
        let channel = self
            .registry
            .with(|db| {
                let Some(cluster) = db.find_cluster_by_node(node_id)? else {
                    return Ok(None);
                };
                let now = Utc::now();
                let channel = ChannelMainNode {
                    node_id: node_id.to_string(),
                    domain_id: cluster.domain_id,
                    cluster_id: cluster.cluster_id,
                    channel_id: GroupLevel::Channel.generate_id(),
                    status: STATUS_ACTIVE.to_string(),
                    member_count: 1,
                    created_at: now,
                    updated_at: now,
                };
                db.insert_channel_node(&channel)?;
                db.insert_channel_member(&ChannelMemberNode {
                    node_id: node_id.to_string(),
                    domain_id: channel.domain_id.clone(),
                    cluster_id: channel.cluster_id.clone(),
                    channel_id: channel.channel_id.clone(),
                    created_at: now,
                    updated_at: now,
                })?;
                db.update_user_assignment(
                    node_id,
                    Some(&channel.domain_id),
                    Some(&channel.cluster_id),
                    Some(&channel.channel_id),
                )?;
                Ok(Some(channel))
            })?
            .ok_or_else(|| {
                CommandError::Precondition(format!("No cluster found for node_id: {node_id}"))
            })?;

        info!(channel_id = %channel.channel_id, cluster_id = %channel.cluster_id, node_id, "Channel created");
        Ok(object(json!({
            "channel_id": channel.channel_id,
            "cluster_id": channel.cluster_id,
            "domain_id": channel.domain_id,
            "node_id": channel.node_id,
        })))
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    fn register_to_domain(&self, cmd: &RegisterToDomain) -> Result<Reply, CommandError> {
        let (domain, clusters) = self
            .registry
            .with(|db| {
                let Some(domain) = found(db.get_domain_node(&cmd.domain_id))? else {
                    return Ok(None);
                };
                let clusters = db.list_clusters_in_domain(&domain.domain_id)?;
                Ok(Some((domain, clusters)))
            })?
            .ok_or_else(|| CommandError::Precondition("Domain not found".into()))?;

        if domain.node_id != cmd.node_id {
            return Err(CommandError::Precondition(
                "Node ID does not match domain main node".into(),
            ));
        }

        let mut reply = match self.assigner.assign(&domain.domain_id, &clusters) {
            Assignment::Assigned(cluster) => {
                info!(domain_id = %domain.domain_id, cluster_id = %cluster.cluster_id, "Cluster assigned");
                Reply::Done(object(json!({
                    "domainId": domain.domain_id,
                    "clusterId": cluster.cluster_id,
                    "clusterNodeId": cluster.node_id,
                    "memberCount": cluster.member_count,
                    "nextStep": CMD_REGISTER_TO_CLUSTER,
                })))
            }
            Assignment::RequiresNewGroup { parent_id } => {
                info!(domain_id = %parent_id, candidates = clusters.len(), "Every cluster is full");
                Reply::Signal(object(json!({
                    "requiresNewCluster": true,
                    "domainId": parent_id,
                })))
            }
        };
        with_target(&mut reply, cmd.target_node_id.as_deref());
        Ok(reply)
    }

    fn register_to_cluster(&self, cmd: &RegisterToCluster) -> Result<Reply, CommandError> {
        let (cluster, channels) = self
            .registry
            .with(|db| {
                let Some(cluster) = found(db.get_cluster_node(&cmd.cluster_id))? else {
                    return Ok(None);
                };
                let channels = db.list_channels_in_cluster(&cluster.cluster_id)?;
                Ok(Some((cluster, channels)))
            })?
            .ok_or_else(|| CommandError::Precondition("Cluster not found".into()))?;

        if cluster.node_id != cmd.node_id {
            return Err(CommandError::Precondition(
                "Node ID does not match cluster main node".into(),
            ));
        }

        let mut reply = match self.assigner.assign(&cluster.cluster_id, &channels) {
            Assignment::Assigned(channel) => {
                info!(cluster_id = %cluster.cluster_id, channel_id = %channel.channel_id, "Channel assigned");
                Reply::Done(object(json!({
                    "clusterId": cluster.cluster_id,
                    "domainId": cluster.domain_id,
                    "channelId": channel.channel_id,
                    "channelNodeId": channel.node_id,
                    "memberCount": channel.member_count,
                    "nextStep": CMD_REGISTER_TO_CHANNEL,
                })))
            }
            Assignment::RequiresNewGroup { parent_id } => {
                info!(cluster_id = %parent_id, candidates = channels.len(), "Every channel is full");
                Reply::Signal(object(json!({
                    "requiresNewChannel": true,
                    "clusterId": parent_id,
                })))
            }
        };
        with_target(&mut reply, cmd.target_node_id.as_deref());
        Ok(reply)
    }

    fn register_to_channel(&self, cmd: &RegisterToChannel) -> Result<Map<String, Value>, CommandError> {
        let (channel, members) = self
            .registry
            .with(|db| {
                let Some(channel) = found(db.get_channel_node(&cmd.channel_id))? else {
                    return Ok(None);
                };
                let members = db.list_channel_members(&channel.channel_id)?;
                Ok(Some((channel, members)))
            })?
            .ok_or_else(|| CommandError::Precondition("Channel not found".into()))?;

        if channel.node_id != cmd.node_id {
            return Err(CommandError::Precondition(
                "Node ID does not match channel main node".into(),
            ));
        }

        // Delivered by the coordinator to the registering node.
        let confirmation = NodeCommand::ConfirmRegistration(ConfirmRegistration {
            confirmed_by: GroupLevel::Channel,
            node_id: cmd.target_node_id.clone(),
            main_node_id: Some(channel.node_id.clone()),
            domain_id: channel.domain_id.clone(),
            cluster_id: Some(channel.cluster_id.clone()),
            channel_id: Some(channel.channel_id.clone()),
            member_count: Some(channel.member_count),
            status: Some(channel.status.clone()),
        });
        let mut confirmation = serde_json::to_value(confirmation)
            .map_err(|e| CommandError::Validation(e.to_string()))?;
        if let Value::Object(map) = &mut confirmation {
            map.insert("targetNodeId".into(), json!(cmd.target_node_id));
        }

        info!(
            channel_id = %channel.channel_id,
            target_node_id = %cmd.target_node_id,
            members = members.len(),
            "Channel registration prepared"
        );
        Ok(object(json!({
            "channelId": channel.channel_id,
            "clusterId": channel.cluster_id,
            "domainId": channel.domain_id,
            "memberCount": channel.member_count,
            "members": members,
            "targetNodeId": cmd.target_node_id,
            "confirmation": confirmation,
        })))
    }

    /// Record `target_node_id` as a member of a channel.
    ///
    /// When the target is one of this machine's own nodes the message is about
    /// ourselves: store it and stop, never forward.
    pub fn add_node_to_channel(&self, cmd: &AddNodeToChannel) -> Result<ChannelAddition, CommandError> {
        let now = Utc::now();
        let member = ChannelMemberNode {
            node_id: cmd.target_node_id.clone(),
            domain_id: cmd.domain_id.clone(),
            cluster_id: cmd.cluster_id.clone(),
            channel_id: cmd.channel_id.clone(),
            created_at: now,
            updated_at: now,
        };

        let addition = self.registry.with(|db| {
            if db.is_local_node(&member.node_id)? {
                let stored = db.insert_channel_member(&member)?;
                db.update_user_assignment(
                    &member.node_id,
                    Some(&member.domain_id),
                    Some(&member.cluster_id),
                    Some(&member.channel_id),
                )?;
                return Ok(ChannelAddition::ReflexiveRegistration {
                    member: member.clone(),
                    stored,
                });
            }

            let stored = db.insert_channel_member(&member)?;
            if stored {
                db.increment_channel_member_count(&member.channel_id, now)?;
            }
            let recipients: Vec<String> = db
                .list_channel_members(&member.channel_id)?
                .into_iter()
                .map(|m| m.node_id)
                .filter(|id| *id != member.node_id)
                .collect();
            let payload = json!({
                "type": CMD_ADD_NODE_TO_CHANNEL,
                "data": {
                    "target_node_id": member.node_id,
                    "domain_id": member.domain_id,
                    "cluster_id": member.cluster_id,
                    "channel_id": member.channel_id,
                },
                "recipients": recipients,
            });
            Ok(ChannelAddition::Forward {
                member: member.clone(),
                stored,
                payload,
            })
        })?;

        match &addition {
            ChannelAddition::ReflexiveRegistration { stored, .. } => {
                debug!(channel_id = %cmd.channel_id, stored, "Reflexive channel registration")
            }
            ChannelAddition::Forward { stored, .. } => {
                info!(channel_id = %cmd.channel_id, target_node_id = %cmd.target_node_id, stored, "Channel member added")
            }
        }
        Ok(addition)
    }

    /// Cache the group that confirmed us and advance the handshake.
    ///
    /// Each level keeps a single row: a confirmation replaces whatever was
    /// cached for that level before.
    fn confirm_registration(&self, cmd: &ConfirmRegistration) -> Result<Map<String, Value>, CommandError> {
        let level = cmd.confirmed_by;
        let now = Utc::now();
        let main_node_id = cmd.main_node_id.clone().unwrap_or_else(|| cmd.node_id.clone());
        let status = cmd.status.clone().unwrap_or_else(|| STATUS_ACTIVE.to_string());
        let member_count = cmd.member_count.unwrap_or(1);

        let cleared = match level {
            GroupLevel::Domain => {
                let row = DomainMainNode {
                    node_id: main_node_id,
                    domain_id: cmd.domain_id.clone(),
                    status,
                    member_count,
                    created_at: now,
                    updated_at: now,
                };
                self.registry.with(|db| {
                    let cleared = db.replace_domain_nodes(&row)?;
                    db.update_user_assignment(&cmd.node_id, Some(&row.domain_id), None, None)?;
                    Ok(cleared)
                })?
            }
            GroupLevel::Cluster => {
                let cluster_id = required(&cmd.cluster_id, "cluster_id")?;
                let row = ClusterMainNode {
                    node_id: main_node_id,
                    domain_id: cmd.domain_id.clone(),
                    cluster_id: cluster_id.to_string(),
                    status,
                    member_count,
                    created_at: now,
                    updated_at: now,
                };
                self.registry.with(|db| {
                    let cleared = db.replace_cluster_nodes(&row)?;
                    db.update_user_assignment(
                        &cmd.node_id,
                        Some(&row.domain_id),
                        Some(&row.cluster_id),
                        None,
                    )?;
                    Ok(cleared)
                })?
            }
            GroupLevel::Channel => {
                let cluster_id = required(&cmd.cluster_id, "cluster_id")?;
                let channel_id = required(&cmd.channel_id, "channel_id")?;
                let row = ChannelMainNode {
                    node_id: main_node_id,
                    domain_id: cmd.domain_id.clone(),
                    cluster_id: cluster_id.to_string(),
                    channel_id: channel_id.to_string(),
                    status,
                    member_count,
                    created_at: now,
                    updated_at: now,
                };
                let member = ChannelMemberNode {
                    node_id: cmd.node_id.clone(),
                    domain_id: row.domain_id.clone(),
                    cluster_id: row.cluster_id.clone(),
                    channel_id: row.channel_id.clone(),
                    created_at: now,
                    updated_at: now,
                };
                self.registry.with(|db| {
                    let cleared = db.replace_channel_nodes(&row)?;
                    db.insert_channel_member(&member)?;
                    db.update_user_assignment(
                        &cmd.node_id,
                        Some(&row.domain_id),
                        Some(&row.cluster_id),
                        Some(&row.channel_id),
                    )?;
                    Ok(cleared)
                })?
            }
        };

        let next_state = RegistrationState::after_confirm(level);
        self.state.set_registration(next_state);
        info!(
            confirmed_by = %level,
            node_id = %cmd.node_id,
            cleared,
            next_step = level.next_step(),
            "Registration confirmed"
        );

        let mut extra = object(json!({
            "confirmedBy": level,
            "domainId": cmd.domain_id,
            "cleared": cleared,
            "nextStep": level.next_step(),
            "registrationState": next_state,
        }));
        if let Some(cluster_id) = &cmd.cluster_id {
            extra.insert("clusterId".into(), json!(cluster_id));
        }
        if let Some(channel_id) = &cmd.channel_id {
            extra.insert("channelId".into(), json!(channel_id));
        }
        Ok(extra)
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    fn get_node_status(&self, node_id: &str) -> Result<Map<String, Value>, CommandError> {
        let mut status = self.registry.with(|db| {
            let domains: Vec<DomainMainNode> = db
                .list_domain_nodes()?
                .into_iter()
                .filter(|d| d.node_id == node_id)
                .collect();
            let clusters = db.list_clusters_for_node(node_id)?;
            let channels = db.list_channels_for_node(node_id)?;
            let memberships = db.list_memberships_for_node(node_id)?;
            let users = db.list_users_for_node(node_id)?;
            let is_local = db.is_local_node(node_id)?;
            Ok(object(json!({
                "nodeId": node_id,
                "isLocal": is_local,
                "domains": domains,
                "clusters": clusters,
                "channels": channels,
                "memberships": memberships,
                "users": users,
            })))
        })?;
        status.insert(
            "registrationState".into(),
            json!(self.state.registration()),
        );
        Ok(status)
    }

    fn update_node_info(&self, node_id: &str) -> Result<Map<String, Value>, CommandError> {
        let now = Utc::now();
        let touched = self.registry.with(|db| {
            Ok(json!({
                "domains": db.touch_domain_nodes(node_id, now)?,
                "clusters": db.touch_cluster_nodes(node_id, now)?,
                "channels": db.touch_channel_nodes(node_id, now)?,
                "members": db.touch_channel_members(node_id, now)?,
                "users": db.touch_local_users(node_id, now)?,
            }))
        })?;

        debug!(node_id, touched = %touched, "Node info refreshed");
        Ok(object(json!({
            "nodeId": node_id,
            "updatedAt": now.to_rfc3339(),
            "touched": touched,
        })))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// `NotFound` becomes `None`; other store errors pass through.
fn found<T>(result: Result<T, StoreError>) -> Result<Option<T>, StoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, CommandError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CommandError::Validation(format!("Missing required field: {field}")))
}

fn with_target(reply: &mut Reply, target_node_id: Option<&str>) {
    if let Some(target) = target_node_id {
        let extra = match reply {
            Reply::Done(extra) | Reply::Signal(extra) => extra,
        };
        extra.insert("targetNodeId".into(), json!(target));
    }
}
